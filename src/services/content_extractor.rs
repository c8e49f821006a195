use regex::Regex;

/// Wide enough that html2text never wraps a paragraph onto two lines.
const RENDER_WIDTH: usize = 10_000;

/// Never carry readable text, removed wherever they appear.
const NON_CONTENT_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg", "iframe"];

/// Page chrome. Removed only outside `<article>`/`<main>`, where the same
/// elements hold the headline and byline.
const CHROME_ELEMENTS: &[&str] = &["nav", "header", "footer", "aside"];

/// Turns rendered article HTML into clean text: boilerplate stripped,
/// tables kept, images reduced to `[alt]` references, one paragraph per line.
pub struct ContentExtractor {
    comments: Regex,
    non_content: Vec<Regex>,
    chrome: Vec<Regex>,
    content_blocks: Regex,
    tags: Regex,
}

fn element_patterns(tags: &[&str]) -> Vec<Regex> {
    tags.iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
                .expect("element pattern is valid")
        })
        .collect()
}

impl ContentExtractor {
    pub fn new() -> Self {
        Self {
            comments: Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"),
            non_content: element_patterns(NON_CONTENT_ELEMENTS),
            chrome: element_patterns(CHROME_ELEMENTS),
            content_blocks: Regex::new(
                r"(?is)<main\b[^>]*>.*?</main\s*>|<article\b[^>]*>.*?</article\s*>",
            )
            .expect("content block pattern is valid"),
            tags: Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"),
        }
    }

    pub fn extract(&self, html: &str) -> String {
        let stripped = self.strip_boilerplate(html);

        let text = match html2text::from_read(stripped.as_bytes(), RENDER_WIDTH) {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!("Failed to convert HTML to text, falling back to tag strip: {}", e);
                self.tags.replace_all(&stripped, "\n").into_owned()
            }
        };

        clean_lines(&text)
    }

    fn strip_boilerplate(&self, html: &str) -> String {
        let mut out = self.comments.replace_all(html, "").into_owned();
        for pattern in &self.non_content {
            out = pattern.replace_all(&out, "").into_owned();
        }

        let mut kept = String::with_capacity(out.len());
        let mut last = 0;
        for block in self.content_blocks.find_iter(&out) {
            kept.push_str(&self.strip_chrome(&out[last..block.start()]));
            kept.push_str(block.as_str());
            last = block.end();
        }
        kept.push_str(&self.strip_chrome(&out[last..]));
        kept
    }

    fn strip_chrome(&self, html: &str) -> String {
        let mut out = html.to_string();
        for pattern in &self.chrome {
            out = pattern.replace_all(&out, "").into_owned();
        }
        out
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits processed text into its non-blank paragraphs.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn clean_lines(text: &str) -> String {
    text.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
