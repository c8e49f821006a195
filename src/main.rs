use std::sync::Arc;

use newsulizer::error::{AppError, Result};
use newsulizer::models::ArticleParagraphs;
use newsulizer::{ArticleRepository, BrowserPool, Config};

const USAGE: &str = "usage: newsulizer <fetch|refresh|show|latest|analysis> [args]
  fetch <url>                 fetch an article (cached after the first time)
  refresh <url>               re-render an article and overwrite the cached copy
  show <url>                  print a cached article without fetching
  latest [count] [after_id]   list the newest cached articles as JSON
  analysis <url>              print the stored paragraph analysis";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{USAGE}");
        return Ok(());
    };

    let config = Config::load()?;

    let pool = Arc::new(BrowserPool::new(config.pool_options()));
    let repository =
        ArticleRepository::open(&config.db_path, pool.clone(), config.repository_options())
            .await?;

    let result = run(command, &args[1..], &repository).await;

    repository.close().await;
    pool.stop().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if matches!(e, AppError::Usage(_)) {
            eprintln!("{USAGE}");
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: &str, args: &[String], repository: &ArticleRepository) -> Result<()> {
    match command {
        "fetch" | "refresh" => {
            let url = required_url(args)?;
            let (title, text) = if command == "fetch" {
                repository.fetch_article(url).await?
            } else {
                repository.refresh_article(url).await?
            };
            println!("{}\n\n{}", title, text);
        }
        "show" => {
            let url = required_url(args)?;
            match repository.get_article(url).await? {
                Some((title, text)) => println!("{}\n\n{}", title, text),
                None => println!("Article not cached: {}", url),
            }
        }
        "latest" => {
            let count = parse_arg(args.first(), "count")?.unwrap_or(10);
            let after_id = parse_arg(args.get(1), "after_id")?;
            let articles = repository.get_latest_articles(count, after_id).await?;
            println!("{}", serde_json::to_string_pretty(&articles)?);
        }
        "analysis" => {
            let url = required_url(args)?;
            match repository.get_paragraphs(url).await? {
                Some(view) => print_analysis(&view),
                None => println!("Article not cached: {}", url),
            }
        }
        _ => return Err(AppError::Usage(format!("unknown command {:?}", command))),
    }
    Ok(())
}

fn required_url(args: &[String]) -> Result<&str> {
    args.first()
        .map(String::as_str)
        .ok_or_else(|| AppError::Usage("missing <url> argument".to_string()))
}

fn parse_arg<T: std::str::FromStr>(arg: Option<&String>, name: &str) -> Result<Option<T>> {
    arg.map(|s| {
        s.parse()
            .map_err(|_| AppError::Usage(format!("invalid {}: {:?}", name, s)))
    })
    .transpose()
}

/// Each paragraph wrapped at 80 columns, followed by its summary score and
/// its per-topic ratings.
fn print_analysis(view: &ArticleParagraphs) {
    println!("{}\n", view.title);
    if let Some(summary) = &view.summary {
        println!("Summary:\n{}\n", textwrap::fill(summary, 80));
    }

    for paragraph in &view.paragraphs {
        let score = view
            .summary_rating
            .get(&paragraph.id)
            .map(|r| format!("{:.0}%", r))
            .unwrap_or_else(|| "-".to_string());
        let topics = view
            .ratings_for(paragraph.id)
            .iter()
            .map(|r| format!("{}:{}", r.topic, if r.relevant { "YES" } else { "NO" }))
            .collect::<Vec<_>>()
            .join(",");
        let line = format!("{} ({}) [{}]", paragraph.text, score, topics);
        println!("{}\n", textwrap::fill(&line, 80));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_url_is_a_usage_error() {
        let err = required_url(&[]).unwrap_err();
        assert!(matches!(err, AppError::Usage(_)), "{err}");
        let args = vec!["https://example.com/a".to_string()];
        assert_eq!(required_url(&args).unwrap(), "https://example.com/a");
    }

    #[test]
    fn non_numeric_count_is_a_usage_error() {
        let arg = "ten".to_string();
        let err = parse_arg::<u32>(Some(&arg), "count").unwrap_err();
        assert!(matches!(err, AppError::Usage(_)), "{err}");
        assert_eq!(err.to_string(), "Usage error: invalid count: \"ten\"");
        assert_eq!(parse_arg::<i64>(None, "after_id").unwrap(), None);
    }
}
