mod content_extractor;

pub use content_extractor::{split_paragraphs, ContentExtractor};
