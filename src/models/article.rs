use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub raw_html: String,
    /// Cleaned text, one paragraph per line.
    pub processed_html: String,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Row shape served by the "latest articles" listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleListing {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub processed_html: String,
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub raw_html: String,
    pub processed_html: String,
}
