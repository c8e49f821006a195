use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, OptionalExtension, Row};
use tokio::sync::Mutex;
use tokio_rusqlite::Connection;
use url::Url;

use crate::browser::PageRenderer;
use crate::error::{AppError, Result};
use crate::models::{
    Article, ArticleListing, ArticleParagraphs, NewAnalysis, NewArticle, Paragraph, Topic,
    TopicRating,
};
use crate::services::ContentExtractor;

use super::schema::ensure_schema;

#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    /// Upper bound for one page of `get_latest_articles`.
    pub max_page_size: u32,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self { max_page_size: 50 }
    }
}

/// Read-through cache of rendered articles plus the analysis written back by
/// the summarizing pipeline.
///
/// Every store access goes through `lock`; page rendering happens outside it
/// so fetches for different URLs only contend on the renderer's own gate.
pub struct ArticleRepository {
    conn: Connection,
    lock: Mutex<()>,
    renderer: Arc<dyn PageRenderer>,
    extractor: ContentExtractor,
    options: RepositoryOptions,
}

impl ArticleRepository {
    pub async fn open(
        db_path: impl AsRef<Path>,
        renderer: Arc<dyn PageRenderer>,
        options: RepositoryOptions,
    ) -> Result<Self> {
        let db_path = db_path.as_ref();
        let first_time = !db_path.exists();
        let conn = Connection::open(db_path).await?;

        if first_time {
            tracing::info!("Created fresh local database at {}", db_path.display());
        } else {
            tracing::info!("Reusing existing local database at {}", db_path.display());
        }

        Self::with_connection(conn, renderer, options).await
    }

    pub async fn open_in_memory(
        renderer: Arc<dyn PageRenderer>,
        options: RepositoryOptions,
    ) -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn, renderer, options).await
    }

    async fn with_connection(
        conn: Connection,
        renderer: Arc<dyn PageRenderer>,
        options: RepositoryOptions,
    ) -> Result<Self> {
        conn.call(|conn| {
            ensure_schema(conn)?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            lock: Mutex::new(()),
            renderer,
            extractor: ContentExtractor::new(),
            options,
        })
    }

    // Article operations

    /// Cached `(title, processed text)` for `url`, without touching the network.
    pub async fn get_article(&self, url: &str) -> Result<Option<(String, String)>> {
        let _guard = self.lock.lock().await;
        let article = self.find_by_url(url.to_string()).await?;

        match &article {
            Some(_) => tracing::info!(url, "Found cached article"),
            None => tracing::info!(url, "Article was not found"),
        }
        Ok(article.map(|a| (a.title, a.processed_html)))
    }

    pub async fn get_article_by_id(&self, id: i64) -> Result<Option<Article>> {
        let _guard = self.lock.lock().await;
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(
                        &format!("{ARTICLE_COLUMNS} WHERE id = ?1"),
                        params![id],
                        article_from_row,
                    )
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// Returns the cached article, rendering and storing it first on a miss.
    pub async fn fetch_article(&self, url: &str) -> Result<(String, String)> {
        validate_url(url)?;

        {
            let _guard = self.lock.lock().await;
            if let Some(article) = self.find_by_url(url.to_string()).await? {
                tracing::info!(url, "Found cached article");
                return Ok((article.title, article.processed_html));
            }
        }

        self.download(url).await
    }

    /// Re-renders `url` even when it is cached, overwriting the stored row.
    pub async fn refresh_article(&self, url: &str) -> Result<(String, String)> {
        validate_url(url)?;
        self.download(url).await
    }

    async fn download(&self, url: &str) -> Result<(String, String)> {
        tracing::info!(url, "Downloading article");
        let page = self.renderer.fetch_html(url).await?;
        let processed_html = self.extractor.extract(&page.html);

        let article = NewArticle {
            url: url.to_string(),
            title: page.title,
            raw_html: page.html,
            processed_html,
        };
        let result = (article.title.clone(), article.processed_html.clone());

        let _guard = self.lock.lock().await;
        let id = self.upsert_article(article).await?;
        tracing::debug!(url, id, bytes = result.1.len(), "Stored article");

        Ok(result)
    }

    async fn upsert_article(&self, article: NewArticle) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                let id = conn.query_row(
                    r#"INSERT INTO articles (url, title, raw_html, processed_html, fetched_at)
                       VALUES (?1, ?2, ?3, ?4, datetime('now'))
                       ON CONFLICT(url) DO UPDATE SET
                           title = excluded.title,
                           raw_html = excluded.raw_html,
                           processed_html = excluded.processed_html,
                           fetched_at = excluded.fetched_at
                       RETURNING id"#,
                    params![
                        article.url,
                        article.title,
                        article.raw_html,
                        article.processed_html
                    ],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    async fn find_by_url(&self, url: String) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(
                        &format!("{ARTICLE_COLUMNS} WHERE url = ?1"),
                        params![url],
                        article_from_row,
                    )
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// Newest articles first. `after_id` is an exclusive keyset cursor; a
    /// non-positive cursor means "start from the newest", same as `None`.
    pub async fn get_latest_articles(
        &self,
        count: u32,
        after_id: Option<i64>,
    ) -> Result<Vec<ArticleListing>> {
        let limit = count.clamp(1, self.options.max_page_size.max(1));
        let after_id = after_id.filter(|id| *id > 0);

        let _guard = self.lock.lock().await;
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, url, title, processed_html FROM articles
                       WHERE ?1 IS NULL OR id < ?1
                       ORDER BY id DESC
                       LIMIT ?2"#,
                )?;
                let articles = stmt
                    .query_map(params![after_id, limit], |row| {
                        Ok(ArticleListing {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            title: row.get(2)?,
                            processed_html: row.get(3)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    // Analysis operations

    /// True once an analysis (at least its summary) has been stored for `url`.
    pub async fn has_paragraphs(&self, url: &str) -> Result<bool> {
        let url = url.to_string();
        let _guard = self.lock.lock().await;
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    r#"SELECT COUNT(*) FROM summaries s
                       JOIN articles a ON a.id = s.article_id
                       WHERE a.url = ?1"#,
                    params![url],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    pub async fn get_paragraphs(&self, url: &str) -> Result<Option<ArticleParagraphs>> {
        let url = url.to_string();
        let _guard = self.lock.lock().await;
        let paragraphs = self
            .conn
            .call(move |conn| {
                let Some((article_id, title)) = conn
                    .query_row(
                        "SELECT id, title FROM articles WHERE url = ?1",
                        params![url],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                    )
                    .optional()?
                else {
                    return Ok(None);
                };

                let paragraphs = conn
                    .prepare(
                        "SELECT id, ordinal, paragraph_text FROM paragraphs WHERE article_id = ?1 ORDER BY ordinal, id",
                    )?
                    .query_map(params![article_id], |row| {
                        Ok(Paragraph {
                            id: row.get(0)?,
                            ordinal: row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
                            text: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let topics = conn
                    .prepare("SELECT id, topic_text FROM topics WHERE article_id = ?1 ORDER BY ordinal, id")?
                    .query_map(params![article_id], |row| {
                        Ok(Topic {
                            id: row.get(0)?,
                            text: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let topics_map: BTreeMap<i64, String> =
                    topics.iter().map(|t| (t.id, t.text.clone())).collect();

                let mut paragraph_ratings: BTreeMap<i64, Vec<TopicRating>> = BTreeMap::new();
                let mut stmt = conn.prepare(
                    r#"SELECT r.paragraph_id, r.topic_id, t.topic_text, r.rating
                       FROM topic_ratings r
                       JOIN topics t ON t.id = r.topic_id
                       WHERE t.article_id = ?1
                       ORDER BY t.ordinal, t.id"#,
                )?;
                let rows = stmt.query_map(params![article_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        TopicRating {
                            topic_id: row.get(1)?,
                            topic: row.get(2)?,
                            relevant: rating_from_sql(row.get_ref(3)?),
                        },
                    ))
                })?;
                for row in rows {
                    let (paragraph_id, rating) = row?;
                    paragraph_ratings.entry(paragraph_id).or_default().push(rating);
                }

                let summary = conn
                    .query_row(
                        "SELECT summary_text FROM summaries WHERE article_id = ?1",
                        params![article_id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;

                let summary_rating = conn
                    .prepare("SELECT paragraph_id, rating FROM summary_ratings WHERE article_id = ?1")?
                    .query_map(params![article_id], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
                    })?
                    .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;

                Ok(Some(ArticleParagraphs {
                    article_id,
                    title,
                    paragraphs,
                    topics,
                    topics_map,
                    paragraph_ratings,
                    summary,
                    summary_rating,
                }))
            })
            .await?;
        Ok(paragraphs)
    }

    /// Replaces the stored analysis of `url` in a single transaction.
    pub async fn set_paragraphs(&self, url: &str, analysis: NewAnalysis) -> Result<()> {
        analysis.validate()?;

        let owned_url = url.to_string();
        let _guard = self.lock.lock().await;
        let stored = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let Some(article_id) = tx
                    .query_row(
                        "SELECT id FROM articles WHERE url = ?1",
                        params![owned_url],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?
                else {
                    return Ok(false);
                };

                tx.execute(
                    r#"DELETE FROM topic_ratings WHERE topic_id IN (SELECT id FROM topics WHERE article_id = ?1)
                          OR paragraph_id IN (SELECT id FROM paragraphs WHERE article_id = ?1)"#,
                    params![article_id],
                )?;
                tx.execute(
                    "DELETE FROM summary_ratings WHERE article_id = ?1",
                    params![article_id],
                )?;
                tx.execute("DELETE FROM paragraphs WHERE article_id = ?1", params![article_id])?;
                tx.execute("DELETE FROM topics WHERE article_id = ?1", params![article_id])?;

                tx.execute(
                    r#"INSERT INTO summaries (article_id, summary_text) VALUES (?1, ?2)
                       ON CONFLICT(article_id) DO UPDATE SET
                           summary_text = excluded.summary_text"#,
                    params![article_id, analysis.summary],
                )?;

                let mut topic_ids = Vec::with_capacity(analysis.topics.len());
                {
                    let mut insert_topic = tx.prepare(
                        "INSERT INTO topics (article_id, ordinal, topic_text) VALUES (?1, ?2, ?3) RETURNING id",
                    )?;
                    for (ordinal, topic) in analysis.topics.iter().enumerate() {
                        let id: i64 = insert_topic
                            .query_row(params![article_id, ordinal as i64, topic], |row| row.get(0))?;
                        topic_ids.push(id);
                    }

                    let mut insert_paragraph = tx.prepare(
                        "INSERT INTO paragraphs (article_id, ordinal, paragraph_text) VALUES (?1, ?2, ?3) RETURNING id",
                    )?;
                    let mut insert_summary_rating = tx.prepare(
                        "INSERT INTO summary_ratings (paragraph_id, article_id, rating) VALUES (?1, ?2, ?3)",
                    )?;
                    let mut insert_topic_rating = tx.prepare(
                        "INSERT INTO topic_ratings (paragraph_id, topic_id, rating) VALUES (?1, ?2, ?3)",
                    )?;

                    for (ordinal, ((paragraph, summary_rating), ratings)) in analysis
                        .paragraphs
                        .iter()
                        .zip(&analysis.summary_ratings)
                        .zip(&analysis.topic_ratings)
                        .enumerate()
                    {
                        let paragraph_id: i64 = insert_paragraph
                            .query_row(params![article_id, ordinal as i64, paragraph], |row| {
                                row.get(0)
                            })?;
                        insert_summary_rating.execute(params![
                            paragraph_id,
                            article_id,
                            summary_rating
                        ])?;
                        for (topic_id, relevant) in topic_ids.iter().zip(ratings) {
                            insert_topic_rating.execute(params![paragraph_id, topic_id, relevant])?;
                        }
                    }
                }

                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !stored {
            return Err(AppError::ArticleNotFound(url.to_string()));
        }
        tracing::info!(url, "Stored article analysis");
        Ok(())
    }

    /// Closes the store. Errors are logged and otherwise ignored.
    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            tracing::warn!("Failed to close article database: {}", e);
        }
    }
}

const ARTICLE_COLUMNS: &str =
    "SELECT id, url, title, raw_html, processed_html, fetched_at FROM articles";

fn validate_url(url: &str) -> Result<()> {
    let invalid = |reason: &str| AppError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(&format!("unsupported scheme {other}"))),
    }
}

/// Stored ratings are 0/1, but stores written by older releases hold "YES"/"NO".
fn rating_from_sql(value: ValueRef<'_>) -> bool {
    match value {
        ValueRef::Integer(i) => i != 0,
        ValueRef::Real(f) => f != 0.0,
        ValueRef::Text(t) => {
            let text = String::from_utf8_lossy(t);
            let text = text.trim();
            text.eq_ignore_ascii_case("yes") || text.eq_ignore_ascii_case("true") || text == "1"
        }
        ValueRef::Null | ValueRef::Blob(_) => false,
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        raw_html: row.get(3)?,
        processed_html: row.get(4)?,
        fetched_at: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| parse_datetime(&s)),
    })
}
