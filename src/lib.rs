//! Headless-browser article fetching behind a SQLite read-through cache.
//!
//! [`browser::BrowserPool`] renders pages in a shared Chromium context with a
//! bounded number of open tabs; [`db::ArticleRepository`] deduplicates work
//! per URL and stores both the cleaned article text and the analysis written
//! back by downstream consumers.

pub mod browser;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use browser::{BrowserPool, PageRenderer, PoolOptions, RenderedPage};
pub use config::Config;
pub use db::{ArticleRepository, RepositoryOptions};
pub use error::{AppError, Result};
