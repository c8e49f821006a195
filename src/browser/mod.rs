mod gate;
mod pool;

pub use gate::{FetchGate, GatePermit};
pub use pool::{BrowserPool, PoolOptions};

use async_trait::async_trait;

use crate::error::Result;

/// Final HTML and document title of a page after it finished loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub title: String,
    pub html: String,
}

/// Anything that can turn a URL into rendered HTML.
///
/// `BrowserPool` is the production implementation; the repository only
/// depends on this trait so tests can hand it a stub.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<RenderedPage>;
}
