use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::{Stream, StreamExt};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::{FetchGate, PageRenderer, RenderedPage};
use crate::config::DEFAULT_USER_AGENT;
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub max_concurrency: usize,
    pub navigation_timeout: Duration,
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            navigation_timeout: Duration::from_secs(60),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport: (1280, 800),
            headless: true,
            chrome_executable: None,
        }
    }
}

struct Session {
    browser: Browser,
    context: Option<BrowserContextId>,
    handler: JoinHandle<()>,
}

/// One browser process plus one shared browsing context, handing out
/// short-lived pages behind a [`FetchGate`].
///
/// Fetches hold the session read lock for the lifetime of their page, so
/// `stop()` waits for in-flight pages before tearing the browser down.
pub struct BrowserPool {
    options: PoolOptions,
    gate: Arc<FetchGate>,
    session: RwLock<Option<Session>>,
}

impl BrowserPool {
    pub fn new(options: PoolOptions) -> Self {
        let gate = Arc::new(FetchGate::new(options.max_concurrency));
        Self {
            options,
            gate,
            session: RwLock::new(None),
        }
    }

    pub fn gate(&self) -> &FetchGate {
        &self.gate
    }

    pub async fn is_started(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Launches the browser and its shared context. No-op when already running.
    pub async fn start(&self) -> Result<()> {
        let mut session = self.session.write().await;
        if session.is_some() {
            return Ok(());
        }

        let (width, height) = self.options.viewport;
        let mut builder = BrowserConfig::builder()
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={}", self.options.user_agent))
            .window_size(width, height)
            .viewport(Viewport {
                width,
                height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: false,
                has_touch: false,
            })
            .request_timeout(self.options.navigation_timeout);
        if !self.options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.options.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(AppError::BrowserLaunch)?;

        let (mut browser, mut handler) = Browser::launch(config).await?;
        let handler = tokio::spawn(async move {
            let errors = drive_handler(&mut handler).await;
            tracing::debug!(errors, "Browser handler finished");
        });

        let context = match browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                shutdown_browser(&mut browser).await;
                handler.abort();
                return Err(e.into());
            }
        };

        tracing::info!(
            max_concurrency = self.gate.capacity(),
            headless = self.options.headless,
            "Browser pool started"
        );

        *session = Some(Session {
            browser,
            context: Some(context),
            handler,
        });
        Ok(())
    }

    /// Releases context, browser and handler in that order. Safe to call twice.
    pub async fn stop(&self) {
        let Some(mut session) = self.session.write().await.take() else {
            return;
        };

        if let Some(context) = session.context.take() {
            if let Err(e) = session.browser.dispose_browser_context(context).await {
                tracing::warn!("Failed to dispose browser context: {}", e);
            }
        }
        shutdown_browser(&mut session.browser).await;
        session.handler.abort();

        tracing::info!("Browser pool stopped");
    }

    async fn open_page(&self, session: &Session) -> Result<Page> {
        let mut params = CreateTargetParams::builder().url("about:blank");
        if let Some(context) = &session.context {
            params = params.browser_context_id(context.clone());
        }
        let params = params.build().map_err(AppError::BrowserLaunch)?;
        Ok(session.browser.new_page(params).await?)
    }

    async fn render(&self, page: &Page, url: &str) -> Result<RenderedPage> {
        let timeout = self.options.navigation_timeout;
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(result) => {
                result?;
            }
            Err(_) => {
                return Err(AppError::NavigationTimeout {
                    url: url.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }

        let html = page.content().await?;
        let title = page.get_title().await?.unwrap_or_default();
        Ok(RenderedPage { title, html })
    }
}

#[async_trait]
impl PageRenderer for BrowserPool {
    async fn fetch_html(&self, url: &str) -> Result<RenderedPage> {
        if !self.is_started().await {
            self.start().await?;
        }

        let _permit = self.gate.acquire().await;

        let session = self.session.read().await;
        let Some(session) = session.as_ref() else {
            return Err(AppError::BrowserLaunch(
                "browser pool was stopped".to_string(),
            ));
        };

        let page = self.open_page(session).await?;
        let rendered = self.render(&page, url).await;
        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close page for {}: {}", url, e);
        }

        if let Ok(page) = &rendered {
            tracing::debug!(url, bytes = page.html.len(), "Rendered page");
        }
        rendered
    }
}

/// Polls the CDP event stream until the connection closes. Errors on single
/// messages are logged and skipped. Returns how many were seen.
async fn drive_handler<S, E>(events: &mut S) -> usize
where
    S: Stream<Item = std::result::Result<(), E>> + Unpin,
    E: std::fmt::Display,
{
    let mut errors = 0;
    while let Some(event) = events.next().await {
        if let Err(e) = event {
            errors += 1;
            tracing::warn!("Browser handler error: {}", e);
        }
    }
    errors
}

async fn shutdown_browser(browser: &mut Browser) {
    if let Err(e) = browser.close().await {
        tracing::warn!("Failed to close browser: {}", e);
    }
    if let Err(e) = browser.wait().await {
        tracing::warn!("Failed to wait for browser process: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_pool_is_idle() {
        let pool = BrowserPool::new(PoolOptions {
            max_concurrency: 2,
            ..PoolOptions::default()
        });
        assert!(!pool.is_started().await);
        assert_eq!(pool.gate().capacity(), 2);
        assert_eq!(pool.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let pool = BrowserPool::new(PoolOptions::default());
        pool.stop().await;
        pool.stop().await;
        assert!(!pool.is_started().await);
    }

    #[tokio::test]
    async fn handler_keeps_polling_after_an_error() {
        let mut seen = 0;
        let mut events = futures::stream::iter(vec![
            Err("unknown message"),
            Ok(()),
            Err("truncated frame"),
            Ok(()),
        ])
        .inspect(|_| seen += 1);

        let errors = drive_handler(&mut events).await;
        drop(events);

        assert_eq!(errors, 2);
        assert_eq!(seen, 4);
    }
}
