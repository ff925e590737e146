// src/services/browser.rs

//! Headless Chromium fetch tool.
//!
//! Used as the escalation tier: renders script-heavy pages, runs the
//! configured interaction scripts, then returns the rendered markup. One
//! browser instance is shared across items so cookies and session state
//! persist for the whole run.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::BrowserSettings;
use crate::services::{PageContent, RichFetcher};

const OUTER_HTML: &str = "document.documentElement.outerHTML";

/// Chromium-backed secondary fetch tool.
pub struct BrowserFetcher {
    browser: Browser,
    scripts: Vec<String>,
    settle: Duration,
    deadline: Duration,
    handler: JoinHandle<()>,
}

impl BrowserFetcher {
    /// Launch a headless Chromium instance.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");
        if let Some(path) = &settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| AppError::browser(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::browser(format!("failed to launch Chromium: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        log::info!("Headless browser launched");
        Ok(Self {
            browser,
            scripts: settings.scripts.clone(),
            settle: Duration::from_millis(settings.settle_ms),
            deadline: Duration::from_secs(settings.timeout_secs),
            handler,
        })
    }
}

impl BrowserFetcher {
    /// Wait for the page, run the interaction scripts and read the markup.
    async fn render(&self, page: &Page, locator: &str) -> Result<PageContent> {
        let _ = page.wait_for_navigation().await;

        for script in &self.scripts {
            if let Err(e) = page.evaluate(script.as_str()).await {
                log::debug!("Interaction script failed on {}: {}", locator, e);
            }
            tokio::time::sleep(self.settle).await;
        }

        let html: String = page
            .evaluate(OUTER_HTML)
            .await
            .map_err(|e| AppError::tool("browser", format!("{locator}: {e}")))?
            .into_value()
            .map_err(|e| AppError::tool("browser", format!("{locator}: {e:?}")))?;

        let final_locator = page
            .url()
            .await
            .ok()
            .flatten()
            .map(|u| u.to_string())
            .unwrap_or_else(|| locator.to_string());

        Ok(PageContent {
            locator: locator.to_string(),
            final_locator,
            html,
        })
    }
}

#[async_trait]
impl RichFetcher for BrowserFetcher {
    async fn fetch_rich(&self, locator: &str) -> Result<PageContent> {
        let page = self
            .browser
            .new_page(locator)
            .await
            .map_err(|e| AppError::tool("browser", format!("{locator}: {e}")))?;

        let closing = page.clone();
        let tab = CloseOnDrop::new(async move {
            if let Err(e) = closing.close().await {
                log::debug!("Failed to close browser tab: {}", e);
            }
        });

        let rendered = tokio::time::timeout(self.deadline, self.render(&page, locator)).await;
        tab.finish().await;

        match rendered {
            Ok(result) => result,
            Err(_) => Err(AppError::timeout("browser render", self.deadline.as_secs())),
        }
    }
}

/// Cleanup that runs exactly once: inline through [`CloseOnDrop::finish`],
/// or on a spawned task when the owning future is cancelled first.
struct CloseOnDrop(Option<BoxFuture<'static, ()>>);

impl CloseOnDrop {
    fn new(cleanup: impl Future<Output = ()> + Send + 'static) -> Self {
        Self(Some(Box::pin(cleanup)))
    }

    async fn finish(mut self) {
        if let Some(cleanup) = self.0.as_mut() {
            cleanup.await;
        }
        self.0 = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(cleanup) = self.0.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(cleanup);
                }
                Err(_) => log::warn!("No runtime left to close a browser tab"),
            }
        }
    }
}

impl Drop for BrowserFetcher {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
