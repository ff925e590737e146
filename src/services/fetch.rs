// src/services/fetch.rs

//! Fetch tools.
//!
//! The primary tool is a plain HTTP client; the secondary tool is a heavier,
//! stateful automation tool (see `browser`) used only on escalation.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::HttpConfig;
use crate::utils::http::create_async_client;
use crate::utils::truncate_chars;

/// Raw content returned by a fetch tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    /// Locator that was requested
    pub locator: String,
    /// Locator after redirects or client-side navigation
    pub final_locator: String,
    /// Page markup
    pub html: String,
}

impl PageContent {
    pub fn new(locator: impl Into<String>, html: impl Into<String>) -> Self {
        let locator = locator.into();
        Self {
            final_locator: locator.clone(),
            locator,
            html: html.into(),
        }
    }

    /// Whether the page carries no visible text at all.
    pub fn is_blank(&self) -> bool {
        page_text(&self.html, 1).is_empty()
    }
}

/// Lightweight primary fetch tool.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a locator's content.
    async fn fetch(&self, locator: &str) -> Result<PageContent>;
}

/// Heavier secondary tool capable of scripted interaction.
#[async_trait]
pub trait RichFetcher: Send + Sync {
    /// Fetch a locator's content after rendering and interaction.
    async fn fetch_rich(&self, locator: &str) -> Result<PageContent>;
}

/// HTTP fetcher built on `reqwest`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher from HTTP settings.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<PageContent> {
        let response = self.client.get(locator).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::tool(
                "http",
                format!("{locator} returned status {status}"),
            ));
        }

        let final_locator = response.url().to_string();
        let html = response.text().await?;
        Ok(PageContent {
            locator: locator.to_string(),
            final_locator,
            html,
        })
    }
}

/// Visible text of a page, whitespace-collapsed and capped at `max_chars`.
pub fn page_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next());

    let raw: Vec<&str> = match root {
        Some(body) => body.text().collect(),
        None => document.root_element().text().collect(),
    };
    let text = raw
        .iter()
        .flat_map(|chunk| chunk.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");

    truncate_chars(&text, max_chars).to_string()
}
