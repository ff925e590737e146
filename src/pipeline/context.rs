// src/pipeline/context.rs

//! Shared acquisition resources.
//!
//! One [`AcquisitionContext`] is built per run and shared by every
//! concurrent item task. It owns the tools, the per-domain limiter and the
//! deadlines applied to each external call.

use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::models::{Config, ExtractionMode};
use crate::pipeline::DomainRateLimiter;
use crate::services::{
    FieldExtractor, HttpFetcher, HttpReasoningService, PageFetcher, ReasoningExtractor,
    ReasoningService, RichFetcher, SelectorExtractor, SufficiencyEvaluator,
};

/// Deadlines for each kind of external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolTimeouts {
    pub primary: Duration,
    pub secondary: Duration,
    pub reasoning: Duration,
}

impl ToolTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            primary: Duration::from_secs(config.http.timeout_secs),
            secondary: Duration::from_secs(config.browser.timeout_secs),
            reasoning: Duration::from_secs(config.reasoning.timeout_secs),
        }
    }
}

/// Everything an orchestrator needs to acquire one item.
pub struct AcquisitionContext {
    pub limiter: DomainRateLimiter,
    pub primary: Arc<dyn PageFetcher>,
    /// Escalation tool; `None` when it could not be started
    pub secondary: Option<Arc<dyn RichFetcher>>,
    pub extractor: Arc<dyn FieldExtractor>,
    pub evaluator: SufficiencyEvaluator,
    pub timeouts: ToolTimeouts,
    pub max_attempts: u32,
}

impl AcquisitionContext {
    /// Assemble a context from explicit tools.
    pub fn new(
        config: &Config,
        primary: Arc<dyn PageFetcher>,
        secondary: Option<Arc<dyn RichFetcher>>,
        extractor: Arc<dyn FieldExtractor>,
        reasoning: Arc<dyn ReasoningService>,
    ) -> Self {
        let timeouts = ToolTimeouts::from_config(config);
        Self {
            limiter: DomainRateLimiter::from_config(&config.limiter),
            evaluator: SufficiencyEvaluator::new(reasoning, timeouts.reasoning),
            primary,
            secondary,
            extractor,
            timeouts,
            max_attempts: config.orchestrator.max_attempts,
        }
    }

    /// Build the production tool set described by `config`.
    ///
    /// A browser that fails to launch is logged and left out, so escalations
    /// are flagged `tool_unavailable` instead of aborting the run.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let primary: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.http)?);
        let reasoning: Arc<dyn ReasoningService> =
            Arc::new(HttpReasoningService::new(&config.reasoning)?);

        let extractor: Arc<dyn FieldExtractor> = match config.orchestrator.extraction {
            ExtractionMode::Selectors => Arc::new(SelectorExtractor::new(&config.schema)?),
            ExtractionMode::Reasoning => Arc::new(ReasoningExtractor::new(
                Arc::clone(&reasoning),
                config.schema.clone(),
                config.reasoning.max_content_chars,
                Duration::from_secs(config.reasoning.timeout_secs),
            )),
        };

        let secondary = launch_secondary(config).await;

        Ok(Self::new(config, primary, secondary, extractor, reasoning))
    }
}

#[cfg(feature = "browser")]
async fn launch_secondary(config: &Config) -> Option<Arc<dyn RichFetcher>> {
    if !config.browser.enabled {
        log::info!("Browser tier disabled; escalations will be flagged");
        return None;
    }
    match crate::services::BrowserFetcher::launch(&config.browser).await {
        Ok(browser) => Some(Arc::new(browser)),
        Err(e) => {
            log::warn!("Browser tier unavailable: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "browser"))]
async fn launch_secondary(_config: &Config) -> Option<Arc<dyn RichFetcher>> {
    log::info!("Built without the browser feature; escalations will be flagged");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_follow_config() {
        let mut config = Config::default();
        config.http.timeout_secs = 7;
        config.browser.timeout_secs = 11;
        config.reasoning.timeout_secs = 13;

        let timeouts = ToolTimeouts::from_config(&config);
        assert_eq!(timeouts.primary, Duration::from_secs(7));
        assert_eq!(timeouts.secondary, Duration::from_secs(11));
        assert_eq!(timeouts.reasoning, Duration::from_secs(13));
    }
}
