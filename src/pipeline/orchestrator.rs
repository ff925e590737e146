// src/pipeline/orchestrator.rs

//! Tiered extraction with escalation.
//!
//! Attempt 1 uses the lightweight primary tool; every later attempt uses
//! the secondary tool. Data gathered by each attempt is merged into the
//! best-so-far map and re-evaluated, so the orchestrator stops as soon as
//! the required fields are satisfied. Nothing here returns an error:
//! tool failures, timeouts and unusable content become quality flags.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{
    AcquisitionOutcome, ExtractionResult, FieldMap, ItemRecord, QualityFlags, WorkItem, flags,
    merge_fields,
};
use crate::pipeline::{AcquisitionContext, ItemProcessor};
use crate::services::PageContent;

/// Fetch tier used for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Secondary,
}

impl Tier {
    /// Tier for the zero-based attempt number.
    pub fn for_attempt(attempt: u32) -> Self {
        if attempt == 0 {
            Tier::Primary
        } else {
            Tier::Secondary
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Primary => write!(f, "primary"),
            Tier::Secondary => write!(f, "secondary"),
        }
    }
}

/// Drives one locator through the tier ladder.
#[derive(Clone)]
pub struct ExtractionOrchestrator {
    ctx: Arc<AcquisitionContext>,
}

impl ExtractionOrchestrator {
    pub fn new(ctx: Arc<AcquisitionContext>) -> Self {
        Self { ctx }
    }

    /// Acquire a work item with the configured attempt budget.
    pub async fn acquire_item(&self, item: &WorkItem) -> ExtractionResult {
        self.acquire(item.locator(), item.required_fields(), self.ctx.max_attempts)
            .await
    }

    /// Acquire `locator` until `required` is satisfied or attempts run out.
    pub async fn acquire(
        &self,
        locator: &str,
        required: &BTreeSet<String>,
        max_attempts: u32,
    ) -> ExtractionResult {
        let max_attempts = max_attempts.max(1);
        let mut best = FieldMap::new();
        let mut missing: Vec<String> = required.iter().cloned().collect();
        let mut tier_flags = QualityFlags::new();
        let mut attempts = 0;
        let mut got_content = false;
        let mut tool_unavailable = false;

        while attempts < max_attempts {
            let tier = Tier::for_attempt(attempts);
            if tier == Tier::Secondary && self.ctx.secondary.is_none() {
                log::warn!("{}: escalation needed but secondary tool unavailable", locator);
                tool_unavailable = true;
                break;
            }

            attempts += 1;
            log::debug!(
                "{}: attempt {}/{} via {} tool",
                locator,
                attempts,
                max_attempts,
                tier
            );

            match self.attempt(tier, locator, required).await {
                AcquisitionOutcome::Failed(flags) => {
                    tier_flags.extend(flags);
                    continue;
                }
                AcquisitionOutcome::Partial(data, flags) => {
                    tier_flags.extend(flags);
                    merge_fields(&mut best, &data);
                }
                AcquisitionOutcome::Ok(data) => {
                    merge_fields(&mut best, &data);
                }
            }
            got_content = true;

            let verdict = self.ctx.evaluator.evaluate(&best, required).await;
            if verdict.sufficient {
                log::debug!("{}: sufficient after {} attempt(s)", locator, attempts);
                return ExtractionResult {
                    data: best,
                    sufficient: true,
                    missing_fields: Vec::new(),
                    attempts,
                    quality_flags: QualityFlags::new(),
                };
            }
            missing = verdict.missing;
        }

        let mut quality_flags = tier_flags;
        if !got_content {
            quality_flags.insert(flags::SCRAPING_FAILED.to_string());
        }
        quality_flags.insert(if tool_unavailable {
            flags::TOOL_UNAVAILABLE.to_string()
        } else {
            flags::INSUFFICIENT_AFTER_ESCALATION.to_string()
        });

        log::info!(
            "{}: insufficient after {} attempt(s), missing [{}]",
            locator,
            attempts,
            missing.join(", ")
        );
        ExtractionResult {
            data: best,
            sufficient: false,
            missing_fields: missing,
            attempts,
            quality_flags,
        }
    }

    /// One tier attempt: throttle, fetch, extract.
    async fn attempt(
        &self,
        tier: Tier,
        locator: &str,
        required: &BTreeSet<String>,
    ) -> AcquisitionOutcome {
        self.ctx.limiter.acquire(locator).await;

        let fetched = match tier {
            Tier::Primary => {
                bounded(
                    self.ctx.timeouts.primary,
                    "primary fetch",
                    self.ctx.primary.fetch(locator),
                )
                .await
            }
            Tier::Secondary => match &self.ctx.secondary {
                Some(tool) => {
                    bounded(
                        self.ctx.timeouts.secondary,
                        "secondary fetch",
                        tool.fetch_rich(locator),
                    )
                    .await
                }
                None => return AcquisitionOutcome::Failed(flags::set([flags::TOOL_UNAVAILABLE])),
            },
        };

        let content: PageContent = match fetched {
            Ok(content) => content,
            Err(e) => {
                log::warn!("{}: {} tool failed: {}", locator, tier, e);
                let flag = if e.is_timeout() {
                    flags::TOOL_TIMEOUT
                } else {
                    flags::SCRAPING_FAILED
                };
                return AcquisitionOutcome::Failed(flags::set([flag]));
            }
        };

        if content.is_blank() {
            log::debug!("{}: {} tool returned an empty page", locator, tier);
            return AcquisitionOutcome::Partial(FieldMap::new(), flags::set([flags::EMPTY_CONTENT]));
        }

        match self.ctx.extractor.extract(&content, required).await {
            Ok(data) => AcquisitionOutcome::Ok(data),
            Err(e) => {
                log::warn!("{}: extraction failed: {}", locator, e);
                let flag = if e.is_timeout() {
                    flags::TOOL_TIMEOUT
                } else {
                    flags::EXTRACTION_FAILED
                };
                AcquisitionOutcome::Partial(FieldMap::new(), flags::set([flag]))
            }
        }
    }
}

#[async_trait]
impl ItemProcessor for ExtractionOrchestrator {
    async fn process(&self, item: &WorkItem) -> Result<ItemRecord> {
        let result = self.acquire_item(item).await;
        Ok(ItemRecord::from_result(item, result))
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(operation, limit.as_secs())),
    }
}
