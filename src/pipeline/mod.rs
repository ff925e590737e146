//! Acquisition pipeline.
//!
//! - `DomainRateLimiter`: per-domain request spacing
//! - `ExtractionOrchestrator`: primary/secondary tier escalation per item
//! - `BatchScheduler`: resumable, checkpointed batch fan-out
//! - `DedupEngine`: exact + reasoning-assisted record merging

mod context;
mod dedup;
mod orchestrator;
mod rate_limiter;
mod scheduler;

pub use context::{AcquisitionContext, ToolTimeouts};
pub use dedup::DedupEngine;
pub use orchestrator::{ExtractionOrchestrator, Tier};
pub use rate_limiter::DomainRateLimiter;
pub use scheduler::{BatchScheduler, ItemProcessor, RunSummary};
