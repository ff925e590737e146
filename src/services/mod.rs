//! Service layer for the harvester.
//!
//! External collaborators and the judges built on them:
//! - Fetch tools (`HttpFetcher`, `BrowserFetcher`)
//! - Reasoning service client (`HttpReasoningService`)
//! - Field extraction (`SelectorExtractor`, `ReasoningExtractor`)
//! - Sufficiency judging (`SufficiencyEvaluator`)
//! - Confidence normalization (`confidence::normalize`)

#[cfg(feature = "browser")]
mod browser;
pub mod confidence;
mod extractor;
mod fetch;
pub mod reasoning;
mod sufficiency;

#[cfg(feature = "browser")]
pub use browser::BrowserFetcher;
pub use confidence::{Confidence, ConfidenceError};
pub use extractor::{FieldExtractor, ReasoningExtractor, SelectorExtractor};
pub use fetch::{HttpFetcher, PageContent, PageFetcher, RichFetcher, page_text};
pub use reasoning::{HttpReasoningService, ReasoningService};
pub use sufficiency::{Sufficiency, SufficiencyEvaluator};
