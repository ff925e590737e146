// src/models/flags.rs

//! Quality flag vocabulary.
//!
//! Flags are open-ended string tags attached to records instead of raising
//! errors. The constants below are the tags this crate emits itself.

use std::collections::BTreeSet;

/// Set of quality flags on a record (sorted, no duplicates).
pub type QualityFlags = BTreeSet<String>;

/// A fetch tool failed for every tier that produced no content.
pub const SCRAPING_FAILED: &str = "scraping_failed";
/// Attempts were exhausted and the data is still insufficient.
pub const INSUFFICIENT_AFTER_ESCALATION: &str = "insufficient_after_escalation";
/// Escalation was needed but the secondary tool is not available.
pub const TOOL_UNAVAILABLE: &str = "tool_unavailable";
/// A tool call exceeded its deadline.
pub const TOOL_TIMEOUT: &str = "tool_timeout";
/// A page was fetched but held no usable content.
pub const EMPTY_CONTENT: &str = "empty_content";
/// Field extraction failed on fetched content.
pub const EXTRACTION_FAILED: &str = "extraction_failed";
/// Code around the orchestrator failed for this item.
pub const PROCESSING_FAILED: &str = "processing_failed";
/// An equivalence verdict was positive but backed by weak confidence.
pub const LOW_CONFIDENCE: &str = "low_confidence";
/// A confidence value was missing or invalid and replaced by the default.
pub const CONFIDENCE_DEFAULTED: &str = "confidence_defaulted";
/// A confidence value was outside 0..=100 and clamped.
pub const CONFIDENCE_CLAMPED: &str = "confidence_clamped";
/// Two merged records disagreed on a populated field.
pub const MERGE_CONFLICT: &str = "merge_conflict";
/// The equivalence check could not be completed.
pub const DEDUP_CHECK_FAILED: &str = "dedup_check_failed";
/// Record absorbed a near-duplicate through the fuzzy stage.
pub const FUZZY_MERGED: &str = "fuzzy_merged";

/// Build a flag set from string slices.
pub fn set<'a>(flags: impl IntoIterator<Item = &'a str>) -> QualityFlags {
    flags.into_iter().map(str::to_string).collect()
}
