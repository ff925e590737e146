// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod extraction;
pub mod flags;
mod record;
mod schema;
mod work_item;

// Re-export all public types
pub use config::{
    BrowserSettings, Config, DedupConfig, ExtractionMode, HttpConfig, LimiterConfig,
    OrchestratorConfig, ReasoningConfig, SchedulerConfig, StorageConfig,
};
pub use extraction::{AcquisitionOutcome, ExtractionResult, FieldMap, FieldValue, merge_fields};
pub use flags::QualityFlags;
pub use record::{DedupKey, ItemRecord, MergedRecord};
pub use schema::EntitySchema;
pub use work_item::WorkItem;
