// src/models/work_item.rs

//! Work item: one unit of acquisition handed to the scheduler.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A locator to acquire plus the fields it must yield.
///
/// Fields are private so an enqueued item cannot be altered; build one with
/// [`WorkItem::new`] and the `with_*` methods, or deserialize it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    id: String,
    locator: String,
    #[serde(default)]
    required_fields: BTreeSet<String>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl WorkItem {
    /// Create a work item with no required fields or metadata.
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            required_fields: BTreeSet::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Set the required field names.
    pub fn with_required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Attach one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Fill in required fields from a default set when none were given.
    pub fn or_required(self, defaults: &BTreeSet<String>) -> Self {
        if self.required_fields.is_empty() {
            self.with_required(defaults.iter().cloned())
        } else {
            self
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn required_fields(&self) -> &BTreeSet<String> {
        &self.required_fields
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }
}
