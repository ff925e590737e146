// src/models/record.rs

//! Persisted item records and merged records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{ExtractionResult, FieldMap, FieldValue, QualityFlags, WorkItem, flags};
use crate::utils::{fingerprint, normalize_identity};

/// The record persisted for one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item_id: String,
    pub locator: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub data: FieldMap,
    pub sufficient: bool,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    pub attempts: u32,
    #[serde(default)]
    pub quality_flags: QualityFlags,
}

impl ItemRecord {
    /// Build the record for an item from its acquisition result.
    pub fn from_result(item: &WorkItem, result: ExtractionResult) -> Self {
        Self {
            item_id: item.id().to_string(),
            locator: item.locator().to_string(),
            metadata: item.metadata().clone(),
            data: result.data,
            sufficient: result.sufficient,
            missing_fields: result.missing_fields,
            attempts: result.attempts,
            quality_flags: result.quality_flags,
        }
    }

    /// Placeholder record for an item whose processing failed outright.
    pub fn failed(item: &WorkItem, reason: impl fmt::Display) -> Self {
        log::warn!("Item {} ({}) failed: {}", item.id(), item.locator(), reason);

        Self {
            item_id: item.id().to_string(),
            locator: item.locator().to_string(),
            metadata: item.metadata().clone(),
            data: FieldMap::new(),
            sufficient: false,
            missing_fields: item.required_fields().iter().cloned().collect(),
            attempts: 0,
            quality_flags: flags::set([flags::PROCESSING_FAILED]),
        }
    }

    /// Look a field up in the data, falling back to string metadata.
    pub fn lookup(&self, field: &str) -> Option<String> {
        self.data
            .get(field)
            .filter(|v| v.is_populated())
            .and_then(|v| match v {
                FieldValue::Number(n) => Some(n.to_string()),
                FieldValue::Bool(b) => Some(b.to_string()),
                other => other.as_text().map(str::to_string),
            })
            .or_else(|| {
                self.metadata.get(field).and_then(|v| match v {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
            })
    }
}

/// Composite key for exact duplicate matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DedupKey {
    /// Normalized identity string
    pub identity: String,
    /// Comparison scope (e.g. containing group); empty when unscoped
    pub scope: String,
}

impl DedupKey {
    /// Build a key from raw identity and scope values.
    ///
    /// Returns `None` when the identity normalizes to nothing.
    pub fn new(identity: &str, scope: Option<&str>) -> Option<Self> {
        let identity = normalize_identity(identity);
        if identity.is_empty() {
            return None;
        }
        Some(Self {
            identity,
            scope: scope.map(normalize_identity).unwrap_or_default(),
        })
    }

    /// Stable hex fingerprint of the key.
    pub fn fingerprint(&self) -> String {
        fingerprint(&[&self.scope, &self.identity])
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scope.is_empty() {
            write!(f, "{}", self.identity)
        } else {
            write!(f, "{}/{}", self.scope, self.identity)
        }
    }
}

/// Consolidated record produced by the dedup engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    /// Fingerprint of the first contributing record's key (or item id)
    pub id: String,
    /// Key of the first contributing record
    pub key: Option<DedupKey>,
    pub fields: FieldMap,
    pub quality_flags: QualityFlags,
    /// Item ids that contributed, in merge order
    pub sources: Vec<String>,
    /// Distinct locators the contributing items were acquired from
    pub locators: Vec<String>,
    /// Whether every contributing record was sufficient
    pub sufficient: bool,
}

impl MergedRecord {
    /// Seed a merged record from a single item record.
    pub fn seed(record: ItemRecord, key: Option<DedupKey>) -> Self {
        let id = key
            .as_ref()
            .map(DedupKey::fingerprint)
            .unwrap_or_else(|| fingerprint(&["item", &record.item_id]));

        Self {
            id,
            key,
            fields: record.data,
            quality_flags: record.quality_flags,
            sources: vec![record.item_id],
            locators: vec![record.locator],
            sufficient: record.sufficient,
        }
    }

    /// Absorb another merged record.
    ///
    /// Populated fields are never replaced by empty ones; flags are unioned.
    pub fn absorb(&mut self, other: MergedRecord) {
        if crate::models::merge_fields(&mut self.fields, &other.fields) {
            self.quality_flags.insert(flags::MERGE_CONFLICT.to_string());
        }
        self.quality_flags.extend(other.quality_flags);
        for source in other.sources {
            if !self.sources.contains(&source) {
                self.sources.push(source);
            }
        }
        for locator in other.locators {
            if !self.locators.contains(&locator) {
                self.locators.push(locator);
            }
        }
        self.sufficient = self.sufficient && other.sufficient;
    }

    /// Text of a field, if populated.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .filter(|v| v.is_populated())
            .and_then(FieldValue::as_text)
    }
}
