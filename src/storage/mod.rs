//! Checkpoint storage.
//!
//! Batches of records are appended to a per-phase log as JSON lines. A
//! batch counts as persisted only when all of its lines are present; a
//! partially written batch is ignored on read and re-processed on resume.
//!
//! ## Layout
//!
//! ```text
//! {checkpoint_dir}/
//! ├── {phase}.jsonl             # one line per record, batches in write order
//! └── {phase}.complete.json     # present once the phase finished
//! ```
//!
//! ## Line format
//!
//! ```text
//! {"batch_id":0,"index":0,"batch_len":2,"written_at":"...","record":{...}}
//! {"batch_id":0,"index":1,"batch_len":2,"written_at":"...","record":{...}}
//! ```

pub mod local;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{AppError, Result};

pub use local::LocalCheckpointStore;

/// One persisted batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointBatch {
    /// Phase the batch was persisted under
    pub phase: String,
    pub batch_id: u64,
    pub records: Vec<Value>,
}

impl CheckpointBatch {
    /// Decode the batch's records into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.records
            .iter()
            .map(|value| T::deserialize(value).map_err(AppError::from))
            .collect()
    }
}

/// One line of a phase log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointLine<R = Value> {
    pub batch_id: u64,
    /// Position of the record within its batch
    pub index: usize,
    pub batch_len: usize,
    pub written_at: DateTime<Utc>,
    pub record: R,
}

/// Marker written when a phase has finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseMarker {
    pub phase: String,
    pub completed_at: DateTime<Utc>,
    pub batches: usize,
}

/// Durable, append-only checkpoint backend.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist one batch atomically. A batch id is written at most once.
    async fn save_batch(&self, phase: &str, batch_id: u64, records: &[Value]) -> Result<()>;

    /// Ids of every fully persisted batch.
    async fn completed_batches(&self, phase: &str) -> Result<BTreeSet<u64>>;

    /// Lowest batch id not yet persisted.
    async fn get_resume_point(&self, phase: &str) -> Result<u64> {
        Ok(lowest_missing(&self.completed_batches(phase).await?))
    }

    /// Every persisted batch in ascending id order.
    async fn load_batches(&self, phase: &str) -> Result<Vec<CheckpointBatch>>;

    async fn mark_phase_complete(&self, phase: &str) -> Result<()>;

    async fn is_phase_complete(&self, phase: &str) -> Result<bool>;

    /// Remove everything stored for the phase.
    async fn cleanup(&self, phase: &str) -> Result<()>;
}

/// Lowest id absent from `ids`.
pub fn lowest_missing(ids: &BTreeSet<u64>) -> u64 {
    let mut next = 0;
    for &id in ids {
        if id != next {
            break;
        }
        next += 1;
    }
    next
}

/// Load and decode every record of a phase, batch order then item order.
pub async fn load_records<T: DeserializeOwned>(
    store: &dyn CheckpointStore,
    phase: &str,
) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for batch in store.load_batches(phase).await? {
        records.extend(batch.decode::<T>()?);
    }
    Ok(records)
}

/// Phase names become file names; keep them to `[A-Za-z0-9._-]`.
pub fn validate_phase(phase: &str) -> Result<()> {
    let valid = !phase.is_empty()
        && !phase.starts_with('.')
        && phase
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(AppError::checkpoint(phase, "invalid phase name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_missing() {
        assert_eq!(lowest_missing(&BTreeSet::new()), 0);
        assert_eq!(lowest_missing(&[0, 1, 2].into()), 3);
        assert_eq!(lowest_missing(&[0, 1, 3, 4].into()), 2);
        assert_eq!(lowest_missing(&[1, 2].into()), 0);
    }

    #[test]
    fn test_validate_phase() {
        assert!(validate_phase("acquire").is_ok());
        assert!(validate_phase("phase-2.people_v1").is_ok());
        for bad in ["", "../etc", "a/b", ".hidden", "two words"] {
            assert!(validate_phase(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_decode_batch() {
        let batch = CheckpointBatch {
            phase: "acquire".into(),
            batch_id: 0,
            records: vec![serde_json::json!(1), serde_json::json!(2)],
        };
        assert_eq!(batch.decode::<u32>().unwrap(), vec![1, 2]);
        assert!(batch.decode::<String>().is_err());
    }
}
