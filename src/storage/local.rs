//! Local filesystem checkpoint store.
//!
//! Each save appends a whole batch with a single write followed by an
//! fsync. A crash can therefore leave a torn tail (a final line with no
//! newline) or a batch with fewer lines than its `batch_len`; both are
//! ignored on read, and a torn tail is cut off before the next append.
//! A malformed line anywhere before the tail is treated as corruption and
//! stops the run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::storage::{
    CheckpointBatch, CheckpointLine, CheckpointStore, PhaseMarker, validate_phase,
};

/// Checkpoint store rooted at a local directory.
pub struct LocalCheckpointStore {
    root_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalCheckpointStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn log_path(&self, phase: &str) -> PathBuf {
        self.root_dir.join(format!("{phase}.jsonl"))
    }

    fn marker_path(&self, phase: &str) -> PathBuf {
        self.root_dir.join(format!("{phase}.complete.json"))
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn remove_if_present(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn scan(&self, phase: &str) -> Result<PhaseLog> {
        validate_phase(phase)?;
        match Self::read_bytes(&self.log_path(phase)).await? {
            Some(bytes) => parse_log(phase, &bytes),
            None => Ok(PhaseLog::default()),
        }
    }
}

#[async_trait]
impl CheckpointStore for LocalCheckpointStore {
    async fn save_batch(&self, phase: &str, batch_id: u64, records: &[Value]) -> Result<()> {
        validate_phase(phase)?;
        if records.is_empty() {
            return Err(AppError::checkpoint(
                phase,
                format!("refusing to persist empty batch {batch_id}"),
            ));
        }

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.root_dir).await?;

        let path = self.log_path(phase);
        let existing = Self::read_bytes(&path).await?.unwrap_or_default();
        let scanned = parse_log(phase, &existing)?;
        if scanned.batches.contains_key(&batch_id) {
            return Err(AppError::checkpoint(
                phase,
                format!("batch {batch_id} is already persisted"),
            ));
        }
        if scanned.valid_len < existing.len() {
            log::warn!(
                "Phase '{}': truncating {} byte(s) of torn checkpoint tail",
                phase,
                existing.len() - scanned.valid_len
            );
            let file = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
            file.set_len(scanned.valid_len as u64).await?;
            file.sync_all().await?;
        }

        let written_at = Utc::now();
        let mut payload = Vec::new();
        for (index, record) in records.iter().enumerate() {
            let line = CheckpointLine {
                batch_id,
                index,
                batch_len: records.len(),
                written_at,
                record,
            };
            serde_json::to_writer(&mut payload, &line)?;
            payload.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&payload).await?;
        file.flush().await?;
        file.sync_data().await?;

        log::debug!(
            "Phase '{}': persisted batch {} ({} records)",
            phase,
            batch_id,
            records.len()
        );
        Ok(())
    }

    async fn completed_batches(&self, phase: &str) -> Result<BTreeSet<u64>> {
        Ok(self.scan(phase).await?.batches.into_keys().collect())
    }

    async fn load_batches(&self, phase: &str) -> Result<Vec<CheckpointBatch>> {
        Ok(self
            .scan(phase)
            .await?
            .batches
            .into_iter()
            .map(|(batch_id, records)| CheckpointBatch {
                phase: phase.to_string(),
                batch_id,
                records,
            })
            .collect())
    }

    async fn mark_phase_complete(&self, phase: &str) -> Result<()> {
        let batches = self.scan(phase).await?.batches.len();
        let marker = PhaseMarker {
            phase: phase.to_string(),
            completed_at: Utc::now(),
            batches,
        };

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.root_dir).await?;
        let path = self.marker_path(phase);
        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&serde_json::to_vec_pretty(&marker)?).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        log::info!("Phase '{}' marked complete ({} batches)", phase, batches);
        Ok(())
    }

    async fn is_phase_complete(&self, phase: &str) -> Result<bool> {
        validate_phase(phase)?;
        Ok(tokio::fs::try_exists(self.marker_path(phase)).await?)
    }

    async fn cleanup(&self, phase: &str) -> Result<()> {
        validate_phase(phase)?;
        let _guard = self.write_lock.lock().await;
        Self::remove_if_present(&self.log_path(phase)).await?;
        Self::remove_if_present(&self.marker_path(phase)).await?;
        log::info!("Phase '{}' checkpoints removed", phase);
        Ok(())
    }
}

/// Parsed view of a phase log.
#[derive(Debug, Default)]
struct PhaseLog {
    /// Complete batches by id
    batches: BTreeMap<u64, Vec<Value>>,
    /// Bytes up to and including the last newline
    valid_len: usize,
}

/// Batch being reassembled from consecutive lines.
struct OpenBatch {
    batch_id: u64,
    batch_len: usize,
    records: Vec<Value>,
}

fn parse_log(phase: &str, bytes: &[u8]) -> Result<PhaseLog> {
    let valid_len = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1);
    if valid_len < bytes.len() {
        log::warn!(
            "Phase '{}': ignoring torn checkpoint tail ({} byte(s))",
            phase,
            bytes.len() - valid_len
        );
    }

    let corrupted = |line: usize, message: String| AppError::CheckpointCorrupted {
        phase: phase.to_string(),
        line,
        message,
    };

    let text = std::str::from_utf8(&bytes[..valid_len])
        .map_err(|e| corrupted(0, format!("not UTF-8: {e}")))?;

    let mut batches = BTreeMap::new();
    let mut open: Option<OpenBatch> = None;

    for (number, raw) in text.lines().enumerate().map(|(n, l)| (n + 1, l)) {
        if raw.trim().is_empty() {
            continue;
        }
        let line: CheckpointLine =
            serde_json::from_str(raw).map_err(|e| corrupted(number, e.to_string()))?;
        if line.batch_len == 0 || line.index >= line.batch_len {
            return Err(corrupted(
                number,
                format!("index {} outside batch of {}", line.index, line.batch_len),
            ));
        }

        if line.index == 0 {
            if let Some(stale) = open.take() {
                log::warn!(
                    "Phase '{}': discarding incomplete batch {} ({}/{} records)",
                    phase,
                    stale.batch_id,
                    stale.records.len(),
                    stale.batch_len
                );
            }
            open = Some(OpenBatch {
                batch_id: line.batch_id,
                batch_len: line.batch_len,
                records: Vec::with_capacity(line.batch_len),
            });
        }

        let Some(current) = open.as_mut() else {
            return Err(corrupted(number, "record without a batch start".into()));
        };
        if current.batch_id != line.batch_id
            || current.batch_len != line.batch_len
            || current.records.len() != line.index
        {
            return Err(corrupted(
                number,
                format!(
                    "out-of-sequence record for batch {} (index {})",
                    line.batch_id, line.index
                ),
            ));
        }
        current.records.push(line.record);

        if current.records.len() < current.batch_len {
            continue;
        }
        if let Some(done) = open.take() {
            if batches.contains_key(&done.batch_id) {
                log::warn!(
                    "Phase '{}': ignoring duplicate copy of batch {}",
                    phase,
                    done.batch_id
                );
            } else {
                batches.insert(done.batch_id, done.records);
            }
        }
    }

    if let Some(stale) = open {
        log::warn!(
            "Phase '{}': ignoring incomplete batch {} ({}/{} records)",
            phase,
            stale.batch_id,
            stale.records.len(),
            stale.batch_len
        );
    }

    Ok(PhaseLog { batches, valid_len })
}
