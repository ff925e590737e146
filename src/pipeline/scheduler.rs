// src/pipeline/scheduler.rs

//! Resumable batch processing.
//!
//! Work items are split into fixed-size batches in input order. Batches run
//! one after another; items inside a batch run concurrently, bounded by a
//! semaphore. A batch is checkpointed only once every item has a record, so
//! a crash loses at most the batch in flight and a re-run skips everything
//! already persisted.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use tokio::sync::Semaphore;

use crate::error::{AppError, Result};
use crate::models::{ItemRecord, WorkItem, flags};
use crate::storage::CheckpointStore;
use crate::utils::log::{header, step, summary};

/// Turns one work item into its persisted record.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, item: &WorkItem) -> Result<ItemRecord>;
}

/// Counters for one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches_total: usize,
    pub batches_skipped: usize,
    pub batches_processed: usize,
    pub items_processed: usize,
    /// Records carrying at least one quality flag
    pub items_flagged: usize,
    /// Records replaced by a `processing_failed` placeholder
    pub items_failed: usize,
}

/// Runs a phase's work items batch by batch with checkpointing.
pub struct BatchScheduler {
    processor: Arc<dyn ItemProcessor>,
    store: Arc<dyn CheckpointStore>,
    phase: String,
}

impl BatchScheduler {
    pub fn new(
        processor: Arc<dyn ItemProcessor>,
        store: Arc<dyn CheckpointStore>,
        phase: impl Into<String>,
    ) -> Self {
        Self {
            processor,
            store,
            phase: phase.into(),
        }
    }

    /// Process `work_items`, resuming after the last persisted batch.
    ///
    /// Batch ids are positional, so `batch_size` must stay the same across
    /// resumes of one phase. Only checkpoint storage errors are returned;
    /// per-item failures become flagged records.
    pub async fn run(
        &self,
        work_items: Vec<WorkItem>,
        batch_size: usize,
        max_concurrency: usize,
    ) -> Result<RunSummary> {
        if batch_size == 0 {
            return Err(AppError::validation("batch_size must be > 0"));
        }
        if max_concurrency == 0 {
            return Err(AppError::validation("max_concurrency must be > 0"));
        }

        let batches = split_batches(work_items, batch_size);
        let mut stats = RunSummary {
            batches_total: batches.len(),
            ..RunSummary::default()
        };

        header(&format!("Phase '{}'", self.phase));

        let resume_point = self.store.get_resume_point(&self.phase).await?;
        let persisted = self.store.completed_batches(&self.phase).await?;
        if !persisted.is_empty() {
            log::info!(
                "Resuming at batch {} ({} batch(es) already persisted)",
                resume_point,
                persisted.len()
            );
        }

        for (index, batch) in batches.into_iter().enumerate() {
            let batch_id = index as u64;
            if batch_id < resume_point || persisted.contains(&batch_id) {
                log::debug!("Skipping persisted batch {}", batch_id);
                stats.batches_skipped += 1;
                continue;
            }

            step(
                index + 1,
                stats.batches_total,
                &format!("Batch {} ({} items)", batch_id, batch.len()),
            );

            let records = self.process_batch(&batch, max_concurrency).await;
            stats.items_processed += records.len();
            stats.items_flagged += records
                .iter()
                .filter(|r| !r.quality_flags.is_empty())
                .count();
            stats.items_failed += records
                .iter()
                .filter(|r| r.quality_flags.contains(flags::PROCESSING_FAILED))
                .count();

            let values = records
                .iter()
                .map(serde_json::to_value)
                .collect::<serde_json::Result<Vec<_>>>()?;
            self.store.save_batch(&self.phase, batch_id, &values).await?;
            stats.batches_processed += 1;
        }

        self.store.mark_phase_complete(&self.phase).await?;

        summary(
            &format!("Phase '{}' complete", self.phase),
            &[
                ("Batches", stats.batches_total.to_string()),
                ("Skipped (persisted)", stats.batches_skipped.to_string()),
                ("Processed", stats.batches_processed.to_string()),
                ("Items", stats.items_processed.to_string()),
                ("Flagged", stats.items_flagged.to_string()),
                ("Failed", stats.items_failed.to_string()),
            ],
        );
        Ok(stats)
    }

    /// Run every item of one batch; records come back in item order.
    async fn process_batch(&self, batch: &[WorkItem], max_concurrency: usize) -> Vec<ItemRecord> {
        let semaphore = Arc::new(Semaphore::new(max_concurrency));

        let handles: Vec<_> = batch
            .iter()
            .cloned()
            .map(|item| {
                let processor = Arc::clone(&self.processor);
                let semaphore = Arc::clone(&semaphore);
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| AppError::tool("scheduler", e))?;
                    processor.process(&item).await
                })
            })
            .collect();

        let results = future::join_all(handles).await;

        batch
            .iter()
            .zip(results)
            .map(|(item, joined)| match joined {
                Ok(Ok(record)) => record,
                Ok(Err(e)) => ItemRecord::failed(item, e),
                Err(e) => ItemRecord::failed(item, format!("task aborted: {e}")),
            })
            .collect()
    }
}

fn split_batches(work_items: Vec<WorkItem>, batch_size: usize) -> Vec<Vec<WorkItem>> {
    let mut batches = Vec::with_capacity(work_items.len().div_ceil(batch_size));
    let mut items = work_items.into_iter().peekable();
    while items.peek().is_some() {
        batches.push(items.by_ref().take(batch_size).collect());
    }
    batches
}
