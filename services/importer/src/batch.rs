//! Sequential fixed-size bulk writes with a per-entity failure policy.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::error::ImportError;
use crate::records::{DepartmentRecord, FacilityRecord};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Rows colliding with stored keys are rejected; callers filter first.
    Insert,
    /// Rows colliding on `conflict_column` overwrite the stored row.
    Upsert { conflict_column: &'static str },
}

/// What a failed batch does to the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchFailurePolicy {
    Abort,
    Continue,
}

/// One bulk write of a slice of records.
#[async_trait]
pub trait BatchSink<T: Sync>: Send + Sync {
    async fn write(&self, batch: &[T]) -> Result<u64, StoreError>;
}

pub struct FacilitySink<'a, S: Store + ?Sized> {
    pub store: &'a S,
    pub table: &'a str,
    pub mode: WriteMode,
}

#[async_trait]
impl<'a, S: Store + ?Sized> BatchSink<FacilityRecord> for FacilitySink<'a, S> {
    async fn write(&self, batch: &[FacilityRecord]) -> Result<u64, StoreError> {
        match self.mode {
            WriteMode::Insert => self.store.insert_facilities(self.table, batch).await,
            WriteMode::Upsert { conflict_column } => {
                self.store
                    .upsert_facilities(self.table, conflict_column, batch)
                    .await
            }
        }
    }
}

pub struct DepartmentSink<'a, S: Store + ?Sized> {
    pub store: &'a S,
    pub table: &'a str,
}

#[async_trait]
impl<'a, S: Store + ?Sized> BatchSink<DepartmentRecord> for DepartmentSink<'a, S> {
    async fn write(&self, batch: &[DepartmentRecord]) -> Result<u64, StoreError> {
        self.store.insert_departments(self.table, batch).await
    }
}

/// Consecutive batches of at most `batch_size`, order preserved.
pub fn partition<T>(records: &[T], batch_size: usize) -> std::slice::Chunks<'_, T> {
    records.chunks(batch_size.max(1))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// 1-based.
    pub index: usize,
    pub size: usize,
    pub written: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<BatchOutcome>,
    pub written: u64,
    pub failed_batches: usize,
}

impl BatchReport {
    pub fn batches(&self) -> usize {
        self.outcomes.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchLoader {
    pub batch_size: usize,
    pub policy: BatchFailurePolicy,
}

impl BatchLoader {
    pub fn new(batch_size: usize, policy: BatchFailurePolicy) -> Self {
        Self { batch_size, policy }
    }

    /// Writes batches one at a time. Under `Abort` the first failure ends the
    /// run; under `Continue` it is recorded and the next batch is attempted.
    pub async fn run<T, K>(&self, sink: &K, records: &[T]) -> Result<BatchReport, ImportError>
    where
        T: Sync,
        K: BatchSink<T> + ?Sized,
    {
        let total = records.len().div_ceil(self.batch_size.max(1));
        let mut report = BatchReport::default();

        for (i, batch) in partition(records, self.batch_size).enumerate() {
            let index = i + 1;
            match sink.write(batch).await {
                Ok(written) => {
                    report.written += written;
                    info!(
                        batch = index,
                        total,
                        written,
                        running_total = report.written,
                        "batch written"
                    );
                    report.outcomes.push(BatchOutcome {
                        index,
                        size: batch.len(),
                        written: Some(written),
                        error: None,
                    });
                }
                Err(e) => {
                    error!(batch = index, total, size = batch.len(), error = %e, "batch failed");
                    if self.policy == BatchFailurePolicy::Abort {
                        return Err(ImportError::BatchWrite {
                            batch: index,
                            total,
                            written: report.written,
                            source: e,
                        });
                    }
                    report.failed_batches += 1;
                    report.outcomes.push(BatchOutcome {
                        index,
                        size: batch.len(),
                        written: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(report)
    }
}
