//! Fatal import conditions. Row-level problems are counted, never raised.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::EntityKind;
use crate::store::StoreError;

/// Orchestrator step an abort happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    LoadExistingKeys,
    LoadParentKeys,
    Precondition,
    ReadCsv,
    BatchWrite,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::LoadExistingKeys => "load-existing-keys",
            Step::LoadParentKeys => "load-parent-keys",
            Step::Precondition => "precondition",
            Step::ReadCsv => "read-csv",
            Step::BatchWrite => "batch-write",
        })
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("[FATAL] {step}: reading table {table} failed: {source}")]
    KeyLoad {
        step: Step,
        table: String,
        #[source]
        source: StoreError,
    },

    #[error("[FATAL] precondition: table {table} is empty, run the {parent} import first")]
    ParentTableEmpty { table: String, parent: EntityKind },

    #[error("[FATAL] read-csv: {path}: {source}")]
    CsvRead {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("[FATAL] batch-write: batch {batch}/{total} failed ({written} rows already written): {source}")]
    BatchWrite {
        batch: usize,
        total: usize,
        written: u64,
        #[source]
        source: StoreError,
    },
}

impl ImportError {
    pub fn step(&self) -> Step {
        match self {
            ImportError::KeyLoad { step, .. } => *step,
            ImportError::ParentTableEmpty { .. } => Step::Precondition,
            ImportError::CsvRead { .. } => Step::ReadCsv,
            ImportError::BatchWrite { .. } => Step::BatchWrite,
        }
    }
}
