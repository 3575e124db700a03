//! Data-access seam between the import pipeline and the relational store.

use async_trait::async_trait;
use thiserror::Error;

use crate::records::{DepartmentRecord, FacilityRecord, RowId};

#[cfg(test)]
pub mod memory;
mod postgres;

pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid SQL identifier {0:?}")]
    InvalidIdentifier(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Rejected(String),
}

/// Which columns a key page reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyColumns {
    /// `id, gov_id` of a facility table.
    GovId,
    /// `id, facility_id, department_code` of a department table.
    FacilityAndCode,
}

/// A raw key row as stored. Keys are normalized by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRow {
    pub id: RowId,
    pub parent_id: Option<RowId>,
    pub key: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Rows `offset..offset + limit` in primary-key order.
    async fn fetch_key_page(
        &self,
        table: &str,
        columns: KeyColumns,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<KeyRow>, StoreError>;

    /// Plain insert; any conflicting row fails the whole call.
    async fn insert_facilities(
        &self,
        table: &str,
        rows: &[FacilityRecord],
    ) -> Result<u64, StoreError>;

    /// Insert, overwriting rows that collide on `conflict_column`.
    async fn upsert_facilities(
        &self,
        table: &str,
        conflict_column: &str,
        rows: &[FacilityRecord],
    ) -> Result<u64, StoreError>;

    async fn insert_departments(
        &self,
        table: &str,
        rows: &[DepartmentRecord],
    ) -> Result<u64, StoreError>;
}

/// Table and column names are spliced into SQL, so only plain identifiers pass.
pub fn checked_identifier(name: &str) -> Result<&str, StoreError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
