//! In-process store with unique-key enforcement and failure injection.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{checked_identifier, KeyColumns, KeyRow, Store, StoreError};
use crate::records::{DepartmentRecord, FacilityRecord, RowId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFacility {
    pub id: RowId,
    pub record: FacilityRecord,
    pub updates: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDepartment {
    pub id: RowId,
    pub record: DepartmentRecord,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: RowId,
    facilities: HashMap<String, Vec<StoredFacility>>,
    departments: HashMap<String, Vec<StoredDepartment>>,
    raw_facility_keys: HashMap<String, Vec<KeyRow>>,
    raw_department_keys: HashMap<String, Vec<KeyRow>>,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<usize>,
    write_calls: usize,
    page_calls: usize,
}

impl Tables {
    fn next_id(&mut self) -> RowId {
        self.next_id += 1;
        self.next_id
    }

    /// Write calls are numbered from 1 across all tables.
    fn begin_write(&mut self) -> Result<(), StoreError> {
        self.write_calls += 1;
        if self.failing_writes.contains(&self.write_calls) {
            return Err(StoreError::Rejected(format!(
                "injected failure on write call {}",
                self.write_calls
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a facility key exactly as given, without normalization.
    pub fn seed_facility_key(&self, table: &str, raw_gov_id: Option<&str>) -> RowId {
        let mut t = self.tables.lock().unwrap();
        let id = t.next_id();
        t.raw_facility_keys
            .entry(table.to_string())
            .or_default()
            .push(KeyRow {
                id,
                parent_id: None,
                key: raw_gov_id.map(str::to_string),
            });
        id
    }

    pub fn seed_department_key(&self, table: &str, facility_id: Option<RowId>, raw_code: Option<&str>) {
        let mut t = self.tables.lock().unwrap();
        let id = t.next_id();
        t.raw_department_keys
            .entry(table.to_string())
            .or_default()
            .push(KeyRow {
                id,
                parent_id: facility_id,
                key: raw_code.map(str::to_string),
            });
    }

    pub fn fail_reads_of(&self, table: &str) {
        self.tables.lock().unwrap().failing_reads.insert(table.to_string());
    }

    pub fn fail_write_call(&self, call: usize) {
        self.tables.lock().unwrap().failing_writes.insert(call);
    }

    pub fn facilities(&self, table: &str) -> Vec<StoredFacility> {
        let t = self.tables.lock().unwrap();
        t.facilities.get(table).cloned().unwrap_or_default()
    }

    pub fn departments(&self, table: &str) -> Vec<StoredDepartment> {
        let t = self.tables.lock().unwrap();
        t.departments.get(table).cloned().unwrap_or_default()
    }

    pub fn page_calls(&self) -> usize {
        self.tables.lock().unwrap().page_calls
    }

    pub fn write_calls(&self) -> usize {
        self.tables.lock().unwrap().write_calls
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch_key_page(
        &self,
        table: &str,
        columns: KeyColumns,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<KeyRow>, StoreError> {
        let table = checked_identifier(table)?;
        let mut t = self.tables.lock().unwrap();
        t.page_calls += 1;
        if t.failing_reads.contains(table) {
            return Err(StoreError::Rejected(format!("read of {table} refused")));
        }

        let mut rows: Vec<KeyRow> = match columns {
            KeyColumns::GovId => {
                let mut rows = t.raw_facility_keys.get(table).cloned().unwrap_or_default();
                rows.extend(t.facilities.get(table).into_iter().flatten().map(|f| KeyRow {
                    id: f.id,
                    parent_id: None,
                    key: Some(f.record.gov_id.clone()),
                }));
                rows
            }
            KeyColumns::FacilityAndCode => {
                let mut rows = t.raw_department_keys.get(table).cloned().unwrap_or_default();
                rows.extend(t.departments.get(table).into_iter().flatten().map(|d| KeyRow {
                    id: d.id,
                    parent_id: Some(d.record.facility_id),
                    key: Some(d.record.department_code.clone()),
                }));
                rows
            }
        };
        rows.sort_by_key(|r| r.id);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert_facilities(
        &self,
        table: &str,
        rows: &[FacilityRecord],
    ) -> Result<u64, StoreError> {
        let table = checked_identifier(table)?;
        let mut t = self.tables.lock().unwrap();
        t.begin_write()?;

        let mut seen: HashSet<&str> = t
            .facilities
            .get(table)
            .into_iter()
            .flatten()
            .map(|f| f.record.gov_id.as_str())
            .collect();
        for row in rows {
            if !seen.insert(row.gov_id.as_str()) {
                return Err(StoreError::Rejected(format!(
                    "duplicate key value violates unique constraint on {table}.gov_id ({})",
                    row.gov_id
                )));
            }
        }
        drop(seen);

        for row in rows {
            let id = t.next_id();
            t.facilities.entry(table.to_string()).or_default().push(StoredFacility {
                id,
                record: row.clone(),
                updates: 0,
            });
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_facilities(
        &self,
        table: &str,
        conflict_column: &str,
        rows: &[FacilityRecord],
    ) -> Result<u64, StoreError> {
        let table = checked_identifier(table)?;
        if checked_identifier(conflict_column)? != "gov_id" {
            return Err(StoreError::Rejected(format!(
                "no unique constraint on {table}.{conflict_column}"
            )));
        }
        let mut t = self.tables.lock().unwrap();
        t.begin_write()?;

        for row in rows {
            let existing = t
                .facilities
                .get_mut(table)
                .and_then(|list| list.iter_mut().find(|f| f.record.gov_id == row.gov_id));
            match existing {
                Some(stored) => {
                    stored.record = row.clone();
                    stored.updates += 1;
                }
                None => {
                    let id = t.next_id();
                    t.facilities.entry(table.to_string()).or_default().push(StoredFacility {
                        id,
                        record: row.clone(),
                        updates: 0,
                    });
                }
            }
        }
        Ok(rows.len() as u64)
    }

    async fn insert_departments(
        &self,
        table: &str,
        rows: &[DepartmentRecord],
    ) -> Result<u64, StoreError> {
        let table = checked_identifier(table)?;
        let mut t = self.tables.lock().unwrap();
        t.begin_write()?;

        let mut seen: HashSet<(RowId, String)> = t
            .departments
            .get(table)
            .into_iter()
            .flatten()
            .map(|d| (d.record.facility_id, d.record.department_code.clone()))
            .collect();
        for row in rows {
            if !seen.insert((row.facility_id, row.department_code.clone())) {
                return Err(StoreError::Rejected(format!(
                    "duplicate key value violates unique constraint on {table} ({}, {})",
                    row.facility_id, row.department_code
                )));
            }
        }

        for row in rows {
            let id = t.next_id();
            t.departments.entry(table.to_string()).or_default().push(StoredDepartment {
                id,
                record: row.clone(),
            });
        }
        Ok(rows.len() as u64)
    }
}
