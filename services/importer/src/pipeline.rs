//! Per-entity orchestration:
//! existing keys -> [parent keys] -> aggregate CSV -> filter -> batch write -> summary.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::{self, RowCounts};
use crate::batch::{BatchLoader, BatchReport, DepartmentSink, FacilitySink, WriteMode};
use crate::config::{EntityKind, EntityProfile, ImportConfig, Shape};
use crate::csv_source::{CsvSource, HeaderIndex};
use crate::error::{ImportError, Step};
use crate::keys;
use crate::normalize::{NameFallback, StringNormalization};
use crate::store::{Store, StoreError};

/// Every count category a run reports. Filled in as the run progresses, so a
/// completed run's summary reflects exactly what was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub entity: EntityKind,
    pub source: String,
    pub rows_read: usize,
    pub aggregated: usize,
    pub skipped_missing_field: usize,
    pub skipped_parent_not_found: usize,
    pub skipped_duplicate: usize,
    pub skipped_existing: usize,
    pub to_write: usize,
    pub written: u64,
    pub batches: usize,
    pub failed_batches: usize,
    pub parent_keys: Option<usize>,
    pub existing_keys: Option<usize>,
    pub dry_run: bool,
}

impl ImportSummary {
    fn new(entity: EntityKind, config: &ImportConfig) -> Self {
        Self {
            entity,
            source: config.source_path.display().to_string(),
            rows_read: 0,
            aggregated: 0,
            skipped_missing_field: 0,
            skipped_parent_not_found: 0,
            skipped_duplicate: 0,
            skipped_existing: 0,
            to_write: 0,
            written: 0,
            batches: 0,
            failed_batches: 0,
            parent_keys: None,
            existing_keys: None,
            dry_run: config.dry_run,
        }
    }

    fn record_rows(&mut self, counts: RowCounts, aggregated: usize) {
        self.rows_read = counts.rows_read;
        self.skipped_missing_field = counts.skipped_missing_field;
        self.skipped_parent_not_found = counts.skipped_parent_not_found;
        self.skipped_duplicate = counts.skipped_duplicate;
        self.aggregated = aggregated;
    }

    fn record_batches(&mut self, report: &BatchReport) {
        self.written = report.written;
        self.batches = report.batches();
        self.failed_batches = report.failed_batches;
    }

    /// Rows dropped before aggregation, for any reason.
    pub fn skipped_rows(&self) -> usize {
        self.skipped_missing_field + self.skipped_parent_not_found + self.skipped_duplicate
    }
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Entity:                   {}", self.entity)?;
        writeln!(f, "Source:                   {}", self.source)?;
        writeln!(f, "Rows read:                {}", self.rows_read)?;
        writeln!(f, "Records aggregated:       {}", self.aggregated)?;
        writeln!(f, "Skipped (missing field):  {}", self.skipped_missing_field)?;
        writeln!(f, "Skipped (no parent):      {}", self.skipped_parent_not_found)?;
        writeln!(f, "Skipped (duplicate row):  {}", self.skipped_duplicate)?;
        writeln!(f, "Skipped (already stored): {}", self.skipped_existing)?;
        writeln!(f, "To write:                 {}", self.to_write)?;
        if self.dry_run {
            write!(f, "Written:                  0 (dry run)")
        } else {
            writeln!(f, "Written:                  {}", self.written)?;
            write!(
                f,
                "Batches:                  {} ({} failed)",
                self.batches, self.failed_batches
            )
        }
    }
}

fn key_load_error(step: Step, table: &str) -> impl FnOnce(StoreError) -> ImportError + '_ {
    move |source| ImportError::KeyLoad {
        step,
        table: table.to_string(),
        source,
    }
}

fn csv_error(config: &ImportConfig) -> impl Fn(csv::Error) -> ImportError + '_ {
    move |source| ImportError::CsvRead {
        path: config.source_path.display().to_string(),
        source,
    }
}

/// Rows still stream without these columns, but every one of them will be skipped.
fn warn_missing_columns(headers: &HeaderIndex, required: &[&str]) {
    for column in required.iter().filter(|c| !headers.contains(c)) {
        warn!(column, "required column missing from header");
    }
}

/// Runs one entity import to completion or to its first fatal error.
pub async fn run_import<S: Store + ?Sized>(
    store: &S,
    kind: EntityKind,
    config: &ImportConfig,
) -> Result<ImportSummary, ImportError> {
    let profile = kind.profile();
    info!(
        entity = %kind,
        source = %config.source_path.display(),
        batch_size = config.batch_size,
        dry_run = config.dry_run,
        "import started"
    );

    let summary = match profile.shape {
        Shape::Facility => import_facilities(store, &profile, config).await?,
        Shape::Department { parent, fallback } => {
            import_departments(store, &profile, parent, fallback, config).await?
        }
    };

    info!(
        entity = %kind,
        rows = summary.rows_read,
        written = summary.written,
        failed_batches = summary.failed_batches,
        "import completed"
    );
    Ok(summary)
}

async fn import_facilities<S: Store + ?Sized>(
    store: &S,
    profile: &EntityProfile,
    config: &ImportConfig,
) -> Result<ImportSummary, ImportError> {
    let table = config.tables.for_entity(profile.kind);
    let mut summary = ImportSummary::new(profile.kind, config);

    // Upserts overwrite, so stored keys only matter for insert-only tables.
    let existing = match profile.write_mode {
        WriteMode::Insert => {
            let map = keys::load_facility_keys(store, table, config.page_size, profile.normalization)
                .await
                .map_err(key_load_error(Step::LoadExistingKeys, table))?;
            summary.existing_keys = Some(map.len());
            Some(map)
        }
        WriteMode::Upsert { .. } => None,
    };

    let source =
        CsvSource::open(&config.source_path, profile.normalization).map_err(csv_error(config))?;
    warn_missing_columns(
        source.headers(),
        &[aggregate::COL_ID, aggregate::COL_NAME, aggregate::COL_ADDRESS],
    );
    let scan = aggregate::scan_facilities(source.rows(), profile.normalization)
        .map_err(csv_error(config))?;
    summary.record_rows(scan.counts, scan.records.len());

    let records = match &existing {
        Some(existing) => {
            let (stored, fresh): (Vec<_>, Vec<_>) = scan
                .records
                .into_iter()
                .partition(|r| {
                    let stored = existing.contains_key(&r.gov_id);
                    if stored {
                        debug!(gov_id = %r.gov_id, "facility already stored");
                    }
                    stored
                });
            summary.skipped_existing = stored.len();
            fresh
        }
        None => scan.records,
    };
    summary.to_write = records.len();
    info!(
        entity = %profile.kind,
        to_write = summary.to_write,
        skipped_existing = summary.skipped_existing,
        "facility records filtered"
    );

    if config.dry_run || records.is_empty() {
        if records.is_empty() {
            warn!(entity = %profile.kind, "nothing new to write");
        }
        return Ok(summary);
    }

    let sink = FacilitySink {
        store,
        table,
        mode: profile.write_mode,
    };
    let report = BatchLoader::new(config.batch_size, profile.failure_policy)
        .run(&sink, &records)
        .await?;
    summary.record_batches(&report);
    Ok(summary)
}

async fn import_departments<S: Store + ?Sized>(
    store: &S,
    profile: &EntityProfile,
    parent: EntityKind,
    fallback: NameFallback,
    config: &ImportConfig,
) -> Result<ImportSummary, ImportError> {
    let table = config.tables.for_entity(profile.kind);
    let parent_table = config.tables.for_entity(parent);
    let mut summary = ImportSummary::new(profile.kind, config);
    let normalization: StringNormalization = profile.normalization;

    let parents = keys::load_facility_keys(store, parent_table, config.page_size, normalization)
        .await
        .map_err(key_load_error(Step::LoadParentKeys, parent_table))?;
    summary.parent_keys = Some(parents.len());
    if parents.is_empty() {
        return Err(ImportError::ParentTableEmpty {
            table: parent_table.to_string(),
            parent,
        });
    }

    let existing = keys::load_department_keys(store, table, config.page_size)
        .await
        .map_err(key_load_error(Step::LoadExistingKeys, table))?;
    summary.existing_keys = Some(existing.len());

    let source = CsvSource::open(&config.source_path, normalization).map_err(csv_error(config))?;
    warn_missing_columns(
        source.headers(),
        &[aggregate::COL_ID, aggregate::COL_DEPARTMENT_NAME],
    );
    let aggregation = aggregate::aggregate_departments(source.rows(), &parents, normalization, fallback)
        .map_err(csv_error(config))?;
    summary.record_rows(aggregation.counts, aggregation.records.len());

    let (stored, records): (Vec<_>, Vec<_>) = aggregation
        .records
        .into_iter()
        .partition(|r| {
            let stored = existing.contains_key(&r.store_key());
            if stored {
                debug!(
                    gov_id = %r.facility_gov_id,
                    code = %r.department_code,
                    "department already stored"
                );
            }
            stored
        });
    summary.skipped_existing = stored.len();
    summary.to_write = records.len();
    info!(
        entity = %profile.kind,
        aggregated = summary.aggregated,
        skipped_existing = summary.skipped_existing,
        to_write = summary.to_write,
        "department records filtered"
    );

    if config.dry_run || records.is_empty() {
        if records.is_empty() {
            warn!(entity = %profile.kind, "nothing new to write");
        }
        return Ok(summary);
    }

    let sink = DepartmentSink { store, table };
    let report = BatchLoader::new(config.batch_size, profile.failure_policy)
        .run(&sink, &records)
        .await?;
    summary.record_batches(&report);
    if report.failed_batches > 0 {
        warn!(
            entity = %profile.kind,
            failed_batches = report.failed_batches,
            "some batches failed"
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{DayHours, Weekday};
    use crate::store::memory::MemoryStore;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const FACILITY_HEADER: &str = "ID,正式名称,所在地,都道府県コード,市区町村コード,合計病床数\n";
    const DEPT_HEADER: &str =
        "ID,診療科目コード,診療科目名,月_診療開始時間,月_診療終了時間,火_診療開始時間,火_診療終了時間\n";

    fn write_csv(dir: &TempDir, name: &str, header: &str, body: &str) -> ImportConfig {
        let path = dir.path().join(name);
        fs::write(&path, format!("\u{feff}{header}{body}")).unwrap();
        ImportConfig::new(path)
    }

    async fn seed_clinics(store: &MemoryStore, dir: &TempDir) {
        let config = write_csv(
            dir,
            "clinic.csv",
            FACILITY_HEADER,
            "0001,Test Clinic,1 Main St,13,13101,\n0002,Other Clinic,2 Main St,13,13102,\n",
        );
        run_import(store, EntityKind::Clinic, &config).await.unwrap();
    }

    #[tokio::test]
    async fn test_facility_import_counts_invalid_rows() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let config = write_csv(
            &dir,
            "clinic.csv",
            FACILITY_HEADER,
            "0001,Test Clinic,1 Main St,,,\n0002,,2 Main St,,,\n",
        );

        let summary = run_import(&store, EntityKind::Clinic, &config).await.unwrap();

        assert_eq!(summary.rows_read, 2);
        assert_eq!(summary.skipped_rows(), 1);
        assert_eq!(summary.written, 1);
        let stored = store.facilities("clinic");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].record.gov_id, "0001");
        assert_eq!(stored[0].record.name, "Test Clinic");
    }

    #[tokio::test]
    async fn test_clinic_rerun_skips_existing() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        seed_clinics(&store, &dir).await;

        let config = write_csv(
            &dir,
            "clinic2.csv",
            FACILITY_HEADER,
            "0001,Renamed Clinic,1 Main St,,,\n0003,New Clinic,3 Main St,,,\n",
        );
        let summary = run_import(&store, EntityKind::Clinic, &config).await.unwrap();

        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(summary.written, 1);
        let stored = store.facilities("clinic");
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].record.name, "Test Clinic");
        assert_eq!(stored[0].updates, 0);
    }

    #[tokio::test]
    async fn test_hospital_rerun_overwrites_without_reading_keys() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let first = write_csv(&dir, "h1.csv", FACILITY_HEADER, "0001,Old Name,Tokyo,13,13101,50\n");
        run_import(&store, EntityKind::Hospital, &first).await.unwrap();

        let second = write_csv(
            &dir,
            "h2.csv",
            FACILITY_HEADER,
            "0001,New Name,Tokyo,13,13101,80\n0002,Second,Osaka,27,27100,\n",
        );
        let summary = run_import(&store, EntityKind::Hospital, &second).await.unwrap();

        assert_eq!(store.page_calls(), 0);
        assert_eq!(summary.existing_keys, None);
        assert_eq!(summary.skipped_existing, 0);
        assert_eq!(summary.written, 2);

        let stored = store.facilities("hospital");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].record.name, "New Name");
        assert_eq!(stored[0].record.bed_count, Some(80));
        assert_eq!(stored[0].updates, 1);
    }

    #[tokio::test]
    async fn test_department_rows_merge_into_one_record() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        seed_clinics(&store, &dir).await;
        let clinic_id = store.facilities("clinic")[0].id;

        let config = write_csv(
            &dir,
            "dept.csv",
            DEPT_HEADER,
            "0001,1,内科,09:00,17:00,,\n0001,1,内科,,,10:00,18:00\n",
        );
        let summary = run_import(&store, EntityKind::ClinicDepartment, &config)
            .await
            .unwrap();

        assert_eq!(summary.rows_read, 2);
        assert_eq!(summary.aggregated, 1);
        assert_eq!(summary.written, 1);
        assert_eq!(summary.parent_keys, Some(2));

        let stored = store.departments("clinic_department");
        assert_eq!(stored.len(), 1);
        let record = &stored[0].record;
        assert_eq!(record.facility_id, clinic_id);
        assert_eq!(record.department_code, "00001");
        let hours = record.opening_hours.as_ref().unwrap();
        assert_eq!(hours.get(Weekday::Monday), Some(&DayHours::new("09:00", "17:00")));
        assert_eq!(hours.get(Weekday::Tuesday), Some(&DayHours::new("10:00", "18:00")));
    }

    #[tokio::test]
    async fn test_department_rerun_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        seed_clinics(&store, &dir).await;

        let config = write_csv(
            &dir,
            "dept.csv",
            DEPT_HEADER,
            "0001,1,内科,09:00,17:00,,\n0001,2,外科,,,10:00,18:00\n0002,1,内科,09:00,12:00,,\n",
        );
        let first = run_import(&store, EntityKind::ClinicDepartment, &config)
            .await
            .unwrap();
        assert_eq!(first.written, 3);
        let writes_after_first = store.write_calls();

        let second = run_import(&store, EntityKind::ClinicDepartment, &config)
            .await
            .unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.to_write, 0);
        assert_eq!(second.skipped_existing, second.aggregated);
        assert_eq!(second.existing_keys, Some(3));
        assert_eq!(store.write_calls(), writes_after_first);
        assert_eq!(store.departments("clinic_department").len(), 3);
    }

    #[tokio::test]
    async fn test_department_matches_stored_unpadded_code() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        seed_clinics(&store, &dir).await;
        let clinic_id = store.facilities("clinic")[0].id;
        store.seed_department_key("clinic_department", Some(clinic_id), Some("1"));

        let config = write_csv(&dir, "dept.csv", DEPT_HEADER, "0001,00001,内科,09:00,17:00,,\n");
        let summary = run_import(&store, EntityKind::ClinicDepartment, &config)
            .await
            .unwrap();

        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(summary.written, 0);
    }

    #[tokio::test]
    async fn test_department_requires_parent_rows() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let config = write_csv(&dir, "dept.csv", DEPT_HEADER, "0001,1,内科,09:00,17:00,,\n");

        let err = run_import(&store, EntityKind::HospitalDepartment, &config)
            .await
            .unwrap_err();

        assert_eq!(err.step(), Step::Precondition);
        assert!(matches!(
            err,
            ImportError::ParentTableEmpty {
                parent: EntityKind::Hospital,
                ..
            }
        ));
        assert_eq!(store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_key_load_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        seed_clinics(&store, &dir).await;
        store.fail_reads_of("clinic");

        let clinics = write_csv(&dir, "c.csv", FACILITY_HEADER, "0009,X,Y,,,\n");
        let err = run_import(&store, EntityKind::Clinic, &clinics).await.unwrap_err();
        assert_eq!(err.step(), Step::LoadExistingKeys);

        let depts = write_csv(&dir, "d.csv", DEPT_HEADER, "0001,1,内科,,,,\n");
        let err = run_import(&store, EntityKind::ClinicDepartment, &depts)
            .await
            .unwrap_err();
        assert_eq!(err.step(), Step::LoadParentKeys);
        assert!(err.to_string().starts_with("[FATAL]"));
    }

    #[tokio::test]
    async fn test_missing_csv_aborts_with_read_step() {
        let store = MemoryStore::new();
        let config = ImportConfig::new(Path::new("/nonexistent/hospital.csv"));
        let err = run_import(&store, EntityKind::Hospital, &config)
            .await
            .unwrap_err();
        assert_eq!(err.step(), Step::ReadCsv);
    }

    #[tokio::test]
    async fn test_department_batch_failure_continues() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        seed_clinics(&store, &dir).await;
        // Call 1 was the clinic seed; the second department batch is call 3.
        store.fail_write_call(3);

        let mut config = write_csv(
            &dir,
            "dept.csv",
            DEPT_HEADER,
            "0001,1,内科,,,,\n0001,2,外科,,,,\n0002,1,内科,,,,\n",
        );
        config.batch_size = 1;
        let summary = run_import(&store, EntityKind::ClinicDepartment, &config)
            .await
            .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.failed_batches, 1);
        assert_eq!(summary.written, 2);
        assert_eq!(store.departments("clinic_department").len(), 2);
    }

    #[tokio::test]
    async fn test_facility_batch_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        store.fail_write_call(2);

        let mut config = write_csv(
            &dir,
            "clinic.csv",
            FACILITY_HEADER,
            "0001,A,a,,,\n0002,B,b,,,\n0003,C,c,,,\n",
        );
        config.batch_size = 1;
        let err = run_import(&store, EntityKind::Clinic, &config)
            .await
            .unwrap_err();

        assert_eq!(err.step(), Step::BatchWrite);
        assert_eq!(store.write_calls(), 2);
        assert_eq!(store.facilities("clinic").len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let mut config = write_csv(&dir, "h.csv", FACILITY_HEADER, "0001,A,a,,,\n");
        config.dry_run = true;

        let summary = run_import(&store, EntityKind::Hospital, &config).await.unwrap();
        assert_eq!(summary.to_write, 1);
        assert_eq!(summary.written, 0);
        assert_eq!(store.write_calls(), 0);
        assert!(summary.to_string().contains("dry run"));
    }
}
