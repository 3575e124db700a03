//! Folds CSV rows into output records in a single forward pass.
//!
//! Facility files are one row per record. Department files may spread one
//! (facility, department) pair over several rows, each carrying some days of
//! the week; those are merged into one record keyed by
//! `gov_id + "_" + department_code`.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::csv_source::CsvRow;
use crate::keys::{self, FacilityKeyMap};
use crate::normalize::{self, NameFallback, StringNormalization};
use crate::records::{DepartmentRecord, FacilityRecord};
use crate::schedule::{self, DayHours, Weekday, WeeklySchedule};

pub const COL_ID: &str = "ID";
pub const COL_NAME: &str = "正式名称";
pub const COL_ADDRESS: &str = "所在地";
pub const COL_PREFECTURE: &str = "都道府県コード";
pub const COL_CITY: &str = "市区町村コード";
pub const COL_BED_COUNT: &str = "合計病床数";
pub const COL_DEPARTMENT_CODE: &str = "診療科目コード";
pub const COL_DEPARTMENT_NAME: &str = "診療科目名";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub rows_read: usize,
    pub skipped_missing_field: usize,
    pub skipped_parent_not_found: usize,
    pub skipped_duplicate: usize,
}

/// Records in first-seen order plus the row accounting that produced them.
#[derive(Debug)]
pub struct Aggregation<T> {
    pub records: Vec<T>,
    pub counts: RowCounts,
}

/// Strict integer parse; anything else (blank, "12.5", "-") is absent.
fn parse_bed_count(raw: Option<String>) -> Option<i32> {
    raw.and_then(|s| s.parse().ok())
}

/// Government ID, formal name and address are required. A government ID
/// seen twice keeps its first valid row.
pub fn scan_facilities<I>(
    rows: I,
    normalization: StringNormalization,
) -> Result<Aggregation<FacilityRecord>, csv::Error>
where
    I: IntoIterator<Item = Result<CsvRow, csv::Error>>,
{
    let mut counts = RowCounts::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut records = Vec::new();

    for row in rows {
        let row = row?;
        counts.rows_read += 1;
        let field = |column| normalization.apply_opt(row.get(column));

        let (Some(gov_id), Some(name), Some(address)) =
            (field(COL_ID), field(COL_NAME), field(COL_ADDRESS))
        else {
            counts.skipped_missing_field += 1;
            continue;
        };

        if !seen.insert(gov_id.clone()) {
            debug!(gov_id, "duplicate facility row dropped");
            counts.skipped_duplicate += 1;
            continue;
        }

        records.push(FacilityRecord {
            gov_id,
            name,
            address,
            prefecture: field(COL_PREFECTURE),
            city: field(COL_CITY),
            bed_count: parse_bed_count(field(COL_BED_COUNT)),
        });
    }

    info!(
        rows = counts.rows_read,
        records = records.len(),
        skipped_missing = counts.skipped_missing_field,
        skipped_duplicate = counts.skipped_duplicate,
        "facility csv scanned"
    );
    Ok(Aggregation { records, counts })
}

/// Accumulates department rows against a loaded parent facility map.
pub struct DepartmentAggregator<'a> {
    parents: &'a FacilityKeyMap,
    normalization: StringNormalization,
    fallback: NameFallback,
    day_columns: Vec<(Weekday, String, String)>,
    index: HashMap<String, usize>,
    records: Vec<DepartmentRecord>,
    counts: RowCounts,
}

impl<'a> DepartmentAggregator<'a> {
    pub fn new(
        parents: &'a FacilityKeyMap,
        normalization: StringNormalization,
        fallback: NameFallback,
    ) -> Self {
        Self {
            parents,
            normalization,
            fallback,
            day_columns: Weekday::ALL
                .iter()
                .map(|day| (*day, day.start_column(), day.end_column()))
                .collect(),
            index: HashMap::new(),
            records: Vec::new(),
            counts: RowCounts::default(),
        }
    }

    fn schedule_fragment(&self, row: &CsvRow) -> Option<WeeklySchedule> {
        let fragment: WeeklySchedule = self
            .day_columns
            .iter()
            .filter_map(|(day, start, end)| {
                let start = self.normalization.apply_opt(row.get(start));
                let end = self.normalization.apply_opt(row.get(end));
                DayHours::from_parts(start, end).map(|hours| (*day, hours))
            })
            .collect();
        (!fragment.is_empty()).then_some(fragment)
    }

    pub fn push(&mut self, row: &CsvRow) {
        self.counts.rows_read += 1;

        let Some(gov_id) = self.normalization.apply_opt(row.get(COL_ID)) else {
            self.counts.skipped_missing_field += 1;
            return;
        };
        let Some(&facility_id) = self.parents.get(&gov_id) else {
            self.counts.skipped_parent_not_found += 1;
            return;
        };
        let Some(department_name) = self.normalization.apply_opt(row.get(COL_DEPARTMENT_NAME))
        else {
            self.counts.skipped_missing_field += 1;
            return;
        };
        let code = normalize::department_code(row.get(COL_DEPARTMENT_CODE))
            .or_else(|| self.fallback.code_from_name(&department_name));
        let Some(department_code) = code else {
            self.counts.skipped_missing_field += 1;
            return;
        };

        let fragment = self.schedule_fragment(row);
        let key = keys::aggregation_key(&gov_id, &department_code);

        match self.index.get(&key) {
            Some(&i) => {
                let record = &mut self.records[i];
                record.opening_hours =
                    schedule::merge_optional(record.opening_hours.take(), fragment);
            }
            None => {
                self.index.insert(key, self.records.len());
                self.records.push(DepartmentRecord {
                    facility_id,
                    facility_gov_id: gov_id,
                    department_code,
                    department_name,
                    opening_hours: fragment,
                });
            }
        }
    }

    pub fn finish(self) -> Aggregation<DepartmentRecord> {
        info!(
            rows = self.counts.rows_read,
            aggregated = self.records.len(),
            skipped_missing = self.counts.skipped_missing_field,
            skipped_parent_not_found = self.counts.skipped_parent_not_found,
            "department csv aggregated"
        );
        Aggregation {
            records: self.records,
            counts: self.counts,
        }
    }
}

pub fn aggregate_departments<I>(
    rows: I,
    parents: &FacilityKeyMap,
    normalization: StringNormalization,
    fallback: NameFallback,
) -> Result<Aggregation<DepartmentRecord>, csv::Error>
where
    I: IntoIterator<Item = Result<CsvRow, csv::Error>>,
{
    let mut aggregator = DepartmentAggregator::new(parents, normalization, fallback);
    for row in rows {
        aggregator.push(&row?);
    }
    Ok(aggregator.finish())
}
