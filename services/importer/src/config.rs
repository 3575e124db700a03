//! Runtime settings and the per-entity import policy table.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

use crate::batch::{BatchFailurePolicy, WriteMode};
use crate::normalize::{NameFallback, StringNormalization};

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Hospital,
    Clinic,
    HospitalDepartment,
    ClinicDepartment,
}

impl EntityKind {
    /// Dependency order: facilities before the departments that reference them.
    pub const IMPORT_ORDER: [EntityKind; 4] = [
        EntityKind::Hospital,
        EntityKind::Clinic,
        EntityKind::HospitalDepartment,
        EntityKind::ClinicDepartment,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Hospital => "hospital",
            EntityKind::Clinic => "clinic",
            EntityKind::HospitalDepartment => "hospital-department",
            EntityKind::ClinicDepartment => "clinic-department",
        }
    }

    /// File name the publisher used for the 2025-12-01 release.
    pub fn default_file_name(self) -> &'static str {
        match self {
            EntityKind::Hospital => "01-1_hospital_facility_info_20251201.csv",
            EntityKind::Clinic => "02-1_clinic_facility_info_20251201.csv",
            EntityKind::HospitalDepartment => "01-2_hospital_speciality_hours_20251201.csv",
            EntityKind::ClinicDepartment => "02-2_clinic_speciality_hours_20251201.csv",
        }
    }

    pub fn profile(self) -> EntityProfile {
        match self {
            EntityKind::Hospital => EntityProfile {
                kind: self,
                shape: Shape::Facility,
                normalization: StringNormalization::Trim,
                write_mode: WriteMode::Upsert {
                    conflict_column: "gov_id",
                },
                failure_policy: BatchFailurePolicy::Abort,
            },
            EntityKind::Clinic => EntityProfile {
                kind: self,
                shape: Shape::Facility,
                normalization: StringNormalization::Trim,
                write_mode: WriteMode::Insert,
                failure_policy: BatchFailurePolicy::Abort,
            },
            EntityKind::HospitalDepartment => EntityProfile {
                kind: self,
                shape: Shape::Department {
                    parent: EntityKind::Hospital,
                    fallback: NameFallback::FoldAlphanumeric,
                },
                normalization: StringNormalization::CollapseWhitespace,
                write_mode: WriteMode::Insert,
                failure_policy: BatchFailurePolicy::Continue,
            },
            EntityKind::ClinicDepartment => EntityProfile {
                kind: self,
                shape: Shape::Department {
                    parent: EntityKind::Clinic,
                    fallback: NameFallback::FoldDigits,
                },
                normalization: StringNormalization::CollapseWhitespace,
                write_mode: WriteMode::Insert,
                failure_policy: BatchFailurePolicy::Continue,
            },
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// One CSV row is one record.
    Facility,
    /// Rows are merged per (facility, department code).
    Department {
        parent: EntityKind,
        fallback: NameFallback,
    },
}

/// Fixed per-entity behavior. These differ on purpose between entities and
/// are spelled out here rather than derived from anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityProfile {
    pub kind: EntityKind,
    pub shape: Shape,
    pub normalization: StringNormalization,
    pub write_mode: WriteMode,
    pub failure_policy: BatchFailurePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub hospital: String,
    pub clinic: String,
    pub hospital_department: String,
    pub clinic_department: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            hospital: "hospital".to_string(),
            clinic: "clinic".to_string(),
            hospital_department: "hospital_department".to_string(),
            clinic_department: "clinic_department".to_string(),
        }
    }
}

impl TableNames {
    pub fn for_entity(&self, kind: EntityKind) -> &str {
        match kind {
            EntityKind::Hospital => &self.hospital,
            EntityKind::Clinic => &self.clinic,
            EntityKind::HospitalDepartment => &self.hospital_department,
            EntityKind::ClinicDepartment => &self.clinic_department,
        }
    }
}

/// Everything one orchestrator run needs besides the store handle.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub source_path: PathBuf,
    pub batch_size: usize,
    pub page_size: usize,
    pub tables: TableNames,
    pub dry_run: bool,
}

impl ImportConfig {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            tables: TableNames::default(),
            dry_run: false,
        }
    }
}

/// Process-level settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub db_url: Option<String>,
    pub max_connections: u32,
    pub batch_size: usize,
    pub page_size: usize,
    pub data_dir: PathBuf,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL").ok(),
            max_connections: env_number("DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            batch_size: env_number("IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            page_size: env_number("IMPORT_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            data_dir: PathBuf::from(
                std::env::var("IMPORT_DATA_DIR").unwrap_or_else(|_| ".".to_string()),
            ),
        })
    }

    pub fn db_url(&self) -> Result<&str> {
        self.db_url.as_deref().context("DB_URL env var missing")
    }

    pub fn default_source(&self, kind: EntityKind) -> PathBuf {
        self.data_dir.join(kind.default_file_name())
    }

    pub fn import_config(
        &self,
        source_path: &Path,
        batch_size: Option<usize>,
        page_size: Option<usize>,
        dry_run: bool,
    ) -> ImportConfig {
        ImportConfig {
            batch_size: batch_size.unwrap_or(self.batch_size).max(1),
            page_size: page_size.unwrap_or(self.page_size).max(1),
            dry_run,
            ..ImportConfig::new(source_path)
        }
    }
}

fn env_number<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
