//! `import_runs` audit rows: one per non-dry import.

use std::fs::File;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::EntityKind;
use crate::pipeline::ImportSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Aborted => "aborted",
        }
    }
}

/// Streams the file through SHA-256; formatted as `sha256:<hex>`.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

pub async fn start_run(
    pool: &PgPool,
    entity: EntityKind,
    source_path: &Path,
    content_hash: Option<&str>,
) -> Result<Uuid> {
    let run_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO import_runs (run_id, entity, source_path, content_hash, status)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(run_id)
    .bind(entity.as_str())
    .bind(source_path.display().to_string())
    .bind(content_hash)
    .bind(RunStatus::Running.as_str())
    .execute(pool)
    .await
    .context("Failed to record import run")?;
    Ok(run_id)
}

pub async fn finish_run(
    pool: &PgPool,
    run_id: Uuid,
    status: RunStatus,
    error: Option<&str>,
    summary: Option<&ImportSummary>,
) -> Result<()> {
    let summary = summary.map(serde_json::to_value).transpose()?;
    sqlx::query(
        r#"
        UPDATE import_runs
        SET finished_at = now(), status = $2, error = $3, summary = $4
        WHERE run_id = $1
        "#,
    )
    .bind(run_id)
    .bind(status.as_str())
    .bind(error)
    .bind(summary)
    .execute(pool)
    .await
    .context("Failed to finish import run")?;
    Ok(())
}
