use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{checked_identifier, KeyColumns, KeyRow, Store, StoreError};
use crate::records::{DepartmentRecord, FacilityRecord, RowId};

const FACILITY_COLUMNS: &str = "gov_id, name, address, prefecture, city, bed_count";
const DEPARTMENT_COLUMNS: &str = "facility_id, department_code, department_name, opening_hours";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn facility_insert<'a>(table: &str, rows: &'a [FacilityRecord]) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO {table} ({FACILITY_COLUMNS}) "));
    qb.push_values(rows, |mut b, row| {
        b.push_bind(row.gov_id.clone())
            .push_bind(row.name.clone())
            .push_bind(row.address.clone())
            .push_bind(row.prefecture.clone())
            .push_bind(row.city.clone())
            .push_bind(row.bed_count);
    });
    qb
}

#[async_trait]
impl Store for PgStore {
    async fn fetch_key_page(
        &self,
        table: &str,
        columns: KeyColumns,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<KeyRow>, StoreError> {
        let table = checked_identifier(table)?;
        let rows: Vec<KeyRow> = match columns {
            KeyColumns::GovId => {
                let sql = format!("SELECT id, gov_id FROM {table} ORDER BY id LIMIT $1 OFFSET $2");
                sqlx::query_as::<_, (RowId, Option<String>)>(&sql)
                    .bind(limit as i64)
                    .bind(offset as i64)
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(|(id, key)| KeyRow {
                        id,
                        parent_id: None,
                        key,
                    })
                    .collect()
            }
            KeyColumns::FacilityAndCode => {
                let sql = format!(
                    "SELECT id, facility_id, department_code FROM {table} ORDER BY id LIMIT $1 OFFSET $2"
                );
                sqlx::query_as::<_, (RowId, Option<RowId>, Option<String>)>(&sql)
                    .bind(limit as i64)
                    .bind(offset as i64)
                    .fetch_all(&self.pool)
                    .await?
                    .into_iter()
                    .map(|(id, parent_id, key)| KeyRow { id, parent_id, key })
                    .collect()
            }
        };
        Ok(rows)
    }

    async fn insert_facilities(
        &self,
        table: &str,
        rows: &[FacilityRecord],
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let table = checked_identifier(table)?;
        let result = facility_insert(table, rows).build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn upsert_facilities(
        &self,
        table: &str,
        conflict_column: &str,
        rows: &[FacilityRecord],
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let table = checked_identifier(table)?;
        let conflict_column = checked_identifier(conflict_column)?;

        let mut qb = facility_insert(table, rows);
        qb.push(format!(" ON CONFLICT ({conflict_column}) DO UPDATE SET "));
        {
            let mut updates = qb.separated(", ");
            for column in FACILITY_COLUMNS.split(", ").filter(|c| *c != conflict_column) {
                updates.push(format!("{column} = EXCLUDED.{column}"));
            }
            updates.push("updated_at = now()");
        }

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn insert_departments(
        &self,
        table: &str,
        rows: &[DepartmentRecord],
    ) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let table = checked_identifier(table)?;

        let mut qb =
            QueryBuilder::<Postgres>::new(format!("INSERT INTO {table} ({DEPARTMENT_COLUMNS}) "));
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.facility_id)
                .push_bind(row.department_code.clone())
                .push_bind(row.department_name.clone())
                .push_bind(row.opening_hours.clone().map(Json));
        });

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
