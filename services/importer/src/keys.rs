//! Existing-key loading: pages whole tables into lookup maps.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::normalize::{self, StringNormalization};
use crate::records::RowId;
use crate::store::{KeyColumns, KeyRow, Store, StoreError};

/// Joins composite key parts. Assumed absent from government IDs and codes.
pub const KEY_SEPARATOR: char = '_';

/// Normalized government ID -> facility row id.
pub type FacilityKeyMap = HashMap<String, RowId>;

/// `facility_id + "_" + department_code` -> department row id.
pub type DepartmentKeyMap = HashMap<String, RowId>;

/// Merge key for department CSV rows.
pub fn aggregation_key(gov_id: &str, department_code: &str) -> String {
    format!("{gov_id}{KEY_SEPARATOR}{department_code}")
}

/// Dedup key for stored department rows.
pub fn department_key(facility_id: RowId, department_code: &str) -> String {
    format!("{facility_id}{KEY_SEPARATOR}{department_code}")
}

/// Reads `table` page by page until a short page, handing each row to `visit`.
/// Returns the number of rows read. Any page error aborts the scan.
async fn scan_pages<S, F>(
    store: &S,
    table: &str,
    columns: KeyColumns,
    page_size: usize,
    mut visit: F,
) -> Result<usize, StoreError>
where
    S: Store + ?Sized,
    F: FnMut(KeyRow),
{
    let page_size = page_size.max(1);
    let mut page = 0usize;
    let mut total = 0usize;

    loop {
        let rows = store
            .fetch_key_page(table, columns, page * page_size, page_size)
            .await?;
        let fetched = rows.len();
        total += fetched;
        debug!(table, page, fetched, "key page read");

        rows.into_iter().for_each(&mut visit);

        if fetched < page_size {
            return Ok(total);
        }
        page += 1;
    }
}

pub async fn load_facility_keys<S: Store + ?Sized>(
    store: &S,
    table: &str,
    page_size: usize,
    normalization: StringNormalization,
) -> Result<FacilityKeyMap, StoreError> {
    let mut map = FacilityKeyMap::new();
    let rows = scan_pages(store, table, KeyColumns::GovId, page_size, |row| {
        if let Some(gov_id) = normalization.apply_opt(row.key.as_deref()) {
            map.insert(gov_id, row.id);
        }
    })
    .await?;

    info!(table, rows, keys = map.len(), "facility key map loaded");
    Ok(map)
}

pub async fn load_department_keys<S: Store + ?Sized>(
    store: &S,
    table: &str,
    page_size: usize,
) -> Result<DepartmentKeyMap, StoreError> {
    let mut map = DepartmentKeyMap::new();
    let rows = scan_pages(store, table, KeyColumns::FacilityAndCode, page_size, |row| {
        let code = normalize::department_code(row.key.as_deref());
        if let (Some(facility_id), Some(code)) = (row.parent_id, code) {
            map.insert(department_key(facility_id, &code), row.id);
        }
    })
    .await?;

    info!(table, rows, keys = map.len(), "department key map loaded");
    Ok(map)
}
