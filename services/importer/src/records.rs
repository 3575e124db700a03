//! Output records produced from CSV rows and written to the store.

use serde::Serialize;

use crate::keys;
use crate::schedule::WeeklySchedule;

/// Store-assigned row identifier (`bigserial` primary key).
pub type RowId = i64;

/// One hospital or clinic row. `gov_id` is the publisher's identifier and
/// never changes once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacilityRecord {
    pub gov_id: String,
    pub name: String,
    pub address: String,
    pub prefecture: Option<String>,
    pub city: Option<String>,
    pub bed_count: Option<i32>,
}

/// One (facility, department) pair with its merged weekly hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepartmentRecord {
    pub facility_id: RowId,
    pub facility_gov_id: String,
    pub department_code: String,
    pub department_name: String,
    pub opening_hours: Option<WeeklySchedule>,
}

impl DepartmentRecord {
    /// Dedup key against rows already in the department table.
    pub fn store_key(&self) -> String {
        keys::department_key(self.facility_id, &self.department_code)
    }
}
