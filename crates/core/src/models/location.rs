use serde::{Deserialize, Serialize};

/// One row of the location table: a classification triple and the category
/// on the target platform that receives its events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub department: String,
    pub kind: String,
    pub year: String,
    pub ref_id: i64,
}

impl Location {
    pub fn matches(&self, department: &str, kind: &str, year: &str) -> bool {
        self.department == department && self.kind == kind && self.year == year
    }
}
