use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::common::{
    optional_bool, optional_str, required_i64, required_str, user_refs, EventoUserRef,
};
use crate::error::{EventoError, Result};

/// Department, kind and year of an event. Together they select the
/// destination category on the target platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Classification {
    pub department: String,
    pub kind: String,
    pub year: String,
}

/// Grouping attributes shared by all sibling events of a multi-group course.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventGroup {
    pub group_id: i64,
    pub name: String,
    pub member_count: Option<i64>,
}

/// An event (course) record delivered by the Evento event feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventoEvent {
    pub evento_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub classification: Classification,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// The source wants this event materialized on the target platform.
    pub create_flag: bool,
    /// This record is one sibling of a multi-group course.
    pub group_member_flag: bool,
    /// Present whenever `group_member_flag` is set.
    pub group: Option<EventGroup>,
    pub employees: Vec<EventoUserRef>,
    pub students: Vec<EventoUserRef>,
}

impl EventoEvent {
    /// Build a typed record from a raw feed entry.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let evento_id = required_i64(value, "idEvent", None)?;
        let id = Some(evento_id);

        let start_date = parse_date(value, "startDate", id)?;
        let end_date = parse_date(value, "endDate", id)?;

        let year = match optional_str(value, "year").filter(|y| !y.is_empty()) {
            Some(year) => year,
            None => start_date
                .map(|d| d.year().to_string())
                .ok_or_else(|| EventoError::record(id, "neither 'year' nor 'startDate' given"))?,
        };

        let classification = Classification {
            department: required_str(value, "department", id)?,
            kind: required_str(value, "kind", id)?,
            year,
        };

        let group_member_flag = optional_bool(value, "isGroupMember");
        let group = if group_member_flag {
            Some(EventGroup {
                group_id: required_i64(value, "groupId", id)?,
                name: required_str(value, "groupName", id)?,
                member_count: value.get("groupMemberCount").and_then(|v| v.as_i64()),
            })
        } else {
            None
        };

        Ok(Self {
            evento_id,
            title: required_str(value, "designation", id)?,
            description: optional_str(value, "description").filter(|d| !d.is_empty()),
            classification,
            start_date,
            end_date,
            create_flag: optional_bool(value, "isCreateCourseFlag"),
            group_member_flag,
            group,
            employees: user_refs(value, "employees", id)?,
            students: user_refs(value, "students", id)?,
        })
    }

    /// Deterministic key of the multi-group family this event belongs to.
    ///
    /// Derived from the shared grouping attributes only, so every sibling
    /// computes the same key regardless of its own id.
    pub fn group_unique_key(&self) -> Option<String> {
        let group = self.group.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(group.group_id.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(group.name.as_bytes());
        hasher.update(b"|");
        hasher.update(self.classification.department.as_bytes());
        hasher.update(b"|");
        hasher.update(self.classification.kind.as_bytes());
        hasher.update(b"|");
        hasher.update(self.classification.year.as_bytes());
        Some(format!("{:x}", hasher.finalize()))
    }
}

fn parse_date(value: &serde_json::Value, key: &str, id: Option<i64>) -> Result<Option<NaiveDate>> {
    let Some(raw) = optional_str(value, key).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    // Evento delivers either plain dates or full timestamps.
    let date_part = raw.get(..10).unwrap_or(&raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| EventoError::record(id, format!("invalid date in '{key}': {e}")))
}

/// Additional administrators delivered per event by the admin feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventoEventAdmins {
    pub evento_id: i64,
    pub admins: Vec<EventoUserRef>,
}

impl EventoEventAdmins {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let evento_id = required_i64(value, "idEvent", None)?;
        Ok(Self {
            evento_id,
            admins: user_refs(value, "accounts", Some(evento_id))?,
        })
    }
}

/// Persisted link between an Evento event and a container on the target platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappedEvent {
    pub evento_id: i64,
    pub evento_title: String,
    pub ref_id: i64,
    pub admin_role_id: i64,
    pub member_role_id: i64,
    /// Set iff this event is one group of a multi-group course.
    pub parent_event_key: Option<String>,
    /// Created by the importer, as opposed to adopted from manual content.
    pub auto_created: bool,
    /// The target object was trashed; the mapping stays as a tombstone.
    pub target_deleted: bool,
    pub last_imported: DateTime<Utc>,
}

/// Umbrella container of a multi-group course family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParentEvent {
    pub group_unique_key: String,
    pub group_evento_id: i64,
    pub title: String,
    pub ref_id: i64,
    pub admin_role_id: i64,
    pub member_role_id: i64,
}
