use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventoError;

/// The feeds an import run can process. Each kind has its own run lock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Users,
    Events,
    Admins,
}

impl ImportKind {
    pub const ALL: [ImportKind; 3] = [ImportKind::Users, ImportKind::Events, ImportKind::Admins];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Users => "users",
            ImportKind::Events => "events",
            ImportKind::Admins => "admins",
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportKind {
    type Err = EventoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(ImportKind::Users),
            "events" => Ok(ImportKind::Events),
            "admins" => Ok(ImportKind::Admins),
            other => Err(EventoError::Serialization(format!(
                "unknown import kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImportRunStatus {
    Running,
    Completed,
    Failed,
}

/// A record of one import run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportRun {
    pub id: String,
    pub kind: ImportKind,
    pub status: ImportRunStatus,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of decided actions per action kind.
    pub counts: BTreeMap<String, i64>,
    /// Records skipped because of a record-level fault.
    pub errors: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// What an outcome log entry is about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogCategory {
    User,
    Event,
    Membership,
    Admin,
    Location,
}

/// A queryable line of the outcome log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportLogEntry {
    pub id: i64,
    pub run_id: Option<String>,
    pub category: LogCategory,
    /// Action or anomaly kind, e.g. `create_single_event`.
    pub outcome: String,
    pub evento_id: Option<i64>,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Outcome log line as written by the import logger. The id and timestamp
/// are assigned on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub run_id: Option<String>,
    pub category: LogCategory,
    pub outcome: String,
    pub evento_id: Option<i64>,
    pub message: String,
    pub details: serde_json::Value,
}

/// The holder of a per-kind run lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportLock {
    pub kind: ImportKind,
    pub run_id: String,
    pub acquired_at: DateTime<Utc>,
}

/// Conditions that need an operator's attention.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    UnknownLocation,
    NonImportedEvent,
    GroupKeyCollision,
    AdoptionPreconditionFailed,
    UnknownMember,
    UnmappedEvent,
    InvalidRecord,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::UnknownLocation => "unknown_location",
            AnomalyKind::NonImportedEvent => "non_imported_event",
            AnomalyKind::GroupKeyCollision => "group_key_collision",
            AnomalyKind::AdoptionPreconditionFailed => "adoption_precondition_failed",
            AnomalyKind::UnknownMember => "unknown_member",
            AnomalyKind::UnmappedEvent => "unmapped_event",
            AnomalyKind::InvalidRecord => "invalid_record",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyKind {
    type Err = EventoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown_location" => Ok(AnomalyKind::UnknownLocation),
            "non_imported_event" => Ok(AnomalyKind::NonImportedEvent),
            "group_key_collision" => Ok(AnomalyKind::GroupKeyCollision),
            "adoption_precondition_failed" => Ok(AnomalyKind::AdoptionPreconditionFailed),
            "unknown_member" => Ok(AnomalyKind::UnknownMember),
            "unmapped_event" => Ok(AnomalyKind::UnmappedEvent),
            "invalid_record" => Ok(AnomalyKind::InvalidRecord),
            other => Err(EventoError::Serialization(format!(
                "unknown anomaly kind: {other}"
            ))),
        }
    }
}

/// An open or resolved entry of the anomaly register. One row per
/// (kind, category, evento id); recurrences bump `occurrences`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub category: LogCategory,
    pub evento_id: i64,
    pub message: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrences: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}
