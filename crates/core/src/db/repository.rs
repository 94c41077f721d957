use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    common::RoleKind,
    event::{MappedEvent, ParentEvent},
    import::{
        Anomaly, AnomalyKind, ImportKind, ImportLock, ImportLogEntry, ImportRun, ImportRunStatus,
        LogCategory, NewLogEntry,
    },
    location::Location,
    membership::Membership,
    user::MappedUser,
};

#[async_trait]
pub trait EventoUserRepository: Send + Sync {
    async fn upsert_mapped_user(&self, user: &MappedUser) -> Result<()>;
    async fn get_mapped_user(&self, evento_id: i64) -> Result<Option<MappedUser>>;
    async fn get_mapped_user_by_user_id(&self, user_id: i64) -> Result<Option<MappedUser>>;
    /// Register a sighting of the account. Returns false if it is not mapped.
    async fn touch_mapped_user(&self, evento_id: i64, seen_at: DateTime<Utc>) -> Result<bool>;
    async fn list_users_not_imported_since(&self, cutoff: DateTime<Utc>)
        -> Result<Vec<MappedUser>>;
    async fn delete_mapped_user(&self, evento_id: i64) -> Result<bool>;
    async fn count_mapped_users(&self) -> Result<i64>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn upsert_mapped_event(&self, event: &MappedEvent) -> Result<()>;
    async fn get_mapped_event(&self, evento_id: i64) -> Result<Option<MappedEvent>>;
    async fn get_mapped_event_by_ref(&self, ref_id: i64) -> Result<Option<MappedEvent>>;
    async fn list_mapped_events(&self) -> Result<Vec<MappedEvent>>;
    async fn list_events_for_parent(&self, group_unique_key: &str) -> Result<Vec<MappedEvent>>;
    async fn list_events_not_imported_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MappedEvent>>;
    async fn touch_mapped_event(&self, evento_id: i64, seen_at: DateTime<Utc>) -> Result<bool>;
    async fn delete_mapped_event(&self, evento_id: i64) -> Result<bool>;
}

#[async_trait]
pub trait ParentEventRepository: Send + Sync {
    async fn upsert_parent_event(&self, parent: &ParentEvent) -> Result<()>;
    async fn get_parent_event_by_key(&self, group_unique_key: &str)
        -> Result<Option<ParentEvent>>;
    /// Parents whose title matches exactly. More than one row means the
    /// title is ambiguous.
    async fn list_parent_events_by_title(&self, title: &str) -> Result<Vec<ParentEvent>>;
    async fn get_parent_event_by_ref(&self, ref_id: i64) -> Result<Option<ParentEvent>>;
    async fn list_parent_events(&self) -> Result<Vec<ParentEvent>>;
    async fn delete_parent_event(&self, group_unique_key: &str) -> Result<bool>;
}

#[async_trait]
pub trait LocationRepository: Send + Sync {
    /// Purge the table and insert `locations` as one transaction.
    async fn replace_locations(&self, locations: &[Location]) -> Result<()>;
    async fn get_location(&self, department: &str, kind: &str, year: &str)
        -> Result<Option<Location>>;
    async fn list_locations(&self) -> Result<Vec<Location>>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn list_memberships(
        &self,
        evento_event_id: i64,
        role_kind: RoleKind,
    ) -> Result<Vec<Membership>>;
    /// Insert, or repoint an existing row at a new target account. Returns
    /// true if a row was written.
    async fn add_membership(&self, membership: &Membership) -> Result<bool>;
    async fn remove_membership(
        &self,
        evento_event_id: i64,
        evento_user_id: i64,
        role_kind: RoleKind,
    ) -> Result<bool>;
    /// Whether the user holds `role_kind` on another event below the same parent.
    async fn has_membership_in_other_sub_event(
        &self,
        group_unique_key: &str,
        excluded_evento_event_id: i64,
        evento_user_id: i64,
        role_kind: RoleKind,
    ) -> Result<bool>;
    async fn delete_memberships_for_event(&self, evento_event_id: i64) -> Result<u64>;
}

#[async_trait]
pub trait ImportRunRepository: Send + Sync {
    async fn create_import_run(&self, kind: ImportKind, dry_run: bool) -> Result<ImportRun>;
    async fn finish_import_run(
        &self,
        id: &str,
        status: ImportRunStatus,
        counts: &BTreeMap<String, i64>,
        errors: i64,
        error_message: Option<&str>,
    ) -> Result<()>;
    async fn get_import_run(&self, id: &str) -> Result<Option<ImportRun>>;
    async fn get_latest_import_run(&self, kind: ImportKind) -> Result<Option<ImportRun>>;
    async fn list_import_runs(&self, limit: i64) -> Result<Vec<ImportRun>>;
}

#[async_trait]
pub trait ImportLogRepository: Send + Sync {
    async fn append_log_entry(&self, entry: &NewLogEntry) -> Result<i64>;
    async fn list_log_entries(&self, run_id: Option<&str>, limit: i64)
        -> Result<Vec<ImportLogEntry>>;
}

#[async_trait]
pub trait AnomalyRepository: Send + Sync {
    /// Open the anomaly or bump its occurrence count. A resolved row is reopened.
    async fn record_anomaly(
        &self,
        kind: AnomalyKind,
        category: LogCategory,
        evento_id: i64,
        message: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<()>;
    /// Resolve every open anomaly of the record except `keep`.
    async fn resolve_anomalies(
        &self,
        category: LogCategory,
        evento_id: i64,
        keep: Option<AnomalyKind>,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64>;
    async fn list_open_anomalies(&self) -> Result<Vec<Anomaly>>;
}

#[async_trait]
pub trait RunLockRepository: Send + Sync {
    /// Take the lock for `kind`. Returns false if another run holds it.
    async fn try_acquire_lock(
        &self,
        kind: ImportKind,
        run_id: &str,
        acquired_at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn release_lock(&self, kind: ImportKind, run_id: &str) -> Result<bool>;
    async fn get_lock(&self, kind: ImportKind) -> Result<Option<ImportLock>>;
    /// Drop the lock regardless of holder, for runs that died without releasing it.
    async fn force_release_lock(&self, kind: ImportKind) -> Result<bool>;
}

/// Combined repository trait for the whole mapping store.
pub trait EventoRepository:
    EventoUserRepository
    + EventRepository
    + ParentEventRepository
    + LocationRepository
    + MembershipRepository
    + ImportRunRepository
    + ImportLogRepository
    + AnomalyRepository
    + RunLockRepository
{
}
