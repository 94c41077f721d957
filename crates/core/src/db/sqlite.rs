use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{EventoError, Result};
use crate::models::{
    common::{AccountType, RoleKind},
    event::{MappedEvent, ParentEvent},
    import::{
        Anomaly, AnomalyKind, ImportKind, ImportLock, ImportLogEntry, ImportRun, ImportRunStatus,
        LogCategory, NewLogEntry,
    },
    location::Location,
    membership::Membership,
    user::MappedUser,
};

use super::repository::{
    AnomalyRepository, EventRepository, EventoRepository, EventoUserRepository,
    ImportLogRepository, ImportRunRepository, LocationRepository, MembershipRepository,
    ParentEventRepository, RunLockRepository,
};

#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl EventoRepository for SqliteRepository {}

// -- Helper functions for parsing enums from DB strings --

fn parse_account_type(s: &str) -> AccountType {
    match s {
        "local" => AccountType::Local,
        _ => AccountType::Directory,
    }
}

fn account_type_to_str(t: &AccountType) -> &'static str {
    match t {
        AccountType::Directory => "directory",
        AccountType::Local => "local",
    }
}

fn parse_role_kind(s: &str) -> RoleKind {
    match s {
        "admin" => RoleKind::Admin,
        _ => RoleKind::Member,
    }
}

fn role_kind_to_str(k: &RoleKind) -> &'static str {
    match k {
        RoleKind::Admin => "admin",
        RoleKind::Member => "member",
    }
}

fn parse_run_status(s: &str) -> ImportRunStatus {
    match s {
        "completed" => ImportRunStatus::Completed,
        "failed" => ImportRunStatus::Failed,
        _ => ImportRunStatus::Running,
    }
}

fn run_status_to_str(s: &ImportRunStatus) -> &'static str {
    match s {
        ImportRunStatus::Running => "running",
        ImportRunStatus::Completed => "completed",
        ImportRunStatus::Failed => "failed",
    }
}

fn parse_category(s: &str) -> LogCategory {
    match s {
        "user" => LogCategory::User,
        "membership" => LogCategory::Membership,
        "admin" => LogCategory::Admin,
        "location" => LogCategory::Location,
        _ => LogCategory::Event,
    }
}

fn category_to_str(c: &LogCategory) -> &'static str {
    match c {
        LogCategory::User => "user",
        LogCategory::Event => "event",
        LogCategory::Membership => "membership",
        LogCategory::Admin => "admin",
        LogCategory::Location => "location",
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// Fixed width so that timestamps compare correctly as strings.
fn datetime_to_str(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_mapped_user(r: &sqlx::sqlite::SqliteRow) -> MappedUser {
    MappedUser {
        evento_id: r.get("evento_id"),
        user_id: r.get("user_id"),
        account_type: parse_account_type(r.get("account_type")),
        last_imported: parse_datetime(r.get("last_imported")),
    }
}

fn row_to_mapped_event(r: &sqlx::sqlite::SqliteRow) -> MappedEvent {
    MappedEvent {
        evento_id: r.get("evento_id"),
        evento_title: r.get("evento_title"),
        ref_id: r.get("ref_id"),
        admin_role_id: r.get("admin_role_id"),
        member_role_id: r.get("member_role_id"),
        parent_event_key: r.get("parent_event_key"),
        auto_created: r.get::<i32, _>("auto_created") != 0,
        target_deleted: r.get::<i32, _>("target_deleted") != 0,
        last_imported: parse_datetime(r.get("last_imported")),
    }
}

fn row_to_parent_event(r: &sqlx::sqlite::SqliteRow) -> ParentEvent {
    ParentEvent {
        group_unique_key: r.get("group_unique_key"),
        group_evento_id: r.get("group_evento_id"),
        title: r.get("title"),
        ref_id: r.get("ref_id"),
        admin_role_id: r.get("admin_role_id"),
        member_role_id: r.get("member_role_id"),
    }
}

fn row_to_location(r: &sqlx::sqlite::SqliteRow) -> Location {
    Location {
        department: r.get("department"),
        kind: r.get("kind"),
        year: r.get("year"),
        ref_id: r.get("ref_id"),
    }
}

fn row_to_membership(r: &sqlx::sqlite::SqliteRow) -> Membership {
    Membership {
        evento_event_id: r.get("evento_event_id"),
        evento_user_id: r.get("evento_user_id"),
        user_id: r.get("user_id"),
        role_kind: parse_role_kind(r.get("role_kind")),
    }
}

fn row_to_import_run(r: &sqlx::sqlite::SqliteRow) -> Result<ImportRun> {
    let counts: BTreeMap<String, i64> = serde_json::from_str(r.get("counts"))
        .map_err(|e| EventoError::Serialization(e.to_string()))?;
    Ok(ImportRun {
        id: r.get("id"),
        kind: r.get::<String, _>("kind").parse()?,
        status: parse_run_status(r.get("status")),
        dry_run: r.get::<i32, _>("dry_run") != 0,
        started_at: parse_datetime(r.get("started_at")),
        completed_at: r
            .get::<Option<String>, _>("completed_at")
            .map(|s| parse_datetime(&s)),
        counts,
        errors: r.get("errors"),
        error_message: r.get("error_message"),
    })
}

fn row_to_log_entry(r: &sqlx::sqlite::SqliteRow) -> ImportLogEntry {
    ImportLogEntry {
        id: r.get("id"),
        run_id: r.get("run_id"),
        category: parse_category(r.get("category")),
        outcome: r.get("outcome"),
        evento_id: r.get("evento_id"),
        message: r.get("message"),
        details: serde_json::from_str(r.get("details")).unwrap_or(serde_json::Value::Null),
        created_at: parse_datetime(r.get("created_at")),
    }
}

fn row_to_anomaly(r: &sqlx::sqlite::SqliteRow) -> Result<Anomaly> {
    Ok(Anomaly {
        kind: r.get::<String, _>("kind").parse()?,
        category: parse_category(r.get("category")),
        evento_id: r.get("evento_id"),
        message: r.get("message"),
        first_seen: parse_datetime(r.get("first_seen")),
        last_seen: parse_datetime(r.get("last_seen")),
        occurrences: r.get("occurrences"),
        resolved_at: r
            .get::<Option<String>, _>("resolved_at")
            .map(|s| parse_datetime(&s)),
    })
}

// -- EventoUserRepository --

#[async_trait]
impl EventoUserRepository for SqliteRepository {
    async fn upsert_mapped_user(&self, user: &MappedUser) -> Result<()> {
        sqlx::query(
            "INSERT INTO evento_users (evento_id, user_id, account_type, last_imported)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(evento_id) DO UPDATE SET
                user_id = excluded.user_id,
                account_type = excluded.account_type,
                last_imported = excluded.last_imported",
        )
        .bind(user.evento_id)
        .bind(user.user_id)
        .bind(account_type_to_str(&user.account_type))
        .bind(datetime_to_str(&user.last_imported))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_mapped_user(&self, evento_id: i64) -> Result<Option<MappedUser>> {
        let row = sqlx::query("SELECT * FROM evento_users WHERE evento_id = ?1")
            .bind(evento_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_mapped_user))
    }

    async fn get_mapped_user_by_user_id(&self, user_id: i64) -> Result<Option<MappedUser>> {
        let row = sqlx::query("SELECT * FROM evento_users WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_mapped_user))
    }

    async fn touch_mapped_user(&self, evento_id: i64, seen_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE evento_users SET last_imported = ?2 WHERE evento_id = ?1")
            .bind(evento_id)
            .bind(datetime_to_str(&seen_at))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users_not_imported_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MappedUser>> {
        let rows = sqlx::query(
            "SELECT * FROM evento_users WHERE last_imported < ?1 ORDER BY evento_id",
        )
        .bind(datetime_to_str(&cutoff))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_mapped_user).collect())
    }

    async fn delete_mapped_user(&self, evento_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM evento_users WHERE evento_id = ?1")
            .bind(evento_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_mapped_users(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM evento_users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// -- EventRepository --

#[async_trait]
impl EventRepository for SqliteRepository {
    async fn upsert_mapped_event(&self, event: &MappedEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO evento_events (evento_id, evento_title, ref_id, admin_role_id, member_role_id, parent_event_key, auto_created, target_deleted, last_imported)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(evento_id) DO UPDATE SET
                evento_title = excluded.evento_title,
                ref_id = excluded.ref_id,
                admin_role_id = excluded.admin_role_id,
                member_role_id = excluded.member_role_id,
                parent_event_key = excluded.parent_event_key,
                auto_created = excluded.auto_created,
                target_deleted = excluded.target_deleted,
                last_imported = excluded.last_imported",
        )
        .bind(event.evento_id)
        .bind(&event.evento_title)
        .bind(event.ref_id)
        .bind(event.admin_role_id)
        .bind(event.member_role_id)
        .bind(&event.parent_event_key)
        .bind(event.auto_created as i32)
        .bind(event.target_deleted as i32)
        .bind(datetime_to_str(&event.last_imported))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_mapped_event(&self, evento_id: i64) -> Result<Option<MappedEvent>> {
        let row = sqlx::query("SELECT * FROM evento_events WHERE evento_id = ?1")
            .bind(evento_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_mapped_event))
    }

    async fn get_mapped_event_by_ref(&self, ref_id: i64) -> Result<Option<MappedEvent>> {
        let row = sqlx::query("SELECT * FROM evento_events WHERE ref_id = ?1 LIMIT 1")
            .bind(ref_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_mapped_event))
    }

    async fn list_mapped_events(&self) -> Result<Vec<MappedEvent>> {
        let rows = sqlx::query("SELECT * FROM evento_events ORDER BY evento_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_mapped_event).collect())
    }

    async fn list_events_for_parent(&self, group_unique_key: &str) -> Result<Vec<MappedEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM evento_events WHERE parent_event_key = ?1 ORDER BY evento_id",
        )
        .bind(group_unique_key)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_mapped_event).collect())
    }

    async fn list_events_not_imported_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MappedEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM evento_events WHERE last_imported < ?1 ORDER BY evento_id",
        )
        .bind(datetime_to_str(&cutoff))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_mapped_event).collect())
    }

    async fn touch_mapped_event(&self, evento_id: i64, seen_at: DateTime<Utc>) -> Result<bool> {
        let result =
            sqlx::query("UPDATE evento_events SET last_imported = ?2 WHERE evento_id = ?1")
                .bind(evento_id)
                .bind(datetime_to_str(&seen_at))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_mapped_event(&self, evento_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM evento_events WHERE evento_id = ?1")
            .bind(evento_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- ParentEventRepository --

#[async_trait]
impl ParentEventRepository for SqliteRepository {
    async fn upsert_parent_event(&self, parent: &ParentEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO parent_events (group_unique_key, group_evento_id, title, ref_id, admin_role_id, member_role_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(group_unique_key) DO UPDATE SET
                group_evento_id = excluded.group_evento_id,
                title = excluded.title,
                ref_id = excluded.ref_id,
                admin_role_id = excluded.admin_role_id,
                member_role_id = excluded.member_role_id",
        )
        .bind(&parent.group_unique_key)
        .bind(parent.group_evento_id)
        .bind(&parent.title)
        .bind(parent.ref_id)
        .bind(parent.admin_role_id)
        .bind(parent.member_role_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_parent_event_by_key(
        &self,
        group_unique_key: &str,
    ) -> Result<Option<ParentEvent>> {
        let row = sqlx::query("SELECT * FROM parent_events WHERE group_unique_key = ?1")
            .bind(group_unique_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_parent_event))
    }

    async fn list_parent_events_by_title(&self, title: &str) -> Result<Vec<ParentEvent>> {
        let rows = sqlx::query("SELECT * FROM parent_events WHERE title = ?1")
            .bind(title)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_parent_event).collect())
    }

    async fn get_parent_event_by_ref(&self, ref_id: i64) -> Result<Option<ParentEvent>> {
        let row = sqlx::query("SELECT * FROM parent_events WHERE ref_id = ?1 LIMIT 1")
            .bind(ref_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_parent_event))
    }

    async fn list_parent_events(&self) -> Result<Vec<ParentEvent>> {
        let rows = sqlx::query("SELECT * FROM parent_events ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_parent_event).collect())
    }

    async fn delete_parent_event(&self, group_unique_key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM parent_events WHERE group_unique_key = ?1")
            .bind(group_unique_key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- LocationRepository --

#[async_trait]
impl LocationRepository for SqliteRepository {
    async fn replace_locations(&self, locations: &[Location]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM event_locations")
            .execute(&mut *tx)
            .await?;

        for loc in locations {
            sqlx::query(
                "INSERT OR REPLACE INTO event_locations (department, kind, year, ref_id) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&loc.department)
            .bind(&loc.kind)
            .bind(&loc.year)
            .bind(loc.ref_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_location(
        &self,
        department: &str,
        kind: &str,
        year: &str,
    ) -> Result<Option<Location>> {
        let row = sqlx::query(
            "SELECT * FROM event_locations WHERE department = ?1 AND kind = ?2 AND year = ?3",
        )
        .bind(department)
        .bind(kind)
        .bind(year)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_location))
    }

    async fn list_locations(&self) -> Result<Vec<Location>> {
        let rows = sqlx::query("SELECT * FROM event_locations ORDER BY department, kind, year")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_location).collect())
    }
}

// -- MembershipRepository --

#[async_trait]
impl MembershipRepository for SqliteRepository {
    async fn list_memberships(
        &self,
        evento_event_id: i64,
        role_kind: RoleKind,
    ) -> Result<Vec<Membership>> {
        let rows = sqlx::query(
            "SELECT * FROM event_memberships WHERE evento_event_id = ?1 AND role_kind = ?2 ORDER BY evento_user_id",
        )
        .bind(evento_event_id)
        .bind(role_kind_to_str(&role_kind))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_membership).collect())
    }

    async fn add_membership(&self, membership: &Membership) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO event_memberships (evento_event_id, evento_user_id, user_id, role_kind)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(evento_event_id, evento_user_id, role_kind)
             DO UPDATE SET user_id = excluded.user_id
             WHERE event_memberships.user_id != excluded.user_id",
        )
        .bind(membership.evento_event_id)
        .bind(membership.evento_user_id)
        .bind(membership.user_id)
        .bind(role_kind_to_str(&membership.role_kind))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_membership(
        &self,
        evento_event_id: i64,
        evento_user_id: i64,
        role_kind: RoleKind,
    ) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM event_memberships WHERE evento_event_id = ?1 AND evento_user_id = ?2 AND role_kind = ?3",
        )
        .bind(evento_event_id)
        .bind(evento_user_id)
        .bind(role_kind_to_str(&role_kind))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn has_membership_in_other_sub_event(
        &self,
        group_unique_key: &str,
        excluded_evento_event_id: i64,
        evento_user_id: i64,
        role_kind: RoleKind,
    ) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM event_memberships m
             JOIN evento_events e ON e.evento_id = m.evento_event_id
             WHERE e.parent_event_key = ?1
               AND m.evento_event_id != ?2
               AND m.evento_user_id = ?3
               AND m.role_kind = ?4",
        )
        .bind(group_unique_key)
        .bind(excluded_evento_event_id)
        .bind(evento_user_id)
        .bind(role_kind_to_str(&role_kind))
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn delete_memberships_for_event(&self, evento_event_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM event_memberships WHERE evento_event_id = ?1")
            .bind(evento_event_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// -- ImportRunRepository --

#[async_trait]
impl ImportRunRepository for SqliteRepository {
    async fn create_import_run(&self, kind: ImportKind, dry_run: bool) -> Result<ImportRun> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO import_runs (id, kind, status, dry_run, started_at) VALUES (?1, ?2, 'running', ?3, ?4)",
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(dry_run as i32)
        .bind(datetime_to_str(&now))
        .execute(&self.pool)
        .await?;

        Ok(ImportRun {
            id,
            kind,
            status: ImportRunStatus::Running,
            dry_run,
            started_at: now,
            completed_at: None,
            counts: BTreeMap::new(),
            errors: 0,
            error_message: None,
        })
    }

    async fn finish_import_run(
        &self,
        id: &str,
        status: ImportRunStatus,
        counts: &BTreeMap<String, i64>,
        errors: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        let counts_json =
            serde_json::to_string(counts).map_err(|e| EventoError::Serialization(e.to_string()))?;
        sqlx::query(
            "UPDATE import_runs SET status = ?2, completed_at = ?3, counts = ?4, errors = ?5, error_message = ?6 WHERE id = ?1",
        )
        .bind(id)
        .bind(run_status_to_str(&status))
        .bind(datetime_to_str(&Utc::now()))
        .bind(&counts_json)
        .bind(errors)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_import_run(&self, id: &str) -> Result<Option<ImportRun>> {
        let row = sqlx::query("SELECT * FROM import_runs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_import_run).transpose()
    }

    async fn get_latest_import_run(&self, kind: ImportKind) -> Result<Option<ImportRun>> {
        let row = sqlx::query(
            "SELECT * FROM import_runs WHERE kind = ?1 ORDER BY started_at DESC LIMIT 1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_import_run).transpose()
    }

    async fn list_import_runs(&self, limit: i64) -> Result<Vec<ImportRun>> {
        let rows = sqlx::query("SELECT * FROM import_runs ORDER BY started_at DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_import_run).collect()
    }
}

// -- ImportLogRepository --

#[async_trait]
impl ImportLogRepository for SqliteRepository {
    async fn append_log_entry(&self, entry: &NewLogEntry) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO import_log (run_id, category, outcome, evento_id, message, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&entry.run_id)
        .bind(category_to_str(&entry.category))
        .bind(&entry.outcome)
        .bind(entry.evento_id)
        .bind(&entry.message)
        .bind(entry.details.to_string())
        .bind(datetime_to_str(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_log_entries(
        &self,
        run_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ImportLogEntry>> {
        let rows = match run_id {
            Some(run_id) => {
                sqlx::query("SELECT * FROM import_log WHERE run_id = ?1 ORDER BY id DESC LIMIT ?2")
                    .bind(run_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM import_log ORDER BY id DESC LIMIT ?1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(row_to_log_entry).collect())
    }
}

// -- AnomalyRepository --

#[async_trait]
impl AnomalyRepository for SqliteRepository {
    async fn record_anomaly(
        &self,
        kind: AnomalyKind,
        category: LogCategory,
        evento_id: i64,
        message: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let seen = datetime_to_str(&seen_at);
        sqlx::query(
            "INSERT INTO anomalies (kind, category, evento_id, message, first_seen, last_seen, occurrences, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1, NULL)
             ON CONFLICT(kind, category, evento_id) DO UPDATE SET
                message = excluded.message,
                last_seen = excluded.last_seen,
                first_seen = CASE WHEN anomalies.resolved_at IS NULL THEN anomalies.first_seen ELSE excluded.first_seen END,
                occurrences = CASE WHEN anomalies.resolved_at IS NULL THEN anomalies.occurrences + 1 ELSE 1 END,
                resolved_at = NULL",
        )
        .bind(kind.as_str())
        .bind(category_to_str(&category))
        .bind(evento_id)
        .bind(message)
        .bind(&seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn resolve_anomalies(
        &self,
        category: LogCategory,
        evento_id: i64,
        keep: Option<AnomalyKind>,
        resolved_at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE anomalies SET resolved_at = ?3
             WHERE category = ?1 AND evento_id = ?2 AND resolved_at IS NULL
               AND (?4 IS NULL OR kind != ?4)",
        )
        .bind(category_to_str(&category))
        .bind(evento_id)
        .bind(datetime_to_str(&resolved_at))
        .bind(keep.map(|k| k.as_str()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_open_anomalies(&self) -> Result<Vec<Anomaly>> {
        let rows = sqlx::query(
            "SELECT * FROM anomalies WHERE resolved_at IS NULL ORDER BY last_seen DESC, evento_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_anomaly).collect()
    }
}

// -- RunLockRepository --

#[async_trait]
impl RunLockRepository for SqliteRepository {
    async fn try_acquire_lock(
        &self,
        kind: ImportKind,
        run_id: &str,
        acquired_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO import_locks (kind, run_id, acquired_at) VALUES (?1, ?2, ?3)",
        )
        .bind(kind.as_str())
        .bind(run_id)
        .bind(datetime_to_str(&acquired_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lock(&self, kind: ImportKind, run_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM import_locks WHERE kind = ?1 AND run_id = ?2")
            .bind(kind.as_str())
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_lock(&self, kind: ImportKind) -> Result<Option<ImportLock>> {
        let row = sqlx::query("SELECT * FROM import_locks WHERE kind = ?1")
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| ImportLock {
            kind,
            run_id: r.get("run_id"),
            acquired_at: parse_datetime(r.get("acquired_at")),
        }))
    }

    async fn force_release_lock(&self, kind: ImportKind) -> Result<bool> {
        let result = sqlx::query("DELETE FROM import_locks WHERE kind = ?1")
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
