//! Account import: walks the user feed, applies one decided action per
//! record, then withdraws accounts the feed stopped delivering.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::info;

use evento_core::config::{ApiConfig, UserImportConfig};
use evento_core::db::repository::EventoRepository;
use evento_core::error::Result;
use evento_core::feed::{FeedPager, FeedSource};
use evento_core::models::import::{ImportKind, LogCategory};
use evento_core::models::user::{EventoUser, MappedUser};

use crate::logger::ImportLogger;
use crate::target::TargetSystem;
use crate::task::{self, ImportSummary};
use crate::user_action::{decide, decide_delete};
use crate::user_executor::UserActionExecutor;

pub struct UserImportTask<R: EventoRepository, T: TargetSystem> {
    repo: Arc<R>,
    feed: Arc<dyn FeedSource>,
    executor: UserActionExecutor<R, T>,
    page_size: u32,
    max_pages: u32,
    stale_after_days: u32,
}

impl<R: EventoRepository, T: TargetSystem> UserImportTask<R, T> {
    pub fn new(
        repo: Arc<R>,
        target: Arc<T>,
        feed: Arc<dyn FeedSource>,
        api: &ApiConfig,
        config: UserImportConfig,
    ) -> Self {
        let stale_after_days = config.stale_after_days;
        Self {
            executor: UserActionExecutor::new(repo.clone(), target, config),
            repo,
            feed,
            page_size: api.page_size,
            max_pages: api.max_pages,
            stale_after_days,
        }
    }

    /// Run a full user import. With `dry_run` every action is decided and
    /// logged but nothing is changed.
    pub async fn run(&self, dry_run: bool) -> Result<ImportSummary> {
        let run = task::begin_run(&*self.repo, ImportKind::Users, dry_run).await?;
        let logger = ImportLogger::new(self.repo.clone(), Some(run.id.clone()), dry_run);
        let mut summary = ImportSummary::new(&run);
        let outcome = self.execute(&logger, &mut summary).await;
        task::finish_run(&*self.repo, summary, outcome).await
    }

    async fn execute(&self, logger: &ImportLogger<R>, summary: &mut ImportSummary) -> Result<()> {
        let started = Utc::now();
        let mut seen = HashSet::new();
        let mut pager = FeedPager::new(
            &*self.feed,
            ImportKind::Users,
            self.page_size,
            self.max_pages,
        );

        while let Some(page) = pager.next_page().await? {
            for raw in &page.records {
                let raw_id = raw.get("idAccount").and_then(|v| v.as_i64());
                if let Some(id) = raw_id {
                    seen.insert(id);
                }
                match self.import_record(logger, summary, raw).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        task::record_failed(logger, summary, LogCategory::User, raw_id, &e).await?
                    }
                }
            }
        }

        info!(pages = pager.pages_read(), users = seen.len(), "User feed complete");
        self.withdraw_stale(logger, summary, started, &seen).await
    }

    async fn import_record(
        &self,
        logger: &ImportLogger<R>,
        summary: &mut ImportSummary,
        raw: &serde_json::Value,
    ) -> Result<()> {
        let user = EventoUser::from_value(raw)?;
        let mapped = self.repo.get_mapped_user(user.evento_id).await?;
        let action = decide(&user, mapped);
        let kind = action.kind();
        summary.bump(kind);

        if logger.is_dry_run() {
            return logger
                .log_outcome(
                    LogCategory::User,
                    kind,
                    Some(user.evento_id),
                    &format!("Would apply {kind} to {}", user.login_name),
                    json!({ "login": user.login_name }),
                )
                .await;
        }

        let mapped = self.executor.execute(&user, action).await?;
        logger
            .log_outcome(
                LogCategory::User,
                kind,
                Some(user.evento_id),
                &format!("Applied {kind} to {}", user.login_name),
                json!({
                    "login": user.login_name,
                    "userId": mapped.map(|m| m.user_id),
                }),
            )
            .await?;
        logger
            .resolve_anomalies(LogCategory::User, user.evento_id, None)
            .await
    }

    /// Re-check mappings not delivered for `stale_after_days` by direct fetch
    /// before withdrawing them; a paging race can hide an account for a run.
    async fn withdraw_stale(
        &self,
        logger: &ImportLogger<R>,
        summary: &mut ImportSummary,
        started: DateTime<Utc>,
        seen: &HashSet<i64>,
    ) -> Result<()> {
        let cutoff = started - Duration::days(i64::from(self.stale_after_days));
        let stale = self.repo.list_users_not_imported_since(cutoff).await?;

        for mapped in stale.into_iter().filter(|m| !seen.contains(&m.evento_id)) {
            let evento_id = mapped.evento_id;
            match self.feed.fetch_by_id(ImportKind::Users, evento_id).await? {
                Some(_) => {
                    summary.bump("still_delivered");
                    if !logger.is_dry_run() {
                        self.repo.touch_mapped_user(evento_id, Utc::now()).await?;
                    }
                    logger
                        .log_outcome(
                            LogCategory::User,
                            "still_delivered",
                            Some(evento_id),
                            "Account missing from pages but found by id",
                            json!({ "userId": mapped.user_id }),
                        )
                        .await?;
                }
                None => match self.withdraw(logger, summary, mapped).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        task::record_failed(logger, summary, LogCategory::User, Some(evento_id), &e)
                            .await?
                    }
                },
            }
        }
        Ok(())
    }

    async fn withdraw(
        &self,
        logger: &ImportLogger<R>,
        summary: &mut ImportSummary,
        mapped: MappedUser,
    ) -> Result<()> {
        let evento_id = mapped.evento_id;
        let user_id = mapped.user_id;
        let action = decide_delete(mapped);
        let kind = action.kind();
        summary.bump(kind);
        if !logger.is_dry_run() {
            self.executor.execute_delete(action).await?;
        }
        logger
            .log_outcome(
                LogCategory::User,
                kind,
                Some(evento_id),
                "Account no longer delivered",
                json!({ "userId": user_id }),
            )
            .await
    }
}
