//! Event import: walks the event feed, applies one decided action per
//! record, synchronizes memberships, then withdraws events the feed
//! stopped delivering.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;

use evento_core::config::{ApiConfig, EventImportConfig};
use evento_core::db::repository::EventoRepository;
use evento_core::error::Result;
use evento_core::feed::{FeedPager, FeedSource};
use evento_core::models::event::{EventoEvent, MappedEvent};
use evento_core::models::import::{AnomalyKind, ImportKind, LogCategory};
use evento_core::models::membership::MembershipDelta;

use crate::event_action::{decide, EventAction, EventActionDecider};
use crate::event_executor::{EventActionExecutor, ExecutionOutcome};
use crate::location::LocationResolver;
use crate::logger::ImportLogger;
use crate::membership::MembershipSynchronizer;
use crate::target::TargetSystem;
use crate::task::{self, ImportSummary};

pub struct EventImportTask<R: EventoRepository, T: TargetSystem> {
    repo: Arc<R>,
    target: Arc<T>,
    feed: Arc<dyn FeedSource>,
    decider: EventActionDecider<R, T>,
    executor: EventActionExecutor<R, T>,
    page_size: u32,
    max_pages: u32,
}

impl<R: EventoRepository, T: TargetSystem> EventImportTask<R, T> {
    pub fn new(
        repo: Arc<R>,
        target: Arc<T>,
        feed: Arc<dyn FeedSource>,
        locations: Arc<LocationResolver<R, T>>,
        api: &ApiConfig,
        config: EventImportConfig,
    ) -> Self {
        Self {
            decider: EventActionDecider::new(repo.clone(), target.clone(), locations),
            executor: EventActionExecutor::new(repo.clone(), target.clone(), config),
            repo,
            target,
            feed,
            page_size: api.page_size,
            max_pages: api.max_pages,
        }
    }

    /// Run a full event import. With `dry_run` every action is decided and
    /// logged but nothing is changed.
    pub async fn run(&self, dry_run: bool) -> Result<ImportSummary> {
        let run = task::begin_run(&*self.repo, ImportKind::Events, dry_run).await?;
        let logger = ImportLogger::new(self.repo.clone(), Some(run.id.clone()), dry_run);
        let mut summary = ImportSummary::new(&run);
        let outcome = self.execute(&logger, &mut summary).await;
        task::finish_run(&*self.repo, summary, outcome).await
    }

    async fn execute(&self, logger: &ImportLogger<R>, summary: &mut ImportSummary) -> Result<()> {
        let started = Utc::now();
        let memberships =
            MembershipSynchronizer::new(self.repo.clone(), self.target.clone(), logger.is_dry_run());
        let mut seen = HashSet::new();
        let mut pager = FeedPager::new(
            &*self.feed,
            ImportKind::Events,
            self.page_size,
            self.max_pages,
        );

        while let Some(page) = pager.next_page().await? {
            for raw in &page.records {
                let raw_id = raw.get("idEvent").and_then(|v| v.as_i64());
                if let Some(id) = raw_id {
                    seen.insert(id);
                }
                match self.import_record(logger, summary, &memberships, raw).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        task::record_failed(logger, summary, LogCategory::Event, raw_id, &e).await?
                    }
                }
            }
        }

        info!(pages = pager.pages_read(), events = seen.len(), "Event feed complete");
        self.withdraw_missing(logger, summary, started, &seen).await
    }

    async fn import_record(
        &self,
        logger: &ImportLogger<R>,
        summary: &mut ImportSummary,
        memberships: &MembershipSynchronizer<R, T>,
        raw: &serde_json::Value,
    ) -> Result<()> {
        let event = EventoEvent::from_value(raw)?;
        if !logger.is_dry_run() {
            self.repo
                .touch_mapped_event(event.evento_id, Utc::now())
                .await?;
        }

        let facts = self.decider.gather_facts(&event).await?;
        let action = decide(&event, &facts);
        let kind = action.kind();
        // Nothing on the target resembles this event: routine, not an anomaly.
        let informational = matches!(
            &action,
            EventAction::ReportNonImportedEvent { candidates } if candidates.is_empty()
        );
        summary.bump(kind);

        if logger.is_dry_run() {
            logger
                .log_outcome(
                    LogCategory::Event,
                    kind,
                    Some(event.evento_id),
                    &format!("Would apply {kind} to '{}'", event.title),
                    json!({ "title": event.title }),
                )
                .await?;
            // Memberships of already mapped events can be previewed too.
            if let Some(mapped) = facts.mapped.filter(|_| facts.target_exists) {
                self.sync_memberships(logger, summary, memberships, &event, &mapped)
                    .await?;
            }
            return Ok(());
        }

        match self.executor.execute(&event, action).await? {
            ExecutionOutcome::Mapped(mapped) => {
                logger
                    .log_outcome(
                        LogCategory::Event,
                        kind,
                        Some(event.evento_id),
                        &format!("Applied {kind} to '{}'", event.title),
                        json!({ "refId": mapped.ref_id, "parentEventKey": mapped.parent_event_key }),
                    )
                    .await?;
                let keep = self
                    .sync_memberships(logger, summary, memberships, &event, &mapped)
                    .await?;
                logger
                    .resolve_anomalies(LogCategory::Event, event.evento_id, None)
                    .await?;
                logger
                    .resolve_anomalies(LogCategory::Membership, event.evento_id, keep)
                    .await
            }
            ExecutionOutcome::Tombstoned(mapped) => {
                logger
                    .log_outcome(
                        LogCategory::Event,
                        kind,
                        Some(event.evento_id),
                        "Target object was deleted, not recreating it",
                        json!({ "refId": mapped.ref_id }),
                    )
                    .await?;
                logger
                    .resolve_anomalies(LogCategory::Event, event.evento_id, None)
                    .await
            }
            ExecutionOutcome::Reported(_, message) if informational => {
                logger
                    .log_outcome(
                        LogCategory::Event,
                        kind,
                        Some(event.evento_id),
                        &message,
                        json!({ "title": event.title }),
                    )
                    .await?;
                logger
                    .resolve_anomalies(LogCategory::Event, event.evento_id, None)
                    .await
            }
            ExecutionOutcome::Reported(anomaly, message) => {
                if anomaly == AnomalyKind::AdoptionPreconditionFailed {
                    summary.bump(anomaly.as_str());
                }
                logger
                    .report_anomaly(
                        anomaly,
                        LogCategory::Event,
                        event.evento_id,
                        &message,
                        json!({ "title": event.title, "action": kind }),
                    )
                    .await?;
                logger
                    .resolve_anomalies(LogCategory::Event, event.evento_id, Some(anomaly))
                    .await
            }
        }
    }

    /// Returns the membership anomaly still present, if any.
    async fn sync_memberships(
        &self,
        logger: &ImportLogger<R>,
        summary: &mut ImportSummary,
        memberships: &MembershipSynchronizer<R, T>,
        event: &EventoEvent,
        mapped: &MappedEvent,
    ) -> Result<Option<AnomalyKind>> {
        let delta = memberships
            .synchronize(mapped, &event.employees, &event.students)
            .await?;
        count_delta(summary, &delta);

        if delta.unknown_members.is_empty() {
            return Ok(None);
        }
        logger
            .report_anomaly(
                AnomalyKind::UnknownMember,
                LogCategory::Membership,
                event.evento_id,
                &format!(
                    "{} roster entries have no imported account",
                    delta.unknown_members.len()
                ),
                json!({ "eventoUserIds": delta.unknown_members }),
            )
            .await?;
        Ok(Some(AnomalyKind::UnknownMember))
    }

    /// Withdraw mapped events not delivered in this run, after confirming
    /// their absence with a direct fetch.
    async fn withdraw_missing(
        &self,
        logger: &ImportLogger<R>,
        summary: &mut ImportSummary,
        started: DateTime<Utc>,
        seen: &HashSet<i64>,
    ) -> Result<()> {
        let missing = self.repo.list_events_not_imported_since(started).await?;

        for mapped in missing.into_iter().filter(|m| !seen.contains(&m.evento_id)) {
            let evento_id = mapped.evento_id;
            if self
                .feed
                .fetch_by_id(ImportKind::Events, evento_id)
                .await?
                .is_some()
            {
                summary.bump("still_delivered");
                if !logger.is_dry_run() {
                    self.repo.touch_mapped_event(evento_id, Utc::now()).await?;
                }
                logger
                    .log_outcome(
                        LogCategory::Event,
                        "still_delivered",
                        Some(evento_id),
                        "Event missing from pages but found by id",
                        json!({ "refId": mapped.ref_id }),
                    )
                    .await?;
                continue;
            }

            match self.withdraw(logger, summary, mapped).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    task::record_failed(logger, summary, LogCategory::Event, Some(evento_id), &e)
                        .await?
                }
            }
        }
        Ok(())
    }

    async fn withdraw(
        &self,
        logger: &ImportLogger<R>,
        summary: &mut ImportSummary,
        mapped: MappedEvent,
    ) -> Result<()> {
        let evento_id = mapped.evento_id;
        let ref_id = mapped.ref_id;
        let action = self.decider.determine_delete_action(mapped).await?;
        let kind = action.kind();
        summary.bump(kind);
        if !logger.is_dry_run() {
            self.executor.execute_delete(action).await?;
        }
        logger
            .log_outcome(
                LogCategory::Event,
                kind,
                Some(evento_id),
                "Event no longer delivered",
                json!({ "refId": ref_id }),
            )
            .await?;
        logger
            .resolve_anomalies(LogCategory::Event, evento_id, None)
            .await
    }
}

fn count_delta(summary: &mut ImportSummary, delta: &MembershipDelta) {
    for _ in &delta.assigned {
        summary.bump("role_assigned");
    }
    for _ in &delta.deassigned {
        summary.bump("role_deassigned");
    }
    for _ in 0..delta.parent_assigned {
        summary.bump("parent_role_assigned");
    }
    for _ in 0..delta.parent_deassigned {
        summary.bump("parent_role_deassigned");
    }
}
