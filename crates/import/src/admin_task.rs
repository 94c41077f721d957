//! Event admin import: grants the admin role to the additional
//! administrators the admin feed lists per event. Additive only.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use evento_core::config::ApiConfig;
use evento_core::db::repository::EventoRepository;
use evento_core::error::Result;
use evento_core::feed::{FeedPager, FeedSource};
use evento_core::models::event::EventoEventAdmins;
use evento_core::models::import::{AnomalyKind, ImportKind, LogCategory};

use crate::logger::ImportLogger;
use crate::membership::MembershipSynchronizer;
use crate::target::TargetSystem;
use crate::task::{self, ImportSummary};

pub struct EventAdminImportTask<R: EventoRepository, T: TargetSystem> {
    repo: Arc<R>,
    target: Arc<T>,
    feed: Arc<dyn FeedSource>,
    page_size: u32,
    max_pages: u32,
}

impl<R: EventoRepository, T: TargetSystem> EventAdminImportTask<R, T> {
    pub fn new(repo: Arc<R>, target: Arc<T>, feed: Arc<dyn FeedSource>, api: &ApiConfig) -> Self {
        Self {
            repo,
            target,
            feed,
            page_size: api.page_size,
            max_pages: api.max_pages,
        }
    }

    pub async fn run(&self, dry_run: bool) -> Result<ImportSummary> {
        let run = task::begin_run(&*self.repo, ImportKind::Admins, dry_run).await?;
        let logger = ImportLogger::new(self.repo.clone(), Some(run.id.clone()), dry_run);
        let mut summary = ImportSummary::new(&run);
        let outcome = self.execute(&logger, &mut summary).await;
        task::finish_run(&*self.repo, summary, outcome).await
    }

    async fn execute(&self, logger: &ImportLogger<R>, summary: &mut ImportSummary) -> Result<()> {
        let memberships =
            MembershipSynchronizer::new(self.repo.clone(), self.target.clone(), logger.is_dry_run());
        let mut pager = FeedPager::new(
            &*self.feed,
            ImportKind::Admins,
            self.page_size,
            self.max_pages,
        );
        let mut records = 0usize;

        while let Some(page) = pager.next_page().await? {
            for raw in &page.records {
                records += 1;
                let raw_id = raw.get("idEvent").and_then(|v| v.as_i64());
                match self.import_record(logger, summary, &memberships, raw).await {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        task::record_failed(logger, summary, LogCategory::Admin, raw_id, &e).await?
                    }
                }
            }
        }

        info!(pages = pager.pages_read(), records, "Admin feed complete");
        Ok(())
    }

    async fn import_record(
        &self,
        logger: &ImportLogger<R>,
        summary: &mut ImportSummary,
        memberships: &MembershipSynchronizer<R, T>,
        raw: &serde_json::Value,
    ) -> Result<()> {
        let admins = EventoEventAdmins::from_value(raw)?;
        let evento_id = admins.evento_id;

        let Some(mapped) = self.repo.get_mapped_event(evento_id).await? else {
            summary.bump(AnomalyKind::UnmappedEvent.as_str());
            return logger
                .report_anomaly(
                    AnomalyKind::UnmappedEvent,
                    LogCategory::Admin,
                    evento_id,
                    "Admins delivered for an event that is not imported",
                    json!({ "admins": admins.admins.len() }),
                )
                .await;
        };

        if mapped.target_deleted {
            summary.bump("skipped_deleted_event");
            return logger
                .log_outcome(
                    LogCategory::Admin,
                    "skipped_deleted_event",
                    Some(evento_id),
                    "Target object of this event was deleted",
                    json!({ "refId": mapped.ref_id }),
                )
                .await;
        }

        let delta = memberships.add_event_admins(&mapped, &admins.admins).await?;
        for _ in &delta.assigned {
            summary.bump("admin_assigned");
        }
        summary.bump("add_event_admins");
        logger
            .log_outcome(
                LogCategory::Admin,
                "add_event_admins",
                Some(evento_id),
                &format!("{} admins granted", delta.assigned.len()),
                json!({ "refId": mapped.ref_id, "assigned": delta.assigned.len() }),
            )
            .await?;

        if delta.unknown_members.is_empty() {
            return logger
                .resolve_anomalies(LogCategory::Admin, evento_id, None)
                .await;
        }
        logger
            .report_anomaly(
                AnomalyKind::UnknownMember,
                LogCategory::Admin,
                evento_id,
                &format!(
                    "{} admins have no imported account",
                    delta.unknown_members.len()
                ),
                json!({ "eventoUserIds": delta.unknown_members }),
            )
            .await?;
        logger
            .resolve_anomalies(LogCategory::Admin, evento_id, Some(AnomalyKind::UnknownMember))
            .await
    }
}
