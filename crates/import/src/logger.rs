//! Outcome log and anomaly register writer shared by the import tasks.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use evento_core::db::repository::EventoRepository;
use evento_core::error::Result;
use evento_core::models::import::{AnomalyKind, LogCategory, NewLogEntry};

/// Writes every decided action to `tracing` and to the queryable outcome log.
pub struct ImportLogger<R: EventoRepository> {
    repo: Arc<R>,
    run_id: Option<String>,
    dry_run: bool,
}

impl<R: EventoRepository> ImportLogger<R> {
    pub fn new(repo: Arc<R>, run_id: Option<String>, dry_run: bool) -> Self {
        Self {
            repo,
            run_id,
            dry_run,
        }
    }

    /// Record the outcome of one record. Dry runs are logged too, so the
    /// operator can inspect what a real run would do.
    pub async fn log_outcome(
        &self,
        category: LogCategory,
        outcome: &str,
        evento_id: Option<i64>,
        message: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        info!(
            run_id = self.run_id.as_deref().unwrap_or("-"),
            ?category,
            outcome,
            evento_id,
            dry_run = self.dry_run,
            "{message}"
        );
        self.repo
            .append_log_entry(&NewLogEntry {
                run_id: self.run_id.clone(),
                category,
                outcome: outcome.to_string(),
                evento_id,
                message: message.to_string(),
                details,
            })
            .await?;
        Ok(())
    }

    /// Log an anomaly and keep it open in the register until it stops recurring.
    pub async fn report_anomaly(
        &self,
        kind: AnomalyKind,
        category: LogCategory,
        evento_id: i64,
        message: &str,
        details: serde_json::Value,
    ) -> Result<()> {
        warn!(
            run_id = self.run_id.as_deref().unwrap_or("-"),
            anomaly = %kind,
            ?category,
            evento_id,
            "{message}"
        );
        self.repo
            .append_log_entry(&NewLogEntry {
                run_id: self.run_id.clone(),
                category,
                outcome: kind.as_str().to_string(),
                evento_id: Some(evento_id),
                message: message.to_string(),
                details,
            })
            .await?;
        if !self.dry_run {
            self.repo
                .record_anomaly(kind, category, evento_id, message, Utc::now())
                .await?;
        }
        Ok(())
    }

    /// Close the open anomalies of a record that was processed cleanly,
    /// except `keep` which is still present.
    pub async fn resolve_anomalies(
        &self,
        category: LogCategory,
        evento_id: i64,
        keep: Option<AnomalyKind>,
    ) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let resolved = self
            .repo
            .resolve_anomalies(category, evento_id, keep, Utc::now())
            .await?;
        if resolved > 0 {
            info!(?category, evento_id, resolved, "Resolved anomalies");
        }
        Ok(())
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}
