//! Run bookkeeping shared by the import tasks: the run record, the per-kind
//! run lock and the summary of counts.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use evento_core::db::repository::EventoRepository;
use evento_core::error::{EventoError, Result};
use evento_core::models::import::{
    AnomalyKind, ImportKind, ImportRun, ImportRunStatus, LogCategory,
};

use crate::logger::ImportLogger;

/// Counts of one import run, keyed by action kind.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ImportSummary {
    pub kind: ImportKind,
    pub run_id: String,
    pub dry_run: bool,
    pub counts: BTreeMap<String, i64>,
    /// Records skipped because of a record-level fault.
    pub errors: i64,
}

impl ImportSummary {
    pub fn new(run: &ImportRun) -> Self {
        Self {
            kind: run.kind,
            run_id: run.id.clone(),
            dry_run: run.dry_run,
            counts: BTreeMap::new(),
            errors: 0,
        }
    }

    pub fn bump(&mut self, key: &str) {
        *self.counts.entry(key.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, key: &str) -> i64 {
        self.counts.get(key).copied().unwrap_or(0)
    }
}

/// Create the run record and take the run lock for `kind`.
///
/// If another run holds the lock the new run is recorded as failed and a
/// `Conflict` error is returned.
pub async fn begin_run<R: EventoRepository + ?Sized>(
    repo: &R,
    kind: ImportKind,
    dry_run: bool,
) -> Result<ImportRun> {
    let run = repo.create_import_run(kind, dry_run).await?;

    if !repo.try_acquire_lock(kind, &run.id, Utc::now()).await? {
        let holder = repo
            .get_lock(kind)
            .await?
            .map(|l| l.run_id)
            .unwrap_or_else(|| "unknown".to_string());
        let message = format!("{kind} import is already running (run {holder})");
        warn!(run_id = %run.id, %kind, %holder, "Run lock held, not starting");
        repo.finish_import_run(
            &run.id,
            ImportRunStatus::Failed,
            &BTreeMap::new(),
            0,
            Some(&message),
        )
        .await?;
        return Err(EventoError::Conflict(message));
    }

    info!(run_id = %run.id, %kind, dry_run, "Starting import run");
    Ok(run)
}

/// Record the run outcome and release the lock. Partial counts are kept
/// for failed runs.
pub async fn finish_run<R: EventoRepository + ?Sized>(
    repo: &R,
    summary: ImportSummary,
    outcome: Result<()>,
) -> Result<ImportSummary> {
    let (status, message) = match &outcome {
        Ok(()) => (ImportRunStatus::Completed, None),
        Err(e) => (ImportRunStatus::Failed, Some(e.to_string())),
    };

    repo.finish_import_run(
        &summary.run_id,
        status,
        &summary.counts,
        summary.errors,
        message.as_deref(),
    )
    .await?;
    repo.release_lock(summary.kind, &summary.run_id).await?;

    match outcome {
        Ok(()) => {
            info!(
                run_id = %summary.run_id,
                kind = %summary.kind,
                errors = summary.errors,
                counts = ?summary.counts,
                dry_run = summary.dry_run,
                "Import run completed"
            );
            Ok(summary)
        }
        Err(e) => {
            error!(run_id = %summary.run_id, kind = %summary.kind, error = %e, "Import run failed");
            Err(e)
        }
    }
}

/// Count and log a record that could not be processed. The run continues.
///
/// Unparseable payloads open an `invalid_record` anomaly; other failures
/// are only logged, since the next run retries them anyway.
pub(crate) async fn record_failed<R: EventoRepository>(
    logger: &ImportLogger<R>,
    summary: &mut ImportSummary,
    category: LogCategory,
    raw_id: Option<i64>,
    err: &EventoError,
) -> Result<()> {
    summary.errors += 1;
    let message = err.to_string();
    match err {
        EventoError::Record { evento_id, .. } => match evento_id.or(raw_id) {
            Some(id) => {
                logger
                    .report_anomaly(
                        AnomalyKind::InvalidRecord,
                        category,
                        id,
                        &message,
                        serde_json::Value::Null,
                    )
                    .await
            }
            None => {
                logger
                    .log_outcome(
                        category,
                        AnomalyKind::InvalidRecord.as_str(),
                        None,
                        &message,
                        serde_json::Value::Null,
                    )
                    .await
            }
        },
        _ => {
            logger
                .log_outcome(category, "failed", raw_id, &message, serde_json::Value::Null)
                .await
        }
    }
}
