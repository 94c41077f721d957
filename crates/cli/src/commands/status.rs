use std::collections::BTreeMap;

use evento_core::db::repository::{
    AnomalyRepository, EventoUserRepository, ImportRunRepository, RunLockRepository,
};
use evento_core::models::import::{Anomaly, ImportKind, ImportRun};

use super::{load_config, open_repository};

/// Anomalies listed individually before the rest are only counted.
const ANOMALY_LIST_LIMIT: usize = 20;

/// Run the `status` command: latest run per feed, held locks and open anomalies.
pub async fn run(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repository(&config).await?;

    let db_size = config
        .evento
        .database
        .path
        .as_deref()
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|| "unknown".to_string());

    println!("Evento Import Status");
    println!("====================");
    println!("Instance: {}", config.evento.instance_name);
    println!("Database: SQLite ({})", db_size);
    println!("Mapped accounts: {}", repo.count_mapped_users().await?);
    println!();

    for kind in ImportKind::ALL {
        println!("Last {kind} import");
        println!("{}", "-".repeat(12 + kind.as_str().len()));
        match repo.get_latest_import_run(kind).await? {
            Some(run) => print_run(&run),
            None => println!("No runs recorded."),
        }
        if let Some(lock) = repo.get_lock(kind).await? {
            println!(
                "Locked:   by run {} since {}",
                lock.run_id,
                lock.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        println!();
    }

    let anomalies = repo.list_open_anomalies().await?;
    println!("Open anomalies: {}", anomalies.len());
    println!("---------------");
    for (kind, count) in count_by_kind(&anomalies) {
        println!("{kind:<32} {count:>6}");
    }
    if !anomalies.is_empty() {
        println!();
    }
    for anomaly in anomalies.iter().take(ANOMALY_LIST_LIMIT) {
        println!(
            "[{}] {:?} {}: {} (seen {}x)",
            anomaly.kind,
            anomaly.category,
            anomaly.evento_id,
            anomaly.message,
            anomaly.occurrences
        );
    }
    if anomalies.len() > ANOMALY_LIST_LIMIT {
        println!("... and {} more", anomalies.len() - ANOMALY_LIST_LIMIT);
    }

    Ok(())
}

fn print_run(run: &ImportRun) {
    println!("Run:      {}", run.id);
    println!(
        "Status:   {:?}{}",
        run.status,
        if run.dry_run { " (dry run)" } else { "" }
    );
    println!(
        "Started:  {}",
        run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    for (action, count) in &run.counts {
        println!("  {action:<30} {count:>6}");
    }
    if run.errors > 0 {
        println!("  {:<30} {:>6}", "skipped (errors)", run.errors);
    }
    if let Some(ref err) = run.error_message {
        println!("Error:    {}", err);
    }
}

fn count_by_kind(anomalies: &[Anomaly]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for anomaly in anomalies {
        *counts.entry(anomaly.kind.as_str()).or_insert(0) += 1;
    }
    counts
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
