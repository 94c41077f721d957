use std::sync::Arc;
use std::time::Instant;

use evento_core::feed::{EventoClient, FeedSource};
use evento_core::models::import::ImportKind;
use evento_import::target::TargetClient;
use evento_import::{
    EventAdminImportTask, EventImportTask, ImportSummary, LocationResolver, UserImportTask,
};
use tracing::{error, info};

use super::{load_config, open_repository};

/// Run the `import` command for each of `kinds` in order. Stops at the first
/// run that fails.
pub async fn run(config_path: &str, kinds: &[ImportKind], dry_run: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repository(&config).await?;
    let feed: Arc<dyn FeedSource> = Arc::new(EventoClient::new(&config.api)?);
    let target = Arc::new(TargetClient::new(&config.target));

    if dry_run {
        println!("Dry run: actions are decided and logged, nothing is changed");
    }

    for &kind in kinds {
        println!("Importing {kind}...");
        let start = Instant::now();

        let result = match kind {
            ImportKind::Users => {
                UserImportTask::new(
                    repo.clone(),
                    target.clone(),
                    feed.clone(),
                    &config.api,
                    config.user_import.clone(),
                )
                .run(dry_run)
                .await
            }
            ImportKind::Events => {
                let locations = Arc::new(LocationResolver::new(
                    repo.clone(),
                    target.clone(),
                    config.event_import.locations.clone(),
                    config.target.root_ref_id,
                ));
                EventImportTask::new(
                    repo.clone(),
                    target.clone(),
                    feed.clone(),
                    locations,
                    &config.api,
                    config.event_import.clone(),
                )
                .run(dry_run)
                .await
            }
            ImportKind::Admins => {
                EventAdminImportTask::new(repo.clone(), target.clone(), feed.clone(), &config.api)
                    .run(dry_run)
                    .await
            }
        };

        match result {
            Ok(summary) => {
                info!(%kind, elapsed_ms = start.elapsed().as_millis() as u64, "Import finished");
                print_summary(&summary, start.elapsed().as_secs_f64());
            }
            Err(e) => {
                error!(%kind, error = %e, "Import failed");
                anyhow::bail!("{kind} import failed: {e}");
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &ImportSummary, seconds: f64) {
    println!();
    println!("{} import {} ({seconds:.1}s)", summary.kind, summary.run_id);
    println!("{}", "-".repeat(40));
    if summary.counts.is_empty() {
        println!("No actions.");
    }
    for (action, count) in &summary.counts {
        println!("{action:<32} {count:>6}");
    }
    if summary.errors > 0 {
        println!("{:<32} {:>6}", "skipped (errors)", summary.errors);
    }
    println!();
}
