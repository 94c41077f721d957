use evento_core::db::repository::RunLockRepository;
use evento_core::models::import::ImportKind;
use tracing::warn;

use super::{load_config, open_repository};

/// Run the `unlock` command: force-release the run lock of `kind`.
pub async fn run(config_path: &str, kind: ImportKind) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repository(&config).await?;

    let holder = repo.get_lock(kind).await?;
    if !repo.force_release_lock(kind).await? {
        println!("No {kind} run lock held.");
        return Ok(());
    }
    if let Some(lock) = holder {
        warn!(%kind, run_id = %lock.run_id, "Run lock released by operator");
        println!(
            "Released {kind} lock of run {} (held since {})",
            lock.run_id,
            lock.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}
