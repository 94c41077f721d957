pub mod fetch;
pub mod import;
pub mod init;
pub mod locations;
pub mod status;
pub mod unlock;

use std::path::Path;
use std::sync::Arc;

use evento_core::config::EventoConfig;
use evento_core::db::sqlite::SqliteRepository;
use evento_core::db::DatabasePool;
use tracing::info;

/// Load and validate the configuration file.
pub fn load_config(config_path: &str) -> anyhow::Result<EventoConfig> {
    let config = EventoConfig::load(Path::new(config_path))?;
    config.validate()?;
    info!("Loaded configuration from {}", config_path);
    Ok(config)
}

/// Open the mapping store named in the configuration.
pub async fn open_repository(config: &EventoConfig) -> anyhow::Result<Arc<SqliteRepository>> {
    let path = config
        .evento
        .database
        .path
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("SQLite path not configured"))?;
    let DatabasePool::Sqlite(pool) = DatabasePool::new_sqlite(path).await?;
    Ok(Arc::new(SqliteRepository::new(pool)))
}
