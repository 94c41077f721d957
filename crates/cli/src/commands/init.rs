use std::path::Path;

use evento_core::config::EventoConfig;
use evento_core::db::DatabasePool;
use tracing::info;

/// Run the `init` command: create data directory, write default config, and set up the database.
pub async fn run(data_dir: &str) -> anyhow::Result<()> {
    let data_path = Path::new(data_dir);

    if !data_path.exists() {
        std::fs::create_dir_all(data_path)?;
        info!("Created data directory: {}", data_dir);
    }

    let db_path = data_path.join("evento.db");
    let db_path_str = db_path.to_string_lossy().to_string();

    let mut config = EventoConfig::generate_default();
    config.evento.database.path = Some(db_path_str.clone());

    let config_path = data_path.join("evento.toml");
    if config_path.exists() {
        anyhow::bail!(
            "{} already exists, refusing to overwrite it",
            config_path.display()
        );
    }
    let toml_str = toml::to_string_pretty(&config)?;
    std::fs::write(&config_path, &toml_str)?;
    info!("Wrote configuration to {}", config_path.display());

    DatabasePool::new_sqlite(&db_path_str).await?;
    info!("Database initialized at {}", db_path_str);

    println!("Evento import initialized.");
    println!("  Data directory: {}", data_dir);
    println!("  Configuration:  {}", config_path.display());
    println!("  Database:       {}", db_path_str);
    println!();
    println!("Next steps:");
    println!(
        "  1. Edit {} with the Evento API and LMS credentials",
        config_path.display()
    );
    println!("  2. List the departments, kinds and years to import under [event_import.locations]");
    println!("  3. Run `evento reload-locations` to build the location table");
    println!("  4. Run `evento import all --dry-run` to preview the first import");

    Ok(())
}
