use std::sync::Arc;

use evento_core::db::repository::LocationRepository;
use evento_core::models::location::Location;
use evento_import::target::TargetClient;
use evento_import::LocationResolver;
use tracing::info;

use super::{load_config, open_repository};

/// Run the `reload-locations` command: rebuild the table from the category tree.
pub async fn reload(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repository(&config).await?;
    let target = Arc::new(TargetClient::new(&config.target));

    let resolver = LocationResolver::new(
        repo,
        target,
        config.event_import.locations.clone(),
        config.target.root_ref_id,
    );
    let locations = resolver.rebuild().await?;
    info!(count = locations.len(), "Location table rebuilt");
    print_locations(&locations);
    Ok(())
}

/// Run the `locations` command.
pub async fn list(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let repo = open_repository(&config).await?;
    print_locations(&repo.list_locations().await?);
    Ok(())
}

fn print_locations(locations: &[Location]) {
    if locations.is_empty() {
        println!("No locations. Run `evento reload-locations` first.");
        return;
    }
    println!("{:<24} {:<16} {:<8} {:>8}", "Department", "Kind", "Year", "Ref");
    for loc in locations {
        println!(
            "{:<24} {:<16} {:<8} {:>8}",
            loc.department, loc.kind, loc.year, loc.ref_id
        );
    }
    println!();
    println!("{} locations", locations.len());
}
