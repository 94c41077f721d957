use evento_core::feed::{EventoClient, FeedSource, PageCursor};
use evento_core::models::import::ImportKind;

use super::load_config;

/// Run the `fetch` command: print raw feed records for inspection.
pub async fn run(
    config_path: &str,
    kind: ImportKind,
    id: Option<i64>,
    skip: u32,
    take: u32,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let client = EventoClient::new(&config.api)?;

    if let Some(id) = id {
        match client.fetch_by_id(kind, id).await? {
            Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
            None => println!("No {kind} record with id {id}"),
        }
        return Ok(());
    }

    let page = client.fetch_page(kind, &PageCursor { skip, take }).await?;
    println!("{}", serde_json::to_string_pretty(&page.records)?);
    println!(
        "{} records (skip {skip}, take {take}), more data: {}",
        page.records.len(),
        page.has_more
    );
    Ok(())
}
