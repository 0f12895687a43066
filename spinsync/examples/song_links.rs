//! Example: Resolve streaming platform links for recent spins
//!
//! Run with: cargo run -p spinsync --example song_links
//! Or with a specific station: cargo run -p spinsync --example song_links -- kexp

use spinsync::{ClientBuilder, LinkQuery, LinkResolver, SpinQuery, SpinSyncConfig};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let station = env::args().nth(1).unwrap_or_else(|| "wxyc".to_string());

    let config = SpinSyncConfig::default();
    let client = ClientBuilder::new().build().await?;

    println!("Fetching recent spins for {}...\n", station);
    let spins = client
        .fetch_spins(&SpinQuery::live(&station, 5))
        .await?;

    let resolver = LinkResolver::new(client, config.links.clone());

    for spin in &spins {
        println!("{} - {}", spin.artist, spin.song);

        match resolver.fetch_links(&LinkQuery::from_spin(spin)).await {
            Ok(resolved) if resolved.links.is_empty() => {
                println!("  (no platform links)");
            }
            Ok(resolved) => {
                for (platform, link) in &resolved.links {
                    println!("  {}: {}", platform, link.url);
                }
                println!("  [{:?}]", resolved.source);
            }
            Err(err) => {
                println!("  lookup failed: {}", err);
            }
        }
        println!();
    }

    Ok(())
}
