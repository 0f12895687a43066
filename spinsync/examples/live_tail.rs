//! Example: Tail the live spin log for a station
//!
//! Run with: cargo run -p spinsync --example live_tail
//! Or with a specific station: cargo run -p spinsync --example live_tail -- kexp

use spinsync::{ClientBuilder, PaginationEngine, RefreshScheduler, SpinQuery, SpinSyncConfig};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Get station from command line or use default
    let station = env::args().nth(1).unwrap_or_else(|| "wxyc".to_string());

    let config = SpinSyncConfig::default();
    let client = ClientBuilder::new().build().await?;

    let engine = PaginationEngine::new(
        Arc::new(client),
        SpinQuery::live(&station, config.page.limit),
        config.page.clone(),
    );

    println!("Loading recent spins for {}...\n", station);
    engine.refresh().await?;

    for spin in engine.snapshot().spins {
        let when = spin.start.format("%H:%M");
        println!("{}  {} - {}", when, spin.artist, spin.song);
    }

    // Keep the log fresh in the background. The scheduler tightens the
    // interval when the current song is about to end.
    let scheduler = RefreshScheduler::spawn(engine.clone(), config.polling.clone());

    println!("\nWatching for new spins (Ctrl-C to stop)...");
    let mut newest = engine.snapshot().spins.first().map(|s| s.id);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {
                let snapshot = engine.snapshot();
                for spin in snapshot.spins.iter().take_while(|s| Some(s.id) != newest) {
                    println!("{}  {} - {}", spin.start.format("%H:%M"), spin.artist, spin.song);
                }
                if let Some(first) = snapshot.spins.first() {
                    newest = Some(first.id);
                }
            }
        }
    }

    scheduler.shutdown().await;
    Ok(())
}
