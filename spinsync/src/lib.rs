//! Client library for live radio spin logs
//!
//! This crate provides a Rust client for backends exposing a continuously
//! growing, reverse-chronological log of played songs ("spins"), plus the
//! machinery a live display needs on top of the raw API.
//!
//! # Features
//!
//! - **Paginated Loading**: Offset pagination with in-order append, id
//!   deduplication, and wholesale replacement of the live first page
//! - **Adaptive Refresh**: Polling that tightens to a short interval when
//!   the current song is about to end, with a minimum spacing guard
//! - **Request Coalescing**: Identical concurrent requests share one
//!   network call (via the `spincache` crate)
//! - **Link Resolution**: Per-song streaming platform links with TTL
//!   caching, rate-limit retry, and stale-cache fallback
//! - **Embed Polling**: Fixed-interval widget polling with cache-bust
//!   bucketing and resize notifications
//!
//! # Example
//!
//! ```no_run
//! use spinsync::{ClientBuilder, PaginationEngine, SpinQuery, SpinSyncConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClientBuilder::new().build().await?;
//!     let config = SpinSyncConfig::default();
//!
//!     let engine = PaginationEngine::new(
//!         Arc::new(client),
//!         SpinQuery::live("wxyc", config.page.limit),
//!         config.page.clone(),
//!     );
//!     engine.refresh().await?;
//!
//!     for spin in engine.snapshot().spins {
//!         println!("{} - {}", spin.artist, spin.song);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod links;
pub mod models;
pub mod pagination;
pub mod scheduler;
pub mod widget;

pub use client::{ClientBuilder, SpinClient, SpinSource};
pub use config::{EmbedConfig, LinkConfig, PageConfig, PollingConfig, SpinSyncConfig};
pub use error::{Error, Result};
pub use links::{LinkResolver, LinkResult};
pub use models::{LinkQuery, LinkSource, PlatformLink, ResolvedLinks, Spin, SpinQuery};
pub use pagination::{PageResult, PaginationEngine, PaginationSnapshot, Phase};
pub use scheduler::{compute_next_interval, RefreshScheduler, RefreshTarget};
pub use widget::{EmbedEvent, EmbedPoller, HeightProbe};
