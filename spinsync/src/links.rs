//! Streaming-link resolution with deduplication, TTL and rate-limit retry.
//!
//! Link lookups are UI-driven and bursty (every rendered row may ask for
//! the same track within a frame), so the resolver sits behind the
//! [`spincache`] request cache with a short TTL. Lookups without a primary
//! identifier first resolve one from the (artist, song) pair through a
//! separately keyed, equally deduplicated call.
//!
//! A rate-limited main lookup is retried exactly once after a fixed short
//! delay; a second rate limit or any other failure surfaces as an error —
//! unless a previously resolved set of links for the same track is still
//! around, in which case it is served tagged as stale.

use crate::client::SpinClient;
use crate::config::LinkConfig;
use crate::error::Error;
use crate::models::{LinkQuery, LinkSource, PlatformLink, ResolvedLinks};
use spincache::RequestCache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Result of a link resolution; errors are shared between coalesced waiters
pub type LinkResult = std::result::Result<ResolvedLinks, Arc<Error>>;

/// Deduplicating, TTL-cached resolver for streaming links
#[derive(Clone)]
pub struct LinkResolver {
    client: SpinClient,
    config: LinkConfig,
    /// Main lookups, keyed by track identifier
    links_cache: RequestCache<ResolvedLinks, Error>,
    /// Secondary (artist, song) -> identifier resolutions
    id_cache: RequestCache<Option<String>, Error>,
    /// Last successful links per key, served tagged stale when a refresh
    /// fails. Never rolled back by failures.
    last_good: Arc<Mutex<HashMap<String, HashMap<String, PlatformLink>>>>,
}

impl LinkResolver {
    pub fn new(client: SpinClient, config: LinkConfig) -> Self {
        Self {
            client,
            config,
            links_cache: RequestCache::new(),
            id_cache: RequestCache::new(),
            last_good: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve streaming links for `query`.
    ///
    /// - Nothing usable in the query: empty result, no network call.
    /// - No primary identifier but an (artist, song) pair: a one-shot
    ///   secondary resolution obtains the identifier first.
    /// - `Ok` with an empty map means "no links found" (benign); `Err`
    ///   means the request failed.
    pub async fn fetch_links(&self, query: &LinkQuery) -> LinkResult {
        if query.is_empty() {
            debug!("link query carries no identifiers, skipping lookup");
            return Ok(ResolvedLinks::empty());
        }

        let id = match query.primary_id() {
            Some(id) => id.to_string(),
            None => match self.resolve_id(query).await? {
                Some(id) => id,
                None => {
                    debug!("track identifier unresolvable, returning empty links");
                    return Ok(ResolvedLinks::empty());
                }
            },
        };

        let key = format!("links:id:{id}");

        // Unexpired cached value: serve it without touching the cache's
        // lookup path, tagged as coming from cache.
        if let Some(links) = self.links_cache.peek(&key) {
            return Ok(links.from_cache());
        }

        let client = self.client.clone();
        let retry_delay = self.config.rate_limit_retry_delay();
        let lookup_id = id.clone();
        let result = self
            .links_cache
            .resolve(&key, self.config.ttl(), move || async move {
                lookup_with_retry(&client, &lookup_id, retry_delay).await
            })
            .await;

        match result {
            Ok(links) => {
                remember_last_good(
                    &mut self.last_good.lock().unwrap(),
                    key,
                    links.links.clone(),
                );
                Ok(links)
            }
            Err(err) => {
                if let Some(links) = self.last_good.lock().unwrap().get(&key).cloned() {
                    warn!("link lookup failed, serving stale links: {err}");
                    return Ok(ResolvedLinks {
                        links,
                        source: LinkSource::StaleCache,
                    });
                }
                Err(err)
            }
        }
    }

    /// Deduplicated secondary resolution of the primary identifier from the
    /// (artist, song) pair.
    async fn resolve_id(&self, query: &LinkQuery) -> std::result::Result<Option<String>, Arc<Error>> {
        let (artist, song) = match query.artist_song() {
            Some(pair) => pair,
            None => return Ok(None),
        };
        let key = query.dedup_key();
        let client = self.client.clone();
        let artist = artist.to_string();
        let song = song.to_string();
        self.id_cache
            .resolve(&key, self.config.ttl(), move || async move {
                client.resolve_track_id(&artist, &song).await
            })
            .await
    }
}

/// Tracks kept for the stale fallback. The map outlives the TTL cache on
/// purpose, so it needs its own bound.
const LAST_GOOD_CAP: usize = 256;

/// Record a successful lookup for the stale fallback, evicting an
/// arbitrary older entry once the cap is reached.
fn remember_last_good(
    map: &mut HashMap<String, HashMap<String, PlatformLink>>,
    key: String,
    links: HashMap<String, PlatformLink>,
) {
    if map.len() >= LAST_GOOD_CAP && !map.contains_key(&key) {
        if let Some(evict) = map.keys().next().cloned() {
            map.remove(&evict);
        }
    }
    map.insert(key, links);
}

/// One main lookup with the fixed-delay single retry after a rate limit.
///
/// The unresolvable condition (HTTP 422) is benign and maps to an empty
/// result on either attempt.
async fn lookup_with_retry(
    client: &SpinClient,
    id: &str,
    retry_delay: std::time::Duration,
) -> crate::error::Result<ResolvedLinks> {
    let first = client.lookup_links(id).await;
    let links = match first {
        Err(err) if err.is_rate_limit() => {
            debug!(id, "rate limited, retrying once after {:?}", retry_delay);
            tokio::time::sleep(retry_delay).await;
            match client.lookup_links(id).await {
                Ok(links) => links,
                Err(err) if err.is_no_data() => HashMap::new(),
                Err(err) => return Err(err),
            }
        }
        Err(err) if err.is_no_data() => HashMap::new(),
        Err(err) => return Err(err),
        Ok(links) => links,
    };
    Ok(ResolvedLinks {
        links,
        source: LinkSource::Fresh,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_link(url: &str) -> HashMap<String, PlatformLink> {
        let mut links = HashMap::new();
        links.insert("spotify".to_string(), PlatformLink { url: url.into() });
        links
    }

    #[test]
    fn last_good_stays_bounded() {
        let mut map = HashMap::new();
        for i in 0..LAST_GOOD_CAP {
            remember_last_good(&mut map, format!("links:id:{i}"), one_link("u"));
        }
        assert_eq!(map.len(), LAST_GOOD_CAP);

        remember_last_good(&mut map, "links:id:newest".to_string(), one_link("u"));
        assert_eq!(map.len(), LAST_GOOD_CAP);
        assert!(map.contains_key("links:id:newest"));
    }

    #[test]
    fn updating_an_existing_key_evicts_nothing() {
        let mut map = HashMap::new();
        for i in 0..LAST_GOOD_CAP {
            remember_last_good(&mut map, format!("links:id:{i}"), one_link("old"));
        }
        remember_last_good(&mut map, "links:id:0".to_string(), one_link("new"));
        assert_eq!(map.len(), LAST_GOOD_CAP);
        assert_eq!(map["links:id:0"]["spotify"].url, "new");
    }
}
