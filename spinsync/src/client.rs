//! HTTP client for the spin log backend
//!
//! The client is stateless: it fetches pages of spins and resolves
//! streaming links, but never caches responses itself. Deduplication and
//! TTL caching live in higher layers (`pagination`, `links`).

use crate::error::{Error, Result};
use crate::models::{PlatformLink, Spin, SpinQuery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default spin log API base URL
pub const DEFAULT_API_BASE: &str = "https://api.spinsync.example/v1";

/// Default timeout for HTTP requests
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = "spinsync/0.1.0";

/// Automatic retries for transient failures, per page fetch
pub const MAX_FETCH_RETRIES: u32 = 2;

/// Delay between transient-failure retries
const TRANSIENT_RETRY_DELAY_MS: u64 = 500;

/// Width of the cache-bust bucket appended by embedded widgets
const CACHE_BUST_BUCKET_SECS: i64 = 60;

/// One-minute bucket value appended to embed requests.
///
/// Intermediary caches may serve identical requests within the same bucket;
/// the value rolls over roughly once per minute so the widget still
/// refreshes.
pub fn cache_bust_bucket(now: DateTime<Utc>) -> i64 {
    now.timestamp() / CACHE_BUST_BUCKET_SECS
}

/// A remote source of spin pages.
///
/// This is the seam between the engine and the backend: `SpinClient`
/// implements it over HTTP, tests implement it in memory.
#[async_trait]
pub trait SpinSource: Send + Sync {
    /// Fetch one page of spins. Fewer than `query.limit` items signals the
    /// end of the data.
    async fn fetch_page(&self, query: &SpinQuery) -> Result<Vec<Spin>>;
}

/// Spin log HTTP client
///
/// # Example
///
/// ```no_run
/// use spinsync::{SpinClient, SpinQuery};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = SpinClient::new().await?;
///     let spins = client.fetch_spins(&SpinQuery::live("kexp", 15)).await?;
///     for spin in spins {
///         println!("{} - {}", spin.artist, spin.song);
///     }
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SpinClient {
    client: Client,
    api_base: String,
    request_timeout: Duration,
}

impl SpinClient {
    /// Create a new client with default settings
    pub async fn new() -> Result<Self> {
        Self::builder().build().await
    }

    /// Create a builder for configuring the client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Create a client with a custom reqwest::Client
    ///
    /// Useful for sharing HTTP connection pools
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Get the API base URL
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Get the internal HTTP client
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    // ========================================================================
    // Spin pages
    // ========================================================================

    /// Fetch one page of spins for `query`.
    ///
    /// Transient failures (network errors, timeouts, rate limiting) are
    /// retried up to [`MAX_FETCH_RETRIES`] times before being surfaced.
    pub async fn fetch_spins(&self, query: &SpinQuery) -> Result<Vec<Spin>> {
        self.fetch_spins_inner(query, None).await
    }

    /// Fetch one page of spins with the embed cache-bust bucket appended.
    ///
    /// Identical requests within the same one-minute bucket are cacheable by
    /// intermediaries; see [`cache_bust_bucket`].
    pub async fn fetch_spins_bucketed(&self, query: &SpinQuery) -> Result<Vec<Spin>> {
        self.fetch_spins_inner(query, Some(cache_bust_bucket(Utc::now())))
            .await
    }

    async fn fetch_spins_inner(
        &self,
        query: &SpinQuery,
        bucket: Option<i64>,
    ) -> Result<Vec<Spin>> {
        let url = self.spins_url(query, bucket)?;
        let mut attempt = 0;
        loop {
            match self.fetch_spins_once(url.clone()).await {
                Ok(spins) => return Ok(spins),
                Err(err) if err.is_transient() && attempt < MAX_FETCH_RETRIES => {
                    attempt += 1;
                    warn!(
                        station = query.station.as_str(),
                        offset = query.offset,
                        attempt,
                        "transient spin fetch failure, retrying: {err}"
                    );
                    tokio::time::sleep(Duration::from_millis(TRANSIENT_RETRY_DELAY_MS)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_spins_once(&self, url: Url) -> Result<Vec<Spin>> {
        debug!("Fetching spins: {}", url);
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let body = response.text().await?;
        let spins: Vec<Spin> = serde_json::from_str(&body)
            .map_err(|e| Error::InvalidResponse(format!("spin page: {e}")))?;
        debug!("Received {} spins", spins.len());
        Ok(spins)
    }

    fn spins_url(&self, query: &SpinQuery, bucket: Option<i64>) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/spins", self.api_base))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("station", &query.station)
                .append_pair("count", &query.limit.to_string())
                .append_pair("offset", &query.offset.to_string());
            if let Some(search) = query.search_term() {
                pairs.append_pair("search", &search);
            }
            if query.date_filter_enabled {
                if let Some(start) = query.start_date {
                    pairs.append_pair("start", &start.to_string());
                }
                if let Some(end) = query.end_date {
                    pairs.append_pair("end", &end.to_string());
                }
            }
            if let Some(bucket) = bucket {
                pairs.append_pair("bucket", &bucket.to_string());
            }
        }
        Ok(url)
    }

    // ========================================================================
    // Streaming links
    // ========================================================================

    /// Look up streaming links by track identifier.
    ///
    /// A 422 from the backend means the identifier is unresolvable and
    /// surfaces as [`Error::NoData`]; the resolver maps it to an empty
    /// result. No automatic retry here: the rate-limit retry policy for
    /// link lookups belongs to [`crate::links::LinkResolver`].
    pub async fn lookup_links(&self, id: &str) -> Result<HashMap<String, PlatformLink>> {
        let url = Url::parse(&format!("{}/links/{}", self.api_base, id))?;
        debug!("Looking up links: {}", url);
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let body = response.text().await?;
        let links: HashMap<String, PlatformLink> = serde_json::from_str(&body)
            .map_err(|e| Error::InvalidResponse(format!("link map: {e}")))?;
        Ok(links)
    }

    /// Resolve the primary track identifier from an (artist, song) pair.
    ///
    /// Returns `Ok(None)` when the backend cannot resolve the pair.
    pub async fn resolve_track_id(&self, artist: &str, song: &str) -> Result<Option<String>> {
        let mut url = Url::parse(&format!("{}/tracks/search", self.api_base))?;
        url.query_pairs_mut()
            .append_pair("artist", artist)
            .append_pair("song", song);

        debug!("Resolving track id: {}", url);
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = match Self::check_status(response).await {
            Ok(r) => r,
            Err(err) if err.is_no_data() => return Ok(None),
            Err(err) => return Err(err),
        };

        #[derive(Deserialize)]
        struct TrackSearchResponse {
            isrc: Option<String>,
        }

        let body = response.text().await?;
        let parsed: TrackSearchResponse = serde_json::from_str(&body)
            .map_err(|e| Error::InvalidResponse(format!("track search: {e}")))?;
        Ok(parsed.isrc.filter(|s| !s.is_empty()))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::from_status_code(status.as_u16(), message))
    }
}

#[async_trait]
impl SpinSource for SpinClient {
    async fn fetch_page(&self, query: &SpinQuery) -> Result<Vec<Spin>> {
        self.fetch_spins(query).await
    }
}

/// Builder for configuring a SpinClient
#[derive(Debug)]
pub struct ClientBuilder {
    client: Option<Client>,
    api_base: String,
    request_timeout: Duration,
    user_agent: String,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            client: None,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom HTTP client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the API base URL
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.api_base = url.into();
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set a custom User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build the client
    pub async fn build(self) -> Result<SpinClient> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.request_timeout)
                .build()?,
        };

        Ok(SpinClient {
            client,
            api_base: self.api_base,
            request_timeout: self.request_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::default();
        assert_eq!(builder.api_base, DEFAULT_API_BASE);
        assert_eq!(
            builder.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
    }

    #[test]
    fn bucket_rolls_over_every_minute() {
        let t0 = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 1).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 59).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 8, 26, 12, 1, 0).unwrap();
        assert_eq!(cache_bust_bucket(t0), cache_bust_bucket(t1));
        assert_ne!(cache_bust_bucket(t1), cache_bust_bucket(t2));
    }

    #[test]
    fn spins_url_carries_filters_only_when_enabled() {
        let client = SpinClient::with_client(Client::new());
        let mut query = SpinQuery::live("kexp", 15);
        query.search = Some("  Coltrane ".into());
        query.start_date = chrono::NaiveDate::from_ymd_opt(2026, 8, 1);

        let url = client.spins_url(&query, None).unwrap();
        let params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(params.contains(&("search".into(), "coltrane".into())));
        // Date filter disabled: no date params on the wire.
        assert!(!params.iter().any(|(k, _)| k == "start"));

        query.date_filter_enabled = true;
        let url = client.spins_url(&query, Some(42)).unwrap();
        let params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(params.contains(&("start".into(), "2026-08-01".into())));
        assert!(params.contains(&("bucket".into(), "42".into())));
    }
}
