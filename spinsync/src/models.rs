//! Data models for spin log API payloads and queries

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Deserialize a string or number into a u64
///
/// Spin log backends are not consistent about identifier types; some emit
/// `"12345"`, some `12345`. Accept both.
fn deserialize_string_or_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrU64 {
        String(String),
        Number(u64),
    }

    match StringOrU64::deserialize(deserializer)? {
        StringOrU64::String(s) => s.parse::<u64>().map_err(D::Error::custom),
        StringOrU64::Number(n) => Ok(n),
    }
}

/// Deserialize an optional string or number into Option<u32>
fn deserialize_optional_string_or_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrU32 {
        String(String),
        Number(u32),
    }

    let opt = Option::<StringOrU32>::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(StringOrU32::String(s)) => {
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse::<u32>().map(Some).map_err(D::Error::custom)
            }
        }
        Some(StringOrU32::Number(n)) => Ok(Some(n)),
    }
}

/// One play event in the remote spin log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spin {
    /// Unique identifier, stable across refreshes
    #[serde(deserialize_with = "deserialize_string_or_u64")]
    pub id: u64,
    pub artist: String,
    pub song: String,
    /// Absolute start time of the play
    pub start: DateTime<Utc>,
    /// Song duration in seconds, when the backend knows it
    #[serde(default, deserialize_with = "deserialize_optional_string_or_u32")]
    pub duration: Option<u32>,
    /// Artwork URL
    #[serde(default)]
    pub image: Option<String>,
    /// Record label
    #[serde(default)]
    pub label: Option<String>,
    /// Release / album name
    #[serde(default)]
    pub release: Option<String>,
    /// External-service track identifier (ISRC)
    #[serde(default)]
    pub isrc: Option<String>,
}

impl Spin {
    /// Absolute end time, when the duration is known
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        let duration = self.duration?;
        Some(self.start + ChronoDuration::seconds(i64::from(duration)))
    }

    /// True when the spin ends within `window` of `now` (or already ended).
    /// False when the duration is unknown.
    pub fn ends_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match self.ends_at() {
            Some(end) => end <= now + ChronoDuration::from_std(window).unwrap_or_default(),
            None => false,
        }
    }
}

/// Parameters of a spin page request
///
/// The fingerprint of a query is the reactive key of the whole system: a
/// changed fingerprint means a logically different request, which resets
/// pagination and invalidates in-flight responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinQuery {
    /// Station identifier
    pub station: String,
    /// Page size
    pub limit: usize,
    /// Free-text search over artist/song
    #[serde(default)]
    pub search: Option<String>,
    /// Start of the date range filter
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// End of the date range filter
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    /// Whether the date range filter is applied
    #[serde(default)]
    pub date_filter_enabled: bool,
    /// Offset cursor into the log
    #[serde(default)]
    pub offset: usize,
}

impl SpinQuery {
    /// A live query for a station: no filters, offset 0
    pub fn live(station: impl Into<String>, limit: usize) -> Self {
        Self {
            station: station.into(),
            limit,
            search: None,
            start_date: None,
            end_date: None,
            date_filter_enabled: false,
            offset: 0,
        }
    }

    /// Return the same query at a different offset
    pub fn at_offset(&self, offset: usize) -> Self {
        let mut q = self.clone();
        q.offset = offset;
        q
    }

    /// Normalized search term, `None` when blank
    pub fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    }

    /// Live mode: no search term and no active date filter. In live mode a
    /// fresh page 0 replaces the accumulated sequence wholesale.
    pub fn is_live(&self) -> bool {
        self.search_term().is_none() && !self.date_filter_enabled
    }

    /// Generation key: identifies the logical query regardless of offset.
    /// Pagination resets when this changes.
    pub fn generation_key(&self) -> String {
        let date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.station,
            self.limit,
            self.search_term().unwrap_or_default(),
            date(self.start_date),
            date(self.end_date),
            self.date_filter_enabled,
        )
    }

    /// Full fingerprint including the offset: the deduplication key for one
    /// concrete page request.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}", self.generation_key(), self.offset)
    }
}

/// Identifiers for a streaming-link lookup
///
/// At least one of `isrc`, `spotify_id` or the (artist, song) pair must be
/// present for a lookup to go out; otherwise the resolver returns an empty
/// result without touching the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkQuery {
    /// Primary external identifier
    pub isrc: Option<String>,
    /// Alternate identifier
    pub spotify_id: Option<String>,
    pub artist: Option<String>,
    pub song: Option<String>,
}

impl LinkQuery {
    /// Build a lookup from a spin record
    pub fn from_spin(spin: &Spin) -> Self {
        Self {
            isrc: spin.isrc.clone(),
            spotify_id: None,
            artist: Some(spin.artist.clone()),
            song: Some(spin.song.clone()),
        }
    }

    fn nonblank(s: &Option<String>) -> Option<&str> {
        s.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Primary identifier if present, preferring ISRC over the alternate
    pub fn primary_id(&self) -> Option<&str> {
        Self::nonblank(&self.isrc).or_else(|| Self::nonblank(&self.spotify_id))
    }

    /// The (artist, song) pair when both halves are non-blank
    pub fn artist_song(&self) -> Option<(&str, &str)> {
        Some((Self::nonblank(&self.artist)?, Self::nonblank(&self.song)?))
    }

    /// True when nothing usable is present
    pub fn is_empty(&self) -> bool {
        self.primary_id().is_none() && self.artist_song().is_none()
    }

    /// Deduplication key, preferring the most specific identifier available
    pub fn dedup_key(&self) -> String {
        if let Some(id) = self.primary_id() {
            format!("links:id:{id}")
        } else if let Some((artist, song)) = self.artist_song() {
            format!(
                "links:track:{}:{}",
                artist.to_lowercase(),
                song.to_lowercase()
            )
        } else {
            "links:empty".to_string()
        }
    }
}

/// Where a resolved set of links came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkSource {
    /// Fetched from the backend for this call
    Fresh,
    /// Served from an unexpired cache entry
    Cache,
    /// Served from an expired entry because the refresh failed
    StaleCache,
}

/// One streaming platform entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformLink {
    pub url: String,
}

/// Streaming links for one track, keyed by platform name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLinks {
    pub links: HashMap<String, PlatformLink>,
    pub source: LinkSource,
}

impl ResolvedLinks {
    /// The benign "no links found" result. Distinct from a failed request,
    /// which surfaces as an error.
    pub fn empty() -> Self {
        Self {
            links: HashMap::new(),
            source: LinkSource::Fresh,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Same links, tagged as served from cache
    pub fn from_cache(mut self) -> Self {
        self.source = LinkSource::Cache;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn spin_id_accepts_string_and_number() {
        let s: Spin = serde_json::from_value(serde_json::json!({
            "id": "123",
            "artist": "Ryo Fukui",
            "song": "Early Summer",
            "start": "2026-08-26T12:00:00Z",
            "duration": "254"
        }))
        .unwrap();
        assert_eq!(s.id, 123);
        assert_eq!(s.duration, Some(254));

        let n: Spin = serde_json::from_value(serde_json::json!({
            "id": 456,
            "artist": "Alice Coltrane",
            "song": "Turiya and Ramakrishna",
            "start": "2026-08-26T12:05:00Z",
            "duration": 497
        }))
        .unwrap();
        assert_eq!(n.id, 456);
        assert_eq!(n.duration, Some(497));
    }

    #[test]
    fn spin_without_duration_never_ends_soon() {
        let spin: Spin = serde_json::from_value(serde_json::json!({
            "id": 1,
            "artist": "A",
            "song": "B",
            "start": "2026-08-26T12:00:00Z"
        }))
        .unwrap();
        assert!(spin.ends_at().is_none());
        assert!(!spin.ends_within(Duration::from_secs(3600), Utc::now()));
    }

    #[test]
    fn ends_within_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 5).unwrap();
        let spin = Spin {
            id: 1,
            artist: "A".into(),
            song: "B".into(),
            start: Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap(),
            duration: Some(200),
            image: None,
            label: None,
            release: None,
            isrc: None,
        };
        // Ends 195 s from now: not within a 45 s window.
        assert!(!spin.ends_within(Duration::from_secs(45), now));
        // Near the end of a 206 s song (ends at 12:03:26, ~1 s out).
        let near_end = Utc.with_ymd_and_hms(2026, 8, 26, 12, 3, 25).unwrap();
        let ending = Spin {
            duration: Some(206),
            ..spin
        };
        assert!(ending.ends_within(Duration::from_secs(45), near_end));
        assert!(!ending.ends_within(Duration::from_secs(45), now));
    }

    #[test]
    fn fingerprint_tracks_every_input() {
        let base = SpinQuery::live("kexp", 15);
        let mut searched = base.clone();
        searched.search = Some("coltrane".into());

        assert_ne!(base.fingerprint(), searched.fingerprint());
        assert_ne!(base.generation_key(), searched.generation_key());

        // Offset changes the fingerprint but not the generation.
        let paged = base.at_offset(15);
        assert_ne!(base.fingerprint(), paged.fingerprint());
        assert_eq!(base.generation_key(), paged.generation_key());
    }

    #[test]
    fn blank_search_is_still_live() {
        let mut q = SpinQuery::live("kexp", 15);
        q.search = Some("   ".into());
        assert!(q.is_live());
        assert_eq!(q.generation_key(), SpinQuery::live("kexp", 15).generation_key());
    }

    #[test]
    fn date_filter_toggle_changes_mode() {
        let mut q = SpinQuery::live("kexp", 15);
        q.start_date = NaiveDate::from_ymd_opt(2026, 8, 1);
        assert!(q.is_live());
        q.date_filter_enabled = true;
        assert!(!q.is_live());
    }

    #[test]
    fn link_query_prefers_most_specific_key() {
        let full = LinkQuery {
            isrc: Some("USUM71703861".into()),
            spotify_id: Some("6rqhFgbbKwnb9MLmUQDhG6".into()),
            artist: Some("Artist".into()),
            song: Some("Song".into()),
        };
        assert_eq!(full.dedup_key(), "links:id:USUM71703861");

        let alt = LinkQuery {
            spotify_id: Some("6rqhFgbbKwnb9MLmUQDhG6".into()),
            ..LinkQuery::default()
        };
        assert_eq!(alt.dedup_key(), "links:id:6rqhFgbbKwnb9MLmUQDhG6");

        let pair = LinkQuery {
            artist: Some("Artist".into()),
            song: Some("Song".into()),
            ..LinkQuery::default()
        };
        assert_eq!(pair.dedup_key(), "links:track:artist:song");
        assert!(pair.primary_id().is_none());

        assert!(LinkQuery::default().is_empty());
        let blank = LinkQuery {
            isrc: Some("  ".into()),
            ..LinkQuery::default()
        };
        assert!(blank.is_empty());
    }
}
