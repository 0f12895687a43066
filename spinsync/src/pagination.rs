//! Offset pagination over the spin log with prefetch and id-based merge.
//!
//! The engine owns the accumulated, identifier-deduplicated sequence of
//! spins for one query. Merge policy is deliberately asymmetric:
//!
//! - **Live mode, page 0** (no filters): the fresh page replaces the
//!   accumulated sequence wholesale, so the live view always shows the
//!   freshest top-of-log ordering even when the backend log was written out
//!   of order.
//! - **Everything else**: new items whose identifiers are not yet present
//!   are appended after the existing ones.
//!
//! Page fetches at non-zero offsets go through the [`spincache`] request
//! cache, so a speculative prefetch and a later user-driven `load_more` for
//! the same offset coalesce into one network call.

use crate::client::SpinSource;
use crate::config::PageConfig;
use crate::error::Error;
use crate::models::{Spin, SpinQuery};
use spincache::RequestCache;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a prefetched page stays warm for the following `load_more`
const PREFETCH_TTL_SECS: u64 = 30;

/// Errors are shared between coalesced waiters, so they arrive wrapped.
pub type PageResult<T> = std::result::Result<T, Arc<Error>>;

/// Engine lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No fetch issued yet
    Idle,
    /// Initial page fetch in flight
    Loading,
    /// Data available, nothing in flight
    Ready,
    /// Further page fetch in flight
    LoadingMore,
}

/// Consumer-facing view of the engine state
#[derive(Debug, Clone)]
pub struct PaginationSnapshot {
    /// Items currently meant to be displayed
    pub spins: Vec<Spin>,
    /// Total accumulated items (may exceed `spins.len()`)
    pub accumulated: usize,
    pub has_more: bool,
    pub phase: Phase,
    /// Set when the most recent fetch failed; accumulated data is kept
    pub failed: bool,
}

struct EngineState {
    query: SpinQuery,
    spins: Vec<Spin>,
    seen: HashSet<u64>,
    has_more: bool,
    displayed: usize,
    prefetch_triggered: bool,
    generation: u64,
    phase: Phase,
    failed: bool,
}

impl EngineState {
    fn new(query: SpinQuery) -> Self {
        Self {
            query,
            spins: Vec::new(),
            seen: HashSet::new(),
            has_more: true,
            displayed: 0,
            prefetch_triggered: false,
            generation: 0,
            phase: Phase::Idle,
            failed: false,
        }
    }

    /// Append items whose ids are not yet present, preserving existing
    /// order. Idempotent: merging the same page twice is a no-op.
    fn merge_append(&mut self, page: &[Spin]) -> usize {
        let mut appended = 0;
        for spin in page {
            if self.seen.insert(spin.id) {
                self.spins.push(spin.clone());
                appended += 1;
            }
        }
        appended
    }

    /// Replace the accumulated sequence wholesale (live-mode page 0)
    fn replace(&mut self, page: Vec<Spin>) {
        self.seen = page.iter().map(|s| s.id).collect();
        self.spins = page;
        self.displayed = self.spins.len();
    }
}

/// Pagination engine for one logical spin query.
///
/// Thread-safe and cheap to clone; all clones share state. State mutations
/// happen under a `Mutex` that is never held across an `.await`: fetches
/// capture the generation counter on issue and results arriving after the
/// query changed are dropped.
#[derive(Clone)]
pub struct PaginationEngine {
    source: Arc<dyn SpinSource>,
    config: PageConfig,
    page_cache: RequestCache<Vec<Spin>, Error>,
    state: Arc<Mutex<EngineState>>,
}

impl PaginationEngine {
    pub fn new(source: Arc<dyn SpinSource>, query: SpinQuery, config: PageConfig) -> Self {
        Self {
            source,
            config,
            page_cache: RequestCache::new(),
            state: Arc::new(Mutex::new(EngineState::new(query))),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn snapshot(&self) -> PaginationSnapshot {
        let state = self.state.lock().unwrap();
        PaginationSnapshot {
            spins: state.spins[..state.displayed.min(state.spins.len())].to_vec(),
            accumulated: state.spins.len(),
            has_more: state.has_more,
            phase: state.phase,
            failed: state.failed,
        }
    }

    pub fn has_more(&self) -> bool {
        self.state.lock().unwrap().has_more
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().unwrap().phase
    }

    /// The most recent spin in the accumulated sequence (the log is
    /// newest-first), used by the refresh scheduler heuristic
    pub fn latest_spin(&self) -> Option<Spin> {
        self.state.lock().unwrap().spins.first().cloned()
    }

    pub fn query(&self) -> SpinQuery {
        self.state.lock().unwrap().query.clone()
    }

    // ========================================================================
    // Query changes
    // ========================================================================

    /// Compare the new query's fingerprint with the current one and reset
    /// only on inequality. Returns true when a reset happened.
    ///
    /// A reset bumps the generation counter, so responses of in-flight
    /// fetches issued for the previous query are dropped on arrival.
    pub fn set_query(&self, query: SpinQuery) -> bool {
        let mut state = self.state.lock().unwrap();
        if query.generation_key() == state.query.generation_key() {
            return false;
        }
        debug!(
            station = query.station.as_str(),
            "query fingerprint changed, resetting pagination"
        );
        let generation = state.generation + 1;
        *state = EngineState::new(query);
        state.generation = generation;
        true
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Fetch page 0 and merge it according to the live/filtered policy.
    ///
    /// On failure the accumulated sequence is untouched and the snapshot
    /// carries a `failed` flag next to the last-known-good data.
    pub async fn refresh(&self) -> PageResult<()> {
        let (generation, query) = {
            let mut state = self.state.lock().unwrap();
            if state.phase == Phase::Idle {
                state.phase = Phase::Loading;
            }
            (state.generation, state.query.at_offset(0))
        };

        // Page 0 goes through the cache with a zero TTL: truly concurrent
        // refreshes coalesce, but a resolved page is never served stale.
        let source = Arc::clone(&self.source);
        let fetch_query = query.clone();
        let result = self
            .page_cache
            .resolve(&query.fingerprint(), Duration::ZERO, move || async move {
                source.fetch_page(&fetch_query).await
            })
            .await;

        let mut state = self.state.lock().unwrap();
        if state.generation != generation {
            debug!("dropping stale page-0 response");
            return Ok(());
        }

        match result {
            Ok(page) => {
                let short = page.len() < query.limit;
                if query.is_live() {
                    state.replace(page);
                } else {
                    state.merge_append(&page);
                    let floor = state.spins.len().min(state.query.limit);
                    state.displayed = state.displayed.max(floor);
                }
                state.query.offset = 0;
                state.has_more = !short;
                state.phase = Phase::Ready;
                state.failed = false;
                Ok(())
            }
            Err(err) => {
                warn!("page-0 fetch failed: {err}");
                state.phase = Phase::Ready;
                state.failed = true;
                Err(err)
            }
        }
    }

    /// Advance the displayed window by one page.
    ///
    /// No-op while a fetch is in flight or when the end of the data was
    /// reached. Serves a soft page from already-accumulated items without a
    /// network call when possible. Returns true when anything changed.
    pub async fn load_more(&self) -> PageResult<bool> {
        let (generation, query) = {
            let mut state = self.state.lock().unwrap();
            if matches!(state.phase, Phase::Loading | Phase::LoadingMore) {
                return Ok(false);
            }
            // Soft page: items already accumulated past the displayed count.
            if state.displayed < state.spins.len() {
                state.displayed =
                    (state.displayed + state.query.limit).min(state.spins.len());
                return Ok(true);
            }
            if !state.has_more {
                return Ok(false);
            }
            state.phase = Phase::LoadingMore;
            let next = state.query.at_offset(state.query.offset + state.query.limit);
            (state.generation, next)
        };

        let result = self.fetch_cached_page(&query).await;

        let mut state = self.state.lock().unwrap();
        if state.generation != generation {
            debug!("dropping stale load-more response");
            return Ok(false);
        }

        match result {
            Ok(page) => {
                let short = page.len() < query.limit;
                let appended = state.merge_append(&page);
                state.query.offset = query.offset;
                state.has_more = !short;
                state.displayed = state.spins.len();
                state.phase = Phase::Ready;
                state.failed = false;
                debug!(
                    offset = query.offset,
                    appended, "load_more merged page"
                );
                Ok(appended > 0 || !short)
            }
            Err(err) => {
                warn!(offset = query.offset, "load_more fetch failed: {err}");
                state.phase = Phase::Ready;
                state.failed = true;
                Err(err)
            }
        }
    }

    /// Speculatively warm the next page once the consumer has viewed past
    /// the prefetch threshold of the accumulated sequence.
    ///
    /// Fires at most once per query generation and never alters displayed
    /// state; the warmed page sits in the request cache until the next
    /// `load_more` claims it. Returns the background task handle when a
    /// prefetch was started.
    pub fn check_prefetch(&self, viewed_index: usize) -> Option<JoinHandle<()>> {
        let query = {
            let mut state = self.state.lock().unwrap();
            if state.prefetch_triggered || !state.has_more || state.spins.is_empty() {
                return None;
            }
            let threshold =
                (self.config.prefetch_threshold * state.spins.len() as f64).floor() as usize;
            if viewed_index < threshold {
                return None;
            }
            state.prefetch_triggered = true;
            state.query.at_offset(state.query.offset + state.query.limit)
        };

        debug!(offset = query.offset, "prefetching next page");
        let engine = self.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = engine.fetch_cached_page(&query).await {
                warn!(offset = query.offset, "prefetch failed: {err}");
            }
        }))
    }

    /// Fetch a page through the request cache, coalescing concurrent or
    /// recently prefetched requests for the same fingerprint.
    async fn fetch_cached_page(&self, query: &SpinQuery) -> PageResult<Vec<Spin>> {
        let source = Arc::clone(&self.source);
        let fetch_query = query.clone();
        self.page_cache
            .resolve(
                &query.fingerprint(),
                Duration::from_secs(PREFETCH_TTL_SECS),
                move || async move { source.fetch_page(&fetch_query).await },
            )
            .await
    }
}
