//! Adaptive refresh scheduling for the live spin view.
//!
//! A single background task re-arms itself after every firing instead of
//! running on a fixed period: each pass computes the next delay from the
//! newest spin (short when the current song is about to end, long
//! otherwise), sleeps, enforces a minimum spacing since the last actual
//! refresh to absorb bursts of re-arms, fires the refresh, and arms again.
//!
//! Scheduling is suspended entirely while filters are active or auto-update
//! is off; commands keep being handled so the loop can resume. The loop
//! cannot see a filter change on its own, so whoever changes the query must
//! call [`RefreshScheduler::query_changed`]: toggling filters on cancels
//! the pending timer, clearing them re-arms it. Shutting the handle down
//! (or dropping it) cancels the pending timer, so no callback ever runs
//! after disposal.

use crate::config::PollingConfig;
use crate::models::Spin;
use crate::pagination::PaginationEngine;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Compute the delay before the next automatic refresh.
///
/// Short interval when the newest spin ends within the ending-soon window
/// (a track change is imminent, so the log is about to grow), long base
/// interval otherwise. A spin with unknown duration never counts as ending
/// soon.
pub fn compute_next_interval(
    latest: Option<&Spin>,
    now: DateTime<Utc>,
    config: &PollingConfig,
) -> Duration {
    match latest {
        Some(spin) if spin.ends_within(config.ending_soon_window(), now) => {
            config.short_interval()
        }
        _ => config.long_interval(),
    }
}

/// What the scheduler drives. Implemented by [`PaginationEngine`]; tests
/// supply their own recording targets.
#[async_trait]
pub trait RefreshTarget: Send + Sync + 'static {
    /// Run one refresh. Returns false on failure; the scheduler then
    /// re-arms at the long base interval.
    async fn refresh(&self) -> bool;

    /// The newest spin, feeding the adaptive interval heuristic
    fn latest_spin(&self) -> Option<Spin>;

    /// True while automatic refreshing makes no sense (filters active)
    fn suspended(&self) -> bool;
}

#[async_trait]
impl RefreshTarget for PaginationEngine {
    async fn refresh(&self) -> bool {
        PaginationEngine::refresh(self).await.is_ok()
    }

    fn latest_spin(&self) -> Option<Spin> {
        PaginationEngine::latest_spin(self)
    }

    fn suspended(&self) -> bool {
        !self.query().is_live()
    }
}

#[derive(Debug)]
enum SchedulerCommand {
    ManualRefresh,
    SetAutoUpdate(bool),
    QueryChanged,
    Shutdown,
}

/// Handle to the spawned scheduler task.
///
/// Dropping the handle closes the command channel, which stops the loop and
/// cancels any pending timer.
pub struct RefreshScheduler {
    commands: mpsc::Sender<SchedulerCommand>,
    join_handle: JoinHandle<()>,
}

impl RefreshScheduler {
    /// Spawn the scheduling loop for `target`, with auto-update enabled.
    pub fn spawn<T: RefreshTarget>(target: T, config: PollingConfig) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let join_handle = tokio::spawn(run_loop(target, config, rx));
        Self {
            commands: tx,
            join_handle,
        }
    }

    /// Refresh now, bypassing the minimum-spacing guard, and restart the
    /// adaptive loop if auto-update is still enabled.
    pub async fn manual_refresh(&self) {
        let _ = self.commands.send(SchedulerCommand::ManualRefresh).await;
    }

    /// Tell the loop the target's query changed. Call this after
    /// [`PaginationEngine::set_query`]: the pending timer is dropped and
    /// scheduling re-evaluates the target's suspension state, so toggling
    /// filters on cancels the timer and clearing them resumes it.
    pub async fn query_changed(&self) {
        let _ = self.commands.send(SchedulerCommand::QueryChanged).await;
    }

    /// Enable or disable automatic refreshing. Disabling cancels the
    /// pending timer; manual refreshes keep working.
    pub async fn set_auto_update(&self, enabled: bool) {
        let _ = self
            .commands
            .send(SchedulerCommand::SetAutoUpdate(enabled))
            .await;
    }

    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SchedulerCommand::Shutdown).await;
        let _ = self.join_handle.await;
    }
}

async fn run_loop<T: RefreshTarget>(
    target: T,
    config: PollingConfig,
    mut rx: mpsc::Receiver<SchedulerCommand>,
) {
    let mut auto_update = true;
    let mut last_refresh: Option<Instant> = None;
    let mut last_failed = false;

    info!("refresh scheduler started");

    loop {
        let armed = auto_update && !target.suspended();

        if armed {
            // Re-computed on every pass; dropping the previous sleep at the
            // top of the loop is what cancels a superseded timer.
            let interval = if last_failed {
                config.long_interval()
            } else {
                compute_next_interval(target.latest_spin().as_ref(), Utc::now(), &config)
            };
            debug!(?interval, "arming refresh timer");
            let sleep = tokio::time::sleep(interval);
            tokio::pin!(sleep);

            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if handle_command(cmd, &target, &mut auto_update,
                                &mut last_refresh, &mut last_failed).await
                            {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = &mut sleep => {
                    // The target may have become suspended since the timer
                    // was armed; a stale timer must not refresh through an
                    // active filter.
                    if target.suspended() {
                        debug!("refresh timer fired while suspended, skipping");
                        continue;
                    }
                    let due = last_refresh
                        .map_or(true, |t| t.elapsed() >= config.min_spacing());
                    if due {
                        fire(&target, &mut last_refresh, &mut last_failed).await;
                    } else {
                        debug!("refresh timer fired within minimum spacing, skipping");
                    }
                }
            }
        } else {
            // Nothing armed: wait for a command that may resume the loop.
            match rx.recv().await {
                Some(cmd) => {
                    if handle_command(cmd, &target, &mut auto_update,
                        &mut last_refresh, &mut last_failed).await
                    {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    info!("refresh scheduler stopped");
}

/// Returns true when the loop should terminate.
async fn handle_command<T: RefreshTarget>(
    cmd: SchedulerCommand,
    target: &T,
    auto_update: &mut bool,
    last_refresh: &mut Option<Instant>,
    last_failed: &mut bool,
) -> bool {
    debug!(?cmd, "scheduler command");
    match cmd {
        SchedulerCommand::ManualRefresh => {
            fire(target, last_refresh, last_failed).await;
            false
        }
        SchedulerCommand::SetAutoUpdate(enabled) => {
            *auto_update = enabled;
            false
        }
        // Nothing to do here: the command's arrival dropped the pending
        // sleep, and the loop re-reads `target.suspended()` before re-arming.
        SchedulerCommand::QueryChanged => false,
        SchedulerCommand::Shutdown => true,
    }
}

async fn fire<T: RefreshTarget>(
    target: &T,
    last_refresh: &mut Option<Instant>,
    last_failed: &mut bool,
) {
    let ok = target.refresh().await;
    *last_refresh = Some(Instant::now());
    *last_failed = !ok;
    if !ok {
        warn!("refresh failed, falling back to the long interval");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn spin_started_ago(secs_ago: i64, duration: Option<u32>) -> Spin {
        Spin {
            id: 1,
            artist: "a".into(),
            song: "s".into(),
            start: Utc::now() - ChronoDuration::seconds(secs_ago),
            duration,
            image: None,
            label: None,
            release: None,
            isrc: None,
        }
    }

    #[test]
    fn long_interval_when_song_keeps_playing() {
        let config = PollingConfig::default();
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 5).unwrap();
        let spin = Spin {
            start: Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap(),
            ..spin_started_ago(0, Some(200))
        };
        // Ends 195 s out: not ending soon.
        assert_eq!(
            compute_next_interval(Some(&spin), now, &config),
            config.long_interval()
        );
    }

    #[test]
    fn short_interval_when_song_ends_soon() {
        let config = PollingConfig::default();
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 12, 3, 25).unwrap();
        let spin = Spin {
            start: Utc.with_ymd_and_hms(2026, 8, 26, 12, 0, 0).unwrap(),
            ..spin_started_ago(0, Some(206))
        };
        // Ends about a second from now.
        assert_eq!(
            compute_next_interval(Some(&spin), now, &config),
            config.short_interval()
        );
    }

    #[test]
    fn unknown_duration_or_empty_log_uses_long_interval() {
        let config = PollingConfig::default();
        let now = Utc::now();
        assert_eq!(
            compute_next_interval(None, now, &config),
            config.long_interval()
        );
        let spin = spin_started_ago(500, None);
        assert_eq!(
            compute_next_interval(Some(&spin), now, &config),
            config.long_interval()
        );
    }

    struct RecordingTarget {
        refreshes: Arc<AtomicUsize>,
        suspended: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RefreshTarget for RecordingTarget {
        async fn refresh(&self) -> bool {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            true
        }

        fn latest_spin(&self) -> Option<Spin> {
            None
        }

        fn suspended(&self) -> bool {
            self.suspended.load(Ordering::SeqCst)
        }
    }

    fn recording_target() -> (RecordingTarget, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let suspended = Arc::new(AtomicBool::new(false));
        (
            RecordingTarget {
                refreshes: Arc::clone(&refreshes),
                suspended: Arc::clone(&suspended),
            },
            refreshes,
            suspended,
        )
    }

    fn fast_config() -> PollingConfig {
        PollingConfig {
            interval_short_seconds: 10,
            interval_long_seconds: 30,
            min_spacing_seconds: 8,
            ending_soon_window_seconds: 45,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_and_rearms() {
        let (target, refreshes, _) = recording_target();
        let scheduler = RefreshScheduler::spawn(target, fast_config());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_guard_absorbs_rapid_firings() {
        let (target, refreshes, _) = recording_target();
        // Timer period shorter than the spacing guard.
        let config = PollingConfig {
            interval_long_seconds: 5,
            min_spacing_seconds: 8,
            ..fast_config()
        };
        let scheduler = RefreshScheduler::spawn(target, config);

        // t=5: first firing, no prior refresh, allowed.
        // t=10: 5 s since last refresh, skipped.
        // t=15: 10 s since last refresh, allowed.
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn manual_refresh_fires_immediately_and_restarts_loop() {
        let (target, refreshes, _) = recording_target();
        let scheduler = RefreshScheduler::spawn(target, fast_config());

        scheduler.manual_refresh().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        // The loop re-armed from the manual refresh, not from t=0.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_auto_update_cancels_the_timer() {
        let (target, refreshes, _) = recording_target();
        let scheduler = RefreshScheduler::spawn(target, fast_config());

        scheduler.set_auto_update(false).await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);

        // Manual refresh still works while auto-update is off.
        scheduler.manual_refresh().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        scheduler.set_auto_update(true).await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 2);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn filter_toggle_cancels_timer_and_clearing_resumes() {
        let (target, refreshes, suspended) = recording_target();
        let scheduler = RefreshScheduler::spawn(target, fast_config());

        // Filters come on after the timer was armed: the notification
        // drops the pending timer before it can fire.
        tokio::time::sleep(Duration::from_secs(1)).await;
        suspended.store(true, Ordering::SeqCst);
        scheduler.query_changed().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);

        // Clearing the filters resumes automatic refreshing without any
        // other command.
        suspended.store(false, Ordering::SeqCst);
        scheduler.query_changed().await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_fire_through_active_filters() {
        let (target, refreshes, suspended) = recording_target();
        let scheduler = RefreshScheduler::spawn(target, fast_config());

        // Filters come on with no notification at all: the re-check at
        // firing time still refuses to refresh.
        tokio::time::sleep(Duration::from_secs(1)).await;
        suspended.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn suspension_stops_automatic_firing() {
        let (target, refreshes, suspended) = recording_target();
        suspended.store(true, Ordering::SeqCst);
        let scheduler = RefreshScheduler::spawn(target, fast_config());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);

        scheduler.shutdown().await;
    }
}
