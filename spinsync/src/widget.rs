//! Fixed-interval polling loop for embedded widgets.
//!
//! Embeds live inside third-party pages and poll the live page-0 query on a
//! fixed interval, with the one-minute cache-bust bucket appended so
//! intermediaries can cache identical requests while the widget still
//! refreshes about once a minute. Failed polls are retried with doubling
//! backoff before the tick is given up.
//!
//! The poller is one-way: it emits [`EmbedEvent`]s and never reads anything
//! back. The resize notification is part of the embedding contract — the
//! parent frame needs the content height after every render-affecting
//! update, so one is emitted after the initial load and after each
//! successful poll.

use crate::client::SpinClient;
use crate::config::EmbedConfig;
use crate::models::{Spin, SpinQuery};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One-way notifications emitted to the embedding layer
#[derive(Debug)]
pub enum EmbedEvent {
    /// A fresh page of spins arrived
    Spins(Vec<Spin>),
    /// Content height changed; forwarded to the parent frame
    Resized { height: u32 },
    /// A poll failed after exhausting its retries; polling continues
    Failed { attempts: u32 },
}

/// Computes the rendered content height for a set of spins
pub type HeightProbe = Box<dyn Fn(&[Spin]) -> u32 + Send + Sync>;

/// Doubling backoff with a cap, reset after every successful poll
struct BackoffState {
    current: Option<Duration>,
    base: Duration,
    cap: Duration,
}

impl BackoffState {
    fn new(base: Duration, cap: Duration) -> Self {
        Self {
            current: None,
            base,
            cap,
        }
    }

    fn reset(&mut self) {
        self.current = None;
    }

    fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            Some(current) => (current * 2).min(self.cap),
            None => self.base,
        };
        self.current = Some(next);
        next
    }
}

/// Handle to the spawned embed polling task
pub struct EmbedPoller {
    shutdown: mpsc::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl EmbedPoller {
    /// Spawn the polling loop. Polls immediately, then on every interval
    /// tick; events arrive on the returned receiver. The loop stops on
    /// [`EmbedPoller::shutdown`] or once the receiver is dropped.
    pub fn spawn(
        client: SpinClient,
        query: SpinQuery,
        config: EmbedConfig,
        probe: HeightProbe,
    ) -> (Self, mpsc::UnboundedReceiver<EmbedEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let join_handle = tokio::spawn(run_loop(client, query, config, probe, events_tx, shutdown_rx));
        (
            Self {
                shutdown: shutdown_tx,
                join_handle,
            },
            events_rx,
        )
    }

    /// Stop the loop and wait for the task to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.join_handle.await;
    }
}

async fn run_loop(
    client: SpinClient,
    query: SpinQuery,
    config: EmbedConfig,
    probe: HeightProbe,
    events: mpsc::UnboundedSender<EmbedEvent>,
    mut shutdown: mpsc::Receiver<()>,
) {
    info!(station = query.station.as_str(), "embed poller started");
    let mut backoff = BackoffState::new(config.backoff_base(), config.backoff_cap());

    loop {
        if !poll_once(&client, &query, &config, &probe, &events, &mut backoff).await {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.interval()) => {}
            _ = shutdown.recv() => break,
        }
    }

    info!(station = query.station.as_str(), "embed poller stopped");
}

/// Run one poll tick with retries. Returns false when the event receiver
/// is gone and the loop should stop.
async fn poll_once(
    client: &SpinClient,
    query: &SpinQuery,
    config: &EmbedConfig,
    probe: &HeightProbe,
    events: &mpsc::UnboundedSender<EmbedEvent>,
    backoff: &mut BackoffState,
) -> bool {
    backoff.reset();

    for attempt in 1..=config.max_retries.max(1) {
        match client.fetch_spins_bucketed(query).await {
            Ok(spins) => {
                debug!(count = spins.len(), "embed poll succeeded");
                let height = probe(&spins);
                if events.send(EmbedEvent::Spins(spins)).is_err() {
                    return false;
                }
                return events.send(EmbedEvent::Resized { height }).is_ok();
            }
            Err(err) if attempt < config.max_retries.max(1) => {
                let delay = backoff.next_delay();
                warn!(attempt, ?delay, "embed poll failed, backing off: {err}");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                warn!(attempt, "embed poll gave up: {err}");
                return events
                    .send(EmbedEvent::Failed { attempts: attempt })
                    .is_ok();
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = BackoffState::new(Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
