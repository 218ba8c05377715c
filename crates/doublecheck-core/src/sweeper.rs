//! Periodic expiry in the background.
//!
//! Lazy expiry already keeps reads correct; the sweeper only makes sure
//! `on_expire` fires close to the deadline even for actors that never come
//! back.

use crate::actor::Actor;
use crate::broker::ConfirmationBroker;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Shortest period a sweeper ticks at; shorter requests are raised to it.
pub const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a running sweep task.
///
/// Dropping the handle aborts the task; [`Sweeper::shutdown`] stops it
/// gracefully and waits for the current sweep to finish.
#[derive(Debug)]
pub struct Sweeper {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "sweeper task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl<A: Actor> ConfirmationBroker<A> {
    /// Sweep at the configured interval on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn_sweeper(&self) -> Sweeper {
        self.spawn_sweeper_every(self.sweep_interval())
    }

    /// Like [`spawn_sweeper`](Self::spawn_sweeper) with an explicit period.
    ///
    /// The task holds the broker weakly and exits once every broker handle
    /// is gone. A `period` below [`MIN_SWEEP_PERIOD`] (including zero) is
    /// raised to it.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn_sweeper_every(&self, period: Duration) -> Sweeper {
        let period = period.max(MIN_SWEEP_PERIOD);
        let broker = self.downgrade();
        let id = self.id();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(broker = %id, period_ms = period.as_millis() as u64, "sweeper started");

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let Some(broker) = broker.upgrade() else { break };
                        if let Err(e) = broker.sweep() {
                            warn!(broker = %id, error = %e, "sweep failed");
                        }
                    }
                }
            }
            debug!(broker = %id, "sweeper stopped");
        });

        Sweeper {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }
}
