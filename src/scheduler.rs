//! Fixed-interval tick scheduling
//!
//! The timer fires every `interval`. Each firing tries to take the
//! tracking loop's lock without waiting; if the previous tick still holds
//! it (a slow provider, a long catch-up range) the firing is skipped.
//! At most one tick is in flight, so the cursor and the store only ever
//! see a single writer.

use crate::notifier::Notifier;
use crate::rpc::ChainClient;
use crate::store::DepositStore;
use crate::tracker::TrackingLoop;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

/// Drives a [`TrackingLoop`] on a fixed interval with a single-flight guard.
pub struct Scheduler<C, S, N> {
    tracker: Arc<Mutex<TrackingLoop<C, S, N>>>,
    interval: Duration,
}

impl<C, S, N> Scheduler<C, S, N>
where
    C: ChainClient + 'static,
    S: DepositStore + 'static,
    N: Notifier + 'static,
{
    pub fn new(tracker: TrackingLoop<C, S, N>, interval: Duration) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            interval,
        }
    }

    /// Shared handle to the tracking loop.
    pub fn tracker(&self) -> Arc<Mutex<TrackingLoop<C, S, N>>> {
        Arc::clone(&self.tracker)
    }

    /// Start a tick in the background unless one is already running.
    ///
    /// Returns `None` when the firing was skipped.
    pub fn try_start_tick(&self) -> Option<JoinHandle<()>> {
        let mut guard = match Arc::clone(&self.tracker).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Previous tick still in flight, skipping this one");
                return None;
            }
        };

        Some(tokio::spawn(async move {
            match guard.tick().await {
                Ok(report) if report.blocks_processed > 0 => info!(
                    "Processed blocks {}..={}: {} new, {} already stored, {} failed",
                    report.cursor_before + 1,
                    report.cursor_after,
                    report.inserted,
                    report.already_present,
                    report.failed
                ),
                Ok(_) => {}
                Err(e) => error!("Error tracking deposits: {}", e),
            }
        }))
    }

    /// Fire ticks forever.
    pub async fn run(&self) {
        info!("Starting deposit tracking every {:?}", self.interval);
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            self.try_start_tick();
        }
    }
}
