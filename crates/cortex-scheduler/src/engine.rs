//! Poller that drives the [`ScheduledItemQueue`] on a fixed tick, the same
//! `tokio::select!`-over-interval-and-shutdown-watch shape the teacher's
//! `skynet-scheduler::engine::SchedulerEngine` uses, generalized to claim
//! items via compare-and-swap (spec.md §5) and to requeue recurring items
//! after firing rather than simply advancing a cron-style `next_run`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use cortex_core::Clock;

use crate::manager::{ScheduledItemQueue, DEFAULT_SEND_WINDOW};
use crate::types::ScheduledItem;

const TICK_INTERVAL: StdDuration = StdDuration::from_secs(1);
const EXPIRY_SWEEP_EVERY: u64 = 60;

/// Drives due-item claiming and send-window expiry. Fired items are
/// forwarded to `fired_tx` on a best-effort basis — the tick loop never
/// blocks on a slow consumer.
pub struct SchedulerEngine {
    queue: Arc<ScheduledItemQueue>,
    clock: Arc<dyn Clock>,
    fired_tx: Option<mpsc::Sender<ScheduledItem>>,
    send_window: Duration,
}

impl SchedulerEngine {
    pub fn new(queue: Arc<ScheduledItemQueue>, clock: Arc<dyn Clock>, fired_tx: Option<mpsc::Sender<ScheduledItem>>) -> Self {
        Self { queue, clock, fired_tx, send_window: DEFAULT_SEND_WINDOW }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduled-item queue poller started");

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    ticks += 1;
                    if let Err(e) = self.tick() {
                        error!("scheduler tick error: {e}");
                    }
                    if ticks % EXPIRY_SWEEP_EVERY == 0 {
                        if let Err(e) = self.queue.expire_overdue(self.clock.now(), self.send_window) {
                            error!("scheduler expiry sweep error: {e}");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduled-item queue poller shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn tick(&self) -> crate::error::Result<()> {
        let due = self.queue.due_items(self.clock.now())?;
        for item in due {
            info!(item_id = %item.id, user_id = %item.user_id, kind = %item.kind, "scheduled item fired");

            if let Err(e) = self.queue.requeue_recurring(&item) {
                error!(item_id = %item.id, "failed to requeue recurring item: {e}");
            }

            if let Some(tx) = &self.fired_tx {
                if tx.try_send(item).is_err() {
                    warn!("delivery channel full or closed — fired item dropped from notification, remains claimable via get()");
                }
            }
        }
        Ok(())
    }
}
