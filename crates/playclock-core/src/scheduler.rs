//! Deadline queue and expiry sweep

use chrono::{DateTime, Utc};
use playclock_util::{Clock, DeviceId};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{ExpireOutcome, SessionEngine};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DeadlineEntry {
    due: DateTime<Utc>,
    device_id: DeviceId,
}

/// Min-heap of pending session deadlines.
///
/// Entries are write-once. Pausing, ending, or extending a session leaves its
/// old entry queued; when that entry pops, the engine re-checks actual state
/// under the device lock and the sweep either drops it or re-arms for the
/// real deadline. Stale entries therefore cost one wasted check, never a
/// wrong expiry.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: StdMutex<BinaryHeap<Reverse<DeadlineEntry>>>,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deadline check for a device
    pub fn arm(&self, due: DateTime<Utc>, device_id: DeviceId) {
        let mut heap = self.heap.lock().unwrap();
        heap.push(Reverse(DeadlineEntry { due, device_id }));
    }

    /// Pop every entry due at or before `now`, earliest first
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, DeviceId)> {
        let mut heap = self.heap.lock().unwrap();
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = heap.peek() {
            if entry.due > now {
                break;
            }
            let Reverse(entry) = heap.pop().unwrap();
            due.push((entry.due, entry.device_id));
        }
        due
    }

    /// Earliest pending deadline, if any
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap.lock().unwrap().peek().map(|Reverse(entry)| entry.due)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().unwrap().is_empty()
    }
}

/// Background loop that expires sessions when their deadlines pass.
///
/// The loop wakes on a fixed tick, pops everything due, and routes each entry
/// through [`SessionEngine::expire`]. One long stall (suspend, debugger, GC
/// of the host VM) is caught up in a single sweep because every overdue entry
/// pops at once.
pub struct ExpiryScheduler {
    engine: Arc<SessionEngine>,
    queue: Arc<DeadlineQueue>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
}

impl ExpiryScheduler {
    pub fn new(
        engine: Arc<SessionEngine>,
        queue: Arc<DeadlineQueue>,
        clock: Arc<dyn Clock>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            engine,
            queue,
            clock,
            tick_interval,
        }
    }

    /// One sweep at `now`. Returns how many sessions expired.
    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let due = self.queue.pop_due(now);
        let mut expired = 0;

        for (due_at, device_id) in due {
            match self.engine.expire(&device_id, now).await {
                Ok(ExpireOutcome::Expired(session)) => {
                    expired += 1;
                    debug!(
                        device_id = %device_id,
                        session_id = %session.id,
                        "Sweep expired session"
                    );
                }
                Ok(ExpireOutcome::NotDue { deadline }) => {
                    // The session gained time since this entry was armed
                    debug!(
                        device_id = %device_id,
                        deadline = %deadline,
                        "Deadline moved, re-arming"
                    );
                    self.queue.arm(deadline, device_id);
                }
                Ok(ExpireOutcome::Skipped) => {
                    debug!(device_id = %device_id, "Stale deadline dropped");
                }
                Err(e) => {
                    // Keep the entry so the next tick retries
                    warn!(
                        device_id = %device_id,
                        error = %e,
                        "Expiry check failed, will retry"
                    );
                    self.queue.arm(due_at, device_id);
                }
            }
        }

        expired
    }

    /// Run the sweep loop until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            "Expiry scheduler running"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let now = self.clock.now();
                    self.sweep(now).await;
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Expiry scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}
