//! Per-client request throttling

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ClientId;

/// Token bucket per client: `budget` requests per `window`, refilled
/// continuously rather than in whole-window steps.
///
/// Buckets are created on first contact and must be dropped via
/// [`RateLimiter::remove_client`] when the connection goes away; the daemon
/// does that on every disconnect, so no background sweep is needed.
#[derive(Debug)]
pub struct RateLimiter {
    budget: u32,
    window: Duration,
    buckets: HashMap<ClientId, Bucket>,
}

#[derive(Debug)]
struct Bucket {
    /// Fractional tokens on hand, at most `budget`
    available: f64,
    refreshed: Instant,
}

impl Bucket {
    fn full(budget: f64, now: Instant) -> Self {
        Self {
            available: budget,
            refreshed: now,
        }
    }
}

impl RateLimiter {
    pub fn new(budget: u32, window: Duration) -> Self {
        Self {
            budget,
            window,
            buckets: HashMap::new(),
        }
    }

    /// Spend one token for this client. Returns `false` when the budget is
    /// exhausted; the caller answers with a rate-limited error and the
    /// request never reaches the engine.
    pub fn check(&mut self, client_id: &ClientId) -> bool {
        let now = Instant::now();
        let budget = f64::from(self.budget);
        let window = self.window;
        let bucket = self
            .buckets
            .entry(*client_id)
            .or_insert_with(|| Bucket::full(budget, now));

        let elapsed = now.duration_since(bucket.refreshed);
        let earned = elapsed.as_secs_f64() / window.as_secs_f64() * budget;
        bucket.available = (bucket.available + earned).min(budget);
        bucket.refreshed = now;

        if bucket.available >= 1.0 {
            bucket.available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Forget a client's bucket. Called on disconnect; a reconnecting client
    /// starts with a full budget.
    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.buckets.remove(client_id);
    }
}
