//! Request pacing toward the remote service.
//!
//! All outbound requests share one global rate limit: a fixed minimum gap
//! between consecutive requests, with no burst allowance and no adaptive
//! backoff. The limiter is a trait so tests can swap in [`Unthrottled`]
//! instead of sleeping in real time.

use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::trace;

/// Hands out request slots.
pub trait RateLimiter {
    /// Wait until the next request may be sent.
    async fn wait_for_slot(&mut self);
}

/// Enforces at least `interval` between two consecutive slots.
///
/// The first slot is granted immediately.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    last_slot: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_slot: None,
        }
    }
}

impl RateLimiter for Throttle {
    async fn wait_for_slot(&mut self) {
        if let Some(last) = self.last_slot {
            let ready_at = last + self.interval;
            if ready_at > Instant::now() {
                trace!(delay = ?(ready_at - Instant::now()), "Waiting on rate limiter");
                sleep_until(ready_at).await;
            }
        }
        self.last_slot = Some(Instant::now());
    }
}

/// Never waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unthrottled;

impl RateLimiter for Unthrottled {
    async fn wait_for_slot(&mut self) {}
}
