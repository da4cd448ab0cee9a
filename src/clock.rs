//! Cancellable ticks and pauses on top of `tokio::time`.
//!
//! All waits race against a [`CancellationToken`], so a cancelled session is
//! observed as soon as the token fires instead of at the next tick boundary.
//! Under `#[tokio::test(start_paused = true)]` the same code runs on tokio's
//! virtual clock.

use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const ONE_SECOND: Duration = Duration::from_secs(1);

/// Fixed-period ticker whose first tick fires one period after creation.
pub struct Ticker {
    interval: Interval,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn every_second() -> Self {
        Self::new(ONE_SECOND)
    }

    /// Wait for the next tick. Returns `false` once `token` is cancelled,
    /// including when cancellation lands on the same instant as the tick.
    pub async fn tick(&mut self, token: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = self.interval.tick() => !token.is_cancelled(),
        }
    }
}

/// Sleep for `duration` unless `token` is cancelled first.
/// Returns `true` if the full duration elapsed.
pub async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = time::sleep(duration) => !token.is_cancelled(),
    }
}
