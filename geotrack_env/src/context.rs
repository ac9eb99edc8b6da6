//! The clock and entropy seam shared by every engine.

use async_trait::async_trait;
use rand_chacha::ChaCha8Rng;
use std::time::{Duration, SystemTime};

/// Where the engines get time, timers and randomness from.
///
/// The paced dispatcher measures each tick with `now()` and pays the rest of
/// the interval with `sleep()`. Attack timers and re-fire eligibility are
/// measured on the same clock, so swapping the context swaps the whole
/// notion of time:
///
/// | Context        | `now()`                 | `sleep()`             | RNG streams         |
/// |----------------|-------------------------|-----------------------|---------------------|
/// | `TokioContext` | elapsed since creation  | `tokio::time::sleep`  | entropy or seeded   |
/// | `SimContext`   | virtual clock           | advances the clock    | always seeded       |
#[async_trait]
pub trait TrackerContext: Send + Sync + 'static {
    /// Monotonic time since the context was created.
    fn now(&self) -> Duration;

    /// Wall-clock time, for log lines and reports.
    fn system_time(&self) -> SystemTime;

    /// Waits for `duration` of this context's time.
    async fn sleep(&self, duration: Duration);

    /// An independent RNG for one consumer.
    ///
    /// Each consumer (candidate picking, transitions, fault injection) asks
    /// for its own `stream`, so extra draws in one never shift another.
    fn derive_rng(&self, stream: u64) -> ChaCha8Rng;

    /// Master seed, or 0 when drawing from OS entropy.
    fn seed(&self) -> u64;
}

/// Seed of one RNG stream under a master seed.
///
/// Contexts that support seeding derive every stream through this, so a
/// live run and a simulated run with the same seed draw the same values.
pub fn stream_seed(master: u64, stream: u64) -> u64 {
    master.wrapping_mul(0x517cc1b727220a95) ^ stream
}
