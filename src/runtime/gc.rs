use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::config::ConsumerConfig;
use crate::core::Clock;
use crate::core::Store;

/// Periodic garbage collection of bookkeeping keys whose messages expired.
///
/// Covers the leftovers ack-time purging cannot reach: messages whose second
/// redundant delivery never arrived, or consumers that died between acking
/// and purging.
#[derive(Debug)]
pub struct GcSweeper<S, C> {
    store: S,
    clock: C,
    interval: Duration,
    sample_rate: f64,
    cancellation: CancellationToken,
}

impl<S, C> GcSweeper<S, C>
where
    S: Store,
    C: Clock,
{
    pub fn new(store: S, clock: C, interval: Duration, sample_rate: f64, cancellation: CancellationToken) -> Self {
        Self { store, clock, interval, sample_rate: sample_rate.clamp(0.0, 1.0), cancellation }
    }

    pub fn from_config(store: S, clock: C, config: &ConsumerConfig, cancellation: CancellationToken) -> Self {
        Self::new(
            store,
            clock,
            Duration::from_millis(config.gc_interval_ms.max(1)),
            config.gc_sample_rate,
            cancellation,
        )
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    return;
                }
                _ = ticker.tick() => {}
            }

            // probabilistic gate bounds scan cost on large key spaces
            if pseudo_random_unit() > self.sample_rate {
                continue;
            }

            let sweep_result = tokio::select! {
                _ = self.cancellation.cancelled() => {
                    return;
                }
                sweep_result = self.store.garbage_collect(self.clock.now()) => sweep_result,
            };

            match sweep_result {
                Ok(collected) if collected > 0 => {
                    debug!(collected, "garbage collected expired message keys");
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(error = %error, "store garbage collection failed");
                }
            }
        }
    }
}

fn pseudo_random_unit() -> f64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;

    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0_u128, |duration| duration.as_nanos());
    let mut state = nanos as u64;
    state ^= state.rotate_left(13);
    state ^= state.rotate_right(7);
    state ^= state.rotate_left(17);

    state as f64 / u64::MAX as f64
}
