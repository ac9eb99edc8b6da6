//! Simulated delivery path with fault injection.

use async_trait::async_trait;
use geotrack_env::{EntityId, EnvError, Transport};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Fault profile applied to every send.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultConfig {
    /// Probability that a payload is silently dropped (0.0 - 1.0)
    pub loss_rate: f64,

    /// Lower bound of the sampled delivery latency
    pub latency_min: Duration,

    /// Upper bound of the sampled delivery latency
    pub latency_max: Duration,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            latency_min: Duration::ZERO,
            latency_max: Duration::ZERO,
        }
    }
}

impl FaultConfig {
    pub fn with_loss(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.latency_min = min.min(max);
        self.latency_max = max.max(min);
        self
    }
}

/// Fault counters.
#[derive(Debug, Default)]
pub struct FaultStats {
    pub forwarded: AtomicU64,
    pub dropped: AtomicU64,
    pub timed_out: AtomicU64,
    pub unreachable: AtomicU64,
}

/// Wraps a transport and injects loss, latency and unreachable entities.
///
/// Latency is virtual: a delivery whose sampled latency exceeds the
/// caller's deadline fails with `Timeout`, anything faster is forwarded
/// at once. Every decision is drawn from an RNG keyed by the seed, the
/// target id and that target's send count. Sends to different targets may
/// be polled in any order; sends to one target must be issued one after
/// another (the dispatcher does this) for the count to be reproducible.
pub struct FaultyTransport<T: Transport> {
    inner: Arc<T>,
    seed: u64,
    config: FaultConfig,
    sequence: Mutex<HashMap<EntityId, u64>>,
    isolated: Mutex<HashSet<EntityId>>,
    stats: FaultStats,
}

impl<T: Transport> FaultyTransport<T> {
    /// Creates a fault injector in front of `inner`.
    pub fn new(inner: Arc<T>, seed: u64, config: FaultConfig) -> Self {
        Self {
            inner,
            seed,
            config,
            sequence: Mutex::new(HashMap::new()),
            isolated: Mutex::new(HashSet::new()),
            stats: FaultStats::default(),
        }
    }

    /// Transport without faults.
    pub fn passthrough(inner: Arc<T>) -> Self {
        Self::new(inner, 0, FaultConfig::default())
    }

    pub fn inner(&self) -> &Arc<T> {
        &self.inner
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    pub fn stats(&self) -> &FaultStats {
        &self.stats
    }

    /// Makes an entity unreachable until healed.
    pub fn isolate(&self, id: EntityId) {
        self.isolated.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
    }

    /// Restores every isolated entity.
    pub fn heal_all(&self) {
        self.isolated.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn is_isolated(&self, id: &EntityId) -> bool {
        self.isolated.lock().unwrap_or_else(PoisonError::into_inner).contains(id)
    }

    fn rng_for(&self, target: &EntityId) -> ChaCha8Rng {
        let seq = {
            let mut sequence = self.sequence.lock().unwrap_or_else(PoisonError::into_inner);
            let counter = sequence.entry(target.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        target.hash(&mut hasher);
        seq.hash(&mut hasher);
        ChaCha8Rng::seed_from_u64(hasher.finish())
    }
}

#[async_trait]
impl<T: Transport> Transport for FaultyTransport<T> {
    async fn send(&self, target: EntityId, payload: Vec<u8>, timeout: Duration) -> Result<(), EnvError> {
        if self.is_isolated(&target) {
            self.stats.unreachable.fetch_add(1, Ordering::Relaxed);
            return Err(EnvError::unreachable(&target));
        }

        let mut rng = self.rng_for(&target);
        if self.config.loss_rate > 0.0 && rng.gen::<f64>() < self.config.loss_rate {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("dropped payload for {}", target);
            return Err(EnvError::lost(format!("payload for {} dropped", target)));
        }

        let latency = if self.config.latency_max > self.config.latency_min {
            rng.gen_range(self.config.latency_min..=self.config.latency_max)
        } else {
            self.config.latency_min
        };
        if latency > timeout {
            self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
            return Err(EnvError::timeout(timeout));
        }

        self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        self.inner.send(target, payload, timeout).await
    }
}
