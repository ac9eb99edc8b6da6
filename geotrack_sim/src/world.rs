//! SimWorld - one complete load generator and classifier wired together.

use crate::context::SimContext;
use crate::control::DEFAULT_ATTACK_IDS;
use crate::network::{FaultConfig, FaultyTransport};

use geotrack_core::{
    AlertClassifier, AttackInjector, Condition, DispatchStats, DispatcherConfig, EntityCatalog,
    EntityDescriptor, FatalError, InitReport, MemoryRecordStore, PacedDispatcher, PoolConfig,
    ProbabilityLadder, RecordStore, RefireDelays, StoreError, TickReport, ClassifierPool,
};
use geotrack_env::{EntityId, TrackerContext};
use rand::Rng;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// RNG stream for the synthetic population.
const CATALOG_STREAM: u64 = 10;

/// Slack allowed on the average random dispatch rate.
pub const RATE_TOLERANCE: f64 = 0.05;

const NODE_TYPES: [&str; 3] = ["substation", "transformer", "feeder"];
const REGIONS: [&str; 4] = ["WA", "NY", "FL", "TX"];

pub type SimTransport = FaultyTransport<ClassifierPool<MemoryRecordStore>>;
pub type SimDispatcher = PacedDispatcher<SimContext, SimTransport>;

/// Errors raised while running or checking a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("dispatcher failed: {0}")]
    Fatal(#[from] FatalError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("record {id} is inconsistent: {reason}")]
    CorruptRecord { id: EntityId, reason: String },

    #[error("{0} attack overrides still outstanding")]
    OverridesOutstanding(usize),

    #[error("random dispatch rate {observed:.1}/s exceeds {limit:.1}/s")]
    RateExceeded { observed: f64, limit: f64 },

    #[error("dispatched {dispatched} but delivered {delivered} + failed {failed}")]
    DeliveryMismatch { dispatched: u64, delivered: u64, failed: u64 },

    #[error("{stored} incidents stored but {dispatched} incident events delivered")]
    LostUpdates { stored: u64, dispatched: u64 },

    #[error("{0} events failed classification")]
    ClassificationFailures(u64),

    #[error("check failed: {0}")]
    Check(String),
}

/// Simulation configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed
    pub seed: u64,

    /// Population size (the default attack targets come first)
    pub num_trackers: usize,

    pub msgs_per_second: usize,
    pub attack_duration: Duration,
    pub refire_delays: RefireDelays,
    pub ladder: ProbabilityLadder,
    pub fault: FaultConfig,
    pub pool: PoolConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            num_trackers: 200,
            msgs_per_second: 100,
            attack_duration: Duration::from_secs(5),
            refire_delays: RefireDelays::default(),
            ladder: ProbabilityLadder::default(),
            fault: FaultConfig::default(),
            pool: PoolConfig {
                workers: 4,
                queue_depth: 256,
            },
        }
    }
}

/// Builds a seeded population. The default attack ids come first so that
/// attack scenarios can target them by name.
pub fn synthetic_catalog(context: &SimContext, count: usize) -> EntityCatalog {
    let mut rng = context.derive_rng(CATALOG_STREAM);
    let ids = DEFAULT_ATTACK_IDS
        .iter()
        .map(|id| id.to_string())
        .chain((0..).map(|i| format!("{:05}", 20000 + i)))
        .take(count);

    EntityCatalog::new(ids.map(|id| EntityDescriptor {
        id: EntityId::from(id),
        node_type: NODE_TYPES[rng.gen_range(0..NODE_TYPES.len())].to_string(),
        region: REGIONS[rng.gen_range(0..REGIONS.len())].to_string(),
        longitude: rng.gen_range(-124.0..-67.0),
        latitude: rng.gen_range(25.0..49.0),
        condition: Condition::Normal,
        attack_eligible: false,
    }))
}

/// A dispatcher, fault injector, classifier pool and store under one
/// virtual clock.
pub struct SimWorld {
    config: SimConfig,
    context: Arc<SimContext>,
    catalog: Arc<EntityCatalog>,
    store: Arc<MemoryRecordStore>,
    transport: Arc<SimTransport>,
    dispatcher: SimDispatcher,
    init: InitReport,
    incident_events: u64,
}

impl SimWorld {
    /// Wires a new world. Must be called inside a tokio runtime, which
    /// hosts the classifier workers.
    pub fn new(config: SimConfig) -> Self {
        let context = SimContext::shared(config.seed);
        let catalog = Arc::new(synthetic_catalog(&context, config.num_trackers));
        let store = Arc::new(MemoryRecordStore::new());
        let pool = Arc::new(ClassifierPool::spawn(
            Arc::clone(&store),
            AlertClassifier::new(),
            config.pool.clone(),
        ));
        let transport = Arc::new(FaultyTransport::new(pool, config.seed, config.fault.clone()));

        let dispatcher_config = DispatcherConfig::default()
            .with_msgs_per_second(config.msgs_per_second)
            .with_attack_duration(config.attack_duration)
            .with_refire_delays(config.refire_delays)
            .with_ladder(config.ladder);
        let dispatcher = PacedDispatcher::new(
            Arc::clone(&context),
            Arc::clone(&transport),
            Arc::clone(&catalog),
            AttackInjector::new(Arc::clone(&catalog)),
            dispatcher_config,
        );

        Self {
            config,
            context,
            catalog,
            store,
            transport,
            dispatcher,
            init: InitReport::default(),
            incident_events: 0,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<SimContext> {
        &self.context
    }

    pub fn catalog(&self) -> &Arc<EntityCatalog> {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<MemoryRecordStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<SimTransport> {
        &self.transport
    }

    pub fn injector(&self) -> &AttackInjector {
        self.dispatcher.injector()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn init_report(&self) -> InitReport {
        self.init
    }

    /// Sends the Init burst.
    pub async fn initialize(&mut self) -> Result<InitReport, SimError> {
        self.init = self.dispatcher.initialize().await?;
        Ok(self.init)
    }

    /// Runs ticks, keeping a tally of the incident events delivered.
    pub async fn run_ticks(&mut self, ticks: u64) -> Result<Vec<TickReport>, SimError> {
        let reports = self.dispatcher.run_ticks(ticks).await?;
        for report in &reports {
            self.incident_events += report
                .events
                .iter()
                .filter(|event| event.condition.is_incident())
                .count() as u64;
        }
        Ok(reports)
    }

    /// Ticks until every attack override has been released.
    pub async fn drain(&mut self, max_ticks: u64) -> Result<u64, SimError> {
        let mut ticks = 0;
        while self.injector().active_count() > 0 && ticks < max_ticks {
            self.run_ticks(1).await?;
            ticks += 1;
        }
        debug!("drained overrides in {} ticks", ticks);
        Ok(ticks)
    }

    /// Checks the invariants every run must hold.
    pub fn check_invariants(&self) -> Result<(), SimError> {
        let stats = self.stats();

        let mut stored_incidents = 0;
        for id in self.store.ids()? {
            let Some(record) = self.store.get(&id)? else {
                continue;
            };
            if !record.counters.is_consistent() {
                return Err(SimError::CorruptRecord {
                    id,
                    reason: format!("{:?}", record.counters),
                });
            }
            if record.incident_history.len() as u64 != record.counters.total_incidents {
                return Err(SimError::CorruptRecord {
                    id,
                    reason: format!(
                        "{} history entries for {} incidents",
                        record.incident_history.len(),
                        record.counters.total_incidents
                    ),
                });
            }
            stored_incidents += record.counters.total_incidents;
        }

        let outstanding = self.injector().active_count();
        if outstanding > 0 {
            return Err(SimError::OverridesOutstanding(outstanding));
        }

        if stats.delivered + stats.failed != stats.dispatched {
            return Err(SimError::DeliveryMismatch {
                dispatched: stats.dispatched,
                delivered: stats.delivered,
                failed: stats.failed,
            });
        }

        let elapsed = self.context.now().as_secs_f64();
        if elapsed > 0.0 {
            let random = stats
                .dispatched
                .saturating_sub(self.catalog.len() as u64)
                .saturating_sub(stats.attacks_started)
                .saturating_sub(stats.attacks_released);
            let observed = random as f64 / elapsed;
            let limit = self.config.msgs_per_second as f64 * (1.0 + RATE_TOLERANCE);
            if observed > limit {
                return Err(SimError::RateExceeded { observed, limit });
            }
        }

        let pool = self.transport.inner().stats();
        let failed = pool.failed.load(Ordering::Relaxed);
        if failed > 0 {
            return Err(SimError::ClassificationFailures(failed));
        }

        // Without delivery failures every incident must have landed exactly once
        if stats.failed == 0 && stored_incidents != self.incident_events {
            return Err(SimError::LostUpdates {
                stored: stored_incidents,
                dispatched: self.incident_events,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_catalog_is_seeded_and_leads_with_defaults() {
        let a = synthetic_catalog(&SimContext::new(5), 30);
        let b = synthetic_catalog(&SimContext::new(5), 30);

        assert_eq!(a.len(), 30);
        assert!(a.iter().eq(b.iter()));
        assert_eq!(a.index_of("98072"), Some(0));
        assert_eq!(a.index_of("20000"), Some(DEFAULT_ATTACK_IDS.len()));
    }

    #[test]
    fn test_small_catalog_takes_a_prefix_of_defaults() {
        let catalog = synthetic_catalog(&SimContext::new(5), 4);
        let ids: Vec<&str> = catalog.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, DEFAULT_ATTACK_IDS[..4]);
    }

    #[tokio::test]
    async fn test_quiet_world_holds_invariants() {
        let mut world = SimWorld::new(SimConfig {
            num_trackers: 40,
            msgs_per_second: 10,
            ..SimConfig::default()
        });

        let init = world.initialize().await.unwrap();
        world.run_ticks(5).await.unwrap();

        assert_eq!(init.delivered, 40);
        assert_eq!(world.store().len(), 40);
        assert_eq!(world.context().now(), Duration::from_secs(5));
        world.check_invariants().unwrap();
    }
}
