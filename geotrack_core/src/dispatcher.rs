//! Paced Dispatcher - the rate-controlled load generator.
//!
//! Drives a fixed-interval tick loop over the entity catalog. Each tick:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ 1. random phase   up to msgs_per_second picks, skipping entities │
//! │                   under attack or still inside their re-fire     │
//! │                   delay; each pick runs the transition model     │
//! │ 2. sweep phase    pending attacks → forced Severe                │
//! │                   expired attacks → resolving event, removed     │
//! │ 3. join           wait for every submission of this tick         │
//! │ 4. sleep          max(0, tick_interval − elapsed)                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A tick's events are queued per target in generation order. Each target
//! gets one send task that delivers its events one after another, so a
//! transport always sees one tracker's events in the order they were
//! generated while different trackers are delivered concurrently. All of a
//! tick's tasks are joined before sleeping, so in-flight work never exceeds
//! one tick's worth and a hung transport slows the loop instead of piling
//! up requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use geotrack_env::{EntityId, TrackerContext, Transport};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::attack::{AttackInjector, OverrideGuard, SweepAction};
use crate::catalog::EntityCatalog;
use crate::condition::Condition;
use crate::error::{DeliveryError, FatalError};
use crate::event::ConditionEvent;
use crate::transition::{ConditionTransitionModel, ProbabilityLadder, Transition, TransitionCause};

/// RNG stream for candidate picking.
const PICK_STREAM: u64 = 1;

/// RNG stream for the transition model.
const TRANSITION_STREAM: u64 = 2;

/// Minimum delay before an entity may be picked again, per condition it
/// was just moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefireDelays {
    pub offline: Duration,
    pub normal: Duration,
    pub minor: Duration,
    pub moderate: Duration,
    pub severe: Duration,
}

impl RefireDelays {
    /// The same delay for every condition.
    pub fn uniform(delay: Duration) -> Self {
        Self {
            offline: delay,
            normal: delay,
            minor: delay,
            moderate: delay,
            severe: delay,
        }
    }

    pub fn for_condition(&self, condition: Condition) -> Duration {
        match condition {
            Condition::Offline => self.offline,
            Condition::Normal => self.normal,
            Condition::Minor => self.minor,
            Condition::Moderate => self.moderate,
            Condition::Severe => self.severe,
        }
    }
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Target random dispatches per tick (default: 1000)
    pub msgs_per_second: usize,

    /// Wall-clock budget of one tick (default: 1s)
    pub tick_interval: Duration,

    /// Candidate picks tried per slot before giving up (default: 1000)
    pub max_pick_attempts: usize,

    /// How long an attack override lasts (default: 30s)
    pub attack_duration: Duration,

    /// Advisory deadline handed to the transport (default: 5s)
    pub send_timeout: Duration,

    /// Per-condition re-fire delays (default: none)
    pub refire_delays: RefireDelays,

    /// Transition probabilities
    pub ladder: ProbabilityLadder,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            msgs_per_second: 1000,
            tick_interval: Duration::from_millis(1000),
            max_pick_attempts: 1000,
            attack_duration: Duration::from_secs(30),
            send_timeout: Duration::from_secs(5),
            refire_delays: RefireDelays::default(),
            ladder: ProbabilityLadder::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_msgs_per_second(mut self, msgs: usize) -> Self {
        self.msgs_per_second = msgs;
        self
    }

    pub fn with_attack_duration(mut self, duration: Duration) -> Self {
        self.attack_duration = duration;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_refire_delays(mut self, delays: RefireDelays) -> Self {
        self.refire_delays = delays;
        self
    }

    pub fn with_ladder(mut self, ladder: ProbabilityLadder) -> Self {
        self.ladder = ladder;
        self
    }
}

/// Dispatcher-owned simulation state of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationState {
    pub condition: Condition,

    /// Earliest tick start at which the entity may be picked again
    pub next_eligible: Duration,
}

/// One event generated during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub target: EntityId,
    pub condition: Condition,
    pub cause: TransitionCause,
}

/// What happened during one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,

    /// Random-phase dispatches
    pub random_dispatched: usize,

    /// Forced severe events from newly activated attacks
    pub activated: usize,

    /// Resolving events from expired attacks
    pub released: usize,

    pub delivered: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub slept: Duration,

    /// Events in generation order
    pub events: Vec<DispatchRecord>,
}

impl TickReport {
    pub fn dispatched(&self) -> usize {
        self.random_dispatched + self.activated + self.released
    }
}

/// Outcome of the initialization burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Running totals over the dispatcher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub ticks: u64,
    pub dispatched: u64,
    pub delivered: u64,
    pub failed: u64,
    pub attacks_started: u64,
    pub attacks_released: u64,
}

/// Payloads queued during a tick, one lane per target.
#[derive(Default)]
struct Outbox {
    lanes: Vec<(EntityId, Vec<Vec<u8>>)>,
    lane_of: HashMap<EntityId, usize>,
}

impl Outbox {
    fn push(&mut self, target: EntityId, payload: Vec<u8>) {
        match self.lane_of.get(&target) {
            Some(&lane) => self.lanes[lane].1.push(payload),
            None => {
                self.lane_of.insert(target.clone(), self.lanes.len());
                self.lanes.push((target, vec![payload]));
            }
        }
    }
}

/// The paced load generator.
///
/// Generic over the context and transport, so the same loop paces against
/// the wall clock in production and a virtual clock in simulation.
pub struct PacedDispatcher<Ctx, T>
where
    Ctx: TrackerContext,
    T: Transport,
{
    context: Arc<Ctx>,
    transport: Arc<T>,
    catalog: Arc<EntityCatalog>,
    injector: AttackInjector,
    states: Vec<SimulationState>,
    model: ConditionTransitionModel,
    pick_rng: ChaCha8Rng,
    config: DispatcherConfig,
    stats: DispatchStats,
}

impl<Ctx, T> PacedDispatcher<Ctx, T>
where
    Ctx: TrackerContext,
    T: Transport,
{
    /// Creates a dispatcher over the catalog.
    ///
    /// The injector must have been built from the same catalog.
    pub fn new(
        context: Arc<Ctx>,
        transport: Arc<T>,
        catalog: Arc<EntityCatalog>,
        injector: AttackInjector,
        config: DispatcherConfig,
    ) -> Self {
        let states = catalog
            .iter()
            .map(|descriptor| SimulationState {
                condition: descriptor.condition,
                next_eligible: Duration::ZERO,
            })
            .collect();
        let model = ConditionTransitionModel::new(config.ladder, context.derive_rng(TRANSITION_STREAM));
        let pick_rng = context.derive_rng(PICK_STREAM);

        Self {
            context,
            transport,
            catalog,
            injector,
            states,
            model,
            pick_rng,
            config,
            stats: DispatchStats::default(),
        }
    }

    /// Handle for injecting attacks from another task.
    pub fn injector(&self) -> &AttackInjector {
        &self.injector
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn state(&self, idx: usize) -> Option<&SimulationState> {
        self.states.get(idx)
    }

    /// Announces every entity with an Init event and waits for delivery.
    ///
    /// Failed Init deliveries are reported and counted, not fatal.
    pub async fn initialize(&mut self) -> Result<InitReport, FatalError> {
        info!("Initializing {} trackers", self.catalog.len());
        let mut outbox = Outbox::default();
        for descriptor in self.catalog.iter() {
            Self::queue(&mut outbox, descriptor.init_event())?;
        }

        let mut report = InitReport::default();
        self.flush(outbox, &mut report.delivered, &mut report.failed).await?;
        self.stats.dispatched += self.catalog.len() as u64;
        self.stats.delivered += report.delivered as u64;
        self.stats.failed += report.failed as u64;

        if report.failed > 0 {
            warn!("{} of {} Init events were not delivered", report.failed, self.catalog.len());
        }
        Ok(report)
    }

    /// Runs forever. Returns only on a fatal error.
    pub async fn run(&mut self) -> Result<(), FatalError> {
        info!("Starting load generator...");
        loop {
            self.tick().await?;
        }
    }

    /// Runs a fixed number of ticks and keeps every report.
    pub async fn run_ticks(&mut self, ticks: u64) -> Result<Vec<TickReport>, FatalError> {
        let mut reports = Vec::new();
        for _ in 0..ticks {
            reports.push(self.tick().await?);
        }
        Ok(reports)
    }

    /// Runs a fixed number of ticks, discarding the per-tick reports.
    pub async fn run_for(&mut self, ticks: u64) -> Result<DispatchStats, FatalError> {
        for _ in 0..ticks {
            self.tick().await?;
        }
        Ok(self.stats)
    }

    /// Executes one tick, including its trailing sleep.
    pub async fn tick(&mut self) -> Result<TickReport, FatalError> {
        let started = self.context.now();
        let injector = self.injector.clone();
        let mut outbox = Outbox::default();
        let mut report = TickReport {
            tick: self.stats.ticks,
            ..TickReport::default()
        };

        // Random phase: the override check and the decision happen under
        // the lock, so an attack request always lands before or after a
        // pick, never in between.
        for _ in 0..self.config.msgs_per_second {
            let picked = {
                let guard = injector.lock();
                if guard.len() >= self.states.len() {
                    break;
                }
                self.pick_candidate(&guard, started).map(|idx| {
                    let transition = self.model.next(self.states[idx].condition, false);
                    (idx, transition)
                })
            };
            if let Some((idx, transition)) = picked {
                self.dispatch(&mut outbox, &mut report, idx, transition, started)?;
                report.random_dispatched += 1;
            }
        }

        // Sweep phase
        let actions = injector.lock().sweep(started, self.config.attack_duration);
        for action in actions {
            let (idx, forced) = match action {
                SweepAction::Activate(idx) => (idx, true),
                SweepAction::Release(idx) => (idx, false),
            };
            let Some(descriptor) = self.catalog.get(idx) else {
                warn!("Override for unknown tracker index {}", idx);
                continue;
            };
            if forced {
                info!("Tracker {} attacked!", descriptor.id);
                report.activated += 1;
            } else {
                info!("Load generator stops tracking attack for {}", descriptor.id);
                report.released += 1;
            }
            let transition = self.model.next(self.states[idx].condition, forced);
            self.dispatch(&mut outbox, &mut report, idx, transition, started)?;
        }

        self.flush(outbox, &mut report.delivered, &mut report.failed).await?;

        report.elapsed = self.context.now().saturating_sub(started);
        report.slept = self.config.tick_interval.saturating_sub(report.elapsed);
        debug!(
            "Finished interval in {} ms. Sleeping for {} ms.",
            report.elapsed.as_millis(),
            report.slept.as_millis()
        );

        self.stats.ticks += 1;
        self.stats.dispatched += report.dispatched() as u64;
        self.stats.delivered += report.delivered as u64;
        self.stats.failed += report.failed as u64;
        self.stats.attacks_started += report.activated as u64;
        self.stats.attacks_released += report.released as u64;

        self.context.sleep(report.slept).await;
        Ok(report)
    }

    /// Picks a random entity that is neither overridden nor cooling down.
    fn pick_candidate(&mut self, overrides: &OverrideGuard<'_>, now: Duration) -> Option<usize> {
        let count = self.states.len();
        if count == 0 {
            return None;
        }
        (0..self.config.max_pick_attempts)
            .map(|_| self.pick_rng.gen_range(0..count))
            .find(|&idx| !overrides.contains(idx) && self.states[idx].next_eligible <= now)
    }

    /// Commits a transition to the simulation state and queues its event.
    fn dispatch(
        &mut self,
        outbox: &mut Outbox,
        report: &mut TickReport,
        idx: usize,
        transition: Transition,
        now: Duration,
    ) -> Result<(), FatalError> {
        let target = self.catalog.get(idx).map(|d| d.id.clone()).ok_or_else(|| {
            FatalError::TaskAborted(format!("tracker index {} outside catalog", idx))
        })?;

        let state = &mut self.states[idx];
        state.condition = transition.condition;
        state.next_eligible = now + self.config.refire_delays.for_condition(transition.condition);

        report.events.push(DispatchRecord {
            target: target.clone(),
            condition: transition.condition,
            cause: transition.cause,
        });
        Self::queue(outbox, ConditionEvent::update(target, transition.condition))
    }

    fn queue(outbox: &mut Outbox, event: ConditionEvent) -> Result<(), FatalError> {
        let payload = event.to_payload().map_err(|source| FatalError::Encode {
            target: event.target.clone(),
            source,
        })?;
        outbox.push(event.target, payload);
        Ok(())
    }

    /// Delivers the queued events and waits for every lane to finish.
    ///
    /// A lane keeps going after a failed delivery; only a send task that
    /// panics or is cancelled is fatal.
    async fn flush(&self, outbox: Outbox, delivered: &mut usize, failed: &mut usize) -> Result<(), FatalError> {
        let mut inflight = JoinSet::new();
        for (target, payloads) in outbox.lanes {
            let transport = Arc::clone(&self.transport);
            let timeout = self.config.send_timeout;
            inflight.spawn(async move {
                let mut outcomes = Vec::with_capacity(payloads.len());
                for payload in payloads {
                    let outcome = transport
                        .send(target.clone(), payload, timeout)
                        .await
                        .map_err(|source| DeliveryError {
                            target: target.clone(),
                            source,
                        });
                    outcomes.push(outcome);
                }
                outcomes
            });
        }

        while let Some(joined) = inflight.join_next().await {
            let outcomes = joined.map_err(|e| FatalError::TaskAborted(e.to_string()))?;
            for outcome in outcomes {
                match outcome {
                    Ok(()) => *delivered += 1,
                    Err(e) => {
                        warn!("{}", e);
                        *failed += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EntityDescriptor;
    use crate::event::{EventBody, EventKind};
    use async_trait::async_trait;
    use geotrack_env::EnvError;
    use rand::SeedableRng;
    use std::sync::Mutex;
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Virtual clock that only moves when slept on.
    #[derive(Default)]
    struct StepContext {
        now: Mutex<Duration>,
    }

    #[async_trait]
    impl TrackerContext for StepContext {
        fn now(&self) -> Duration {
            *self.now.lock().unwrap()
        }

        fn system_time(&self) -> SystemTime {
            UNIX_EPOCH + self.now()
        }

        async fn sleep(&self, duration: Duration) {
            *self.now.lock().unwrap() += duration;
        }

        fn derive_rng(&self, stream: u64) -> ChaCha8Rng {
            ChaCha8Rng::seed_from_u64(stream)
        }

        fn seed(&self) -> u64 {
            1
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(EntityId, EventBody)>>,
        refuse: bool,
        panic: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, target: EntityId, payload: Vec<u8>, _timeout: Duration) -> Result<(), EnvError> {
            if self.panic {
                panic!("transport for {} blew up", target);
            }
            if self.refuse {
                return Err(EnvError::unreachable(&target));
            }
            // let other lanes interleave with this one
            tokio::task::yield_now().await;
            let body: EventBody = serde_json::from_slice(&payload).unwrap();
            self.sent.lock().unwrap().push((target, body));
            Ok(())
        }
    }

    fn catalog(count: usize) -> Arc<EntityCatalog> {
        Arc::new(EntityCatalog::new((0..count).map(|i| EntityDescriptor {
            id: EntityId::new(format!("{:05}", i)),
            node_type: "relay".to_string(),
            region: "WA".to_string(),
            longitude: -122.0,
            latitude: 47.0,
            condition: Condition::Normal,
            attack_eligible: false,
        })))
    }

    fn build(
        count: usize,
        config: DispatcherConfig,
        transport: RecordingTransport,
    ) -> PacedDispatcher<StepContext, RecordingTransport> {
        let catalog = catalog(count);
        let injector = AttackInjector::new(Arc::clone(&catalog));
        PacedDispatcher::new(Arc::new(StepContext::default()), Arc::new(transport), catalog, injector, config)
    }

    fn dispatcher(
        count: usize,
        config: DispatcherConfig,
        transport: RecordingTransport,
    ) -> PacedDispatcher<StepContext, RecordingTransport> {
        build(count, config.with_ladder(ProbabilityLadder::frozen()), transport)
    }

    #[tokio::test]
    async fn test_initialize_sends_one_init_per_entity() {
        let mut dispatcher = dispatcher(12, DispatcherConfig::default(), RecordingTransport::default());
        let report = dispatcher.initialize().await.unwrap();

        assert_eq!(report, InitReport { delivered: 12, failed: 0 });
        let sent = dispatcher.transport.sent.lock().unwrap();
        assert!(sent.iter().all(|(_, body)| body.kind == EventKind::Init && body.site.is_some()));
    }

    #[tokio::test]
    async fn test_tick_dispatches_target_rate_and_sleeps_remainder() {
        let config = DispatcherConfig::default().with_msgs_per_second(20);
        let mut dispatcher = dispatcher(50, config, RecordingTransport::default());

        let report = dispatcher.tick().await.unwrap();

        assert_eq!(report.random_dispatched, 20);
        assert_eq!(report.delivered, 20);
        assert_eq!(report.slept, Duration::from_secs(1));
        assert_eq!(dispatcher.context.now(), Duration::from_secs(1));
        assert_eq!(dispatcher.stats().ticks, 1);
    }

    #[tokio::test]
    async fn test_refire_delay_limits_picks() {
        let config = DispatcherConfig::default()
            .with_msgs_per_second(20)
            .with_refire_delays(RefireDelays::uniform(Duration::from_secs(10)));
        let mut dispatcher = dispatcher(5, config, RecordingTransport::default());

        let report = dispatcher.tick().await.unwrap();
        assert_eq!(report.random_dispatched, 5);

        let report = dispatcher.tick().await.unwrap();
        assert_eq!(report.random_dispatched, 0);
    }

    #[tokio::test]
    async fn test_attack_fires_once_and_resolves_once() {
        let config = DispatcherConfig::default()
            .with_msgs_per_second(4)
            .with_attack_duration(Duration::from_secs(3));
        let mut dispatcher = dispatcher(4, config, RecordingTransport::default());
        dispatcher.injector().attack("00002").unwrap();

        let reports = dispatcher.run_ticks(6).await.unwrap();
        let events: Vec<&DispatchRecord> = reports
            .iter()
            .flat_map(|r| r.events.iter())
            .filter(|e| e.target.as_str() == "00002")
            .collect();

        assert_eq!(events.first().map(|e| e.cause), Some(TransitionCause::Forced));
        assert_eq!(events.iter().filter(|e| e.cause == TransitionCause::Forced).count(), 1);
        assert_eq!(events.iter().filter(|e| e.cause == TransitionCause::AttackResolved).count(), 1);
        assert_eq!(reports[3].released, 1);
        assert!(dispatcher.injector().phase("00002").is_none());
    }

    #[tokio::test]
    async fn test_fully_overridden_population_dispatches_no_random_events() {
        let config = DispatcherConfig::default().with_msgs_per_second(10);
        let mut dispatcher = dispatcher(3, config, RecordingTransport::default());
        dispatcher.injector().attack_all(["00000", "00001", "00002"]);

        let report = dispatcher.tick().await.unwrap();

        assert_eq!(report.random_dispatched, 0);
        assert_eq!(report.activated, 3);
    }

    #[tokio::test]
    async fn test_delivery_failures_do_not_stop_the_loop() {
        let transport = RecordingTransport {
            refuse: true,
            ..Default::default()
        };
        let mut dispatcher = dispatcher(10, DispatcherConfig::default().with_msgs_per_second(5), transport);

        let reports = dispatcher.run_ticks(3).await.unwrap();

        assert!(reports.iter().all(|r| r.failed == 5 && r.delivered == 0));
        assert_eq!(dispatcher.stats().failed, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_target_events_arrive_in_generation_order() {
        let config = DispatcherConfig::default().with_msgs_per_second(60);
        let mut dispatcher = build(3, config, RecordingTransport::default());

        let reports = dispatcher.run_ticks(4).await.unwrap();

        let sent = dispatcher.transport.sent.lock().unwrap();
        for id in ["00000", "00001", "00002"] {
            let generated: Vec<Condition> = reports
                .iter()
                .flat_map(|r| r.events.iter())
                .filter(|e| e.target.as_str() == id)
                .map(|e| e.condition)
                .collect();
            let delivered: Vec<Condition> = sent
                .iter()
                .filter(|(target, _)| target.as_str() == id)
                .map(|(_, body)| body.condition)
                .collect();
            assert!(generated.len() > 1, "tracker {} picked {} times", id, generated.len());
            assert_eq!(delivered, generated, "tracker {}", id);
        }
    }

    #[tokio::test]
    async fn test_panicking_transport_is_fatal() {
        let transport = RecordingTransport {
            panic: true,
            ..Default::default()
        };
        let mut dispatcher = dispatcher(4, DispatcherConfig::default().with_msgs_per_second(2), transport);

        let result = dispatcher.tick().await;
        assert!(matches!(result, Err(FatalError::TaskAborted(_))), "{:?}", result.err());
        assert_eq!(dispatcher.stats().ticks, 0);
    }

    #[tokio::test]
    async fn test_run_ticks_accepts_any_tick_count() {
        let transport = RecordingTransport {
            panic: true,
            ..Default::default()
        };
        let mut dispatcher = dispatcher(4, DispatcherConfig::default().with_msgs_per_second(2), transport);

        // the first tick aborts, so this returns instead of running forever
        let result = dispatcher.run_ticks(u64::MAX).await;
        assert!(matches!(result, Err(FatalError::TaskAborted(_))));
    }

    #[tokio::test]
    async fn test_run_for_returns_totals() {
        let config = DispatcherConfig::default().with_msgs_per_second(5);
        let mut dispatcher = dispatcher(10, config, RecordingTransport::default());

        let stats = dispatcher.run_for(3).await.unwrap();

        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.dispatched, 15);
        assert_eq!(stats.delivered, 15);
        assert_eq!(dispatcher.context.now(), Duration::from_secs(3));
    }
}
