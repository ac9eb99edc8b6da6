//! GeoTrack Core - paced condition-event generation and alert classification
//!
//! Two engines, connected only through serialized events:
//! 1. **Load generation**: `PacedDispatcher` walks the `EntityCatalog` at a
//!    target rate, asks the `ConditionTransitionModel` for each tracker's
//!    next condition and honours operator attacks from the `AttackInjector`.
//! 2. **Classification**: `AlertClassifier` folds each delivered event into
//!    the tracker's `EntityRecord`, deriving a two-tier alert level and
//!    incident statistics. `ClassifierPool` runs it per entity behind the
//!    `Transport` seam, committing to a `RecordStore`.
//!
//! ```text
//! EntityCatalog ─► PacedDispatcher ─► payload ─► Transport ─► AlertClassifier ─► RecordStore
//!                        ▲
//!                  AttackInjector ◄── operator
//! ```

pub mod attack;
pub mod catalog;
pub mod classifier;
pub mod condition;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod pool;
pub mod record;
pub mod store;
pub mod transition;

// Re-export key types for convenience
pub use attack::{AttackInjector, OverridePhase, SweepAction};
pub use catalog::{EntityCatalog, EntityDescriptor, PopulationLoader, PopulationReport};
pub use classifier::{AlertClassifier, AlertSeverity, AlertSink, RatioMode, TracingAlertSink};
pub use condition::{AlertBaselines, AlertLevel, Condition};
pub use dispatcher::{
    DispatchRecord, DispatchStats, DispatcherConfig, InitReport, PacedDispatcher, RefireDelays,
    SimulationState, TickReport,
};
pub use error::{ClassificationError, ConfigurationError, DeliveryError, FatalError, LookupError, StoreError};
pub use event::{ConditionEvent, EventBody, EventKind, SiteInfo};
pub use pool::{ClassifierPool, PoolConfig};
pub use record::{EntityRecord, IncidentCounters, UpdateDirective};
pub use store::{MemoryRecordStore, RecordStore, SledRecordStore};
pub use transition::{ConditionTransitionModel, ProbabilityLadder, Transition, TransitionCause};
