//! Error taxonomy for the load generator and the classifier.
//!
//! Entity-scoped errors (lookup, delivery, classification) are reported and
//! never escalate; `FatalError` is the only process-scoped failure.

use geotrack_env::{EntityId, EnvError};
use thiserror::Error;

/// Problems with the population source.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to read population source: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed population row {line}: {reason}")]
    MalformedRow { line: usize, reason: String },

    #[error("Population source is empty")]
    EmptyPopulation,
}

/// An operator command referenced an entity that is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("Entity {0} not found")]
    UnknownEntity(String),
}

/// A submission that failed or timed out. Not retried.
#[derive(Debug, Error)]
#[error("Delivery to {target} failed: {source}")]
pub struct DeliveryError {
    pub target: EntityId,
    #[source]
    pub source: EnvError,
}

/// Record store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(String),

    #[error("Corrupt record for {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// A fault while interpreting one event against one record.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("Malformed event payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("Counter {0} overflowed")]
    CounterOverflow(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Unexpected failure inside the dispatch loop. Terminates the process.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Failed to encode event for {target}: {source}")]
    Encode {
        target: EntityId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Submission task aborted: {0}")]
    TaskAborted(String),
}
