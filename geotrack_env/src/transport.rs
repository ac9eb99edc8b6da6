//! Delivery abstraction between the load generator and the classifier.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::EnvError;
use crate::types::EntityId;

/// Delivers serialized condition events to the entity that owns them.
///
/// # Implementations
///
/// - **In-process**: `ClassifierPool` hands the payload to a partitioned
///   worker that runs the classifier against the stored record
/// - **Simulation**: `FaultyTransport` wraps another transport and injects
///   loss and latency
///
/// # Delivery
///
/// ```text
/// Dispatcher                 Transport                  Classifier
///   |                           |                           |
///   |-- send(id, bytes, 5s) --->|                           |
///   |                           |-- route by id ----------->|
///   |                           |<-- committed -------------|
///   |<-- Ok(()) ----------------|                           |
/// ```
///
/// Delivery is at-most-once and best-effort; callers never retry.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a payload to the target entity.
    ///
    /// # Arguments
    /// * `target` - The entity that should process the payload
    /// * `payload` - UTF-8 encoded event bytes
    /// * `timeout` - Advisory deadline for the whole delivery
    ///
    /// # Returns
    /// * `Ok(())` - The payload was processed
    /// * `Err(EnvError::Timeout)` - The deadline passed first
    /// * `Err(EnvError::Unreachable | EnvError::Lost)` - Any other delivery failure
    async fn send(&self, target: EntityId, payload: Vec<u8>, timeout: Duration) -> Result<(), EnvError>;
}
