//! Delivery failures reported by a `Transport`.

use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// Why a payload did not reach the entity it was addressed to.
///
/// All variants are entity-scoped: callers report them and move on.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Nothing is accepting payloads for the target
    #[error("no route to {0}")]
    Unreachable(String),

    /// The payload was accepted and then lost
    #[error("payload lost: {0}")]
    Lost(String),

    /// Delivery did not complete before the caller's deadline
    #[error("delivery timed out after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    pub fn unreachable(target: impl Display) -> Self {
        Self::Unreachable(target.to_string())
    }

    pub fn lost(reason: impl Into<String>) -> Self {
        Self::Lost(reason.into())
    }

    pub fn timeout(after: Duration) -> Self {
        Self::Timeout(after.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_reports_milliseconds() {
        let e = EnvError::timeout(Duration::from_secs(5));
        assert!(matches!(e, EnvError::Timeout(5000)));
        assert_eq!(e.to_string(), "delivery timed out after 5000ms");
    }
}
