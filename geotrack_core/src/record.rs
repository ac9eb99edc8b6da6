//! The persisted per-entity record that the classifier maintains.

use serde::{Deserialize, Serialize};

use crate::condition::{AlertBaselines, AlertLevel, Condition};
use crate::error::ClassificationError;
use crate::event::EventBody;

/// What the store should do with a record after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateDirective {
    /// Discard any changes
    NoUpdate,
    /// Persist the returned record
    DoUpdate,
    /// Delete the record
    Remove,
}

/// Incident statistics. Every counter only ever grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentCounters {
    pub minor_count: u64,
    pub moderate_count: u64,
    pub severe_count: u64,
    pub false_alarm_count: u64,
    pub resolved_count: u64,
    pub total_incidents: u64,
}

impl IncidentCounters {
    /// True when `total_incidents` equals the per-condition sum.
    pub fn is_consistent(&self) -> bool {
        self.minor_count
            .checked_add(self.moderate_count)
            .and_then(|sum| sum.checked_add(self.severe_count))
            == Some(self.total_incidents)
    }

    /// True when no counter in `self` is below its value in `earlier`.
    pub fn dominates(&self, earlier: &IncidentCounters) -> bool {
        self.minor_count >= earlier.minor_count
            && self.moderate_count >= earlier.moderate_count
            && self.severe_count >= earlier.severe_count
            && self.false_alarm_count >= earlier.false_alarm_count
            && self.resolved_count >= earlier.resolved_count
            && self.total_incidents >= earlier.total_incidents
    }
}

pub(crate) fn bump(counter: &mut u64, name: &'static str) -> Result<(), ClassificationError> {
    *counter = counter
        .checked_add(1)
        .ok_or(ClassificationError::CounterOverflow(name))?;
    Ok(())
}

/// Stored state of one tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub node_type: String,
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
    pub condition: Condition,
    pub alert_level: AlertLevel,
    pub counters: IncidentCounters,

    /// Every incident event received, oldest first.
    pub incident_history: Vec<EventBody>,
}

impl EntityRecord {
    /// A blank record, as created before the Init event arrives.
    pub fn new() -> Self {
        Self {
            node_type: String::new(),
            region: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            condition: Condition::Normal,
            alert_level: AlertBaselines::NORMAL,
            counters: IncidentCounters::default(),
            incident_history: Vec::new(),
        }
    }

    /// False-alarm ratio with true division; `None` before any moderate incident.
    pub fn false_alarm_ratio(&self) -> Option<f64> {
        (self.counters.moderate_count > 0)
            .then(|| self.counters.false_alarm_count as f64 / self.counters.moderate_count as f64)
    }

    /// False-alarm ratio with the integer quotient truncated before widening.
    pub fn truncated_false_alarm_ratio(&self) -> Option<f64> {
        (self.counters.moderate_count > 0)
            .then(|| (self.counters.false_alarm_count / self.counters.moderate_count) as f64)
    }
}

impl Default for EntityRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fresh_record_is_consistent() {
        let record = EntityRecord::new();
        assert!(record.counters.is_consistent());
        assert_eq!(record.false_alarm_ratio(), None);
    }

    #[test]
    fn test_ratio_modes_differ_on_fractions() {
        let mut record = EntityRecord::new();
        record.counters.moderate_count = 2;
        record.counters.false_alarm_count = 1;

        assert_relative_eq!(record.false_alarm_ratio().unwrap(), 0.5);
        assert_relative_eq!(record.truncated_false_alarm_ratio().unwrap(), 0.0);
    }

    #[test]
    fn test_bump_reports_overflow() {
        let mut counter = u64::MAX;
        assert!(matches!(
            bump(&mut counter, "minor_count"),
            Err(ClassificationError::CounterOverflow("minor_count"))
        ));
        assert_eq!(counter, u64::MAX);
    }

    #[test]
    fn test_dominates() {
        let earlier = IncidentCounters { minor_count: 2, ..Default::default() };
        let later = IncidentCounters { minor_count: 3, total_incidents: 1, ..Default::default() };
        assert!(later.dominates(&earlier));
        assert!(!earlier.dominates(&later));
    }
}
