//! Alert Classifier - history-sensitive rule engine.
//!
//! Consumes one delivered condition event against one stored record and
//! derives the new two-tier alert level plus incident statistics.
//!
//! # Rule Table
//!
//! Rules are evaluated top-down and the first match wins:
//!
//! ```text
//! ┌──────────────────────────┬────────────────────────────────────┬──────────────┐
//! │ Rule                     │ Guard                              │ Alert level  │
//! ├──────────────────────────┼────────────────────────────────────┼──────────────┤
//! │ init                     │ kind = Init                        │ (unchanged)  │
//! │ resolve                  │ Offline | Normal                   │ normal       │
//! │ minor                    │ Minor                              │ minor        │
//! │ severe                   │ Severe                             │ severe       │
//! │ moderate_after_severe    │ Moderate, severe > 0               │ moderate+0/2 │
//! │ moderate_clean_history   │ Moderate, false alarms = 0         │ moderate+1/3 │
//! │ moderate_unreliable      │ Moderate, moderate > 0, ratio ≥ ½  │ moderate+2/4 │
//! │ moderate_reliable        │ Moderate, moderate > 0, ratio < ½  │ moderate+3/5 │
//! │ moderate_unproven        │ Moderate, moderate = 0             │ moderate+2/4 │
//! └──────────────────────────┴────────────────────────────────────┴──────────────┘
//! ```
//!
//! Every non-init event whose condition is an incident then bumps
//! `total_incidents` and is appended to the incident history.

use std::sync::Arc;

use geotrack_env::EntityId;
use tracing::{debug, error};

use crate::condition::{AlertBaselines, Condition};
use crate::error::ClassificationError;
use crate::event::{ConditionEvent, EventKind};
use crate::record::{bump, EntityRecord, UpdateDirective};

/// Ratio at or above which a tracker's moderate incidents are considered
/// mostly false alarms.
pub const FALSE_ALARM_THRESHOLD: f64 = 0.5;

/// How the false-alarm ratio is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatioMode {
    /// `false_alarms as f64 / moderates as f64`
    #[default]
    TrueDivision,
    /// `(false_alarms / moderates) as f64`, integer quotient first
    TruncatingInteger,
}

impl RatioMode {
    fn ratio(self, record: &EntityRecord) -> Option<f64> {
        match self {
            RatioMode::TrueDivision => record.false_alarm_ratio(),
            RatioMode::TruncatingInteger => record.truncated_false_alarm_ratio(),
        }
    }
}

// =============================================================================
// OPERATIONAL ALERTS
// =============================================================================

/// Severity of an operational alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

/// Side channel for faults the operator should see.
pub trait AlertSink: Send + Sync {
    fn send_alert(&self, severity: AlertSeverity, message: &str);
}

/// Alert sink that writes to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn send_alert(&self, severity: AlertSeverity, message: &str) {
        match severity {
            AlertSeverity::Info => tracing::info!("{}", message),
            AlertSeverity::Warning => tracing::warn!("{}", message),
            AlertSeverity::Error => error!("{}", message),
        }
    }
}

// =============================================================================
// RULES
// =============================================================================

struct Rule {
    name: &'static str,
    guard: fn(&EntityRecord, &ConditionEvent, RatioMode) -> bool,
    effect: fn(&mut EntityRecord, &ConditionEvent) -> Result<(), ClassificationError>,
}

fn is_moderate(event: &ConditionEvent) -> bool {
    event.condition() == Condition::Moderate
}

fn no_severe_history(record: &EntityRecord) -> bool {
    record.counters.severe_count == 0
}

fn moderate(record: &mut EntityRecord, event: &ConditionEvent, infrastructure: u8, controller: u8) -> Result<(), ClassificationError> {
    record.alert_level = AlertBaselines::MODERATE.raised(infrastructure, controller);
    bump(&mut record.counters.moderate_count, "moderate_count")?;
    record.condition = event.condition();
    Ok(())
}

const RULES: &[Rule] = &[
    Rule {
        name: "init",
        guard: |_, event, _| event.kind() == EventKind::Init,
        effect: |record, event| {
            if let Some(site) = &event.body.site {
                record.node_type = site.node_type.clone();
                record.region = site.region.clone();
                record.latitude = site.latitude;
                record.longitude = site.longitude;
            }
            record.condition = Condition::Normal;
            Ok(())
        },
    },
    Rule {
        name: "resolve",
        guard: |_, event, _| matches!(event.condition(), Condition::Offline | Condition::Normal),
        effect: |record, event| {
            if record.condition.is_sub_severe_incident() {
                bump(&mut record.counters.false_alarm_count, "false_alarm_count")?;
                bump(&mut record.counters.resolved_count, "resolved_count")?;
            } else if record.condition == Condition::Severe {
                bump(&mut record.counters.resolved_count, "resolved_count")?;
            }
            record.alert_level = AlertBaselines::NORMAL;
            record.condition = event.condition();
            Ok(())
        },
    },
    Rule {
        name: "minor",
        guard: |_, event, _| event.condition() == Condition::Minor,
        effect: |record, event| {
            record.alert_level = AlertBaselines::MINOR;
            bump(&mut record.counters.minor_count, "minor_count")?;
            record.condition = event.condition();
            Ok(())
        },
    },
    Rule {
        name: "severe",
        guard: |_, event, _| event.condition() == Condition::Severe,
        effect: |record, event| {
            record.alert_level = AlertBaselines::SEVERE;
            bump(&mut record.counters.severe_count, "severe_count")?;
            record.condition = event.condition();
            Ok(())
        },
    },
    Rule {
        name: "moderate_after_severe",
        guard: |record, event, _| is_moderate(event) && record.counters.severe_count > 0,
        effect: |record, event| moderate(record, event, 0, 2),
    },
    Rule {
        name: "moderate_clean_history",
        guard: |record, event, _| {
            is_moderate(event) && no_severe_history(record) && record.counters.false_alarm_count == 0
        },
        effect: |record, event| moderate(record, event, 1, 3),
    },
    Rule {
        name: "moderate_unreliable",
        guard: |record, event, mode| {
            is_moderate(event)
                && no_severe_history(record)
                && mode.ratio(record).is_some_and(|ratio| ratio >= FALSE_ALARM_THRESHOLD)
        },
        effect: |record, event| moderate(record, event, 2, 4),
    },
    Rule {
        name: "moderate_reliable",
        guard: |record, event, mode| {
            is_moderate(event)
                && no_severe_history(record)
                && mode.ratio(record).is_some_and(|ratio| ratio < FALSE_ALARM_THRESHOLD)
        },
        effect: |record, event| moderate(record, event, 3, 5),
    },
    // False alarms from minor incidents but no moderate yet: the ratio is
    // undefined, so rank it with the unreliable trackers.
    Rule {
        name: "moderate_unproven",
        guard: |record, event, _| is_moderate(event) && no_severe_history(record),
        effect: |record, event| moderate(record, event, 2, 4),
    },
];

// =============================================================================
// CLASSIFIER
// =============================================================================

/// Deterministic, stateless rule engine.
///
/// Holds no per-entity state and no locks, so one classifier can serve any
/// number of workers concurrently. Callers guarantee that a single record is
/// never classified by two workers at once.
#[derive(Clone)]
pub struct AlertClassifier {
    ratio_mode: RatioMode,
    alerts: Arc<dyn AlertSink>,
}

impl AlertClassifier {
    /// Creates a classifier that reports faults to the tracing log.
    pub fn new() -> Self {
        Self {
            ratio_mode: RatioMode::default(),
            alerts: Arc::new(TracingAlertSink),
        }
    }

    /// Sets how the false-alarm ratio is computed.
    pub fn with_ratio_mode(mut self, mode: RatioMode) -> Self {
        self.ratio_mode = mode;
        self
    }

    /// Routes classification faults to a custom sink.
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = sink;
        self
    }

    pub fn ratio_mode(&self) -> RatioMode {
        self.ratio_mode
    }

    /// Runs the rule table, returning the updated copy of the record.
    ///
    /// The input record is never touched, so a failure part-way through
    /// cannot leave a half-applied update behind.
    pub fn try_apply(
        &self,
        record: &EntityRecord,
        event: &ConditionEvent,
    ) -> Result<(EntityRecord, UpdateDirective), ClassificationError> {
        let mut updated = record.clone();

        let Some(rule) = RULES.iter().find(|rule| (rule.guard)(record, event, self.ratio_mode)) else {
            return Ok((updated, UpdateDirective::DoUpdate));
        };
        (rule.effect)(&mut updated, event)?;
        debug!("{}: rule {} -> {:?}", event.target, rule.name, updated.alert_level);

        if event.kind() == EventKind::Init {
            return Ok((updated, UpdateDirective::DoUpdate));
        }

        if event.condition().is_incident() {
            bump(&mut updated.counters.total_incidents, "total_incidents")?;
            updated.incident_history.push(event.body.clone());
        }

        Ok((updated, UpdateDirective::DoUpdate))
    }

    /// Classifies an event, isolating any fault to this entity.
    ///
    /// On failure an error alert is raised and the original record comes
    /// back unchanged with `NoUpdate`.
    pub fn apply(&self, record: &EntityRecord, event: &ConditionEvent) -> (EntityRecord, UpdateDirective) {
        match self.try_apply(record, event) {
            Ok(outcome) => outcome,
            Err(e) => self.isolate(&event.target, record, &e),
        }
    }

    /// Decodes a payload and classifies it, isolating any fault.
    pub fn apply_payload(
        &self,
        target: &EntityId,
        record: &EntityRecord,
        payload: &[u8],
    ) -> (EntityRecord, UpdateDirective) {
        match ConditionEvent::from_payload(target.clone(), payload) {
            Ok(event) => self.apply(record, &event),
            Err(e) => self.isolate(target, record, &ClassificationError::from(e)),
        }
    }

    /// Raises an operational alert for a fault on one entity.
    pub fn report(&self, target: &EntityId, error: &ClassificationError) {
        self.alerts.send_alert(
            AlertSeverity::Error,
            &format!("Exception thrown by id {}: {}", target, error),
        );
    }

    fn isolate(
        &self,
        target: &EntityId,
        record: &EntityRecord,
        error: &ClassificationError,
    ) -> (EntityRecord, UpdateDirective) {
        self.report(target, error);
        (record.clone(), UpdateDirective::NoUpdate)
    }
}

impl Default for AlertClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AlertClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertClassifier")
            .field("ratio_mode", &self.ratio_mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::AlertLevel;
    use crate::event::SiteInfo;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        alerts: Mutex<Vec<(AlertSeverity, String)>>,
    }

    impl AlertSink for RecordingSink {
        fn send_alert(&self, severity: AlertSeverity, message: &str) {
            self.alerts.lock().unwrap().push((severity, message.to_string()));
        }
    }

    fn id() -> EntityId {
        EntityId::new("98072")
    }

    fn init_event() -> ConditionEvent {
        ConditionEvent::init(
            id(),
            Condition::Severe,
            SiteInfo {
                node_type: "substation".to_string(),
                region: "WA".to_string(),
                latitude: 47.6,
                longitude: -122.1,
            },
        )
    }

    fn run(classifier: &AlertClassifier, record: EntityRecord, conditions: &[Condition]) -> EntityRecord {
        conditions.iter().fold(record, |record, condition| {
            classifier.apply(&record, &ConditionEvent::update(id(), *condition)).0
        })
    }

    #[test]
    fn test_init_sets_site_and_normal_condition() {
        let classifier = AlertClassifier::new();
        let (record, directive) = classifier.apply(&EntityRecord::new(), &init_event());

        assert_eq!(directive, UpdateDirective::DoUpdate);
        assert_eq!(record.node_type, "substation");
        assert_eq!(record.region, "WA");
        assert_eq!(record.latitude, 47.6);
        assert_eq!(record.condition, Condition::Normal);
        assert_eq!(record.counters.total_incidents, 0);
        assert!(record.incident_history.is_empty());
    }

    #[test]
    fn test_minor_then_offline_counts_false_alarm() {
        let classifier = AlertClassifier::new();
        let (record, _) = classifier.apply(&EntityRecord::new(), &init_event());
        let record = run(&classifier, record, &[Condition::Minor, Condition::Offline]);

        assert_eq!(record.counters.false_alarm_count, 1);
        assert_eq!(record.counters.resolved_count, 1);
        assert_eq!(record.counters.total_incidents, 1);
        assert_eq!(record.condition, Condition::Offline);
        assert_eq!(record.alert_level, AlertBaselines::NORMAL);
        assert_eq!(record.incident_history.len(), 1);
    }

    #[test]
    fn test_severe_resolution_is_not_a_false_alarm() {
        let classifier = AlertClassifier::new();
        let record = run(&classifier, EntityRecord::new(), &[Condition::Severe, Condition::Normal]);

        assert_eq!(record.counters.false_alarm_count, 0);
        assert_eq!(record.counters.resolved_count, 1);
        assert_eq!(record.counters.severe_count, 1);
    }

    #[test]
    fn test_moderate_tiers() {
        let classifier = AlertClassifier::new();

        let after_severe = run(&classifier, EntityRecord::new(), &[Condition::Severe, Condition::Moderate]);
        assert_eq!(after_severe.alert_level, AlertLevel::new(2, 4));

        let clean = run(&classifier, EntityRecord::new(), &[Condition::Moderate]);
        assert_eq!(clean.alert_level, AlertLevel::new(3, 5));

        let mut reliable = EntityRecord::new();
        reliable.counters.moderate_count = 3;
        reliable.counters.total_incidents = 3;
        reliable.counters.false_alarm_count = 1;
        let reliable = run(&classifier, reliable, &[Condition::Moderate]);
        assert_eq!(reliable.alert_level, AlertLevel::new(5, 7));
    }

    #[test]
    fn test_half_false_ratio_is_unreliable_tier() {
        let classifier = AlertClassifier::new();
        let mut record = EntityRecord::new();
        record.counters.moderate_count = 2;
        record.counters.total_incidents = 2;
        record.counters.false_alarm_count = 1;

        let (updated, _) = classifier.apply(&record, &ConditionEvent::update(id(), Condition::Moderate));

        assert_eq!(updated.alert_level, AlertBaselines::MODERATE.raised(2, 4));
        assert_eq!(updated.counters.moderate_count, 3);
        assert_eq!(updated.counters.total_incidents, 3);
    }

    #[test]
    fn test_truncating_ratio_mode_reads_half_as_zero() {
        let classifier = AlertClassifier::new().with_ratio_mode(RatioMode::TruncatingInteger);
        let mut record = EntityRecord::new();
        record.counters.moderate_count = 2;
        record.counters.total_incidents = 2;
        record.counters.false_alarm_count = 1;

        let (updated, _) = classifier.apply(&record, &ConditionEvent::update(id(), Condition::Moderate));

        assert_eq!(updated.alert_level, AlertBaselines::MODERATE.raised(3, 5));
    }

    #[test]
    fn test_moderate_with_only_minor_false_alarms() {
        let classifier = AlertClassifier::new();
        let record = run(
            &classifier,
            EntityRecord::new(),
            &[Condition::Minor, Condition::Normal, Condition::Moderate],
        );

        assert_eq!(record.alert_level, AlertBaselines::MODERATE.raised(2, 4));
        assert_eq!(record.counters.moderate_count, 1);
        assert!(record.counters.is_consistent());
    }

    #[test]
    fn test_malformed_payload_is_isolated() {
        let sink = Arc::new(RecordingSink::default());
        let classifier = AlertClassifier::new().with_alert_sink(sink.clone());
        let record = run(&classifier, EntityRecord::new(), &[Condition::Minor]);

        let (unchanged, directive) = classifier.apply_payload(&id(), &record, b"not json");

        assert_eq!(directive, UpdateDirective::NoUpdate);
        assert_eq!(unchanged, record);
        let alerts = sink.alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, AlertSeverity::Error);
        assert!(alerts[0].1.contains("98072"));
    }

    #[test]
    fn test_overflow_leaves_record_untouched() {
        let classifier = AlertClassifier::new().with_alert_sink(Arc::new(RecordingSink::default()));
        let mut record = EntityRecord::new();
        record.counters.minor_count = u64::MAX;

        let (unchanged, directive) = classifier.apply(&record, &ConditionEvent::update(id(), Condition::Minor));

        assert_eq!(directive, UpdateDirective::NoUpdate);
        assert_eq!(unchanged, record);
    }
}
