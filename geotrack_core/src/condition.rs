//! Raw tracker conditions and the derived two-tier alert level.

use serde::{Deserialize, Serialize};

/// Raw simulated physical state of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Offline,
    Normal,
    Minor,
    Moderate,
    Severe,
}

impl Condition {
    /// Returns true for the conditions counted as incidents.
    pub fn is_incident(&self) -> bool {
        matches!(self, Condition::Minor | Condition::Moderate | Condition::Severe)
    }

    /// Returns true for Minor and Moderate, the incidents that can later
    /// turn out to be false alarms.
    pub fn is_sub_severe_incident(&self) -> bool {
        matches!(self, Condition::Minor | Condition::Moderate)
    }

    /// Returns the lowercase name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Condition::Offline => "offline",
            Condition::Normal => "normal",
            Condition::Minor => "minor",
            Condition::Moderate => "moderate",
            Condition::Severe => "severe",
        }
    }

    /// Maps a population-file status colour to a condition.
    ///
    /// Condition names are accepted as well, so hand-written files can use
    /// either form.
    pub fn from_status_color(status: &str) -> Option<Condition> {
        match status.trim().to_lowercase().as_str() {
            "green" | "normal" => Some(Condition::Normal),
            "yellow" | "minor" => Some(Condition::Minor),
            "orange" | "moderate" => Some(Condition::Moderate),
            "red" | "severe" => Some(Condition::Severe),
            "gray" | "grey" | "black" | "offline" => Some(Condition::Offline),
            _ => None,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::from_status_color(s).ok_or_else(|| format!("Unknown condition: {}", s))
    }
}

/// Derived severity score, one value per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertLevel {
    /// Infrastructure tier
    pub infrastructure: u8,

    /// Controller tier
    pub controller: u8,
}

impl AlertLevel {
    pub const fn new(infrastructure: u8, controller: u8) -> Self {
        Self {
            infrastructure,
            controller,
        }
    }

    /// Raises both tiers by the given offsets.
    pub const fn raised(self, infrastructure: u8, controller: u8) -> Self {
        Self {
            infrastructure: self.infrastructure + infrastructure,
            controller: self.controller + controller,
        }
    }
}

// =============================================================================
// BASELINES
// =============================================================================

/// Alert baselines for each condition.
pub struct AlertBaselines;

impl AlertBaselines {
    pub const NORMAL: AlertLevel = AlertLevel::new(0, 0);
    pub const MINOR: AlertLevel = AlertLevel::new(1, 1);
    pub const MODERATE: AlertLevel = AlertLevel::new(2, 2);
    pub const SEVERE: AlertLevel = AlertLevel::new(6, 8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_color_mapping() {
        assert_eq!(Condition::from_status_color("Green"), Some(Condition::Normal));
        assert_eq!(Condition::from_status_color(" red "), Some(Condition::Severe));
        assert_eq!(Condition::from_status_color("grey"), Some(Condition::Offline));
        assert_eq!(Condition::from_status_color("moderate"), Some(Condition::Moderate));
        assert_eq!(Condition::from_status_color("purple"), None);
    }

    #[test]
    fn test_incident_classes() {
        assert!(!Condition::Offline.is_incident());
        assert!(!Condition::Normal.is_incident());
        assert!(Condition::Minor.is_sub_severe_incident());
        assert!(Condition::Severe.is_incident());
        assert!(!Condition::Severe.is_sub_severe_incident());
    }

    #[test]
    fn test_highest_moderate_tier_stays_below_severe() {
        let top = AlertBaselines::MODERATE.raised(3, 5);
        assert!(top.infrastructure < AlertBaselines::SEVERE.infrastructure);
        assert!(top.controller < AlertBaselines::SEVERE.controller);
    }
}
