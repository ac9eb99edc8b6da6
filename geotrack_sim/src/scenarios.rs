//! Load scenarios for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Random transitions only, lossless delivery
    Steady,

    /// Two attack waves over the default targets, one re-attack mid-wave
    AttackWave,

    /// 30% payload loss, late deliveries and unreachable trackers
    LossyNetwork,

    /// Small population hammered far above its size
    HotSpot,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Steady,
            ScenarioId::AttackWave,
            ScenarioId::LossyNetwork,
            ScenarioId::HotSpot,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "steady",
            ScenarioId::AttackWave => "attack_wave",
            ScenarioId::LossyNetwork => "lossy_network",
            ScenarioId::HotSpot => "hot_spot",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "500 trackers at 100 msg/s, no faults",
            ScenarioId::AttackWave => "Default targets attacked twice, re-attack resets the timer",
            ScenarioId::LossyNetwork => "30% loss, 10% late deliveries, 5 unreachable trackers",
            ScenarioId::HotSpot => "20 trackers at 200 msg/s, per-tracker ordering under load",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady" => Ok(ScenarioId::Steady),
            "attack_wave" | "attackwave" => Ok(ScenarioId::AttackWave),
            "lossy_network" | "lossynetwork" | "lossy" => Ok(ScenarioId::LossyNetwork),
            "hot_spot" | "hotspot" => Ok(ScenarioId::HotSpot),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert_eq!("HotSpot".parse::<ScenarioId>(), Ok(ScenarioId::HotSpot));
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
