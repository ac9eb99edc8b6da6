//! Operator control surface: line commands typed while the load generator runs.

use tracing::warn;

/// Trackers attacked by a bare `attack` command.
pub const DEFAULT_ATTACK_IDS: [&str; 18] = [
    "98072", "98073", "98074", "98075", "98082", "98367", "10122", "10124", "10125", "10131",
    "10132", "10133", "33109", "33102", "33101", "33110", "33111", "33114",
];

pub const PROMPT: &str = "geotrack> ";

pub const HELP_TEXT: &str = "Commands:\nhelp\nattack\nattack --id <zip_code>\nexit\n";

/// Raises a population smaller than the default target list.
///
/// Returns the tracker count and rate to use: at least every default target,
/// and half the target count per second when the population was raised.
pub fn clamp_population(num_trackers: usize, msgs_per_second: usize) -> (usize, usize) {
    if num_trackers >= DEFAULT_ATTACK_IDS.len() {
        return (num_trackers, msgs_per_second);
    }
    warn!(
        "Required at least {} trackers; using {}",
        DEFAULT_ATTACK_IDS.len(),
        DEFAULT_ATTACK_IDS.len()
    );
    warn!("Throttling to {} msg/second", DEFAULT_ATTACK_IDS.len() / 2);
    (DEFAULT_ATTACK_IDS.len(), DEFAULT_ATTACK_IDS.len() / 2)
}

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// Attack every default target
    AttackDefaults,
    /// Attack one tracker
    Attack(String),
    Quit,
    /// Blank line
    Empty,
    Unknown(String),
}

impl Command {
    /// Parses one input line.
    ///
    /// `attack` without a usable `--id <id>` pair falls back to the default
    /// targets.
    pub fn parse(line: &str) -> Command {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&cmd, args)) = words.split_first() else {
            return Command::Empty;
        };

        match cmd {
            "exit" | "quit" | "q" => Command::Quit,
            "help" => Command::Help,
            "attack" => match args.iter().position(|&arg| arg == "--id") {
                Some(idx) if idx + 1 < args.len() => Command::Attack(args[idx + 1].to_string()),
                _ => Command::AttackDefaults,
            },
            _ => Command::Unknown(cmd.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("help"), Command::Help);
        assert_eq!(Command::parse("  quit "), Command::Quit);
        assert_eq!(Command::parse("q"), Command::Quit);
        assert_eq!(Command::parse("exit"), Command::Quit);
        assert_eq!(Command::parse(""), Command::Empty);
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(Command::parse("launch"), Command::Unknown("launch".to_string()));
    }

    #[test]
    fn test_parse_attack_forms() {
        assert_eq!(Command::parse("attack"), Command::AttackDefaults);
        assert_eq!(Command::parse("attack --id 98072"), Command::Attack("98072".to_string()));
        assert_eq!(Command::parse("attack now --id 10122"), Command::Attack("10122".to_string()));
        // dangling flag
        assert_eq!(Command::parse("attack --id"), Command::AttackDefaults);
    }

    #[test]
    fn test_small_population_is_raised_and_throttled() {
        assert_eq!(clamp_population(5, 1000), (18, 9));
        assert_eq!(clamp_population(18, 1000), (18, 1000));
        assert_eq!(clamp_population(2000, 1000), (2000, 1000));
    }

    #[test]
    fn test_default_targets_are_unique() {
        let mut ids = DEFAULT_ATTACK_IDS.to_vec();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), DEFAULT_ATTACK_IDS.len());
    }
}
