//! Property tests for the operator command parser.

use geotrack_sim::Command;
use proptest::prelude::*;

proptest! {
    #[test]
    fn property_parse_never_panics(line in ".{0,64}") {
        let _ = Command::parse(&line);
    }

    #[test]
    fn property_attack_id_round_trips(id in "[0-9]{5}", padding in " {0,3}") {
        let line = format!("{}attack{}--id {}{}", padding, " ".repeat(padding.len() + 1), id, padding);
        prop_assert_eq!(Command::parse(&line), Command::Attack(id));
    }

    #[test]
    fn property_unknown_words_are_reported(word in "[a-z]{2,10}") {
        prop_assume!(!["help", "attack", "exit", "quit"].contains(&word.as_str()));
        prop_assert_eq!(Command::parse(&word), Command::Unknown(word.clone()));
    }
}
