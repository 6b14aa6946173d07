//! Trigger matching: prefix-at-word-boundary over Unicode word tokens.
//!
//! A trigger fires when its tokenized phrase is a leading token sequence
//! of the tokenized message. Matching on whole tokens keeps "hi" from
//! firing inside "history".

use std::sync::LazyLock;

use regex::Regex;
use shade_core::TriggerRule;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("static pattern"));

/// Lowercase `text` and extract its runs of word characters.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD.find_iter(&lowered)
        .map(|m| m.as_str().to_owned())
        .collect()
}

/// The first active rule (insertion order) whose phrase tokens lead the
/// message tokens.
#[must_use]
pub fn first_match<'a>(rules: &'a [TriggerRule], text: &str) -> Option<&'a TriggerRule> {
    let message_tokens = tokenize(text);
    if message_tokens.is_empty() {
        return None;
    }

    rules.iter().filter(|rule| rule.active).find(|rule| {
        let phrase_tokens = tokenize(&rule.phrase);
        !phrase_tokens.is_empty() && message_tokens.starts_with(&phrase_tokens)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shade_test::fixtures::trigger;

    #[test]
    fn tokenize_lowercases_and_splits() {
        assert_eq!(tokenize("Hi Bro!"), ["hi", "bro"]);
        assert_eq!(tokenize("  salom,   dunyo  "), ["salom", "dunyo"]);
        assert_eq!(tokenize("under_score stays"), ["under_score", "stays"]);
    }

    #[test]
    fn tokenize_degenerate_inputs() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \t\n ").is_empty());
        assert!(tokenize("?!... ---").is_empty());
    }

    #[test]
    fn first_matching_rule_wins_in_insertion_order() {
        let rules = vec![trigger(1, "hi", "hello"), trigger(2, "hi bro", "hey bro")];

        // "hi" already matches as a prefix, so the longer rule never runs.
        let hit = first_match(&rules, "hi bro, long time").unwrap();
        assert_eq!(hit.id, 1);
    }

    #[test]
    fn prefix_inside_a_longer_word_does_not_fire() {
        let rules = vec![trigger(1, "hi", "hello"), trigger(2, "hi bro", "hey bro")];
        assert!(first_match(&rules, "history rhymes").is_none());
        assert!(first_match(&rules, "this is fine").is_none());
    }

    #[test]
    fn case_and_trailing_punctuation_are_ignored() {
        let rules = vec![trigger(1, "hi", "hello")];
        assert!(first_match(&rules, "Hi Bro!").is_some());
        assert!(first_match(&rules, "HI.").is_some());
    }

    #[test]
    fn match_must_start_at_the_first_token() {
        let rules = vec![trigger(1, "hi", "hello")];
        assert!(first_match(&rules, "oh hi there").is_none());
    }

    #[test]
    fn multi_token_phrase_matches_as_a_leading_sequence() {
        let rules = vec![trigger(1, "hi bro", "hey bro")];
        assert!(first_match(&rules, "hi bro, long time").is_some());
        assert!(first_match(&rules, "hi brother").is_none());
        assert!(first_match(&rules, "hi").is_none());
    }

    #[test]
    fn inactive_rules_never_fire() {
        let mut rule = trigger(1, "hi", "hello");
        rule.active = false;
        assert!(first_match(&[rule], "hi there").is_none());
    }

    #[test]
    fn empty_message_matches_nothing() {
        let rules = vec![trigger(1, "hi", "hello")];
        for text in ["", "   ", "?!..."] {
            assert!(first_match(&rules, text).is_none());
        }
    }

    #[test]
    fn unicode_words_match() {
        let rules = vec![trigger(1, "привет", "здравствуй")];
        assert!(first_match(&rules, "Привет, как дела?").is_some());
        assert!(first_match(&rules, "приветствие").is_none());
    }
}
