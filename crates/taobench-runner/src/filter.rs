//! `key@value__key@value` selection over generated configurations.
//!
//! Keys are field keys (`tag`, `num_clients`, `storage`, ...). A key the harness does
//! not know never matches, so a mistyped pattern selects nothing instead of failing.

use crate::experiment::{ExperimentConfig, Field, KEY_VALUE_SEPARATOR, PAIR_SEPARATOR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    constraints: Vec<(String, String)>,
}

impl Pattern {
    /// Empty input yields an empty pattern, which matches everything.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self {
                constraints: Vec::new(),
            };
        }
        let constraints = raw
            .split(PAIR_SEPARATOR)
            .map(|token| match token.split_once(KEY_VALUE_SEPARATOR) {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (token.to_string(), String::new()),
            })
            .collect();
        Self { constraints }
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn matches(&self, config: &ExperimentConfig) -> bool {
        self.constraints.iter().all(|(key, expected)| {
            Field::from_key(key)
                .and_then(|field| config.field_value(field))
                .is_some_and(|actual| actual == *expected)
        })
    }
}

/// Keeps configurations matching `pattern`, preserving order.
pub fn filter_configs(configs: Vec<ExperimentConfig>, pattern: Option<&str>) -> Vec<ExperimentConfig> {
    let pattern = match pattern {
        Some(raw) if !raw.is_empty() => Pattern::parse(raw),
        _ => return configs,
    };
    configs.into_iter().filter(|c| pattern.matches(c)).collect()
}
