//! Branch conditions evaluated against an input bag

use crate::core::context::{number_field, DataMap};
use regex::Regex;
use std::sync::OnceLock;

/// A parsed `<field> <op> <value>` comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field >= threshold`
    AtLeast { field: String, threshold: f64 },
    /// Any other expression; always holds
    Unsupported(String),
}

fn comparison_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^(.*?)>=(.*)$").expect("comparison regex is valid"))
}

impl Condition {
    /// Parse a condition string. Only `<field> >= <number>` is evaluated;
    /// the field is whatever precedes the single `>=`, trimmed. Anything
    /// else is kept as unsupported and evaluates to true.
    pub fn parse(expr: &str) -> Self {
        let Some(caps) = comparison_regex().captures(expr) else {
            return Condition::Unsupported(expr.to_string());
        };

        if caps[2].contains(">=") {
            return Condition::Unsupported(expr.to_string());
        }

        Condition::AtLeast {
            field: caps[1].trim().to_string(),
            threshold: caps[2].trim().parse().unwrap_or(0.0),
        }
    }

    /// Evaluate against an input bag. A missing field is false; a field
    /// that isn't a number leaves the condition true.
    pub fn evaluate(&self, input: &DataMap) -> bool {
        match self {
            Condition::AtLeast { field, threshold } => {
                if !input.contains_key(field) {
                    return false;
                }
                match number_field(input, field) {
                    Some(value) => value >= *threshold,
                    None => true,
                }
            }
            Condition::Unsupported(_) => true,
        }
    }
}
