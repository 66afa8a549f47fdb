//! Safe expression language for edge conditions: typed comparisons over the
//! execution's `serde_json::Value` state, combined with `All`/`Any`/`Not`.
//! No arbitrary code ever runs as a condition.
//!
//! Generalized from `orchestrator::router::evaluator::RuleEvaluator`, which
//! matched free text against regex/keyword/context-key rules for routing an
//! inbound message. Here the subject is graph state instead of input text,
//! so `Check` compares a JSON-pointer path against a literal instead of
//! matching a string, but the `All`/`Any`/`Not` combinator shape and the
//! "evaluate to bool, never execute" contract carry over unchanged.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("path '{0}' not found in state")]
    PathNotFound(String),
    #[error("cannot compare {0} to {1}")]
    Incomparable(String, String),
}

/// A single leaf comparison against a JSON-pointer path into graph state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Check {
    Exists { path: String },
    Equals { path: String, value: Value },
    NotEquals { path: String, value: Value },
    GreaterThan { path: String, value: f64 },
    LessThan { path: String, value: f64 },
    Contains { path: String, value: String },
}

/// A tree of checks combined with boolean connectives.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Single(Check),
    All { all: Vec<Condition> },
    Any { any: Vec<Condition> },
    Not { not: Box<Condition> },
}

pub struct Evaluator;

impl Evaluator {
    pub fn evaluate(condition: &Condition, state: &HashMap<String, Value>) -> Result<bool, ExprError> {
        match condition {
            Condition::Single(check) => Self::evaluate_check(check, state),
            Condition::All { all } => {
                for c in all {
                    if !Self::evaluate(c, state)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any { any } => {
                for c in any {
                    if Self::evaluate(c, state)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Not { not } => Ok(!Self::evaluate(not, state)?),
        }
    }

    fn lookup<'a>(state: &'a HashMap<String, Value>, path: &str) -> Option<&'a Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        let mut current = state.get(root)?;
        for segment in segments {
            current = current.get(segment)?;
        }
        Some(current)
    }

    fn evaluate_check(check: &Check, state: &HashMap<String, Value>) -> Result<bool, ExprError> {
        match check {
            Check::Exists { path } => Ok(Self::lookup(state, path).is_some()),
            Check::Equals { path, value } => {
                Ok(Self::lookup(state, path).map(|v| v == value).unwrap_or(false))
            }
            Check::NotEquals { path, value } => {
                Ok(Self::lookup(state, path).map(|v| v != value).unwrap_or(true))
            }
            Check::GreaterThan { path, value } => {
                let found = Self::lookup(state, path).ok_or_else(|| ExprError::PathNotFound(path.clone()))?;
                let n = found
                    .as_f64()
                    .ok_or_else(|| ExprError::Incomparable(found.to_string(), value.to_string()))?;
                Ok(n > *value)
            }
            Check::LessThan { path, value } => {
                let found = Self::lookup(state, path).ok_or_else(|| ExprError::PathNotFound(path.clone()))?;
                let n = found
                    .as_f64()
                    .ok_or_else(|| ExprError::Incomparable(found.to_string(), value.to_string()))?;
                Ok(n < *value)
            }
            Check::Contains { path, value } => {
                let found = Self::lookup(state, path).ok_or_else(|| ExprError::PathNotFound(path.clone()))?;
                Ok(found.as_str().map(|s| s.contains(value.as_str())).unwrap_or(false))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> HashMap<String, Value> {
        HashMap::from([
            ("score".to_string(), json!(7)),
            ("status".to_string(), json!("ok")),
            ("nested".to_string(), json!({"flag": true})),
        ])
    }

    #[test]
    fn single_check() {
        let cond = Condition::Single(Check::GreaterThan { path: "score".into(), value: 5.0 });
        assert!(Evaluator::evaluate(&cond, &state()).unwrap());
    }

    #[test]
    fn all_requires_every_branch() {
        let cond = Condition::All {
            all: vec![
                Condition::Single(Check::Equals { path: "status".into(), value: json!("ok") }),
                Condition::Single(Check::GreaterThan { path: "score".into(), value: 10.0 }),
            ],
        };
        assert!(!Evaluator::evaluate(&cond, &state()).unwrap());
    }

    #[test]
    fn not_inverts() {
        let cond = Condition::Not {
            not: Box::new(Condition::Single(Check::Exists { path: "missing".into() })),
        };
        assert!(Evaluator::evaluate(&cond, &state()).unwrap());
    }

    #[test]
    fn nested_path_lookup() {
        let cond = Condition::Single(Check::Equals { path: "nested.flag".into(), value: json!(true) });
        assert!(Evaluator::evaluate(&cond, &state()).unwrap());
    }
}
