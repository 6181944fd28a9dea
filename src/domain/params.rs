//! Schema-free parameter trees
//!
//! Indicator settings and entry/exit/risk rules are free-form. A tree is
//! either a flat numeric map (the common case) or an arbitrary JSON value.
//! Sections declare the keys they require; consumers read individual keys
//! lazily.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A parameter tree: recognized flat numeric shape or raw structured value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamTree {
    Numeric(BTreeMap<String, f64>),
    Raw(Value),
}

impl Default for ParamTree {
    fn default() -> Self {
        ParamTree::Numeric(BTreeMap::new())
    }
}

impl ParamTree {
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or(ParamTree::Raw(value))
    }

    pub fn to_value(&self) -> Value {
        match self {
            ParamTree::Numeric(map) => serde_json::json!(map),
            ParamTree::Raw(v) => v.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ParamTree::Numeric(map) => map.is_empty(),
            ParamTree::Raw(Value::Null) => true,
            ParamTree::Raw(Value::Object(map)) => map.is_empty(),
            ParamTree::Raw(_) => false,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, ParamTree::Numeric(_) | ParamTree::Raw(Value::Object(_)))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        match self {
            ParamTree::Numeric(map) => map.contains_key(key),
            ParamTree::Raw(Value::Object(map)) => map.contains_key(key),
            ParamTree::Raw(_) => false,
        }
    }

    /// Numeric value at `key`, if present and numeric
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self {
            ParamTree::Numeric(map) => map.get(key).copied(),
            ParamTree::Raw(Value::Object(map)) => map.get(key).and_then(Value::as_f64),
            ParamTree::Raw(_) => None,
        }
    }

    /// Return a copy with `key` set to `value`
    pub fn with_number(&self, key: &str, value: f64) -> ParamTree {
        match self {
            ParamTree::Numeric(map) => {
                let mut map = map.clone();
                map.insert(key.to_string(), value);
                ParamTree::Numeric(map)
            }
            ParamTree::Raw(Value::Object(map)) => {
                let mut map = map.clone();
                map.insert(key.to_string(), serde_json::json!(value));
                ParamTree::Raw(Value::Object(map))
            }
            ParamTree::Raw(_) => {
                let mut map = BTreeMap::new();
                map.insert(key.to_string(), value);
                ParamTree::Numeric(map)
            }
        }
    }

    fn entries(&self) -> Vec<(String, Value)> {
        match self {
            ParamTree::Numeric(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::json!(v)))
                .collect(),
            ParamTree::Raw(Value::Object(map)) => {
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            ParamTree::Raw(_) => Vec::new(),
        }
    }
}

/// Which part of a configuration a tree belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSection {
    Indicators,
    EntryRules,
    ExitRules,
    RiskManagement,
}

impl fmt::Display for ParamSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamSection::Indicators => write!(f, "indicators"),
            ParamSection::EntryRules => write!(f, "entry_rules"),
            ParamSection::ExitRules => write!(f, "exit_rules"),
            ParamSection::RiskManagement => write!(f, "risk_management"),
        }
    }
}

pub const EXIT_KEYS: [&str; 3] = ["take_profit_pct", "stop_loss_pct", "trailing_stop_pct"];

impl ParamSection {
    /// Check required sub-keys for this section, collecting every problem
    pub fn validate(&self, tree: &ParamTree) -> Vec<String> {
        let mut errors = Vec::new();

        if tree.is_empty() {
            return errors;
        }
        if !tree.is_object() {
            errors.push(format!("{self} must be an object"));
            return errors;
        }

        match self {
            ParamSection::Indicators => {
                for (name, value) in tree.entries() {
                    if !(value.is_object() || value.is_number()) {
                        errors.push(format!(
                            "indicators.{name} must be an object of settings or a number"
                        ));
                    }
                }
            }
            ParamSection::EntryRules => {
                if tree.contains_key("min_signal_strength") {
                    match tree.get_f64("min_signal_strength") {
                        Some(v) if (0.0..=1.0).contains(&v) => {}
                        _ => errors.push(
                            "entry_rules.min_signal_strength must be a number in [0, 1]"
                                .to_string(),
                        ),
                    }
                }
            }
            ParamSection::ExitRules => {
                let present: Vec<&str> = EXIT_KEYS
                    .iter()
                    .copied()
                    .filter(|k| tree.contains_key(k))
                    .collect();
                if present.is_empty() {
                    errors.push(format!(
                        "exit_rules requires at least one of {}",
                        EXIT_KEYS.join(", ")
                    ));
                }
                for key in present {
                    if tree.get_f64(key).is_none() {
                        errors.push(format!("exit_rules.{key} must be numeric"));
                    }
                }
            }
            ParamSection::RiskManagement => {
                match tree.get_f64("position_size_pct") {
                    Some(v) if v > 0.0 && v <= 100.0 => {}
                    Some(_) => errors
                        .push("risk_management.position_size_pct must be in (0, 100]".to_string()),
                    None => errors.push(
                        "risk_management.position_size_pct is required and must be numeric"
                            .to_string(),
                    ),
                }
                match tree.get_f64("stop_loss_pct") {
                    Some(v) if v >= 0.0 => {}
                    Some(_) => {
                        errors.push("risk_management.stop_loss_pct must be >= 0".to_string())
                    }
                    None => errors.push(
                        "risk_management.stop_loss_pct is required and must be numeric"
                            .to_string(),
                    ),
                }
            }
        }

        errors
    }
}
