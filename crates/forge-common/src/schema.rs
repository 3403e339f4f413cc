//! Target and argument schemas declared by integrations
//!
//! Job specs carry free-form argument maps and target lists. They stay
//! untyped until plan building, where they are checked against the
//! integration's schema here and coerced into typed JSON values. Nothing
//! downstream of [`ArgumentSchema::validate`] sees an unchecked argument.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// A named target slot an integration accepts (e.g. "docker-push")
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetSchema {
    /// Target name referenced by job specs
    pub name: String,
    /// Connection types that may be bound to this target; empty allows any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connection_types: Vec<String>,
    /// Whether a job must bind this target
    #[serde(default)]
    pub required: bool,
}

/// Scalar type an argument must coerce to
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// Any string
    String,
    /// Whole number
    Integer,
    /// Any number
    Number,
    /// `true` or `false`
    Boolean,
}

/// Constraints on a single named argument
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PropertySchema {
    /// Expected type; untyped arguments are passed through unchanged
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<PropertyType>,
    /// Allowed values, compared on the string form
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    /// Inclusive lower bound for numeric arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    /// Inclusive upper bound for numeric arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Free-text description shown to users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Schema for the named arguments map
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ArgumentSchema {
    /// Per-argument constraints
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertySchema>,
    /// Arguments that must be present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

/// Everything an integration declares about the inputs it accepts
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct IntegrationSchema {
    /// Target slots
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetSchema>,
    /// Named argument constraints
    #[serde(default)]
    pub arguments: ArgumentSchema,
}

/// A target binding after its connection has been resolved
#[derive(Clone, Debug, PartialEq)]
pub struct BoundTarget<'a> {
    /// Target slot name
    pub name: &'a str,
    /// Type of the connection bound to the slot
    pub connection_type: &'a str,
}

impl ArgumentSchema {
    /// Check `args` against the schema and coerce each value to its type.
    ///
    /// All violations are reported together so a user can fix a spec in one
    /// edit. Arguments without a declared type pass through unchanged.
    pub fn validate(
        &self,
        resource: &str,
        args: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>> {
        let mut problems = Vec::new();
        let mut typed = BTreeMap::new();

        for name in &self.required {
            if !args.contains_key(name) {
                problems.push(format!("missing required argument '{name}'"));
            }
        }

        for (name, raw) in args {
            let value = match self.properties.get(name) {
                Some(property) => match property.check(raw) {
                    Ok(v) => v,
                    Err(msg) => {
                        problems.push(format!("argument '{name}' {msg}"));
                        continue;
                    }
                },
                None => raw.clone(),
            };
            typed.insert(name.clone(), value);
        }

        if problems.is_empty() {
            Ok(typed)
        } else {
            Err(Error::validation_for_field(
                resource,
                "spec.arguments",
                problems.join("; "),
            ))
        }
    }
}

/// String form used for enum comparison and string coercion
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl PropertySchema {
    fn check(&self, raw: &Value) -> std::result::Result<Value, String> {
        if !self.allowed.is_empty() && !self.allowed.contains(&text(raw)) {
            return Err(format!("must be one of [{}]", self.allowed.join(", ")));
        }

        let value = match (self.kind, raw) {
            (None, _) => return Ok(raw.clone()),
            (Some(PropertyType::String), Value::Array(_) | Value::Object(_)) => {
                return Err("must be a string".to_string());
            }
            (Some(PropertyType::String), _) => return Ok(Value::String(text(raw))),
            (Some(PropertyType::Boolean), Value::Bool(b)) => return Ok(Value::Bool(*b)),
            (Some(PropertyType::Boolean), Value::String(s)) => {
                return s
                    .parse::<bool>()
                    .map(Value::Bool)
                    .map_err(|_| "must be a boolean".to_string());
            }
            (Some(PropertyType::Boolean), _) => return Err("must be a boolean".to_string()),
            (Some(PropertyType::Integer), Value::Number(n)) => n
                .as_i64()
                .map(Value::from)
                .ok_or_else(|| "must be an integer".to_string())?,
            (Some(PropertyType::Integer), Value::String(s)) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| "must be an integer".to_string())?,
            (Some(PropertyType::Integer), _) => return Err("must be an integer".to_string()),
            (Some(PropertyType::Number), Value::Number(n)) => Value::Number(n.clone()),
            (Some(PropertyType::Number), Value::String(s)) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| "must be a number".to_string())?,
            (Some(PropertyType::Number), _) => return Err("must be a number".to_string()),
        };

        let n = value.as_f64().unwrap_or_default();
        if let Some(min) = self.minimum {
            if n < min {
                return Err(format!("must be >= {min}"));
            }
        }
        if let Some(max) = self.maximum {
            if n > max {
                return Err(format!("must be <= {max}"));
            }
        }
        Ok(value)
    }
}

impl IntegrationSchema {
    /// Check bound targets against the declared target slots.
    ///
    /// An integration that declares no targets accepts any binding.
    pub fn validate_targets(&self, resource: &str, bound: &[BoundTarget<'_>]) -> Result<()> {
        if self.targets.is_empty() {
            return Ok(());
        }

        let mut problems = Vec::new();

        for slot in self.targets.iter().filter(|t| t.required) {
            if !bound.iter().any(|b| b.name == slot.name) {
                problems.push(format!("missing required target '{}'", slot.name));
            }
        }

        for binding in bound {
            match self.targets.iter().find(|t| t.name == binding.name) {
                None => problems.push(format!("unknown target '{}'", binding.name)),
                Some(slot)
                    if !slot.connection_types.is_empty()
                        && !slot
                            .connection_types
                            .iter()
                            .any(|t| t == binding.connection_type) =>
                {
                    problems.push(format!(
                        "target '{}' does not accept connection type '{}' (allowed: {})",
                        binding.name,
                        binding.connection_type,
                        slot.connection_types.join(", ")
                    ));
                }
                Some(_) => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::validation_for_field(
                resource,
                "spec.targets",
                problems.join("; "),
            ))
        }
    }
}
