//! Backend parameter schemas and validated run configurations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ValidationError;

/// A parameter value as supplied by a caller or stored in a [`RunConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    IntList(Vec<i64>),
    Null,
}

impl ParamValue {
    fn type_name(&self) -> String {
        match self {
            Self::Bool(b) => format!("bool {}", b),
            Self::Int(i) => format!("int {}", i),
            Self::Float(f) => format!("float {}", f),
            Self::Text(s) => format!("string '{}'", s),
            Self::IntList(_) => "list".to_string(),
            Self::Null => "null".to_string(),
        }
    }
}

/// Declared type and valid range of a parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    Bool,
    Int { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Choice(&'static [&'static str]),
    IntList,
    /// Integer that may be left unset
    OptionalInt { min: i64, max: i64 },
}

impl ParamKind {
    fn expected(&self) -> &'static str {
        match self {
            Self::Bool => "a boolean",
            Self::Int { .. } => "an integer",
            Self::Float { .. } => "a number",
            Self::Choice(_) => "a string",
            Self::IntList => "a list of integers",
            Self::OptionalInt { .. } => "an integer or null",
        }
    }
}

/// Compile-time default of a parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
    EmptyList,
    Unset,
}

impl ParamDefault {
    pub fn to_value(self) -> ParamValue {
        match self {
            Self::Bool(b) => ParamValue::Bool(b),
            Self::Int(i) => ParamValue::Int(i),
            Self::Float(f) => ParamValue::Float(f),
            Self::Text(s) => ParamValue::Text(s.to_string()),
            Self::EmptyList => ParamValue::IntList(Vec::new()),
            Self::Unset => ParamValue::Null,
        }
    }
}

/// One entry of a backend's parameter schema
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub default: ParamDefault,
    pub documentation: &'static str,
}

impl ParamSpec {
    /// Check one value against this spec, returning it in canonical form
    /// (integers given for float parameters become floats).
    pub fn check(&self, value: &ParamValue) -> Result<ParamValue, ValidationError> {
        let mismatch = || ValidationError::TypeMismatch {
            name: self.name.to_string(),
            expected: self.kind.expected(),
            found: value.type_name(),
        };
        let out_of_range = |v: f64, min: f64, max: f64| ValidationError::OutOfRange {
            name: self.name.to_string(),
            value: v,
            min,
            max,
        };
        let float_in_range = |v: f64, min: f64, max: f64| {
            if !v.is_finite() || v < min || v > max {
                Err(out_of_range(v, min, max))
            } else {
                Ok(ParamValue::Float(v))
            }
        };

        match (self.kind, value) {
            (ParamKind::Bool, ParamValue::Bool(_)) => Ok(value.clone()),
            (ParamKind::Int { min, max }, ParamValue::Int(i))
            | (ParamKind::OptionalInt { min, max }, ParamValue::Int(i)) => {
                if *i < min || *i > max {
                    Err(out_of_range(*i as f64, min as f64, max as f64))
                } else {
                    Ok(value.clone())
                }
            }
            (ParamKind::OptionalInt { .. }, ParamValue::Null) => Ok(ParamValue::Null),
            (ParamKind::Float { min, max }, ParamValue::Int(i)) => {
                float_in_range(*i as f64, min, max)
            }
            (ParamKind::Float { min, max }, ParamValue::Float(f)) => float_in_range(*f, min, max),
            (ParamKind::Choice(choices), ParamValue::Text(s)) => {
                if choices.contains(&s.as_str()) {
                    Ok(value.clone())
                } else {
                    Err(ValidationError::InvalidChoice {
                        name: self.name.to_string(),
                        value: s.clone(),
                        choices,
                    })
                }
            }
            (ParamKind::IntList, ParamValue::IntList(_)) => Ok(value.clone()),
            _ => Err(mismatch()),
        }
    }
}

/// Caller-supplied parameter overrides, before validation
pub type ParamOverrides = BTreeMap<String, ParamValue>;

/// Complete, validated parameter set for one invocation
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct RunConfig(BTreeMap<String, ParamValue>);

impl RunConfig {
    /// Defaults of every parameter in `schema`
    pub fn defaults(schema: &[ParamSpec]) -> Self {
        Self(
            schema
                .iter()
                .map(|p| (p.name.to_string(), p.default.to_value()))
                .collect(),
        )
    }

    /// Validate `overrides` against `schema` and fill in defaults.
    pub fn validated(
        backend: &str,
        schema: &[ParamSpec],
        overrides: &ParamOverrides,
    ) -> Result<Self, ValidationError> {
        let mut config = Self::defaults(schema);
        for (name, value) in overrides {
            let spec = schema.iter().find(|p| p.name == name).ok_or_else(|| {
                ValidationError::UnknownParameter {
                    backend: backend.to_string(),
                    name: name.clone(),
                }
            })?;
            config.0.insert(name.clone(), spec.check(value)?);
        }
        Ok(config)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.0.get(name)? {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.0.get(name)? {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.0.get(name)? {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse overrides from a JSON object such as `{"detect_threshold": 4.5}`.
pub fn overrides_from_json(value: &serde_json::Value) -> Result<ParamOverrides, String> {
    serde_json::from_value(value.clone())
        .map_err(|e| format!("parameters must be a JSON object of scalars or integer lists: {}", e))
}
