//! The fully-resolved configuration record handed to every task.

use indexmap::IndexMap;
use serde::Serialize;
use serde_yaml::Value;

use super::merge::resolve_path;
use crate::error::{Error, MissingKey, Result};

/// Keys every remote configuration needs before anything runs against it.
pub const CONNECTION_KEYS: &[&str] = &["host", "user", "port"];

/// A set of keys one capability (or section) requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Capability or section name reported with missing keys
    pub section: String,
    /// Slash-separated key paths
    pub keys: Vec<String>,
}

impl Requirement {
    /// Creates a requirement for a section.
    pub fn new<I, S>(section: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            section: section.into(),
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

/// One resolved host configuration.
///
/// Records are built fresh for each invocation and never mutated in place
/// afterwards; the `with_*` methods return modified copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigRecord {
    name: String,
    values: IndexMap<String, Value>,
}

impl ConfigRecord {
    /// Creates a record from already-merged values.
    pub fn new(name: impl Into<String>, values: IndexMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Name of the host configuration this record was resolved from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All resolved values in layer order.
    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    /// Raw value for a slash-separated key path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        resolve_path(&self.values, path)
    }

    /// True if the key path is present and not null.
    pub fn contains(&self, path: &str) -> bool {
        !matches!(self.get(path), None | Some(Value::Null))
    }

    /// Scalar value rendered as a string; numbers and booleans are stringified.
    pub fn get_string(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Scalar value that must be present.
    pub fn require(&self, path: &str) -> Result<String> {
        self.get_string(path).ok_or_else(|| Error::Validation {
            config: self.name.clone(),
            missing: vec![MissingKey::new(path)],
        })
    }

    /// A port number that must be present.
    pub fn require_u16(&self, path: &str) -> Result<u16> {
        match self.get_u16(path)? {
            Some(port) => Ok(port),
            None => Err(Error::Validation {
                config: self.name.clone(),
                missing: vec![MissingKey::new(path)],
            }),
        }
    }

    /// Boolean flag; absent keys read as `false`.
    pub fn get_bool(&self, path: &str) -> bool {
        match self.get(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
            Some(Value::String(s)) => {
                matches!(s.to_lowercase().as_str(), "true" | "yes" | "1" | "on")
            }
            _ => false,
        }
    }

    /// Port-like numeric value.
    pub fn get_u16(&self, path: &str) -> Result<Option<u16>> {
        match self.get(path) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| u16::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| Error::invalid_config(path, "must be a port number")),
            Some(Value::String(s)) => s
                .parse()
                .map(Some)
                .map_err(|_| Error::invalid_config(path, "must be a port number")),
            Some(_) => Err(Error::invalid_config(path, "must be a port number")),
        }
    }

    /// Sequence of scalars; a single scalar is treated as a one-element list.
    pub fn get_list(&self, path: &str) -> Vec<String> {
        match self.get(path) {
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    Value::Bool(b) => Some(b.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Declared environment type (`dev`, `stage`, `prod`).
    pub fn config_type(&self) -> String {
        self.get_string("type")
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Capabilities this host needs, in declaration order.
    pub fn needs(&self) -> Vec<String> {
        self.get_list("needs")
    }

    /// True when commands run on the control node instead of over SSH.
    pub fn runs_locally(&self) -> bool {
        self.get_bool("runLocally")
    }

    /// Returns a copy with one top-level key replaced.
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut copy = self.clone();
        copy.values.insert(key.into(), value.into());
        copy
    }

    /// Verifies every key of every requirement at once.
    ///
    /// All missing keys are collected before failing so the operator sees the
    /// complete list in one pass.
    pub fn check(&self, requirements: &[Requirement]) -> Result<()> {
        let mut missing = Vec::new();
        for requirement in requirements {
            for key in &requirement.keys {
                let already = missing
                    .iter()
                    .any(|m: &MissingKey| &m.key == key);
                if !self.contains(key) && !already {
                    missing.push(MissingKey::in_section(key, &requirement.section));
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation {
                config: self.name.clone(),
                missing,
            })
        }
    }

    /// Flattened `key: value` lines describing the record.
    pub fn describe(&self) -> Vec<(String, String)> {
        fn render(value: &Value) -> String {
            match value {
                Value::String(s) => s.clone(),
                Value::Null => "~".to_string(),
                other => serde_yaml::to_string(other)
                    .map(|s| s.trim_end().to_string())
                    .unwrap_or_default(),
            }
        }

        let mut lines = Vec::new();
        for (key, value) in &self.values {
            match value {
                Value::Mapping(map) => {
                    for (sub_key, sub_value) in map {
                        let sub_key = sub_key.as_str().map(str::to_string).unwrap_or_else(|| render(sub_key));
                        lines.push((format!("{}/{}", key, sub_key), render(sub_value)));
                    }
                }
                Value::Sequence(items) => {
                    for (index, item) in items.iter().enumerate() {
                        lines.push((format!("{}/{}", key, index), render(item)));
                    }
                }
                other => lines.push((key.clone(), render(other))),
            }
        }
        lines
    }
}
