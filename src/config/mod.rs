//! Configuration resolution for Hostwright
//!
//! A project document declares global settings and a set of named hosts. A
//! host may inherit from a parent host. Resolving a host name produces one
//! [`ConfigRecord`] by deep-merging, in increasing priority:
//! - Built-in baseline values (non-required flags and paths only)
//! - Global settings (`defaults` plus top-level `uuid`, `sqlSkipTables`, ...)
//! - The host layer, after applying its `inheritsFrom` chain
//! - Per-invocation overrides
//!
//! Resolution performs no remote calls and is idempotent.

pub mod merge;
pub mod record;

pub use merge::{deep_merge, merge_layer};
pub use record::{ConfigRecord, Requirement, CONNECTION_KEYS};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Key a host layer uses to name its parent.
pub const INHERITS_KEY: &str = "inheritsFrom";

/// Upper bound on inheritance depth.
pub const MAX_INHERITANCE_DEPTH: usize = 16;

/// File names looked up in the working directory when no path is given.
pub const DEFAULT_FILE_NAMES: &[&str] = &["hostwright.yml", "hostwright.yaml", "fabfile.yaml"];

/// The project document: global settings plus named host layers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Project name
    pub name: String,

    /// Global defaults applied beneath every host
    pub defaults: IndexMap<String, Value>,

    /// Named host layers in document order
    pub hosts: IndexMap<String, IndexMap<String, Value>>,

    /// Global scripts available to every host
    pub scripts: IndexMap<String, Value>,

    /// Scripts run for every host of a given type during reset
    pub common: IndexMap<String, Value>,

    /// Site UUID used by config-import
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    /// Tables dumped structure-only
    pub sql_skip_tables: Vec<String>,

    /// Module enabled during reset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_module: Option<String>,

    /// Default capability list for hosts that do not declare `needs`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs: Option<Vec<String>>,
}

impl Settings {
    /// Parse a project document from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load a project document from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading project document");
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Locate and load the project document.
    ///
    /// An explicit path wins, then `$HOSTWRIGHT_CONFIG`, then the default file
    /// names in the current directory.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::discover_path(explicit).ok_or_else(|| {
            Error::ConfigNotFound(format!(
                "no project document found (tried {})",
                DEFAULT_FILE_NAMES.join(", ")
            ))
        })?;
        Self::from_file(path)
    }

    fn discover_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var("HOSTWRIGHT_CONFIG") {
            return Some(PathBuf::from(path));
        }
        DEFAULT_FILE_NAMES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists())
    }

    /// Host names in document order.
    pub fn host_names(&self) -> Vec<&str> {
        self.hosts.keys().map(String::as_str).collect()
    }

    /// The global layer: `defaults` overlaid with the top-level settings that
    /// every host sees.
    fn global_layer(&self) -> IndexMap<String, Value> {
        let mut layer = self.defaults.clone();
        if let Some(uuid) = &self.uuid {
            layer
                .entry("uuid".to_string())
                .or_insert_with(|| Value::String(uuid.clone()));
        }
        if !self.sql_skip_tables.is_empty() {
            layer.entry("sqlSkipTables".to_string()).or_insert_with(|| {
                Value::Sequence(
                    self.sql_skip_tables
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                )
            });
        }
        if let Some(module) = &self.deployment_module {
            layer
                .entry("deploymentModule".to_string())
                .or_insert_with(|| Value::String(module.clone()));
        }
        if let Some(needs) = &self.needs {
            layer.entry("needs".to_string()).or_insert_with(|| {
                Value::Sequence(needs.iter().cloned().map(Value::String).collect())
            });
        }
        layer
    }
}

/// Baseline values beneath the global layer.
///
/// Only flags and paths with a safe neutral value live here; keys a capability
/// requires (`host`, `user`, `port`, `siteFolder`, ...) are never defaulted.
pub fn baseline() -> IndexMap<String, Value> {
    let mut layer = IndexMap::new();
    layer.insert("type".to_string(), Value::String("dev".to_string()));
    layer.insert("tmpFolder".to_string(), Value::String("/tmp".to_string()));
    layer.insert("supportsZippedBackups".to_string(), Value::Bool(true));
    layer.insert("supportsInstalls".to_string(), Value::Bool(false));
    layer.insert("backupBeforeDeploy".to_string(), Value::Bool(false));
    layer.insert(
        "needs".to_string(),
        Value::Sequence(
            ["ssh", "git", "drush8", "files"]
                .into_iter()
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
    );
    layer
}

/// Builds [`ConfigRecord`]s from a [`Settings`] document.
pub struct ConfigResolver<'a> {
    settings: &'a Settings,
}

impl<'a> ConfigResolver<'a> {
    /// Create a resolver over a project document.
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Resolve a named host with no overrides.
    pub fn resolve(&self, name: &str) -> Result<ConfigRecord> {
        self.resolve_with(name, &IndexMap::new())
    }

    /// Resolve a named host and apply per-invocation overrides on top.
    pub fn resolve_with(
        &self,
        name: &str,
        overrides: &IndexMap<String, Value>,
    ) -> Result<ConfigRecord> {
        let mut values = baseline();
        merge_layer(&mut values, &self.settings.global_layer());

        let mut chain = Vec::new();
        let host = self.host_layer(name, &mut chain)?;
        merge_layer(&mut values, &host);
        merge_layer(&mut values, overrides);

        values.insert("configName".to_string(), Value::String(name.to_string()));

        debug!(config = %name, inherits = ?&chain[1..], "Resolved configuration");
        Ok(ConfigRecord::new(name, values))
    }

    /// The host layer with its parents folded in, child overriding parent.
    fn host_layer(
        &self,
        name: &str,
        chain: &mut Vec<String>,
    ) -> Result<IndexMap<String, Value>> {
        if chain.iter().any(|seen| seen == name) {
            chain.push(name.to_string());
            return Err(Error::CircularInheritance(chain.join(" -> ")));
        }
        chain.push(name.to_string());

        if chain.len() > MAX_INHERITANCE_DEPTH {
            return Err(Error::CircularInheritance(format!(
                "inheritance deeper than {} levels: {}",
                MAX_INHERITANCE_DEPTH,
                chain.join(" -> ")
            )));
        }

        let own = self
            .settings
            .hosts
            .get(name)
            .ok_or_else(|| Error::ConfigNotFound(name.to_string()))?;

        let mut layer = match own.get(INHERITS_KEY) {
            None | Some(Value::Null) => IndexMap::new(),
            Some(Value::String(parent)) => self.host_layer(parent, chain)?,
            Some(_) => {
                return Err(Error::invalid_config(
                    format!("{}/{}", name, INHERITS_KEY),
                    "must name a single parent configuration",
                ))
            }
        };

        let mut own = own.clone();
        own.shift_remove(INHERITS_KEY);
        merge_layer(&mut layer, &own);
        Ok(layer)
    }
}
