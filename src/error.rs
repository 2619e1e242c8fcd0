//! Error types for Hostwright.
//!
//! Every failure the orchestrator can surface is a variant of [`Error`]. Variants
//! carry the offending identifier (missing key, capability name, attempted
//! command) in structured fields so the CLI layer never has to print a generic
//! message.

use std::fmt;
use thiserror::Error;

use crate::connection::ConnectionError;

/// Result type alias for Hostwright operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A required configuration key that is absent from a resolved record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingKey {
    /// Key name, e.g. `siteFolder`
    pub key: String,
    /// Capability or nested section that requires it
    pub section: Option<String>,
}

impl MissingKey {
    /// Creates a missing key without a section.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            section: None,
        }
    }

    /// Creates a missing key required by a named section.
    pub fn in_section(key: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            section: Some(section.into()),
        }
    }
}

impl fmt::Display for MissingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.section {
            Some(section) => write!(f, "'{}' (required by '{}')", self.key, section),
            None => write!(f, "'{}'", self.key),
        }
    }
}

fn join_missing(missing: &[MissingKey]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The main error type for Hostwright.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// One or more required keys are missing from a resolved configuration.
    #[error("Configuration '{config}' is missing required keys: {}", join_missing(.missing))]
    Validation {
        /// Name of the configuration that failed validation
        config: String,
        /// Every missing key, not just the first
        missing: Vec<MissingKey>,
    },

    /// The requested host configuration does not exist.
    #[error("Configuration '{0}' not found")]
    ConfigNotFound(String),

    /// A host configuration inherits from itself, directly or indirectly.
    #[error("Circular inheritance in configuration: {0}")]
    CircularInheritance(String),

    /// A key is present but holds a value of the wrong shape.
    #[error("Invalid value for configuration key '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// No registered implementation answers for a capability.
    #[error("No implementation supports capability '{capability}' (configuration type '{config_type}')")]
    UnsupportedCapability {
        /// Capability that was requested
        capability: String,
        /// Declared type of the configuration
        config_type: String,
    },

    /// A task refused to run for this configuration.
    #[error("Task '{task}' is not allowed for configuration '{config}': {reason}")]
    TaskNotAllowed {
        /// Task name
        task: String,
        /// Configuration name
        config: String,
        /// Why the task was refused
        reason: String,
    },

    // ========================================================================
    // Tunnel Errors
    // ========================================================================
    /// The SSH tunnel did not signal readiness before its deadline.
    #[error("SSH tunnel timed out after {timeout_secs} seconds with command \"{command}\"")]
    TunnelTimeout {
        /// Exact command line that was attempted
        command: String,
        /// Deadline in seconds
        timeout_secs: u64,
    },

    /// The SSH tunnel process exited before signalling readiness.
    #[error("SSH tunnel exited before becoming ready with command \"{command}\": {stderr}")]
    TunnelExited {
        /// Exact command line that was attempted
        command: String,
        /// Diagnostic output collected before exit
        stderr: String,
    },

    // ========================================================================
    // Command Errors
    // ========================================================================
    /// A command exited non-zero outside warn-only mode.
    #[error("Command \"{command}\" failed on '{host}' with exit code {exit_code}: {stderr}")]
    CommandFailed {
        /// Host identifier the command ran on
        host: String,
        /// Command line as executed
        command: String,
        /// Exit code
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    /// Transport-level failure (spawn error, transfer error).
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    // ========================================================================
    // Backup Errors
    // ========================================================================
    /// An identifier resolved to no catalog entry.
    #[error("Could not find requested backup: {identifier}")]
    BackupNotFound {
        /// Label or hash that was looked up
        identifier: String,
    },

    /// A script name resolved to nothing.
    #[error("Could not find any script named '{0}'")]
    ScriptNotFound(String),

    // ========================================================================
    // IO and Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new command failed error.
    pub fn command_failed(
        host: impl Into<String>,
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            host: host.into(),
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Creates a new unsupported capability error.
    pub fn unsupported(capability: impl Into<String>, config_type: impl Into<String>) -> Self {
        Self::UnsupportedCapability {
            capability: capability.into(),
            config_type: config_type.into(),
        }
    }

    /// Creates a new invalid config error.
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error may be downgraded by warn-only execution.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::CommandFailed { .. })
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation { .. }
            | Error::ConfigNotFound(_)
            | Error::CircularInheritance(_)
            | Error::InvalidConfig { .. } => 2,
            Error::UnsupportedCapability { .. } | Error::TaskNotAllowed { .. } => 3,
            Error::TunnelTimeout { .. } | Error::TunnelExited { .. } => 4,
            Error::CommandFailed { .. } | Error::Connection(_) => 5,
            Error::BackupNotFound { .. } | Error::ScriptNotFound(_) => 6,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_lists_every_key() {
        let error = Error::Validation {
            config: "staging".to_string(),
            missing: vec![
                MissingKey::new("host"),
                MissingKey::in_section("siteFolder", "drush8"),
            ],
        };
        let msg = error.to_string();
        assert!(msg.contains("'staging'"));
        assert!(msg.contains("'host'"));
        assert!(msg.contains("'siteFolder' (required by 'drush8')"));
    }

    #[test]
    fn test_tunnel_timeout_names_command() {
        let error = Error::TunnelTimeout {
            command: "ssh -N bastion".to_string(),
            timeout_secs: 45,
        };
        assert!(error.to_string().contains("\"ssh -N bastion\""));
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn test_only_command_failures_are_recoverable() {
        assert!(Error::command_failed("web1", "false", 1, "").is_recoverable());
        assert!(!Error::unsupported("docker", "drush8").is_recoverable());
        assert!(!Error::BackupNotFound {
            identifier: "x".into()
        }
        .is_recoverable());
    }
}
