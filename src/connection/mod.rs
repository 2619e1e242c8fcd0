//! Connection layer for remote host communication.
//!
//! This module provides a unified interface for executing commands and
//! transferring files, whether the target is the control node itself or a
//! remote host reached through the system `ssh` client.
//!
//! # Supported Transports
//!
//! - **SSH**: shells out to the `ssh`/`scp` binaries; no SSH protocol is
//!   implemented here
//! - **Local**: direct execution on the control node
//!
//! # Example
//!
//! ```rust,ignore
//! use hostwright::connection::{Endpoint, ExecuteOptions, SshConnection, Connection};
//!
//! let conn = SshConnection::new(Endpoint::new("deploy", "example.com", 22));
//! let opts = ExecuteOptions::new().with_cwd("/var/www/site");
//! let result = conn.execute("drush status", Some(opts)).await?;
//! println!("Output: {}", result.stdout);
//! ```

/// Local execution connection implementation.
pub mod local;

/// SSH connection via the system ssh client.
pub mod ssh;

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use local::LocalConnection;
pub use ssh::SshConnection;

use crate::config::ConfigRecord;
use crate::error::Result;

/// Options that relax host key checking for throwaway hosts.
pub const NO_STRICT_HOST_KEY_CHECKING: &[&str] = &[
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
];

/// Errors that can occur during connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Command could not be started or awaited (not a non-zero exit code).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload or download operation failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Operation timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error during connection operations.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;

/// The result of executing a command on a connection.
///
/// # Example
///
/// ```rust
/// use hostwright::connection::CommandResult;
///
/// let result = CommandResult::success("Hello".into(), String::new());
/// assert!(result.success);
/// assert_eq!(result.exit_code, 0);
///
/// let failed = CommandResult::failure(1, String::new(), "error".into());
/// assert!(!failed.success);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Build a result from a finished process.
    pub fn from_output(output: &std::process::Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.status.success() {
            Self::success(stdout, stderr)
        } else {
            Self::failure(output.status.code().unwrap_or(-1), stdout, stderr)
        }
    }
}

/// Options for command execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory for the command
    pub cwd: Option<String>,
    /// Timeout in seconds (None for no timeout)
    pub timeout: Option<u64>,
}

impl ExecuteOptions {
    /// Create new execute options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The transport trait all connections implement.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the connection identifier (hostname or `localhost`)
    fn identifier(&self) -> &str;

    /// Execute a command on the target
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Copy a local file to the target
    async fn upload(&self, local_path: &Path, remote_path: &Path) -> ConnectionResult<()>;

    /// Copy a file from the target to the control node
    async fn download(&self, remote_path: &Path, local_path: &Path) -> ConnectionResult<()>;
}

/// Where an SSH session lands: `user@host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Login user
    pub user: String,
    /// Hostname or address
    pub host: String,
    /// SSH port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(user: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port,
        }
    }

    /// Endpoint declared by a configuration record's `user`, `host` and `port`.
    pub fn from_config(config: &ConfigRecord) -> Result<Self> {
        Ok(Self {
            user: config.require("user")?,
            host: config.require("host")?,
            port: config.require_u16("port")?,
        })
    }

    /// `user@host`
    pub fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Pick the transport a configuration record asks for.
pub fn for_config(config: &ConfigRecord) -> Result<Arc<dyn Connection>> {
    if config.runs_locally() {
        return Ok(Arc::new(LocalConnection::new()));
    }
    let endpoint = Endpoint::from_config(config)?;
    let strict = !config.get_bool("disableKnownHosts");
    Ok(Arc::new(
        SshConnection::new(endpoint).with_strict_host_key_checking(strict),
    ))
}
