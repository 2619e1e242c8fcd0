//! SSH connection module
//!
//! Commands run through the system `ssh` client in batch mode and files move
//! with `scp`. Authentication is whatever the operator's agent and
//! `~/.ssh/config` provide; nothing here prompts.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

use super::local::wait_with_timeout;
use super::{
    CommandResult, Connection, ConnectionError, ConnectionResult, Endpoint, ExecuteOptions,
    NO_STRICT_HOST_KEY_CHECKING,
};

/// Environment variable naming the ssh executable.
pub const SSH_PROGRAM_ENV: &str = "HOSTWRIGHT_SSH";

/// The ssh executable to use, honouring `$HOSTWRIGHT_SSH`.
pub fn ssh_program() -> String {
    std::env::var(SSH_PROGRAM_ENV)
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| "ssh".to_string())
}

/// SSH connection backed by the system client
#[derive(Debug, Clone)]
pub struct SshConnection {
    /// `user@host:port`
    identifier: String,
    endpoint: Endpoint,
    strict_host_key_checking: bool,
    program: String,
    scp_program: String,
}

impl SshConnection {
    /// Create a connection to an endpoint
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            identifier: endpoint.to_string(),
            endpoint,
            strict_host_key_checking: true,
            program: ssh_program(),
            scp_program: "scp".to_string(),
        }
    }

    /// Enable or relax host key checking
    pub fn with_strict_host_key_checking(mut self, strict: bool) -> Self {
        self.strict_host_key_checking = strict;
        self
    }

    /// Use a different ssh executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// The endpoint this connection targets
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Build the remote command string with options
    fn build_command(command: &str, options: &ExecuteOptions) -> String {
        let mut parts = Vec::new();

        if let Some(cwd) = &options.cwd {
            parts.push(format!("cd {} && ", shell_words::quote(cwd)));
        }

        parts.push(command.to_string());
        parts.concat()
    }

    /// Arguments passed to ssh ahead of the remote command
    fn ssh_args(&self) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if !self.strict_host_key_checking {
            args.extend(NO_STRICT_HOST_KEY_CHECKING.iter().map(|s| s.to_string()));
        }
        args.push("-p".to_string());
        args.push(self.endpoint.port.to_string());
        args.push(self.endpoint.login());
        args
    }

    /// Arguments for an interactive login, optionally starting in `dir`
    fn interactive_args(&self, dir: Option<&str>) -> Vec<String> {
        let mut args = vec!["-t".to_string()];
        args.extend(self.ssh_args());
        if let Some(dir) = dir {
            args.push(format!("cd {} && exec $SHELL -l", shell_words::quote(dir)));
        }
        args
    }

    /// Hand the terminal to an interactive ssh session and wait for it to end.
    ///
    /// Returns the session's exit code.
    pub async fn open_shell(&self, dir: Option<&str>) -> ConnectionResult<i32> {
        debug!(host = %self.identifier, dir = ?dir, "Opening interactive shell");
        let status = Command::new(&self.program)
            .args(self.interactive_args(dir))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| {
                ConnectionError::ExecutionFailed(format!(
                    "Failed to spawn {}: {}",
                    self.program, e
                ))
            })?;
        Ok(status.code().unwrap_or(-1))
    }

    fn scp_args(&self) -> Vec<String> {
        let mut args = vec!["-q".to_string(), "-o".to_string(), "BatchMode=yes".to_string()];
        if !self.strict_host_key_checking {
            args.extend(NO_STRICT_HOST_KEY_CHECKING.iter().map(|s| s.to_string()));
        }
        args.push("-P".to_string());
        args.push(self.endpoint.port.to_string());
        args
    }

    fn remote_spec(&self, path: &Path) -> String {
        format!("{}:{}", self.endpoint.login(), path.display())
    }

    async fn scp(&self, from: String, to: String) -> ConnectionResult<()> {
        let mut cmd = Command::new(&self.scp_program);
        cmd.args(self.scp_args())
            .arg(&from)
            .arg(&to)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| ConnectionError::TransferFailed(format!("Failed to spawn scp: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ConnectionError::TransferFailed(format!(
                "scp {} {} failed: {}",
                from,
                to,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[async_trait]
impl Connection for SshConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        let remote = Self::build_command(command, &options);

        debug!(host = %self.identifier, command = %remote, "Executing remote command");

        let child = Command::new(&self.program)
            .args(self.ssh_args())
            .arg(&remote)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ConnectionError::ExecutionFailed(format!(
                    "Failed to spawn {}: {}",
                    self.program, e
                ))
            })?;

        let output = wait_with_timeout(child, options.timeout).await?;
        let result = CommandResult::from_output(&output);

        trace!(exit_code = %result.exit_code, "Remote command completed");
        Ok(result)
    }

    async fn upload(&self, local_path: &Path, remote_path: &Path) -> ConnectionResult<()> {
        debug!(local = %local_path.display(), remote = %remote_path.display(), "Uploading via scp");
        self.scp(
            local_path.display().to_string(),
            self.remote_spec(remote_path),
        )
        .await
    }

    async fn download(&self, remote_path: &Path, local_path: &Path) -> ConnectionResult<()> {
        debug!(remote = %remote_path.display(), local = %local_path.display(), "Downloading via scp");
        self.scp(
            self.remote_spec(remote_path),
            local_path.display().to_string(),
        )
        .await
    }
}
