//! Local connection module
//!
//! This module provides local command execution and file operations
//! without any network transport.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions};

/// Local connection for executing commands on the current host
#[derive(Debug, Clone)]
pub struct LocalConnection {
    /// Identifier for this connection
    identifier: String,
}

impl LocalConnection {
    /// Create a new local connection
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());

        Self { identifier }
    }

    /// Create a local connection with a custom identifier
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    fn build_command(&self, command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a spawned child, honouring an optional timeout.
pub(crate) async fn wait_with_timeout(
    child: tokio::process::Child,
    timeout: Option<u64>,
) -> ConnectionResult<std::process::Output> {
    let wait_future = child.wait_with_output();
    match timeout {
        Some(timeout_secs) => {
            let timeout = tokio::time::Duration::from_secs(timeout_secs);
            match tokio::time::timeout(timeout, wait_future).await {
                Ok(result) => result.map_err(|e| {
                    ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e))
                }),
                // The child is dropped with the future and killed on drop.
                Err(_) => Err(ConnectionError::Timeout(timeout_secs)),
            }
        }
        None => wait_future.await.map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e))
        }),
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(command = %command, cwd = ?options.cwd, "Executing local command");

        let child = self.build_command(command, &options).spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e))
        })?;

        let output = wait_with_timeout(child, options.timeout).await?;
        let result = CommandResult::from_output(&output);

        trace!(exit_code = %result.exit_code, stdout_len = %result.stdout.len(), stderr_len = %result.stderr.len(), "Command completed");
        Ok(result)
    }

    async fn upload(&self, local_path: &Path, remote_path: &Path) -> ConnectionResult<()> {
        debug!(src = %local_path.display(), dst = %remote_path.display(), "Copying file locally");
        copy_file(local_path, remote_path)
    }

    async fn download(&self, remote_path: &Path, local_path: &Path) -> ConnectionResult<()> {
        debug!(src = %remote_path.display(), dst = %local_path.display(), "Copying file locally");
        copy_file(remote_path, local_path)
    }
}

fn copy_file(from: &Path, to: &Path) -> ConnectionResult<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    std::fs::copy(from, to).map_err(|e| {
        ConnectionError::TransferFailed(format!(
            "Failed to copy {} to {}: {}",
            from.display(),
            to.display(),
            e
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_execute() {
        let conn = LocalConnection::new();
        let result = conn.execute("echo 'hello world'", None).await.unwrap();

        assert!(result.success);
        assert!(result.stdout.contains("hello world"));
    }

    #[tokio::test]
    async fn test_local_execute_with_cwd() {
        let conn = LocalConnection::new();
        let temp_dir = tempfile::tempdir().unwrap();
        let options = ExecuteOptions::new().with_cwd(temp_dir.path().to_string_lossy());
        let result = conn.execute("pwd", Some(options)).await.unwrap();

        assert!(result.success);
        let reported = std::fs::canonicalize(result.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(temp_dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_local_execute_failure() {
        let conn = LocalConnection::new();
        let result = conn.execute("echo oops >&2; exit 42", None).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, 42);
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_local_timeout() {
        let conn = LocalConnection::new();
        let options = ExecuteOptions::new().with_timeout(1);
        let result = conn.execute("sleep 10", Some(options)).await;

        assert!(matches!(result, Err(ConnectionError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_local_upload_download() {
        let conn = LocalConnection::with_identifier("control");
        let temp_dir = tempfile::tempdir().unwrap();

        let src_path = temp_dir.path().join("source.sql");
        let dst_path = temp_dir.path().join("nested/dest.sql");
        let back_path = temp_dir.path().join("back.sql");
        std::fs::write(&src_path, b"dump").unwrap();

        conn.upload(&src_path, &dst_path).await.unwrap();
        conn.download(&dst_path, &back_path).await.unwrap();

        assert_eq!(std::fs::read(&back_path).unwrap(), b"dump");
        assert_eq!(conn.identifier(), "control");
    }
}
