//! Command executor for Hostwright
//!
//! A [`Shell`] runs shell commands against the connection of one resolved
//! configuration, or on the control node when asked to. It carries a stack of
//! working directories that [`Shell::cd`] pushes onto; the returned guard pops
//! it again when dropped, so the directory reverts on every exit path
//! including `?` propagation and panics.

use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ConfigRecord;
use crate::connection::{self, CommandResult, Connection, ExecuteOptions, LocalConnection};
use crate::error::{Error, Result};

/// Configuration key bounding each command, in seconds.
pub const COMMAND_TIMEOUT_KEY: &str = "commandTimeout";

/// Per-command execution options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Working directory for this command only; wins over [`Shell::cd`]
    pub cwd: Option<String>,
    /// Report a non-zero exit instead of failing
    pub warn_only: bool,
    /// Log the command at debug level instead of info
    pub quiet: bool,
    /// Run on the control node instead of the target
    pub local: bool,
    /// Deadline in seconds; wins over the shell's default
    pub timeout: Option<u64>,
}

impl RunOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set warn-only mode
    pub fn warn_only(mut self, warn_only: bool) -> Self {
        self.warn_only = warn_only;
        self
    }

    /// Set quiet mode
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Run on the control node
    pub fn local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Set the deadline in seconds
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    /// Shorthand for quiet, warn-only housekeeping commands
    pub fn best_effort() -> Self {
        Self::new().quiet(true).warn_only(true)
    }
}

/// Executes commands for one configuration.
///
/// Cloning a shell shares its connection and directory stack.
#[derive(Clone)]
pub struct Shell {
    connection: Arc<RwLock<Arc<dyn Connection>>>,
    local: Arc<dyn Connection>,
    dirs: Arc<Mutex<Vec<String>>>,
    timeout: Option<u64>,
}

impl std::fmt::Debug for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("target", &self.identifier())
            .field("dirs", &*self.dirs.lock())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Shell {
    /// Create a shell over a connection
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection: Arc::new(RwLock::new(connection)),
            local: Arc::new(LocalConnection::new()),
            dirs: Arc::new(Mutex::new(Vec::new())),
            timeout: None,
        }
    }

    /// Create a shell for the transport a configuration asks for.
    ///
    /// `commandTimeout`, when set, bounds every command the shell runs.
    pub fn for_config(config: &ConfigRecord) -> Result<Self> {
        let timeout = match config.get_string(COMMAND_TIMEOUT_KEY) {
            Some(secs) => Some(secs.trim().parse().map_err(|_| {
                Error::invalid_config(COMMAND_TIMEOUT_KEY, "must be a number of seconds")
            })?),
            None => None,
        };
        Ok(Self::new(connection::for_config(config)?).with_timeout(timeout))
    }

    /// Bound every command by `timeout` seconds
    pub fn with_timeout(mut self, timeout: Option<u64>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the connection used for local runs
    pub fn with_local_connection(mut self, local: Arc<dyn Connection>) -> Self {
        self.local = local;
        self
    }

    /// Point subsequent commands at a different connection.
    ///
    /// Used once a tunnel is up and the target is reachable through it.
    pub fn retarget(&self, connection: Arc<dyn Connection>) {
        debug!(from = %self.identifier(), to = %connection.identifier(), "Retargeting shell");
        *self.connection.write() = connection;
    }

    /// Identifier of the current target
    pub fn identifier(&self) -> String {
        self.connection.read().identifier().to_string()
    }

    /// Current scoped working directory, if any
    pub fn current_dir(&self) -> Option<String> {
        self.dirs.lock().last().cloned()
    }

    /// Change the working directory until the guard is dropped.
    ///
    /// Relative paths are joined onto the current scoped directory.
    pub fn cd(&self, dir: impl AsRef<str>) -> CwdGuard {
        let dir = dir.as_ref();
        let mut dirs = self.dirs.lock();
        let resolved = match dirs.last() {
            Some(current) if !dir.starts_with('/') && !dir.starts_with('~') => {
                format!("{}/{}", current.trim_end_matches('/'), dir)
            }
            _ => dir.to_string(),
        };
        dirs.push(resolved);
        CwdGuard {
            dirs: Arc::clone(&self.dirs),
            depth: dirs.len(),
        }
    }

    /// Run a command with default options (fatal on failure)
    pub async fn exec(&self, command: &str) -> Result<CommandResult> {
        self.run(command, RunOptions::default()).await
    }

    /// Run a command.
    ///
    /// A non-zero exit fails with [`Error::CommandFailed`] unless
    /// `warn_only` is set, in which case the result is returned as is.
    pub async fn run(&self, command: &str, options: RunOptions) -> Result<CommandResult> {
        let connection = if options.local {
            Arc::clone(&self.local)
        } else {
            Arc::clone(&*self.connection.read())
        };

        let cwd = match options.cwd.clone() {
            Some(cwd) => Some(cwd),
            None if !options.local => self.current_dir(),
            None => None,
        };

        if options.quiet {
            debug!(host = %connection.identifier(), cwd = ?cwd, command = %command, "run");
        } else {
            info!(host = %connection.identifier(), cwd = ?cwd, command = %command, "run");
        }

        let mut exec_options = ExecuteOptions::new();
        if let Some(cwd) = cwd {
            exec_options = exec_options.with_cwd(cwd);
        }
        if let Some(secs) = options.timeout.or(self.timeout) {
            exec_options = exec_options.with_timeout(secs);
        }

        let result = connection.execute(command, Some(exec_options)).await?;

        if !result.success {
            if options.warn_only {
                warn!(
                    host = %connection.identifier(),
                    command = %command,
                    exit_code = result.exit_code,
                    stderr = %result.stderr.trim(),
                    "Command failed, continuing"
                );
            } else {
                return Err(Error::command_failed(
                    connection.identifier(),
                    command,
                    result.exit_code,
                    result.stderr.trim(),
                ));
            }
        }

        Ok(result)
    }

    /// Copy a file from the control node to the target
    pub async fn upload(&self, local_path: &Path, remote_path: &Path) -> Result<()> {
        let connection = Arc::clone(&*self.connection.read());
        info!(host = %connection.identifier(), local = %local_path.display(), remote = %remote_path.display(), "put");
        Ok(connection.upload(local_path, remote_path).await?)
    }

    /// Copy a file from the target to the control node
    pub async fn download(&self, remote_path: &Path, local_path: &Path) -> Result<()> {
        let connection = Arc::clone(&*self.connection.read());
        info!(host = %connection.identifier(), remote = %remote_path.display(), local = %local_path.display(), "get");
        Ok(connection.download(remote_path, local_path).await?)
    }
}

/// Restores the previous working directory on drop.
#[must_use = "the directory reverts as soon as the guard is dropped"]
pub struct CwdGuard {
    dirs: Arc<Mutex<Vec<String>>>,
    depth: usize,
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        self.dirs.lock().truncate(self.depth.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_shell() -> Shell {
        Shell::new(Arc::new(LocalConnection::with_identifier("target")))
    }

    #[tokio::test]
    async fn test_success() {
        let shell = local_shell();
        let result = shell.exec("echo hi").await.unwrap();
        assert_eq!(result.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn test_failure_is_fatal_by_default() {
        let shell = local_shell();
        let err = shell.exec("echo nope >&2; exit 7").await.unwrap_err();
        match err {
            Error::CommandFailed {
                host,
                command,
                exit_code,
                stderr,
            } => {
                assert_eq!(host, "target");
                assert_eq!(command, "echo nope >&2; exit 7");
                assert_eq!(exit_code, 7);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_warn_only_returns_result() {
        let shell = local_shell();
        let result = shell
            .run("exit 3", RunOptions::new().warn_only(true))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn test_cd_scope_reverts() {
        let shell = local_shell();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        {
            let _outer = shell.cd(&root);
            {
                let _inner = shell.cd("sub");
                let pwd = shell.exec("pwd").await.unwrap();
                assert!(pwd.stdout.trim().ends_with("/sub"));
            }
            assert_eq!(shell.current_dir(), Some(root.clone()));
        }
        assert_eq!(shell.current_dir(), None);
    }

    #[tokio::test]
    async fn test_cd_reverts_on_error() {
        let shell = local_shell();

        async fn failing(shell: &Shell) -> Result<()> {
            let _guard = shell.cd("/");
            shell.exec("false").await?;
            Ok(())
        }

        assert!(failing(&shell).await.is_err());
        assert_eq!(shell.current_dir(), None);
    }

    #[test]
    fn test_best_effort_options() {
        let options = RunOptions::best_effort();
        assert!(options.quiet);
        assert!(options.warn_only);
        assert!(!options.local);
    }

    #[tokio::test]
    async fn test_shell_timeout_bounds_commands() {
        let shell = local_shell().with_timeout(Some(1));
        let err = shell.exec("sleep 10").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(connection::ConnectionError::Timeout(1))
        ));

        // A per-command deadline wins over the shell's.
        let result = shell
            .run("sleep 2; echo late", RunOptions::new().with_timeout(10))
            .await
            .unwrap();
        assert_eq!(result.stdout.trim(), "late");
    }

    #[test]
    fn test_command_timeout_from_config() {
        let config = ConfigRecord::new(
            "local",
            serde_yaml::from_str("runLocally: true\ncommandTimeout: 600").unwrap(),
        );
        let shell = Shell::for_config(&config).unwrap();
        assert_eq!(shell.timeout, Some(600));

        let bad = ConfigRecord::new(
            "local",
            serde_yaml::from_str("runLocally: true\ncommandTimeout: soon").unwrap(),
        );
        assert!(matches!(
            Shell::for_config(&bad),
            Err(Error::InvalidConfig { key, .. }) if key == COMMAND_TIMEOUT_KEY
        ));
    }
}
