//! SSH tunnel management
//!
//! A tunnel is an `ssh -N -L` process forwarding a local port through a
//! bridge host. Opening one spawns the process, then waits a bounded time for
//! its diagnostic stream to report an interactive session. Every spawned
//! process is killed when its [`TunnelHandle`] is dropped, when the wait
//! times out, or when the [`TunnelManager`] shuts down.
//!
//! The double-hop variant runs the forwarding ssh on the target host itself,
//! so the forwarded port is opened on the target rather than the control node.

pub mod readiness;

pub use readiness::{wait_for_ready, MarkerCheck, Readiness, ReadinessCheck, READY_MARKER};

use parking_lot::Mutex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigRecord, Requirement};
use crate::connection::ssh::ssh_program;
use crate::connection::{Endpoint, NO_STRICT_HOST_KEY_CHECKING};
use crate::error::{Error, Result};
use crate::executor::{RunOptions, Shell};

/// Local port forwarded when none is configured.
pub const DEFAULT_LOCAL_PORT: u16 = 2022;

/// Readiness deadline for a direct tunnel.
pub const DEFAULT_TIMEOUT_SECS: u64 = 45;

/// Readiness deadline for a double-hop tunnel.
pub const DOUBLE_HOP_TIMEOUT_SECS: u64 = 90;

/// Pause after a double-hop tunnel reports ready.
pub const DOUBLE_HOP_SETTLE: Duration = Duration::from_secs(5);

/// Marker file on the target cleared before a double hop.
pub const REMOTE_MARKER_FILE: &str = "~/.ssh-tunnel-marker";

/// Environment variable overriding the readiness deadline in seconds.
pub const TIMEOUT_ENV: &str = "HOSTWRIGHT_TUNNEL_TIMEOUT";

/// Configuration section describing a tunnel.
pub const TUNNEL_SECTION: &str = "sshTunnel";

/// Keys a configured tunnel needs.
pub fn tunnel_requirement() -> Requirement {
    Requirement::new(
        TUNNEL_SECTION,
        ["bridgeUser", "bridgeHost", "destHost"]
            .iter()
            .map(|key| format!("{}/{}", TUNNEL_SECTION, key)),
    )
}

fn timeout_from_env(default_secs: u64) -> Duration {
    let secs = std::env::var(TIMEOUT_ENV)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

/// Parameters of one forwarding process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// User on the bridge host
    pub bridge_user: String,
    /// Bridge (bastion) host
    pub bridge_host: String,
    /// SSH port of the bridge host
    pub bridge_port: u16,
    /// Host the bridge forwards to
    pub dest_host: String,
    /// Port on the destination host
    pub dest_port: u16,
    /// Port opened on the forwarding side
    pub local_port: u16,
    /// Keep host key checking enabled
    pub strict_host_key_checking: bool,
    /// Readiness deadline
    pub timeout: Duration,
    /// ssh executable
    pub program: String,
}

impl TunnelSpec {
    /// A tunnel with default ports and deadline.
    pub fn new(
        bridge_user: impl Into<String>,
        bridge_host: impl Into<String>,
        dest_host: impl Into<String>,
    ) -> Self {
        Self {
            bridge_user: bridge_user.into(),
            bridge_host: bridge_host.into(),
            bridge_port: 22,
            dest_host: dest_host.into(),
            dest_port: 22,
            local_port: DEFAULT_LOCAL_PORT,
            strict_host_key_checking: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            program: "ssh".to_string(),
        }
    }

    /// Set the bridge port
    pub fn with_bridge_port(mut self, port: u16) -> Self {
        self.bridge_port = port;
        self
    }

    /// Set the destination port
    pub fn with_dest_port(mut self, port: u16) -> Self {
        self.dest_port = port;
        self
    }

    /// Set the forwarded port
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    /// Enable or relax host key checking
    pub fn with_strict_host_key_checking(mut self, strict: bool) -> Self {
        self.strict_host_key_checking = strict;
        self
    }

    /// Set the readiness deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different ssh executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Read the `sshTunnel` section of a configuration.
    ///
    /// Returns `Ok(None)` when no tunnel is configured.
    pub fn from_config(config: &ConfigRecord) -> Result<Option<Self>> {
        if !config.contains(TUNNEL_SECTION) {
            return Ok(None);
        }
        config.check(&[tunnel_requirement()])?;

        let key = |name: &str| format!("{}/{}", TUNNEL_SECTION, name);
        let default_timeout = if is_double_hop(config) {
            DOUBLE_HOP_TIMEOUT_SECS
        } else {
            DEFAULT_TIMEOUT_SECS
        };
        let timeout = match config.get_string(&key("timeout")) {
            Some(secs) => Duration::from_secs(secs.parse().map_err(|_| {
                Error::invalid_config(key("timeout"), "must be a number of seconds")
            })?),
            None => timeout_from_env(default_timeout),
        };

        Ok(Some(Self {
            bridge_user: config.require(&key("bridgeUser"))?,
            bridge_host: config.require(&key("bridgeHost"))?,
            bridge_port: config.get_u16(&key("bridgePort"))?.unwrap_or(22),
            dest_host: config.require(&key("destHost"))?,
            dest_port: config.get_u16(&key("destPort"))?.unwrap_or(22),
            local_port: config
                .get_u16(&key("localPort"))?
                .unwrap_or(DEFAULT_LOCAL_PORT),
            strict_host_key_checking: !config.get_bool("disableKnownHosts"),
            timeout,
            program: ssh_program(),
        }))
    }

    fn relaxed_flags(&self) -> Vec<String> {
        if self.strict_host_key_checking {
            Vec::new()
        } else {
            NO_STRICT_HOST_KEY_CHECKING
                .iter()
                .map(|s| s.to_string())
                .collect()
        }
    }

    fn forward(&self) -> String {
        format!("{}:{}:{}", self.local_port, self.dest_host, self.dest_port)
    }

    fn bridge_login(&self) -> String {
        format!("{}@{}", self.bridge_user, self.bridge_host)
    }

    /// Argument vector for a direct tunnel, program first.
    pub fn command_line(&self) -> Vec<String> {
        let mut args = vec![self.program.clone()];
        args.extend(self.relaxed_flags());
        args.extend(
            [
                "-q",
                "-o",
                "PasswordAuthentication=no",
                "-vAN",
                "-L",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(self.forward());
        args.push("-p".to_string());
        args.push(self.bridge_port.to_string());
        args.push(self.bridge_login());
        args
    }

    /// `localhost:<port>`
    pub fn entrance(&self) -> String {
        format!("localhost:{}", self.local_port)
    }
}

/// True if the configuration asks for the forwarding to run on the target.
pub fn is_double_hop(config: &ConfigRecord) -> bool {
    config.get_bool(&format!("{}/doubleHop", TUNNEL_SECTION))
}

/// A tunnel opened by an ssh session on the target host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoubleHopSpec {
    /// The target host the outer session logs into
    pub outer: Endpoint,
    /// The forwarding run on the target
    pub tunnel: TunnelSpec,
    /// Pause after readiness before the entrance is used
    pub settle: Duration,
}

impl DoubleHopSpec {
    /// Wrap a tunnel so it is opened from `outer`.
    pub fn new(outer: Endpoint, tunnel: TunnelSpec) -> Self {
        Self {
            outer,
            tunnel,
            settle: DOUBLE_HOP_SETTLE,
        }
    }

    /// Set the settle delay
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// The forwarding command run on the target, as one string.
    pub fn inner_command(&self) -> String {
        let tunnel = &self.tunnel;
        let mut args = vec![tunnel.program.clone()];
        args.extend(tunnel.relaxed_flags());
        args.extend(
            ["-q", "-o", "PasswordAuthentication=no", "-v", "-L"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(tunnel.forward());
        args.push("-p".to_string());
        args.push(tunnel.bridge_port.to_string());
        args.push(tunnel.bridge_login());
        args.extend(["-A", "-N", "-M"].iter().map(|s| s.to_string()));
        shell_words::join(args)
    }

    /// Argument vector for the outer session, program first.
    pub fn command_line(&self) -> Vec<String> {
        let mut args = vec![self.tunnel.program.clone()];
        args.extend(self.tunnel.relaxed_flags());
        args.extend(
            ["-o", "PasswordAuthentication=no", "-vA", "-p"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(self.outer.port.to_string());
        args.push(self.outer.login());
        args.push(self.inner_command());
        args
    }
}

/// One live forwarding process.
#[derive(Debug)]
pub struct TunnelHandle {
    local_port: u16,
    command: String,
    child: Child,
}

impl TunnelHandle {
    /// Spawn `command_line` and wait for readiness.
    ///
    /// On timeout the process is killed and reaped before the error is
    /// returned.
    pub async fn spawn(
        command_line: &[String],
        local_port: u16,
        timeout: Duration,
        check: &dyn ReadinessCheck,
    ) -> Result<Self> {
        let command = shell_words::join(command_line);
        let (program, args) = command_line
            .split_first()
            .ok_or_else(|| Error::Internal("empty tunnel command line".to_string()))?;

        debug!(command = %command, timeout = ?timeout, "Opening SSH tunnel");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("tunnel stderr was not captured".to_string()))?;
        let mut reader = BufReader::new(stderr);

        match wait_for_ready(&mut reader, check, timeout).await {
            Readiness::Ready => {
                drain(reader);
                info!(command = %command, port = local_port, "SSH tunnel ready");
                Ok(Self {
                    local_port,
                    command,
                    child,
                })
            }
            Readiness::TimedOut => {
                warn!(command = %command, "SSH tunnel timed out, terminating");
                terminate(&mut child).await;
                Err(Error::TunnelTimeout {
                    command,
                    timeout_secs: timeout.as_secs(),
                })
            }
            Readiness::Closed(stderr) => {
                terminate(&mut child).await;
                Err(Error::TunnelExited { command, stderr })
            }
        }
    }

    /// Open a direct tunnel.
    pub async fn open(spec: &TunnelSpec) -> Result<Self> {
        Self::spawn(
            &spec.command_line(),
            spec.local_port,
            spec.timeout,
            &MarkerCheck::default(),
        )
        .await
    }

    /// Open a double-hop tunnel.
    ///
    /// The remote marker file is cleared through `shell` first.
    pub async fn open_double_hop(spec: &DoubleHopSpec, shell: &Shell) -> Result<Self> {
        shell
            .run(
                &format!("rm -f {}", REMOTE_MARKER_FILE),
                RunOptions::best_effort(),
            )
            .await?;

        let handle = Self::spawn(
            &spec.command_line(),
            spec.tunnel.local_port,
            spec.tunnel.timeout,
            &MarkerCheck::default(),
        )
        .await?;

        if !spec.settle.is_zero() {
            tokio::time::sleep(spec.settle).await;
        }
        Ok(handle)
    }

    /// `localhost:<port>`
    pub fn entrance(&self) -> String {
        format!("localhost:{}", self.local_port)
    }

    /// Forwarded port
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// The command line this tunnel was spawned with
    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id, while the process is alive
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kill the forwarding process and wait for it to exit.
    pub async fn close(mut self) {
        debug!(command = %self.command, "Closing SSH tunnel");
        terminate(&mut self.child).await;
    }
}

/// Keep reading diagnostics so a verbose ssh never blocks on a full pipe.
fn drain(mut reader: BufReader<ChildStderr>) {
    tokio::spawn(async move {
        let mut line = String::new();
        while let Ok(n) = reader.read_line(&mut line).await {
            if n == 0 {
                break;
            }
            trace!(line = %line.trim_end(), "tunnel");
            line.clear();
        }
    });
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        trace!(error = %e, "tunnel process already gone");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap tunnel process");
    }
}

/// Owns every tunnel opened during one invocation.
#[derive(Debug, Default)]
pub struct TunnelManager {
    handles: Mutex<Vec<TunnelHandle>>,
}

impl TunnelManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(&self, command_line: &[String]) -> Option<String> {
        let command = shell_words::join(command_line);
        self.handles
            .lock()
            .iter()
            .find(|handle| handle.command == command)
            .map(TunnelHandle::entrance)
    }

    /// Open a direct tunnel, or reuse one already open with the same command.
    pub async fn open(&self, spec: &TunnelSpec) -> Result<String> {
        if let Some(entrance) = self.existing(&spec.command_line()) {
            return Ok(entrance);
        }
        let handle = TunnelHandle::open(spec).await?;
        let entrance = handle.entrance();
        self.handles.lock().push(handle);
        Ok(entrance)
    }

    /// Open a double-hop tunnel, or reuse one already open.
    pub async fn open_double_hop(&self, spec: &DoubleHopSpec, shell: &Shell) -> Result<String> {
        if let Some(entrance) = self.existing(&spec.command_line()) {
            return Ok(entrance);
        }
        let handle = TunnelHandle::open_double_hop(spec, shell).await?;
        let entrance = handle.entrance();
        self.handles.lock().push(handle);
        Ok(entrance)
    }

    /// Number of open tunnels
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// True if no tunnel is open
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Close every open tunnel.
    pub async fn shutdown(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            handle.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec() -> TunnelSpec {
        TunnelSpec::new("jump", "bastion.example.com", "10.0.0.5")
            .with_bridge_port(2200)
            .with_dest_port(22)
            .with_local_port(2022)
    }

    #[test]
    fn test_direct_command_line() {
        assert_eq!(
            shell_words::join(spec().command_line()),
            "ssh -q -o PasswordAuthentication=no -vAN -L 2022:10.0.0.5:22 -p 2200 jump@bastion.example.com"
        );
    }

    #[test]
    fn test_relaxed_host_key_flags() {
        let args = spec().with_strict_host_key_checking(false).command_line();
        assert_eq!(
            &args[..5],
            &[
                "ssh",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null"
            ]
        );
    }

    #[test]
    fn test_command_line_is_deterministic() {
        assert_eq!(spec().command_line(), spec().command_line());
    }

    #[test]
    fn test_double_hop_command_line() {
        let hop = DoubleHopSpec::new(Endpoint::new("deploy", "web1.internal", 2222), spec());
        let args = hop.command_line();

        assert_eq!(
            &args[..7],
            &["ssh", "-o", "PasswordAuthentication=no", "-vA", "-p", "2222", "deploy@web1.internal"]
        );
        assert_eq!(
            args[7],
            "ssh -q -o PasswordAuthentication=no -v -L 2022:10.0.0.5:22 -p 2200 jump@bastion.example.com -A -N -M"
        );
        assert_eq!(hop.settle, DOUBLE_HOP_SETTLE);
    }

    #[test]
    fn test_from_config() {
        let config = ConfigRecord::new(
            "behind-bastion",
            serde_yaml::from_str(
                r#"
                disableKnownHosts: true
                sshTunnel:
                  bridgeUser: jump
                  bridgeHost: bastion
                  destHost: 10.0.0.5
                  localPort: 7022
                  timeout: 10
                "#,
            )
            .unwrap(),
        );

        let spec = TunnelSpec::from_config(&config).unwrap().unwrap();
        assert_eq!(spec.local_port, 7022);
        assert_eq!(spec.bridge_port, 22);
        assert_eq!(spec.timeout, Duration::from_secs(10));
        assert!(!spec.strict_host_key_checking);
        assert_eq!(spec.entrance(), "localhost:7022");
    }

    #[test]
    fn test_from_config_reports_missing_tunnel_keys() {
        let config = ConfigRecord::new(
            "broken",
            serde_yaml::from_str("sshTunnel: {bridgeHost: bastion}").unwrap(),
        );

        match TunnelSpec::from_config(&config).unwrap_err() {
            Error::Validation { missing, .. } => {
                let keys: Vec<_> = missing.iter().map(|m| m.key.as_str()).collect();
                assert_eq!(keys, vec!["sshTunnel/bridgeUser", "sshTunnel/destHost"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_tunnel_configured() {
        let config = ConfigRecord::new("plain", serde_yaml::from_str("host: a").unwrap());
        assert_eq!(TunnelSpec::from_config(&config).unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let spec = spec().with_program("/nonexistent/ssh-binary");
        assert!(matches!(
            TunnelHandle::open(&spec).await,
            Err(Error::Io(_))
        ));
    }
}
