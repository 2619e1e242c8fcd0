//! SSH capability: opens the configured tunnel before any other work, and
//! hands the terminal to an interactive session on request.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::{Capability, TaskContext, TaskOutput};
use crate::connection::{Endpoint, SshConnection};
use crate::error::{Error, Result};
use crate::tunnel::{is_double_hop, DoubleHopSpec, TunnelSpec};

/// Tunnel setup for hosts behind a bastion.
pub struct SshMethod;

impl SshMethod {
    async fn preflight(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let config = &ctx.config;
        if config.runs_locally() {
            return Ok(TaskOutput::ok());
        }
        let Some(spec) = TunnelSpec::from_config(config)? else {
            return Ok(TaskOutput::ok());
        };

        let target = Endpoint::from_config(config)?;
        if is_double_hop(config) {
            let hop = DoubleHopSpec::new(target, spec);
            let entrance = ctx.tunnels.open_double_hop(&hop, &ctx.shell).await?;
            info!(config = %config.name(), entrance = %entrance, "Double-hop tunnel open");
            return Ok(TaskOutput::ok().with_entrance(entrance));
        }

        let entrance = ctx.tunnels.open(&spec).await?;
        let through = Endpoint::new(target.user.as_str(), "localhost", spec.local_port);
        ctx.shell.retarget(Arc::new(
            SshConnection::new(through)
                .with_strict_host_key_checking(spec.strict_host_key_checking),
        ));
        info!(config = %config.name(), entrance = %entrance, "Tunnel open");
        Ok(TaskOutput::ok().with_entrance(entrance))
    }

    /// Where an interactive session should log in; through the tunnel
    /// entrance when a direct tunnel is configured.
    fn shell_endpoint(ctx: &TaskContext) -> Result<Endpoint> {
        let config = &ctx.config;
        let target = Endpoint::from_config(config)?;
        match TunnelSpec::from_config(config)? {
            Some(spec) if !is_double_hop(config) => {
                Ok(Endpoint::new(target.user, "localhost", spec.local_port))
            }
            _ => Ok(target),
        }
    }

    async fn open_shell(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let config = &ctx.config;
        if config.runs_locally() {
            return Err(Error::TaskNotAllowed {
                task: "ssh".to_string(),
                config: config.name().to_string(),
                reason: "'runLocally' is set".to_string(),
            });
        }

        let connection = SshConnection::new(Self::shell_endpoint(ctx)?)
            .with_strict_host_key_checking(!config.get_bool("disableKnownHosts"));
        let code = connection
            .open_shell(config.get_string("rootFolder").as_deref())
            .await?;
        if code != 0 {
            warn!(config = %config.name(), exit_code = code, "Interactive session ended with an error");
        }
        Ok(TaskOutput::ok())
    }
}

#[async_trait]
impl Capability for SshMethod {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn supports(&self, capability: &str) -> bool {
        capability == "ssh"
    }

    fn provides(&self, task: &str) -> bool {
        matches!(task, "preflight" | "openShell")
    }

    async fn invoke(&self, _capability: &str, task: &str, ctx: &TaskContext) -> Result<TaskOutput> {
        match task {
            "preflight" => self.preflight(ctx).await,
            "openShell" => self.open_shell(ctx).await,
            _ => Ok(TaskOutput::ok()),
        }
    }
}
