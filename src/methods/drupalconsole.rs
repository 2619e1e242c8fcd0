//! Drupal Console capability.

use async_trait::async_trait;
use tracing::info;

use super::{Capability, TaskContext, TaskOutput};
use crate::error::Result;

/// Where the installer is fetched from.
pub const INSTALLER_URL: &str = "https://drupalconsole.com/installer";

/// Runs `drupal` commands in `rootFolder`.
pub struct DrupalConsoleMethod;

impl DrupalConsoleMethod {
    async fn install(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let shell = &ctx.shell;
        let _cwd = shell.cd(ctx.config.require("tmpFolder")?);

        shell
            .exec(&format!("curl {} -L -o drupal.phar", INSTALLER_URL))
            .await?;
        shell.exec("mv drupal.phar /usr/local/bin/drupal").await?;
        shell.exec("chmod +x /usr/local/bin/drupal").await?;
        shell.exec("drupal init").await?;

        info!(config = %ctx.config.name(), "Drupal Console installed");
        Ok(TaskOutput::changed("Drupal Console installed"))
    }
}

#[async_trait]
impl Capability for DrupalConsoleMethod {
    fn name(&self) -> &'static str {
        "drupalconsole"
    }

    fn supports(&self, capability: &str) -> bool {
        capability == "drupalconsole"
    }

    fn required_keys(&self, _capability: &str) -> Vec<&'static str> {
        vec!["rootFolder", "tmpFolder"]
    }

    fn provides(&self, task: &str) -> bool {
        task == "drupalconsole"
    }

    async fn invoke(&self, _capability: &str, task: &str, ctx: &TaskContext) -> Result<TaskOutput> {
        if task != "drupalconsole" {
            return Ok(TaskOutput::ok());
        }
        match ctx.args.command.as_deref() {
            Some("install") => self.install(ctx).await,
            command => {
                let command = command.unwrap_or("list");
                let _cwd = ctx.shell.cd(ctx.config.require("rootFolder")?);
                ctx.shell.exec(&format!("drupal {}", command)).await?;
                Ok(TaskOutput::changed(format!("drupal {}", command)))
            }
        }
    }
}
