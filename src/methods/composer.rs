//! Composer capability.

use async_trait::async_trait;

use super::{Capability, TaskContext, TaskOutput};
use crate::error::Result;

/// Runs `composer` in `rootFolder`.
///
/// Installs dependencies ahead of a dev reset and updates them on `updateApp`.
pub struct ComposerMethod;

#[async_trait]
impl Capability for ComposerMethod {
    fn name(&self) -> &'static str {
        "composer"
    }

    fn supports(&self, capability: &str) -> bool {
        capability == "composer"
    }

    fn required_keys(&self, _capability: &str) -> Vec<&'static str> {
        vec!["rootFolder"]
    }

    fn provides(&self, task: &str) -> bool {
        matches!(task, "composer" | "resetPrepare" | "updateApp")
    }

    async fn invoke(&self, _capability: &str, task: &str, ctx: &TaskContext) -> Result<TaskOutput> {
        let command = match task {
            "composer" => ctx.args.command.clone().unwrap_or_else(|| "install".to_string()),
            "resetPrepare" if ctx.config.config_type() == "dev" => "install".to_string(),
            "updateApp" => "update".to_string(),
            _ => return Ok(TaskOutput::ok()),
        };

        let _cwd = ctx.shell.cd(ctx.config.require("rootFolder")?);
        ctx.shell.exec(&format!("composer {}", command)).await?;
        Ok(TaskOutput::changed(format!("composer {}", command)))
    }
}
