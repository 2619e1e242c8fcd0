//! Git capability: deploys by pulling the configured branch.

use async_trait::async_trait;

use super::{Capability, TaskContext, TaskOutput};
use crate::error::Result;
use crate::executor::RunOptions;

/// Source checkout in `rootFolder`.
pub struct GitMethod;

impl GitMethod {
    async fn deploy(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let branch = ctx.config.require("branch")?;
        let _cwd = ctx.shell.cd(ctx.config.require("rootFolder")?);
        let branch = shell_words::quote(&branch);

        ctx.shell.exec("git fetch -q origin").await?;
        ctx.shell.exec(&format!("git checkout {}", branch)).await?;
        ctx.shell
            .exec(&format!("git pull -q origin {}", branch))
            .await?;
        ctx.shell
            .run(
                "git submodule update --init",
                RunOptions::new().warn_only(true),
            )
            .await?;

        Ok(TaskOutput::changed(format!("Deployed branch {}", branch)))
    }

    async fn describe(&self, ctx: &TaskContext, command: &str) -> Result<TaskOutput> {
        let _cwd = ctx.shell.cd(ctx.config.require("rootFolder")?);
        let result = ctx
            .shell
            .run(command, RunOptions::new().quiet(true))
            .await?;
        Ok(TaskOutput::ok().with_version(result.stdout.trim()))
    }
}

#[async_trait]
impl Capability for GitMethod {
    fn name(&self) -> &'static str {
        "git"
    }

    fn supports(&self, capability: &str) -> bool {
        capability == "git"
    }

    fn required_keys(&self, _capability: &str) -> Vec<&'static str> {
        vec!["rootFolder", "branch"]
    }

    fn provides(&self, task: &str) -> bool {
        matches!(task, "deploy" | "version" | "backupPrepare")
    }

    async fn invoke(&self, _capability: &str, task: &str, ctx: &TaskContext) -> Result<TaskOutput> {
        match task {
            "deploy" => self.deploy(ctx).await,
            "version" => self.describe(ctx, "git describe --always").await,
            "backupPrepare" => self.describe(ctx, "git rev-parse --short HEAD").await,
            _ => Ok(TaskOutput::ok()),
        }
    }
}
