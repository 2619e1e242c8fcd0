//! Files capability: archives and restores the public files folder, and
//! moves single files between the control node and the host.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{Capability, TaskContext, TaskOutput};
use crate::backup::{list_artifacts, BackupName};
use crate::connection::NO_STRICT_HOST_KEY_CHECKING;
use crate::error::{Error, Result};
use crate::executor::RunOptions;

/// Method name recorded on file archives.
pub const METHOD: &str = "files";

/// File archive patterns.
pub const PATTERNS: &[&str] = &["*.tgz"];

/// Tarballs of `filesFolder` in `backupFolder`.
pub struct FilesMethod;

impl FilesMethod {
    async fn backup(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        if !ctx.args.with_files {
            return Ok(TaskOutput::ok());
        }
        let name = ctx
            .args
            .backup_name
            .clone()
            .unwrap_or_else(|| BackupName::now(ctx.config.name(), ""));
        let backup_folder = ctx.config.require("backupFolder")?;
        let files_folder = ctx.config.require("filesFolder")?;
        let file = format!("{}/{}", backup_folder, name.file_name(".tgz"));

        ctx.shell
            .run(&format!("mkdir -p {}", backup_folder), RunOptions::best_effort())
            .await?;
        ctx.shell
            .exec(&format!("tar -czf {} -C {} .", file, files_folder))
            .await?;

        Ok(TaskOutput::changed(format!("Files archived at {}", file)).with_file(file))
    }

    async fn list_backups(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let folder = ctx.config.require("backupFolder")?;
        let records = list_artifacts(&ctx.shell, &folder, METHOD, PATTERNS).await?;
        Ok(TaskOutput::ok().with_backups(records))
    }

    async fn restore(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let Some(record) = ctx.args.backups.iter().find(|r| r.method == METHOD) else {
            return Ok(TaskOutput::ok());
        };
        let file = format!("{}/{}", ctx.config.require("backupFolder")?, record.file);
        let files_folder = ctx.config.require("filesFolder")?;

        ctx.shell
            .run(&format!("mkdir -p {}", files_folder), RunOptions::best_effort())
            .await?;
        ctx.shell
            .exec(&format!("tar -xzf {} -C {}", file, files_folder))
            .await?;

        Ok(TaskOutput::changed(format!("Files restored from {}", file)))
    }

    async fn copy_files_from(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let source = ctx.args.source.as_ref().ok_or_else(|| Error::TaskNotAllowed {
            task: "copyFilesFrom".to_string(),
            config: ctx.config.name().to_string(),
            reason: "no source configuration given".to_string(),
        })?;

        let mut ssh = vec![
            "ssh".to_string(),
            "-T".to_string(),
            "-o".to_string(),
            "Compression=no".to_string(),
        ];
        ssh.extend(NO_STRICT_HOST_KEY_CHECKING.iter().map(|s| s.to_string()));
        ssh.push("-p".to_string());
        ssh.push(source.require("port")?);

        let command = format!(
            "rsync -rav --no-o --no-g -e {} {}@{}:{}/ {}",
            shell_words::quote(&shell_words::join(&ssh)),
            source.require("user")?,
            source.require("host")?,
            source.require("filesFolder")?.trim_end_matches('/'),
            ctx.config.require("filesFolder")?
        );
        ctx.shell.exec(&command).await?;

        Ok(TaskOutput::changed(format!(
            "Files copied from {} to {}",
            source.name(),
            ctx.config.name()
        )))
    }

    async fn get(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let remote = ctx
            .args
            .remote_path
            .clone()
            .ok_or_else(|| Error::invalid_config("remotePath", "no remote path given"))?;
        let local = ctx
            .args
            .local_path
            .clone()
            .unwrap_or_else(|| ".".to_string());

        let mut local = PathBuf::from(local);
        if local.is_dir() {
            if let Some(name) = PathBuf::from(&remote).file_name() {
                local = local.join(name);
            }
        }
        ctx.shell.download(&PathBuf::from(&remote), &local).await?;

        Ok(TaskOutput::changed(format!("Fetched {}", remote)).with_file(local.display().to_string()))
    }

    /// Upload a local file into `tmpFolder`.
    async fn put(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let local = ctx
            .args
            .local_path
            .clone()
            .map(PathBuf::from)
            .ok_or_else(|| Error::invalid_config("fileName", "no local file given"))?;
        let name = local
            .file_name()
            .ok_or_else(|| Error::invalid_config("fileName", "must name a file"))?;
        let remote = PathBuf::from(ctx.config.require("tmpFolder")?).join(name);

        ctx.shell.upload(&local, &remote).await?;

        let remote = remote.display().to_string();
        Ok(TaskOutput::changed(format!("Uploaded {} to {}", local.display(), remote)).with_file(remote))
    }
}

#[async_trait]
impl Capability for FilesMethod {
    fn name(&self) -> &'static str {
        "files"
    }

    fn supports(&self, capability: &str) -> bool {
        capability == "files"
    }

    fn required_keys(&self, _capability: &str) -> Vec<&'static str> {
        vec!["filesFolder", "backupFolder"]
    }

    fn provides(&self, task: &str) -> bool {
        matches!(
            task,
            "backup" | "listBackups" | "restore" | "copyFilesFrom" | "get" | "put"
        )
    }

    async fn invoke(&self, _capability: &str, task: &str, ctx: &TaskContext) -> Result<TaskOutput> {
        match task {
            "backup" => self.backup(ctx).await,
            "listBackups" => self.list_backups(ctx).await,
            "restore" => self.restore(ctx).await,
            "copyFilesFrom" => self.copy_files_from(ctx).await,
            "get" => self.get(ctx).await,
            "put" => self.put(ctx).await,
            _ => Ok(TaskOutput::ok()),
        }
    }
}
