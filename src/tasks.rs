//! High-level operations
//!
//! [`Hostwright`] ties the resolver, registry, runner and tunnel manager
//! together. Every operation takes a [`TaskContext`] built by
//! [`Hostwright::context`], which validates the configuration before anything
//! touches a host.

use indexmap::IndexMap;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::backup::{BackupName, BackupRecord, Catalog};
use crate::config::{ConfigRecord, ConfigResolver, Settings};
use crate::error::{Error, Result};
use crate::executor::Shell;
use crate::methods::{MethodRegistry, TaskArgs, TaskContext, TaskOutput};
use crate::runner::{preflight, run_task};
use crate::tunnel::TunnelManager;

/// Capability names answered by drush.
const DRUSH_FLAVORS: &[&str] = &["drush", "drush7", "drush8"];

/// The orchestrator for one invocation.
pub struct Hostwright {
    settings: Arc<Settings>,
    registry: Arc<MethodRegistry>,
    tunnels: Arc<TunnelManager>,
}

impl Hostwright {
    /// Create an orchestrator with the built-in capabilities
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            registry: Arc::new(MethodRegistry::with_builtins()),
            tunnels: Arc::new(TunnelManager::new()),
        }
    }

    /// Use a different registry
    pub fn with_registry(mut self, registry: MethodRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// The project document
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Tunnels opened so far
    pub fn tunnels(&self) -> &Arc<TunnelManager> {
        &self.tunnels
    }

    /// Configuration names, sorted
    pub fn config_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .settings
            .host_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Resolve a configuration by name
    pub fn resolve(&self, name: &str) -> Result<ConfigRecord> {
        ConfigResolver::new(&self.settings).resolve(name)
    }

    /// Resolve a configuration with per-invocation overrides
    pub fn resolve_with(&self, name: &str, overrides: &IndexMap<String, Value>) -> Result<ConfigRecord> {
        ConfigResolver::new(&self.settings).resolve_with(name, overrides)
    }

    /// Validate a configuration and bind a shell to its host.
    pub fn context(&self, config: &ConfigRecord) -> Result<TaskContext> {
        self.registry.validate(config)?;
        let shell = Shell::for_config(config)?;
        Ok(self.bind(config, shell))
    }

    /// Validate a configuration and use the given shell.
    pub fn context_with_shell(&self, config: &ConfigRecord, shell: Shell) -> Result<TaskContext> {
        self.registry.validate(config)?;
        Ok(self.bind(config, shell))
    }

    fn bind(&self, config: &ConfigRecord, shell: Shell) -> TaskContext {
        TaskContext::new(
            Arc::new(config.clone()),
            Arc::clone(&self.settings),
            shell,
            Arc::clone(&self.registry),
            Arc::clone(&self.tunnels),
        )
    }

    /// Close every tunnel opened during this invocation
    pub async fn shutdown(&self) {
        self.tunnels.shutdown().await;
    }

    fn with_args(ctx: &TaskContext, args: TaskArgs) -> TaskContext {
        ctx.clone().with_args(args)
    }

    fn refuse(ctx: &TaskContext, task: &str, reason: impl Into<String>) -> Error {
        Error::TaskNotAllowed {
            task: task.to_string(),
            config: ctx.config.name().to_string(),
            reason: reason.into(),
        }
    }

    /// Call one capability directly, after the host is brought within reach.
    async fn call(&self, capability: &str, task: &str, ctx: &TaskContext) -> Result<TaskOutput> {
        preflight(ctx).await?;
        self.registry.call(capability, task, ctx).await
    }

    /// Short commit hash when the host uses git, else empty.
    async fn current_hash(&self, ctx: &TaskContext) -> Result<String> {
        if !ctx.config.needs().iter().any(|need| need == "git") {
            return Ok(String::new());
        }
        let output = self.call("git", "backupPrepare", ctx).await?;
        Ok(output.version.unwrap_or_default())
    }

    /// Back up the database, and the files folder when `with_files` is set.
    pub async fn backup(&self, ctx: &TaskContext, with_files: bool) -> Result<TaskOutput> {
        info!(
            project = %self.settings.name,
            config = %ctx.config.name(),
            with_files,
            "Backing up"
        );
        let hash = self.current_hash(ctx).await?;
        let args = TaskArgs {
            backup_name: Some(BackupName::now(ctx.config.name(), hash)),
            with_files,
            ..TaskArgs::default()
        };
        run_task(&Self::with_args(ctx, args), "backup", &[]).await
    }

    /// Every backup artifact on the host, sorted.
    pub async fn list_backups(&self, ctx: &TaskContext) -> Result<Catalog> {
        let output = run_task(ctx, "listBackups", &[]).await?;
        Ok(Catalog::new(output.backups))
    }

    /// The artifacts of the backup `identifier` names.
    pub async fn find_backups(&self, ctx: &TaskContext, identifier: &str) -> Result<Vec<BackupRecord>> {
        self.list_backups(ctx).await?.find(identifier)
    }

    /// Restore a backup, then reset.
    pub async fn restore(
        &self,
        ctx: &TaskContext,
        identifier: &str,
        cleanup_before_restore: bool,
    ) -> Result<TaskOutput> {
        let backups = self.find_backups(ctx, identifier).await?;
        info!(config = %ctx.config.name(), identifier = %identifier, artifacts = backups.len(), "Restoring");
        let args = TaskArgs {
            backups,
            cleanup_before_restore,
            ..TaskArgs::default()
        };
        run_task(&Self::with_args(ctx, args), "restore", &["reset"]).await
    }

    /// Download a backup's artifacts into `local_dir`.
    pub async fn get_backup(
        &self,
        ctx: &TaskContext,
        identifier: &str,
        local_dir: &Path,
    ) -> Result<TaskOutput> {
        let folder = ctx.config.require("backupFolder")?;
        let records = self.find_backups(ctx, identifier).await?;
        preflight(ctx).await?;
        let mut output = TaskOutput::ok();
        for record in records {
            let remote = PathBuf::from(format!("{}/{}", folder, record.file));
            let local = local_dir.join(&record.file);
            ctx.shell.download(&remote, &local).await?;
            output.merge(TaskOutput::changed(format!("Fetched {}", record.file)).with_file(local.display().to_string()));
        }
        Ok(output)
    }

    /// Deploy the configured (or overridden) branch, then reset.
    pub async fn deploy(&self, ctx: &TaskContext, override_branch: Option<&str>) -> Result<TaskOutput> {
        let ctx = match override_branch {
            Some(branch) => {
                let config = Arc::new(ctx.config.with_value("branch", branch));
                ctx.for_host(config, ctx.shell.clone())
            }
            None => ctx.clone(),
        };

        let mut output = TaskOutput::ok();
        if ctx.config.get_bool("backupBeforeDeploy") {
            output.merge(self.backup(&ctx, false).await?);
        }

        let args = TaskArgs {
            backup_name: Some(BackupName::now(ctx.config.name(), "")),
            ..TaskArgs::default()
        };
        output.merge(run_task(&Self::with_args(&ctx, args), "deploy", &["reset"]).await?);
        Ok(output)
    }

    /// Bring the application in line with the deployed code.
    pub async fn reset(&self, ctx: &TaskContext, with_password_reset: bool) -> Result<TaskOutput> {
        let args = TaskArgs {
            with_password_reset,
            ..TaskArgs::default()
        };
        run_task(&Self::with_args(ctx, args), "reset", &[]).await
    }

    fn source_args(&self, ctx: &TaskContext, source: &str) -> Result<TaskArgs> {
        let source = self.resolve(source)?;
        self.registry.validate(&source)?;
        if source.name() == ctx.config.name() {
            return Err(Self::refuse(ctx, "copyFrom", "source and target are the same configuration"));
        }
        Ok(TaskArgs {
            source: Some(Arc::new(source)),
            ..TaskArgs::default()
        })
    }

    /// Copy the database from another configuration, then reset.
    pub async fn copy_db_from(&self, ctx: &TaskContext, source: &str) -> Result<TaskOutput> {
        let args = self.source_args(ctx, source)?;
        run_task(&Self::with_args(ctx, args), "copyDbFrom", &["reset"]).await
    }

    /// Copy the files folder from another configuration.
    pub async fn copy_files_from(&self, ctx: &TaskContext, source: &str) -> Result<TaskOutput> {
        let args = self.source_args(ctx, source)?;
        run_task(&Self::with_args(ctx, args), "copyFilesFrom", &[]).await
    }

    /// Copy database and files from another configuration.
    pub async fn copy_from(&self, ctx: &TaskContext, source: &str) -> Result<TaskOutput> {
        let mut output = self.copy_db_from(ctx, source).await?;
        output.merge(self.copy_files_from(ctx, source).await?);
        Ok(output)
    }

    /// Import a SQL file already on the host.
    pub async fn restore_sql_from_file(&self, ctx: &TaskContext, file: &str) -> Result<TaskOutput> {
        let args = TaskArgs {
            source_file: Some(file.to_string()),
            ..TaskArgs::default()
        };
        run_task(&Self::with_args(ctx, args), "restoreSqlFromFile", &[]).await
    }

    /// Install the application from scratch, then reset.
    ///
    /// Refused on `prod` and on hosts without `supportsInstalls`.
    pub async fn install(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        if ctx.config.config_type() == "prod" {
            return Err(Self::refuse(ctx, "install", "configuration type is 'prod'"));
        }
        if !ctx.config.get_bool("supportsInstalls") {
            return Err(Self::refuse(ctx, "install", "'supportsInstalls' is not set"));
        }
        run_task(ctx, "install", &["reset"]).await
    }

    /// Update application dependencies on a dev host, after a database backup.
    pub async fn update_app(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        if ctx.config.config_type() != "dev" {
            return Err(Self::refuse(
                ctx,
                "updateApp",
                format!("configuration type is '{}', not 'dev'", ctx.config.config_type()),
            ));
        }
        let mut output = self.backup(ctx, false).await?;
        output.merge(run_task(ctx, "updateApp", &[]).await?);
        Ok(output)
    }

    /// `git describe` of the deployed code.
    pub async fn version(&self, ctx: &TaskContext) -> Result<String> {
        let output = self.call("git", "version", ctx).await?;
        Ok(output.version.unwrap_or_default())
    }

    async fn pass_through(
        &self,
        ctx: &TaskContext,
        capability: &str,
        task: &str,
        command: &str,
    ) -> Result<TaskOutput> {
        let args = TaskArgs {
            command: Some(command.to_string()),
            ..TaskArgs::default()
        };
        self.call(capability, task, &Self::with_args(ctx, args)).await
    }

    /// Run a drush command in `siteFolder`.
    pub async fn drush(&self, ctx: &TaskContext, command: &str) -> Result<TaskOutput> {
        let flavor = self
            .registry
            .first_needed(&ctx.config, DRUSH_FLAVORS)
            .ok_or_else(|| Error::unsupported("drush", ctx.config.config_type()))?;
        self.pass_through(ctx, &flavor, "drush", command).await
    }

    /// Run a Drupal Console command (`install` fetches the tool).
    pub async fn drupalconsole(&self, ctx: &TaskContext, command: &str) -> Result<TaskOutput> {
        self.pass_through(ctx, "drupalconsole", "drupalconsole", command)
            .await
    }

    /// Run a composer command in `rootFolder`.
    pub async fn composer(&self, ctx: &TaskContext, command: &str) -> Result<TaskOutput> {
        self.pass_through(ctx, "composer", "composer", command).await
    }

    /// Run a named script.
    pub async fn script(
        &self,
        ctx: &TaskContext,
        name: &str,
        positional: Vec<String>,
        arguments: IndexMap<String, String>,
    ) -> Result<TaskOutput> {
        let args = TaskArgs {
            script: Some(name.to_string()),
            positional,
            arguments,
            ..TaskArgs::default()
        };
        self.call("script", "runScript", &Self::with_args(ctx, args))
            .await
    }

    /// Copy a remote file to the control node.
    pub async fn get_file(&self, ctx: &TaskContext, remote: &str, local: &str) -> Result<TaskOutput> {
        let args = TaskArgs {
            remote_path: Some(remote.to_string()),
            local_path: Some(local.to_string()),
            ..TaskArgs::default()
        };
        self.call("files", "get", &Self::with_args(ctx, args)).await
    }

    /// Upload a local file into the host's `tmpFolder`.
    ///
    /// Refused when the configuration runs locally.
    pub async fn put_file(&self, ctx: &TaskContext, local: &str) -> Result<TaskOutput> {
        if ctx.config.runs_locally() {
            return Err(Self::refuse(ctx, "putFile", "'runLocally' is set"));
        }
        let args = TaskArgs {
            local_path: Some(local.to_string()),
            ..TaskArgs::default()
        };
        self.call("files", "put", &Self::with_args(ctx, args)).await
    }

    /// Open an interactive shell on the host, in `rootFolder`.
    pub async fn open_shell(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        self.call("ssh", "openShell", ctx).await
    }

    /// Dump the database and download it into `local_dir`.
    pub async fn get_sql_dump(&self, ctx: &TaskContext, local_dir: &str) -> Result<TaskOutput> {
        let flavor = self
            .registry
            .first_needed(&ctx.config, DRUSH_FLAVORS)
            .ok_or_else(|| Error::unsupported("drush", ctx.config.config_type()))?;
        let args = TaskArgs {
            backup_name: Some(BackupName::now(ctx.config.name(), "")),
            local_path: Some(local_dir.to_string()),
            ..TaskArgs::default()
        };
        self.call(&flavor, "getSqlDump", &Self::with_args(ctx, args))
            .await
    }
}

/// A slash-separated property of a configuration, rendered as text.
pub fn get_property(config: &ConfigRecord, path: &str) -> Result<String> {
    let value = config
        .get(path)
        .ok_or_else(|| Error::invalid_config(path, "property not found"))?;
    Ok(match value {
        Value::String(s) => s.clone(),
        Value::Null => "~".to_string(),
        other => serde_yaml::to_string(other)?.trim_end().to_string(),
    })
}

/// Flattened `key: value` listing of a configuration.
pub fn about(config: &ConfigRecord) -> Vec<(String, String)> {
    let lines = config.describe();
    if lines.is_empty() {
        warn!(config = %config.name(), "Configuration is empty");
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ConfigRecord {
        ConfigRecord::new(
            "live",
            serde_yaml::from_str::<IndexMap<String, Value>>(
                "host: example.com\nport: 22\ndatabase: {name: site}\nneeds: [ssh]",
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_get_property() {
        let config = record();
        assert_eq!(get_property(&config, "host").unwrap(), "example.com");
        assert_eq!(get_property(&config, "port").unwrap(), "22");
        assert_eq!(get_property(&config, "database/name").unwrap(), "site");
        assert!(matches!(
            get_property(&config, "database/user"),
            Err(Error::InvalidConfig { key, .. }) if key == "database/user"
        ));
    }

    #[test]
    fn test_about_lists_nested_keys() {
        let lines = about(&record());
        assert!(lines.contains(&("database/name".to_string(), "site".to_string())));
        assert!(lines.contains(&("needs/0".to_string(), "ssh".to_string())));
    }

    #[test]
    fn test_context_validates_before_binding() {
        let hw = Hostwright::new(Settings::from_yaml_str("hosts: {}\n").unwrap());
        match hw.context(&record()) {
            Err(Error::Validation { missing, .. }) => {
                let keys: Vec<&str> = missing.iter().map(|m| m.key.as_str()).collect();
                assert_eq!(keys, vec!["user"]);
            }
            other => panic!("expected a validation error, got {:?}", other),
        }

        let config = record().with_value("user", "deploy");
        let ctx = hw.context(&config).unwrap();
        assert_eq!(ctx.config.name(), "live");
        assert!(hw.tunnels().is_empty());
    }

    #[test]
    fn test_config_names_sorted() {
        let settings = Settings::from_yaml_str("hosts:\n  zeta: {}\n  alpha: {}\n").unwrap();
        assert_eq!(Hostwright::new(settings).config_names(), vec!["alpha", "zeta"]);
    }
}
