//! Drush capability for Drupal sites.
//!
//! Answers for `drush`, `drush7` and `drush8`. The flavor decides how `reset`
//! applies configuration: drush8 sets the site uuid, imports configuration
//! and rebuilds caches; drush7 reverts features and clears caches.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

use super::script;
use super::{Capability, TaskContext, TaskOutput};
use crate::backup::{list_artifacts, BackupName, BackupRecord};
use crate::config::ConfigRecord;
use crate::connection::NO_STRICT_HOST_KEY_CHECKING;
use crate::error::{Error, Result};
use crate::executor::{RunOptions, Shell};

/// Method name recorded on database artifacts.
pub const METHOD: &str = "drush";

/// Database artifact patterns.
pub const PATTERNS: &[&str] = &["*.sql", "*.sql.gz"];

/// Drush major version a capability name selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// Drupal 7 tooling
    Drush7,
    /// Drupal 8+ tooling
    Drush8,
}

impl Flavor {
    /// `drush7` selects Drush7; `drush` and `drush8` select Drush8.
    pub fn from_capability(capability: &str) -> Self {
        match capability {
            "drush7" => Flavor::Drush7,
            _ => Flavor::Drush8,
        }
    }
}

/// `drush sql-dump` options for a host.
pub fn dump_options(config: &ConfigRecord) -> String {
    let mut options = Vec::new();
    let skip = config.get_list("sqlSkipTables");
    if !skip.is_empty() {
        options.push(format!("--structure-tables-list={}", skip.join(",")));
    }
    if config.get_bool("supportsZippedBackups") {
        options.push("--gzip".to_string());
    }
    options.join(" ")
}

/// Dump the database of `config` into `file` using `shell`.
///
/// Returns the path actually written, with `.gz` appended when zipped.
pub async fn backup_sql(shell: &Shell, config: &ConfigRecord, file: &str) -> Result<String> {
    let _cwd = shell.cd(config.require("siteFolder")?);
    let zipped = config.get_bool("supportsZippedBackups");

    shell
        .run(
            &format!("mkdir -p {}", config.require("backupFolder")?),
            RunOptions::best_effort(),
        )
        .await?;
    shell
        .run(&format!("rm -f {}", file), RunOptions::best_effort())
        .await?;
    if zipped {
        shell
            .run(&format!("rm -f {}.gz", file), RunOptions::best_effort())
            .await?;
    }

    let options = dump_options(config);
    let command = if options.is_empty() {
        format!("drush sql-dump --result-file={}", file)
    } else {
        format!("drush sql-dump {} --result-file={}", options, file)
    };
    shell.exec(&command).await?;

    Ok(if zipped {
        format!("{}.gz", file)
    } else {
        file.to_string()
    })
}

/// Import a SQL file into the database of `config`.
pub async fn import_sql(
    shell: &Shell,
    config: &ConfigRecord,
    file: &str,
    zipped: bool,
    drop_first: bool,
) -> Result<()> {
    let _cwd = shell.cd(config.require("siteFolder")?);
    if drop_first {
        shell.exec("drush sql-drop -y").await?;
    }
    if zipped {
        shell
            .exec(&format!("zcat {} | $(drush sql-connect)", file))
            .await?;
    } else {
        shell.exec(&format!("drush sql-cli < {}", file)).await?;
    }
    info!(file = %file, "SQL restored");
    Ok(())
}

/// Drupal site maintenance through drush.
pub struct DrushMethod;

impl DrushMethod {
    async fn reset(&self, flavor: Flavor, ctx: &TaskContext) -> Result<TaskOutput> {
        let config = &ctx.config;
        let shell = &ctx.shell;
        let best_effort = RunOptions::new().warn_only(true);

        let uuid = match flavor {
            Flavor::Drush8 => {
                let uuid = config
                    .get_string("uuid")
                    .or_else(|| ctx.settings.uuid.clone());
                if uuid.is_none() {
                    warn!(config = %config.name(), "No uuid configured, config-import may fail");
                }
                uuid
            }
            Flavor::Drush7 => None,
        };

        let _cwd = shell.cd(config.require("siteFolder")?);

        if config.config_type() == "dev" {
            if ctx.args.with_password_reset {
                shell
                    .exec("drush user-password admin --password=\"admin\"")
                    .await?;
            }
            match config.get_string("filesFolder") {
                Some(files) => {
                    shell
                        .run(&format!("chmod -R 777 {}", files), RunOptions::best_effort())
                        .await?;
                }
                None => warn!(config = %config.name(), "No filesFolder configured, skipping chmod"),
            }
        }

        if let Some(module) = config
            .get_string("deploymentModule")
            .or_else(|| ctx.settings.deployment_module.clone())
        {
            shell
                .run(&format!("drush en -y {}", module), best_effort.clone())
                .await?;
        }

        shell.exec("drush updb -y").await?;

        match flavor {
            Flavor::Drush8 => {
                if let Some(uuid) = &uuid {
                    shell
                        .run(
                            &format!("drush cset system.site uuid {} -y", uuid),
                            best_effort.clone(),
                        )
                        .await?;
                }
                shell
                    .run("drush config-import staging -y", best_effort.clone())
                    .await?;
            }
            Flavor::Drush7 => {
                shell.run("drush fra -y", best_effort.clone()).await?;
            }
        }

        let mut output = TaskOutput::changed(format!("Reset {}", config.name()));
        output.merge(script::run_common_scripts(ctx, best_effort.clone()).await?);
        output.merge(script::run_task_specific_script(ctx, "reset", best_effort.clone()).await?);

        match flavor {
            Flavor::Drush8 => shell.run("drush cr", best_effort).await?,
            Flavor::Drush7 => shell.run("drush cc all", best_effort).await?,
        };

        Ok(output)
    }

    async fn drush(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let command = ctx.args.command.as_deref().unwrap_or("status");
        let _cwd = ctx.shell.cd(ctx.config.require("siteFolder")?);
        let result = ctx.shell.exec(&format!("drush {}", command)).await?;
        let mut output = TaskOutput::changed(format!("drush {}", command));
        output.messages.push(result.stdout);
        Ok(output)
    }

    fn backup_name(ctx: &TaskContext) -> BackupName {
        ctx.args
            .backup_name
            .clone()
            .unwrap_or_else(|| BackupName::now(ctx.config.name(), ""))
    }

    async fn backup(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let name = Self::backup_name(ctx);
        let file = format!(
            "{}/{}",
            ctx.config.require("backupFolder")?,
            name.file_name(".sql")
        );
        let written = backup_sql(&ctx.shell, &ctx.config, &file).await?;
        info!(file = %written, "Database dump written");
        Ok(TaskOutput::changed(format!("Database dump at {}", written)).with_file(written))
    }

    async fn backup_sql_to(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let file = ctx
            .args
            .source_file
            .clone()
            .ok_or_else(|| Error::invalid_config("backupFile", "no target file given"))?;
        let written = backup_sql(&ctx.shell, &ctx.config, &file).await?;
        Ok(TaskOutput::changed(format!("Database dump at {}", written)).with_file(written))
    }

    async fn list_backups(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let folder = ctx.config.require("backupFolder")?;
        let records = list_artifacts(&ctx.shell, &folder, METHOD, PATTERNS).await?;

        let zipped = ctx.config.get_bool("supportsZippedBackups");
        let mismatched = records.iter().filter(|r| r.zipped != zipped).count();
        if mismatched > 0 {
            warn!(
                config = %ctx.config.name(),
                count = mismatched,
                supports_zipped_backups = zipped,
                "Some database backups do not match the zipped backup setting"
            );
        }

        Ok(TaskOutput::ok().with_backups(records))
    }

    fn selected(ctx: &TaskContext) -> Option<&BackupRecord> {
        ctx.args.backups.iter().find(|r| r.method == METHOD)
    }

    async fn restore(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let Some(record) = Self::selected(ctx) else {
            return Ok(TaskOutput::ok());
        };
        let file = format!("{}/{}", ctx.config.require("backupFolder")?, record.file);
        import_sql(
            &ctx.shell,
            &ctx.config,
            &file,
            record.zipped,
            ctx.args.cleanup_before_restore,
        )
        .await?;
        Ok(TaskOutput::changed(format!("SQL restored from {}", file)))
    }

    async fn restore_from_file(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let file = ctx
            .args
            .source_file
            .clone()
            .ok_or_else(|| Error::invalid_config("sourceFile", "no SQL file given"))?;
        let zipped = file.ends_with(".gz");
        import_sql(&ctx.shell, &ctx.config, &file, zipped, false).await?;
        Ok(TaskOutput::changed(format!("SQL restored from {}", file)))
    }

    async fn copy_db_from(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let source = ctx.args.source.as_ref().ok_or_else(|| Error::TaskNotAllowed {
            task: "copyDbFrom".to_string(),
            config: ctx.config.name().to_string(),
            reason: "no source configuration given".to_string(),
        })?;
        let target = &ctx.config;
        let source_shell = Shell::for_config(source)?;

        let source_tmp = source.require("tmpFolder")?;
        let target_tmp = target.require("tmpFolder")?;
        let source_file = format!("{}/{}.sql", source_tmp.trim_end_matches('/'), target.name());
        let mut target_file = format!(
            "{}/{}_target.sql",
            target_tmp.trim_end_matches('/'),
            target.name()
        );
        let zipped = source.get_bool("supportsZippedBackups");
        if zipped {
            target_file.push_str(".gz");
        }

        let source_file = backup_sql(&source_shell, source, &source_file).await?;

        let mut scp = vec![
            "scp".to_string(),
            "-P".to_string(),
            source.require("port")?,
        ];
        scp.extend(NO_STRICT_HOST_KEY_CHECKING.iter().map(|s| s.to_string()));
        scp.push(format!(
            "{}@{}:{}",
            source.require("user")?,
            source.require("host")?,
            source_file
        ));
        scp.push(target_file.clone());
        ctx.shell
            .exec(&format!("{} >>/dev/null", shell_words::join(&scp)))
            .await?;

        source_shell
            .run(&format!("rm {}", source_file), RunOptions::new().quiet(true))
            .await?;

        import_sql(&ctx.shell, target, &target_file, zipped, false).await?;
        ctx.shell
            .run(&format!("rm {}", target_file), RunOptions::new().quiet(true))
            .await?;

        Ok(TaskOutput::changed(format!(
            "Database copied from {} to {}",
            source.name(),
            target.name()
        )))
    }

    async fn install(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let config = &ctx.config;
        let shell = &ctx.shell;
        let profile = config
            .get_string("installProfile")
            .unwrap_or_else(|| "standard".to_string());

        if let Some(files) = config.get_string("filesFolder") {
            shell
                .run(&format!("mkdir -p {}", files), RunOptions::best_effort())
                .await?;
        }

        let _cwd = shell.cd(config.require("siteFolder")?);
        shell
            .exec(&format!(
                "drush site-install {} --account-name=admin --account-pass=admin -y",
                profile
            ))
            .await?;

        info!(config = %config.name(), profile = %profile, "Site installed");
        Ok(TaskOutput::changed(format!("Installed {} with profile {}", config.name(), profile)))
    }

    async fn get_sql_dump(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let name = Self::backup_name(ctx);
        let tmp = ctx.config.require("tmpFolder")?;
        let file = format!("{}/{}", tmp.trim_end_matches('/'), name.file_name(".sql"));
        let written = backup_sql(&ctx.shell, &ctx.config, &file).await?;

        let local = ctx
            .args
            .local_path
            .clone()
            .unwrap_or_else(|| ".".to_string());
        let file_name = written.rsplit('/').next().unwrap_or(&written).to_string();
        let local = PathBuf::from(local).join(&file_name);
        ctx.shell
            .download(&PathBuf::from(&written), &local)
            .await?;
        ctx.shell
            .run(&format!("rm {}", written), RunOptions::new().quiet(true))
            .await?;

        Ok(TaskOutput::changed(format!("SQL dump saved to {}", local.display()))
            .with_file(local.display().to_string()))
    }
}

#[async_trait]
impl Capability for DrushMethod {
    fn name(&self) -> &'static str {
        "drush"
    }

    fn supports(&self, capability: &str) -> bool {
        matches!(capability, "drush" | "drush7" | "drush8")
    }

    fn required_keys(&self, _capability: &str) -> Vec<&'static str> {
        vec!["siteFolder", "backupFolder"]
    }

    fn provides(&self, task: &str) -> bool {
        matches!(
            task,
            "reset"
                | "drush"
                | "backup"
                | "backupSql"
                | "listBackups"
                | "restore"
                | "restoreSqlFromFile"
                | "copyDbFrom"
                | "deployPrepare"
                | "getSqlDump"
                | "install"
        )
    }

    async fn invoke(&self, capability: &str, task: &str, ctx: &TaskContext) -> Result<TaskOutput> {
        let flavor = Flavor::from_capability(capability);
        match task {
            "reset" => self.reset(flavor, ctx).await,
            "drush" => self.drush(ctx).await,
            "backup" => self.backup(ctx).await,
            "backupSql" => self.backup_sql_to(ctx).await,
            "listBackups" => self.list_backups(ctx).await,
            "restore" => self.restore(ctx).await,
            "restoreSqlFromFile" => self.restore_from_file(ctx).await,
            "copyDbFrom" => self.copy_db_from(ctx).await,
            "deployPrepare" if ctx.config.config_type() != "dev" => self.backup(ctx).await,
            "getSqlDump" => self.get_sql_dump(ctx).await,
            "install" => self.install(ctx).await,
            _ => Ok(TaskOutput::ok()),
        }
    }
}
