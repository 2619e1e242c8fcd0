//! Subcommand execution
//!
//! Maps parsed [`Commands`] onto [`Hostwright`] operations and prints their
//! results.

use tracing::{debug, warn};

use hostwright::backup::Catalog;
use hostwright::config::ConfigRecord;
use hostwright::connection::ssh::ssh_program;
use hostwright::error::{Error, Result};
use hostwright::methods::{TaskContext, TaskOutput};
use hostwright::tasks::{about, get_property, Hostwright};

use super::{split_script_args, Cli, Commands};

/// Shared state for one invocation.
pub struct CommandContext<'a> {
    /// The orchestrator
    pub hostwright: &'a Hostwright,
    /// Print listings as JSON
    pub json: bool,
}

impl<'a> CommandContext<'a> {
    /// Create a command context from CLI arguments
    pub fn new(cli: &Cli, hostwright: &'a Hostwright) -> Self {
        Self {
            hostwright,
            json: cli.json,
        }
    }

    fn print_output(&self, output: &TaskOutput) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(output)?);
            return Ok(());
        }
        for message in &output.messages {
            let message = message.trim_end();
            if !message.is_empty() {
                println!("{}", message);
            }
        }
        for file in &output.files {
            println!("{}", file);
        }
        Ok(())
    }

    fn print_catalog(&self, catalog: &Catalog) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(catalog.records())?);
            return Ok(());
        }
        if catalog.is_empty() {
            println!("No backups found");
        }
        for row in catalog.display_rows() {
            println!("{}", row);
        }
        Ok(())
    }
}

fn joined(command: &[String]) -> Option<String> {
    if command.is_empty() {
        None
    } else {
        Some(shell_words::join(command))
    }
}

fn check_ssh_client(config: &ConfigRecord) {
    if config.runs_locally() {
        return;
    }
    let program = ssh_program();
    match which::which(&program) {
        Ok(path) => debug!(program = %path.display(), "Using SSH client"),
        Err(_) => warn!(program = %program, "SSH client not found on PATH"),
    }
}

/// Execute one subcommand.
pub async fn execute(cli: &Cli, ctx: &CommandContext<'_>) -> Result<()> {
    let hw = ctx.hostwright;

    let Some(name) = cli.command.config_name() else {
        for name in hw.config_names() {
            println!("{}", name);
        }
        return Ok(());
    };

    let config = hw.resolve_with(name, &cli.override_layer()?)?;

    if cli.command.is_offline() {
        return match &cli.command {
            Commands::GetProperty { path, .. } => {
                println!("{}", get_property(&config, path)?);
                Ok(())
            }
            _ => {
                if ctx.json {
                    println!("{}", serde_json::to_string_pretty(config.values())?);
                } else {
                    for (key, value) in about(&config) {
                        println!("{:>30}: {}", key, value);
                    }
                }
                Ok(())
            }
        };
    }

    check_ssh_client(&config);
    let task_ctx = hw.context(&config)?;
    run_host_command(&cli.command, ctx, &task_ctx).await
}

async fn run_host_command(
    command: &Commands,
    ctx: &CommandContext<'_>,
    task_ctx: &TaskContext,
) -> Result<()> {
    let hw = ctx.hostwright;

    let output = match command {
        Commands::Backup { skip_files, .. } => hw.backup(task_ctx, !skip_files).await?,
        Commands::BackupDb { .. } => hw.backup(task_ctx, false).await?,
        Commands::ListBackups { .. } => {
            let catalog = hw.list_backups(task_ctx).await?;
            return ctx.print_catalog(&catalog);
        }
        Commands::Restore {
            identifier, cleanup, ..
        } => match hw.restore(task_ctx, identifier, *cleanup).await {
            Err(e @ Error::BackupNotFound { .. }) => {
                eprintln!("{}", e);
                let catalog = hw.list_backups(task_ctx).await?;
                ctx.print_catalog(&catalog)?;
                return Err(e);
            }
            other => other?,
        },
        Commands::GetBackup {
            identifier, dest, ..
        } => hw.get_backup(task_ctx, identifier, dest).await?,
        Commands::Deploy { branch, .. } => hw.deploy(task_ctx, branch.as_deref()).await?,
        Commands::Reset { password_reset, .. } => hw.reset(task_ctx, *password_reset).await?,
        Commands::CopyDbFrom { source, .. } => hw.copy_db_from(task_ctx, source).await?,
        Commands::CopyFilesFrom { source, .. } => hw.copy_files_from(task_ctx, source).await?,
        Commands::CopyFrom { source, .. } => hw.copy_from(task_ctx, source).await?,
        Commands::Install { .. } => hw.install(task_ctx).await?,
        Commands::UpdateApp { .. } => hw.update_app(task_ctx).await?,
        Commands::Drush { command, .. } => {
            let command = joined(command).unwrap_or_else(|| "status".to_string());
            hw.drush(task_ctx, &command).await?
        }
        Commands::Drupalconsole { command, .. } => {
            let command = joined(command).unwrap_or_else(|| "list".to_string());
            hw.drupalconsole(task_ctx, &command).await?
        }
        Commands::Composer { command, .. } => {
            let command = joined(command).unwrap_or_else(|| "install".to_string());
            hw.composer(task_ctx, &command).await?
        }
        Commands::Script { name, args, .. } => {
            let (positional, named) = split_script_args(args);
            hw.script(task_ctx, name, positional, named).await?
        }
        Commands::Version { .. } => {
            println!("{}", hw.version(task_ctx).await?);
            return Ok(());
        }
        Commands::GetFile { remote, local, .. } => hw.get_file(task_ctx, remote, local).await?,
        Commands::PutFile { file, .. } => hw.put_file(task_ctx, file).await?,
        Commands::Ssh { .. } => {
            hw.open_shell(task_ctx).await?;
            return Ok(());
        }
        Commands::GetSqlDump { dest, .. } => hw.get_sql_dump(task_ctx, dest).await?,
        Commands::RestoreSqlFromFile { file, .. } => {
            hw.restore_sql_from_file(task_ctx, file).await?
        }
        Commands::List | Commands::About { .. } | Commands::GetProperty { .. } => {
            return Ok(());
        }
    };

    ctx.print_output(&output)
}
