//! CLI module for Hostwright
//!
//! Argument parsing and subcommand definitions. Every host subcommand takes
//! the configuration name as its first positional argument.

pub mod commands;

use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use serde_yaml::Value;
use std::path::PathBuf;

use hostwright::error::{Error, Result};

/// Hostwright - deployment, backup and restore for CMS hosts
#[derive(Parser, Debug, Clone)]
#[command(name = "hostwright")]
#[command(version)]
#[command(about = "Deployment, backup and restore orchestration over SSH", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the project document
    #[arg(id = "config_file", short = 'c', long = "config", value_name = "CONFIG", global = true, env = "HOSTWRIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override a configuration value (key=value, value parsed as YAML)
    #[arg(short = 's', long = "set", global = true, action = clap::ArgAction::Append)]
    pub overrides: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print listings as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List configuration names
    List,

    /// Show the resolved configuration
    About {
        /// Configuration name
        config: String,
    },

    /// Print one configuration value (slash-separated path)
    #[command(name = "get-property")]
    GetProperty {
        /// Configuration name
        config: String,
        /// Property path, e.g. database/name
        path: String,
    },

    /// Back up database and files
    Backup {
        /// Configuration name
        config: String,
        /// Skip the files folder
        #[arg(long)]
        skip_files: bool,
    },

    /// Back up the database only
    #[command(name = "backup-db")]
    BackupDb {
        /// Configuration name
        config: String,
    },

    /// List backups on the host
    #[command(name = "list-backups")]
    ListBackups {
        /// Configuration name
        config: String,
    },

    /// Restore a backup by commit, label or hash
    Restore {
        /// Configuration name
        config: String,
        /// Backup identifier
        identifier: String,
        /// Drop the database before importing
        #[arg(long)]
        cleanup: bool,
    },

    /// Download a backup's artifacts
    #[command(name = "get-backup")]
    GetBackup {
        /// Configuration name
        config: String,
        /// Backup identifier
        identifier: String,
        /// Local directory
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },

    /// Deploy the configured branch
    Deploy {
        /// Configuration name
        config: String,
        /// Deploy this branch instead
        #[arg(long)]
        branch: Option<String>,
    },

    /// Reset the application after a code change
    Reset {
        /// Configuration name
        config: String,
        /// Reset the admin password (dev hosts)
        #[arg(long)]
        password_reset: bool,
    },

    /// Copy the database from another configuration
    #[command(name = "copy-db-from")]
    CopyDbFrom {
        /// Target configuration name
        config: String,
        /// Source configuration name
        source: String,
    },

    /// Copy the files folder from another configuration
    #[command(name = "copy-files-from")]
    CopyFilesFrom {
        /// Target configuration name
        config: String,
        /// Source configuration name
        source: String,
    },

    /// Copy database and files from another configuration
    #[command(name = "copy-from")]
    CopyFrom {
        /// Target configuration name
        config: String,
        /// Source configuration name
        source: String,
    },

    /// Install the application from scratch
    Install {
        /// Configuration name
        config: String,
    },

    /// Update application dependencies (dev only)
    #[command(name = "update-app")]
    UpdateApp {
        /// Configuration name
        config: String,
    },

    /// Run a drush command
    Drush {
        /// Configuration name
        config: String,
        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run a Drupal Console command
    Drupalconsole {
        /// Configuration name
        config: String,
        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run a composer command
    Composer {
        /// Configuration name
        config: String,
        /// Command and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Run a named script (key=value arguments are named)
    Script {
        /// Configuration name
        config: String,
        /// Script name
        name: String,
        /// Script arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show the deployed version
    Version {
        /// Configuration name
        config: String,
    },

    /// Download a file from the host
    #[command(name = "get-file")]
    GetFile {
        /// Configuration name
        config: String,
        /// Remote path
        remote: String,
        /// Local path
        #[arg(default_value = ".")]
        local: String,
    },

    /// Upload a local file into the host's tmpFolder
    #[command(name = "put-file")]
    PutFile {
        /// Configuration name
        config: String,
        /// Local file
        file: String,
    },

    /// Open an interactive shell on the host
    Ssh {
        /// Configuration name
        config: String,
    },

    /// Dump the database and download it
    #[command(name = "get-sql-dump")]
    GetSqlDump {
        /// Configuration name
        config: String,
        /// Local directory
        #[arg(long, default_value = ".")]
        dest: String,
    },

    /// Import a SQL file already on the host
    #[command(name = "restore-sql-from-file")]
    RestoreSqlFromFile {
        /// Configuration name
        config: String,
        /// Remote SQL file
        file: String,
    },
}

impl Commands {
    /// The configuration the command targets, if any
    pub fn config_name(&self) -> Option<&str> {
        match self {
            Commands::List => None,
            Commands::About { config }
            | Commands::GetProperty { config, .. }
            | Commands::Backup { config, .. }
            | Commands::BackupDb { config }
            | Commands::ListBackups { config }
            | Commands::Restore { config, .. }
            | Commands::GetBackup { config, .. }
            | Commands::Deploy { config, .. }
            | Commands::Reset { config, .. }
            | Commands::CopyDbFrom { config, .. }
            | Commands::CopyFilesFrom { config, .. }
            | Commands::CopyFrom { config, .. }
            | Commands::Install { config }
            | Commands::UpdateApp { config }
            | Commands::Drush { config, .. }
            | Commands::Drupalconsole { config, .. }
            | Commands::Composer { config, .. }
            | Commands::Script { config, .. }
            | Commands::Version { config }
            | Commands::GetFile { config, .. }
            | Commands::PutFile { config, .. }
            | Commands::Ssh { config }
            | Commands::GetSqlDump { config, .. }
            | Commands::RestoreSqlFromFile { config, .. } => Some(config),
        }
    }

    /// Whether the command only inspects the project document
    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            Commands::List | Commands::About { .. } | Commands::GetProperty { .. }
        )
    }
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// `--set` values as an override layer
    pub fn override_layer(&self) -> Result<IndexMap<String, Value>> {
        parse_overrides(&self.overrides)
    }
}

/// Parse `key=value` pairs; values are YAML scalars, falling back to strings.
pub fn parse_overrides(pairs: &[String]) -> Result<IndexMap<String, Value>> {
    let mut layer = IndexMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| Error::invalid_config(pair.as_str(), "expected key=value"))?;
        let value = serde_yaml::from_str::<Value>(raw)
            .ok()
            .filter(|v| !matches!(v, Value::Mapping(_) | Value::Sequence(_)))
            .unwrap_or_else(|| Value::String(raw.to_string()));
        layer.insert(key.trim().to_string(), value);
    }
    Ok(layer)
}

/// Split script arguments into positional values and `key=value` pairs.
pub fn split_script_args(args: &[String]) -> (Vec<String>, IndexMap<String, String>) {
    let mut positional = Vec::new();
    let mut named = IndexMap::new();
    for arg in args {
        match arg.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                named.insert(key.to_string(), value.to_string());
            }
            _ => positional.push(arg.clone()),
        }
    }
    (positional, named)
}
