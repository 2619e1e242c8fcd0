//! Shared test utilities and fixtures for the Hostwright test suite.
//!
//! This module provides:
//! - A mock [`Connection`] that records every command it is asked to run
//! - A project document fixture with typical host layers
//! - Helpers that build a [`TaskContext`] over the mock
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use hostwright::config::{ConfigRecord, Settings};
use hostwright::connection::{
    CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions,
};
use hostwright::executor::Shell;
use hostwright::methods::TaskContext;
use hostwright::tasks::Hostwright;

// ============================================================================
// Mock Connection Implementation
// ============================================================================

/// One command seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub command: String,
    pub cwd: Option<String>,
}

/// A mock connection for testing purposes.
///
/// Results are matched by substring in registration order; anything
/// unmatched succeeds with empty output.
#[derive(Debug)]
pub struct MockConnection {
    identifier: String,
    commands: RwLock<Vec<Recorded>>,
    results: RwLock<Vec<(String, CommandResult)>>,
    downloads: RwLock<Vec<(PathBuf, PathBuf)>>,
    uploads: RwLock<Vec<(PathBuf, PathBuf)>>,
}

impl MockConnection {
    /// Create a new mock connection with the given identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            commands: RwLock::new(Vec::new()),
            results: RwLock::new(Vec::new()),
            downloads: RwLock::new(Vec::new()),
            uploads: RwLock::new(Vec::new()),
        }
    }

    /// Answer commands containing `pattern` with `result`.
    pub fn respond(&self, pattern: impl Into<String>, result: CommandResult) {
        self.results.write().push((pattern.into(), result));
    }

    /// Answer commands containing `pattern` with `stdout`.
    pub fn respond_stdout(&self, pattern: impl Into<String>, stdout: &str) {
        self.respond(pattern, CommandResult::success(stdout.to_string(), String::new()));
    }

    /// Fail commands containing `pattern`.
    pub fn fail_on(&self, pattern: impl Into<String>, exit_code: i32, stderr: &str) {
        self.respond(
            pattern,
            CommandResult::failure(exit_code, String::new(), stderr.to_string()),
        );
    }

    /// Every command executed so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .read()
            .iter()
            .map(|r| r.command.clone())
            .collect()
    }

    /// Every command executed so far, with its working directory.
    pub fn recorded(&self) -> Vec<Recorded> {
        self.commands.read().clone()
    }

    /// Position of the first command containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(needle))
    }

    /// True if some command contains `needle`.
    pub fn ran(&self, needle: &str) -> bool {
        self.position(needle).is_some()
    }

    /// Downloads requested so far.
    pub fn downloads(&self) -> Vec<(PathBuf, PathBuf)> {
        self.downloads.read().clone()
    }

    /// Uploads requested so far.
    pub fn uploads(&self) -> Vec<(PathBuf, PathBuf)> {
        self.uploads.read().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        self.commands.write().push(Recorded {
            command: command.to_string(),
            cwd: options.and_then(|o| o.cwd),
        });

        let result = self
            .results
            .read()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| CommandResult::success(String::new(), String::new()));
        Ok(result)
    }

    async fn upload(&self, local_path: &Path, remote_path: &Path) -> ConnectionResult<()> {
        if !local_path.exists() {
            return Err(ConnectionError::TransferFailed(format!(
                "{} does not exist",
                local_path.display()
            )));
        }
        self.uploads
            .write()
            .push((local_path.to_path_buf(), remote_path.to_path_buf()));
        Ok(())
    }

    async fn download(&self, remote_path: &Path, local_path: &Path) -> ConnectionResult<()> {
        self.downloads
            .write()
            .push((remote_path.to_path_buf(), local_path.to_path_buf()));
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A project document with one base layer and hosts of each type.
pub const PROJECT: &str = r#"
name: example
uuid: 5c1d2f6e-0000-4000-8000-000000000000
scripts:
  greet:
    - echo hello %arguments.name%
hosts:
  base:
    user: deploy
    host: example.com
    port: 22
    rootFolder: /var/www/site
    siteFolder: /var/www/site/web/sites/default
    filesFolder: /var/www/site/web/sites/default/files
    backupFolder: /var/backups/site
    branch: main
    needs: [ssh, git, drush8, files]
  live:
    inheritsFrom: base
    type: prod
  staging:
    inheritsFrom: base
    type: stage
    host: staging.example.com
  dev:
    inheritsFrom: base
    type: dev
    supportsInstalls: true
    needs: [ssh, git, drush8, composer, files, script]
    reset:
      - echo reset done
  broken:
    type: dev
    needs: [ssh, git, drush8, files]
"#;

/// Parsed [`PROJECT`].
pub fn settings() -> Settings {
    Settings::from_yaml_str(PROJECT).expect("fixture parses")
}

/// An orchestrator over [`PROJECT`].
pub fn hostwright() -> Hostwright {
    Hostwright::new(settings())
}

/// A resolved configuration from [`PROJECT`].
pub fn config(name: &str) -> ConfigRecord {
    hostwright().resolve(name).expect("fixture host resolves")
}

/// Build a context for `name` whose shell talks to a fresh mock.
pub fn mock_context(hw: &Hostwright, name: &str) -> (TaskContext, Arc<MockConnection>) {
    let config = hw.resolve(name).expect("fixture host resolves");
    let mock = Arc::new(MockConnection::new(config.name().to_string()));
    let shell = Shell::new(mock.clone() as Arc<dyn Connection>).with_local_connection(mock.clone());
    let ctx = hw
        .context_with_shell(&config, shell)
        .expect("fixture host validates");
    (ctx, mock)
}
