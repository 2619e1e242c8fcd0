//! # Hostwright - Deployment and Backup Orchestration for CMS Hosts
//!
//! Hostwright runs deployment, backup, restore and maintenance operations
//! against content-management-system installations over SSH. Hosts are
//! described in one YAML project document; each host declares the
//! capabilities it `needs` and the orchestrator dispatches every task to the
//! implementations of those capabilities.
//!
//! ## Core Concepts
//!
//! - **Configuration records**: a named host layer merged over its parents,
//!   the global defaults and a built-in baseline
//! - **Capabilities**: named classes of operation (`git`, `drush8`, `files`)
//!   answered by registered implementations
//! - **Task chains**: ordered tasks run in phases across every needed capability
//! - **Tunnels**: background SSH port forwards opened before a host is reached
//! - **Backups**: timestamped artifacts grouped into restorable sets
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                    (clap-based command parsing)                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Hostwright (tasks facade)                        │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │  Config resolver│   │  Method registry +  │   │   Backup catalog    │
//! │  (layered YAML) │   │    task chains      │   │                     │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!          │                         │                         │
//!          └─────────────────────────┼─────────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │               Shell executor + tunnel manager                        │
//! │                 (ssh / scp processes, local shell)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use hostwright::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::from_file("hostwright.yml")?;
//!     let hostwright = Hostwright::new(settings);
//!
//!     let config = hostwright.resolve("live")?;
//!     let ctx = hostwright.context(&config)?;
//!     hostwright.backup(&ctx, true).await?;
//!
//!     for row in hostwright.list_backups(&ctx).await?.display_rows() {
//!         println!("{}", row);
//!     }
//!     hostwright.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::backup::{BackupName, BackupRecord, Catalog};
    pub use crate::config::{ConfigRecord, ConfigResolver, Settings};
    pub use crate::connection::local::LocalConnection;
    pub use crate::connection::ssh::SshConnection;
    pub use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionResult, Endpoint, ExecuteOptions,
    };
    pub use crate::error::{Error, Result};
    pub use crate::executor::{RunOptions, Shell};
    pub use crate::methods::{Capability, MethodRegistry, TaskArgs, TaskContext, TaskOutput};
    pub use crate::runner::{run_task, ChainState, TaskChain};
    pub use crate::tasks::Hostwright;
    pub use crate::tunnel::{TunnelManager, TunnelSpec};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
pub mod error;

/// Project document loading and layered configuration records.
///
/// A record is resolved from the built-in baseline, the global `defaults`,
/// the host's `inheritsFrom` parents and the host layer itself, later layers
/// winning key by key with mappings merged recursively.
pub mod config;

// ============================================================================
// Infrastructure
// ============================================================================

/// Transport layer: the [`Connection`](connection::Connection) trait with a
/// local shell and an OpenSSH client implementation.
pub mod connection;

/// Command execution with a working-directory stack and failure policy.
pub mod executor;

/// Background SSH tunnels and readiness detection.
pub mod tunnel;

// ============================================================================
// Orchestration
// ============================================================================

/// Backup naming, artifact discovery and identifier resolution.
pub mod backup;

/// Capability implementations and the registry that dispatches to them.
pub mod methods;

/// Task chains run across a host's capabilities.
pub mod runner;

/// High-level operations.
pub mod tasks;
