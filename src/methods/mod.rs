//! Capability implementations and the registry that dispatches to them
//!
//! A host configuration lists the capabilities it `needs` (`ssh`, `git`,
//! `drush8`, ...). Each capability name is answered by exactly one
//! implementation: the first registered one whose [`Capability::supports`]
//! predicate accepts it. Several names may map to one implementation, e.g.
//! `drush`, `drush7` and `drush8` all resolve to [`drush::DrushMethod`].
//!
//! Built-in registration order is fixed by [`MethodRegistry::with_builtins`]:
//! `ssh`, `git`, `drush`, `drupalconsole`, `composer`, `files`, `script`.

pub mod composer;
pub mod drupalconsole;
pub mod drush;
pub mod files;
pub mod git;
pub mod script;
pub mod ssh;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::backup::{BackupName, BackupRecord};
use crate::config::{ConfigRecord, Requirement, Settings, CONNECTION_KEYS};
use crate::error::{Error, Result};
use crate::executor::Shell;
use crate::tunnel::{tunnel_requirement, TunnelManager, TUNNEL_SECTION};

/// Arguments handed to a task invocation.
#[derive(Debug, Clone, Default)]
pub struct TaskArgs {
    /// Free-form command for pass-through tasks (`drush`, `composer`, ...)
    pub command: Option<String>,
    /// Name the backup task writes under
    pub backup_name: Option<BackupName>,
    /// Include the files folder in backups
    pub with_files: bool,
    /// Artifacts selected for restore
    pub backups: Vec<BackupRecord>,
    /// Drop the database before importing
    pub cleanup_before_restore: bool,
    /// Source configuration for copy tasks
    pub source: Option<Arc<ConfigRecord>>,
    /// SQL file for `restoreSqlFromFile`
    pub source_file: Option<String>,
    /// Script name for `runScript`
    pub script: Option<String>,
    /// Named script arguments
    pub arguments: IndexMap<String, String>,
    /// Positional script arguments
    pub positional: Vec<String>,
    /// Reset the admin password during `reset` on dev hosts
    pub with_password_reset: bool,
    /// Remote path for `get`
    pub remote_path: Option<String>,
    /// Local path for `get` and `put`
    pub local_path: Option<String>,
}

/// What a task invocation reports back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskOutput {
    /// Whether anything changed on the host
    pub changed: bool,
    /// Human-readable notes
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    /// Backup artifacts listed or written
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub backups: Vec<BackupRecord>,
    /// Files written
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Version or commit reported by the task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Tunnel entrance opened by the task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrance: Option<String>,
}

impl TaskOutput {
    /// Nothing changed
    pub fn ok() -> Self {
        Self::default()
    }

    /// Something changed
    pub fn changed(message: impl Into<String>) -> Self {
        Self {
            changed: true,
            messages: vec![message.into()],
            ..Self::default()
        }
    }

    /// Attach listed backups
    pub fn with_backups(mut self, backups: Vec<BackupRecord>) -> Self {
        self.backups = backups;
        self
    }

    /// Attach a written file
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.files.push(file.into());
        self
    }

    /// Attach a version string
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Attach a tunnel entrance
    pub fn with_entrance(mut self, entrance: impl Into<String>) -> Self {
        self.entrance = Some(entrance.into());
        self
    }

    /// Fold another output into this one.
    pub fn merge(&mut self, other: TaskOutput) {
        self.changed |= other.changed;
        self.messages.extend(other.messages);
        self.backups.extend(other.backups);
        self.files.extend(other.files);
        if other.version.is_some() {
            self.version = other.version;
        }
        if other.entrance.is_some() {
            self.entrance = other.entrance;
        }
    }
}

/// Everything a task invocation may use.
///
/// The configuration is read-only and shared between every step of a chain.
#[derive(Clone)]
pub struct TaskContext {
    /// Resolved configuration of the target host
    pub config: Arc<ConfigRecord>,
    /// Project document, for global scripts and settings
    pub settings: Arc<Settings>,
    /// Executor bound to the target host
    pub shell: Shell,
    /// Registry for cross-capability calls
    pub registry: Arc<MethodRegistry>,
    /// Tunnels opened during this invocation
    pub tunnels: Arc<TunnelManager>,
    /// Task arguments
    pub args: TaskArgs,
}

impl TaskContext {
    /// Create a context with empty arguments
    pub fn new(
        config: Arc<ConfigRecord>,
        settings: Arc<Settings>,
        shell: Shell,
        registry: Arc<MethodRegistry>,
        tunnels: Arc<TunnelManager>,
    ) -> Self {
        Self {
            config,
            settings,
            shell,
            registry,
            tunnels,
            args: TaskArgs::default(),
        }
    }

    /// Replace the task arguments
    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.args = args;
        self
    }

    /// Same context against another host with its own shell.
    pub fn for_host(&self, config: Arc<ConfigRecord>, shell: Shell) -> Self {
        Self {
            config,
            shell,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("config", &self.config.name())
            .field("shell", &self.shell)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// One implementation answering for one or more capability names.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Name of the implementation
    fn name(&self) -> &'static str;

    /// True if this implementation answers for `capability`
    fn supports(&self, capability: &str) -> bool;

    /// Configuration keys `capability` needs before any of its tasks run
    fn required_keys(&self, capability: &str) -> Vec<&'static str> {
        let _ = capability;
        Vec::new()
    }

    /// True if this implementation has an entry point for `task`
    fn provides(&self, task: &str) -> bool;

    /// Run `task`; `capability` is the name it was dispatched under
    async fn invoke(&self, capability: &str, task: &str, ctx: &TaskContext) -> Result<TaskOutput>;
}

/// Ordered registry of capability implementations.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: Vec<Arc<dyn Capability>>,
}

impl MethodRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in implementations in their fixed order
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ssh::SshMethod));
        registry.register(Arc::new(git::GitMethod));
        registry.register(Arc::new(drush::DrushMethod));
        registry.register(Arc::new(drupalconsole::DrupalConsoleMethod));
        registry.register(Arc::new(composer::ComposerMethod));
        registry.register(Arc::new(files::FilesMethod));
        registry.register(Arc::new(script::ScriptMethod));
        registry
    }

    /// Append an implementation; earlier registrations win ties
    pub fn register(&mut self, method: Arc<dyn Capability>) {
        self.methods.push(method);
    }

    /// Implementation names in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    /// The first implementation supporting `capability`
    pub fn resolve(&self, capability: &str) -> Option<Arc<dyn Capability>> {
        self.methods
            .iter()
            .find(|method| method.supports(capability))
            .cloned()
    }

    fn resolve_for(&self, capability: &str, config: &ConfigRecord) -> Result<Arc<dyn Capability>> {
        self.resolve(capability)
            .ok_or_else(|| Error::unsupported(capability, config.config_type()))
    }

    /// Every requirement a configuration must satisfy for the given
    /// capabilities, including connection and tunnel keys.
    pub fn requirements(
        &self,
        config: &ConfigRecord,
        capabilities: &[String],
    ) -> Result<Vec<Requirement>> {
        let mut requirements = Vec::new();
        if !config.runs_locally() {
            requirements.push(Requirement::new("connection", CONNECTION_KEYS.iter().copied()));
        }
        if config.contains(TUNNEL_SECTION) {
            requirements.push(tunnel_requirement());
        }
        for capability in capabilities {
            let method = self.resolve_for(capability, config)?;
            requirements.push(Requirement::new(
                capability.as_str(),
                method.required_keys(capability),
            ));
        }
        Ok(requirements)
    }

    /// Validate a configuration against everything it needs.
    ///
    /// Fails before any side effect with either the unsupported capability
    /// or every missing key at once.
    pub fn validate(&self, config: &ConfigRecord) -> Result<()> {
        let requirements = self.requirements(config, &config.needs())?;
        config.check(&requirements)
    }

    /// Invoke `task` on the implementation answering for `capability`.
    ///
    /// Returns `Ok(None)` when that implementation has no entry point for the
    /// task.
    pub async fn dispatch(
        &self,
        capability: &str,
        task: &str,
        ctx: &TaskContext,
    ) -> Result<Option<TaskOutput>> {
        let method = self.resolve_for(capability, &ctx.config)?;
        if !method.provides(task) {
            trace!(capability = %capability, task = %task, "Task not provided");
            return Ok(None);
        }

        ctx.config.check(&[Requirement::new(
            capability,
            method.required_keys(capability),
        )])?;

        debug!(capability = %capability, method = %method.name(), task = %task, "Dispatching");
        method.invoke(capability, task, ctx).await.map(Some)
    }

    /// Like [`dispatch`](Self::dispatch), but a missing entry point is an error.
    pub async fn call(&self, capability: &str, task: &str, ctx: &TaskContext) -> Result<TaskOutput> {
        self.dispatch(capability, task, ctx)
            .await?
            .ok_or_else(|| Error::TaskNotAllowed {
                task: task.to_string(),
                config: ctx.config.name().to_string(),
                reason: format!("capability '{}' does not provide it", capability),
            })
    }

    /// The first of `candidates` the configuration needs, in `needs` order.
    pub fn first_needed(&self, config: &ConfigRecord, candidates: &[&str]) -> Option<String> {
        config
            .needs()
            .into_iter()
            .find(|need| candidates.contains(&need.as_str()))
    }
}
