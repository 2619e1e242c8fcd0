//! Task chains
//!
//! A chain is an ordered list of tasks run against one configuration. Each
//! task runs in phases (`preflight`, `<task>Prepare`, `<task>`,
//! `<task>Finished`, `postflight`); within a phase every capability the host
//! needs is asked in `needs` order, and those that provide the phase run it.
//!
//! The first fatal error stops the chain. Steps already applied are not
//! rolled back.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::methods::{TaskContext, TaskOutput};

/// One task in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Task name, e.g. `deploy`
    pub task: String,
    /// Downgrade recoverable failures of this step to warnings
    pub warn_only: bool,
}

impl Step {
    /// A fatal-on-failure step
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            warn_only: false,
        }
    }

    /// A step whose command failures only warn
    pub fn warn_only(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            warn_only: true,
        }
    }
}

/// Where a chain is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChainState {
    /// Built, not started
    Created,
    /// Running the step at this index
    Running {
        /// Zero-based step index
        step: usize,
    },
    /// Stopped at the step at this index
    Failed {
        /// Zero-based step index
        step: usize,
    },
    /// Every step finished
    Completed,
}

impl ChainState {
    /// True for `Failed` and `Completed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainState::Failed { .. } | ChainState::Completed)
    }
}

/// Phases a task runs through, in order.
pub fn phases(task: &str) -> Vec<String> {
    vec![
        "preflight".to_string(),
        format!("{}Prepare", task),
        task.to_string(),
        format!("{}Finished", task),
        "postflight".to_string(),
    ]
}

/// Run one phase across the host's capabilities, in `needs` order.
pub async fn run_phase(ctx: &TaskContext, phase: &str) -> Result<TaskOutput> {
    let mut output = TaskOutput::ok();
    for capability in &ctx.config.needs() {
        if let Some(result) = ctx.registry.dispatch(capability, phase, ctx).await? {
            output.merge(result);
        }
    }
    Ok(output)
}

/// Bring the host within reach (tunnels and the like).
///
/// Safe to repeat: open tunnels are reused.
pub async fn preflight(ctx: &TaskContext) -> Result<TaskOutput> {
    run_phase(ctx, "preflight").await
}

/// Run every phase of one task across the host's capabilities.
pub async fn run_step(ctx: &TaskContext, task: &str) -> Result<TaskOutput> {
    let mut output = TaskOutput::ok();
    for phase in phases(task) {
        output.merge(run_phase(ctx, &phase).await?);
    }
    Ok(output)
}

/// An ordered list of tasks sharing one configuration.
#[derive(Debug, Clone)]
pub struct TaskChain {
    steps: Vec<Step>,
    state: ChainState,
}

impl TaskChain {
    /// A chain starting with `task`
    pub fn new(task: impl Into<String>) -> Self {
        Self::from_steps(vec![Step::new(task)])
    }

    /// A chain of explicit steps
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            state: ChainState::Created,
        }
    }

    /// Append a task
    pub fn then(mut self, task: impl Into<String>) -> Self {
        self.steps.push(Step::new(task));
        self
    }

    /// Append several tasks
    pub fn then_all<I, S>(mut self, tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.extend(tasks.into_iter().map(Step::new));
        self
    }

    /// The steps in order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Current state
    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Run every step in order.
    ///
    /// Returns the first fatal error unchanged; the chain state then records
    /// which step failed.
    pub async fn run(&mut self, ctx: &TaskContext) -> Result<TaskOutput> {
        let mut output = TaskOutput::ok();

        for (index, step) in self.steps.iter().enumerate() {
            self.state = ChainState::Running { step: index };
            debug!(config = %ctx.config.name(), step = index, task = %step.task, "Running step");

            match run_step(ctx, &step.task).await {
                Ok(result) => output.merge(result),
                Err(e) if step.warn_only && e.is_recoverable() => {
                    warn!(task = %step.task, error = %e, "Step failed, continuing");
                }
                Err(e) => {
                    self.state = ChainState::Failed { step: index };
                    warn!(config = %ctx.config.name(), task = %step.task, "Task chain stopped");
                    return Err(e);
                }
            }
        }

        self.state = ChainState::Completed;
        info!(config = %ctx.config.name(), steps = self.steps.len(), "Task chain completed");
        Ok(output)
    }
}

/// Run `task`, then each of `next_tasks`, with the same context.
pub async fn run_task(ctx: &TaskContext, task: &str, next_tasks: &[&str]) -> Result<TaskOutput> {
    TaskChain::new(task)
        .then_all(next_tasks.iter().copied())
        .run(ctx)
        .await
}
