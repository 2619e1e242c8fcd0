//! Script capability: runs named command lists with placeholder substitution.
//!
//! A script is either a block of text, a list of lines, or a mapping with
//! `defaults` (argument defaults) and `script` (the lines). Placeholders of the
//! form `%arguments.<name>%` and `%host.<key>%` are replaced before each line
//! runs; `%arguments.combined%` expands to every argument on one line.

use async_trait::async_trait;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_yaml::Value;
use tracing::{debug, info, warn};

use super::{Capability, TaskContext, TaskOutput};
use crate::config::ConfigRecord;
use crate::error::{Error, Result};
use crate::executor::RunOptions;

/// `%scope.key%`
static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"%(arguments|host)\.([A-Za-z0-9_./-]+)%").expect("Invalid placeholder regex")
});

/// A resolved script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    /// Command lines in order
    pub lines: Vec<String>,
    /// Argument defaults, overridden by call arguments
    pub defaults: IndexMap<String, String>,
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Script {
    /// Read a script from its configuration value.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) => Some(Self {
                lines: text.lines().map(str::to_string).collect(),
                defaults: IndexMap::new(),
            }),
            Value::Sequence(items) => Some(Self {
                lines: items.iter().filter_map(scalar).collect(),
                defaults: IndexMap::new(),
            }),
            Value::Mapping(map) => {
                let mut script = Self::from_value(map.get("script")?)?;
                if let Some(Value::Mapping(defaults)) = map.get("defaults") {
                    script.defaults = defaults
                        .iter()
                        .filter_map(|(k, v)| Some((k.as_str()?.to_string(), scalar(v)?)))
                        .collect();
                }
                Some(script)
            }
            _ => None,
        }
    }

    /// Lines worth running: trimmed, without blanks and `#` comments.
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
    }
}

/// Look a script up in the host's `scripts`, then in the global `scripts`.
pub fn find_script(ctx: &TaskContext, name: &str) -> Result<Script> {
    ctx.config
        .get(&format!("scripts/{}", name))
        .or_else(|| ctx.settings.scripts.get(name))
        .and_then(Script::from_value)
        .ok_or_else(|| Error::ScriptNotFound(name.to_string()))
}

/// Names of every script visible to a host.
pub fn available_scripts(ctx: &TaskContext) -> Vec<String> {
    let mut names: Vec<String> = match ctx.config.get("scripts") {
        Some(Value::Mapping(map)) => map.keys().filter_map(scalar).collect(),
        _ => Vec::new(),
    };
    for name in ctx.settings.scripts.keys() {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

/// Merge defaults under call arguments and add `combined`.
pub fn resolve_arguments(
    script: &Script,
    positional: &[String],
    named: &IndexMap<String, String>,
) -> IndexMap<String, String> {
    let mut arguments = script.defaults.clone();
    for (key, value) in named {
        arguments.insert(key.clone(), value.clone());
    }

    let mut combined: Vec<String> = positional.to_vec();
    combined.extend(
        arguments
            .iter()
            .map(|(key, value)| format!("{}=\"{}\"", key, value)),
    );
    arguments.insert("combined".to_string(), combined.join(" "));
    arguments
}

/// Replace placeholders in one line.
///
/// Unknown placeholders are left as written.
pub fn substitute(
    line: &str,
    arguments: &IndexMap<String, String>,
    config: &ConfigRecord,
) -> String {
    PLACEHOLDER_REGEX
        .replace_all(line, |caps: &Captures<'_>| {
            let key = &caps[2];
            let value = match &caps[1] {
                "arguments" => arguments.get(key).cloned(),
                _ => config.get_string(&key.replace('.', "/")),
            };
            value.unwrap_or_else(|| {
                warn!(placeholder = %&caps[0], "Unresolved placeholder");
                caps[0].to_string()
            })
        })
        .into_owned()
}

/// Run a script's lines in `rootFolder` (when configured).
pub async fn run_script(
    ctx: &TaskContext,
    script: &Script,
    arguments: &IndexMap<String, String>,
    options: RunOptions,
) -> Result<TaskOutput> {
    let _cwd = ctx
        .config
        .get_string("rootFolder")
        .map(|root| ctx.shell.cd(root));

    let mut ran = 0;
    for line in script.commands() {
        let command = substitute(line, arguments, &ctx.config);
        ctx.shell.run(&command, options.clone()).await?;
        ran += 1;
    }

    debug!(lines = ran, "Script finished");
    Ok(if ran > 0 {
        TaskOutput::changed(format!("Ran {} script lines", ran))
    } else {
        TaskOutput::ok()
    })
}

/// Run the lines a host declares under a task's own key, e.g. `reset:`.
pub async fn run_task_specific_script(
    ctx: &TaskContext,
    task: &str,
    options: RunOptions,
) -> Result<TaskOutput> {
    match ctx.config.get(task).and_then(Script::from_value) {
        Some(script) => {
            info!(config = %ctx.config.name(), task = %task, "Running task-specific script");
            let arguments = resolve_arguments(&script, &[], &IndexMap::new());
            run_script(ctx, &script, &arguments, options).await
        }
        None => Ok(TaskOutput::ok()),
    }
}

/// Run the global `common` script for the host's type, if any.
pub async fn run_common_scripts(ctx: &TaskContext, options: RunOptions) -> Result<TaskOutput> {
    let config_type = ctx.config.config_type();
    match ctx
        .settings
        .common
        .get(&config_type)
        .and_then(Script::from_value)
    {
        Some(script) => {
            info!(config = %ctx.config.name(), config_type = %config_type, "Running common scripts");
            let arguments = resolve_arguments(&script, &[], &IndexMap::new());
            run_script(ctx, &script, &arguments, options).await
        }
        None => Ok(TaskOutput::ok()),
    }
}

/// Named scripts from the host or project document.
pub struct ScriptMethod;

impl ScriptMethod {
    async fn run_named(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let name = ctx
            .args
            .script
            .as_deref()
            .ok_or_else(|| Error::ScriptNotFound(String::new()))?;
        let script = match find_script(ctx, name) {
            Ok(script) => script,
            Err(e) => {
                warn!(available = ?available_scripts(ctx), "Script not found");
                return Err(e);
            }
        };
        let arguments = resolve_arguments(&script, &ctx.args.positional, &ctx.args.arguments);
        run_script(ctx, &script, &arguments, RunOptions::new()).await
    }
}

#[async_trait]
impl Capability for ScriptMethod {
    fn name(&self) -> &'static str {
        "script"
    }

    fn supports(&self, capability: &str) -> bool {
        capability == "script"
    }

    fn provides(&self, task: &str) -> bool {
        matches!(task, "runScript" | "runTaskSpecificScript")
    }

    async fn invoke(&self, _capability: &str, task: &str, ctx: &TaskContext) -> Result<TaskOutput> {
        match task {
            "runScript" => self.run_named(ctx).await,
            "runTaskSpecificScript" => {
                let task = ctx.args.command.as_deref().unwrap_or_default();
                run_task_specific_script(ctx, task, RunOptions::new()).await
            }
            _ => Ok(TaskOutput::ok()),
        }
    }
}
