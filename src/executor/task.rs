//! Per-task execution pipeline (spec §4.6, §4.7): evaluates `when`, expands
//! loops, renders module arguments, dispatches to a local action plugin or a
//! remote module over the agent RPC session, then applies `changed_when`/
//! `failed_when` overrides and the `retries`/`until` retry loop.
//!
//! One `TaskExecutor` is shared across a play; all per-host state
//! (connection, session, variables) is supplied by the caller
//! (`executor::runtime`), which also applies `register`/fact side effects
//! once a `TaskOutcome` comes back.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::agent::{MetaArgs, SessionManager};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::executor::condition;
use crate::lookup::LookupRegistry;
use crate::modules::{ModuleRegistry, ModuleSpec};
use crate::playbook::Task;
use crate::tasks::{TaskOutcome, TaskResult};
use crate::template::{TemplateOptions, Templar};
use crate::traits::{ActionContext, Connection};

/// Ceiling on a single module invocation (one loop iteration, one retry
/// attempt). Not currently exposed as a setting; tracked as an open
/// question in DESIGN.md.
const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Executes one task (with its loop/retry/when semantics) against one host.
pub struct TaskExecutor<'a> {
    registry: &'a ModuleRegistry,
    templar: &'a Templar,
    lookups: &'a LookupRegistry,
    settings: &'a Settings,
}

impl<'a> TaskExecutor<'a> {
    /// Builds a task executor sharing the given registry/templar/lookups/
    /// settings for the lifetime of a play.
    pub fn new(
        registry: &'a ModuleRegistry,
        templar: &'a Templar,
        lookups: &'a LookupRegistry,
        settings: &'a Settings,
    ) -> Self {
        Self {
            registry,
            templar,
            lookups,
            settings,
        }
    }

    /// Evaluates a task's `when` clause against `env`. Exposed so meta-tasks
    /// (which bypass the rest of this pipeline) still honor `when` the same
    /// way an ordinary task does.
    pub fn eval_when(&self, when: Option<&crate::playbook::When>, env: &serde_json::Value) -> Result<bool> {
        condition::eval_when(self.templar, when, env)
    }

    /// Runs `task` against `host_name` over `conn`/`sessions`, using `env`
    /// as the base template/variable environment (the host's merged
    /// `VarStore`, as a JSON object). Leaves applying `register`/fact side
    /// effects to the caller.
    #[instrument(skip_all, fields(task = %task.name, host = %host_name))]
    pub async fn run(
        &self,
        task: &Task,
        host_name: &str,
        conn: &Arc<dyn Connection>,
        sessions: &mut SessionManager,
        env: &serde_json::Value,
    ) -> Result<TaskOutcome> {
        if !condition::eval_when(self.templar, task.when.as_ref(), env)? {
            return Ok(TaskOutcome::Single(TaskResult::skipped(
                "conditional result was False",
            )));
        }

        let items = condition::evaluate_loop_items(self.templar, self.lookups, task, env)?;

        match items {
            None => {
                let result = self.run_one(task, host_name, conn, sessions, env).await?;
                Ok(TaskOutcome::Single(result))
            }
            Some(items) if items.is_empty() => Ok(TaskOutcome::Looped {
                changed: false,
                failed: false,
                results: Vec::new(),
            }),
            Some(items) => {
                let loop_var = task
                    .loop_control
                    .as_ref()
                    .map(|lc| lc.loop_var.clone())
                    .unwrap_or_else(|| "item".to_string());
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    let mut item_env = env.clone();
                    if let serde_json::Value::Object(map) = &mut item_env {
                        map.insert(loop_var.clone(), item);
                    }
                    let result = self.run_one(task, host_name, conn, sessions, &item_env).await?;
                    results.push(result);
                }
                Ok(TaskOutcome::from_items(results))
            }
        }
    }

    /// Runs a single iteration (or the sole invocation of a non-looped
    /// task), including its `retries`/`until` retry loop and
    /// `changed_when`/`failed_when` overrides.
    async fn run_one(
        &self,
        task: &Task,
        host_name: &str,
        conn: &Arc<dyn Connection>,
        sessions: &mut SessionManager,
        env: &serde_json::Value,
    ) -> Result<TaskResult> {
        let attempts = task.retries.unwrap_or(0) + 1;
        let delay = Duration::from_secs(task.delay.unwrap_or(5));

        let mut last = TaskResult::ok();
        for attempt in 0..attempts {
            last = self.dispatch(task, host_name, conn, sessions, env).await?;

            let satisfied = match &task.until {
                Some(expr) => condition::eval_until(self.templar, expr, &result_env(env, &last))?,
                None => true,
            };
            if satisfied || attempt + 1 == attempts {
                break;
            }
            warn!(attempt, task = %task.name, "'until' condition not met, retrying");
            tokio::time::sleep(delay).await;
        }

        let natural_changed = last.changed;
        let natural_failed = last.failed;
        last.changed = condition::eval_changed_when(
            self.templar,
            task.changed_when.as_deref(),
            &result_env(env, &last),
            natural_changed,
        )?;
        last.failed = condition::eval_failed_when(
            self.templar,
            task.failed_when.as_deref(),
            &result_env(env, &last),
            natural_failed,
        )?;
        Ok(last)
    }

    /// Renders the task's arguments in `env` and dispatches to its resolved
    /// module, either a local action plugin or a remote module over the
    /// agent RPC session.
    async fn dispatch(
        &self,
        task: &Task,
        host_name: &str,
        conn: &Arc<dyn Connection>,
        sessions: &mut SessionManager,
        env: &serde_json::Value,
    ) -> Result<TaskResult> {
        let spec = self.registry.resolve(task.module_name())?;
        let rendered_args = self
            .templar
            .render_value(task.module_args(), env, &TemplateOptions::default())?;
        let args_map = as_args_map(rendered_args);

        let timed_out = |timeout_secs: u64| Error::TaskTimeout {
            task: task.name.clone(),
            host: host_name.to_string(),
            timeout_secs,
        };

        let ret = match spec {
            ModuleSpec::Local(plugin) => {
                let mut ctx = ActionContext {
                    session: conn.as_ref(),
                    templated_args: args_map,
                    variable_env: env,
                };
                tokio::time::timeout(DEFAULT_TASK_TIMEOUT, plugin.run(&mut ctx))
                    .await
                    .map_err(|_| timed_out(DEFAULT_TASK_TIMEOUT.as_secs()))??
            }
            ModuleSpec::Remote => {
                let session = sessions.get_for_task(task, env).await?;
                let vars_json = serde_json::Value::Object(args_map.into_iter().collect());
                let meta_args = MetaArgs {
                    python_interpreter: env
                        .get("ansible_python_interpreter")
                        .and_then(|v| v.as_str())
                        .unwrap_or("/usr/bin/python3")
                        .to_string(),
                    py_runtime_zip_data: None,
                };
                tokio::time::timeout(
                    DEFAULT_TASK_TIMEOUT,
                    session.execute_module(task.module_name(), vars_json, meta_args),
                )
                .await
                .map_err(|_| timed_out(DEFAULT_TASK_TIMEOUT.as_secs()))??
            }
        };

        if ret.needs_python_runtime {
            warn!(
                task = %task.name,
                host = %host_name,
                "module reports it needs the Python companion runtime; retry-with-upload is not implemented"
            );
        }

        Ok(ret.into_task_result())
    }
}

/// Converts a rendered argument value into the flat mapping modules and
/// action plugins expect: an object's keys pass through as-is; any other
/// value (a bare string, for free-form modules like `command`) becomes a
/// single `_raw_params` entry.
fn as_args_map(rendered: serde_json::Value) -> HashMap<String, serde_json::Value> {
    match rendered {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        serde_json::Value::Null => HashMap::new(),
        other => {
            let mut map = HashMap::new();
            map.insert("_raw_params".to_string(), other);
            map
        }
    }
}

/// Layers the task's result fields (`rc`, `stdout`, `stderr`, ...) over the
/// base environment, so `changed_when`/`failed_when`/`until` expressions can
/// reference them the way `{{ result.rc }}` does in Ansible's registered-var
/// convention — except here they're exposed directly (`rc`, `stdout`) since
/// these clauses evaluate before `register` runs.
fn result_env(env: &serde_json::Value, result: &TaskResult) -> serde_json::Value {
    let mut merged = env.clone();
    if let serde_json::Value::Object(map) = &mut merged {
        map.insert("rc".to_string(), serde_json::json!(result.rc));
        map.insert("stdout".to_string(), serde_json::json!(result.stdout));
        map.insert("stderr".to_string(), serde_json::json!(result.stderr));
        map.insert("changed".to_string(), serde_json::json!(result.changed));
        map.insert("failed".to_string(), serde_json::json!(result.failed));
    }
    merged
}
