//! Per-host runtime state and strategy execution (spec §4.6): the `linear`
//! and `free` strategies, meta-task dispatch, `run_once`, and per-host error
//! isolation (a host that fails a task drops out of the rest of the play
//! unless `meta: clear_host_errors` runs, or unconditionally once
//! `meta: end_host` runs).

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::warn;

use crate::agent::SessionManager;
use crate::config::Settings;
use crate::error::Result;
use crate::executor::register;
use crate::executor::task::TaskExecutor;
use crate::playbook::{Play, Task};
use crate::tasks::{TaskOutcome, TaskResult};
use crate::traits::Connection;
use crate::vars::{VarPrecedence, VarStore};

/// Per-host state carried across an entire play: its connection, agent
/// sessions, and variable store.
pub struct HostRuntime {
    pub name: String,
    pub conn: Arc<dyn Connection>,
    pub sessions: SessionManager,
    pub vars: VarStore,
    /// Set once a task fails without `ignore_errors`; gates every further
    /// task for this host until `meta: clear_host_errors` resets it.
    pub failed: bool,
    /// Set by `meta: end_host`; gates every further task unconditionally.
    pub ended: bool,
}

impl HostRuntime {
    pub fn new(name: impl Into<String>, conn: Arc<dyn Connection>, sessions: SessionManager, vars: VarStore) -> Self {
        Self {
            name: name.into(),
            conn,
            sessions,
            vars,
            failed: false,
            ended: false,
        }
    }
}

/// What a task's outcome tells the strategy loop to do next for its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Continue,
    EndHost,
    EndPlay,
}

fn meta_task_name(task: &Task) -> &str {
    task.module_args().as_str().unwrap_or("noop")
}

fn is_clear_host_errors(task: &Task) -> bool {
    task.is_meta() && meta_task_name(task) == "clear_host_errors"
}

/// Dispatches one of the built-in meta-tasks (spec §4.6). `flush_handlers`
/// and `refresh_inventory` report skipped: this engine has no handler
/// notification system and no dynamic inventory source to refresh.
async fn run_meta_task(task: &Task, host_rt: &mut HostRuntime) -> Result<(TaskResult, ControlSignal)> {
    match meta_task_name(task) {
        "noop" => Ok((TaskResult::ok(), ControlSignal::Continue)),
        "clear_facts" => {
            host_rt.vars.clear_precedence(VarPrecedence::HostFacts);
            Ok((TaskResult::changed(), ControlSignal::Continue))
        }
        "clear_host_errors" => {
            host_rt.failed = false;
            Ok((TaskResult::changed(), ControlSignal::Continue))
        }
        "flush_handlers" => Ok((
            TaskResult::skipped("handlers are not implemented"),
            ControlSignal::Continue,
        )),
        "refresh_inventory" => Ok((
            TaskResult::skipped("dynamic inventory reload is not implemented"),
            ControlSignal::Continue,
        )),
        "reset_connection" => {
            host_rt.sessions.close().await?;
            Ok((TaskResult::changed(), ControlSignal::Continue))
        }
        "end_host" => Ok((TaskResult::ok(), ControlSignal::EndHost)),
        "end_play" | "end_batch" => Ok((TaskResult::ok(), ControlSignal::EndPlay)),
        other => Err(crate::error::Error::UnknownMetaTask(other.to_string())),
    }
}

/// Flattens a host's merged `VarStore` view into the JSON object template
/// rendering and condition evaluation operate on.
pub(crate) fn env_value(vars: &mut VarStore) -> serde_json::Value {
    serde_json::Value::Object(vars.merged().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Runs one task against one host: meta-tasks are dispatched directly,
/// everything else goes through the `TaskExecutor` pipeline. Applies
/// `register`/fact side effects and updates the host's failure gate before
/// returning.
async fn execute_task_on_host(
    task: &Task,
    host_rt: &mut HostRuntime,
    tctx: &TaskExecutor<'_>,
    settings: &Settings,
) -> Result<(TaskOutcome, ControlSignal)> {
    if task.is_meta() {
        let env = env_value(&mut host_rt.vars);
        if !tctx.eval_when(task.when.as_ref(), &env)? {
            return Ok((
                TaskOutcome::Single(TaskResult::skipped("conditional result was False")),
                ControlSignal::Continue,
            ));
        }
        let (result, signal) = run_meta_task(task, host_rt).await?;
        if signal == ControlSignal::EndHost {
            if let Err(e) = host_rt.sessions.close().await {
                warn!(host = %host_rt.name, error = %e, "error closing agent sessions on end_host");
            }
        }
        return Ok((TaskOutcome::Single(result), signal));
    }

    let env = env_value(&mut host_rt.vars);
    let outcome = tctx
        .run(task, &host_rt.name, &host_rt.conn, &mut host_rt.sessions, &env)
        .await?;
    register::apply_outcome(&mut host_rt.vars, settings, task, &outcome);

    if outcome.is_failed() && !task.ignore_errors {
        host_rt.failed = true;
    }
    Ok((outcome, ControlSignal::Continue))
}

/// Runs a play's task list across all its hosts with a barrier between
/// tasks (spec §4.6 "linear" strategy): every host finishes task N before
/// any host starts task N+1. `run_once` tasks execute against the first
/// eligible host only, with the same outcome registered for every host.
pub async fn run_linear(
    play: &Play,
    host_runtimes: &mut [HostRuntime],
    tctx: &TaskExecutor<'_>,
    settings: &Settings,
) -> HashMap<String, Vec<TaskOutcome>> {
    let mut reports: HashMap<String, Vec<TaskOutcome>> =
        host_runtimes.iter().map(|h| (h.name.clone(), Vec::new())).collect();
    let mut play_ended = false;

    for task in &play.tasks {
        if play_ended {
            break;
        }

        let eligible: Vec<usize> = host_runtimes
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.ended && (!h.failed || is_clear_host_errors(task)))
            .map(|(i, _)| i)
            .collect();
        if eligible.is_empty() {
            continue;
        }

        let targets: Vec<usize> = if task.run_once { vec![eligible[0]] } else { eligible.clone() };

        let results: Vec<(usize, Result<(TaskOutcome, ControlSignal)>)> = {
            let mut slots: Vec<Option<&mut HostRuntime>> = host_runtimes.iter_mut().map(Some).collect();
            let futures = targets.iter().map(|&idx| {
                let host_rt = slots[idx].take().expect("each target index is visited once");
                async move {
                    let outcome = execute_task_on_host(task, host_rt, tctx, settings).await;
                    (idx, outcome)
                }
            });
            join_all(futures).await
        };

        let mut ran_once_outcome: Option<TaskOutcome> = None;
        for (idx, result) in results {
            match result {
                Ok((outcome, signal)) => {
                    if task.run_once {
                        ran_once_outcome = Some(outcome.clone());
                    }
                    reports.get_mut(&host_runtimes[idx].name).expect("known host").push(outcome);
                    match signal {
                        ControlSignal::EndHost => host_runtimes[idx].ended = true,
                        ControlSignal::EndPlay => play_ended = true,
                        ControlSignal::Continue => {}
                    }
                }
                Err(e) => {
                    warn!(host = %host_runtimes[idx].name, task = %task.name, error = %e, "task execution error");
                    host_runtimes[idx].failed = true;
                    reports
                        .get_mut(&host_runtimes[idx].name)
                        .expect("known host")
                        .push(TaskOutcome::Single(TaskResult::failed(e.to_string())));
                }
            }
        }

        if task.run_once {
            if let Some(outcome) = ran_once_outcome {
                for &idx in eligible.iter().filter(|i| !targets.contains(i)) {
                    register::apply_outcome(&mut host_runtimes[idx].vars, settings, task, &outcome);
                    reports.get_mut(&host_runtimes[idx].name).expect("known host").push(outcome.clone());
                }
            }
        }

        if play_ended {
            for host_rt in host_runtimes.iter_mut() {
                if let Err(e) = host_rt.sessions.close().await {
                    warn!(host = %host_rt.name, error = %e, "error closing agent sessions on end_play");
                }
            }
        }
    }

    reports
}

/// Runs a play's task list independently per host (spec §4.6 "free"
/// strategy): each host runs its own task list at its own pace with no
/// barrier between hosts. `run_once` is still honored globally, via a
/// cache shared across hosts and keyed by task position; `meta: end_play`
/// under this strategy only ends the triggering host's own remaining
/// tasks, since no synchronization point exists to halt every host at once.
pub async fn run_free(
    play: &Play,
    host_runtimes: &mut [HostRuntime],
    tctx: &TaskExecutor<'_>,
    settings: &Settings,
) -> HashMap<String, Vec<TaskOutcome>> {
    let run_once_cache: Mutex<HashMap<usize, TaskOutcome>> = Mutex::new(HashMap::new());

    let futures = host_runtimes.iter_mut().map(|host_rt| {
        let cache = &run_once_cache;
        async move {
            let mut outcomes = Vec::new();
            for (idx, task) in play.tasks.iter().enumerate() {
                if host_rt.ended {
                    break;
                }
                if host_rt.failed && !is_clear_host_errors(task) {
                    break;
                }

                if task.run_once && !task.is_meta() {
                    if let Some(cached) = cache.lock().await.get(&idx).cloned() {
                        register::apply_outcome(&mut host_rt.vars, settings, task, &cached);
                        outcomes.push(cached);
                        continue;
                    }
                }

                match execute_task_on_host(task, host_rt, tctx, settings).await {
                    Ok((outcome, signal)) => {
                        if task.run_once && !task.is_meta() {
                            cache.lock().await.insert(idx, outcome.clone());
                        }
                        outcomes.push(outcome);
                        match signal {
                            ControlSignal::EndHost | ControlSignal::EndPlay => {
                                host_rt.ended = true;
                                if let Err(e) = host_rt.sessions.close().await {
                                    warn!(host = %host_rt.name, error = %e, "error closing agent sessions on end_host/end_play");
                                }
                            }
                            ControlSignal::Continue => {}
                        }
                    }
                    Err(e) => {
                        warn!(host = %host_rt.name, task = %task.name, error = %e, "task execution error");
                        host_rt.failed = true;
                        outcomes.push(TaskOutcome::Single(TaskResult::failed(e.to_string())));
                    }
                }
            }
            (host_rt.name.clone(), outcomes)
        }
    });

    join_all(futures).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn meta_task_name_reads_the_module_args_string() {
        let task = Task::new("t", "meta", json!("end_host"));
        assert_eq!(meta_task_name(&task), "end_host");
    }

    #[test]
    fn meta_task_name_defaults_to_noop() {
        let task = Task::new("t", "meta", json!(null));
        assert_eq!(meta_task_name(&task), "noop");
    }

    #[test]
    fn is_clear_host_errors_detects_the_meta_task() {
        let task = Task::new("t", "meta", json!("clear_host_errors"));
        assert!(is_clear_host_errors(&task));
        let other = Task::new("t", "meta", json!("noop"));
        assert!(!is_clear_host_errors(&other));
        let not_meta = Task::new("t", "debug", json!({}));
        assert!(!is_clear_host_errors(&not_meta));
    }
}
