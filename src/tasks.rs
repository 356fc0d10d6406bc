//! The unified task result shape returned by every module invocation,
//! meta-task, and action plugin.
//!
//! Every executed task produces exactly one `TaskResult` per host (or, for
//! a looped task, one per item plus a synthetic aggregate), following the
//! `changed`/`failed`/`skipped` triad that the rest of the engine (register,
//! `changed_when`/`failed_when` overrides, strategy-level failure counting)
//! keys off of.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The outcome of running a single module invocation on a single host (or
/// a single loop iteration of one).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the task changed state on the target.
    #[serde(default)]
    pub changed: bool,

    /// Whether the task is considered failed, after `failed_when` overrides.
    #[serde(default)]
    pub failed: bool,

    /// Whether the task was skipped (`when` was false, or an empty loop).
    #[serde(default)]
    pub skipped: bool,

    /// Whether the host was unreachable for this task.
    #[serde(default)]
    pub unreachable: bool,

    /// Human-readable message, analogous to Ansible's `msg` key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,

    /// Process exit code, for command/shell-like modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,

    /// Captured standard output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    /// Captured standard error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    /// Facts contributed by this task (e.g. `set_fact`, fact-gathering
    /// meta-tasks), merged into host facts by the executor.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub ansible_facts: HashMap<String, serde_json::Value>,

    /// Any other module-specific keys, preserved verbatim for `register`.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TaskResult {
    /// A successful, unchanged result.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A successful result that changed state.
    pub fn changed() -> Self {
        Self {
            changed: true,
            ..Default::default()
        }
    }

    /// A failed result with the given message.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            failed: true,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// A skipped result with the given reason.
    pub fn skipped(msg: impl Into<String>) -> Self {
        Self {
            skipped: true,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// An unreachable-host result.
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self {
            unreachable: true,
            failed: true,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Serializes this result to the JSON value stored under a `register`
    /// variable, adding the conventional `failed`/`changed` booleans that
    /// templates expect to find on a registered variable.
    pub fn to_registered_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// The result of a (possibly looped) task against one host: either a single
/// `TaskResult`, or one result per loop item plus a synthesized aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskOutcome {
    /// A single, non-looped invocation.
    Single(TaskResult),
    /// A looped invocation: aggregate plus per-item results.
    Looped {
        /// Aggregate: changed if any item changed, failed if any item failed.
        changed: bool,
        /// True if any item failed.
        failed: bool,
        /// Per-item results, in loop order.
        results: Vec<TaskResult>,
    },
}

impl TaskOutcome {
    /// Builds a looped outcome from per-item results.
    pub fn from_items(results: Vec<TaskResult>) -> Self {
        let changed = results.iter().any(|r| r.changed);
        let failed = results.iter().any(|r| r.failed);
        Self::Looped {
            changed,
            failed,
            results,
        }
    }

    /// True if the overall outcome is a failure.
    pub fn is_failed(&self) -> bool {
        match self {
            Self::Single(r) => r.failed,
            Self::Looped { failed, .. } => *failed,
        }
    }

    /// True if the overall outcome changed state.
    pub fn is_changed(&self) -> bool {
        match self {
            Self::Single(r) => r.changed,
            Self::Looped { changed, .. } => *changed,
        }
    }

    /// Value stored under the task's `register` name.
    pub fn to_registered_value(&self) -> serde_json::Value {
        match self {
            Self::Single(r) => r.to_registered_value(),
            Self::Looped { results, .. } => serde_json::json!({
                "changed": self.is_changed(),
                "failed": self.is_failed(),
                "results": results,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looped_outcome_aggregates_changed_and_failed() {
        let outcome = TaskOutcome::from_items(vec![
            TaskResult::ok(),
            TaskResult::changed(),
            TaskResult::ok(),
        ]);
        assert!(outcome.is_changed());
        assert!(!outcome.is_failed());
    }

    #[test]
    fn looped_outcome_failed_if_any_item_failed() {
        let outcome =
            TaskOutcome::from_items(vec![TaskResult::ok(), TaskResult::failed("boom")]);
        assert!(outcome.is_failed());
    }
}
