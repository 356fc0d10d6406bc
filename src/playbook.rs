//! Playbook and play definitions.
//!
//! A playbook is a YAML document containing one or more plays; each play
//! maps a host-selection pattern to an ordered list of tasks. This module
//! owns the data model only — parsing free-form module args, loop
//! expansion, `when` evaluation and dispatch live in `parser` and
//! `executor`.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::vars::Variables;

fn is_vars_empty(vars: &Variables) -> bool {
    vars.is_empty()
}

/// Deserialize boolean that accepts various formats (true, True, yes, 1, etc).
pub fn deserialize_bool_flexible<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct BoolVisitor;

    impl<'de> Visitor<'de> for BoolVisitor {
        type Value = bool;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a boolean value (true, false, yes, no, True, False, 1, 0)")
        }

        fn visit_bool<E>(self, value: bool) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            match value.to_lowercase().as_str() {
                "true" | "yes" | "y" | "1" | "on" => Ok(true),
                "false" | "no" | "n" | "0" | "off" => Ok(false),
                _ => Err(de::Error::custom(format!("invalid boolean: {}", value))),
            }
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value != 0)
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value != 0)
        }
    }

    deserializer.deserialize_any(BoolVisitor)
}

fn deserialize_bool_flexible_default_true<'de, D>(
    deserializer: D,
) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_bool_flexible(deserializer).or(Ok(true))
}

fn default_gather_facts() -> bool {
    true
}

/// A playbook containing one or more plays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    /// Name of the playbook (derived from filename if not set explicitly).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The plays in this playbook, in execution order.
    #[serde(flatten)]
    pub plays: Vec<Play>,

    /// Path to the playbook file, set during loading.
    #[serde(skip)]
    pub source_path: Option<std::path::PathBuf>,
}

impl Playbook {
    /// Loads a playbook from a YAML file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::playbook_parse(path, format!("failed to read file: {e}"), None)
        })?;
        Self::from_yaml(&content, Some(path.to_path_buf()))
    }

    /// Parses a playbook from a YAML string. Playbooks are a list of plays
    /// at the top level, matching Ansible's playbook document shape.
    pub fn from_yaml(yaml: &str, source_path: Option<std::path::PathBuf>) -> Result<Self> {
        let plays: Vec<Play> = serde_yaml::from_str(yaml).map_err(|e| {
            Error::playbook_parse(
                source_path
                    .as_ref()
                    .map_or_else(|| "<string>".into(), |p| p.clone()),
                e.to_string(),
                None,
            )
        })?;

        let name = source_path
            .as_ref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().to_string());

        Ok(Self {
            name,
            plays,
            source_path,
        })
    }

    /// Validates the playbook structure.
    pub fn validate(&self) -> Result<()> {
        if self.plays.is_empty() {
            return Err(Error::PlaybookValidation(
                "playbook must contain at least one play".to_string(),
            ));
        }
        for (idx, play) in self.plays.iter().enumerate() {
            play.validate().map_err(|e| {
                Error::PlaybookValidation(format!("play {} validation failed: {e}", idx + 1))
            })?;
        }
        Ok(())
    }

    /// Number of plays.
    pub fn play_count(&self) -> usize {
        self.plays.len()
    }

    /// Total number of tasks across all plays.
    pub fn task_count(&self) -> usize {
        self.plays.iter().map(|p| p.tasks.len()).sum()
    }
}

/// A play within a playbook: a host selection plus the tasks to run on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Play {
    /// Name of the play.
    #[serde(default)]
    pub name: String,

    /// Host-selection pattern matched against inventory.
    pub hosts: String,

    /// Whether to gather facts before executing tasks.
    #[serde(
        default = "default_gather_facts",
        deserialize_with = "deserialize_bool_flexible_default_true"
    )]
    pub gather_facts: bool,

    /// Subset of facts to gather.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gather_subset: Option<Vec<String>>,

    /// Timeout for fact gathering, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gather_timeout: Option<u64>,

    /// Play-level variables.
    #[serde(default, skip_serializing_if = "is_vars_empty")]
    pub vars: Variables,

    /// Variable files to load.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vars_files: Vec<String>,

    /// Tasks to run, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,

    /// Whether privilege escalation is enabled for tasks that don't override it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#become: Option<bool>,

    /// User to become.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub become_user: Option<String>,

    /// Become method (e.g. `sudo`, `su`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub become_method: Option<String>,

    /// Connection plugin name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Remote user for this play's hosts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_user: Option<String>,

    /// Port to connect on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Execution strategy (`linear` or `free`); falls back to the
    /// configured default strategy when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    /// Whether unreachable hosts should be ignored rather than halting
    /// the whole play.
    #[serde(default)]
    pub ignore_unreachable: bool,

    /// Per-module default arguments, merged under task args.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub module_defaults: HashMap<String, serde_json::Value>,

    /// Environment variables exported to every task in this play.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    /// Tags, used for task-subset selection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Play {
    /// Creates a new play with the given name and host pattern.
    pub fn new(name: impl Into<String>, hosts: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hosts: hosts.into(),
            gather_facts: true,
            gather_subset: None,
            gather_timeout: None,
            vars: Variables::new(),
            vars_files: Vec::new(),
            tasks: Vec::new(),
            r#become: None,
            become_user: None,
            become_method: None,
            connection: None,
            remote_user: None,
            port: None,
            strategy: None,
            ignore_unreachable: false,
            module_defaults: HashMap::new(),
            environment: HashMap::new(),
            tags: Vec::new(),
        }
    }

    /// Validates the play structure.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(Error::PlaybookValidation(
                "play must specify hosts".to_string(),
            ));
        }
        for task in &self.tasks {
            task.validate()?;
        }
        Ok(())
    }

    /// Total number of tasks in this play.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

/// A task to execute: a module invocation plus loop/when/become modifiers.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    /// Name of the task.
    pub name: String,

    /// Module (or meta-task, or action plugin) to execute.
    pub module: TaskModule,

    /// Conditional execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<When>,

    /// Loop expression (`loop:`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_: Option<serde_json::Value>,

    /// Legacy `with_items` loop syntax.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with_items: Option<serde_json::Value>,

    /// Generic `with_<lookup>:` loop syntax: the lookup plugin name plus its
    /// (unrendered) argument expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with_lookup: Option<(String, serde_json::Value)>,

    /// Register the task's result under this variable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,

    /// Loop control options (loop variable name, label, pause).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_control: Option<LoopControl>,

    /// Whether a non-zero/failed result should be ignored.
    pub ignore_errors: bool,

    /// Whether an unreachable host should be ignored for this task.
    pub ignore_unreachable: bool,

    /// Whether this task escalates privileges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#become: Option<bool>,

    /// User to become for this task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub become_user: Option<String>,

    /// Run this task against a different host than the one being iterated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegate_to: Option<String>,

    /// Run only once, on the first matched host.
    pub run_once: bool,

    /// Expression overriding whether the task is reported as "changed".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed_when: Option<String>,

    /// Expression overriding whether the task is reported as "failed".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_when: Option<String>,

    /// Tags, used for task-subset selection.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Task-level variables.
    #[serde(skip_serializing_if = "is_vars_empty")]
    pub vars: Variables,

    /// Environment variables for this task.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    /// Number of retries for a `until` loop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Delay between retries, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,

    /// Condition evaluated after each attempt to decide whether to retry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
}

impl<'de> Deserialize<'de> for Task {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let value = serde_json::Value::deserialize(deserializer)?;
        let obj = value
            .as_object()
            .ok_or_else(|| D::Error::custom("task must be an object"))?;

        let skip_keys: std::collections::HashSet<&str> = [
            "name",
            "when",
            "loop",
            "loop_",
            "with_items",
            "register",
            "loop_control",
            "ignore_errors",
            "ignore_unreachable",
            "become",
            "become_user",
            "delegate_to",
            "run_once",
            "changed_when",
            "failed_when",
            "tags",
            "vars",
            "environment",
            "retries",
            "delay",
            "until",
            "args",
        ]
        .iter()
        .copied()
        .collect();

        let module_name = obj
            .keys()
            .find(|k| !skip_keys.contains(k.as_str()) && !k.starts_with("with_"))
            .cloned()
            .unwrap_or_else(|| "debug".to_string());

        let module_args = obj
            .get(&module_name)
            .cloned()
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        let with_lookup = obj
            .keys()
            .find(|k| k.starts_with("with_") && k.as_str() != "with_items")
            .map(|k| {
                (
                    k.trim_start_matches("with_").to_string(),
                    obj.get(k).cloned().unwrap_or(serde_json::Value::Null),
                )
            });

        let parse_bool = |v: &serde_json::Value| -> bool {
            match v {
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::String(s) => {
                    matches!(s.to_lowercase().as_str(), "true" | "yes" | "y" | "1" | "on")
                }
                serde_json::Value::Number(n) => n.as_i64().map(|i| i != 0).unwrap_or(false),
                _ => false,
            }
        };
        let parse_option_bool =
            |v: Option<&serde_json::Value>| -> Option<bool> { v.map(parse_bool) };

        let tags = match obj.get("tags") {
            Some(serde_json::Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        };

        let when = match obj.get("when") {
            Some(serde_json::Value::String(s)) => Some(When::Single(s.clone())),
            Some(serde_json::Value::Array(arr)) => {
                let conditions: Vec<String> = arr
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect();
                if conditions.is_empty() {
                    None
                } else {
                    Some(When::Multiple(conditions))
                }
            }
            Some(serde_json::Value::Bool(b)) => Some(When::Single(b.to_string())),
            _ => None,
        };

        let loop_ = obj.get("loop").or(obj.get("loop_")).cloned();

        let loop_control = obj
            .get("loop_control")
            .and_then(|v| serde_json::from_value::<LoopControl>(v.clone()).ok());

        let vars = obj
            .get("vars")
            .and_then(|v| serde_json::from_value::<Variables>(v.clone()).ok())
            .unwrap_or_default();

        let environment = obj
            .get("environment")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Task {
            name: obj
                .get("name")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_default(),
            module: TaskModule {
                name: module_name,
                args: module_args,
            },
            when,
            loop_,
            with_items: obj.get("with_items").cloned(),
            with_lookup,
            register: obj
                .get("register")
                .and_then(|v| v.as_str())
                .map(String::from),
            loop_control,
            ignore_errors: obj.get("ignore_errors").map(parse_bool).unwrap_or(false),
            ignore_unreachable: obj
                .get("ignore_unreachable")
                .map(parse_bool)
                .unwrap_or(false),
            r#become: parse_option_bool(obj.get("become")),
            become_user: obj
                .get("become_user")
                .and_then(|v| v.as_str())
                .map(String::from),
            delegate_to: obj
                .get("delegate_to")
                .and_then(|v| v.as_str())
                .map(String::from),
            run_once: obj.get("run_once").map(parse_bool).unwrap_or(false),
            changed_when: obj.get("changed_when").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Bool(b) => Some(b.to_string()),
                _ => None,
            }),
            failed_when: obj
                .get("failed_when")
                .and_then(|v| v.as_str())
                .map(String::from),
            tags,
            vars,
            environment,
            retries: obj
                .get("retries")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
            delay: obj.get("delay").and_then(|v| v.as_u64()),
            until: obj.get("until").and_then(|v| v.as_str()).map(String::from),
        })
    }
}

impl Task {
    /// Creates a new task.
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            module: TaskModule {
                name: module.into(),
                args,
            },
            when: None,
            loop_: None,
            with_items: None,
            with_lookup: None,
            register: None,
            loop_control: None,
            ignore_errors: false,
            ignore_unreachable: false,
            r#become: None,
            become_user: None,
            delegate_to: None,
            run_once: false,
            changed_when: None,
            failed_when: None,
            tags: Vec::new(),
            vars: Variables::new(),
            environment: HashMap::new(),
            retries: None,
            delay: None,
            until: None,
        }
    }

    /// Validates the task.
    pub fn validate(&self) -> Result<()> {
        if self.module.name.is_empty() {
            return Err(Error::PlaybookValidation(
                "task must specify a module".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the module name.
    pub fn module_name(&self) -> &str {
        &self.module.name
    }

    /// Returns the module arguments.
    pub fn module_args(&self) -> &serde_json::Value {
        &self.module.args
    }

    /// True if this task is one of the built-in meta tasks (`meta:`), to be
    /// handled by the executor directly instead of dispatched to a host.
    pub fn is_meta(&self) -> bool {
        self.module.name == "meta"
    }
}

/// Module invocation in a task.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskModule {
    /// Module name, extracted from the task's free-key during deserialization.
    #[serde(skip)]
    pub name: String,

    /// Module arguments.
    pub args: serde_json::Value,
}

/// Conditional expression attached to a task via `when:`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum When {
    /// A single condition expression.
    Single(String),
    /// Multiple condition expressions, ANDed together.
    Multiple(Vec<String>),
}

impl When {
    /// Returns the individual condition expressions.
    pub fn conditions(&self) -> Vec<&str> {
        match self {
            Self::Single(s) => vec![s.as_str()],
            Self::Multiple(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// Loop control options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopControl {
    /// Variable name bound to the current loop item.
    #[serde(default = "default_loop_var")]
    pub loop_var: String,

    /// Variable name bound to the current loop index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_var: Option<String>,

    /// Template used to label each iteration in output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Pause, in seconds, between iterations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause: Option<u64>,
}

fn default_loop_var() -> String {
    "item".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_playbook() {
        let yaml = r#"
- name: Test Play
  hosts: all
  tasks:
    - name: Echo hello
      command: echo hello
"#;
        let playbook = Playbook::from_yaml(yaml, None).unwrap();
        assert_eq!(playbook.plays.len(), 1);
        assert_eq!(playbook.plays[0].name, "Test Play");
        assert_eq!(playbook.plays[0].tasks[0].module_name(), "command");
    }

    #[test]
    fn task_when_accepts_string_or_list() {
        let yaml = r#"
name: t
command: /bin/true
when:
  - ansible_os_family == "Debian"
  - foo is defined
"#;
        let task: Task = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.when.unwrap().conditions().len(), 2);
    }

    #[test]
    fn with_lookup_syntax_is_captured_and_excluded_from_module_name() {
        let yaml = r#"
name: t
debug:
  msg: "{{ item }}"
with_sequence: start=1 end=3
"#;
        let task: Task = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.module_name(), "debug");
        let (name, args) = task.with_lookup.unwrap();
        assert_eq!(name, "sequence");
        assert_eq!(args, serde_json::json!("start=1 end=3"));
    }

    #[test]
    fn meta_task_detection() {
        let task = Task::new("noop", "meta", serde_json::json!("noop"));
        assert!(task.is_meta());
    }
}
