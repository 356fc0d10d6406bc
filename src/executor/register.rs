//! Applying a task's outcome back into the per-host variable store (spec
//! §4.6): `register:` captures the raw result, and any `ansible_facts` a
//! module returned (from `set_fact`, `include_vars`, or a real remote
//! module such as `setup`) are merged into the host's fact bucket.
//!
//! Grounded on `modules::set_fact`'s doc comment, which states the
//! contract from the plugin side: a plugin returns facts in
//! `Return::ansible_facts` and leaves writing them into the variable
//! store to the caller.

use std::collections::HashMap;

use crate::config::Settings;
use crate::playbook::Task;
use crate::tasks::TaskOutcome;
use crate::vars::{VarPrecedence, VarStore};

/// Applies a finished task's outcome to `vars`: registers it under
/// `task.register` if set, then merges any facts it produced.
pub fn apply_outcome(vars: &mut VarStore, settings: &Settings, task: &Task, outcome: &TaskOutcome) {
    if let Some(name) = &task.register {
        vars.set(name.clone(), outcome.to_registered_value(), VarPrecedence::IncludeVarsSetFact);
    }
    for facts in outcome_facts(outcome) {
        apply_facts(vars, settings, facts);
    }
}

fn outcome_facts(outcome: &TaskOutcome) -> Vec<&HashMap<String, serde_json::Value>> {
    match outcome {
        TaskOutcome::Single(result) => vec![&result.ansible_facts],
        TaskOutcome::Looped { results, .. } => results.iter().map(|r| &r.ansible_facts).collect(),
    }
}

fn apply_facts(vars: &mut VarStore, settings: &Settings, facts: &HashMap<String, serde_json::Value>) {
    if facts.is_empty() {
        return;
    }

    let mut bucket = vars
        .get("ansible_facts")
        .cloned()
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
    if let serde_json::Value::Object(map) = &mut bucket {
        for (k, v) in facts {
            map.insert(k.clone(), v.clone());
        }
    }
    vars.set("ansible_facts".to_string(), bucket, VarPrecedence::HostFacts);

    if settings.inject_facts_as_vars {
        vars.set_many(facts.clone(), VarPrecedence::HostFacts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskResult;
    use crate::vars::HashBehaviour;
    use serde_json::json;

    fn new_store() -> VarStore {
        VarStore::new(HashBehaviour::Replace, Default::default())
    }

    #[test]
    fn register_stores_the_task_outcome() {
        let mut vars = new_store();
        let settings = Settings::default();
        let mut task = Task::new("t", "debug", json!({}));
        task.register = Some("result".to_string());
        let outcome = TaskOutcome::Single(TaskResult::changed());

        apply_outcome(&mut vars, &settings, &task, &outcome);

        let registered = vars.get("result").expect("registered var present");
        assert_eq!(registered["changed"], json!(true));
    }

    #[test]
    fn facts_merge_into_ansible_facts_bucket() {
        let mut vars = new_store();
        let settings = Settings::default();
        let task = Task::new("t", "setup", json!({}));
        let mut result = TaskResult::changed();
        result.ansible_facts.insert("ansible_os_family".to_string(), json!("Debian"));
        let outcome = TaskOutcome::Single(result);

        apply_outcome(&mut vars, &settings, &task, &outcome);

        let bucket = vars.get("ansible_facts").expect("facts bucket present");
        assert_eq!(bucket["ansible_os_family"], json!("Debian"));
    }

    #[test]
    fn facts_injected_as_top_level_vars_when_enabled() {
        let mut vars = new_store();
        let mut settings = Settings::default();
        settings.inject_facts_as_vars = true;
        let task = Task::new("t", "setup", json!({}));
        let mut result = TaskResult::changed();
        result.ansible_facts.insert("ansible_os_family".to_string(), json!("Debian"));
        let outcome = TaskOutcome::Single(result);

        apply_outcome(&mut vars, &settings, &task, &outcome);

        assert_eq!(vars.get("ansible_os_family"), Some(&json!("Debian")));
    }
}
