//! Variable management and the engine's precedence stack.
//!
//! Variables are composed from many sources (role defaults, group/host
//! vars, facts, play/task vars, extra-vars, magic vars, loop vars) into a
//! single flattened view per host, per task. This module owns that
//! composition; it does not itself know how to load files or gather facts
//! — callers push values into the appropriate [`VarPrecedence`] layer.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::config::VariablePrecedence as GroupVarsOrder;
use crate::error::{Error, Result};

/// Variable precedence layers, lowest to highest, matching the engine's
/// canonical composition order. `extra-vars` is deliberately applied three
/// times: once ahead of play vars (so plain group/host vars never shadow
/// it), once again after play vars (so play vars can still be overridden
/// where Ansible compatibility expects it), and a final time just before
/// magic/loop vars so that nothing but the per-iteration loop variable can
/// ever outrank it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VarPrecedence {
    /// Role defaults (`roles/*/defaults/main.yml`); always empty in this
    /// engine since role loading is out of scope, but the slot exists so
    /// the precedence order itself is testable.
    RoleDefaults = 1,
    /// Inventory group vars, ordered by group depth per the configured
    /// [`GroupVarsOrder`].
    GroupVars = 2,
    /// Inventory host vars.
    HostVars = 3,
    /// Facts gathered from (or set on) the host.
    HostFacts = 4,
    /// `--extra-vars`, first application.
    ExtraVarsFirst = 5,
    /// Play-level `vars:`.
    PlayVars = 6,
    /// `--extra-vars`, second application.
    ExtraVarsSecond = 7,
    /// Task-level `vars:`.
    TaskVars = 8,
    /// `include_vars` and `set_fact` results.
    IncludeVarsSetFact = 9,
    /// Role vars (`roles/*/vars/main.yml`); same empty-slot caveat as
    /// [`RoleDefaults`](Self::RoleDefaults).
    RoleVars = 10,
    /// `--extra-vars`, third and final application.
    ExtraVarsThird = 11,
    /// Canonicalized magic variables (`remote_addr`, `become_user`, ...).
    MagicVars = 12,
    /// The current loop iteration's variable (highest precedence: nothing
    /// may shadow the item a task is currently operating on).
    LoopVars = 13,
}

impl VarPrecedence {
    /// All levels in composition order (lowest to highest).
    pub fn all() -> impl Iterator<Item = VarPrecedence> {
        [
            VarPrecedence::RoleDefaults,
            VarPrecedence::GroupVars,
            VarPrecedence::HostVars,
            VarPrecedence::HostFacts,
            VarPrecedence::ExtraVarsFirst,
            VarPrecedence::PlayVars,
            VarPrecedence::ExtraVarsSecond,
            VarPrecedence::TaskVars,
            VarPrecedence::IncludeVarsSetFact,
            VarPrecedence::RoleVars,
            VarPrecedence::ExtraVarsThird,
            VarPrecedence::MagicVars,
            VarPrecedence::LoopVars,
        ]
        .into_iter()
    }

    /// The numeric precedence level (higher overrides lower).
    pub fn level(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for VarPrecedence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VarPrecedence::RoleDefaults => "role defaults",
            VarPrecedence::GroupVars => "group vars",
            VarPrecedence::HostVars => "host vars",
            VarPrecedence::HostFacts => "host facts",
            VarPrecedence::ExtraVarsFirst => "extra vars (1st pass)",
            VarPrecedence::PlayVars => "play vars",
            VarPrecedence::ExtraVarsSecond => "extra vars (2nd pass)",
            VarPrecedence::TaskVars => "task vars",
            VarPrecedence::IncludeVarsSetFact => "include_vars / set_fact",
            VarPrecedence::RoleVars => "role vars",
            VarPrecedence::ExtraVarsThird => "extra vars (3rd pass)",
            VarPrecedence::MagicVars => "magic vars",
            VarPrecedence::LoopVars => "loop vars",
        };
        write!(f, "{name}")
    }
}

/// Hash-merge behavior when the same key appears at multiple layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashBehaviour {
    /// A higher-precedence mapping entirely replaces a lower one sharing
    /// the same key (the default).
    #[default]
    Replace,
    /// Mappings are merged recursively, key by key; scalars still replace.
    Merge,
}

/// A value stored in the variable stack, with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    /// The variable's value.
    pub value: serde_json::Value,
    /// The layer it was set at.
    pub precedence: VarPrecedence,
    /// Source description (file path, "extra-vars", etc.), for diagnostics.
    pub source: Option<String>,
}

impl Variable {
    /// Creates a variable at the given precedence with no source info.
    pub fn new(value: serde_json::Value, precedence: VarPrecedence) -> Self {
        Self {
            value,
            precedence,
            source: None,
        }
    }

    /// Creates a variable at the given precedence with a source label.
    pub fn with_source(
        value: serde_json::Value,
        precedence: VarPrecedence,
        source: impl Into<String>,
    ) -> Self {
        Self {
            value,
            precedence,
            source: Some(source.into()),
        }
    }
}

/// The per-host variable store: one precedence layer per [`VarPrecedence`],
/// flattened into a single merged view on demand.
#[derive(Debug, Clone, Default)]
pub struct VarStore {
    layers: HashMap<VarPrecedence, IndexMap<String, Variable>>,
    merged_cache: Option<IndexMap<String, serde_json::Value>>,
    hash_behaviour: HashBehaviour,
    group_vars_order: GroupVarsOrder,
}

impl VarStore {
    /// Creates a new, empty store using the given settings.
    pub fn new(hash_behaviour: HashBehaviour, group_vars_order: GroupVarsOrder) -> Self {
        Self {
            layers: HashMap::new(),
            merged_cache: None,
            hash_behaviour,
            group_vars_order,
        }
    }

    /// Sets a single variable at the given precedence layer.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: serde_json::Value,
        precedence: VarPrecedence,
    ) {
        self.merged_cache = None;
        self.layers
            .entry(precedence)
            .or_default()
            .insert(key.into(), Variable::new(value, precedence));
    }

    /// Sets many variables at once, at the given precedence layer.
    pub fn set_many(
        &mut self,
        vars: impl IntoIterator<Item = (String, serde_json::Value)>,
        precedence: VarPrecedence,
    ) {
        self.merged_cache = None;
        let layer = self.layers.entry(precedence).or_default();
        for (key, value) in vars {
            layer.insert(key, Variable::new(value, precedence));
        }
    }

    /// Loads variables from a YAML file into the given precedence layer.
    /// Rejects content recognized as vault-encrypted, since the engine
    /// never decrypts vault data.
    pub fn load_file(&mut self, path: impl AsRef<Path>, precedence: VarPrecedence) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        if crate::vault::is_encrypted(&content) {
            return Err(Error::Config(format!(
                "{} is vault-encrypted; vault decryption is not supported",
                path.display()
            )));
        }
        let vars: IndexMap<String, serde_json::Value> = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;

        self.merged_cache = None;
        let source = path.display().to_string();
        let layer = self.layers.entry(precedence).or_default();
        for (key, value) in vars {
            layer.insert(key, Variable::with_source(value, precedence, &source));
        }
        Ok(())
    }

    /// Clears a single precedence layer (e.g. `clear_facts` meta-task).
    pub fn clear_precedence(&mut self, precedence: VarPrecedence) {
        self.merged_cache = None;
        self.layers.remove(&precedence);
    }

    /// Clears every layer.
    pub fn clear(&mut self) {
        self.merged_cache = None;
        self.layers.clear();
    }

    /// Looks up a single variable in the merged view.
    pub fn get(&mut self, key: &str) -> Option<&serde_json::Value> {
        self.ensure_merged();
        self.merged_cache.as_ref().and_then(|c| c.get(key))
    }

    /// True if the merged view contains `key`.
    pub fn contains(&mut self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// The full merged view, composed in precedence order. `group_vars`
    /// (layer 2) is composed before or after `host_vars` (layer 3)
    /// according to [`GroupVarsOrder`]; every other layer follows the
    /// fixed order in [`VarPrecedence::all`].
    pub fn merged(&mut self) -> &IndexMap<String, serde_json::Value> {
        self.ensure_merged();
        self.merged_cache.as_ref().unwrap()
    }

    fn composition_order(&self) -> Vec<VarPrecedence> {
        let mut order: Vec<VarPrecedence> = VarPrecedence::all().collect();
        if self.group_vars_order == GroupVarsOrder::GroupVarsAfterHostVars {
            let group_idx = order
                .iter()
                .position(|p| *p == VarPrecedence::GroupVars)
                .unwrap();
            let host_idx = order
                .iter()
                .position(|p| *p == VarPrecedence::HostVars)
                .unwrap();
            order.swap(group_idx, host_idx);
        }
        order
    }

    fn ensure_merged(&mut self) {
        if self.merged_cache.is_some() {
            return;
        }
        let mut merged = IndexMap::new();
        for precedence in self.composition_order() {
            if let Some(layer) = self.layers.get(&precedence) {
                for (key, var) in layer {
                    Self::merge_value(self.hash_behaviour, &mut merged, key, &var.value);
                }
            }
        }
        self.merged_cache = Some(merged);
    }

    fn merge_value(
        behaviour: HashBehaviour,
        merged: &mut IndexMap<String, serde_json::Value>,
        key: &str,
        value: &serde_json::Value,
    ) {
        match behaviour {
            HashBehaviour::Replace => {
                merged.insert(key.to_string(), value.clone());
            }
            HashBehaviour::Merge => {
                let next = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.to_string(), next);
            }
        }
    }
}

/// Deep-merges two JSON values: mappings merge key-by-key, anything else
/// is replaced by the overlay.
pub fn deep_merge(base: &serde_json::Value, overlay: &serde_json::Value) -> serde_json::Value {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let next = match base_map.get(key) {
                    Some(base_value) => deep_merge(base_value, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            serde_json::Value::Object(merged)
        }
        (_, overlay) => overlay.clone(),
    }
}

/// A simple, order-preserving bag of variables, used for the `vars:` field
/// on plays/tasks before they're folded into a [`VarStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Variables {
    data: IndexMap<String, serde_json::Value>,
}

impl Variables {
    /// Creates an empty set of variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a variable.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Gets a variable.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// True if `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Merges `other` on top of `self` (other wins on key collision).
    pub fn merge(&mut self, other: &Variables) {
        for (k, v) in &other.data {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// All variables as an ordered map.
    pub fn as_map(&self) -> &IndexMap<String, serde_json::Value> {
        &self.data
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.data.len()
    }
}

impl IntoIterator for Variables {
    type Item = (String, serde_json::Value);
    type IntoIter = indexmap::map::IntoIter<String, serde_json::Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> VarStore {
        VarStore::new(HashBehaviour::Replace, GroupVarsOrder::GroupVarsBeforeHostVars)
    }

    #[test]
    fn precedence_order_is_total() {
        let levels: Vec<_> = VarPrecedence::all().collect();
        assert_eq!(levels.len(), 13);
        assert!(VarPrecedence::LoopVars > VarPrecedence::MagicVars);
        assert!(VarPrecedence::ExtraVarsThird > VarPrecedence::RoleVars);
    }

    #[test]
    fn higher_layer_wins() {
        let mut s = store();
        s.set("x", json!("low"), VarPrecedence::RoleDefaults);
        s.set("x", json!("high"), VarPrecedence::LoopVars);
        assert_eq!(s.get("x"), Some(&json!("high")));
    }

    #[test]
    fn extra_vars_beats_play_vars_even_from_first_pass() {
        let mut s = store();
        s.set("x", json!("extra"), VarPrecedence::ExtraVarsFirst);
        s.set("x", json!("play"), VarPrecedence::PlayVars);
        // extra-vars' second pass (layer 7) still outranks play vars (layer 6).
        s.set("x", json!("extra2"), VarPrecedence::ExtraVarsSecond);
        assert_eq!(s.get("x"), Some(&json!("extra2")));
    }

    #[test]
    fn group_vars_order_is_configurable() {
        let mut s = VarStore::new(HashBehaviour::Replace, GroupVarsOrder::GroupVarsAfterHostVars);
        s.set("x", json!("group"), VarPrecedence::GroupVars);
        s.set("x", json!("host"), VarPrecedence::HostVars);
        assert_eq!(s.get("x"), Some(&json!("group")));
    }

    #[test]
    fn merge_hash_behaviour_combines_maps() {
        let mut s = VarStore::new(HashBehaviour::Merge, GroupVarsOrder::GroupVarsBeforeHostVars);
        s.set("m", json!({"a": 1, "b": 2}), VarPrecedence::GroupVars);
        s.set("m", json!({"b": 3, "c": 4}), VarPrecedence::HostVars);
        assert_eq!(s.get("m"), Some(&json!({"a": 1, "b": 3, "c": 4})));
    }

    #[test]
    fn deep_merge_preserves_untouched_keys() {
        let base = json!({"a": 1, "b": {"c": 2, "d": 3}});
        let overlay = json!({"b": {"c": 4, "e": 5}, "f": 6});
        let merged = deep_merge(&base, &overlay);
        assert_eq!(merged, json!({"a": 1, "b": {"c": 4, "d": 3, "e": 5}, "f": 6}));
    }
}
