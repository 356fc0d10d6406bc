//! Action/module dispatch registry (C10).
//!
//! `command`, `shell`, `copy`, and every other module that actually touches
//! the managed host run inside the remote agent process and are dispatched
//! there over RPC (see [`crate::agent`]); this crate only needs to know
//! their names so dispatch doesn't error before reaching the RPC call.
//! A handful of modules are, by long-standing Ansible convention, action
//! plugins instead: they run entirely on the controller because their job
//! is to manipulate the variable environment or local control flow rather
//! than touch the managed host. Those are implemented here.

pub mod assert;
pub mod debug;
pub mod include_vars;
pub mod pause;
pub mod set_fact;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::traits::ActionPlugin;

/// Where a registered action name resolves to.
pub enum ModuleSpec {
    /// Runs locally via the given action plugin.
    Local(Arc<dyn ActionPlugin>),
    /// Runs remotely; dispatch serializes `args` and invokes it over the
    /// agent's RPC channel under this module name.
    Remote,
}

/// Maps action/module names (with FQCN aliasing) to where they resolve.
pub struct ModuleRegistry {
    entries: HashMap<String, ModuleSpec>,
}

/// Namespace prefixes every unqualified name is also registered under, per
/// the FQCN aliasing rule.
const BUILTIN_NAMESPACE: &str = "builtin-namespace";
const LEGACY_NAMESPACE: &str = "legacy-namespace";

/// Remote module names the core dispatcher recognizes without needing any
/// local implementation.
const KNOWN_REMOTE_MODULES: &[&str] = &[
    "command", "shell", "copy", "ping", "setup", "file", "template", "fetch", "raw",
];

impl ModuleRegistry {
    /// Builds the registry with every built-in action plugin and known
    /// remote module name registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self {
            entries: HashMap::new(),
        };

        registry.register_local("debug", Arc::new(debug::DebugAction));
        registry.register_local("assert", Arc::new(assert::AssertAction));
        registry.register_local("set_fact", Arc::new(set_fact::SetFactAction));
        registry.register_local("pause", Arc::new(pause::PauseAction));
        registry.register_local("include_vars", Arc::new(include_vars::IncludeVarsAction));

        for name in KNOWN_REMOTE_MODULES {
            registry.register_remote(name);
        }

        registry
    }

    /// Registers `name` as resolving to a local action plugin, under `name`
    /// itself plus both namespaced aliases.
    pub fn register_local(&mut self, name: &str, plugin: Arc<dyn ActionPlugin>) {
        for key in Self::fqcn_aliases(name) {
            self.entries.insert(key, ModuleSpec::Local(plugin.clone()));
        }
    }

    /// Registers `name` as a remote module, under `name` itself plus both
    /// namespaced aliases.
    pub fn register_remote(&mut self, name: &str) {
        for key in Self::fqcn_aliases(name) {
            self.entries.insert(key, ModuleSpec::Remote);
        }
    }

    /// Looks up `name`, returning its resolved spec.
    pub fn resolve(&self, name: &str) -> Result<&ModuleSpec> {
        self.entries
            .get(name)
            .ok_or_else(|| Error::ModuleNotFound(name.to_string()))
    }

    /// Every unqualified name is registered under three keys: the bare
    /// name, `builtin-namespace.name`, and `legacy-namespace.name`.
    /// Already-qualified names (containing a `.`) are registered once,
    /// verbatim.
    fn fqcn_aliases(name: &str) -> Vec<String> {
        if name.contains('.') {
            vec![name.to_string()]
        } else {
            vec![
                name.to_string(),
                format!("{BUILTIN_NAMESPACE}.{name}"),
                format!("{LEGACY_NAMESPACE}.{name}"),
            ]
        }
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unqualified_name_resolves_under_all_three_aliases() {
        let registry = ModuleRegistry::with_builtins();
        assert!(matches!(
            registry.resolve("debug").unwrap(),
            ModuleSpec::Local(_)
        ));
        assert!(matches!(
            registry.resolve("builtin-namespace.debug").unwrap(),
            ModuleSpec::Local(_)
        ));
        assert!(matches!(
            registry.resolve("legacy-namespace.debug").unwrap(),
            ModuleSpec::Local(_)
        ));
    }

    #[test]
    fn known_remote_module_resolves() {
        let registry = ModuleRegistry::with_builtins();
        assert!(matches!(
            registry.resolve("command").unwrap(),
            ModuleSpec::Remote
        ));
    }

    #[test]
    fn unknown_name_errors() {
        let registry = ModuleRegistry::with_builtins();
        assert!(registry.resolve("totally_unknown").is_err());
    }
}
