//! Crate-wide constants: the magic-variable alias table and a handful of
//! protocol constants shared between the connection, agent, and variable
//! layers.

/// One canonical magic variable name and the ordered list of aliases that
/// may supply its value. When composing the magic-variable layer, the
/// first alias in this list that is actually defined among a host's
/// connection variables wins; this makes canonicalization deterministic
/// regardless of how many aliases happen to be set at once.
pub struct MagicVariableMapping {
    /// The canonical variable name other layers and templates see.
    pub canonical: &'static str,
    /// Aliases searched in order, most-specific first.
    pub aliases: &'static [&'static str],
}

/// The base magic-variable table: canonical names the connection layer and
/// templates rely on, plus every alias that can supply them. Connection-
/// specific variables (`ansible_host`, `ansible_port`, `ansible_user`,
/// `ansible_connection`, `ansible_ssh_private_key_file`, ...) come first,
/// followed by the shell/module-invocation variables the original carries
/// beyond what the distillation called out by example
/// (`ansible_shell_type`, `ansible_module_compression`).
pub static MAGIC_VARIABLE_MAPPING: &[MagicVariableMapping] = &[
    MagicVariableMapping {
        canonical: "remote_addr",
        aliases: &["ansible_ssh_host", "ansible_host"],
    },
    MagicVariableMapping {
        canonical: "remote_port",
        aliases: &["ansible_ssh_port", "ansible_port"],
    },
    MagicVariableMapping {
        canonical: "remote_user",
        aliases: &["ansible_ssh_user", "ansible_user"],
    },
    MagicVariableMapping {
        canonical: "password",
        aliases: &["ansible_ssh_pass", "ansible_password"],
    },
    MagicVariableMapping {
        canonical: "private_key_file",
        aliases: &[
            "ansible_ssh_private_key_file",
            "ansible_private_key_file",
        ],
    },
    MagicVariableMapping {
        canonical: "connection",
        aliases: &["ansible_connection"],
    },
    MagicVariableMapping {
        canonical: "become",
        aliases: &["ansible_become"],
    },
    MagicVariableMapping {
        canonical: "become_method",
        aliases: &["ansible_become_method"],
    },
    MagicVariableMapping {
        canonical: "become_user",
        aliases: &["ansible_become_user"],
    },
    MagicVariableMapping {
        canonical: "become_pass",
        aliases: &["ansible_become_pass", "ansible_become_password"],
    },
    MagicVariableMapping {
        canonical: "shell_type",
        aliases: &["ansible_shell_type"],
    },
    MagicVariableMapping {
        canonical: "shell_executable",
        aliases: &["ansible_shell_executable"],
    },
    MagicVariableMapping {
        canonical: "module_compression",
        aliases: &["ansible_module_compression"],
    },
    MagicVariableMapping {
        canonical: "python_interpreter",
        aliases: &["ansible_python_interpreter"],
    },
];

/// Canonicalizes a single magic variable given a lookup function over a
/// host's raw variables. Returns the value of the first alias that is
/// defined, per [`MAGIC_VARIABLE_MAPPING`]'s declared order — this is the
/// "first alias wins" rule the variable manager's determinism property
/// depends on.
pub fn canonicalize<'a, F>(canonical: &str, lookup: F) -> Option<serde_json::Value>
where
    F: Fn(&str) -> Option<&'a serde_json::Value>,
{
    let entry = MAGIC_VARIABLE_MAPPING
        .iter()
        .find(|m| m.canonical == canonical)?;
    entry.aliases.iter().find_map(|alias| lookup(alias).cloned())
}

/// Default agent cache directory name under the remote user's home, used
/// when probing for and uploading the content-addressed agent binary.
pub const AGENT_CACHE_DIR: &str = ".cache/rustible_agent";

/// Filename the agent binary is renamed to once it is fully in place,
/// making the presence probe idempotent across runs.
pub const AGENT_BINARY_NAME: &str = "rustible_agent";

/// Filename the agent binary is uploaded under before the remote process
/// renames itself into [`AGENT_BINARY_NAME`] on startup.
pub const AGENT_BINARY_TMP_NAME: &str = "rustible_agent.tmp";

/// Default remote-side shell executable used to run probe and bootstrap
/// commands, absent an `ansible_shell_executable`/`shell_executable`
/// override.
pub const DEFAULT_SHELL_EXECUTABLE: &str = "/bin/sh";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn first_alias_wins() {
        let mut vars: HashMap<String, serde_json::Value> = HashMap::new();
        vars.insert("ansible_ssh_host".to_string(), json!("10.0.0.1"));
        vars.insert("ansible_host".to_string(), json!("10.0.0.2"));

        let resolved = canonicalize("remote_addr", |k| vars.get(k)).unwrap();
        assert_eq!(resolved, json!("10.0.0.1"));
    }

    #[test]
    fn falls_back_to_later_alias() {
        let mut vars: HashMap<String, serde_json::Value> = HashMap::new();
        vars.insert("ansible_host".to_string(), json!("10.0.0.2"));

        let resolved = canonicalize("remote_addr", |k| vars.get(k)).unwrap();
        assert_eq!(resolved, json!("10.0.0.2"));
    }

    #[test]
    fn missing_alias_returns_none() {
        let vars: HashMap<String, serde_json::Value> = HashMap::new();
        assert!(canonicalize("remote_addr", |k| vars.get(k)).is_none());
    }
}
