//! Configuration module for Rustible's core execution engine.
//!
//! Exposes a process-wide, lazily-initialized [`Manager`] singleton holding
//! the engine's [`Settings`]. Settings start from built-in defaults and may
//! optionally be merged with an INI-style override file (an `ansible.cfg`
//! workalike: `[defaults]`/`[privilege_escalation]` sections, `;` and `#`
//! full-line and inline comments). Loading fires a one-shot event: every
//! registered subscriber runs synchronously, once, on load and again on
//! every subsequent reload.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// What happens when a template references a variable that is not defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndefinedVarBehavior {
    /// Fail the task with an `UndefinedVariable` error.
    Error,
    /// Render as an empty string and continue.
    Allow,
}

impl Default for UndefinedVarBehavior {
    fn default() -> Self {
        Self::Error
    }
}

/// Whether explicit group vars are layered before or after host vars when
/// composing the variable-precedence stack (see the variable manager's
/// 14-layer composition order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariablePrecedence {
    /// Group vars are applied before host vars (the default, matching the
    /// canonical precedence order).
    GroupVarsBeforeHostVars,
    /// Group vars are applied after host vars, letting group vars win ties.
    GroupVarsAfterHostVars,
}

impl Default for VariablePrecedence {
    fn default() -> Self {
        Self::GroupVarsBeforeHostVars
    }
}

/// Process-wide engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Execution strategy used when a play does not name one explicitly
    /// (`linear` or `free`).
    pub default_strategy: String,

    /// Whether tasks escalate privileges by default.
    pub default_become: bool,

    /// Default become method (e.g. `sudo`).
    pub default_become_method: String,

    /// Default user to become.
    pub default_become_user: String,

    /// String used to represent an explicit YAML/JSON null when composing
    /// module arguments; `None` preserves nulls as-is.
    pub default_null_representation: Option<String>,

    /// Behavior when a template references an undefined variable.
    pub default_undefined_var_behavior: UndefinedVarBehavior,

    /// Whether gathered facts are also injected as top-level variables
    /// (in addition to being addressable under `ansible_facts`/`facts`).
    pub inject_facts_as_vars: bool,

    /// Ordering of group vars relative to host vars in the precedence stack.
    pub variable_precedence: VariablePrecedence,

    /// Become-prompt sentinel shared across become methods that don't
    /// define their own, used to detect a password prompt on stderr.
    pub agnostic_become_prompt: String,

    /// Default remote shell executable used to run commands and the
    /// uploaded agent.
    pub default_executable: String,

    /// Default remote user for connections that don't specify one.
    pub remote_user: Option<String>,

    /// Number of hosts executed concurrently (forks).
    pub forks: usize,

    /// Whether to verify host keys on SSH connections.
    pub host_key_checking: bool,

    /// Default per-task timeout, in seconds.
    pub timeout: u64,

    /// Whether facts are gathered automatically at the start of a play.
    pub gathering: bool,

    /// Directories searched for remote modules, beyond the built-in set.
    pub module_paths: Vec<PathBuf>,

    /// Extra environment variables exported to every remote module
    /// invocation.
    pub environment: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_strategy: "linear".to_string(),
            default_become: false,
            default_become_method: "sudo".to_string(),
            default_become_user: "root".to_string(),
            default_null_representation: None,
            default_undefined_var_behavior: UndefinedVarBehavior::default(),
            inject_facts_as_vars: true,
            variable_precedence: VariablePrecedence::default(),
            agnostic_become_prompt: "BECOME-PASSWORD-PROMPT:".to_string(),
            default_executable: "/bin/sh".to_string(),
            remote_user: None,
            forks: 5,
            host_key_checking: true,
            timeout: 10,
            gathering: true,
            module_paths: Vec::new(),
            environment: HashMap::new(),
        }
    }
}

impl Settings {
    /// Applies a single `section.key = value` INI entry to this settings
    /// struct, following the original loader's one-field-at-a-time update
    /// style. Unknown keys are ignored rather than rejected, matching the
    /// original's tolerant behavior for forward compatibility.
    fn apply_ini_entry(&mut self, section: &str, key: &str, value: &str) {
        match (section, key) {
            ("defaults", "strategy") => self.default_strategy = value.to_string(),
            ("defaults", "remote_user") => self.remote_user = Some(value.to_string()),
            ("defaults", "forks") => {
                if let Ok(n) = value.parse() {
                    self.forks = n;
                }
            }
            ("defaults", "host_key_checking") => {
                self.host_key_checking = parse_ini_bool(value);
            }
            ("defaults", "timeout") => {
                if let Ok(n) = value.parse() {
                    self.timeout = n;
                }
            }
            ("defaults", "gathering") => self.gathering = parse_ini_bool(value),
            ("defaults", "null_representation") => {
                self.default_null_representation = Some(value.to_string());
            }
            ("defaults", "executable") => self.default_executable = value.to_string(),
            ("defaults", "inject_facts_as_vars") => {
                self.inject_facts_as_vars = parse_ini_bool(value);
            }
            ("defaults", "variable_precedence") => {
                self.variable_precedence = match value {
                    "group_vars_after_host_vars" => VariablePrecedence::GroupVarsAfterHostVars,
                    _ => VariablePrecedence::GroupVarsBeforeHostVars,
                };
            }
            ("privilege_escalation", "become") => self.default_become = parse_ini_bool(value),
            ("privilege_escalation", "become_method") => {
                self.default_become_method = value.to_string();
            }
            ("privilege_escalation", "become_user") => {
                self.default_become_user = value.to_string();
            }
            ("privilege_escalation", "agnostic_become_prompt") => {
                self.agnostic_become_prompt = value.to_string();
            }
            _ => {}
        }
    }
}

fn parse_ini_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// A callback invoked every time settings finish loading or reloading.
pub type LoadSubscriber = Box<dyn Fn(&Settings) + Send + Sync>;

/// Process-wide configuration manager.
pub struct Manager {
    settings: RwLock<Settings>,
    subscribers: RwLock<Vec<LoadSubscriber>>,
    loaded_from: RwLock<Option<PathBuf>>,
}

impl Manager {
    fn new() -> Self {
        Self {
            settings: RwLock::new(Settings::default()),
            subscribers: RwLock::new(Vec::new()),
            loaded_from: RwLock::new(None),
        }
    }

    /// Returns a snapshot of the current settings.
    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Path of the config file last successfully merged in, if any.
    pub fn loaded_from(&self) -> Option<PathBuf> {
        self.loaded_from.read().clone()
    }

    /// Registers a subscriber that will be invoked synchronously, in
    /// registration order, on every future load/reload. It is not invoked
    /// retroactively for loads that already happened.
    pub fn subscribe(&self, callback: LoadSubscriber) {
        self.subscribers.write().push(callback);
    }

    /// Loads built-in defaults, then, if `path` resolves to a readable INI
    /// file, merges its values on top. Passing `None` searches the standard
    /// locations (`RUSTIBLE_CONFIG` env var, `./rustible.cfg`,
    /// `~/.rustible.cfg`, `/etc/rustible/rustible.cfg`), mirroring the
    /// original's `ANSIBLE_CONFIG`/cwd/home/system search order. Not finding
    /// a config file is not an error. Always fires the load event, even if
    /// no file was merged in, even on a file read/parse failure (settings
    /// revert to defaults in that case).
    pub fn load(&self, path: Option<&Path>) -> Result<()> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => find_ini_config_file(),
        };

        let mut next = Settings::default();
        let mut loaded_path = None;
        let mut parse_error = None;

        if let Some(ref p) = resolved {
            match parse_ini_config_file(p) {
                Ok(entries) => {
                    for (section, key, value) in entries {
                        next.apply_ini_entry(&section, &key, &value);
                    }
                    loaded_path = Some(p.clone());
                }
                Err(e) => parse_error = Some(e),
            }
        }

        *self.settings.write() = next;
        *self.loaded_from.write() = loaded_path;

        self.fire_loaded();

        if let Some(e) = parse_error {
            let p = resolved.unwrap_or_default();
            return Err(Error::Config(format!(
                "config file at {} could not be parsed: {e}",
                p.display()
            )));
        }
        Ok(())
    }

    fn fire_loaded(&self) {
        let settings = self.settings();
        for subscriber in self.subscribers.read().iter() {
            subscriber(&settings);
        }
    }
}

static MANAGER: OnceCell<Manager> = OnceCell::new();

/// Returns the process-wide configuration manager, creating it (with
/// built-in defaults, no file merged in) on first access.
pub fn manager() -> &'static Manager {
    MANAGER.get_or_init(Manager::new)
}

/// Convenience accessor for the current settings snapshot.
pub fn settings() -> Settings {
    manager().settings()
}

fn find_ini_config_file() -> Option<PathBuf> {
    if let Ok(from_env) = std::env::var("RUSTIBLE_CONFIG") {
        let p = PathBuf::from(&from_env);
        let p = if p.is_dir() { p.join("rustible.cfg") } else { p };
        if p.is_file() {
            return Some(p);
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let candidate = cwd.join("rustible.cfg");
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if let Some(home) = dirs_home() {
        let candidate = home.join(".rustible.cfg");
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let system = PathBuf::from("/etc/rustible/rustible.cfg");
    if system.is_file() {
        return Some(system);
    }

    None
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Strips full-line `;`/`#` comments and ` ;`-introduced inline comments,
/// the way the original config loader does before handing the buffer to an
/// INI parser, so that `;` is honored as an inline comment character the
/// way Ansible's config loader treats it (unlike most INI dialects, which
/// only support full-line comments).
fn strip_comment_and_spaces(line: &str) -> String {
    let line = line.trim();
    if line.is_empty() {
        return String::new();
    }
    if line.starts_with(';') || line.starts_with('#') {
        return String::new();
    }
    if let Some(idx) = line.find(" ;") {
        return line[..idx].trim().to_string();
    }
    line.to_string()
}

/// Parses an INI file into a flat list of `(section, key, value)` triples.
fn parse_ini_config_file(path: &Path) -> Result<Vec<(String, String, String)>> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    let mut section = String::from("defaults");

    for raw_line in contents.lines() {
        let line = strip_comment_and_spaces(raw_line);
        if line.is_empty() {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_string();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            entries.push((
                section.clone(),
                key.trim().to_string(),
                value.trim().to_string(),
            ));
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::default();
        assert_eq!(s.default_strategy, "linear");
        assert!(!s.default_become);
        assert_eq!(s.default_become_method, "sudo");
        assert_eq!(s.default_become_user, "root");
        assert!(s.inject_facts_as_vars);
    }

    #[test]
    fn strip_comment_handles_full_line_and_inline() {
        assert_eq!(strip_comment_and_spaces("; a comment"), "");
        assert_eq!(strip_comment_and_spaces("# a comment"), "");
        assert_eq!(strip_comment_and_spaces("forks = 5 ; inline"), "forks = 5");
        assert_eq!(strip_comment_and_spaces("  forks = 5  "), "forks = 5");
    }

    #[test]
    fn ini_entry_updates_known_fields_and_ignores_unknown() {
        let mut s = Settings::default();
        s.apply_ini_entry("defaults", "forks", "10");
        s.apply_ini_entry("defaults", "strategy", "free");
        s.apply_ini_entry("privilege_escalation", "become", "true");
        s.apply_ini_entry("defaults", "made_up_key", "whatever");
        assert_eq!(s.forks, 10);
        assert_eq!(s.default_strategy, "free");
        assert!(s.default_become);
    }

    #[test]
    fn parse_ini_config_file_reads_sections() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("rustible_test_{}.cfg", std::process::id()));
        std::fs::write(
            &path,
            "[defaults]\nforks = 7 ; how many\n; comment\n[privilege_escalation]\nbecome = yes\n",
        )
        .unwrap();
        let entries = parse_ini_config_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert!(entries.contains(&(
            "defaults".to_string(),
            "forks".to_string(),
            "7".to_string()
        )));
        assert!(entries.contains(&(
            "privilege_escalation".to_string(),
            "become".to_string(),
            "yes".to_string()
        )));
    }

    #[test]
    fn subscribers_fire_on_load() {
        let m = Manager::new();
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = fired.clone();
        m.subscribe(Box::new(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }));
        m.load(None).unwrap();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 1);
        m.load(None).unwrap();
        assert_eq!(fired.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
