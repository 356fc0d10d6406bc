//! # Rustible — a configuration-management execution engine
//!
//! Rustible is an async-first, agentless (at rest) configuration-management
//! engine written in Rust: it pushes a small self-contained agent binary to
//! each managed host over SSH and drives it over an RPC channel for the
//! lifetime of a playbook run, rather than requiring any software installed
//! ahead of time.
//!
//! ## Core concepts
//!
//! - **Inventory**: hosts organized into groups, each carrying variables.
//! - **Playbooks**: YAML-defined plays, each binding a host pattern to an
//!   ordered task list and a strategy.
//! - **Variable manager**: composes the many layers of variables (group,
//!   host, facts, extra-vars, play/task vars, magic vars, loop vars) into a
//!   single environment per host, per task.
//! - **Connections**: the transport used to reach a host (SSH via russh, or
//!   local execution for `hosts: localhost`).
//! - **Agent sessions**: a per-(host, become-identity) long-lived RPC
//!   channel to the bootstrapped remote agent.
//! - **Action plugins / modules**: action plugins run locally on the
//!   controller; modules run remotely via the agent.
//! - **Lookup plugins**: pure functions consulted while composing `loop` and
//!   `with_<name>` item lists, and from templates via `lookup`/`query`.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of the most commonly used types.

    pub use crate::config::{self, Settings};
    pub use crate::connection::local::LocalConnection;
    #[cfg(feature = "russh")]
    pub use crate::connection::russh::RusshConnection;
    pub use crate::connection::ConnectionConfig;

    pub use crate::error::{Error, Result};

    pub use crate::executor::{PlaybookExecutor, TaskExecutor};

    pub use crate::facts::Facts;

    pub use crate::inventory::{Group, Host, Inventory};

    pub use crate::modules::{ModuleRegistry, ModuleSpec};

    pub use crate::playbook::{Play, Playbook, Task};

    pub use crate::strategy::Strategy;

    pub use crate::tasks::{TaskOutcome, TaskResult};

    pub use crate::traits::{
        ActionContext, ActionPlugin, BecomeArgs, CommandExecutor, CommandResult, Connection,
        Diff, FileSender, InteractiveCommandExecutor, Return, ShellDescriptor,
    };

    pub use crate::vars::{HashBehaviour, VarPrecedence, VarStore, Variable, Variables};
}

/// Crate-wide constants: magic-variable alias tables and agent bootstrap
/// conventions.
pub mod constants;

/// Error types and result aliases.
pub mod error;

/// Core traits: the connection transport contract, action/module dispatch
/// shapes, and the unified `Return` value.
pub mod traits;

/// Variable management and the 13-layer precedence stack.
pub mod vars;

/// Playbook parsing and representation.
pub mod playbook;

/// Unified task-result shape returned by every module/action invocation.
pub mod tasks;

/// Connection layer for remote host communication (SSH via russh, local
/// execution).
pub mod connection;

/// System fact gathering.
pub mod facts;

/// Host and group inventory management.
pub mod inventory;

/// Remote agent bootstrap and per-host RPC session management.
pub mod agent;

/// Jinja-compatible template engine binding, powered by minijinja.
pub mod template;

/// Core task execution engine: strategies, loop/when evaluation, meta-task
/// dispatch, and action/module routing.
pub mod executor;

/// Execution strategy implementations (linear, free).
pub mod strategy;

/// Built-in action plugins and the module dispatch registry.
pub mod modules;

/// Lookup plugins.
pub mod lookup;

/// Vault-encrypted data detection (decryption is out of scope).
pub mod vault;

/// Process-wide configuration.
pub mod config;

/// Command-line interface.
pub mod cli;

/// Returns the current version of Rustible.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns detailed version information including build metadata.
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION"),
        rust_version: option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown"),
        target: std::env::consts::ARCH,
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Detailed version information for the Rustible build.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    /// Semantic version string.
    pub version: &'static str,
    /// Minimum Rust version required.
    pub rust_version: &'static str,
    /// Target triple for the build.
    pub target: &'static str,
    /// Build profile (debug or release).
    pub profile: &'static str,
}

impl std::fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rustible {} ({}, {})",
            self.version, self.target, self.profile
        )
    }
}
