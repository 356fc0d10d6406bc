//! Core traits defining the fundamental abstractions in Rustible.
//!
//! The transport contract here is deliberately narrow: three composable
//! capabilities (run a command, run one interactively, send a file) plus a
//! shell descriptor, rather than a single fat `Connection` interface. Become
//! (privilege escalation) is layered on top of the interactive capability
//! rather than being a connection method of its own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

use crate::error::Result;

// ============================================================================
// Transport traits (C6)
// ============================================================================

/// Arguments describing a privilege-escalation request, threaded through to
/// whichever become plugin `method` resolves to.
#[derive(Debug, Clone, Default)]
pub struct BecomeArgs {
    /// Become method name (`sudo`, `su`, ...).
    pub method: Option<String>,
    /// User to become.
    pub user: Option<String>,
    /// Extra flags passed to the become command.
    pub flags: Option<String>,
    /// Password for password-backed become methods.
    pub password: Option<String>,
}

impl BecomeArgs {
    /// True if privilege escalation was actually requested.
    pub fn is_enabled(&self) -> bool {
        self.method.is_some()
    }
}

/// Non-interactive command execution: run a command to completion and
/// collect its output.
#[async_trait]
pub trait CommandExecutor: Send + Sync + Debug {
    /// Runs `cmd`, optionally piping `stdin_bytes`, and returns the result.
    /// `sudoable` indicates the caller allows privilege escalation for this
    /// call; `become_args` carries the escalation parameters when enabled.
    async fn exec_command(
        &self,
        cmd: &str,
        stdin_bytes: Option<&[u8]>,
        sudoable: bool,
        become_args: &BecomeArgs,
    ) -> Result<CommandResult>;
}

/// A running interactive process's stdio pipes.
#[async_trait]
pub trait InteractivePipes: Send + Sync {
    /// Writes to the process's stdin.
    async fn write_stdin(&mut self, data: &[u8]) -> Result<()>;

    /// Reads up to `max_len` bytes of accumulated stderr since the last read.
    async fn read_stderr_chunk(&mut self, max_len: usize) -> Result<Vec<u8>>;

    /// Reads all remaining stdout after the process has nothing left to say
    /// on stderr (used by the default `exec_command` composition).
    async fn drain_stdout(&mut self) -> Result<Vec<u8>>;

    /// Reads up to `max_len` bytes of stdout as they arrive, blocking until
    /// at least one byte is available or the stream is at EOF. Used by the
    /// agent RPC transport, which treats the pipes as a continuous
    /// bidirectional byte stream rather than a one-shot command.
    async fn read_stdout_chunk(&mut self, max_len: usize) -> Result<Vec<u8>>;

    /// Closes the session, returning the process's final exit status.
    /// The wait-result of the underlying process is propagated through this
    /// return value, not through a separate call.
    async fn close(self: Box<Self>) -> Result<CommandResult>;
}

/// Interactive command execution: start a process and keep its stdio pipes
/// open, for protocols (like become) that need to watch output as it
/// streams and react (e.g. typing a password).
#[async_trait]
pub trait InteractiveCommandExecutor: Send + Sync + Debug {
    /// Starts `cmd` interactively, returning its stdio pipes.
    async fn exec_interactive(
        &self,
        cmd: &str,
        become_args: &BecomeArgs,
    ) -> Result<Box<dyn InteractivePipes>>;
}

/// File transfer capability.
#[async_trait]
pub trait FileSender: Send + Sync + Debug {
    /// Sends the contents read from `reader` to `remote_path` on the
    /// target, with the given file mode.
    async fn send_file(
        &self,
        reader: &mut (dyn tokio::io::AsyncRead + Send + Unpin),
        remote_path: &str,
        mode: u32,
    ) -> Result<()>;
}

/// A shell descriptor: the conventions a connection's remote shell follows,
/// used to build probe and wrapper commands portably.
#[derive(Debug, Clone)]
pub struct ShellDescriptor {
    /// Keyword used to echo a literal string (`echo`).
    pub echo: String,
    /// Command separator (`;`).
    pub separator: String,
    /// Path to the shell executable to invoke commands through.
    pub executable: String,
    /// Template for an existence-test command; `{path}` is substituted.
    pub exists_test_template: String,
}

impl ShellDescriptor {
    /// Builds a command that tests whether `path` exists.
    pub fn exists_test(&self, path: &str) -> String {
        self.exists_test_template.replace("{path}", path)
    }
}

impl Default for ShellDescriptor {
    fn default() -> Self {
        Self {
            echo: "echo".to_string(),
            separator: ";".to_string(),
            executable: crate::config::settings().default_executable.clone(),
            exists_test_template: "test -e {path}".to_string(),
        }
    }
}

/// A connection to a target host, composed from the three transport
/// capabilities plus its shell conventions.
pub trait Connection: CommandExecutor + InteractiveCommandExecutor + FileSender {
    /// Returns this connection's shell descriptor.
    fn shell(&self) -> &ShellDescriptor;

    /// Returns the target host identifier, for diagnostics.
    fn target(&self) -> &str;
}

/// Default `exec_command` composition atop `exec_interactive`: start the
/// command interactively, optionally pipe stdin, then drain stderr and
/// stdout and close.
pub async fn default_exec_command(
    executor: &dyn InteractiveCommandExecutor,
    cmd: &str,
    stdin_bytes: Option<&[u8]>,
    become_args: &BecomeArgs,
) -> Result<CommandResult> {
    let mut pipes = executor.exec_interactive(cmd, become_args).await?;
    if let Some(data) = stdin_bytes {
        pipes.write_stdin(data).await?;
    }
    let stderr = pipes.read_stderr_chunk(usize::MAX).await?;
    let stdout = pipes.drain_stdout().await?;
    let mut result = pipes.close().await?;
    if result.stdout.is_empty() {
        result.stdout = String::from_utf8_lossy(&stdout).into_owned();
    }
    if result.stderr.is_empty() {
        result.stderr = String::from_utf8_lossy(&stderr).into_owned();
    }
    Ok(result)
}

/// Result of command execution.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (`None` if the process was killed).
    pub exit_code: Option<i32>,
}

impl CommandResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// ============================================================================
// Action / module dispatch (C10)
// ============================================================================

/// The unified return shape produced by every action plugin and every
/// remote module invocation; this is what the variable manager and
/// `register` consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Return {
    /// Whether the call changed state on the target.
    #[serde(default)]
    pub changed: bool,
    /// Whether the call failed.
    #[serde(default)]
    pub failed: bool,
    /// Whether the call was skipped.
    #[serde(default)]
    pub skipped: bool,
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Process exit code, for command-like modules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
    /// Captured standard output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Before/after diff snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<Diff>,
    /// Facts contributed by this call.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub ansible_facts: HashMap<String, serde_json::Value>,
    /// Which fact bucket `ansible_facts` should be stored under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_bucket: Option<String>,
    /// Non-fatal warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Debug messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debug: Vec<String>,
    /// Deprecation notices.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deprecations: Vec<String>,
    /// True if the module needs its Python companion runtime uploaded
    /// before it can run; the dispatcher retries once with the payload
    /// attached.
    #[serde(default)]
    pub needs_python_runtime: bool,
    /// Module-specific payload, opaque to the engine.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Return {
    /// A successful, unchanged return.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A successful return that changed state.
    pub fn changed() -> Self {
        Self {
            changed: true,
            ..Default::default()
        }
    }

    /// A failed return with the given message.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            failed: true,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// A skipped return with the given reason.
    pub fn skipped(msg: impl Into<String>) -> Self {
        Self {
            skipped: true,
            msg: Some(msg.into()),
            ..Default::default()
        }
    }

    /// Converts this return into the task-result shape stored by
    /// `register`.
    pub fn into_task_result(self) -> crate::tasks::TaskResult {
        crate::tasks::TaskResult {
            changed: self.changed,
            failed: self.failed,
            skipped: self.skipped,
            unreachable: false,
            msg: self.msg,
            rc: self.rc,
            stdout: self.stdout,
            stderr: self.stderr,
            ansible_facts: self.ansible_facts,
            extra: self.extra,
        }
    }
}

/// Before/after diff snapshot attached to a `Return`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diff {
    /// State before the change, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    /// State after the change, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

/// Context passed to an action plugin's `run` method: the task's session,
/// its arguments rendered in the current environment, and the environment
/// itself (for plugins that need to resolve further variables, e.g.
/// `debug`'s `var=` form).
pub struct ActionContext<'a> {
    /// The connection session for this task's become-identity.
    pub session: &'a dyn Connection,
    /// The task's arguments, already rendered in the current environment.
    pub templated_args: HashMap<String, serde_json::Value>,
    /// The environment the task executed in.
    pub variable_env: &'a serde_json::Value,
}

/// An action plugin: code that runs locally on the controller, with access
/// to the session and variable environment, rather than being dispatched to
/// the remote agent.
#[async_trait]
pub trait ActionPlugin: Send + Sync {
    /// Runs the action, returning the unified `Return`. Must not block
    /// indefinitely; the dispatcher enforces a local-task timeout around
    /// this call.
    async fn run(&self, ctx: &mut ActionContext<'_>) -> Result<Return>;
}

/// A module: code executed on the managed host via the companion agent.
/// Implementations of this trait run *locally* only insofar as they parse
/// and validate arguments before the engine serializes them across the RPC
/// channel — the actual work happens in the remote agent process, which is
/// out of this crate's scope to implement here beyond the dispatch
/// contract.
pub trait ModuleArgs: Send + Sync + Debug {
    /// Validates the free-form argument mapping, returning a normalized
    /// JSON value ready to serialize as `vars_json` for the RPC call.
    fn validate(&self, raw: &serde_json::Value) -> Result<serde_json::Value>;
}
