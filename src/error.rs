//! Error types for Rustible.
//!
//! This module defines the error types used throughout Rustible's core
//! execution engine, following the taxonomy laid out in the engine's error
//! handling design: parse errors, resolution errors, validation errors,
//! transport/agent errors, remote execution errors, timeouts and
//! cancellation, and configuration errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Rustible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Rustible's core execution engine.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Parse errors
    // ========================================================================
    /// Error parsing a playbook document.
    #[error("Failed to parse playbook '{path}': {message}")]
    PlaybookParse {
        /// Path to the playbook file
        path: PathBuf,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Error validating playbook structure.
    #[error("Playbook validation failed: {0}")]
    PlaybookValidation(String),

    /// Play not found.
    #[error("Play '{0}' not found in playbook")]
    PlayNotFound(String),

    /// Error parsing an inventory source.
    #[error("Failed to load inventory from '{path}': {message}")]
    InventoryLoad {
        /// Path to inventory
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Error parsing a free-form action argument string.
    #[error("Failed to parse free-form args '{input}': {message}")]
    FreeFormParse {
        /// Raw input that failed to parse
        input: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Resolution errors
    // ========================================================================
    /// Host not found in inventory.
    #[error("Host '{0}' not found in inventory")]
    HostNotFound(String),

    /// Group not found in inventory.
    #[error("Group '{0}' not found in inventory")]
    GroupNotFound(String),

    /// Invalid host-selection pattern.
    #[error("Invalid host pattern: '{0}'")]
    InvalidHostPattern(String),

    /// Circular parent reference detected in the group graph.
    #[error("Circular reference detected in group graph involving '{0}'")]
    CircularGroupReference(String),

    /// Action name resolved to neither an action plugin nor a module.
    #[error("Unknown action '{0}': no action plugin or module registered for it")]
    UnknownAction(String),

    /// Unknown meta-task name.
    #[error("Unknown meta task: {0}")]
    UnknownMetaTask(String),

    /// Unknown lookup plugin name.
    #[error("Unknown lookup plugin: {0}")]
    UnknownLookup(String),

    /// Unknown become method.
    #[error("Become plugin '{0}' not found")]
    UnknownBecomeMethod(String),

    // ========================================================================
    // Validation errors
    // ========================================================================
    /// Invalid module or action arguments.
    #[error("Invalid arguments for '{action}': {message}")]
    InvalidArgs {
        /// Action or module name
        action: String,
        /// Error message
        message: String,
    },

    /// `when` condition did not evaluate to a boolean.
    #[error("'when' condition did not evaluate to a boolean: {0}")]
    WhenNotBoolean(String),

    /// Loop template did not evaluate to a list.
    #[error("loop expression did not evaluate to a list: {0}")]
    LoopNotList(String),

    // ========================================================================
    // Variable / template errors
    // ========================================================================
    /// Undefined variable.
    #[error("Undefined variable: '{0}'")]
    UndefinedVariable(String),

    /// Invalid variable value.
    #[error("Invalid value for variable '{name}': {message}")]
    InvalidVariableValue {
        /// Variable name
        name: String,
        /// Error message
        message: String,
    },

    /// Template syntax error.
    #[error("Template syntax error in '{template}': {message}")]
    TemplateSyntax {
        /// Template name or path
        template: String,
        /// Error message
        message: String,
    },

    /// Template rendering error.
    #[error("Template rendering failed for '{template}': {message}")]
    TemplateRender {
        /// Template name or path
        template: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Transport / connection errors
    // ========================================================================
    /// Failed to establish a connection to a host.
    #[error("Failed to connect to '{host}': {message}")]
    ConnectionFailed {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// Connection timeout.
    #[error("Connection to '{host}' timed out after {timeout_secs} seconds")]
    ConnectionTimeout {
        /// Target host
        host: String,
        /// Timeout in seconds
        timeout_secs: u64,
    },

    /// Authentication failed.
    #[error("Authentication failed for '{user}@{host}': {message}")]
    AuthenticationFailed {
        /// Username
        user: String,
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// Privilege escalation (become) failed.
    #[error("Become failed on '{host}' using method '{method}': {message}")]
    BecomeError {
        /// Target host
        host: String,
        /// Become method
        method: String,
        /// Error message
        message: String,
    },

    /// File transfer failed.
    #[error("File transfer to '{host}' failed: {message}")]
    FileTransfer {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// Agent bootstrap (upload/probe) failed.
    #[error("Agent bootstrap failed on '{host}': {message}")]
    AgentBootstrap {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// Agent RPC error.
    #[error("Agent RPC call failed on '{host}': {message}")]
    AgentRpc {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Remote execution / timeouts
    // ========================================================================
    /// Module not found.
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    /// Remote module execution reported failure.
    #[error("Module '{module}' failed on '{host}': {message}")]
    ModuleExecution {
        /// Module name
        module: String,
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// A task timed out.
    #[error("Task '{task}' timed out on host '{host}' after {timeout_secs} seconds")]
    TaskTimeout {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Timeout in seconds
        timeout_secs: u64,
    },

    /// Task execution failed.
    #[error("Task '{task}' failed on host '{host}': {message}")]
    TaskFailed {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// Execution was cancelled.
    #[error("Execution cancelled")]
    Cancelled,

    // ========================================================================
    // Configuration
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Aggregation
    // ========================================================================
    /// One or more per-host errors aggregated at a strategy barrier or play end.
    #[error("{0} host(s) failed")]
    Aggregate(usize, Vec<Error>),

    // ========================================================================
    // Passthrough
    // ========================================================================
    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Template engine error.
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new playbook parse error.
    pub fn playbook_parse(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::PlaybookParse {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates a new task failed error.
    pub fn task_failed(
        task: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TaskFailed {
            task: task.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new connection failed error.
    pub fn connection_failed(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new authentication failed error.
    pub fn authentication_failed(
        user: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::AuthenticationFailed {
            user: user.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new connection timeout error.
    pub fn connection_timeout(host: impl Into<String>, timeout_secs: u64) -> Self {
        Self::ConnectionTimeout {
            host: host.into(),
            timeout_secs,
        }
    }

    /// Creates a new become error.
    pub fn become_error(
        host: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BecomeError {
            host: host.into(),
            method: method.into(),
            message: message.into(),
        }
    }

    /// Creates a new invalid args error.
    pub fn invalid_args(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Creates a new template render error.
    pub fn template_render(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TemplateRender {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Combines a list of per-host errors into a single aggregate error, per
    /// the strategy-barrier and end-of-play error propagation policy. Returns
    /// `None` if the list is empty.
    pub fn aggregate(errors: Vec<Error>) -> Option<Error> {
        if errors.is_empty() {
            None
        } else {
            Some(Error::Aggregate(errors.len(), errors))
        }
    }

    /// True if this error represents a host-local failure that should not
    /// halt other hosts under the executor's per-host isolation policy.
    pub fn is_host_local(&self) -> bool {
        matches!(
            self,
            Error::TaskFailed { .. }
                | Error::ModuleExecution { .. }
                | Error::InvalidArgs { .. }
                | Error::TaskTimeout { .. }
                | Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout { .. }
                | Error::AuthenticationFailed { .. }
                | Error::BecomeError { .. }
                | Error::AgentBootstrap { .. }
                | Error::AgentRpc { .. }
                | Error::FileTransfer { .. }
        )
    }

    /// Returns true if this error is recoverable (e.g. may be retried).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout { .. } | Error::TaskTimeout { .. }
        )
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::TaskFailed { .. } | Error::ModuleExecution { .. } => 2,
            Error::ConnectionFailed { .. } | Error::AuthenticationFailed { .. } => 3,
            Error::PlaybookParse { .. } | Error::PlaybookValidation(_) => 4,
            Error::InventoryLoad { .. } | Error::HostNotFound(_) => 5,
            Error::Aggregate(..) => 2,
            _ => 1,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_empty_is_none() {
        assert!(Error::aggregate(Vec::new()).is_none());
    }

    #[test]
    fn aggregate_nonempty_counts_hosts() {
        let err = Error::aggregate(vec![
            Error::HostNotFound("a".into()),
            Error::HostNotFound("b".into()),
        ])
        .unwrap();
        match err {
            Error::Aggregate(n, errs) => {
                assert_eq!(n, 2);
                assert_eq!(errs.len(), 2);
            }
            _ => panic!("expected Aggregate"),
        }
    }

    #[test]
    fn host_local_classification() {
        assert!(Error::task_failed("t", "h", "boom").is_host_local());
        assert!(!Error::Cancelled.is_host_local());
    }
}
