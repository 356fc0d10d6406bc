//! Per-host session manager (C8, §4.4 "Per-host session manager contract").
//!
//! Caches one bootstrapped agent session per (host, become-identity) pair,
//! keyed by the become user — the identity the agent process itself runs
//! as, not the underlying SSH transport, which is shared and reused for
//! every identity on that host. Grounded on the original's
//! `executor/conn/connection_manager.go` (`Manager`), reworked against this
//! crate's agent/RPC types instead of a gRPC client stub.

use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::agent::bootstrap;
use crate::agent::rpc::{MetaArgs, RpcClient};
use crate::error::{Error, Result};
use crate::playbook::Task;
use crate::traits::{BecomeArgs, Connection, Return};

/// One live agent session: a dialed RPC client plus the become-identity it
/// was launched under.
pub struct Session {
    rpc: RpcClient,
    become_args: BecomeArgs,
}

impl Session {
    /// Dispatches a module invocation over this session's RPC channel.
    pub async fn execute_module(
        &mut self,
        module_name: &str,
        vars_json: serde_json::Value,
        meta_args: MetaArgs,
    ) -> Result<Return> {
        self.rpc.execute_module(module_name, vars_json, meta_args).await
    }

    /// The become-identity this session is running as (`None` = no
    /// escalation, the connection's natural login user).
    pub fn become_user(&self) -> Option<&str> {
        self.become_args.user.as_deref()
    }
}

/// Key identifying a cached session: the empty string for the default
/// (non-escalated) identity, otherwise the become user.
fn identity_key(become_args: &BecomeArgs) -> String {
    if !become_args.is_enabled() {
        String::new()
    } else {
        become_args.user.clone().unwrap_or_default()
    }
}

/// Per-host manager of agent sessions, one per become-identity in use by
/// that host's task list.
pub struct SessionManager {
    host: String,
    conn: Arc<dyn Connection>,
    local_agent_binary: PathBuf,
    sessions: HashMap<String, Session>,
    vars: serde_json::Value,
}

impl SessionManager {
    /// Creates a manager for `host`, reusing `conn` as the underlying
    /// transport for every session it bootstraps.
    pub fn new(host: impl Into<String>, conn: Arc<dyn Connection>, local_agent_binary: PathBuf) -> Self {
        Self {
            host: host.into(),
            conn,
            local_agent_binary,
            sessions: HashMap::new(),
            vars: serde_json::Value::Null,
        }
    }

    /// Replaces the variables used to derive connection parameters for the
    /// next session this manager creates; never mutates sessions already
    /// open.
    pub fn update_opts(&mut self, vars: serde_json::Value) {
        self.vars = vars;
    }

    /// Returns the existing session for `become_args`'s identity, or
    /// bootstraps a new one. A failed bootstrap leaves no entry behind, so
    /// the next call is unimpeded.
    pub async fn get_or_create(&mut self, become_args: &BecomeArgs) -> Result<&mut Session> {
        let key = identity_key(become_args);
        if !self.sessions.contains_key(&key) {
            debug!(host = %self.host, identity = %key, "bootstrapping agent session");
            let rpc = bootstrap::bootstrap(self.conn.as_ref(), &self.local_agent_binary, become_args)
                .await?;
            self.sessions.insert(
                key.clone(),
                Session {
                    rpc,
                    become_args: become_args.clone(),
                },
            );
        }
        Ok(self.sessions.get_mut(&key).expect("just inserted or present"))
    }

    /// Resolves the session for `task`, computing its become-identity from
    /// the task's own `become`/`become_user` fields, falling back to the
    /// canonicalized `become`/`become_method`/`become_user`/`become_pass`
    /// magic vars present in `env`.
    pub async fn get_for_task(&mut self, task: &Task, env: &serde_json::Value) -> Result<&mut Session> {
        let become_args = resolve_become_args(task, env);
        self.get_or_create(&become_args).await
    }

    /// Closes every owned session in parallel, aggregating any errors.
    pub async fn close(&mut self) -> Result<()> {
        let sessions = std::mem::take(&mut self.sessions);
        let results = join_all(sessions.into_values().map(|s| s.rpc.close())).await;
        let errors: Vec<Error> = results.into_iter().filter_map(Result::err).collect();
        match Error::aggregate(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Computes a task's become-identity, per the original's `getBecomeArgs`:
/// the task's own `become`/`become_user` fields win when set, otherwise the
/// composed environment's canonicalized magic vars supply them.
fn resolve_become_args(task: &Task, env: &serde_json::Value) -> BecomeArgs {
    let env_bool = |key: &str| env.get(key).and_then(|v| v.as_bool());
    let env_str = |key: &str| env.get(key).and_then(|v| v.as_str()).map(str::to_string);

    let enabled = task.r#become.or_else(|| env_bool("become")).unwrap_or(false);
    if !enabled {
        return BecomeArgs::default();
    }

    BecomeArgs {
        method: env_str("become_method").or_else(|| Some("sudo".to_string())),
        user: task.become_user.clone().or_else(|| env_str("become_user")),
        flags: env_str("become_flags"),
        password: env_str("become_pass"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_with(become_: Option<bool>, become_user: Option<&str>) -> Task {
        let mut task = Task::new("t", "debug", json!({}));
        task.r#become = become_;
        task.become_user = become_user.map(str::to_string);
        task
    }

    #[test]
    fn disabled_become_yields_default_identity() {
        let task = task_with(None, None);
        let args = resolve_become_args(&task, &json!({}));
        assert!(!args.is_enabled());
    }

    #[test]
    fn task_level_become_user_wins_over_env() {
        let task = task_with(Some(true), Some("deploy"));
        let env = json!({"become_user": "root", "become_method": "sudo"});
        let args = resolve_become_args(&task, &env);
        assert_eq!(args.user.as_deref(), Some("deploy"));
        assert_eq!(args.method.as_deref(), Some("sudo"));
    }

    #[test]
    fn env_supplies_become_when_task_is_silent() {
        let task = task_with(None, None);
        let env = json!({"become": true, "become_user": "root", "become_method": "su"});
        let args = resolve_become_args(&task, &env);
        assert!(args.is_enabled());
        assert_eq!(args.user.as_deref(), Some("root"));
        assert_eq!(args.method.as_deref(), Some("su"));
    }

    #[test]
    fn identity_key_is_empty_for_default_session() {
        assert_eq!(identity_key(&BecomeArgs::default()), "");
    }

    #[test]
    fn identity_key_is_the_become_user() {
        let args = BecomeArgs {
            method: Some("sudo".to_string()),
            user: Some("deploy".to_string()),
            ..Default::default()
        };
        assert_eq!(identity_key(&args), "deploy");
    }
}
