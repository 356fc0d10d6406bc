//! Core task execution engine (spec §4.5-§4.7): resolves a play's hosts,
//! seeds each host's variable store from inventory and magic vars, gathers
//! facts if requested, then hands task execution off to the play's
//! strategy (`runtime::run_linear`/`run_free`).

pub mod condition;
pub mod register;
pub mod runtime;
pub mod task;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::agent::SessionManager;
use crate::config::Settings;
use crate::connection::local::LocalConnection;
#[cfg(feature = "russh")]
use crate::connection::russh::RusshConnection;
use crate::connection::ConnectionConfig;
use crate::constants;
use crate::error::{Error, Result};
use crate::inventory::{ConnectionType, Host, Inventory};
use crate::lookup::LookupRegistry;
use crate::modules::ModuleRegistry;
use crate::playbook::{Play, Playbook, Task};
use crate::strategy::Strategy;
use crate::tasks::TaskOutcome;
use crate::template::Templar;
use crate::traits::Connection;
use crate::vars::{HashBehaviour, VarPrecedence, VarStore};

pub use runtime::HostRuntime;
pub use task::TaskExecutor;

/// Per-host task outcomes for one play, in the order they ran.
pub type PlayReport = HashMap<String, Vec<TaskOutcome>>;

/// Per-play reports for a whole playbook run, in play order.
#[derive(Default)]
pub struct PlaybookReport {
    pub plays: Vec<(String, PlayReport)>,
}

/// Runs playbooks against an inventory: resolves hosts, seeds variables,
/// and drives the configured strategy over each play's tasks.
pub struct PlaybookExecutor {
    settings: Settings,
    connection_config: ConnectionConfig,
    registry: ModuleRegistry,
    lookups: Arc<LookupRegistry>,
    templar: Templar,
    /// Path to the agent binary uploaded to each managed host. The CLI
    /// resolves this to its own executable path by convention (the
    /// controller binary doubles as the bootstrap payload).
    local_agent_binary: PathBuf,
}

impl PlaybookExecutor {
    /// Builds an executor with the default module/lookup registries.
    pub fn new(settings: Settings, connection_config: ConnectionConfig, local_agent_binary: PathBuf) -> Self {
        let lookups = Arc::new(LookupRegistry::with_builtins());
        let templar = Templar::new(Arc::clone(&lookups));
        Self {
            settings,
            connection_config,
            registry: ModuleRegistry::with_builtins(),
            lookups,
            templar,
            local_agent_binary,
        }
    }

    /// Runs every play in `playbook` against `inventory`, in order.
    #[instrument(skip_all, fields(playbook = ?playbook.name))]
    pub async fn run_playbook(
        &self,
        playbook: &Playbook,
        inventory: &Inventory,
        extra_vars: &HashMap<String, serde_json::Value>,
    ) -> Result<PlaybookReport> {
        let mut report = PlaybookReport::default();
        for play in &playbook.plays {
            let play_report = self.run_play(play, inventory, extra_vars).await?;
            report.plays.push((play.name.clone(), play_report));
        }
        Ok(report)
    }

    /// Runs one play: resolves its hosts, builds a [`HostRuntime`] for
    /// each, gathers facts if requested, then dispatches to the play's
    /// strategy.
    #[instrument(skip_all, fields(play = %play.name))]
    pub async fn run_play(
        &self,
        play: &Play,
        inventory: &Inventory,
        extra_vars: &HashMap<String, serde_json::Value>,
    ) -> Result<PlayReport> {
        let hosts = inventory
            .get_hosts_for_pattern(&play.hosts)
            .map_err(|e| Error::Config(e.to_string()))?;
        if hosts.is_empty() {
            warn!(play = %play.name, pattern = %play.hosts, "no hosts matched");
            return Ok(PlayReport::new());
        }

        let mut host_runtimes = Vec::with_capacity(hosts.len());
        for host in &hosts {
            host_runtimes.push(self.build_host_runtime(host, inventory, play, extra_vars).await?);
        }

        let tctx = TaskExecutor::new(&self.registry, &self.templar, &self.lookups, &self.settings);

        if play.gather_facts {
            info!(play = %play.name, "gathering facts");
            self.gather_facts(&tctx, &mut host_runtimes).await;
        }

        let strategy = play
            .strategy
            .as_deref()
            .map(str::parse::<Strategy>)
            .transpose()?
            .unwrap_or_else(|| self.settings.default_strategy.parse().unwrap_or_default());

        let report = match strategy {
            Strategy::Linear => runtime::run_linear(play, &mut host_runtimes, &tctx, &self.settings).await,
            Strategy::Free => runtime::run_free(play, &mut host_runtimes, &tctx, &self.settings).await,
        };

        for host_rt in &mut host_runtimes {
            if let Err(e) = host_rt.sessions.close().await {
                warn!(host = %host_rt.name, error = %e, "error closing agent sessions");
            }
        }

        Ok(report)
    }

    /// Runs the implicit `setup` task against every host, applying its
    /// facts directly (no `register`, no `when`/loop machinery: fact
    /// gathering always runs unconditionally, once, per host).
    async fn gather_facts(&self, tctx: &TaskExecutor<'_>, host_runtimes: &mut [HostRuntime]) {
        let task = Task::new("Gathering Facts", "setup", serde_json::json!({}));
        let settings = &self.settings;

        let mut slots: Vec<Option<&mut HostRuntime>> = host_runtimes.iter_mut().map(Some).collect();
        let futures = (0..slots.len()).map(|idx| {
            let host_rt = slots[idx].take().expect("each index visited once");
            let task = &task;
            async move {
                let env = runtime::env_value(&mut host_rt.vars);
                match tctx.run(task, &host_rt.name, &host_rt.conn, &mut host_rt.sessions, &env).await {
                    Ok(outcome) => register::apply_outcome(&mut host_rt.vars, settings, task, &outcome),
                    Err(e) => warn!(host = %host_rt.name, error = %e, "fact gathering failed"),
                }
            }
        });
        futures::future::join_all(futures).await;
    }

    /// Builds a host's connection, agent session manager, and seeded
    /// variable store (group vars, host vars, extra-vars, play vars, magic
    /// vars — everything below task/loop vars, which the per-task pipeline
    /// layers in itself).
    async fn build_host_runtime(
        &self,
        host: &Host,
        inventory: &Inventory,
        play: &Play,
        extra_vars: &HashMap<String, serde_json::Value>,
    ) -> Result<HostRuntime> {
        let conn = self.build_connection(host).await?;
        let sessions = SessionManager::new(host.name.clone(), Arc::clone(&conn), self.local_agent_binary.clone());

        let mut vars = VarStore::new(HashBehaviour::Replace, self.settings.variable_precedence);

        let hierarchy = inventory.get_host_group_hierarchy(host);
        for group_name in hierarchy.parent_to_child() {
            if let Some(group) = inventory.get_group(group_name) {
                for (key, value) in &group.vars {
                    vars.set(key.clone(), yaml_to_json(value), VarPrecedence::GroupVars);
                }
            }
        }
        for (key, value) in &host.vars {
            vars.set(key.clone(), yaml_to_json(value), VarPrecedence::HostVars);
        }

        vars.set_many(extra_vars.clone(), VarPrecedence::ExtraVarsFirst);
        for (key, value) in play.vars.as_map() {
            vars.set(key.clone(), value.clone(), VarPrecedence::PlayVars);
        }
        vars.set_many(extra_vars.clone(), VarPrecedence::ExtraVarsSecond);
        vars.set_many(extra_vars.clone(), VarPrecedence::ExtraVarsThird);

        let raw: HashMap<String, serde_json::Value> =
            vars.merged().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (key, value) in build_magic_vars(host, play, &raw) {
            vars.set(key, value, VarPrecedence::MagicVars);
        }

        Ok(HostRuntime::new(host.name.clone(), conn, sessions, vars))
    }

    /// Builds the transport for `host`: local subprocess execution, or SSH
    /// via russh. Docker/Podman/WinRM connection types are recognized by
    /// the inventory model but have no transport implementation here.
    async fn build_connection(&self, host: &Host) -> Result<Arc<dyn Connection>> {
        match host.connection.connection {
            ConnectionType::Local => Ok(Arc::new(LocalConnection::new())),
            ConnectionType::Ssh => {
                #[cfg(feature = "russh")]
                {
                    let address = host.ansible_host.clone().unwrap_or_else(|| host.name.clone());
                    let user = host.connection.ssh.user.clone().unwrap_or_else(|| {
                        self.settings
                            .remote_user
                            .clone()
                            .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "root".to_string()))
                    });
                    let conn = RusshConnection::connect(
                        &address,
                        host.connection.ssh.port,
                        &user,
                        None,
                        &self.connection_config,
                    )
                    .await?;
                    Ok(Arc::new(conn))
                }
                #[cfg(not(feature = "russh"))]
                {
                    Err(Error::Config(format!(
                        "host '{}' requires SSH but the russh feature is disabled",
                        host.name
                    )))
                }
            }
            other => Err(Error::Config(format!(
                "host '{}' uses unsupported connection type '{other}'",
                host.name
            ))),
        }
    }
}

fn yaml_to_json(value: &serde_yaml::Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Canonicalizes a host's magic variables (spec §4.3): connection-related
/// `ansible_*` aliases first, then the host's own inventory-declared
/// connection parameters as a fallback, then play-level overrides (which
/// always win, matching Ansible's play-beats-inventory precedence for
/// these specific fields).
fn build_magic_vars(
    host: &Host,
    play: &Play,
    raw: &HashMap<String, serde_json::Value>,
) -> HashMap<String, serde_json::Value> {
    let mut magic = HashMap::new();
    for mapping in constants::MAGIC_VARIABLE_MAPPING {
        if let Some(v) = constants::canonicalize(mapping.canonical, |k| raw.get(k)) {
            magic.insert(mapping.canonical.to_string(), v);
        }
    }

    magic
        .entry("remote_addr".to_string())
        .or_insert_with(|| serde_json::json!(host.ansible_host.clone().unwrap_or_else(|| host.name.clone())));
    magic
        .entry("remote_port".to_string())
        .or_insert_with(|| serde_json::json!(host.connection.ssh.port));
    if let Some(user) = &host.connection.ssh.user {
        magic.entry("remote_user".to_string()).or_insert_with(|| serde_json::json!(user));
    }
    magic
        .entry("become".to_string())
        .or_insert_with(|| serde_json::json!(host.connection.r#become));
    magic
        .entry("become_method".to_string())
        .or_insert_with(|| serde_json::json!(host.connection.become_method));
    magic
        .entry("become_user".to_string())
        .or_insert_with(|| serde_json::json!(host.connection.become_user));

    if let Some(remote_user) = &play.remote_user {
        magic.insert("remote_user".to_string(), serde_json::json!(remote_user));
    }
    if let Some(port) = play.port {
        magic.insert("remote_port".to_string(), serde_json::json!(port));
    }
    if let Some(conn) = &play.connection {
        magic.insert("connection".to_string(), serde_json::json!(conn));
    }
    if let Some(become_) = play.r#become {
        magic.insert("become".to_string(), serde_json::json!(become_));
    }
    if let Some(user) = &play.become_user {
        magic.insert("become_user".to_string(), serde_json::json!(user));
    }
    if let Some(method) = &play.become_method {
        magic.insert("become_method".to_string(), serde_json::json!(method));
    }

    magic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Host;
    use serde_json::json;

    #[test]
    fn magic_vars_fall_back_to_host_connection_params() {
        let host = Host::new("web1");
        let play = Play::new("test", "all");
        let magic = build_magic_vars(&host, &play, &HashMap::new());
        assert_eq!(magic.get("remote_addr"), Some(&json!("web1")));
        assert_eq!(magic.get("remote_port"), Some(&json!(22)));
    }

    #[test]
    fn play_level_remote_user_overrides_host_and_raw_vars() {
        let mut host = Host::new("web1");
        host.connection.ssh.user = Some("deploy".to_string());
        let mut play = Play::new("test", "all");
        play.remote_user = Some("ops".to_string());
        let mut raw = HashMap::new();
        raw.insert("ansible_user".to_string(), json!("raw-user"));

        let magic = build_magic_vars(&host, &play, &raw);
        assert_eq!(magic.get("remote_user"), Some(&json!("ops")));
    }
}
