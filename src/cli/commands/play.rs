//! `play` subcommand — run a playbook against an inventory.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use crate::cli::commands::CommandContext;
use crate::cli::output::{RecapStats, TaskStatus};
use crate::connection::ConnectionConfig;
use crate::executor::PlaybookExecutor;
use crate::inventory::Inventory;
use crate::playbook::Playbook;
use crate::tasks::{TaskOutcome, TaskResult};

/// Arguments for the `play` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct PlayArgs {
    /// Path to the playbook file.
    #[arg(required = true)]
    pub playbook: PathBuf,

    /// Only run tasks carrying one of these tags.
    #[arg(long, short = 't', action = clap::ArgAction::Append)]
    pub tags: Vec<String>,

    /// Skip tasks carrying one of these tags.
    #[arg(long, action = clap::ArgAction::Append)]
    pub skip_tags: Vec<String>,

    /// Restrict execution to a subset of the resolved hosts (intersected
    /// with each play's own host pattern).
    #[arg(short = 'l', long)]
    pub limit: Option<String>,

    /// Remote user used when a host doesn't specify its own.
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Reserved: check/dry-run mode is a named non-goal of this engine and
    /// has no effect beyond a warning.
    #[arg(long)]
    pub check: bool,
}

impl PlayArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let start = Instant::now();

        if self.check {
            ctx.output
                .warning("--check is reserved but not implemented; the playbook will run for real");
        }
        if !self.tags.is_empty() || !self.skip_tags.is_empty() {
            ctx.output
                .warning("tag filtering is not implemented in this engine; all tasks will run");
        }

        if !self.playbook.exists() {
            ctx.output.error(&format!("playbook file not found: {}", self.playbook.display()));
            return Ok(1);
        }

        ctx.output.banner(&format!(
            "PLAYBOOK: {}",
            self.playbook.file_name().unwrap_or_default().to_string_lossy()
        ));

        let playbook = Playbook::from_file(&self.playbook)
            .await
            .with_context(|| format!("failed to load playbook: {}", self.playbook.display()))?;

        let inventory = match &ctx.inventory_path {
            Some(path) => Inventory::load(path)
                .map_err(|e| anyhow::anyhow!("failed to load inventory from {}: {e}", path.display()))?,
            None => {
                ctx.output.warning("no inventory specified, defaulting to a single localhost entry");
                let mut inv = Inventory::new();
                let mut host = crate::inventory::Host::new("localhost");
                host.connection.connection = crate::inventory::ConnectionType::Local;
                inv.add_host(host).map_err(|e| anyhow::anyhow!(e))?;
                inv.normalize().map_err(|e| anyhow::anyhow!(e))?;
                inv
            }
        };

        let mut extra_vars = ctx.parse_extra_vars()?;
        if let Some(user) = &self.user {
            extra_vars.entry("ansible_user".to_string()).or_insert_with(|| serde_json::json!(user));
        }

        let mut playbook = playbook;
        if let Some(limit) = &self.limit {
            for play in &mut playbook.plays {
                play.hosts = format!("{}:&{}", play.hosts, limit);
            }
        }

        let local_agent_binary = std::env::current_exe().context("failed to resolve own executable path")?;
        let connection_config = ConnectionConfig::default();
        let executor = PlaybookExecutor::new(ctx.settings.clone(), connection_config, local_agent_binary);

        let report = executor
            .run_playbook(&playbook, &inventory, &extra_vars)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        let mut stats = RecapStats::new();
        for (play_name, play_report) in &report.plays {
            ctx.output.play_header(play_name);
            for (host, outcomes) in play_report {
                for outcome in outcomes {
                    record_outcome(&mut stats, host, outcome);
                    print_outcome(ctx, host, outcome);
                }
            }
        }

        ctx.output.recap(&stats);
        ctx.output.info(&format!("playbook finished in {:.2}s", start.elapsed().as_secs_f64()));

        Ok(if stats.has_failures() { 2 } else { 0 })
    }
}

fn status_for(result: &TaskResult) -> TaskStatus {
    if result.unreachable {
        TaskStatus::Unreachable
    } else if result.failed {
        TaskStatus::Failed
    } else if result.skipped {
        TaskStatus::Skipped
    } else if result.changed {
        TaskStatus::Changed
    } else {
        TaskStatus::Ok
    }
}

fn record_outcome(stats: &mut RecapStats, host: &str, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Single(result) => stats.record(host, status_for(result)),
        TaskOutcome::Looped { results, .. } => {
            for result in results {
                stats.record(host, status_for(result));
            }
        }
    }
}

fn print_outcome(ctx: &CommandContext, host: &str, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Single(result) => {
            ctx.output.task_result(host, status_for(result), result.msg.as_deref());
        }
        TaskOutcome::Looped { results, .. } => {
            for result in results {
                ctx.output.task_result(host, status_for(result), result.msg.as_deref());
            }
        }
    }
}

#[async_trait::async_trait]
impl super::Runnable for PlayArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_args_parsing() {
        let args = PlayArgs::try_parse_from(["play", "site.yml"]).unwrap();
        assert_eq!(args.playbook, PathBuf::from("site.yml"));
        assert!(!args.check);
    }

    #[test]
    fn test_play_args_with_tags_and_limit() {
        let args = PlayArgs::try_parse_from(["play", "site.yml", "-t", "web", "-l", "group1"]).unwrap();
        assert_eq!(args.tags, vec!["web"]);
        assert_eq!(args.limit, Some("group1".to_string()));
    }

    #[test]
    fn test_status_for_prioritizes_unreachable_over_failed() {
        let mut r = TaskResult::failed("boom");
        r.unreachable = true;
        assert_eq!(status_for(&r), TaskStatus::Unreachable);
    }

    #[test]
    fn test_status_for_ok() {
        assert_eq!(status_for(&TaskResult::ok()), TaskStatus::Ok);
        assert_eq!(status_for(&TaskResult::changed()), TaskStatus::Changed);
    }
}
