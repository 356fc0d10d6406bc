//! Subcommand implementations for the Rustible CLI.

pub mod inventory;
pub mod play;
pub mod vault;

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cli::output::OutputFormatter;
use crate::cli::Cli;
use crate::config::Settings;

/// Context shared between subcommands: resolved CLI globals plus the
/// engine settings loaded from `rustible.cfg`.
pub struct CommandContext {
    pub settings: Settings,
    pub output: OutputFormatter,
    pub inventory_path: Option<PathBuf>,
    pub extra_vars_raw: Vec<String>,
}

impl CommandContext {
    pub fn new(cli: &Cli, settings: Settings) -> Self {
        let output = OutputFormatter::new(!cli.no_color, cli.json, cli.verbosity());
        Self {
            settings,
            output,
            inventory_path: cli.inventory.clone(),
            extra_vars_raw: cli.extra_vars.clone(),
        }
    }

    /// Parses `-e`/`--extra-vars` entries into the JSON values the executor
    /// consumes: `key=value` pairs (value parsed as YAML, falling back to a
    /// plain string) and `@file` references (a YAML or JSON mapping).
    pub fn parse_extra_vars(&self) -> Result<HashMap<String, serde_json::Value>> {
        let mut vars = HashMap::new();

        for entry in &self.extra_vars_raw {
            if let Some(file_path) = entry.strip_prefix('@') {
                let content = std::fs::read_to_string(file_path)
                    .with_context(|| format!("failed to read extra-vars file: {file_path}"))?;
                let file_vars: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(&content)
                    .with_context(|| format!("failed to parse extra-vars file: {file_path}"))?;
                for (k, v) in file_vars {
                    vars.insert(k, yaml_to_json(&v));
                }
            } else if let Some((key, value)) = entry.split_once('=') {
                let parsed: serde_yaml::Value =
                    serde_yaml::from_str(value).unwrap_or_else(|_| serde_yaml::Value::String(value.to_string()));
                vars.insert(key.to_string(), yaml_to_json(&parsed));
            } else {
                anyhow::bail!("invalid --extra-vars entry (expected key=value or @file): {entry}");
            }
        }

        Ok(vars)
    }
}

fn yaml_to_json(value: &serde_yaml::Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// A CLI subcommand that can be executed against a [`CommandContext`].
#[async_trait::async_trait]
pub trait Runnable {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
