//! Command-line interface for Rustible.
//!
//! Three subcommands: `play` runs a playbook against an inventory,
//! `inventory` inspects inventory sources without running anything, and
//! `vault` only detects vault-encrypted content (decryption is out of scope
//! for the engine, see `crate::vault`).

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Rustible - an agentless, SSH-based configuration-management engine.
#[derive(Parser, Debug, Clone)]
#[command(name = "rustible")]
#[command(author = "Rustible Contributors")]
#[command(version)]
#[command(about = "An Ansible-alternative configuration-management engine", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to inventory file or directory.
    #[arg(short = 'i', long, global = true, env = "RUSTIBLE_INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// Extra variables (key=value, @file.yml, or @file.json).
    #[arg(short = 'e', long = "extra-vars", global = true, action = clap::ArgAction::Append)]
    pub extra_vars: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Path to the engine's INI-style configuration file.
    #[arg(short = 'c', long, global = true, env = "RUSTIBLE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a playbook against an inventory.
    Play(commands::play::PlayArgs),

    /// Inspect an inventory source (list hosts, show the group graph).
    Inventory(commands::inventory::InventoryArgs),

    /// Inspect vault-encrypted content (the engine never decrypts it).
    Vault(commands::vault::VaultArgs),
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    pub fn verbosity(&self) -> u8 {
        self.verbose.min(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["rustible", "play", "playbook.yml"]).unwrap();
        assert!(matches!(cli.command, Commands::Play(_)));
    }

    #[test]
    fn test_verbosity_caps_at_four() {
        let cli = Cli::try_parse_from(["rustible", "-vvvvvv", "play", "playbook.yml"]).unwrap();
        assert_eq!(cli.verbosity(), 4);
    }

    #[test]
    fn test_extra_vars_accumulate() {
        let cli = Cli::try_parse_from([
            "rustible",
            "-e",
            "key1=value1",
            "-e",
            "key2=value2",
            "play",
            "playbook.yml",
        ])
        .unwrap();
        assert_eq!(cli.extra_vars.len(), 2);
    }
}
