//! Rustible - an agentless, SSH-based configuration-management engine.
//!
//! This is the thin entry point: argument parsing, logging, config loading
//! and subcommand dispatch live here; everything else is in the library.

use anyhow::Result;
use rustible::cli::commands::{CommandContext, Runnable};
use rustible::cli::{Cli, Commands};
use rustible::config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbosity());

    if cli.verbosity() >= 2 {
        eprintln!("Rustible v{VERSION} by {AUTHORS}");
    }

    let manager = config::manager();
    if let Err(e) = manager.load(cli.config.as_deref()) {
        if cli.verbosity() >= 1 {
            eprintln!("warning: failed to load config: {e}");
        }
    }

    let mut ctx = CommandContext::new(&cli, manager.settings());

    let exit_code = match &cli.command {
        Commands::Play(args) => args.run(&mut ctx).await?,
        Commands::Inventory(args) => args.run(&mut ctx).await?,
        Commands::Vault(args) => args.run(&mut ctx).await?,
    };

    std::process::exit(exit_code);
}

fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbosity >= 3))
        .with(env_filter)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
