//! `vault` subcommand — detect vault-encrypted content.
//!
//! The engine never decrypts vault data (see [`crate::vault`]); this
//! subcommand exists only so operators can check whether a file or string
//! carries the vault marker before handing it to a playbook run.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::cli::commands::CommandContext;

/// Arguments for the `vault` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct VaultArgs {
    #[command(subcommand)]
    pub action: VaultAction,
}

#[derive(Subcommand, Debug, Clone)]
pub enum VaultAction {
    /// Report whether a file's contents are vault-encrypted.
    IsEncrypted {
        /// File to inspect.
        path: PathBuf,
    },
    /// Report whether a literal string is vault-encrypted.
    IsEncryptedString {
        /// String to inspect.
        value: String,
    },
}

impl VaultArgs {
    pub async fn execute(&self, ctx: &mut CommandContext) -> Result<i32> {
        let (label, encrypted) = match &self.action {
            VaultAction::IsEncrypted { path } => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                (path.display().to_string(), crate::vault::is_encrypted(&content))
            }
            VaultAction::IsEncryptedString { value } => {
                ("<string>".to_string(), crate::vault::is_encrypted(value))
            }
        };

        if encrypted {
            ctx.output.info(&format!("{label}: vault-encrypted ({})", crate::vault::VAULT_HEADER));
        } else {
            ctx.output.info(&format!("{label}: not vault-encrypted"));
        }

        Ok(if encrypted { 0 } else { 1 })
    }
}

#[async_trait::async_trait]
impl super::Runnable for VaultArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_args_parsing_string() {
        let args = VaultArgs::try_parse_from(["vault", "is-encrypted-string", "plain"]).unwrap();
        assert!(matches!(args.action, VaultAction::IsEncryptedString { value } if value == "plain"));
    }

    #[test]
    fn test_vault_args_parsing_file() {
        let args = VaultArgs::try_parse_from(["vault", "is-encrypted", "vars.yml"]).unwrap();
        assert!(matches!(args.action, VaultAction::IsEncrypted { .. }));
    }
}
