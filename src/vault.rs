//! Vault-encrypted data detection.
//!
//! Decrypting vault-encrypted data is out of scope for the core execution
//! engine: extra-vars and variable files may reference vault-encrypted
//! strings, but the engine treats them as opaque and never attempts to
//! decrypt them. This module only recognizes the encrypted-string marker so
//! that callers (and the CLI's `vault` subcommand seam) can detect and
//! reject vault content with a clear error rather than passing ciphertext
//! through to a module as if it were a literal value.

/// Marker prefix for Ansible/Rustible vault-encrypted single values and
/// files.
pub const VAULT_HEADER: &str = "$ANSIBLE_VAULT";

/// Returns true if `content` looks like vault-encrypted data.
pub fn is_encrypted(content: &str) -> bool {
    content.trim_start().starts_with(VAULT_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_vault_header() {
        assert!(is_encrypted("$ANSIBLE_VAULT;1.1;AES256\n663738...\n"));
        assert!(!is_encrypted("plain text value"));
    }
}
