// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Credential tooling
//!
//! Produces and inspects the base64 blobs stored in `schools.db_password`,
//! using the key from the active configuration. Useful when rotating a tenant
//! role's password by hand.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::io::Read;
use std::path::PathBuf;

use schoolerp_tenancy_core::domain::config::TenancyConfig;
use schoolerp_tenancy_core::domain::tenant::EncryptedSecret;
use schoolerp_tenancy_core::infrastructure::SecretCipher;

#[derive(Subcommand)]
pub enum SecretCommand {
    /// Encrypt a database password into a storable blob
    ///
    /// Reads the password from stdin when PLAINTEXT is omitted or `-`.
    Encrypt {
        #[arg(value_name = "PLAINTEXT")]
        value: Option<String>,
    },

    /// Decrypt a stored blob
    Decrypt {
        #[arg(value_name = "BLOB")]
        blob: String,
    },
}

pub async fn handle_command(command: SecretCommand, config_path: Option<PathBuf>) -> Result<()> {
    let config = TenancyConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let cipher = cipher_from(&config)?;
    println!("{}", run(&cipher, command, std::io::stdin())?);
    Ok(())
}

fn cipher_from(config: &TenancyConfig) -> Result<SecretCipher> {
    SecretCipher::new(&config.security.encryption_key, config.security.key_derivation)
        .context("security.encryption_key is not usable")
}

fn run(cipher: &SecretCipher, command: SecretCommand, input: impl Read) -> Result<String> {
    match command {
        SecretCommand::Encrypt { value } => {
            let plaintext = plaintext_from(value, input)?;
            let blob = cipher.encrypt(&plaintext).context("Encryption failed")?;
            Ok(blob.expose_blob().to_string())
        }
        SecretCommand::Decrypt { blob } => cipher
            .decrypt(&EncryptedSecret::new(blob.trim()))
            .context("Decryption failed (wrong key or corrupted blob)"),
    }
}

/// Argument value, or one line from `input` when absent or `-`.
fn plaintext_from(value: Option<String>, input: impl Read) -> Result<String> {
    let plaintext = match value {
        Some(value) if value != "-" => value,
        _ => {
            let mut read = std::io::read_to_string(input).context("Failed to read plaintext from stdin")?;
            if read.ends_with('\n') {
                read.pop();
                if read.ends_with('\r') {
                    read.pop();
                }
            }
            read
        }
    };
    if plaintext.is_empty() {
        anyhow::bail!("Refusing to encrypt an empty password");
    }
    Ok(plaintext)
}
