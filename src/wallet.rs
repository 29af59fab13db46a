//! Wallet management module

use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    transaction::Transaction,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{DappError, DappResult};

/// Signing surface of a user wallet
///
/// The pipelines hand over one transaction at a time. Ephemeral co-signers
/// have already signed their slots; the wallet fills in the rest.
#[async_trait]
pub trait WalletAdapter: Send + Sync {
    fn pubkey(&self) -> Pubkey;

    /// Sign `transaction` in place, or fail with `Signing` if the user refuses
    async fn sign_transaction(&self, transaction: &mut Transaction) -> DappResult<()>;
}

/// Resolve a leading `~/` against `$HOME`, as keypair paths in config use it
pub fn expand_home(path: &str) -> PathBuf {
    expand_with_home(path, std::env::var_os("HOME"))
}

fn expand_with_home(path: &str, home: Option<OsString>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => Path::new(&home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Wallet backed by a local keypair
pub struct LocalWallet {
    keypair: Arc<Keypair>,
}

impl LocalWallet {
    /// Load a keypair file: raw 64 bytes or the JSON byte array format
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let keypair_bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;

        let bytes = if keypair_bytes.len() == 64 {
            keypair_bytes
        } else {
            serde_json::from_slice::<Vec<u8>>(&keypair_bytes)
                .context("Failed to parse keypair JSON")?
        };
        if bytes.len() != 64 {
            anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
        }
        if bytes.iter().all(|&b| b == 0) {
            anyhow::bail!("Invalid keypair: all-zero key rejected");
        }
        let keypair = Keypair::try_from(bytes.as_slice()).context("Invalid keypair bytes")?;

        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn keypair_arc(&self) -> Arc<Keypair> {
        Arc::clone(&self.keypair)
    }
}

impl Clone for LocalWallet {
    fn clone(&self) -> Self {
        Self {
            keypair: Arc::clone(&self.keypair),
        }
    }
}

#[async_trait]
impl WalletAdapter for LocalWallet {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_transaction(&self, transaction: &mut Transaction) -> DappResult<()> {
        let blockhash = transaction.message.recent_blockhash;
        transaction
            .try_partial_sign(&[self.keypair.as_ref()], blockhash)
            .map_err(|e| DappError::Signing(e.to_string()))
    }
}
