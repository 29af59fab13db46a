//! Network RPC access
//!
//! The pipelines talk to the chain only through [`ChainRpc`], so tests can
//! swap in an in-memory ledger.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::{
    account::Account, hash::Hash, pubkey::Pubkey,
    signature::Signature, transaction::Transaction,
};
use solana_transaction_status::TransactionConfirmationStatus;

use crate::errors::DappResult;
use crate::types::CommitmentLevel;

pub mod confirm;

pub use confirm::{confirm_signature, ConfirmOptions};

/// Ledger view of one signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    pub slot: u64,
    /// Program or runtime error the transaction landed with
    pub err: Option<String>,
    /// Deepest commitment the ledger reports; `None` for rooted legacy statuses
    pub confirmation: Option<CommitmentLevel>,
}

impl SignatureStatus {
    pub fn satisfies(&self, commitment: CommitmentLevel) -> bool {
        self.confirmation.unwrap_or(CommitmentLevel::Finalized) >= commitment
    }
}

/// RPC surface consumed by the pipelines
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> DappResult<u64>;

    /// `None` if the account does not exist
    async fn get_account(&self, address: &Pubkey) -> DappResult<Option<Account>>;

    async fn get_latest_blockhash(&self) -> DappResult<Hash>;

    /// Dispatch a fully signed transaction
    async fn send_transaction(&self, transaction: &Transaction) -> DappResult<Signature>;

    async fn get_signature_statuses(&self, signatures: &[Signature]) -> DappResult<Vec<Option<SignatureStatus>>>;
}

fn confirmation_level(status: &TransactionConfirmationStatus) -> CommitmentLevel {
    match status {
        TransactionConfirmationStatus::Processed => CommitmentLevel::Processed,
        TransactionConfirmationStatus::Confirmed => CommitmentLevel::Confirmed,
        TransactionConfirmationStatus::Finalized => CommitmentLevel::Finalized,
    }
}

#[async_trait]
impl ChainRpc for RpcClient {
    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> DappResult<u64> {
        Ok(RpcClient::get_minimum_balance_for_rent_exemption(self, data_len).await?)
    }

    async fn get_account(&self, address: &Pubkey) -> DappResult<Option<Account>> {
        let response = self
            .get_account_with_commitment(address, self.commitment())
            .await?;
        Ok(response.value)
    }

    async fn get_latest_blockhash(&self) -> DappResult<Hash> {
        Ok(RpcClient::get_latest_blockhash(self).await?)
    }

    async fn send_transaction(&self, transaction: &Transaction) -> DappResult<Signature> {
        let config = RpcSendTransactionConfig {
            preflight_commitment: Some(self.commitment().commitment),
            ..RpcSendTransactionConfig::default()
        };
        Ok(self.send_transaction_with_config(transaction, config).await?)
    }

    async fn get_signature_statuses(&self, signatures: &[Signature]) -> DappResult<Vec<Option<SignatureStatus>>> {
        let response = RpcClient::get_signature_statuses(self, signatures).await?;
        Ok(response
            .value
            .into_iter()
            .map(|status| {
                status.map(|s| SignatureStatus {
                    slot: s.slot,
                    err: s.err.map(|e| e.to_string()),
                    confirmation: s.confirmation_status.as_ref().map(confirmation_level),
                })
            })
            .collect())
    }
}

/// Nonblocking client for `url` at `commitment`
pub fn connect(url: &str, commitment: CommitmentLevel) -> RpcClient {
    RpcClient::new_with_commitment(url.to_string(), commitment.to_commitment_config())
}
