//! Durable nonce accounts
//!
//! A nonce account stores a blockhash that stays valid until the account is
//! advanced. Batches built against it survive arbitrarily slow wallet
//! interaction.

use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    nonce::state::{State, Versions},
    pubkey::Pubkey,
    system_instruction,
};
use tracing::debug;

use crate::errors::{DappError, DappResult};
use crate::rpc::ChainRpc;
use crate::tx_builder::context::{DurableNonce, ExecutionContext};

/// Size of a system nonce account
pub const NONCE_ACCOUNT_LENGTH: usize = 80;

/// Create `nonce` funded by `payer` and initialize it under `authority`
pub fn create_nonce_instructions(payer: &Pubkey, nonce: &Pubkey, authority: &Pubkey, lamports: u64) -> Vec<Instruction> {
    system_instruction::create_nonce_account(payer, nonce, authority, lamports)
}

/// Decoded initialized nonce account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceInfo {
    pub authority: Pubkey,
    pub blockhash: Hash,
    pub lamports_per_signature: u64,
}

/// Decode a system nonce account's data
pub fn parse_nonce_account(data: &[u8]) -> DappResult<NonceInfo> {
    let versions: Versions = bincode::deserialize(data)
        .map_err(|e| DappError::validation(format!("invalid nonce account: {}", e)))?;
    match versions.state() {
        State::Initialized(data) => Ok(NonceInfo {
            authority: data.authority,
            blockhash: data.blockhash(),
            lamports_per_signature: data.fee_calculator.lamports_per_signature,
        }),
        State::Uninitialized => Err(DappError::validation("nonce account is uninitialized")),
    }
}

/// Fetch `nonce_account` and build a durable execution context from it
///
/// # Errors
///
/// - `Validation` if the account is missing, not a nonce account, or is
///   controlled by someone other than `expected_authority`
pub async fn durable_context<R: ChainRpc + ?Sized>(
    rpc: &R,
    nonce_account: &Pubkey,
    expected_authority: &Pubkey,
) -> DappResult<ExecutionContext> {
    let account = rpc
        .get_account(nonce_account)
        .await?
        .ok_or_else(|| DappError::validation(format!("nonce account {} not found", nonce_account)))?;

    if account.owner != solana_sdk::system_program::id() {
        return Err(DappError::validation(format!(
            "nonce account {} is owned by {}",
            nonce_account, account.owner
        )));
    }

    let info = parse_nonce_account(&account.data)?;
    if info.authority != *expected_authority {
        return Err(DappError::validation(format!(
            "nonce authority {} does not match payer {}",
            info.authority, expected_authority
        )));
    }

    debug!(nonce = %nonce_account, blockhash = %info.blockhash, "Loaded durable nonce");
    Ok(ExecutionContext::durable(
        DurableNonce {
            account: *nonce_account,
            authority: info.authority,
        },
        info.blockhash,
    ))
}
