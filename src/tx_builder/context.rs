//! Execution context for transaction building
//!
//! A batch is compiled against either a recent blockhash or a durable nonce.
//! In durable mode the nonce's stored blockhash replaces a fresh one and
//! `advance_nonce_account` is prepended, so the transaction stays valid until
//! the nonce is consumed.

use solana_sdk::{hash::Hash, message::Message, pubkey::Pubkey, signature::Keypair, transaction::Transaction};

use crate::errors::{DappError, DappResult};
use crate::tx_builder::batch::{check_signers, InstructionBatch};
use crate::tx_builder::instructions::plan_instructions;

/// Durable nonce account backing a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurableNonce {
    pub account: Pubkey,
    pub authority: Pubkey,
}

/// Blockhash source for one batch
pub struct ExecutionContext {
    /// Recent blockhash, or the nonce's stored blockhash in durable mode
    pub blockhash: Hash,

    pub nonce: Option<DurableNonce>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("blockhash", &self.blockhash)
            .field("nonce", &self.nonce.map(|n| n.account))
            .finish()
    }
}

impl ExecutionContext {
    pub fn recent(blockhash: Hash) -> Self {
        Self {
            blockhash,
            nonce: None,
        }
    }

    pub fn durable(nonce: DurableNonce, stored_blockhash: Hash) -> Self {
        Self {
            blockhash: stored_blockhash,
            nonce: Some(nonce),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.nonce.is_some()
    }

    /// Compile `batch` into a transaction paid by `payer`
    ///
    /// The returned transaction carries the ephemeral signatures; the
    /// payer's signature slot is left for the wallet.
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty batch
    /// - `InvalidInstructionOrder` if the plan violates nonce ordering
    /// - `SignerMismatch` if the ephemeral keys do not match the required set
    /// - `Signing` if local signing fails
    pub fn compile(&self, batch: &InstructionBatch, payer: &Pubkey) -> DappResult<Transaction> {
        let plan = plan_instructions(self.nonce.as_ref(), batch.instructions.clone())?;
        plan.check_order()?;
        check_signers(&plan.instructions, payer, &batch.signer_pubkeys())?;

        let message = Message::new_with_blockhash(&plan.instructions, Some(payer), &self.blockhash);
        let mut tx = Transaction::new_unsigned(message);

        if !batch.signers.is_empty() {
            let keypairs: Vec<&Keypair> = batch.signers.iter().map(|k| k.as_ref()).collect();
            tx.try_partial_sign(keypairs.as_slice(), self.blockhash)
                .map_err(|e| DappError::Signing(format!("ephemeral signer: {}", e)))?;
        }

        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx_builder::instructions::is_advance_nonce;
    use solana_sdk::{signature::Signature, signer::Signer, system_instruction};
    use std::sync::Arc;

    #[test]
    fn test_recent_context_compiles_plain_batch() {
        let payer = Pubkey::new_unique();
        let batch = InstructionBatch::new(
            "transfer",
            vec![system_instruction::transfer(&payer, &Pubkey::new_unique(), 10)],
        );
        let hash = Hash::new_unique();
        let tx = ExecutionContext::recent(hash).compile(&batch, &payer).unwrap();
        assert_eq!(tx.message.recent_blockhash, hash);
        assert_eq!(tx.message.instructions.len(), 1);
        assert_eq!(tx.signatures, vec![Signature::default()]);
    }

    #[test]
    fn test_durable_context_prepends_advance_and_uses_stored_hash() {
        let payer = Pubkey::new_unique();
        let nonce = DurableNonce {
            account: Pubkey::new_unique(),
            authority: payer,
        };
        let stored = Hash::new_unique();
        let batch = InstructionBatch::new(
            "transfer",
            vec![system_instruction::transfer(&payer, &Pubkey::new_unique(), 10)],
        );
        let ctx = ExecutionContext::durable(nonce, stored);
        assert!(ctx.is_durable());

        let tx = ctx.compile(&batch, &payer).unwrap();
        assert_eq!(tx.message.recent_blockhash, stored);
        let first = &tx.message.instructions[0];
        let decompiled = solana_sdk::instruction::Instruction {
            program_id: tx.message.account_keys[first.program_id_index as usize],
            accounts: vec![],
            data: first.data.clone(),
        };
        assert!(is_advance_nonce(&decompiled));
    }

    #[test]
    fn test_ephemeral_signer_is_applied() {
        let payer = Pubkey::new_unique();
        let mint = Arc::new(Keypair::new());
        let batch = InstructionBatch::new(
            "create",
            vec![system_instruction::create_account(&payer, &mint.pubkey(), 1, 82, &spl_token::id())],
        )
        .with_signer(mint.clone());

        let tx = ExecutionContext::recent(Hash::new_unique()).compile(&batch, &payer).unwrap();
        assert_eq!(tx.signatures.len(), 2);
        assert_eq!(tx.signatures[0], Signature::default());
        assert_ne!(tx.signatures[1], Signature::default());
    }

    #[test]
    fn test_compile_rejects_signer_mismatch() {
        let payer = Pubkey::new_unique();
        let mint = Keypair::new();
        let batch = InstructionBatch::new(
            "create",
            vec![system_instruction::create_account(&payer, &mint.pubkey(), 1, 82, &spl_token::id())],
        );
        let err = ExecutionContext::recent(Hash::new_unique())
            .compile(&batch, &payer)
            .unwrap_err();
        assert!(matches!(err, DappError::SignerMismatch(_)));
    }
}
