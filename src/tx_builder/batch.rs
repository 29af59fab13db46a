//! Ordered, atomic instruction groups and their signer sets

use std::collections::BTreeSet;
use std::sync::Arc;

use solana_sdk::{
    instruction::Instruction,
    message::Message,
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
};

use crate::errors::{DappError, DappResult};

/// One on-chain transaction worth of instructions
///
/// `signers` holds the ephemeral keypairs that co-sign locally (e.g. a fresh
/// mint account). The fee payer is the wallet and is never listed here.
#[derive(Clone, Default)]
pub struct InstructionBatch {
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub signers: Vec<Arc<Keypair>>,
}

impl std::fmt::Debug for InstructionBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionBatch")
            .field("label", &self.label)
            .field("instructions", &self.instructions.len())
            .field(
                "signers",
                &self.signers.iter().map(|k| k.pubkey()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl InstructionBatch {
    pub fn new(label: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        Self {
            label: label.into(),
            instructions,
            signers: Vec::new(),
        }
    }

    pub fn with_signer(mut self, signer: Arc<Keypair>) -> Self {
        self.signers.push(signer);
        self
    }

    pub fn push(&mut self, ix: Instruction) {
        self.instructions.push(ix);
    }

    pub fn extend(&mut self, ixs: impl IntoIterator<Item = Instruction>) {
        self.instructions.extend(ixs);
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Public keys of the ephemeral co-signers
    pub fn signer_pubkeys(&self) -> Vec<Pubkey> {
        self.signers.iter().map(|k| k.pubkey()).collect()
    }

    /// Signing keys the batch's instructions require when `payer` pays fees
    pub fn required_signers(&self, payer: &Pubkey) -> Vec<Pubkey> {
        required_signers(&self.instructions, payer)
    }

    /// Check that wallet + ephemeral keys exactly cover the required signers
    pub fn validate_signers(&self, payer: &Pubkey) -> DappResult<()> {
        check_signers(&self.instructions, payer, &self.signer_pubkeys())
    }
}

/// Signing keys a message over `instructions` needs, fee payer first
pub fn required_signers(instructions: &[Instruction], payer: &Pubkey) -> Vec<Pubkey> {
    let message = Message::new(instructions, Some(payer));
    let count = message.header.num_required_signatures as usize;
    message.account_keys.into_iter().take(count).collect()
}

/// Fail with `SignerMismatch` unless `{payer} ∪ ephemeral` equals the required set
pub fn check_signers(
    instructions: &[Instruction],
    payer: &Pubkey,
    ephemeral: &[Pubkey],
) -> DappResult<()> {
    if instructions.is_empty() {
        return Err(DappError::validation("instruction batch is empty"));
    }

    let required: BTreeSet<Pubkey> = required_signers(instructions, payer).into_iter().collect();
    let mut provided: BTreeSet<Pubkey> = ephemeral.iter().copied().collect();
    provided.insert(*payer);

    if required == provided {
        return Ok(());
    }

    let missing: Vec<String> = required.difference(&provided).map(|k| k.to_string()).collect();
    let extra: Vec<String> = provided.difference(&required).map(|k| k.to_string()).collect();
    Err(DappError::SignerMismatch(format!(
        "missing [{}], unexpected [{}]",
        missing.join(", "),
        extra.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{instruction::AccountMeta, system_instruction};

    #[test]
    fn test_required_signers_put_payer_first() {
        let payer = Pubkey::new_unique();
        let to = Pubkey::new_unique();
        let batch = InstructionBatch::new("transfer", vec![system_instruction::transfer(&payer, &to, 5)]);
        assert_eq!(batch.required_signers(&payer), vec![payer]);
        assert!(batch.validate_signers(&payer).is_ok());
    }

    #[test]
    fn test_missing_ephemeral_signer_rejected() {
        let payer = Pubkey::new_unique();
        let mint = Keypair::new();
        let ix = system_instruction::create_account(&payer, &mint.pubkey(), 1_000, 82, &spl_token::id());
        let batch = InstructionBatch::new("create", vec![ix.clone()]);

        let err = batch.validate_signers(&payer).unwrap_err();
        assert!(matches!(err, DappError::SignerMismatch(ref m) if m.contains(&mint.pubkey().to_string())));

        let batch = InstructionBatch::new("create", vec![ix]).with_signer(Arc::new(mint));
        assert!(batch.validate_signers(&payer).is_ok());
    }

    #[test]
    fn test_unused_signer_rejected() {
        let payer = Pubkey::new_unique();
        let ix = Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1],
            vec![AccountMeta::new(payer, true)],
        );
        let batch = InstructionBatch::new("extra", vec![ix]).with_signer(Arc::new(Keypair::new()));
        let err = batch.validate_signers(&payer).unwrap_err();
        assert!(err.to_string().contains("unexpected"));
    }

    #[test]
    fn test_empty_batch_is_validation_error() {
        let batch = InstructionBatch::new("empty", vec![]);
        assert!(matches!(
            batch.validate_signers(&Pubkey::new_unique()),
            Err(DappError::Validation(_))
        ));
    }
}
