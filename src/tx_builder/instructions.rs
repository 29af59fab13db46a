//! Instruction planning and ordering validation
//!
//! Every transaction the crate builds follows one ordering rule:
//! 1. advance_nonce_account (if durable), exactly once and first
//! 2. Program instructions, in the order the builder produced them
//!
//! Also hosts the small encoders shared by several builders (memo, Anchor).

use borsh::BorshSerialize;
use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_instruction, system_program,
};

use crate::address::MEMO_PROGRAM_ID;
use crate::errors::{DappError, DappResult};
use crate::tx_builder::context::DurableNonce;

/// Final instruction list of one transaction
#[derive(Debug, Clone)]
pub struct InstructionPlan {
    pub instructions: Vec<Instruction>,
    /// Nonce account advanced by the first instruction, in durable mode
    pub nonce_account: Option<Pubkey>,
}

impl InstructionPlan {
    pub fn is_durable(&self) -> bool {
        self.nonce_account.is_some()
    }

    /// Check the plan against the ordering rule
    pub fn check_order(&self) -> DappResult<()> {
        sanity_check_ix_order(&self.instructions, self.is_durable())
    }
}

/// Prepend the nonce advance, in durable mode, to a batch already in
/// dependency order
pub fn plan_instructions(nonce: Option<&DurableNonce>, program_ixs: Vec<Instruction>) -> DappResult<InstructionPlan> {
    if program_ixs.is_empty() {
        return Err(DappError::validation("cannot plan an empty instruction batch"));
    }

    let instructions = match nonce {
        Some(n) => std::iter::once(system_instruction::advance_nonce_account(&n.account, &n.authority))
            .chain(program_ixs)
            .collect(),
        None => program_ixs,
    };
    Ok(InstructionPlan {
        instructions,
        nonce_account: nonce.map(|n| n.account),
    })
}

/// System program `AdvanceNonceAccount` (discriminator 4, u32 LE)
pub fn is_advance_nonce(ix: &Instruction) -> bool {
    ix.program_id == system_program::id() && ix.data.get(..4) == Some(&[4, 0, 0, 0][..])
}

/// Enforce the nonce ordering rule on a compiled instruction list
///
/// # Errors
///
/// `InvalidInstructionOrder` for an empty list, a durable list whose first
/// instruction is not the advance, a second advance anywhere, or an advance
/// in a blockhash transaction.
pub fn sanity_check_ix_order(instructions: &[Instruction], is_durable: bool) -> DappResult<()> {
    let Some(first) = instructions.first() else {
        return Err(DappError::invalid_order("no instructions to order"));
    };

    let advances: Vec<usize> = instructions
        .iter()
        .enumerate()
        .filter(|(_, ix)| is_advance_nonce(ix))
        .map(|(i, _)| i)
        .collect();

    if is_durable {
        if !is_advance_nonce(first) {
            return Err(DappError::invalid_order(format!(
                "durable transaction must open with advance_nonce_account, first program is {}",
                first.program_id
            )));
        }
        if let Some(extra) = advances.get(1) {
            return Err(DappError::invalid_order(format!(
                "duplicate advance_nonce_account at index {}",
                extra
            )));
        }
    } else if let Some(at) = advances.first() {
        return Err(DappError::invalid_order(format!(
            "advance_nonce_account at index {} in a blockhash transaction",
            at
        )));
    }
    Ok(())
}

/// Memo carrying `text` with no account keys
pub fn memo_instruction(text: &str) -> Instruction {
    Instruction::new_with_bytes(MEMO_PROGRAM_ID, text.as_bytes(), vec![])
}

/// First 8 bytes of `sha256("global:<name>")`
pub fn anchor_discriminator(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{}", name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Anchor instruction: discriminator followed by borsh-encoded args
pub fn anchor_instruction<T: BorshSerialize>(
    program_id: Pubkey,
    name: &str,
    args: &T,
    accounts: Vec<AccountMeta>,
) -> DappResult<Instruction> {
    let mut data = anchor_discriminator(name).to_vec();
    args.serialize(&mut data)
        .map_err(|e| DappError::instruction_failed(program_id.to_string(), e.to_string()))?;
    Ok(Instruction {
        program_id,
        accounts,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program_ix() -> Instruction {
        Instruction::new_with_bytes(
            Pubkey::new_unique(),
            &[1, 2, 3, 4],
            vec![AccountMeta::new(Pubkey::new_unique(), false)],
        )
    }

    #[test]
    fn test_plan_instructions_durable() {
        let nonce = DurableNonce {
            account: Pubkey::new_unique(),
            authority: Pubkey::new_unique(),
        };
        let ix = program_ix();
        let program_id = ix.program_id;

        let plan = plan_instructions(Some(&nonce), vec![ix]).unwrap();

        assert_eq!(plan.nonce_account, Some(nonce.account));
        assert_eq!(plan.instructions.len(), 2);
        assert!(is_advance_nonce(&plan.instructions[0]));
        assert_eq!(plan.instructions[1].program_id, program_id);
        assert!(plan.check_order().is_ok());
    }

    #[test]
    fn test_plan_instructions_non_durable() {
        let plan = plan_instructions(None, vec![program_ix(), program_ix()]).unwrap();
        assert!(!plan.is_durable());
        assert_eq!(plan.instructions.len(), 2);
        assert!(plan.instructions.iter().all(|ix| !is_advance_nonce(ix)));
    }

    #[test]
    fn test_plan_instructions_rejects_empty_batch() {
        assert!(matches!(
            plan_instructions(None, vec![]),
            Err(DappError::Validation(_))
        ));
    }

    #[test]
    fn test_sanity_check_empty_list() {
        assert!(sanity_check_ix_order(&[], false).is_err());
    }

    #[test]
    fn test_sanity_check_durable_missing_advance_nonce() {
        let err = sanity_check_ix_order(&[program_ix()], true).unwrap_err();
        assert!(matches!(err, DappError::InvalidInstructionOrder(ref m) if m.contains("must open with advance_nonce")));
    }

    #[test]
    fn test_sanity_check_non_durable_has_advance_nonce() {
        let instructions = vec![
            program_ix(),
            system_instruction::advance_nonce_account(&Pubkey::new_unique(), &Pubkey::new_unique()),
        ];
        let err = sanity_check_ix_order(&instructions, false).unwrap_err();
        assert!(err.to_string().contains("index 1 in a blockhash"));
    }

    #[test]
    fn test_sanity_check_multiple_advance_nonce() {
        let authority = Pubkey::new_unique();
        let instructions = vec![
            system_instruction::advance_nonce_account(&Pubkey::new_unique(), &authority),
            program_ix(),
            system_instruction::advance_nonce_account(&Pubkey::new_unique(), &authority),
        ];
        let err = sanity_check_ix_order(&instructions, true).unwrap_err();
        assert!(err.to_string().contains("duplicate advance_nonce_account at index 2"));
    }

    #[test]
    fn test_transfer_is_not_advance_nonce() {
        let ix = system_instruction::transfer(&Pubkey::new_unique(), &Pubkey::new_unique(), 4);
        assert!(!is_advance_nonce(&ix));
    }

    #[test]
    fn test_anchor_instruction_layout() {
        let program = Pubkey::new_unique();
        let ix = anchor_instruction(program, "mint_nft", &7u8, vec![]).unwrap();
        assert_eq!(ix.data.len(), 9);
        assert_eq!(&ix.data[..8], &anchor_discriminator("mint_nft"));
        assert_eq!(ix.data[8], 7);
        assert_ne!(anchor_discriminator("mint_nft"), anchor_discriminator("wl_mint_nft"));
    }

    #[test]
    fn test_memo_has_no_accounts() {
        let ix = memo_instruction("abc");
        assert_eq!(ix.program_id, MEMO_PROGRAM_ID);
        assert!(ix.accounts.is_empty());
        assert_eq!(ix.data, b"abc".to_vec());
    }
}
