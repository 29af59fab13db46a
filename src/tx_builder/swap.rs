//! Swap transaction assembly
//!
//! Wraps native SOL into its token account before the swap program runs and
//! closes that account afterwards, all in the same transaction.

use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};

use crate::address::associated_token_address;
use crate::errors::{DappError, DappResult};
use crate::tx_builder::batch::InstructionBatch;
use crate::types::TokenInfo;

/// Minimum output in base units for a quoted UI amount
///
/// Computed as `floor(out * 10^decimals * (1 - slippage))` in `f64`, the
/// same arithmetic the quote display uses. Non-finite or negative results
/// clamp to 0.
pub fn minimum_amount_out(quoted_out: f64, decimals: u8, slippage: f64) -> u64 {
    let raw = quoted_out * 10f64.powi(decimals as i32) * (1.0 - slippage);
    if raw.is_finite() && raw > 0.0 {
        raw.floor() as u64
    } else {
        0
    }
}

/// Wrapped-SOL account of `owner`
pub fn wrapped_sol_account(owner: &Pubkey) -> DappResult<Pubkey> {
    associated_token_address(owner, &spl_token::native_mint::id())
}

/// Idempotent WSOL account create, lamport transfer, `sync_native`
pub fn wrap_sol_instructions(owner: &Pubkey, lamports: u64) -> DappResult<Vec<Instruction>> {
    let wsol = wrapped_sol_account(owner)?;
    let sync = spl_token::instruction::sync_native(&spl_token::id(), &wsol)
        .map_err(|e| DappError::instruction_failed("spl_token", e.to_string()))?;
    Ok(vec![
        spl_associated_token_account::instruction::create_associated_token_account_idempotent(
            owner,
            owner,
            &spl_token::native_mint::id(),
            &spl_token::id(),
        ),
        system_instruction::transfer(owner, &wsol, lamports),
        sync,
    ])
}

/// Close the WSOL account, returning its lamports to `owner`
pub fn unwrap_sol_instruction(owner: &Pubkey) -> DappResult<Instruction> {
    let wsol = wrapped_sol_account(owner)?;
    spl_token::instruction::close_account(&spl_token::id(), &wsol, owner, owner, &[])
        .map_err(|e| DappError::instruction_failed("spl_token", e.to_string()))
}

/// Full swap batch: optional wrap, program swap instructions, optional unwrap
pub fn build_swap_batch(
    payer: &Pubkey,
    token_in: &TokenInfo,
    token_out: &TokenInfo,
    amount_in: u64,
    swap_instructions: Vec<Instruction>,
) -> DappResult<InstructionBatch> {
    if swap_instructions.is_empty() {
        return Err(DappError::instruction_failed(
            "swap",
            "swap program returned no instructions",
        ));
    }

    let mut batch = InstructionBatch::new(format!("swap {}->{}", token_in.symbol, token_out.symbol), vec![]);
    if token_in.is_native() {
        batch.extend(wrap_sol_instructions(payer, amount_in)?);
    }
    batch.extend(swap_instructions);
    if token_in.is_native() || token_out.is_native() {
        batch.push(unwrap_sol_instruction(payer)?);
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use solana_sdk::instruction::AccountMeta;

    fn sol() -> TokenInfo {
        TokenInfo::new("SOL", spl_token::native_mint::id(), 9)
    }

    fn usdc() -> TokenInfo {
        TokenInfo::new("USDC", Pubkey::new_unique(), 6)
    }

    fn swap_ix(payer: &Pubkey) -> Instruction {
        Instruction::new_with_bytes(Pubkey::new_unique(), &[9], vec![AccountMeta::new(*payer, true)])
    }

    #[test]
    fn test_minimum_out_truncates_at_target_decimals() {
        assert_eq!(minimum_amount_out(100.0, 6, 0.01), 99_000_000);
        assert_eq!(minimum_amount_out(1.2345678, 6, 0.0), 1_234_567);
        assert_eq!(minimum_amount_out(0.0, 6, 0.01), 0);
        assert_eq!(minimum_amount_out(5.0, 6, 1.5), 0);
    }

    #[test]
    fn test_native_input_wraps_and_unwraps() {
        let payer = Pubkey::new_unique();
        let batch = build_swap_batch(&payer, &sol(), &usdc(), 1_000_000_000, vec![swap_ix(&payer)]).unwrap();
        let programs: Vec<Pubkey> = batch.instructions.iter().map(|ix| ix.program_id).collect();
        assert_eq!(programs.len(), 5);
        assert_eq!(programs[0], spl_associated_token_account::id());
        assert_eq!(programs[1], solana_sdk::system_program::id());
        assert_eq!(programs[2], spl_token::id());
        assert_eq!(programs[4], spl_token::id());
        assert!(batch.validate_signers(&payer).is_ok());
    }

    #[test]
    fn test_native_output_only_unwraps() {
        let payer = Pubkey::new_unique();
        let batch = build_swap_batch(&payer, &usdc(), &sol(), 5, vec![swap_ix(&payer)]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.instructions[1].program_id, spl_token::id());
    }

    #[test]
    fn test_token_pair_has_no_wrapping() {
        let payer = Pubkey::new_unique();
        let other = TokenInfo::new("GOFX", Pubkey::new_unique(), 9);
        let batch = build_swap_batch(&payer, &usdc(), &other, 5, vec![swap_ix(&payer)]).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_empty_swap_instructions_rejected() {
        let payer = Pubkey::new_unique();
        assert!(build_swap_batch(&payer, &usdc(), &sol(), 5, vec![]).is_err());
    }

    proptest! {
        #[test]
        fn prop_minimum_out_never_exceeds_bound(out in 0.0f64..1_000_000.0, slippage in 0.0f64..1.0, decimals in 0u8..10) {
            let min = minimum_amount_out(out, decimals, slippage);
            let bound = out * 10f64.powi(decimals as i32) * (1.0 - slippage);
            prop_assert!((min as f64) <= bound);
            prop_assert!(bound - (min as f64) < 1.0);
        }
    }
}
