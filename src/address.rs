//! Program-derived address derivation
//!
//! Pure, deterministic functions mapping seeds and owner programs to
//! addresses. All derivations go through [`derive`], which runs the
//! network's iterative bump search (bump 255 downwards until the candidate
//! falls off the ed25519 curve).

use crate::errors::{DappError, DappResult};
use solana_sdk::{pubkey, pubkey::Pubkey};

/// Token metadata program
pub const TOKEN_METADATA_PROGRAM_ID: Pubkey = pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");

/// SPL memo program
pub const MEMO_PROGRAM_ID: Pubkey = pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// Account that collects storage fees before the gateway uploads files
pub const STORAGE_FEE_HOLDER: Pubkey = pubkey!("HvwC9QSAzvGXhhVrgPmauVwFWcYZhne3hVot9EbHuFTm");

/// Candy machine v2 program
pub const CANDY_MACHINE_PROGRAM_ID: Pubkey = pubkey!("cndy3Z4yapfJBmL3ShUp5exZKqR3z33thTzeNMm2gRZ");

/// Civic gateway program (gatekeeper tokens)
pub const CIVIC_GATEWAY_PROGRAM_ID: Pubkey = pubkey!("gatem74V238djXdzWnJf94Wo1DcnuGkfijbf3AuBhfs");

const METADATA_SEED: &[u8] = b"metadata";
const EDITION_SEED: &[u8] = b"edition";
const COLLECTION_AUTHORITY_SEED: &[u8] = b"collection_authority";
const CANDY_MACHINE_SEED: &[u8] = b"candy_machine";
const COLLECTION_SEED: &[u8] = b"collection";
const MAGIC_HAT_SEED: &[u8] = b"magic_hat";
const GATEWAY_SEED: &[u8] = b"gateway";
const EXPIRE_SEED: &[u8] = b"expire";
const SWAP_PAIR_SEED: &[u8] = b"GFX-SSL-Pair";

/// Derive a program address from ordered seeds
///
/// Returns the address and its bump seed. Exhausting the bump space is
/// reported as `AddressDerivation`; it is unreachable for real seed sets.
pub fn derive(seeds: &[&[u8]], owner_program: &Pubkey) -> DappResult<(Pubkey, u8)> {
    Pubkey::try_find_program_address(seeds, owner_program).ok_or_else(|| {
        DappError::AddressDerivation(format!(
            "no viable bump for {} seeds under program {}",
            seeds.len(),
            owner_program
        ))
    })
}

/// Metadata account of a mint
pub fn metadata_address(mint: &Pubkey) -> DappResult<Pubkey> {
    derive(
        &[METADATA_SEED, TOKEN_METADATA_PROGRAM_ID.as_ref(), mint.as_ref()],
        &TOKEN_METADATA_PROGRAM_ID,
    )
    .map(|(address, _)| address)
}

/// Master edition account of a mint
pub fn master_edition_address(mint: &Pubkey) -> DappResult<Pubkey> {
    derive(
        &[
            METADATA_SEED,
            TOKEN_METADATA_PROGRAM_ID.as_ref(),
            mint.as_ref(),
            EDITION_SEED,
        ],
        &TOKEN_METADATA_PROGRAM_ID,
    )
    .map(|(address, _)| address)
}

/// Collection authority record for a delegated collection authority
pub fn collection_authority_record(mint: &Pubkey, new_authority: &Pubkey) -> DappResult<Pubkey> {
    derive(
        &[
            METADATA_SEED,
            TOKEN_METADATA_PROGRAM_ID.as_ref(),
            mint.as_ref(),
            COLLECTION_AUTHORITY_SEED,
            new_authority.as_ref(),
        ],
        &TOKEN_METADATA_PROGRAM_ID,
    )
    .map(|(address, _)| address)
}

/// Associated token account of `wallet` for `mint` under the classic token program
pub fn associated_token_address(wallet: &Pubkey, mint: &Pubkey) -> DappResult<Pubkey> {
    derive(
        &[wallet.as_ref(), spl_token::id().as_ref(), mint.as_ref()],
        &spl_associated_token_account::id(),
    )
    .map(|(address, _)| address)
}

/// Creator PDA a candy machine signs metadata with
pub fn candy_machine_creator(candy_machine: &Pubkey, program: &Pubkey) -> DappResult<(Pubkey, u8)> {
    derive(&[CANDY_MACHINE_SEED, candy_machine.as_ref()], program)
}

/// Collection PDA holding the collection mint of a candy machine
pub fn collection_pda(candy_machine: &Pubkey, program: &Pubkey) -> DappResult<(Pubkey, u8)> {
    derive(&[COLLECTION_SEED, candy_machine.as_ref()], program)
}

/// Creator PDA of a magic-hat launch
pub fn magic_hat_creator(magic_hat: &Pubkey, program: &Pubkey) -> DappResult<(Pubkey, u8)> {
    derive(&[MAGIC_HAT_SEED, magic_hat.as_ref()], program)
}

/// Per-wallet whitelist entry of a magic-hat launch
pub fn wallet_whitelist(
    seed: &str,
    payer: &Pubkey,
    creator: &Pubkey,
    program: &Pubkey,
) -> DappResult<(Pubkey, u8)> {
    derive(&[seed.as_bytes(), payer.as_ref(), creator.as_ref()], program)
}

/// Gateway token a gatekeeper network issued to `wallet`
pub fn gateway_token(wallet: &Pubkey, gatekeeper_network: &Pubkey) -> DappResult<(Pubkey, u8)> {
    derive(
        &[
            wallet.as_ref(),
            GATEWAY_SEED,
            &[0u8; 8],
            gatekeeper_network.as_ref(),
        ],
        &CIVIC_GATEWAY_PROGRAM_ID,
    )
}

/// Expiry account of a gatekeeper network
pub fn gateway_expire(gatekeeper_network: &Pubkey) -> DappResult<(Pubkey, u8)> {
    derive(
        &[gatekeeper_network.as_ref(), EXPIRE_SEED],
        &CIVIC_GATEWAY_PROGRAM_ID,
    )
}

/// Swap pair account; mint order does not matter
pub fn swap_pair(
    controller: &Pubkey,
    mint_a: &Pubkey,
    mint_b: &Pubkey,
    program: &Pubkey,
) -> DappResult<(Pubkey, u8)> {
    let (first, second) = if mint_a.as_ref() <= mint_b.as_ref() {
        (mint_a, mint_b)
    } else {
        (mint_b, mint_a)
    };
    derive(
        &[
            SWAP_PAIR_SEED,
            controller.as_ref(),
            first.as_ref(),
            second.as_ref(),
        ],
        program,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    #[test]
    fn test_derive_matches_sdk_search() {
        let mint = Pubkey::new_unique();
        let seeds: &[&[u8]] = &[METADATA_SEED, TOKEN_METADATA_PROGRAM_ID.as_ref(), mint.as_ref()];
        let (address, bump) = derive(seeds, &TOKEN_METADATA_PROGRAM_ID).unwrap();
        let (expected, expected_bump) = Pubkey::find_program_address(seeds, &TOKEN_METADATA_PROGRAM_ID);
        assert_eq!(address, expected);
        assert_eq!(bump, expected_bump);
    }

    #[test]
    fn test_associated_token_address_matches_spl() {
        let wallet = Pubkey::new_unique();
        let mint = spl_token::native_mint::id();
        assert_eq!(
            associated_token_address(&wallet, &mint).unwrap(),
            spl_associated_token_account::get_associated_token_address(&wallet, &mint)
        );
    }

    #[test]
    fn test_known_program_ids_parse() {
        assert_eq!(
            TOKEN_METADATA_PROGRAM_ID,
            Pubkey::from_str("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s").unwrap()
        );
        assert_ne!(MEMO_PROGRAM_ID, STORAGE_FEE_HOLDER);
    }

    #[test]
    fn test_metadata_and_edition_differ() {
        let mint = Pubkey::new_unique();
        assert_ne!(
            metadata_address(&mint).unwrap(),
            master_edition_address(&mint).unwrap()
        );
    }

    #[test]
    fn test_swap_pair_is_order_independent() {
        let controller = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        assert_eq!(
            swap_pair(&controller, &a, &b, &program).unwrap(),
            swap_pair(&controller, &b, &a, &program).unwrap()
        );
    }

    proptest! {
        #[test]
        fn prop_derive_is_deterministic(seed in proptest::collection::vec(any::<u8>(), 0..32), key in any::<[u8; 32]>()) {
            let program = Pubkey::new_from_array(key);
            let first = derive(&[seed.as_slice()], &program).unwrap();
            let second = derive(&[seed.as_slice()], &program).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
