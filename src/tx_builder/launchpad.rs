//! Launchpad mint instruction builders
//!
//! One parameterized pipeline covers the candy machine (`Standard`), the
//! magic hat (`Custom`) and the magic hat whitelist (`Whitelist`) mints.
//! Conditional accounts come from [`REMAINING_ACCOUNT_RULES`], evaluated in
//! table order.

use std::sync::Arc;

use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    system_program, sysvar,
};

use crate::address::{
    associated_token_address, candy_machine_creator, collection_authority_record, collection_pda,
    gateway_expire, gateway_token, magic_hat_creator, master_edition_address, metadata_address,
    CIVIC_GATEWAY_PROGRAM_ID, TOKEN_METADATA_PROGRAM_ID,
};
use crate::errors::{DappError, DappResult};
use crate::nonce::create_nonce_instructions;
use crate::tx_builder::batch::InstructionBatch;
use crate::tx_builder::instructions::anchor_instruction;
use crate::tx_builder::nft::{create_mint_instructions, mint_one_to};
use crate::types::{option_pubkey_string, pubkey_string};

/// Gatekeeper (captcha / identity) settings of a launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    #[serde(with = "pubkey_string")]
    pub gatekeeper_network: Pubkey,
    pub expire_on_use: bool,
}

/// Whitelist token settings of a launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistMintSettings {
    #[serde(with = "pubkey_string")]
    pub mint: Pubkey,
    pub burn_every_time: bool,
    pub presale: bool,
    pub discount_price: Option<u64>,
}

/// Snapshot of a launchpad (candy machine) account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchpadState {
    #[serde(with = "pubkey_string")]
    pub id: Pubkey,
    #[serde(with = "pubkey_string")]
    pub authority: Pubkey,
    pub items_available: u64,
    pub items_redeemed: u64,
    #[serde(with = "pubkey_string")]
    pub treasury: Pubkey,
    #[serde(default, with = "option_pubkey_string")]
    pub token_mint: Option<Pubkey>,
    /// Unix seconds; `None` means not scheduled
    pub go_live_date: Option<i64>,
    pub price: u64,
    #[serde(default)]
    pub gatekeeper: Option<GatekeeperConfig>,
    #[serde(default)]
    pub whitelist_mint_settings: Option<WhitelistMintSettings>,
    #[serde(default)]
    pub retain_authority: bool,
}

impl LaunchpadState {
    pub fn items_remaining(&self) -> u64 {
        self.items_available.saturating_sub(self.items_redeemed)
    }

    pub fn is_sold_out(&self) -> bool {
        self.items_remaining() == 0
    }

    pub fn is_live(&self, now: i64) -> bool {
        self.go_live_date.is_some_and(|t| t <= now)
    }

    /// Whitelist holders may mint before go-live
    pub fn is_presale(&self, now: i64) -> bool {
        !self.is_live(now) && self.whitelist_mint_settings.is_some_and(|w| w.presale)
    }

    /// Price the payer is charged, honouring a whitelist discount
    pub fn effective_price(&self, holds_whitelist_token: bool) -> u64 {
        match self.whitelist_mint_settings.and_then(|w| w.discount_price) {
            Some(discount) if holds_whitelist_token => discount,
            _ => self.price,
        }
    }
}

/// Which launch program and instruction a mint goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MintVariant {
    /// Candy machine `mint_nft`
    Standard,
    /// Magic hat `mint_nft`
    Custom { magic_hat: Pubkey },
    /// Magic hat `wl_mint_nft` against the payer's wallet-whitelist entry
    Whitelist { magic_hat: Pubkey, wallet_whitelist: Pubkey },
}

/// Program ids the launchpad builders target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchpadPrograms {
    pub candy_machine: Pubkey,
    pub magic_hat: Pubkey,
}

/// Accounts created ahead of the mint in a separate batch
pub struct SetupState {
    pub mint: Arc<Keypair>,
    pub token_account: Pubkey,
    pub nonce_account: Option<Arc<Keypair>>,
}

impl std::fmt::Debug for SetupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupState")
            .field("mint", &self.mint.pubkey())
            .field("token_account", &self.token_account)
            .field("nonce_account", &self.nonce_account.as_ref().map(|k| k.pubkey()))
            .finish()
    }
}

/// Decoded collection PDA account: 8-byte discriminator, mint, candy machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionPdaData {
    pub mint: Pubkey,
    pub candy_machine: Pubkey,
}

impl CollectionPdaData {
    pub fn parse(data: &[u8]) -> DappResult<Self> {
        if data.len() < 8 + 64 {
            return Err(DappError::validation(format!(
                "collection PDA account too short: {} bytes",
                data.len()
            )));
        }
        let key = |range: std::ops::Range<usize>| {
            Pubkey::try_from(&data[range]).map_err(|e| DappError::validation(e.to_string()))
        };
        Ok(Self {
            mint: key(8..40)?,
            candy_machine: key(40..72)?,
        })
    }
}

/// One conditional remaining-accounts rule
pub struct RemainingAccountRule {
    pub name: &'static str,
    pub applies: fn(&LaunchpadState) -> bool,
    pub accounts: fn(&LaunchpadState, &Pubkey) -> DappResult<Vec<AccountMeta>>,
}

/// Remaining-accounts rules in evaluation order
pub const REMAINING_ACCOUNT_RULES: &[RemainingAccountRule] = &[
    RemainingAccountRule {
        name: "gatekeeper",
        applies: has_gatekeeper,
        accounts: gatekeeper_accounts,
    },
    RemainingAccountRule {
        name: "gatekeeper_expire_on_use",
        applies: gatekeeper_expires_on_use,
        accounts: gatekeeper_expire_accounts,
    },
    RemainingAccountRule {
        name: "whitelist_token",
        applies: has_whitelist,
        accounts: whitelist_token_accounts,
    },
    RemainingAccountRule {
        name: "whitelist_burn_every_time",
        applies: whitelist_burns_every_time,
        accounts: whitelist_burn_accounts,
    },
    RemainingAccountRule {
        name: "payment_token",
        applies: has_payment_token,
        accounts: payment_token_accounts,
    },
];

fn has_gatekeeper(s: &LaunchpadState) -> bool {
    s.gatekeeper.is_some()
}

fn gatekeeper_expires_on_use(s: &LaunchpadState) -> bool {
    s.gatekeeper.is_some_and(|g| g.expire_on_use)
}

fn has_whitelist(s: &LaunchpadState) -> bool {
    s.whitelist_mint_settings.is_some()
}

fn whitelist_burns_every_time(s: &LaunchpadState) -> bool {
    s.whitelist_mint_settings.is_some_and(|w| w.burn_every_time)
}

fn has_payment_token(s: &LaunchpadState) -> bool {
    s.token_mint.is_some()
}

fn gatekeeper_accounts(s: &LaunchpadState, payer: &Pubkey) -> DappResult<Vec<AccountMeta>> {
    let gk = gatekeeper(s)?;
    Ok(vec![AccountMeta::new(gateway_token(payer, &gk.gatekeeper_network)?.0, false)])
}

fn gatekeeper_expire_accounts(s: &LaunchpadState, _payer: &Pubkey) -> DappResult<Vec<AccountMeta>> {
    let gk = gatekeeper(s)?;
    Ok(vec![
        AccountMeta::new_readonly(CIVIC_GATEWAY_PROGRAM_ID, false),
        AccountMeta::new_readonly(gateway_expire(&gk.gatekeeper_network)?.0, false),
    ])
}

fn whitelist_token_accounts(s: &LaunchpadState, payer: &Pubkey) -> DappResult<Vec<AccountMeta>> {
    let wl = whitelist(s)?;
    Ok(vec![AccountMeta::new(associated_token_address(payer, &wl.mint)?, false)])
}

fn whitelist_burn_accounts(s: &LaunchpadState, payer: &Pubkey) -> DappResult<Vec<AccountMeta>> {
    let wl = whitelist(s)?;
    Ok(vec![
        AccountMeta::new(wl.mint, false),
        AccountMeta::new_readonly(*payer, true),
    ])
}

fn payment_token_accounts(s: &LaunchpadState, payer: &Pubkey) -> DappResult<Vec<AccountMeta>> {
    let mint = s
        .token_mint
        .ok_or_else(|| DappError::internal("payment_token rule without token mint"))?;
    Ok(vec![
        AccountMeta::new(associated_token_address(payer, &mint)?, false),
        AccountMeta::new_readonly(*payer, true),
    ])
}

fn gatekeeper(state: &LaunchpadState) -> DappResult<GatekeeperConfig> {
    state
        .gatekeeper
        .ok_or_else(|| DappError::internal("gatekeeper rule without gatekeeper settings"))
}

fn whitelist(state: &LaunchpadState) -> DappResult<WhitelistMintSettings> {
    state
        .whitelist_mint_settings
        .ok_or_else(|| DappError::internal("whitelist rule without whitelist settings"))
}

/// Evaluate the rule table for `payer`
pub fn remaining_accounts(state: &LaunchpadState, payer: &Pubkey) -> DappResult<Vec<AccountMeta>> {
    let mut accounts = Vec::new();
    for rule in REMAINING_ACCOUNT_RULES.iter().filter(|r| (r.applies)(state)) {
        let metas = (rule.accounts)(state, payer)?;
        tracing::trace!(rule = rule.name, count = metas.len(), "remaining accounts rule applied");
        accounts.extend(metas);
    }
    Ok(accounts)
}

#[derive(BorshSerialize)]
struct CreatorBump(u8);

struct MintTarget {
    program: Pubkey,
    name: &'static str,
    accounts: Vec<AccountMeta>,
    bump: u8,
}

#[allow(deprecated)]
fn mint_target(
    state: &LaunchpadState,
    programs: &LaunchpadPrograms,
    variant: MintVariant,
    payer: &Pubkey,
    mint: &Pubkey,
) -> DappResult<MintTarget> {
    let metadata = metadata_address(mint)?;
    let master_edition = master_edition_address(mint)?;
    let tail = [
        AccountMeta::new_readonly(TOKEN_METADATA_PROGRAM_ID, false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(sysvar::rent::id(), false),
        AccountMeta::new_readonly(sysvar::clock::id(), false),
    ];

    let target = match variant {
        MintVariant::Standard => {
            let (creator, bump) = candy_machine_creator(&state.id, &programs.candy_machine)?;
            let mut accounts = vec![
                AccountMeta::new(state.id, false),
                AccountMeta::new_readonly(creator, false),
                AccountMeta::new(*payer, true),
                AccountMeta::new(state.treasury, false),
                AccountMeta::new(metadata, false),
                AccountMeta::new(*mint, false),
                AccountMeta::new_readonly(*payer, true),
                AccountMeta::new_readonly(*payer, true),
                AccountMeta::new(master_edition, false),
            ];
            accounts.extend(tail);
            accounts.push(AccountMeta::new_readonly(sysvar::slot_hashes::id(), false));
            accounts.push(AccountMeta::new_readonly(sysvar::instructions::id(), false));
            MintTarget { program: programs.candy_machine, name: "mint_nft", accounts, bump }
        }
        MintVariant::Custom { magic_hat } => {
            let (creator, bump) = magic_hat_creator(&magic_hat, &programs.magic_hat)?;
            let mut accounts = vec![
                AccountMeta::new(magic_hat, false),
                AccountMeta::new_readonly(creator, false),
                AccountMeta::new(*payer, true),
                AccountMeta::new(state.treasury, false),
                AccountMeta::new(metadata, false),
                AccountMeta::new(*mint, false),
                AccountMeta::new_readonly(*payer, true),
                AccountMeta::new_readonly(*payer, true),
                AccountMeta::new(master_edition, false),
            ];
            accounts.extend(tail);
            accounts.push(AccountMeta::new_readonly(sysvar::slot_hashes::id(), false));
            accounts.push(AccountMeta::new_readonly(sysvar::instructions::id(), false));
            MintTarget { program: programs.magic_hat, name: "mint_nft", accounts, bump }
        }
        MintVariant::Whitelist { magic_hat, wallet_whitelist } => {
            let (creator, bump) = magic_hat_creator(&magic_hat, &programs.magic_hat)?;
            let mut accounts = vec![
                AccountMeta::new(magic_hat, false),
                AccountMeta::new(wallet_whitelist, false),
                AccountMeta::new_readonly(creator, false),
                AccountMeta::new(*payer, true),
                AccountMeta::new(state.treasury, false),
                AccountMeta::new(metadata, false),
                AccountMeta::new(*mint, false),
                AccountMeta::new_readonly(*payer, true),
                AccountMeta::new_readonly(*payer, true),
                AccountMeta::new(master_edition, false),
            ];
            accounts.extend(tail);
            accounts.push(AccountMeta::new_readonly(sysvar::recent_blockhashes::id(), false));
            accounts.push(AccountMeta::new_readonly(sysvar::instructions::id(), false));
            MintTarget { program: programs.magic_hat, name: "wl_mint_nft", accounts, bump }
        }
    };
    Ok(target)
}

/// `set_collection_during_mint` for a retained-authority launch
pub fn set_collection_during_mint(
    state: &LaunchpadState,
    programs: &LaunchpadPrograms,
    payer: &Pubkey,
    mint: &Pubkey,
    collection: &CollectionPdaData,
) -> DappResult<Instruction> {
    let (pda, _) = collection_pda(&state.id, &programs.candy_machine)?;
    let accounts = vec![
        AccountMeta::new_readonly(state.id, false),
        AccountMeta::new(metadata_address(mint)?, false),
        AccountMeta::new_readonly(*payer, true),
        AccountMeta::new(pda, false),
        AccountMeta::new_readonly(TOKEN_METADATA_PROGRAM_ID, false),
        AccountMeta::new_readonly(sysvar::instructions::id(), false),
        AccountMeta::new_readonly(collection.mint, false),
        AccountMeta::new(metadata_address(&collection.mint)?, false),
        AccountMeta::new_readonly(master_edition_address(&collection.mint)?, false),
        AccountMeta::new_readonly(state.authority, false),
        AccountMeta::new_readonly(collection_authority_record(&collection.mint, &pda)?, false),
    ];
    anchor_instruction(programs.candy_machine, "set_collection_during_mint", &(), accounts)
}

/// Mint + token account (+ optional durable nonce account) creation batch
pub fn build_setup_batch(
    payer: &Pubkey,
    mint_rent: u64,
    nonce_rent: Option<u64>,
) -> DappResult<(InstructionBatch, SetupState)> {
    let mint = Arc::new(Keypair::new());
    let mint_key = mint.pubkey();
    let token_account = associated_token_address(payer, &mint_key)?;

    let mut batch = InstructionBatch::new("launchpad-setup", create_mint_instructions(payer, &mint_key, payer, mint_rent)?);
    batch.push(spl_associated_token_account::instruction::create_associated_token_account(
        payer,
        payer,
        &mint_key,
        &spl_token::id(),
    ));
    batch.push(mint_one_to(&mint_key, &token_account, payer)?);
    batch = batch.with_signer(mint.clone());

    let nonce_account = match nonce_rent {
        Some(lamports) => {
            let nonce = Arc::new(Keypair::new());
            batch.extend(create_nonce_instructions(payer, &nonce.pubkey(), payer, lamports));
            batch = batch.with_signer(nonce.clone());
            Some(nonce)
        }
        None => None,
    };

    Ok((
        batch,
        SetupState {
            mint,
            token_account,
            nonce_account,
        },
    ))
}

/// Inputs of one launchpad mint
pub struct LaunchpadMint<'a> {
    pub state: &'a LaunchpadState,
    pub programs: &'a LaunchpadPrograms,
    pub variant: MintVariant,
    pub payer: Pubkey,
    /// Accounts created by an earlier setup batch; otherwise they are created inline
    pub setup: Option<&'a SetupState>,
    /// Rent for an inline mint account
    pub mint_rent: u64,
    /// Decoded collection PDA when the account exists
    pub collection: Option<CollectionPdaData>,
}

/// Built mint batch plus the new asset's metadata account
#[derive(Debug)]
pub struct LaunchpadMintPlan {
    pub batch: InstructionBatch,
    pub mint: Pubkey,
    pub metadata: Pubkey,
}

/// Assemble the mint batch for any variant
pub fn build_mint_batch(params: LaunchpadMint<'_>) -> DappResult<LaunchpadMintPlan> {
    let payer = params.payer;
    let mut batch = InstructionBatch::new("launchpad-mint", vec![]);

    let mint_key = match params.setup {
        Some(setup) => setup.mint.pubkey(),
        None => {
            let mint = Arc::new(Keypair::new());
            let mint_key = mint.pubkey();
            let token_account = associated_token_address(&payer, &mint_key)?;
            batch.extend(create_mint_instructions(&payer, &mint_key, &payer, params.mint_rent)?);
            batch.push(spl_associated_token_account::instruction::create_associated_token_account(
                &payer,
                &payer,
                &mint_key,
                &spl_token::id(),
            ));
            batch.push(mint_one_to(&mint_key, &token_account, &payer)?);
            batch = batch.with_signer(mint);
            mint_key
        }
    };

    let target = mint_target(params.state, params.programs, params.variant, &payer, &mint_key)?;
    let mut accounts = target.accounts;
    accounts.extend(remaining_accounts(params.state, &payer)?);
    batch.push(anchor_instruction(target.program, target.name, &CreatorBump(target.bump), accounts)?);

    if params.state.retain_authority {
        if let Some(collection) = params.collection.as_ref() {
            batch.push(set_collection_during_mint(
                params.state,
                params.programs,
                &payer,
                &mint_key,
                collection,
            )?);
        }
    }

    Ok(LaunchpadMintPlan {
        batch,
        mint: mint_key,
        metadata: metadata_address(&mint_key)?,
    })
}
