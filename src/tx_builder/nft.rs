//! Mint pipeline phase builders
//!
//! Phase 0 pays for storage and creates the mint, its token account and a
//! metadata account pointing at a placeholder URI. Phase 2 patches the
//! metadata with the final URI, mints the single token and creates the master
//! edition. Phase 2 depends only on the mint address and the manifest id, so
//! it can be rebuilt and resubmitted after a partial mint.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::Instruction,
    program_pack::Pack,
    pubkey::Pubkey,
    signature::Keypair,
    signer::Signer,
    system_instruction,
};

use crate::address::{associated_token_address, metadata_address, STORAGE_FEE_HOLDER};
use crate::errors::{DappError, DappResult};
use crate::tx_builder::batch::InstructionBatch;
use crate::tx_builder::instructions::memo_instruction;
use crate::tx_builder::metadata::{create_master_edition_v3, create_metadata_v3, update_metadata_v2, MetadataData};
use crate::types::{Attribute, CreatorShare, MediaFile, MintRequest};

/// Reserved name of the generated metadata document
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Width of the placeholder URI written in phase 0
pub const PLACEHOLDER_URI_LEN: usize = 64;

#[derive(Serialize)]
struct MetadataProperties<'a> {
    creators: &'a [CreatorShare],
}

#[derive(Serialize)]
struct MetadataJson<'a> {
    name: &'a str,
    symbol: &'a str,
    description: &'a str,
    seller_fee_basis_points: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    animation_url: Option<&'a str>,
    attributes: &'a [Attribute],
    #[serde(skip_serializing_if = "Option::is_none")]
    external_url: Option<&'a str>,
    properties: MetadataProperties<'a>,
}

/// Render the off-chain `metadata.json` document
pub fn metadata_json(request: &MintRequest) -> DappResult<Vec<u8>> {
    let doc = MetadataJson {
        name: &request.name,
        symbol: &request.symbol,
        description: &request.description,
        seller_fee_basis_points: request.seller_fee_basis_points,
        image: request.image.as_deref(),
        animation_url: request.animation_url.as_deref(),
        attributes: &request.attributes,
        external_url: request.external_url.as_deref(),
        properties: MetadataProperties {
            creators: &request.creators,
        },
    };
    serde_json::to_vec(&doc).map_err(|e| DappError::internal(format!("metadata.json: {}", e)))
}

/// Media files followed by the generated metadata document
pub fn upload_file_set(request: &MintRequest) -> DappResult<Vec<MediaFile>> {
    if request.files.iter().any(|f| f.name == METADATA_FILE_NAME) {
        return Err(DappError::validation(format!(
            "'{}' is a reserved file name",
            METADATA_FILE_NAME
        )));
    }
    let mut files = request.files.clone();
    files.push(
        MediaFile::new(METADATA_FILE_NAME, metadata_json(request)?).with_content_type("application/json"),
    );
    Ok(files)
}

/// Lowercase hex SHA-256 of a file's bytes
pub fn file_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Storage fee transfer followed by one digest memo per file
pub fn pay_for_storage_instructions(payer: &Pubkey, lamports: u64, files: &[MediaFile]) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(files.len() + 1);
    instructions.push(system_instruction::transfer(payer, &STORAGE_FEE_HOLDER, lamports));
    instructions.extend(files.iter().map(|f| memo_instruction(&file_digest(&f.bytes))));
    instructions
}

/// Addresses fixed once phase 0 is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintAddresses {
    pub mint: Pubkey,
    pub token_account: Pubkey,
    pub metadata: Pubkey,
}

impl MintAddresses {
    pub fn derive(payer: &Pubkey, mint: &Pubkey) -> DappResult<Self> {
        Ok(Self {
            mint: *mint,
            token_account: associated_token_address(payer, mint)?,
            metadata: metadata_address(mint)?,
        })
    }
}

/// Create + initialize a 0-decimal mint with `authority` as mint and freeze authority
pub fn create_mint_instructions(
    payer: &Pubkey,
    mint: &Pubkey,
    authority: &Pubkey,
    rent_lamports: u64,
) -> DappResult<Vec<Instruction>> {
    let init = spl_token::instruction::initialize_mint(&spl_token::id(), mint, authority, Some(authority), 0)
        .map_err(|e| DappError::instruction_failed("spl_token", e.to_string()))?;
    Ok(vec![
        system_instruction::create_account(
            payer,
            mint,
            rent_lamports,
            spl_token::state::Mint::LEN as u64,
            &spl_token::id(),
        ),
        init,
    ])
}

pub fn mint_one_to(mint: &Pubkey, token_account: &Pubkey, authority: &Pubkey) -> DappResult<Instruction> {
    spl_token::instruction::mint_to(&spl_token::id(), mint, token_account, authority, &[], 1)
        .map_err(|e| DappError::instruction_failed("spl_token", e.to_string()))
}

fn metadata_data(request: &MintRequest, uri: String) -> MetadataData {
    MetadataData {
        name: request.name.clone(),
        symbol: request.symbol.clone(),
        uri,
        seller_fee_basis_points: request.seller_fee_basis_points,
        creators: request.creators.clone(),
    }
}

/// Phase 0 batch: pay for storage, create the mint and placeholder metadata
///
/// `mint` is the ephemeral mint keypair; it co-signs the batch.
pub fn build_pay_and_create_batch(
    payer: &Pubkey,
    request: &MintRequest,
    files: &[MediaFile],
    storage_lamports: u64,
    mint_rent: u64,
    mint: Arc<Keypair>,
) -> DappResult<(InstructionBatch, MintAddresses)> {
    let mint_key = mint.pubkey();
    let addresses = MintAddresses::derive(payer, &mint_key)?;

    let mut batch = InstructionBatch::new("pay-and-create", pay_for_storage_instructions(payer, storage_lamports, files));
    batch.extend(create_mint_instructions(payer, &mint_key, payer, mint_rent)?);
    batch.push(spl_associated_token_account::instruction::create_associated_token_account(
        payer,
        payer,
        &mint_key,
        &spl_token::id(),
    ));
    batch.push(create_metadata_v3(
        &metadata_data(request, " ".repeat(PLACEHOLDER_URI_LEN)),
        &mint_key,
        payer,
        payer,
        payer,
    )?);

    Ok((batch.with_signer(mint), addresses))
}

/// Phase 2 batch: final URI, single token mint, master edition
pub fn build_metadata_patch_batch(
    payer: &Pubkey,
    request: &MintRequest,
    mint: &Pubkey,
    uri: &str,
) -> DappResult<InstructionBatch> {
    let addresses = MintAddresses::derive(payer, mint)?;
    Ok(InstructionBatch::new(
        "metadata-patch",
        vec![
            update_metadata_v2(&metadata_data(request, uri.to_string()), mint, payer)?,
            mint_one_to(mint, &addresses.token_account, payer)?,
            create_master_edition_v3(mint, payer, payer, payer, request.max_supply)?,
        ],
    ))
}
