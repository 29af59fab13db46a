//! Token metadata program encoders
//!
//! Borsh layouts of the three instructions the mint pipeline issues. Keys are
//! carried as raw `[u8; 32]` so the wire structs stay independent of the SDK's
//! serialization features.

use borsh::BorshSerialize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program, sysvar,
};

use crate::address::{master_edition_address, metadata_address, TOKEN_METADATA_PROGRAM_ID};
use crate::errors::{DappError, DappResult};
use crate::types::{CreatorShare, MAX_CREATOR_COUNT, MAX_NAME_LENGTH, MAX_SYMBOL_LENGTH};

/// Longest URI the metadata account stores
pub const MAX_URI_LENGTH: usize = 200;

const CREATE_METADATA_ACCOUNT_V3: u8 = 33;
const UPDATE_METADATA_ACCOUNT_V2: u8 = 15;
const CREATE_MASTER_EDITION_V3: u8 = 17;

#[derive(BorshSerialize, Debug, Clone, PartialEq)]
struct CreatorWire {
    address: [u8; 32],
    verified: bool,
    share: u8,
}

#[derive(BorshSerialize, Debug, Clone, PartialEq)]
struct CollectionWire {
    verified: bool,
    key: [u8; 32],
}

#[derive(BorshSerialize, Debug, Clone, PartialEq)]
struct UsesWire {
    use_method: u8,
    remaining: u64,
    total: u64,
}

#[derive(BorshSerialize, Debug, Clone, PartialEq)]
struct DataV2Wire {
    name: String,
    symbol: String,
    uri: String,
    seller_fee_basis_points: u16,
    creators: Option<Vec<CreatorWire>>,
    collection: Option<CollectionWire>,
    uses: Option<UsesWire>,
}

#[derive(BorshSerialize)]
struct CreateMetadataAccountArgsV3 {
    data: DataV2Wire,
    is_mutable: bool,
    collection_details: Option<u8>,
}

#[derive(BorshSerialize)]
struct UpdateMetadataAccountArgsV2 {
    data: Option<DataV2Wire>,
    update_authority: Option<[u8; 32]>,
    primary_sale_happened: Option<bool>,
    is_mutable: Option<bool>,
}

#[derive(BorshSerialize)]
struct CreateMasterEditionArgs {
    max_supply: Option<u64>,
}

/// On-chain metadata content of one asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataData {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub creators: Vec<CreatorShare>,
}

impl MetadataData {
    pub fn validate(&self) -> DappResult<()> {
        let fail = |reason: String| Err(DappError::instruction_failed("token_metadata", reason));
        if self.name.len() > MAX_NAME_LENGTH {
            return fail(format!("name longer than {} bytes", MAX_NAME_LENGTH));
        }
        if self.symbol.len() > MAX_SYMBOL_LENGTH {
            return fail(format!("symbol longer than {} bytes", MAX_SYMBOL_LENGTH));
        }
        if self.uri.len() > MAX_URI_LENGTH {
            return fail(format!("uri longer than {} bytes", MAX_URI_LENGTH));
        }
        if self.creators.len() > MAX_CREATOR_COUNT {
            return fail(format!("more than {} creators", MAX_CREATOR_COUNT));
        }
        Ok(())
    }

    /// A creator is verified iff it is the signing update authority
    fn to_wire(&self, signer: &Pubkey) -> DataV2Wire {
        let creators = if self.creators.is_empty() {
            None
        } else {
            Some(
                self.creators
                    .iter()
                    .map(|c| CreatorWire {
                        address: c.address.to_bytes(),
                        verified: c.address == *signer,
                        share: c.share,
                    })
                    .collect(),
            )
        };
        DataV2Wire {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            uri: self.uri.clone(),
            seller_fee_basis_points: self.seller_fee_basis_points,
            creators,
            collection: None,
            uses: None,
        }
    }
}

fn encode<T: BorshSerialize>(discriminator: u8, args: &T) -> DappResult<Vec<u8>> {
    let mut data = vec![discriminator];
    args.serialize(&mut data)
        .map_err(|e| DappError::instruction_failed("token_metadata", e.to_string()))?;
    Ok(data)
}

/// `CreateMetadataAccountV3`; payer doubles as mint and update authority
pub fn create_metadata_v3(
    data: &MetadataData,
    mint: &Pubkey,
    mint_authority: &Pubkey,
    payer: &Pubkey,
    update_authority: &Pubkey,
) -> DappResult<Instruction> {
    data.validate()?;
    let metadata = metadata_address(mint)?;
    let args = CreateMetadataAccountArgsV3 {
        data: data.to_wire(update_authority),
        is_mutable: true,
        collection_details: None,
    };
    Ok(Instruction {
        program_id: TOKEN_METADATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(metadata, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(*mint_authority, true),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(*update_authority, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
        data: encode(CREATE_METADATA_ACCOUNT_V3, &args)?,
    })
}

/// `UpdateMetadataAccountV2` replacing the data wholesale
pub fn update_metadata_v2(
    data: &MetadataData,
    mint: &Pubkey,
    update_authority: &Pubkey,
) -> DappResult<Instruction> {
    data.validate()?;
    let metadata = metadata_address(mint)?;
    let args = UpdateMetadataAccountArgsV2 {
        data: Some(data.to_wire(update_authority)),
        update_authority: None,
        primary_sale_happened: None,
        is_mutable: None,
    };
    Ok(Instruction {
        program_id: TOKEN_METADATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(metadata, false),
            AccountMeta::new_readonly(*update_authority, true),
        ],
        data: encode(UPDATE_METADATA_ACCOUNT_V2, &args)?,
    })
}

/// `CreateMasterEditionV3`; `None` supply means unlimited prints
pub fn create_master_edition_v3(
    mint: &Pubkey,
    update_authority: &Pubkey,
    mint_authority: &Pubkey,
    payer: &Pubkey,
    max_supply: Option<u64>,
) -> DappResult<Instruction> {
    let edition = master_edition_address(mint)?;
    let metadata = metadata_address(mint)?;
    Ok(Instruction {
        program_id: TOKEN_METADATA_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(edition, false),
            AccountMeta::new(*mint, false),
            AccountMeta::new_readonly(*update_authority, true),
            AccountMeta::new_readonly(*mint_authority, true),
            AccountMeta::new(*payer, true),
            AccountMeta::new(metadata, false),
            AccountMeta::new_readonly(spl_token::id(), false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
        data: encode(CREATE_MASTER_EDITION_V3, &CreateMasterEditionArgs { max_supply })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(uri: &str) -> MetadataData {
        MetadataData {
            name: "Art1".to_string(),
            symbol: "ART".to_string(),
            uri: uri.to_string(),
            seller_fee_basis_points: 500,
            creators: vec![],
        }
    }

    #[test]
    fn test_create_metadata_layout() {
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let ix = create_metadata_v3(&data(&" ".repeat(64)), &mint, &payer, &payer, &payer).unwrap();

        assert_eq!(ix.program_id, TOKEN_METADATA_PROGRAM_ID);
        assert_eq!(ix.data[0], CREATE_METADATA_ACCOUNT_V3);
        assert_eq!(ix.accounts[0].pubkey, metadata_address(&mint).unwrap());
        // name: u32 len + bytes
        assert_eq!(&ix.data[1..5], &4u32.to_le_bytes());
        assert_eq!(&ix.data[5..9], b"Art1");
    }

    #[test]
    fn test_update_metadata_carries_uri() {
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let uri = "https://arweave.net/abc";
        let ix = update_metadata_v2(&data(uri), &mint, &payer).unwrap();
        assert_eq!(ix.data[0], UPDATE_METADATA_ACCOUNT_V2);
        // Option tag for data
        assert_eq!(ix.data[1], 1);
        let haystack = ix.data.windows(uri.len()).any(|w| w == uri.as_bytes());
        assert!(haystack);
        assert_eq!(ix.accounts.len(), 2);
        assert!(ix.accounts[1].is_signer);
    }

    #[test]
    fn test_creator_verified_only_for_signer() {
        let payer = Pubkey::new_unique();
        let other = Pubkey::new_unique();
        let mut d = data("u");
        d.creators = vec![
            CreatorShare { address: payer, share: 50 },
            CreatorShare { address: other, share: 50 },
        ];
        let wire = d.to_wire(&payer);
        let creators = wire.creators.unwrap();
        assert!(creators[0].verified);
        assert!(!creators[1].verified);
    }

    #[test]
    fn test_master_edition_supply_encoding() {
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let limited = create_master_edition_v3(&mint, &payer, &payer, &payer, Some(1)).unwrap();
        assert_eq!(limited.data, vec![CREATE_MASTER_EDITION_V3, 1, 1, 0, 0, 0, 0, 0, 0, 0]);
        let open = create_master_edition_v3(&mint, &payer, &payer, &payer, None).unwrap();
        assert_eq!(open.data, vec![CREATE_MASTER_EDITION_V3, 0]);
    }

    #[test]
    fn test_overlong_uri_rejected() {
        let payer = Pubkey::new_unique();
        let err = update_metadata_v2(&data(&"x".repeat(201)), &Pubkey::new_unique(), &payer).unwrap_err();
        assert!(matches!(err, DappError::InstructionBuild { .. }));
    }
}
