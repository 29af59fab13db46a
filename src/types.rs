//! Common types used throughout the pipeline

use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};

use crate::errors::{DappError, DappResult};

/// Maximum metadata name length accepted by the token metadata program
pub const MAX_NAME_LENGTH: usize = 32;
/// Maximum metadata symbol length
pub const MAX_SYMBOL_LENGTH: usize = 10;
/// Maximum number of creators on one metadata account
pub const MAX_CREATOR_COUNT: usize = 5;
/// Royalties are expressed in basis points of the sale price
pub const MAX_SELLER_FEE_BASIS_POINTS: u16 = 10_000;

/// A file to be pinned to durable storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Playable media that belongs in `animation_url`
    pub fn is_animation(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("video/") || ct.starts_with("audio/") || ct == "text/html")
    }
}

/// Royalty share of one creator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorShare {
    #[serde(with = "pubkey_string")]
    pub address: Pubkey,
    pub share: u8,
}

/// Free-form attribute rendered into `metadata.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub trait_type: String,
    pub value: String,
}

/// User intent to create one on-chain asset
///
/// Built from form state; immutable once submitted.
#[derive(Debug, Clone)]
pub struct MintRequest {
    pub name: String,
    pub symbol: String,
    pub description: String,
    pub files: Vec<MediaFile>,
    pub seller_fee_basis_points: u16,
    pub creators: Vec<CreatorShare>,
    pub max_supply: Option<u64>,
    pub image: Option<String>,
    pub animation_url: Option<String>,
    pub external_url: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl MintRequest {
    /// Reject malformed requests before any network call
    pub fn validate(&self) -> DappResult<()> {
        if self.name.trim().is_empty() {
            return Err(DappError::validation("name must not be empty"));
        }
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(DappError::validation(format!(
                "name exceeds {} bytes",
                MAX_NAME_LENGTH
            )));
        }
        if self.symbol.len() > MAX_SYMBOL_LENGTH {
            return Err(DappError::validation(format!(
                "symbol exceeds {} bytes",
                MAX_SYMBOL_LENGTH
            )));
        }
        if self.files.is_empty() {
            return Err(DappError::validation("at least one media file is required"));
        }
        if let Some(file) = self.files.iter().find(|f| f.name.trim().is_empty()) {
            return Err(DappError::validation(format!(
                "media file of {} bytes has no name",
                file.size()
            )));
        }
        if self.seller_fee_basis_points > MAX_SELLER_FEE_BASIS_POINTS {
            return Err(DappError::validation(format!(
                "seller fee {} bps exceeds {}",
                self.seller_fee_basis_points, MAX_SELLER_FEE_BASIS_POINTS
            )));
        }
        if self.creators.len() > MAX_CREATOR_COUNT {
            return Err(DappError::validation(format!(
                "at most {} creators are allowed",
                MAX_CREATOR_COUNT
            )));
        }
        if !self.creators.is_empty() {
            let total: u32 = self.creators.iter().map(|c| c.share as u32).sum();
            if total != 100 {
                return Err(DappError::validation(format!(
                    "creator shares must sum to 100, got {}",
                    total
                )));
            }
        }
        Ok(())
    }

    /// Point `image` at the first media file and `animation_url` at the
    /// first video, audio or HTML file, unless already set. Names resolve
    /// against the upload manifest, like every file in `metadata.json`.
    pub fn with_media_defaults(mut self) -> Self {
        if self.image.is_none() {
            self.image = self.files.first().map(|f| f.name.clone());
        }
        if self.animation_url.is_none() {
            self.animation_url = self
                .files
                .iter()
                .find(|f| f.is_animation())
                .map(|f| f.name.clone());
        }
        self
    }

    /// Byte sizes of the media files, in order
    pub fn file_sizes(&self) -> Vec<u64> {
        self.files.iter().map(MediaFile::size).collect()
    }
}

/// Confirmation depth a submission waits for; ordered shallow to deep
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentLevel {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl CommitmentLevel {
    pub fn to_commitment_config(self) -> CommitmentConfig {
        match self {
            Self::Processed => CommitmentConfig::processed(),
            Self::Confirmed => CommitmentConfig::confirmed(),
            Self::Finalized => CommitmentConfig::finalized(),
        }
    }
}

impl std::str::FromStr for CommitmentLevel {
    type Err = DappError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "confirmed" | "singleGossip" => Ok(Self::Confirmed),
            "finalized" | "max" => Ok(Self::Finalized),
            other => Err(DappError::Configuration(format!(
                "unknown commitment level '{}'",
                other
            ))),
        }
    }
}

/// Outcome of one network submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
    pub signature: Signature,
    pub status: ConfirmationStatus,
    pub slot: u64,
}

/// Terminal confirmation state of a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Confirmed(CommitmentLevel),
    Failed(String),
}

impl ConfirmationStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Batch sequencing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceType {
    /// The first failing batch halts all later batches
    #[default]
    StopOnFailure,
    /// Failed batches are recorded and later batches still run
    ContinueOnFailure,
}

/// Phase transition reported by the submitter and orchestrators
///
/// Delivered over an unbounded channel so reporting never blocks the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The storage payment batch has confirmed
    FilesPaidFor { lamports: u64 },
    /// A batch has been assembled
    InstructionsBuilt { batch_index: usize },
    /// A batch has been signed by the wallet and all ephemeral keys
    Signed { batch_index: usize },
    /// A batch has been dispatched to the network
    Submitted { batch_index: usize, signature: Signature },
    /// A batch reached the requested commitment
    Confirmed { batch_index: usize, signature: Signature, slot: u64 },
    /// A batch failed and was skipped under `ContinueOnFailure`
    BatchFailed { batch_index: usize, reason: String },
    /// Files were accepted by the storage gateway
    Uploaded { manifest_id: String },
    /// Mint orchestrator progress counter
    MintProgress { phase: u8, step: u32 },
}

/// Token as seen by the swap UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    #[serde(with = "pubkey_string")]
    pub mint: Pubkey,
    pub decimals: u8,
}

impl TokenInfo {
    pub fn new(symbol: impl Into<String>, mint: Pubkey, decimals: u8) -> Self {
        Self {
            symbol: symbol.into(),
            mint,
            decimals,
        }
    }

    /// Whether this token is the wrapped representation of the native asset
    pub fn is_native(&self) -> bool {
        self.mint == spl_token::native_mint::id()
    }

    /// Convert a UI amount into base units, rounding to the nearest unit
    ///
    /// Decimal inputs such as `8.2` have no exact f64 form, so the scaled
    /// product lands a hair below the intended integer.
    pub fn to_base_units(&self, ui_amount: f64) -> u64 {
        (ui_amount * 10f64.powi(self.decimals as i32)).round() as u64
    }

    /// Convert base units into a UI amount
    pub fn to_ui_amount(&self, base_units: u64) -> f64 {
        base_units as f64 / 10f64.powi(self.decimals as i32)
    }
}

/// A priced estimate for exchanging one token for another
///
/// Superseded by the next quote; never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapQuote {
    pub input_amount: f64,
    pub output_amount: f64,
    pub price_impact: f64,
}

impl SwapQuote {
    pub fn zero() -> Self {
        Self {
            input_amount: 0.0,
            output_amount: 0.0,
            price_impact: 0.0,
        }
    }
}

/// Serde helper for base58 public keys
pub mod pubkey_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for optional base58 public keys
pub mod option_pubkey_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Option<Pubkey>, serializer: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(key) => serializer.serialize_some(&key.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Pubkey>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| Pubkey::from_str(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MintRequest {
        MintRequest {
            name: "Art1".to_string(),
            symbol: "ART".to_string(),
            description: "first piece".to_string(),
            files: vec![MediaFile::new("art.png", vec![7u8; 1200])],
            seller_fee_basis_points: 500,
            creators: vec![],
            max_supply: Some(1),
            image: None,
            animation_url: None,
            external_url: None,
            attributes: vec![],
        }
    }

    #[test]
    fn test_valid_request_passes() {
        assert!(request().validate().is_ok());
        assert_eq!(request().file_sizes(), vec![1200]);
    }

    #[test]
    fn test_request_validation_rejects_malformed_input() {
        let mut r = request();
        r.name = "  ".to_string();
        assert!(matches!(r.validate(), Err(DappError::Validation(_))));

        let mut r = request();
        r.files.clear();
        assert!(matches!(r.validate(), Err(DappError::Validation(_))));

        let mut r = request();
        r.seller_fee_basis_points = 10_001;
        assert!(r.validate().is_err());

        let mut r = request();
        r.creators = vec![
            CreatorShare { address: Pubkey::new_unique(), share: 60 },
            CreatorShare { address: Pubkey::new_unique(), share: 30 },
        ];
        let err = r.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 100"));
    }

    #[test]
    fn test_commitment_parsing_accepts_legacy_names() {
        assert_eq!("singleGossip".parse::<CommitmentLevel>().unwrap(), CommitmentLevel::Confirmed);
        assert_eq!("max".parse::<CommitmentLevel>().unwrap(), CommitmentLevel::Finalized);
        assert!("eventually".parse::<CommitmentLevel>().is_err());
    }

    #[test]
    fn test_token_unit_conversion() {
        let usdc = TokenInfo::new("USDC", Pubkey::new_unique(), 6);
        assert_eq!(usdc.to_base_units(1.2345678), 1_234_568);
        assert_eq!(usdc.to_base_units(-3.0), 0);
        assert_eq!(usdc.to_ui_amount(2_500_000), 2.5);
        assert!(!usdc.is_native());
        assert!(TokenInfo::new("SOL", spl_token::native_mint::id(), 9).is_native());
    }

    #[test]
    fn test_media_defaults_fill_image_and_animation() {
        let mut req = request();
        req.files = vec![
            MediaFile::new("cover.png", vec![1; 10]).with_content_type("image/png"),
            MediaFile::new("clip.mp4", vec![2; 10]).with_content_type("video/mp4"),
        ];
        let req = req.with_media_defaults();
        assert_eq!(req.image.as_deref(), Some("cover.png"));
        assert_eq!(req.animation_url.as_deref(), Some("clip.mp4"));

        let still = request().with_media_defaults();
        assert_eq!(still.image.as_deref(), Some("art.png"));
        assert_eq!(still.animation_url, None);

        let mut preset = request();
        preset.image = Some("https://example.org/a.png".to_string());
        assert_eq!(preset.with_media_defaults().image.as_deref(), Some("https://example.org/a.png"));
    }

    #[test]
    fn test_decimal_amounts_keep_their_last_unit() {
        let usdc = TokenInfo::new("USDC", Pubkey::new_unique(), 6);
        let sol = TokenInfo::new("SOL", spl_token::native_mint::id(), 9);
        assert_eq!(usdc.to_base_units(8.2), 8_200_000);
        assert_eq!(usdc.to_base_units(0.29), 290_000);
        assert_eq!(sol.to_base_units(1.005), 1_005_000_000);
        assert_eq!(sol.to_base_units(0.1), 100_000_000);
    }
}
