//! Configuration module
//!
//! Loads `config.toml`, applies `DAPP_*` environment overrides and turns
//! the raw sections into the settings structs each pipeline takes.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;

use crate::address::CANDY_MACHINE_PROGRAM_ID;
use crate::errors::{DappError, DappResult};
use crate::launchpad::{LaunchpadSettings, WhitelistSettings};
use crate::mint::MintSettings;
use crate::retry::RetryConfig;
use crate::rpc::confirm::ConfirmOptions;
use crate::storage::LinearPricer;
use crate::submitter::SubmitOptions;
use crate::swap::SwapSettings;
use crate::tx_builder::launchpad::LaunchpadPrograms;
use crate::types::CommitmentLevel;

pub const ENV_RPC_URL: &str = "DAPP_RPC_URL";
pub const ENV_KEYPAIR_PATH: &str = "DAPP_KEYPAIR_PATH";
pub const ENV_STORAGE_URL: &str = "DAPP_STORAGE_URL";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpc: RpcConfig,
    pub wallet: WalletConfig,
    pub storage: StorageConfig,
    pub swap: SwapConfig,
    pub launchpad: LaunchpadConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub url: String,

    /// Depth every submission waits for
    pub commitment: CommitmentLevel,

    /// Give up waiting for a confirmation after this long
    pub confirm_timeout_ms: u64,

    pub poll_interval_ms: u64,

    /// Backoff for blockhash fetches and raw sends
    pub send_retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Path to keypair file
    pub keypair_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Multipart upload endpoint
    pub gateway_url: String,

    /// Network name sent with every upload
    pub env: String,

    pub upload_timeout_secs: u64,

    pub lamports_per_byte: f64,
    pub per_file_overhead_bytes: u64,
    pub minimum_lamports: u64,

    /// Base of final metadata URIs
    pub arweave_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    /// Fraction in `[0, 1)`
    pub default_slippage: f64,

    /// Quote / swap-instructions service
    pub api_url: String,

    /// Per-request timeout of the quote service
    pub request_timeout_secs: u64,

    /// Swap program and pair controller
    pub program_id: Option<String>,
    pub controller: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchpadConfig {
    pub candy_machine_program: String,
    pub magic_hat_program: Option<String>,
    pub magic_hat_creator: Option<String>,
    pub whitelist_seed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    pub enable_metrics: bool,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "https://api.mainnet-beta.solana.com".to_string(),
            commitment: CommitmentLevel::Confirmed,
            confirm_timeout_ms: 60_000,
            poll_interval_ms: 2_000,
            send_retry: RetryConfig::default(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: "~/.config/solana/id.json".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let pricer = LinearPricer::default();
        Self {
            gateway_url: "https://us-central1-metaplex-studios.cloudfunctions.net/uploadFile".to_string(),
            env: "mainnet-beta".to_string(),
            upload_timeout_secs: 120,
            lamports_per_byte: pricer.lamports_per_byte,
            per_file_overhead_bytes: pricer.per_file_overhead_bytes,
            minimum_lamports: pricer.minimum_lamports,
            arweave_base_url: "https://arweave.net".to_string(),
        }
    }
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            default_slippage: 0.01,
            api_url: "https://lite-api.jup.ag/swap/v1".to_string(),
            request_timeout_secs: 15,
            program_id: None,
            controller: None,
        }
    }
}

impl Default for LaunchpadConfig {
    fn default() -> Self {
        Self {
            candy_machine_program: CANDY_MACHINE_PROGRAM_ID.to_string(),
            magic_hat_program: None,
            magic_hat_creator: None,
            whitelist_seed: "whitelist".to_string(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { enable_metrics: true }
    }
}

fn parse_pubkey(field: &str, value: &str) -> DappResult<Pubkey> {
    Pubkey::from_str(value).map_err(|e| DappError::Configuration(format!("{}: invalid pubkey '{}': {}", field, value, e)))
}

fn parse_optional(field: &str, value: &Option<String>) -> DappResult<Option<Pubkey>> {
    value.as_deref().map(|v| parse_pubkey(field, v)).transpose()
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with `.env` and `DAPP_*` environment overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields from `lookup`; empty values are ignored
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = get(ENV_RPC_URL) {
            self.rpc.url = url;
        }
        if let Some(path) = get(ENV_KEYPAIR_PATH) {
            self.wallet.keypair_path = path;
        }
        if let Some(url) = get(ENV_STORAGE_URL) {
            self.storage.gateway_url = url;
        }
    }

    /// Reject values no pipeline can run with
    pub fn validate(&self) -> DappResult<()> {
        let bad = |msg: String| Err(DappError::Configuration(msg));

        if self.rpc.url.is_empty() {
            return bad("rpc.url is empty".into());
        }
        if self.rpc.poll_interval_ms == 0 {
            return bad("rpc.poll_interval_ms must be positive".into());
        }
        if self.rpc.confirm_timeout_ms < self.rpc.poll_interval_ms {
            return bad(format!(
                "rpc.confirm_timeout_ms ({}) is shorter than one poll interval ({})",
                self.rpc.confirm_timeout_ms, self.rpc.poll_interval_ms
            ));
        }
        if self.rpc.send_retry.max_attempts == 0 {
            return bad("rpc.send_retry.max_attempts must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.rpc.send_retry.jitter_factor) {
            return bad("rpc.send_retry.jitter_factor must be within [0, 1]".into());
        }
        if self.storage.gateway_url.is_empty() {
            return bad("storage.gateway_url is empty".into());
        }
        if !self.storage.lamports_per_byte.is_finite() || self.storage.lamports_per_byte < 0.0 {
            return bad(format!("storage.lamports_per_byte {} is invalid", self.storage.lamports_per_byte));
        }
        if self.storage.upload_timeout_secs == 0 {
            return bad("storage.upload_timeout_secs must be positive".into());
        }
        if !(0.0..1.0).contains(&self.swap.default_slippage) {
            return bad(format!("swap.default_slippage {} outside [0, 1)", self.swap.default_slippage));
        }
        if self.swap.api_url.is_empty() {
            return bad("swap.api_url is empty".into());
        }
        if self.swap.request_timeout_secs == 0 {
            return bad("swap.request_timeout_secs must be positive".into());
        }
        if self.swap.program_id.is_some() != self.swap.controller.is_some() {
            return bad("swap.program_id and swap.controller must be set together".into());
        }
        parse_optional("swap.program_id", &self.swap.program_id)?;
        parse_optional("swap.controller", &self.swap.controller)?;
        parse_pubkey("launchpad.candy_machine_program", &self.launchpad.candy_machine_program)?;
        parse_optional("launchpad.magic_hat_program", &self.launchpad.magic_hat_program)?;
        parse_optional("launchpad.magic_hat_creator", &self.launchpad.magic_hat_creator)?;
        if self.launchpad.whitelist_seed.len() > 32 {
            return bad("launchpad.whitelist_seed longer than 32 bytes".into());
        }
        Ok(())
    }

    pub fn confirm_options(&self) -> ConfirmOptions {
        ConfirmOptions {
            commitment: self.rpc.commitment,
            timeout: Duration::from_millis(self.rpc.confirm_timeout_ms),
            poll_interval: Duration::from_millis(self.rpc.poll_interval_ms),
        }
    }

    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            confirm: self.confirm_options(),
            send_retry: self.rpc.send_retry.clone(),
            ..SubmitOptions::default()
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.upload_timeout_secs)
    }

    pub fn swap_request_timeout(&self) -> Duration {
        Duration::from_secs(self.swap.request_timeout_secs)
    }

    pub fn pricer(&self) -> LinearPricer {
        LinearPricer {
            lamports_per_byte: self.storage.lamports_per_byte,
            per_file_overhead_bytes: self.storage.per_file_overhead_bytes,
            minimum_lamports: self.storage.minimum_lamports,
        }
    }

    pub fn mint_settings(&self) -> MintSettings {
        MintSettings {
            storage_env: self.storage.env.clone(),
            arweave_base_url: self.storage.arweave_base_url.clone(),
            submit: self.submit_options(),
        }
    }

    pub fn swap_settings(&self) -> DappResult<SwapSettings> {
        Ok(SwapSettings {
            default_slippage: self.swap.default_slippage,
            program_id: parse_optional("swap.program_id", &self.swap.program_id)?,
            controller: parse_optional("swap.controller", &self.swap.controller)?,
            submit: self.submit_options(),
        })
    }

    /// Launchpad settings; an unset magic-hat program falls back to the
    /// candy machine id, which only the `Standard` variant can use
    pub fn launchpad_settings(&self) -> DappResult<LaunchpadSettings> {
        let candy_machine = parse_pubkey("launchpad.candy_machine_program", &self.launchpad.candy_machine_program)?;
        let magic_hat = parse_optional("launchpad.magic_hat_program", &self.launchpad.magic_hat_program)?;
        let whitelist = parse_optional("launchpad.magic_hat_creator", &self.launchpad.magic_hat_creator)?.map(|creator| {
            WhitelistSettings {
                seed: self.launchpad.whitelist_seed.clone(),
                creator,
            }
        });
        Ok(LaunchpadSettings {
            programs: LaunchpadPrograms {
                candy_machine,
                magic_hat: magic_hat.unwrap_or(candy_machine),
            },
            whitelist,
            submit: self.submit_options(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let file = write_config("");
        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.rpc.commitment, CommitmentLevel::Confirmed);
        assert_eq!(config.confirm_options().poll_interval, Duration::from_secs(2));
        assert_eq!(config.swap.default_slippage, 0.01);
        assert_eq!(config.launchpad_settings().unwrap().programs.candy_machine, CANDY_MACHINE_PROGRAM_ID);
    }

    #[test]
    fn test_partial_sections() {
        let file = write_config(
            r#"
            [rpc]
            url = "http://localhost:8899"
            commitment = "finalized"

            [rpc.send_retry]
            max_attempts = 5

            [storage]
            env = "devnet"
            lamports_per_byte = 1.0

            [swap]
            request_timeout_secs = 5

            [monitoring]
            enable_metrics = false
            "#,
        );
        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.rpc.url, "http://localhost:8899");
        assert_eq!(config.rpc.commitment, CommitmentLevel::Finalized);
        assert_eq!(config.rpc.send_retry.max_attempts, 5);
        assert_eq!(config.rpc.send_retry.base_backoff_ms, 250);
        assert_eq!(config.mint_settings().storage_env, "devnet");
        assert_eq!(config.pricer().lamports_per_byte, 1.0);
        assert_eq!(config.swap_request_timeout(), Duration::from_secs(5));
        assert_eq!(config.upload_timeout(), Duration::from_secs(120));
        assert!(!config.monitoring.enable_metrics);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            ENV_RPC_URL => Some("http://rpc.local".to_string()),
            ENV_KEYPAIR_PATH => Some("".to_string()),
            ENV_STORAGE_URL => Some("http://storage.local/upload".to_string()),
            _ => None,
        });
        assert_eq!(config.rpc.url, "http://rpc.local");
        assert_eq!(config.wallet.keypair_path, WalletConfig::default().keypair_path);
        assert_eq!(config.storage.gateway_url, "http://storage.local/upload");
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = Config::default();
        config.swap.default_slippage = 1.0;
        assert!(matches!(config.validate(), Err(DappError::Configuration(_))));

        let mut config = Config::default();
        config.rpc.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.swap.request_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rpc.confirm_timeout_ms = 100;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.swap.program_id = Some(Pubkey::new_unique().to_string());
        assert!(config.validate().is_err());
        config.swap.controller = Some("not-a-key".to_string());
        assert!(config.validate().is_err());
        config.swap.controller = Some(Pubkey::new_unique().to_string());
        assert!(config.validate().is_ok());
        assert!(config.swap_settings().unwrap().program_id.is_some());
    }

    #[test]
    fn test_launchpad_whitelist_needs_creator() {
        let mut config = Config::default();
        assert!(config.launchpad_settings().unwrap().whitelist.is_none());

        let magic_hat = Pubkey::new_unique();
        config.launchpad.magic_hat_program = Some(magic_hat.to_string());
        config.launchpad.magic_hat_creator = Some(Pubkey::new_unique().to_string());
        let settings = config.launchpad_settings().unwrap();
        assert_eq!(settings.programs.magic_hat, magic_hat);
        assert_eq!(settings.whitelist.unwrap().seed, "whitelist");
    }
}
