//! dapp-pipeline command line
//!
//! Drives the library pipelines against a live cluster:
//!
//! - **quote**: price a swap without touching the chain
//! - **swap**: quote, bound by slippage and execute a swap
//! - **mint**: pay for storage, upload media and mint an NFT
//! - **launchpad-mint**: mint one token from a candy machine / magic hat launch

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use solana_sdk::{pubkey::Pubkey, signer::Signer};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dapp_pipeline::config::Config;
use dapp_pipeline::launchpad::LaunchpadClient;
use dapp_pipeline::metrics;
use dapp_pipeline::mint::{MintOrchestrator, MintState};
use dapp_pipeline::rpc::{self, ChainRpc};
use dapp_pipeline::storage::HttpStorageGateway;
use dapp_pipeline::swap::SwapOrchestrator;
use dapp_pipeline::swap_client::HttpSwapProgramClient;
use dapp_pipeline::tx_builder::launchpad::{LaunchpadState, MintVariant};
use dapp_pipeline::types::{CreatorShare, MediaFile, MintRequest, ProgressEvent, TokenInfo};
use dapp_pipeline::wallet::{expand_home, LocalWallet, WalletAdapter};
use dapp_pipeline::ProgressSink;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON logs and JSON command output
    #[arg(long)]
    json: bool,

    /// Write Prometheus metrics here when the command finishes
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Price a swap
    Quote {
        /// SYMBOL:MINT:DECIMALS, or SOL
        #[arg(long)]
        from: TokenArg,
        #[arg(long)]
        to: TokenArg,
        /// Input amount in UI units
        #[arg(long)]
        amount: f64,
    },
    /// Execute a swap
    Swap {
        #[arg(long)]
        from: TokenArg,
        #[arg(long)]
        to: TokenArg,
        #[arg(long)]
        amount: f64,
        /// Quoted output in UI units; fetched when omitted
        #[arg(long)]
        expected_output: Option<f64>,
        /// Fraction in [0, 1); defaults to swap.default_slippage
        #[arg(long)]
        slippage: Option<f64>,
    },
    /// Mint an NFT with durable media storage
    Mint {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        symbol: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Media file, repeatable; the first one becomes the image and the
        /// first video or audio file the animation
        #[arg(long = "file", required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value_t = 0)]
        royalty_bps: u16,
        #[arg(long)]
        max_supply: Option<u64>,
        #[arg(long)]
        external_url: Option<String>,
    },
    /// Mint one token from a launchpad
    LaunchpadMint {
        /// JSON snapshot of the launch state
        #[arg(long)]
        state: PathBuf,
        #[arg(long, value_enum, default_value_t = VariantArg::Standard)]
        variant: VariantArg,
        /// Magic hat account, required by the custom and whitelist variants
        #[arg(long)]
        magic_hat: Option<Pubkey>,
        /// Create the mint accounts in a separate transaction first
        #[arg(long)]
        setup: bool,
        /// Create a durable nonce with the setup and mint against it
        #[arg(long)]
        nonce: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum VariantArg {
    Standard,
    Custom,
    Whitelist,
}

/// Token given as `SYMBOL:MINT:DECIMALS`, or `SOL`
#[derive(Debug, Clone)]
struct TokenArg(TokenInfo);

impl FromStr for TokenArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("sol") {
            return Ok(Self(TokenInfo::new("SOL", spl_token::native_mint::id(), 9)));
        }
        let parts: Vec<&str> = s.split(':').collect();
        let [symbol, mint, decimals] = parts.as_slice() else {
            return Err(format!("expected SYMBOL:MINT:DECIMALS, got '{}'", s));
        };
        let mint = Pubkey::from_str(mint).map_err(|e| format!("mint '{}': {}", mint, e))?;
        let decimals = decimals
            .parse::<u8>()
            .map_err(|e| format!("decimals '{}': {}", decimals, e))?;
        Ok(Self(TokenInfo::new(*symbol, mint, decimals)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json)?;

    info!(version = env!("CARGO_PKG_VERSION"), config = %args.config, "Starting dapp-pipeline");
    let config = load_config(&args.config)?;
    config.validate().context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, no further transactions will be sent");
            on_signal.cancel();
        }
    });

    let result = run(&args, &config, &cancel).await;

    if config.monitoring.enable_metrics {
        if let (Some(path), Some(m)) = (&args.metrics_file, metrics::metrics()) {
            std::fs::write(path, m.render())
                .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        }
    }

    let output = result?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if let Some(obj) = output.as_object() {
        for (key, value) in obj {
            println!("{:>16}: {}", key, value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()));
        }
    }
    Ok(())
}

async fn run(args: &Args, config: &Config, cancel: &CancellationToken) -> Result<serde_json::Value> {
    let rpc: Arc<dyn ChainRpc> = Arc::new(rpc::connect(&config.rpc.url, config.rpc.commitment));

    match &args.command {
        Command::Quote { from, to, amount } => {
            let swap = swap_orchestrator(config, rpc)?;
            let quote = swap.quote(&from.0, &to.0, *amount).await;
            Ok(json!({
                "input": format!("{} {}", quote.input_amount, from.0.symbol),
                "output": format!("{} {}", quote.output_amount, to.0.symbol),
                "price_impact": quote.price_impact,
            }))
        }
        Command::Swap {
            from,
            to,
            amount,
            expected_output,
            slippage,
        } => {
            let wallet = load_wallet(config)?;
            let swap = swap_orchestrator(config, rpc)?;
            let slippage = slippage.unwrap_or_else(|| swap.default_slippage());
            let quoted = match expected_output {
                Some(v) => *v,
                None => swap.quote(&from.0, &to.0, *amount).await.output_amount,
            };
            let signature = swap
                .execute(&from.0, &to.0, *amount, quoted, slippage, &wallet, cancel)
                .await?;
            Ok(json!({ "signature": signature.to_string(), "quoted_output": quoted, "slippage": slippage }))
        }
        cmd @ Command::Mint { .. } => {
            let wallet = Arc::new(load_wallet(config)?);
            let request = mint_request(cmd, wallet.pubkey())?;
            run_mint(config, rpc, wallet, request, cancel).await
        }
        Command::LaunchpadMint {
            state,
            variant,
            magic_hat,
            setup,
            nonce,
        } => {
            let wallet = Arc::new(load_wallet(config)?);
            let raw = std::fs::read(state).with_context(|| format!("Failed to read {}", state.display()))?;
            let state: LaunchpadState = serde_json::from_slice(&raw).context("Failed to parse launch state")?;

            let client = LaunchpadClient::new(rpc, wallet, config.launchpad_settings()?)
                .with_progress(progress_logger());
            let magic_hat = || magic_hat.ok_or_else(|| anyhow!("--magic-hat is required for this variant"));
            let variant = match variant {
                VariantArg::Standard => MintVariant::Standard,
                VariantArg::Custom => MintVariant::Custom { magic_hat: magic_hat()? },
                VariantArg::Whitelist => client.whitelist_variant(magic_hat()?)?,
            };

            let result = if *nonce {
                let (setup_state, _) = client.create_accounts_for_mint_with_nonce(cancel).await?;
                client
                    .mint_one_token_nonce(&state, variant, &setup_state, vec![], vec![], cancel)
                    .await?
            } else if *setup {
                let (setup_state, _) = client.create_accounts_for_mint(cancel).await?;
                client
                    .mint_one_token(&state, variant, Some(&setup_state), vec![], vec![], cancel)
                    .await?
            } else {
                client.mint_one_token(&state, variant, None, vec![], vec![], cancel).await?
            };
            Ok(json!({
                "signature": result.signature.to_string(),
                "mint": result.mint.to_string(),
                "metadata": result.metadata.to_string(),
                "price": result.price,
            }))
        }
    }
}

async fn run_mint(
    config: &Config,
    rpc: Arc<dyn ChainRpc>,
    wallet: Arc<LocalWallet>,
    request: MintRequest,
    cancel: &CancellationToken,
) -> Result<serde_json::Value> {
    let gateway = Arc::new(HttpStorageGateway::new(&config.storage.gateway_url, config.upload_timeout())?);
    let mut orchestrator = MintOrchestrator::new(rpc, wallet, gateway, Arc::new(config.pricer()), config.mint_settings())
        .with_progress(progress_logger());

    let lamports = orchestrator.prepare(request)?;
    info!(lamports, "Storage priced, minting");

    match orchestrator.confirm(cancel).await {
        Ok(outcome) => Ok(json!({
            "mint": outcome.addresses.mint.to_string(),
            "metadata": outcome.addresses.metadata.to_string(),
            "uri": outcome.uri,
            "signature": outcome.patch_signature.to_string(),
        })),
        Err(err) => {
            if let MintState::Failed { phase, .. } = orchestrator.state() {
                warn!(phase, "Mint stopped; completed phases are kept on-chain");
            }
            Err(err.into())
        }
    }
}

fn swap_orchestrator(config: &Config, rpc: Arc<dyn ChainRpc>) -> Result<SwapOrchestrator> {
    let settings = config.swap_settings()?;
    let program = HttpSwapProgramClient::new(&config.swap.api_url, settings.program_id, config.swap_request_timeout())?;
    Ok(SwapOrchestrator::new(rpc, Arc::new(program), settings))
}

fn load_wallet(config: &Config) -> Result<LocalWallet> {
    let path = expand_home(&config.wallet.keypair_path);
    let wallet = LocalWallet::from_file(&path).context("Failed to load wallet")?;
    info!(wallet = %wallet.pubkey(), "Wallet loaded");
    Ok(wallet)
}

/// Mint request for the `mint` subcommand, with `creator` taking all royalties
fn mint_request(cmd: &Command, creator: Pubkey) -> Result<MintRequest> {
    let Command::Mint {
        name,
        symbol,
        description,
        files,
        royalty_bps,
        max_supply,
        external_url,
    } = cmd
    else {
        bail!("not a mint command");
    };
    Ok(MintRequest {
        name: name.clone(),
        symbol: symbol.clone(),
        description: description.clone(),
        files: files.iter().map(|p| read_media(p)).collect::<Result<_>>()?,
        seller_fee_basis_points: *royalty_bps,
        creators: vec![CreatorShare {
            address: creator,
            share: 100,
        }],
        max_supply: *max_supply,
        image: None,
        animation_url: None,
        external_url: external_url.clone(),
        attributes: vec![],
    }
    .with_media_defaults())
}

fn read_media(path: &Path) -> Result<MediaFile> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Unusable file name: {}", path.display()))?;
    let content_type = match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg") | Some("jpeg") => Some("image/jpeg"),
        Some("gif") => Some("image/gif"),
        Some("mp4") => Some("video/mp4"),
        Some("mov") => Some("video/quicktime"),
        Some("mp3") => Some("audio/mpeg"),
        Some("wav") => Some("audio/wav"),
        Some("html") => Some("text/html"),
        Some("glb") => Some("model/gltf-binary"),
        _ => None,
    };
    let file = MediaFile::new(name, bytes);
    Ok(match content_type {
        Some(ct) => file.with_content_type(ct),
        None => file,
    })
}

/// Progress sink that logs every event
fn progress_logger() -> ProgressSink {
    let (sink, mut rx) = ProgressSink::channel();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Submitted { batch_index, signature } => {
                    info!(batch_index, signature = %signature, "Submitted")
                }
                ProgressEvent::Confirmed { batch_index, slot, .. } => info!(batch_index, slot, "Confirmed"),
                ProgressEvent::BatchFailed { batch_index, reason } => warn!(batch_index, reason = %reason, "Batch failed"),
                ProgressEvent::Uploaded { manifest_id } => info!(manifest_id = %manifest_id, "Uploaded"),
                other => tracing::debug!(event = ?other, "Progress"),
            }
        }
    });
    sink
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_filter = if verbose {
        "dapp_pipeline=debug,info"
    } else {
        "dapp_pipeline=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    }
    .map_err(|e| anyhow!("Failed to initialise logging: {}", e))
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        Config::from_file_with_env(path).with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        let mut config = Config::default();
        dotenvy::dotenv().ok();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }
}
