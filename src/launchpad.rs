//! Launchpad mint client
//!
//! Thin async layer over [`crate::tx_builder::launchpad`]: fetches rent and
//! the collection PDA, assembles the batches and hands them to the
//! submitter. Every mint variant shares the same path.

use std::sync::Arc;

use solana_sdk::{program_pack::Pack, pubkey::Pubkey, signature::Signature, signer::Signer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::address::{associated_token_address, collection_pda, wallet_whitelist};
use crate::errors::{DappError, DappResult};
use crate::nonce::NONCE_ACCOUNT_LENGTH;
use crate::observability::CorrelationId;
use crate::rpc::ChainRpc;
use crate::submitter::{submit, ProgressSink, SubmissionPlan, SubmitOptions};
use crate::tx_builder::batch::InstructionBatch;
use crate::tx_builder::launchpad::{
    build_mint_batch, build_setup_batch, CollectionPdaData, LaunchpadMint, LaunchpadPrograms, LaunchpadState,
    MintVariant, SetupState,
};
use crate::types::{ConfirmationStatus, SubmissionResult};
use crate::wallet::WalletAdapter;

/// Magic-hat whitelist parameters
#[derive(Debug, Clone)]
pub struct WhitelistSettings {
    pub seed: String,
    pub creator: Pubkey,
}

#[derive(Debug, Clone)]
pub struct LaunchpadSettings {
    pub programs: LaunchpadPrograms,
    pub whitelist: Option<WhitelistSettings>,
    pub submit: SubmitOptions,
}

/// Outcome of one launchpad mint
#[derive(Debug, Clone)]
pub struct LaunchpadMintResult {
    /// Signature of the mint transaction itself
    pub signature: Signature,
    pub mint: Pubkey,
    pub metadata: Pubkey,
    /// Price charged by the launch, in its payment currency's base units
    pub price: u64,
    /// Every batch of the plan, before and after batches included
    pub results: Vec<SubmissionResult>,
}

pub struct LaunchpadClient {
    rpc: Arc<dyn ChainRpc>,
    wallet: Arc<dyn WalletAdapter>,
    settings: LaunchpadSettings,
    progress: ProgressSink,
    /// Unix seconds, compared against the launch go-live date
    clock: fn() -> i64,
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl LaunchpadClient {
    pub fn new(rpc: Arc<dyn ChainRpc>, wallet: Arc<dyn WalletAdapter>, settings: LaunchpadSettings) -> Self {
        Self {
            rpc,
            wallet,
            settings,
            progress: ProgressSink::disabled(),
            clock: unix_now,
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn programs(&self) -> &LaunchpadPrograms {
        &self.settings.programs
    }

    /// Wallet-whitelist entry of the connected wallet
    pub fn wallet_whitelist_address(&self) -> DappResult<Pubkey> {
        let wl = self
            .settings
            .whitelist
            .as_ref()
            .ok_or_else(|| DappError::Configuration("launchpad whitelist seed/creator not configured".into()))?;
        let (address, _) = wallet_whitelist(&wl.seed, &self.wallet.pubkey(), &wl.creator, &self.settings.programs.magic_hat)?;
        Ok(address)
    }

    /// Whitelist variant for `magic_hat`, targeting the wallet's own entry
    pub fn whitelist_variant(&self, magic_hat: Pubkey) -> DappResult<MintVariant> {
        Ok(MintVariant::Whitelist {
            magic_hat,
            wallet_whitelist: self.wallet_whitelist_address()?,
        })
    }

    /// Whether the wallet has a whitelist entry on-chain
    pub async fn is_whitelisted(&self) -> DappResult<bool> {
        let address = self.wallet_whitelist_address()?;
        Ok(self.rpc.get_account(&address).await?.is_some())
    }

    /// Whether the wallet holds a whitelist token of `state`
    ///
    /// `false` when the launch has no whitelist or the token account is
    /// missing, empty or not a token account.
    pub async fn holds_whitelist_token(&self, state: &LaunchpadState) -> DappResult<bool> {
        let Some(wl) = state.whitelist_mint_settings else {
            return Ok(false);
        };
        let ata = associated_token_address(&self.wallet.pubkey(), &wl.mint)?;
        let Some(account) = self.rpc.get_account(&ata).await? else {
            return Ok(false);
        };
        match spl_token::state::Account::unpack(&account.data) {
            Ok(token) => Ok(token.mint == wl.mint && token.amount > 0),
            Err(err) => {
                warn!(token_account = %ata, error = %err, "Whitelist token account is not a token account");
                Ok(false)
            }
        }
    }

    /// Price the wallet pays for one mint, if it may mint right now
    ///
    /// # Errors
    ///
    /// `Validation` if the launch is sold out, or not live and the wallet
    /// cannot use a presale.
    pub async fn mint_price(&self, state: &LaunchpadState) -> DappResult<u64> {
        if state.is_sold_out() {
            return Err(DappError::validation(format!("launch {} is sold out", state.id)));
        }
        let now = (self.clock)();
        let holds_token = self.holds_whitelist_token(state).await?;
        if !state.is_live(now) && !(state.is_presale(now) && holds_token) {
            return Err(DappError::validation(match state.go_live_date {
                Some(at) => format!("launch {} goes live at {}", state.id, at),
                None => format!("launch {} has no go-live date", state.id),
            }));
        }
        Ok(state.effective_price(holds_token))
    }

    /// Collection PDA of `state`, if the launch has one
    ///
    /// A missing or undecodable account yields `None`; the mint then goes
    /// ahead without the collection instruction.
    pub async fn fetch_collection(&self, state: &LaunchpadState) -> DappResult<Option<CollectionPdaData>> {
        let (pda, _) = collection_pda(&state.id, &self.settings.programs.candy_machine)?;
        let Some(account) = self.rpc.get_account(&pda).await? else {
            debug!(collection_pda = %pda, "No collection PDA");
            return Ok(None);
        };
        match CollectionPdaData::parse(&account.data) {
            Ok(data) => Ok(Some(data)),
            Err(err) => {
                warn!(collection_pda = %pda, error = %err, "Ignoring undecodable collection PDA");
                Ok(None)
            }
        }
    }

    /// Create the mint and token account ahead of the mint transaction
    pub async fn create_accounts_for_mint(&self, cancel: &CancellationToken) -> DappResult<(SetupState, Signature)> {
        self.create_accounts(false, cancel).await
    }

    /// As [`create_accounts_for_mint`](Self::create_accounts_for_mint), plus a
    /// durable nonce account whose authority is the wallet
    pub async fn create_accounts_for_mint_with_nonce(
        &self,
        cancel: &CancellationToken,
    ) -> DappResult<(SetupState, Signature)> {
        self.create_accounts(true, cancel).await
    }

    #[instrument(skip(self, cancel))]
    async fn create_accounts(&self, with_nonce: bool, cancel: &CancellationToken) -> DappResult<(SetupState, Signature)> {
        let payer = self.wallet.pubkey();
        let mint_rent = self.mint_rent().await?;
        let nonce_rent = if with_nonce {
            Some(self.rpc.get_minimum_balance_for_rent_exemption(NONCE_ACCOUNT_LENGTH).await?)
        } else {
            None
        };

        let (batch, setup) = build_setup_batch(&payer, mint_rent, nonce_rent)?;
        let results = self.submit_plan(SubmissionPlan::single(batch), self.settings.submit.clone(), cancel).await?;
        let signature = first_signature(&results, 0)?;
        info!(mint = %setup.mint.pubkey(), signature = %signature, "Launchpad accounts created");
        Ok((setup, signature))
    }

    /// Mint one token from `state`
    ///
    /// Without `setup` the mint account is created inline and its keypair
    /// co-signs. `before` and `after` batches are submitted around the mint
    /// batch under the same options.
    pub async fn mint_one_token(
        &self,
        state: &LaunchpadState,
        variant: MintVariant,
        setup: Option<&SetupState>,
        before: Vec<InstructionBatch>,
        after: Vec<InstructionBatch>,
        cancel: &CancellationToken,
    ) -> DappResult<LaunchpadMintResult> {
        self.mint(state, variant, setup, before, after, self.settings.submit.clone(), cancel)
            .await
    }

    /// Mint against the durable nonce created by
    /// [`create_accounts_for_mint_with_nonce`](Self::create_accounts_for_mint_with_nonce)
    pub async fn mint_one_token_nonce(
        &self,
        state: &LaunchpadState,
        variant: MintVariant,
        setup: &SetupState,
        before: Vec<InstructionBatch>,
        after: Vec<InstructionBatch>,
        cancel: &CancellationToken,
    ) -> DappResult<LaunchpadMintResult> {
        let nonce = setup
            .nonce_account
            .as_ref()
            .ok_or_else(|| DappError::validation("setup state has no durable nonce account"))?;
        let opts = self.settings.submit.clone().with_nonce(nonce.pubkey());
        self.mint(state, variant, Some(setup), before, after, opts, cancel).await
    }

    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(launch = %state.id, variant = ?variant, durable = opts.nonce_account.is_some()))]
    async fn mint(
        &self,
        state: &LaunchpadState,
        variant: MintVariant,
        setup: Option<&SetupState>,
        before: Vec<InstructionBatch>,
        after: Vec<InstructionBatch>,
        opts: SubmitOptions,
        cancel: &CancellationToken,
    ) -> DappResult<LaunchpadMintResult> {
        let price = self.mint_price(state).await?;
        debug!(price, "Launch open for this wallet");

        let mint_rent = match setup {
            Some(_) => 0,
            None => self.mint_rent().await?,
        };
        let collection = if state.retain_authority {
            self.fetch_collection(state).await?
        } else {
            None
        };

        let plan = build_mint_batch(LaunchpadMint {
            state,
            programs: &self.settings.programs,
            variant,
            payer: self.wallet.pubkey(),
            setup,
            mint_rent,
            collection,
        })?;

        let mint_index = before.len();
        let submission = SubmissionPlan::single(plan.batch)
            .with_before(before)
            .with_after(after);
        let results = self.submit_plan(submission, opts, cancel).await?;
        let signature = first_signature(&results, mint_index)?;

        info!(mint = %plan.mint, metadata = %plan.metadata, signature = %signature, "Launchpad token minted");
        Ok(LaunchpadMintResult {
            signature,
            mint: plan.mint,
            metadata: plan.metadata,
            price,
            results,
        })
    }

    async fn mint_rent(&self) -> DappResult<u64> {
        self.rpc
            .get_minimum_balance_for_rent_exemption(spl_token::state::Mint::LEN)
            .await
    }

    async fn submit_plan(
        &self,
        plan: SubmissionPlan,
        mut opts: SubmitOptions,
        cancel: &CancellationToken,
    ) -> DappResult<Vec<SubmissionResult>> {
        opts.correlation_id.get_or_insert_with(CorrelationId::new);
        submit(self.rpc.as_ref(), self.wallet.as_ref(), plan, &opts, &self.progress, cancel).await
    }
}

fn first_signature(results: &[SubmissionResult], index: usize) -> DappResult<Signature> {
    let result = results
        .get(index)
        .ok_or_else(|| DappError::internal(format!("no submission result at {}", index)))?;
    if let ConfirmationStatus::Failed(reason) = &result.status {
        return Err(DappError::TransactionFailed {
            signature: result.signature,
            reason: reason.clone(),
        });
    }
    Ok(result.signature)
}
