//! Swap orchestrator
//!
//! Quotes are cheap and never fail the caller: zero input or a failed
//! program call yields a zero quote. Execution re-quotes, refuses to submit
//! when the fresh quote falls below the slippage bound, and encodes that
//! bound in the swap instruction so the program enforces it on-chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, signature::Signature};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::address::swap_pair;
use crate::errors::{DappError, DappResult};
use crate::metrics::record;
use crate::observability::CorrelationId;
use crate::rpc::ChainRpc;
use crate::structured_logging::StructuredLogger;
use crate::submitter::{submit, ProgressSink, SubmissionPlan, SubmitOptions};
use crate::tx_builder::swap::{build_swap_batch, minimum_amount_out};
use crate::types::{SequenceType, SwapQuote, TokenInfo};
use crate::wallet::WalletAdapter;

/// Quote as returned by the swap program, in base units of the output token
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgramQuote {
    pub output_amount: u64,
    pub price_impact: f64,
}

/// On-chain swap program client
#[async_trait]
pub trait SwapProgramClient: Send + Sync {
    async fn get_quote(&self, mint_in: &Pubkey, mint_out: &Pubkey, amount_in: u64) -> DappResult<ProgramQuote>;

    /// Swap instructions that fail on-chain if fewer than `minimum_out`
    /// base units would be received
    async fn create_swap_instructions(
        &self,
        mint_in: &Pubkey,
        mint_out: &Pubkey,
        amount_in: u64,
        minimum_out: u64,
        payer: &Pubkey,
    ) -> DappResult<Vec<Instruction>>;
}

/// Orders concurrent quote requests
///
/// Every request takes an id from [`next`](Self::next); a result is applied
/// only if [`accept`](Self::accept) returns true, i.e. no newer request has
/// been applied already.
#[derive(Debug, Default)]
pub struct QuoteSequencer {
    issued: AtomicU64,
    applied: AtomicU64,
}

impl QuoteSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn accept(&self, id: u64) -> bool {
        self.applied.fetch_max(id, Ordering::SeqCst) < id
    }

    /// Whether `id` is still the most recent request issued
    pub fn is_latest(&self, id: u64) -> bool {
        self.issued.load(Ordering::SeqCst) == id
    }
}

#[derive(Debug, Clone)]
pub struct SwapSettings {
    pub default_slippage: f64,
    /// Swap program and controller, used to derive the pair account
    pub program_id: Option<Pubkey>,
    pub controller: Option<Pubkey>,
    pub submit: SubmitOptions,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            default_slippage: 0.01,
            program_id: None,
            controller: None,
            submit: SubmitOptions::default(),
        }
    }
}

pub struct SwapOrchestrator {
    rpc: Arc<dyn ChainRpc>,
    program: Arc<dyn SwapProgramClient>,
    settings: SwapSettings,
    sequencer: QuoteSequencer,
}

impl SwapOrchestrator {
    pub fn new(rpc: Arc<dyn ChainRpc>, program: Arc<dyn SwapProgramClient>, settings: SwapSettings) -> Self {
        Self {
            rpc,
            program,
            settings,
            sequencer: QuoteSequencer::new(),
        }
    }

    pub fn sequencer(&self) -> &QuoteSequencer {
        &self.sequencer
    }

    pub fn default_slippage(&self) -> f64 {
        self.settings.default_slippage
    }

    /// Pair account for the two mints, if the program is configured
    pub fn pair_address(&self, mint_a: &Pubkey, mint_b: &Pubkey) -> DappResult<Option<Pubkey>> {
        match (&self.settings.controller, &self.settings.program_id) {
            (Some(controller), Some(program)) => Ok(Some(swap_pair(controller, mint_a, mint_b, program)?.0)),
            _ => Ok(None),
        }
    }

    /// Price `input_amount` (UI units) of `token_in` in `token_out`
    ///
    /// Never fails: zero input returns a zero quote without any network call,
    /// and a failed program call degrades to a zero quote.
    pub async fn quote(&self, token_in: &TokenInfo, token_out: &TokenInfo, input_amount: f64) -> SwapQuote {
        if !input_amount.is_finite() || input_amount <= 0.0 {
            return SwapQuote::zero();
        }
        let amount_in = token_in.to_base_units(input_amount);
        if amount_in == 0 {
            return SwapQuote::zero();
        }

        match self.program.get_quote(&token_in.mint, &token_out.mint, amount_in).await {
            Ok(quote) => SwapQuote {
                input_amount,
                output_amount: token_out.to_ui_amount(quote.output_amount),
                price_impact: quote.price_impact,
            },
            Err(err) => {
                warn!(
                    pair = %format!("{}->{}", token_in.symbol, token_out.symbol),
                    error = %err,
                    "Quote failed, showing zero"
                );
                SwapQuote::zero()
            }
        }
    }

    /// Quote tagged with a sequence id; `None` if a newer quote was applied
    /// while this one was in flight
    pub async fn sequenced_quote(&self, token_in: &TokenInfo, token_out: &TokenInfo, input_amount: f64) -> Option<SwapQuote> {
        let id = self.sequencer.next();
        let quote = self.quote(token_in, token_out, input_amount).await;
        self.sequencer.accept(id).then_some(quote)
    }

    /// Swap `input_amount` of `token_in` for at least
    /// `quoted_output * (1 - slippage)` of `token_out`
    ///
    /// # Errors
    ///
    /// - `Validation` for non-positive amounts or slippage outside `[0, 1)`
    /// - `Quote` if the fresh quote cannot be fetched
    /// - `SlippageExceeded` if the fresh quote is below the bound; nothing is
    ///   submitted
    /// - submission errors for the swap transaction itself
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(pair = %format!("{}->{}", token_in.symbol, token_out.symbol)))]
    pub async fn execute(
        &self,
        token_in: &TokenInfo,
        token_out: &TokenInfo,
        input_amount: f64,
        quoted_output: f64,
        slippage: f64,
        wallet: &dyn WalletAdapter,
        cancel: &CancellationToken,
    ) -> DappResult<Signature> {
        let result = self
            .execute_inner(token_in, token_out, input_amount, quoted_output, slippage, wallet, cancel)
            .await;
        match &result {
            Ok(_) => record(|m| m.swaps_executed.inc()),
            Err(_) => record(|m| m.swaps_rejected.inc()),
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_inner(
        &self,
        token_in: &TokenInfo,
        token_out: &TokenInfo,
        input_amount: f64,
        quoted_output: f64,
        slippage: f64,
        wallet: &dyn WalletAdapter,
        cancel: &CancellationToken,
    ) -> DappResult<Signature> {
        if !(0.0..1.0).contains(&slippage) {
            return Err(DappError::validation(format!("slippage {} outside [0, 1)", slippage)));
        }
        let amount_in = token_in.to_base_units(input_amount);
        if !input_amount.is_finite() || amount_in == 0 {
            return Err(DappError::validation("input amount must be positive"));
        }
        let minimum_out = minimum_amount_out(quoted_output, token_out.decimals, slippage);
        if minimum_out == 0 {
            return Err(DappError::validation("quoted output is zero"));
        }

        let fresh = self
            .program
            .get_quote(&token_in.mint, &token_out.mint, amount_in)
            .await
            .map_err(|e| {
                if matches!(e, DappError::Quote(_)) {
                    e
                } else {
                    DappError::Quote(e.to_string())
                }
            })?;
        if fresh.output_amount < minimum_out {
            return Err(DappError::SlippageExceeded {
                minimum_out,
                realized_out: fresh.output_amount,
            });
        }

        let payer = wallet.pubkey();
        let swap_instructions = self
            .program
            .create_swap_instructions(&token_in.mint, &token_out.mint, amount_in, minimum_out, &payer)
            .await?;
        let batch = build_swap_batch(&payer, token_in, token_out, amount_in, swap_instructions)?;

        let correlation_id = CorrelationId::new();
        let logger = StructuredLogger::new("swap", correlation_id.clone());
        logger.log_swap(&batch.label, amount_in, minimum_out);
        if let Some(pair) = self.pair_address(&token_in.mint, &token_out.mint)? {
            debug!(pair = %pair, "Swap pair account");
        }

        let opts = SubmitOptions {
            mode: SequenceType::StopOnFailure,
            correlation_id: Some(correlation_id),
            ..self.settings.submit.clone()
        };
        let results = submit(
            self.rpc.as_ref(),
            wallet,
            SubmissionPlan::single(batch),
            &opts,
            &ProgressSink::disabled(),
            cancel,
        )
        .await
        .map_err(|err| match err {
            DappError::Submission { cause, .. } => *cause,
            other => other,
        })?;

        results
            .first()
            .map(|r| r.signature)
            .ok_or_else(|| DappError::internal("submitter returned no result"))
    }
}
