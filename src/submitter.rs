//! Transaction submitter
//!
//! Takes an ordered sequence of instruction batches and lands each one as a
//! single transaction: compile against a blockhash or durable nonce, let the
//! ephemeral keys and then the wallet sign, dispatch, poll for confirmation.
//!
//! Batches run strictly in order. Under [`SequenceType::StopOnFailure`] the
//! first failure halts the sequence; under
//! [`SequenceType::ContinueOnFailure`] it is recorded and the next batch
//! runs. Progress is reported on a non-blocking channel.

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::errors::{DappError, DappResult};
use crate::metrics::{record, Timer};
use crate::nonce::durable_context;
use crate::observability::CorrelationId;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::rpc::{confirm_signature, ChainRpc, ConfirmOptions};
use crate::structured_logging::StructuredLogger;
use crate::tx_builder::{ExecutionContext, InstructionBatch};
use crate::types::{ConfirmationStatus, ProgressEvent, SequenceType, SubmissionResult};
use crate::wallet::WalletAdapter;

/// Non-blocking progress reporter
///
/// Sending never waits; a dropped receiver silently disables reporting.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Batches to land, in three ordered groups
///
/// `before` and `after` wrap the main work, e.g. account setup ahead of a
/// launchpad mint. Indexes in results and errors count across all groups.
#[derive(Debug, Default)]
pub struct SubmissionPlan {
    pub before: Vec<InstructionBatch>,
    pub main: Vec<InstructionBatch>,
    pub after: Vec<InstructionBatch>,
}

impl SubmissionPlan {
    pub fn new(main: Vec<InstructionBatch>) -> Self {
        Self {
            main,
            ..Self::default()
        }
    }

    pub fn single(batch: InstructionBatch) -> Self {
        Self::new(vec![batch])
    }

    pub fn with_before(mut self, batches: Vec<InstructionBatch>) -> Self {
        self.before = batches;
        self
    }

    pub fn with_after(mut self, batches: Vec<InstructionBatch>) -> Self {
        self.after = batches;
        self
    }

    pub fn len(&self) -> usize {
        self.before.len() + self.main.len() + self.after.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_ordered(self) -> Vec<InstructionBatch> {
        let mut batches = self.before;
        batches.extend(self.main);
        batches.extend(self.after);
        batches
    }
}

/// Submission policy for one call
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub mode: SequenceType,
    pub confirm: ConfirmOptions,
    /// Backoff for blockhash fetches and raw sends
    pub send_retry: RetryConfig,
    /// Durable nonce account to build against instead of a recent blockhash
    pub nonce_account: Option<Pubkey>,
    pub correlation_id: Option<CorrelationId>,
}

impl SubmitOptions {
    pub fn with_mode(mut self, mode: SequenceType) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_nonce(mut self, nonce_account: Pubkey) -> Self {
        self.nonce_account = Some(nonce_account);
        self
    }
}

/// Land every batch of `plan` in order
///
/// Returns one [`SubmissionResult`] per batch. Under `ContinueOnFailure`
/// failed batches appear with [`ConfirmationStatus::Failed`].
///
/// # Errors
///
/// - `Validation` for an empty plan
/// - `Cancelled` if `cancel` fires before a batch is dispatched
/// - `Submission { failed_index, cause }` for the first failure under
///   `StopOnFailure`
#[instrument(skip_all, fields(batches = plan.len(), mode = ?opts.mode, durable = opts.nonce_account.is_some()))]
pub async fn submit<R, W>(
    rpc: &R,
    wallet: &W,
    plan: SubmissionPlan,
    opts: &SubmitOptions,
    progress: &ProgressSink,
    cancel: &CancellationToken,
) -> DappResult<Vec<SubmissionResult>>
where
    R: ChainRpc + ?Sized,
    W: WalletAdapter + ?Sized,
{
    if plan.is_empty() {
        return Err(DappError::validation("nothing to submit"));
    }

    let logger = StructuredLogger::new(
        "submit",
        opts.correlation_id.clone().unwrap_or_default(),
    );
    let batches = plan.into_ordered();
    let mut results = Vec::with_capacity(batches.len());

    for (index, batch) in batches.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(DappError::Cancelled(format!(
                "stopped before batch {} of {}",
                index,
                batches.len()
            )));
        }

        match submit_batch(rpc, wallet, batch, index, opts, progress, cancel, &logger).await {
            Ok(result) => results.push(result),
            Err(err) => {
                record(|m| m.batches_failed.inc());
                logger.log_batch_failed(index, &err);
                progress.emit(ProgressEvent::BatchFailed {
                    batch_index: index,
                    reason: err.to_string(),
                });

                match opts.mode {
                    SequenceType::StopOnFailure => return Err(DappError::submission(index, err)),
                    SequenceType::ContinueOnFailure => results.push(SubmissionResult {
                        signature: failed_signature(&err),
                        status: ConfirmationStatus::Failed(err.to_string()),
                        slot: 0,
                    }),
                }
            }
        }
    }

    Ok(results)
}

#[allow(clippy::too_many_arguments)]
async fn submit_batch<R, W>(
    rpc: &R,
    wallet: &W,
    batch: &InstructionBatch,
    index: usize,
    opts: &SubmitOptions,
    progress: &ProgressSink,
    cancel: &CancellationToken,
    logger: &StructuredLogger,
) -> DappResult<SubmissionResult>
where
    R: ChainRpc + ?Sized,
    W: WalletAdapter + ?Sized,
{
    let payer = wallet.pubkey();

    let ctx = match opts.nonce_account {
        Some(nonce_account) => durable_context(rpc, &nonce_account, &payer).await?,
        None => {
            let blockhash =
                retry_with_backoff("get_latest_blockhash", &opts.send_retry, || rpc.get_latest_blockhash()).await?;
            ExecutionContext::recent(blockhash)
        }
    };

    let mut tx = ctx.compile(batch, &payer)?;
    progress.emit(ProgressEvent::InstructionsBuilt { batch_index: index });

    wallet.sign_transaction(&mut tx).await?;
    if !tx.is_signed() {
        return Err(DappError::Signing(format!(
            "batch '{}' is missing required signatures",
            batch.label
        )));
    }
    progress.emit(ProgressEvent::Signed { batch_index: index });

    // Identical signed bytes resolve to the same signature, so resending is safe
    let signature = retry_with_backoff("send_transaction", &opts.send_retry, || rpc.send_transaction(&tx)).await?;
    record(|m| m.batches_submitted.inc());
    logger.log_batch_submitted(index, &batch.label, &signature);
    progress.emit(ProgressEvent::Submitted {
        batch_index: index,
        signature,
    });

    let timer = Timer::start();
    let result = match confirm_signature(rpc, &signature, &opts.confirm, cancel).await {
        Ok(result) => result,
        Err(err) => {
            if matches!(err, DappError::Timeout { .. }) {
                record(|m| m.confirm_timeouts.inc());
            }
            return Err(err);
        }
    };
    let latency_ms = (timer.elapsed_secs() * 1000.0) as u64;
    timer.finish(|m| &m.confirm_latency);
    record(|m| m.batches_confirmed.inc());

    logger.log_batch_confirmed(index, &signature, result.slot, latency_ms);
    progress.emit(ProgressEvent::Confirmed {
        batch_index: index,
        signature,
        slot: result.slot,
    });
    debug!(batch_index = index, label = %batch.label, "Batch landed");

    Ok(result)
}

/// Signature a failure refers to, or the default signature if the batch
/// never reached the network
fn failed_signature(err: &DappError) -> Signature {
    match err {
        DappError::Timeout { signature, .. } | DappError::TransactionFailed { signature, .. } => *signature,
        _ => Signature::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockRpc, MockWallet};
    use crate::tx_builder::instructions::is_advance_nonce;
    use crate::types::CommitmentLevel;
    use solana_sdk::{signature::Keypair, signer::Signer, system_instruction};
    use std::sync::Arc;
    use std::time::Duration;

    fn transfer_batch(label: &str, payer: &Pubkey) -> InstructionBatch {
        InstructionBatch::new(label, vec![system_instruction::transfer(payer, &Pubkey::new_unique(), 1)])
    }

    fn fast_opts() -> SubmitOptions {
        SubmitOptions {
            confirm: ConfirmOptions {
                commitment: CommitmentLevel::Confirmed,
                timeout: Duration::from_secs(10),
                poll_interval: Duration::from_millis(500),
            },
            ..SubmitOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_land_in_order_with_progress() {
        let rpc = MockRpc::confirming();
        let wallet = MockWallet::new();
        let payer = wallet.pubkey();
        let plan = SubmissionPlan::new(vec![transfer_batch("a", &payer)])
            .with_before(vec![transfer_batch("setup", &payer)])
            .with_after(vec![transfer_batch("cleanup", &payer)]);
        let (sink, mut rx) = ProgressSink::channel();

        let results = submit(&rpc, &wallet, plan, &fast_opts(), &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.status.is_success()));
        let sent: Vec<Signature> = rpc.sent_transactions().iter().map(|tx| tx.signatures[0]).collect();
        assert_eq!(sent, results.iter().map(|r| r.signature).collect::<Vec<_>>());

        let mut confirmed = vec![];
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::Confirmed { batch_index, .. } = event {
                confirmed.push(batch_index);
            }
        }
        assert_eq!(confirmed, vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ephemeral_signer_is_applied() {
        let rpc = MockRpc::confirming();
        let wallet = MockWallet::new();
        let payer = wallet.pubkey();
        let account = Arc::new(Keypair::new());
        let batch = InstructionBatch::new(
            "create",
            vec![system_instruction::create_account(&payer, &account.pubkey(), 1, 0, &Pubkey::new_unique())],
        )
        .with_signer(account.clone());

        submit(&rpc, &wallet, SubmissionPlan::single(batch), &fast_opts(), &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        let sent = rpc.sent_transactions();
        assert!(sent[0].verify().is_ok());
        assert_eq!(sent[0].signatures.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_failure_reports_index() {
        let rpc = MockRpc::confirming();
        rpc.fail_transaction_at(1, "custom program error: 0x26");
        let wallet = MockWallet::new();
        let payer = wallet.pubkey();
        let plan = SubmissionPlan::new(vec![
            transfer_batch("a", &payer),
            transfer_batch("b", &payer),
            transfer_batch("c", &payer),
        ]);

        let err = submit(&rpc, &wallet, plan, &fast_opts(), &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            DappError::Submission { failed_index, cause } => {
                assert_eq!(failed_index, 1);
                assert!(matches!(*cause, DappError::TransactionFailed { .. }));
            }
            other => panic!("expected submission error, got {other:?}"),
        }
        assert_eq!(rpc.sent_transactions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_on_failure_runs_remaining() {
        let rpc = MockRpc::confirming();
        rpc.fail_transaction_at(0, "insufficient funds");
        let wallet = MockWallet::new();
        let payer = wallet.pubkey();
        let plan = SubmissionPlan::new(vec![transfer_batch("a", &payer), transfer_batch("b", &payer)]);
        let opts = fast_opts().with_mode(SequenceType::ContinueOnFailure);

        let results = submit(&rpc, &wallet, plan, &opts, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(results[0].status, ConfirmationStatus::Failed(ref r) if r.contains("insufficient funds")));
        assert!(results[1].status.is_success());
        assert_ne!(results[0].signature, Signature::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_batch_times_out() {
        let rpc = MockRpc::new();
        let wallet = MockWallet::new();
        let payer = wallet.pubkey();
        let err = submit(
            &rpc,
            &wallet,
            SubmissionPlan::single(transfer_batch("a", &payer)),
            &fast_opts(),
            &ProgressSink::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.root_cause(), DappError::Timeout { waited_ms, .. } if *waited_ms >= 10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_signature_never_dispatches() {
        let rpc = MockRpc::confirming();
        let wallet = MockWallet::refusing();
        let payer = wallet.pubkey();
        let err = submit(
            &rpc,
            &wallet,
            SubmissionPlan::single(transfer_batch("a", &payer)),
            &fast_opts(),
            &ProgressSink::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err.root_cause(), DappError::Signing(_)));
        assert!(rpc.sent_transactions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_dispatch() {
        let rpc = MockRpc::confirming();
        let wallet = MockWallet::new();
        let payer = wallet.pubkey();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = submit(
            &rpc,
            &wallet,
            SubmissionPlan::single(transfer_batch("a", &payer)),
            &fast_opts(),
            &ProgressSink::disabled(),
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DappError::Cancelled(_)));
        assert!(rpc.sent_transactions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_durable_nonce_prepends_advance() {
        let rpc = MockRpc::confirming();
        let wallet = MockWallet::new();
        let payer = wallet.pubkey();
        let nonce = Pubkey::new_unique();
        let stored = rpc.install_nonce_account(nonce, payer);
        let opts = fast_opts().with_nonce(nonce);

        submit(
            &rpc,
            &wallet,
            SubmissionPlan::single(transfer_batch("a", &payer)),
            &opts,
            &ProgressSink::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let tx = &rpc.sent_transactions()[0];
        assert_eq!(tx.message.recent_blockhash, stored);
        let first = tx.message.instructions[0].clone();
        let program = tx.message.account_keys[first.program_id_index as usize];
        let decompiled = solana_sdk::instruction::Instruction::new_with_bytes(program, &first.data, vec![]);
        assert!(is_advance_nonce(&decompiled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_hiccup_on_send_is_retried() {
        let rpc = MockRpc::confirming();
        rpc.fail_sends(1);
        let wallet = MockWallet::new();
        let payer = wallet.pubkey();
        let results = submit(
            &rpc,
            &wallet,
            SubmissionPlan::single(transfer_batch("a", &payer)),
            &fast_opts(),
            &ProgressSink::disabled(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(rpc.sent_transactions().len(), 1);
    }
}
