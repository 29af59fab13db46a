//! Confirmation polling
//!
//! A dispatched transaction cannot be retracted. Giving up, whether by
//! deadline or by cancellation, only stops the client from waiting, so both
//! surface as `Timeout` carrying the signature.

use std::time::Duration;

use solana_sdk::signature::Signature;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::errors::{DappError, DappResult};
use crate::rpc::ChainRpc;
use crate::types::{CommitmentLevel, ConfirmationStatus, SubmissionResult};

/// Default interval between status polls
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Default confirmation bound
pub const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 60_000;

/// How long and how deep to wait for a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmOptions {
    pub commitment: CommitmentLevel,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ConfirmOptions {
    fn default() -> Self {
        Self {
            commitment: CommitmentLevel::Confirmed,
            timeout: Duration::from_millis(DEFAULT_CONFIRM_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Poll `getSignatureStatuses` until `signature` reaches the requested commitment
///
/// # Errors
///
/// - `TransactionFailed` if the ledger reports an error for the signature
/// - `Timeout` once `timeout` elapses or `cancel` fires
pub async fn confirm_signature<R: ChainRpc + ?Sized>(
    rpc: &R,
    signature: &Signature,
    opts: &ConfirmOptions,
    cancel: &CancellationToken,
) -> DappResult<SubmissionResult> {
    let started = Instant::now();
    let deadline = started + opts.timeout;
    let timed_out = |started: Instant| DappError::Timeout {
        signature: *signature,
        waited_ms: started.elapsed().as_millis() as u64,
    };

    loop {
        match rpc.get_signature_statuses(&[*signature]).await {
            Ok(statuses) => match statuses.into_iter().next().flatten() {
                Some(status) => {
                    if let Some(reason) = status.err {
                        return Err(DappError::TransactionFailed {
                            signature: *signature,
                            reason,
                        });
                    }
                    if status.satisfies(opts.commitment) {
                        debug!(
                            signature = %signature,
                            slot = status.slot,
                            waited_ms = started.elapsed().as_millis() as u64,
                            "Signature confirmed"
                        );
                        return Ok(SubmissionResult {
                            signature: *signature,
                            status: ConfirmationStatus::Confirmed(opts.commitment),
                            slot: status.slot,
                        });
                    }
                    trace!(signature = %signature, level = ?status.confirmation, "Below requested commitment");
                }
                None => trace!(signature = %signature, "No status yet"),
            },
            Err(err) => {
                warn!(signature = %signature, error = %err, "Status poll failed, will retry");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(started));
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(signature = %signature, "Confirmation wait cancelled");
                return Err(timed_out(started));
            }
            _ = sleep(opts.poll_interval.min(deadline - now)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::SignatureStatus;
    use crate::test_utils::MockRpc;

    fn opts(timeout_ms: u64) -> ConfirmOptions {
        ConfirmOptions {
            commitment: CommitmentLevel::Confirmed,
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(2_000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirms_after_pending_polls() {
        let rpc = MockRpc::new();
        let sig = Signature::new_unique();
        rpc.script_statuses(
            sig,
            vec![
                None,
                Some(SignatureStatus { slot: 7, err: None, confirmation: Some(CommitmentLevel::Processed) }),
                Some(SignatureStatus { slot: 9, err: None, confirmation: Some(CommitmentLevel::Confirmed) }),
            ],
        );

        let result = confirm_signature(&rpc, &sig, &opts(60_000), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.slot, 9);
        assert!(result.status.is_success());
        assert_eq!(rpc.status_polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_error_is_transaction_failed() {
        let rpc = MockRpc::new();
        let sig = Signature::new_unique();
        rpc.script_statuses(
            sig,
            vec![Some(SignatureStatus {
                slot: 3,
                err: Some("custom program error: 0x1".to_string()),
                confirmation: Some(CommitmentLevel::Confirmed),
            })],
        );
        let err = confirm_signature(&rpc, &sig, &opts(60_000), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DappError::TransactionFailed { ref reason, .. } if reason.contains("0x1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_never_seen() {
        let rpc = MockRpc::new();
        let sig = Signature::new_unique();
        let err = confirm_signature(&rpc, &sig, &opts(5_000), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            DappError::Timeout { signature, waited_ms } => {
                assert_eq!(signature, sig);
                assert!(waited_ms >= 5_000);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_errors_keep_polling() {
        let rpc = MockRpc::new();
        let sig = Signature::new_unique();
        rpc.fail_status_polls(2);
        rpc.script_statuses(
            sig,
            vec![Some(SignatureStatus { slot: 4, err: None, confirmation: Some(CommitmentLevel::Finalized) })],
        );
        let result = confirm_signature(&rpc, &sig, &opts(60_000), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.slot, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_surfaces_timeout() {
        let rpc = MockRpc::new();
        let sig = Signature::new_unique();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = confirm_signature(&rpc, &sig, &opts(60_000), &cancel).await.unwrap_err();
        assert!(matches!(err, DappError::Timeout { .. }));
    }
}
