//! Mint orchestrator
//!
//! Drives one NFT mint through its three phases:
//!
//! 0. pay for storage, create the mint and placeholder metadata (one batch)
//! 1. upload the files, tagged with the phase-0 transaction
//! 2. patch the metadata with the manifest URI, mint the token, create the
//!    master edition (one batch)
//!
//! Nothing already confirmed is rolled back. A mint whose metadata still
//! points at the placeholder is a valid intermediate state; phase 1 and
//! phase 2 can be retried on their own with the known mint address.

use std::sync::Arc;

use solana_sdk::{
    program_pack::Pack,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::errors::{DappError, DappResult, MintError};
use crate::observability::RunTrace;
use crate::rpc::ChainRpc;
use crate::storage::{upload_files, MediaManifest, StorageGateway, StoragePricer, UploadRequest};
use crate::structured_logging::StructuredLogger;
use crate::submitter::{submit, ProgressSink, SubmissionPlan, SubmitOptions};
use crate::tx_builder::nft::{build_metadata_patch_batch, build_pay_and_create_batch, upload_file_set, MintAddresses};
use crate::types::{MediaFile, MintRequest, ProgressEvent, SequenceType};
use crate::wallet::WalletAdapter;

/// Phase indexes carried by [`MintError`]
pub const PHASE_PAY_AND_CREATE: u8 = 0;
pub const PHASE_UPLOAD: u8 = 1;
pub const PHASE_METADATA_PATCH: u8 = 2;

/// Orchestrator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintState {
    Idle,
    /// Price shown to the user, waiting for authorization
    AwaitingConfirm { lamports: u64 },
    Minting { phase: u8, step: u32 },
    Succeeded { metadata: Pubkey },
    Failed { phase: u8, reason: String },
}

/// Everything a successful run produced
#[derive(Debug, Clone)]
pub struct MintOutcome {
    pub addresses: MintAddresses,
    pub uri: String,
    pub manifest: MediaManifest,
    pub patch_signature: Signature,
}

/// Deployment-specific knobs
#[derive(Debug, Clone)]
pub struct MintSettings {
    /// Network name sent to the storage gateway
    pub storage_env: String,
    /// Base of the final metadata URI
    pub arweave_base_url: String,
    pub submit: SubmitOptions,
}

impl Default for MintSettings {
    fn default() -> Self {
        Self {
            storage_env: "mainnet-beta".to_string(),
            arweave_base_url: "https://arweave.net".to_string(),
            submit: SubmitOptions::default(),
        }
    }
}

struct PendingMint {
    request: MintRequest,
    files: Vec<MediaFile>,
    lamports: u64,
}

pub struct MintOrchestrator {
    rpc: Arc<dyn ChainRpc>,
    wallet: Arc<dyn WalletAdapter>,
    gateway: Arc<dyn StorageGateway>,
    pricer: Arc<dyn StoragePricer>,
    settings: MintSettings,
    progress: ProgressSink,
    state: MintState,
    pending: Option<PendingMint>,
    trace: RunTrace,
    logger: StructuredLogger,
}

impl MintOrchestrator {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        wallet: Arc<dyn WalletAdapter>,
        gateway: Arc<dyn StorageGateway>,
        pricer: Arc<dyn StoragePricer>,
        settings: MintSettings,
    ) -> Self {
        let trace = RunTrace::start("mint");
        let logger = StructuredLogger::for_run(&trace);
        Self {
            rpc,
            wallet,
            gateway,
            pricer,
            settings,
            progress: ProgressSink::disabled(),
            state: MintState::Idle,
            pending: None,
            trace,
            logger,
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> &MintState {
        &self.state
    }

    /// Validate `request` and price its storage
    ///
    /// Moves to `AwaitingConfirm` with the estimated lamports.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed request; the state is left unchanged.
    pub fn prepare(&mut self, request: MintRequest) -> DappResult<u64> {
        if matches!(self.state, MintState::Minting { .. }) {
            return Err(DappError::validation("a mint is already in progress"));
        }
        request.validate()?;
        let files = upload_file_set(&request)?;
        let sizes: Vec<u64> = files.iter().map(MediaFile::size).collect();
        let lamports = self.pricer.estimate_lamports(&sizes)?;

        info!(name = %request.name, files = files.len(), lamports, "Mint priced");
        self.pending = Some(PendingMint {
            request,
            files,
            lamports,
        });
        self.state = MintState::AwaitingConfirm { lamports };
        Ok(lamports)
    }

    /// Drop the pending request and return to `Idle`
    pub fn abandon(&mut self) {
        if matches!(self.state, MintState::AwaitingConfirm { .. }) {
            self.pending = None;
            self.state = MintState::Idle;
        }
    }

    /// Run all three phases for the prepared request
    #[instrument(skip_all, fields(correlation_id = %self.trace.correlation_id()))]
    pub async fn confirm(&mut self, cancel: &CancellationToken) -> Result<MintOutcome, MintError> {
        let Some(pending) = self.pending.take() else {
            return Err(MintError::new(
                PHASE_PAY_AND_CREATE,
                DappError::validation("no mint is awaiting confirmation"),
            ));
        };
        self.state = MintState::Minting {
            phase: PHASE_PAY_AND_CREATE,
            step: 0,
        };

        let result = self.run_all(&pending, cancel).await;
        self.finish(result)
    }

    /// Re-run the upload and the metadata patch for a mint whose phase 0
    /// already confirmed
    pub async fn retry_upload(
        &mut self,
        request: &MintRequest,
        mint: Pubkey,
        funding: Signature,
        cancel: &CancellationToken,
    ) -> Result<MintOutcome, MintError> {
        let result = self.upload_and_patch(request, mint, funding, cancel).await;
        self.finish(result)
    }

    /// Re-run phase 2 alone with an already confirmed mint and manifest
    ///
    /// Produces the same metadata content as an uninterrupted run.
    pub async fn retry_metadata_patch(
        &mut self,
        request: &MintRequest,
        mint: Pubkey,
        manifest: MediaManifest,
        cancel: &CancellationToken,
    ) -> Result<MintOutcome, MintError> {
        let result = self.patch(request, &mint, manifest, cancel).await;
        self.finish(result)
    }

    async fn run_all(&mut self, pending: &PendingMint, cancel: &CancellationToken) -> Result<MintOutcome, MintError> {
        let (mint, funding) = self.pay_and_create(pending, cancel).await?;
        let manifest = self.upload(&pending.files, &mint, funding).await?;
        self.patch(&pending.request, &mint, manifest, cancel).await
    }

    async fn upload_and_patch(
        &mut self,
        request: &MintRequest,
        mint: Pubkey,
        funding: Signature,
        cancel: &CancellationToken,
    ) -> Result<MintOutcome, MintError> {
        let files = upload_file_set(request).map_err(|e| MintError::new(PHASE_UPLOAD, e))?;
        let manifest = self.upload(&files, &mint, funding).await?;
        self.patch(request, &mint, manifest, cancel).await
    }

    async fn pay_and_create(
        &mut self,
        pending: &PendingMint,
        cancel: &CancellationToken,
    ) -> Result<(Pubkey, Signature), MintError> {
        let phase = PHASE_PAY_AND_CREATE;
        let fail = |e| MintError::new(phase, e);
        let payer = self.wallet.pubkey();

        self.advance(phase, 1);

        let mint_rent = self
            .rpc
            .get_minimum_balance_for_rent_exemption(spl_token::state::Mint::LEN)
            .await
            .map_err(fail)?;
        let mint_keypair = Arc::new(Keypair::new());
        let mint = mint_keypair.pubkey();
        let (batch, _) = build_pay_and_create_batch(
            &payer,
            &pending.request,
            &pending.files,
            pending.lamports,
            mint_rent,
            mint_keypair,
        )
        .map_err(fail)?;
        self.advance(phase, 2);

        let funding = self.submit_one(batch, phase, cancel).await?;
        self.progress.emit(ProgressEvent::FilesPaidFor {
            lamports: pending.lamports,
        });
        self.advance(phase, 4);

        info!(mint = %mint, signature = %funding, "Storage paid and mint created");
        Ok((mint, funding))
    }

    async fn upload(&mut self, files: &[MediaFile], mint: &Pubkey, funding: Signature) -> Result<MediaManifest, MintError> {
        let phase = PHASE_UPLOAD;
        self.advance(phase, 5);

        let request = UploadRequest::for_mint(funding, self.settings.storage_env.clone(), mint, files.to_vec());
        let manifest = upload_files(self.gateway.as_ref(), &request)
            .await
            .map_err(|e| MintError::new(phase, e))?;

        self.logger
            .log_upload(request.files.len(), request.total_bytes(), Some(&manifest.manifest_id));
        self.progress.emit(ProgressEvent::Uploaded {
            manifest_id: manifest.manifest_id.clone(),
        });
        self.advance(phase, 6);
        Ok(manifest)
    }

    async fn patch(
        &mut self,
        request: &MintRequest,
        mint: &Pubkey,
        manifest: MediaManifest,
        cancel: &CancellationToken,
    ) -> Result<MintOutcome, MintError> {
        let phase = PHASE_METADATA_PATCH;
        let fail = |e| MintError::new(phase, e);
        let payer = self.wallet.pubkey();

        let uri = manifest.uri(&self.settings.arweave_base_url);
        let batch = build_metadata_patch_batch(&payer, request, mint, &uri).map_err(fail)?;
        let addresses = MintAddresses::derive(&payer, mint).map_err(fail)?;
        self.advance(phase, 7);

        let patch_signature = self.submit_one(batch, phase, cancel).await?;
        self.advance(phase, 8);

        info!(mint = %mint, metadata = %addresses.metadata, uri = %uri, "Metadata finalized");
        Ok(MintOutcome {
            addresses,
            uri,
            manifest,
            patch_signature,
        })
    }

    async fn submit_one(
        &mut self,
        batch: crate::tx_builder::InstructionBatch,
        phase: u8,
        cancel: &CancellationToken,
    ) -> Result<Signature, MintError> {
        let opts = SubmitOptions {
            mode: SequenceType::StopOnFailure,
            correlation_id: Some(self.trace.correlation_id().clone()),
            ..self.settings.submit.clone()
        };
        if phase == PHASE_PAY_AND_CREATE {
            self.advance(phase, 3);
        }

        let results = submit(
            self.rpc.as_ref(),
            self.wallet.as_ref(),
            SubmissionPlan::single(batch),
            &opts,
            &self.progress,
            cancel,
        )
        .await
        .map_err(|e| MintError::new(phase, unwrap_submission(e)))?;

        results
            .first()
            .map(|r| r.signature)
            .ok_or_else(|| MintError::new(phase, DappError::internal("submitter returned no result")))
    }

    fn advance(&mut self, phase: u8, step: u32) {
        if let Some(timing) = self.trace.enter(phase) {
            self.logger.log_phase_finished(timing);
        }
        self.state = MintState::Minting { phase, step };
        self.logger.log_mint_phase(phase, step);
        self.progress.emit(ProgressEvent::MintProgress { phase, step });
    }

    fn finish(&mut self, result: Result<MintOutcome, MintError>) -> Result<MintOutcome, MintError> {
        if let Some(timing) = self.trace.finish() {
            self.logger.log_phase_finished(timing);
        }
        match &result {
            Ok(outcome) => {
                self.state = MintState::Succeeded {
                    metadata: outcome.addresses.metadata,
                };
            }
            Err(err) => {
                self.logger.error("Mint failed", &err.source);
                self.state = MintState::Failed {
                    phase: err.phase,
                    reason: err.source.to_string(),
                };
            }
        }
        result
    }
}

/// A single-batch submission failure is reported by its cause
fn unwrap_submission(err: DappError) -> DappError {
    match err {
        DappError::Submission { cause, .. } => *cause,
        other => other,
    }
}
