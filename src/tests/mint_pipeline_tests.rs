//! Mint orchestrator scenarios

use std::sync::Arc;
use std::time::Duration;

use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer, transaction::Transaction};
use tokio_util::sync::CancellationToken;

use crate::address::TOKEN_METADATA_PROGRAM_ID;
use crate::errors::DappError;
use crate::mint::{MintOrchestrator, MintSettings, MintState, PHASE_METADATA_PATCH, PHASE_PAY_AND_CREATE, PHASE_UPLOAD};
use crate::rpc::confirm::ConfirmOptions;
use crate::storage::LinearPricer;
use crate::submitter::{ProgressSink, SubmitOptions};
use crate::test_utils::{MockRpc, MockStorageGateway, MockWallet};
use crate::types::{CommitmentLevel, MediaFile, MintRequest, ProgressEvent};

fn art1() -> MintRequest {
    MintRequest {
        name: "Art1".to_string(),
        symbol: "ART".to_string(),
        description: "first piece".to_string(),
        files: vec![MediaFile::new("art1.png", vec![42u8; 1_200]).with_content_type("image/png")],
        seller_fee_basis_points: 500,
        creators: vec![],
        max_supply: Some(1),
        image: None,
        animation_url: None,
        external_url: None,
        attributes: vec![],
    }
}

fn settings() -> MintSettings {
    MintSettings {
        submit: SubmitOptions {
            confirm: ConfirmOptions {
                commitment: CommitmentLevel::Confirmed,
                timeout: Duration::from_secs(30),
                poll_interval: Duration::from_millis(500),
            },
            ..SubmitOptions::default()
        },
        ..MintSettings::default()
    }
}

fn orchestrator(rpc: Arc<MockRpc>, wallet: Arc<MockWallet>, gateway: Arc<MockStorageGateway>) -> MintOrchestrator {
    MintOrchestrator::new(rpc, wallet, gateway, Arc::new(LinearPricer::default()), settings())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Data of every token-metadata instruction in `tx`
fn metadata_instruction_data(tx: &Transaction) -> Vec<Vec<u8>> {
    tx.message
        .instructions
        .iter()
        .filter(|ix| tx.message.account_keys[ix.program_id_index as usize] == TOKEN_METADATA_PROGRAM_ID)
        .map(|ix| ix.data.clone())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_art1_mints_with_manifest_uri() {
    let rpc = Arc::new(MockRpc::confirming());
    let gateway = Arc::new(MockStorageGateway::new("abc"));
    let (sink, mut rx) = ProgressSink::channel();
    let mut mint = orchestrator(rpc.clone(), Arc::new(MockWallet::new()), gateway.clone()).with_progress(sink);

    let lamports = mint.prepare(art1()).unwrap();
    assert!(lamports > 0);

    let outcome = mint.confirm(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.uri, "https://arweave.net/abc");
    assert_eq!(mint.state(), &MintState::Succeeded { metadata: outcome.addresses.metadata });
    assert_ne!(outcome.addresses.metadata, Pubkey::default());

    // pay-and-create, then metadata patch
    let sent = rpc.sent_transactions();
    assert_eq!(sent.len(), 2);
    assert!(metadata_instruction_data(&sent[1])
        .iter()
        .any(|data| contains(data, b"https://arweave.net/abc")));

    // the upload is tagged with the funding transaction and the mint
    let uploads = gateway.requests();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].transaction, sent[0].signatures[0]);
    assert!(uploads[0].files.iter().any(|f| f.name == "metadata.json"));

    let mut steps = vec![];
    while let Ok(event) = rx.try_recv() {
        if let ProgressEvent::MintProgress { phase, step } = event {
            steps.push((phase, step));
        }
    }
    assert_eq!(steps.first(), Some(&(PHASE_PAY_AND_CREATE, 1)));
    assert_eq!(steps.last(), Some(&(PHASE_METADATA_PATCH, 8)));
    assert!(steps.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[tokio::test(start_paused = true)]
async fn test_phase_zero_failure_skips_upload_and_patch() {
    let rpc = Arc::new(MockRpc::confirming());
    rpc.fail_transaction_at(0, "insufficient funds for rent");
    let gateway = Arc::new(MockStorageGateway::new("abc"));
    let mut mint = orchestrator(rpc.clone(), Arc::new(MockWallet::new()), gateway.clone());

    mint.prepare(art1()).unwrap();
    let err = mint.confirm(&CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.phase, PHASE_PAY_AND_CREATE);
    assert!(matches!(err.source, DappError::TransactionFailed { .. }));
    assert!(matches!(mint.state(), MintState::Failed { phase: 0, .. }));
    assert_eq!(gateway.upload_count(), 0);
    assert_eq!(rpc.sent_transactions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_refused_signature_fails_phase_zero() {
    let rpc = Arc::new(MockRpc::confirming());
    let gateway = Arc::new(MockStorageGateway::new("abc"));
    let mut mint = orchestrator(rpc.clone(), Arc::new(MockWallet::refusing()), gateway.clone());

    mint.prepare(art1()).unwrap();
    let err = mint.confirm(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.phase, PHASE_PAY_AND_CREATE);
    assert!(matches!(err.source, DappError::Signing(_)));
    assert!(rpc.sent_transactions().is_empty());
    assert_eq!(gateway.upload_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_upload_failure_leaves_mint_recoverable() {
    let rpc = Arc::new(MockRpc::confirming());
    let wallet = Arc::new(MockWallet::new());
    let mut mint = orchestrator(rpc.clone(), wallet.clone(), Arc::new(MockStorageGateway::failing("Transaction not found")));

    mint.prepare(art1()).unwrap();
    let err = mint.confirm(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.phase, PHASE_UPLOAD);
    assert!(matches!(err.source, DappError::Upload(_)));
    assert_eq!(rpc.sent_transactions().len(), 1);

    // the created mint is the second writable signer of the funding transaction
    let funding = &rpc.sent_transactions()[0];
    let mint_key = funding.message.account_keys[1];

    let gateway = Arc::new(MockStorageGateway::new("def"));
    let mut retry = orchestrator(rpc.clone(), wallet, gateway.clone());
    let outcome = retry
        .retry_upload(&art1(), mint_key, funding.signatures[0], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome.uri, "https://arweave.net/def");
    assert_eq!(outcome.addresses.mint, mint_key);
    assert_eq!(gateway.upload_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_metadata_patch_retry_is_idempotent() {
    let keypair = Keypair::new();
    let gateway = Arc::new(MockStorageGateway::new("abc"));

    let first_rpc = Arc::new(MockRpc::confirming());
    let mut first = orchestrator(
        first_rpc.clone(),
        Arc::new(MockWallet::from_keypair(keypair.insecure_clone())),
        gateway.clone(),
    );
    first.prepare(art1()).unwrap();
    let outcome = first.confirm(&CancellationToken::new()).await.unwrap();

    let retry_rpc = Arc::new(MockRpc::confirming());
    let mut retry = orchestrator(
        retry_rpc.clone(),
        Arc::new(MockWallet::from_keypair(keypair.insecure_clone())),
        gateway,
    );
    let repaired = retry
        .retry_metadata_patch(&art1(), outcome.addresses.mint, outcome.manifest.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(repaired.uri, outcome.uri);
    assert_eq!(repaired.addresses, outcome.addresses);
    assert_eq!(retry.state(), &MintState::Succeeded { metadata: outcome.addresses.metadata });

    let original_patch = &first_rpc.sent_transactions()[1];
    let retried_patch = &retry_rpc.sent_transactions()[0];
    assert_eq!(retry_rpc.sent_transactions().len(), 1);
    assert_eq!(original_patch.message, retried_patch.message);
    assert_eq!(
        metadata_instruction_data(original_patch),
        metadata_instruction_data(retried_patch)
    );
    assert_eq!(keypair.pubkey(), original_patch.message.account_keys[0]);
}

#[tokio::test(start_paused = true)]
async fn test_files_paid_for_follows_payment_confirmation() {
    let rpc = Arc::new(MockRpc::confirming());
    let (sink, mut rx) = ProgressSink::channel();
    let mut mint = orchestrator(rpc.clone(), Arc::new(MockWallet::new()), Arc::new(MockStorageGateway::new("abc")))
        .with_progress(sink);

    let lamports = mint.prepare(art1()).unwrap();
    mint.confirm(&CancellationToken::new()).await.unwrap();

    let events: Vec<ProgressEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    let paid = events
        .iter()
        .position(|e| *e == ProgressEvent::FilesPaidFor { lamports })
        .unwrap();
    let funding_confirmed = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::Confirmed { .. }))
        .unwrap();
    assert!(funding_confirmed < paid);
}

#[tokio::test(start_paused = true)]
async fn test_failed_payment_never_reports_files_paid_for() {
    let rpc = Arc::new(MockRpc::confirming());
    rpc.fail_transaction_at(0, "insufficient lamports");
    let (sink, mut rx) = ProgressSink::channel();
    let mut mint = orchestrator(rpc, Arc::new(MockWallet::new()), Arc::new(MockStorageGateway::new("abc")))
        .with_progress(sink);

    mint.prepare(art1()).unwrap();
    assert!(mint.confirm(&CancellationToken::new()).await.is_err());
    assert!(std::iter::from_fn(|| rx.try_recv().ok()).all(|e| !matches!(e, ProgressEvent::FilesPaidFor { .. })));
}
