//! Test Utilities Module
//!
//! In-memory stand-ins for the network, the user's wallet, the storage
//! gateway and the swap program. All of them are deterministic and record
//! what the pipelines asked of them.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{
    account::Account,
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    nonce::state::{Data, DurableNonce as StoredNonce, State, Versions},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::{DappError, DappResult};
use crate::rpc::{ChainRpc, SignatureStatus};
use crate::storage::{GatewayMessage, GatewayResponse, StorageGateway, UploadRequest, MANIFEST_FILE_NAME};
use crate::swap::{ProgramQuote, SwapProgramClient};
use crate::types::CommitmentLevel;
use crate::wallet::{LocalWallet, WalletAdapter};

/// Program id the mock swap program emits its instruction under
pub const MOCK_SWAP_PROGRAM_ID: Pubkey = Pubkey::new_from_array([7u8; 32]);

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, Account>,
    sent: Vec<Transaction>,
    outcomes: HashMap<Signature, Option<String>>,
    scripted: HashMap<Signature, VecDeque<Option<SignatureStatus>>>,
    last_scripted: HashMap<Signature, Option<SignatureStatus>>,
    fail_at: HashMap<usize, String>,
    failing_sends: usize,
    failing_polls: usize,
    slot: u64,
}

/// In-memory ledger implementing [`ChainRpc`]
///
/// Unscripted signatures of sent transactions confirm immediately when the
/// ledger was built with [`MockRpc::confirming`]; otherwise they are never
/// seen.
pub struct MockRpc {
    state: Mutex<LedgerState>,
    auto_confirm: bool,
    blockhash: Hash,
    status_polls: AtomicUsize,
}

impl MockRpc {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                slot: 100,
                ..LedgerState::default()
            }),
            auto_confirm: false,
            blockhash: Hash::new_from_array([3u8; 32]),
            status_polls: AtomicUsize::new(0),
        }
    }

    /// Ledger that confirms every sent transaction on the first poll
    pub fn confirming() -> Self {
        Self {
            auto_confirm: true,
            ..Self::new()
        }
    }

    pub fn blockhash(&self) -> Hash {
        self.blockhash
    }

    pub fn set_account(&self, address: Pubkey, account: Account) {
        self.state.lock().accounts.insert(address, account);
    }

    /// Store an initialized nonce account and return its durable blockhash
    pub fn install_nonce_account(&self, address: Pubkey, authority: Pubkey) -> Hash {
        let (account, blockhash) = nonce_account(&authority, &Hash::new_from_array([9u8; 32]));
        self.set_account(address, account);
        blockhash
    }

    /// Statuses returned for `signature`, one per poll; the last one repeats
    pub fn script_statuses(&self, signature: Signature, statuses: Vec<Option<SignatureStatus>>) {
        self.state.lock().scripted.insert(signature, statuses.into());
    }

    /// The next `count` status polls fail with an RPC error
    pub fn fail_status_polls(&self, count: usize) {
        self.state.lock().failing_polls = count;
    }

    /// The next `count` sends fail with an RPC error before reaching the ledger
    pub fn fail_sends(&self, count: usize) {
        self.state.lock().failing_sends = count;
    }

    /// The `index`-th accepted transaction lands with `reason` as its error
    pub fn fail_transaction_at(&self, index: usize, reason: &str) {
        self.state.lock().fail_at.insert(index, reason.to_string());
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.state.lock().sent.clone()
    }

    fn status_for(&self, state: &mut LedgerState, signature: &Signature) -> Option<SignatureStatus> {
        if let Some(queue) = state.scripted.get_mut(signature) {
            return match queue.pop_front() {
                Some(status) => {
                    state.last_scripted.insert(*signature, status.clone());
                    status
                }
                None => state.last_scripted.get(signature).cloned().flatten(),
            };
        }

        let outcome = state.outcomes.get(signature).cloned()?;
        if outcome.is_none() && !self.auto_confirm {
            return None;
        }
        state.slot += 1;
        Some(SignatureStatus {
            slot: state.slot,
            err: outcome,
            confirmation: Some(CommitmentLevel::Confirmed),
        })
    }
}

impl Default for MockRpc {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainRpc for MockRpc {
    async fn get_minimum_balance_for_rent_exemption(&self, data_len: usize) -> DappResult<u64> {
        Ok((data_len as u64 + 128) * 6_960)
    }

    async fn get_account(&self, address: &Pubkey) -> DappResult<Option<Account>> {
        Ok(self.state.lock().accounts.get(address).cloned())
    }

    async fn get_latest_blockhash(&self) -> DappResult<Hash> {
        Ok(self.blockhash)
    }

    async fn send_transaction(&self, transaction: &Transaction) -> DappResult<Signature> {
        let mut state = self.state.lock();
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(DappError::Rpc("connection reset by peer".to_string()));
        }
        transaction
            .verify()
            .map_err(|e| DappError::Rpc(format!("transaction signature verification failure: {}", e)))?;

        let index = state.sent.len();
        let signature = transaction.signatures[0];
        let outcome = state.fail_at.remove(&index);
        state.outcomes.insert(signature, outcome);
        state.sent.push(transaction.clone());
        Ok(signature)
    }

    async fn get_signature_statuses(&self, signatures: &[Signature]) -> DappResult<Vec<Option<SignatureStatus>>> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(DappError::Rpc("429 Too Many Requests".to_string()));
        }
        Ok(signatures
            .iter()
            .map(|sig| self.status_for(&mut state, sig))
            .collect())
    }
}

/// System-owned nonce account for `authority` and its durable blockhash
pub fn nonce_account(authority: &Pubkey, seed: &Hash) -> (Account, Hash) {
    let data = Data::new(*authority, StoredNonce::from_blockhash(seed), 5_000);
    let blockhash = data.blockhash();
    let bytes = bincode::serialize(&Versions::new(State::Initialized(data))).unwrap_or_default();
    (
        Account {
            lamports: 1_447_680,
            data: bytes,
            owner: solana_sdk::system_program::id(),
            executable: false,
            rent_epoch: 0,
        },
        blockhash,
    )
}

/// Local keypair wallet that can be told to refuse
pub struct MockWallet {
    inner: LocalWallet,
    refuse: bool,
    sign_calls: AtomicUsize,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::from_keypair(Keypair::new())
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            inner: LocalWallet::from_keypair(keypair),
            refuse: false,
            sign_calls: AtomicUsize::new(0),
        }
    }

    /// Wallet whose user rejects every request
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new()
        }
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletAdapter for MockWallet {
    fn pubkey(&self) -> Pubkey {
        self.inner.pubkey()
    }

    async fn sign_transaction(&self, transaction: &mut Transaction) -> DappResult<()> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(DappError::Signing("User rejected the request".to_string()));
        }
        self.inner.sign_transaction(transaction).await
    }
}

/// Storage gateway answering every upload with a fixed manifest id
pub struct MockStorageGateway {
    manifest_id: Option<String>,
    error: Option<String>,
    requests: Mutex<Vec<UploadRequest>>,
}

impl MockStorageGateway {
    pub fn new(manifest_id: &str) -> Self {
        Self {
            manifest_id: Some(manifest_id.to_string()),
            error: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Gateway reporting `error` in the response body
    pub fn failing(error: &str) -> Self {
        Self {
            manifest_id: None,
            error: Some(error.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Gateway that accepts files but never reports a manifest transaction
    pub fn without_manifest() -> Self {
        Self {
            manifest_id: None,
            error: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn upload_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<UploadRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl StorageGateway for MockStorageGateway {
    async fn upload(&self, request: &UploadRequest) -> DappResult<GatewayResponse> {
        self.requests.lock().push(request.clone());
        if let Some(error) = &self.error {
            return Ok(GatewayResponse {
                error: Some(error.clone()),
                messages: vec![],
            });
        }

        let mut messages: Vec<GatewayMessage> = request
            .files
            .iter()
            .map(|f| GatewayMessage {
                filename: f.name.clone(),
                status: "success".to_string(),
                transaction_id: Some(format!("tx-{}", f.name)),
                error: None,
            })
            .collect();
        messages.push(GatewayMessage {
            filename: MANIFEST_FILE_NAME.to_string(),
            status: "success".to_string(),
            transaction_id: self.manifest_id.clone(),
            error: None,
        });
        Ok(GatewayResponse { error: None, messages })
    }
}

/// Swap program quoting at a fixed rate
///
/// Quotes return `amount_in * rate` base units unless outputs were scripted.
/// The swap instruction carries `minimum_out` as its little-endian data.
pub struct MockSwapProgram {
    rate: f64,
    price_impact: f64,
    scripted_outputs: Mutex<VecDeque<u64>>,
    fail_quotes: bool,
    quote_calls: AtomicUsize,
    minimum_outs: Mutex<Vec<u64>>,
}

impl MockSwapProgram {
    pub fn with_rate(rate: f64) -> Self {
        Self {
            rate,
            price_impact: 0.001,
            scripted_outputs: Mutex::new(VecDeque::new()),
            fail_quotes: false,
            quote_calls: AtomicUsize::new(0),
            minimum_outs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_quotes: true,
            ..Self::with_rate(0.0)
        }
    }

    /// Outputs returned by the next quotes, in order
    pub fn script_outputs(&self, outputs: Vec<u64>) {
        *self.scripted_outputs.lock() = outputs.into();
    }

    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    /// `minimum_out` of every swap instruction built so far
    pub fn minimum_outs(&self) -> Vec<u64> {
        self.minimum_outs.lock().clone()
    }

    /// Decode the minimum output a mock swap instruction encodes
    pub fn decode_minimum_out(data: &[u8]) -> Option<u64> {
        data.get(..8)
            .and_then(|bytes| bytes.try_into().ok())
            .map(u64::from_le_bytes)
    }
}

#[async_trait]
impl SwapProgramClient for MockSwapProgram {
    async fn get_quote(&self, _mint_in: &Pubkey, _mint_out: &Pubkey, amount_in: u64) -> DappResult<ProgramQuote> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_quotes {
            return Err(DappError::Quote("pool account not found".to_string()));
        }
        let output_amount = self
            .scripted_outputs
            .lock()
            .pop_front()
            .unwrap_or((amount_in as f64 * self.rate) as u64);
        Ok(ProgramQuote {
            output_amount,
            price_impact: self.price_impact,
        })
    }

    async fn create_swap_instructions(
        &self,
        _mint_in: &Pubkey,
        _mint_out: &Pubkey,
        _amount_in: u64,
        minimum_out: u64,
        payer: &Pubkey,
    ) -> DappResult<Vec<Instruction>> {
        self.minimum_outs.lock().push(minimum_out);
        Ok(vec![Instruction::new_with_bytes(
            MOCK_SWAP_PROGRAM_ID,
            &minimum_out.to_le_bytes(),
            vec![AccountMeta::new(*payer, true)],
        )])
    }
}
