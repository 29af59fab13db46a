//! Error types for the transaction assembly and confirmation pipeline
//!
//! One taxonomy covers every stage a pipeline can fail in:
//! - Request validation (before any network call)
//! - Instruction assembly and address derivation
//! - Wallet signing
//! - Submission and confirmation
//! - Storage gateway uploads
//! - Swap quotes and slippage bounds

use solana_sdk::signature::Signature;
use thiserror::Error;

/// Comprehensive error type for all pipeline operations
#[derive(Error, Debug)]
pub enum DappError {
    /// Malformed request, caught before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// The wallet refused or cancelled the signature request
    #[error("Signing failed: {0}")]
    Signing(String),

    /// A batch was rejected by the network
    ///
    /// `failed_index` is the position of the batch in the submitted sequence
    #[error("Submission of batch {failed_index} failed: {cause}")]
    Submission {
        failed_index: usize,
        cause: Box<DappError>,
    },

    /// Confirmation was not observed within the caller's bound
    ///
    /// The transaction may still land later; this is a reporting failure
    #[error("Confirmation of {signature} not observed after {waited_ms}ms")]
    Timeout { signature: Signature, waited_ms: u64 },

    /// The transaction landed but the program returned an error
    #[error("Transaction {signature} failed on-chain: {reason}")]
    TransactionFailed { signature: Signature, reason: String },

    /// Storage gateway non-success response or non-2xx HTTP status
    #[error("Upload failed: {0}")]
    Upload(String),

    /// External pricing or quote call failed
    #[error("Quote failed: {0}")]
    Quote(String),

    /// The realized quote no longer satisfies the minimum output bound
    #[error("Slippage exceeded: minimum out {minimum_out}, realized {realized_out}")]
    SlippageExceeded { minimum_out: u64, realized_out: u64 },

    /// RPC communication failure
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild { program: String, reason: String },

    /// Batch violates the required instruction ordering
    #[error("Invalid instruction order: {0}")]
    InvalidInstructionOrder(String),

    /// Supplied signers do not match the signing keys the instructions require
    #[error("Signer mismatch: {0}")]
    SignerMismatch(String),

    /// PDA bump space exhausted
    #[error("Address derivation failed: {0}")]
    AddressDerivation(String),

    /// The caller cancelled the pipeline
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration or constraint violation
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DappResult<T> = Result<T, DappError>;

impl DappError {
    /// Check if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rpc(_) => true,
            Self::Timeout { .. } => true,
            Self::Upload(_) => true,
            Self::Quote(_) => true,
            Self::Submission { cause, .. } => cause.is_retryable(),

            Self::Validation(_) => false,
            Self::Signing(_) => false,
            Self::TransactionFailed { .. } => false,
            Self::SlippageExceeded { .. } => false,
            Self::InstructionBuild { .. } => false,
            Self::InvalidInstructionOrder(_) => false,
            Self::SignerMismatch(_) => false,
            Self::AddressDerivation(_) => false,
            Self::Cancelled(_) => false,
            Self::Configuration(_) => false,
            Self::Internal(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Signing(_) => "signing",
            Self::Submission { .. } => "submission",
            Self::Timeout { .. } => "timeout",
            Self::TransactionFailed { .. } => "transaction",
            Self::Upload(_) => "upload",
            Self::Quote(_) => "quote",
            Self::SlippageExceeded { .. } => "slippage",
            Self::Rpc(_) => "rpc",
            Self::InstructionBuild { .. } => "instruction",
            Self::InvalidInstructionOrder(_) => "ordering",
            Self::SignerMismatch(_) => "signers",
            Self::AddressDerivation(_) => "address",
            Self::Cancelled(_) => "cancelled",
            Self::Configuration(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Strip `Submission` wrappers and return the underlying cause
    pub fn root_cause(&self) -> &DappError {
        match self {
            Self::Submission { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

// Convenience constructors for common error scenarios
impl DappError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn submission(failed_index: usize, cause: DappError) -> Self {
        Self::Submission {
            failed_index,
            cause: Box::new(cause),
        }
    }

    pub fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidInstructionOrder(reason.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

impl From<solana_client::client_error::ClientError> for DappError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        Self::Rpc(err.to_string())
    }
}

impl From<reqwest::Error> for DappError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upload(err.to_string())
    }
}

/// Mint pipeline failure tagged with the phase it originated in
///
/// Phase 0 is the pay-for-storage batch, phase 1 the upload and phase 2
/// the metadata patch. Phase-scoped retries key off `phase`.
#[derive(Error, Debug)]
#[error("Mint phase {phase} failed: {source}")]
pub struct MintError {
    pub phase: u8,
    #[source]
    pub source: DappError,
}

impl MintError {
    pub fn new(phase: u8, source: DappError) -> Self {
        Self { phase, source }
    }
}
