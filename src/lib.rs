//! dApp transaction pipeline library
//!
//! Assembles, signs, submits and confirms Solana transactions for NFT
//! minting (with durable media storage), launchpad mints and token swaps.

pub mod address;
pub mod config;
pub mod errors;
pub mod launchpad;
pub mod metrics;
pub mod mint;
pub mod nonce;
pub mod observability;
pub mod retry;
pub mod rpc;
pub mod storage;
pub mod structured_logging;
pub mod submitter;
pub mod swap;
pub mod swap_client;
pub mod tx_builder;
pub mod types;
pub mod wallet;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use errors::{DappError, DappResult, MintError};
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
pub use submitter::{submit, ProgressSink, SubmissionPlan, SubmitOptions};
pub use types::{CommitmentLevel, ProgressEvent, SequenceType, SubmissionResult};
