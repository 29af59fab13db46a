//! Instruction assembly for every pipeline the crate drives
//!
//! ## Architecture
//!
//! - **batch**: `InstructionBatch`, an ordered atomic instruction group plus
//!   its ephemeral co-signers, and signer validation
//! - **context**: blockhash vs. durable nonce execution context; compiles a
//!   batch into an unsigned transaction
//! - **instructions**: instruction planning, ordering checks, memo and
//!   Anchor instruction helpers
//! - **metadata**: token metadata program encoders (borsh)
//! - **nft**: mint pipeline phase builders (pay-for-storage, metadata patch)
//! - **launchpad**: candy machine / magic hat mint builders and the
//!   remaining-accounts rule table
//! - **swap**: native asset wrap/unwrap and swap transaction assembly
//!
//! ## Ordering
//!
//! Durable transactions always start with `advance_nonce_account`; every
//! builder emits dependent instructions after the ones they depend on
//! (create account → initialize → transfer/mint → metadata).

pub mod batch;
pub mod context;
pub mod instructions;
pub mod launchpad;
pub mod metadata;
pub mod nft;
pub mod swap;

pub use batch::InstructionBatch;
pub use context::{DurableNonce, ExecutionContext};
pub use instructions::{plan_instructions, sanity_check_ix_order, InstructionPlan};
