//! Pipeline scenario tests
//!
//! End-to-end runs of the mint, swap and launchpad pipelines against the
//! in-memory ledger, wallet, storage gateway and swap program.

mod mint_pipeline_tests;
