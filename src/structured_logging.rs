//! Structured logging keyed by pipeline correlation id

use solana_sdk::signature::Signature;

use crate::errors::DappError;
use crate::observability::{CorrelationId, PhaseTiming, RunTrace};

/// Structured logger for pipeline events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    correlation_id: CorrelationId,
    pipeline: &'static str,
}

impl StructuredLogger {
    pub fn new(pipeline: &'static str, correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            pipeline,
        }
    }

    pub fn for_run(trace: &RunTrace) -> Self {
        Self::new(trace.pipeline(), trace.correlation_id().clone())
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn log_batch_submitted(&self, batch_index: usize, label: &str, signature: &Signature) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            pipeline = self.pipeline,
            batch_index,
            label = %label,
            signature = %signature,
            "Batch submitted"
        );
    }

    pub fn log_batch_confirmed(&self, batch_index: usize, signature: &Signature, slot: u64, latency_ms: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            pipeline = self.pipeline,
            batch_index,
            signature = %signature,
            slot,
            latency_ms,
            "Batch confirmed"
        );
    }

    pub fn log_batch_failed(&self, batch_index: usize, error: &DappError) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            pipeline = self.pipeline,
            batch_index,
            category = error.category(),
            error = %error,
            "Batch failed"
        );
    }

    pub fn log_mint_phase(&self, phase: u8, step: u32) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            pipeline = self.pipeline,
            phase,
            step,
            "Mint progress"
        );
    }

    pub fn log_phase_finished(&self, timing: PhaseTiming) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            pipeline = self.pipeline,
            phase = timing.phase,
            elapsed_ms = timing.elapsed.as_millis() as u64,
            "Phase finished"
        );
    }

    pub fn log_upload(&self, file_count: usize, total_bytes: u64, manifest_id: Option<&str>) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            pipeline = self.pipeline,
            file_count,
            total_bytes,
            manifest_id = ?manifest_id,
            "Upload finished"
        );
    }

    pub fn log_swap(&self, pair: &str, amount_in: u64, minimum_out: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            pipeline = self.pipeline,
            pair = %pair,
            amount_in,
            minimum_out,
            "Executing swap"
        );
    }

    pub fn error(&self, message: &str, error: &DappError) {
        tracing::error!(
            correlation_id = %self.correlation_id,
            pipeline = self.pipeline,
            category = error.category(),
            error = %error,
            "{}",
            message
        );
    }
}
