//! Run correlation and phase timing
//!
//! Every pipeline run (a mint, a launchpad submission, a swap) carries one
//! [`CorrelationId`] through its log lines and submissions. Multi-phase runs
//! also keep a [`RunTrace`], which times each phase as the run moves on.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Finished phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTiming {
    pub phase: u8,
    pub elapsed: Duration,
}

/// Timing state of one multi-phase run
#[derive(Debug, Clone)]
pub struct RunTrace {
    pipeline: &'static str,
    correlation_id: CorrelationId,
    started_at: DateTime<Utc>,
    current: Option<(u8, Instant)>,
}

impl RunTrace {
    pub fn start(pipeline: &'static str) -> Self {
        Self {
            pipeline,
            correlation_id: CorrelationId::new(),
            started_at: Utc::now(),
            current: None,
        }
    }

    pub fn pipeline(&self) -> &'static str {
        self.pipeline
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn current_phase(&self) -> Option<u8> {
        self.current.map(|(phase, _)| phase)
    }

    /// Move to `phase`. Returns the timing of the phase being left, if the
    /// run was in a different one. Re-entering the current phase is a no-op.
    pub fn enter(&mut self, phase: u8) -> Option<PhaseTiming> {
        match self.current {
            Some((current, _)) if current == phase => None,
            previous => {
                self.current = Some((phase, Instant::now()));
                previous.map(|(phase, since)| PhaseTiming {
                    phase,
                    elapsed: since.elapsed(),
                })
            }
        }
    }

    /// Close the current phase, e.g. when the run succeeds or fails
    pub fn finish(&mut self) -> Option<PhaseTiming> {
        self.current.take().map(|(phase, since)| PhaseTiming {
            phase,
            elapsed: since.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_reports_previous_phase_once() {
        let mut trace = RunTrace::start("mint");
        assert_eq!(trace.enter(0), None);
        assert_eq!(trace.enter(0), None);
        assert_eq!(trace.current_phase(), Some(0));

        let left = trace.enter(1).unwrap();
        assert_eq!(left.phase, 0);
        assert_eq!(trace.finish().map(|t| t.phase), Some(1));
        assert_eq!(trace.finish(), None);
    }

    #[test]
    fn test_correlation_ids_are_unique_and_compact() {
        let a = CorrelationId::new();
        assert_ne!(a, CorrelationId::new());
        assert_eq!(a.as_str().len(), 32);
        assert_eq!(serde_json::to_string(&a).unwrap(), format!("\"{}\"", a));
    }
}
