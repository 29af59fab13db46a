//! Storage cost estimation

use crate::errors::{DappError, DappResult};

/// Prices a set of files in lamports
pub trait StoragePricer: Send + Sync {
    fn estimate_lamports(&self, file_sizes: &[u64]) -> DappResult<u64>;
}

/// Cost linear in stored bytes, with a fixed per-file overhead
///
/// `lamports = ceil(lamports_per_byte * sum(size + overhead))`, never below
/// `minimum_lamports`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearPricer {
    pub lamports_per_byte: f64,
    pub per_file_overhead_bytes: u64,
    pub minimum_lamports: u64,
}

impl Default for LinearPricer {
    fn default() -> Self {
        Self {
            lamports_per_byte: 2.5,
            per_file_overhead_bytes: 1_024,
            minimum_lamports: 5_000,
        }
    }
}

impl StoragePricer for LinearPricer {
    fn estimate_lamports(&self, file_sizes: &[u64]) -> DappResult<u64> {
        if file_sizes.is_empty() {
            return Err(DappError::validation("no files to price"));
        }
        if !self.lamports_per_byte.is_finite() || self.lamports_per_byte < 0.0 {
            return Err(DappError::Configuration(format!(
                "invalid storage rate {}",
                self.lamports_per_byte
            )));
        }

        let billable: u64 = file_sizes
            .iter()
            .map(|size| size.saturating_add(self.per_file_overhead_bytes))
            .fold(0u64, u64::saturating_add);
        let lamports = (billable as f64 * self.lamports_per_byte).ceil() as u64;
        Ok(lamports.max(self.minimum_lamports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_estimate() {
        let pricer = LinearPricer {
            lamports_per_byte: 2.0,
            per_file_overhead_bytes: 100,
            minimum_lamports: 0,
        };
        assert_eq!(pricer.estimate_lamports(&[1_200, 300]).unwrap(), 3_400);
    }

    #[test]
    fn test_minimum_applies() {
        let pricer = LinearPricer::default();
        assert_eq!(pricer.estimate_lamports(&[0]).unwrap(), 5_000);
        assert!(pricer.estimate_lamports(&[1_200]).unwrap() > 0);
    }

    #[test]
    fn test_rejects_empty_and_bad_rate() {
        assert!(LinearPricer::default().estimate_lamports(&[]).is_err());
        let pricer = LinearPricer {
            lamports_per_byte: f64::NAN,
            ..LinearPricer::default()
        };
        assert!(matches!(pricer.estimate_lamports(&[1]), Err(DappError::Configuration(_))));
    }
}
