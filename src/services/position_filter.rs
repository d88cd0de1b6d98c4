//! Position filter - gates noisy and out-of-order samples
//!
//! The filter only decides accept/reject. It never mutates or smooths
//! coordinates. The caller owns the per-device last accepted timestamp and
//! advances it only for accepted samples.

use crate::domain::types::PositionSample;
use std::fmt;

/// Why a sample was dropped. A normal gating outcome, not a fault.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Timestamp not strictly after the last accepted one (reordered or duplicate)
    Stale { last_ms: u64, ts_ms: u64 },
    /// Accuracy radius above the configured maximum
    Inaccurate { accuracy_m: f64, max_m: f64 },
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Stale { .. } => "stale",
            Rejection::Inaccurate { .. } => "inaccurate",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Stale { last_ms, ts_ms } => {
                write!(f, "stale sample: ts {ts_ms} <= last accepted {last_ms}")
            }
            Rejection::Inaccurate { accuracy_m, max_m } => {
                write!(f, "accuracy {accuracy_m:.1}m exceeds {max_m:.1}m")
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PositionFilter {
    max_accuracy_m: f64,
}

impl PositionFilter {
    pub fn new(max_accuracy_m: f64) -> Self {
        Self { max_accuracy_m }
    }

    pub fn max_accuracy_m(&self) -> f64 {
        self.max_accuracy_m
    }

    /// Accept or reject `sample` given the device's last accepted timestamp.
    ///
    /// The ordering check runs first so a replayed sample is always reported
    /// as stale, whatever its accuracy.
    pub fn accept(
        &self,
        sample: PositionSample,
        last_accepted_ms: Option<u64>,
    ) -> Result<PositionSample, Rejection> {
        if let Some(last_ms) = last_accepted_ms {
            if sample.timestamp_ms <= last_ms {
                return Err(Rejection::Stale { last_ms, ts_ms: sample.timestamp_ms });
            }
        }
        if sample.accuracy_m > self.max_accuracy_m {
            return Err(Rejection::Inaccurate {
                accuracy_m: sample.accuracy_m,
                max_m: self.max_accuracy_m,
            });
        }
        Ok(sample)
    }
}
