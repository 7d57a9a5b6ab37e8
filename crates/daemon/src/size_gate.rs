//! Size Gate Module
//!
//! Post-encode decision: an output replaces its original only when it is strictly smaller.

use serde::{Deserialize, Serialize};

/// Result of the size gate check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SizeGateResult {
    /// Output is strictly smaller than the original
    Accept,
    /// Output is the same size or larger
    Reject {
        original_bytes: u64,
        output_bytes: u64,
        ratio: f32,
    },
}

impl SizeGateResult {
    pub fn is_accept(&self) -> bool {
        matches!(self, SizeGateResult::Accept)
    }
}

/// Check if the output file size passes the size gate.
///
/// Returns `Accept` if `output_bytes < original_bytes`, otherwise `Reject`
/// carrying the observed output/original ratio.
pub fn check_size_gate(original_bytes: u64, output_bytes: u64) -> SizeGateResult {
    if output_bytes < original_bytes {
        return SizeGateResult::Accept;
    }

    let ratio = if original_bytes > 0 {
        output_bytes as f32 / original_bytes as f32
    } else {
        f32::INFINITY
    };
    SizeGateResult::Reject {
        original_bytes,
        output_bytes,
        ratio,
    }
}
