//! Leverage scoring seam.
//!
//! Contrarian scoring is owned by another team; the tracker only forwards
//! current ownership to whatever `LeverageCalculator` it was built with and
//! stores the result on each snapshot.

use std::collections::HashMap;

use crate::types::{OwnershipMap, PlayerId};

/// Pure function from ownership to per-player leverage.
#[cfg_attr(test, mockall::automock)]
pub trait LeverageCalculator: Send + Sync {
    fn calculate_leverage_scores(
        &self,
        ownership: &OwnershipMap,
        total_entries: u64,
    ) -> HashMap<PlayerId, f64>;
}

/// Baseline scorer: the less owned a player is, the higher the score.
///
/// score = (1 - ownership/100) × depth, where depth grows with the field
/// size and saturates at 1.0 for fields of `full_depth_entries` or more.
#[derive(Debug, Clone)]
pub struct InverseOwnershipLeverage {
    pub full_depth_entries: u64,
}

impl Default for InverseOwnershipLeverage {
    fn default() -> Self {
        Self {
            full_depth_entries: 10_000,
        }
    }
}

impl LeverageCalculator for InverseOwnershipLeverage {
    fn calculate_leverage_scores(
        &self,
        ownership: &OwnershipMap,
        total_entries: u64,
    ) -> HashMap<PlayerId, f64> {
        let depth = if self.full_depth_entries == 0 {
            1.0
        } else {
            (total_entries as f64 / self.full_depth_entries as f64).min(1.0)
        };

        ownership
            .iter()
            .map(|(player, pct)| {
                let owned = (pct / 100.0).clamp(0.0, 1.0);
                (player.clone(), (1.0 - owned) * depth)
            })
            .collect()
    }
}
