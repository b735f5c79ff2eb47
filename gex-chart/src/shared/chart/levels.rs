//! Overlay price levels and per-strike gamma
//!
//! Both sets are replaced as whole snapshots behind an [`Arc`] swap, so a reader
//! holding the previous snapshot never sees a mix of two updates.

use crate::shared::types::{LevelKind, LevelSet, StrikeGamma};
use std::sync::Arc;
use tracing::{debug, warn};

/// Level kinds whose drawn value differs between two snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelDiff {
    pub changed: Vec<LevelKind>,
}

impl LevelDiff {
    pub fn between(old: &LevelSet, new: &LevelSet) -> Self {
        Self {
            changed: LevelKind::ALL
                .into_iter()
                .filter(|kind| old.get(*kind) != new.get(*kind))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LevelSynchronizer {
    levels: Arc<LevelSet>,
    strikes: Arc<Vec<StrikeGamma>>,
}

impl LevelSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> &Arc<LevelSet> {
        &self.levels
    }

    pub fn strikes(&self) -> &Arc<Vec<StrikeGamma>> {
        &self.strikes
    }

    /// Replace the whole level set. Fields absent from `snapshot` are cleared.
    ///
    /// Returns the diff, or `None` when nothing drawable changed.
    pub fn set_levels(&mut self, snapshot: LevelSet) -> Option<LevelDiff> {
        let snapshot = snapshot.sanitized();
        let diff = LevelDiff::between(&self.levels, &snapshot);
        if diff.is_empty() {
            return None;
        }

        debug!(changed = ?diff.changed, "levels replaced");
        self.levels = Arc::new(snapshot);
        Some(diff)
    }

    /// Replace the per-strike set, sorted by strike ascending with one entry per strike.
    ///
    /// Returns the number of strikes kept.
    pub fn set_strike_gamma(&mut self, strikes: Vec<StrikeGamma>) -> usize {
        let total = strikes.len();
        let mut strikes: Vec<StrikeGamma> = strikes
            .into_iter()
            .filter(|s| s.strike.is_finite() && s.strike > 0.0 && s.net_gamma.is_finite())
            .collect();
        if strikes.len() != total {
            warn!(dropped = total - strikes.len(), "dropping invalid strike entries");
        }

        // Stable sort keeps arrival order within a strike; the last delivered wins
        strikes.sort_by(|a, b| a.strike.total_cmp(&b.strike));
        let mut unique: Vec<StrikeGamma> = Vec::with_capacity(strikes.len());
        for strike in strikes {
            match unique.last_mut() {
                Some(last) if last.strike == strike.strike => *last = strike,
                _ => unique.push(strike),
            }
        }

        let kept = unique.len();
        self.strikes = Arc::new(unique);
        kept
    }

    /// Largest absolute net gamma in the current set, for proportional sizing
    pub fn max_abs_gamma(&self) -> f64 {
        max_abs_gamma(&self.strikes)
    }
}

pub fn max_abs_gamma(strikes: &[StrikeGamma]) -> f64 {
    strikes
        .iter()
        .map(|s| s.net_gamma.abs())
        .fold(0.0, f64::max)
}
