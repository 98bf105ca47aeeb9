//! Margin Risk Monitor
//!
//! Recomputes account risk from each snapshot and raises edge-triggered
//! margin alerts. The feed's own margin_level is never trusted: whenever
//! margin > 0 the level used for threshold checks is always
//! `(equity / margin) * 100`. With margin <= 0 risk is undefined and no
//! tier is ever evaluated.

use crate::config::MarginThresholds;
use crate::types::{AccountReport, MarginSeverity, MarginWarningData};
use dashmap::DashMap;
use tracing::warn;

/// Upper clamp for the recomputed margin level. A tiny positive margin can
/// push the raw ratio arbitrarily high; the clamp keeps the number bounded
/// while staying far above every alert tier.
pub const MAX_MARGIN_LEVEL: f64 = 100_000.0;

/// Result of one margin assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginAssessment {
    /// The recomputed, clamped margin level. `None` means margin <= 0:
    /// risk is undefined and nothing was evaluated.
    pub margin_level: Option<f64>,
    /// Alert to broadcast, present only on a tier crossing.
    pub alert: Option<MarginWarningData>,
}

/// Edge-triggered margin alerting, tracking the last fired tier per
/// account so an account sitting below a boundary alerts once, not every
/// cycle.
pub struct MarginMonitor {
    thresholds: MarginThresholds,
    last_tier: DashMap<i64, MarginSeverity>,
}

impl MarginMonitor {
    pub fn new(thresholds: MarginThresholds) -> Self {
        Self {
            thresholds,
            last_tier: DashMap::new(),
        }
    }

    /// Recompute the clamped margin level for a report, with no state
    /// change. `None` means margin <= 0 (undefined risk).
    pub fn recompute_level(report: &AccountReport) -> Option<f64> {
        if report.margin <= 0.0 {
            return None;
        }
        Some((report.equity / report.margin * 100.0).min(MAX_MARGIN_LEVEL))
    }

    /// Assess one account snapshot.
    ///
    /// Fires an alert only when the account's tier becomes more severe
    /// than the recorded one. Recovery lowers the recorded tier silently,
    /// so dropping below the same boundary again alerts again.
    pub fn assess(&self, account_id: i64, report: &AccountReport) -> MarginAssessment {
        let level = match Self::recompute_level(report) {
            Some(level) => level,
            None => {
                self.last_tier.remove(&account_id);
                return MarginAssessment {
                    margin_level: None,
                    alert: None,
                };
            }
        };

        let tier = self.tier_for(level);
        let previous = match tier {
            Some(t) => self.last_tier.insert(account_id, t),
            None => self.last_tier.remove(&account_id).map(|(_, t)| t),
        };

        let crossed = match (previous, tier) {
            (None, Some(t)) => Some(t),
            (Some(p), Some(t)) if t > p => Some(t),
            _ => None,
        };

        let alert = crossed.map(|severity| {
            warn!(
                "Margin {} for account {}: level {:.2}% (equity {:.2} / margin {:.2})",
                severity, account_id, level, report.equity, report.margin
            );
            MarginWarningData {
                account_id,
                severity,
                margin_level: level,
                equity: report.equity,
                margin: report.margin,
            }
        });

        MarginAssessment {
            margin_level: Some(level),
            alert,
        }
    }

    fn tier_for(&self, level: f64) -> Option<MarginSeverity> {
        if level <= self.thresholds.critical {
            Some(MarginSeverity::Critical)
        } else if level <= self.thresholds.high {
            Some(MarginSeverity::High)
        } else if level <= self.thresholds.warning {
            Some(MarginSeverity::Warning)
        } else {
            None
        }
    }
}

impl Default for MarginMonitor {
    fn default() -> Self {
        Self::new(MarginThresholds::default())
    }
}
