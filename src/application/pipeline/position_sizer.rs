//! Phase 4: fixed-risk position sizing with tier, hint, beta and defensive
//! multipliers, capped at a fifth of capital per position.

use crate::config::{RiskConfig, TiersConfig};
use crate::domain::decision::SizeHint;
use crate::domain::errors::RiskViolation;
use crate::domain::types::Tier;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// No single position may exceed this share of capital.
const MAX_POSITION_FRACTION: f64 = 0.20;
/// Total exposure across all positions may not exceed this share of capital.
const MAX_TOTAL_EXPOSURE_FRACTION: f64 = 0.80;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSize {
    pub symbol: String,
    pub shares: i64,
    pub position_value: f64,
    pub risk_amount: f64,
    pub risk_percent: f64,
    pub tier_multiplier: f64,
    pub beta_multiplier: f64,
    pub defensive_multiplier: f64,
    pub reason: String,
}

pub struct PositionSizer {
    risk: RiskConfig,
    tiers: TiersConfig,
}

impl PositionSizer {
    pub fn new(risk: RiskConfig, tiers: TiersConfig) -> Self {
        Self { risk, tiers }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn calculate(
        &self,
        capital: f64,
        entry_price: f64,
        stop_loss: f64,
        symbol: &str,
        tier: Tier,
        size_hint: SizeHint,
        beta_multiplier: f64,
        defensive_multiplier: f64,
    ) -> PositionSize {
        let tier_multiplier = match tier {
            Tier::Tier1Large => self.tiers.tier1_large_cap.position_multiplier,
            Tier::Tier2Mid => self.tiers.tier2_mid_cap.position_multiplier,
            Tier::Unknown => self.tiers.tier2_mid_cap.position_multiplier,
        };

        let final_risk_pct = self.risk.risk_per_trade
            * tier_multiplier
            * size_hint.multiplier()
            * beta_multiplier
            * defensive_multiplier;
        let risk_amount = capital * final_risk_pct;

        let risk_per_share = (entry_price - stop_loss).abs();
        if risk_per_share <= 0.0 || entry_price <= 0.0 {
            error!("{}: invalid per-share risk (entry {}, stop {})", symbol, entry_price, stop_loss);
            return PositionSize {
                symbol: symbol.to_string(),
                shares: 0,
                position_value: 0.0,
                risk_amount: 0.0,
                risk_percent: 0.0,
                tier_multiplier,
                beta_multiplier,
                defensive_multiplier,
                reason: "invalid stop loss".to_string(),
            };
        }

        let mut shares = (risk_amount / risk_per_share).floor() as i64;
        let max_position_value = capital * MAX_POSITION_FRACTION;
        let mut position_value = shares as f64 * entry_price;

        let reason;
        if position_value > max_position_value {
            shares = (max_position_value / entry_price).floor() as i64;
            position_value = shares as f64 * entry_price;
            reason = format!("capped at {:.0}% of capital", MAX_POSITION_FRACTION * 100.0);
        } else {
            reason = format!(
                "risk {:.2}% | tier {:.2}x | hint {} | beta {:.2}x | defensive {:.2}x",
                final_risk_pct * 100.0,
                tier_multiplier,
                size_hint,
                beta_multiplier,
                defensive_multiplier
            );
        }

        info!(
            "{}: sized {} shares (${:.2}, risking ${:.2})",
            symbol,
            shares,
            position_value,
            shares as f64 * risk_per_share
        );

        PositionSize {
            symbol: symbol.to_string(),
            shares,
            position_value: round2(position_value),
            risk_amount: round2(shares as f64 * risk_per_share),
            risk_percent: round2(final_risk_pct * 100.0),
            tier_multiplier,
            beta_multiplier,
            defensive_multiplier,
            reason,
        }
    }

    /// Global limits: open-position count, the 80% total-exposure cap, and a
    /// one-share floor.
    pub fn validate_size(
        &self,
        size: &PositionSize,
        current_positions: usize,
        total_exposure: f64,
        capital: f64,
    ) -> Result<(), RiskViolation> {
        if current_positions >= self.risk.max_positions {
            return Err(RiskViolation::PositionLimitReached {
                current: current_positions,
                max: self.risk.max_positions,
            });
        }

        if total_exposure + size.position_value > capital * MAX_TOTAL_EXPOSURE_FRACTION {
            return Err(RiskViolation::ExposureLimit {
                max_pct: MAX_TOTAL_EXPOSURE_FRACTION * 100.0,
            });
        }

        if size.shares < 1 {
            return Err(RiskViolation::InsufficientShares {
                symbol: size.symbol.clone(),
            });
        }

        Ok(())
    }

    /// Shrink a computed size under elevated asset volatility or VIX.
    pub fn adjust_for_volatility(
        &self,
        base: PositionSize,
        volatility: f64,
        vix: f64,
    ) -> PositionSize {
        let vol_factor = if volatility > 50.0 {
            0.5
        } else if volatility > 30.0 {
            0.75
        } else {
            1.0
        };
        let vix_factor = if vix > 30.0 {
            0.5
        } else if vix > 25.0 {
            0.75
        } else {
            1.0
        };

        let factor = vol_factor * vix_factor;
        if factor >= 1.0 {
            return base;
        }

        let shares = (base.shares as f64 * factor).floor() as i64;
        let per_share_value = if base.shares > 0 {
            base.position_value / base.shares as f64
        } else {
            0.0
        };

        PositionSize {
            shares,
            position_value: round2(shares as f64 * per_share_value),
            risk_amount: round2(base.risk_amount * factor),
            risk_percent: round2(base.risk_percent * factor),
            reason: format!("{} | vol adj {:.2}", base.reason, factor),
            ..base
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> PositionSizer {
        PositionSizer::new(RiskConfig::default(), TiersConfig::default())
    }

    #[test]
    fn basic_sizing_from_risk_budget() {
        // 1% of 100k = $1000 risk; $2 per-share risk -> 500 shares, but
        // 500 * $50 = $25k > 20% cap -> capped to 400 shares.
        let size = sizer().calculate(
            100_000.0,
            50.0,
            48.0,
            "XYZ",
            Tier::Tier1Large,
            SizeHint::Normal,
            1.0,
            1.0,
        );
        assert_eq!(size.shares, 400);
        assert!((size.position_value - 20_000.0).abs() < 1e-9);
        assert!(size.reason.contains("capped"));
    }

    #[test]
    fn multipliers_stack() {
        // 1% * 0.5 hint * 0.75 beta * 0.5 defensive = 0.1875% -> $187.50
        // risk over $2/share -> 93 shares.
        let size = sizer().calculate(
            100_000.0,
            50.0,
            48.0,
            "XYZ",
            Tier::Tier1Large,
            SizeHint::Reduzido,
            0.75,
            0.5,
        );
        assert_eq!(size.shares, 93);
        assert!((size.position_value - 4_650.0).abs() < 1e-9);
    }

    #[test]
    fn position_cap_is_never_exceeded() {
        for (entry, stop) in [(50.0, 49.9), (10.0, 9.99), (500.0, 499.0)] {
            let size = sizer().calculate(
                100_000.0,
                entry,
                stop,
                "XYZ",
                Tier::Tier1Large,
                SizeHint::Normal,
                1.0,
                1.0,
            );
            assert!(size.shares as f64 * entry <= 100_000.0 * 0.20 + 1e-9);
        }
    }

    #[test]
    fn invalid_stop_yields_zero_shares() {
        let size = sizer().calculate(
            100_000.0,
            50.0,
            50.0,
            "XYZ",
            Tier::Tier1Large,
            SizeHint::Normal,
            1.0,
            1.0,
        );
        assert_eq!(size.shares, 0);
        let err = sizer().validate_size(&size, 0, 0.0, 100_000.0);
        assert!(matches!(err, Err(RiskViolation::InsufficientShares { .. })));
    }

    #[test]
    fn validate_rejects_at_limits() {
        let size = sizer().calculate(
            100_000.0,
            50.0,
            48.0,
            "XYZ",
            Tier::Tier1Large,
            SizeHint::Normal,
            1.0,
            1.0,
        );

        assert!(sizer().validate_size(&size, 0, 0.0, 100_000.0).is_ok());
        assert!(matches!(
            sizer().validate_size(&size, 5, 0.0, 100_000.0),
            Err(RiskViolation::PositionLimitReached { .. })
        ));
        assert!(matches!(
            sizer().validate_size(&size, 0, 65_000.0, 100_000.0),
            Err(RiskViolation::ExposureLimit { .. })
        ));
    }

    #[test]
    fn volatility_adjustment_shrinks_size() {
        let base = sizer().calculate(
            100_000.0,
            50.0,
            48.0,
            "XYZ",
            Tier::Tier1Large,
            SizeHint::Normal,
            1.0,
            1.0,
        );
        let adjusted = sizer().adjust_for_volatility(base.clone(), 55.0, 32.0);
        // 0.5 * 0.5 = 0.25 of the original size.
        assert_eq!(adjusted.shares, base.shares / 4);
        assert!(adjusted.reason.contains("vol adj"));

        let untouched = sizer().adjust_for_volatility(base.clone(), 10.0, 15.0);
        assert_eq!(untouched.shares, base.shares);
    }
}
