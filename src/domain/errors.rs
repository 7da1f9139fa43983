use thiserror::Error;

/// Risk vetoes raised by the state core and the pipeline. These are expected
/// control flow, not faults; callers convert them into rejections or skips.
#[derive(Debug, Error)]
pub enum RiskViolation {
    #[error("Maximum open positions reached: {current} >= {max}")]
    PositionLimitReached { current: usize, max: usize },

    #[error("Position already open for {symbol}")]
    DuplicatePosition { symbol: String },

    #[error("Sector exposure limit for {sector}: {would_be_pct:.2}% > {max_pct:.2}%")]
    SectorExposureLimit {
        sector: String,
        would_be_pct: f64,
        max_pct: f64,
    },

    #[error("Correlation limit breached for {symbol}: violators {violators:?}")]
    CorrelationLimit {
        symbol: String,
        violators: Vec<String>,
    },

    #[error("Daily drawdown limit breached: {drawdown_pct:.2}% >= {limit_pct:.2}%")]
    DailyDrawdownLimit { drawdown_pct: f64, limit_pct: f64 },

    #[error("Total exposure would exceed {max_pct:.0}% of capital")]
    ExposureLimit { max_pct: f64 },

    #[error("Position size below one share for {symbol}")]
    InsufficientShares { symbol: String },
}

/// Faults that abort the engine. Everything else is absorbed and logged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_messages_carry_figures() {
        let v = RiskViolation::SectorExposureLimit {
            sector: "Technology".to_string(),
            would_be_pct: 24.5,
            max_pct: 20.0,
        };
        let msg = v.to_string();
        assert!(msg.contains("Technology"));
        assert!(msg.contains("24.50%"));
        assert!(msg.contains("20.00%"));
    }

    #[test]
    fn correlation_violation_lists_violators() {
        let v = RiskViolation::CorrelationLimit {
            symbol: "AAPL".to_string(),
            violators: vec!["MSFT".to_string()],
        };
        assert!(v.to_string().contains("MSFT"));
    }
}
