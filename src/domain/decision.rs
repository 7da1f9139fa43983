//! Decision types produced by the screener (phase 1) and the judge (phase 3).
//!
//! The verdict and size-hint vocabulary is the literal wire contract with the
//! AI providers, so variants render to the exact uppercase tokens the prompts
//! request and parse leniently on the way back in.

use crate::domain::types::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Aprovar,
    Rejeitar,
    Aguardar,
}

impl Verdict {
    /// Anything unrecognized is treated as a rejection.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "APROVAR" => Verdict::Aprovar,
            "AGUARDAR" => Verdict::Aguardar,
            _ => Verdict::Rejeitar,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Aprovar => write!(f, "APROVAR"),
            Verdict::Rejeitar => write!(f, "REJEITAR"),
            Verdict::Aguardar => write!(f, "AGUARDAR"),
        }
    }
}

/// Position-size hint attached to an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeHint {
    Normal,
    Reduzido,
    Minimo,
}

impl SizeHint {
    /// Unknown hints fall back to Normal; prompts occasionally invent values.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "REDUZIDO" => SizeHint::Reduzido,
            "MÍNIMO" | "MINIMO" => SizeHint::Minimo,
            _ => SizeHint::Normal,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            SizeHint::Normal => 1.0,
            SizeHint::Reduzido => 0.5,
            SizeHint::Minimo => 0.25,
        }
    }
}

impl fmt::Display for SizeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeHint::Normal => write!(f, "NORMAL"),
            SizeHint::Reduzido => write!(f, "REDUZIDO"),
            SizeHint::Minimo => write!(f, "MÍNIMO"),
        }
    }
}

/// Phase 1 output for one symbol. Invariant: `passed == (score >= threshold)`,
/// maintained by the screener at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerResult {
    pub symbol: String,
    pub score: f64,
    pub summary: String,
    pub bias: Direction,
    pub confidence: f64,
    pub passed: bool,
    pub timestamp: DateTime<Utc>,
}

impl ScreenerResult {
    /// Result used when the AI call failed; never passes the threshold.
    pub fn failed(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            score: 0.0,
            summary: "analysis failed".to_string(),
            bias: Direction::Neutro,
            confidence: 0.0,
            passed: false,
            timestamp: Utc::now(),
        }
    }
}

/// Phase 3 output: the final adjudication for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDecision {
    pub symbol: String,
    pub verdict: Verdict,
    pub final_score: f64,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub risk_reward: f64,
    pub size_hint: SizeHint,
    pub justification: String,
    pub alerts: Vec<String>,
    pub validity_hours: i64,
    pub timestamp: DateTime<Utc>,
}

impl TradeDecision {
    pub fn rejection(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            symbol: symbol.into(),
            verdict: Verdict::Rejeitar,
            final_score: 0.0,
            direction: Direction::Neutro,
            entry_price: 0.0,
            stop_loss: 0.0,
            take_profit_1: 0.0,
            take_profit_2: 0.0,
            risk_reward: 0.0,
            size_hint: SizeHint::Minimo,
            justification: reason.clone(),
            alerts: vec![reason],
            validity_hours: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.verdict == Verdict::Aprovar
    }

    /// Stop must sit on the losing side of the entry for the given direction.
    pub fn stop_on_correct_side(&self) -> bool {
        match self.direction {
            Direction::Long => self.stop_loss < self.entry_price,
            Direction::Short => self.stop_loss > self.entry_price,
            Direction::Neutro => false,
        }
    }
}
