//! Alert types emitted by the guardian monitors and fanned out to handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Critical => write!(f, "critical"),
            AlertLevel::Emergency => write!(f, "emergency"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceAlertKind {
    FlashCrash,
    StopViolated,
    TakeProfitHit,
}

/// Emitted by the watchdog on its one-minute price loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceAlert {
    pub symbol: String,
    pub kind: PriceAlertKind,
    pub level: AlertLevel,
    pub message: String,
    pub current_price: f64,
    pub reference_price: f64,
    pub change_pct: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewsImpact {
    Positive,
    Neutral,
    Negative,
    Critical,
}

impl NewsImpact {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "positive" => NewsImpact::Positive,
            "negative" => NewsImpact::Negative,
            "critical" => NewsImpact::Critical,
            _ => NewsImpact::Neutral,
        }
    }
}

/// Action the sentinel's AI classification recommends for a headline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestedAction {
    Hold,
    Monitor,
    ConsiderExit,
    ExitNow,
}

impl SuggestedAction {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "HOLD" => SuggestedAction::Hold,
            "CONSIDER_EXIT" => SuggestedAction::ConsiderExit,
            "EXIT_NOW" => SuggestedAction::ExitNow,
            _ => SuggestedAction::Monitor,
        }
    }
}

/// Emitted by the sentinel for novel negative or critical headlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsAlert {
    pub symbol: String,
    pub headline: String,
    pub impact: NewsImpact,
    pub summary: String,
    pub action: SuggestedAction,
    pub confidence: f64,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// Overnight event classes detected by the poison-pill scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    MergerAcquisition,
    TenderOffer,
    Earnings,
    FdaAction,
    SecInvestigation,
    Bankruptcy,
    MajorContract,
    InsiderActivity,
    GapUp,
    GapDown,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::MergerAcquisition => write!(f, "m&a"),
            EventType::TenderOffer => write!(f, "tender_offer"),
            EventType::Earnings => write!(f, "earnings"),
            EventType::FdaAction => write!(f, "fda_action"),
            EventType::SecInvestigation => write!(f, "sec_investigation"),
            EventType::Bankruptcy => write!(f, "bankruptcy"),
            EventType::MajorContract => write!(f, "major_contract"),
            EventType::InsiderActivity => write!(f, "insider_activity"),
            EventType::GapUp => write!(f, "gap_up"),
            EventType::GapDown => write!(f, "gap_down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventImpact {
    Positive,
    Negative,
    Uncertain,
}

impl EventImpact {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "positive" => EventImpact::Positive,
            "negative" => EventImpact::Negative,
            _ => EventImpact::Uncertain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Magnitude {
    Low,
    Medium,
    High,
    Extreme,
}

impl Magnitude {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Magnitude::Low,
            "high" => Magnitude::High,
            "extreme" => Magnitude::Extreme,
            _ => Magnitude::Medium,
        }
    }

    pub fn is_critical(&self) -> bool {
        matches!(self, Magnitude::High | Magnitude::Extreme)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAction {
    Hold,
    Review,
    Reduce,
    Exit,
}

impl EventAction {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "HOLD" => EventAction::Hold,
            "REDUCE" => EventAction::Reduce,
            "EXIT" => EventAction::Exit,
            _ => EventAction::Review,
        }
    }
}

/// A corporate or regulatory event flagged by the overnight scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoisonPillEvent {
    pub symbol: String,
    pub event_type: EventType,
    pub headline: String,
    pub impact: EventImpact,
    pub magnitude: Magnitude,
    pub action: EventAction,
    pub source: String,
    pub detected_at: DateTime<Utc>,
}

/// Union delivered to registered alert handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Alert {
    Price(PriceAlert),
    News(NewsAlert),
    PoisonPill(PoisonPillEvent),
}

impl Alert {
    pub fn symbol(&self) -> &str {
        match self {
            Alert::Price(a) => &a.symbol,
            Alert::News(a) => &a.symbol,
            Alert::PoisonPill(a) => &a.symbol,
        }
    }
}

/// Handlers must not block; slow consumers should enqueue internally.
pub type AlertHandler = Arc<dyn Fn(Alert) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impact_and_action_parse() {
        assert_eq!(NewsImpact::parse("CRITICAL"), NewsImpact::Critical);
        assert_eq!(NewsImpact::parse("meh"), NewsImpact::Neutral);
        assert_eq!(SuggestedAction::parse("EXIT_NOW"), SuggestedAction::ExitNow);
        assert_eq!(SuggestedAction::parse("unknown"), SuggestedAction::Monitor);
        assert_eq!(EventAction::parse("EXIT"), EventAction::Exit);
        assert_eq!(EventAction::parse("???"), EventAction::Review);
    }

    #[test]
    fn magnitude_criticality() {
        assert!(!Magnitude::parse("low").is_critical());
        assert!(!Magnitude::parse("medium").is_critical());
        assert!(Magnitude::parse("high").is_critical());
        assert!(Magnitude::parse("extreme").is_critical());
        assert!(Magnitude::Low < Magnitude::Extreme);
    }

    #[test]
    fn alert_levels_are_ordered() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Critical < AlertLevel::Emergency);
    }
}
