//! Poison-pill scanner: the overnight sweep for corporate and regulatory
//! events on open positions. Keyword typing picks the event class, the AI
//! estimates impact, magnitude and the recommended action.

use crate::application::state_core::SharedState;
use crate::config::Phase5Config;
use crate::domain::alerts::{
    Alert, AlertHandler, EventAction, EventImpact, EventType, Magnitude, PoisonPillEvent,
};
use crate::domain::ports::{Clock, NewsSource};
use crate::infrastructure::ai::{AiGateway, AiProvider};
use chrono::{DateTime, Local, NaiveTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};

/// (event class, headline keywords) table used for first-pass typing.
const EVENT_KEYWORDS: &[(EventType, &[&str])] = &[
    (
        EventType::MergerAcquisition,
        &["merger", "acquisition", "acquire", "takeover", "buyout", "m&a"],
    ),
    (
        EventType::TenderOffer,
        &["tender offer", "offer to purchase", "opa"],
    ),
    (
        EventType::Earnings,
        &["earnings", "quarterly results", "revenue", "profit warning"],
    ),
    (
        EventType::FdaAction,
        &["fda", "approval", "rejection", "clinical trial", "drug"],
    ),
    (
        EventType::SecInvestigation,
        &["sec", "investigation", "probe", "subpoena", "fraud"],
    ),
    (
        EventType::Bankruptcy,
        &["bankruptcy", "chapter 11", "chapter 7", "insolvency"],
    ),
    (
        EventType::MajorContract,
        &["contract", "deal", "partnership", "agreement"],
    ),
    (
        EventType::InsiderActivity,
        &["insider", "executive sells", "executive buys", "filing"],
    ),
];

/// The scan only runs outside regular hours.
const OVERNIGHT_START: (u32, u32) = (17, 0);
const OVERNIGHT_END: (u32, u32) = (8, 0);
/// And at most once per this many hours.
const MIN_SCAN_GAP_HOURS: i64 = 6;

#[derive(Debug, Clone, Serialize)]
pub struct PoisonPillStatus {
    pub last_scan: Option<DateTime<Utc>>,
    pub events_detected: usize,
    pub critical_events: usize,
}

pub struct PoisonPillScanner {
    interval: Duration,
    news: Arc<dyn NewsSource>,
    ai: Arc<AiGateway>,
    state: SharedState,
    handlers: RwLock<Vec<AlertHandler>>,
    last_scan: Mutex<Option<DateTime<Utc>>>,
    detected: Mutex<Vec<PoisonPillEvent>>,
    clock: Clock,
}

impl PoisonPillScanner {
    pub fn new(
        phase5: &Phase5Config,
        news: Arc<dyn NewsSource>,
        ai: Arc<AiGateway>,
        state: SharedState,
        clock: Clock,
    ) -> Self {
        Self {
            interval: Duration::from_secs(phase5.poison_pill_interval),
            news,
            ai,
            state,
            handlers: RwLock::new(Vec::new()),
            last_scan: Mutex::new(None),
            detected: Mutex::new(Vec::new()),
            clock,
        }
    }

    pub async fn add_alert_handler(&self, handler: AlertHandler) {
        self.handlers.write().await.push(handler);
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "poison-pill scanner started ({}s interval)",
            self.interval.as_secs()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.should_run_scan().await {
                        self.run_nightly_scan().await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("poison-pill scanner stopped");
    }

    /// Only after the close or before the open, and not within six hours of
    /// the previous sweep.
    pub async fn should_run_scan(&self) -> bool {
        let now: DateTime<Local> = (self.clock)();
        let time = now.time();
        let after_close =
            time > NaiveTime::from_hms_opt(OVERNIGHT_START.0, OVERNIGHT_START.1, 0).unwrap();
        let before_open =
            time < NaiveTime::from_hms_opt(OVERNIGHT_END.0, OVERNIGHT_END.1, 0).unwrap();
        if !(after_close || before_open) {
            return false;
        }

        match *self.last_scan.lock().await {
            Some(last) => (Utc::now() - last).num_hours() >= MIN_SCAN_GAP_HOURS,
            None => true,
        }
    }

    pub async fn run_nightly_scan(&self) -> Vec<PoisonPillEvent> {
        info!("starting overnight poison-pill scan");
        let mut events = Vec::new();

        let positions = self.state.read().await.open_positions();
        if positions.is_empty() {
            info!("no open positions to scan");
            *self.last_scan.lock().await = Some(Utc::now());
            return events;
        }

        for position in positions {
            let articles = match self.news.search(&position.symbol, 10).await {
                Ok(articles) => articles,
                Err(e) => {
                    warn!("poison-pill: news fetch failed for {}: {}", position.symbol, e);
                    continue;
                }
            };

            for article in articles {
                let Some(event_type) = detect_event_type(&article.title, &article.summary) else {
                    continue;
                };
                let Some(event) = self
                    .analyze_event(&position.symbol, event_type, &article.title, &article.summary, &article.source)
                    .await
                else {
                    continue;
                };

                if event.magnitude.is_critical() {
                    warn!(
                        "[poison-pill] {} {}: {} ({:?}/{:?})",
                        event.symbol, event.event_type, event.headline, event.impact, event.magnitude
                    );
                }
                for handler in self.handlers.read().await.iter() {
                    handler(Alert::PoisonPill(event.clone()));
                }
                events.push(event);
            }
        }

        *self.last_scan.lock().await = Some(Utc::now());
        *self.detected.lock().await = events.clone();

        if !events.is_empty() {
            warn!("poison-pill scan detected {} events", events.len());
        }
        events
    }

    async fn analyze_event(
        &self,
        symbol: &str,
        event_type: EventType,
        headline: &str,
        summary: &str,
        source: &str,
    ) -> Option<PoisonPillEvent> {
        let prompt = format!(
            "Analise este evento para {symbol}:\n\
             \n\
             Tipo: {event_type}\n\
             Titulo: {headline}\n\
             Resumo: {summary:.300}\n\
             \n\
             Responda APENAS em JSON:\n\
             {{\"impact\": \"positive|negative|uncertain\", \"magnitude\": \"low|medium|high|extreme\", \
             \"action\": \"HOLD|REVIEW|REDUCE|EXIT\", \"reason\": \"1 linha\"}}\n\
             \n\
             Para M&A: alvo costuma ser positivo, comprador depende do preco.\n\
             Para FDA: aprovacao positiva, rejeicao muito negativa.",
            symbol = symbol,
            event_type = event_type,
            headline = headline,
            summary = summary,
        );

        let response = self
            .ai
            .complete(&prompt, "", AiProvider::GeminiFlash, 0.2, 300)
            .await;
        let json = response.parsed_json.filter(|_| response.success)?;

        Some(PoisonPillEvent {
            symbol: symbol.to_string(),
            event_type,
            headline: headline.to_string(),
            impact: EventImpact::parse(json["impact"].as_str().unwrap_or("uncertain")),
            magnitude: Magnitude::parse(json["magnitude"].as_str().unwrap_or("medium")),
            action: EventAction::parse(json["action"].as_str().unwrap_or("REVIEW")),
            source: source.to_string(),
            detected_at: Utc::now(),
        })
    }

    /// Only the high/extreme events from the latest sweep.
    pub async fn critical_events(&self) -> Vec<PoisonPillEvent> {
        self.detected
            .lock()
            .await
            .iter()
            .filter(|e| e.magnitude.is_critical())
            .cloned()
            .collect()
    }

    pub async fn status(&self) -> PoisonPillStatus {
        let detected = self.detected.lock().await;
        PoisonPillStatus {
            last_scan: *self.last_scan.lock().await,
            events_detected: detected.len(),
            critical_events: detected.iter().filter(|e| e.magnitude.is_critical()).count(),
        }
    }
}

fn detect_event_type(title: &str, content: &str) -> Option<EventType> {
    let text = format!("{} {}", title, content).to_lowercase();
    for (event_type, keywords) in EVENT_KEYWORDS {
        if keywords.iter().any(|k| text.contains(k)) {
            return Some(*event_type);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::state_core::StateCore;
    use crate::config::{Phase2Config, RiskConfig};
    use crate::domain::ports::fixed_clock;
    use crate::domain::types::{Direction, Position};
    use crate::infrastructure::ai::{AiClient, AiResponse};
    use crate::infrastructure::news::MockNewsSource;
    use async_trait::async_trait;
    use chrono::TimeZone;

    struct CannedClient {
        content: String,
    }

    #[async_trait]
    impl AiClient for CannedClient {
        fn model(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _: &str, _: &str, _: f64, _: u32) -> AiResponse {
            AiResponse::success(AiProvider::GeminiFlash, "canned", self.content.clone(), 10)
        }
    }

    fn gateway(content: &str) -> Arc<AiGateway> {
        Arc::new(AiGateway::with_clients(vec![(
            AiProvider::GeminiFlash,
            Arc::new(CannedClient {
                content: content.to_string(),
            }),
        )]))
    }

    async fn scanner_at(hour: u32, ai_content: &str) -> (PoisonPillScanner, SharedState, MockNewsSource) {
        let state = StateCore::shared(RiskConfig::default(), Phase2Config::default());
        state
            .write()
            .await
            .initialize(100_000.0, Utc::now().date_naive());
        let news = MockNewsSource::new();
        let clock = fixed_clock(Local.with_ymd_and_hms(2025, 6, 3, hour, 30, 0).unwrap());

        let scanner = PoisonPillScanner::new(
            &Phase5Config::default(),
            Arc::new(news.clone()),
            gateway(ai_content),
            state.clone(),
            clock,
        );
        (scanner, state, news)
    }

    fn position(symbol: &str) -> Position {
        Position {
            symbol: symbol.to_string(),
            direction: Direction::Long,
            entry_price: 100.0,
            quantity: 10,
            stop_loss: 95.0,
            take_profit: 110.0,
            entry_time: Utc::now(),
            current_price: 100.0,
            unrealized_pnl: 0.0,
            sector: "Technology".to_string(),
        }
    }

    #[test]
    fn keyword_typing_picks_the_event_class() {
        assert_eq!(
            detect_event_type("ACME agrees to merger with rival", ""),
            Some(EventType::MergerAcquisition)
        );
        assert_eq!(
            detect_event_type("ACME files for Chapter 11", ""),
            Some(EventType::Bankruptcy)
        );
        assert_eq!(
            detect_event_type("FDA rejects ACME drug application", ""),
            Some(EventType::FdaAction)
        );
        assert_eq!(detect_event_type("ACME opens new office", ""), None);
    }

    #[tokio::test]
    async fn scan_window_gates_execution() {
        let (evening, _, _) = scanner_at(18, "{}").await;
        assert!(evening.should_run_scan().await);

        let (early, _, _) = scanner_at(6, "{}").await;
        assert!(early.should_run_scan().await);

        let (midday, _, _) = scanner_at(12, "{}").await;
        assert!(!midday.should_run_scan().await);
    }

    #[tokio::test]
    async fn repeat_scan_within_six_hours_is_skipped() {
        let (scanner, _, _) = scanner_at(18, "{}").await;
        assert!(scanner.should_run_scan().await);
        scanner.run_nightly_scan().await;
        assert!(!scanner.should_run_scan().await);
    }

    #[tokio::test]
    async fn critical_events_surface_from_the_scan() {
        let content = r#"{"impact": "negative", "magnitude": "extreme",
            "action": "EXIT", "reason": "bankruptcy filing"}"#;
        let (scanner, state, news) = scanner_at(18, content).await;

        state.write().await.add_position(position("ACME")).unwrap();
        news.push_article(
            "ACME",
            "ACME files for bankruptcy protection",
            "chapter 11 filing confirmed",
        )
        .await;

        let events = scanner.run_nightly_scan().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Bankruptcy);
        assert_eq!(events[0].action, EventAction::Exit);
        assert_eq!(scanner.critical_events().await.len(), 1);

        let status = scanner.status().await;
        assert_eq!(status.events_detected, 1);
        assert_eq!(status.critical_events, 1);
    }

    #[tokio::test]
    async fn non_event_headlines_are_ignored() {
        let (scanner, state, news) = scanner_at(18, "{}").await;
        state.write().await.add_position(position("ACME")).unwrap();
        news.push_article("ACME", "ACME opens flagship store", "retail expansion")
            .await;

        let events = scanner.run_nightly_scan().await;
        assert!(events.is_empty());
    }
}
