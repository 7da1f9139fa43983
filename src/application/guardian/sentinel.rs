//! Sentinel: the five-minute news loop over open positions.
//!
//! Novel headlines (deduplicated against a 24-hour seen set) are classified
//! by the AI gateway; negative and critical impacts fan out as alerts.
//! Critical news goes to the judge for an exit adjudication, and an EXIT_NOW
//! on critical impact closes the position at market. The same loop owns the
//! Friday breakeven tightening and the 2-ATR trailing stops.

use crate::application::pipeline::judge::Judge;
use crate::application::pipeline::order_manager::OrderManager;
use crate::application::state_core::SharedState;
use crate::config::{Phase5Config, TechnicalConfig};
use crate::domain::alerts::{Alert, AlertHandler, NewsAlert, NewsImpact, SuggestedAction};
use crate::domain::analysis::technical::TechnicalAnalyzer;
use crate::domain::ports::{Clock, MarketData, NewsSource};
use crate::domain::types::{Direction, Interval, Position};
use crate::infrastructure::ai::{AiGateway, AiProvider};
use crate::infrastructure::persistence::DecisionStore;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{error, info, warn};

/// Seen headlines older than this are evicted every tick.
const SEEN_HEADLINE_TTL_HOURS: i64 = 24;
/// Trailing stop distance in ATR multiples.
const TRAILING_ATR_MULT: f64 = 2.0;
/// Breakeven buffer applied on Friday afternoons.
const BREAKEVEN_BUFFER: f64 = 0.001;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SentinelSnapshot {
    pub seen_headlines: HashMap<String, DateTime<Utc>>,
    pub last_tick: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentinelStatus {
    pub running: bool,
    pub check_interval_secs: u64,
    pub seen_headlines: usize,
}

pub struct Sentinel {
    interval: Duration,
    breakeven_hour: u32,
    news: Arc<dyn NewsSource>,
    ai: Arc<AiGateway>,
    state: SharedState,
    judge: Option<Arc<Judge>>,
    orders: Arc<OrderManager>,
    market: Arc<dyn MarketData>,
    store: DecisionStore,
    technical: TechnicalAnalyzer,
    handlers: RwLock<Vec<AlertHandler>>,
    seen: Mutex<HashMap<String, DateTime<Utc>>>,
    last_tick: Mutex<Option<DateTime<Utc>>>,
    running: RwLock<bool>,
    clock: Clock,
}

impl Sentinel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        phase5: &Phase5Config,
        technical: &TechnicalConfig,
        news: Arc<dyn NewsSource>,
        ai: Arc<AiGateway>,
        state: SharedState,
        judge: Option<Arc<Judge>>,
        orders: Arc<OrderManager>,
        market: Arc<dyn MarketData>,
        store: DecisionStore,
        clock: Clock,
    ) -> Self {
        Self {
            interval: Duration::from_secs(phase5.sentinel_interval),
            breakeven_hour: phase5.breakeven_hour,
            news,
            ai,
            state,
            judge,
            orders,
            market,
            store,
            technical: TechnicalAnalyzer::new(technical.clone()),
            handlers: RwLock::new(Vec::new()),
            seen: Mutex::new(HashMap::new()),
            last_tick: Mutex::new(None),
            running: RwLock::new(false),
            clock,
        }
    }

    pub async fn add_alert_handler(&self, handler: AlertHandler) {
        self.handlers.write().await.push(handler);
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("sentinel started ({}s interval)", self.interval.as_secs());
        *self.running.write().await = true;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        *self.running.write().await = false;
        info!("sentinel stopped");
    }

    pub async fn tick(&self) {
        *self.last_tick.lock().await = Some(Utc::now());

        self.scan_news().await;
        self.cleanup_seen().await;
        self.check_friday_breakeven().await;
        self.update_trailing_stops().await;
    }

    async fn scan_news(&self) {
        let positions = self.state.read().await.open_positions();

        for position in positions {
            let articles = match self.news.search(&position.symbol, 5).await {
                Ok(articles) => articles,
                Err(e) => {
                    warn!("sentinel: news fetch failed for {}: {}", position.symbol, e);
                    continue;
                }
            };

            for article in articles {
                let novel = self
                    .seen
                    .lock()
                    .await
                    .insert(article.title.clone(), Utc::now())
                    .is_none();
                if !novel {
                    continue;
                }

                let Some(alert) = self
                    .classify_headline(&position, &article.title, &article.summary, &article.source)
                    .await
                else {
                    continue;
                };

                if matches!(alert.impact, NewsImpact::Negative | NewsImpact::Critical) {
                    self.handle_alert(&position, alert).await;
                }
            }
        }
    }

    async fn classify_headline(
        &self,
        position: &Position,
        headline: &str,
        content: &str,
        source: &str,
    ) -> Option<NewsAlert> {
        let prompt = format!(
            "Analise esta noticia sobre {symbol} e determine o impacto no preco:\n\
             \n\
             Titulo: {headline}\n\
             Conteudo: {content:.500}\n\
             \n\
             Responda APENAS em JSON:\n\
             {{\"impact\": \"positive|neutral|negative|critical\", \"summary\": \"resumo em 1 linha\", \
             \"action\": \"HOLD|MONITOR|CONSIDER_EXIT|EXIT_NOW\", \"confidence\": 0.0}}\n\
             \n\
             Criterios para critical: M&A negativa, investigacao SEC, fraude, falencia, recall massivo.",
            symbol = position.symbol,
            headline = headline,
            content = content,
        );

        let response = self
            .ai
            .complete(&prompt, "", AiProvider::GeminiFlash, 0.2, 300)
            .await;
        let json = response.parsed_json.filter(|_| response.success)?;

        Some(NewsAlert {
            symbol: position.symbol.clone(),
            headline: headline.to_string(),
            impact: NewsImpact::parse(json["impact"].as_str().unwrap_or("neutral")),
            summary: json["summary"].as_str().unwrap_or("").to_string(),
            action: SuggestedAction::parse(json["action"].as_str().unwrap_or("MONITOR")),
            confidence: json["confidence"].as_f64().unwrap_or(0.5),
            source: source.to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn handle_alert(&self, position: &Position, alert: NewsAlert) {
        warn!(
            "[sentinel] {}: {:?} news - {}",
            alert.symbol, alert.impact, alert.headline
        );

        for handler in self.handlers.read().await.iter() {
            handler(Alert::News(alert.clone()));
        }

        if alert.impact != NewsImpact::Critical {
            return;
        }

        // Critical news: ask the judge for an exit adjudication. Without a
        // judge the classification's own action decides.
        let action = match &self.judge {
            Some(judge) => {
                let summary = format!(
                    "{} {} x{} @ {:.2} (atual {:.2})",
                    position.direction,
                    position.symbol,
                    position.quantity,
                    position.entry_price,
                    position.current_price
                );
                let recommended = judge
                    .exit_recommendation(&position.symbol, &summary, &alert.headline)
                    .await;
                SuggestedAction::parse(&recommended)
            }
            None => alert.action,
        };

        if action == SuggestedAction::ExitNow {
            error!(
                "[sentinel] CRITICAL NEWS: closing {} immediately",
                position.symbol
            );
            if let Err(e) = self
                .orders
                .close_position_at_market(&position.symbol, position.direction, position.quantity)
                .await
            {
                error!("[sentinel] close failed for {}: {}", position.symbol, e);
                return;
            }
            self.settle_exit(position, &format!("critical news: {:.80}", alert.headline))
                .await;
        }
    }

    async fn settle_exit(&self, position: &Position, reason: &str) {
        let exit_price = if position.current_price > 0.0 {
            position.current_price
        } else {
            position.entry_price
        };
        if self
            .state
            .write()
            .await
            .remove_position(&position.symbol)
            .is_some()
        {
            let pnl = match position.direction {
                Direction::Short => (position.entry_price - exit_price) * position.quantity as f64,
                _ => (exit_price - position.entry_price) * position.quantity as f64,
            };
            self.state.write().await.record_realized(pnl);
        }
        if let Ok(Some(trade_id)) = self.store.open_trade_id(&position.symbol).await {
            if let Err(e) = self
                .store
                .log_trade_exit(trade_id, exit_price, Utc::now(), reason)
                .await
            {
                error!("failed to log exit for {}: {}", position.symbol, e);
            }
        }
    }

    async fn cleanup_seen(&self) {
        let cutoff = Utc::now() - chrono::Duration::hours(SEEN_HEADLINE_TTL_HOURS);
        self.seen.lock().await.retain(|_, at| *at > cutoff);
    }

    /// Friday after the configured hour: stops of profitable positions move
    /// to breakeven plus a tenth of a percent. Tightening only.
    pub async fn check_friday_breakeven(&self) {
        let now = (self.clock)();
        if now.weekday() != Weekday::Fri || now.hour() < self.breakeven_hour {
            return;
        }

        let positions = self.state.read().await.open_positions();
        for position in positions {
            if !position.is_profitable() {
                continue;
            }
            let breakeven = match position.direction {
                Direction::Short => position.entry_price * (1.0 - BREAKEVEN_BUFFER),
                _ => position.entry_price * (1.0 + BREAKEVEN_BUFFER),
            };
            let tightens = match position.direction {
                Direction::Short => breakeven < position.stop_loss,
                _ => breakeven > position.stop_loss,
            };
            if !tightens {
                continue;
            }

            info!(
                "friday breakeven: moving {} stop to {:.2}",
                position.symbol, breakeven
            );
            self.state
                .write()
                .await
                .set_stop_loss(&position.symbol, breakeven);
            if let Err(e) = self.orders.update_stop_order(&position.symbol, breakeven).await {
                warn!(
                    "breakeven broker update failed for {} (state updated): {}",
                    position.symbol, e
                );
            }
        }
    }

    /// Trailing stop at two ATRs behind price, tighten-only. The state core
    /// stop always moves; the broker replace is best-effort.
    pub async fn update_trailing_stops(&self) {
        let positions = self.state.read().await.open_positions();

        for position in positions {
            let candles = match self
                .market
                .ohlcv(&position.symbol, 30, Interval::Daily)
                .await
            {
                Ok(candles) => candles,
                Err(_) => continue,
            };
            let Some(signals) = self.technical.analyze(&candles, &position.symbol) else {
                continue;
            };
            let current_price = candles.last().map(|c| c.close).unwrap_or(0.0);
            if current_price <= 0.0 || signals.atr <= 0.0 {
                continue;
            }

            let (trail, tightens) = match position.direction {
                Direction::Short => {
                    let trail = current_price + TRAILING_ATR_MULT * signals.atr;
                    (trail, trail < position.stop_loss)
                }
                _ => {
                    let trail = current_price - TRAILING_ATR_MULT * signals.atr;
                    (trail, trail > position.stop_loss)
                }
            };
            if !tightens {
                continue;
            }

            let trail = (trail * 100.0).round() / 100.0;
            info!(
                "trailing stop: {} {:.2} -> {:.2}",
                position.symbol, position.stop_loss, trail
            );
            self.state.write().await.set_stop_loss(&position.symbol, trail);
            if let Err(e) = self.orders.update_stop_order(&position.symbol, trail).await {
                warn!(
                    "trailing broker update failed for {} (state updated): {}",
                    position.symbol, e
                );
            }
        }
    }

    pub async fn snapshot(&self) -> SentinelSnapshot {
        SentinelSnapshot {
            seen_headlines: self.seen.lock().await.clone(),
            last_tick: *self.last_tick.lock().await,
        }
    }

    pub async fn restore(&self, snapshot: SentinelSnapshot) {
        *self.seen.lock().await = snapshot.seen_headlines;
        *self.last_tick.lock().await = snapshot.last_tick;
    }

    pub async fn status(&self) -> SentinelStatus {
        SentinelStatus {
            running: *self.running.read().await,
            check_interval_secs: self.interval.as_secs(),
            seen_headlines: self.seen.lock().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::state_core::StateCore;
    use crate::config::{LiquidityConfig, Phase2Config, RiskConfig};
    use crate::domain::ports::fixed_clock;
    use crate::domain::ports::Broker;
    use crate::infrastructure::ai::{AiClient, AiResponse};
    use crate::infrastructure::broker::PaperBroker;
    use crate::infrastructure::market::MockMarketData;
    use crate::infrastructure::news::MockNewsSource;
    use crate::infrastructure::persistence::Database;
    use async_trait::async_trait;
    use chrono::{Local, TimeZone};

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

    struct Setup {
        sentinel: Sentinel,
        state: SharedState,
        store: DecisionStore,
        news: MockNewsSource,
        market: MockMarketData,
    }

    async fn setup(ai_content: &str, clock: Clock) -> Setup {
        let state = StateCore::shared(RiskConfig::default(), Phase2Config::default());
        state
            .write()
            .await
            .initialize(100_000.0, Utc::now().date_naive());

        let market = MockMarketData::new(LiquidityConfig::default());
        let news = MockNewsSource::new();
        let broker = Arc::new(PaperBroker::new(100_000.0));
        broker.connect().await.unwrap();
        let orders = Arc::new(OrderManager::new(&TechnicalConfig::default(), broker));
        let store = DecisionStore::new(Database::in_memory().await.unwrap());

        let sentinel = Sentinel::new(
            &Phase5Config::default(),
            &TechnicalConfig::default(),
            Arc::new(news.clone()),
            gateway(ai_content),
            state.clone(),
            None,
            orders,
            Arc::new(market.clone()),
            store.clone(),
            clock,
        );

        Setup {
            sentinel,
            state,
            store,
            news,
            market,
        }
    }

    fn position(symbol: &str, entry: f64, current: f64, stop: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            direction: Direction::Long,
            entry_price: entry,
            quantity: 10,
            stop_loss: stop,
            take_profit: entry * 1.1,
            entry_time: Utc::now(),
            current_price: current,
            unrealized_pnl: 0.0,
            sector: "Technology".to_string(),
        }
    }

    fn weekday_clock() -> Clock {
        fixed_clock(Local.with_ymd_and_hms(2025, 6, 3, 11, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn critical_exit_now_news_closes_the_position() {
        let content = r#"{"impact": "critical", "summary": "fraud probe",
            "action": "EXIT_NOW", "confidence": 0.9}"#;
        let s = setup(content, weekday_clock()).await;

        s.state
            .write()
            .await
            .add_position(position("ACME", 100.0, 95.0, 90.0))
            .unwrap();
        s.store
            .log_trade_entry("ACME", Direction::Long, 100.0, 10, Utc::now())
            .await
            .unwrap();
        s.news
            .push_article("ACME", "SEC opens fraud investigation into ACME", "probe")
            .await;

        s.sentinel.tick().await;

        assert!(s.state.read().await.open_positions().is_empty());
        let history = s.store.trade_history(Some("ACME"), 5).await.unwrap();
        assert!(history[0].reason.as_deref().unwrap().contains("critical news"));
    }

    #[tokio::test]
    async fn negative_news_alerts_without_closing() {
        let content = r#"{"impact": "negative", "summary": "guidance cut",
            "action": "MONITOR", "confidence": 0.7}"#;
        let s = setup(content, weekday_clock()).await;

        s.state
            .write()
            .await
            .add_position(position("ACME", 100.0, 99.0, 90.0))
            .unwrap();
        s.news
            .push_article("ACME", "ACME cuts full-year guidance", "weaker demand")
            .await;

        let alerts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let alerts_clone = alerts.clone();
        s.sentinel
            .add_alert_handler(Arc::new(move |alert| {
                if matches!(alert, Alert::News(_)) {
                    alerts_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            }))
            .await;

        s.sentinel.tick().await;
        assert_eq!(alerts.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(s.state.read().await.open_positions().len(), 1);

        // The same headline is not re-classified on the next tick.
        s.sentinel.tick().await;
        assert_eq!(alerts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn friday_afternoon_moves_profitable_stops_to_breakeven() {
        // Friday 2025-06-06, 15:00 local.
        let clock = fixed_clock(Local.with_ymd_and_hms(2025, 6, 6, 15, 0, 0).unwrap());
        let s = setup("{}", clock).await;

        s.state
            .write()
            .await
            .add_position(position("WINNER", 100.0, 108.0, 95.0))
            .unwrap();
        s.state
            .write()
            .await
            .add_position(position("LOSER", 100.0, 96.0, 93.0))
            .unwrap();

        s.sentinel.check_friday_breakeven().await;

        let core = s.state.read().await;
        let winner = core.position("WINNER").unwrap();
        assert!((winner.stop_loss - 100.1).abs() < 1e-9);
        // Losing positions are untouched.
        let loser = core.position("LOSER").unwrap();
        assert!((loser.stop_loss - 93.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn breakeven_never_loosens_an_existing_stop() {
        let clock = fixed_clock(Local.with_ymd_and_hms(2025, 6, 6, 15, 0, 0).unwrap());
        let s = setup("{}", clock).await;

        // Stop already above breakeven (trailed earlier).
        s.state
            .write()
            .await
            .add_position(position("TIGHT", 100.0, 112.0, 105.0))
            .unwrap();

        s.sentinel.check_friday_breakeven().await;
        let core = s.state.read().await;
        assert!((core.position("TIGHT").unwrap().stop_loss - 105.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn trailing_stop_tightens_only() {
        let s = setup("{}", weekday_clock()).await;

        // Rising series: trailing stop should move up behind price.
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        s.market.set_closes("RISER", &closes).await;
        s.state
            .write()
            .await
            .add_position(position("RISER", 100.0, 139.0, 95.0))
            .unwrap();

        s.sentinel.update_trailing_stops().await;
        let stop_after = s.state.read().await.position("RISER").unwrap().stop_loss;
        assert!(stop_after > 95.0, "stop should have trailed up, was {}", stop_after);
        assert!(stop_after < 139.0);

        // Running again with the same data does not loosen it.
        s.sentinel.update_trailing_stops().await;
        let stop_again = s.state.read().await.position("RISER").unwrap().stop_loss;
        assert!((stop_again - stop_after).abs() < 1e-9);
    }
}
