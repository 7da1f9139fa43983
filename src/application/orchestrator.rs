//! The orchestrator: a wall-clock scheduler that drives phases 0 through 4.
//!
//! Phase 0 fires at the pre-market point, phases 1-4 run strictly in
//! sequence at the opening-plus-margin point. Between scheduled points the
//! loop sleeps. Guardian tasks run elsewhere and are never blocked by the
//! pipeline. Every phase short-circuits while the kill switch is latched.

use crate::application::pipeline::buzz_factory::BuzzFactory;
use crate::application::pipeline::executor::{ApprovedTrade, Executor};
use crate::application::pipeline::judge::{Judge, JudgeContext};
use crate::application::pipeline::screener::{Screener, ScreenerInput};
use crate::application::pipeline::vault::{Vault, VaultSurvivor};
use crate::application::pipeline::{format_news_for_judge, format_news_for_screener};
use crate::application::state_core::SharedState;
use crate::config::ScheduleConfig;
use crate::domain::analysis::technical::{TechnicalAnalyzer, TechnicalSignals};
use crate::domain::ports::{Clock, MarketData, NewsSource};
use crate::domain::types::{Candidate, Direction, Interval, MacroSnapshot, StockQuote};
use crate::infrastructure::persistence::DecisionStore;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// Sleep between scheduler checks.
const CYCLE_SLEEP: Duration = Duration::from_secs(300);
/// Cache rows older than this are swept at the pre-market point.
const CACHE_SWEEP_HOURS: i64 = 24;

pub struct Orchestrator {
    schedule: ScheduleConfig,
    buzz: Arc<BuzzFactory>,
    screener: Arc<Screener>,
    vault: Arc<Vault>,
    judge: Arc<Judge>,
    executor: Arc<Executor>,
    market: Arc<dyn MarketData>,
    news: Arc<dyn NewsSource>,
    state: SharedState,
    store: DecisionStore,
    technical: TechnicalAnalyzer,
    clock: Clock,
    candidates: Mutex<Vec<Candidate>>,
    last_phase0: Mutex<Option<NaiveDate>>,
    last_pipeline: Mutex<Option<NaiveDate>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schedule: ScheduleConfig,
        technical: TechnicalAnalyzer,
        buzz: Arc<BuzzFactory>,
        screener: Arc<Screener>,
        vault: Arc<Vault>,
        judge: Arc<Judge>,
        executor: Arc<Executor>,
        market: Arc<dyn MarketData>,
        news: Arc<dyn NewsSource>,
        state: SharedState,
        store: DecisionStore,
        clock: Clock,
    ) -> Self {
        Self {
            schedule,
            buzz,
            screener,
            vault,
            judge,
            executor,
            market,
            news,
            state,
            store,
            technical,
            clock,
            candidates: Mutex::new(Vec::new()),
            last_phase0: Mutex::new(None),
            last_pipeline: Mutex::new(None),
        }
    }

    pub fn is_market_open(&self) -> bool {
        let now = (self.clock)().time();
        self.schedule.market_open_time() <= now && now <= self.schedule.market_close_time()
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("orchestrator started");
        loop {
            self.run_cycle().await;
            tokio::select! {
                _ = tokio::time::sleep(CYCLE_SLEEP) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("orchestrator stopped");
    }

    /// One scheduler pass: fire each phase point at most once per day, any
    /// time after its wall-clock trigger.
    pub async fn run_cycle(&self) {
        let now = (self.clock)();
        let today = now.date_naive();
        let time = now.time();

        if time >= self.schedule.phase0_point() {
            let mut last = self.last_phase0.lock().await;
            if *last != Some(today) {
                *last = Some(today);
                drop(last);
                self.run_phase0().await;
            }
        }

        if time >= self.schedule.pipeline_point() {
            let mut last = self.last_pipeline.lock().await;
            if *last != Some(today) {
                *last = Some(today);
                drop(last);
                self.run_pipeline().await;
            }
        }
    }

    /// Phase 0: session rollover, cache sweep, buzz generation and filters.
    pub async fn run_phase0(&self) -> usize {
        if self.state.read().await.kill_switch_active() {
            warn!("phase 0 skipped: kill switch active");
            return 0;
        }

        info!("==== PHASE 0: BUZZ FACTORY ====");
        let today = (self.clock)().date_naive();
        self.state.write().await.roll_session(today);

        if let Err(e) = self
            .store
            .clear_old_cache(CACHE_SWEEP_HOURS, chrono::Utc::now())
            .await
        {
            warn!("cache sweep failed: {}", e);
        }

        let raw = self.buzz.generate_daily_buzz(false).await;
        let mut by_source: HashMap<String, usize> = HashMap::new();
        for candidate in &raw {
            *by_source.entry(candidate.source.to_string()).or_insert(0) += 1;
        }
        for (source, count) in &by_source {
            info!("  {}: {} candidates", source, count);
        }

        let filtered = self.buzz.apply_filters(raw).await;
        info!("phase 0 complete: {} candidates stored", filtered.len());

        let count = filtered.len();
        *self.candidates.lock().await = filtered;
        count
    }

    /// Phases 1 through 4, strictly sequential.
    pub async fn run_pipeline(&self) {
        if self.state.read().await.kill_switch_active() {
            warn!("pipeline skipped: kill switch active");
            return;
        }

        let candidates: Vec<Candidate> = self.candidates.lock().await.clone();
        if candidates.is_empty() {
            warn!("pipeline: no phase 0 candidates to process");
            return;
        }

        // Phase 1.
        info!("==== PHASE 1: SCREENER ====");
        let mut context: HashMap<String, (StockQuote, Option<TechnicalSignals>)> = HashMap::new();
        let mut inputs: Vec<ScreenerInput> = Vec::new();

        for candidate in candidates {
            let symbol = candidate.symbol.clone();
            let Ok(quote) = self.market.quote(&symbol).await else {
                continue;
            };
            let technical = match self.market.ohlcv(&symbol, 60, Interval::Daily).await {
                Ok(candles) => self.technical.analyze(&candles, &symbol),
                Err(_) => None,
            };

            let news_summary = match &candidate.news_content {
                Some(content) => content.clone(),
                None => match self.news.search(&symbol, 3).await {
                    Ok(articles) => format_news_for_screener(&symbol, &articles),
                    Err(_) => String::new(),
                },
            };

            context.insert(symbol.clone(), (quote.clone(), technical.clone()));
            inputs.push(ScreenerInput {
                candidate,
                quote,
                technical,
                news_summary,
            });
        }

        let open_symbols: std::collections::HashSet<String> =
            self.state.read().await.open_symbols().into_iter().collect();
        let inputs = self.screener.filter_duplicates(inputs, &open_symbols);

        // Keep the candidates alongside their results for later phases.
        let mut candidate_by_symbol: HashMap<String, Candidate> = inputs
            .iter()
            .map(|i| (i.candidate.symbol.clone(), i.candidate.clone()))
            .collect();

        let results = self.screener.screen_batch(inputs).await;
        let passed = self.screener.passed_candidates(&results);
        if passed.is_empty() {
            info!("pipeline: no candidates passed the screener");
            return;
        }

        // Phase 2.
        info!("==== PHASE 2: THE VAULT ====");
        let vault_inputs: Vec<(Candidate, crate::domain::decision::ScreenerResult, StockQuote)> =
            passed
                .into_iter()
                .filter_map(|result| {
                    let candidate = candidate_by_symbol.remove(&result.symbol)?;
                    let (quote, _) = context.get(&result.symbol)?.clone();
                    Some((candidate, result, quote))
                })
                .collect();
        let survivors = self.vault.assess(vault_inputs).await;
        if survivors.is_empty() {
            info!("pipeline: no candidates survived the vault");
            return;
        }

        // Phase 3.
        info!("==== PHASE 3: THE JUDGE ====");
        let macro_snapshot = self
            .market
            .macro_snapshot()
            .await
            .unwrap_or_else(|_| MacroSnapshot::default());
        let portfolio_closes = self.portfolio_closes().await;

        let mut approved: Vec<ApprovedTrade> = Vec::new();
        for survivor in survivors {
            if self.state.read().await.kill_switch_active() {
                warn!("pipeline: kill switch latched mid-phase, stopping");
                return;
            }
            if let Some(trade) = self
                .adjudicate(survivor, &macro_snapshot, &portfolio_closes, &context)
                .await
            {
                approved.push(trade);
            }
        }

        // Phase 4.
        info!("==== PHASE 4: EXECUTION ====");
        self.executor.execute_batch(approved, macro_snapshot.vix).await;
    }

    async fn adjudicate(
        &self,
        survivor: VaultSurvivor,
        macro_snapshot: &MacroSnapshot,
        portfolio_closes: &HashMap<String, Vec<f64>>,
        context: &HashMap<String, (StockQuote, Option<TechnicalSignals>)>,
    ) -> Option<ApprovedTrade> {
        let symbol = survivor.candidate.symbol.clone();
        let (quote, technical) = context.get(&symbol)?.clone();

        let news_details = match &survivor.candidate.news_content {
            Some(content) => content.clone(),
            None => match self.news.search(&symbol, 5).await {
                Ok(articles) => format_news_for_judge(&symbol, &articles),
                Err(_) => "News fetch failed".to_string(),
            },
        };

        let sector_exposure_pct = {
            let state = self.state.read().await;
            let exposure = state
                .exposure_by_sector()
                .get(&survivor.sector)
                .copied()
                .unwrap_or(0.0);
            if state.capital() > 0.0 {
                exposure / state.capital() * 100.0
            } else {
                0.0
            }
        };

        let ctx = JudgeContext {
            symbol: symbol.clone(),
            screener: survivor.screener.clone(),
            quote,
            technical: technical.clone(),
            macro_snapshot: macro_snapshot.clone(),
            metrics: Some(survivor.metrics.clone()),
            tier: survivor.candidate.tier,
            news_details,
            candidate_closes: Some(survivor.closes.clone()),
            portfolio_closes: portfolio_closes.clone(),
            sector_exposure_pct,
        };

        let decision = self.judge.judge(ctx).await;
        if !decision.is_approved() {
            info!("{}: rejected by the judge: {}", symbol, decision.justification);
            return None;
        }

        let open_symbols = self.state.read().await.open_symbols();
        if !self.judge.validate_decision(&decision, &open_symbols) {
            return None;
        }

        info!("{}: approved by the judge (score {})", symbol, decision.final_score);
        let swing_level = technical.as_ref().map(|t| match decision.direction {
            Direction::Short => t.resistance,
            _ => t.support,
        });
        Some(ApprovedTrade {
            tier: survivor.candidate.tier,
            beta_multiplier: survivor.beta_multiplier,
            sector: survivor.sector,
            atr: technical.as_ref().map(|t| t.atr).unwrap_or(0.0),
            swing_level,
            volatility_20d: survivor.metrics.volatility_20d,
            decision,
        })
    }

    async fn portfolio_closes(&self) -> HashMap<String, Vec<f64>> {
        let symbols = self.state.read().await.open_symbols();
        let mut out = HashMap::new();
        for symbol in symbols {
            if let Ok(candles) = self.market.ohlcv(&symbol, 60, Interval::Daily).await {
                out.insert(symbol, candles.into_iter().map(|c| c.close).collect());
            }
        }
        out
    }
}
