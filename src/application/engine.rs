//! Engine assembly and lifecycle.
//!
//! `Engine::build` wires adapters, the state core, the phased pipeline and
//! the guardian monitors from settings. `start` spawns the long-lived tasks;
//! `shutdown` signals them, waits up to the soft deadline, snapshots
//! guardian state and disconnects the broker.

use crate::application::guardian::{PoisonPillScanner, Sentinel, Watchdog};
use crate::application::orchestrator::Orchestrator;
use crate::application::pipeline::buzz_factory::BuzzFactory;
use crate::application::pipeline::executor::Executor;
use crate::application::pipeline::judge::Judge;
use crate::application::pipeline::order_manager::OrderManager;
use crate::application::pipeline::position_sizer::PositionSizer;
use crate::application::pipeline::screener::Screener;
use crate::application::pipeline::vault::Vault;
use crate::application::state_core::{SharedState, StateCore};
use crate::config::{BrokerProvider, Settings};
use crate::domain::alerts::AlertHandler;
use crate::domain::analysis::technical::TechnicalAnalyzer;
use crate::domain::ports::{system_clock, AuditSink, Broker, Clock, MarketData, NewsSource};
use crate::infrastructure::audit::ChannelAuditSink;
use crate::infrastructure::broker::PaperBroker;
use crate::infrastructure::earnings::HttpEarningsCalendar;
use crate::infrastructure::grounding::SearchGrounding;
use crate::infrastructure::market::HttpMarketData;
use crate::infrastructure::news::{CachingNews, CseNewsSource, RssNewsSource};
use crate::infrastructure::persistence::{Database, DecisionStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const WATCHDOG_SNAPSHOT_ID: &str = "watchdog";
const SENTINEL_SNAPSHOT_ID: &str = "sentinel";

pub struct Engine {
    settings: Settings,
    pub state: SharedState,
    pub store: DecisionStore,
    orchestrator: Arc<Orchestrator>,
    watchdog: Arc<Watchdog>,
    sentinel: Arc<Sentinel>,
    poison_pill: Arc<PoisonPillScanner>,
    broker: Arc<dyn Broker>,
    audit_sink: Arc<ChannelAuditSink>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    pub async fn build(settings: Settings) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| crate::domain::errors::EngineError::Config(e.to_string()))?;
        let clock: Clock = system_clock();

        // Persistence.
        let db = Database::new(&settings.engine.database_url)
            .await
            .context("failed to open engine database")?;
        let store = DecisionStore::new(db);

        // State core.
        let state = StateCore::shared(settings.risk.clone(), settings.phase2.clone());
        state
            .write()
            .await
            .initialize(settings.engine.starting_capital, clock().date_naive());

        // Adapters.
        let market: Arc<dyn MarketData> = Arc::new(HttpMarketData::new(
            settings.liquidity.clone(),
            &settings.http,
        ));
        let rss: Arc<dyn NewsSource> = Arc::new(RssNewsSource::new(&settings.http));
        let primary: Arc<dyn NewsSource> = Arc::new(CseNewsSource::from_env(
            &settings.news,
            &settings.http,
            rss,
            clock.clone(),
        ));
        let news: Arc<dyn NewsSource> = Arc::new(CachingNews::new(
            primary.clone(),
            settings.news.cache_expiry_hours,
        ));
        let earnings = Arc::new(HttpEarningsCalendar::new(&settings.http));
        let grounding: Arc<dyn crate::domain::ports::Grounding> =
            Arc::new(SearchGrounding::new(primary));

        let broker: Arc<dyn Broker> = match settings.broker.provider {
            BrokerProvider::PaperLocal => Arc::new(PaperBroker::with_market(
                settings.engine.starting_capital,
                market.clone(),
            )),
        };
        broker.connect().await.context("broker connection failed")?;

        // AI.
        let ai = Arc::new(crate::infrastructure::ai::AiGateway::from_env());
        if ai.is_empty() {
            warn!("no AI providers configured; screener and judge will reject everything");
        }

        // Audit channel, consumed into the store.
        let audit_sink = Arc::new(ChannelAuditSink::new(256));

        // Pipeline.
        let technical = TechnicalAnalyzer::new(settings.technical.clone());
        let buzz = Arc::new(BuzzFactory::new(
            settings.phase0.clone(),
            settings.tiers.clone(),
            settings.liquidity.clone(),
            market.clone(),
            news.clone(),
            earnings.clone(),
            clock.clone(),
        ));
        let screener = Arc::new(Screener::new(&settings.ai, ai.clone()));
        let vault = Arc::new(Vault::new(
            settings.phase2.clone(),
            market.clone(),
            state.clone(),
        ));
        let judge = Arc::new(Judge::new(
            &settings.ai,
            settings.phase2.max_correlation,
            ai.clone(),
            store.clone(),
            market.clone(),
            Some(grounding),
            audit_sink.clone() as Arc<dyn AuditSink>,
        ));
        let order_manager = Arc::new(OrderManager::new(&settings.technical, broker.clone()));
        let executor = Arc::new(Executor::new(
            settings.phase0.earnings_proximity_days,
            PositionSizer::new(settings.risk.clone(), settings.tiers.clone()),
            order_manager.clone(),
            earnings.clone(),
            state.clone(),
            store.clone(),
        ));

        let orchestrator = Arc::new(Orchestrator::new(
            settings.schedule.clone(),
            technical,
            buzz,
            screener,
            vault,
            judge.clone(),
            executor,
            market.clone(),
            news.clone(),
            state.clone(),
            store.clone(),
            clock.clone(),
        ));

        // Guardians.
        let watchdog = Arc::new(Watchdog::new(
            &settings.phase5,
            &settings.alerts,
            market.clone(),
            state.clone(),
            order_manager.clone(),
            store.clone(),
            clock.clone(),
        ));
        let sentinel = Arc::new(Sentinel::new(
            &settings.phase5,
            &settings.technical,
            news.clone(),
            ai.clone(),
            state.clone(),
            Some(judge),
            order_manager,
            market,
            store.clone(),
            clock.clone(),
        ));
        let poison_pill = Arc::new(PoisonPillScanner::new(
            &settings.phase5,
            news,
            ai,
            state.clone(),
            clock,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            settings,
            state,
            store,
            orchestrator,
            watchdog,
            sentinel,
            poison_pill,
            broker,
            audit_sink,
            shutdown_tx,
            shutdown_rx,
            tasks: Vec::new(),
        })
    }

    /// Register an alert handler on all three guardians.
    pub async fn add_alert_handler(&self, handler: AlertHandler) {
        self.watchdog.add_alert_handler(handler.clone()).await;
        self.sentinel.add_alert_handler(handler.clone()).await;
        self.poison_pill.add_alert_handler(handler).await;
    }

    /// Restore guardian state, then spawn the orchestrator, the three
    /// guardian loops and the audit consumer.
    pub async fn start(&mut self) -> Result<()> {
        self.restore_guardian_state().await;

        let orchestrator = self.orchestrator.clone();
        let rx = self.shutdown_rx.clone();
        self.tasks
            .push(tokio::spawn(async move { orchestrator.run(rx).await }));

        let watchdog = self.watchdog.clone();
        let rx = self.shutdown_rx.clone();
        self.tasks
            .push(tokio::spawn(async move { watchdog.run(rx).await }));

        let sentinel = self.sentinel.clone();
        let rx = self.shutdown_rx.clone();
        self.tasks
            .push(tokio::spawn(async move { sentinel.run(rx).await }));

        let poison = self.poison_pill.clone();
        let rx = self.shutdown_rx.clone();
        self.tasks
            .push(tokio::spawn(async move { poison.run(rx).await }));

        // Audit entries flow into the durable judge_audit log.
        let audit = self.audit_sink.clone();
        let store = self.store.clone();
        let mut rx = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    entry = audit.recv() => {
                        if let Err(e) = store.save_audit(&entry).await {
                            error!("failed to persist audit entry: {}", e);
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            for entry in audit.drain() {
                                let _ = store.save_audit(&entry).await;
                            }
                            break;
                        }
                    }
                }
            }
        }));

        info!("engine started: orchestrator + 3 guardians running");
        Ok(())
    }

    async fn restore_guardian_state(&self) {
        if let Ok(Some(raw)) = self.store.load_guardian_state(WATCHDOG_SNAPSHOT_ID).await {
            match serde_json::from_str(&raw) {
                Ok(snapshot) => {
                    self.watchdog.restore(snapshot).await;
                    info!("watchdog state restored");
                }
                Err(e) => warn!("watchdog snapshot unreadable: {}", e),
            }
        }
        if let Ok(Some(raw)) = self.store.load_guardian_state(SENTINEL_SNAPSHOT_ID).await {
            match serde_json::from_str(&raw) {
                Ok(snapshot) => {
                    self.sentinel.restore(snapshot).await;
                    info!("sentinel state restored");
                }
                Err(e) => warn!("sentinel snapshot unreadable: {}", e),
            }
        }
    }

    async fn save_guardian_state(&self) {
        if let Ok(raw) = serde_json::to_string(&self.watchdog.snapshot().await) {
            if let Err(e) = self.store.save_guardian_state(WATCHDOG_SNAPSHOT_ID, &raw).await {
                error!("failed to save watchdog state: {}", e);
            }
        }
        if let Ok(raw) = serde_json::to_string(&self.sentinel.snapshot().await) {
            if let Err(e) = self.store.save_guardian_state(SENTINEL_SNAPSHOT_ID, &raw).await {
                error!("failed to save sentinel state: {}", e);
            }
        }
    }

    /// Drive phase 0 and the full pipeline immediately, bypassing the
    /// wall-clock schedule. Used by the CLI's `--run-now` flag and replays.
    pub async fn run_pipeline_now(&self) {
        self.orchestrator.run_phase0().await;
        self.orchestrator.run_pipeline().await;
    }

    /// Graceful shutdown with the configured soft deadline. The process
    /// proceeds regardless once the deadline passes.
    pub async fn shutdown(mut self) {
        info!("engine shutdown requested");
        let _ = self.shutdown_tx.send(true);

        let deadline = Duration::from_secs(self.settings.engine.shutdown_timeout_secs);
        let joined = tokio::time::timeout(deadline, futures::future::join_all(&mut self.tasks)).await;
        if joined.is_err() {
            warn!("shutdown deadline reached, abandoning remaining tasks");
            for task in &self.tasks {
                task.abort();
            }
        }

        self.save_guardian_state().await;

        if let Err(e) = self.broker.disconnect().await {
            error!("broker disconnect failed: {}", e);
        }

        let watchdog_status = self.watchdog.status().await;
        let sentinel_status = self.sentinel.status().await;
        info!(
            "engine stopped (watchdog positions: {}, seen headlines: {})",
            watchdog_status.monitored_positions, sentinel_status.seen_headlines
        );
    }
}
