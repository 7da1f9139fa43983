//! Phase 3: the expensive-AI adjudicator.
//!
//! Hard pre-checks run in a fixed order before any AI spend: the correlation
//! re-check (the portfolio may have changed since phase 2), then the
//! portfolio-aware cache lookup, then news grounding. The AI verdict is
//! parsed under business-rule overrides that can only tighten the outcome.

use crate::config::AiConfig;
use crate::domain::analysis::correlation::CorrelationAnalyzer;
use crate::domain::analysis::risk::RiskMetrics;
use crate::domain::analysis::technical::TechnicalSignals;
use crate::domain::decision::{ScreenerResult, SizeHint, TradeDecision, Verdict};
use crate::domain::ports::{AuditEntry, AuditSink, Grounding, MarketData};
use crate::domain::types::{Direction, Interval, MacroSnapshot, StockQuote, Tier};
use crate::infrastructure::ai::{AiGateway, AiProvider};
use crate::infrastructure::persistence::DecisionStore;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Cached verdicts older than this are ignored.
const CACHE_MAX_AGE_HOURS: i64 = 2;
/// Grounding confidence below this rejects unverified news outright.
const GROUNDING_REJECT_CONFIDENCE: f64 = 0.3;
const MIN_RISK_REWARD: f64 = 2.0;

/// Everything the judge consumes for one adjudication. Close series from
/// phase 2 (or a replay) are reused instead of refetched when present.
pub struct JudgeContext {
    pub symbol: String,
    pub screener: ScreenerResult,
    pub quote: StockQuote,
    pub technical: Option<TechnicalSignals>,
    pub macro_snapshot: MacroSnapshot,
    pub metrics: Option<RiskMetrics>,
    pub tier: Tier,
    pub news_details: String,
    pub candidate_closes: Option<Vec<f64>>,
    pub portfolio_closes: HashMap<String, Vec<f64>>,
    pub sector_exposure_pct: f64,
}

pub struct Judge {
    threshold: f64,
    validity_hours_default: i64,
    ai: Arc<AiGateway>,
    store: DecisionStore,
    correlation: CorrelationAnalyzer,
    market: Arc<dyn MarketData>,
    grounding: Option<Arc<dyn Grounding>>,
    audit: Arc<dyn AuditSink>,
    /// Optional playbook text appended to every prompt.
    context_notes: Option<String>,
}

impl Judge {
    pub fn new(
        config: &AiConfig,
        max_correlation: f64,
        ai: Arc<AiGateway>,
        store: DecisionStore,
        market: Arc<dyn MarketData>,
        grounding: Option<Arc<dyn Grounding>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            threshold: config.judge_threshold,
            validity_hours_default: config.cache_expiry_hours,
            ai,
            store,
            correlation: CorrelationAnalyzer::new(max_correlation),
            market,
            grounding,
            audit,
            context_notes: None,
        }
    }

    pub fn with_context_notes(mut self, notes: String) -> Self {
        self.context_notes = Some(notes);
        self
    }

    /// Deterministic key over the current portfolio composition. Changing the
    /// portfolio naturally invalidates every cached verdict.
    pub fn portfolio_hash(symbols: &[String]) -> String {
        let mut sorted: Vec<&String> = symbols.iter().collect();
        sorted.sort();
        sorted
            .into_iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub async fn judge(&self, ctx: JudgeContext) -> TradeDecision {
        let symbol = ctx.symbol.clone();
        info!("[judge] {}: starting adjudication (threshold={})", symbol, self.threshold);

        // 1. Correlation re-check, BEFORE the cache: the portfolio may have
        //    changed since the cached verdict was produced.
        let mut check_portfolio = ctx.portfolio_closes.clone();
        check_portfolio.remove(&symbol);
        if !check_portfolio.is_empty() {
            let closes = match &ctx.candidate_closes {
                Some(closes) => Some(closes.clone()),
                None => self
                    .market
                    .ohlcv(&symbol, 60, Interval::Daily)
                    .await
                    .ok()
                    .map(|candles| candles.into_iter().map(|c| c.close).collect()),
            };

            if let Some(closes) = closes {
                let (allowed, violators) =
                    self.correlation
                        .enforce_correlation_limit(&symbol, &closes, &check_portfolio);
                if !allowed {
                    error!("[judge] correlation veto: {} vs {:?}", symbol, violators);
                    let decision = TradeDecision::rejection(
                        &symbol,
                        format!(
                            "VETO: correlacao > {:.2} com {}",
                            self.correlation.max_correlation(),
                            violators.join(", ")
                        ),
                    );
                    self.emit_audit(
                        &decision,
                        "Phase 3 - Correlation Veto",
                        format!(
                            "Correlation check vs {} positions. Violated: {:?}",
                            check_portfolio.len(),
                            violators
                        ),
                    );
                    self.persist(&decision, None).await;
                    return decision;
                }
            }
        }

        // 2. Portfolio-aware cache lookup.
        let portfolio_symbols: Vec<String> = ctx.portfolio_closes.keys().cloned().collect();
        let portfolio_hash = Self::portfolio_hash(&portfolio_symbols);
        match self
            .store
            .cached_decision(&symbol, &portfolio_hash, CACHE_MAX_AGE_HOURS, Utc::now())
            .await
        {
            Ok(Some(cached)) => {
                info!(
                    "[judge] {}: cache hit, reusing decision from {}",
                    symbol, cached.timestamp
                );
                self.emit_audit(
                    &cached,
                    "Phase 3 - Cache Hit",
                    format!("[CACHE HIT] reusing decision from {}", cached.timestamp),
                );
                return cached;
            }
            Ok(None) => {}
            Err(e) => warn!("[judge] {}: cache lookup failed: {}", symbol, e),
        }

        // 3. News grounding pre-check.
        let mut news_details = ctx.news_details.clone();
        if let Some(grounding) = &self.grounding {
            if !news_details.is_empty() {
                info!("[judge] {}: grounding news before adjudication", symbol);
                match grounding.verify(&symbol, &news_details).await {
                    Ok(result) if result.verified => {
                        let sources: Vec<String> = result
                            .sources
                            .iter()
                            .take(3)
                            .map(|s| format!("- {}", s))
                            .collect();
                        news_details =
                            format!("{}\n\nVerified sources:\n{}", news_details, sources.join("\n"));
                        info!(
                            "[judge] {}: grounding ok ({} sources, conf={:.2})",
                            symbol,
                            result.sources.len(),
                            result.confidence
                        );
                    }
                    Ok(result) if result.confidence < GROUNDING_REJECT_CONFIDENCE => {
                        warn!(
                            "[judge] {}: grounding failed (conf={:.2}), rejecting",
                            symbol, result.confidence
                        );
                        let decision = TradeDecision::rejection(
                            &symbol,
                            "News nao verificado (baixa confianca)",
                        );
                        self.emit_audit(
                            &decision,
                            "Phase 3 - Grounding Veto",
                            format!("Grounding check failed. Confidence={:.2}", result.confidence),
                        );
                        self.persist(&decision, None).await;
                        return decision;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("[judge] {}: grounding error ignored: {}", symbol, e),
                }
            }
        }

        // 4. The expensive call.
        let prompt = self.build_prompt(&ctx, &news_details);
        info!("[judge] {}: calling AI (preferred=gemini_pro, temp=0.2)", symbol);
        let response = self
            .ai
            .complete(&prompt, "", AiProvider::GeminiPro, 0.2, 2500)
            .await;

        let Some(json) = response.parsed_json.clone().filter(|_| response.success) else {
            error!(
                "[judge] {}: AI failed (success={}, content='{:.120}')",
                symbol, response.success, response.content
            );
            let decision =
                TradeDecision::rejection(&symbol, "Falha na analise de IA (JSON nao parseado)");
            self.emit_audit(&decision, "Phase 3 - AI Failure", prompt);
            self.persist(&decision, None).await;
            return decision;
        };

        // 5. Parse under the hard overrides.
        let decision = self.parse_decision(&symbol, &json);
        info!(
            "[judge] {}: verdict={} score={}/10 dir={} rr={:.1} entry=${:.2} stop=${:.2}",
            symbol,
            decision.verdict,
            decision.final_score,
            decision.direction,
            decision.risk_reward,
            decision.entry_price,
            decision.stop_loss
        );

        self.emit_audit(&decision, "Phase 3 - Judge Decision", prompt);
        self.persist(&decision, Some(&portfolio_hash)).await;
        decision
    }

    /// Exit-oriented adjudication used by the sentinel on critical news.
    /// Returns the recommended action string from the AI, defaulting to
    /// MONITOR on any failure.
    pub async fn exit_recommendation(&self, symbol: &str, position_summary: &str, news: &str) -> String {
        let prompt = format!(
            "Uma posicao aberta em {symbol} recebeu noticia negativa.\n\
             Posicao: {position}\n\
             Noticia: {news}\n\
             \n\
             Devemos sair imediatamente? Responda APENAS em JSON:\n\
             {{\"action\": \"HOLD|MONITOR|CONSIDER_EXIT|EXIT_NOW\", \"confidence\": 0.0, \"reason\": \"\"}}",
            symbol = symbol,
            position = position_summary,
            news = news,
        );

        let response = self
            .ai
            .complete(&prompt, "", AiProvider::GeminiPro, 0.2, 300)
            .await;
        response
            .parsed_json
            .filter(|_| response.success)
            .and_then(|json| json["action"].as_str().map(str::to_string))
            .unwrap_or_else(|| "MONITOR".to_string())
    }

    /// Post-validation before execution: no duplicate symbol, R/R floor.
    pub fn validate_decision(&self, decision: &TradeDecision, open_symbols: &[String]) -> bool {
        if open_symbols.iter().any(|s| s == &decision.symbol) {
            warn!(
                "[judge] validation failed: duplicate position in {}",
                decision.symbol
            );
            return false;
        }
        if decision.risk_reward < MIN_RISK_REWARD {
            warn!(
                "[judge] validation failed: R/R {:.1} < 2:1 for {}",
                decision.risk_reward, decision.symbol
            );
            return false;
        }
        true
    }

    fn parse_decision(&self, symbol: &str, json: &Value) -> TradeDecision {
        let mut verdict = json["decisao"]
            .as_str()
            .map(Verdict::parse)
            .unwrap_or(Verdict::Rejeitar);
        let score = json["nota_final"].as_f64().unwrap_or(0.0);
        let risk_reward = json["risco_recompensa"].as_f64().unwrap_or(0.0);
        let entry = json["entry_price"].as_f64().unwrap_or(0.0);
        let stop = json["stop_loss"].as_f64().unwrap_or(0.0);
        let direction = json["direcao"]
            .as_str()
            .map(Direction::parse)
            .unwrap_or(Direction::Long);

        let mut alerts: Vec<String> = json["alertas"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        if verdict == Verdict::Aprovar && score < self.threshold {
            verdict = Verdict::Rejeitar;
            alerts.push(format!("Nota {} abaixo do threshold {}", score, self.threshold));
            warn!("[judge] {}: overridden, score {} < threshold {}", symbol, score, self.threshold);
        }

        if verdict == Verdict::Aprovar && risk_reward < MIN_RISK_REWARD {
            verdict = Verdict::Rejeitar;
            alerts.push(format!("R/R {:.1} abaixo do minimo 2.0", risk_reward));
            warn!("[judge] {}: overridden, R/R {:.1} < 2.0", symbol, risk_reward);
        }

        if verdict == Verdict::Aprovar && entry > 0.0 {
            match direction {
                Direction::Long if stop >= entry => {
                    alerts.push(format!("Stop ${:.2} >= Entry ${:.2} para LONG", stop, entry));
                    verdict = Verdict::Rejeitar;
                    warn!("[judge] {}: overridden, stop on wrong side for LONG", symbol);
                }
                Direction::Short if stop <= entry => {
                    alerts.push(format!("Stop ${:.2} <= Entry ${:.2} para SHORT", stop, entry));
                    verdict = Verdict::Rejeitar;
                    warn!("[judge] {}: overridden, stop on wrong side for SHORT", symbol);
                }
                _ => {}
            }
        }

        TradeDecision {
            symbol: symbol.to_string(),
            verdict,
            final_score: score,
            direction,
            entry_price: entry,
            stop_loss: stop,
            take_profit_1: json["take_profit_1"].as_f64().unwrap_or(0.0),
            take_profit_2: json["take_profit_2"].as_f64().unwrap_or(0.0),
            risk_reward,
            size_hint: json["tamanho_posicao_sugerido"]
                .as_str()
                .map(SizeHint::parse)
                .unwrap_or(SizeHint::Normal),
            justification: json["justificativa"].as_str().unwrap_or("").to_string(),
            alerts,
            validity_hours: json["validade_horas"]
                .as_i64()
                .unwrap_or(self.validity_hours_default),
            timestamp: Utc::now(),
        }
    }

    fn build_prompt(&self, ctx: &JudgeContext, news_details: &str) -> String {
        let technical = ctx.technical.as_ref();
        let max_corr = {
            let mut max_abs: f64 = 0.0;
            if let Some(closes) = &ctx.candidate_closes {
                for (other, series) in &ctx.portfolio_closes {
                    if other == &ctx.symbol {
                        continue;
                    }
                    max_abs = max_abs.max(self.correlation.correlation(closes, series).abs());
                }
            }
            max_abs
        };

        let mut prompt = format!(
            "Voce e o JUIZ FINAL de um sistema de trading. Analise {symbol} e decida se aprova a operacao.\n\
             \n\
             Triagem:\n\
             - Nota do screener: {screener:.1}/10 (vies {bias})\n\
             \n\
             Mercado:\n\
             - Preco: ${price:.2}\n\
             - Market cap: ${cap:.1}B ({tier})\n\
             - Beta: {beta:.2}\n\
             - Volatilidade 20d: {vol:.1}%\n\
             \n\
             Tecnico:\n\
             - RSI: {rsi}\n\
             - ATR: {atr}\n\
             - SuperTrend: {supertrend}\n\
             - Volume ratio: {volume_ratio}\n\
             - Suporte: {support} / Resistencia: {resistance}\n\
             \n\
             Macro:\n\
             - VIX: {vix:.1} ({vix_regime})\n\
             - SPY: ${spy:.2} ({spy_trend}, {spy_change:+.2}%)\n\
             - QQQ: ${qqq:.2} | DXY: {dxy:.2} | US10Y: {us10y:.2}%\n\
             \n\
             Portfolio:\n\
             - Correlacao maxima com posicoes abertas: {max_corr:.2}\n\
             - Exposicao do setor: {sector_exposure:.1}%\n\
             \n\
             Noticias:\n{news}\n",
            symbol = ctx.symbol,
            screener = ctx.screener.score,
            bias = ctx.screener.bias,
            price = ctx.quote.price,
            cap = ctx.quote.market_cap / 1e9,
            tier = ctx.tier,
            beta = ctx.metrics.as_ref().map(|m| m.beta).unwrap_or(1.0),
            vol = ctx.metrics.as_ref().map(|m| m.volatility_20d).unwrap_or(0.0),
            rsi = technical.map(|t| format!("{:.1}", t.rsi)).unwrap_or_else(|| "?".into()),
            atr = technical.map(|t| format!("{:.2}", t.atr)).unwrap_or_else(|| "?".into()),
            supertrend = technical
                .map(|t| if t.supertrend_bullish { "bullish" } else { "bearish" })
                .unwrap_or("neutral"),
            volume_ratio = technical
                .map(|t| format!("{:.2}x", t.volume_ratio))
                .unwrap_or_else(|| "?".into()),
            support = technical.map(|t| format!("${:.2}", t.support)).unwrap_or_else(|| "?".into()),
            resistance = technical
                .map(|t| format!("${:.2}", t.resistance))
                .unwrap_or_else(|| "?".into()),
            vix = ctx.macro_snapshot.vix,
            vix_regime = ctx.macro_snapshot.vix_regime,
            spy = ctx.macro_snapshot.spy_price,
            spy_trend = ctx.macro_snapshot.spy_trend,
            spy_change = ctx.macro_snapshot.spy_change_pct,
            qqq = ctx.macro_snapshot.qqq_price,
            dxy = ctx.macro_snapshot.dxy_price,
            us10y = ctx.macro_snapshot.us10y_yield,
            max_corr = max_corr,
            sector_exposure = ctx.sector_exposure_pct,
            news = if news_details.is_empty() { "Sem noticias adicionais" } else { news_details },
        );

        if let Some(notes) = &self.context_notes {
            prompt.push_str("\nManuais:\n");
            prompt.push_str(notes);
            prompt.push('\n');
        }

        prompt.push_str(
            "\nResponda APENAS em JSON:\n\
             {\"decisao\": \"APROVAR|REJEITAR|AGUARDAR\", \"nota_final\": 0.0, \"direcao\": \"LONG|SHORT\", \
             \"entry_price\": 0.0, \"stop_loss\": 0.0, \"take_profit_1\": 0.0, \"take_profit_2\": 0.0, \
             \"risco_recompensa\": 0.0, \"tamanho_posicao_sugerido\": \"NORMAL|REDUZIDO|MINIMO\", \
             \"justificativa\": \"\", \"alertas\": [], \"validade_horas\": 4}",
        );

        prompt
    }

    fn emit_audit(&self, decision: &TradeDecision, origin: &str, prompt: String) {
        self.audit.emit(AuditEntry {
            timestamp: Utc::now(),
            symbol: decision.symbol.clone(),
            origin: origin.to_string(),
            prompt,
            result: decision.verdict.to_string(),
            score: decision.final_score,
            direction: decision.direction.to_string(),
            justification: decision.justification.clone(),
        });
    }

    /// Cache (when a portfolio hash applies) and append to the log. Store
    /// failures are absorbed: persistence never vetoes a verdict.
    async fn persist(&self, decision: &TradeDecision, portfolio_hash: Option<&str>) {
        if let Some(hash) = portfolio_hash {
            if let Err(e) = self.store.cache_decision(decision, hash).await {
                error!("[judge] {}: failed to cache decision: {}", decision.symbol, e);
            }
        }
        if let Err(e) = self.store.log_decision(decision).await {
            error!("[judge] {}: failed to log decision: {}", decision.symbol, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ai::{AiClient, AiResponse};
    use crate::infrastructure::audit::TracingAuditSink;
    use crate::infrastructure::grounding::MockGrounding;
    use crate::infrastructure::market::MockMarketData;
    use crate::infrastructure::persistence::Database;
    use crate::config::LiquidityConfig;
    use crate::domain::ports::GroundingVerdict;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingClient {
        content: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AiClient for CountingClient {
        fn model(&self) -> &str {
            "counting"
        }

        async fn complete(&self, _: &str, _: &str, _: f64, _: u32) -> AiResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            AiResponse::success(AiProvider::GeminiPro, "counting", self.content.clone(), 100)
        }
    }

    fn gateway(content: &str) -> (Arc<AtomicUsize>, Arc<AiGateway>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(CountingClient {
            content: content.to_string(),
            calls: calls.clone(),
        });
        (
            calls,
            Arc::new(AiGateway::with_clients(vec![(AiProvider::GeminiPro, client)])),
        )
    }

    async fn judge_with(
        content: &str,
        grounding: Option<Arc<dyn Grounding>>,
    ) -> (Judge, Arc<AtomicUsize>, DecisionStore) {
        let (calls, ai) = gateway(content);
        let store = DecisionStore::new(Database::in_memory().await.unwrap());
        let market = Arc::new(MockMarketData::new(LiquidityConfig::default()));
        let judge = Judge::new(
            &AiConfig::default(),
            0.75,
            ai,
            store.clone(),
            market,
            grounding,
            Arc::new(TracingAuditSink),
        );
        (judge, calls, store)
    }

    fn context(symbol: &str) -> JudgeContext {
        JudgeContext {
            symbol: symbol.to_string(),
            screener: ScreenerResult {
                symbol: symbol.to_string(),
                score: 8.0,
                summary: String::new(),
                bias: Direction::Long,
                confidence: 0.7,
                passed: true,
                timestamp: Utc::now(),
            },
            quote: StockQuote {
                symbol: symbol.to_string(),
                price: 100.0,
                market_cap: 1_000_000_000_000.0,
                ..Default::default()
            },
            technical: None,
            macro_snapshot: MacroSnapshot::default(),
            metrics: None,
            tier: Tier::Tier1Large,
            news_details: String::new(),
            candidate_closes: None,
            portfolio_closes: HashMap::new(),
            sector_exposure_pct: 0.0,
        }
    }

    fn wiggly(len: usize, phase: f64) -> Vec<f64> {
        (0..len)
            .map(|i| 100.0 + ((i as f64) * 0.8 + phase).sin() * 5.0)
            .collect()
    }

    const APPROVAL: &str = r#"{"decisao": "APROVAR", "nota_final": 9.0, "direcao": "LONG",
        "entry_price": 100.0, "stop_loss": 97.0, "take_profit_1": 106.0, "take_profit_2": 109.0,
        "risco_recompensa": 2.5, "tamanho_posicao_sugerido": "NORMAL",
        "justificativa": "setup forte", "alertas": [], "validade_horas": 4}"#;

    #[tokio::test]
    async fn clean_approval_is_cached_and_logged() {
        let (judge, calls, store) = judge_with(APPROVAL, None).await;
        let decision = judge.judge(context("NVDA")).await;

        assert_eq!(decision.verdict, Verdict::Aprovar);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let cached = store
            .cached_decision("NVDA", "", 2, Utc::now())
            .await
            .unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn score_below_threshold_is_overridden() {
        let content = r#"{"decisao": "APROVAR", "nota_final": 7.2, "direcao": "LONG",
            "entry_price": 100.0, "stop_loss": 99.0, "take_profit_1": 104.0,
            "take_profit_2": 106.0, "risco_recompensa": 4.0}"#;
        let (judge, _, _) = judge_with(content, None).await;
        let decision = judge.judge(context("XYZ")).await;

        assert_eq!(decision.verdict, Verdict::Rejeitar);
        assert!(decision
            .alerts
            .iter()
            .any(|a| a.contains("Nota 7.2 abaixo do threshold 8")));
    }

    #[tokio::test]
    async fn poor_risk_reward_is_overridden() {
        let content = r#"{"decisao": "APROVAR", "nota_final": 9.0, "direcao": "LONG",
            "entry_price": 100.0, "stop_loss": 97.0, "take_profit_1": 102.0,
            "take_profit_2": 103.0, "risco_recompensa": 1.5}"#;
        let (judge, _, _) = judge_with(content, None).await;
        let decision = judge.judge(context("XYZ")).await;

        assert_eq!(decision.verdict, Verdict::Rejeitar);
        assert!(decision.alerts.iter().any(|a| a.contains("R/R 1.5")));
    }

    #[tokio::test]
    async fn stop_on_wrong_side_is_overridden() {
        let content = r#"{"decisao": "APROVAR", "nota_final": 9.0, "direcao": "LONG",
            "entry_price": 100.0, "stop_loss": 101.0, "take_profit_1": 106.0,
            "take_profit_2": 109.0, "risco_recompensa": 2.5}"#;
        let (judge, _, _) = judge_with(content, None).await;
        let decision = judge.judge(context("XYZ")).await;

        assert_eq!(decision.verdict, Verdict::Rejeitar);
        assert!(decision.alerts.iter().any(|a| a.contains("para LONG")));
    }

    #[tokio::test]
    async fn correlation_veto_skips_the_ai_entirely() {
        let (judge, calls, _) = judge_with(APPROVAL, None).await;

        let base = wiggly(70, 0.0);
        let near_copy: Vec<f64> = base.iter().map(|p| p * 1.0004).collect();
        let mut ctx = context("AAPL");
        ctx.candidate_closes = Some(base);
        ctx.portfolio_closes.insert("MSFT".to_string(), near_copy);

        let decision = judge.judge(ctx).await;
        assert_eq!(decision.verdict, Verdict::Rejeitar);
        assert!(decision.justification.contains("MSFT"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_and_portfolio_change_invalidates() {
        let (judge, calls, _) = judge_with(APPROVAL, None).await;

        let mut ctx = context("NVDA");
        ctx.candidate_closes = Some(wiggly(70, 0.0));
        ctx.portfolio_closes.insert("AAPL".to_string(), wiggly(70, 1.7));
        ctx.portfolio_closes.insert("MSFT".to_string(), wiggly(70, 4.6));

        let first = judge.judge(ctx).await;
        assert_eq!(first.verdict, Verdict::Aprovar);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Same portfolio a moment later: served from cache, no AI call.
        let mut again = context("NVDA");
        again.candidate_closes = Some(wiggly(70, 0.0));
        again.portfolio_closes.insert("AAPL".to_string(), wiggly(70, 1.7));
        again.portfolio_closes.insert("MSFT".to_string(), wiggly(70, 4.6));
        let second = judge.judge(again).await;
        assert_eq!(second.verdict, first.verdict);
        assert_eq!(second.final_score, first.final_score);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // MSFT closed: new hash, cache miss, full path runs again.
        let mut changed = context("NVDA");
        changed.candidate_closes = Some(wiggly(70, 0.0));
        changed.portfolio_closes.insert("AAPL".to_string(), wiggly(70, 1.7));
        let third = judge.judge(changed).await;
        assert_eq!(third.verdict, Verdict::Aprovar);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unverified_low_confidence_news_is_rejected() {
        let grounding = MockGrounding::new();
        grounding
            .set_verdict(
                "RUMOR",
                GroundingVerdict {
                    verified: false,
                    confidence: 0.1,
                    sources: Vec::new(),
                    summary: String::new(),
                },
            )
            .await;

        let grounding: Arc<dyn Grounding> = Arc::new(grounding);
        let (judge, calls, _) = judge_with(APPROVAL, Some(grounding)).await;
        let mut ctx = context("RUMOR");
        ctx.news_details = "RUMOR to be acquired by a mystery buyer".to_string();

        let decision = judge.judge(ctx).await;
        assert_eq!(decision.verdict, Verdict::Rejeitar);
        assert!(decision.justification.contains("nao verificado"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unparseable_ai_response_rejects() {
        let (judge, _, _) = judge_with("the model rambled with no json", None).await;
        let decision = judge.judge(context("XYZ")).await;
        assert_eq!(decision.verdict, Verdict::Rejeitar);
        assert!(decision.justification.contains("JSON"));
    }

    #[tokio::test]
    async fn validate_decision_rejects_duplicates_and_poor_rr() {
        let (judge, _, _) = judge_with(APPROVAL, None).await;
        let mut decision = TradeDecision::rejection("AAPL", "x");
        decision.risk_reward = 2.5;

        assert!(!judge.validate_decision(&decision, &["AAPL".to_string()]));
        assert!(judge.validate_decision(&decision, &["MSFT".to_string()]));

        decision.risk_reward = 1.9;
        assert!(!judge.validate_decision(&decision, &[]));
    }

    #[test]
    fn portfolio_hash_is_sorted_and_deterministic() {
        let hash = Judge::portfolio_hash(&["MSFT".to_string(), "AAPL".to_string()]);
        assert_eq!(hash, "AAPL,MSFT");
        assert_eq!(Judge::portfolio_hash(&[]), "");
    }
}
