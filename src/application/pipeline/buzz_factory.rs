//! Phase 0: multi-source candidate generation and the pre-screen filters.
//!
//! Four scanners run in order (watchlist, volume spikes, gaps, news
//! catalysts); the first source to surface a symbol wins. The combined list
//! is sorted by buzz score and capped before phase 1 ever sees it.

use crate::config::{LiquidityConfig, Phase0Config, TiersConfig};
use crate::domain::ports::{Clock, EarningsCalendar, MarketData, NewsSource};
use crate::domain::types::{Candidate, CandidateSource, StockQuote, Tier};
use chrono::{NaiveTime, Weekday};
use chrono::Datelike;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Symbols swept by the spike and gap scanners. Wider than the watchlist on
/// purpose; the candidate cap bounds what moves forward.
const SCAN_UNIVERSE: &[&str] = &[
    // Big tech
    "AAPL", "MSFT", "GOOGL", "GOOG", "AMZN", "META", "NVDA", "TSLA",
    // Finance
    "JPM", "BAC", "GS", "V", "MA",
    // Healthcare
    "JNJ", "UNH", "PFE", "LLY",
    // Consumer
    "WMT", "HD", "DIS", "NKE", "SBUX", "MCD",
    // Energy
    "XOM", "CVX", "COP",
    // Industrials
    "BA", "CAT", "GE",
    // Semiconductors
    "AMD", "INTC", "QCOM", "AVGO", "MU", "TSM",
    // Software
    "CRM", "ADBE", "ORCL",
    // High-beta favorites
    "COIN", "MSTR", "PLTR", "GME",
    // ADRs with USD liquidity
    "PBR", "VALE", "ITUB", "NU", "XP",
];

/// Headline keywords that mark a tradable catalyst, English and Portuguese.
const CATALYST_KEYWORDS: &[&str] = &[
    // Earnings
    "earnings", "revenue", "profit", "loss", "quarterly", "annual", "beats", "misses",
    "outlook", "forecast", "guidance",
    // Regulatory
    "fda", "approval", "sec", "investigation", "regulatory",
    // M&A
    "merger", "acquisition", "deal", "buyout", "takeover", "bid",
    // Mover verbs
    "surges", "plunges", "jumps", "drops", "rallies", "tumbles", "soars", "crashes",
    "spikes", "falls", "rises", "gains",
    // Analyst actions
    "upgrade", "downgrade", "target", "rating",
    // Corporate actions
    "partnership", "breakthrough", "buyback", "announces", "launches", "dividend",
    "split", "ipo", "offering", "stake",
    // Portuguese equivalents
    "lucro", "prejuizo", "receita", "resultado", "trimestral", "balanço", "dividendo",
    "dispara", "despenca", "sobe", "cai", "alta", "queda", "recorde", "valoriza",
    "fusão", "aquisição", "parceria", "acordo", "oferta",
];

/// Uppercase tokens that look like tickers but never are.
const EXCLUDED_TOKENS: &[&str] = &[
    // Corporate titles
    "CEO", "CFO", "CTO", "COO", "CMO", "CIO", "IPO",
    // Regulators and agencies
    "SEC", "FDA", "FTC", "FCC", "EPA", "IRS", "DOJ", "FBI", "CVM", "BC",
    // Financial terms
    "ETF", "ESG", "NYSE", "NASDAQ", "DOW", "GDP", "CPI", "PIB",
    // Geography
    "USA", "UK", "EU", "US", "UAE", "APAC", "BR", "EUA",
    // Media
    "CNN", "BBC", "FOX", "HBO", "UOL",
    // Sports
    "NFL", "NBA", "MLB", "NHL", "UFC", "FIFA",
    // International bodies
    "NATO", "UN", "WHO", "WTO", "OPEC", "IMF",
    // Tech jargon
    "AI", "ML", "AR", "VR", "IOT", "API", "SDK",
    // Common English
    "THE", "AND", "FOR", "WITH", "FROM", "AT", "ON", "IN", "NEW", "SAYS", "AMID",
    "AFTER", "JUST", "NEWS", "WHY", "HOW", "WHEN", "WHERE", "WHO", "WHAT",
    // Common Portuguese
    "COM", "POR", "PARA", "QUE", "NAO", "MAIS", "COMO", "SOBRE", "APOS", "PODE",
    "DIZ", "VER", "SER", "TEM",
];

/// Query feeds swept for catalyst headlines.
const CATALYST_TOPICS: &[&str] = &["markets", "stocks", "technology"];

const QUOTE_CONCURRENCY: usize = 8;

pub struct BuzzFactory {
    phase0: Phase0Config,
    tiers: TiersConfig,
    liquidity: LiquidityConfig,
    market: Arc<dyn MarketData>,
    news: Arc<dyn NewsSource>,
    earnings: Arc<dyn EarningsCalendar>,
    clock: Clock,
}

impl BuzzFactory {
    pub fn new(
        phase0: Phase0Config,
        tiers: TiersConfig,
        liquidity: LiquidityConfig,
        market: Arc<dyn MarketData>,
        news: Arc<dyn NewsSource>,
        earnings: Arc<dyn EarningsCalendar>,
        clock: Clock,
    ) -> Self {
        Self {
            phase0,
            tiers,
            liquidity,
            market,
            news,
            earnings,
            clock,
        }
    }

    /// Aggregate all sources, dedup by symbol (first source wins), sort by
    /// buzz score and keep the top `max_candidates`.
    pub async fn generate_daily_buzz(&self, force_all: bool) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for batch in [
            self.scan_watchlist().await,
            self.scan_volume_spikes().await,
            self.scan_gaps(force_all).await,
            self.scan_news_catalysts().await,
        ] {
            for candidate in batch {
                if seen.insert(candidate.symbol.clone()) {
                    candidates.push(candidate);
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.buzz_score
                .partial_cmp(&a.buzz_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let total = candidates.len();
        candidates.truncate(self.phase0.max_candidates);
        info!(
            "buzz factory: {} found, top {} selected",
            total,
            candidates.len()
        );
        candidates
    }

    async fn quotes_for(&self, symbols: &[String]) -> Vec<StockQuote> {
        stream::iter(symbols.iter().cloned())
            .map(|symbol| {
                let market = self.market.clone();
                async move { market.quote(&symbol).await.ok() }
            })
            .buffer_unordered(QUOTE_CONCURRENCY)
            .filter_map(|quote| async move { quote })
            .collect()
            .await
    }

    /// Tier-1 watchlist, base score 5.0. Drops anything under the tier-1
    /// market-cap floor.
    async fn scan_watchlist(&self) -> Vec<Candidate> {
        let quotes = self.quotes_for(&self.phase0.watchlist).await;
        let min_cap = self.tiers.tier1_large_cap.min_market_cap;
        let mut candidates = Vec::new();

        for quote in quotes {
            if quote.market_cap > 0.0 && quote.market_cap < min_cap {
                continue;
            }
            let mut candidate = Candidate::new(
                quote.symbol.clone(),
                CandidateSource::Watchlist,
                5.0,
                format!("Tier 1 watchlist asset (${:.1}B cap)", quote.market_cap / 1e9),
            );
            candidate.tier = Tier::Tier1Large;
            candidate.market_cap = quote.market_cap;
            candidates.push(candidate);
        }

        info!(
            "watchlist scan: {}/{} candidates",
            candidates.len(),
            self.phase0.watchlist.len()
        );
        candidates
    }

    /// Volume above the spike multiple of the 20-day mean plus a dollar
    /// volume floor. Score 7 + min(ratio, 5).
    async fn scan_volume_spikes(&self) -> Vec<Candidate> {
        let universe: Vec<String> = SCAN_UNIVERSE.iter().map(|s| s.to_string()).collect();
        let quotes = self.quotes_for(&universe).await;
        let mut candidates = Vec::new();

        for quote in quotes {
            let ratio = quote.volume_ratio();
            if ratio < self.phase0.volume_spike_multiplier {
                continue;
            }
            let dollar_volume = quote.dollar_volume();
            if dollar_volume < self.liquidity.spike_min_dollar_volume {
                continue;
            }

            let mut candidate = Candidate::new(
                quote.symbol.clone(),
                CandidateSource::VolumeSpike,
                7.0 + ratio.min(5.0),
                format!("Volume spike {:.1}x (${:.1}M)", ratio, dollar_volume / 1e6),
            );
            candidate.tier = self.tier_for(quote.market_cap);
            candidate.market_cap = quote.market_cap;
            debug!("{}: volume spike {:.1}x detected", candidate.symbol, ratio);
            candidates.push(candidate);
        }

        info!("volume spike scan: {} spikes", candidates.len());
        candidates
    }

    /// Gaps vs the previous close, only during pre-market or the first half
    /// hour of the session unless forced. Score 8 + min(|gap|*10, 5).
    async fn scan_gaps(&self, force: bool) -> Vec<Candidate> {
        if !force && !self.in_gap_window() {
            debug!("gap scan skipped: outside premarket/early session");
            return Vec::new();
        }

        let universe: Vec<String> = SCAN_UNIVERSE.iter().map(|s| s.to_string()).collect();
        let quotes = self.quotes_for(&universe).await;
        let mut candidates = Vec::new();

        for quote in quotes {
            let Some(gap) = quote.gap_pct() else { continue };
            if gap.abs() < self.phase0.gap_threshold {
                continue;
            }
            let direction = if gap > 0.0 { "up" } else { "down" };
            let mut candidate = Candidate::new(
                quote.symbol.clone(),
                CandidateSource::Gap,
                8.0 + (gap.abs() * 10.0).min(5.0),
                format!(
                    "Gap {} {:.1}% (${:.2} vs ${:.2})",
                    direction,
                    gap * 100.0,
                    quote.price,
                    quote.previous_close.unwrap_or(0.0)
                ),
            );
            candidate.tier = self.tier_for(quote.market_cap);
            candidate.market_cap = quote.market_cap;
            candidates.push(candidate);
        }

        info!("gap scan: {} gaps", candidates.len());
        candidates
    }

    fn in_gap_window(&self) -> bool {
        let now = (self.clock)().time();
        let premarket_start = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let market_open = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        let early_cutoff = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        (premarket_start..market_open).contains(&now) || (market_open..early_cutoff).contains(&now)
    }

    /// Catalyst headlines from topic query feeds: keyword-gated, tickers
    /// extracted from headline plus summary, known non-tickers excluded.
    async fn scan_news_catalysts(&self) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();

        for topic in CATALYST_TOPICS {
            let articles = match self.news.search(topic, 15).await {
                Ok(articles) => articles,
                Err(e) => {
                    warn!("catalyst feed {} failed: {}", topic, e);
                    continue;
                }
            };

            for article in articles {
                let text = format!("{} {}", article.title, article.summary);
                let lowered = text.to_lowercase();
                if !CATALYST_KEYWORDS.iter().any(|k| lowered.contains(k)) {
                    continue;
                }

                for symbol in extract_tickers(&text) {
                    if candidates.iter().any(|c| c.symbol == symbol) {
                        continue;
                    }
                    let quote = self.market.quote(&symbol).await.ok();
                    let market_cap = quote.as_ref().map(|q| q.market_cap).unwrap_or(0.0);

                    let news_text = format!(
                        "HEADLINE: {}\nSUMMARY: {}\nSOURCE: {}",
                        article.title, article.summary, article.source
                    );
                    let mut candidate = Candidate::new(
                        symbol.clone(),
                        CandidateSource::NewsCatalyst,
                        8.0,
                        format!("Catalyst: {:.80}", article.title),
                    );
                    candidate.tier = self.tier_for(market_cap);
                    candidate.market_cap = market_cap;
                    candidate.news_content = Some(news_text);
                    debug!("{}: catalyst news detected", symbol);
                    candidates.push(candidate);
                }
            }
        }

        info!("catalyst scan: {} candidates", candidates.len());
        candidates
    }

    fn tier_for(&self, market_cap: f64) -> Tier {
        if market_cap >= self.tiers.tier1_large_cap.min_market_cap {
            Tier::Tier1Large
        } else if market_cap > 0.0 {
            Tier::Tier2Mid
        } else {
            Tier::Unknown
        }
    }

    /// The gate before phase 1: Friday block, market data present, market-cap
    /// tier floor, liquidity and earnings proximity.
    pub async fn apply_filters(&self, candidates: Vec<Candidate>) -> Vec<Candidate> {
        if self.phase0.friday_block && (self.clock)().weekday() == Weekday::Fri {
            warn!("friday blocking active, no new entries today");
            return Vec::new();
        }

        let total = candidates.len();
        let mut filtered = Vec::new();

        for mut candidate in candidates {
            let symbol = candidate.symbol.clone();

            let Ok(quote) = self.market.quote(&symbol).await else {
                debug!("{} rejected: no market data", symbol);
                continue;
            };

            if quote.market_cap < self.tiers.tier2_mid_cap.min_market_cap {
                debug!(
                    "{} rejected: market cap ${:.2}B below floor",
                    symbol,
                    quote.market_cap / 1e9
                );
                continue;
            }
            candidate.tier = self.tier_for(quote.market_cap);
            candidate.market_cap = quote.market_cap;

            match self.market.check_liquidity(&symbol).await {
                Ok(true) => {}
                _ => {
                    debug!("{} rejected: low liquidity", symbol);
                    continue;
                }
            }

            if self
                .earnings
                .earnings_within(&symbol, self.phase0.earnings_proximity_days)
                .await
            {
                debug!("{} rejected: earnings within window", symbol);
                continue;
            }

            filtered.push(candidate);
        }

        info!("phase 0 filters: {}/{} candidates passed", filtered.len(), total);
        filtered
    }
}

/// Uppercase tokens of 2..=6 chars (optionally with a trailing digit, for B3
/// style symbols) that are not in the exclusion set.
pub fn extract_tickers(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !c.is_ascii_alphanumeric()) {
        let token = raw.trim();
        if token.len() < 2 || token.len() > 6 {
            continue;
        }
        let looks_like_ticker = token.chars().all(|c| c.is_ascii_uppercase())
            || (token.len() > 2
                && token.chars().rev().skip(1).all(|c| c.is_ascii_uppercase())
                && token.ends_with(|c: char| c.is_ascii_digit()));
        if !looks_like_ticker {
            continue;
        }
        if EXCLUDED_TOKENS.contains(&token) {
            continue;
        }
        if !out.iter().any(|t| t == token) {
            out.push(token.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::fixed_clock;
    use crate::infrastructure::earnings::MockEarningsCalendar;
    use crate::infrastructure::market::MockMarketData;
    use crate::infrastructure::news::MockNewsSource;
    use chrono::{Local, TimeZone};

    fn tuesday_premarket() -> Clock {
        // 2025-06-03 is a Tuesday.
        fixed_clock(Local.with_ymd_and_hms(2025, 6, 3, 8, 30, 0).unwrap())
    }

    fn friday() -> Clock {
        // 2025-06-06 is a Friday.
        fixed_clock(Local.with_ymd_and_hms(2025, 6, 6, 8, 30, 0).unwrap())
    }

    fn factory(
        market: MockMarketData,
        news: MockNewsSource,
        earnings: MockEarningsCalendar,
        clock: Clock,
    ) -> BuzzFactory {
        let phase0 = Phase0Config {
            watchlist: vec!["AAPL".to_string(), "MSFT".to_string()],
            ..Default::default()
        };
        BuzzFactory::new(
            phase0,
            TiersConfig::default(),
            LiquidityConfig::default(),
            Arc::new(market),
            Arc::new(news),
            Arc::new(earnings),
            clock,
        )
    }

    fn liquid_quote(symbol: &str, price: f64, market_cap: f64) -> StockQuote {
        StockQuote {
            symbol: symbol.to_string(),
            price,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 4_000_000,
            avg_volume: 4_000_000,
            market_cap,
            change_pct: 0.0,
            previous_close: Some(price),
            beta: Some(1.0),
            sector: Some("Technology".to_string()),
            industry: None,
        }
    }

    #[test]
    fn ticker_extraction_filters_noise() {
        let tickers = extract_tickers(
            "NVDA surges after earnings beat; CEO cites AI demand, SEC unfazed (AAPL watching)",
        );
        assert!(tickers.contains(&"NVDA".to_string()));
        assert!(tickers.contains(&"AAPL".to_string()));
        assert!(!tickers.contains(&"CEO".to_string()));
        assert!(!tickers.contains(&"SEC".to_string()));
        assert!(!tickers.contains(&"AI".to_string()));
    }

    #[test]
    fn ticker_extraction_ignores_shouted_prepositions() {
        // All-caps fragments are common in wire headlines; short particles
        // and the BR central bank must not read as symbols.
        let tickers = extract_tickers("FED HOLDS RATES ON INFLATION FEARS AT BC MEETING IN MAY");
        assert!(!tickers.contains(&"ON".to_string()));
        assert!(!tickers.contains(&"AT".to_string()));
        assert!(!tickers.contains(&"IN".to_string()));
        assert!(!tickers.contains(&"BC".to_string()));
    }

    #[test]
    fn ticker_extraction_accepts_b3_style() {
        let tickers = extract_tickers("PETR4 dispara com alta do petroleo");
        assert!(tickers.contains(&"PETR4".to_string()));
    }

    #[tokio::test]
    async fn watchlist_respects_market_cap_floor() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_quote(liquid_quote("AAPL", 180.0, 3_000_000_000_000.0)).await;
        market.set_quote(liquid_quote("MSFT", 10.0, 1_000_000_000.0)).await; // below tier-1

        let factory = factory(
            market,
            MockNewsSource::new(),
            MockEarningsCalendar::new(),
            tuesday_premarket(),
        );
        let candidates = factory.scan_watchlist().await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "AAPL");
        assert_eq!(candidates[0].buzz_score, 5.0);
    }

    #[tokio::test]
    async fn dedup_keeps_first_source() {
        let market = MockMarketData::new(LiquidityConfig::default());
        // AAPL qualifies for watchlist AND volume spike.
        let mut spiking = liquid_quote("AAPL", 180.0, 3_000_000_000_000.0);
        spiking.volume = 12_000_000;
        market.set_quote(spiking).await;

        let factory = factory(
            market,
            MockNewsSource::new(),
            MockEarningsCalendar::new(),
            tuesday_premarket(),
        );
        let candidates = factory.generate_daily_buzz(false).await;
        let aapl: Vec<&Candidate> = candidates.iter().filter(|c| c.symbol == "AAPL").collect();
        assert_eq!(aapl.len(), 1);
        assert_eq!(aapl[0].source, CandidateSource::Watchlist);
    }

    #[tokio::test]
    async fn friday_block_empties_the_funnel() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_quote(liquid_quote("AAPL", 180.0, 3_000_000_000_000.0)).await;

        let factory = factory(
            market,
            MockNewsSource::new(),
            MockEarningsCalendar::new(),
            friday(),
        );
        let candidates = vec![Candidate::new("AAPL", CandidateSource::Watchlist, 5.0, "x")];
        let filtered = factory.apply_filters(candidates).await;
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn earnings_proximity_rejects_candidate() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_quote(liquid_quote("AAPL", 180.0, 3_000_000_000_000.0)).await;

        let earnings = MockEarningsCalendar::new();
        earnings
            .set_earnings_date("AAPL", chrono::Utc::now().date_naive() + chrono::Duration::days(3))
            .await;

        let factory = factory(market, MockNewsSource::new(), earnings, tuesday_premarket());
        let candidates = vec![Candidate::new("AAPL", CandidateSource::Watchlist, 5.0, "x")];
        let filtered = factory.apply_filters(candidates).await;
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn gap_scan_flags_large_moves_when_forced() {
        let market = MockMarketData::new(LiquidityConfig::default());
        let mut gapped = liquid_quote("NVDA", 104.0, 2_000_000_000_000.0);
        gapped.previous_close = Some(100.0);
        market.set_quote(gapped).await;

        let factory = factory(
            market,
            MockNewsSource::new(),
            MockEarningsCalendar::new(),
            // Mid-afternoon: outside the gap window, so force matters.
            fixed_clock(Local.with_ymd_and_hms(2025, 6, 3, 14, 0, 0).unwrap()),
        );

        assert!(factory.scan_gaps(false).await.is_empty());
        let forced = factory.scan_gaps(true).await;
        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].symbol, "NVDA");
        assert!(forced[0].buzz_score >= 8.0);
    }

    #[tokio::test]
    async fn catalyst_scan_attaches_news_content() {
        let market = MockMarketData::new(LiquidityConfig::default());
        market.set_quote(liquid_quote("NVDA", 900.0, 2_200_000_000_000.0)).await;

        let news = MockNewsSource::new();
        news.push_article(
            "markets",
            "NVDA surges after blowout earnings",
            "Data-center revenue beats guidance",
        )
        .await;

        let factory = factory(market, news, MockEarningsCalendar::new(), tuesday_premarket());
        let candidates = factory.scan_news_catalysts().await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "NVDA");
        assert!(candidates[0].news_content.as_ref().unwrap().contains("HEADLINE"));
    }
}
