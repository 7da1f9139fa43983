//! Durable store for verdicts and trades: the portfolio-aware decision
//! cache, the append-only decision log, trade history with direction-aware
//! P&L, the judge audit log and guardian snapshots.

use super::database::Database;
use crate::domain::decision::{SizeHint, TradeDecision, Verdict};
use crate::domain::ports::AuditEntry;
use crate::domain::types::Direction;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub id: i64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub quantity: i64,
    pub pnl: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct DecisionStore {
    db: Database,
}

impl DecisionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // === decision cache ===

    /// Insert or replace under (symbol, portfolio_hash, timestamp).
    pub async fn cache_decision(
        &self,
        decision: &TradeDecision,
        portfolio_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO decision_cache
            (symbol, portfolio_hash, timestamp, verdict, score, direction,
             entry_price, stop_loss, take_profit_1, take_profit_2,
             risk_reward, size_hint, justification, alerts, validity_hours)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&decision.symbol)
        .bind(portfolio_hash)
        .bind(decision.timestamp.timestamp())
        .bind(decision.verdict.to_string())
        .bind(decision.final_score)
        .bind(decision.direction.to_string())
        .bind(decision.entry_price)
        .bind(decision.stop_loss)
        .bind(decision.take_profit_1)
        .bind(decision.take_profit_2)
        .bind(decision.risk_reward)
        .bind(decision.size_hint.to_string())
        .bind(&decision.justification)
        .bind(decision.alerts.join("\u{1f}"))
        .bind(decision.validity_hours)
        .execute(&self.db.pool)
        .await
        .context("failed to cache decision")?;

        debug!("decision cached for {} (portfolio={})", decision.symbol, portfolio_hash);
        Ok(())
    }

    /// Most recent cache entry for (symbol, portfolio_hash) no older than
    /// `max_age_hours` relative to `now`.
    pub async fn cached_decision(
        &self,
        symbol: &str,
        portfolio_hash: &str,
        max_age_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<TradeDecision>> {
        let cutoff = (now - Duration::hours(max_age_hours)).timestamp();

        let row = sqlx::query(
            r#"
            SELECT symbol, timestamp, verdict, score, direction, entry_price,
                   stop_loss, take_profit_1, take_profit_2, risk_reward,
                   size_hint, justification, alerts, validity_hours
            FROM decision_cache
            WHERE symbol = ? AND portfolio_hash = ? AND timestamp > ?
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(portfolio_hash)
        .bind(cutoff)
        .fetch_optional(&self.db.pool)
        .await
        .context("failed to query decision cache")?;

        Ok(row.map(|row| {
            let alerts_raw: String = row.get("alerts");
            let alerts = if alerts_raw.is_empty() {
                Vec::new()
            } else {
                alerts_raw.split('\u{1f}').map(str::to_string).collect()
            };
            TradeDecision {
                symbol: row.get("symbol"),
                verdict: Verdict::parse(row.get::<String, _>("verdict").as_str()),
                final_score: row.get("score"),
                direction: Direction::parse(row.get::<String, _>("direction").as_str()),
                entry_price: row.get("entry_price"),
                stop_loss: row.get("stop_loss"),
                take_profit_1: row.get("take_profit_1"),
                take_profit_2: row.get("take_profit_2"),
                risk_reward: row.get("risk_reward"),
                size_hint: SizeHint::parse(row.get::<String, _>("size_hint").as_str()),
                justification: row.get("justification"),
                alerts,
                validity_hours: row.get("validity_hours"),
                timestamp: DateTime::<Utc>::from_timestamp(row.get::<i64, _>("timestamp"), 0)
                    .unwrap_or(now),
            }
        }))
    }

    /// Delete cache rows older than `hours`. Returns deleted row count.
    pub async fn clear_old_cache(&self, hours: i64, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = (now - Duration::hours(hours)).timestamp();
        let result = sqlx::query("DELETE FROM decision_cache WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.db.pool)
            .await
            .context("failed to clear old cache")?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!("cleared {} expired cache entries", deleted);
        }
        Ok(deleted)
    }

    // === decision log ===

    pub async fn log_decision(&self, decision: &TradeDecision) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO decision_log
            (symbol, verdict, score, direction, entry_price, stop_loss,
             take_profit_1, take_profit_2, risk_reward, justification,
             alerts, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&decision.symbol)
        .bind(decision.verdict.to_string())
        .bind(decision.final_score)
        .bind(decision.direction.to_string())
        .bind(decision.entry_price)
        .bind(decision.stop_loss)
        .bind(decision.take_profit_1)
        .bind(decision.take_profit_2)
        .bind(decision.risk_reward)
        .bind(&decision.justification)
        .bind(decision.alerts.join(","))
        .bind(decision.timestamp.timestamp())
        .execute(&self.db.pool)
        .await
        .context("failed to log decision")?;

        Ok(result.last_insert_rowid())
    }

    pub async fn recent_decisions(
        &self,
        symbol: Option<&str>,
        limit: i64,
    ) -> Result<Vec<(String, Verdict, f64, DateTime<Utc>)>> {
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query(
                    r#"
                    SELECT symbol, verdict, score, timestamp FROM decision_log
                    WHERE symbol = ? ORDER BY timestamp DESC LIMIT ?
                    "#,
                )
                .bind(symbol)
                .bind(limit)
                .fetch_all(&self.db.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT symbol, verdict, score, timestamp FROM decision_log
                    ORDER BY timestamp DESC LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.db.pool)
                .await
            }
        }
        .context("failed to query decision log")?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.get("symbol"),
                    Verdict::parse(row.get::<String, _>("verdict").as_str()),
                    row.get("score"),
                    DateTime::<Utc>::from_timestamp(row.get::<i64, _>("timestamp"), 0)
                        .unwrap_or_else(Utc::now),
                )
            })
            .collect())
    }

    // === trade history ===

    pub async fn log_trade_entry(
        &self,
        symbol: &str,
        direction: Direction,
        entry_price: f64,
        quantity: i64,
        entry_time: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trade_history (symbol, direction, entry_price, entry_time, quantity)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(symbol)
        .bind(direction.to_string())
        .bind(entry_price)
        .bind(entry_time.timestamp())
        .bind(quantity)
        .execute(&self.db.pool)
        .await
        .context("failed to log trade entry")?;

        let id = result.last_insert_rowid();
        info!("trade entry logged for {} (id {})", symbol, id);
        Ok(id)
    }

    /// Close a trade row, deriving P&L from the stored direction:
    /// LONG -> (exit - entry) * qty, SHORT -> (entry - exit) * qty.
    pub async fn log_trade_exit(
        &self,
        trade_id: i64,
        exit_price: f64,
        exit_time: DateTime<Utc>,
        reason: &str,
    ) -> Result<(f64, f64)> {
        let row = sqlx::query(
            "SELECT entry_price, quantity, direction FROM trade_history WHERE id = ?",
        )
        .bind(trade_id)
        .fetch_optional(&self.db.pool)
        .await
        .context("failed to load trade for exit")?
        .ok_or_else(|| anyhow::anyhow!("trade {} not found", trade_id))?;

        let entry_price: f64 = row.get("entry_price");
        let quantity: i64 = row.get("quantity");
        let direction = Direction::parse(row.get::<String, _>("direction").as_str());

        let (pnl, pnl_percent) = match direction {
            Direction::Short => (
                (entry_price - exit_price) * quantity as f64,
                (entry_price - exit_price) / entry_price * 100.0,
            ),
            _ => (
                (exit_price - entry_price) * quantity as f64,
                (exit_price - entry_price) / entry_price * 100.0,
            ),
        };

        sqlx::query(
            r#"
            UPDATE trade_history
            SET exit_price = ?, exit_time = ?, pnl = ?, pnl_percent = ?, reason = ?
            WHERE id = ?
            "#,
        )
        .bind(exit_price)
        .bind(exit_time.timestamp())
        .bind(pnl)
        .bind(pnl_percent)
        .bind(reason)
        .bind(trade_id)
        .execute(&self.db.pool)
        .await
        .context("failed to log trade exit")?;

        info!(
            "trade exit logged for id {}: pnl ${:.2} ({:.2}%)",
            trade_id, pnl, pnl_percent
        );
        Ok((pnl, pnl_percent))
    }

    /// The still-open trade row for a symbol, if any.
    pub async fn open_trade_id(&self, symbol: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM trade_history
            WHERE symbol = ? AND exit_time IS NULL
            ORDER BY entry_time DESC LIMIT 1
            "#,
        )
        .bind(symbol)
        .fetch_optional(&self.db.pool)
        .await
        .context("failed to query open trade")?;
        Ok(row.map(|r| r.get("id")))
    }

    pub async fn trade_history(
        &self,
        symbol: Option<&str>,
        limit: i64,
    ) -> Result<Vec<TradeRecord>> {
        let rows = match symbol {
            Some(symbol) => {
                sqlx::query(
                    r#"
                    SELECT id, symbol, direction, entry_price, entry_time, exit_price,
                           exit_time, quantity, pnl, pnl_percent, reason
                    FROM trade_history WHERE symbol = ?
                    ORDER BY entry_time DESC LIMIT ?
                    "#,
                )
                .bind(symbol)
                .bind(limit)
                .fetch_all(&self.db.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, symbol, direction, entry_price, entry_time, exit_price,
                           exit_time, quantity, pnl, pnl_percent, reason
                    FROM trade_history
                    ORDER BY entry_time DESC LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.db.pool)
                .await
            }
        }
        .context("failed to query trade history")?;

        Ok(rows
            .into_iter()
            .map(|row| TradeRecord {
                id: row.get("id"),
                symbol: row.get("symbol"),
                direction: Direction::parse(row.get::<String, _>("direction").as_str()),
                entry_price: row.get("entry_price"),
                entry_time: DateTime::<Utc>::from_timestamp(row.get::<i64, _>("entry_time"), 0)
                    .unwrap_or_else(Utc::now),
                exit_price: row.get("exit_price"),
                exit_time: row
                    .get::<Option<i64>, _>("exit_time")
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
                quantity: row.get("quantity"),
                pnl: row.get("pnl"),
                pnl_percent: row.get("pnl_percent"),
                reason: row.get("reason"),
            })
            .collect())
    }

    // === judge audit ===

    pub async fn save_audit(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO judge_audit
            (timestamp, symbol, origin, prompt, result, score, direction, justification)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.timestamp.timestamp())
        .bind(&entry.symbol)
        .bind(&entry.origin)
        .bind(&entry.prompt)
        .bind(&entry.result)
        .bind(entry.score)
        .bind(&entry.direction)
        .bind(&entry.justification)
        .execute(&self.db.pool)
        .await
        .context("failed to save audit entry")?;
        Ok(())
    }

    // === guardian snapshots ===

    pub async fn save_guardian_state(&self, id: &str, payload: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO guardian_state (id, payload, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET payload = excluded.payload,
                                          updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(id)
        .bind(payload)
        .execute(&self.db.pool)
        .await
        .context("failed to save guardian state")?;
        Ok(())
    }

    pub async fn load_guardian_state(&self, id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT payload FROM guardian_state WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await
            .context("failed to load guardian state")?;
        Ok(row.map(|r| r.get("payload")))
    }
}
