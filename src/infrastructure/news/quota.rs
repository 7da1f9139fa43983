//! Per-day query budget for the primary news backend, persisted across
//! restarts and keyed by calendar date.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuotaState {
    date: NaiveDate,
    count: u32,
}

pub struct QuotaCounter {
    path: PathBuf,
    daily_limit: u32,
    state: Mutex<QuotaState>,
}

impl QuotaCounter {
    /// Load persisted state; a missing or corrupt file starts fresh at zero.
    pub fn new(path: impl Into<PathBuf>, daily_limit: u32, today: NaiveDate) -> Self {
        let path = path.into();
        let state = Self::load(&path)
            .map(|mut s| {
                if s.date != today {
                    info!("news quota: new day detected, resetting {} -> 0", s.count);
                    s = QuotaState { date: today, count: 0 };
                }
                s
            })
            .unwrap_or(QuotaState { date: today, count: 0 });
        Self {
            path,
            daily_limit,
            state: Mutex::new(state),
        }
    }

    fn load(path: &Path) -> Option<QuotaState> {
        let raw = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn save(path: &Path, state: &QuotaState) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating quota dir {}", parent.display()))?;
        }
        let raw = serde_json::to_string(state)?;
        std::fs::write(path, raw).with_context(|| format!("writing quota file {}", path.display()))
    }

    pub async fn can_query(&self, today: NaiveDate) -> bool {
        let mut state = self.state.lock().await;
        self.roll_date(&mut state, today);
        state.count < self.daily_limit
    }

    /// Count one query against today's budget and persist.
    pub async fn increment(&self, today: NaiveDate) {
        let mut state = self.state.lock().await;
        self.roll_date(&mut state, today);
        state.count += 1;
        if state.count % 10 == 0 {
            info!(
                "news quota: {}/{} queries used today",
                state.count, self.daily_limit
            );
        }
        if let Err(e) = Self::save(&self.path, &state) {
            error!("failed to persist news quota: {}", e);
        }
    }

    pub async fn remaining(&self, today: NaiveDate) -> u32 {
        let mut state = self.state.lock().await;
        self.roll_date(&mut state, today);
        self.daily_limit.saturating_sub(state.count)
    }

    fn roll_date(&self, state: &mut QuotaState, today: NaiveDate) {
        if state.date != today {
            info!("news quota: date rolled to {}, counter reset", today);
            state.date = today;
            state.count = 0;
            if let Err(e) = Self::save(&self.path, state) {
                error!("failed to persist news quota reset: {}", e);
            }
        }
    }
}
