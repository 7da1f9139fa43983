//! Audit sinks. The judge emits through an injected `AuditSink`; the bounded
//! queue here decouples consumers (store writer, dashboards) from the
//! decision path.

use crate::domain::ports::{AuditEntry, AuditSink};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::info;

/// Bounded audit queue. When full, the OLDEST entry is dropped so the
/// pipeline never blocks on a slow consumer.
pub struct ChannelAuditSink {
    queue: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
    notify: Notify,
}

impl ChannelAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    /// Await the next entry. Intended for a single consumer task.
    pub async fn recv(&self) -> AuditEntry {
        loop {
            if let Some(entry) = self.pop() {
                return entry;
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking drain of everything currently queued.
    pub fn drain(&self) -> Vec<AuditEntry> {
        match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn pop(&self) -> Option<AuditEntry> {
        self.queue.lock().ok().and_then(|mut q| q.pop_front())
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, entry: AuditEntry) {
        if let Ok(mut queue) = self.queue.lock() {
            if queue.len() >= self.capacity {
                queue.pop_front();
            }
            queue.push_back(entry);
        }
        self.notify.notify_one();
    }
}

/// Sink that just logs; used when no consumer is wired up.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, entry: AuditEntry) {
        info!(
            "[audit] {} {} -> {} (score {:.1}) {}",
            entry.origin, entry.symbol, entry.result, entry.score, entry.justification
        );
    }
}
