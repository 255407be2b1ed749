// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use super::{AuditError, AuditEvent, AuditSink};

/// Records published payloads in memory.
#[derive(Default)]
pub struct InMemorySink {
    events: Mutex<Vec<(String, Vec<u8>)>>,
    failing: AtomicBool,
    notify: Notify,
}

impl InMemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// `(topic, payload)` pairs in publish order.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Vec<u8>)> {
        self.events.lock().clone()
    }

    /// Payloads that decode as [`AuditEvent`].
    #[must_use]
    pub fn decoded(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` events arrived. Returns false on deadline.
    pub async fn wait_for(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let notified = self.notify.notified();
            if self.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.len() >= count;
            }
        }
    }
}

#[async_trait]
impl AuditSink for InMemorySink {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), AuditError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuditError::Sink("sink unavailable".into()));
        }
        self.events.lock().push((topic.to_string(), payload.to_vec()));
        self.notify.notify_waiters();
        Ok(())
    }
}
