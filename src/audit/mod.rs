// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Audit events for committed mutations.
//!
//! After every successful create/update/delete/reprioritize the service hands
//! the committed row to an [`AuditPublisher`], which projects it into an
//! [`AuditEvent`] and ships it to an [`AuditSink`] on a spawned task. The
//! mutation never waits for, or fails because of, the publish.
//!
//! # Event Format
//!
//! ```text
//! XADD {prefix}logs MAXLEN ~ 100000 *
//!   data '{"EventId":"…","Id":1,"OwnerId":7,"Name":"A","Description":"",
//!          "Priority":1,"Removed":false,"CreatedAt":"2026-01-02 15:04:05",
//!          "EventTime":"2026-01-02 15:04:05"}'
//! ```

pub mod memory;
pub mod redis_stream;

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use crate::item::Item;
use crate::metrics;

/// Timestamp layout used for `CreatedAt` and `EventTime`.
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Failed to encode audit event: {0}")]
    Encode(String),
    #[error("Audit sink error: {0}")]
    Sink(String),
}

/// Flat projection of a committed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuditEvent {
    pub event_id: String,
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub description: String,
    pub priority: i64,
    pub removed: bool,
    pub created_at: String,
    pub event_time: String,
}

impl AuditEvent {
    #[must_use]
    pub fn from_item(item: &Item, event_time: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            id: item.id,
            owner_id: item.owner_id,
            name: item.name.clone(),
            description: item.description.clone(),
            priority: item.priority,
            removed: item.removed,
            created_at: item.created_at.format(EVENT_TIME_FORMAT).to_string(),
            event_time: event_time.format(EVENT_TIME_FORMAT).to_string(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, AuditError> {
        serde_json::to_vec(self).map_err(|e| AuditError::Encode(e.to_string()))
    }
}

/// Append-only destination for audit payloads.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), AuditError>;
}

/// Best-effort, non-blocking audit emitter.
#[derive(Clone)]
pub struct AuditPublisher {
    sink: Option<Arc<dyn AuditSink>>,
    topic: String,
    timeout: Duration,
}

impl AuditPublisher {
    pub fn new(sink: Arc<dyn AuditSink>, topic: impl Into<String>, timeout: Duration) -> Self {
        Self {
            sink: Some(sink),
            topic: topic.into(),
            timeout,
        }
    }

    /// A publisher that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sink: None,
            topic: String::new(),
            timeout: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Spawn delivery of `item`'s event and return immediately.
    ///
    /// The handle is only useful to tests; failures are logged inside the
    /// task and never surface to the caller.
    pub fn publish(&self, item: &Item) -> Option<JoinHandle<()>> {
        let sink = self.sink.clone()?;
        let event = AuditEvent::from_item(item, Utc::now());
        let topic = self.topic.clone();
        let timeout = self.timeout;

        Some(tokio::spawn(async move {
            deliver(sink.as_ref(), &topic, timeout, &event).await;
        }))
    }
}

async fn deliver(sink: &dyn AuditSink, topic: &str, timeout: Duration, event: &AuditEvent) {
    let result = match event.to_json() {
        Ok(payload) => match tokio::time::timeout(timeout, sink.publish(topic, &payload)).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_timeout("audit", "publish");
                Err(AuditError::Sink(format!("publish timed out after {:?}", timeout)))
            }
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            metrics::record_audit_event(topic, "ok");
            debug!(topic, id = event.id, event_id = %event.event_id, "Audit event published");
        }
        Err(e) => {
            metrics::record_audit_event(topic, "error");
            warn!(topic, id = event.id, error = %e, "Audit event dropped");
        }
    }
}
