// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Stream audit sink.
//!
//! Each topic maps to the stream `{prefix}{topic}`; entries carry the JSON
//! event in a single `data` field and the stream is trimmed approximately to
//! `maxlen` entries on every append.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, Client};
use crate::resilience::retry::{retry, RetryConfig};
use super::{AuditError, AuditSink};

/// Field name holding the event payload.
pub const DATA_FIELD: &str = "data";

pub struct RedisStreamSink {
    connection: ConnectionManager,
    prefix: String,
    maxlen: usize,
}

impl RedisStreamSink {
    /// Reuse an existing connection (usually the cache's).
    pub fn new(connection: ConnectionManager, prefix: Option<&str>, maxlen: usize) -> Self {
        Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            maxlen,
        }
    }

    pub async fn connect(connection_string: &str, prefix: Option<&str>, maxlen: usize) -> Result<Self, AuditError> {
        let client = Client::open(connection_string)
            .map_err(|e| AuditError::Sink(e.to_string()))?;

        let connection = retry("redis_audit_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| AuditError::Sink(e.to_string()))?;

        Ok(Self::new(connection, prefix, maxlen))
    }

    #[must_use]
    pub fn stream_key(&self, topic: &str) -> String {
        stream_key(Some(&self.prefix), topic)
    }
}

/// Build the full stream key from an optional prefix
pub fn stream_key(prefix: Option<&str>, topic: &str) -> String {
    match prefix {
        Some(p) => format!("{}{}", p, topic),
        None => topic.to_string(),
    }
}

#[async_trait]
impl AuditSink for RedisStreamSink {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), AuditError> {
        let mut conn = self.connection.clone();
        let _id: String = cmd("XADD")
            .arg(self.stream_key(topic))
            .arg("MAXLEN")
            .arg("~")
            .arg(self.maxlen)
            .arg("*")
            .arg(DATA_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| AuditError::Sink(format!("XADD failed: {}", e)))?;
        Ok(())
    }
}
