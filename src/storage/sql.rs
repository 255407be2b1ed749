// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL storage backend for the ranked item table.
//!
//! Schema (PostgreSQL; SQLite declares every column INTEGER/TEXT and
//! stores `removed` as 0/1):
//! ```sql
//! CREATE TABLE goods (
//!   id BIGINT PRIMARY KEY,          -- caller-supplied, non-zero
//!   owner_id BIGINT NOT NULL,
//!   name TEXT NOT NULL,
//!   description TEXT NOT NULL DEFAULT '',
//!   priority BIGINT NOT NULL,       -- expected unique, not constrained
//!   removed BOOLEAN NOT NULL DEFAULT FALSE,
//!   created_at BIGINT NOT NULL      -- epoch millis
//! )
//! ```
//!
//! ## Locking
//!
//! - **Create**: PostgreSQL takes `pg_advisory_xact_lock(1)` before reading
//!   `MAX(priority)`, so concurrent creates queue behind each other and the
//!   lock is released by commit or rollback. SQLite allows a single writer,
//!   and the pool is capped at one connection, so every transaction is
//!   already serialized.
//! - **Update / delete / reprioritize**: the target row is read with
//!   `FOR UPDATE` (PostgreSQL) before it is written.
//!
//! `priority` has no UNIQUE constraint: reprioritize rewrites a
//! block of rows in one statement and PostgreSQL checks non-deferred unique
//! constraints row by row.
//!
//! ## sqlx Any Driver Quirks
//!
//! Timestamps are stored as BIGINT epoch millis because the `Any` driver has
//! no timestamp mapping. It has no SQLite BOOLEAN mapping either, so `removed`
//! decodes as `bool` on PostgreSQL and as an integer on SQLite.

use std::future::Future;
use std::sync::Once;
use std::time::Duration;
use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, AnyPool, Row, Transaction};
use tracing::{debug, error, info};
use crate::item::{from_epoch_millis, Item, ItemKey, ItemPatch, ListParams, NewItem, PriorityEntry, Reprioritized};
use crate::metrics;
use crate::resilience::retry::{retry, RetryConfig};
use super::traits::{offset_priority, RankedStore, StoreError};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Key of the transaction-scoped advisory lock serializing creates.
const CREATE_LOCK_KEY: i64 = 1;

const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// SQL flavour behind the `Any` pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Sqlite,
}

impl SqlDialect {
    pub fn from_url(connection_string: &str) -> Result<Self, StoreError> {
        if connection_string.starts_with("postgres:") || connection_string.starts_with("postgresql:") {
            Ok(Self::Postgres)
        } else if connection_string.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else {
            Err(StoreError::Backend(format!(
                "Unsupported SQL connection string (expected postgres:// or sqlite:): {}",
                connection_string.split('@').next_back().unwrap_or_default()
            )))
        }
    }

    fn statements(self) -> &'static Statements {
        match self {
            Self::Postgres => &POSTGRES,
            Self::Sqlite => &SQLITE,
        }
    }
}

/// Dialect-specific statement text.
struct Statements {
    schema: &'static [&'static str],
    list: &'static str,
    get: &'static str,
    get_for_update: &'static str,
    lock_sequence: Option<&'static str>,
    max_priority: &'static str,
    insert: &'static str,
    update: &'static str,
    soft_delete: &'static str,
    move_item: &'static str,
    count_after: &'static str,
    shift_subsequent: &'static str,
    priorities_from: &'static str,
    count: &'static str,
    removed_count: &'static str,
}

const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS goods (
        id BIGINT PRIMARY KEY,
        owner_id BIGINT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        priority BIGINT NOT NULL,
        removed BOOLEAN NOT NULL DEFAULT FALSE,
        created_at BIGINT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_goods_owner ON goods (owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_goods_priority ON goods (priority)",
];

// The Any driver has no mapping for SQLite's BOOLEAN, so the flag is an INTEGER
const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS goods (
        id INTEGER PRIMARY KEY,
        owner_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        priority INTEGER NOT NULL,
        removed INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_goods_owner ON goods (owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_goods_priority ON goods (priority)",
];

static POSTGRES: Statements = Statements {
    schema: POSTGRES_SCHEMA,
    list: "SELECT id, owner_id, name, description, priority, removed, created_at
           FROM goods ORDER BY id LIMIT $1 OFFSET $2",
    get: "SELECT id, owner_id, name, description, priority, removed, created_at
          FROM goods WHERE id = $1 AND owner_id = $2",
    get_for_update: "SELECT id, owner_id, name, description, priority, removed, created_at
                     FROM goods WHERE id = $1 AND owner_id = $2 FOR UPDATE",
    lock_sequence: Some("SELECT 1 AS locked FROM pg_advisory_xact_lock($1)"),
    max_priority: "SELECT COALESCE(MAX(priority), 0) AS max_priority FROM goods",
    insert: "INSERT INTO goods (id, owner_id, name, description, priority, removed, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
    update: "UPDATE goods
             SET owner_id = $1, name = $2, description = $3, priority = $4, removed = $5
             WHERE id = $6 AND owner_id = $7",
    soft_delete: "UPDATE goods SET removed = $1 WHERE id = $2 AND owner_id = $3",
    move_item: "UPDATE goods SET priority = $1 WHERE id = $2",
    count_after: "SELECT COUNT(*) AS total FROM goods WHERE id > $1",
    shift_subsequent: "WITH new_priorities AS (
                           SELECT id, $1 + ROW_NUMBER() OVER (ORDER BY id) AS new_priority
                           FROM goods
                           WHERE id > $2
                       )
                       UPDATE goods
                       SET priority = new_priorities.new_priority
                       FROM new_priorities
                       WHERE goods.id = new_priorities.id",
    priorities_from: "SELECT id, priority FROM goods WHERE id >= $1 ORDER BY id",
    count: "SELECT COUNT(*) AS total FROM goods",
    removed_count: "SELECT COUNT(*) AS total FROM goods WHERE removed = $1",
};

static SQLITE: Statements = Statements {
    schema: SQLITE_SCHEMA,
    list: "SELECT id, owner_id, name, description, priority, removed, created_at
           FROM goods ORDER BY id LIMIT ? OFFSET ?",
    get: "SELECT id, owner_id, name, description, priority, removed, created_at
          FROM goods WHERE id = ? AND owner_id = ?",
    // Single-connection pool: the transaction already excludes other writers
    get_for_update: "SELECT id, owner_id, name, description, priority, removed, created_at
                     FROM goods WHERE id = ? AND owner_id = ?",
    lock_sequence: None,
    max_priority: "SELECT COALESCE(MAX(priority), 0) AS max_priority FROM goods",
    insert: "INSERT INTO goods (id, owner_id, name, description, priority, removed, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
    update: "UPDATE goods
             SET owner_id = ?, name = ?, description = ?, priority = ?, removed = ?
             WHERE id = ? AND owner_id = ?",
    soft_delete: "UPDATE goods SET removed = ? WHERE id = ? AND owner_id = ?",
    move_item: "UPDATE goods SET priority = ? WHERE id = ?",
    count_after: "SELECT COUNT(*) AS total FROM goods WHERE id > ?",
    shift_subsequent: "UPDATE goods
                       SET priority = ?1 + (
                           SELECT COUNT(*) FROM goods AS earlier
                           WHERE earlier.id > ?2 AND earlier.id <= goods.id
                       )
                       WHERE id > ?2",
    priorities_from: "SELECT id, priority FROM goods WHERE id >= ? ORDER BY id",
    count: "SELECT COUNT(*) AS total FROM goods",
    removed_count: "SELECT COUNT(*) AS total FROM goods WHERE removed = ?",
};

type SqlTx = Transaction<'static, Any>;

pub struct SqlStore {
    pool: AnyPool,
    dialect: SqlDialect,
    timeout: Duration,
}

impl SqlStore {
    /// Create a new SQL store with default pool limits.
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        Self::with_limits(connection_string, DEFAULT_MAX_CONNECTIONS, DEFAULT_TIMEOUT).await
    }

    /// Create a new SQL store with startup-mode retry (fails fast if config is wrong).
    ///
    /// `timeout` bounds connection acquisition and every store operation.
    pub async fn with_limits(
        connection_string: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        install_drivers();

        let dialect = SqlDialect::from_url(connection_string)?;
        let max_connections = match dialect {
            SqlDialect::Postgres => max_connections.max(1),
            SqlDialect::Sqlite => 1,
        };

        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(timeout)
                .idle_timeout(Duration::from_secs(300))
                .connect(connection_string)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        let store = Self { pool, dialect, timeout };

        if dialect == SqlDialect::Sqlite {
            store.enable_wal_mode().await?;
        }

        store.init_schema().await?;
        info!(?dialect, max_connections, "SQL ranked store ready");
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    #[must_use]
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn sql(&self) -> &'static Statements {
        self.dialect.statements()
    }

    async fn enable_wal_mode(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to enable WAL mode: {}", e)))?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for stmt in self.sql().schema {
            retry("sql_init_schema", &RetryConfig::query(), || async {
                sqlx::query(*stmt)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))
            })
            .await?;
        }
        Ok(())
    }

    /// Run `fut` under the store deadline.
    ///
    /// On expiry the future is dropped; an open transaction is rolled back
    /// by sqlx when its connection returns to the pool.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                metrics::record_timeout("store", operation);
                Err(StoreError::Timeout {
                    operation,
                    after: self.timeout,
                })
            }
        }
    }

    async fn begin(&self) -> Result<SqlTx, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to begin transaction: {}", e)))
    }

    /// Commit on success, roll back on failure.
    ///
    /// A failed rollback is reported as [`StoreError::RollbackFailed`].
    async fn finish<T>(operation: &'static str, tx: SqlTx, result: Result<T, StoreError>) -> Result<T, StoreError> {
        match result {
            Ok(value) => {
                tx.commit()
                    .await
                    .map_err(|e| StoreError::Transaction(format!("{}: commit failed: {}", operation, e)))?;
                Ok(value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => Err(err),
                Err(rollback) => {
                    error!(operation, error = %err, rollback = %rollback, "Rollback failed, store state unknown");
                    Err(StoreError::RollbackFailed {
                        cause: err.to_string(),
                        rollback: rollback.to_string(),
                    })
                }
            },
        }
    }

    async fn fetch_for_update(&self, tx: &mut SqlTx, key: ItemKey) -> Result<Item, StoreError> {
        let row = sqlx::query(self.sql().get_for_update)
            .bind(key.id)
            .bind(key.owner_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| step_error("lock row", e))?;

        match row {
            Some(row) => item_from_row(&row),
            None => Err(StoreError::not_found(key)),
        }
    }

    async fn fetch_in_tx(&self, tx: &mut SqlTx, key: ItemKey) -> Result<Item, StoreError> {
        let row = sqlx::query(self.sql().get)
            .bind(key.id)
            .bind(key.owner_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| step_error("read back row", e))?;

        match row {
            Some(row) => item_from_row(&row),
            None => Err(StoreError::not_found(key)),
        }
    }

    async fn create_in_tx(&self, tx: &mut SqlTx, item: NewItem) -> Result<Item, StoreError> {
        if let Some(lock) = self.sql().lock_sequence {
            sqlx::query(lock)
                .bind(CREATE_LOCK_KEY)
                .execute(&mut **tx)
                .await
                .map_err(|e| step_error("acquire create lock", e))?;
        }

        let row = sqlx::query(self.sql().max_priority)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| step_error("read max priority", e))?;
        let max_priority: i64 = row
            .try_get("max_priority")
            .map_err(|e| step_error("decode max priority", e))?;
        let priority = offset_priority(max_priority, 1)?;

        let key = ItemKey::new(item.id, item.owner_id);
        sqlx::query(self.sql().insert)
            .bind(item.id)
            .bind(item.owner_id)
            .bind(&item.name)
            .bind(&item.description)
            .bind(priority)
            .bind(item.removed)
            .bind(item.created_at.timestamp_millis())
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::AlreadyExists { id: item.id }
                } else {
                    step_error("insert row", e)
                }
            })?;

        self.fetch_in_tx(tx, key).await
    }

    async fn update_in_tx(&self, tx: &mut SqlTx, key: ItemKey, patch: &ItemPatch) -> Result<Item, StoreError> {
        let current = self.fetch_for_update(tx, key).await?;
        let next = patch.apply_to(&current);

        sqlx::query(self.sql().update)
            .bind(next.owner_id)
            .bind(&next.name)
            .bind(&next.description)
            .bind(next.priority)
            .bind(next.removed)
            .bind(key.id)
            .bind(key.owner_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| step_error("update row", e))?;

        self.fetch_in_tx(tx, next.key()).await
    }

    async fn delete_in_tx(&self, tx: &mut SqlTx, key: ItemKey) -> Result<Item, StoreError> {
        self.fetch_for_update(tx, key).await?;

        sqlx::query(self.sql().soft_delete)
            .bind(true)
            .bind(key.id)
            .bind(key.owner_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| step_error("soft delete row", e))?;

        self.fetch_in_tx(tx, key).await
    }

    async fn reprioritize_in_tx(
        &self,
        tx: &mut SqlTx,
        key: ItemKey,
        new_priority: i64,
    ) -> Result<Reprioritized, StoreError> {
        self.fetch_for_update(tx, key).await?;

        // The last renumbered row lands at `new_priority + later`
        let later: i64 = sqlx::query(self.sql().count_after)
            .bind(key.id)
            .fetch_one(&mut **tx)
            .await
            .and_then(|row| row.try_get("total"))
            .map_err(|e| step_error("count subsequent rows", e))?;
        offset_priority(new_priority, later)?;

        sqlx::query(self.sql().move_item)
            .bind(new_priority)
            .bind(key.id)
            .execute(&mut **tx)
            .await
            .map_err(|e| step_error("move row", e))?;

        let shifted = sqlx::query(self.sql().shift_subsequent)
            .bind(new_priority)
            .bind(key.id)
            .execute(&mut **tx)
            .await
            .map_err(|e| step_error("renumber subsequent rows", e))?;
        debug!(id = key.id, new_priority, shifted = shifted.rows_affected(), "Renumbered subsequent rows");

        let item = self.fetch_in_tx(tx, key).await?;
        let priorities = self.priorities_from(tx, key.id).await?;
        Ok(Reprioritized { item, priorities })
    }

    async fn priorities_from(&self, tx: &mut SqlTx, id: i64) -> Result<Vec<PriorityEntry>, StoreError> {
        let rows = sqlx::query(self.sql().priorities_from)
            .bind(id)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| step_error("read renumbered priorities", e))?;

        rows.iter()
            .map(|row| {
                Ok(PriorityEntry {
                    id: row.try_get("id").map_err(decode_error)?,
                    priority: row.try_get("priority").map_err(decode_error)?,
                })
            })
            .collect()
    }

    async fn scalar(&self, sql: &'static str, removed: Option<bool>) -> Result<i64, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(removed) = removed {
            query = query.bind(removed);
        }
        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        row.try_get("total").map_err(decode_error)
    }
}

#[async_trait]
impl RankedStore for SqlStore {
    async fn list(&self, params: ListParams) -> Result<Vec<Item>, StoreError> {
        self.bounded("list", async {
            let rows = sqlx::query(self.sql().list)
                .bind(params.limit)
                .bind(params.skip())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            rows.iter().map(item_from_row).collect()
        })
        .await
    }

    async fn get(&self, key: ItemKey) -> Result<Option<Item>, StoreError> {
        self.bounded("get", async {
            let row = sqlx::query(self.sql().get)
                .bind(key.id)
                .bind(key.owner_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            row.as_ref().map(item_from_row).transpose()
        })
        .await
    }

    async fn create(&self, item: NewItem) -> Result<Item, StoreError> {
        self.bounded("create", async {
            let mut tx = self.begin().await?;
            let result = self.create_in_tx(&mut tx, item).await;
            Self::finish("create", tx, result).await
        })
        .await
    }

    async fn update(&self, key: ItemKey, patch: &ItemPatch) -> Result<Item, StoreError> {
        self.bounded("update", async {
            let mut tx = self.begin().await?;
            let result = self.update_in_tx(&mut tx, key, patch).await;
            Self::finish("update", tx, result).await
        })
        .await
    }

    async fn delete(&self, key: ItemKey) -> Result<Item, StoreError> {
        self.bounded("delete", async {
            let mut tx = self.begin().await?;
            let result = self.delete_in_tx(&mut tx, key).await;
            Self::finish("delete", tx, result).await
        })
        .await
    }

    async fn reprioritize(&self, key: ItemKey, new_priority: i64) -> Result<Reprioritized, StoreError> {
        self.bounded("reprioritize", async {
            let mut tx = self.begin().await?;
            let result = self.reprioritize_in_tx(&mut tx, key, new_priority).await;
            Self::finish("reprioritize", tx, result).await
        })
        .await
    }

    async fn count(&self) -> Result<i64, StoreError> {
        self.bounded("count", self.scalar(self.sql().count, None)).await
    }

    async fn removed_count(&self) -> Result<i64, StoreError> {
        self.bounded("removed_count", self.scalar(self.sql().removed_count, Some(true)))
            .await
    }
}

fn item_from_row(row: &AnyRow) -> Result<Item, StoreError> {
    // PostgreSQL BOOLEAN decodes as bool; SQLite may hand back an integer
    let removed = row
        .try_get::<bool, _>("removed")
        .or_else(|_| row.try_get::<i64, _>("removed").map(|flag| flag != 0))
        .map_err(decode_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(decode_error)?;

    Ok(Item {
        id: row.try_get("id").map_err(decode_error)?,
        owner_id: row.try_get("owner_id").map_err(decode_error)?,
        name: row.try_get("name").map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        priority: row.try_get("priority").map_err(decode_error)?,
        removed,
        created_at: from_epoch_millis(created_at),
    })
}

fn decode_error(e: sqlx::Error) -> StoreError {
    StoreError::Backend(format!("Failed to decode row: {}", e))
}

fn step_error(step: &str, e: sqlx::Error) -> StoreError {
    StoreError::Transaction(format!("failed to {}: {}", step, e))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
