//! SQLite storage for the Ledger service.
//!
//! One append-only events table plus two snapshot tables. The events
//! table is the source of truth; snapshots are refreshed after each
//! insert and can be rebuilt from scratch at any time.

use crate::projection::{fold_orders, fold_runs};
use claw_core::{utc_now_iso, EventAck, EventRecord, NewEvent, OrderSnapshot, RunSnapshot};
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT UNIQUE NOT NULL,
    ts TEXT NOT NULL,
    run_id TEXT,
    order_id TEXT,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS runs_snapshot (
    run_id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    message TEXT NOT NULL,
    started_at TEXT,
    ended_at TEXT,
    order_ids TEXT NOT NULL,
    worktree TEXT NOT NULL,
    order_head TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS orders_snapshot (
    order_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    status TEXT NOT NULL,
    ts TEXT NOT NULL,
    worktree TEXT NOT NULL,
    unit_head TEXT NOT NULL,
    order_head TEXT NOT NULL,
    extra TEXT NOT NULL
);
";

const EVENTS_COLUMNS: &str = "id, event_id, ts, run_id, order_id, event_type, payload";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Outcome of an event insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Exists,
}

pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    /// Open (or create) the database at `db_path` and apply the schema.
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed).execute(&self.pool).await?;
            }
        }
        Ok(())
    }

    /// Append an event. A duplicate `event_id` is a successful no-op.
    ///
    /// Snapshot refresh failures are logged and never fail the insert;
    /// the event stays authoritative and a later rebuild heals the
    /// snapshots.
    pub async fn insert_event(&self, event: NewEvent) -> Result<(InsertOutcome, EventAck)> {
        let event_id = event
            .event_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let ts = event.ts.clone().unwrap_or_else(utc_now_iso);
        let payload_json = serde_json::to_string(&event.payload)?;

        let result = sqlx::query(
            "INSERT INTO events (event_id, ts, run_id, order_id, event_type, payload) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&event_id)
        .bind(&ts)
        .bind(event.run_id.as_deref())
        .bind(event.order_id.as_deref())
        .bind(&event.event_type)
        .bind(&payload_json)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Ok((
                    InsertOutcome::Exists,
                    EventAck {
                        status: "exists".to_string(),
                        event_id,
                    },
                ));
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self
            .refresh_snapshots(event.run_id.as_deref(), event.order_id.as_deref())
            .await
        {
            warn!(event_id = %event_id, "snapshot refresh failed after insert: {e}");
        }

        Ok((
            InsertOutcome::Created,
            EventAck {
                status: "created".to_string(),
                event_id,
            },
        ))
    }

    /// List events in insertion-descending order, optionally filtered.
    pub async fn list_events(
        &self,
        run_id: Option<&str>,
        order_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EventRecord>> {
        let mut query = format!("SELECT {EVENTS_COLUMNS} FROM events WHERE 1=1");
        if run_id.is_some() {
            query.push_str(" AND run_id = ?");
        }
        if order_id.is_some() {
            query.push_str(" AND order_id = ?");
        }
        query.push_str(" ORDER BY id DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, EventRow>(&query);
        if let Some(rid) = run_id {
            q = q.bind(rid);
        }
        if let Some(oid) = order_id {
            q = q.bind(oid);
        }
        let rows = q.bind(limit).bind(offset).fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(EventRow::into_record).collect())
    }

    /// Count all stored events.
    pub async fn count_events(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    async fn events_for_run(&self, run_id: &str) -> Result<Vec<EventRecord>> {
        let query = format!("SELECT {EVENTS_COLUMNS} FROM events WHERE run_id = ?1 ORDER BY id ASC");
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EventRow::into_record).collect())
    }

    async fn events_for_order(&self, order_id: &str) -> Result<Vec<EventRecord>> {
        let query =
            format!("SELECT {EVENTS_COLUMNS} FROM events WHERE order_id = ?1 ORDER BY id ASC");
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EventRow::into_record).collect())
    }

    async fn all_events(&self) -> Result<Vec<EventRecord>> {
        let query = format!("SELECT {EVENTS_COLUMNS} FROM events ORDER BY id ASC");
        let rows = sqlx::query_as::<_, EventRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(EventRow::into_record).collect())
    }

    /// Refresh snapshots for the run/order touched by an insert.
    async fn refresh_snapshots(&self, run_id: Option<&str>, order_id: Option<&str>) -> Result<()> {
        if let Some(rid) = run_id {
            let events = self.events_for_run(rid).await?;
            if let Some(run) = fold_runs(&events).remove(rid) {
                self.upsert_run(&run).await?;
            }
        }
        if let Some(oid) = order_id {
            let events = self.events_for_order(oid).await?;
            if let Some(order) = fold_orders(&events).remove(oid) {
                self.upsert_order(&order).await?;
            }
        }
        Ok(())
    }

    /// Drop all snapshots and re-fold them from the events table.
    pub async fn rebuild(&self) -> Result<()> {
        let events = self.all_events().await?;
        let runs = fold_runs(&events);
        let orders = fold_orders(&events);

        sqlx::query("DELETE FROM runs_snapshot")
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM orders_snapshot")
            .execute(&self.pool)
            .await?;

        for run in runs.values() {
            self.upsert_run(run).await?;
        }
        for order in orders.values() {
            self.upsert_order(order).await?;
        }
        Ok(())
    }

    async fn upsert_run(&self, run: &RunSnapshot) -> Result<()> {
        let order_ids = serde_json::to_string(&run.order_ids)?;
        sqlx::query(
            "INSERT OR REPLACE INTO runs_snapshot \
             (run_id, status, message, started_at, ended_at, order_ids, worktree, order_head) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&run.run_id)
        .bind(&run.status)
        .bind(&run.message)
        .bind(run.started_at.as_deref())
        .bind(run.ended_at.as_deref())
        .bind(&order_ids)
        .bind(&run.worktree)
        .bind(&run.order_head)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_order(&self, order: &OrderSnapshot) -> Result<()> {
        let extra = serde_json::to_string(&order.extra)?;
        sqlx::query(
            "INSERT OR REPLACE INTO orders_snapshot \
             (order_id, run_id, status, ts, worktree, unit_head, order_head, extra) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&order.order_id)
        .bind(&order.run_id)
        .bind(&order.status)
        .bind(&order.ts)
        .bind(&order.worktree)
        .bind(&order.unit_head)
        .bind(&order.order_head)
        .bind(&extra)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunSnapshot>> {
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT run_id, status, message, started_at, ended_at, order_ids, worktree, \
             order_head FROM runs_snapshot WHERE run_id = ?1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RunRow::into_snapshot))
    }

    pub async fn list_runs(&self) -> Result<Vec<RunSnapshot>> {
        let rows = sqlx::query_as::<_, RunRow>(
            "SELECT run_id, status, message, started_at, ended_at, order_ids, worktree, \
             order_head FROM runs_snapshot ORDER BY started_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RunRow::into_snapshot).collect())
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Option<OrderSnapshot>> {
        let row = sqlx::query_as::<_, OrderRow>(
            "SELECT order_id, run_id, status, ts, worktree, unit_head, order_head, extra \
             FROM orders_snapshot WHERE order_id = ?1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(OrderRow::into_snapshot))
    }
}

// --- Row types for SQLx ---

#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    event_id: String,
    ts: String,
    run_id: Option<String>,
    order_id: Option<String>,
    event_type: String,
    payload: String,
}

impl EventRow {
    fn into_record(self) -> EventRecord {
        let payload: Value = serde_json::from_str(&self.payload).unwrap_or(Value::Null);
        EventRecord {
            id: self.id,
            event_id: self.event_id,
            ts: self.ts,
            run_id: self.run_id,
            order_id: self.order_id,
            event_type: self.event_type,
            payload,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    run_id: String,
    status: String,
    message: String,
    started_at: Option<String>,
    ended_at: Option<String>,
    order_ids: String,
    worktree: String,
    order_head: String,
}

impl RunRow {
    fn into_snapshot(self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id,
            status: self.status,
            message: self.message,
            started_at: self.started_at,
            ended_at: self.ended_at,
            order_ids: serde_json::from_str(&self.order_ids).unwrap_or_default(),
            worktree: self.worktree,
            order_head: self.order_head,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    order_id: String,
    run_id: String,
    status: String,
    ts: String,
    worktree: String,
    unit_head: String,
    order_head: String,
    extra: String,
}

impl OrderRow {
    fn into_snapshot(self) -> OrderSnapshot {
        OrderSnapshot {
            order_id: self.order_id,
            run_id: self.run_id,
            status: self.status,
            ts: self.ts,
            worktree: self.worktree,
            unit_head: self.unit_head,
            order_head: self.order_head,
            extra: serde_json::from_str(&self.extra)
                .unwrap_or(Value::Object(serde_json::Map::new())),
        }
    }
}
