//! Postgres-backed aggregate + outbox store.
//!
//! ## Schema
//!
//! - `aggregates`: one row per aggregate, primary key `(aggregate_type, aggregate_id)`,
//!   partial unique index on `(aggregate_type, unique_key)`.
//! - `outbox`: append-only, ordered by a `BIGSERIAL` column; publication only ever
//!   updates `attempts`, `last_error`, `next_attempt_at` and `published_at`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation on `aggregates_pkey`) | `23505` | `Concurrency` | Two first saves of the same aggregate raced |
//! | Database (unique violation on `aggregates_unique_key`) | `23505` | `DuplicateKey` | Business key already taken |
//! | Database (other) | Any other | `Database` | Constraint/data errors |
//! | PoolClosed / Io / PoolTimedOut | N/A | `Unavailable` | Connection problems |
//! | Other | N/A | `Database` | Anything else |
//!
//! ## Thread Safety
//!
//! `PostgresStore` is `Send + Sync`. The store traits are synchronous; each call is
//! driven to completion on the runtime handle supplied at construction, so callers
//! must not be running on that runtime's async worker threads.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use shopfloor_core::{AggregateId, ExpectedVersion};

use super::r#trait::{
    AggregateRecord, AggregateStore, OutboxMessage, OutboxRecord, OutboxStats, OutboxStore,
    StoreError,
};

const AGGREGATES_PKEY: &str = "aggregates_pkey";
const AGGREGATES_UNIQUE_KEY: &str = "aggregates_unique_key";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS aggregates (
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        version BIGINT NOT NULL CHECK (version > 0),
        unique_key TEXT NULL,
        state JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        CONSTRAINT aggregates_pkey PRIMARY KEY (aggregate_type, aggregate_id)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS aggregates_unique_key
        ON aggregates (aggregate_type, unique_key)
        WHERE unique_key IS NOT NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS outbox (
        position BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL UNIQUE,
        topic TEXT NOT NULL,
        aggregate_type TEXT NOT NULL,
        aggregate_id UUID NOT NULL,
        sequence_number BIGINT NOT NULL,
        event_type TEXT NOT NULL,
        occurred_at TIMESTAMPTZ NOT NULL,
        payload JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT NULL,
        next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        published_at TIMESTAMPTZ NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS outbox_due
        ON outbox (next_attempt_at, position)
        WHERE published_at IS NULL
    "#,
];

/// Postgres-backed aggregate store with a transactional outbox.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    #[instrument(
        skip(self),
        fields(aggregate_type = %aggregate_type, aggregate_id = %aggregate_id),
        err
    )]
    pub async fn load_record(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT aggregate_type, aggregate_id, version, unique_key, state, updated_at
            FROM aggregates
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load", e))?;

        row.map(|r| aggregate_from_row(&r)).transpose()
    }

    /// Save one aggregate and its outbox rows in a single transaction.
    ///
    /// 1. Lock the current row (`SELECT ... FOR UPDATE`) and compare versions
    /// 2. Insert or update the aggregate row
    /// 3. Insert the outbox rows
    /// 4. Commit
    ///
    /// Dropping the transaction on any error rolls everything back.
    #[instrument(
        skip(self, record, outbox),
        fields(
            aggregate_type = %record.aggregate_type,
            aggregate_id = %record.aggregate_id,
            version = record.version,
            expected = ?expected,
            outbox_rows = outbox.len()
        ),
        err
    )]
    pub async fn save_record(
        &self,
        record: AggregateRecord,
        expected: ExpectedVersion,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current = current_version(&mut tx, &record.aggregate_type, record.aggregate_id).await?;
        if !expected.matches(current) {
            return Err(StoreError::Concurrency(format!(
                "{} {}: expected {:?}, found {:?}",
                record.aggregate_type, record.aggregate_id, expected, current
            )));
        }

        let statement = if current.is_none() {
            r#"
            INSERT INTO aggregates (aggregate_type, aggregate_id, version, unique_key, state, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#
        } else {
            r#"
            UPDATE aggregates
            SET version = $3, unique_key = $4, state = $5, updated_at = $6
            WHERE aggregate_type = $1 AND aggregate_id = $2
            "#
        };
        sqlx::query(statement)
            .bind(&record.aggregate_type)
            .bind(record.aggregate_id.as_uuid())
            .bind(record.version as i64)
            .bind(record.unique_key.as_deref())
            .bind(&record.state)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("write_aggregate", e))?;

        for message in &outbox {
            insert_outbox(&mut tx, message).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(aggregate_type = %aggregate_type), err)]
    pub async fn list_records(&self, aggregate_type: &str) -> Result<Vec<AggregateRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT aggregate_type, aggregate_id, version, unique_key, state, updated_at
            FROM aggregates
            WHERE aggregate_type = $1
            ORDER BY aggregate_id
            "#,
        )
        .bind(aggregate_type)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list", e))?;

        rows.iter().map(aggregate_from_row).collect()
    }

    #[instrument(skip(self), err)]
    pub async fn fetch_due_rows(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, topic, aggregate_type, aggregate_id, sequence_number, event_type,
                   occurred_at, payload, created_at, attempts, last_error, next_attempt_at,
                   published_at
            FROM outbox
            WHERE published_at IS NULL
              AND position < COALESCE(
                  (SELECT MIN(position) FROM outbox
                   WHERE published_at IS NULL AND next_attempt_at > $1),
                  9223372036854775807
              )
            ORDER BY position ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_due", e))?;

        rows.iter().map(outbox_from_row).collect()
    }

    #[instrument(skip(self), fields(outbox_id = %id), err)]
    pub async fn mark_row_published(
        &self,
        id: Uuid,
        published_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE outbox SET published_at = COALESCE(published_at, $2) WHERE id = $1",
        )
        .bind(id)
        .bind(published_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_published", e))?;
        Ok(())
    }

    #[instrument(skip(self, error), fields(outbox_id = %id), err)]
    pub async fn record_row_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET attempts = attempts + 1, last_error = $2, next_attempt_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_failure", e))?;
        Ok(())
    }

    pub async fn outbox_stats(&self) -> Result<OutboxStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total, COUNT(published_at) AS published
            FROM outbox
            "#,
        )
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let total: i64 = row.try_get("total").map_err(|e| decode_error("total", e))?;
        let published: i64 = row
            .try_get("published")
            .map_err(|e| decode_error("published", e))?;
        Ok(OutboxStats {
            total: total as u64,
            published: published as u64,
            pending: (total - published) as u64,
        })
    }
}

async fn current_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_type: &str,
    aggregate_id: AggregateId,
) -> Result<Option<u64>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT version
        FROM aggregates
        WHERE aggregate_type = $1 AND aggregate_id = $2
        FOR UPDATE
        "#,
    )
    .bind(aggregate_type)
    .bind(aggregate_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("current_version", e))?;

    row.map(|r| {
        r.try_get::<i64, _>("version")
            .map(|v| v as u64)
            .map_err(|e| decode_error("version", e))
    })
    .transpose()
}

async fn insert_outbox(
    tx: &mut Transaction<'_, Postgres>,
    message: &OutboxMessage,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO outbox (
            id, topic, aggregate_type, aggregate_id, sequence_number, event_type,
            occurred_at, payload
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(message.id)
    .bind(&message.topic)
    .bind(&message.aggregate_type)
    .bind(message.aggregate_id.as_uuid())
    .bind(message.sequence_number as i64)
    .bind(&message.event_type)
    .bind(message.occurred_at)
    .bind(&message.payload)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_outbox", e))?;
    Ok(())
}

fn decode_error(column: &str, err: sqlx::Error) -> StoreError {
    StoreError::Database(format!("failed to read column {column}: {err}"))
}

fn aggregate_from_row(row: &sqlx::postgres::PgRow) -> Result<AggregateRecord, StoreError> {
    let aggregate_id: Uuid = row
        .try_get("aggregate_id")
        .map_err(|e| decode_error("aggregate_id", e))?;
    let version: i64 = row.try_get("version").map_err(|e| decode_error("version", e))?;

    Ok(AggregateRecord {
        aggregate_type: row
            .try_get("aggregate_type")
            .map_err(|e| decode_error("aggregate_type", e))?,
        aggregate_id: AggregateId::from_uuid(aggregate_id),
        version: version as u64,
        unique_key: row
            .try_get("unique_key")
            .map_err(|e| decode_error("unique_key", e))?,
        state: row.try_get("state").map_err(|e| decode_error("state", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| decode_error("updated_at", e))?,
    })
}

fn outbox_from_row(row: &sqlx::postgres::PgRow) -> Result<OutboxRecord, StoreError> {
    let aggregate_id: Uuid = row
        .try_get("aggregate_id")
        .map_err(|e| decode_error("aggregate_id", e))?;
    let sequence_number: i64 = row
        .try_get("sequence_number")
        .map_err(|e| decode_error("sequence_number", e))?;
    let attempts: i32 = row.try_get("attempts").map_err(|e| decode_error("attempts", e))?;

    Ok(OutboxRecord {
        message: OutboxMessage {
            id: row.try_get("id").map_err(|e| decode_error("id", e))?,
            topic: row.try_get("topic").map_err(|e| decode_error("topic", e))?,
            aggregate_type: row
                .try_get("aggregate_type")
                .map_err(|e| decode_error("aggregate_type", e))?,
            aggregate_id: AggregateId::from_uuid(aggregate_id),
            sequence_number: sequence_number as u64,
            event_type: row
                .try_get("event_type")
                .map_err(|e| decode_error("event_type", e))?,
            occurred_at: row
                .try_get("occurred_at")
                .map_err(|e| decode_error("occurred_at", e))?,
            payload: row.try_get("payload").map_err(|e| decode_error("payload", e))?,
        },
        created_at: row
            .try_get("created_at")
            .map_err(|e| decode_error("created_at", e))?,
        attempts: attempts.max(0) as u32,
        last_error: row
            .try_get("last_error")
            .map_err(|e| decode_error("last_error", e))?,
        next_attempt_at: row
            .try_get("next_attempt_at")
            .map_err(|e| decode_error("next_attempt_at", e))?,
        published_at: row
            .try_get("published_at")
            .map_err(|e| decode_error("published_at", e))?,
    })
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match (db_err.code().as_deref(), db_err.constraint()) {
                // Unique violation
                (Some("23505"), Some(AGGREGATES_PKEY)) => StoreError::Concurrency(msg),
                (Some("23505"), Some(AGGREGATES_UNIQUE_KEY)) => StoreError::DuplicateKey(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("connection unavailable in {}: {}", operation, err))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

// The store traits are synchronous; bridge onto the runtime handle.

impl AggregateStore for PostgresStore {
    fn load(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRecord>, StoreError> {
        self.runtime
            .block_on(self.load_record(aggregate_type, aggregate_id))
    }

    fn save(
        &self,
        record: AggregateRecord,
        expected: ExpectedVersion,
        outbox: Vec<OutboxMessage>,
    ) -> Result<(), StoreError> {
        self.runtime
            .block_on(self.save_record(record, expected, outbox))
    }

    fn list(&self, aggregate_type: &str) -> Result<Vec<AggregateRecord>, StoreError> {
        self.runtime.block_on(self.list_records(aggregate_type))
    }
}

impl OutboxStore for PostgresStore {
    fn fetch_due(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxRecord>, StoreError> {
        self.runtime.block_on(self.fetch_due_rows(limit, now))
    }

    fn mark_published(&self, id: Uuid, published_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.runtime
            .block_on(self.mark_row_published(id, published_at))
    }

    fn record_failure(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.runtime
            .block_on(self.record_row_failure(id, error, next_attempt_at))
    }

    fn stats(&self) -> Result<OutboxStats, StoreError> {
        self.runtime.block_on(self.outbox_stats())
    }
}
