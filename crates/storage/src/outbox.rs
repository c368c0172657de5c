//! Transactional outbox store.
//!
//! Rows are appended by producing transactions (alongside the business
//! mutation they announce) and mutated only by the relay. The table is
//! append-only from the producers' point of view: the relay flips status and
//! stamps timestamps but never deletes, leaving an audit trail.

use chrono::{DateTime, Utc};
use domain::DomainEvent;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use uuid::Uuid;

use crate::error::{Result, StorageError};

/// Publication status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Awaiting publication; the only status the relay claims.
    New,
    /// Delivered to the broker exactly once by a committed relay batch.
    Published,
    /// Publish attempts exhausted; requires operator intervention.
    Failed,
}

impl OutboxStatus {
    /// Returns the status as persisted in the `event_outbox` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::New => "NEW",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    /// Parses a persisted status string.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "NEW" => Ok(OutboxStatus::New),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(StorageError::Decode(format!(
                "unknown outbox status: {other}"
            ))),
        }
    }
}

/// A full outbox row, as read back for inspection and tests.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: i64,
    pub event_type: String,
    pub event_id: Uuid,
    pub payload: serde_json::Value,
    pub version: i32,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub occurred_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// The slice of a row the relay needs to publish it.
#[derive(Debug, Clone)]
pub struct ClaimedEvent {
    pub id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
}

fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
    Ok(OutboxEvent {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        event_id: row.try_get("event_id")?,
        payload: row.try_get("payload")?,
        version: row.try_get("version")?,
        status: OutboxStatus::parse(row.try_get::<String, _>("status")?.as_str())?,
        attempts: row.try_get("attempts")?,
        occurred_at: row.try_get("occurred_at")?,
        published_at: row.try_get("published_at")?,
    })
}

/// Appends a `NEW` outbox row for `event` inside the caller's transaction.
///
/// Returns the assigned row id. Committing the enclosing transaction is what
/// makes the event eligible for relay pickup; a rollback discards it together
/// with the business mutation it would have announced.
pub async fn insert(conn: &mut PgConnection, event: &DomainEvent) -> Result<i64> {
    let payload = event.to_payload()?;
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO event_outbox (event_type, event_id, payload, version)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(event.event_type())
    .bind(Uuid::new_v4())
    .bind(&payload)
    .bind(event.schema_version())
    .fetch_one(conn)
    .await?;

    Ok(id)
}

/// Claims up to `limit` pending rows, oldest first.
///
/// The locking read skips rows already locked by a concurrent claimer, so
/// relay replicas polling simultaneously receive disjoint batches without
/// blocking on each other. Claimed rows stay exclusively owned until the
/// enclosing transaction commits or aborts; an abort reverts them to
/// claimable `NEW`.
pub async fn claim_batch(conn: &mut PgConnection, limit: i64) -> Result<Vec<ClaimedEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT id, event_type, payload, attempts
        FROM event_outbox
        WHERE status = 'NEW'
        ORDER BY id ASC
        FOR UPDATE SKIP LOCKED
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(conn)
    .await?;

    rows.into_iter()
        .map(|row| {
            Ok(ClaimedEvent {
                id: row.try_get("id")?,
                event_type: row.try_get("event_type")?,
                payload: row.try_get("payload")?,
                attempts: row.try_get("attempts")?,
            })
        })
        .collect()
}

/// Marks a claimed row delivered, stamping `published_at`.
pub async fn mark_published(conn: &mut PgConnection, id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE event_outbox
        SET status = 'PUBLISHED', published_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(conn)
    .await?;

    Ok(())
}

/// Records a failed publish attempt for a claimed row.
///
/// The row stays `NEW` so the next poll cycle retries it; once the attempt
/// count reaches `max_attempts` it moves to terminal `FAILED` instead of
/// retrying forever. Returns the resulting status.
pub async fn record_publish_failure(
    conn: &mut PgConnection,
    id: i64,
    max_attempts: i32,
) -> Result<OutboxStatus> {
    let status: String = sqlx::query_scalar(
        r#"
        UPDATE event_outbox
        SET attempts = attempts + 1,
            status = CASE WHEN attempts + 1 >= $2 THEN 'FAILED' ELSE 'NEW' END
        WHERE id = $1
        RETURNING status
        "#,
    )
    .bind(id)
    .bind(max_attempts)
    .fetch_one(conn)
    .await?;

    OutboxStatus::parse(&status)
}

/// Reads one outbox row back.
pub async fn fetch(conn: &mut PgConnection, id: i64) -> Result<Option<OutboxEvent>> {
    let row = sqlx::query(
        r#"
        SELECT id, event_type, event_id, payload, version, status, attempts,
               occurred_at, published_at
        FROM event_outbox
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(row_to_event).transpose()
}

/// Lists rows of one event type, oldest first.
pub async fn list_by_type(conn: &mut PgConnection, event_type: &str) -> Result<Vec<OutboxEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT id, event_type, event_id, payload, version, status, attempts,
               occurred_at, published_at
        FROM event_outbox
        WHERE event_type = $1
        ORDER BY id ASC
        "#,
    )
    .bind(event_type)
    .fetch_all(conn)
    .await?;

    rows.into_iter().map(row_to_event).collect()
}

/// Counts rows currently in `status`.
pub async fn count_with_status(conn: &mut PgConnection, status: OutboxStatus) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_outbox WHERE status = $1")
        .bind(status.as_str())
        .fetch_one(conn)
        .await?;

    Ok(count)
}
