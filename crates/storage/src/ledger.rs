//! Idempotency ledger.
//!
//! A durable set of (service, domain event id) pairs recording "this service
//! has already applied this event". The marker is inserted in the same
//! transaction as the handler's business mutation, so a redelivered message
//! either sees the marker (and no-ops) or re-runs a handler whose previous
//! attempt left no trace.

use common::OrderId;
use sqlx::PgConnection;

use crate::error::Result;

/// Returns true if `service` has already applied the event correlated by
/// `event_id`.
pub async fn is_processed(
    conn: &mut PgConnection,
    service: &str,
    event_id: OrderId,
) -> Result<bool> {
    let row: Option<i32> = sqlx::query_scalar(
        "SELECT 1 FROM processed_events WHERE service_name = $1 AND event_id = $2",
    )
    .bind(service)
    .bind(event_id.as_uuid())
    .fetch_optional(conn)
    .await?;

    Ok(row.is_some())
}

/// Records that `service` has applied the event correlated by `event_id`.
///
/// Idempotent: a duplicate marker is a no-op, so the composite primary key
/// enforces at-most-once effect even if two deliveries race past the
/// `is_processed` check.
pub async fn mark_processed(
    conn: &mut PgConnection,
    service: &str,
    event_id: OrderId,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO processed_events (service_name, event_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(service)
    .bind(event_id.as_uuid())
    .execute(conn)
    .await?;

    Ok(())
}
