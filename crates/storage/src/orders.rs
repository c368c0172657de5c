//! Order repository.

use common::{OrderId, Sku};
use domain::{DomainEvent, LineItem, Money, Order, OrderPlaced, OrderStatus};
use sqlx::{PgConnection, Row};

use crate::error::{Result, StorageError};
use crate::outbox;

/// A priced line item as captured at intake.
#[derive(Debug, Clone)]
pub struct PricedItem {
    pub sku: Sku,
    pub qty: i32,
    pub unit_price: Money,
}

/// A validated order ready for the intake commit.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub customer_id: String,
    pub email: String,
    pub items: Vec<PricedItem>,
    pub total: Money,
}

/// Inserts the order, its line items, and the `order.placed` outbox row
/// inside the caller's transaction — the atomic intake commit that makes the
/// outbox pattern work: either the order exists and its announcement is
/// pending, or neither does.
pub async fn create_with_outbox(conn: &mut PgConnection, order: &NewOrder) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO orders (id, customer_id, email, status, total_cents)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(order.id.as_uuid())
    .bind(&order.customer_id)
    .bind(&order.email)
    .bind(OrderStatus::Placed.as_str())
    .bind(order.total.cents())
    .execute(&mut *conn)
    .await?;

    for item in &order.items {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, sku, qty, unit_price_cents)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(item.sku.as_str())
        .bind(item.qty)
        .bind(item.unit_price.cents())
        .execute(&mut *conn)
        .await?;
    }

    let event = DomainEvent::OrderPlaced(OrderPlaced {
        order_id: order.id,
        customer_id: order.customer_id.clone(),
        email: order.email.clone(),
        items: order
            .items
            .iter()
            .map(|item| LineItem {
                sku: item.sku.clone(),
                qty: item.qty,
            })
            .collect(),
        total_cents: order.total,
    });
    outbox::insert(conn, &event).await?;

    Ok(())
}

/// Loads an order by id.
pub async fn fetch(conn: &mut PgConnection, id: OrderId) -> Result<Option<Order>> {
    let row = sqlx::query(
        r#"
        SELECT id, customer_id, email, status, total_cents
        FROM orders
        WHERE id = $1
        "#,
    )
    .bind(id.as_uuid())
    .fetch_optional(conn)
    .await?;

    row.map(|row| {
        let status = OrderStatus::parse(row.try_get::<String, _>("status")?.as_str())
            .map_err(|err| StorageError::Decode(err.to_string()))?;
        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id")?),
            customer_id: row.try_get("customer_id")?,
            email: row.try_get("email")?,
            status,
            total: Money::from_cents(row.try_get("total_cents")?),
        })
    })
    .transpose()
}

/// Writes the order's status. Returns false if no such order exists.
pub async fn set_status(conn: &mut PgConnection, id: OrderId, status: OrderStatus) -> Result<bool> {
    let result = sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
        .bind(id.as_uuid())
        .bind(status.as_str())
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}
