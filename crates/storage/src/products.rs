//! Product repository.
//!
//! Stock is the one hot shared mutable resource in the system; every
//! reservation serializes on the product row lock taken by [`lock_stock`].

use common::Sku;
use domain::Money;
use sqlx::{PgConnection, Row};

use crate::error::Result;

/// A product row.
#[derive(Debug, Clone)]
pub struct Product {
    pub sku: Sku,
    pub name: String,
    pub price: Money,
    pub stock_qty: i32,
}

/// Inserts or replaces a product (seed data and tests).
pub async fn upsert(conn: &mut PgConnection, product: &Product) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO products (sku, name, price_cents, stock_qty)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (sku) DO UPDATE SET
            name = EXCLUDED.name,
            price_cents = EXCLUDED.price_cents,
            stock_qty = EXCLUDED.stock_qty
        "#,
    )
    .bind(product.sku.as_str())
    .bind(&product.name)
    .bind(product.price.cents())
    .bind(product.stock_qty)
    .execute(conn)
    .await?;

    Ok(())
}

/// Looks up a product's unit price.
pub async fn price(conn: &mut PgConnection, sku: &Sku) -> Result<Option<Money>> {
    let cents: Option<i64> = sqlx::query_scalar("SELECT price_cents FROM products WHERE sku = $1")
        .bind(sku.as_str())
        .fetch_optional(conn)
        .await?;

    Ok(cents.map(Money::from_cents))
}

/// Takes the pessimistic row lock on a product and returns its stock.
///
/// The lock is held until the enclosing transaction ends, serializing
/// concurrent reservations against the same sku. Returns `None` for an
/// unknown sku (no row to lock).
pub async fn lock_stock(conn: &mut PgConnection, sku: &Sku) -> Result<Option<i32>> {
    let row = sqlx::query("SELECT stock_qty FROM products WHERE sku = $1 FOR UPDATE")
        .bind(sku.as_str())
        .fetch_optional(conn)
        .await?;

    Ok(row.map(|row| row.try_get("stock_qty")).transpose()?)
}

/// Decrements a product's stock. Callers must hold the row lock and have
/// verified sufficiency.
pub async fn decrement_stock(conn: &mut PgConnection, sku: &Sku, qty: i32) -> Result<()> {
    sqlx::query("UPDATE products SET stock_qty = stock_qty - $2 WHERE sku = $1")
        .bind(sku.as_str())
        .bind(qty)
        .execute(conn)
        .await?;

    Ok(())
}

/// Reads current stock without locking.
pub async fn stock(conn: &mut PgConnection, sku: &Sku) -> Result<Option<i32>> {
    let qty: Option<i32> = sqlx::query_scalar("SELECT stock_qty FROM products WHERE sku = $1")
        .bind(sku.as_str())
        .fetch_optional(conn)
        .await?;

    Ok(qty)
}
