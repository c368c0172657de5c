//! Order intake and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::OrderId;
use domain::{LineItem, Money, OrderStatus};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use storage::orders::{NewOrder, PricedItem};
use storage::{orders, products};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub pool: PgPool,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: String,
    pub email: String,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub sku: String,
    pub qty: i32,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: String,
    pub status: String,
}

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub customer_id: String,
    pub email: String,
    pub status: String,
    pub total_cents: i64,
}

// -- Handlers --

/// POST /orders — validate, price, and atomically commit a new order with
/// its `order.placed` outbox row.
#[tracing::instrument(skip(state, req))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    if req.items.is_empty() {
        return Err(ApiError::BadRequest("order has no items".to_string()));
    }
    if !req.email.contains('@') {
        return Err(ApiError::BadRequest(format!(
            "invalid email address: {}",
            req.email
        )));
    }

    // Validation and pricing run in the same transaction as the insert, so a
    // product that vanishes mid-request cannot produce a half-priced order.
    let mut tx = state.pool.begin().await?;

    let mut priced = Vec::with_capacity(req.items.len());
    let mut total = Money::zero();
    for item in &req.items {
        let line = LineItem::new(item.sku.as_str(), item.qty)
            .map_err(|err| ApiError::BadRequest(err.to_string()))?;
        let unit_price = products::price(&mut *tx, &line.sku)
            .await?
            .ok_or_else(|| ApiError::BadRequest(format!("Product {} not found", item.sku)))?;
        total = total.add(unit_price.times(line.qty as i64));
        priced.push(PricedItem {
            sku: line.sku,
            qty: line.qty,
            unit_price,
        });
    }

    let order = NewOrder {
        id: OrderId::new(),
        customer_id: req.customer_id,
        email: req.email,
        items: priced,
        total,
    };
    orders::create_with_outbox(&mut *tx, &order).await?;
    tx.commit().await?;

    metrics::counter!("orders_created_total").increment(1);
    tracing::info!(order_id = %order.id, total_cents = total.cents(), "order placed");

    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            order_id: order.id.to_string(),
            status: OrderStatus::Placed.as_str().to_string(),
        }),
    ))
}

/// GET /orders/:id — load an order by ID.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|err| ApiError::BadRequest(format!("invalid order id: {err}")))?;

    let mut conn = state.pool.acquire().await?;
    let order = orders::fetch(&mut *conn, OrderId::from_uuid(uuid))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse {
        order_id: order.id.to_string(),
        customer_id: order.customer_id,
        email: order.email,
        status: order.status.as_str().to_string(),
        total_cents: order.total.cents(),
    }))
}
