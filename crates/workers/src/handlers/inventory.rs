//! Stock reservation handler.

use async_trait::async_trait;
use broker::QueueBinding;
use domain::{DomainEvent, InventoryReserved, OrderOutOfStock, OrderPlaced, OrderStatus, events};
use sqlx::PgConnection;
use storage::{orders, outbox, products};

use crate::runtime::{EventHandler, HandlerError};

/// Ledger identity of the inventory service.
pub const SERVICE_NAME: &str = "inventory-service";

const BINDINGS: &[QueueBinding] = &[QueueBinding {
    queue: "q.inventory.order-placed",
    event_type: events::ORDER_PLACED,
}];

/// Reserves stock for placed orders.
///
/// All-or-nothing: every line item is checked under its row lock before any
/// decrement, so a shortage on the last item leaves the first untouched. The
/// row locks serialize concurrent reservations against the same sku for the
/// life of the runtime's transaction.
pub struct InventoryHandler;

impl InventoryHandler {
    async fn reject_out_of_stock(
        &self,
        conn: &mut PgConnection,
        placed: &OrderPlaced,
    ) -> Result<(), HandlerError> {
        orders::set_status(conn, placed.order_id, OrderStatus::OutOfStock).await?;
        outbox::insert(
            conn,
            &DomainEvent::OrderOutOfStock(OrderOutOfStock {
                order_id: placed.order_id,
                reason: "insufficient_stock".to_string(),
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for InventoryHandler {
    fn service_name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn bindings(&self) -> &'static [QueueBinding] {
        BINDINGS
    }

    async fn handle(
        &self,
        conn: &mut PgConnection,
        event: &DomainEvent,
    ) -> Result<(), HandlerError> {
        let DomainEvent::OrderPlaced(placed) = event else {
            return Err(HandlerError::Permanent(format!(
                "unexpected event type {}",
                event.event_type()
            )));
        };

        let order = orders::fetch(conn, placed.order_id)
            .await?
            .ok_or_else(|| HandlerError::Permanent(format!("order {} not found", placed.order_id)))?;
        order
            .status
            .transition(OrderStatus::Reserved)
            .map_err(|err| HandlerError::Permanent(err.to_string()))?;

        // Lock-then-check each item; the first shortage aborts the whole
        // reservation before anything was decremented.
        for item in &placed.items {
            let stock = products::lock_stock(conn, &item.sku).await?.unwrap_or(0);
            if stock < item.qty {
                tracing::info!(
                    order_id = %placed.order_id,
                    sku = %item.sku,
                    have = stock,
                    need = item.qty,
                    "out of stock"
                );
                return self.reject_out_of_stock(conn, placed).await;
            }
        }

        for item in &placed.items {
            products::decrement_stock(conn, &item.sku, item.qty).await?;
        }

        orders::set_status(conn, placed.order_id, OrderStatus::Reserved).await?;
        outbox::insert(
            conn,
            &DomainEvent::InventoryReserved(InventoryReserved {
                order_id: placed.order_id,
            }),
        )
        .await?;

        tracing::info!(order_id = %placed.order_id, "reserved");
        Ok(())
    }
}
