//! Integration tests for the idempotent consumer runtime and the domain
//! handlers, against a real PostgreSQL container.
//!
//! Deliveries are fed to `process_delivery` directly — the broker is not
//! involved, so these tests exercise exactly the transactional semantics:
//! dedup, atomic reservation, locking, and the outcome mapping.

use std::sync::Arc;

use common::{OrderId, Sku};
use domain::{
    DomainEvent, InventoryReserved, LineItem, Money, OrderPlaced, OrderStatus, PaymentCompleted,
    events,
};
use serial_test::serial;
use sqlx::PgPool;
use storage::orders::{NewOrder, PricedItem};
use storage::{Product, ledger, orders, outbox, products};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use workers::handlers::{
    FixedGateway, InventoryHandler, NotificationHandler, PaymentHandler, RecordingNotifier,
    notification, payment,
};
use workers::{Outcome, process_delivery};

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_init.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE event_outbox, processed_events, order_items, orders, products")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

async fn seed_product(pool: &PgPool, sku: &str, stock_qty: i32) {
    let mut conn = pool.acquire().await.unwrap();
    products::upsert(
        &mut *conn,
        &Product {
            sku: Sku::new(sku),
            name: format!("Product {sku}"),
            price: Money::from_cents(1000),
            stock_qty,
        },
    )
    .await
    .unwrap();
}

/// Inserts an order row in `placed` status and returns its id.
async fn create_order(pool: &PgPool) -> OrderId {
    let order = NewOrder {
        id: OrderId::new(),
        customer_id: "cust-1".to_string(),
        email: "jo@example.com".to_string(),
        items: Vec::<PricedItem>::new(),
        total: Money::from_cents(2000),
    };
    let mut tx = pool.begin().await.unwrap();
    orders::create_with_outbox(&mut *tx, &order).await.unwrap();
    tx.commit().await.unwrap();
    order.id
}

fn body_of(event: &DomainEvent) -> Vec<u8> {
    serde_json::to_vec(&event.to_payload().unwrap()).unwrap()
}

fn order_placed_body(order_id: OrderId, items: &[(&str, i32)]) -> Vec<u8> {
    body_of(&DomainEvent::OrderPlaced(OrderPlaced {
        order_id,
        customer_id: "cust-1".to_string(),
        email: "jo@example.com".to_string(),
        items: items
            .iter()
            .map(|(sku, qty)| LineItem::new(*sku, *qty).unwrap())
            .collect(),
        total_cents: Money::from_cents(2000),
    }))
}

fn inventory_reserved_body(order_id: OrderId) -> Vec<u8> {
    body_of(&DomainEvent::InventoryReserved(InventoryReserved {
        order_id,
    }))
}

async fn order_status(pool: &PgPool, id: OrderId) -> OrderStatus {
    let mut conn = pool.acquire().await.unwrap();
    orders::fetch(&mut *conn, id).await.unwrap().unwrap().status
}

async fn stock_of(pool: &PgPool, sku: &str) -> i32 {
    let mut conn = pool.acquire().await.unwrap();
    products::stock(&mut *conn, &Sku::new(sku))
        .await
        .unwrap()
        .unwrap()
}

async fn outbox_count(pool: &PgPool, event_type: &str) -> usize {
    let mut conn = pool.acquire().await.unwrap();
    outbox::list_by_type(&mut *conn, event_type).await.unwrap().len()
}

#[tokio::test]
#[serial]
async fn reservation_decrements_stock_and_reserves_order() {
    let pool = get_test_pool().await;
    seed_product(&pool, "SKU-A", 5).await;
    let order_id = create_order(&pool).await;

    let outcome = process_delivery(
        &pool,
        &InventoryHandler,
        events::ORDER_PLACED,
        &order_placed_body(order_id, &[("SKU-A", 2)]),
    )
    .await;

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(stock_of(&pool, "SKU-A").await, 3);
    assert_eq!(order_status(&pool, order_id).await, OrderStatus::Reserved);
    assert_eq!(outbox_count(&pool, events::INVENTORY_RESERVED).await, 1);
}

#[tokio::test]
#[serial]
async fn duplicate_delivery_applies_the_effect_once() {
    let pool = get_test_pool().await;
    seed_product(&pool, "SKU-A", 5).await;
    let order_id = create_order(&pool).await;
    let body = order_placed_body(order_id, &[("SKU-A", 2)]);

    let first = process_delivery(&pool, &InventoryHandler, events::ORDER_PLACED, &body).await;
    let second = process_delivery(&pool, &InventoryHandler, events::ORDER_PLACED, &body).await;

    assert_eq!(first, Outcome::Applied);
    assert_eq!(second, Outcome::Duplicate);
    assert_eq!(stock_of(&pool, "SKU-A").await, 3);
    assert_eq!(outbox_count(&pool, events::INVENTORY_RESERVED).await, 1);
}

#[tokio::test]
#[serial]
async fn reservation_is_all_or_nothing() {
    let pool = get_test_pool().await;
    seed_product(&pool, "SKU-A", 5).await;
    seed_product(&pool, "SKU-B", 1).await;
    let order_id = create_order(&pool).await;

    let outcome = process_delivery(
        &pool,
        &InventoryHandler,
        events::ORDER_PLACED,
        &order_placed_body(order_id, &[("SKU-A", 3), ("SKU-B", 2)]),
    )
    .await;

    // Insufficient B must leave A untouched: no partial decrement.
    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(stock_of(&pool, "SKU-A").await, 5);
    assert_eq!(stock_of(&pool, "SKU-B").await, 1);
    assert_eq!(order_status(&pool, order_id).await, OrderStatus::OutOfStock);
    assert_eq!(outbox_count(&pool, events::ORDER_OUT_OF_STOCK).await, 1);
    assert_eq!(outbox_count(&pool, events::INVENTORY_RESERVED).await, 0);
}

#[tokio::test]
#[serial]
async fn unknown_sku_counts_as_out_of_stock() {
    let pool = get_test_pool().await;
    let order_id = create_order(&pool).await;

    let outcome = process_delivery(
        &pool,
        &InventoryHandler,
        events::ORDER_PLACED,
        &order_placed_body(order_id, &[("SKU-MISSING", 1)]),
    )
    .await;

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(order_status(&pool, order_id).await, OrderStatus::OutOfStock);
}

#[tokio::test]
#[serial]
async fn concurrent_reservations_never_oversell() {
    let pool = get_test_pool().await;
    seed_product(&pool, "SKU-HOT", 1).await;
    let first_order = create_order(&pool).await;
    let second_order = create_order(&pool).await;

    let body1 = order_placed_body(first_order, &[("SKU-HOT", 1)]);
    let body2 = order_placed_body(second_order, &[("SKU-HOT", 1)]);

    let (o1, o2) = tokio::join!(
        process_delivery(&pool, &InventoryHandler, events::ORDER_PLACED, &body1),
        process_delivery(&pool, &InventoryHandler, events::ORDER_PLACED, &body2),
    );

    assert_eq!(o1, Outcome::Applied);
    assert_eq!(o2, Outcome::Applied);
    assert_eq!(stock_of(&pool, "SKU-HOT").await, 0);

    // Exactly one reservation wins; the row lock prevents both from reading
    // the same pre-decrement stock.
    let statuses = [
        order_status(&pool, first_order).await,
        order_status(&pool, second_order).await,
    ];
    let reserved = statuses
        .iter()
        .filter(|s| **s == OrderStatus::Reserved)
        .count();
    let out_of_stock = statuses
        .iter()
        .filter(|s| **s == OrderStatus::OutOfStock)
        .count();
    assert_eq!(reserved, 1);
    assert_eq!(out_of_stock, 1);
    assert_eq!(outbox_count(&pool, events::INVENTORY_RESERVED).await, 1);
}

#[tokio::test]
#[serial]
async fn approved_payment_marks_order_paid() {
    let pool = get_test_pool().await;
    seed_product(&pool, "SKU-A", 5).await;
    let order_id = create_order(&pool).await;
    process_delivery(
        &pool,
        &InventoryHandler,
        events::ORDER_PLACED,
        &order_placed_body(order_id, &[("SKU-A", 1)]),
    )
    .await;

    let handler = PaymentHandler::new(Box::new(FixedGateway::approving()));
    let outcome = process_delivery(
        &pool,
        &handler,
        events::INVENTORY_RESERVED,
        &inventory_reserved_body(order_id),
    )
    .await;

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(order_status(&pool, order_id).await, OrderStatus::Paid);
    assert_eq!(outbox_count(&pool, events::PAYMENT_COMPLETED).await, 1);
}

#[tokio::test]
#[serial]
async fn declined_payment_marks_order_failed_with_reason() {
    let pool = get_test_pool().await;
    seed_product(&pool, "SKU-A", 5).await;
    let order_id = create_order(&pool).await;
    process_delivery(
        &pool,
        &InventoryHandler,
        events::ORDER_PLACED,
        &order_placed_body(order_id, &[("SKU-A", 1)]),
    )
    .await;

    let handler = PaymentHandler::new(Box::new(FixedGateway::declining("card_declined")));
    let outcome = process_delivery(
        &pool,
        &handler,
        events::INVENTORY_RESERVED,
        &inventory_reserved_body(order_id),
    )
    .await;

    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(
        order_status(&pool, order_id).await,
        OrderStatus::PaymentFailed
    );

    let mut conn = pool.acquire().await.unwrap();
    let rows = outbox::list_by_type(&mut *conn, events::PAYMENT_FAILED)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload["reason"], "card_declined");
}

#[tokio::test]
#[serial]
async fn payment_requires_a_reserved_order() {
    let pool = get_test_pool().await;
    let order_id = create_order(&pool).await;

    // The order is still `placed`: charging it would skip the reservation
    // step, so the handler rejects permanently and leaves no trace.
    let handler = PaymentHandler::new(Box::new(FixedGateway::approving()));
    let outcome = process_delivery(
        &pool,
        &handler,
        events::INVENTORY_RESERVED,
        &inventory_reserved_body(order_id),
    )
    .await;

    assert_eq!(outcome, Outcome::RejectedPermanent);
    assert_eq!(order_status(&pool, order_id).await, OrderStatus::Placed);
    assert_eq!(outbox_count(&pool, events::PAYMENT_COMPLETED).await, 0);

    let mut conn = pool.acquire().await.unwrap();
    assert!(
        !ledger::is_processed(&mut *conn, payment::SERVICE_NAME, order_id)
            .await
            .unwrap()
    );
}

#[tokio::test]
#[serial]
async fn terminal_order_is_untouched_by_redelivery() {
    let pool = get_test_pool().await;
    seed_product(&pool, "SKU-A", 5).await;
    let order_id = create_order(&pool).await;
    let placed_body = order_placed_body(order_id, &[("SKU-A", 1)]);
    let reserved_body = inventory_reserved_body(order_id);

    process_delivery(&pool, &InventoryHandler, events::ORDER_PLACED, &placed_body).await;
    let payment_handler = PaymentHandler::new(Box::new(FixedGateway::approving()));
    process_delivery(
        &pool,
        &payment_handler,
        events::INVENTORY_RESERVED,
        &reserved_body,
    )
    .await;
    assert_eq!(order_status(&pool, order_id).await, OrderStatus::Paid);

    // Redeliveries of either upstream event short-circuit on the ledger.
    let outcome = process_delivery(
        &pool,
        &payment_handler,
        events::INVENTORY_RESERVED,
        &reserved_body,
    )
    .await;
    assert_eq!(outcome, Outcome::Duplicate);
    let outcome =
        process_delivery(&pool, &InventoryHandler, events::ORDER_PLACED, &placed_body).await;
    assert_eq!(outcome, Outcome::Duplicate);

    assert_eq!(order_status(&pool, order_id).await, OrderStatus::Paid);
    assert_eq!(stock_of(&pool, "SKU-A").await, 4);
}

#[tokio::test]
#[serial]
async fn notification_emails_the_order_contact_once() {
    let pool = get_test_pool().await;
    let order_id = create_order(&pool).await;
    let body = body_of(&DomainEvent::PaymentCompleted(PaymentCompleted {
        order_id,
    }));

    let notifier = RecordingNotifier::new();
    let handler = NotificationHandler::new(Box::new(notifier.clone()));

    let first = process_delivery(&pool, &handler, events::PAYMENT_COMPLETED, &body).await;
    let second = process_delivery(&pool, &handler, events::PAYMENT_COMPLETED, &body).await;

    assert_eq!(first, Outcome::Applied);
    assert_eq!(second, Outcome::Duplicate);

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "jo@example.com");
    assert_eq!(sent[0].subject, "Order Paid");

    let mut conn = pool.acquire().await.unwrap();
    assert!(
        ledger::is_processed(&mut *conn, notification::SERVICE_NAME, order_id)
            .await
            .unwrap()
    );
    // The notification handler is a leaf: no new outbox rows.
    assert_eq!(outbox_count(&pool, events::PAYMENT_COMPLETED).await, 0);
}

#[tokio::test]
#[serial]
async fn notifier_outage_rolls_back_and_retries_cleanly() {
    let pool = get_test_pool().await;
    let order_id = create_order(&pool).await;
    let body = body_of(&DomainEvent::PaymentCompleted(PaymentCompleted {
        order_id,
    }));

    let notifier = RecordingNotifier::new();
    notifier.set_fail_on_notify(true);
    let handler = NotificationHandler::new(Box::new(notifier.clone()));

    let outcome = process_delivery(&pool, &handler, events::PAYMENT_COMPLETED, &body).await;
    assert_eq!(outcome, Outcome::RejectedRetryable);
    assert!(notifier.sent().is_empty());

    let mut conn = pool.acquire().await.unwrap();
    assert!(
        !ledger::is_processed(&mut *conn, notification::SERVICE_NAME, order_id)
            .await
            .unwrap()
    );

    // The redelivery succeeds once the collaborator recovers.
    notifier.set_fail_on_notify(false);
    let outcome = process_delivery(&pool, &handler, events::PAYMENT_COMPLETED, &body).await;
    assert_eq!(outcome, Outcome::Applied);
    assert_eq!(notifier.sent().len(), 1);
}

#[tokio::test]
#[serial]
async fn malformed_payload_is_rejected_permanently() {
    let pool = get_test_pool().await;

    let outcome = process_delivery(
        &pool,
        &InventoryHandler,
        events::ORDER_PLACED,
        br#"{"not": "an order"}"#,
    )
    .await;
    assert_eq!(outcome, Outcome::RejectedPermanent);
}

#[tokio::test]
#[serial]
async fn unknown_event_type_is_rejected_permanently() {
    let pool = get_test_pool().await;

    let outcome = process_delivery(&pool, &InventoryHandler, "order.shipped", b"{}").await;
    assert_eq!(outcome, Outcome::RejectedPermanent);
}

#[tokio::test]
#[serial]
async fn handler_bindings_cover_the_choreography() {
    assert_eq!(
        workers::EventHandler::bindings(&InventoryHandler)[0].event_type,
        events::ORDER_PLACED
    );

    let payment_handler = PaymentHandler::new(Box::new(FixedGateway::approving()));
    assert_eq!(
        workers::EventHandler::bindings(&payment_handler)[0].event_type,
        events::INVENTORY_RESERVED
    );

    let notification_handler = NotificationHandler::new(Box::new(RecordingNotifier::new()));
    let bound: Vec<&str> = workers::EventHandler::bindings(&notification_handler)
        .iter()
        .map(|b| b.event_type)
        .collect();
    assert_eq!(
        bound,
        vec![
            events::PAYMENT_COMPLETED,
            events::PAYMENT_FAILED,
            events::ORDER_OUT_OF_STOCK
        ]
    );
}
