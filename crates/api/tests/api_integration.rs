//! Integration tests for the order intake API against a real PostgreSQL
//! container.

use std::sync::{Arc, OnceLock};

use api::routes::orders::AppState;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::Sku;
use domain::{Money, events};
use metrics_exporter_prometheus::PrometheusHandle;
use serial_test::serial;
use sqlx::PgPool;
use storage::{OutboxStatus, Product, outbox, products};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use tower::ServiceExt;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

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

async fn setup() -> (axum::Router, PgPool) {
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

    let mut conn = pool.acquire().await.unwrap();
    products::upsert(
        &mut *conn,
        &Product {
            sku: Sku::new("SKU-001"),
            name: "Widget".to_string(),
            price: Money::from_cents(1500),
            stock_qty: 10,
        },
    )
    .await
    .unwrap();

    let state = Arc::new(AppState { pool: pool.clone() });
    (api::create_app(state, get_metrics_handle()), pool)
}

fn post_order(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/orders")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
#[serial]
async fn test_health_check() {
    let (app, _pool) = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
#[serial]
async fn test_create_order_commits_order_and_outbox_row() {
    let (app, pool) = setup().await;

    let response = app
        .oneshot(post_order(serde_json::json!({
            "customer_id": "cust-1",
            "email": "jo@example.com",
            "items": [{"sku": "SKU-001", "qty": 2}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = response_json(response).await;
    assert_eq!(json["status"], "placed");
    let order_id = json["order_id"].as_str().unwrap().to_string();

    let mut conn = pool.acquire().await.unwrap();
    let rows = outbox::list_by_type(&mut *conn, events::ORDER_PLACED)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, OutboxStatus::New);
    assert_eq!(rows[0].payload["order_id"], order_id.as_str());
    assert_eq!(rows[0].payload["total_cents"], 3000);
}

#[tokio::test]
#[serial]
async fn test_unknown_product_is_rejected_without_persisting() {
    let (app, pool) = setup().await;

    let response = app
        .oneshot(post_order(serde_json::json!({
            "customer_id": "cust-1",
            "email": "jo@example.com",
            "items": [
                {"sku": "SKU-001", "qty": 1},
                {"sku": "SKU-MISSING", "qty": 1}
            ]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = response_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("SKU-MISSING"));

    let mut conn = pool.acquire().await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert_eq!(
        outbox::count_with_status(&mut *conn, OutboxStatus::New)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
#[serial]
async fn test_empty_order_is_rejected() {
    let (app, _pool) = setup().await;

    let response = app
        .oneshot(post_order(serde_json::json!({
            "customer_id": "cust-1",
            "email": "jo@example.com",
            "items": []
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn test_invalid_quantity_is_rejected() {
    let (app, _pool) = setup().await;

    let response = app
        .oneshot(post_order(serde_json::json!({
            "customer_id": "cust-1",
            "email": "jo@example.com",
            "items": [{"sku": "SKU-001", "qty": 0}]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn test_get_order_roundtrip() {
    let (app, _pool) = setup().await;

    let response = app
        .clone()
        .oneshot(post_order(serde_json::json!({
            "customer_id": "cust-1",
            "email": "jo@example.com",
            "items": [{"sku": "SKU-001", "qty": 1}]
        })))
        .await
        .unwrap();
    let created = response_json(response).await;
    let order_id = created["order_id"].as_str().unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/orders/{order_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["order_id"], order_id);
    assert_eq!(json["status"], "placed");
    assert_eq!(json["total_cents"], 1500);
}

#[tokio::test]
#[serial]
async fn test_get_unknown_order_is_not_found() {
    let (app, _pool) = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/orders/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
