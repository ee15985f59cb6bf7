mod common;

use common::{fixture, Fixture};
use ledger_service::api::{create_router, AppState};
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(f: &Fixture) -> Self {
        let app = create_router(AppState { service: f.service.clone() });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { base_url: format!("http://{}", addr), client: reqwest::Client::new(), handle }
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(format!("{}{}", self.base_url, path)).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let res = req.send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_check_responds() {
    let f = fixture();
    let srv = TestServer::spawn(&f).await;
    let res = srv.client.get(format!("{}/health", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn adjust_and_read_back_level() {
    let f = fixture();
    let srv = TestServer::spawn(&f).await;

    let (status, body) = srv
        .post(
            "/inventory/adjust",
            Some(json!({
                "item_id": f.item_a.id,
                "warehouse_id": f.warehouse.id,
                "quantity": 12,
                "reason": "receiving",
                "reference": "PO-9",
                "user_id": "clerk"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["available"], 12);

    let (status, body) = srv.get(&format!("/inventory/levels/{}/{}", f.item_a.id, f.warehouse.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["quantity"], 12);

    let (status, body) = srv.get(&format!("/inventory/levels?warehouse_id={}", f.warehouse.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let (status, body) = srv.get("/inventory/transactions?type=add&page_size=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["page_size"], 10);
    assert_eq!(body["transactions"][0]["type"], "add");
    assert_eq!(body["transactions"][0]["user_id"], "clerk");
}

#[tokio::test]
async fn business_errors_map_to_status_codes() {
    let f = fixture();
    f.stock(&f.item_a, 2).await;
    let srv = TestServer::spawn(&f).await;

    let (status, body) = srv
        .post(
            "/inventory/allocate",
            Some(json!({
                "item_id": f.item_a.id,
                "warehouse_id": f.warehouse.id,
                "quantity": 3,
                "order_id": "order-1"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    let (status, _) = srv
        .post(
            "/inventory/adjust",
            Some(json!({
                "item_id": uuid::Uuid::new_v4(),
                "warehouse_id": f.warehouse.id,
                "quantity": 1
            })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = srv
        .post("/inventory/release", Some(json!({ "order_id": "nobody", "reason": "test" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = srv.get("/reservations/nobody").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = srv
        .post(
            "/reservations",
            Some(json!({ "order_id": "", "warehouse_id": f.warehouse.id, "items": [] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reservation_lifecycle_over_http() {
    let f = fixture();
    f.stock(&f.item_a, 10).await;
    let srv = TestServer::spawn(&f).await;

    let (status, body) = srv
        .post(
            "/reservations",
            Some(json!({
                "order_id": "web-1",
                "warehouse_id": f.warehouse.id,
                "items": [{ "sku": "SKU-A", "quantity": 4 }]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["reservation_id"], "web-1");

    let (status, body) = srv.get("/reservations/web-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["status"], "pending");

    let (status, body) = srv.post("/reservations/web-1/commit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // already settled: still 200, reported in the body
    let (status, body) = srv
        .post("/reservations/web-1/release", Some(json!({ "reason": "late cancel" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);

    let (_, body) = srv.get(&format!("/inventory/levels/{}/{}", f.item_a.id, f.warehouse.id)).await;
    assert_eq!(body["quantity"], 6);
    assert_eq!(body["reserved"], 0);
}

#[tokio::test]
async fn cancel_without_body_succeeds() {
    let f = fixture();
    f.stock(&f.item_b, 1).await;
    let srv = TestServer::spawn(&f).await;

    srv.post(
        "/reservations",
        Some(json!({
            "order_id": "web-2",
            "warehouse_id": f.warehouse.id,
            "items": [{ "product_id": f.item_b.id.to_string(), "quantity": 1 }]
        })),
    )
    .await;

    let (status, body) = srv.post("/reservations/web-2/cancel", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (_, body) = srv.get("/reservations/web-2").await;
    assert_eq!(body[0]["status"], "cancelled");
}
