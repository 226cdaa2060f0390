use std::sync::Arc;

use forgerev_core::{TenantId, UserId};
use forgerev_infra::{EngineConfig, RevenueEngine};
use reqwest::StatusCode;
use serde_json::{json, Value};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port.
        let engine = Arc::new(RevenueEngine::in_memory(EngineConfig::default()));
        let app = forgerev_api::app::build_app(engine).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Client {
    http: reqwest::Client,
    base_url: String,
    tenant: TenantId,
}

impl Client {
    fn new(srv: &TestServer, tenant: TenantId) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: srv.base_url.clone(),
            tenant,
        }
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("x-tenant-id", self.tenant.to_string())
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("x-tenant-id", self.tenant.to_string())
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }
}

/// Twelve open monthly periods for 2026 plus a default book with SKU-A and SKU-B.
async fn seed(client: &Client) -> Vec<String> {
    let mut periods = Vec::new();
    for month in 1..=12u32 {
        let start = format!("2026-{month:02}-01");
        let end = if month == 12 {
            "2026-12-31".to_string()
        } else {
            let next = chrono::NaiveDate::from_ymd_opt(2026, month + 1, 1).unwrap();
            next.pred_opt().unwrap().to_string()
        };
        let (status, period) = client
            .post(
                "/periods",
                json!({ "ledger_id": "GL-US", "name": format!("2026-{month:02}"), "start": start, "end": end }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{period}");
        let id = period["period_id"].as_str().unwrap().to_string();
        let (status, opened) = client.post(&format!("/periods/{id}/open"), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(opened["status"], "open");
        periods.push(id);
    }

    let (status, book) = client
        .post("/ssp-books", json!({ "name": "List 2026", "currency": "USD", "default": true }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let book_id = book["book_id"].as_str().unwrap().to_string();
    for (item, price) in [("SKU-A", 5_000_000), ("SKU-B", 7_000_000)] {
        let (status, _) = client
            .post(
                &format!("/ssp-books/{book_id}/lines"),
                json!({ "item_id": item, "unit_price": price, "effective_from": "2026-01-01" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    periods
}

fn standard_lines() -> Value {
    json!([
        {
            "line_no": 1,
            "item_id": "SKU-A",
            "quantity": 1,
            "terms": { "method": "point_in_time", "start": "2026-01-15", "end": "2026-01-15" }
        },
        {
            "line_no": 2,
            "item_id": "SKU-B",
            "quantity": 1,
            "terms": { "method": "ratable", "start": "2026-01-01", "end": "2026-12-31" }
        }
    ])
}

fn contract_body(number: &str) -> Value {
    json!({
        "contract_number": number,
        "customer_id": "CUST-1",
        "legal_entity_id": "LE-US",
        "org_id": "ORG-1",
        "ledger_id": "GL-US",
        "currency": "USD",
        "transaction_price": 12_000_000,
        "effective_date": "2026-01-01",
        "lines": standard_lines(),
    })
}

fn order_event(source_id: &str, number: &str) -> Value {
    json!({
        "source_system": "crm",
        "source_id": source_id,
        "amount": 12_000_000,
        "currency": "USD",
        "event_date": "2026-01-10",
        "payload": {
            "kind": "order",
            "contract_number": number,
            "customer_id": "CUST-9",
            "legal_entity_id": "LE-US",
            "org_id": "ORG-1",
            "ledger_id": "GL-US",
            "effective_date": "2026-01-01",
            "lines": standard_lines(),
        }
    })
}

#[tokio::test]
async fn health_needs_no_tenant() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenant_header_is_required() {
    let srv = TestServer::spawn().await;
    let http = reqwest::Client::new();

    let res = http.get(format!("{}/contracts", srv.base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "missing_tenant");

    let res = http
        .get(format!("{}/contracts", srv.base_url))
        .header("x-tenant-id", "not-a-uuid")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let tenant = TenantId::new();
    let (status, body) = Client::new(&srv, tenant).get("/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tenant_id"], tenant.to_string());
}

#[tokio::test]
async fn contract_lifecycle_over_http() {
    let srv = TestServer::spawn().await;
    let client = Client::new(&srv, TenantId::new());
    let periods = seed(&client).await;

    let (status, drafted) = client.post("/contracts", contract_body("C-100")).await;
    assert_eq!(status, StatusCode::CREATED, "{drafted}");
    let contract_id = drafted["contract_id"].as_str().unwrap().to_string();
    assert_eq!(drafted["versions"][0]["status"], "draft");

    let (status, allocated) = client.post(&format!("/contracts/{contract_id}/allocate"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{allocated}");
    let version = &allocated["versions"][0];
    assert_eq!(version["status"], "active");
    assert_eq!(version["total_allocated"], 12_000_000);
    assert_eq!(version["obligations"][0]["allocated_price"], 5_000_000);
    assert_eq!(version["obligations"][1]["allocated_price"], 7_000_000);

    let (status, listed) = client.get("/contracts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);
    assert_eq!(listed["items"][0]["contract_number"], "C-100");

    let (status, by_number) = client.get("/contracts/by-number/C-100").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_number["contract_id"], contract_id.as_str());

    let (status, schedule) = client.get(&format!("/contracts/{contract_id}/schedule")).await;
    assert_eq!(status, StatusCode::OK);
    let entries = schedule["items"].as_array().unwrap();
    let total: i64 = entries.iter().map(|e| e["amount"].as_i64().unwrap()).sum();
    assert_eq!(total, 12_000_000);
    let january = &periods[0];
    let january_due: i64 = entries
        .iter()
        .filter(|e| e["period_id"] == january.as_str())
        .map(|e| e["amount"].as_i64().unwrap())
        .sum();

    let (status, readiness) = client.get(&format!("/periods/{january}/close-readiness")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!readiness["exceptions"].as_array().unwrap().is_empty());

    let (status, err) = client.post(&format!("/periods/{january}/close"), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"], "period_not_ready");
    assert!(!err["exceptions"].as_array().unwrap().is_empty());

    let (status, report) = client.post(&format!("/periods/{january}/sweep"), json!({})).await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["posted_total"], january_due);
    assert!(january_due >= 5_000_000);

    let (status, closed) = client
        .post(&format!("/periods/{january}/close"), json!({ "actor": UserId::new().to_string() }))
        .await;
    assert_eq!(status, StatusCode::OK, "{closed}");
    assert_eq!(closed["status"], "closed");

    let (status, deferred) = client.get(&format!("/contracts/{contract_id}/deferred-revenue")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deferred["recognized_to_date"], january_due);
    assert_eq!(deferred["deferred"], 12_000_000 - january_due);

    let (status, summary) = client.get("/deferred-revenue").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["contracts"].as_array().unwrap().len(), 1);

    let (status, listed) = client.get("/periods?ledger_id=GL-US").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["items"][0]["status"], "closed");
    assert_eq!(listed["items"][1]["status"], "open");
}

#[tokio::test]
async fn ingested_order_is_traceable() {
    let srv = TestServer::spawn().await;
    let client = Client::new(&srv, TenantId::new());
    let periods = seed(&client).await;

    let (status, outcome) = client.post("/source-events", order_event("ORD-9", "C-900")).await;
    assert_eq!(status, StatusCode::CREATED, "{outcome}");
    assert_eq!(outcome["duplicate"], false);
    assert_eq!(outcome["event"]["processing_status"]["status"], "allocated");

    let (status, again) = client.post("/source-events", order_event("ORD-9", "C-900")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["duplicate"], true);

    let (status, _) = client.post(&format!("/periods/{}/sweep", periods[0]), json!({})).await;
    assert_eq!(status, StatusCode::OK);

    let (status, trace) = client.get("/trace/crm/ORD-9").await;
    assert_eq!(status, StatusCode::OK, "{trace}");
    assert_eq!(trace["contract"]["header"]["contract_number"], "C-900");
    assert_eq!(trace["contract"]["version"]["version_number"], 1);
    assert_eq!(trace["obligations"].as_array().unwrap().len(), 2);
    let posting = &trace["posting_status"];
    assert_eq!(
        posting["posted_amount"].as_i64().unwrap() + posting["scheduled_amount"].as_i64().unwrap(),
        12_000_000
    );
    assert_eq!(posting["fully_posted"], false);

    let (status, unknown) = client.get("/trace/crm/NOPE").await;
    assert_eq!(status, StatusCode::OK);
    assert!(unknown["source_event"].is_null());
    assert!(unknown["contract"].is_null());
}

#[tokio::test]
async fn failed_order_surfaces_and_can_be_retried() {
    let srv = TestServer::spawn().await;
    let client = Client::new(&srv, TenantId::new());
    seed(&client).await;

    let mut event = order_event("ORD-1", "C-1");
    event["payload"]["lines"][0]["item_id"] = json!("SKU-UNPRICED");
    let (status, err) = client.post("/source-events", event).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{err}");
    assert_eq!(err["error"], "source_event_error");
    assert_eq!(err["source_key"]["source_id"], "ORD-1");

    let (status, errors) = client.get("/source-events?errors_only=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(errors["items"].as_array().unwrap().len(), 1);

    let (status, event) = client.get("/source-events/crm/ORD-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["processing_status"]["status"], "error");
}

#[tokio::test]
async fn error_taxonomy_maps_to_status_codes() {
    let srv = TestServer::spawn().await;
    let client = Client::new(&srv, TenantId::new());
    let periods = seed(&client).await;

    let (status, err) = client.get(&format!("/contracts/{}", uuid::Uuid::now_v7())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "not_found");

    let (status, err) = client.get("/contracts/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "validation");

    let mut body = contract_body("C-2");
    body["lines"][0]["item_id"] = json!("SKU-UNPRICED");
    let (_, drafted) = client.post("/contracts", body).await;
    let id = drafted["contract_id"].as_str().unwrap();
    let (status, err) = client.post(&format!("/contracts/{id}/allocate"), json!({})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"], "ssp_not_found");
    assert_eq!(err["item_id"], "SKU-UNPRICED");

    let january = &periods[0];
    let (status, err) = client
        .post(
            &format!("/periods/{january}/reopen"),
            json!({ "actor": UserId::new().to_string(), "reason": "  " }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "validation");
}

#[tokio::test]
async fn tenants_are_isolated() {
    let srv = TestServer::spawn().await;
    let a = Client::new(&srv, TenantId::new());
    let b = Client::new(&srv, TenantId::new());
    seed(&a).await;

    let (status, drafted) = a.post("/contracts", contract_body("C-ISO")).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = drafted["contract_id"].as_str().unwrap();

    let (status, _) = b.get(&format!("/contracts/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, listed) = b.get("/contracts").await;
    assert!(listed["items"].as_array().unwrap().is_empty());
    let (_, books) = b.get("/ssp-books").await;
    assert!(books["items"].as_array().unwrap().is_empty());
}
