#![cfg(feature = "web")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use tracker::app::{AppState, router};
use tracker::login::{Role, UserStore};
use tracker::storage::{LocalStore, MemoryStore};

struct TestApp {
    _dir: TempDir,
    store: Arc<MemoryStore>,
    router: Router,
}

fn app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let users = UserStore::open(dir.path().join("users.json")).unwrap();
    users.register_user("admin", "admin@localhost", "admin-pass", Role::Admin).unwrap();
    users.register_user("viewer", "viewer@example.com", "viewer-pass", Role::User).unwrap();

    let store = Arc::new(MemoryStore::new());
    let state = AppState::open(store.clone(), users, Duration::from_secs(3600)).unwrap();
    TestApp {
        _dir: dir,
        store,
        router: router(Arc::new(state)),
    }
}

async fn send(router: &Router, method: &str, uri: &str, cookie: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let (status, _, bytes) = send_raw(router, method, uri, cookie, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn send_raw(
    router: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, bytes.to_vec())
}

async fn login(router: &Router, username: &str, password: &str) -> String {
    let (status, headers, _) = send_raw(
        router,
        "POST",
        "/api/login",
        None,
        Some(json!({ "username": username, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn tables_need_a_session() {
    println!("\n====== Testing authentication ======");
    let app = app();

    let (status, body) = send(&app.router, "GET", "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app.router, "GET", "/api/epbg", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, body) = send(&app.router, "GET", "/api/check-auth", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authenticated"], false);

    let (status, _) = send(
        &app.router,
        "POST",
        "/api/login",
        None,
        Some(json!({ "username": "admin", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    println!("✓ Requests without a valid session get 401");
}

#[tokio::test]
async fn login_by_email_and_logout() {
    let app = app();
    let cookie = login(&app.router, "viewer@example.com", "viewer-pass").await;

    let (_, body) = send(&app.router, "GET", "/api/check-auth", Some(&cookie), None).await;
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["user"]["username"], "viewer");
    assert_eq!(body["user"]["role"], "user");

    let (status, body) = send(&app.router, "PUT", "/api/user/theme", Some(&cookie), Some(json!({ "theme": "dark" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["theme"], "dark");

    let (status, _) = send(&app.router, "POST", "/api/logout", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app.router, "GET", "/api/check-auth", Some(&cookie), None).await;
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn editors_save_and_everyone_reads() {
    println!("\n====== Testing table save ======");
    let app = app();
    let admin = login(&app.router, "admin", "admin-pass").await;
    let viewer = login(&app.router, "viewer", "viewer-pass").await;

    let records = json!({ "records": [
        { "sno": "4", "contractor": "Acme", "bg_no": "BG-1", "bgAmount": "5,00,000" },
        { "sno": "9", "contractor": "Bolt", "bgValidity": "2030-01-31" },
    ]});

    let (status, _) = send(&app.router, "POST", "/api/epbg", Some(&viewer), Some(records.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app.router, "POST", "/api/epbg", Some(&admin), Some(records)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    assert!(app.store.get("epbgData").unwrap().is_some());

    let (status, body) = send(&app.router, "GET", "/api/epbg", Some(&viewer), None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["sno"], "1");
    assert_eq!(rows[0]["bgNo"], "BG-1");
    assert_eq!(rows[1]["sno"], "2");
    assert_eq!(rows[1]["bgValidity"], "2030-01-31");
    println!("✓ Saved rows are renumbered and readable by a read-only user");
}

#[tokio::test]
async fn unknown_tables_are_not_found() {
    let app = app();
    let admin = login(&app.router, "admin", "admin-pass").await;
    let (status, _) = send(&app.router, "GET", "/api/payroll", Some(&admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn export_returns_a_csv_download() {
    let app = app();
    let admin = login(&app.router, "admin", "admin-pass").await;
    send(
        &app.router,
        "POST",
        "/api/bill-tracker",
        Some(&admin),
        Some(json!({ "records": [{ "contractor": "Acme", "approvedAmount": "1000" }] })),
    )
    .await;

    let (status, headers, bytes) = send_raw(&app.router, "GET", "/api/export/bill-tracker/csv", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
    assert!(
        headers[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .contains("bill-tracker.csv")
    );
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("S.No,"));
    assert!(text.contains("1,,Acme"));

    let (status, _) = send(&app.router, "GET", "/api/export/bill-tracker/pdf", Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn confirmed_renewal_moves_the_contract_end_date() {
    println!("\n====== Testing contract renewal ======");
    let app = app();
    let admin = login(&app.router, "admin", "admin-pass").await;

    let end = (chrono::Local::now().date_naive() + chrono::Duration::days(10)).format("%Y-%m-%d").to_string();
    send(
        &app.router,
        "POST",
        "/api/contractor-list",
        Some(&admin),
        Some(json!({ "records": [
            { "contractor": "Acme", "value": "2000000", "startDate": "2024-01-01", "endDate": end },
            { "contractor": "Later", "value": "1000", "startDate": "2024-01-01", "endDate": "2099-01-01" },
        ]})),
    )
    .await;

    let (status, body) = send(&app.router, "GET", "/api/contract-renewal/expiring", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let expiring = body.as_array().unwrap();
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0]["contractor_name"], "Acme");

    let (status, body) = send(
        &app.router,
        "POST",
        "/api/contract-renewal/analyze",
        Some(&admin),
        Some(json!({ "contract_id": 1, "analysis_type": "risk" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_object());

    let (status, renewal) = send(
        &app.router,
        "POST",
        "/api/contract-renewal/process-renewal",
        Some(&admin),
        Some(json!({
            "contract_id": 1,
            "user_action": "renew",
            "new_end_date": "2027-03-31",
            "renewal_amount": 2100000.0,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renewal["status"], "pending");

    let (status, receipt) = send(
        &app.router,
        "POST",
        "/api/contract-renewal/process-payment",
        Some(&admin),
        Some(json!({ "renewal_id": renewal["id"], "amount": 2100000.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["status"], "prototype");
    assert_eq!(receipt["payment_method"], "card");

    let (status, confirmed) = send(
        &app.router,
        "POST",
        "/api/contract-renewal/confirm",
        Some(&admin),
        Some(json!({ "renewal_id": renewal["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "confirmed");

    let (_, rows) = send(&app.router, "GET", "/api/contractor-list", Some(&admin), None).await;
    assert_eq!(rows[0]["endDate"], "2027-03-31");
    assert!(app.store.get("contractRenewals").unwrap().is_some());
    println!("✓ Confirming a renewal updates the contract row");
}

#[tokio::test]
async fn renewal_of_a_missing_contract_is_not_found() {
    let app = app();
    let admin = login(&app.router, "admin", "admin-pass").await;
    let (status, _) = send(
        &app.router,
        "POST",
        "/api/contract-renewal/process-renewal",
        Some(&admin),
        Some(json!({ "contract_id": 42, "user_action": "cancel" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn analytics_report_summarizes_all_tables() {
    let app = app();
    let admin = login(&app.router, "admin", "admin-pass").await;
    send(
        &app.router,
        "POST",
        "/api/contractor-list",
        Some(&admin),
        Some(json!({ "records": [{ "contractor": "Acme", "value": "500000", "endDate": "2099-01-01" }] })),
    )
    .await;

    let (status, body) = send(&app.router, "GET", "/api/analytics/report", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_object());
    assert!(body.get("summary").is_some());
}
