//! 통합 테스트
//!
//! 라우터를 직접 호출해 하트비트 → 사용량 반영, 결제 통지 → 정산 흐름을 검증합니다.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePool;
use tower::ServiceExt;

use relaymeter::cache::MemoryStore;
use relaymeter::db::{
    init_database, NewRule, NodeRepository, OrderRepository, PackageRepository, RuleRepository,
    UserRepository,
};
use relaymeter::{build_app, AppConfig, ServerState};

struct TestApp {
    app: Router,
    pool: SqlitePool,
    store: Arc<MemoryStore>,
}

async fn setup() -> TestApp {
    let pool = init_database("sqlite::memory:", 1).await.unwrap();
    let store = Arc::new(MemoryStore::new());
    let state = ServerState::new(pool.clone(), store.clone(), &AppConfig::default());

    TestApp {
        app: build_app(state),
        pool,
        store,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_node(pool: &SqlitePool) -> i64 {
    NodeRepository::new(pool.clone())
        .create("hk-01", "hk.example.com", 443, "node-secret", &["gost", "iptables"])
        .await
        .unwrap()
}

async fn create_rule(pool: &SqlitePool, node_id: i64, user_id: i64, traffic_limit: i64) -> i64 {
    RuleRepository::new(pool.clone())
        .create(&NewRule {
            node_id,
            user_id,
            name: "relay".to_string(),
            protocol: "gost".to_string(),
            traffic_limit,
            speed_limit: 0,
            mode: "direct".to_string(),
            listen_port: 20000,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let t = setup().await;
    let (status, body) = send(&t.app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_heartbeat_caps_rule_and_disables() {
    let t = setup().await;
    let node_id = create_node(&t.pool).await;
    let user_id = UserRepository::new(t.pool.clone()).create("carol", 0).await.unwrap();
    let rule_id = create_rule(&t.pool, node_id, user_id, 2500).await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/node/heartbeat",
        Some(json!({
            "node_id": node_id,
            "secret": "node-secret",
            "traffic_stats": {
                format!("rule_{}_in", rule_id): 1000,
                format!("rule_{}_out", rule_id): 2000,
                "garbage": 5
            }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rules_updated"], 1);
    assert_eq!(body["rules_disabled"], json!([rule_id]));

    let rule = RuleRepository::new(t.pool.clone()).find_by_id(rule_id).await.unwrap().unwrap();
    assert_eq!(rule.traffic_used, 2500);
    assert!(!rule.enabled);

    // 비활성 규칙은 노드 설정에서 빠짐
    let (status, body) = send(
        &t.app,
        "POST",
        "/api/node/config",
        Some(json!({ "node_id": node_id, "secret": "node-secret" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["rules"], json!([]));

    let uri = format!("/api/statistics/traffic/{}?since=0", user_id);
    let (status, body) = send(&t.app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["traffic_used"], 2500);
    assert_eq!(body["bytes_in"], 1000);
    assert_eq!(body["bytes_out"], 2000);
}

#[tokio::test]
async fn test_repeated_heartbeats_accumulate_deltas() {
    let t = setup().await;
    let node_id = create_node(&t.pool).await;
    let rule_id = create_rule(&t.pool, node_id, 1, 0).await;
    let key = format!("rule_{}_in", rule_id);

    for counter in [100, 250, 250, 40] {
        let (status, _) = send(
            &t.app,
            "POST",
            "/api/node/heartbeat",
            Some(json!({
                "node_id": node_id,
                "secret": "node-secret",
                "traffic_stats": { key.clone(): counter }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    // 100 + 150 + 0 + 40(리셋)
    let rule = RuleRepository::new(t.pool.clone()).find_by_id(rule_id).await.unwrap().unwrap();
    assert_eq!(rule.traffic_used, 290);
    assert!(rule.enabled);
}

#[tokio::test]
async fn test_heartbeat_rejects_bad_secret() {
    let t = setup().await;
    let node_id = create_node(&t.pool).await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/node/heartbeat",
        Some(json!({ "node_id": node_id, "secret": "wrong", "traffic_stats": {} })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "INVALID_NODE_SECRET");
}

#[tokio::test]
async fn test_heartbeat_survives_store_outage() {
    let t = setup().await;
    let node_id = create_node(&t.pool).await;
    let rule_id = create_rule(&t.pool, node_id, 1, 0).await;
    t.store.set_offline(true);

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/node/heartbeat",
        Some(json!({
            "node_id": node_id,
            "secret": "node-secret",
            "traffic_stats": { format!("rule_{}_in", rule_id): 500 }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accounting_skipped"], true);
}

#[tokio::test]
async fn test_node_report_caches_probe() {
    let t = setup().await;
    let node_id = create_node(&t.pool).await;

    let (status, _) = send(
        &t.app,
        "POST",
        "/api/node/report",
        Some(json!({
            "node_id": node_id,
            "secret": "node-secret",
            "report": { "timestamp": 1700000000, "cpu": { "usage_percent": 12.5, "cores": 8 } }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.store.len(), 1);
}

#[tokio::test]
async fn test_payment_confirmation_flow() {
    let t = setup().await;
    let user_id = UserRepository::new(t.pool.clone()).create("dave", 0).await.unwrap();
    let package_id = PackageRepository::new(t.pool.clone())
        .create("monthly", 100 * 1024 * 1024 * 1024, 1500, 3)
        .await
        .unwrap();
    OrderRepository::new(t.pool.clone())
        .create("ORD-1", user_id, package_id, 1500, "alipay")
        .await
        .unwrap();

    let confirm = json!({ "trade_no": "ORD-1", "amount": 1500, "status": "TRADE_SUCCESS" });

    let (status, body) = send(&t.app, "POST", "/api/payment/confirm", Some(confirm.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "settled");

    // 중복 통지
    let (status, body) = send(&t.app, "POST", "/api/payment/confirm", Some(confirm)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_processed");

    let user = UserRepository::new(t.pool.clone()).find_by_id(user_id).await.unwrap().unwrap();
    assert_eq!(user.balance, 100 * 1024 * 1024 * 1024);
    assert_eq!(user.user_group_id, 3);
}

#[tokio::test]
async fn test_payment_confirmation_errors() {
    let t = setup().await;
    let user_id = UserRepository::new(t.pool.clone()).create("erin", 0).await.unwrap();
    let package_id = PackageRepository::new(t.pool.clone())
        .create("weekly", 1024, 300, 0)
        .await
        .unwrap();
    OrderRepository::new(t.pool.clone())
        .create("ORD-2", user_id, package_id, 300, "wxpay")
        .await
        .unwrap();

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/payment/confirm",
        Some(json!({ "trade_no": "ORD-404", "amount": 300, "status": "TRADE_SUCCESS" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "ORDER_NOT_FOUND");

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/payment/confirm",
        Some(json!({ "trade_no": "ORD-2", "amount": 1, "status": "TRADE_SUCCESS" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "AMOUNT_MISMATCH");

    let (status, body) = send(
        &t.app,
        "POST",
        "/api/payment/confirm",
        Some(json!({ "trade_no": "ORD-2", "amount": 300, "status": "WAIT_BUYER_PAY" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "marked_failed");
}

#[tokio::test]
async fn test_statistics_unknown_user() {
    let t = setup().await;
    let (status, body) = send(&t.app, "GET", "/api/statistics/traffic/999", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "USER_NOT_FOUND");
}
