//! Admin API: authentication, backend listing and operator transitions.

use std::net::SocketAddr;

use axum::http::StatusCode;
use failover_proxy::health::HealthState;
use failover_proxy::HttpServer;
use serde_json::Value;
use tokio::net::TcpListener;

mod common;

const KEY: &str = "test-admin-key";

async fn start_admin() -> (SocketAddr, HttpServer) {
    let a = common::start_mock_backend("a").await;
    let b = common::dead_address().await;

    let mut config = common::config_for(&[("a", a), ("b", b)]);
    config.admin.api_key = KEY.into();
    let server = HttpServer::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.admin_router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (addr, server)
}

#[tokio::test]
async fn test_requires_bearer_key() {
    let (addr, _server) = start_admin().await;
    let client = common::client();

    let res = client
        .get(format!("http://{}/admin/status", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("http://{}/admin/status", addr))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("http://{}/admin/status", addr))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let status: Value = res.json().await.unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["strategy"], "adaptive");
    assert_eq!(status["backends_total"], 2);
    assert_eq!(status["backends_active"], 2);
}

#[tokio::test]
async fn test_lists_backends() {
    let (addr, _server) = start_admin().await;

    let res = common::client()
        .get(format!("http://{}/admin/backends", addr))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    let backends: Value = res.json().await.unwrap();

    let backends = backends.as_array().unwrap();
    assert_eq!(backends.len(), 2);
    assert_eq!(backends[0]["id"], "a");
    assert_eq!(backends[0]["state"], "ACTIVE");
    assert_eq!(backends[0]["dynamic_recover_timeout_ms"], 1000);
    assert_eq!(backends[1]["id"], "b");
}

#[tokio::test]
async fn test_disable_enable_close() {
    let (addr, server) = start_admin().await;
    let client = common::client();
    let url = |action: &str| format!("http://{}/admin/backends/a/{}", addr, action);

    let res = client.post(url("disable")).bearer_auth(KEY).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["state"], "DISABLED");
    assert_eq!(server.selector().backend("a").unwrap().state(), HealthState::Disabled);

    let res = client.post(url("enable")).bearer_auth(KEY).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["state"], "ACTIVE");

    let res = client.post(url("close")).bearer_auth(KEY).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["state"], "CLOSED");

    // closed is terminal
    let res = client.post(url("enable")).bearer_auth(KEY).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["state"], "CLOSED");

    let res = client.post(url("explode")).bearer_auth(KEY).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("http://{}/admin/backends/missing/disable", addr))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
