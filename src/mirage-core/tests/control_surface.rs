//! End-to-end tests for the local control surface.
//!
//! Each test binds a real loopback listener and drives the HTTP surface the
//! way the desktop shell does.

use std::sync::Arc;

use mirage_core::api::{ApiServer, ApiState};
use mirage_core::config::{ClientConfig, RealityConfig, ServerConfig};
use mirage_core::engine::Engine;
use mirage_core::loader::StubLoader;
use serde_json::Value;

fn server_engine() -> Arc<Engine> {
    let cfg = ServerConfig {
        listen: ":443".into(),
        protocol: "vless".into(),
        uuid: "test-uuid".into(),
        reality: RealityConfig {
            sni: "www.google.com".into(),
            private_key: "key".into(),
            ..Default::default()
        },
        ..Default::default()
    };
    Arc::new(Engine::new(cfg, Arc::new(StubLoader)).unwrap())
}

fn client_engine() -> Arc<Engine> {
    let cfg = ClientConfig {
        server: "1.2.3.4:443".into(),
        uuid: "u".into(),
        sni: "g.com".into(),
        public_key: "pk".into(),
        ..Default::default()
    };
    Arc::new(Engine::new_client(cfg, Arc::new(StubLoader)).unwrap())
}

async fn spawn_api(engine: Arc<Engine>) -> (ApiServer, String, Arc<ApiState>) {
    let state = Arc::new(ApiState::new(engine));
    let server = ApiServer::new("127.0.0.1:0", Arc::clone(&state));
    let addr = server.start().await.unwrap();
    (server, format!("http://{addr}"), state)
}

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let (server, base, _state) = spawn_api(server_engine()).await;

    let body: Value = reqwest::get(format!("{base}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");

    server.stop();
}

#[tokio::test]
async fn status_reflects_live_engine_state() {
    let engine = client_engine();
    let (server, base, state) = spawn_api(Arc::clone(&engine)).await;
    state.record_traffic(1024, 4096);

    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["connected"], false);
    assert_eq!(body["status"], "stopped");
    assert_eq!(body["bytes_sent"], 1024);
    assert_eq!(body["bytes_recv"], 4096);
    assert!(body.get("uptime").is_none());

    engine.start().await.unwrap();

    let body: Value = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["connected"], true);
    assert_eq!(body["status"], "running");
    assert!(body.get("uptime").is_some());

    engine.stop().await.unwrap();
    server.stop();
}

#[tokio::test]
async fn connect_and_disconnect_transition_engine() {
    let engine = client_engine();
    let (server, base, _state) = spawn_api(Arc::clone(&engine)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/connect"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "connected");

    // Second connect conflicts.
    let resp = client
        .post(format!("{base}/api/connect"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "already connected");

    let resp = client
        .post(format!("{base}/api/disconnect"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "disconnected");

    // Second disconnect conflicts.
    let resp = client
        .post(format!("{base}/api/disconnect"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    server.stop();
}

#[tokio::test]
async fn config_endpoint_exposes_compiled_document() {
    let engine = client_engine();
    let (server, base, _state) = spawn_api(Arc::clone(&engine)).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{base}/api/config"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["config"], "{}", "no document before the first start");

    engine.start().await.unwrap();

    let body: Value = client
        .get(format!("{base}/api/config"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rendered = body["config"].as_str().unwrap();
    assert!(rendered.contains("\"inbounds\""));
    assert!(rendered.contains("socks-in"));

    engine.stop().await.unwrap();
    server.stop();
}

#[tokio::test]
async fn sports_mode_toggle_and_validation() {
    let (server, base, _state) = spawn_api(client_engine()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/api/sports-mode"))
        .body(r#"{"enabled":true}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["sports_mode"], true);

    let body: Value = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["sports_mode"], true);

    let resp = client
        .post(format!("{base}/api/sports-mode"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid request body");

    server.stop();
}

#[tokio::test]
async fn preflight_answers_204_with_cors_headers() {
    let (server, base, _state) = spawn_api(client_engine()).await;
    let client = reqwest::Client::new();

    let resp = client
        .request(reqwest::Method::OPTIONS, format!("{base}/api/connect"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    assert_eq!(
        resp.headers().get("access-control-allow-methods").unwrap(),
        "GET, POST, OPTIONS"
    );
    assert_eq!(
        resp.headers().get("access-control-allow-headers").unwrap(),
        "Content-Type"
    );
    assert!(resp.bytes().await.unwrap().is_empty());

    let resp = client
        .get(format!("{base}/api/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );

    server.stop();
}

#[tokio::test]
async fn internal_error_surfaces_as_500() {
    // A client config that validates but fails to compile: the engine caches
    // nothing and the surface reports the failure.
    let cfg = ClientConfig {
        server: "1.2.3.4:443".into(),
        uuid: "u".into(),
        sni: "g.com".into(),
        public_key: "pk".into(),
        local_listen: "notanaddress".into(),
        ..Default::default()
    };
    let engine = Arc::new(Engine::new_client(cfg, Arc::new(StubLoader)).unwrap());
    let (server, base, _state) = spawn_api(engine).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/api/connect"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("invalid address"));

    server.stop();
}
