//! HTTP API driven in-process through the router.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use scarebox::api::{self, AppState};
use scarebox::observability::EventCategory;

use common::{Harness, fast_settings};

struct TestApp {
    router: Router,
    state: Arc<AppState>,
}

impl TestApp {
    fn new() -> Self {
        let Harness { controller, .. } = Harness::new(fast_settings());
        let state = Arc::new(AppState {
            controller: Arc::new(controller),
            subscriber_queue: 16,
        });
        let router = api::router(Arc::clone(&state), &["*".to_string()]);
        Self { router, state }
    }

    async fn send(&self, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(text) => {
                request = request.header("content-type", "application/json");
                Body::from(text.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    async fn post(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::POST, uri, None).await
    }

    async fn put(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(body)).await
    }
}

#[tokio::test]
async fn root_reports_running_status() {
    let app = TestApp::new();
    let (status, body) = app.get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Scare Box API");
    assert_eq!(body["status"], "stopped");

    app.post("/api/start").await;
    let (_, body) = app.get("/").await;
    assert_eq!(body["status"], "running");
}

#[tokio::test]
async fn start_and_stop_report_whether_anything_changed() {
    let app = TestApp::new();

    let (status, body) = app.post("/api/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "message": "System started" }));

    let (_, body) = app.post("/api/start").await;
    assert_eq!(body["message"], "System already running");

    let (_, body) = app.post("/api/stop").await;
    assert_eq!(body["message"], "System stopped");

    let (_, body) = app.post("/api/stop").await;
    assert_eq!(body["message"], "System already stopped");
}

#[tokio::test]
async fn config_roundtrip_through_put() {
    let app = TestApp::new();

    let (status, body) = app.get("/api/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "child");
    assert_eq!(body["timing"]["countdown_duration"], 0.1);

    let (status, body) = app
        .put(
            "/api/config",
            r#"{"trigger_amplitude_threshold": 0.45, "bogus_key": 1}"#,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["applied"], json!(["trigger_amplitude_threshold"]));
    assert_eq!(body["ignored"], json!(["bogus_key"]));

    let (_, body) = app.get("/api/config").await;
    assert_eq!(body["audio"]["trigger_amplitude_threshold"], 0.45);
    assert_eq!(body["audio"]["trigger_frequency_min"], 800.0);
}

#[tokio::test]
async fn config_put_rejects_bad_bodies() {
    let app = TestApp::new();

    let (status, body) = app.put("/api/config", "[1, 2]").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "expected a JSON object");

    let (status, body) = app.put("/api/config", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = app.put("/api/config", r#"{"countdown_duration": -1}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("Invalid configuration (countdown_duration")
    );

    let (_, body) = app.get("/api/config").await;
    assert_eq!(body["timing"]["countdown_duration"], 0.1);
}

#[tokio::test]
async fn mode_get_and_put() {
    let app = TestApp::new();

    let (_, body) = app.get("/api/mode").await;
    assert_eq!(body, json!({ "mode": "child" }));

    let (status, body) = app.put("/api/mode", r#"{"mode": "adult"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Mode set to adult");

    let (_, body) = app.get("/api/mode").await;
    assert_eq!(body["mode"], "adult");

    let (status, body) = app.put("/api/mode", r#"{"mode": "toddler"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(app.state.controller.mode().as_str(), "adult");
}

#[tokio::test]
async fn trigger_then_reject_while_busy() {
    let app = TestApp::new();

    let (status, body) = app.post("/api/trigger").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Scare sequence triggered");

    let (_, state) = app.get("/api/state").await;
    assert_eq!(state["phase"], "countdown");
    assert!(state["countdown_remaining"].as_f64().unwrap() <= 0.1);

    let (status, body) = app.post("/api/trigger").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({ "success": false, "message": "Cannot trigger in current state" })
    );

    let machine = Arc::clone(app.state.controller.machine());
    common::wait_until(move || machine.can_trigger()).await;
    let (status, _) = app.post("/api/trigger").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn state_snapshot_when_idle() {
    let app = TestApp::new();
    let (status, body) = app.get("/api/state").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["mode"], "child");
    assert_eq!(body["running"], false);
    assert!(body.get("countdown_remaining").is_none());
}

#[tokio::test]
async fn events_are_filtered_and_limited() {
    let app = TestApp::new();
    let events = app.state.controller.events();
    for i in 0..5 {
        events.info(EventCategory::Hardware, format!("info {i}"));
    }
    events.warning(EventCategory::Config, "careful");
    events.error(EventCategory::Hardware, "broken");

    let (status, body) = app.get("/api/events?limit=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    let messages: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["message"].as_str().unwrap())
        .collect();
    assert_eq!(messages, vec!["info 4", "careful", "broken"]);

    let (_, body) = app.get("/api/events?level=warning").await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["events"][0]["category"], "config");

    let (_, body) = app.get("/api/events?category=hardware&limit=2").await;
    assert_eq!(body["total"], 2);

    let (status, _) = app.get("/api/events?level=loud").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, stats) = app.get("/api/events/stats").await;
    assert_eq!(stats["total_events"], 7);
    assert_eq!(stats["by_level"]["info"], 5);
    assert_eq!(stats["by_category"]["hardware"], 6);
}

#[tokio::test]
async fn device_routes_return_driver_status() {
    let app = TestApp::new();

    let (status, body) = app.get("/api/devices").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lights"]["connected"], true);
    assert_eq!(body["microphone"]["listening"], false);

    let (_, lights) = app.get("/api/devices/lights").await;
    assert_eq!(lights, json!({ "connected": true, "device_count": 1 }));

    let (_, speaker) = app.get("/api/devices/speaker").await;
    assert_eq!(speaker["connected"], true);

    app.post("/api/start").await;
    let (_, microphone) = app.get("/api/devices/microphone").await;
    assert_eq!(microphone["listening"], true);
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::new();
    let (status, _) = app.get("/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
