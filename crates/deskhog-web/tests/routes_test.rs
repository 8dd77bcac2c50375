//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use deskhog_core::sim::{MemoryFlash, RecordingSystem, ScriptedHttp, SimulatedNetwork, SimulatedWifi};
use deskhog_core::{MemoryConfigStorage, Services};
use deskhog_server::{PortalHandle, PortalServer, ServerConfig};
use deskhog_web::{create_router, WebState};

const RELEASES: &str = "https://example.test/releases";

struct TestApp {
    router: Router,
    handle: PortalHandle,
    wifi: Arc<SimulatedWifi>,
    http: Arc<ScriptedHttp>,
}

fn app() -> TestApp {
    let config = ServerConfig {
        firmware_version: "v1.0.0".to_string(),
        release_url: RELEASES.to_string(),
        outcome_hold_ms: 0,
        check_timeout_secs: 2,
        ..ServerConfig::default()
    };
    let wifi = Arc::new(SimulatedWifi::new(vec![
        SimulatedNetwork::new("Home", -45, Some("secret123")),
        SimulatedNetwork::new("Cafe", -75, None),
    ]));
    let http = Arc::new(ScriptedHttp::new());
    let services = Services {
        wifi: wifi.clone(),
        http: http.clone(),
        flash: Arc::new(MemoryFlash::new(1 << 20)),
        storage: Arc::new(MemoryConfigStorage::new()),
        system: Arc::new(RecordingSystem::new()),
    };

    let server = PortalServer::new(config.clone(), services).unwrap();
    let handle = server.handle();
    tokio::spawn(server.run());

    let router = create_router(Arc::new(WebState::new(handle.clone(), &config)));
    TestApp {
        router,
        handle,
        wifi,
        http,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_form(uri: &str, body: &'static str) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

async fn wait_idle(handle: &PortalHandle) {
    for _ in 0..200 {
        if handle.status().action_in_progress().is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("action did not finish");
}

#[tokio::test]
async fn test_status_when_idle() {
    let app = app();

    let (status, body) = send(&app.router, get("/api/status")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["portal"]["action_in_progress"], "NONE");
    assert_eq!(body["wifi"]["is_connected"], false);
    assert_eq!(body["ota"]["status_code"], "IDLE");
    assert_eq!(body["ota"]["current_firmware_version"], "v1.0.0");
    assert_eq!(body["device_config"]["api_key_display"], "");
}

#[tokio::test]
async fn test_card_definitions() {
    let app = app();

    let (status, body) = send(&app.router, get("/api/cards/definitions")).await;

    assert_eq!(status, StatusCode::OK);
    let definitions = body.as_array().unwrap();
    assert_eq!(definitions.len(), 6);
    assert_eq!(definitions[0]["id"], "INSIGHT");
    assert_eq!(definitions[0]["allow_multiple"], true);
    assert_eq!(definitions[0]["needs_config_input"], true);
}

#[tokio::test]
async fn test_submit_then_busy() {
    let app = app();
    app.wifi.set_connect_delay(Duration::from_millis(300));

    let (status, body) = send(
        &app.router,
        post_json(
            "/api/actions",
            json!({"action": "SAVE_WIFI", "payload": {"ssid": "Home", "password": "secret123"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    assert!(body["action_id"].is_string());

    let (status, body) = send(
        &app.router,
        post_json("/api/actions", json!({"action": "START_WIFI_SCAN"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "busy");

    let (_, body) = send(&app.router, get("/api/status")).await;
    assert_eq!(body["portal"]["action_in_progress"], "SAVE_WIFI");

    wait_idle(&app.handle).await;
    let (_, body) = send(&app.router, get("/api/status")).await;
    assert_eq!(body["portal"]["action_in_progress"], "NONE");
    assert_eq!(body["portal"]["last_action_completed"], "SAVE_WIFI");
    assert_eq!(body["portal"]["last_action_status"], "SUCCESS");
    assert_eq!(body["wifi"]["connected_ssid"], "Home");
}

#[tokio::test]
async fn test_unusable_requests() {
    let app = app();

    let (status, body) = send(
        &app.router,
        post_json("/api/actions", json!({"action": "REFORMAT"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let (status, body) = send(
        &app.router,
        post_json("/api/actions", json!({"action": "SAVE_WIFI", "payload": {"ssid": ""}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");

    let request = Request::post("/api/actions")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, stats) = send(&app.router, get("/api/stats")).await;
    assert_eq!(stats["rejected"], 3);
    assert_eq!(stats["accepted"], 0);
}

#[tokio::test]
async fn test_captive_probes_redirect() {
    let app = app();

    for path in ["/generate_204", "/hotspot-detect.html", "/connecttest.txt", "/fwlink", "/anything/else"] {
        let response = app.router.clone().oneshot(get(path)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND, "{}", path);
        assert_eq!(
            response.headers()[header::LOCATION],
            "http://192.168.4.1/",
            "{}",
            path
        );
    }
}

#[tokio::test]
async fn test_legacy_device_config_masks_key() {
    let app = app();

    let (status, body) = send(
        &app.router,
        post_form(
            "/save-device-config",
            "teamId=42&apiKey=phc_abcdefgh1234&region=eu",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    wait_idle(&app.handle).await;

    let (_, body) = send(&app.router, get("/get-device-config")).await;
    assert_eq!(body["teamId"], 42);
    assert_eq!(body["apiKey"], "phc_…1234");
    assert_eq!(body["region"], "eu");

    let (_, body) = send(
        &app.router,
        post_form("/save-device-config", "teamId=abc"),
    )
    .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_legacy_insights() {
    let app = app();

    let (_, body) = send(
        &app.router,
        post_form("/save-insight", "insightId=abc123&insightTitle=Signups"),
    )
    .await;
    assert_eq!(body["success"], true);
    wait_idle(&app.handle).await;

    let (_, body) = send(&app.router, get("/get-insights")).await;
    assert_eq!(body["insights"], json!([{"id": "abc123", "title": "Signups"}]));

    let (_, body) = send(&app.router, post_json("/delete-insight", json!({"id": "abc123"}))).await;
    assert_eq!(body["success"], true);
    wait_idle(&app.handle).await;

    let (_, body) = send(&app.router, get("/get-insights")).await;
    assert_eq!(body["insights"], json!([]));
}

#[tokio::test]
async fn test_legacy_check_update_waits_for_result() {
    let app = app();
    app.http.set_text(
        RELEASES,
        r#"[{"tag_name": "v1.2.0", "body": "New cards", "assets": [
            {"name": "firmware.bin", "browser_download_url": "https://example.test/fw.bin"}
        ]}]"#,
    );
    send(
        &app.router,
        post_form("/save-wifi", "ssid=Home&password=secret123"),
    )
    .await;
    wait_idle(&app.handle).await;

    let (status, body) = send(&app.router, get("/check-update")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["currentVersion"], "v1.0.0");
    assert_eq!(body["availableVersion"], "v1.2.0");
    assert_eq!(body["updateAvailable"], true);
    assert_eq!(body["releaseNotes"], "New cards");
    assert_eq!(body["error"], "");

    let (_, body) = send(&app.router, get("/update-status")).await;
    assert_eq!(body["status"], 0);
    assert_eq!(body["progress"], 0);
}

#[tokio::test]
async fn test_legacy_start_update_without_check() {
    let app = app();

    let (status, body) = send(&app.router, post_json("/start-update", Value::Null)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_legacy_scan_networks() {
    let app = app();

    let (_, body) = send(&app.router, get("/scan-networks")).await;
    assert_eq!(body["scanning"], true);
    wait_idle(&app.handle).await;

    let (_, body) = send(&app.router, get("/scan-networks")).await;
    let networks = body["networks"].as_array().unwrap();
    assert_eq!(networks.len(), 2);
    assert_eq!(networks[0]["ssid"], "Home");
    assert_eq!(networks[0]["quality"], "excellent");
}
