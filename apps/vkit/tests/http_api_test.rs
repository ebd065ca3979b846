// SPDX-FileCopyrightText: © 2025 VisionKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end HTTP tests against a spawned server.

use reqwest::StatusCode;
use std::net::SocketAddr;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::Duration;
use visionkit_server::config::{Config, StorageConfig};

struct TestServer {
    addr: SocketAddr,
    _dir: TempDir,
    _handle: tokio::task::JoinHandle<()>,
}

async fn start_test_server() -> Option<TestServer> {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        storage: StorageConfig {
            directory: dir.path().join("storage").to_string_lossy().into_owned(),
            system_config_path: dir
                .path()
                .join("storage/config.json")
                .to_string_lossy()
                .into_owned(),
            seed_default_nodes: false,
        },
        ..Config::default()
    };

    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => return None,
        Err(e) => panic!("Failed to bind test server listener: {e}"),
    };
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (app, _state) = visionkit_server::server::create_app(config);
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    Some(TestServer { addr, _dir: dir, _handle: handle })
}

#[tokio::test]
async fn test_quick_face_detection_file() {
    let Some(server) = start_test_server().await else {
        eprintln!("Skipping HTTP tests: local TCP bind not permitted");
        return;
    };
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/v1/core/instance/quick", server.addr))
        .json(&serde_json::json!({
            "name": "t1",
            "solutionType": "face_detection",
            "input": {"type": "file"}
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body: serde_json::Value = response.json().await.expect("json");
    assert_eq!(body["instanceId"].as_str().map(str::len), Some(36));
    assert_eq!(body["solutionId"], "face_detection_file_default");
    assert_eq!(body["running"], false);
    assert_eq!(
        body["additionalParams"]["FILE_PATH"],
        "/opt/edge_ai_api/videos/face.mp4"
    );
}

#[tokio::test]
async fn test_admission_denied_returns_429() {
    let Some(server) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();

    // Cap the instance count at one.
    let response = client
        .patch(format!("http://{}/v1/core/config/system", server.addr))
        .json(&serde_json::json!({"max_running_instances": 1}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let quick = serde_json::json!({
        "name": "t1",
        "solutionType": "face_detection",
        "input": {"type": "file"}
    });
    let first = client
        .post(format!("http://{}/v1/core/instance/quick", server.addr))
        .json(&quick)
        .send()
        .await
        .expect("request");
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = client
        .post(format!("http://{}/v1/core/instance/quick", server.addr))
        .json(&quick)
        .send()
        .await
        .expect("request");
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = second.json().await.expect("json");
    assert_eq!(body["error"], "Too Many Requests");
    assert_eq!(body["cap"], 1);
    assert_eq!(body["current"], 1);
}

#[tokio::test]
async fn test_config_path_crud() {
    let Some(server) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();
    let base = format!("http://{}/v1/core/config", server.addr);

    let response = client
        .patch(format!("{base}/system/web_server"))
        .json(&serde_json::json!({"port": 4000}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let response =
        client.get(format!("{base}/system/web_server/port")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let value: serde_json::Value = response.json().await.expect("json");
    assert_eq!(value, serde_json::json!(4000));

    let response =
        client.delete(format!("{base}/system/web_server")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let response =
        client.get(format!("{base}/system/web_server")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json().await.expect("json");
    assert_eq!(body["error"], "Not Found");
}

#[tokio::test]
async fn test_config_reset_restores_defaults() {
    let Some(server) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();
    let base = format!("http://{}/v1/core/config", server.addr);

    let response = client
        .put(&base)
        .json(&serde_json::json!({"stripped": true}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.post(format!("{base}/reset")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let response =
        client.get(format!("{base}/system/web_server/port")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let value: serde_json::Value = response.json().await.expect("json");
    assert_eq!(value, serde_json::json!(3546));
}

#[tokio::test]
async fn test_rtmp_stream_key_collision() {
    let Some(server) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "name": "a",
        "solutionType": "face_detection",
        "input": {"type": "file"},
        "output": {"type": "rtmp", "url": "rtmp://host/app/stream_1"}
    });

    let first = client
        .post(format!("http://{}/v1/core/instance/quick", server.addr))
        .json(&body)
        .send()
        .await
        .expect("request");
    assert_eq!(first.status(), StatusCode::CREATED);
    let first: serde_json::Value = first.json().await.expect("json");
    assert_eq!(first["rtmpUrl"], "rtmp://host/app/stream_1");

    let second = client
        .post(format!("http://{}/v1/core/instance/quick", server.addr))
        .json(&body)
        .send()
        .await
        .expect("request");
    assert_eq!(second.status(), StatusCode::CREATED);
    let second: serde_json::Value = second.json().await.expect("json");

    let id = second["instanceId"].as_str().expect("id");
    let short_id: String = id.chars().filter(|c| *c != '-').take(8).collect();
    assert_eq!(
        second["rtmpUrl"].as_str().expect("url"),
        format!("rtmp://host/app/stream_1_{short_id}")
    );
    // The first instance's URL is unchanged.
    assert_eq!(first["rtmpUrl"], "rtmp://host/app/stream_1");
}

#[tokio::test]
async fn test_nodes_listing_falls_back_to_templates() {
    let Some(server) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();

    let response =
        client.get(format!("http://{}/v1/core/nodes", server.addr)).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("json");
    assert_eq!(body["type"], "templates");
    let nodes = body["nodes"].as_array().expect("nodes");
    assert_eq!(body["total"].as_u64().map(|t| t as usize), Some(nodes.len()));
    assert!(!nodes.is_empty());
    assert!(nodes.iter().all(|n| n["isTemplate"] == true));
}

#[tokio::test]
async fn test_node_pool_crud() {
    let Some(server) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();
    let base = format!("http://{}/v1/core/nodes", server.addr);

    let response = client
        .post(&base)
        .json(&serde_json::json!({
            "templateId": "file_src",
            "parameters": {"file_path": "/data/cam1.mp4"}
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: serde_json::Value = response.json().await.expect("json");
    let node_id = created["nodeId"].as_str().expect("nodeId");
    assert_eq!(created["parameters"]["file_path"], "/data/cam1.mp4");

    // With a node present the listing switches to nodes.
    let response = client.get(&base).send().await.expect("request");
    let listing: serde_json::Value = response.json().await.expect("json");
    assert_eq!(listing["type"], "nodes");
    assert_eq!(listing["total"], 1);

    // Mark in use: deletion is refused until released.
    let response = client
        .put(format!("{base}/{node_id}"))
        .json(&serde_json::json!({"inUse": true}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.delete(format!("{base}/{node_id}")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = client
        .put(format!("{base}/{node_id}"))
        .json(&serde_json::json!({"inUse": false}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.delete(format!("{base}/{node_id}")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);

    let response = client.get(format!("{base}/{node_id}")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Template and stats endpoints.
    let response = client.get(format!("{base}/templates/file_src")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let template: serde_json::Value = response.json().await.expect("json");
    assert_eq!(template["templateId"], "file_src");
    assert_eq!(template["isTemplate"], true);

    let response = client.get(format!("{base}/stats")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let stats: serde_json::Value = response.json().await.expect("json");
    assert!(stats["totalTemplates"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_securt_instance_and_crossing_line() {
    let Some(server) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();
    let base = format!("http://{}/v1/securt/instance", server.addr);

    let response = client
        .post(&base)
        .json(&serde_json::json!({"name": "door-cam", "detectionSensitivity": "High"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);
    let instance: serde_json::Value = response.json().await.expect("json");
    let id = instance["instanceId"].as_str().expect("id");
    assert_eq!(instance["detectionSensitivity"], "High");

    // The instance runs as soon as it is created.
    let response = client.get(format!("{base}/{id}/stats")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let stats: serde_json::Value = response.json().await.expect("json");
    assert_eq!(stats["isRunning"], true);

    let response = client
        .post(format!("{base}/{id}/line/crossing"))
        .json(&serde_json::json!({
            "coordinates": [{"x": 0, "y": 0}, {"x": 100, "y": 100}],
            "direction": "Both",
            "classes": ["Vehicle"]
        }))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);
    let line: serde_json::Value = response.json().await.expect("json");
    let line_id = line["lineId"].as_str().expect("lineId");

    // The instance keeps running and the line shows up under `crossing`.
    let response = client.get(format!("{base}/{id}/stats")).send().await.expect("request");
    let stats: serde_json::Value = response.json().await.expect("json");
    assert_eq!(stats["isRunning"], true);

    let response = client.get(format!("{base}/{id}/lines")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let lines: serde_json::Value = response.json().await.expect("json");
    assert_eq!(lines["crossing"].as_array().map(Vec::len), Some(1));
    assert_eq!(lines["crossing"][0]["lineId"], *line_id);

    // Entity payload mirrors the line; deleting the instance cascades.
    let response =
        client.get(format!("{base}/{id}/analytics_entities")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let entities: serde_json::Value = response.json().await.expect("json");
    assert_eq!(entities["lines"]["crossing"].as_array().map(Vec::len), Some(1));

    let response = client.delete(format!("{base}/{id}")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    let response = client.get(format!("{base}/{id}/lines")).send().await.expect("request");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_securt_put_with_id_conflicts_on_duplicate() {
    let Some(server) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();
    let base = format!("http://{}/v1/securt/instance", server.addr);

    let response = client
        .put(format!("{base}/my-chosen-id"))
        .json(&serde_json::json!({"name": "one"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: serde_json::Value = response.json().await.expect("json");
    // The core mints its own UUID; the facade adopts it.
    let adopted = created["instanceId"].as_str().expect("id");

    let response = client
        .put(format!("{base}/{adopted}"))
        .json(&serde_json::json!({"name": "two"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cors_preflight() {
    let Some(server) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();

    let response = client
        .request(
            reqwest::Method::OPTIONS,
            format!("http://{}/v1/core/nodes", server.addr),
        )
        .header("Origin", "http://example.com")
        .header("Access-Control-Request-Method", "POST")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn test_unknown_solution_type_is_bad_request() {
    let Some(server) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/v1/core/instance/quick", server.addr))
        .json(&serde_json::json!({"name": "t1", "solutionType": "teleportation"}))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.expect("json");
    assert_eq!(body["error"], "Bad Request");
}
