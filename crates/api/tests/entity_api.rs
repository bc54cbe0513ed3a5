//! HTTP-level integration tests for project, device, payload and target
//! system endpoints.
//!
//! Uses Axum's tower::ServiceExt to send requests directly to the router
//! without an actual TCP listener.

mod common;

use axum::http::{header, StatusCode};
use common::{
    body_json, body_text, create_http_target, create_payload, create_project, create_ready_device,
    delete, get, patch, post_json, put_json, TestApp,
};
use serde_json::json;
use sqlx::SqlitePool;

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_project_crud(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let id = create_project(&app, "Greenhouse").await;

    let response = get(app.router(), &format!("/api/projects/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["name"], "Greenhouse");
    assert_eq!(json["is_running"], false);
    assert_eq!(json["device_count"], 0);

    let response = put_json(
        app.router(),
        &format!("/api/projects/{id}"),
        json!({"name": "Greenhouse North"}),
    )
    .await;
    assert_eq!(body_json(response).await["name"], "Greenhouse North");

    let response = get(app.router(), "/api/projects").await;
    let list = body_json(response).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["device_count"], 0);
    assert_eq!(list[0]["is_running"], false);

    let response = delete(app.router(), &format!("/api/projects/{id}")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = get(app.router(), &format!("/api/projects/{id}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_duplicate_project_name_returns_409(pool: SqlitePool) {
    let app = TestApp::new(pool);
    create_project(&app, "Dup").await;

    let response = post_json(app.router(), "/api/projects", json!({"name": "Dup"})).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_blank_project_name_rejected(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let response = post_json(app.router(), "/api/projects", json!({"name": "   "})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_project_validation_report(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "Checks").await;
    let payload = create_payload(&app, "p").await;
    let target = create_http_target(&app, "t", "http://collector.local/in").await;
    create_ready_device(&app, project, "ready", payload, target).await;
    common::create(
        &app,
        "/api/devices",
        json!({"project_id": project, "name": "bare"}),
    )
    .await;

    let response = get(app.router(), &format!("/api/projects/{project}/validation")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total_devices"], 2);
    assert_eq!(json["ready_devices"], 1);
    assert_eq!(json["error_devices"], 1);
    assert_eq!(json["can_start"], true);

    let bare = json["devices"]
        .as_array()
        .unwrap()
        .iter()
        .find(|d| d["device_name"] == "bare")
        .unwrap();
    assert_eq!(bare["readiness"]["status"], "error");
    assert_eq!(bare["readiness"]["is_simulation_ready"], false);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_export_json_and_html(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "Export Me").await;
    let payload = create_payload(&app, "p").await;
    let target = common::create(
        &app,
        "/api/target-systems",
        json!({"name": "broker", "system_type": "mqtt",
               "config": {"host": "mq.local", "topic": "t", "username": "sim", "password": "hunter2"}}),
    )
    .await;
    create_ready_device(&app, project, "d1", payload, target).await;

    let response = get(app.router(), &format!("/api/projects/{project}/export")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert_eq!(disposition, "attachment; filename=\"export-me-export.json\"");
    let json = body_json(response).await;
    assert_eq!(json["project"]["name"], "Export Me");
    assert_eq!(json["devices"].as_array().unwrap().len(), 1);
    assert_eq!(json["payloads"].as_array().unwrap().len(), 1);
    assert_eq!(json["target_systems"][0]["config"]["password"], "hunter2");

    let response = get(
        app.router(),
        &format!("/api/projects/{project}/export?format=html"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    let html = body_text(response).await;
    assert!(html.contains("Export Me"));
    assert!(!html.contains("hunter2"));
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_send_interval_boundaries(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "Bounds").await;

    for (name, interval, expected) in [
        ("one", 1, StatusCode::CREATED),
        ("max", 3600, StatusCode::CREATED),
        ("zero", 0, StatusCode::BAD_REQUEST),
        ("over", 3601, StatusCode::BAD_REQUEST),
    ] {
        let response = post_json(
            app.router(),
            "/api/devices",
            json!({"project_id": project, "name": name, "send_interval": interval}),
        )
        .await;
        assert_eq!(response.status(), expected, "interval {interval}");
    }
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_device_response_carries_readiness(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "R").await;
    let payload = create_payload(&app, "p").await;
    let target = create_http_target(&app, "t", "http://collector.local/in").await;
    let device = create_ready_device(&app, project, "sensor", payload, target).await;

    let response = get(app.router(), &format!("/api/devices/{device}")).await;
    let json = body_json(response).await;
    assert_eq!(json["name"], "sensor");
    assert_eq!(json["is_simulation_ready"], true);
    assert_eq!(json["readiness"]["status"], "ready");
    assert_eq!(json["is_running"], false);

    let response = get(app.router(), &format!("/api/devices?project_id={project}")).await;
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);
    let response = get(app.router(), "/api/devices?project_id=999").await;
    assert!(body_json(response).await.as_array().unwrap().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_device_with_missing_references_rejected(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "Refs").await;

    let response = post_json(
        app.router(),
        "/api/devices",
        json!({"project_id": project, "name": "d", "payload_id": 77, "target_system_id": 88}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    let fields: Vec<_> = json["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(fields, vec!["payload_id", "target_system_id"]);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_toggle_flips_enabled(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "T").await;
    let device = common::create(
        &app,
        "/api/devices",
        json!({"project_id": project, "name": "d"}),
    )
    .await;

    let response = patch(app.router(), &format!("/api/devices/{device}/toggle")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["is_enabled"], false);

    let response = patch(app.router(), &format!("/api/devices/{device}/toggle")).await;
    assert_eq!(body_json(response).await["is_enabled"], true);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_deleting_payload_clears_device_reference(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "Detach").await;
    let payload = create_payload(&app, "p").await;
    let target = create_http_target(&app, "t", "http://collector.local/in").await;
    let device = create_ready_device(&app, project, "d", payload, target).await;

    let response = delete(app.router(), &format!("/api/payloads/{payload}")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let json = body_json(get(app.router(), &format!("/api/devices/{device}")).await).await;
    assert!(json["payload_id"].is_null());
    assert_eq!(json["is_simulation_ready"], false);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_device_test_generates_and_sends(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "Probe").await;
    let payload = create_payload(&app, "p").await;
    let target = create_http_target(&app, "t", "http://collector.local/in").await;
    let device = create_ready_device(&app, project, "d", payload, target).await;

    let response = common::post(app.router(), &format!("/api/devices/{device}/test")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    let level = json["payload"]["level"].as_i64().unwrap();
    assert!((1..=9).contains(&level));
    assert_eq!(json["target_info"]["type"], "http");
    assert_eq!(app.sent.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_payload_validate_reports_errors(pool: SqlitePool) {
    let app = common::build_test_app(pool);
    let response = post_json(
        app,
        "/api/payloads/validate",
        json!({
            "payload_type": "visual",
            "schema": [
                {"name": "a", "type": "number", "generator": {"kind": "random_int", "min": 5, "max": 1}},
                {"name": "a", "type": "number", "generator": {"kind": "fixed", "value": 1}}
            ]
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["valid"], false);
    assert!(json["errors"].as_array().unwrap().len() >= 2);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_invalid_payload_not_created(pool: SqlitePool) {
    let app = common::build_test_app(pool);
    let response = post_json(
        app,
        "/api/payloads",
        json!({"name": "bad", "payload_type": "visual"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["details"][0]["field"], "schema");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_python_payload_with_denied_import_rejected(pool: SqlitePool) {
    let app = common::build_test_app(pool);
    let response = post_json(
        app,
        "/api/payloads",
        json!({"name": "evil", "payload_type": "python",
               "python_code": "import os\nresult = {'x': os.getcwd()}"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["details"][0]["field"], "python_code");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_generate_fixed_payload_is_stable(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let payload = common::create(
        &app,
        "/api/payloads",
        json!({"name": "fixed", "payload_type": "visual", "schema": [
            {"name": "model", "type": "string", "generator": {"kind": "fixed", "value": "TX-1"}},
            {"name": "gain", "type": "number", "generator": {"kind": "fixed", "value": 2.5}}
        ]}),
    )
    .await;

    let uri = format!("/api/payloads/{payload}/generate");
    let first = body_json(common::post(app.router(), &uri).await).await;
    let second = body_json(common::post(app.router(), &uri).await).await;

    assert_eq!(first["success"], true);
    assert_eq!(first["payload"], json!({"model": "TX-1", "gain": 2.5}));
    assert_eq!(
        serde_json::to_string(&first["payload"]).unwrap(),
        serde_json::to_string(&second["payload"]).unwrap()
    );
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_generate_template_uses_request_metadata(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let payload = common::create(
        &app,
        "/api/payloads",
        json!({"name": "tpl", "payload_type": "visual", "schema": [
            {"name": "label", "type": "string",
             "generator": {"kind": "template", "template": "{{site}}/{{device_name}}"}}
        ]}),
    )
    .await;

    let response = post_json(
        app.router(),
        &format!("/api/payloads/{payload}/generate"),
        json!({"device_name": "pump-3", "metadata": {"site": "plant-a"}}),
    )
    .await;
    let json = body_json(response).await;
    assert_eq!(json["payload"]["label"], "plant-a/pump-3");
}

// ---------------------------------------------------------------------------
// Target systems
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_target_types_and_schema(pool: SqlitePool) {
    let app = TestApp::new(pool);

    let json = body_json(get(app.router(), "/api/target-systems/types").await).await;
    let types: Vec<_> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(types, vec!["http", "mqtt", "kafka", "websocket", "ftp", "pubsub"]);

    let schema = body_json(get(app.router(), "/api/target-systems/types/mqtt/schema").await).await;
    assert_eq!(schema["type"], "object");
    assert!(schema["required"].as_array().unwrap().contains(&json!("topic")));
    assert_eq!(schema["properties"]["qos"]["enum"], json!([0, 1, 2]));

    let response = get(app.router(), "/api/target-systems/types/smtp/schema").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_target_config_is_normalized(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let response = post_json(
        app.router(),
        "/api/target-systems",
        json!({"name": "api", "system_type": "http", "config": {"url": "https://collector.local/in"}}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["config"]["method"], "POST");
    assert_eq!(json["config"]["timeout"], 30);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_target_config_errors_listed_per_field(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let response = post_json(
        app.router(),
        "/api/target-systems",
        json!({"name": "k", "system_type": "kafka", "config": {}}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    let fields: Vec<_> = json["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap().to_string())
        .collect();
    assert!(fields.contains(&"bootstrap_servers".to_string()));
    assert!(fields.contains(&"topic".to_string()));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_connection_to_unreachable_target_reports_failure(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let target = create_http_target(&app, "down", "http://unreachable.invalid/in").await;

    let response = common::post(
        app.router(),
        &format!("/api/target-systems/{target}/test-connection"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert!(!json["error"].as_str().unwrap().is_empty());
    assert_eq!(json["error_kind"], "transient_network_error");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_connection_config_probe_before_save(pool: SqlitePool) {
    let app = TestApp::new(pool);

    let ok = post_json(
        app.router(),
        "/api/target-systems/test-connection-config",
        json!({"system_type": "http", "config": {"url": "http://collector.local/in"}}),
    )
    .await;
    assert_eq!(body_json(ok).await["success"], true);

    let invalid = post_json(
        app.router(),
        "/api/target-systems/test-connection-config",
        json!({"system_type": "websocket", "config": {"url": "http://not-a-ws"}}),
    )
    .await;
    let json = body_json(invalid).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error_kind"], "config_error");
}
