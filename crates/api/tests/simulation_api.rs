//! HTTP-level integration tests for the simulation lifecycle.
//!
//! Every test shares one [`TestApp`] across requests so the registry keeps
//! its supervisors between calls.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{
    body_json, create, create_http_target, create_payload, create_project, create_ready_device,
    delete, get, post, put_json, TestApp,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;

/// Poll until the in-memory connectors have received `count` payloads.
async fn wait_for_sent(app: &TestApp, count: usize) {
    for _ in 0..100 {
        if app.sent.lock().unwrap().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("expected at least {count} sent payloads");
}

/// Poll the log endpoint until an entry of `event_type` shows up.
async fn wait_for_log(app: &TestApp, project_id: i64, event_type: &str) -> Value {
    for _ in 0..100 {
        let uri = format!("/api/simulation/logs?project_id={project_id}");
        let logs = body_json(get(app.router(), &uri).await).await;
        if let Some(entry) = logs
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["event_type"] == event_type)
        {
            return entry.clone();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no {event_type} log entry for project {project_id}");
}

/// A project with one ready device sending to a reachable HTTP target.
async fn ready_project(app: &TestApp, name: &str) -> (i64, i64) {
    let project = create_project(app, name).await;
    let payload = create_payload(app, &format!("{name}-payload")).await;
    let target = create_http_target(app, &format!("{name}-target"), "http://collector.local/in").await;
    let device = create_ready_device(app, project, "sensor-1", payload, target).await;
    (project, device)
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_start_status_stop(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let (project, device) = ready_project(&app, "Lifecycle").await;

    let response = post(app.router(), &format!("/api/simulation/{project}/start")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["started"], 1);
    assert_eq!(json["total_devices"], 1);
    assert!(json["failed"].as_array().unwrap().is_empty());

    wait_for_sent(&app, 1).await;

    let status = body_json(get(app.router(), &format!("/api/simulation/{project}/status")).await).await;
    assert_eq!(status["is_running"], true);
    assert_eq!(status["active_devices"], 1);
    assert_eq!(status["devices"][0]["device_id"], device);
    assert_eq!(status["devices"][0]["phase"], "running");

    let device_json = body_json(get(app.router(), &format!("/api/devices/{device}")).await).await;
    assert_eq!(device_json["is_running"], true);

    let response = post(app.router(), &format!("/api/simulation/{project}/stop")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["was_running"], true);
    assert_eq!(json["stopped_devices"], 1);

    let status = body_json(get(app.router(), &format!("/api/simulation/{project}/status")).await).await;
    assert_eq!(status["is_running"], false);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_payloads_reach_the_target(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let (project, _) = ready_project(&app, "Delivery").await;

    post(app.router(), &format!("/api/simulation/{project}/start")).await;
    wait_for_sent(&app, 1).await;
    post(app.router(), &format!("/api/simulation/{project}/stop")).await;

    let sent = app.sent.lock().unwrap().clone();
    let level = sent[0]["level"].as_i64().unwrap();
    assert!((1..=9).contains(&level));
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_start_without_ready_devices_returns_409(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "Empty").await;
    create(&app, "/api/devices", json!({"project_id": project, "name": "bare"})).await;

    let response = post(app.router(), &format!("/api/simulation/{project}/start")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_SIMULATION_READY");
    assert_eq!(json["details"]["skipped_devices"][0]["device_name"], "bare");
    assert!(app.sent.lock().unwrap().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_second_start_returns_409(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let (project, _) = ready_project(&app, "Twice").await;

    let first = post(app.router(), &format!("/api/simulation/{project}/start")).await;
    assert_eq!(first.status(), StatusCode::OK);
    let second = post(app.router(), &format!("/api/simulation/{project}/start")).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["code"], "CONFLICT");

    post(app.router(), &format!("/api/simulation/{project}/stop")).await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_stop_idle_project_is_noop(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "Idle").await;

    for _ in 0..2 {
        let response = post(app.router(), &format!("/api/simulation/{project}/stop")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["was_running"], false);
        assert_eq!(json["message"], "Simulation was not running");
    }

    let response = post(app.router(), "/api/simulation/999/stop").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_unreachable_target_reported_as_start_failure(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "Mixed").await;
    let payload = create_payload(&app, "p").await;
    let good = create_http_target(&app, "good", "http://collector.local/in").await;
    let bad = create_http_target(&app, "bad", "http://unreachable.local/in").await;
    create_ready_device(&app, project, "ok", payload, good).await;
    create_ready_device(&app, project, "down", payload, bad).await;

    let json = body_json(post(app.router(), &format!("/api/simulation/{project}/start")).await).await;
    assert_eq!(json["started"], 1);
    assert_eq!(json["failed"][0]["device_name"], "down");

    let status = body_json(get(app.router(), &format!("/api/simulation/{project}/status")).await).await;
    assert_eq!(status["is_running"], true);
    assert_eq!(status["active_devices"], 1);

    post(app.router(), &format!("/api/simulation/{project}/stop")).await;
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_moving_device_stops_its_runner(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let (project, device) = ready_project(&app, "Source").await;
    let other = create_project(&app, "Destination").await;

    post(app.router(), &format!("/api/simulation/{project}/start")).await;
    wait_for_sent(&app, 1).await;

    let response = put_json(
        app.router(),
        &format!("/api/devices/{device}"),
        json!({"project_id": other}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["project_id"], other);
    assert_eq!(json["is_running"], false);

    let status = body_json(get(app.router(), &format!("/api/simulation/{project}/status")).await).await;
    assert_eq!(status["is_running"], false);

    let dest = body_json(get(app.router(), &format!("/api/simulation/{other}/status")).await).await;
    assert_eq!(dest["is_running"], false);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_emergency_stop_halts_every_project(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let (first, _) = ready_project(&app, "One").await;
    let (second, _) = ready_project(&app, "Two").await;

    post(app.router(), &format!("/api/simulation/{first}/start")).await;
    post(app.router(), &format!("/api/simulation/{second}/start")).await;

    let overview = body_json(get(app.router(), "/api/simulation/status").await).await;
    assert_eq!(overview["active_projects"], 2);

    let response = post(app.router(), "/api/simulation/emergency-stop").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["stopped_projects"], json!([first, second]));
    assert!(json["failed_projects"].as_array().unwrap().is_empty());
    assert_eq!(json["stopped_devices"], 2);

    let overview = body_json(get(app.router(), "/api/simulation/status").await).await;
    assert_eq!(overview["active_projects"], 0);

    let again = body_json(post(app.router(), "/api/simulation/emergency-stop").await).await;
    assert!(again["stopped_projects"].as_array().unwrap().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_logs_record_lifecycle_and_can_be_cleared(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let (project, device) = ready_project(&app, "Logged").await;

    post(app.router(), &format!("/api/simulation/{project}/start")).await;
    let started = wait_for_log(&app, project, "started").await;
    assert_eq!(started["device_id"], device);
    let sent = wait_for_log(&app, project, "message_sent").await;
    assert!(sent["payload"]["level"].is_number());

    post(app.router(), &format!("/api/simulation/{project}/stop")).await;
    wait_for_log(&app, project, "stopped").await;

    let limited = body_json(
        get(app.router(), &format!("/api/simulation/logs?project_id={project}&limit=1")).await,
    )
    .await;
    assert_eq!(limited.as_array().unwrap().len(), 1);

    let response = delete(app.router(), &format!("/api/simulation/{project}/logs")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let logs = body_json(
        get(app.router(), &format!("/api/simulation/logs?project_id={project}")).await,
    )
    .await;
    assert!(logs.as_array().unwrap().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_deleting_running_project_stops_it(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let (project, device) = ready_project(&app, "Doomed").await;

    post(app.router(), &format!("/api/simulation/{project}/start")).await;
    wait_for_sent(&app, 1).await;

    let response = delete(app.router(), &format!("/api/projects/{project}")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(!app.state.registry.is_running(project).await);
    let response = get(app.router(), &format!("/api/devices/{device}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_disabling_running_device_stops_runner(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let (project, device) = ready_project(&app, "Toggle").await;

    post(app.router(), &format!("/api/simulation/{project}/start")).await;
    wait_for_sent(&app, 1).await;

    let json = body_json(common::patch(app.router(), &format!("/api/devices/{device}/toggle")).await).await;
    assert_eq!(json["is_enabled"], false);
    assert_eq!(json["is_running"], false);
    assert!(!app.state.registry.is_running(project).await);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_device_test_against_unreachable_target(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "Probe").await;
    let payload = create_payload(&app, "p").await;
    let target = create_http_target(&app, "down", "http://unreachable.local/in").await;
    let device = create_ready_device(&app, project, "d", payload, target).await;

    let json = body_json(post(app.router(), &format!("/api/devices/{device}/test")).await).await;
    assert_eq!(json["success"], false);
    assert!(json["payload"]["level"].is_number());
    assert!(!json["error"].as_str().unwrap().is_empty());
    assert!(app.sent.lock().unwrap().is_empty());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_deleting_crashed_project_unregisters_it(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let project = create_project(&app, "AllCrash").await;
    let payload = create_payload(&app, "p").await;
    let target = create_http_target(&app, "down", "http://unreachable.local/in").await;
    create_ready_device(&app, project, "d", payload, target).await;

    let json = body_json(post(app.router(), &format!("/api/simulation/{project}/start")).await).await;
    assert_eq!(json["started"], 0);
    assert!(!app.state.registry.is_running(project).await);
    assert!(app.state.registry.status(project).await.is_some());

    let response = delete(app.router(), &format!("/api/projects/{project}")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert!(app.state.registry.status(project).await.is_none());
    let overview = body_json(get(app.router(), "/api/simulation/status").await).await;
    assert!(overview["projects"].as_array().unwrap().is_empty());
}
