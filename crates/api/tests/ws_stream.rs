//! End-to-end WebSocket tests over a real TCP listener.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    body_json, create_http_target, create_payload, create_project, create_ready_device, get, post,
    TestApp,
};
use futures::StreamExt;
use iotsim_api::ws::EventForwarder;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Serve the app on an ephemeral port and forward bus events to sockets.
async fn serve(app: &TestApp, cancel: &CancellationToken) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::spawn(EventForwarder::run(
        Arc::clone(&app.state.ws_manager),
        Arc::clone(&app.state.registry),
        app.state.event_bus.subscribe(),
        cancel.clone(),
    ));
    addr
}

/// Give the server time to register a freshly upgraded socket.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Read text frames until one satisfies `pred`.
async fn next_matching<S>(stream: &mut S, pred: impl Fn(&Value) -> bool) -> Value
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = stream.next().await {
            if let Message::Text(text) = frame.unwrap() {
                let json: Value = serde_json::from_str(&text).unwrap();
                if pred(&json) {
                    return json;
                }
            }
        }
        panic!("socket closed before a matching message arrived");
    })
    .await;
    found.expect("timed out waiting for WebSocket message")
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_project_socket_streams_logs(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let cancel = CancellationToken::new();
    let addr = serve(&app, &cancel).await;

    let project = create_project(&app, "Streamed").await;
    let payload = create_payload(&app, "p").await;
    let target = create_http_target(&app, "t", "http://collector.local/in").await;
    let device = create_ready_device(&app, project, "sensor", payload, target).await;

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/simulation/{project}/logs"))
            .await
            .unwrap();
    settle().await;

    let response = post(app.router(), &format!("/api/simulation/{project}/start")).await;
    assert_eq!(body_json(response).await["started"], 1);

    let sent = next_matching(&mut socket, |m| {
        m["type"] == "simulation_log" && m["data"]["event_type"] == "message_sent"
    })
    .await;
    assert_eq!(sent["data"]["device_id"], device);
    assert!(sent["data"]["payload"]["level"].is_number());

    post(app.router(), &format!("/api/simulation/{project}/stop")).await;
    cancel.cancel();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_late_subscriber_receives_history(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let cancel = CancellationToken::new();
    let addr = serve(&app, &cancel).await;

    let project = create_project(&app, "Replayed").await;
    let payload = create_payload(&app, "p").await;
    let target = create_http_target(&app, "t", "http://collector.local/in").await;
    create_ready_device(&app, project, "sensor", payload, target).await;

    post(app.router(), &format!("/api/simulation/{project}/start")).await;
    for _ in 0..100 {
        let uri = format!("/api/simulation/logs?project_id={project}");
        let logs = body_json(get(app.router(), &uri).await).await;
        if logs.as_array().unwrap().iter().any(|e| e["event_type"] == "message_sent") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{addr}/simulation/{project}/logs"))
            .await
            .unwrap();

    let started = next_matching(&mut socket, |m| {
        m["type"] == "simulation_log" && m["data"]["event_type"] == "started"
    })
    .await;
    assert_eq!(started["data"]["project_id"], project);

    let status = next_matching(&mut socket, |m| m["type"] == "project_status_update").await;
    assert_eq!(status["data"]["is_running"], true);

    post(app.router(), &format!("/api/simulation/{project}/stop")).await;
    cancel.cancel();
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_global_socket_sees_device_lifecycle(pool: SqlitePool) {
    let app = TestApp::new(pool);
    let cancel = CancellationToken::new();
    let addr = serve(&app, &cancel).await;

    let project = create_project(&app, "Global").await;
    let payload = create_payload(&app, "p").await;
    let target = create_http_target(&app, "t", "http://collector.local/in").await;
    let device = create_ready_device(&app, project, "sensor", payload, target).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/simulation"))
        .await
        .unwrap();
    settle().await;

    post(app.router(), &format!("/api/simulation/{project}/start")).await;

    let update = next_matching(&mut socket, |m| {
        m["type"] == "device_status_update" && m["data"]["event_type"] == "started"
    })
    .await;
    assert_eq!(update["data"]["device_id"], device);
    assert_eq!(update["data"]["project_id"], project);

    post(app.router(), &format!("/api/simulation/{project}/stop")).await;
    cancel.cancel();
}
