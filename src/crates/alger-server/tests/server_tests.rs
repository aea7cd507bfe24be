//! Integration tests for the WebSocket server.
//!
//! Each test boots a real server on an ephemeral port with a temp-file
//! SQLite database and drives it with a tokio-tungstenite client, mirroring
//! how the frontend talks to the service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value as Json};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use alger_dag::NodeRegistry;
use alger_server::config::LimitsConfig;
use alger_server::db::models::ExecutionStatus;
use alger_server::db::repositories::ErrorLogRepository;
use alger_server::db::{
    DatabaseConnection, ExecutionDraft, ExecutionOutput, ExecutionSource, PersistenceGateway,
    SqliteGateway, UserDefaults,
};
use alger_server::{AlgerServer, AppState, ServerConfig, ServerState};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    app: AppState,
    sqlite: SqliteGateway,
    _dir: TempDir,
}

async fn start_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let mut config = ServerConfig::default();
    config.listen.host = "127.0.0.1".to_string();
    config.listen.port = 0;
    config.database.path = dir
        .path()
        .join("alger.sqlite3")
        .to_string_lossy()
        .to_string();

    let db = DatabaseConnection::new(&config.database_url()).await.unwrap();
    db.run_migrations().await.unwrap();
    let sqlite = SqliteGateway::new(db);
    sqlite.seed_defaults().await.unwrap();

    let state = Arc::new(ServerState::new(&LimitsConfig::default()));
    let app = AppState {
        config: Arc::new(config),
        gateway: Arc::new(sqlite.clone()),
        registry: Arc::new(NodeRegistry::with_builtins()),
        state,
    };
    let server = AlgerServer::bind(app.clone()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });

    TestServer {
        addr,
        app,
        sqlite,
        _dir: dir,
    }
}

async fn connect_with(addr: SocketAddr, query: &str, subprotocol: Option<&'static str>) -> WsClient {
    let url = format!("ws://{addr}/{query}");
    let mut request = url.into_client_request().unwrap();
    if let Some(subprotocol) = subprotocol {
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(subprotocol));
    }
    let (ws, _response) = connect_async(request).await.unwrap();
    ws
}

async fn connect(addr: SocketAddr) -> WsClient {
    connect_with(addr, "?username=admin&password=admin", Some("alger")).await
}

/// Receive the next text frame, with its `content` string decoded in place.
async fn recv_frame(ws: &mut WsClient) -> Json {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = message {
            let mut frame: Json = serde_json::from_str(&text).unwrap();
            let content = frame["content"]
                .as_str()
                .and_then(|raw| serde_json::from_str::<Json>(raw).ok())
                .unwrap_or_else(|| json!({}));
            frame["content"] = content;
            return frame;
        }
    }
}

async fn send_frame(ws: &mut WsClient, id: i64, request_id: i64, type_code: u16, content: Json) {
    let payload = json!({
        "id": id,
        "requestId": request_id,
        "type": type_code,
        "content": content.to_string(),
    });
    ws.send(Message::Text(payload.to_string())).await.unwrap();
}

/// Send a request and read exactly one response; returns it plus the next
/// client message id.
async fn exchange(ws: &mut WsClient, id: i64, type_code: u16, content: Json) -> (Json, i64) {
    send_frame(ws, id, 0, type_code, content).await;
    let response = recv_frame(ws).await;
    let next = response["id"].as_i64().unwrap() + 1;
    (response, next)
}

async fn login(ws: &mut WsClient) -> i64 {
    let (response, next) = exchange(
        ws,
        1,
        100,
        json!({"username": "admin", "password": "admin"}),
    )
    .await;
    assert_eq!(response["type"], 200);
    assert_eq!(response["requestId"], 1);
    next
}

#[tokio::test]
async fn login_then_user_data() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    let next = login(&mut ws).await;
    assert_eq!(next, 3);

    let (response, _) = exchange(&mut ws, next, 101, json!({"userId": "admin"})).await;
    assert_eq!(response["type"], 201);
    let user = &response["content"]["user"];
    assert_eq!(user["id"], "admin");
    assert!(user["roles"].as_array().unwrap().contains(&json!("admin")));
}

#[tokio::test]
async fn wrong_credentials_close_with_4401() {
    let server = start_server().await;
    let mut ws = connect_with(
        server.addr,
        "?username=admin&password=wrong",
        Some("alger"),
    )
    .await;

    let message = ws.next().await.unwrap().unwrap();
    match message {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4401),
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_subprotocol_closes_with_4406() {
    let server = start_server().await;
    let mut ws = connect_with(server.addr, "?username=admin&password=admin", None).await;

    let message = ws.next().await.unwrap().unwrap();
    match message {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4406),
        other => panic!("expected a close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_type_triggers_396() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    let next = login(&mut ws).await;
    let (response, _) = exchange(&mut ws, next, 150, json!({})).await;
    assert_eq!(response["type"], 396);
    assert_eq!(response["requestId"], next);
}

#[tokio::test]
async fn out_of_order_message_id_returns_395() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    let next = login(&mut ws).await;
    let (response, recovered_next) =
        exchange(&mut ws, next + 1, 101, json!({"userId": "admin"})).await;
    assert_eq!(response["type"], 395);
    assert_eq!(response["content"]["expectedId"], next);
    assert_eq!(response["content"]["receivedId"], next + 1);
    assert_eq!(response["content"]["error"], "incorrect message id");

    // The counter was forced forward, so the recovered id is accepted.
    let (response, _) = exchange(&mut ws, recovered_next, 101, json!({"userId": "admin"})).await;
    assert_eq!(response["type"], 201);
}

#[tokio::test]
async fn malformed_frame_yields_protocol_error() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    ws.send(Message::Text("{not json".to_string())).await.unwrap();
    let response = recv_frame(&mut ws).await;
    assert_eq!(response["type"], 396);
    assert_eq!(response["id"], 1);

    // The parse error consumed id 1; the connection keeps working.
    let (response, _) = exchange(
        &mut ws,
        2,
        100,
        json!({"username": "admin", "password": "admin"}),
    )
    .await;
    assert_eq!(response["type"], 200);
}

#[tokio::test]
async fn execute_from_db_streams_status_and_persists() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    let next = login(&mut ws).await;
    let (ack, _) = exchange(&mut ws, next, 103, json!({"pipelineId": "demo"})).await;
    assert_eq!(ack["type"], 203);
    assert_eq!(ack["content"]["status"], "pipeline-execution-started");
    let execution_id = ack["content"]["executionId"].as_str().unwrap().to_string();

    let mut status_frames = Vec::new();
    let mut seen_ids = vec![ack["id"].as_i64().unwrap()];
    let terminal = loop {
        let frame = recv_frame(&mut ws).await;
        seen_ids.push(frame["id"].as_i64().unwrap());
        match frame["type"].as_i64().unwrap() {
            205 => status_frames.push(frame),
            207 => break frame,
            other => panic!("unexpected frame type {other}"),
        }
    };

    // The demo pipeline has six nodes; each completion streams one frame.
    assert_eq!(status_frames.len(), 6);
    for frame in &status_frames {
        assert_eq!(frame["requestId"], next);
        assert_eq!(frame["content"]["executionId"].as_str().unwrap(), execution_id);
        assert_eq!(frame["content"]["status"], "node-finished");
        assert_eq!(frame["content"]["pipelineId"], "demo");
    }

    assert_eq!(terminal["content"]["status"], "success");
    let sinks = terminal["content"]["summary"]["sinks"].as_object().unwrap();
    assert!(!sinks.is_empty());

    // Outbound ids are gapless and strictly increasing.
    for pair in seen_ids.windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }

    // Output retrieval returns the decoded summary.
    let request_id = seen_ids.last().unwrap() + 1;
    let (output, _) = exchange(
        &mut ws,
        request_id,
        107,
        json!({"executionId": execution_id}),
    )
    .await;
    assert_eq!(output["type"], 207);
    assert_eq!(
        output["content"]["file"].as_str().unwrap(),
        format!("{execution_id}.json")
    );
    assert!(output["content"]["content"]["sinks"].is_object());

    let stored = server.app.gateway.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status(), ExecutionStatus::Finished);
    assert!(stored.completed_at.is_some());
    assert_eq!(server.app.gateway.count_active_executions().await.unwrap(), 0);
}

#[tokio::test]
async fn failing_graph_reports_arity_error() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    let next = login(&mut ws).await;
    let graph = json!({
        "nodes": [
            {"id": "ds", "kind": "dataset", "params": {"shape": [1, 4, 4]}},
            {"id": "cat", "kind": "concat"},
        ],
        "edges": [{"source": "ds", "target": "cat"}],
    });
    let (ack, _) = exchange(&mut ws, next, 104, json!({"graph": graph})).await;
    assert_eq!(ack["type"], 204);
    let execution_id = ack["content"]["executionId"].as_str().unwrap().to_string();

    let terminal = recv_frame(&mut ws).await;
    assert_eq!(terminal["type"], 307);
    assert_eq!(terminal["content"]["status"], "error");
    assert!(terminal["content"]["error"].as_str().unwrap().contains("arity"));

    let stored = server.app.gateway.get_execution(&execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status(), ExecutionStatus::Failed);
    assert!(stored.completed_at.is_some());

    let errors = ErrorLogRepository::list(server.sqlite.pool()).await.unwrap();
    assert!(errors.iter().any(|e| e.execution_id.as_deref() == Some(execution_id.as_str())));
}

#[tokio::test]
async fn node_failure_emits_305_then_307() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;

    let next = login(&mut ws).await;
    // The filter node rejects even kernels at execution time, after the
    // dataset node has already completed.
    let graph = json!({
        "nodes": [
            {"id": "ds", "kind": "dataset", "params": {"shape": [1, 4, 4]}},
            {"id": "bad", "kind": "filter", "params": {"kernelSize": 2}},
        ],
        "edges": [{"source": "ds", "target": "bad"}],
    });
    let (ack, _) = exchange(&mut ws, next, 104, json!({"graph": graph})).await;
    assert_eq!(ack["type"], 204);

    let first = recv_frame(&mut ws).await;
    assert_eq!(first["type"], 205);
    assert_eq!(first["content"]["nodeId"], "ds");

    let second = recv_frame(&mut ws).await;
    assert_eq!(second["type"], 305);
    assert_eq!(second["content"]["nodeId"], "bad");
    assert_eq!(second["content"]["status"], "node-error");
    assert!(second["content"]["error"].as_str().unwrap().contains("odd"));

    let terminal = recv_frame(&mut ws).await;
    assert_eq!(terminal["type"], 307);
    assert_eq!(terminal["content"]["status"], "error");
}

#[tokio::test]
async fn stop_marks_running_execution_stopped() {
    let server = start_server().await;
    let admin = server
        .app
        .gateway
        .ensure_user("admin", &UserDefaults::admin())
        .await
        .unwrap();
    let execution = server
        .app
        .gateway
        .create_execution(ExecutionDraft {
            pipeline_id: None,
            source: ExecutionSource::Payload,
            graph: Some(json!({"nodes": [], "edges": []})),
            params: json!({}),
            requested_by: admin.id,
            status: ExecutionStatus::Running,
            output: ExecutionOutput::default(),
        })
        .await
        .unwrap();

    let mut ws = connect(server.addr).await;
    let next = login(&mut ws).await;
    let (response, next) = exchange(
        &mut ws,
        next,
        106,
        json!({"executionId": execution.id}),
    )
    .await;
    assert_eq!(response["type"], 206);
    assert_eq!(response["content"]["status"], "stopped");

    let stored = server.app.gateway.get_execution(&execution.id).await.unwrap().unwrap();
    assert_eq!(stored.status(), ExecutionStatus::Stopped);
    assert!(stored.completed_at.is_some());

    // Stopping an already-terminal execution is idempotent-allowed.
    let (response, _) = exchange(
        &mut ws,
        next,
        106,
        json!({"executionId": execution.id}),
    )
    .await;
    assert_eq!(response["type"], 206);
    let still = server.app.gateway.get_execution(&execution.id).await.unwrap().unwrap();
    assert_eq!(still.status(), ExecutionStatus::Stopped);
}

#[tokio::test]
async fn admission_gates_reject_in_order() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;
    let next = login(&mut ws).await;

    server.app.state.set_maintenance_mode(true);
    let (response, next) = exchange(&mut ws, next, 103, json!({"pipelineId": "demo"})).await;
    assert_eq!(response["type"], 399);
    server.app.state.set_maintenance_mode(false);

    server.app.state.set_executions_halted(true);
    let (response, next) = exchange(&mut ws, next, 103, json!({"pipelineId": "demo"})).await;
    assert_eq!(response["type"], 398);
    server.app.state.set_executions_halted(false);

    // Fill the single execution slot with a synthetic running row.
    let admin = server
        .app
        .gateway
        .ensure_user("admin", &UserDefaults::admin())
        .await
        .unwrap();
    server
        .app
        .gateway
        .create_execution(ExecutionDraft {
            pipeline_id: None,
            source: ExecutionSource::Payload,
            graph: None,
            params: json!({}),
            requested_by: admin.id,
            status: ExecutionStatus::Running,
            output: ExecutionOutput::default(),
        })
        .await
        .unwrap();

    let (response, _) = exchange(&mut ws, next, 103, json!({"pipelineId": "demo"})).await;
    assert_eq!(response["type"], 397);
    assert_eq!(response["content"]["activeExecutions"], 1);
}

#[tokio::test]
async fn list_pipelines_returns_seeded_demo() {
    let server = start_server().await;
    let mut ws = connect(server.addr).await;
    let next = login(&mut ws).await;

    let (response, _) = exchange(&mut ws, next, 102, json!({})).await;
    assert_eq!(response["type"], 202);
    let pipelines = response["content"]["pipelines"].as_array().unwrap();
    assert!(pipelines.iter().any(|p| p["id"] == "demo"));
}

#[tokio::test]
async fn request_output_while_running_returns_still_running() {
    let server = start_server().await;
    let admin = server
        .app
        .gateway
        .ensure_user("admin", &UserDefaults::admin())
        .await
        .unwrap();
    let execution = server
        .app
        .gateway
        .create_execution(ExecutionDraft {
            pipeline_id: None,
            source: ExecutionSource::Payload,
            graph: None,
            params: json!({}),
            requested_by: admin.id,
            status: ExecutionStatus::Running,
            output: ExecutionOutput::default(),
        })
        .await
        .unwrap();

    let mut ws = connect(server.addr).await;
    let next = login(&mut ws).await;
    let (response, _) = exchange(
        &mut ws,
        next,
        107,
        json!({"executionId": execution.id}),
    )
    .await;
    assert_eq!(response["type"], 307);
    assert_eq!(response["content"]["error"], "execution is still running");
}
