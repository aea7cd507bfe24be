//! WebSocket server: handshake, per-connection state machine.
//!
//! The handshake captures the request path and headers, negotiates the
//! `alger` sub-protocol, and closes with 4401/4406 on credential or
//! protocol failures. Each accepted connection gets a user/connection/
//! conversation triple, a dispatcher for ordered sends, and a recv loop
//! that enforces the monotonic-id discipline before routing.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use url::Url;

use crate::context::RequestContext;
use crate::db::{ClientInfo, Direction, MessageRecord, UserDefaults};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::handlers::{route_message, AppState};
use crate::protocol::codes::{CLOSE_AUTH_FAILED, CLOSE_BAD_SUBPROTOCOL, CODE_UNKNOWN_TYPE};
use crate::protocol::Frame;
use crate::runner::run_execution;

/// The listening server.
pub struct AlgerServer {
    listener: TcpListener,
    app: AppState,
}

impl AlgerServer {
    /// Bind the configured listen address.
    pub async fn bind(app: AppState) -> Result<Self> {
        let addr = format!("{}:{}", app.config.listen.host, app.config.listen.port);
        let listener = TcpListener::bind(&addr).await?;
        Ok(Self { listener, app })
    }

    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the surrounding task is cancelled.
    pub async fn run(self) -> Result<()> {
        tracing::info!(addr = %self.local_addr()?, "alger server listening");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let app = self.app.clone();
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, peer, app).await {
                    tracing::warn!(peer = %peer, error = %err, "connection ended with error");
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, app: AppState) -> Result<()> {
    let subprotocol = app.config.auth.subprotocol.clone();
    let mut path = String::from("/");
    let mut user_agent: Option<String> = None;
    let mut origin: Option<String> = None;
    let mut negotiated = false;

    let callback = |request: &Request,
                    mut response: Response|
     -> std::result::Result<Response, ErrorResponse> {
        path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| request.uri().to_string());
        user_agent = header_string(request, "User-Agent");
        origin = header_string(request, "Origin");
        if offers_subprotocol(request, &subprotocol) {
            if let Ok(value) = HeaderValue::from_str(&subprotocol) {
                response.headers_mut().append("Sec-WebSocket-Protocol", value);
                negotiated = true;
            }
        }
        Ok(response)
    };
    let mut ws = accept_hdr_async(stream, callback).await?;

    if !credentials_match(&path, &app.config.auth.username, &app.config.auth.password) {
        tracing::warn!(peer = %peer, "authentication failed");
        close_with(&mut ws, CLOSE_AUTH_FAILED, "Invalid username/password pair").await;
        return Ok(());
    }
    if !negotiated {
        tracing::warn!(peer = %peer, "client did not offer the required sub-protocol");
        close_with(&mut ws, CLOSE_BAD_SUBPROTOCOL, "Subprotocol 'alger' required").await;
        return Ok(());
    }

    let user = app
        .gateway
        .ensure_user(&app.config.auth.username, &UserDefaults::admin())
        .await?;
    let client = ClientInfo {
        ip: Some(peer.ip().to_string()),
        port: Some(i64::from(peer.port())),
        user_agent,
        origin,
        path: Some(path.clone()),
    };
    let connection_id = app.gateway.open_connection(&user.id, &client).await?;
    let conversation_id = app.gateway.open_conversation(&user.id, &connection_id).await?;

    let (sink, mut inbound) = ws.split();
    let dispatcher = Arc::new(Dispatcher::new(
        sink,
        app.gateway.clone(),
        conversation_id.clone(),
    ));
    let ctx = RequestContext {
        user_id: user.id.clone(),
        username: user.username.clone(),
        connection_id: connection_id.clone(),
        conversation_id: conversation_id.clone(),
        client_ip: client.ip.clone(),
        dispatcher,
    };

    tracing::info!(peer = %peer, user = %ctx.username, "client connected");
    let loop_result = connection_loop(&mut inbound, &ctx, &app).await;

    if let Err(err) = app.gateway.close_conversation(&conversation_id).await {
        tracing::warn!(error = %err, "failed to close conversation row");
    }
    if let Err(err) = app.gateway.close_connection(&connection_id).await {
        tracing::warn!(error = %err, "failed to close connection row");
    }
    loop_result
}

async fn connection_loop(
    inbound: &mut SplitStream<WebSocketStream<TcpStream>>,
    ctx: &RequestContext,
    app: &AppState,
) -> Result<()> {
    while let Some(message) = inbound.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::info!(error = %err, "client disconnected");
                break;
            }
        };
        match message {
            Message::Text(text) => handle_frame(&text, ctx, app).await?,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => handle_frame(&text, ctx, app).await?,
                Err(_) => {
                    ctx.dispatcher
                        .send_with_error(
                            0,
                            CODE_UNKNOWN_TYPE,
                            json!({"error": "Payload is not valid JSON"}),
                            Some("Payload is not valid JSON".to_string()),
                        )
                        .await?;
                }
            },
            Message::Close(_) => {
                tracing::info!("client closed the connection");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn handle_frame(raw: &str, ctx: &RequestContext, app: &AppState) -> Result<()> {
    let frame = match Frame::parse(raw, CODE_UNKNOWN_TYPE) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::error!(error = %err, "protocol violation");
            ctx.dispatcher
                .send_with_error(
                    0,
                    err.error_code,
                    json!({"error": err.to_string()}),
                    Some(err.to_string()),
                )
                .await?;
            return Ok(());
        }
    };

    log_incoming(ctx, app, &frame).await;

    if !ctx.dispatcher.accept_inbound(&frame).await? {
        return Ok(());
    }

    let outcome = route_message(&frame, ctx, app).await;
    ctx.dispatcher
        .send(frame.id, outcome.type_code, outcome.content)
        .await?;

    if let Some(task) = outcome.background {
        let ctx = ctx.clone();
        let app = app.clone();
        tokio::spawn(run_execution(task, ctx, app));
    }
    Ok(())
}

async fn log_incoming(ctx: &RequestContext, app: &AppState, frame: &Frame) {
    let record = MessageRecord {
        direction: Direction::Incoming,
        message_id: Some(frame.id),
        request_id: Some(frame.request_id),
        type_code: Some(frame.type_code as i64),
        status_code: None,
        payload: Some(frame.to_log_json()),
        error: None,
    };
    if let Err(err) = app.gateway.log_message(&ctx.conversation_id, record).await {
        tracing::warn!(error = %err, "failed to log inbound frame");
    }
}

fn header_string(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn offers_subprotocol(request: &Request, subprotocol: &str) -> bool {
    request
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|value| value.to_str().ok())
        .map(|offered| offered.split(',').any(|p| p.trim() == subprotocol))
        .unwrap_or(false)
}

/// Check the query-string credential pair carried on the handshake path.
fn credentials_match(path: &str, username: &str, password: &str) -> bool {
    let Ok(url) = Url::parse(&format!("ws://localhost{path}")) else {
        return false;
    };
    let mut user_ok = false;
    let mut pass_ok = false;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "username" => user_ok = value == username,
            "password" => pass_ok = value == password,
            _ => {}
        }
    }
    user_ok && pass_ok
}

async fn close_with(ws: &mut WebSocketStream<TcpStream>, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    };
    if let Err(err) = ws.close(Some(frame)).await {
        tracing::debug!(error = %err, "close handshake failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_match() {
        assert!(credentials_match(
            "/?username=admin&password=admin",
            "admin",
            "admin"
        ));
        assert!(!credentials_match("/?username=admin", "admin", "admin"));
        assert!(!credentials_match(
            "/?username=admin&password=wrong",
            "admin",
            "admin"
        ));
        assert!(!credentials_match("/", "admin", "admin"));
    }

    #[test]
    fn test_offers_subprotocol() {
        let request = Request::builder()
            .uri("/")
            .header("Sec-WebSocket-Protocol", "chat, alger")
            .body(())
            .unwrap();
        assert!(offers_subprotocol(&request, "alger"));
        assert!(!offers_subprotocol(&request, "other"));

        let bare = Request::builder().uri("/").body(()).unwrap();
        assert!(!offers_subprotocol(&bare, "alger"));
    }
}
