//! Request handlers and the message router.
//!
//! Each handler maps one request type to a `(type_code, content)` pair and,
//! for execution requests, a background task description. Nothing raised
//! here crosses the connection boundary: unexpected failures are logged,
//! recorded in the error log, and surfaced as the operation's error code
//! with a redacted message.

use std::sync::Arc;

use serde_json::{json, Value as Json};

use alger_dag::{decode_summary, NodeRegistry, Strategy};

use crate::config::ServerConfig;
use crate::context::RequestContext;
use crate::db::models::ExecutionStatus;
use crate::db::{
    ErrorRecord, ExecutionDraft, ExecutionOutput, ExecutionSource, PersistenceGateway,
    UserDefaults,
};
use crate::error::Result;
use crate::protocol::codes::{
    error_code_for, CODE_EXECUTE_FROM_DB, CODE_EXECUTE_FROM_PAYLOAD, CODE_EXECUTIONS_HALTED,
    CODE_EXECUTION_FROM_DB_ERROR, CODE_EXECUTION_FROM_DB_OK, CODE_EXECUTION_FROM_PAYLOAD_ERROR,
    CODE_EXECUTION_FROM_PAYLOAD_OK, CODE_GET_USER_DATA, CODE_LIST_PIPELINES, CODE_LOGIN,
    CODE_LOGIN_OK, CODE_LOGIN_UNKNOWN, CODE_MAINTENANCE_MODE, CODE_PIPELINE_FINISHED_ERROR,
    CODE_PIPELINE_FINISHED_OK, CODE_PIPELINE_FULL, CODE_PIPELINE_FULL_ERROR, CODE_REQUEST_OUTPUT,
    CODE_STOP_EXECUTION, CODE_STOP_EXECUTION_ERROR, CODE_STOP_EXECUTION_OK,
    CODE_TOO_MANY_EXECUTIONS, CODE_UNKNOWN_TYPE, CODE_USER_DATA, CODE_USER_DATA_ERROR,
};
use crate::protocol::Frame;
use crate::state::ServerState;

/// Shared handles threaded through the router into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub gateway: Arc<dyn PersistenceGateway>,
    pub registry: Arc<NodeRegistry>,
    pub state: Arc<ServerState>,
}

/// Description of a background execution scheduled by a handler.
#[derive(Debug, Clone)]
pub struct ExecutionTask {
    pub execution_id: String,
    pub pipeline_id: Option<String>,
    pub graph: Json,
    pub strategy: Strategy,
    /// Id of the originating request frame
    pub request_id: i64,
    /// Type code of the originating request frame
    pub request_type: u16,
}

/// What a handler hands back to the connection loop.
pub struct HandlerOutcome {
    pub type_code: u16,
    pub content: Json,
    pub background: Option<ExecutionTask>,
}

impl HandlerOutcome {
    fn reply(type_code: u16, content: Json) -> Self {
        Self {
            type_code,
            content,
            background: None,
        }
    }
}

/// Route a validated frame to its handler.
pub async fn route_message(frame: &Frame, ctx: &RequestContext, app: &AppState) -> HandlerOutcome {
    let result = match frame.type_code {
        CODE_LOGIN => handle_login(frame, ctx, app).await,
        CODE_GET_USER_DATA => handle_get_user_data(frame, ctx, app).await,
        CODE_LIST_PIPELINES => handle_list_pipelines(frame, ctx, app).await,
        CODE_EXECUTE_FROM_DB => handle_execute_from_db(frame, ctx, app).await,
        CODE_EXECUTE_FROM_PAYLOAD => handle_execute_from_payload(frame, ctx, app).await,
        CODE_STOP_EXECUTION => handle_stop_execution(frame, ctx, app).await,
        CODE_REQUEST_OUTPUT => handle_request_output(frame, ctx, app).await,
        other => Ok(HandlerOutcome::reply(
            CODE_UNKNOWN_TYPE,
            json!({"error": format!("Unsupported message type: {other}")}),
        )),
    };

    match result {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(type_code = frame.type_code, error = %err, "handler failed");
            let record = ErrorRecord {
                conversation_id: Some(ctx.conversation_id.clone()),
                execution_id: None,
                message_id: Some(frame.id),
                type_code: Some(frame.type_code as i64),
                severity: "internal".to_string(),
                message: err.to_string(),
                payload: None,
            };
            if let Err(log_err) = app.gateway.log_error(record).await {
                tracing::warn!(error = %log_err, "failed to record handler error");
            }
            HandlerOutcome::reply(
                error_code_for(frame.type_code),
                json!({"error": "internal server error"}),
            )
        }
    }
}

async fn handle_login(
    frame: &Frame,
    ctx: &RequestContext,
    app: &AppState,
) -> Result<HandlerOutcome> {
    let username = frame.content.get("username").and_then(Json::as_str);
    let password = frame.content.get("password").and_then(Json::as_str);
    let success = username == Some(app.config.auth.username.as_str())
        && password == Some(app.config.auth.password.as_str());

    app.gateway
        .record_login_attempt(
            &ctx.user_id,
            success,
            json!({"messageId": frame.id, "requestedUsername": username}),
        )
        .await?;

    if success {
        app.gateway
            .record_user_action(&ctx.user_id, "login", json!({"messageId": frame.id}))
            .await?;
        Ok(HandlerOutcome::reply(CODE_LOGIN_OK, json!({"status": "login-ok"})))
    } else {
        Ok(HandlerOutcome::reply(
            CODE_LOGIN_UNKNOWN,
            json!({"error": "unknown credentials or password mismatch"}),
        ))
    }
}

async fn handle_get_user_data(
    frame: &Frame,
    ctx: &RequestContext,
    app: &AppState,
) -> Result<HandlerOutcome> {
    let Some(user_id) = str_field(&frame.content, "userId") else {
        return Ok(HandlerOutcome::reply(
            CODE_USER_DATA_ERROR,
            json!({"error": "userId is required"}),
        ));
    };
    if user_id != ctx.username {
        return Ok(HandlerOutcome::reply(
            CODE_USER_DATA_ERROR,
            json!({"error": format!("user '{user_id}' not found")}),
        ));
    }

    let user = app.gateway.ensure_user(&ctx.username, &UserDefaults::admin()).await?;
    app.gateway
        .record_user_action(&ctx.user_id, "get_user_data", json!({"messageId": frame.id}))
        .await?;
    Ok(HandlerOutcome::reply(
        CODE_USER_DATA,
        json!({"user": user.profile_json()}),
    ))
}

async fn handle_list_pipelines(
    frame: &Frame,
    ctx: &RequestContext,
    app: &AppState,
) -> Result<HandlerOutcome> {
    let pipelines = app.gateway.list_pipelines().await?;
    if pipelines.is_empty() {
        return Ok(HandlerOutcome::reply(
            CODE_PIPELINE_FULL_ERROR,
            json!({"error": "no pipeline data available"}),
        ));
    }
    app.gateway
        .record_user_action(
            &ctx.user_id,
            "list_pipelines",
            json!({"messageId": frame.id, "pipelineCount": pipelines.len()}),
        )
        .await?;
    let listing: Vec<Json> = pipelines.iter().map(|p| p.to_json()).collect();
    Ok(HandlerOutcome::reply(
        CODE_PIPELINE_FULL,
        json!({"pipelines": listing}),
    ))
}

async fn handle_execute_from_db(
    frame: &Frame,
    ctx: &RequestContext,
    app: &AppState,
) -> Result<HandlerOutcome> {
    let Some(pipeline_id) = str_field(&frame.content, "pipelineId") else {
        return Ok(HandlerOutcome::reply(
            CODE_EXECUTION_FROM_DB_ERROR,
            json!({"error": "pipelineId is required"}),
        ));
    };
    let Some(pipeline) = app.gateway.get_pipeline(pipeline_id).await? else {
        return Ok(HandlerOutcome::reply(
            CODE_EXECUTION_FROM_DB_ERROR,
            json!({"error": "pipeline not found"}),
        ));
    };
    if !pipeline.has_graph() {
        return Ok(HandlerOutcome::reply(
            CODE_EXECUTION_FROM_DB_ERROR,
            json!({"error": "pipeline graph missing"}),
        ));
    }
    let strategy = match parse_strategy(&frame.content) {
        Ok(strategy) => strategy,
        Err(message) => {
            return Ok(HandlerOutcome::reply(
                CODE_EXECUTION_FROM_DB_ERROR,
                json!({"error": message}),
            ))
        }
    };

    tracing::info!(pipeline = %pipeline_id, user = %ctx.username, "pipeline requested from db");
    if let Some(blocked) = execution_blocker(app).await? {
        return Ok(blocked);
    }

    let graph = pipeline.graph_json();
    start_execution(
        frame,
        ctx,
        app,
        Some(pipeline_id.to_string()),
        ExecutionSource::Db,
        graph,
        strategy,
        CODE_EXECUTION_FROM_DB_OK,
    )
    .await
}

async fn handle_execute_from_payload(
    frame: &Frame,
    ctx: &RequestContext,
    app: &AppState,
) -> Result<HandlerOutcome> {
    let graph = match frame.content.get("graph") {
        Some(graph) if graph.is_object() => graph.clone(),
        _ => {
            return Ok(HandlerOutcome::reply(
                CODE_EXECUTION_FROM_PAYLOAD_ERROR,
                json!({"error": "graph definition missing"}),
            ))
        }
    };
    let strategy = match parse_strategy(&frame.content) {
        Ok(strategy) => strategy,
        Err(message) => {
            return Ok(HandlerOutcome::reply(
                CODE_EXECUTION_FROM_PAYLOAD_ERROR,
                json!({"error": message}),
            ))
        }
    };

    tracing::info!(user = %ctx.username, "ad-hoc payload execution requested");
    if let Some(blocked) = execution_blocker(app).await? {
        return Ok(blocked);
    }

    start_execution(
        frame,
        ctx,
        app,
        None,
        ExecutionSource::Payload,
        graph,
        strategy,
        CODE_EXECUTION_FROM_PAYLOAD_OK,
    )
    .await
}

/// Create the execution row, audit the request, and hand back the
/// acknowledgement plus the background task description.
#[allow(clippy::too_many_arguments)]
async fn start_execution(
    frame: &Frame,
    ctx: &RequestContext,
    app: &AppState,
    pipeline_id: Option<String>,
    source: ExecutionSource,
    graph: Json,
    strategy: Strategy,
    ack_code: u16,
) -> Result<HandlerOutcome> {
    let params = frame.content.get("params").cloned().unwrap_or_else(|| json!({}));
    let execution = app
        .gateway
        .create_execution(ExecutionDraft {
            pipeline_id: pipeline_id.clone(),
            source,
            graph: Some(graph.clone()),
            params,
            requested_by: ctx.user_id.clone(),
            status: ExecutionStatus::Running,
            output: ExecutionOutput::default(),
        })
        .await?;

    app.gateway
        .record_user_action(
            &ctx.user_id,
            "execute_pipeline",
            json!({
                "messageId": frame.id,
                "executionId": execution.id,
                "strategy": strategy.as_str(),
                "pipelineId": pipeline_id,
            }),
        )
        .await?;
    tracing::info!(execution = %execution.id, strategy = strategy.as_str(), "execution created");

    Ok(HandlerOutcome {
        type_code: ack_code,
        content: json!({
            "executionId": execution.id,
            "status": "pipeline-execution-started",
        }),
        background: Some(ExecutionTask {
            execution_id: execution.id.clone(),
            pipeline_id,
            graph,
            strategy,
            request_id: frame.id,
            request_type: frame.type_code,
        }),
    })
}

async fn handle_stop_execution(
    frame: &Frame,
    ctx: &RequestContext,
    app: &AppState,
) -> Result<HandlerOutcome> {
    let Some(execution_id) = str_field(&frame.content, "executionId") else {
        return Ok(HandlerOutcome::reply(
            CODE_STOP_EXECUTION_ERROR,
            json!({"error": "executionId is required"}),
        ));
    };
    if app.gateway.get_execution(execution_id).await?.is_none() {
        return Ok(HandlerOutcome::reply(
            CODE_STOP_EXECUTION_ERROR,
            json!({"error": "execution not found"}),
        ));
    }

    app.gateway
        .update_execution_status(execution_id, ExecutionStatus::Stopped, None)
        .await?;
    app.state.request_stop(execution_id);
    app.gateway
        .record_user_action(
            &ctx.user_id,
            "stop_execution",
            json!({"executionId": execution_id, "messageId": frame.id}),
        )
        .await?;
    tracing::warn!(execution = %execution_id, "execution stopped by client");

    Ok(HandlerOutcome::reply(
        CODE_STOP_EXECUTION_OK,
        json!({"executionId": execution_id, "status": "stopped"}),
    ))
}

async fn handle_request_output(
    frame: &Frame,
    ctx: &RequestContext,
    app: &AppState,
) -> Result<HandlerOutcome> {
    let Some(execution_id) = str_field(&frame.content, "executionId") else {
        return Ok(HandlerOutcome::reply(
            CODE_PIPELINE_FINISHED_ERROR,
            json!({"error": "executionId is required"}),
        ));
    };
    let Some(execution) = app.gateway.get_execution(execution_id).await? else {
        return Ok(HandlerOutcome::reply(
            CODE_PIPELINE_FINISHED_ERROR,
            json!({"error": "execution not found"}),
        ));
    };

    app.gateway
        .record_user_action(
            &ctx.user_id,
            "request_output",
            json!({"executionId": execution_id, "messageId": frame.id}),
        )
        .await?;

    let content = decode_summary(execution.output_content.as_deref());
    let outcome = match execution.status() {
        ExecutionStatus::Finished => HandlerOutcome::reply(
            CODE_PIPELINE_FINISHED_OK,
            json!({
                "executionId": execution.id,
                "file": execution.output_file,
                "content": content,
            }),
        ),
        ExecutionStatus::Failed => HandlerOutcome::reply(
            CODE_PIPELINE_FINISHED_ERROR,
            json!({
                "executionId": execution.id,
                "file": execution.output_file,
                "content": content,
            }),
        ),
        ExecutionStatus::Stopped => HandlerOutcome::reply(
            CODE_PIPELINE_FINISHED_ERROR,
            json!({"executionId": execution.id, "error": "execution was stopped"}),
        ),
        ExecutionStatus::Queued | ExecutionStatus::Running => HandlerOutcome::reply(
            CODE_PIPELINE_FINISHED_ERROR,
            json!({"executionId": execution.id, "error": "execution is still running"}),
        ),
    };
    Ok(outcome)
}

/// Pre-dispatch admission gate: maintenance, halt flag, concurrency cap.
async fn execution_blocker(app: &AppState) -> Result<Option<HandlerOutcome>> {
    if app.state.maintenance_mode() {
        return Ok(Some(HandlerOutcome::reply(
            CODE_MAINTENANCE_MODE,
            json!({"error": "Pipelines unavailable while maintenance mode is active."}),
        )));
    }
    if app.state.executions_halted() {
        return Ok(Some(HandlerOutcome::reply(
            CODE_EXECUTIONS_HALTED,
            json!({"error": "Pipeline executions are halted."}),
        )));
    }
    let active = app.gateway.count_active_executions().await?;
    if active as usize >= app.state.max_concurrent_executions() {
        return Ok(Some(HandlerOutcome::reply(
            CODE_TOO_MANY_EXECUTIONS,
            json!({
                "error": "Too many pipeline execution requests in progress.",
                "activeExecutions": active,
            }),
        )));
    }
    Ok(None)
}

fn str_field<'a>(content: &'a Json, key: &str) -> Option<&'a str> {
    content.get(key).and_then(Json::as_str).filter(|s| !s.is_empty())
}

fn parse_strategy(content: &Json) -> std::result::Result<Strategy, String> {
    match content.get("strategy") {
        None | Some(Json::Null) => Ok(Strategy::default()),
        Some(Json::String(s)) => s.parse::<Strategy>().map_err(|err| err.to_string()),
        Some(_) => Err("strategy must be a string".to_string()),
    }
}
