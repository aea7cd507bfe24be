//! Background execution tasks.
//!
//! An execution request is acknowledged synchronously; the actual run
//! happens here. The engine is a synchronous computation, so it is
//! dispatched on a blocking thread and its observer events cross back over
//! a channel. Status frames (205/305) stream out as nodes complete; the
//! terminal frame (207/307) is emitted strictly last, after the final row
//! update. A raised stop flag aborts emissions between nodes; the sticky
//! status UPDATE keeps a stopped row from being overwritten.

use std::sync::atomic::Ordering;
use std::time::Instant;

use serde_json::{json, Value as Json};
use tokio::sync::mpsc;

use alger_dag::{encode_summary, run_graph, NodeEvent};

use crate::context::RequestContext;
use crate::db::models::ExecutionStatus;
use crate::db::{ErrorRecord, ExecutionOutput};
use crate::handlers::{AppState, ExecutionTask};
use crate::protocol::codes::{
    CODE_PIPELINE_FINISHED_ERROR, CODE_PIPELINE_FINISHED_OK, CODE_STATUS_UPDATE_ERROR,
    CODE_STATUS_UPDATE_OK,
};

struct NodeStatus {
    node_id: String,
    node_kind: String,
    duration_ms: f64,
    predecessors: Vec<String>,
    order: usize,
    error: Option<String>,
}

/// Drive one execution to completion, streaming status frames back through
/// the connection's dispatcher.
pub async fn run_execution(task: ExecutionTask, ctx: RequestContext, app: AppState) {
    let stop_flag = app.state.register_execution(&task.execution_id);
    let started = Instant::now();

    let (tx, mut rx) = mpsc::unbounded_channel::<NodeStatus>();
    let registry = app.registry.clone();
    let payload = task.graph.clone();
    let strategy = task.strategy;
    let engine = tokio::task::spawn_blocking(move || {
        let mut observer = |event: &NodeEvent<'_>| {
            let _ = tx.send(NodeStatus {
                node_id: event.node.id.clone(),
                node_kind: event.node.kind.clone(),
                duration_ms: event.duration.as_secs_f64() * 1000.0,
                predecessors: event.predecessors.to_vec(),
                order: event.index,
                error: event.error.map(|err| err.to_string()),
            });
        };
        run_graph(&payload, &registry, strategy, Some(&mut observer))
    });

    let mut suppressed = false;
    while let Some(status) = rx.recv().await {
        if stop_flag.load(Ordering::Relaxed) {
            tracing::info!(execution = %task.execution_id, "stop requested, aborting status emissions");
            suppressed = true;
            break;
        }
        let (type_code, label) = match status.error {
            Some(_) => (CODE_STATUS_UPDATE_ERROR, "node-error"),
            None => (CODE_STATUS_UPDATE_OK, "node-finished"),
        };
        let mut content = json!({
            "executionId": task.execution_id,
            "nodeId": status.node_id,
            "nodeKind": status.node_kind,
            "status": label,
            "durationMs": status.duration_ms,
            "predecessors": status.predecessors,
            "order": status.order,
        });
        if let Some(pipeline_id) = &task.pipeline_id {
            content["pipelineId"] = json!(pipeline_id);
        }
        if let Some(error) = &status.error {
            content["error"] = json!(error);
        }
        if let Err(err) = ctx.dispatcher.send(task.request_id, type_code, content).await {
            tracing::info!(error = %err, "connection gone, dropping remaining status frames");
            suppressed = true;
            break;
        }
    }
    drop(rx);

    let result = engine.await;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    let suppressed = suppressed || stop_flag.load(Ordering::Relaxed);

    match result {
        Ok(Ok((_report, summary))) => {
            finish_success(&task, &ctx, &app, summary, duration_ms, suppressed).await;
        }
        Ok(Err(err)) => {
            finish_failure(&task, &ctx, &app, err.to_string(), "pipeline", duration_ms, suppressed)
                .await;
        }
        Err(join_err) => {
            tracing::error!(execution = %task.execution_id, error = %join_err, "engine task aborted");
            finish_failure(
                &task,
                &ctx,
                &app,
                "internal execution failure".to_string(),
                "internal",
                duration_ms,
                suppressed,
            )
            .await;
        }
    }

    app.state.release_execution(&task.execution_id);
}

async fn finish_success(
    task: &ExecutionTask,
    ctx: &RequestContext,
    app: &AppState,
    summary: Json,
    duration_ms: f64,
    suppressed: bool,
) {
    let output = ExecutionOutput {
        file: Some(format!("{}.json", task.execution_id)),
        content: Some(encode_summary(&summary)),
    };
    if let Err(err) = app
        .gateway
        .update_execution_status(&task.execution_id, ExecutionStatus::Finished, Some(output))
        .await
    {
        tracing::error!(execution = %task.execution_id, error = %err, "failed to persist result");
    }
    if let Err(err) = app
        .gateway
        .add_execution_event(
            &task.execution_id,
            "summary",
            "Execution finished with DAG summary.",
            summary.clone(),
        )
        .await
    {
        tracing::warn!(execution = %task.execution_id, error = %err, "failed to record summary event");
    }

    if !suppressed {
        let mut content = json!({
            "executionId": task.execution_id,
            "status": "success",
            "summary": summary,
            "durationMs": duration_ms,
            "strategy": task.strategy.as_str(),
        });
        if let Some(pipeline_id) = &task.pipeline_id {
            content["pipelineId"] = json!(pipeline_id);
        }
        if let Err(err) = ctx
            .dispatcher
            .send(task.request_id, CODE_PIPELINE_FINISHED_OK, content)
            .await
        {
            tracing::info!(error = %err, "connection gone before terminal frame");
        }
    }
    tracing::info!(execution = %task.execution_id, duration_ms, "execution finished");
}

#[allow(clippy::too_many_arguments)]
async fn finish_failure(
    task: &ExecutionTask,
    ctx: &RequestContext,
    app: &AppState,
    message: String,
    severity: &str,
    duration_ms: f64,
    suppressed: bool,
) {
    let output = ExecutionOutput {
        file: Some(format!("{}-error.json", task.execution_id)),
        content: Some(encode_summary(&json!({"error": message}))),
    };
    if let Err(err) = app
        .gateway
        .update_execution_status(&task.execution_id, ExecutionStatus::Failed, Some(output))
        .await
    {
        tracing::error!(execution = %task.execution_id, error = %err, "failed to persist failure");
    }
    let record = ErrorRecord {
        conversation_id: Some(ctx.conversation_id.clone()),
        execution_id: Some(task.execution_id.clone()),
        message_id: Some(task.request_id),
        type_code: Some(task.request_type as i64),
        severity: severity.to_string(),
        message: message.clone(),
        payload: Some(json!({
            "pipelineId": task.pipeline_id,
            "strategy": task.strategy.as_str(),
        })),
    };
    if let Err(err) = app.gateway.log_error(record).await {
        tracing::warn!(execution = %task.execution_id, error = %err, "failed to record error log");
    }

    if !suppressed {
        let mut content = json!({
            "executionId": task.execution_id,
            "status": "error",
            "error": message,
            "durationMs": duration_ms,
            "strategy": task.strategy.as_str(),
        });
        if let Some(pipeline_id) = &task.pipeline_id {
            content["pipelineId"] = json!(pipeline_id);
        }
        if let Err(err) = ctx
            .dispatcher
            .send(task.request_id, CODE_PIPELINE_FINISHED_ERROR, content)
            .await
        {
            tracing::info!(error = %err, "connection gone before terminal frame");
        }
    }
    tracing::error!(execution = %task.execution_id, error = %message, "execution failed");
}
