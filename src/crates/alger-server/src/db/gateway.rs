//! The persistence gateway boundary.
//!
//! Handlers and the connection loop only talk to [`PersistenceGateway`];
//! [`SqliteGateway`] is the default implementation over the embedded SQLite
//! pool, delegating row access to the per-entity repositories. Any durable
//! store implementing the trait satisfies the server.

use async_trait::async_trait;
use serde_json::{json, Value as Json};
use uuid::Uuid;

use crate::db::connection::{DatabaseConnection, DatabasePool};
use crate::db::models::{Execution, ExecutionStatus, Pipeline, User};
use crate::db::repositories::{
    ConnectionRepository, ConversationRepository, ErrorLogRepository, ExecutionRepository,
    PipelineRepository, UserRepository,
};

/// Direction of a logged frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }
}

/// Profile defaults applied when a user row is first created.
#[derive(Debug, Clone)]
pub struct UserDefaults {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub metadata: Json,
}

impl UserDefaults {
    /// Defaults for the seeded administrator account.
    pub fn admin() -> Self {
        Self {
            display_name: Some("Administrator".to_string()),
            email: Some("admin@example.com".to_string()),
            roles: vec!["admin".to_string(), "operator".to_string()],
            metadata: json!({}),
        }
    }
}

/// Peer details captured at handshake.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub port: Option<i64>,
    pub user_agent: Option<String>,
    pub origin: Option<String>,
    pub path: Option<String>,
}

/// One frame headed for the conversation log.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub direction: Direction,
    pub message_id: Option<i64>,
    pub request_id: Option<i64>,
    pub type_code: Option<i64>,
    pub status_code: Option<i64>,
    pub payload: Option<Json>,
    pub error: Option<String>,
}

/// One diagnostic row headed for the error log.
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub conversation_id: Option<String>,
    pub execution_id: Option<String>,
    pub message_id: Option<i64>,
    pub type_code: Option<i64>,
    pub severity: String,
    pub message: String,
    pub payload: Option<Json>,
}

/// Where an execution's graph came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionSource {
    Db,
    Payload,
}

impl ExecutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionSource::Db => "db",
            ExecutionSource::Payload => "payload",
        }
    }
}

/// Output artefact reference stored on an execution row.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub file: Option<String>,
    pub content: Option<String>,
}

/// Everything needed to create an execution row.
#[derive(Debug, Clone)]
pub struct ExecutionDraft {
    pub pipeline_id: Option<String>,
    pub source: ExecutionSource,
    pub graph: Option<Json>,
    pub params: Json,
    pub requested_by: String,
    pub status: ExecutionStatus,
    pub output: ExecutionOutput,
}

/// Everything needed to insert or update a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineDraft {
    pub id: String,
    pub name: String,
    pub full_graph: Json,
    pub description: Option<String>,
    pub metadata: Json,
}

/// Abstraction boundary for the durable store used by the server.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Return an existing user or create one with the given defaults.
    async fn ensure_user(&self, username: &str, defaults: &UserDefaults)
        -> Result<User, sqlx::Error>;

    /// Persist audit data for a login attempt.
    async fn record_login_attempt(
        &self,
        user_id: &str,
        success: bool,
        details: Json,
    ) -> Result<(), sqlx::Error>;

    /// Audit an arbitrary user-triggered action.
    async fn record_user_action(
        &self,
        user_id: &str,
        action: &str,
        details: Json,
    ) -> Result<(), sqlx::Error>;

    /// Insert a row for a live connection, returning its id.
    async fn open_connection(
        &self,
        user_id: &str,
        client: &ClientInfo,
    ) -> Result<String, sqlx::Error>;

    /// Mark a connection as closed.
    async fn close_connection(&self, connection_id: &str) -> Result<(), sqlx::Error>;

    /// Start a conversation bound to a connection, returning its id.
    async fn open_conversation(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<String, sqlx::Error>;

    /// Mark a conversation as finished.
    async fn close_conversation(&self, conversation_id: &str) -> Result<(), sqlx::Error>;

    /// Capture one inbound or outbound frame.
    async fn log_message(
        &self,
        conversation_id: &str,
        record: MessageRecord,
    ) -> Result<(), sqlx::Error>;

    /// Store a structured diagnostic row.
    async fn log_error(&self, record: ErrorRecord) -> Result<(), sqlx::Error>;

    /// All persisted pipeline definitions.
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>, sqlx::Error>;

    /// Fetch a single pipeline definition.
    async fn get_pipeline(&self, pipeline_id: &str) -> Result<Option<Pipeline>, sqlx::Error>;

    /// Insert or update a pipeline definition.
    async fn upsert_pipeline(&self, pipeline: &PipelineDraft) -> Result<(), sqlx::Error>;

    /// Create an execution row and return it.
    async fn create_execution(&self, draft: ExecutionDraft) -> Result<Execution, sqlx::Error>;

    /// Return a previously recorded execution.
    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>, sqlx::Error>;

    /// Update execution status and optional output.
    ///
    /// Terminal transitions stamp `completed_at`; terminal states are
    /// sticky. Returns whether the row was changed.
    async fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        output: Option<ExecutionOutput>,
    ) -> Result<bool, sqlx::Error>;

    /// Append a granular execution event.
    async fn add_execution_event(
        &self,
        execution_id: &str,
        event_type: &str,
        description: &str,
        payload: Json,
    ) -> Result<(), sqlx::Error>;

    /// Number of executions with status queued or running.
    async fn count_active_executions(&self) -> Result<i64, sqlx::Error>;
}

fn serialize(value: &Json) -> Option<String> {
    match value {
        Json::Null => None,
        other => Some(other.to_string()),
    }
}

/// SQLite implementation of [`PersistenceGateway`].
#[derive(Clone)]
pub struct SqliteGateway {
    db: DatabaseConnection,
}

impl SqliteGateway {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// The underlying pool, for test assertions.
    pub fn pool(&self) -> &DatabasePool {
        self.db.pool()
    }

    /// Seed the default admin user and the `demo` pipeline on first start.
    pub async fn seed_defaults(&self) -> Result<(), sqlx::Error> {
        self.ensure_user("admin", &UserDefaults::admin()).await?;
        if self.get_pipeline("demo").await?.is_none() {
            self.upsert_pipeline(&PipelineDraft {
                id: "demo".to_string(),
                name: "Demo Pipeline".to_string(),
                full_graph: demo_graph(),
                description: Some("Baseline segmentation demo pipeline".to_string()),
                metadata: json!({"seeded": true}),
            })
            .await?;
        }
        Ok(())
    }

    /// Drop runtime state so tests can start from a clean slate.
    pub async fn reset(&self) -> Result<(), sqlx::Error> {
        for table in [
            "conversation_messages",
            "error_logs",
            "execution_events",
            "executions",
            "conversations",
            "connections",
            "user_actions",
            "pipelines",
            "users",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(self.pool())
                .await?;
        }
        self.seed_defaults().await
    }
}

/// The seeded sample graph: dataset -> filter -> segmentation ->
/// structural descriptor, fanning out into a figure and a log line.
fn demo_graph() -> Json {
    json!({
        "pipeline": {
            "id": "demo",
            "name": "Demo Pipeline",
            "nodes": [
                {"id": "ds", "data": {"kind": "dataset", "params": {"shape": [4, 16, 16], "seed": 7}}},
                {"id": "flt", "data": {"kind": "filter", "params": {"kernelSize": 3}}},
                {"id": "seg", "data": {"kind": "segmentation", "params": {"threshold": 0.5}}},
                {"id": "desc", "data": {"kind": "structural-descriptor"}},
                {"id": "fig", "data": {"kind": "figure", "params": {"title": "Demo Pipeline"}}},
                {"id": "log", "data": {"kind": "text", "params": {"prefix": "LOG"}}},
            ],
            "edges": [
                {"source": "ds", "target": "flt"},
                {"source": "flt", "target": "seg"},
                {"source": "seg", "target": "desc"},
                {"source": "desc", "target": "fig"},
                {"source": "desc", "target": "log"},
            ],
        }
    })
}

#[async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn ensure_user(
        &self,
        username: &str,
        defaults: &UserDefaults,
    ) -> Result<User, sqlx::Error> {
        if let Some(user) = UserRepository::get_by_username(self.pool(), username).await? {
            return Ok(user);
        }
        let created = UserRepository::create(
            self.pool(),
            Uuid::new_v4().to_string(),
            username.to_string(),
            defaults.display_name.clone(),
            defaults.email.clone(),
            serialize(&json!(defaults.roles)),
            serialize(&defaults.metadata),
        )
        .await;
        match created {
            Ok(user) => Ok(user),
            // Lost a concurrent insert race; the row exists now.
            Err(err) => match UserRepository::get_by_username(self.pool(), username).await? {
                Some(user) => Ok(user),
                None => Err(err),
            },
        }
    }

    async fn record_login_attempt(
        &self,
        user_id: &str,
        success: bool,
        details: Json,
    ) -> Result<(), sqlx::Error> {
        let mut details = details;
        if let Some(map) = details.as_object_mut() {
            map.insert("success".to_string(), json!(success));
        }
        self.record_user_action(user_id, "login_attempt", details).await?;
        if success {
            UserRepository::touch_last_login(self.pool(), user_id).await?;
        }
        Ok(())
    }

    async fn record_user_action(
        &self,
        user_id: &str,
        action: &str,
        details: Json,
    ) -> Result<(), sqlx::Error> {
        UserRepository::record_action(self.pool(), user_id, action, serialize(&details)).await
    }

    async fn open_connection(
        &self,
        user_id: &str,
        client: &ClientInfo,
    ) -> Result<String, sqlx::Error> {
        let connection = ConnectionRepository::open(
            self.pool(),
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            client.ip.clone(),
            client.port,
            client.user_agent.clone(),
            client.origin.clone(),
            client.path.clone(),
        )
        .await?;
        Ok(connection.id)
    }

    async fn close_connection(&self, connection_id: &str) -> Result<(), sqlx::Error> {
        ConnectionRepository::close(self.pool(), connection_id).await
    }

    async fn open_conversation(
        &self,
        user_id: &str,
        connection_id: &str,
    ) -> Result<String, sqlx::Error> {
        let conversation = ConversationRepository::open(
            self.pool(),
            Uuid::new_v4().to_string(),
            user_id.to_string(),
            connection_id.to_string(),
        )
        .await?;
        Ok(conversation.id)
    }

    async fn close_conversation(&self, conversation_id: &str) -> Result<(), sqlx::Error> {
        ConversationRepository::close(self.pool(), conversation_id).await
    }

    async fn log_message(
        &self,
        conversation_id: &str,
        record: MessageRecord,
    ) -> Result<(), sqlx::Error> {
        ConversationRepository::log_message(
            self.pool(),
            conversation_id,
            record.direction.as_str(),
            record.message_id,
            record.request_id,
            record.type_code,
            record.status_code,
            record.payload.as_ref().and_then(serialize),
            record.error,
        )
        .await
    }

    async fn log_error(&self, record: ErrorRecord) -> Result<(), sqlx::Error> {
        ErrorLogRepository::insert(
            self.pool(),
            record.conversation_id,
            record.execution_id,
            record.message_id,
            record.type_code,
            &record.severity,
            &record.message,
            record.payload.as_ref().and_then(serialize),
        )
        .await
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>, sqlx::Error> {
        PipelineRepository::list(self.pool()).await
    }

    async fn get_pipeline(&self, pipeline_id: &str) -> Result<Option<Pipeline>, sqlx::Error> {
        PipelineRepository::get_by_id(self.pool(), pipeline_id).await
    }

    async fn upsert_pipeline(&self, pipeline: &PipelineDraft) -> Result<(), sqlx::Error> {
        PipelineRepository::upsert(
            self.pool(),
            &pipeline.id,
            &pipeline.name,
            serialize(&pipeline.full_graph),
            pipeline.description.clone(),
            serialize(&pipeline.metadata),
        )
        .await
    }

    async fn create_execution(&self, draft: ExecutionDraft) -> Result<Execution, sqlx::Error> {
        let execution = ExecutionRepository::create(
            self.pool(),
            Uuid::new_v4().to_string(),
            draft.pipeline_id,
            draft.source.as_str(),
            draft.graph.as_ref().and_then(serialize),
            serialize(&draft.params),
            draft.status,
            draft.requested_by,
            draft.output.file,
            draft.output.content,
        )
        .await?;
        self.add_execution_event(
            &execution.id,
            "status",
            &format!("Execution created with status '{}'", draft.status),
            json!({"status": draft.status.as_str(), "source": draft.source.as_str()}),
        )
        .await?;
        Ok(execution)
    }

    async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>, sqlx::Error> {
        ExecutionRepository::get_by_id(self.pool(), execution_id).await
    }

    async fn update_execution_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        output: Option<ExecutionOutput>,
    ) -> Result<bool, sqlx::Error> {
        let output = output.unwrap_or_default();
        let updated = ExecutionRepository::update_status(
            self.pool(),
            execution_id,
            status,
            output.file,
            output.content,
        )
        .await?;
        if updated {
            self.add_execution_event(
                execution_id,
                "status",
                &format!("Execution status updated to '{status}'"),
                json!({"status": status.as_str()}),
            )
            .await?;
        }
        Ok(updated)
    }

    async fn add_execution_event(
        &self,
        execution_id: &str,
        event_type: &str,
        description: &str,
        payload: Json,
    ) -> Result<(), sqlx::Error> {
        ExecutionRepository::add_event(
            self.pool(),
            execution_id,
            event_type,
            description,
            serialize(&payload),
        )
        .await
    }

    async fn count_active_executions(&self) -> Result<i64, sqlx::Error> {
        ExecutionRepository::count_active(self.pool()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_gateway() -> SqliteGateway {
        let db = DatabaseConnection::with_max_connections("sqlite::memory:", 1)
            .await
            .unwrap();
        db.run_migrations().await.unwrap();
        SqliteGateway::new(db)
    }

    #[tokio::test]
    async fn test_seed_creates_admin_and_demo() {
        let gateway = setup_gateway().await;
        gateway.seed_defaults().await.unwrap();

        let admin = gateway.ensure_user("admin", &UserDefaults::admin()).await.unwrap();
        assert_eq!(admin.roles_list(), vec!["admin", "operator"]);

        let demo = gateway.get_pipeline("demo").await.unwrap().unwrap();
        assert!(demo.has_graph());
        assert_eq!(demo.metadata_json()["seeded"], json!(true));

        // Seeding twice keeps a single admin row.
        gateway.seed_defaults().await.unwrap();
        let again = gateway.ensure_user("admin", &UserDefaults::admin()).await.unwrap();
        assert_eq!(again.id, admin.id);
    }

    #[tokio::test]
    async fn test_seeded_demo_graph_is_runnable() {
        let registry = alger_dag::NodeRegistry::with_builtins();
        let (report, summary) =
            alger_dag::run_graph(&demo_graph(), &registry, alger_dag::Strategy::Kahn, None)
                .unwrap();
        assert_eq!(report.sinks, vec!["fig", "log"]);
        assert!(summary["sinks"]["log"].is_object());
    }

    #[tokio::test]
    async fn test_execution_lifecycle_records_events() {
        let gateway = setup_gateway().await;
        gateway.seed_defaults().await.unwrap();
        let admin = gateway.ensure_user("admin", &UserDefaults::admin()).await.unwrap();

        let execution = gateway
            .create_execution(ExecutionDraft {
                pipeline_id: Some("demo".to_string()),
                source: ExecutionSource::Db,
                graph: Some(json!({"pipeline": {}})),
                params: json!({}),
                requested_by: admin.id.clone(),
                status: ExecutionStatus::Running,
                output: ExecutionOutput::default(),
            })
            .await
            .unwrap();
        assert_eq!(gateway.count_active_executions().await.unwrap(), 1);

        let updated = gateway
            .update_execution_status(
                &execution.id,
                ExecutionStatus::Finished,
                Some(ExecutionOutput {
                    file: Some(format!("{}.json", execution.id)),
                    content: Some(r#"{"sinks": {}}"#.to_string()),
                }),
            )
            .await
            .unwrap();
        assert!(updated);
        assert_eq!(gateway.count_active_executions().await.unwrap(), 0);

        let events = ExecutionRepository::list_events(gateway.pool(), &execution.id)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].description.as_deref().unwrap().contains("created"));
    }

    #[tokio::test]
    async fn test_reset_restores_clean_state() {
        let gateway = setup_gateway().await;
        gateway.seed_defaults().await.unwrap();
        let admin = gateway.ensure_user("admin", &UserDefaults::admin()).await.unwrap();
        gateway
            .record_user_action(&admin.id, "login", json!({"messageId": 1}))
            .await
            .unwrap();

        gateway.reset().await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_actions")
            .fetch_one(gateway.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
        assert!(gateway.get_pipeline("demo").await.unwrap().is_some());
    }
}
