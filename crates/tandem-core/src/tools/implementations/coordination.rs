//! Coordination tools - publish our status, observe peers

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;

use crate::coordination::{
    AgentStatus, CoordinationBroadcaster, CoordinationObserver, CoordinationRecord, QueryOptions,
    TransportKind,
};
use crate::error::{CoordinationError, ToolError};
use crate::tools::registry::{parse_params, Tool, ToolCategory, ToolContext};

const MAX_BROWSE_WINDOW_MS: u64 = 30_000;

fn transport_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["file", "discovery"],
        "description": "file: shared status directory. discovery: local network, falls back to files."
    })
}

fn coordination_failure(err: CoordinationError) -> ToolError {
    match err {
        CoordinationError::InvalidRecord(reason) => ToolError::InvalidParameters(reason),
        other => ToolError::Failed(other.to_string()),
    }
}

pub struct BroadcastStatusTool {
    broadcaster: CoordinationBroadcaster,
    default_transport: TransportKind,
}

impl BroadcastStatusTool {
    pub fn new(broadcaster: CoordinationBroadcaster, default_transport: TransportKind) -> Self {
        Self {
            broadcaster,
            default_transport,
        }
    }
}

#[derive(Deserialize)]
struct BroadcastParams {
    status: AgentStatus,
    #[serde(default)]
    task: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    transport: Option<TransportKind>,
}

#[async_trait]
impl Tool for BroadcastStatusTool {
    fn name(&self) -> &str {
        "broadcast_status"
    }

    fn description(&self) -> &str {
        "Publish this agent's status so peers working in the same workspace can see it. Replaces any status published earlier."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["idle", "working", "done", "stopped"]
                },
                "task": {
                    "type": "string",
                    "description": "What this agent is working on"
                },
                "action": {
                    "type": "string",
                    "description": "The step currently in progress"
                },
                "message": {
                    "type": "string",
                    "description": "Optional note for peers"
                },
                "transport": transport_schema()
            },
            "required": ["status"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: BroadcastParams = parse_params(params)?;
        let mut record =
            CoordinationRecord::new(&ctx.agent_id, params.status, params.task, params.action);
        if let Some(message) = params.message.filter(|m| !m.is_empty()) {
            record = record.with_message(message);
        }

        let outcome = self
            .broadcaster
            .publish(&record, params.transport.unwrap_or(self.default_transport))
            .await
            .map_err(coordination_failure)?;

        Ok(json!({
            "agent_id": record.agent_id,
            "status": record.status,
            "published": outcome,
        })
        .to_string())
    }
}

pub struct ObservePeersTool {
    observer: CoordinationObserver,
    default_transport: TransportKind,
    default_window: Duration,
}

impl ObservePeersTool {
    pub fn new(
        observer: CoordinationObserver,
        default_transport: TransportKind,
        default_window: Duration,
    ) -> Self {
        Self {
            observer,
            default_transport,
            default_window,
        }
    }
}

#[derive(Deserialize)]
struct ObserveParams {
    #[serde(default)]
    transport: Option<TransportKind>,
    #[serde(default)]
    dir: Option<PathBuf>,
    #[serde(default)]
    browse_window_ms: Option<u64>,
    #[serde(default)]
    include_self: bool,
}

#[async_trait]
impl Tool for ObservePeersTool {
    fn name(&self) -> &str {
        "observe_peers"
    }

    fn description(&self) -> &str {
        "List the latest status of other agents in this workspace, plus any plain-text status notes left in the status directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "transport": transport_schema(),
                "dir": {
                    "type": "string",
                    "description": "Status directory to read instead of the configured one"
                },
                "browse_window_ms": {
                    "type": "integer",
                    "description": "How long to listen for network advertisements (max 30000)"
                },
                "include_self": {
                    "type": "boolean",
                    "description": "Include this agent's own record (default: false)"
                }
            },
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let params: ObserveParams = parse_params(params)?;
        let window = params
            .browse_window_ms
            .map(|ms| Duration::from_millis(ms.min(MAX_BROWSE_WINDOW_MS)))
            .unwrap_or(self.default_window);
        let mut opts = QueryOptions::new(window);
        if let Some(dir) = params.dir {
            opts = opts.with_dir(ctx.sandboxed_resolve_new_path(&dir.to_string_lossy())?);
        }

        let mut snapshot = self
            .observer
            .query(params.transport.unwrap_or(self.default_transport), &opts)
            .await
            .map_err(coordination_failure)?;
        if !params.include_self {
            snapshot.peers.retain(|p| p.record.agent_id != ctx.agent_id);
        }

        serde_json::to_string(&snapshot).map_err(|e| ToolError::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{FileTransport, LoopbackDiscovery, Transports};
    use std::sync::Arc;

    fn tools(transports: Transports) -> (BroadcastStatusTool, ObservePeersTool) {
        (
            BroadcastStatusTool::new(
                CoordinationBroadcaster::new(transports.clone()),
                TransportKind::File,
            ),
            ObservePeersTool::new(
                CoordinationObserver::new(transports),
                TransportKind::File,
                Duration::from_millis(20),
            ),
        )
    }

    #[tokio::test]
    async fn peers_see_each_other_but_not_themselves() {
        let dir = tempfile::tempdir().unwrap();
        let transports = Transports::file_only(Arc::new(FileTransport::new(dir.path())));
        let (broadcast, observe) = tools(transports);

        for agent in ["a", "b"] {
            let ctx = ToolContext::new(dir.path().to_path_buf(), agent);
            broadcast
                .execute(
                    json!({"status": "working", "task": "split the parser", "message": "hi"}),
                    &ctx,
                )
                .await
                .unwrap();
        }

        let ctx = ToolContext::new(dir.path().to_path_buf(), "a");
        let out = observe.execute(json!({}), &ctx).await.unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        let peers = parsed["peers"].as_array().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0]["agent_id"], "b");
        assert_eq!(peers[0]["message"]["content"], "hi");
        assert!(peers[0].get("service").is_none());
    }

    #[tokio::test]
    async fn discovery_transport_is_selectable_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let transports = Transports::with_discovery(
            Arc::new(FileTransport::new(dir.path())),
            Arc::new(LoopbackDiscovery::new()),
            0,
            Duration::from_millis(50),
        );
        let (broadcast, observe) = tools(transports);
        let ctx = ToolContext::new(dir.path().to_path_buf(), "b");

        let out = broadcast
            .execute(json!({"status": "idle", "transport": "discovery"}), &ctx)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["published"]["transport"], "discovery");
        assert!(!dir.path().join("b.json").exists());

        let me = ToolContext::new(dir.path().to_path_buf(), "a");
        let out = observe
            .execute(json!({"transport": "discovery"}), &me)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["peers"][0]["agent_id"], "b");
        assert!(parsed["peers"][0]["service"]["service_name"]
            .as_str()
            .unwrap()
            .starts_with("b."));
    }

    #[tokio::test]
    async fn dir_outside_the_sandbox_is_refused() {
        let workspace = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secrets.env"), "API_KEY=hunter2").unwrap();
        let (_, observe) = tools(Transports::file_only(Arc::new(FileTransport::new(
            workspace.path(),
        ))));
        let ctx = ToolContext::new(workspace.path().to_path_buf(), "a")
            .with_sandbox(workspace.path().to_path_buf());

        let err = observe
            .execute(
                json!({"dir": outside.path().to_string_lossy()}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::AccessDenied(_)));

        std::fs::create_dir(workspace.path().join("status")).unwrap();
        std::fs::write(workspace.path().join("status").join("plan.md"), "split work").unwrap();
        let out = observe
            .execute(json!({"dir": "status"}), &ctx)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed["notes"][0]["file"], "plan.md");
    }

    #[tokio::test]
    async fn integer_browse_window_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (_, observe) = tools(Transports::file_only(Arc::new(FileTransport::new(
            dir.path(),
        ))));
        assert_eq!(
            observe.parameters_schema()["properties"]["browse_window_ms"]["type"],
            "integer"
        );
        observe
            .execute(
                json!({"browse_window_ms": 5}),
                &ToolContext::new(dir.path().to_path_buf(), "a"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_status_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let (broadcast, _) = tools(Transports::file_only(Arc::new(FileTransport::new(
            dir.path(),
        ))));
        let err = broadcast
            .execute(
                json!({"status": "napping"}),
                &ToolContext::new(dir.path().to_path_buf(), "a"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
