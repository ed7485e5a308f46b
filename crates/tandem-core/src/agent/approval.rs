//! Approval gating for tool calls
//!
//! `ChannelApprovalGate` parks each request in a pending table and hands a
//! copy to the operator over a channel; the operator answers through
//! `resolve`. A request ends exactly once: by the operator, by its timeout,
//! or by cancellation. The latter two deny and drop the pending entry.
//!
//! Requests from one agent are answered in submission order. Each agent has
//! its own lane, so a slow operator decision for one agent never holds up
//! another.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ApprovalError;
use crate::tools::registry::{PermissionMode, ToolCategory, ToolRegistry};

/// A tool call waiting for a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub agent_id: String,
    pub tool_name: String,
    /// Serialized tool input
    pub arguments: String,
}

impl ApprovalRequest {
    pub fn new(agent_id: impl Into<String>, tool_name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            tool_name: tool_name.into(),
            arguments: arguments.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: String },
}

impl ApprovalDecision {
    pub fn denied(reason: impl Into<String>) -> Self {
        ApprovalDecision::Denied {
            reason: reason.into(),
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ApprovalDecision::Approved)
    }
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Wait for a decision. Never waits past `timeout` and returns promptly
    /// once `cancel` fires.
    async fn request(
        &self,
        request: ApprovalRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ApprovalDecision;

    /// Whether a call to `tool_name` will actually be put to an operator.
    fn requires_operator(&self, _tool_name: &str) -> bool {
        true
    }
}

/// Approves everything. For autonomous runs and tests.
pub struct AutoApproveGate;

#[async_trait]
impl ApprovalGate for AutoApproveGate {
    async fn request(
        &self,
        _request: ApprovalRequest,
        _timeout: Duration,
        _cancel: &CancellationToken,
    ) -> ApprovalDecision {
        ApprovalDecision::Approved
    }

    fn requires_operator(&self, _tool_name: &str) -> bool {
        false
    }
}

struct PendingApproval {
    request: ApprovalRequest,
    response_tx: oneshot::Sender<ApprovalDecision>,
}

type PendingTable = Mutex<HashMap<Uuid, PendingApproval>>;

/// Operator-backed gate.
pub struct ChannelApprovalGate {
    pending: PendingTable,
    /// One FIFO lane per agent_id
    lanes: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    notify_tx: mpsc::UnboundedSender<ApprovalRequest>,
}

/// Drops the pending entry if the waiting future goes away early.
struct PendingGuard<'a> {
    pending: &'a PendingTable,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

impl ChannelApprovalGate {
    /// Returns the gate and the receiver the operator reads requests from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let gate = Self {
            pending: Mutex::new(HashMap::new()),
            lanes: DashMap::new(),
            notify_tx,
        };
        (gate, notify_rx)
    }

    /// Deliver the operator's decision for `id`. `Ok` means the waiting
    /// request will return exactly this decision.
    pub fn resolve(&self, id: Uuid, decision: ApprovalDecision) -> Result<(), ApprovalError> {
        let approved = decision.is_approved();
        let request = {
            let mut pending = self.pending.lock();
            let entry = pending.remove(&id).ok_or(ApprovalError::NotPending(id))?;
            // Send under the lock: `expire` then sees either the entry or the decision
            entry
                .response_tx
                .send(decision)
                .map_err(|_| ApprovalError::NotPending(id))?;
            entry.request
        };

        info!(
            request_id = %id,
            agent_id = %request.agent_id,
            tool = %request.tool_name,
            approved,
            "Approval resolved"
        );
        Ok(())
    }

    /// Requests currently waiting on the operator.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.pending
            .lock()
            .values()
            .map(|p| p.request.clone())
            .collect()
    }

    fn lane(&self, agent_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.lanes.entry(agent_id.to_string()).or_default().clone()
    }

    /// Settle a request that ran out of time or was cancelled. If the operator
    /// got there first, their decision stands.
    fn expire(
        &self,
        id: Uuid,
        response_rx: &mut oneshot::Receiver<ApprovalDecision>,
        reason: String,
    ) -> ApprovalDecision {
        if self.pending.lock().remove(&id).is_some() {
            warn!(request_id = %id, reason = %reason, "Approval request expired");
            return ApprovalDecision::Denied { reason };
        }
        response_rx
            .try_recv()
            .unwrap_or(ApprovalDecision::Denied { reason })
    }
}

#[async_trait]
impl ApprovalGate for ChannelApprovalGate {
    async fn request(
        &self,
        request: ApprovalRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        let deadline = Instant::now() + timeout;
        let timeout_reason = || format!("approval timed out after {}s", timeout.as_secs());
        let id = request.id;

        let lane = self.lane(&request.agent_id);
        let _turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ApprovalDecision::denied("cancelled"),
            guard = lane.lock_owned() => guard,
            _ = sleep_until(deadline) => return ApprovalDecision::denied(timeout_reason()),
        };

        let (response_tx, mut response_rx) = oneshot::channel();
        self.pending.lock().insert(
            id,
            PendingApproval {
                request: request.clone(),
                response_tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        debug!(
            request_id = %id,
            agent_id = %request.agent_id,
            tool = %request.tool_name,
            "Waiting for approval"
        );
        if self.notify_tx.send(request).is_err() {
            self.pending.lock().remove(&id);
            return ApprovalDecision::denied("no operator is connected");
        }

        tokio::select! {
            biased;
            decision = &mut response_rx => {
                decision.unwrap_or_else(|_| ApprovalDecision::denied("approval channel closed"))
            }
            _ = cancel.cancelled() => self.expire(id, &mut response_rx, "cancelled".to_string()),
            _ = sleep_until(deadline) => self.expire(id, &mut response_rx, timeout_reason()),
        }
    }
}

/// Applies the permission mode before asking anyone.
///
/// Autonomous mode approves everything. Supervised mode approves read-only
/// tools and forwards the rest to `inner`.
pub struct PolicyGate {
    mode: PermissionMode,
    read_only: HashSet<String>,
    inner: Arc<dyn ApprovalGate>,
}

impl PolicyGate {
    pub fn new(mode: PermissionMode, registry: &ToolRegistry, inner: Arc<dyn ApprovalGate>) -> Self {
        let read_only = registry
            .definitions()
            .into_iter()
            .filter(|d| registry.category(&d.name) == Some(ToolCategory::ReadOnly))
            .map(|d| d.name)
            .collect();
        Self {
            mode,
            read_only,
            inner,
        }
    }

    fn auto_approves(&self, tool_name: &str) -> bool {
        self.mode == PermissionMode::Autonomous || self.read_only.contains(tool_name)
    }
}

#[async_trait]
impl ApprovalGate for PolicyGate {
    async fn request(
        &self,
        request: ApprovalRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ApprovalDecision {
        if self.auto_approves(&request.tool_name) {
            return ApprovalDecision::Approved;
        }
        self.inner.request(request, timeout, cancel).await
    }

    fn requires_operator(&self, tool_name: &str) -> bool {
        !self.auto_approves(tool_name) && self.inner.requires_operator(tool_name)
    }
}
