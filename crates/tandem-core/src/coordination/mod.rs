//! Peer coordination
//!
//! Agents publish a small status record about themselves and query the
//! records of their peers. Two transports carry the same record:
//!
//! - `FileTransport` - JSON documents in a shared status directory
//! - `DiscoveryTransport` - mDNS service advertisements with TXT attributes,
//!   falling back to the file transport when the network is unusable
//!
//! `CoordinationBroadcaster` and `CoordinationObserver` pick a transport per
//! call. Both are exposed to the model as tools.

pub mod discovery;
pub mod file;
pub mod record;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::CoordinationError;

pub use discovery::{
    DiscoveredService, DiscoveryTransport, LoopbackDiscovery, MdnsDiscovery, ServiceAdvert,
    ServiceDiscovery, SERVICE_TYPE,
};
pub use file::FileTransport;
pub use record::{
    AgentStatus, CoordinationRecord, PeerMessage, PeerRecord, PeerSnapshot, ServiceMeta,
    StatusNote,
};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    File,
    Discovery,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::File => f.write_str("file"),
            TransportKind::Discovery => f.write_str("discovery"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(TransportKind::File),
            "discovery" => Ok(TransportKind::Discovery),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

/// Parameters of one `query`.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Status directory to read instead of the transport's own.
    pub dir: Option<PathBuf>,
    /// How long a discovery browse listens for advertisements.
    pub browse_window: Duration,
}

impl QueryOptions {
    pub fn new(browse_window: Duration) -> Self {
        Self {
            dir: None,
            browse_window,
        }
    }

    pub fn with_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dir = Some(dir.as_ref().to_path_buf());
        self
    }
}

/// Where a published record ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum PublishOutcome {
    File { path: PathBuf },
    Discovery { fullname: String },
}

impl PublishOutcome {
    pub fn transport(&self) -> TransportKind {
        match self {
            PublishOutcome::File { .. } => TransportKind::File,
            PublishOutcome::Discovery { .. } => TransportKind::Discovery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationOp {
    Publish,
    Query,
}

/// Observable side effects of the coordination transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinationEvent {
    Advertised { agent_id: String, fullname: String },
    Withdrawn { agent_id: String, fullname: String },
    /// Discovery could not serve the call; the file transport did.
    Fallback { op: CoordinationOp, reason: String },
}

/// Common contract of both transports.
#[async_trait]
pub trait CoordinationTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn publish(&self, record: &CoordinationRecord)
        -> Result<PublishOutcome, CoordinationError>;

    async fn query(&self, opts: &QueryOptions) -> Result<PeerSnapshot, CoordinationError>;
}

/// The transports available to one process.
#[derive(Clone)]
pub struct Transports {
    file: Arc<FileTransport>,
    discovery: Option<Arc<DiscoveryTransport>>,
    events: broadcast::Sender<CoordinationEvent>,
}

impl Transports {
    pub fn file_only(file: Arc<FileTransport>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            file,
            discovery: None,
            events,
        }
    }

    /// Build a discovery transport on `backend`, sharing `file` as its fallback.
    pub fn with_discovery(
        file: Arc<FileTransport>,
        backend: Arc<dyn ServiceDiscovery>,
        port: u16,
        settle: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let discovery = DiscoveryTransport::new(backend, file.clone(), events.clone())
            .with_port(port)
            .with_settle_delay(settle);
        Self {
            file,
            discovery: Some(Arc::new(discovery)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.events.subscribe()
    }

    pub fn file(&self) -> &Arc<FileTransport> {
        &self.file
    }

    pub fn discovery(&self) -> Option<&Arc<DiscoveryTransport>> {
        self.discovery.as_ref()
    }

    /// Resolve a requested kind. Discovery without a backend degrades to
    /// files and reports it like any other fallback.
    pub fn select(&self, kind: TransportKind, op: CoordinationOp) -> Arc<dyn CoordinationTransport> {
        match (kind, &self.discovery) {
            (TransportKind::Discovery, Some(discovery)) => discovery.clone(),
            (TransportKind::Discovery, None) => {
                tracing::warn!(?op, "Discovery requested but not enabled, using status files");
                let _ = self.events.send(CoordinationEvent::Fallback {
                    op,
                    reason: "discovery is not enabled".to_string(),
                });
                self.file.clone()
            }
            (TransportKind::File, _) => self.file.clone(),
        }
    }
}

/// Publishes this process's records.
#[derive(Clone)]
pub struct CoordinationBroadcaster {
    transports: Transports,
}

impl CoordinationBroadcaster {
    pub fn new(transports: Transports) -> Self {
        Self { transports }
    }

    pub async fn publish(
        &self,
        record: &CoordinationRecord,
        kind: TransportKind,
    ) -> Result<PublishOutcome, CoordinationError> {
        self.transports
            .select(kind, CoordinationOp::Publish)
            .publish(record)
            .await
    }

    /// Withdraw every advertisement this process still holds.
    pub fn shutdown(&self) {
        if let Some(discovery) = self.transports.discovery() {
            discovery.withdraw_all();
        }
    }
}

/// Reads peer records.
#[derive(Clone)]
pub struct CoordinationObserver {
    transports: Transports,
}

impl CoordinationObserver {
    pub fn new(transports: Transports) -> Self {
        Self { transports }
    }

    pub async fn query(
        &self,
        kind: TransportKind,
        opts: &QueryOptions,
    ) -> Result<PeerSnapshot, CoordinationError> {
        self.transports
            .select(kind, CoordinationOp::Query)
            .query(opts)
            .await
    }
}
