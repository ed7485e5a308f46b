//! Network discovery transport
//!
//! Each agent advertises one service instance of type `_tandem-agent._tcp`
//! named after its id, with the record flattened into TXT attributes. The
//! transport owns the table of live advertisements; re-publishing withdraws
//! the previous one before registering the new one.
//!
//! Any registration or browse failure, and a browse that finds nobody, is
//! served by the file transport instead and reported as
//! `CoordinationEvent::Fallback`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::file::FileTransport;
use super::record::{
    check_txt_entries, CoordinationRecord, PeerRecord, PeerSnapshot, ServiceMeta,
};
use super::{
    CoordinationEvent, CoordinationOp, CoordinationTransport, PublishOutcome, QueryOptions,
    TransportKind,
};
use crate::error::CoordinationError;

pub const SERVICE_TYPE: &str = "_tandem-agent._tcp.local.";

const DEFAULT_SETTLE: Duration = Duration::from_millis(250);

/// A service instance to register.
#[derive(Debug, Clone)]
pub struct ServiceAdvert {
    pub instance_name: String,
    pub port: u16,
    pub properties: HashMap<String, String>,
}

/// A service instance seen while browsing.
#[derive(Debug, Clone)]
pub struct DiscoveredService {
    pub fullname: String,
    pub host: String,
    pub port: u16,
    pub properties: HashMap<String, String>,
}

/// Backend that actually talks to the network (or pretends to).
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Register an instance, returning its full service name.
    fn register(&self, advert: ServiceAdvert) -> Result<String, CoordinationError>;

    fn unregister(&self, fullname: &str) -> Result<(), CoordinationError>;

    /// Collect instances of `SERVICE_TYPE` seen during `window`.
    async fn browse(&self, window: Duration) -> Result<Vec<DiscoveredService>, CoordinationError>;
}

pub struct DiscoveryTransport {
    backend: Arc<dyn ServiceDiscovery>,
    fallback: Arc<FileTransport>,
    /// agent_id -> fullname of the live advertisement
    advertisements: Mutex<HashMap<String, String>>,
    port: u16,
    settle: Duration,
    events: broadcast::Sender<CoordinationEvent>,
}

impl DiscoveryTransport {
    pub fn new(
        backend: Arc<dyn ServiceDiscovery>,
        fallback: Arc<FileTransport>,
        events: broadcast::Sender<CoordinationEvent>,
    ) -> Self {
        Self {
            backend,
            fallback,
            advertisements: Mutex::new(HashMap::new()),
            port: 0,
            settle: DEFAULT_SETTLE,
            events,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Ids that currently have a live advertisement.
    pub fn advertised_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.advertisements.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Withdraw the advertisement for `agent_id`, if any.
    pub fn withdraw(&self, agent_id: &str) {
        let removed = self.advertisements.lock().remove(agent_id);
        if let Some(fullname) = removed {
            self.unregister(agent_id, &fullname);
        }
    }

    pub fn withdraw_all(&self) {
        let drained: Vec<(String, String)> = self.advertisements.lock().drain().collect();
        for (agent_id, fullname) in drained {
            self.unregister(&agent_id, &fullname);
        }
    }

    fn unregister(&self, agent_id: &str, fullname: &str) {
        match self.backend.unregister(fullname) {
            Ok(()) => {
                debug!(agent_id, fullname, "Withdrew advertisement");
                let _ = self.events.send(CoordinationEvent::Withdrawn {
                    agent_id: agent_id.to_string(),
                    fullname: fullname.to_string(),
                });
            }
            Err(e) => warn!(agent_id, fullname, error = %e, "Failed to withdraw advertisement"),
        }
    }

    fn advertise(&self, record: &CoordinationRecord) -> Result<String, CoordinationError> {
        let advert = ServiceAdvert {
            instance_name: record.agent_id.clone(),
            port: self.port,
            properties: record.to_txt_properties()?,
        };

        let mut table = self.advertisements.lock();
        if let Some(prior) = table.remove(&record.agent_id) {
            self.unregister(&record.agent_id, &prior);
        }
        let fullname = self.backend.register(advert)?;
        table.insert(record.agent_id.clone(), fullname.clone());
        Ok(fullname)
    }

    fn report_fallback(&self, op: CoordinationOp, reason: String) {
        warn!(?op, reason = %reason, "Discovery unavailable, using status files");
        let _ = self.events.send(CoordinationEvent::Fallback { op, reason });
    }

    async fn browse_peers(&self, window: Duration) -> Result<Vec<PeerRecord>, CoordinationError> {
        let services = tokio::time::timeout(window + self.settle, self.backend.browse(window))
            .await
            .map_err(|_| {
                CoordinationError::Transport(format!("browse did not finish within {:?}", window))
            })??;

        let mut latest: HashMap<String, PeerRecord> = HashMap::new();
        for service in services {
            let record =
                match CoordinationRecord::from_txt_properties(&service.properties, &service.fullname)
                {
                    Ok(record) => record,
                    Err(e) => {
                        debug!(error = %e, "Dropping undecodable advertisement");
                        continue;
                    }
                };
            let peer = PeerRecord {
                service: Some(ServiceMeta {
                    service_name: service.fullname,
                    host: service.host,
                    port: service.port,
                }),
                record,
            };
            match latest.get(&peer.record.agent_id) {
                Some(existing) if existing.record.updated_at >= peer.record.updated_at => {}
                _ => {
                    latest.insert(peer.record.agent_id.clone(), peer);
                }
            }
        }

        let mut peers: Vec<PeerRecord> = latest.into_values().collect();
        peers.sort_by(|a, b| a.record.agent_id.cmp(&b.record.agent_id));
        Ok(peers)
    }
}

impl Drop for DiscoveryTransport {
    fn drop(&mut self) {
        self.withdraw_all();
    }
}

#[async_trait]
impl CoordinationTransport for DiscoveryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Discovery
    }

    async fn publish(
        &self,
        record: &CoordinationRecord,
    ) -> Result<PublishOutcome, CoordinationError> {
        if record.agent_id.trim().is_empty() {
            return Err(CoordinationError::InvalidRecord(
                "agent_id must not be empty".to_string(),
            ));
        }

        match self.advertise(record) {
            Ok(fullname) => {
                info!(agent_id = %record.agent_id, fullname = %fullname, "Advertised status");
                let _ = self.events.send(CoordinationEvent::Advertised {
                    agent_id: record.agent_id.clone(),
                    fullname: fullname.clone(),
                });
                Ok(PublishOutcome::Discovery { fullname })
            }
            Err(e) => {
                self.report_fallback(CoordinationOp::Publish, e.to_string());
                self.fallback.publish(record).await
            }
        }
    }

    async fn query(&self, opts: &QueryOptions) -> Result<PeerSnapshot, CoordinationError> {
        match self.browse_peers(opts.browse_window).await {
            Ok(peers) if !peers.is_empty() => Ok(PeerSnapshot {
                peers,
                notes: Vec::new(),
            }),
            Ok(_) => {
                self.report_fallback(CoordinationOp::Query, "no peers discovered".to_string());
                self.fallback.query(opts).await
            }
            Err(e) => {
                self.report_fallback(CoordinationOp::Query, e.to_string());
                self.fallback.query(opts).await
            }
        }
    }
}

/// mDNS backend on top of the `mdns-sd` daemon.
pub struct MdnsDiscovery {
    daemon: mdns_sd::ServiceDaemon,
    host_name: String,
}

impl MdnsDiscovery {
    pub fn new() -> Result<Self, CoordinationError> {
        let daemon = mdns_sd::ServiceDaemon::new().map_err(transport_error)?;
        Ok(Self {
            daemon,
            host_name: local_host_name(),
        })
    }
}

impl Drop for MdnsDiscovery {
    fn drop(&mut self) {
        let _ = self.daemon.shutdown();
    }
}

#[async_trait]
impl ServiceDiscovery for MdnsDiscovery {
    fn register(&self, advert: ServiceAdvert) -> Result<String, CoordinationError> {
        // The daemon encodes TXT entries on its own thread and cannot report
        // an oversized one back to us.
        check_txt_entries(&advert.properties)?;
        let info = mdns_sd::ServiceInfo::new(
            SERVICE_TYPE,
            &advert.instance_name,
            &self.host_name,
            "",
            advert.port,
            advert.properties,
        )
        .map_err(transport_error)?
        .enable_addr_auto();

        let fullname = info.get_fullname().to_string();
        self.daemon.register(info).map_err(transport_error)?;
        Ok(fullname)
    }

    fn unregister(&self, fullname: &str) -> Result<(), CoordinationError> {
        self.daemon
            .unregister(fullname)
            .map(|_| ())
            .map_err(transport_error)
    }

    async fn browse(&self, window: Duration) -> Result<Vec<DiscoveredService>, CoordinationError> {
        let receiver = self.daemon.browse(SERVICE_TYPE).map_err(transport_error)?;
        let daemon = self.daemon.clone();

        // The daemon's channel is blocking-only here, so drain it off the runtime.
        let collected = tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + window;
            let mut found: HashMap<String, DiscoveredService> = HashMap::new();

            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match receiver.recv_timeout(remaining) {
                    Ok(mdns_sd::ServiceEvent::ServiceResolved(info)) => {
                        let properties = info
                            .get_properties()
                            .iter()
                            .map(|p| (p.key().to_string(), p.val_str().to_string()))
                            .collect();
                        let fullname = info.get_fullname().to_string();
                        found.insert(
                            fullname.clone(),
                            DiscoveredService {
                                fullname,
                                host: info.get_hostname().to_string(),
                                port: info.get_port(),
                                properties,
                            },
                        );
                    }
                    Ok(mdns_sd::ServiceEvent::ServiceRemoved(_, fullname)) => {
                        found.remove(&fullname);
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }

            let _ = daemon.stop_browse(SERVICE_TYPE);
            found.into_values().collect::<Vec<_>>()
        })
        .await
        .map_err(|e| CoordinationError::Transport(format!("browse task failed: {}", e)))?;

        Ok(collected)
    }
}

fn transport_error(err: mdns_sd::Error) -> CoordinationError {
    CoordinationError::Transport(err.to_string())
}

fn local_host_name() -> String {
    let raw = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "tandem".to_string());
    let label: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let label = label.trim_matches('-');
    if label.is_empty() {
        "tandem.local.".to_string()
    } else {
        format!("{}.local.", label)
    }
}

/// In-process backend. Clones share one service table, so several agents in
/// the same process see each other without a network.
#[derive(Clone, Default)]
pub struct LoopbackDiscovery {
    services: Arc<Mutex<HashMap<String, DiscoveredService>>>,
    offline: bool,
}

impl LoopbackDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose every call fails, as on a host with no usable network.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// Place an arbitrary instance in the table, bypassing `register`.
    pub fn inject(&self, service: DiscoveredService) {
        self.services
            .lock()
            .insert(service.fullname.clone(), service);
    }

    pub fn fullnames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn check_online(&self) -> Result<(), CoordinationError> {
        if self.offline {
            Err(CoordinationError::Transport(
                "network unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ServiceDiscovery for LoopbackDiscovery {
    fn register(&self, advert: ServiceAdvert) -> Result<String, CoordinationError> {
        self.check_online()?;
        check_txt_entries(&advert.properties)?;
        let fullname = format!("{}.{}", advert.instance_name, SERVICE_TYPE);
        self.services.lock().insert(
            fullname.clone(),
            DiscoveredService {
                fullname: fullname.clone(),
                host: "loopback.local.".to_string(),
                port: advert.port,
                properties: advert.properties,
            },
        );
        Ok(fullname)
    }

    fn unregister(&self, fullname: &str) -> Result<(), CoordinationError> {
        self.check_online()?;
        self.services.lock().remove(fullname);
        Ok(())
    }

    async fn browse(&self, window: Duration) -> Result<Vec<DiscoveredService>, CoordinationError> {
        self.check_online()?;
        tokio::time::sleep(window).await;
        Ok(self.services.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::record::AgentStatus;

    const WINDOW: Duration = Duration::from_millis(20);

    fn transport(
        backend: LoopbackDiscovery,
        dir: &std::path::Path,
    ) -> (DiscoveryTransport, broadcast::Receiver<CoordinationEvent>) {
        let (events, rx) = broadcast::channel(16);
        let transport = DiscoveryTransport::new(
            Arc::new(backend),
            Arc::new(FileTransport::new(dir)),
            events,
        )
        .with_settle_delay(Duration::from_millis(50));
        (transport, rx)
    }

    #[tokio::test]
    async fn publish_then_query_returns_the_same_record() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _rx) = transport(LoopbackDiscovery::new(), dir.path());
        let record = CoordinationRecord::new("a", AgentStatus::Working, "lexer", "running tests")
            .with_message("done soon");

        let outcome = transport.publish(&record).await.unwrap();
        assert_eq!(outcome.transport(), TransportKind::Discovery);

        let snapshot = transport.query(&QueryOptions::new(WINDOW)).await.unwrap();
        assert_eq!(snapshot.peers.len(), 1);
        assert_eq!(snapshot.peers[0].record, record);
        let meta = snapshot.peers[0].service.as_ref().unwrap();
        assert_eq!(meta.service_name, format!("a.{}", SERVICE_TYPE));
    }

    #[tokio::test]
    async fn republishing_keeps_a_single_advertisement() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LoopbackDiscovery::new();
        let (transport, mut rx) = transport(backend.clone(), dir.path());

        transport
            .publish(&CoordinationRecord::new("a", AgentStatus::Working, "t", "one"))
            .await
            .unwrap();
        transport
            .publish(&CoordinationRecord::new("a", AgentStatus::Done, "t", "two"))
            .await
            .unwrap();

        assert_eq!(backend.fullnames().len(), 1);
        assert_eq!(transport.advertised_ids(), vec!["a"]);

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(matches!(kinds[0], CoordinationEvent::Advertised { .. }));
        assert!(matches!(kinds[1], CoordinationEvent::Withdrawn { .. }));
        assert!(matches!(kinds[2], CoordinationEvent::Advertised { .. }));

        let snapshot = transport.query(&QueryOptions::new(WINDOW)).await.unwrap();
        assert_eq!(snapshot.peers[0].record.action, "two");
    }

    #[tokio::test]
    async fn undecodable_advertisements_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LoopbackDiscovery::new();
        backend.inject(DiscoveredService {
            fullname: format!("junk.{}", SERVICE_TYPE),
            host: "elsewhere.local.".to_string(),
            port: 0,
            properties: HashMap::from([("agent_id".to_string(), "junk".to_string())]),
        });
        let (transport, _rx) = transport(backend, dir.path());
        transport
            .publish(&CoordinationRecord::new("b", AgentStatus::Idle, "", ""))
            .await
            .unwrap();

        let snapshot = transport.query(&QueryOptions::new(WINDOW)).await.unwrap();
        assert_eq!(snapshot.agent_ids(), vec!["b"]);
    }

    #[tokio::test]
    async fn offline_query_matches_file_query() {
        let dir = tempfile::tempdir().unwrap();
        let file = FileTransport::new(dir.path());
        for id in ["a", "b"] {
            file.publish(&CoordinationRecord::new(id, AgentStatus::Working, "x", "y"))
                .await
                .unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "freeze main at 5pm").unwrap();

        let (transport, mut rx) = transport(LoopbackDiscovery::offline(), dir.path());
        let opts = QueryOptions::new(WINDOW);

        let via_discovery = transport.query(&opts).await.unwrap();
        let via_files = file.query(&opts).await.unwrap();
        assert_eq!(via_discovery, via_files);
        assert!(matches!(
            rx.try_recv().unwrap(),
            CoordinationEvent::Fallback {
                op: CoordinationOp::Query,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn offline_publish_lands_in_the_status_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, mut rx) = transport(LoopbackDiscovery::offline(), dir.path());
        let record = CoordinationRecord::new("a", AgentStatus::Stopped, "", "");

        let outcome = transport.publish(&record).await.unwrap();
        assert_eq!(outcome.transport(), TransportKind::File);
        assert!(transport.advertised_ids().is_empty());
        assert!(dir.path().join("a.json").exists());
        assert!(matches!(
            rx.try_recv().unwrap(),
            CoordinationEvent::Fallback {
                op: CoordinationOp::Publish,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn oversized_record_is_published_to_files_instead() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LoopbackDiscovery::new();
        let (transport, mut rx) = transport(backend.clone(), dir.path());
        let record = CoordinationRecord::new("a", AgentStatus::Working, "lexer", "")
            .with_message("m".repeat(300));

        let outcome = transport.publish(&record).await.unwrap();
        assert_eq!(outcome.transport(), TransportKind::File);
        assert!(backend.fullnames().is_empty());
        assert!(transport.advertised_ids().is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            CoordinationEvent::Fallback {
                op: CoordinationOp::Publish,
                ..
            }
        ));

        let snapshot = FileTransport::new(dir.path())
            .query(&QueryOptions::new(WINDOW))
            .await
            .unwrap();
        assert_eq!(snapshot.find("a").unwrap().record, record);
    }

    #[test]
    fn loopback_rejects_entries_too_long_for_txt() {
        let backend = LoopbackDiscovery::new();
        let advert = ServiceAdvert {
            instance_name: "a".to_string(),
            port: 0,
            properties: HashMap::from([("msg".to_string(), "m".repeat(260))]),
        };
        assert!(matches!(
            backend.register(advert),
            Err(CoordinationError::Transport(_))
        ));
        assert!(backend.fullnames().is_empty());
    }

    #[tokio::test]
    async fn empty_browse_falls_back_to_files() {
        let dir = tempfile::tempdir().unwrap();
        FileTransport::new(dir.path())
            .publish(&CoordinationRecord::new("c", AgentStatus::Done, "", ""))
            .await
            .unwrap();
        let (transport, _rx) = transport(LoopbackDiscovery::new(), dir.path());

        let snapshot = transport.query(&QueryOptions::new(WINDOW)).await.unwrap();
        assert_eq!(snapshot.agent_ids(), vec!["c"]);
        assert!(snapshot.peers[0].service.is_none());
    }

    #[tokio::test]
    async fn dropping_the_transport_withdraws_advertisements() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LoopbackDiscovery::new();
        {
            let (transport, _rx) = transport(backend.clone(), dir.path());
            transport
                .publish(&CoordinationRecord::new("a", AgentStatus::Idle, "", ""))
                .await
                .unwrap();
            assert_eq!(backend.fullnames().len(), 1);
        }
        assert!(backend.fullnames().is_empty());
    }

    #[tokio::test]
    async fn agents_sharing_a_backend_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LoopbackDiscovery::new();
        let (a, _ra) = transport(backend.clone(), dir.path());
        let (b, _rb) = transport(backend.clone(), dir.path());

        a.publish(&CoordinationRecord::new("a", AgentStatus::Working, "", ""))
            .await
            .unwrap();
        b.publish(&CoordinationRecord::new("b", AgentStatus::Working, "", ""))
            .await
            .unwrap();

        let snapshot = a.query(&QueryOptions::new(WINDOW)).await.unwrap();
        assert_eq!(snapshot.agent_ids(), vec!["a", "b"]);
        assert!(!dir.path().join("a.json").exists());
    }
}
