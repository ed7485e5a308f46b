//! `tandem status` - coordination records from the shell

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use tandem_core::coordination::{
    AgentStatus, CoordinationBroadcaster, CoordinationObserver, CoordinationRecord,
    PublishOutcome, QueryOptions, TransportKind,
};
use tandem_core::TandemConfig;

use crate::build_transports;

pub struct PublishArgs {
    pub agent_id: String,
    pub status: AgentStatus,
    pub task: String,
    pub action: String,
    pub message: Option<String>,
    pub transport: TransportKind,
}

pub async fn publish(config: &TandemConfig, args: PublishArgs) -> Result<()> {
    let transports = build_transports(config);
    let broadcaster = CoordinationBroadcaster::new(transports);

    let mut record = CoordinationRecord::new(args.agent_id, args.status, args.task, args.action);
    if let Some(message) = args.message.filter(|m| !m.is_empty()) {
        record = record.with_message(message);
    }

    let outcome = broadcaster
        .publish(&record, args.transport)
        .await
        .context("Failed to publish status")?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let PublishOutcome::Discovery { fullname } = &outcome {
        eprintln!("Advertising {} until Ctrl-C", fullname);
        tokio::signal::ctrl_c()
            .await
            .context("Failed to wait for Ctrl-C")?;
        broadcaster.shutdown();
    }

    Ok(())
}

pub async fn query(
    config: &TandemConfig,
    transport: TransportKind,
    dir: Option<PathBuf>,
    window_ms: Option<u64>,
) -> Result<()> {
    let transports = build_transports(config);
    let observer = CoordinationObserver::new(transports);

    let window = window_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.discovery.browse_window());
    let mut opts = QueryOptions::new(window);
    if let Some(dir) = dir {
        opts = opts.with_dir(dir);
    }

    let snapshot = observer
        .query(transport, &opts)
        .await
        .context("Failed to query peers")?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
