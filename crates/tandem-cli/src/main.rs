//! Tandem - tool-using agents that can see each other
//!
//! - `tandem chat` - interactive session, tool calls approved at the prompt
//! - `tandem status publish|query` - coordination records from the shell

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tandem_core::coordination::{
    AgentStatus, FileTransport, MdnsDiscovery, TransportKind, Transports,
};
use tandem_core::{paths, TandemConfig};

mod chat;
mod status;

/// Tandem - agent runtime with peer coordination
#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Tool-using agents that coordinate over shared files or mDNS", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive agent session
    ///
    /// Reads one user message per line. Tool calls that need approval are
    /// shown with their arguments; answer `y` to run or anything else to deny.
    Chat {
        /// Agent id used for coordination records (default: random)
        #[arg(long)]
        agent_id: Option<String>,

        /// Working directory for file and shell tools
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Confine file tools to the working directory
        #[arg(long)]
        sandbox: bool,

        /// Default transport for the coordination tools
        #[arg(long, default_value_t = TransportKind::File)]
        transport: TransportKind,
    },

    /// Publish or read coordination records
    #[command(subcommand)]
    Status(StatusCommand),
}

#[derive(Subcommand)]
enum StatusCommand {
    /// Publish a record for an agent
    ///
    /// With `--transport discovery` the advertisement lives as long as the
    /// process; it is withdrawn on Ctrl-C.
    Publish {
        #[arg(long)]
        agent_id: String,

        /// idle, working, done or stopped
        #[arg(long)]
        status: AgentStatus,

        #[arg(long, default_value = "")]
        task: String,

        #[arg(long, default_value = "")]
        action: String,

        #[arg(long)]
        message: Option<String>,

        #[arg(long, default_value_t = TransportKind::File)]
        transport: TransportKind,
    },

    /// Print every peer record visible on a transport as JSON
    Query {
        #[arg(long, default_value_t = TransportKind::File)]
        transport: TransportKind,

        /// Status directory to read instead of the configured one
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Browse window for discovery, in milliseconds
        #[arg(long)]
        window_ms: Option<u64>,
    },
}

fn init_logging() {
    let log_dir = paths::logs_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory: {}", e);
    }

    let filter = || {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };

    match std::fs::File::create(log_dir.join("tandem.log")) {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init(),
        Err(e) => {
            eprintln!("Failed to create log file: {}, logging to stderr", e);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .init();
        }
    }
}

/// File transport on the configured status directory, plus mDNS when enabled
/// and the daemon starts.
fn build_transports(config: &TandemConfig) -> Transports {
    let file = std::sync::Arc::new(FileTransport::new(&config.status_dir));
    if !config.discovery.enabled {
        return Transports::file_only(file);
    }

    match MdnsDiscovery::new() {
        Ok(mdns) => Transports::with_discovery(
            file,
            std::sync::Arc::new(mdns),
            config.discovery.port,
            config.discovery.settle_delay(),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "mDNS unavailable, coordination uses status files only");
            Transports::file_only(file)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = TandemConfig::load()?;

    match cli.command {
        Commands::Chat {
            agent_id,
            dir,
            sandbox,
            transport,
        } => {
            let agent_id = agent_id.unwrap_or_else(|| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("agent-{}", &id[..8])
            });
            let working_dir = match dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            chat::run(
                config,
                chat::ChatOptions {
                    agent_id,
                    working_dir,
                    sandbox,
                    transport,
                },
            )
            .await
        }
        Commands::Status(StatusCommand::Publish {
            agent_id,
            status,
            task,
            action,
            message,
            transport,
        }) => {
            status::publish(
                &config,
                status::PublishArgs {
                    agent_id,
                    status,
                    task,
                    action,
                    message,
                    transport,
                },
            )
            .await
        }
        Commands::Status(StatusCommand::Query {
            transport,
            dir,
            window_ms,
        }) => status::query(&config, transport, dir, window_ms).await,
    }
}
