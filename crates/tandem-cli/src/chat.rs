//! `tandem chat` - one interactive agent session on stdin/stdout
//!
//! Lines typed while an approval is outstanding answer the oldest one;
//! otherwise they are sent to the agent as the next user message.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use tandem_core::agent::{
    ApprovalDecision, ApprovalRequest, ChannelApprovalGate, ControllerConfig,
    ConversationController, LoggingHook, LoopEvent, LoopState, PolicyGate,
};
use tandem_core::ai::AnthropicProvider;
use tandem_core::coordination::{CoordinationBroadcaster, CoordinationEvent, TransportKind};
use tandem_core::tools::{register_coordination_tools, register_workspace_tools, ToolRegistry};
use tandem_core::TandemConfig;

use crate::build_transports;

const RESULT_PREVIEW_CHARS: usize = 200;

pub struct ChatOptions {
    pub agent_id: String,
    pub working_dir: PathBuf,
    pub sandbox: bool,
    pub transport: TransportKind,
}

fn system_prompt(opts: &ChatOptions) -> String {
    format!(
        "You are agent '{}', working in {}. Other agents may be working in the same \
         workspace. Use observe_peers before starting work that could overlap with \
         theirs, and broadcast_status when you start, change or finish a task.",
        opts.agent_id,
        opts.working_dir.display()
    )
}

pub async fn run(config: TandemConfig, opts: ChatOptions) -> Result<()> {
    let api_key =
        std::env::var("ANTHROPIC_API_KEY").context("ANTHROPIC_API_KEY is not set")?;
    let provider = Arc::new(
        AnthropicProvider::new(api_key, &config.model, config.max_tokens)
            .with_system_prompt(system_prompt(&opts)),
    );

    let transports = build_transports(&config);
    let mut coordination_events = transports.subscribe();

    let mut registry = ToolRegistry::new().with_timeout(config.tool_timeout());
    register_workspace_tools(&mut registry);
    register_coordination_tools(
        &mut registry,
        &transports,
        opts.transport,
        config.discovery.browse_window(),
    );
    registry.add_post_hook(Arc::new(LoggingHook::new()));

    let (operator, mut approval_rx) = ChannelApprovalGate::new();
    let operator = Arc::new(operator);
    let gate = Arc::new(PolicyGate::new(
        config.permission_mode,
        &registry,
        operator.clone(),
    ));

    let mut controller_config =
        ControllerConfig::from_tandem(&config, &opts.agent_id, opts.working_dir.clone());
    controller_config.sandbox = opts.sandbox;

    let (controller, mut event_rx) =
        ConversationController::new(provider, Arc::new(registry), gate, controller_config);

    tracing::info!(
        agent_id = %opts.agent_id,
        dir = %opts.working_dir.display(),
        mode = ?config.permission_mode,
        "Starting chat session"
    );
    println!(
        "tandem: agent {} in {} (Ctrl-C to quit)",
        opts.agent_id,
        opts.working_dir.display()
    );

    let cancel = CancellationToken::new();
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let session = tokio::spawn(controller.run(input_rx, cancel.clone()));

    let mut input_tx = Some(input_tx);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: VecDeque<ApprovalRequest> = VecDeque::new();
    let mut events_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, cancelling session");
                cancel.cancel();
            }

            line = stdin.next_line(), if input_tx.is_some() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        if let Some(request) = pending.pop_front() {
                            answer(&operator, &request, &line);
                            if let Some(next) = pending.front() {
                                prompt_approval(next);
                            }
                        } else if !line.trim().is_empty() {
                            if let Some(tx) = &input_tx {
                                let _ = tx.send(line);
                            }
                        }
                    }
                    None => {
                        // No operator left to answer anything
                        input_tx = None;
                        for request in pending.drain(..) {
                            let _ = operator
                                .resolve(request.id, ApprovalDecision::denied("operator input closed"));
                        }
                    }
                }
            }

            Some(request) = approval_rx.recv() => {
                if input_tx.is_none() {
                    let _ = operator.resolve(request.id, ApprovalDecision::denied("operator input closed"));
                } else {
                    if pending.is_empty() {
                        prompt_approval(&request);
                    }
                    pending.push_back(request);
                }
            }

            event = coordination_events.recv(), if events_open => match event {
                Ok(event) => report_coordination(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Coordination event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => events_open = false,
            },

            event = event_rx.recv() => match event {
                Some(LoopEvent::Finished { .. }) | None => break,
                Some(event) => render(&event),
            },
        }
    }

    if let Err(e) = session.await {
        tracing::error!(error = %e, "Session task failed");
    }
    CoordinationBroadcaster::new(transports).shutdown();
    Ok(())
}

fn answer(operator: &ChannelApprovalGate, request: &ApprovalRequest, line: &str) {
    let line = line.trim();
    let decision = match line.to_ascii_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::Approved,
        "" | "n" | "no" => ApprovalDecision::denied("denied by operator"),
        _ => ApprovalDecision::denied(line),
    };
    if operator.resolve(request.id, decision).is_err() {
        println!("(request for {} already expired)", request.tool_name);
    }
}

fn prompt_approval(request: &ApprovalRequest) {
    print!(
        "\nRun {} {}? [y/N] ",
        request.tool_name, request.arguments
    );
    let _ = std::io::stdout().flush();
}

fn prompt_input() {
    print!("\n> ");
    let _ = std::io::stdout().flush();
}

fn render(event: &LoopEvent) {
    match event {
        LoopEvent::StateChanged {
            state: LoopState::AwaitingUserInput,
        } => prompt_input(),
        LoopEvent::Text { text } => println!("{}", text),
        LoopEvent::ToolExecuting { name, .. } => println!("[{}] running", name),
        LoopEvent::ToolDenied { reason, .. } => println!("[denied] {}", reason),
        LoopEvent::ToolResult {
            output, is_error, ..
        } => {
            let preview: String = output.chars().take(RESULT_PREVIEW_CHARS).collect();
            let more = if output.chars().count() > RESULT_PREVIEW_CHARS {
                "..."
            } else {
                ""
            };
            if *is_error {
                println!("[error] {}{}", preview, more);
            } else {
                println!("[result] {}{}", preview, more);
            }
        }
        LoopEvent::Error { error } => eprintln!("error: {}", error),
        _ => {}
    }
}

fn report_coordination(event: &CoordinationEvent) {
    match event {
        CoordinationEvent::Advertised { agent_id, fullname } => {
            tracing::info!(agent_id = %agent_id, fullname = %fullname, "Advertised status");
        }
        CoordinationEvent::Withdrawn { agent_id, fullname } => {
            tracing::info!(agent_id = %agent_id, fullname = %fullname, "Withdrew status");
        }
        CoordinationEvent::Fallback { op, reason } => {
            tracing::warn!(?op, reason = %reason, "Coordination fell back to status files");
            println!("[coordination] discovery unavailable ({}), used status files", reason);
        }
    }
}
