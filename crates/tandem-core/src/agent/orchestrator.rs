//! Conversation controller: the agent loop.
//!
//! ```text
//!  AwaitingUserInput ─► RequestingCompletion ─► InspectingResponse ─► Done
//!                              ▲                        │
//!                              └──── DispatchingTools ◄─┘
//! ```
//!
//! History is only ever appended to, and only after a step has completed: the
//! user message when the turn starts, the assistant reply once the provider
//! answers, and a single tool message once every call of that reply has a
//! result. A turn that is cancelled mid-dispatch still gets its tool message
//! (the unfinished calls are marked cancelled), so the history never ends on
//! an unanswered tool call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ai::provider::Provider;
use crate::ai::types::{Content, ModelMessage};
use crate::config::TandemConfig;
use crate::error::{AgentError, ProviderError};
use crate::tools::registry::{ToolContext, ToolRegistry};

use super::approval::ApprovalGate;
use super::executor::{self, Dispatch};
use super::loop_events::{LoopEvent, LoopState};

const MAX_ITERATIONS: usize = 50;

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub agent_id: String,
    pub working_dir: PathBuf,
    /// Confine file tools to `working_dir`.
    pub sandbox: bool,
    pub max_iterations: usize,
    pub provider_timeout: Duration,
    pub approval_timeout: Duration,
    pub tool_timeout: Option<Duration>,
}

impl ControllerConfig {
    pub fn new(agent_id: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            agent_id: agent_id.into(),
            working_dir,
            sandbox: false,
            max_iterations: MAX_ITERATIONS,
            provider_timeout: Duration::from_secs(120),
            approval_timeout: Duration::from_secs(300),
            tool_timeout: None,
        }
    }

    pub fn from_tandem(config: &TandemConfig, agent_id: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            max_iterations: config.max_iterations,
            provider_timeout: config.provider_timeout(),
            approval_timeout: config.approval_timeout(),
            tool_timeout: Some(config.tool_timeout()),
            ..Self::new(agent_id, working_dir)
        }
    }
}

/// Owns one session's history and drives the loop.
pub struct ConversationController {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    gate: Arc<dyn ApprovalGate>,
    config: ControllerConfig,
    history: Vec<ModelMessage>,
    state: LoopState,
    event_tx: mpsc::UnboundedSender<LoopEvent>,
}

impl ConversationController {
    /// Returns the controller and the receiving end of its event stream.
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        gate: Arc<dyn ApprovalGate>,
        config: ControllerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<LoopEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let controller = Self {
            provider,
            registry,
            gate,
            config,
            history: Vec::new(),
            state: LoopState::AwaitingUserInput,
            event_tx,
        };
        (controller, event_rx)
    }

    pub fn history(&self) -> &[ModelMessage] {
        &self.history
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    fn set_state(&mut self, state: LoopState) {
        if self.state != state {
            tracing::debug!(agent_id = %self.config.agent_id, ?state, "Loop state changed");
            self.state = state;
            let _ = self.event_tx.send(LoopEvent::StateChanged { state });
        }
    }

    fn tool_context(&self) -> ToolContext {
        let mut ctx = ToolContext::new(self.config.working_dir.clone(), &self.config.agent_id);
        ctx.timeout = self.config.tool_timeout;
        if self.config.sandbox {
            ctx = ctx.with_sandbox(self.config.working_dir.clone());
        }
        ctx
    }

    /// Run one user turn to completion.
    ///
    /// Returns the text of the final assistant reply. A provider failure ends
    /// the turn with the user message (and any completed rounds) kept in
    /// history.
    pub async fn run_turn(
        &mut self,
        user_input: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        self.history.push(ModelMessage::user(user_input));
        let definitions = self.registry.definitions();
        let tool_ctx = self.tool_context();

        for iteration in 1..=self.config.max_iterations {
            self.set_state(LoopState::RequestingCompletion);

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.set_state(LoopState::AwaitingUserInput);
                    return Err(AgentError::Cancelled);
                }
                result = tokio::time::timeout(
                    self.config.provider_timeout,
                    self.provider.complete(&self.history, &definitions),
                ) => match result {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(e)) => return Err(self.fail_turn(e)),
                    Err(_) => return Err(self.fail_turn(ProviderError::Timeout(self.config.provider_timeout))),
                },
            };

            self.set_state(LoopState::InspectingResponse);
            for block in &reply.content {
                if let Content::Text { text } = block {
                    let _ = self.event_tx.send(LoopEvent::Text { text: text.clone() });
                }
            }

            let calls = reply.tool_calls();
            let final_text = reply.text();
            if !reply.content.is_empty() {
                self.history.push(reply);
            }

            if calls.is_empty() {
                let _ = self.event_tx.send(LoopEvent::TurnComplete {
                    turn: iteration,
                    has_more: false,
                });
                self.set_state(LoopState::Done);
                return Ok(final_text);
            }

            self.set_state(LoopState::DispatchingTools);
            tracing::info!(
                agent_id = %self.config.agent_id,
                iteration,
                tool_calls = calls.len(),
                "Dispatching tool calls"
            );
            let results = executor::execute_tools(
                &calls,
                &Dispatch {
                    registry: &self.registry,
                    gate: self.gate.as_ref(),
                    tool_ctx: &tool_ctx,
                    approval_timeout: self.config.approval_timeout,
                    event_tx: &self.event_tx,
                    cancel,
                },
            )
            .await;
            self.history.push(ModelMessage::tool_results(results));

            if cancel.is_cancelled() {
                self.set_state(LoopState::AwaitingUserInput);
                return Err(AgentError::Cancelled);
            }

            let _ = self.event_tx.send(LoopEvent::TurnComplete {
                turn: iteration,
                has_more: true,
            });
        }

        tracing::warn!(
            agent_id = %self.config.agent_id,
            max_iterations = self.config.max_iterations,
            "Turn hit the iteration limit"
        );
        self.set_state(LoopState::AwaitingUserInput);
        Err(AgentError::MaxIterations(self.config.max_iterations))
    }

    fn fail_turn(&mut self, error: ProviderError) -> AgentError {
        tracing::error!(agent_id = %self.config.agent_id, error = %error, "Provider request failed");
        let _ = self.event_tx.send(LoopEvent::Error {
            error: error.to_string(),
        });
        self.set_state(LoopState::AwaitingUserInput);
        AgentError::Provider(error)
    }

    /// Run the session: one turn per message received on `input_rx`, until
    /// the channel closes or `cancel` fires. Turn errors are reported as
    /// events and the session keeps going.
    pub async fn run(mut self, mut input_rx: mpsc::UnboundedReceiver<String>, cancel: CancellationToken) {
        loop {
            self.set_state(LoopState::AwaitingUserInput);
            let input = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                input = input_rx.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };

            match self.run_turn(input, &cancel).await {
                Ok(_) => {}
                Err(AgentError::Cancelled) => break,
                // Provider errors were already reported by fail_turn
                Err(AgentError::Provider(_)) => {}
                Err(e) => {
                    let _ = self.event_tx.send(LoopEvent::Error {
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(agent_id = %self.config.agent_id, "Session finished");
        let _ = self.event_tx.send(LoopEvent::Finished {
            agent_id: self.config.agent_id.clone(),
        });
    }
}
