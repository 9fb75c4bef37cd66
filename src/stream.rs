//! Streaming interaction handle and phase callbacks

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::error;

use crate::error::{panic_message, AgentError};
use crate::model::{FunctionCall, ModelResponse};
use crate::result::AgentResult;
use crate::run_state::AgentRunState;
use crate::tool::ToolExecution;

/// Event emitted while a stream runs.
///
/// `agent` names the agent that produced the event, which for composites is
/// the member currently running.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TurnStart {
        agent: String,
        turn: u32,
    },
    TextDelta {
        agent: String,
        delta: String,
    },
    TurnComplete {
        agent: String,
        turn: u32,
        response: ModelResponse,
    },
    ToolCallPending {
        agent: String,
        call: FunctionCall,
    },
    Paused {
        agent: String,
        call: FunctionCall,
    },
    ToolExecuted {
        agent: String,
        execution: ToolExecution,
    },
    GuardrailFailed {
        agent: String,
        reason: String,
    },
    Handoff {
        agent: String,
        target: String,
    },
    Complete(AgentResult),
    Error(AgentError),
}

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;
type RefCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type TextCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Registered phase callbacks plus the optional event channel.
///
/// Cloned into every member a composite runs, so callbacks observe nested
/// phases too. Completion and error are only reported by the outermost
/// [`AgentStream::start`].
#[derive(Clone, Default)]
pub struct StreamHooks {
    turn_start: Option<Callback<u32>>,
    text_delta: Option<TextCallback>,
    turn_complete: Option<RefCallback<ModelResponse>>,
    tool_call_pending: Option<Arc<dyn Fn(&FunctionCall) -> bool + Send + Sync>>,
    pause: Option<RefCallback<AgentRunState>>,
    tool_executed: Option<RefCallback<ToolExecution>>,
    guardrail_failed: Option<TextCallback>,
    handoff: Option<TextCallback>,
    complete: Option<RefCallback<AgentResult>>,
    error: Option<RefCallback<AgentError>>,
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
}

impl StreamHooks {
    fn send(&self, event: impl FnOnce() -> StreamEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event());
        }
    }

    pub(crate) fn turn_start(&self, agent: &str, turn: u32) {
        if let Some(f) = &self.turn_start {
            f(turn);
        }
        self.send(|| StreamEvent::TurnStart {
            agent: agent.to_string(),
            turn,
        });
    }

    pub(crate) fn text_delta(&self, agent: &str, delta: &str) {
        if let Some(f) = &self.text_delta {
            f(delta);
        }
        self.send(|| StreamEvent::TextDelta {
            agent: agent.to_string(),
            delta: delta.to_string(),
        });
    }

    pub(crate) fn turn_complete(&self, agent: &str, turn: u32, response: &ModelResponse) {
        if let Some(f) = &self.turn_complete {
            f(response);
        }
        self.send(|| StreamEvent::TurnComplete {
            agent: agent.to_string(),
            turn,
            response: response.clone(),
        });
    }

    /// Whether a synchronous approval callback is registered.
    pub(crate) fn has_approval_handler(&self) -> bool {
        self.tool_call_pending.is_some()
    }

    pub(crate) fn has_pause_handler(&self) -> bool {
        self.pause.is_some()
    }

    /// Hooks for a run delegated through a tool call: every callback except
    /// the pause handler.
    pub(crate) fn for_delegate(&self) -> Self {
        Self {
            pause: None,
            ..self.clone()
        }
    }

    /// Ask the approval callback about `call`. Unanswered calls are rejected.
    pub(crate) fn approve(&self, agent: &str, call: &FunctionCall) -> bool {
        self.send(|| StreamEvent::ToolCallPending {
            agent: agent.to_string(),
            call: call.clone(),
        });
        self.tool_call_pending.as_ref().is_some_and(|f| f(call))
    }

    pub(crate) fn paused(&self, agent: &str, state: &AgentRunState) {
        if let Some(f) = &self.pause {
            f(state);
        }
        if let Some(call) = state.pending_tool_call() {
            self.send(|| StreamEvent::Paused {
                agent: agent.to_string(),
                call: call.clone(),
            });
        }
    }

    pub(crate) fn tool_executed(&self, agent: &str, execution: &ToolExecution) {
        if let Some(f) = &self.tool_executed {
            f(execution);
        }
        self.send(|| StreamEvent::ToolExecuted {
            agent: agent.to_string(),
            execution: execution.clone(),
        });
    }

    pub(crate) fn guardrail_failed(&self, agent: &str, reason: &str) {
        if let Some(f) = &self.guardrail_failed {
            f(reason);
        }
        self.send(|| StreamEvent::GuardrailFailed {
            agent: agent.to_string(),
            reason: reason.to_string(),
        });
    }

    pub(crate) fn handoff(&self, agent: &str, target: &str) {
        if let Some(f) = &self.handoff {
            f(target);
        }
        self.send(|| StreamEvent::Handoff {
            agent: agent.to_string(),
            target: target.to_string(),
        });
    }

    fn finished(&self, result: &AgentResult) {
        if let Some(err) = result.error() {
            if let Some(f) = &self.error {
                f(err);
            }
            self.send(|| StreamEvent::Error(err.clone()));
        }
        if let Some(f) = &self.complete {
            f(result);
        }
        self.send(|| StreamEvent::Complete(result.clone()));
    }
}

type StreamRun = Box<dyn FnOnce(StreamHooks) -> BoxFuture<'static, AgentResult> + Send>;

/// Streaming interaction.
///
/// Nothing runs until [`start`](Self::start) is awaited. Register callbacks
/// first, or [`subscribe`](Self::subscribe) to receive every phase as a
/// [`StreamEvent`].
pub struct AgentStream {
    run: StreamRun,
    hooks: StreamHooks,
}

impl AgentStream {
    /// Stream over a deferred run. `run` receives the registered hooks when
    /// the stream starts.
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(StreamHooks) -> BoxFuture<'static, AgentResult> + Send + 'static,
    {
        Self {
            run: Box::new(run),
            hooks: StreamHooks::default(),
        }
    }

    /// Stream that completes immediately with `result`.
    pub fn ready(result: AgentResult) -> Self {
        Self::new(move |_| async move { result }.boxed())
    }

    // === Callbacks ===

    pub fn on_turn_start(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.hooks.turn_start = Some(Arc::new(f));
        self
    }

    pub fn on_text_delta(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.text_delta = Some(Arc::new(f));
        self
    }

    pub fn on_turn_complete(mut self, f: impl Fn(&ModelResponse) + Send + Sync + 'static) -> Self {
        self.hooks.turn_complete = Some(Arc::new(f));
        self
    }

    /// Approve or reject confirmation-required tool calls inline.
    ///
    /// Returning `false` feeds a rejection back to the model and the run
    /// continues.
    pub fn on_tool_call_pending(
        mut self,
        f: impl Fn(&FunctionCall) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.tool_call_pending = Some(Arc::new(f));
        self
    }

    /// Pause on confirmation-required tool calls and hand out the run state.
    ///
    /// Takes precedence over [`on_tool_call_pending`](Self::on_tool_call_pending).
    pub fn on_pause(mut self, f: impl Fn(&AgentRunState) + Send + Sync + 'static) -> Self {
        self.hooks.pause = Some(Arc::new(f));
        self
    }

    pub fn on_tool_executed(mut self, f: impl Fn(&ToolExecution) + Send + Sync + 'static) -> Self {
        self.hooks.tool_executed = Some(Arc::new(f));
        self
    }

    pub fn on_guardrail_failed(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.guardrail_failed = Some(Arc::new(f));
        self
    }

    pub fn on_handoff(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hooks.handoff = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&AgentResult) + Send + Sync + 'static) -> Self {
        self.hooks.complete = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&AgentError) + Send + Sync + 'static) -> Self {
        self.hooks.error = Some(Arc::new(f));
        self
    }

    /// Receive every phase as an event. The channel closes when the run ends.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StreamEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hooks.events = Some(tx);
        rx
    }

    // === Execution ===

    /// Run to completion.
    ///
    /// Always yields a result; a panic inside the run becomes an error result.
    pub async fn start(self) -> AgentResult {
        let hooks = self.hooks.clone();
        let result = match AssertUnwindSafe((self.run)(self.hooks)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(error = %message, "Stream run panicked");
                AgentResult::failed(AgentError::Unexpected(message))
            }
        };
        hooks.finished(&result);
        result
    }

    /// Run with hooks inherited from an enclosing stream, without reporting
    /// completion.
    pub(crate) fn run_nested(self, hooks: StreamHooks) -> BoxFuture<'static, AgentResult> {
        (self.run)(hooks)
    }
}

impl std::fmt::Debug for AgentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStream").finish_non_exhaustive()
    }
}
