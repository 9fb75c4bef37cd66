//! Agent implementation - the turn loop

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{validate_max_turns, validate_temperature, RuntimeConfig};
use crate::context::AgentContext;
use crate::context_window::ContextManagement;
use crate::descriptor::{AgentDescriptor, Descriptor};
use crate::error::{panic_message, AgentError};
use crate::guardrail::{GuardrailResult, InputGuardrail, OutputGuardrail};
use crate::handoff::Handoff;
use crate::interactable::Interactable;
use crate::model::{FunctionCall, Message, ModelRequest, ModelResponse, Responder, ToolOutput};
use crate::result::{extract_json, AgentResult};
use crate::run_state::{AgentRunState, ApprovalDecision, REJECTION_MESSAGE};
use crate::stream::{AgentStream, StreamHooks};
use crate::tool::{Tool, ToolExecution, ToolSet};
use crate::trace::TraceIdGenerator;

/// Immutable definition of an agent, produced by [`AgentBuilder`].
pub struct AgentDefinition {
    name: String,
    model: String,
    instructions: Option<String>,
    responder: Arc<dyn Responder>,
    tools: ToolSet,
    handoffs: Vec<Handoff>,
    input_guardrails: Vec<Arc<dyn InputGuardrail>>,
    output_guardrails: Vec<Arc<dyn OutputGuardrail>>,
    max_turns: u32,
    temperature: Option<f64>,
    structured_output: bool,
    context_management: Option<ContextManagement>,
}

impl AgentDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    /// Model transport this agent calls
    pub fn responder(&self) -> &Arc<dyn Responder> {
        &self.responder
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn input_guardrail_count(&self) -> usize {
        self.input_guardrails.len()
    }

    pub fn output_guardrail_count(&self) -> usize {
        self.output_guardrails.len()
    }

    pub fn context_management(&self) -> Option<&ContextManagement> {
        self.context_management.as_ref()
    }
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    name: Option<String>,
    model: Option<String>,
    instructions: Option<String>,
    responder: Option<Arc<dyn Responder>>,
    tools: ToolSet,
    handoffs: Vec<Handoff>,
    input_guardrails: Vec<Arc<dyn InputGuardrail>>,
    output_guardrails: Vec<Arc<dyn OutputGuardrail>>,
    max_turns: u32,
    temperature: Option<f64>,
    structured_output: bool,
    context_management: Option<ContextManagement>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        let config = RuntimeConfig::default();
        Self {
            name: None,
            model: None,
            instructions: None,
            responder: None,
            tools: ToolSet::new(),
            handoffs: Vec::new(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            max_turns: config.max_turns,
            temperature: config.temperature,
            structured_output: false,
            context_management: None,
        }
    }
}

impl AgentBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.add(Arc::new(tool));
        self
    }

    pub fn handoff(mut self, handoff: Handoff) -> Self {
        self.handoffs.push(handoff);
        self
    }

    pub fn input_guardrail(mut self, guardrail: impl InputGuardrail + 'static) -> Self {
        self.input_guardrails.push(Arc::new(guardrail));
        self
    }

    pub fn output_guardrail(mut self, guardrail: impl OutputGuardrail + 'static) -> Self {
        self.output_guardrails.push(Arc::new(guardrail));
        self
    }

    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Parse the final output as JSON into [`AgentResult::parsed`].
    pub fn structured_output(mut self) -> Self {
        self.structured_output = true;
        self
    }

    /// Trim the history sent to the model. The context itself keeps everything.
    pub fn context_management(mut self, config: ContextManagement) -> Self {
        self.context_management = Some(config);
        self
    }

    /// Adopt turn and temperature defaults from `config`.
    pub fn config(mut self, config: &RuntimeConfig) -> Self {
        self.max_turns = config.max_turns;
        self.temperature = config.temperature;
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| AgentError::Configuration("agent name is required".into()))?;
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| AgentError::Configuration(format!("agent '{name}' needs a model")))?;
        let responder = self
            .responder
            .ok_or_else(|| AgentError::Configuration(format!("agent '{name}' needs a responder")))?;
        validate_max_turns(self.max_turns)?;
        validate_temperature(self.temperature)?;

        if let Some(clash) = self.handoffs.iter().find(|h| self.tools.contains(h.name())) {
            return Err(AgentError::Configuration(format!(
                "handoff '{}' clashes with a tool of the same name",
                clash.name()
            )));
        }

        debug!(agent = %name, model = %model, tools = self.tools.len(), "Building agent");

        Ok(Agent {
            inner: Arc::new(AgentDefinition {
                name,
                model,
                instructions: self.instructions,
                responder,
                tools: self.tools,
                handoffs: self.handoffs,
                input_guardrails: self.input_guardrails,
                output_guardrails: self.output_guardrails,
                max_turns: self.max_turns,
                temperature: self.temperature,
                structured_output: self.structured_output,
                context_management: self.context_management,
            }),
        })
    }
}

/// Handle to an agent. Cheap to clone.
///
/// Each interaction calls the model, runs any requested tools, and loops
/// until the model stops asking for tools or the turn limit is reached.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentDefinition>,
}

impl std::ops::Deref for Agent {
    type Target = AgentDefinition;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.inner.name)
            .field("model", &self.inner.model)
            .field("tools", &self.inner.tools)
            .finish()
    }
}

/// Loop bookkeeping that survives a pause.
struct RunProgress {
    executions: Vec<ToolExecution>,
    last_response: Option<ModelResponse>,
    pending: VecDeque<FunctionCall>,
    start_turn: u32,
}

impl RunProgress {
    fn fresh(context: &AgentContext) -> Self {
        Self {
            executions: Vec::new(),
            last_response: None,
            pending: VecDeque::new(),
            start_turn: context.turn_count(),
        }
    }

    fn turns_used(&self, context: &AgentContext) -> u32 {
        context.turn_count().saturating_sub(self.start_turn)
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    /// Continue a paused run once a decision has been applied to `state`.
    pub async fn resume(&self, state: AgentRunState) -> AgentResult {
        self.resume_with(state, &StreamHooks::default()).await
    }

    /// Streaming variant of [`resume`](Self::resume).
    pub fn resume_stream(&self, state: AgentRunState) -> AgentStream {
        let agent = self.clone();
        AgentStream::new(move |hooks| {
            async move { agent.resume_with(state, &hooks).await }.boxed()
        })
    }

    /// Fresh run: input guardrails, then the loop.
    pub(crate) fn run<'a>(
        &'a self,
        context: &'a mut AgentContext,
        hooks: &'a StreamHooks,
    ) -> BoxFuture<'a, AgentResult> {
        let span = info_span!("agent_run", agent = %self.name);
        async move {
            context.ensure_trace_context();

            let input = context.last_user_message().unwrap_or_default().to_string();
            for guardrail in &self.input_guardrails {
                if let GuardrailResult::Failed { reason } = guardrail.validate(&input, context) {
                    warn!(agent = %self.name, reason = %reason, "Input guardrail failed");
                    hooks.guardrail_failed(&self.name, &reason);
                    return AgentResult::failed(AgentError::InputGuardrail(reason))
                        .with_history(context.history().to_vec());
                }
            }

            info!(agent = %self.name, "Starting agent run");
            let progress = RunProgress::fresh(context);
            self.run_loop(context, progress, hooks).await
        }
        .instrument(span)
        .boxed()
    }

    async fn resume_with(&self, state: AgentRunState, hooks: &StreamHooks) -> AgentResult {
        if state.agent_name() != self.name {
            return AgentResult::failed(AgentError::InvalidRunState(format!(
                "run state belongs to agent '{}', not '{}'",
                state.agent_name(),
                self.name
            )));
        }
        if !state.is_pending_approval() {
            return AgentResult::failed(AgentError::InvalidRunState(
                "run state is not pending tool approval".into(),
            ));
        }

        let parts = state.into_parts();
        let Some(call) = parts.pending_tool_call else {
            return AgentResult::failed(AgentError::InvalidRunState(
                "run state has no pending tool call".into(),
            ));
        };
        let Some(decision) = parts.decision else {
            return AgentResult::failed(AgentError::InvalidRunState(
                "approve or reject the pending tool call before resuming".into(),
            ));
        };

        let mut context = parts.context;
        let mut progress = RunProgress {
            executions: parts.tool_executions,
            last_response: parts.last_response,
            pending: parts.remaining_tool_calls.into(),
            start_turn: parts.start_turn,
        };

        info!(agent = %self.name, tool = %call.name, decision = ?decision, "Resuming run");

        match decision {
            ApprovalDecision::Approve => {
                let execution = self.tools.execute_with_hooks(&call, &context, hooks).await;
                self.record(&mut context, &mut progress, hooks, execution);
            }
            ApprovalDecision::ApproveWithOutput(output) => {
                let execution = ToolExecution {
                    tool_name: call.name.clone(),
                    call_id: call.call_id.clone(),
                    arguments: call.arguments.clone(),
                    output: ToolOutput::success(&call.call_id, output),
                    duration: Duration::ZERO,
                };
                self.record(&mut context, &mut progress, hooks, execution);
            }
            ApprovalDecision::Reject { reason } => {
                let reason = reason.unwrap_or_else(|| REJECTION_MESSAGE.to_string());
                context.add_tool_result(ToolOutput::error(&call.call_id, reason));
            }
        }

        self.run_loop(&mut context, progress, hooks)
            .instrument(info_span!("agent_run", agent = %self.name))
            .await
    }

    async fn run_loop(
        &self,
        context: &mut AgentContext,
        mut progress: RunProgress,
        hooks: &StreamHooks,
    ) -> AgentResult {
        loop {
            if let Some(paused) = self.process_pending(context, &mut progress, hooks).await {
                return paused;
            }

            if progress.turns_used(context) >= self.max_turns {
                debug!(agent = %self.name, max_turns = self.max_turns, "Turn limit reached");
                break;
            }

            let turn = context.increment_turn();
            hooks.turn_start(&self.name, turn);
            debug!(agent = %self.name, turn, "Calling model");

            let request = self.build_request(context);
            let on_delta = |delta: &str| hooks.text_delta(&self.name, delta);
            let response = AssertUnwindSafe(self.responder.respond_streaming(request, &on_delta))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message(panic.as_ref()))));

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    error!(agent = %self.name, turn, error = %e, "Model call failed");
                    let err = AgentError::ModelCall {
                        agent: self.name.clone(),
                        turn,
                        message: format!("{e:#}"),
                    };
                    return self.failed(context, progress, err);
                }
            };

            hooks.turn_complete(&self.name, turn, &response);
            for item in response.to_history() {
                context.add_item(item);
            }

            let calls = response.function_calls();
            progress.last_response = Some(response);
            if calls.is_empty() {
                break;
            }

            if let Some((handoff, call)) = self.find_handoff(&calls) {
                return self
                    .execute_handoff(handoff, call, context, progress, hooks)
                    .await;
            }

            progress.pending = calls.into();
        }

        self.finish(context, progress, hooks)
    }

    /// Run queued tool calls, or pause on one that needs approval.
    async fn process_pending(
        &self,
        context: &mut AgentContext,
        progress: &mut RunProgress,
        hooks: &StreamHooks,
    ) -> Option<AgentResult> {
        while let Some(call) = progress.pending.pop_front() {
            if self.tools.requires_confirmation(&call.name) {
                if hooks.has_approval_handler() && !hooks.has_pause_handler() {
                    if !hooks.approve(&self.name, &call) {
                        info!(agent = %self.name, tool = %call.name, "Tool call rejected");
                        context.add_tool_result(ToolOutput::error(&call.call_id, REJECTION_MESSAGE));
                        continue;
                    }
                } else {
                    let state = AgentRunState::pending_approval(
                        self.name.clone(),
                        context.copy(),
                        call,
                        progress.pending.drain(..).collect(),
                        progress.last_response.clone(),
                        progress.executions.clone(),
                        progress.start_turn,
                    );
                    info!(agent = %self.name, "Run paused for tool approval");
                    hooks.paused(&self.name, &state);
                    let last_response = progress.last_response.clone();
                    return Some(AgentResult::paused(state).with_final_response(last_response));
                }
            }

            let execution = self.tools.execute_with_hooks(&call, context, hooks).await;
            self.record(context, progress, hooks, execution);
        }
        None
    }

    fn record(
        &self,
        context: &mut AgentContext,
        progress: &mut RunProgress,
        hooks: &StreamHooks,
        execution: ToolExecution,
    ) {
        context.add_tool_result(execution.output.clone());
        hooks.tool_executed(&self.name, &execution);
        progress.executions.push(execution);
    }

    fn build_request(&self, context: &AgentContext) -> ModelRequest {
        let mut tools = self.tools.definitions();
        tools.extend(self.handoffs.iter().map(Handoff::definition));
        ModelRequest {
            model: self.model.clone(),
            instructions: self.instructions.clone(),
            input: match &self.context_management {
                Some(config) => config.apply(context.history()),
                None => context.history().to_vec(),
            },
            tools,
            temperature: self.temperature,
        }
    }

    fn find_handoff<'c>(&self, calls: &'c [FunctionCall]) -> Option<(&Handoff, &'c FunctionCall)> {
        calls.iter().find_map(|call| {
            self.handoffs
                .iter()
                .find(|h| h.name() == call.name)
                .map(|h| (h, call))
        })
    }

    async fn execute_handoff(
        &self,
        handoff: &Handoff,
        call: &FunctionCall,
        context: &mut AgentContext,
        progress: RunProgress,
        hooks: &StreamHooks,
    ) -> AgentResult {
        let target = handoff.target().clone();
        info!(agent = %self.name, to = %target.name, "Handing off");
        hooks.handoff(&self.name, &target.name);

        let message = Handoff::message(call);
        context.add_tool_result(ToolOutput::success(
            &call.call_id,
            format!("Handoff initiated: {}", message.as_deref().unwrap_or_default()),
        ));

        let mut forked = context.fork(TraceIdGenerator::span_id());
        if let Some(message) = message {
            forked.add_message(Message::user(message));
        }

        let result = target.run(&mut forked, hooks).await;
        if result.is_paused() {
            return result;
        }
        if let Some(err) = result.error() {
            let err = AgentError::Handoff {
                agent: self.name.clone(),
                target: target.name.clone(),
                message: err.to_string(),
            };
            return result.into_error(err);
        }

        if let Some(output) = result.output().filter(|o| !o.is_empty()) {
            context.add_message(Message::assistant(output));
        }

        let turns_used = progress.turns_used(context);
        let mut executions = progress.executions;
        executions.extend(result.tool_executions().iter().cloned());

        let output = result.output().map(str::to_string);
        let mut handoff_result = AgentResult::handoff(target.name.clone(), output)
            .with_history(result.history().to_vec())
            .with_tool_executions(executions)
            .with_turns_used(turns_used)
            .with_final_response(result.final_response().cloned());
        if let Some(parsed) = result.parsed() {
            handoff_result = handoff_result.with_parsed(parsed.clone());
        }
        handoff_result
    }

    /// Output guardrails and structured parsing, then the final result.
    fn finish(&self, context: &AgentContext, progress: RunProgress, hooks: &StreamHooks) -> AgentResult {
        let output = progress
            .last_response
            .as_ref()
            .map(ModelResponse::output_text)
            .unwrap_or_default();

        for guardrail in &self.output_guardrails {
            if let GuardrailResult::Failed { reason } = guardrail.validate(&output, context) {
                warn!(agent = %self.name, reason = %reason, "Output guardrail failed");
                hooks.guardrail_failed(&self.name, &reason);
                return self.failed(context, progress, AgentError::OutputGuardrail(reason));
            }
        }

        let turns_used = progress.turns_used(context);
        info!(
            agent = %self.name,
            turns_used,
            tool_calls = progress.executions.len(),
            "Agent run complete"
        );

        let result = AgentResult::success(output.clone())
            .with_history(context.history().to_vec())
            .with_tool_executions(progress.executions)
            .with_turns_used(turns_used)
            .with_final_response(progress.last_response);

        if !self.structured_output {
            return result;
        }
        match serde_json::from_str(extract_json(&output)) {
            Ok(parsed) => result.with_parsed(parsed),
            Err(e) => {
                warn!(agent = %self.name, error = %e, "Structured output did not parse");
                result.into_error(AgentError::OutputParsing(e.to_string()))
            }
        }
    }

    fn failed(&self, context: &AgentContext, progress: RunProgress, err: AgentError) -> AgentResult {
        let turns_used = progress.turns_used(context);
        AgentResult::failed(err)
            .with_history(context.history().to_vec())
            .with_tool_executions(progress.executions)
            .with_turns_used(turns_used)
            .with_final_response(progress.last_response)
    }
}

#[async_trait]
impl Interactable for Agent {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn interact(&self, context: &mut AgentContext) -> AgentResult {
        self.run(context, &StreamHooks::default()).await
    }

    fn interact_stream(&self, context: AgentContext) -> AgentStream {
        let agent = self.clone();
        AgentStream::new(move |hooks| {
            async move {
                let mut context = context;
                agent.run(&mut context, &hooks).await
            }
            .boxed()
        })
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::Agent(AgentDescriptor {
            name: self.inner.name.clone(),
            model: self.inner.model.clone(),
            instructions: self.inner.instructions.clone(),
            max_turns: self.inner.max_turns,
            temperature: self.inner.temperature,
            responder: self.inner.responder.describe(),
            tools: self.inner.tools.names(),
            handoffs: self.inner.handoffs.iter().map(|h| h.name().to_string()).collect(),
            input_guardrails: self
                .inner
                .input_guardrails
                .iter()
                .filter_map(|g| g.id().map(str::to_string))
                .collect(),
            output_guardrails: self
                .inner
                .output_guardrails
                .iter()
                .filter_map(|g| g.id().map(str::to_string))
                .collect(),
            structured_output: self.inner.structured_output,
            context_max_tokens: self
                .inner
                .context_management
                .as_ref()
                .map(ContextManagement::max_tokens),
        })
    }
}
