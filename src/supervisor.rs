//! A coordinating agent whose tools are other interactables

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::config::RuntimeConfig;
use crate::context::{AgentContext, ContextSharing};
use crate::descriptor::{Binding, Descriptor};
use crate::error::{AgentError, ToolError};
use crate::handoff::to_snake_case;
use crate::interactable::Interactable;
use crate::model::Responder;
use crate::orchestrator::{run_member, Member};
use crate::result::AgentResult;
use crate::stream::{AgentStream, StreamHooks};
use crate::tool::Tool;

#[derive(Deserialize)]
struct InvokeArgs {
    #[serde(default)]
    request: String,
}

/// Exposes an [`Interactable`] to a model as the tool `invoke_<name>`.
///
/// Each call runs the target on a child of the calling agent's context,
/// derived according to the configured [`ContextSharing`].
#[derive(Clone)]
pub struct InteractableTool {
    name: String,
    description: String,
    target: Member,
    sharing: ContextSharing,
}

impl InteractableTool {
    pub fn new(target: Member) -> Self {
        Self {
            name: format!("invoke_{}", to_snake_case(target.name())),
            description: format!("Invoke {}", target.name()),
            target,
            sharing: ContextSharing::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_sharing(mut self, sharing: ContextSharing) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn target(&self) -> &Member {
        &self.target
    }
}

#[async_trait]
impl Tool for InteractableTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": "The message/request to send to the interactable"
                }
            },
            "required": ["request"],
            "additionalProperties": false
        })
    }

    async fn call(&self, arguments: &str, context: &AgentContext) -> Result<String, ToolError> {
        self.delegate(arguments, context, &StreamHooks::default()).await
    }

    async fn call_with_hooks(
        &self,
        arguments: &str,
        context: &AgentContext,
        hooks: &StreamHooks,
    ) -> Result<String, ToolError> {
        self.delegate(arguments, context, &hooks.for_delegate()).await
    }
}

impl InteractableTool {
    async fn delegate(
        &self,
        arguments: &str,
        context: &AgentContext,
        hooks: &StreamHooks,
    ) -> Result<String, ToolError> {
        let args: InvokeArgs = serde_json::from_str(arguments)?;
        if args.request.trim().is_empty() {
            return Err(ToolError::Failed("Request cannot be empty".into()));
        }

        let child = context.child_context(self.sharing, &args.request);
        debug!(worker = %self.target.name(), sharing = ?self.sharing, "Delegating to worker");
        let result = run_member(self.target.as_ref(), child, hooks).await;

        if let Some(err) = result.error() {
            warn!(worker = %self.target.name(), error = %err, "Worker failed");
            return Err(ToolError::Failed(format!("'{}' failed: {err}", self.target.name())));
        }
        if result.is_paused() {
            return Err(ToolError::Failed(format!(
                "'{}' paused waiting for tool approval",
                self.target.name()
            )));
        }
        Ok(result.output_text().to_string())
    }
}

/// A worker and what it is good at.
#[derive(Clone)]
pub struct Worker {
    worker: Member,
    description: String,
}

impl Worker {
    pub fn worker(&self) -> &Member {
        &self.worker
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// An agent that delegates to workers through tool calls.
///
/// Runs the ordinary turn loop: the model may call any number of workers
/// across turns and sees each worker's output as a tool result.
#[derive(Clone)]
pub struct SupervisorAgent {
    instructions: Option<String>,
    workers: Vec<Worker>,
    agent: Agent,
}

/// Builder for [`SupervisorAgent`]
pub struct SupervisorBuilder {
    name: Option<String>,
    model: Option<String>,
    instructions: Option<String>,
    responder: Option<Arc<dyn Responder>>,
    workers: Vec<Worker>,
    max_turns: u32,
    temperature: Option<f64>,
    sharing: ContextSharing,
}

impl Default for SupervisorBuilder {
    fn default() -> Self {
        let config = RuntimeConfig::default();
        Self {
            name: None,
            model: None,
            instructions: None,
            responder: None,
            workers: Vec::new(),
            max_turns: config.max_turns,
            temperature: config.temperature,
            sharing: config.context_sharing,
        }
    }
}

impl SupervisorBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Base instructions; the worker roster is appended to them.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn worker(self, worker: impl Interactable + 'static, description: impl Into<String>) -> Self {
        self.shared_worker(Arc::new(worker), description)
    }

    /// Add a worker that is already shared, such as a department supervisor.
    pub fn shared_worker(mut self, worker: Member, description: impl Into<String>) -> Self {
        self.workers.push(Worker {
            worker,
            description: description.into(),
        });
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

    /// How much of the supervisor's context each worker call sees
    pub fn context_sharing(mut self, sharing: ContextSharing) -> Self {
        self.sharing = sharing;
        self
    }

    pub fn config(mut self, config: &RuntimeConfig) -> Self {
        self.max_turns = config.max_turns;
        self.temperature = config.temperature;
        self.sharing = config.context_sharing;
        self
    }

    pub fn build(self) -> Result<SupervisorAgent, AgentError> {
        if self.workers.is_empty() {
            return Err(AgentError::Configuration(
                "a supervisor needs at least one worker".into(),
            ));
        }

        let name = self.name.unwrap_or_else(|| "Supervisor".to_string());
        let mut builder = Agent::builder()
            .name(name)
            .instructions(roster(self.instructions.as_deref(), &self.workers))
            .max_turns(self.max_turns);
        if let Some(model) = self.model {
            builder = builder.model(model);
        }
        if let Some(responder) = self.responder {
            builder = builder.responder(responder);
        }
        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }
        let mut tool_names: Vec<String> = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            let tool = InteractableTool::new(Arc::clone(&worker.worker))
                .with_description(worker.description.clone())
                .with_sharing(self.sharing);
            if tool_names.iter().any(|n| n == tool.name()) {
                return Err(AgentError::Configuration(format!(
                    "worker '{}' maps to tool '{}', which another worker already uses",
                    worker.worker.name(),
                    tool.name()
                )));
            }
            tool_names.push(tool.name().to_string());
            builder = builder.tool(tool);
        }

        Ok(SupervisorAgent {
            instructions: self.instructions,
            workers: self.workers,
            agent: builder.build()?,
        })
    }
}

/// Supervisor instructions: the base text, then the worker roster and the
/// delegation procedure.
fn roster(base: Option<&str>, workers: &[Worker]) -> String {
    let mut text = String::new();
    if let Some(base) = base {
        text.push_str(base);
        text.push_str("\n\n");
    }
    text.push_str("You are a supervisor agent with the following workers available:\n\n");
    for worker in workers {
        text.push_str(&format!(
            "- **{}**: {}\n",
            worker.worker.name(),
            worker.description
        ));
    }
    text.push_str(
        "\nTo complete tasks:\n\
         1. Analyze the task and break it into subtasks\n\
         2. Delegate subtasks to appropriate workers using their tools\n\
         3. Wait for worker outputs and synthesize them\n\
         4. Provide the final coordinated response\n",
    );
    text
}

impl SupervisorAgent {
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::default()
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// The agent running the supervisor's turn loop.
    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}

#[async_trait]
impl Interactable for SupervisorAgent {
    fn name(&self) -> &str {
        self.agent.name()
    }

    async fn interact(&self, context: &mut AgentContext) -> AgentResult {
        context.ensure_trace_context();
        self.agent.interact(context).await
    }

    fn interact_stream(&self, context: AgentContext) -> AgentStream {
        self.agent.interact_stream(context)
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::Supervisor {
            name: self.agent.name().to_string(),
            model: self.agent.model().to_string(),
            instructions: self.instructions.clone(),
            max_turns: self.agent.max_turns(),
            workers: self
                .workers
                .iter()
                .map(|w| Binding {
                    description: w.description.clone(),
                    target: w.worker.descriptor(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for SupervisorAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorAgent")
            .field("name", &self.agent.name())
            .field(
                "workers",
                &self.workers.iter().map(|w| w.worker.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
