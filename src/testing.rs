//! Test doubles shared by the module tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;

use crate::agent::Agent;
use crate::context::AgentContext;
use crate::descriptor::{AgentDescriptor, Descriptor};
use crate::error::{AgentError, ToolError};
use crate::interactable::Interactable;
use crate::model::{FunctionCall, Message, ModelRequest, ModelResponse, Responder};
use crate::result::AgentResult;
use crate::stream::AgentStream;
use crate::tool::Tool;

/// Responder that replays a fixed script of responses.
pub(crate) struct ScriptedResponder {
    script: Mutex<VecDeque<Result<ModelResponse, String>>>,
    fallback: Option<ModelResponse>,
    delay: Duration,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedResponder {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Text replies, one per call.
    pub fn replying(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| ModelResponse::text(*t)).collect())
    }

    /// Same response on every call.
    pub fn always(response: ModelResponse) -> Self {
        let mut responder = Self::new(Vec::new());
        responder.fallback = Some(response);
        responder
    }

    pub fn failing(message: &str) -> Self {
        let responder = Self::new(Vec::new());
        responder.script.lock().push_back(Err(message.to_string()));
        responder
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<ModelRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn respond(&self, request: ModelRequest) -> anyhow::Result<ModelResponse> {
        self.requests.lock().push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow::anyhow!("script exhausted")),
        }
    }
}

/// Responder whose every call panics.
pub(crate) struct PanickingResponder;

#[async_trait]
impl Responder for PanickingResponder {
    async fn respond(&self, _request: ModelRequest) -> anyhow::Result<ModelResponse> {
        panic!("transport crashed");
    }
}

pub(crate) fn text(content: &str) -> ModelResponse {
    ModelResponse::text(content)
}

pub(crate) fn call(call_id: &str, name: &str, arguments: &str) -> ModelResponse {
    ModelResponse::tool_calls(vec![FunctionCall::new(call_id, name, arguments)])
}

/// Agent with the given name and script.
pub(crate) fn scripted_agent(name: &str, responder: Arc<ScriptedResponder>) -> Agent {
    Agent::builder()
        .name(name)
        .model("test-model")
        .instructions(format!("You are {name}."))
        .responder(responder)
        .build()
        .unwrap()
}

/// Tool that counts its invocations and echoes a fixed output.
#[derive(Clone)]
pub(crate) struct CountingTool {
    name: String,
    output: String,
    confirm: bool,
    calls: Arc<AtomicUsize>,
}

impl CountingTool {
    pub fn new(name: &str, output: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let tool = Self {
            name: name.to_string(),
            output: output.to_string(),
            confirm: false,
            calls: Arc::clone(&calls),
        };
        (tool, calls)
    }

    pub fn confirmed(mut self) -> Self {
        self.confirm = true;
        self
    }
}

#[async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Counts calls"
    }

    fn parameters(&self) -> serde_json::Value {
        json!({"type": "object", "properties": {}})
    }

    fn requires_confirmation(&self) -> bool {
        self.confirm
    }

    async fn call(&self, _arguments: &str, _context: &AgentContext) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Member that sleeps, then answers or fails.
#[derive(Clone)]
pub(crate) struct SlowMember {
    name: String,
    delay: Duration,
    outcome: Result<String, String>,
    panics: bool,
    finished: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<AgentContext>>>,
}

impl SlowMember {
    pub fn answering(name: &str, delay_ms: u64, output: &str) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::from_millis(delay_ms),
            outcome: Ok(output.to_string()),
            panics: false,
            finished: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(name: &str, delay_ms: u64, message: &str) -> Self {
        let mut member = Self::answering(name, delay_ms, "");
        member.outcome = Err(message.to_string());
        member
    }

    pub fn panicking(name: &str, delay_ms: u64) -> Self {
        let mut member = Self::answering(name, delay_ms, "");
        member.panics = true;
        member
    }

    /// Runs that reached the end of their delay.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    /// Contexts as received, before this member touched them.
    pub fn received(&self) -> Vec<AgentContext> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl Interactable for SlowMember {
    fn name(&self) -> &str {
        &self.name
    }

    async fn interact(&self, context: &mut AgentContext) -> AgentResult {
        self.received.lock().push(context.copy());
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        if self.panics {
            panic!("{} crashed", self.name);
        }

        match &self.outcome {
            Ok(output) => {
                context.add_message(Message::assistant(output.clone()));
                AgentResult::success(output.clone()).with_history(context.history().to_vec())
            }
            Err(message) => AgentResult::failed(AgentError::Unexpected(message.clone()))
                .with_history(context.history().to_vec()),
        }
    }

    fn interact_stream(&self, context: AgentContext) -> AgentStream {
        let member = self.clone();
        AgentStream::new(move |_| {
            async move {
                let mut context = context;
                member.interact(&mut context).await
            }
            .boxed()
        })
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::Agent(AgentDescriptor {
            name: self.name.clone(),
            model: "none".into(),
            instructions: None,
            max_turns: 1,
            temperature: None,
            responder: "SlowMember".into(),
            tools: Vec::new(),
            handoffs: Vec::new(),
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            structured_output: false,
            context_max_tokens: None,
        })
    }
}
