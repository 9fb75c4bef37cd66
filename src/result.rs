//! Terminal outcome of an interaction

use crate::error::AgentError;
use crate::model::{ConversationItem, ModelResponse};
use crate::run_state::AgentRunState;
use crate::tool::ToolExecution;

/// Shape of a result. Exactly one applies.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success,
    /// Control was transferred to `target`, whose output this result carries
    Handoff { target: String },
    Error(AgentError),
    /// Waiting for tool approval
    Paused(Box<AgentRunState>),
}

/// Result of one interaction.
#[derive(Debug, Clone)]
pub struct AgentResult {
    outcome: Outcome,
    output: Option<String>,
    final_response: Option<ModelResponse>,
    history: Vec<ConversationItem>,
    tool_executions: Vec<ToolExecution>,
    turns_used: u32,
    parsed: Option<serde_json::Value>,
    related: Vec<AgentResult>,
}

impl AgentResult {
    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            outcome,
            output: None,
            final_response: None,
            history: Vec::new(),
            tool_executions: Vec::new(),
            turns_used: 0,
            parsed: None,
            related: Vec::new(),
        }
    }

    pub fn success(output: impl Into<String>) -> Self {
        let mut result = Self::with_outcome(Outcome::Success);
        result.output = Some(output.into());
        result
    }

    pub fn handoff(target: impl Into<String>, output: Option<String>) -> Self {
        let mut result = Self::with_outcome(Outcome::Handoff {
            target: target.into(),
        });
        result.output = output;
        result
    }

    pub fn failed(error: AgentError) -> Self {
        Self::with_outcome(Outcome::Error(error))
    }

    pub fn paused(state: AgentRunState) -> Self {
        let history = state.context().history().to_vec();
        let tool_executions = state.tool_executions().to_vec();
        let turns_used = state.current_turn();
        Self::with_outcome(Outcome::Paused(Box::new(state)))
            .with_history(history)
            .with_tool_executions(tool_executions)
            .with_turns_used(turns_used)
    }

    // === Builders ===

    pub fn with_history(mut self, history: Vec<ConversationItem>) -> Self {
        self.history = history;
        self
    }

    pub fn with_tool_executions(mut self, executions: Vec<ToolExecution>) -> Self {
        self.tool_executions = executions;
        self
    }

    pub fn with_turns_used(mut self, turns: u32) -> Self {
        self.turns_used = turns;
        self
    }

    pub fn with_final_response(mut self, response: Option<ModelResponse>) -> Self {
        self.final_response = response;
        self
    }

    pub fn with_parsed(mut self, parsed: serde_json::Value) -> Self {
        self.parsed = Some(parsed);
        self
    }

    /// Attach secondary results, e.g. the other members of a fan-out.
    pub fn with_related(mut self, related: Vec<AgentResult>) -> Self {
        self.related = related;
        self
    }

    /// Turn this result into an error while keeping history and executions.
    pub fn into_error(mut self, error: AgentError) -> Self {
        self.outcome = Outcome::Error(error);
        self.output = None;
        self.parsed = None;
        self
    }

    // === Shape ===

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// True for normal completion and for handoffs.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success | Outcome::Handoff { .. })
    }

    pub fn is_handoff(&self) -> bool {
        matches!(self.outcome, Outcome::Handoff { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.outcome, Outcome::Paused(_))
    }

    pub fn error(&self) -> Option<&AgentError> {
        match &self.outcome {
            Outcome::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn handoff_target(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Handoff { target } => Some(target),
            _ => None,
        }
    }

    pub fn paused_state(&self) -> Option<&AgentRunState> {
        match &self.outcome {
            Outcome::Paused(state) => Some(state),
            _ => None,
        }
    }

    pub fn into_paused_state(self) -> Option<AgentRunState> {
        match self.outcome {
            Outcome::Paused(state) => Some(*state),
            _ => None,
        }
    }

    // === Payload ===

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Output text, empty if there is none.
    pub fn output_text(&self) -> &str {
        self.output.as_deref().unwrap_or_default()
    }

    pub fn final_response(&self) -> Option<&ModelResponse> {
        self.final_response.as_ref()
    }

    pub fn history(&self) -> &[ConversationItem] {
        &self.history
    }

    pub fn tool_executions(&self) -> &[ToolExecution] {
        &self.tool_executions
    }

    pub fn turns_used(&self) -> u32 {
        self.turns_used
    }

    pub fn parsed(&self) -> Option<&serde_json::Value> {
        self.parsed.as_ref()
    }

    pub fn related(&self) -> &[AgentResult] {
        &self.related
    }
}

/// Result whose output was deserialized into `T`.
#[derive(Debug, Clone)]
pub struct StructuredAgentResult<T> {
    result: AgentResult,
    value: Option<T>,
}

impl<T> StructuredAgentResult<T> {
    pub(crate) fn new(result: AgentResult, value: Option<T>) -> Self {
        Self { result, value }
    }

    pub fn is_success(&self) -> bool {
        self.value.is_some() && self.result.is_success()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn error(&self) -> Option<&AgentError> {
        self.result.error()
    }

    /// The untyped result this was parsed from.
    pub fn result(&self) -> &AgentResult {
        &self.result
    }
}

/// Slice out the JSON payload of a model answer, ignoring a markdown fence.
pub(crate) fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}
