//! Engine error types

use thiserror::Error;

/// Errors that can terminate an interaction.
///
/// Tool failures and tool rejections are not listed here. They are fed back
/// into the conversation as tool outputs and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// Input guardrail rejected the request before any model call
    #[error("Input guardrail failed: {0}")]
    InputGuardrail(String),

    /// Output guardrail rejected the final answer
    #[error("Output guardrail failed: {0}")]
    OutputGuardrail(String),

    /// The model transport returned an error
    #[error("Agent '{agent}' model call failed on turn {turn}: {message}")]
    ModelCall {
        agent: String,
        turn: u32,
        message: String,
    },

    /// The handoff target could not be run
    #[error("Agent '{agent}' handoff to '{target}' failed: {message}")]
    Handoff {
        agent: String,
        target: String,
        message: String,
    },

    /// Structured output could not be parsed
    #[error("Failed to parse structured output: {0}")]
    OutputParsing(String),

    /// A fanned-out member failed
    #[error("Member '{member}' failed: {message}")]
    MemberFailed { member: String, message: String },

    /// Every member of a race failed
    #[error("All {0} members failed")]
    AllMembersFailed(usize),

    /// Router could not select a target and has no fallback
    #[error("No suitable route found for input")]
    NoSuitableRoute,

    /// No user message to act on
    #[error("No user message found in context")]
    NoUserMessage,

    /// Unknown department name
    #[error("Department not found: {0}")]
    DepartmentNotFound(String),

    /// Run state cannot be resumed as requested
    #[error("Invalid run state: {0}")]
    InvalidRunState(String),

    /// Builder validation error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Anything else caught at the interaction boundary
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AgentError {
    /// Whether this error came from a guardrail.
    pub fn is_guardrail(&self) -> bool {
        matches!(self, Self::InputGuardrail(_) | Self::OutputGuardrail(_))
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Errors returned by tool dispatch.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Arguments did not match the tool's parameter shape
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran and failed
    #[error("{0}")]
    Failed(String),
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err.to_string())
    }
}
