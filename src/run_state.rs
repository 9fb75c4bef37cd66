//! Persistable snapshot of a paused run

use serde::{Deserialize, Serialize};

use crate::context::AgentContext;
use crate::error::AgentError;
use crate::model::{FunctionCall, ModelResponse};
use crate::tool::ToolExecution;

/// Output sent to the model when a reviewer declines a call.
pub const REJECTION_MESSAGE: &str = "Tool execution was rejected by user";

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    PendingToolApproval,
    Completed,
    Failed,
}

/// Reviewer decision applied to a pending tool call before resuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Run the tool on resume
    Approve,
    /// Use the given output without running the tool
    ApproveWithOutput(String),
    /// Feed a rejection back to the model
    Reject { reason: Option<String> },
}

/// Everything needed to continue a run that paused for tool approval.
///
/// Serialize it, hand the pending call to a reviewer, apply a decision and
/// pass it to [`Agent::resume`](crate::Agent::resume), possibly in another
/// process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunState {
    agent_name: String,
    context: AgentContext,
    status: RunStatus,
    pending_tool_call: Option<FunctionCall>,
    /// Calls from the same model response queued behind the pending one
    #[serde(default)]
    remaining_tool_calls: Vec<FunctionCall>,
    last_response: Option<ModelResponse>,
    tool_executions: Vec<ToolExecution>,
    current_turn: u32,
    /// Turn counter value when the run began, for the turn budget
    #[serde(default)]
    start_turn: u32,
    #[serde(skip)]
    decision: Option<ApprovalDecision>,
}

impl AgentRunState {
    pub(crate) fn pending_approval(
        agent_name: impl Into<String>,
        context: AgentContext,
        pending_tool_call: FunctionCall,
        remaining_tool_calls: Vec<FunctionCall>,
        last_response: Option<ModelResponse>,
        tool_executions: Vec<ToolExecution>,
        start_turn: u32,
    ) -> Self {
        let current_turn = context.turn_count();
        Self {
            agent_name: agent_name.into(),
            context,
            status: RunStatus::PendingToolApproval,
            pending_tool_call: Some(pending_tool_call),
            remaining_tool_calls,
            last_response,
            tool_executions,
            current_turn,
            start_turn,
            decision: None,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_pending_approval(&self) -> bool {
        self.status == RunStatus::PendingToolApproval
    }

    pub fn pending_tool_call(&self) -> Option<&FunctionCall> {
        self.pending_tool_call.as_ref()
    }

    pub fn remaining_tool_calls(&self) -> &[FunctionCall] {
        &self.remaining_tool_calls
    }

    pub fn last_response(&self) -> Option<&ModelResponse> {
        self.last_response.as_ref()
    }

    pub fn tool_executions(&self) -> &[ToolExecution] {
        &self.tool_executions
    }

    pub fn current_turn(&self) -> u32 {
        self.current_turn
    }

    pub fn decision(&self) -> Option<&ApprovalDecision> {
        self.decision.as_ref()
    }

    // === Decisions ===

    /// Approve the pending call; the tool runs when the run resumes.
    pub fn approve_tool_call(&mut self) -> Result<(), AgentError> {
        self.decide(ApprovalDecision::Approve, "approve")
    }

    /// Approve the pending call with an output produced out of band.
    pub fn approve_tool_call_with_output(
        &mut self,
        output: impl Into<String>,
    ) -> Result<(), AgentError> {
        self.decide(ApprovalDecision::ApproveWithOutput(output.into()), "approve")
    }

    pub fn reject_tool_call(&mut self) -> Result<(), AgentError> {
        self.decide(ApprovalDecision::Reject { reason: None }, "reject")
    }

    /// Reject with a reason shown to the model.
    pub fn reject_tool_call_with_reason(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<(), AgentError> {
        self.decide(
            ApprovalDecision::Reject {
                reason: Some(reason.into()),
            },
            "reject",
        )
    }

    fn decide(&mut self, decision: ApprovalDecision, verb: &str) -> Result<(), AgentError> {
        if !self.is_pending_approval() || self.pending_tool_call.is_none() {
            return Err(AgentError::InvalidRunState(format!(
                "No pending tool call to {verb}"
            )));
        }
        self.decision = Some(decision);
        Ok(())
    }

    // === Persistence ===

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub(crate) fn into_parts(self) -> ResumeParts {
        ResumeParts {
            context: self.context,
            pending_tool_call: self.pending_tool_call,
            remaining_tool_calls: self.remaining_tool_calls,
            last_response: self.last_response,
            tool_executions: self.tool_executions,
            start_turn: self.start_turn,
            decision: self.decision,
        }
    }
}

/// Owned pieces of a run state, consumed by resume.
pub(crate) struct ResumeParts {
    pub context: AgentContext,
    pub pending_tool_call: Option<FunctionCall>,
    pub remaining_tool_calls: Vec<FunctionCall>,
    pub last_response: Option<ModelResponse>,
    pub tool_executions: Vec<ToolExecution>,
    pub start_turn: u32,
    pub decision: Option<ApprovalDecision>,
}
