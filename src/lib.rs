//! # Conclave
//!
//! Agent turn engine and multi-agent composition.
//!
//! An [`Agent`] runs a bounded loop of model calls and tool executions over
//! an [`AgentContext`]. Agents and every composition implement
//! [`Interactable`], so compositions nest freely.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     HIERARCHY (construction only)                    │
//! │                  executive ──► department supervisors                │
//! └────────────────────────────┬────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!   ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//!   │ Supervisor  │     │   Router    │     │  Parallel / │
//!   │ (workers as │     │ (classify,  │     │   Network   │
//!   │   tools)    │     │  delegate)  │     │  (fan-out)  │
//!   └──────┬──────┘     └──────┬──────┘     └──────┬──────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!   ┌─────────────────────────────────────────────────────────────────┐
//!   │  AGENT turn loop: guardrails ─► model ─► tools / handoff ─► ... │
//!   └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Context**: conversation history, state and trace ids for one run
//! - **Interactable**: anything that turns a context into an [`AgentResult`]
//! - **Stream**: the same run with phase callbacks and an event channel
//! - **Run state**: a serializable snapshot of a run paused for tool approval

pub mod agent;
pub mod config;
pub mod context;
pub mod context_window;
pub mod descriptor;
pub mod error;
pub mod guardrail;
pub mod handoff;
pub mod hierarchy;
pub mod interactable;
pub mod model;
pub mod network;
pub mod orchestrator;
pub mod parallel;
pub mod result;
pub mod router;
pub mod run_state;
pub mod stream;
pub mod supervisor;
pub mod tool;
pub mod trace;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentBuilder};
pub use config::RuntimeConfig;
pub use context::{AgentContext, ContextSharing};
pub use context_window::{
    ContextManagement, ContextWindowStrategy, SimpleTokenCounter, SlidingWindowStrategy,
    TokenCounter,
};
pub use descriptor::Descriptor;
pub use error::{AgentError, ToolError};
pub use guardrail::{GuardrailRegistry, GuardrailResult, InputGuardrail, OutputGuardrail};
pub use handoff::Handoff;
pub use hierarchy::{Department, HierarchicalAgents};
pub use interactable::{Interactable, InteractableExt};
pub use model::{ConversationItem, FunctionCall, Message, ModelRequest, ModelResponse, Responder};
pub use network::{AgentNetwork, Contribution, NetworkResult};
pub use orchestrator::Member;
pub use parallel::ParallelAgents;
pub use result::{AgentResult, Outcome, StructuredAgentResult};
pub use router::{Route, RouterAgent};
pub use run_state::{AgentRunState, ApprovalDecision, RunStatus};
pub use stream::{AgentStream, StreamEvent};
pub use supervisor::{InteractableTool, SupervisorAgent, Worker};
pub use tool::{FunctionTool, Tool, ToolExecution};
pub use trace::TraceIdGenerator;
