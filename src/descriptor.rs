//! Construction-parameter snapshots of composition graphs

use serde::{Deserialize, Serialize};

/// What an [`Interactable`](crate::Interactable) was built from.
///
/// Enough for an external blueprint layer to rebuild the graph given the
/// responders, tools and guardrails by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Descriptor {
    Agent(AgentDescriptor),
    Parallel {
        name: String,
        members: Vec<Descriptor>,
        synthesizer: Option<Box<Descriptor>>,
    },
    Network {
        name: String,
        peers: Vec<Descriptor>,
        max_rounds: u32,
        synthesizer: Option<Box<Descriptor>>,
    },
    Router {
        name: String,
        model: String,
        routes: Vec<Binding>,
        fallback: Option<Box<Descriptor>>,
    },
    Supervisor {
        name: String,
        model: String,
        instructions: Option<String>,
        max_turns: u32,
        workers: Vec<Binding>,
    },
    Hierarchical {
        name: String,
        executive: Box<Descriptor>,
        departments: Vec<DepartmentDescriptor>,
    },
}

impl Descriptor {
    pub fn name(&self) -> &str {
        match self {
            Self::Agent(agent) => &agent.name,
            Self::Parallel { name, .. }
            | Self::Network { name, .. }
            | Self::Router { name, .. }
            | Self::Supervisor { name, .. }
            | Self::Hierarchical { name, .. } => name,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Parameters of a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub model: String,
    pub instructions: Option<String>,
    pub max_turns: u32,
    pub temperature: Option<f64>,
    pub responder: String,
    pub tools: Vec<String>,
    pub handoffs: Vec<String>,
    /// Registry ids of named input guardrails
    pub input_guardrails: Vec<String>,
    pub output_guardrails: Vec<String>,
    pub structured_output: bool,
    /// Token budget of the request history, when trimmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_max_tokens: Option<usize>,
}

/// A member bound with a description: a route or a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub description: String,
    pub target: Descriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentDescriptor {
    pub name: String,
    pub manager: Descriptor,
    pub workers: Vec<Descriptor>,
}
