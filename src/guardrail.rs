//! Input and output validation gates

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::AgentContext;

/// Outcome of a guardrail check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GuardrailResult {
    Passed,
    Failed { reason: String },
}

impl GuardrailResult {
    pub fn passed() -> Self {
        Self::Passed
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    pub fn is_failed(&self) -> bool {
        !self.is_passed()
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Passed => None,
            Self::Failed { reason } => Some(reason),
        }
    }
}

/// Validates user input before the first model call.
pub trait InputGuardrail: Send + Sync {
    fn validate(&self, input: &str, context: &AgentContext) -> GuardrailResult;

    /// Registry id, if this guardrail was registered by name
    fn id(&self) -> Option<&str> {
        None
    }
}

/// Validates the final output after the loop ends.
pub trait OutputGuardrail: Send + Sync {
    fn validate(&self, output: &str, context: &AgentContext) -> GuardrailResult;

    fn id(&self) -> Option<&str> {
        None
    }
}

impl<F> InputGuardrail for F
where
    F: Fn(&str, &AgentContext) -> GuardrailResult + Send + Sync,
{
    fn validate(&self, input: &str, context: &AgentContext) -> GuardrailResult {
        self(input, context)
    }
}

impl<F> OutputGuardrail for F
where
    F: Fn(&str, &AgentContext) -> GuardrailResult + Send + Sync,
{
    fn validate(&self, output: &str, context: &AgentContext) -> GuardrailResult {
        self(output, context)
    }
}

/// Input guardrail that carries its registry id.
pub struct NamedInputGuardrail {
    id: String,
    inner: Arc<dyn InputGuardrail>,
}

impl InputGuardrail for NamedInputGuardrail {
    fn validate(&self, input: &str, context: &AgentContext) -> GuardrailResult {
        self.inner.validate(input, context)
    }

    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

/// Output guardrail that carries its registry id.
pub struct NamedOutputGuardrail {
    id: String,
    inner: Arc<dyn OutputGuardrail>,
}

impl OutputGuardrail for NamedOutputGuardrail {
    fn validate(&self, output: &str, context: &AgentContext) -> GuardrailResult {
        self.inner.validate(output, context)
    }

    fn id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

/// Register `guardrail` under `id` and return a handle that reports it.
pub fn named_input<G>(id: impl Into<String>, guardrail: G) -> NamedInputGuardrail
where
    G: InputGuardrail + 'static,
{
    let id = id.into();
    let inner: Arc<dyn InputGuardrail> = Arc::new(guardrail);
    GuardrailRegistry::register_input(&id, Arc::clone(&inner));
    NamedInputGuardrail { id, inner }
}

/// Register `guardrail` under `id` and return a handle that reports it.
pub fn named_output<G>(id: impl Into<String>, guardrail: G) -> NamedOutputGuardrail
where
    G: OutputGuardrail + 'static,
{
    let id = id.into();
    let inner: Arc<dyn OutputGuardrail> = Arc::new(guardrail);
    GuardrailRegistry::register_output(&id, Arc::clone(&inner));
    NamedOutputGuardrail { id, inner }
}

#[derive(Clone)]
enum Registered {
    Input(Arc<dyn InputGuardrail>),
    Output(Arc<dyn OutputGuardrail>),
}

static REGISTRY: LazyLock<RwLock<HashMap<String, Registered>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Process-wide id to guardrail lookup.
///
/// Only used to rebuild guardrails from descriptors; normal execution holds
/// guardrails directly.
pub struct GuardrailRegistry;

impl GuardrailRegistry {
    pub fn register_input(id: &str, guardrail: Arc<dyn InputGuardrail>) {
        debug!(id, "Registering input guardrail");
        REGISTRY
            .write()
            .insert(id.to_string(), Registered::Input(guardrail));
    }

    pub fn register_output(id: &str, guardrail: Arc<dyn OutputGuardrail>) {
        debug!(id, "Registering output guardrail");
        REGISTRY
            .write()
            .insert(id.to_string(), Registered::Output(guardrail));
    }

    pub fn input(id: &str) -> Option<Arc<dyn InputGuardrail>> {
        match REGISTRY.read().get(id) {
            Some(Registered::Input(g)) => Some(Arc::clone(g)),
            _ => None,
        }
    }

    pub fn output(id: &str) -> Option<Arc<dyn OutputGuardrail>> {
        match REGISTRY.read().get(id) {
            Some(Registered::Output(g)) => Some(Arc::clone(g)),
            _ => None,
        }
    }

    pub fn contains(id: &str) -> bool {
        REGISTRY.read().contains_key(id)
    }
}
