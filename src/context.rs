//! Per-run conversation state

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{ConversationItem, Message, Role, ToolOutput};
use crate::trace::TraceIdGenerator;

/// How a delegated child sees its parent's context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSharing {
    /// Fresh context holding only the request
    Isolated,
    /// Custom state and trace ids are copied, history starts fresh
    #[default]
    StateOnly,
    /// History is shared through a fork with its own span and turn counter
    Forked,
}

/// Conversation history, custom state, turn counter and trace correlation
/// for one interaction.
///
/// A context is never shared between concurrently running branches: fan-out
/// points hand each branch a [`copy`](Self::copy).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    history: Vec<ConversationItem>,
    state: HashMap<String, serde_json::Value>,
    turn_count: u32,
    parent_trace_id: Option<String>,
    parent_span_id: Option<String>,
    request_id: Option<String>,
}

impl AgentContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context holding a single user message.
    pub fn from_user_message(text: impl Into<String>) -> Self {
        let mut context = Self::new();
        context.add_message(Message::user(text));
        context
    }

    /// Create a context seeded with existing history.
    pub fn with_history(history: Vec<ConversationItem>) -> Self {
        Self {
            history,
            ..Self::default()
        }
    }

    // === History ===

    pub fn add_message(&mut self, message: Message) -> &mut Self {
        self.history.push(message.into());
        self
    }

    pub fn add_item(&mut self, item: ConversationItem) -> &mut Self {
        self.history.push(item);
        self
    }

    pub fn add_tool_result(&mut self, output: ToolOutput) -> &mut Self {
        self.history.push(output.into());
        self
    }

    pub fn history(&self) -> &[ConversationItem] {
        &self.history
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Text of the most recent user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.history.iter().rev().find_map(|item| match item {
            ConversationItem::Message(Message {
                role: Role::User,
                content,
            }) => Some(content.as_str()),
            _ => None,
        })
    }

    // === State ===

    /// Set a state value. `Null` removes the key.
    pub fn set_state(&mut self, key: impl Into<String>, value: serde_json::Value) -> &mut Self {
        let key = key.into();
        if value.is_null() {
            self.state.remove(&key);
        } else {
            self.state.insert(key, value);
        }
        self
    }

    pub fn state(&self, key: &str) -> Option<&serde_json::Value> {
        self.state.get(key)
    }

    /// Deserialize a state value into `T`.
    pub fn state_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.state
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn has_state(&self, key: &str) -> bool {
        self.state.contains_key(key)
    }

    pub fn all_state(&self) -> &HashMap<String, serde_json::Value> {
        &self.state
    }

    // === Turns ===

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    /// Only the owning agent loop calls this.
    pub(crate) fn increment_turn(&mut self) -> u32 {
        self.turn_count += 1;
        self.turn_count
    }

    /// Drop history and state. Trace ids and the turn counter are kept;
    /// the counter never goes backwards.
    pub fn clear(&mut self) -> &mut Self {
        self.history.clear();
        self.state.clear();
        self
    }

    // === Trace correlation ===

    pub fn with_trace_context(
        &mut self,
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
    ) -> &mut Self {
        self.parent_trace_id = Some(trace_id.into());
        self.parent_span_id = Some(span_id.into());
        self
    }

    pub fn with_request_id(&mut self, request_id: impl Into<String>) -> &mut Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn parent_trace_id(&self) -> Option<&str> {
        self.parent_trace_id.as_deref()
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn has_trace_context(&self) -> bool {
        self.parent_trace_id.is_some() && self.parent_span_id.is_some()
    }

    /// Generate trace ids if none are set.
    pub fn ensure_trace_context(&mut self) -> &mut Self {
        if !self.has_trace_context() {
            self.with_trace_context(TraceIdGenerator::trace_id(), TraceIdGenerator::span_id());
        }
        self
    }

    // === Derivation ===

    /// Independent copy: history, state and turn counter can diverge freely.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// History-preserving copy for a child run: new span, turn counter at zero.
    pub fn fork(&self, span_id: impl Into<String>) -> Self {
        let mut forked = self.copy();
        forked.parent_span_id = Some(span_id.into());
        forked.turn_count = 0;
        forked
    }

    /// Build the context a delegated child runs with, ending in `request`.
    pub fn child_context(&self, sharing: ContextSharing, request: &str) -> Self {
        let mut child = match sharing {
            ContextSharing::Forked => self.fork(TraceIdGenerator::span_id()),
            ContextSharing::StateOnly => {
                let mut child = Self::new();
                if let Some(trace_id) = &self.parent_trace_id {
                    if self.parent_span_id.is_some() {
                        child.with_trace_context(trace_id.clone(), TraceIdGenerator::span_id());
                    }
                }
                child.request_id = self.request_id.clone();
                child.state = self.state.clone();
                child
            }
            ContextSharing::Isolated => Self::new(),
        };
        child.add_message(Message::user(request));
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // === Copy Tests ===

    #[test]
    fn test_copy_is_independent() {
        let mut original = AgentContext::from_user_message("hello");
        original.set_state("k", json!(1));
        original.increment_turn();

        let mut copy = original.copy();
        copy.add_message(Message::assistant("from copy"));
        copy.set_state("k", json!(2));
        copy.increment_turn();

        original.add_message(Message::user("from original"));
        original.set_state("other", json!(true));

        assert_eq!(original.history_len(), 2);
        assert_eq!(copy.history_len(), 2);
        assert_eq!(original.history()[1].text(), Some("from original"));
        assert_eq!(copy.history()[1].text(), Some("from copy"));
        assert_eq!(original.state("k"), Some(&json!(1)));
        assert_eq!(copy.state("k"), Some(&json!(2)));
        assert!(!copy.has_state("other"));
        assert_eq!(original.turn_count(), 1);
        assert_eq!(copy.turn_count(), 2);
    }

    #[test]
    fn test_copy_keeps_trace_ids() {
        let mut original = AgentContext::new();
        original.with_trace_context("t", "s").with_request_id("r");

        let copy = original.copy();
        assert_eq!(copy.parent_trace_id(), Some("t"));
        assert_eq!(copy.parent_span_id(), Some("s"));
        assert_eq!(copy.request_id(), Some("r"));
    }

    // === Fork Tests ===

    #[test]
    fn test_fork_resets_turns_and_keeps_history() {
        let mut original = AgentContext::from_user_message("hello");
        original.with_trace_context("trace", "span");
        original.increment_turn();
        original.increment_turn();

        let forked = original.fork("child-span");
        assert_eq!(forked.turn_count(), 0);
        assert_eq!(forked.history(), original.history());
        assert_eq!(forked.parent_trace_id(), Some("trace"));
        assert_eq!(forked.parent_span_id(), Some("child-span"));
        assert_eq!(original.turn_count(), 2);
    }

    // === State Tests ===

    #[test]
    fn test_set_null_removes_state() {
        let mut context = AgentContext::new();
        context.set_state("user", json!("ana"));
        assert_eq!(context.state_as::<String>("user").as_deref(), Some("ana"));

        context.set_state("user", serde_json::Value::Null);
        assert!(!context.has_state("user"));
    }

    #[test]
    fn test_last_user_message() {
        let mut context = AgentContext::from_user_message("first");
        context.add_message(Message::assistant("reply"));
        context.add_message(Message::user("second"));
        context.add_message(Message::developer("note"));

        assert_eq!(context.last_user_message(), Some("second"));
        assert_eq!(AgentContext::new().last_user_message(), None);
    }

    #[test]
    fn test_clear_keeps_turn_counter() {
        let mut context = AgentContext::from_user_message("hello");
        context.set_state("k", json!(1));
        context.increment_turn();
        context.clear();

        assert_eq!(context.history_len(), 0);
        assert!(context.all_state().is_empty());
        assert_eq!(context.turn_count(), 1);
    }

    // === Child Context Tests ===

    #[test]
    fn test_child_context_isolated() {
        let mut parent = AgentContext::from_user_message("parent");
        parent.set_state("k", json!(1));
        parent.with_trace_context("t", "s");

        let child = parent.child_context(ContextSharing::Isolated, "do it");
        assert_eq!(child.history_len(), 1);
        assert_eq!(child.last_user_message(), Some("do it"));
        assert!(child.all_state().is_empty());
        assert!(!child.has_trace_context());
    }

    #[test]
    fn test_child_context_state_only() {
        let mut parent = AgentContext::from_user_message("parent");
        parent.set_state("k", json!(1));
        parent.with_trace_context("t", "s").with_request_id("r");

        let child = parent.child_context(ContextSharing::StateOnly, "do it");
        assert_eq!(child.history_len(), 1);
        assert_eq!(child.state("k"), Some(&json!(1)));
        assert_eq!(child.parent_trace_id(), Some("t"));
        assert_ne!(child.parent_span_id(), Some("s"));
        assert_eq!(child.request_id(), Some("r"));
    }

    #[test]
    fn test_child_context_forked() {
        let mut parent = AgentContext::from_user_message("parent");
        parent.with_trace_context("t", "s");
        parent.increment_turn();

        let child = parent.child_context(ContextSharing::Forked, "do it");
        assert_eq!(child.history_len(), 2);
        assert_eq!(child.turn_count(), 0);
        assert_eq!(child.last_user_message(), Some("do it"));
        assert_ne!(child.parent_span_id(), Some("s"));
    }

    #[test]
    fn test_ensure_trace_context_is_stable() {
        let mut context = AgentContext::new();
        context.ensure_trace_context();
        let trace = context.parent_trace_id().map(str::to_string);

        context.ensure_trace_context();
        assert_eq!(context.parent_trace_id().map(str::to_string), trace);
    }
}
