//! Tools callable by the model

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::AgentContext;
use crate::error::{panic_message, ToolError};
use crate::model::{FunctionCall, ToolDefinition, ToolOutput};
use crate::stream::StreamHooks;

/// A function the model may call.
///
/// Tools receive the calling agent's context explicitly so delegation can
/// derive child contexts from it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> serde_json::Value;

    /// Whether a human must approve each call before it runs
    fn requires_confirmation(&self) -> bool {
        false
    }

    async fn call(&self, arguments: &str, context: &AgentContext) -> Result<String, ToolError>;

    /// [`call`](Self::call) from inside a streaming run. Tools that run other
    /// interactables override this to report nested phases through the hooks.
    async fn call_with_hooks(
        &self,
        arguments: &str,
        context: &AgentContext,
        _hooks: &StreamHooks,
    ) -> Result<String, ToolError> {
        self.call(arguments, context).await
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

type ToolHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, Result<String, ToolError>> + Send + Sync>;

/// Tool backed by a closure over typed arguments.
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: serde_json::Value,
    requires_confirmation: bool,
    handler: ToolHandler,
}

impl FunctionTool {
    /// Wrap `handler`. Arguments are deserialized into `T` before each call.
    pub fn new<T, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        handler: F,
    ) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let handler: ToolHandler = Arc::new(
            move |arguments: String| -> BoxFuture<'static, Result<String, ToolError>> {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let raw = if arguments.trim().is_empty() {
                        "{}"
                    } else {
                        arguments.as_str()
                    };
                    let args: T = serde_json::from_str(raw)?;
                    Ok(handler(args).await?)
                })
            },
        );

        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            requires_confirmation: false,
            handler,
        }
    }

    /// Require human approval before each call.
    pub fn requires_confirmation(mut self, required: bool) -> Self {
        self.requires_confirmation = required;
        self
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("requires_confirmation", &self.requires_confirmation)
            .finish()
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> serde_json::Value {
        self.parameters.clone()
    }

    fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }

    async fn call(&self, arguments: &str, _context: &AgentContext) -> Result<String, ToolError> {
        (self.handler)(arguments.to_string()).await
    }
}

/// Record of one tool call made during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_name: String,
    pub call_id: String,
    pub arguments: String,
    pub output: ToolOutput,
    pub duration: Duration,
}

impl ToolExecution {
    pub fn is_success(&self) -> bool {
        !self.output.is_error()
    }
}

/// Ordered set of tools keyed by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name.
    pub fn add(&mut self, tool: Arc<dyn Tool>) {
        if let Some(existing) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            *existing = tool;
        } else {
            self.tools.push(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Unknown tools never require confirmation; they fail at execution.
    pub fn requires_confirmation(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.requires_confirmation())
    }

    /// Dispatch a call and record it.
    ///
    /// Failures become error outputs so the model can react to them.
    pub async fn execute(&self, call: &FunctionCall, context: &AgentContext) -> ToolExecution {
        self.execute_with_hooks(call, context, &StreamHooks::default())
            .await
    }

    /// [`execute`](Self::execute), forwarding the run's stream hooks to the tool.
    pub async fn execute_with_hooks(
        &self,
        call: &FunctionCall,
        context: &AgentContext,
        hooks: &StreamHooks,
    ) -> ToolExecution {
        let start = Instant::now();

        let output = match self.get(&call.name) {
            Some(tool) => {
                let outcome = AssertUnwindSafe(tool.call_with_hooks(&call.arguments, context, hooks))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(ToolError::Failed(panic_message(panic.as_ref()))));
                match outcome {
                    Ok(output) => {
                        debug!(tool = %call.name, call_id = %call.call_id, "Tool executed");
                        ToolOutput::success(&call.call_id, output)
                    }
                    Err(e) => {
                        warn!(tool = %call.name, call_id = %call.call_id, error = %e, "Tool failed");
                        ToolOutput::error(&call.call_id, format!("Tool execution failed: {e}"))
                    }
                }
            }
            None => {
                warn!(tool = %call.name, "Model called an unknown tool");
                ToolOutput::error(&call.call_id, format!("Tool not found: {}", call.name))
            }
        };

        ToolExecution {
            tool_name: call.name.clone(),
            call_id: call.call_id.clone(),
            arguments: call.arguments.clone(),
            output,
            duration: start.elapsed(),
        }
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.iter().map(|t| t.name())).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct AddArgs {
        a: i64,
        b: i64,
    }

    fn add_tool() -> FunctionTool {
        FunctionTool::new(
            "add",
            "Add two numbers",
            json!({"type": "object", "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}}}),
            |args: AddArgs| async move { Ok((args.a + args.b).to_string()) },
        )
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut tools = ToolSet::new();
        tools.add(Arc::new(add_tool()));

        let call = FunctionCall::new("c1", "add", r#"{"a": 2, "b": 3}"#);
        let execution = tools.execute(&call, &AgentContext::new()).await;

        assert!(execution.is_success());
        assert_eq!(execution.output.output, "5");
        assert_eq!(execution.call_id, "c1");
    }

    #[tokio::test]
    async fn test_execute_bad_arguments() {
        let mut tools = ToolSet::new();
        tools.add(Arc::new(add_tool()));

        let call = FunctionCall::new("c1", "add", r#"{"a": "x"}"#);
        let execution = tools.execute(&call, &AgentContext::new()).await;

        assert!(!execution.is_success());
        assert!(execution.output.output.starts_with("Tool execution failed: Invalid arguments"));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let tools = ToolSet::new();
        let call = FunctionCall::new("c1", "missing", "{}");
        let execution = tools.execute(&call, &AgentContext::new()).await;

        assert!(execution.output.is_error());
        assert_eq!(execution.output.output, "Tool not found: missing");
    }

    #[tokio::test]
    async fn test_handler_error_is_reported() {
        let tool = FunctionTool::new("fail", "Always fails", json!({}), |_: serde_json::Value| async {
            Err::<String, _>(anyhow::anyhow!("disk full"))
        });
        let mut tools = ToolSet::new();
        tools.add(Arc::new(tool));

        let execution = tools
            .execute(&FunctionCall::new("c1", "fail", ""), &AgentContext::new())
            .await;
        assert_eq!(execution.output.output, "Tool execution failed: disk full");
    }

    #[test]
    fn test_add_replaces_same_name() {
        let mut tools = ToolSet::new();
        tools.add(Arc::new(add_tool()));
        tools.add(Arc::new(add_tool().requires_confirmation(true)));

        assert_eq!(tools.len(), 1);
        assert!(tools.requires_confirmation("add"));
        assert!(!tools.requires_confirmation("missing"));
        assert_eq!(tools.definitions()[0].name, "add");
    }
}
