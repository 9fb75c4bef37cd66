//! Conversation items and the model transport boundary

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// System-level guidance injected by the engine
    Developer,
}

/// A plain text message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn developer(content: impl Into<String>) -> Self {
        Self {
            role: Role::Developer,
            content: content.into(),
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub call_id: String,
    pub name: String,
    /// Raw JSON arguments as produced by the model
    pub arguments: String,
}

impl FunctionCall {
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Outcome tag of a tool output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Structured result of a tool call, fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub call_id: String,
    pub status: ToolStatus,
    pub output: String,
}

impl ToolOutput {
    pub fn success(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            status: ToolStatus::Success,
            output: output.into(),
        }
    }

    pub fn error(call_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            status: ToolStatus::Error,
            output: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

/// One entry of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Message(Message),
    FunctionCall(FunctionCall),
    FunctionCallOutput(ToolOutput),
}

impl ConversationItem {
    /// Text of a message item.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Message(msg) => Some(&msg.content),
            _ => None,
        }
    }

    pub fn is_user_message(&self) -> bool {
        matches!(self, Self::Message(Message { role: Role::User, .. }))
    }
}

impl From<Message> for ConversationItem {
    fn from(msg: Message) -> Self {
        Self::Message(msg)
    }
}

impl From<FunctionCall> for ConversationItem {
    fn from(call: FunctionCall) -> Self {
        Self::FunctionCall(call)
    }
}

impl From<ToolOutput> for ConversationItem {
    fn from(output: ToolOutput) -> Self {
        Self::FunctionCallOutput(output)
    }
}

/// Tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: serde_json::Value,
}

/// Payload for a single model call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelRequest {
    pub model: String,
    pub instructions: Option<String>,
    pub input: Vec<ConversationItem>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f64>,
}

impl ModelRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_user_message(mut self, text: impl Into<String>) -> Self {
        self.input.push(Message::user(text).into());
        self
    }
}

/// One item of model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message { content: String },
    FunctionCall(FunctionCall),
}

/// Response of a model call.
///
/// The engine only reads the text and the tool calls; everything else the
/// transport knows stays on its side of the boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub id: Option<String>,
    pub output: Vec<OutputItem>,
}

impl ModelResponse {
    /// Response consisting of a single text message.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            id: None,
            output: vec![OutputItem::Message {
                content: content.into(),
            }],
        }
    }

    /// Response consisting only of tool calls.
    pub fn tool_calls(calls: Vec<FunctionCall>) -> Self {
        Self {
            id: None,
            output: calls.into_iter().map(OutputItem::FunctionCall).collect(),
        }
    }

    pub fn with_item(mut self, item: OutputItem) -> Self {
        self.output.push(item);
        self
    }

    /// Concatenated text of all message items.
    pub fn output_text(&self) -> String {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Message { content } => Some(content.as_str()),
                OutputItem::FunctionCall(_) => None,
            })
            .collect()
    }

    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall(call) => Some(call.clone()),
                OutputItem::Message { .. } => None,
            })
            .collect()
    }

    /// History entries produced by this response, in output order.
    pub fn to_history(&self) -> Vec<ConversationItem> {
        self.output
            .iter()
            .map(|item| match item {
                OutputItem::Message { content } => Message::assistant(content.clone()).into(),
                OutputItem::FunctionCall(call) => call.clone().into(),
            })
            .collect()
    }
}

/// Model transport.
///
/// Retries and timeouts belong to implementations; the engine calls once
/// per turn and treats an error as terminal for the run.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, request: ModelRequest) -> anyhow::Result<ModelResponse>;

    /// Streaming variant. The default delivers the whole text as one delta.
    async fn respond_streaming(
        &self,
        request: ModelRequest,
        on_delta: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> anyhow::Result<ModelResponse> {
        let response = self.respond(request).await?;
        let text = response.output_text();
        if !text.is_empty() {
            on_delta(&text);
        }
        Ok(response)
    }

    /// Name reported in descriptors.
    fn describe(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_text_skips_calls() {
        let response = ModelResponse::text("hello ")
            .with_item(OutputItem::FunctionCall(FunctionCall::new("c1", "search", "{}")))
            .with_item(OutputItem::Message {
                content: "world".into(),
            });

        assert_eq!(response.output_text(), "hello world");
        assert_eq!(response.function_calls().len(), 1);
    }

    #[test]
    fn test_to_history_preserves_order() {
        let response = ModelResponse::text("thinking")
            .with_item(OutputItem::FunctionCall(FunctionCall::new("c1", "search", "{}")));

        let history = response.to_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), Some("thinking"));
        assert!(matches!(history[1], ConversationItem::FunctionCall(_)));
    }

    struct Echo;

    #[async_trait]
    impl Responder for Echo {
        async fn respond(&self, _request: ModelRequest) -> anyhow::Result<ModelResponse> {
            Ok(ModelResponse::text("streamed reply"))
        }
    }

    #[tokio::test]
    async fn test_default_streaming_sends_one_delta() {
        let deltas = parking_lot::Mutex::new(Vec::new());
        let on_delta = |delta: &str| deltas.lock().push(delta.to_string());

        let response = Echo
            .respond_streaming(ModelRequest::new("m"), &on_delta)
            .await
            .unwrap();

        assert_eq!(response.output_text(), "streamed reply");
        assert_eq!(*deltas.lock(), vec!["streamed reply".to_string()]);
    }

    #[test]
    fn test_conversation_item_serde_tagging() {
        let item: ConversationItem = ToolOutput::error("c1", "boom").into();
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "function_call_output");
        assert_eq!(json["status"], "error");
    }
}
