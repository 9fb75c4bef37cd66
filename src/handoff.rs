//! Transfer of control between agents

use serde::Deserialize;
use serde_json::json;

use crate::agent::Agent;
use crate::model::{FunctionCall, ToolDefinition};

/// A target agent exposed to the model as a callable tool.
///
/// When the model calls it, the calling agent stops and the target continues
/// the conversation.
#[derive(Clone)]
pub struct Handoff {
    name: String,
    description: String,
    target: Agent,
}

#[derive(Deserialize, Default)]
struct HandoffArgs {
    message: Option<String>,
}

impl Handoff {
    /// Handoff named `transfer_to_<target>` with a description derived from
    /// the target's instructions.
    pub fn to(target: Agent) -> Self {
        let name = format!("transfer_to_{}", to_snake_case(target.name()));
        let description = match target.instructions() {
            Some(instructions) => format!("Transfer to {}: {}", target.name(), instructions),
            None => format!("Transfer to {}", target.name()),
        };
        Self {
            name,
            description,
            target,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn target(&self) -> &Agent {
        &self.target
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Optional message to pass to the next agent"
                    }
                }
            }),
        }
    }

    /// Message the model passed along with the call, if any.
    pub(crate) fn message(call: &FunctionCall) -> Option<String> {
        serde_json::from_str::<HandoffArgs>(&call.arguments)
            .unwrap_or_default()
            .message
            .filter(|m| !m.trim().is_empty())
    }
}

impl std::fmt::Debug for Handoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handoff")
            .field("name", &self.name)
            .field("target", &self.target.name())
            .finish()
    }
}

/// `CustomerSupport` becomes `customer_support`; whitespace becomes `_`.
pub(crate) fn to_snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for (i, c) in input.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c.is_whitespace() {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("CustomerSupport"), "customer_support");
        assert_eq!(to_snake_case("billing"), "billing");
        assert_eq!(to_snake_case("tech support"), "tech_support");
        assert_eq!(to_snake_case(""), "");
    }

    #[test]
    fn test_message_argument() {
        let call = FunctionCall::new("c1", "transfer_to_billing", r#"{"message": "refund"}"#);
        assert_eq!(Handoff::message(&call).as_deref(), Some("refund"));

        let empty = FunctionCall::new("c2", "transfer_to_billing", "{}");
        assert_eq!(Handoff::message(&empty), None);

        let garbage = FunctionCall::new("c3", "transfer_to_billing", "not json");
        assert_eq!(Handoff::message(&garbage), None);
    }
}
