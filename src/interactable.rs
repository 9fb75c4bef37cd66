//! The capability shared by agents and every composition

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::context::AgentContext;
use crate::descriptor::Descriptor;
use crate::error::AgentError;
use crate::result::{extract_json, AgentResult, StructuredAgentResult};
use crate::stream::AgentStream;

/// Anything that can take a conversation and produce a result.
///
/// Implemented by [`Agent`](crate::Agent) and by each composition, so
/// compositions nest freely.
#[async_trait]
pub trait Interactable: Send + Sync {
    fn name(&self) -> &str;

    /// Run to completion against `context`, appending to its history.
    ///
    /// Never fails: errors come back as error-shaped results.
    async fn interact(&self, context: &mut AgentContext) -> AgentResult;

    /// Streaming variant of [`interact`](Self::interact). Nothing runs until
    /// the stream is started.
    fn interact_stream(&self, context: AgentContext) -> AgentStream;

    /// Construction parameters, for snapshotting.
    fn descriptor(&self) -> Descriptor;

    /// Run against a fresh context holding only `input`.
    async fn interact_text(&self, input: &str) -> AgentResult {
        let mut context = AgentContext::from_user_message(input);
        self.interact(&mut context).await
    }
}

/// Typed interaction on top of any [`Interactable`].
#[async_trait]
pub trait InteractableExt: Interactable {
    /// Interact and deserialize the output as JSON into `T`.
    ///
    /// A parse failure turns the result into an
    /// [`AgentError::OutputParsing`] error.
    async fn interact_structured<T>(&self, context: &mut AgentContext) -> StructuredAgentResult<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let result = self.interact(context).await;
        if !result.is_success() {
            return StructuredAgentResult::new(result, None);
        }

        match serde_json::from_str::<T>(extract_json(result.output_text())) {
            Ok(value) => StructuredAgentResult::new(result, Some(value)),
            Err(e) => StructuredAgentResult::new(
                result.into_error(AgentError::OutputParsing(e.to_string())),
                None,
            ),
        }
    }
}

impl<I: Interactable + ?Sized> InteractableExt for I {}
