//! Single-shot classification onto one of several targets

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::context::AgentContext;
use crate::descriptor::{Binding, Descriptor};
use crate::error::{panic_message, AgentError};
use crate::interactable::Interactable;
use crate::model::{ModelRequest, Responder};
use crate::orchestrator::Member;
use crate::result::AgentResult;
use crate::stream::{AgentStream, StreamHooks};

/// A routing target and the kind of input it handles.
#[derive(Clone)]
pub struct Route {
    target: Member,
    description: String,
}

impl Route {
    pub fn target(&self) -> &Member {
        &self.target
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Asks the model which route fits the input, then hands the whole
/// conversation to that route.
///
/// Routing is one model call. An answer that is not a valid route number
/// goes to the fallback, or fails if there is none.
#[derive(Clone)]
pub struct RouterAgent {
    name: String,
    model: String,
    responder: Arc<dyn Responder>,
    routes: Vec<Route>,
    fallback: Option<Member>,
}

/// Builder for [`RouterAgent`]
#[derive(Default)]
pub struct RouterBuilder {
    name: Option<String>,
    model: Option<String>,
    responder: Option<Arc<dyn Responder>>,
    routes: Vec<Route>,
    fallback: Option<Member>,
}

impl RouterBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Model used for classification
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn responder(mut self, responder: Arc<dyn Responder>) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn route(mut self, target: impl Interactable + 'static, description: impl Into<String>) -> Self {
        self.routes.push(Route {
            target: Arc::new(target),
            description: description.into(),
        });
        self
    }

    pub fn fallback(mut self, fallback: impl Interactable + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn build(self) -> Result<RouterAgent, AgentError> {
        if self.routes.is_empty() {
            return Err(AgentError::Configuration(
                "a router needs at least one route".into(),
            ));
        }
        let name = self.name.unwrap_or_else(|| "Router".to_string());
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| AgentError::Configuration(format!("router '{name}' needs a model")))?;
        let responder = self
            .responder
            .ok_or_else(|| AgentError::Configuration(format!("router '{name}' needs a responder")))?;

        Ok(RouterAgent {
            name,
            model,
            responder,
            routes: self.routes,
            fallback: self.fallback,
        })
    }
}

impl RouterAgent {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn fallback(&self) -> Option<&Member> {
        self.fallback.as_ref()
    }

    /// Pick the target for `input`.
    ///
    /// `Ok(None)` means the model named no valid route and there is no
    /// fallback. A failed model call is an error.
    pub async fn classify(&self, input: &str) -> Result<Option<Member>, AgentError> {
        let request = ModelRequest::new(self.model.clone()).with_user_message(self.prompt(input));
        let model_error = |message: String| AgentError::ModelCall {
            agent: self.name.clone(),
            turn: 1,
            message,
        };
        let response = match AssertUnwindSafe(self.responder.respond(request))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(model_error(format!("{e:#}"))),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(router = %self.name, error = %message, "Classifier panicked");
                return Err(model_error(message));
            }
        };

        let answer = response.output_text();
        let selected = answer
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| self.routes.get(index));

        match selected {
            Some(route) => {
                debug!(router = %self.name, route = %route.target.name(), "Route selected");
                Ok(Some(Arc::clone(&route.target)))
            }
            None => {
                warn!(router = %self.name, answer = %answer.trim(), "Classifier named no valid route");
                Ok(self.fallback.clone())
            }
        }
    }

    fn prompt(&self, input: &str) -> String {
        let mut prompt = String::from(
            "You are a routing classifier. Based on the user input, select the most appropriate handler.\n\n\
             Available handlers:\n",
        );
        for (i, route) in self.routes.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. {} - handles: {}\n",
                i + 1,
                route.target.name(),
                route.description
            ));
        }
        prompt.push_str(&format!("\nUser input: \"{input}\"\n\n"));
        prompt.push_str("Respond with ONLY the handler number (e.g., \"1\" or \"2\"). Nothing else.");
        prompt
    }

    /// Classify the latest user message.
    async fn select(&self, context: &AgentContext) -> Result<Member, AgentError> {
        let input = context
            .last_user_message()
            .filter(|m| !m.trim().is_empty())
            .ok_or(AgentError::NoUserMessage)?;

        let target = self.classify(input).await?.ok_or(AgentError::NoSuitableRoute)?;
        info!(router = %self.name, route = %target.name(), "Routing");
        Ok(target)
    }

    async fn run_routed(&self, context: AgentContext, hooks: StreamHooks) -> AgentResult {
        match self.select(&context).await {
            Ok(target) => target.interact_stream(context).run_nested(hooks).await,
            Err(err) => AgentResult::failed(err).with_history(context.history().to_vec()),
        }
    }
}

#[async_trait]
impl Interactable for RouterAgent {
    fn name(&self) -> &str {
        &self.name
    }

    /// The selected target's result, unmodified.
    async fn interact(&self, context: &mut AgentContext) -> AgentResult {
        let target = match self.select(context).await {
            Ok(target) => target,
            Err(err) => return AgentResult::failed(err).with_history(context.history().to_vec()),
        };
        match AssertUnwindSafe(target.interact(context)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(router = %self.name, route = %target.name(), error = %message, "Route panicked");
                AgentResult::failed(AgentError::Unexpected(message))
                    .with_history(context.history().to_vec())
            }
        }
    }

    fn interact_stream(&self, context: AgentContext) -> AgentStream {
        let router = self.clone();
        AgentStream::new(move |hooks| async move { router.run_routed(context, hooks).await }.boxed())
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::Router {
            name: self.name.clone(),
            model: self.model.clone(),
            routes: self
                .routes
                .iter()
                .map(|r| Binding {
                    description: r.description.clone(),
                    target: r.target.descriptor(),
                })
                .collect(),
            fallback: self.fallback.as_ref().map(|f| Box::new(f.descriptor())),
        }
    }
}

impl std::fmt::Debug for RouterAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterAgent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("routes", &self.routes.iter().map(|r| r.target.name()).collect::<Vec<_>>())
            .finish()
    }
}
