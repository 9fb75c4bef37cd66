//! Concurrent fan-out over a fixed set of members

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{info, instrument};

use crate::context::AgentContext;
use crate::descriptor::Descriptor;
use crate::error::AgentError;
use crate::interactable::Interactable;
use crate::orchestrator::{
    fan_out_contexts, race, render_output, run_member, synthesis_context, wait_all,
    FailurePolicy, Member,
};
use crate::result::AgentResult;
use crate::stream::{AgentStream, StreamHooks};

/// Runs every member on its own copy of the context.
///
/// ```ignore
/// let team = ParallelAgents::builder()
///     .name("Research")
///     .member(optimist)
///     .member(skeptic)
///     .build()?;
/// let results = team.run_all(&context).await?;
/// ```
#[derive(Clone)]
pub struct ParallelAgents {
    name: String,
    members: Vec<Member>,
    synthesizer: Option<Member>,
}

/// Builder for [`ParallelAgents`]
#[derive(Default)]
pub struct ParallelBuilder {
    name: Option<String>,
    members: Vec<Member>,
    synthesizer: Option<Member>,
}

impl ParallelBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn member(mut self, member: impl Interactable + 'static) -> Self {
        self.members.push(Arc::new(member));
        self
    }

    /// Combine member outputs with `synthesizer` when used as an
    /// [`Interactable`].
    pub fn synthesizer(mut self, synthesizer: impl Interactable + 'static) -> Self {
        self.synthesizer = Some(Arc::new(synthesizer));
        self
    }

    pub fn build(self) -> Result<ParallelAgents, AgentError> {
        if self.members.is_empty() {
            return Err(AgentError::Configuration(
                "parallel composition needs at least one member".into(),
            ));
        }
        Ok(ParallelAgents {
            name: self.name.unwrap_or_else(|| "ParallelAgents".to_string()),
            members: self.members,
            synthesizer: self.synthesizer,
        })
    }
}

impl ParallelAgents {
    pub fn builder() -> ParallelBuilder {
        ParallelBuilder::default()
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Run every member and wait for all of them.
    ///
    /// Results come back in member order. The first failure aborts the
    /// members still running and is returned as
    /// [`AgentError::MemberFailed`].
    pub async fn run_all(&self, context: &AgentContext) -> Result<Vec<AgentResult>, AgentError> {
        self.run_all_with(context, &StreamHooks::default()).await
    }

    /// Run every member and return the first successful result.
    pub async fn run_first(&self, context: &AgentContext) -> AgentResult {
        let contexts = fan_out_contexts(context, self.members.len());
        race(&self.members, contexts, &StreamHooks::default()).await
    }

    /// Run every member, then hand `synthesizer` a transcript of their
    /// outputs. Failed members appear in the transcript as error
    /// placeholders.
    pub async fn run_and_synthesize(
        &self,
        context: &AgentContext,
        synthesizer: &dyn Interactable,
    ) -> AgentResult {
        self.synthesize_with(context, synthesizer, &StreamHooks::default())
            .await
    }

    #[instrument(skip_all, fields(parallel = %self.name))]
    async fn run_all_with(
        &self,
        context: &AgentContext,
        hooks: &StreamHooks,
    ) -> Result<Vec<AgentResult>, AgentError> {
        info!(members = self.members.len(), "Running all members");
        let contexts = fan_out_contexts(context, self.members.len());
        wait_all(&self.members, contexts, hooks, FailurePolicy::FailFast).await
    }

    async fn synthesize_with(
        &self,
        context: &AgentContext,
        synthesizer: &dyn Interactable,
        hooks: &StreamHooks,
    ) -> AgentResult {
        let contexts = fan_out_contexts(context, self.members.len());
        let results = match wait_all(&self.members, contexts, hooks, FailurePolicy::Collect).await {
            Ok(results) => results,
            Err(err) => return AgentResult::failed(err),
        };

        let query = context.last_user_message().unwrap_or_default();
        let prompt = self.transcript(query, &results);
        info!(parallel = %self.name, synthesizer = %synthesizer.name(), "Synthesizing outputs");

        let synthesis = synthesis_context(context, prompt);
        run_member(synthesizer, synthesis, hooks)
            .await
            .with_related(results)
    }

    fn transcript(&self, query: &str, results: &[AgentResult]) -> String {
        let mut prompt = format!(
            "Original query: {query}\n\nThe following participants have provided their outputs:\n\n"
        );
        for (member, result) in self.members.iter().zip(results) {
            prompt.push_str(&format!(
                "--- {} ---\n{}\n\n",
                member.name(),
                render_output(result)
            ));
        }
        prompt.push_str("Please synthesize these outputs into a coherent response.");
        prompt
    }

    async fn execute(&self, context: &AgentContext, hooks: &StreamHooks) -> AgentResult {
        if let Some(synthesizer) = &self.synthesizer {
            return self.synthesize_with(context, synthesizer.as_ref(), hooks).await;
        }

        let results = match self.run_all_with(context, hooks).await {
            Ok(results) => results,
            Err(err) => return AgentResult::failed(err),
        };
        let mut results = results.into_iter();
        match results.next() {
            Some(primary) => primary.with_related(results.collect()),
            None => AgentResult::failed(AgentError::Configuration("no members configured".into())),
        }
    }
}

#[async_trait]
impl Interactable for ParallelAgents {
    fn name(&self) -> &str {
        &self.name
    }

    /// The first member's result, with the others as related results. With a
    /// synthesizer configured, the synthesis instead.
    async fn interact(&self, context: &mut AgentContext) -> AgentResult {
        self.execute(context, &StreamHooks::default()).await
    }

    fn interact_stream(&self, context: AgentContext) -> AgentStream {
        let parallel = self.clone();
        AgentStream::new(move |hooks| {
            async move { parallel.execute(&context, &hooks).await }.boxed()
        })
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::Parallel {
            name: self.name.clone(),
            members: self.members.iter().map(|m| m.descriptor()).collect(),
            synthesizer: self.synthesizer.as_ref().map(|s| Box::new(s.descriptor())),
        }
    }
}

impl std::fmt::Debug for ParallelAgents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelAgents")
            .field("name", &self.name)
            .field("members", &self.members.iter().map(|m| m.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;
    use crate::stream::StreamEvent;
    use crate::testing::{scripted_agent, ScriptedResponder, SlowMember};
    use std::time::Duration;

    fn team(members: &[&SlowMember]) -> ParallelAgents {
        members
            .iter()
            .fold(ParallelAgents::builder().name("Team"), |b, m| b.member((*m).clone()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_members() {
        let err = ParallelAgents::builder().build().unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    // === Run All Tests ===

    #[tokio::test]
    async fn test_run_all_returns_member_order() {
        let a = SlowMember::answering("a", 50, "from a");
        let b = SlowMember::answering("b", 1, "from b");
        let c = SlowMember::answering("c", 25, "from c");
        let parallel = team(&[&a, &b, &c]);

        let results = parallel
            .run_all(&AgentContext::from_user_message("question"))
            .await
            .unwrap();

        let outputs: Vec<_> = results.iter().map(|r| r.output_text()).collect();
        assert_eq!(outputs, vec!["from a", "from b", "from c"]);
    }

    #[tokio::test]
    async fn test_members_get_independent_copies() {
        let a = SlowMember::answering("a", 1, "x");
        let b = SlowMember::answering("b", 1, "y");
        let parallel = team(&[&a, &b]);

        let context = AgentContext::from_user_message("question");
        let results = parallel.run_all(&context).await.unwrap();

        // Each member saw only the original message, and the caller's
        // context was not touched
        assert_eq!(a.received()[0].history_len(), 1);
        assert_eq!(b.received()[0].history_len(), 1);
        assert_eq!(results[0].history().len(), 2);
        assert_eq!(context.history_len(), 1);

        let trace = a.received()[0].parent_trace_id().map(str::to_string);
        assert!(trace.is_some());
        assert_eq!(b.received()[0].parent_trace_id().map(str::to_string), trace);
    }

    #[tokio::test]
    async fn test_run_all_fails_on_member_error() {
        let ok = SlowMember::answering("ok", 100, "fine");
        let broken = SlowMember::failing("broken", 1, "model down");
        let parallel = team(&[&ok, &broken]);

        let err = parallel
            .run_all(&AgentContext::from_user_message("go"))
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::MemberFailed { ref member, .. } if member == "broken"));
    }

    // === Run First Tests ===

    #[tokio::test]
    async fn test_run_first_returns_fastest() {
        let slow = SlowMember::answering("slow", 200, "slow answer");
        let fast = SlowMember::answering("fast", 5, "fast answer");
        let parallel = team(&[&slow, &fast]);

        let result = parallel
            .run_first(&AgentContext::from_user_message("go"))
            .await;

        assert_eq!(result.output(), Some("fast answer"));
    }

    #[tokio::test]
    async fn test_run_first_with_agents() {
        let slow = ScriptedResponder::replying(&["slow"]).with_delay(Duration::from_millis(200));
        let fast = ScriptedResponder::replying(&["fast"]).with_delay(Duration::from_millis(5));
        let parallel = ParallelAgents::builder()
            .member(scripted_agent("Slow", Arc::new(slow)))
            .member(scripted_agent("Fast", Arc::new(fast)))
            .build()
            .unwrap();

        let result = parallel
            .run_first(&AgentContext::from_user_message("race"))
            .await;

        assert_eq!(result.output(), Some("fast"));
    }

    // === Synthesis Tests ===

    #[tokio::test]
    async fn test_run_and_synthesize_transcript() {
        let optimist = SlowMember::answering("Optimist", 5, "It will work");
        let skeptic = SlowMember::failing("Skeptic", 1, "timed out");
        let parallel = team(&[&optimist, &skeptic]);

        let responder = Arc::new(ScriptedResponder::replying(&["Mixed outlook"]));
        let synthesizer = scripted_agent("Synth", responder.clone());

        let result = parallel
            .run_and_synthesize(&AgentContext::from_user_message("Will it work?"), &synthesizer)
            .await;

        assert_eq!(result.output(), Some("Mixed outlook"));
        assert_eq!(result.related().len(), 2);

        let request = responder.last_request().unwrap();
        let prompt = request.input[0].text().unwrap().to_string();
        assert_eq!(
            prompt,
            "Original query: Will it work?\n\n\
             The following participants have provided their outputs:\n\n\
             --- Optimist ---\nIt will work\n\n\
             --- Skeptic ---\n[ERROR: Unexpected error: timed out]\n\n\
             Please synthesize these outputs into a coherent response."
        );
    }

    // === Interactable Tests ===

    #[tokio::test]
    async fn test_interact_is_composite() {
        let a = SlowMember::answering("a", 10, "first");
        let b = SlowMember::answering("b", 1, "second");
        let parallel = team(&[&a, &b]);

        let mut context = AgentContext::new();
        context.add_message(Message::user("hi"));
        let result = parallel.interact(&mut context).await;

        assert_eq!(result.output(), Some("first"));
        assert_eq!(result.related().len(), 1);
        assert_eq!(result.related()[0].output(), Some("second"));
    }

    #[tokio::test]
    async fn test_stream_forwards_member_events() {
        let responder = Arc::new(ScriptedResponder::replying(&["hello"]));
        let agent = scripted_agent("Greeter", responder);
        let parallel = ParallelAgents::builder()
            .member(agent)
            .build()
            .unwrap();

        let mut stream = parallel.interact_stream(AgentContext::from_user_message("hi"));
        let mut events = stream.subscribe();
        let result = stream.start().await;
        assert_eq!(result.output(), Some("hello"));

        let mut completes = 0;
        let mut turn_agents = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                StreamEvent::TurnStart { agent, .. } => turn_agents.push(agent),
                StreamEvent::Complete(_) => completes += 1,
                _ => {}
            }
        }
        assert_eq!(turn_agents, vec!["Greeter".to_string()]);
        assert_eq!(completes, 1);
    }

    #[test]
    fn test_descriptor_lists_members() {
        let a = SlowMember::answering("a", 1, "x");
        let b = SlowMember::answering("b", 1, "y");

        match team(&[&a, &b]).descriptor() {
            Descriptor::Parallel { name, members, synthesizer } => {
                assert_eq!(name, "Team");
                assert_eq!(members.len(), 2);
                assert!(synthesizer.is_none());
            }
            other => panic!("unexpected descriptor: {other:?}"),
        }
    }
}
