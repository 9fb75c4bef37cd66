//! Peer discussion in sequential rounds

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use crate::config::{validate_max_rounds, RuntimeConfig};
use crate::context::AgentContext;
use crate::descriptor::Descriptor;
use crate::error::AgentError;
use crate::interactable::Interactable;
use crate::model::Message;
use crate::orchestrator::{
    fan_out_contexts, render_output, run_member, synthesis_context, wait_all, FailurePolicy,
    Member,
};
use crate::result::AgentResult;
use crate::stream::{AgentStream, StreamHooks};
use crate::trace::TraceIdGenerator;

/// One peer's answer in one round.
#[derive(Debug, Clone)]
pub struct Contribution {
    peer: String,
    round: u32,
    result: AgentResult,
}

impl Contribution {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// 1-indexed
    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn output(&self) -> Option<&str> {
        self.result.output()
    }

    pub fn error(&self) -> Option<&AgentError> {
        self.result.error()
    }

    pub fn is_error(&self) -> bool {
        self.result.is_error()
    }

    pub fn result(&self) -> &AgentResult {
        &self.result
    }
}

/// Every contribution of a discussion, in the order they were made.
#[derive(Debug, Clone)]
pub struct NetworkResult {
    contributions: Vec<Contribution>,
    synthesis: Option<AgentResult>,
}

impl NetworkResult {
    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    /// Synthesized summary, if a synthesizer ran and succeeded.
    pub fn synthesis(&self) -> Option<&str> {
        self.synthesis
            .as_ref()
            .filter(|s| s.is_success())
            .and_then(AgentResult::output)
    }

    pub fn synthesis_result(&self) -> Option<&AgentResult> {
        self.synthesis.as_ref()
    }

    pub fn contributions_from(&self, peer: &str) -> Vec<&Contribution> {
        self.contributions.iter().filter(|c| c.peer == peer).collect()
    }

    pub fn contributions_from_round(&self, round: u32) -> Vec<&Contribution> {
        self.contributions
            .iter()
            .filter(|c| c.round == round)
            .collect()
    }

    pub fn last_contribution(&self) -> Option<&Contribution> {
        self.contributions.last()
    }

    /// Collapse into a single result: the synthesis when there is one,
    /// otherwise the last contribution. Every peer result is attached as a
    /// related result.
    fn into_agent_result(self) -> AgentResult {
        let related: Vec<AgentResult> = self
            .contributions
            .iter()
            .map(|c| c.result.clone())
            .collect();

        match self.synthesis {
            Some(synthesis) => synthesis.with_related(related),
            None => match self.contributions.last() {
                Some(last) => last.result.clone().with_related(related),
                None => AgentResult::failed(AgentError::Unexpected(
                    "discussion produced no contributions".into(),
                )),
            },
        }
    }
}

/// Peers that take turns discussing a topic, each seeing what came before.
#[derive(Clone)]
pub struct AgentNetwork {
    name: String,
    peers: Vec<Member>,
    max_rounds: u32,
    synthesizer: Option<Member>,
}

/// Builder for [`AgentNetwork`]
pub struct NetworkBuilder {
    name: Option<String>,
    peers: Vec<Member>,
    max_rounds: u32,
    synthesizer: Option<Member>,
}

impl Default for NetworkBuilder {
    fn default() -> Self {
        Self {
            name: None,
            peers: Vec::new(),
            max_rounds: RuntimeConfig::default().max_rounds,
            synthesizer: None,
        }
    }
}

impl NetworkBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn peer(mut self, peer: impl Interactable + 'static) -> Self {
        self.peers.push(Arc::new(peer));
        self
    }

    pub fn max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Summarize the discussion with `synthesizer` once all rounds are done.
    pub fn synthesizer(mut self, synthesizer: impl Interactable + 'static) -> Self {
        self.synthesizer = Some(Arc::new(synthesizer));
        self
    }

    pub fn config(mut self, config: &RuntimeConfig) -> Self {
        self.max_rounds = config.max_rounds;
        self
    }

    pub fn build(self) -> Result<AgentNetwork, AgentError> {
        if self.peers.len() < 2 {
            return Err(AgentError::Configuration(
                "a network needs at least two peers".into(),
            ));
        }
        validate_max_rounds(self.max_rounds)?;

        Ok(AgentNetwork {
            name: self.name.unwrap_or_else(|| "AgentNetwork".to_string()),
            peers: self.peers,
            max_rounds: self.max_rounds,
            synthesizer: self.synthesizer,
        })
    }
}

impl AgentNetwork {
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::default()
    }

    pub fn peers(&self) -> &[Member] {
        &self.peers
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Run the discussion on `context`.
    ///
    /// Peers speak one at a time in configured order. Each successful
    /// contribution is appended to `context` as `[Peer]: output`, so later
    /// peers see it.
    pub async fn discuss(&self, context: &mut AgentContext) -> NetworkResult {
        self.discuss_with(context, &StreamHooks::default()).await
    }

    /// Send `message` to every peer at once. Peers only see the message,
    /// never each other. A failing peer aborts the others.
    #[instrument(skip_all, fields(network = %self.name))]
    pub async fn broadcast(&self, message: &str) -> Result<Vec<Contribution>, AgentError> {
        let mut base = AgentContext::from_user_message(message);
        base.ensure_trace_context();
        let contexts = fan_out_contexts(&base, self.peers.len());

        let results = wait_all(
            &self.peers,
            contexts,
            &StreamHooks::default(),
            FailurePolicy::FailFast,
        )
        .await?;

        Ok(self
            .peers
            .iter()
            .zip(results)
            .map(|(peer, result)| Contribution {
                peer: peer.name().to_string(),
                round: 1,
                result,
            })
            .collect())
    }

    #[instrument(skip_all, fields(network = %self.name, rounds = self.max_rounds))]
    async fn discuss_with(&self, context: &mut AgentContext, hooks: &StreamHooks) -> NetworkResult {
        context.ensure_trace_context();
        let topic = context
            .last_user_message()
            .unwrap_or("[No topic provided]")
            .to_string();
        let trace_id = context.parent_trace_id().unwrap_or_default().to_string();

        let mut contributions = Vec::with_capacity(self.peers.len() * self.max_rounds as usize);
        for round in 1..=self.max_rounds {
            debug!(round, "Starting discussion round");
            for peer in &self.peers {
                let mut peer_context = context.copy();
                peer_context.with_trace_context(trace_id.clone(), TraceIdGenerator::span_id());
                peer_context.add_message(Message::developer(format!(
                    "You are {} participating in round {round} of a discussion. \
                     Consider the previous contributions and add your unique perspective. \
                     Be constructive and build on others' ideas.",
                    peer.name()
                )));

                let result = run_member(peer.as_ref(), peer_context, hooks).await;

                match (result.error(), result.output()) {
                    (None, Some(output)) => {
                        context.add_message(Message::assistant(format!("[{}]: {output}", peer.name())));
                    }
                    (Some(err), _) => {
                        warn!(peer = %peer.name(), round, error = %err, "Peer failed");
                    }
                    (None, None) => {}
                }

                contributions.push(Contribution {
                    peer: peer.name().to_string(),
                    round,
                    result,
                });
            }
        }

        let synthesis = match &self.synthesizer {
            Some(synthesizer) => {
                let prompt = Self::transcript(&topic, &contributions);
                info!(synthesizer = %synthesizer.name(), "Synthesizing discussion");
                let synthesis = synthesis_context(context, prompt);
                Some(run_member(synthesizer.as_ref(), synthesis, hooks).await)
            }
            None => None,
        };

        info!(contributions = contributions.len(), "Discussion complete");
        NetworkResult {
            contributions,
            synthesis,
        }
    }

    fn transcript(topic: &str, contributions: &[Contribution]) -> String {
        let mut prompt = format!(
            "Original discussion topic: {topic}\n\nThe following contributions were made:\n\n"
        );
        for c in contributions {
            prompt.push_str(&format!(
                "**{}** (Round {}): {}\n\n",
                c.peer,
                c.round,
                render_output(&c.result)
            ));
        }
        prompt.push_str("Please synthesize these viewpoints into a coherent summary.");
        prompt
    }
}

#[async_trait]
impl Interactable for AgentNetwork {
    fn name(&self) -> &str {
        &self.name
    }

    async fn interact(&self, context: &mut AgentContext) -> AgentResult {
        self.discuss(context).await.into_agent_result()
    }

    fn interact_stream(&self, context: AgentContext) -> AgentStream {
        let network = self.clone();
        AgentStream::new(move |hooks| {
            async move {
                let mut context = context;
                network
                    .discuss_with(&mut context, &hooks)
                    .await
                    .into_agent_result()
            }
            .boxed()
        })
    }

    fn descriptor(&self) -> Descriptor {
        Descriptor::Network {
            name: self.name.clone(),
            peers: self.peers.iter().map(|p| p.descriptor()).collect(),
            max_rounds: self.max_rounds,
            synthesizer: self.synthesizer.as_ref().map(|s| Box::new(s.descriptor())),
        }
    }
}

impl std::fmt::Debug for AgentNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentNetwork")
            .field("name", &self.name)
            .field("peers", &self.peers.iter().map(|p| p.name()).collect::<Vec<_>>())
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConversationItem, Role};
    use crate::testing::{scripted_agent, ScriptedResponder, SlowMember};

    fn network(peers: &[&SlowMember], rounds: u32) -> AgentNetwork {
        peers
            .iter()
            .fold(AgentNetwork::builder().name("Debate"), |b, p| b.peer((*p).clone()))
            .max_rounds(rounds)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_two_peers() {
        let lone = SlowMember::answering("lone", 1, "x");
        let err = AgentNetwork::builder().peer(lone).build().unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));

        let a = SlowMember::answering("a", 1, "x");
        let b = SlowMember::answering("b", 1, "y");
        let zero = AgentNetwork::builder().peer(a).peer(b).max_rounds(0).build();
        assert!(zero.is_err());
    }

    // === Discuss Tests ===

    #[tokio::test]
    async fn test_discuss_produces_rounds_times_peers() {
        let a = SlowMember::answering("Alice", 1, "idea A");
        let b = SlowMember::answering("Bob", 1, "idea B");
        let c = SlowMember::answering("Cara", 1, "idea C");
        let net = network(&[&a, &b, &c], 3);

        let mut context = AgentContext::from_user_message("Remote work?");
        let result = net.discuss(&mut context).await;

        assert_eq!(result.contributions().len(), 9);
        let rounds: Vec<u32> = result.contributions().iter().map(Contribution::round).collect();
        assert_eq!(rounds, vec![1, 1, 1, 2, 2, 2, 3, 3, 3]);
        assert_eq!(result.contributions_from("Bob").len(), 3);
        assert_eq!(result.contributions_from_round(2).len(), 3);
        assert_eq!(result.last_contribution().unwrap().peer(), "Cara");
        assert!(result.synthesis().is_none());
    }

    #[tokio::test]
    async fn test_later_peers_see_earlier_contributions() {
        let a = SlowMember::answering("Alice", 1, "idea A");
        let b = SlowMember::answering("Bob", 1, "idea B");
        let net = network(&[&a, &b], 1);

        let mut context = AgentContext::from_user_message("Remote work?");
        net.discuss(&mut context).await;

        let seen = &b.received()[0];
        let texts: Vec<_> = seen.history().iter().filter_map(ConversationItem::text).collect();
        assert_eq!(texts[0], "Remote work?");
        assert_eq!(texts[1], "[Alice]: idea A");
        assert!(texts[2].starts_with("You are Bob participating in round 1 of a discussion."));

        match &seen.history()[2] {
            ConversationItem::Message(m) => assert_eq!(m.role, Role::Developer),
            other => panic!("unexpected item: {other:?}"),
        }

        // Shared context holds attributed contributions only
        assert_eq!(context.history_len(), 3);
        assert_eq!(context.history()[2].text(), Some("[Bob]: idea B"));
    }

    #[tokio::test]
    async fn test_failed_peer_is_recorded_not_shared() {
        let a = SlowMember::failing("Alice", 1, "no quota");
        let b = SlowMember::answering("Bob", 1, "idea B");
        let net = network(&[&a, &b], 1);

        let mut context = AgentContext::from_user_message("topic");
        let result = net.discuss(&mut context).await;

        assert!(result.contributions()[0].is_error());
        assert_eq!(context.history_len(), 2);
    }

    #[tokio::test]
    async fn test_panicking_peer_is_recorded_as_error() {
        let a = SlowMember::answering("Alice", 1, "idea A");
        let b = SlowMember::panicking("Bob", 1);
        let c = SlowMember::answering("Cara", 1, "idea C");
        let net = network(&[&a, &b, &c], 1);

        let result = net.interact_text("topic").await;

        assert_eq!(result.output(), Some("idea C"));
        assert_eq!(result.related().len(), 3);
        assert_eq!(
            result.related()[1].error(),
            Some(&AgentError::Unexpected("Bob crashed".into()))
        );
        assert_eq!(c.received()[0].history()[1].text(), Some("[Alice]: idea A"));
    }

    #[tokio::test]
    async fn test_discuss_with_synthesis() {
        let a = SlowMember::answering("Alice", 1, "yes");
        let b = SlowMember::failing("Bob", 1, "offline");
        let responder = Arc::new(ScriptedResponder::replying(&["Consensus: yes"]));
        let net = AgentNetwork::builder()
            .peer(a)
            .peer(b)
            .max_rounds(1)
            .synthesizer(scripted_agent("Moderator", responder.clone()))
            .build()
            .unwrap();

        let mut context = AgentContext::from_user_message("Ship it?");
        let result = net.discuss(&mut context).await;

        assert_eq!(result.synthesis(), Some("Consensus: yes"));
        let prompt = responder.last_request().unwrap().input[0]
            .text()
            .unwrap()
            .to_string();
        assert_eq!(
            prompt,
            "Original discussion topic: Ship it?\n\n\
             The following contributions were made:\n\n\
             **Alice** (Round 1): yes\n\n\
             **Bob** (Round 1): [ERROR: Unexpected error: offline]\n\n\
             Please synthesize these viewpoints into a coherent summary."
        );
    }

    // === Broadcast Tests ===

    #[tokio::test]
    async fn test_broadcast_isolates_peers() {
        let a = SlowMember::answering("Alice", 30, "A");
        let b = SlowMember::answering("Bob", 1, "B");
        let net = network(&[&a, &b], 2);

        let contributions = net.broadcast("Quick poll").await.unwrap();

        assert_eq!(contributions.len(), 2);
        assert_eq!(contributions[0].output(), Some("A"));
        assert_eq!(contributions[1].output(), Some("B"));
        assert!(contributions.iter().all(|c| c.round() == 1));
        assert_eq!(a.received()[0].history_len(), 1);
        assert_eq!(b.received()[0].history_len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_fails_fast() {
        let a = SlowMember::answering("Alice", 100, "A");
        let b = SlowMember::failing("Bob", 1, "down");
        let net = network(&[&a, &b], 1);

        let err = net.broadcast("poll").await.unwrap_err();
        assert!(matches!(err, AgentError::MemberFailed { ref member, .. } if member == "Bob"));
    }

    // === Interactable Tests ===

    #[tokio::test]
    async fn test_interact_returns_last_contribution() {
        let a = SlowMember::answering("Alice", 1, "first");
        let b = SlowMember::answering("Bob", 1, "last");
        let net = network(&[&a, &b], 2);

        let result = net.interact_text("topic").await;

        assert_eq!(result.output(), Some("last"));
        assert_eq!(result.related().len(), 4);
    }
}
