//! Fan-out primitives shared by the compositions

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::context::AgentContext;
use crate::error::{panic_message, AgentError};
use crate::interactable::Interactable;
use crate::result::AgentResult;
use crate::stream::StreamHooks;
use crate::trace::TraceIdGenerator;

/// Shared handle to a composed member.
pub type Member = Arc<dyn Interactable>;

/// What a wait-all fan-out does when a member fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailurePolicy {
    /// Abort the remaining members and report the failure
    FailFast,
    /// Keep going and return every result, failed ones included
    Collect,
}

/// One independent copy of `context` per member.
///
/// The copies share a trace id; each gets its own span.
pub(crate) fn fan_out_contexts(context: &AgentContext, count: usize) -> Vec<AgentContext> {
    let mut base = context.copy();
    base.ensure_trace_context();
    let trace_id = base.parent_trace_id().unwrap_or_default().to_string();

    (0..count)
        .map(|_| {
            let mut copy = base.copy();
            copy.with_trace_context(trace_id.clone(), TraceIdGenerator::span_id());
            copy
        })
        .collect()
}

/// Fresh context for a synthesizer, correlated with `parent`'s trace.
pub(crate) fn synthesis_context(parent: &AgentContext, prompt: String) -> AgentContext {
    let mut context = AgentContext::from_user_message(prompt);
    if let Some(trace_id) = parent.parent_trace_id() {
        context.with_trace_context(trace_id, TraceIdGenerator::span_id());
    }
    context
}

/// Transcript line for a member result: its output, or an error placeholder.
pub(crate) fn render_output(result: &AgentResult) -> String {
    match result.error() {
        Some(err) => format!("[ERROR: {err}]"),
        None => result.output().unwrap_or("[No output]").to_string(),
    }
}

/// Run `member` on `context` with the enclosing stream's hooks. A panic
/// inside the member becomes an error result.
pub(crate) async fn run_member(
    member: &dyn Interactable,
    context: AgentContext,
    hooks: &StreamHooks,
) -> AgentResult {
    guarded(member.interact_stream(context).run_nested(hooks.clone())).await
}

async fn guarded(run: BoxFuture<'static, AgentResult>) -> AgentResult {
    match AssertUnwindSafe(run).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(error = %message, "Member panicked");
            AgentResult::failed(AgentError::Unexpected(message))
        }
    }
}

/// Spawn one task per member, tagged with the member's index.
fn spawn_members(
    members: &[Member],
    contexts: Vec<AgentContext>,
    hooks: &StreamHooks,
) -> JoinSet<(usize, AgentResult)> {
    let mut set = JoinSet::new();
    for (index, (member, context)) in members.iter().zip(contexts).enumerate() {
        let run = member.interact_stream(context).run_nested(hooks.clone());
        set.spawn(async move { (index, guarded(run).await) });
    }
    set
}

/// Run every member concurrently and return results in member order.
#[instrument(skip_all, fields(members = members.len(), policy = ?policy))]
pub(crate) async fn wait_all(
    members: &[Member],
    contexts: Vec<AgentContext>,
    hooks: &StreamHooks,
    policy: FailurePolicy,
) -> Result<Vec<AgentResult>, AgentError> {
    let mut set = spawn_members(members, contexts, hooks);
    let mut slots: Vec<Option<AgentResult>> = vec![None; members.len()];

    while let Some(joined) = set.join_next().await {
        let (index, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                set.abort_all();
                return Err(AgentError::Unexpected(e.to_string()));
            }
        };

        if policy == FailurePolicy::FailFast {
            if let Some(err) = result.error() {
                let member = members[index].name().to_string();
                warn!(member = %member, error = %err, "Member failed, aborting siblings");
                set.abort_all();
                return Err(AgentError::MemberFailed {
                    member,
                    message: err.to_string(),
                });
            }
        }

        debug!(member = %members[index].name(), index, "Member finished");
        slots[index] = Some(result);
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Run every member concurrently; the first success wins and the rest are
/// aborted.
#[instrument(skip_all, fields(members = members.len()))]
pub(crate) async fn race(
    members: &[Member],
    contexts: Vec<AgentContext>,
    hooks: &StreamHooks,
) -> AgentResult {
    let mut set = spawn_members(members, contexts, hooks);
    let mut failures = 0;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) if result.is_success() => {
                info!(member = %members[index].name(), "Race won");
                set.abort_all();
                return result;
            }
            Ok((index, result)) => {
                debug!(member = %members[index].name(), error = ?result.error(), "Race entrant failed");
                failures += 1;
            }
            Err(e) => {
                warn!(error = %e, "Race entrant task failed");
                failures += 1;
            }
        }
    }

    AgentResult::failed(AgentError::AllMembersFailed(failures))
}
