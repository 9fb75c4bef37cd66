//! Context window management - trims the history sent to the model
//!
//! The stored conversation is never modified. A [`ContextManagement`] config
//! on the agent picks which items of it go into each model request.

use std::sync::Arc;

use tracing::debug;

use crate::error::AgentError;
use crate::model::{ConversationItem, Message, Role};

/// Estimates how many tokens a piece of history costs.
pub trait TokenCounter: Send + Sync {
    fn count_text(&self, text: &str) -> usize;

    fn count_item(&self, item: &ConversationItem) -> usize {
        match item {
            // Role markers and separators
            ConversationItem::Message(msg) => self.count_text(&msg.content) + 4,
            // Call id and status envelope
            ConversationItem::FunctionCallOutput(out) => self.count_text(&out.output) + 10,
            ConversationItem::FunctionCall(call) => {
                self.count_text(&call.name) + self.count_text(&call.arguments)
            }
        }
    }

    fn count_history(&self, history: &[ConversationItem]) -> usize {
        history.iter().map(|item| self.count_item(item)).sum()
    }
}

/// Character-ratio estimate. Good enough for budgeting, not for billing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleTokenCounter {
    chars_per_token: usize,
}

impl SimpleTokenCounter {
    pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

    pub fn new() -> Self {
        Self {
            chars_per_token: Self::DEFAULT_CHARS_PER_TOKEN,
        }
    }

    pub fn with_chars_per_token(chars_per_token: usize) -> Result<Self, AgentError> {
        if chars_per_token == 0 {
            return Err(AgentError::Configuration(
                "chars_per_token must be at least 1".into(),
            ));
        }
        Ok(Self { chars_per_token })
    }

    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }
}

impl Default for SimpleTokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for SimpleTokenCounter {
    fn count_text(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (text.chars().count() / self.chars_per_token).max(1)
    }
}

/// Chooses the slice of history that fits a token budget.
pub trait ContextWindowStrategy: Send + Sync {
    /// Returns the items to send. `history` is left untouched.
    fn manage(
        &self,
        history: &[ConversationItem],
        max_tokens: usize,
        counter: &dyn TokenCounter,
    ) -> Vec<ConversationItem>;
}

/// Keeps the most recent items that fit, dropping older ones first.
///
/// With [`SlidingWindowStrategy::preserving_developer_messages`], the run of
/// developer messages at the very start of the history is always kept and
/// counts against the budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlidingWindowStrategy {
    preserve_developer_messages: bool,
}

impl SlidingWindowStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preserving_developer_messages() -> Self {
        Self {
            preserve_developer_messages: true,
        }
    }

    pub fn preserves_developer_messages(&self) -> bool {
        self.preserve_developer_messages
    }
}

impl ContextWindowStrategy for SlidingWindowStrategy {
    fn manage(
        &self,
        history: &[ConversationItem],
        max_tokens: usize,
        counter: &dyn TokenCounter,
    ) -> Vec<ConversationItem> {
        if max_tokens == 0 || counter.count_history(history) <= max_tokens {
            return history.to_vec();
        }

        let preserved = if self.preserve_developer_messages {
            history
                .iter()
                .take_while(|item| {
                    matches!(
                        item,
                        ConversationItem::Message(Message {
                            role: Role::Developer,
                            ..
                        })
                    )
                })
                .count()
        } else {
            0
        };
        let (head, tail) = history.split_at(preserved);

        let mut used = counter.count_history(head);
        let mut start = tail.len();
        for item in tail.iter().rev() {
            let cost = counter.count_item(item);
            if used + cost > max_tokens {
                break;
            }
            used += cost;
            start -= 1;
        }

        debug!(
            total = history.len(),
            kept = head.len() + tail.len() - start,
            tokens = used,
            max_tokens,
            "Trimmed history to context window"
        );

        head.iter().chain(&tail[start..]).cloned().collect()
    }
}

/// Context window settings for an agent.
#[derive(Clone)]
pub struct ContextManagement {
    strategy: Arc<dyn ContextWindowStrategy>,
    max_tokens: usize,
    counter: Arc<dyn TokenCounter>,
}

impl ContextManagement {
    /// Uses [`SimpleTokenCounter`] until [`ContextManagement::with_counter`]
    /// replaces it.
    pub fn new(
        strategy: impl ContextWindowStrategy + 'static,
        max_tokens: usize,
    ) -> Result<Self, AgentError> {
        if max_tokens == 0 {
            return Err(AgentError::Configuration(
                "context max_tokens must be at least 1".into(),
            ));
        }
        Ok(Self {
            strategy: Arc::new(strategy),
            max_tokens,
            counter: Arc::new(SimpleTokenCounter::new()),
        })
    }

    /// Shorthand for a plain [`SlidingWindowStrategy`].
    pub fn sliding_window(max_tokens: usize) -> Result<Self, AgentError> {
        Self::new(SlidingWindowStrategy::new(), max_tokens)
    }

    pub fn with_counter(mut self, counter: impl TokenCounter + 'static) -> Self {
        self.counter = Arc::new(counter);
        self
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn apply(&self, history: &[ConversationItem]) -> Vec<ConversationItem> {
        self.strategy
            .manage(history, self.max_tokens, self.counter.as_ref())
    }
}

impl std::fmt::Debug for ContextManagement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManagement")
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FunctionCall, ToolOutput};

    /// One token per character, no per-item overhead.
    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count_text(&self, text: &str) -> usize {
            text.len()
        }

        fn count_item(&self, item: &ConversationItem) -> usize {
            item.text().map_or(0, str::len)
        }
    }

    fn messages(texts: &[&str]) -> Vec<ConversationItem> {
        texts.iter().map(|t| Message::user(*t).into()).collect()
    }

    fn texts(items: &[ConversationItem]) -> Vec<&str> {
        items.iter().filter_map(ConversationItem::text).collect()
    }

    // === Token Counter Tests ===

    #[test]
    fn test_simple_counter_estimates() {
        let counter = SimpleTokenCounter::new();
        assert_eq!(counter.count_text(""), 0);
        assert_eq!(counter.count_text("hi"), 1);
        assert_eq!(counter.count_text("twelve chars"), 3);

        let message: ConversationItem = Message::user("twelve chars").into();
        assert_eq!(counter.count_item(&message), 7);

        let output = ConversationItem::FunctionCallOutput(ToolOutput::success("c1", "abcdefgh"));
        assert_eq!(counter.count_item(&output), 12);

        let call = ConversationItem::FunctionCall(FunctionCall::new("c1", "lookup", "{\"q\":1}"));
        assert_eq!(counter.count_item(&call), 2);
    }

    #[test]
    fn test_counter_rejects_zero_ratio() {
        assert!(SimpleTokenCounter::with_chars_per_token(0).is_err());
        let counter = SimpleTokenCounter::with_chars_per_token(2).unwrap();
        assert_eq!(counter.count_text("abcdef"), 3);
    }

    // === Sliding Window Tests ===

    #[test]
    fn test_history_within_budget_is_unchanged() {
        let history = messages(&["aaaa", "bbbb"]);
        let kept = SlidingWindowStrategy::new().manage(&history, 8, &CharCounter);
        assert_eq!(kept, history);

        let unlimited = SlidingWindowStrategy::new().manage(&history, 0, &CharCounter);
        assert_eq!(unlimited, history);
    }

    #[test]
    fn test_keeps_most_recent_items() {
        let history = messages(&["aaaa", "bbbb", "cccc", "dd"]);
        let kept = SlidingWindowStrategy::new().manage(&history, 7, &CharCounter);
        assert_eq!(texts(&kept), vec!["cccc", "dd"]);
    }

    #[test]
    fn test_stops_at_first_item_that_does_not_fit() {
        // "bbbbbbbb" does not fit, so the shorter "a" before it is dropped too
        let history = messages(&["a", "bbbbbbbb", "cc"]);
        let kept = SlidingWindowStrategy::new().manage(&history, 5, &CharCounter);
        assert_eq!(texts(&kept), vec!["cc"]);
    }

    #[test]
    fn test_preserves_leading_developer_messages() {
        let mut history: Vec<ConversationItem> = vec![
            Message::developer("rules").into(),
            Message::developer("more").into(),
        ];
        history.extend(messages(&["aaaa", "bbbb", "cc"]));
        history.push(Message::developer("late").into());

        let kept = SlidingWindowStrategy::preserving_developer_messages()
            .manage(&history, 16, &CharCounter);
        assert_eq!(texts(&kept), vec!["rules", "more", "cc", "late"]);

        let plain = SlidingWindowStrategy::new().manage(&history, 16, &CharCounter);
        assert_eq!(texts(&plain), vec!["aaaa", "bbbb", "cc", "late"]);
    }

    // === Config Tests ===

    #[test]
    fn test_config_validates_budget() {
        assert!(ContextManagement::sliding_window(0).is_err());

        let config = ContextManagement::sliding_window(7)
            .unwrap()
            .with_counter(CharCounter);
        assert_eq!(config.max_tokens(), 7);
        let kept = config.apply(&messages(&["aaaa", "bbbb", "cc"]));
        assert_eq!(texts(&kept), vec!["bbbb", "cc"]);
    }
}
