//! The working transcript of one agent run and its token-budget truncation.

use dispatch_core::message::{Message, Role};
use tracing::debug;

pub const DEFAULT_TOKEN_BUDGET: usize = 45_000;
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;

/// Ordered messages sent to the model, system message first.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    token_budget: usize,
    chars_per_token: usize,
}

impl Transcript {
    /// System prompt, prior history, then the new user query.
    pub fn seed(system_prompt: impl Into<String>, history: Vec<Message>, user_query: &str) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history.into_iter().filter(|m| m.role != Role::System));
        messages.push(Message::user(user_query));
        Self {
            messages,
            token_budget: DEFAULT_TOKEN_BUDGET,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }

    pub fn with_budget(mut self, token_budget: usize, chars_per_token: usize) -> Self {
        self.token_budget = token_budget;
        self.chars_per_token = chars_per_token.max(1);
        self
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Total characters divided by the characters-per-token ratio.
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self.messages.iter().map(Message::char_count).sum();
        chars / self.chars_per_token
    }

    /// Evict the oldest non-system messages until the estimate fits the
    /// budget. The system message and the newest message always stay.
    /// Returns the number of evicted messages.
    pub fn truncate(&mut self) -> usize {
        let before = self.messages.len();

        while self.estimated_tokens() > self.token_budget && self.messages.len() > 2 {
            self.messages.remove(1);
        }
        if before != self.messages.len() {
            // A tool result cannot lead the window without its assistant turn.
            while self.messages.len() > 2 && self.messages[1].role == Role::Tool {
                self.messages.remove(1);
            }
        }

        let evicted = before - self.messages.len();
        if evicted > 0 {
            debug!(
                evicted,
                remaining = self.messages.len(),
                estimated_tokens = self.estimated_tokens(),
                "Transcript truncated"
            );
        }
        evicted
    }
}
