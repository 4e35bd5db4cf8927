//! Capped in-memory conversation window

use std::collections::VecDeque;

use super::ChatMessage;

/// FIFO window of the most recent chat messages
///
/// Never holds more than `cap` messages. Evicted messages stay in the
/// memory store; only the window forgets them.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    messages: VecDeque<ChatMessage>,
    cap: usize,
}

impl RollingHistory {
    /// Create an empty window holding at most `cap` messages
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Seed the window, keeping only the newest `cap` messages
    #[must_use]
    pub fn seeded(messages: impl IntoIterator<Item = ChatMessage>, cap: usize) -> Self {
        let mut history = Self::new(cap);
        for message in messages {
            history.messages.push_back(message);
        }
        history.evict();
        history
    }

    /// Append a user utterance and the reply it received
    pub fn push_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.messages.push_back(ChatMessage::user(user));
        self.messages.push_back(ChatMessage::assistant(assistant));
        self.evict();
    }

    fn evict(&mut self) {
        while self.messages.len() > self.cap {
            self.messages.pop_front();
        }
    }

    /// Messages oldest first
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub const fn cap(&self) -> usize {
        self.cap
    }

    /// Whether the window already holds a message with this exact content
    #[must_use]
    pub fn contains_content(&self, content: &str) -> bool {
        self.messages.iter().any(|m| m.content == content)
    }
}
