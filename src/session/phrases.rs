//! Termination phrases and canned messages

use std::collections::{BTreeMap, HashSet};

use crate::config::PhraseConfig;

/// Lowercase, trim, and strip trailing punctuation
#[must_use]
pub fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || matches!(c, '।' | '॥' | '…' | '！' | '？'))
        .trim()
        .to_lowercase()
}

/// Phrases that end the session, across all configured locales
#[derive(Debug, Clone, Default)]
pub struct TerminationPhrases {
    phrases: HashSet<String>,
}

impl TerminationPhrases {
    /// Build from a locale → phrases table
    #[must_use]
    pub fn new(by_locale: &BTreeMap<String, Vec<String>>) -> Self {
        let phrases = by_locale
            .values()
            .flatten()
            .map(|p| normalize(p))
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    /// Whether the whole utterance is a termination phrase
    #[must_use]
    pub fn matches(&self, utterance: &str) -> bool {
        self.phrases.contains(&normalize(utterance))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// Localized fixed responses
#[derive(Debug, Clone)]
pub struct LocaleMessages {
    greeting: String,
    pub farewell: String,
    pub fallback: String,
    pub not_heard: String,
}

impl LocaleMessages {
    /// Greeting for `user`
    #[must_use]
    pub fn greeting(&self, user: &str) -> String {
        self.greeting.replace("{user}", user)
    }
}

impl From<&PhraseConfig> for LocaleMessages {
    fn from(config: &PhraseConfig) -> Self {
        Self {
            greeting: config.messages.greeting.clone(),
            farewell: config.messages.farewell.clone(),
            fallback: config.messages.fallback.clone(),
            not_heard: config.messages.not_heard.clone(),
        }
    }
}
