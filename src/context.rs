//! Context Analyzer / Query Enhancer
//!
//! Decides whether a message continues the current topic and, if so,
//! rewrites it with the topic and the related concept it introduces so that
//! retrieval sees "how does it work?" as a question about the topic.
//! Enhancement is a pure function of (message, memory).

use crate::memory::{ConversationMemory, RelatedConcept};
use serde::{Deserialize, Serialize};

/// Word limit for a bare question to count as an implicit continuation
const SHORT_QUESTION_WORDS: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "signal", content = "detail", rename_all = "snake_case")]
pub enum FollowUpSignal {
    Pronoun,
    Continuation(String),
    RelatedConcept(String),
    ShortQuestion,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnhancedQuery {
    pub original: String,
    /// Annotated query; equals `original` when this is not a follow-up
    pub text: String,
    /// Plain terms handed to the retrieval backend
    pub search_text: String,
    pub is_follow_up: bool,
    /// Topic the turn is about: the continued topic, or the newly named one
    pub topic: Option<String>,
    pub related: Option<RelatedConcept>,
    pub signals: Vec<FollowUpSignal>,
}

impl EnhancedQuery {
    /// Query used as-is, e.g. when memory is empty
    pub fn passthrough(message: &str, topic: Option<String>) -> Self {
        Self {
            original: message.to_string(),
            text: message.to_string(),
            search_text: message.to_string(),
            is_follow_up: false,
            topic,
            related: None,
            signals: Vec::new(),
        }
    }
}

pub struct ContextAnalyzer;

impl ContextAnalyzer {
    pub fn enhance(message: &str, memory: &ConversationMemory) -> EnhancedQuery {
        let vocabulary = memory.vocabulary();
        let named_topic = vocabulary.find_topic(message).map(str::to_string);

        let Some(current) = memory.current_topic() else {
            return EnhancedQuery::passthrough(message, named_topic);
        };

        // Naming a different recognised topic is a topic switch
        if let Some(named) = &named_topic {
            if named != current {
                return EnhancedQuery::passthrough(message, named_topic);
            }
        }

        let related = vocabulary.related_concept(current, message).cloned();
        let signals = Self::signals(message, memory, related.as_ref());
        if signals.is_empty() {
            let subject = named_topic.or_else(|| vocabulary.fallback_subject(message));
            return EnhancedQuery::passthrough(message, subject);
        }

        let mut annotation = format!("Follow-up on: {}", current);
        let mut search_text = format!("{} {}", message.trim(), current);
        if let Some(rel) = &related {
            annotation.push_str(&format!("; related concept: {} ({})", rel.concept, rel.relation));
            search_text.push(' ');
            search_text.push_str(&rel.concept);
        }

        EnhancedQuery {
            original: message.to_string(),
            text: format!("{} [{}]", message.trim(), annotation),
            search_text,
            is_follow_up: true,
            topic: Some(current.to_string()),
            related,
            signals,
        }
    }

    fn signals(
        message: &str,
        memory: &ConversationMemory,
        related: Option<&RelatedConcept>,
    ) -> Vec<FollowUpSignal> {
        let vocabulary = memory.vocabulary();
        let mut signals = Vec::new();

        if vocabulary.has_pronoun_reference(message) {
            signals.push(FollowUpSignal::Pronoun);
        }
        if let Some(phrase) = vocabulary.continuation_phrase(message) {
            signals.push(FollowUpSignal::Continuation(phrase.to_string()));
        }
        if let Some(rel) = related {
            signals.push(FollowUpSignal::RelatedConcept(rel.concept.clone()));
        }
        let words = message.split_whitespace().count();
        if message.trim_end().ends_with('?') && words <= SHORT_QUESTION_WORDS && signals.is_empty() {
            // Only counts when nothing in it looks like a fresh subject
            if vocabulary.content_terms(message).len() <= 1 {
                signals.push(FollowUpSignal::ShortQuestion);
            }
        }
        signals
    }
}
