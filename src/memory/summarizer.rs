//! Conversation summaries
//!
//! Deterministic answers for conversation-management queries. These never
//! call a model: a wrong answer to "what did we just talk about" is worse
//! than a plain one.

use crate::memory::store::{ConversationMemory, Turn};
use crate::models::IntentCategory;

/// Longest user message quoted back verbatim
const MAX_QUOTE_CHARS: usize = 120;

pub struct ConversationSummarizer;

impl ConversationSummarizer {
    /// Answer "what did we just talk about"
    pub fn recall_topic(memory: &ConversationMemory) -> String {
        let mut answer = memory.summarize();
        if let Some(turn) = Self::last_substantive_turn(memory) {
            answer.push_str(&format!(
                " Your last question was: \"{}\"",
                Self::quote(&turn.user_message)
            ));
        }
        answer
    }

    /// Answer "summarize our conversation"
    pub fn summarize_conversation(memory: &ConversationMemory) -> String {
        let spans = memory.detailed_summary();
        if spans.is_empty() {
            return memory.summarize();
        }

        let mut text = String::from("Here's a recap of what we've covered:\n");
        for (i, span) in spans.iter().enumerate() {
            let questions = memory
                .turns()
                .filter(|t| t.topic.as_deref() == Some(span.topic.as_str()))
                .filter(|t| t.intent != IntentCategory::ConversationManagement)
                .count();
            text.push_str(&format!(
                "{}. {} (from message {}, {} question(s))\n",
                i + 1,
                span.topic,
                span.turn_index,
                questions
            ));
        }
        if let Some(topic) = memory.current_topic() {
            text.push_str(&format!("We're currently focused on {}.", topic));
        }
        text
    }

    /// Answer "how long have we been talking"
    pub fn conversation_stats(memory: &ConversationMemory) -> String {
        let metrics = memory.metrics();
        if metrics.turn_count == 0 {
            return memory.summarize();
        }
        let minutes = metrics.elapsed_secs / 60;
        let duration = if minutes == 0 {
            "less than a minute".to_string()
        } else {
            format!("about {} minute(s)", minutes)
        };
        format!(
            "We've exchanged {} message(s) over {}, touching on {} topic(s).",
            metrics.turn_count, duration, metrics.distinct_topics
        )
    }

    fn last_substantive_turn(memory: &ConversationMemory) -> Option<&Turn> {
        memory
            .turns()
            .rev()
            .find(|t| t.intent != IntentCategory::ConversationManagement)
    }

    fn quote(message: &str) -> String {
        if message.chars().count() <= MAX_QUOTE_CHARS {
            message.to_string()
        } else {
            let truncated: String = message.chars().take(MAX_QUOTE_CHARS).collect();
            format!("{}...", truncated)
        }
    }
}
