//! Conversation memory
//!
//! Bounded, append-only log of turns plus the running conversational state
//! derived from it (current topic, recently mentioned entities, turn count).

use crate::memory::vocabulary::DomainVocabulary;
use crate::models::IntentCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

/// A single recorded user-message/system-response pair. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub response: String,
    pub intent: IntentCategory,
    /// Topic in effect once this turn was recorded
    pub topic: Option<String>,
    pub follow_up: bool,
}

/// (topic, turn sequence) marking where a topic started inside the retained window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSpan {
    pub topic: String,
    pub turn_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Turns ever recorded, including evicted ones
    pub turn_count: u64,
    pub retained_turns: usize,
    pub distinct_topics: usize,
    pub elapsed_secs: i64,
}

/// Conversation memory for one session
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    capacity: usize,
    turns: VecDeque<Turn>,
    current_topic: Option<String>,
    current_entities: BTreeSet<String>,
    turn_count: u64,
    vocabulary: Arc<DomainVocabulary>,
}

impl ConversationMemory {
    pub fn new(capacity: usize, vocabulary: Arc<DomainVocabulary>) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            turns: VecDeque::with_capacity(capacity),
            current_topic: None,
            current_entities: BTreeSet::new(),
            turn_count: 0,
            vocabulary,
        }
    }

    /// Append a turn, evicting the oldest once capacity is reached.
    ///
    /// Conversation-management and calculator turns never move the topic.
    /// Tool and casual turns move it only to a recognised vocabulary topic.
    /// Follow-ups keep the current topic and only refresh entities.
    pub fn record(
        &mut self,
        user_message: &str,
        response: &str,
        intent: IntentCategory,
        follow_up: bool,
    ) -> &Turn {
        match intent {
            IntentCategory::ConversationManagement | IntentCategory::Calculator => {}
            IntentCategory::ToolHandoff | IntentCategory::Fallback => {
                if let Some(topic) = self.vocabulary.find_topic(user_message).map(str::to_string) {
                    self.update_running_state(user_message, follow_up, Some(topic));
                }
            }
            IntentCategory::Knowledge => {
                let topic = self
                    .vocabulary
                    .find_topic(user_message)
                    .map(str::to_string)
                    .or_else(|| self.vocabulary.fallback_subject(user_message));
                self.update_running_state(user_message, follow_up, topic);
            }
        }

        self.turn_count += 1;
        let turn = Turn {
            sequence: self.turn_count,
            timestamp: Utc::now(),
            user_message: user_message.to_string(),
            response: response.to_string(),
            intent,
            topic: self.current_topic.clone(),
            follow_up,
        };

        while self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);

        // just pushed
        &self.turns[self.turns.len() - 1]
    }

    fn update_running_state(&mut self, user_message: &str, follow_up: bool, new_topic: Option<String>) {
        let concepts: Vec<String> = self
            .vocabulary
            .find_concepts(user_message)
            .into_iter()
            .map(str::to_string)
            .collect();

        if follow_up && self.current_topic.is_some() {
            self.current_entities.extend(concepts);
            return;
        }

        if let Some(topic) = new_topic {
            if self.current_topic.as_deref() != Some(topic.as_str()) {
                self.current_entities.clear();
            }
            self.current_topic = Some(topic);
        }
        self.current_entities.extend(concepts);
    }

    // =============================
    // Reads (pure)
    // =============================

    pub fn current_topic(&self) -> Option<&str> {
        self.current_topic.as_deref()
    }

    pub fn current_entities(&self) -> &BTreeSet<String> {
        &self.current_entities
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &Turn> {
        self.turns.iter()
    }

    /// N most recent turns, newest first
    pub fn recent_turns(&self, count: usize) -> impl Iterator<Item = &Turn> {
        self.turns.iter().rev().take(count)
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.back()
    }

    pub fn vocabulary(&self) -> &Arc<DomainVocabulary> {
        &self.vocabulary
    }

    /// One-line description of the latest topic
    pub fn summarize(&self) -> String {
        match (&self.current_topic, self.turns.is_empty()) {
            (_, true) => "We haven't discussed anything yet.".to_string(),
            (Some(topic), false) => {
                if self.current_entities.is_empty() {
                    format!("We were just discussing {}.", topic)
                } else {
                    let entities: Vec<&str> =
                        self.current_entities.iter().map(String::as_str).collect();
                    format!(
                        "We were just discussing {}, specifically {}.",
                        topic,
                        entities.join(", ")
                    )
                }
            }
            (None, false) => format!(
                "We've exchanged {} message(s), but no specific topic has come up yet.",
                self.turns.len()
            ),
        }
    }

    /// Topic changes across the retained window, oldest first
    pub fn detailed_summary(&self) -> Vec<TopicSpan> {
        let mut spans: Vec<TopicSpan> = Vec::new();
        for turn in &self.turns {
            let Some(topic) = &turn.topic else { continue };
            let changed = spans.last().map(|s| &s.topic != topic).unwrap_or(true);
            if changed {
                spans.push(TopicSpan {
                    topic: topic.clone(),
                    turn_index: turn.sequence,
                });
            }
        }
        spans
    }

    pub fn metrics(&self) -> MemoryMetrics {
        let distinct_topics = self
            .turns
            .iter()
            .filter_map(|t| t.topic.as_deref())
            .collect::<BTreeSet<_>>()
            .len();

        let elapsed_secs = self
            .turns
            .front()
            .map(|first| (Utc::now() - first.timestamp).num_seconds().max(0))
            .unwrap_or(0);

        MemoryMetrics {
            turn_count: self.turn_count,
            retained_turns: self.turns.len(),
            distinct_topics,
            elapsed_secs,
        }
    }

    /// Condensed context for model prompts
    pub fn condensed_context(&self, max_turns: usize) -> String {
        let mut context = String::new();
        if let Some(topic) = &self.current_topic {
            context.push_str(&format!("Current topic: {}\n", topic));
        }
        let mut recent: Vec<&Turn> = self.recent_turns(max_turns).collect();
        recent.reverse();
        for turn in recent {
            context.push_str(&format!("- User: {}\n", turn.user_message));
        }
        context
    }

    /// Drop every turn and all derived state
    pub fn clear(&mut self) {
        self.turns.clear();
        self.current_topic = None;
        self.current_entities.clear();
        self.turn_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(capacity: usize) -> ConversationMemory {
        ConversationMemory::new(capacity, Arc::new(DomainVocabulary::default()))
    }

    #[test]
    fn test_record_sets_topic_from_vocabulary() {
        let mut memory = memory(8);
        memory.record("Tell me about IUL", "IUL is...", IntentCategory::Knowledge, false);

        assert_eq!(memory.current_topic(), Some("IUL"));
        assert_eq!(memory.turn_count(), 1);
        assert_eq!(memory.last_turn().unwrap().topic.as_deref(), Some("IUL"));
    }

    #[test]
    fn test_follow_up_keeps_topic_and_adds_entities() {
        let mut memory = memory(8);
        memory.record("Tell me about IUL", "...", IntentCategory::Knowledge, false);
        memory.record(
            "how does the cash value work?",
            "...",
            IntentCategory::Knowledge,
            true,
        );

        assert_eq!(memory.current_topic(), Some("IUL"));
        assert!(memory.current_entities().contains("cash value"));
    }

    #[test]
    fn test_topic_change_drops_stale_entities() {
        let mut memory = memory(8);
        memory.record("What are IUL fees?", "...", IntentCategory::Knowledge, false);
        assert!(memory.current_entities().contains("fees"));

        memory.record("Tell me about a Roth IRA", "...", IntentCategory::Knowledge, false);
        assert_eq!(memory.current_topic(), Some("Roth IRA"));
        assert!(!memory.current_entities().contains("fees"));
    }

    #[test]
    fn test_management_and_calculator_turns_are_topic_neutral() {
        let mut memory = memory(8);
        memory.record("Tell me about whole life", "...", IntentCategory::Knowledge, false);
        memory.record("45", "Next question", IntentCategory::Calculator, false);
        memory.record(
            "what did we just talk about",
            "...",
            IntentCategory::ConversationManagement,
            false,
        );
        assert_eq!(memory.current_topic(), Some("Whole Life"));
    }

    #[test]
    fn test_casual_and_tool_turns_only_move_to_known_topics() {
        let mut memory = memory(8);
        memory.record("Tell me about IUL", "...", IntentCategory::Knowledge, false);
        memory.record("thanks, that helps", "...", IntentCategory::Fallback, false);
        memory.record("Can you analyze my portfolio?", "...", IntentCategory::ToolHandoff, false);
        assert_eq!(memory.current_topic(), Some("IUL"));
        assert_eq!(memory.last_turn().unwrap().topic.as_deref(), Some("IUL"));

        memory.record("hmm, what about annuities", "...", IntentCategory::Fallback, false);
        assert_eq!(memory.current_topic(), Some("Annuities"));
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let mut memory = memory(3);
        for i in 0..10 {
            memory.record(&format!("Question {}", i), "answer", IntentCategory::Fallback, false);
            assert!(memory.len() <= 3);
        }
        assert_eq!(memory.turn_count(), 10);
        assert_eq!(memory.turns().next().unwrap().sequence, 8);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut memory = memory(0);
        memory.record("hi", "hello", IntentCategory::Fallback, false);
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_detailed_summary_tracks_topic_changes() {
        let mut memory = memory(10);
        memory.record("Tell me about IUL", "...", IntentCategory::Knowledge, false);
        memory.record("what about the fees?", "...", IntentCategory::Knowledge, true);
        memory.record("Explain Roth IRA rules", "...", IntentCategory::Knowledge, false);

        let spans = memory.detailed_summary();
        assert_eq!(
            spans,
            vec![
                TopicSpan { topic: "IUL".into(), turn_index: 1 },
                TopicSpan { topic: "Roth IRA".into(), turn_index: 3 },
            ]
        );
    }

    #[test]
    fn test_reads_do_not_mutate() {
        let mut memory = memory(5);
        memory.record("Tell me about annuities", "...", IntentCategory::Knowledge, false);
        let before = memory.summarize();
        let _ = memory.metrics();
        let _ = memory.detailed_summary();
        assert_eq!(memory.summarize(), before);
        assert_eq!(memory.turn_count(), 1);
    }

    #[test]
    fn test_summarize_empty_memory() {
        let memory = memory(5);
        assert_eq!(memory.summarize(), "We haven't discussed anything yet.");
        assert_eq!(memory.metrics().elapsed_secs, 0);
    }

    #[test]
    fn test_clear() {
        let mut memory = memory(5);
        memory.record("Tell me about IUL", "...", IntentCategory::Knowledge, false);
        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.current_topic(), None);
        assert_eq!(memory.turn_count(), 0);
    }
}
