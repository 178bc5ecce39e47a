//! Conversation Memory System
//!
//! Bounded turn history, the derived topic/entity state, the domain
//! vocabulary it is computed from, and deterministic summaries over it.

pub mod store;
pub mod summarizer;
pub mod vocabulary;

pub use store::{ConversationMemory, MemoryMetrics, TopicSpan, Turn};
pub use summarizer::ConversationSummarizer;
pub use vocabulary::{DomainVocabulary, RelatedConcept, RelationKind};
