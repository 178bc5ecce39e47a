//! Financial Advisor Chat
//!
//! Conversational layer for a financial-advisory assistant that:
//! - Keeps bounded per-session memory (turns, current topic, entities)
//! - Classifies every message into a closed set of intents
//! - Rewrites follow-up questions with their conversational context
//! - Answers knowledge questions from context-aware retrieval (RAG)
//! - Runs guided calculators as an explicit state machine
//! - Appends deterministic compliance disclaimers and audits every turn
//!
//! TURN LOOP:
//! INPUT → CLASSIFY → ROUTE → EXECUTE → COMPLY → COMMIT → AUDIT

pub mod agent;
pub mod api;
pub mod audit;
pub mod calculator;
pub mod classifier;
pub mod compliance;
pub mod config;
pub mod context;
pub mod error;
pub mod gemini;
pub mod generation;
pub mod memory;
pub mod models;
pub mod rag;
pub mod retrieval;
pub mod router;
pub mod state;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::{Orchestrator, SessionSummary};
pub use config::AdvisorConfig;
pub use generation::{Generator, OfflineGenerator};
pub use retrieval::{InMemoryKnowledgeBase, RetrievalBackend};
pub use state::{InMemorySessionStore, MemoryStore};
