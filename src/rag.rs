//! Knowledge Response Generator (RAG)
//!
//! One generation request per knowledge turn: conversation preamble,
//! retrieved passages verbatim with their sources, then the enhanced query.
//! The quality score is computed locally from the answer and the passages.

use crate::context::EnhancedQuery;
use crate::generation::{call_with_policy, CallPolicy, GenerationPurpose, GenerationRequest, Generator};
use crate::memory::vocabulary::normalize;
use crate::memory::{ConversationMemory, DomainVocabulary};
use crate::models::RetrievedDocument;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

const CONTEXT_TURNS: usize = 3;

/// Prefix of the context line that marks a follow-up question
pub const FOLLOW_UP_MARKER: &str = "Follow-up: continuing ";

const ANSWER_INSTRUCTION: &str = "You are a careful financial-education assistant. \
Answer using only the numbered passages provided. If the passages do not contain enough \
information, say so plainly instead of guessing. When the context marks the question as a \
follow-up, open by referring back to the earlier topic (for example \"Building on our discussion of X...\"). \
Do not give personalised investment, tax or legal advice.";

const CONTRADICTION_MARKERS: &[&str] = &[
    "i don't know",
    "i do not know",
    "as an ai",
    "i cannot answer",
    "i can't answer",
    "contradicts",
    "that is incorrect",
    "actually, no",
];

const MIN_SANE_WORDS: usize = 8;
const MAX_SANE_WORDS: usize = 400;

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeAnswer {
    pub text: String,
    pub quality_score: f32,
    pub confidence: f32,
    pub sources: Vec<String>,
    /// No supporting passages, or the answer is the deterministic fallback
    pub missing_data: bool,
    pub degraded: bool,
}

pub struct KnowledgeResponder {
    generator: Arc<dyn Generator>,
    policy: CallPolicy,
}

impl KnowledgeResponder {
    pub fn new(generator: Arc<dyn Generator>, policy: CallPolicy) -> Self {
        Self { generator, policy }
    }

    pub fn build_request(
        query: &EnhancedQuery,
        documents: &[RetrievedDocument],
        memory: &ConversationMemory,
    ) -> GenerationRequest {
        let mut context = String::from("CONVERSATION CONTEXT:\n");
        context.push_str(&memory.condensed_context(CONTEXT_TURNS));
        if query.is_follow_up {
            if let Some(topic) = &query.topic {
                context.push_str(FOLLOW_UP_MARKER);
                context.push_str(topic);
                if let Some(rel) = &query.related {
                    context.push_str(&format!(" (related concept: {}, {})", rel.concept, rel.relation));
                }
                context.push('\n');
            }
        }

        context.push_str("\nPASSAGES:\n");
        if documents.is_empty() {
            context.push_str("(none)\n");
        }
        for (i, doc) in documents.iter().enumerate() {
            let text = doc.text.lines().map(str::trim).collect::<Vec<_>>().join("; ");
            context.push_str(&format!("[{}] (source: {}) {}\n", i + 1, doc.source, text));
        }

        GenerationRequest::new(GenerationPurpose::KnowledgeAnswer, ANSWER_INSTRUCTION)
            .with_context(context)
            .with_query(&query.text)
    }

    /// Answer a knowledge question. Backend failures become the fallback answer.
    pub async fn answer(
        &self,
        query: &EnhancedQuery,
        documents: &[RetrievedDocument],
        memory: &ConversationMemory,
    ) -> KnowledgeAnswer {
        let request = Self::build_request(query, documents, memory);
        let sources = Self::sources(documents);

        match call_with_policy(self.generator.as_ref(), &request, self.policy).await {
            Ok(output) => {
                let quality = quality_score(&output.text, documents, memory.vocabulary());
                info!(
                    generator = self.generator.name(),
                    passages = documents.len(),
                    quality,
                    "Knowledge answer generated"
                );
                KnowledgeAnswer {
                    confidence: (output.confidence * (0.5 + 0.5 * quality)).clamp(0.0, 1.0),
                    text: output.text,
                    quality_score: quality,
                    sources,
                    missing_data: documents.is_empty(),
                    degraded: false,
                }
            }
            Err(e) => {
                warn!(error = %e, code = e.code(), "Generation failed, using fallback answer");
                Self::fallback(query, sources)
            }
        }
    }

    /// Deterministic apology used when the generation backend is unavailable
    pub fn fallback(query: &EnhancedQuery, sources: Vec<String>) -> KnowledgeAnswer {
        let subject = query.topic.as_deref().unwrap_or("that");
        KnowledgeAnswer {
            text: format!(
                "I'm sorry, I wasn't able to put together a reliable answer about {} right now. \
                 Please try again in a moment.",
                subject
            ),
            quality_score: 0.0,
            confidence: 0.0,
            sources,
            missing_data: true,
            degraded: true,
        }
    }

    fn sources(documents: &[RetrievedDocument]) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for doc in documents {
            if !sources.contains(&doc.source) {
                sources.push(doc.source.clone());
            }
        }
        sources
    }
}

/// Deterministic answer quality in [0, 1]:
/// 0.5 key-term coverage + 0.3 length sanity + 0.2 absence of contradiction markers
pub fn quality_score(answer: &str, documents: &[RetrievedDocument], vocabulary: &DomainVocabulary) -> f32 {
    let normalized = format!(" {} ", normalize(answer));

    let mut key_terms: Vec<String> = Vec::new();
    for doc in documents {
        let candidates = doc
            .tags
            .iter()
            .map(|t| t.as_str())
            .chain(vocabulary.find_concepts(&doc.text));
        for term in candidates {
            let term = normalize(term);
            if !term.is_empty() && !key_terms.contains(&term) {
                key_terms.push(term);
            }
        }
    }
    let answer_concepts: Vec<String> = vocabulary
        .find_concepts(answer)
        .into_iter()
        .map(normalize)
        .collect();
    let coverage = if key_terms.is_empty() {
        0.0
    } else {
        let hits = key_terms
            .iter()
            .filter(|t| normalized.contains(&format!(" {} ", t)) || answer_concepts.contains(t))
            .count();
        hits as f32 / key_terms.len() as f32
    };

    let words = answer.split_whitespace().count();
    let length = if words < MIN_SANE_WORDS {
        0.3
    } else if words > MAX_SANE_WORDS {
        0.6
    } else {
        1.0
    };

    let lowered = answer.to_lowercase();
    let consistent = if CONTRADICTION_MARKERS.iter().any(|m| lowered.contains(m)) {
        0.0
    } else {
        1.0
    };

    let score = 0.5 * coverage + 0.3 * length + 0.2 * consistent;
    (score * 1000.0).round() / 1000.0
}
