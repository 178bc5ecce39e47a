//! Context-Aware Retriever
//!
//! The retrieval backend returns a raw candidate pool; this module re-scores
//! it against the enhanced query and the ongoing conversation, drops anything
//! under the relevance threshold and caps the result.
//!
//! score = similarity + topic bonus (tag names the turn's topic)
//!       + entity bonus per overlapping recent entity (at most two)

use crate::config::AdvisorConfig;
use crate::context::EnhancedQuery;
use crate::error::OrchestrationError;
use crate::generation::{with_single_retry, CallPolicy};
use crate::memory::vocabulary::normalize;
use crate::memory::{ConversationMemory, DomainVocabulary};
use crate::models::RetrievedDocument;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub mod knowledge_base;
pub use knowledge_base::InMemoryKnowledgeBase;

const MAX_ENTITY_MATCHES: usize = 2;

/// Search backend producing the candidate pool
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedDocument>>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub max_results: usize,
    pub pool_size: usize,
    pub relevance_threshold: f32,
    pub topic_bonus: f32,
    pub entity_bonus: f32,
}

impl RetrievalSettings {
    pub fn from_config(config: &AdvisorConfig) -> Self {
        Self {
            max_results: config.retrieval_max_results,
            pool_size: config.retrieval_pool_size.max(config.retrieval_max_results),
            relevance_threshold: config.relevance_threshold,
            topic_bonus: config.topic_bonus,
            entity_bonus: config.entity_bonus,
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&AdvisorConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub document: RetrievedDocument,
    pub similarity: f32,
    pub score: f32,
}

fn retrieval_timeout(ms: u64) -> OrchestrationError {
    OrchestrationError::RetrievalError {
        message: format!("retrieval timed out after {} ms", ms),
        retryable: false,
    }
}

/// Fraction of the query's content terms found in the document text or tags
pub fn lexical_similarity(vocabulary: &DomainVocabulary, query: &str, document: &RetrievedDocument) -> f32 {
    let mut terms: Vec<String> = vocabulary.content_terms(query);
    let mut seen = BTreeSet::new();
    terms.retain(|t| seen.insert(t.clone()));
    if terms.is_empty() {
        return 0.0;
    }

    let haystack = format!(" {} {} ", normalize(&document.text), normalize(&document.tags.join(" ")));
    let hits = terms
        .iter()
        .filter(|t| haystack.contains(&format!(" {} ", t)))
        .count();
    hits as f32 / terms.len() as f32
}

pub struct ContextAwareRetriever {
    backend: Arc<dyn RetrievalBackend>,
    settings: RetrievalSettings,
    policy: CallPolicy,
}

impl ContextAwareRetriever {
    pub fn new(backend: Arc<dyn RetrievalBackend>, settings: RetrievalSettings, policy: CallPolicy) -> Self {
        Self {
            backend,
            settings,
            policy,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Fetch the candidate pool (one retry on transient failure) and rank it
    pub async fn retrieve(&self, query: &EnhancedQuery, memory: &ConversationMemory) -> Result<Vec<ScoredDocument>> {
        let backend = self.backend.as_ref();
        let pool_size = self.settings.pool_size;
        let candidates = with_single_retry(self.policy, backend.name(), retrieval_timeout, || {
            backend.search(&query.search_text, pool_size)
        })
        .await?;

        let ranked = self.rank(query, memory, candidates);
        info!(
            backend = backend.name(),
            follow_up = query.is_follow_up,
            returned = ranked.len(),
            "Retrieval complete"
        );
        Ok(ranked)
    }

    /// Score, filter and order a candidate pool. Pure and deterministic.
    pub fn rank(
        &self,
        query: &EnhancedQuery,
        memory: &ConversationMemory,
        candidates: Vec<RetrievedDocument>,
    ) -> Vec<ScoredDocument> {
        let vocabulary = memory.vocabulary();
        let entities: Vec<&String> = if query.is_follow_up {
            memory.current_entities().iter().collect()
        } else {
            Vec::new()
        };

        let mut scored: Vec<(usize, ScoredDocument)> = candidates
            .into_iter()
            .enumerate()
            .map(|(index, document)| {
                let lexical = lexical_similarity(vocabulary, &query.search_text, &document);
                let similarity = match document.similarity {
                    Some(backend_score) => (lexical + backend_score.clamp(0.0, 1.0)) / 2.0,
                    None => lexical,
                };

                let mut score = similarity;
                if similarity > 0.0 {
                    if let Some(topic) = &query.topic {
                        if document.tags.iter().any(|tag| vocabulary.tag_matches_topic(tag, topic)) {
                            score += self.settings.topic_bonus;
                        }
                    }
                    let text = format!(" {} {} ", normalize(&document.text), normalize(&document.tags.join(" ")));
                    let entity_hits = entities
                        .iter()
                        .filter(|e| text.contains(&format!(" {} ", normalize(e))))
                        .count()
                        .min(MAX_ENTITY_MATCHES);
                    score += entity_hits as f32 * self.settings.entity_bonus;
                }

                (index, ScoredDocument { document, similarity, score })
            })
            .filter(|(_, doc)| {
                let keep = doc.score >= self.settings.relevance_threshold;
                if !keep {
                    debug!(id = %doc.document.id, score = doc.score, "Dropped below relevance threshold");
                }
                keep
            })
            .collect();

        scored.sort_by(|(ia, a), (ib, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal))
                .then_with(|| match (a.document.published_at, b.document.published_at) {
                    (Some(x), Some(y)) => y.cmp(&x),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                })
                .then_with(|| ia.cmp(ib))
        });

        scored
            .into_iter()
            .take(self.settings.max_results)
            .map(|(_, doc)| doc)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextAnalyzer;
    use crate::models::IntentCategory;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
    use std::time::Duration;

    fn memory() -> ConversationMemory {
        ConversationMemory::new(10, Arc::new(DomainVocabulary::default()))
    }

    fn retriever(backend: Arc<dyn RetrievalBackend>) -> ContextAwareRetriever {
        ContextAwareRetriever::new(
            backend,
            RetrievalSettings::default(),
            CallPolicy::new(Duration::from_millis(200), Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_prefers_topic_tagged_documents_on_follow_up() {
        let mut mem = memory();
        mem.record("Tell me about IUL", "answer", IntentCategory::Knowledge, false);
        let query = ContextAnalyzer::enhance("how does the cash value work?", &mem);

        let kb = Arc::new(InMemoryKnowledgeBase::with_default_corpus());
        let results = retriever(kb).retrieve(&query, &mem).await.unwrap();

        assert!(!results.is_empty());
        let top = &results[0].document;
        assert!(top.tags.iter().any(|t| t == "IUL"), "top doc was {}", top.id);
        assert!(top.text.to_lowercase().contains("cash value"));

        let generic = results
            .iter()
            .position(|d| d.document.id == "kb-cash-value-basics")
            .expect("generic cash value doc retrieved");
        assert!(generic > 0);
    }

    #[test]
    fn test_below_threshold_dropped_even_under_cap() {
        let query = EnhancedQuery::passthrough("annuity surrender charges", None);
        let candidates = vec![
            RetrievedDocument::new("a", "Annuity surrender charges apply in early years.", "kb"),
            RetrievedDocument::new("b", "Term life is pure protection.", "kb"),
        ];

        let results = retriever(Arc::new(InMemoryKnowledgeBase::new(Vec::new()))).rank(&query, &memory(), candidates);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "a");
    }

    #[test]
    fn test_ties_break_by_recency_then_insertion() {
        let query = EnhancedQuery::passthrough("policy loans", None);
        let mut older = RetrievedDocument::new("older", "Policy loans explained.", "kb");
        older.published_at = Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
        let mut newer = RetrievedDocument::new("newer", "Policy loans in detail.", "kb");
        newer.published_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let undated_a = RetrievedDocument::new("undated-a", "Policy loans basics.", "kb");
        let undated_b = RetrievedDocument::new("undated-b", "Policy loans overview.", "kb");

        let results = retriever(Arc::new(InMemoryKnowledgeBase::new(Vec::new()))).rank(
            &query,
            &memory(),
            vec![undated_a, older, undated_b, newer],
        );
        let ids: Vec<&str> = results.iter().map(|d| d.document.id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older", "undated-a", "undated-b"]);
    }

    #[test]
    fn test_result_capped() {
        let query = EnhancedQuery::passthrough("premium", None);
        let candidates: Vec<RetrievedDocument> = (0..10)
            .map(|i| RetrievedDocument::new(format!("d{}", i), "Premium details.", "kb"))
            .collect();
        let results = retriever(Arc::new(InMemoryKnowledgeBase::new(Vec::new()))).rank(&query, &memory(), candidates);
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].document.id, "d0");
    }

    struct FlakyBackend {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RetrievalBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<RetrievedDocument>> {
            if self.calls.fetch_add(1, AtomicOrdering::SeqCst) == 0 {
                return Err(OrchestrationError::RetrievalError {
                    message: "connection reset".into(),
                    retryable: true,
                });
            }
            Ok(vec![RetrievedDocument::new("r", "Roth IRA withdrawals are tax free.", "kb")])
        }
    }

    #[tokio::test]
    async fn test_transient_backend_failure_retried_once() {
        let backend = Arc::new(FlakyBackend { calls: AtomicU32::new(0) });
        let query = EnhancedQuery::passthrough("roth ira withdrawals", None);
        let results = retriever(backend.clone()).retrieve(&query, &memory()).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(backend.calls.load(AtomicOrdering::SeqCst), 2);
    }
}
