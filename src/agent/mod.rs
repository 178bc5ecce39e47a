//! Orchestrator
//!
//! Drives one turn end to end:
//! LOAD SESSION → CLASSIFY → ROUTE → EXECUTE → COMPLY → COMMIT → AUDIT → RESPOND
//!
//! Everything before COMMIT works on a snapshot of the session. The session
//! is written exactly once per turn, after the response content is final, so
//! an abandoned turn leaves memory and calculator untouched.

use crate::audit::{compute_response_hash, TurnAuditLog, TurnRecord};
use crate::calculator::CalculatorView;
use crate::classifier::IntentClassifier;
use crate::compliance::{create_default_compliance_engine, ComplianceEngine};
use crate::config::AdvisorConfig;
use crate::error::OrchestrationError;
use crate::generation::{CallPolicy, Generator};
use crate::memory::{DomainVocabulary, MemoryMetrics, TopicSpan};
use crate::models::{ChatResponse, FileContext};
use crate::retrieval::{ContextAwareRetriever, RetrievalBackend, RetrievalSettings};
use crate::router::{MemoryEffect, SmartRouter, TurnContext};
use crate::state::{MemoryStore, SessionHandle, TurnGuard};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_SESSION_ATTEMPTS: usize = 3;

/// Read-only view of a session for the transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub summary: String,
    pub topics: Vec<TopicSpan>,
    pub metrics: MemoryMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculator: Option<CalculatorView>,
}

/// Main orchestrator that coordinates every turn
pub struct Orchestrator {
    store: Arc<dyn MemoryStore>,
    classifier: IntentClassifier,
    router: SmartRouter,
    compliance: ComplianceEngine,
    audit_log: Arc<TurnAuditLog>,
}

impl Orchestrator {
    pub fn new(
        config: &AdvisorConfig,
        store: Arc<dyn MemoryStore>,
        generator: Arc<dyn Generator>,
        retrieval: Arc<dyn RetrievalBackend>,
        vocabulary: Arc<DomainVocabulary>,
    ) -> Self {
        let policy = CallPolicy::new(config.generation_timeout, config.retry_backoff);
        let retriever = ContextAwareRetriever::new(retrieval, RetrievalSettings::from_config(config), policy);
        let router = SmartRouter::new(retriever, generator.clone(), policy, config.min_route_confidence);

        info!(
            generator = generator.name(),
            timeout_ms = config.generation_timeout.as_millis() as u64,
            "Orchestrator initialized"
        );

        Self {
            store,
            classifier: IntentClassifier::new(generator, policy, vocabulary),
            router,
            compliance: create_default_compliance_engine(),
            audit_log: Arc::new(TurnAuditLog::new()),
        }
    }

    pub fn audit_log(&self) -> Arc<TurnAuditLog> {
        self.audit_log.clone()
    }

    pub fn store(&self) -> Arc<dyn MemoryStore> {
        self.store.clone()
    }

    pub async fn process_message(&self, message: &str, session_id: Option<&str>) -> Result<ChatResponse> {
        self.process_message_with_context(message, session_id, None).await
    }

    /// Like `process_message`, abandoning the turn if `disconnected` resolves first.
    /// An abandoned turn is never recorded.
    pub async fn process_message_until<D>(
        &self,
        message: &str,
        session_id: Option<&str>,
        file: Option<FileContext>,
        disconnected: D,
    ) -> Result<ChatResponse>
    where
        D: Future<Output = ()>,
    {
        tokio::select! {
            result = self.process_message_with_context(message, session_id, file) => result,
            _ = disconnected => {
                warn!(session_id = ?session_id, "Client disconnected, turn abandoned");
                Err(OrchestrationError::Cancelled(
                    session_id.unwrap_or("new session").to_string(),
                ))
            }
        }
    }

    /// Run one turn. Turns for the same session are serialized.
    pub async fn process_message_with_context(
        &self,
        message: &str,
        session_id: Option<&str>,
        file: Option<FileContext>,
    ) -> Result<ChatResponse> {
        let start_time = Instant::now();
        let mut routing_trace = Vec::new();

        let (handle, turn_guard) = self.acquire_session(session_id).await?;
        let session_id = handle.id().to_string();
        let snapshot = handle.snapshot().await;

        info!(
            session_id = %session_id,
            turn = snapshot.memory.turn_count() + 1,
            has_file = file.is_some(),
            "Orchestrator: processing message"
        );
        routing_trace.push(format!(
            "INPUT: turn {} (topic: {})",
            snapshot.memory.turn_count() + 1,
            snapshot.memory.current_topic().unwrap_or("none")
        ));

        // === CLASSIFY ===
        let intent = self
            .classifier
            .classify(message, &snapshot.memory, &snapshot.calculator)
            .await;
        routing_trace.push(format!(
            "CLASSIFY: {} ({:.2}) {}",
            intent.intent, intent.confidence, intent.reasoning
        ));

        // === ROUTE + EXECUTE ===
        let decision = self.router.route(&intent, &snapshot.calculator);
        let ctx = TurnContext {
            session_id: &session_id,
            message,
            memory: &snapshot.memory,
            calculator: &snapshot.calculator,
            file: file.as_ref(),
        };
        let outcome = self.router.execute(&decision, &intent, &ctx).await;

        let mut entries = outcome.trace.iter();
        if let Some(route_entry) = entries.next() {
            routing_trace.push(route_entry.clone());
        }
        routing_trace.extend(entries.map(|entry| format!("EXECUTE: {}", entry)));

        // === COMPLY ===
        let compliance = self.compliance.apply(message, &outcome.content);
        if !compliance.triggered_rules.is_empty() {
            routing_trace.push(format!("COMPLY: {}", compliance.triggered_rules.join(", ")));
        }

        // === COMMIT + AUDIT ===
        let sequence = snapshot.memory.turn_count() + 1;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        routing_trace.push(format!("COMPLETE: {} ms", elapsed_ms));
        let record = TurnRecord {
            audit_id: Uuid::new_v4(),
            session_id: session_id.clone(),
            sequence,
            intent: intent.intent,
            route: outcome.route,
            confidence: outcome.confidence,
            routing_trace: routing_trace.clone(),
            response_hash: compute_response_hash(&session_id, sequence, &outcome.content),
            elapsed_ms,
            recorded_at: Utc::now(),
        };

        // Runs detached so a disconnect cannot split the state write from its audit entry
        let audit_log = self.audit_log.clone();
        let calculator = outcome.calculator.clone();
        let memory_effect = outcome.memory_effect;
        let user_message = message.to_string();
        let response_text = outcome.content.clone();
        let category = intent.intent;
        let (turn, audit_id) = tokio::spawn(async move {
            let turn = handle
                .commit(|state| {
                    state.calculator = calculator;
                    match memory_effect {
                        MemoryEffect::Clear => state.memory.clear(),
                        MemoryEffect::Record { follow_up } => {
                            state.memory.record(&user_message, &response_text, category, follow_up);
                        }
                    }
                    state.memory.turn_count()
                })
                .await;
            let audit_id = audit_log.record(record).await;
            drop(turn_guard);
            (turn, audit_id)
        })
        .await
        .map_err(|e| OrchestrationError::Internal(format!("turn commit task failed: {}", e)))?;

        info!(
            session_id = %session_id,
            audit_id = %audit_id,
            intent = %intent.intent,
            route = %outcome.route,
            confidence = outcome.confidence,
            degraded = outcome.degraded,
            elapsed_ms,
            "Orchestrator: turn complete"
        );
        debug!(trace = ?routing_trace, "Routing trace");

        Ok(ChatResponse {
            session_id,
            calculator: outcome.calculator_view(),
            content: outcome.content,
            intent: intent.intent,
            route: outcome.route,
            confidence: outcome.confidence,
            quality_score: outcome.quality_score,
            routing_trace,
            disclaimers: compliance.disclaimers,
            sources: outcome.sources,
            tool_handoff: outcome.tool_handoff,
            degraded: outcome.degraded,
            missing_data: outcome.missing_data,
            turn,
        })
    }

    pub async fn session_summary(&self, session_id: &str) -> Result<SessionSummary> {
        let handle = self.store.get(session_id).await?;
        let state = handle.snapshot().await;

        Ok(SessionSummary {
            session_id: session_id.to_string(),
            summary: state.memory.summarize(),
            topics: state.memory.detailed_summary(),
            metrics: state.memory.metrics(),
            calculator: state.calculator.view(),
        })
    }

    /// Destroy a session. Waits for any in-flight turn on it to finish.
    pub async fn reset_session(&self, session_id: &str) -> Result<()> {
        let handle = self.store.get(session_id).await?;
        let turn = handle.begin_turn().await;
        if !self.store.remove(&handle, &turn).await {
            return Err(OrchestrationError::SessionNotFound(session_id.to_string()));
        }
        info!(session_id = %session_id, "Session reset");
        Ok(())
    }

    /// Registered session plus its turn lock. A handle closed while we
    /// waited for the lock is stale, so the lookup starts again.
    async fn acquire_session(&self, session_id: Option<&str>) -> Result<(Arc<SessionHandle>, TurnGuard)> {
        for _ in 0..MAX_SESSION_ATTEMPTS {
            let handle = self.store.load_or_create(session_id).await?;
            let turn = handle.begin_turn().await;
            if !handle.is_closed() {
                return Ok((handle, turn));
            }
            debug!(session_id = %handle.id(), "Session closed while waiting for its turn, reloading");
        }
        Err(OrchestrationError::SessionNotFound(
            session_id.unwrap_or("new session").to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{GenerationOutput, GenerationPurpose, GenerationRequest, OfflineGenerator, TokenUsage};
    use crate::models::{IntentCategory, RouteType};
    use crate::retrieval::InMemoryKnowledgeBase;
    use crate::state::InMemorySessionStore;
    use async_trait::async_trait;
    use std::time::Duration;

    fn orchestrator_with(generator: Arc<dyn Generator>, config: AdvisorConfig) -> Orchestrator {
        let vocabulary = Arc::new(DomainVocabulary::default());
        let store = Arc::new(InMemorySessionStore::new(config.memory_capacity, vocabulary.clone()));
        Orchestrator::new(
            &config,
            store,
            generator,
            Arc::new(InMemoryKnowledgeBase::with_default_corpus()),
            vocabulary,
        )
    }

    fn orchestrator() -> Orchestrator {
        orchestrator_with(Arc::new(OfflineGenerator), AdvisorConfig::default())
    }

    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
            if request.purpose == GenerationPurpose::Classification {
                return Err(OrchestrationError::generation("no classifier"));
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(GenerationOutput {
                text: "too late".to_string(),
                confidence: 0.9,
                usage: TokenUsage::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_turn_is_recorded_and_audited() {
        let orchestrator = orchestrator();
        let response = orchestrator
            .process_message("What is an IUL?", Some("s1"))
            .await
            .unwrap();

        assert_eq!(response.route, RouteType::Knowledge);
        assert_eq!(response.turn, 1);
        assert!(!response.disclaimers.is_empty());
        assert!(response.routing_trace[0].starts_with("INPUT:"));
        assert!(response.routing_trace.iter().any(|e| e.starts_with("ROUTE: knowledge")));

        let records = orchestrator.audit_log().list_for_session("s1").await;
        assert_eq!(records.len(), 1);
        assert!(
            orchestrator
                .audit_log()
                .verify_integrity(records[0].audit_id, &response.content)
                .await
        );

        let summary = orchestrator.session_summary("s1").await.unwrap();
        assert_eq!(summary.metrics.turn_count, 1);
    }

    #[tokio::test]
    async fn test_new_session_gets_an_id() {
        let orchestrator = orchestrator();
        let response = orchestrator.process_message("hello", None).await.unwrap();
        assert!(Uuid::parse_str(&response.session_id).is_ok());
        assert_eq!(orchestrator.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_management_reset_clears_without_recording() {
        let orchestrator = orchestrator();
        orchestrator.process_message("Tell me about IUL", Some("s1")).await.unwrap();
        let response = orchestrator.process_message("start over", Some("s1")).await.unwrap();

        assert_eq!(response.intent, IntentCategory::ConversationManagement);
        assert_eq!(response.turn, 0);
        let summary = orchestrator.session_summary("s1").await.unwrap();
        assert_eq!(summary.metrics.turn_count, 0);
        assert!(summary.topics.is_empty());
    }

    #[tokio::test]
    async fn test_generation_timeout_degrades_and_still_records() {
        let config = AdvisorConfig {
            generation_timeout: Duration::from_millis(30),
            retry_backoff: Duration::from_millis(1),
            ..AdvisorConfig::default()
        };
        let orchestrator = orchestrator_with(Arc::new(SlowGenerator), config);

        let response = orchestrator.process_message("What is an IUL?", Some("s1")).await.unwrap();
        assert!(response.degraded);
        assert_eq!(response.quality_score, 0.0);
        assert_eq!(response.turn, 1);
    }

    #[tokio::test]
    async fn test_disconnect_skips_memory_write() {
        let config = AdvisorConfig {
            generation_timeout: Duration::from_secs(10),
            ..AdvisorConfig::default()
        };
        let orchestrator = orchestrator_with(Arc::new(SlowGenerator), config);
        orchestrator
            .process_message("what did we talk about", Some("s1"))
            .await
            .unwrap();
        let before = orchestrator.session_summary("s1").await.unwrap().metrics.turn_count;

        let err = orchestrator
            .process_message_until(
                "What is an IUL?",
                Some("s1"),
                None,
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CANCELLED");
        let after = orchestrator.session_summary("s1").await.unwrap().metrics.turn_count;
        assert_eq!(before, after);
    }

    async fn after_yields(n: usize) {
        for _ in 0..n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_audit_matches_committed_turns_under_disconnects() {
        let orchestrator = orchestrator();
        for yields in 0..24 {
            let _ = orchestrator
                .process_message_until("What is an IUL?", Some("s1"), None, after_yields(yields))
                .await;
        }
        // Waits for any detached commit still holding the session
        orchestrator.process_message("what did we talk about", Some("s1")).await.unwrap();

        let turns = orchestrator.session_summary("s1").await.unwrap().metrics.turn_count;
        let mut sequences: Vec<u64> = orchestrator
            .audit_log()
            .list_for_session("s1")
            .await
            .iter()
            .map(|r| r.sequence)
            .collect();
        sequences.sort();
        assert_eq!(sequences, (1..=turns).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_reset_session_and_unknown_summary() {
        let orchestrator = orchestrator();
        orchestrator.process_message("hello", Some("s1")).await.unwrap();
        orchestrator.reset_session("s1").await.unwrap();

        let err = orchestrator.session_summary("s1").await.unwrap_err();
        assert_eq!(err.code(), "SESSION_NOT_FOUND");
        assert!(orchestrator.reset_session("s1").await.is_err());
    }
}
