//! End-to-end turn scenarios against the orchestrator with fake backends.

use async_trait::async_trait;
use financial_advisor_chat::calculator::CalculatorStatus;
use financial_advisor_chat::error::OrchestrationError;
use financial_advisor_chat::generation::{GenerationOutput, GenerationPurpose, GenerationRequest, TokenUsage};
use financial_advisor_chat::memory::DomainVocabulary;
use financial_advisor_chat::{
    AdvisorConfig, Generator, InMemoryKnowledgeBase, InMemorySessionStore, IntentCategory, OfflineGenerator,
    Orchestrator, RetrievalBackend, RetrievedDocument, RouteType,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

fn build(generator: Arc<dyn Generator>, retrieval: Arc<dyn RetrievalBackend>, config: AdvisorConfig) -> Orchestrator {
    let vocabulary = Arc::new(DomainVocabulary::default());
    let store = Arc::new(InMemorySessionStore::new(config.memory_capacity, vocabulary.clone()));
    Orchestrator::new(&config, store, generator, retrieval, vocabulary)
}

fn offline() -> Orchestrator {
    build(
        Arc::new(OfflineGenerator),
        Arc::new(InMemoryKnowledgeBase::with_default_corpus()),
        AdvisorConfig::default(),
    )
}

/// Counts searches and delegates to the default corpus
struct CountingBackend {
    inner: InMemoryKnowledgeBase,
    searches: AtomicUsize,
}

#[async_trait]
impl RetrievalBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    async fn search(&self, query: &str, limit: usize) -> financial_advisor_chat::Result<Vec<RetrievedDocument>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(query, limit).await
    }
}

/// Answers only after the test opens the gate
struct GatedGenerator {
    gate: Arc<Notify>,
}

#[async_trait]
impl Generator for GatedGenerator {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, request: &GenerationRequest) -> financial_advisor_chat::Result<GenerationOutput> {
        if request.purpose == GenerationPurpose::Classification {
            return Err(OrchestrationError::generation("classification disabled"));
        }
        self.gate.notified().await;
        Ok(GenerationOutput {
            text: "Happy to help with your planning questions.".to_string(),
            confidence: 0.8,
            usage: TokenUsage::default(),
        })
    }
}

/// Never answers within any reasonable timeout
struct StalledGenerator;

#[async_trait]
impl Generator for StalledGenerator {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn generate(&self, request: &GenerationRequest) -> financial_advisor_chat::Result<GenerationOutput> {
        if request.purpose == GenerationPurpose::Classification {
            return Err(OrchestrationError::generation("classification disabled"));
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(OrchestrationError::generation("unreachable"))
    }
}

#[tokio::test]
async fn iul_follow_up_stays_on_topic() {
    let orchestrator = offline();
    let first = assert_ok!(orchestrator.process_message("Tell me about IUL", Some("iul")).await);
    assert_eq!(first.route, RouteType::Knowledge);

    let second = assert_ok!(
        orchestrator
            .process_message("how does the cash value work?", Some("iul"))
            .await
    );

    assert_eq!(second.route, RouteType::Knowledge);
    assert!(second
        .routing_trace
        .iter()
        .any(|e| e.contains("follow_up=true topic=IUL")));
    assert!(second.sources[0].starts_with("kb/iul"), "sources: {:?}", second.sources);
    assert!(second.content.starts_with("Building on our discussion of IUL"));

    let summary = assert_ok!(orchestrator.session_summary("iul").await);
    assert_eq!(summary.metrics.turn_count, 2);
    assert_eq!(summary.topics.len(), 1);
    assert_eq!(summary.topics[0].topic, "IUL");
}

#[tokio::test]
async fn casual_and_tool_turns_keep_the_topic() {
    let orchestrator = offline();
    assert_ok!(orchestrator.process_message("Tell me about IUL", Some("ack")).await);

    let thanks = assert_ok!(orchestrator.process_message("thanks, that helps", Some("ack")).await);
    assert_eq!(thanks.route, RouteType::Fallback);
    let tool = assert_ok!(orchestrator.process_message("Can you analyze my portfolio?", Some("ack")).await);
    assert_eq!(tool.route, RouteType::ToolHandoff);

    let follow_up = assert_ok!(
        orchestrator
            .process_message("how does the cash value work?", Some("ack"))
            .await
    );
    assert!(
        follow_up
            .routing_trace
            .iter()
            .any(|e| e.contains("follow_up=true topic=IUL")),
        "trace: {:?}",
        follow_up.routing_trace
    );

    let summary = assert_ok!(orchestrator.session_summary("ack").await);
    assert!(summary.summary.starts_with("We were just discussing IUL"), "summary: {}", summary.summary);
    assert_eq!(summary.topics.len(), 1);
}

#[tokio::test]
async fn calculator_rejects_invalid_answers_and_owns_the_session() {
    let orchestrator = offline();
    let started = assert_ok!(
        orchestrator
            .process_message("How much life insurance do I need?", Some("calc"))
            .await
    );
    assert_eq!(started.route, RouteType::Calculator);
    let view = started.calculator.expect("calculator view");
    assert_eq!(view.status, CalculatorStatus::Active);
    assert_eq!((view.answered, view.total), (0, 7));

    let rejected = assert_ok!(orchestrator.process_message("banana", Some("calc")).await);
    assert!(rejected.content.contains("doesn't look like a number"));
    assert!(rejected.content.contains("Question 1 of 7"));
    assert_eq!(rejected.calculator.as_ref().map(|v| v.answered), Some(0));

    // A knowledge-looking message is still an answer while the calculator runs
    let overridden = assert_ok!(orchestrator.process_message("What is an IUL?", Some("calc")).await);
    assert_eq!(overridden.route, RouteType::Calculator);
    assert_eq!(overridden.intent, IntentCategory::Calculator);

    let accepted = assert_ok!(orchestrator.process_message("45", Some("calc")).await);
    assert!(accepted.content.contains("Question 2 of 7"));
    assert_eq!(accepted.calculator.as_ref().map(|v| v.answered), Some(1));

    let cancelled = assert_ok!(orchestrator.process_message("cancel calculator", Some("calc")).await);
    assert_eq!(cancelled.route, RouteType::ConversationManagement);
    assert!(cancelled.calculator.is_none());
}

#[tokio::test]
async fn management_queries_never_reach_retrieval() {
    let backend = Arc::new(CountingBackend {
        inner: InMemoryKnowledgeBase::with_default_corpus(),
        searches: AtomicUsize::new(0),
    });
    let orchestrator = build(Arc::new(OfflineGenerator), backend.clone(), AdvisorConfig::default());

    assert_ok!(orchestrator.process_message("What is an annuity?", Some("m")).await);
    let searches = backend.searches.load(Ordering::SeqCst);
    assert_eq!(searches, 1);

    let recall = assert_ok!(orchestrator.process_message("What did we just talk about?", Some("m")).await);
    assert_eq!(recall.route, RouteType::ConversationManagement);
    assert!(recall.content.contains("Annuities"), "content: {}", recall.content);
    assert_eq!(backend.searches.load(Ordering::SeqCst), searches);
}

#[tokio::test]
async fn generation_timeout_falls_back_and_is_recorded() {
    let config = AdvisorConfig {
        generation_timeout: Duration::from_millis(50),
        retry_backoff: Duration::from_millis(1),
        ..AdvisorConfig::default()
    };
    let orchestrator = build(
        Arc::new(StalledGenerator),
        Arc::new(InMemoryKnowledgeBase::with_default_corpus()),
        config,
    );

    let response = assert_ok!(orchestrator.process_message("What is an IUL?", Some("slow")).await);
    assert!(response.degraded);
    assert_eq!(response.quality_score, 0.0);
    assert!(response.content.contains("IUL"));

    let summary = assert_ok!(orchestrator.session_summary("slow").await);
    assert_eq!(summary.metrics.turn_count, 1);
}

#[tokio::test]
async fn sessions_progress_independently() {
    let gate = Arc::new(Notify::new());
    let config = AdvisorConfig {
        generation_timeout: Duration::from_secs(5),
        ..AdvisorConfig::default()
    };
    let orchestrator = build(
        Arc::new(GatedGenerator { gate: gate.clone() }),
        Arc::new(InMemoryKnowledgeBase::with_default_corpus()),
        config,
    );

    let blocked = orchestrator.process_message("hello there", Some("a"));
    let other = async {
        let response = orchestrator.process_message("what did we talk about", Some("b")).await;
        gate.notify_one();
        response
    };

    let (a, b) = tokio::time::timeout(Duration::from_secs(2), async { tokio::join!(blocked, other) })
        .await
        .expect("session b must not wait for session a");

    assert_eq!(assert_ok!(b).route, RouteType::ConversationManagement);
    assert_eq!(assert_ok!(a).route, RouteType::Fallback);
}

#[tokio::test]
async fn turns_on_one_session_are_serialized() {
    let orchestrator = offline();
    let (first, second) = tokio::join!(
        orchestrator.process_message("What is an IUL?", Some("serial")),
        orchestrator.process_message("What are the costs of IUL?", Some("serial")),
    );

    let mut turns = vec![assert_ok!(first).turn, assert_ok!(second).turn];
    turns.sort();
    assert_eq!(turns, vec![1, 2]);
    assert_eq!(orchestrator.audit_log().list_for_session("serial").await.len(), 2);
}

#[tokio::test]
async fn turn_queued_behind_reset_lands_in_a_fresh_session() {
    let gate = Arc::new(Notify::new());
    let config = AdvisorConfig {
        generation_timeout: Duration::from_secs(5),
        ..AdvisorConfig::default()
    };
    let orchestrator = build(
        Arc::new(GatedGenerator { gate: gate.clone() }),
        Arc::new(InMemoryKnowledgeBase::with_default_corpus()),
        config,
    );

    // Polled in order: the first turn holds the session, the reset queues
    // behind it, then the second turn queues behind the reset
    let (first, reset, second, _) = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(
            orchestrator.process_message("hello there", Some("s1")),
            orchestrator.reset_session("s1"),
            orchestrator.process_message("what did we talk about", Some("s1")),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                gate.notify_one();
            },
        )
    })
    .await
    .expect("queued turns must drain");

    assert_eq!(assert_ok!(first).turn, 1);
    assert_ok!(reset);
    let second = assert_ok!(second);
    assert_eq!(second.turn, 1);

    let summary = assert_ok!(orchestrator.session_summary("s1").await);
    assert_eq!(summary.metrics.turn_count, 1);
    assert_eq!(orchestrator.audit_log().list_for_session("s1").await.len(), 2);
}

#[tokio::test]
async fn disconnect_abandons_turn_without_recording() {
    let config = AdvisorConfig {
        generation_timeout: Duration::from_secs(10),
        ..AdvisorConfig::default()
    };
    let orchestrator = build(
        Arc::new(StalledGenerator),
        Arc::new(InMemoryKnowledgeBase::with_default_corpus()),
        config,
    );
    assert_ok!(orchestrator.process_message("start over", Some("gone")).await);

    let err = assert_err!(
        orchestrator
            .process_message_until(
                "What is an IUL?",
                Some("gone"),
                None,
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await
    );
    assert_eq!(err.code(), "CANCELLED");

    let summary = assert_ok!(orchestrator.session_summary("gone").await);
    assert_eq!(summary.metrics.turn_count, 0);
    assert_eq!(orchestrator.audit_log().list_for_session("gone").await.len(), 1);
}

#[tokio::test]
async fn file_context_replaces_retrieval() {
    let backend = Arc::new(CountingBackend {
        inner: InMemoryKnowledgeBase::with_default_corpus(),
        searches: AtomicUsize::new(0),
    });
    let orchestrator = build(Arc::new(OfflineGenerator), backend.clone(), AdvisorConfig::default());

    let file = financial_advisor_chat::FileContext {
        file_name: "illustration.csv".to_string(),
        summary: "IUL illustration showing annual premium of 12000 and a 10 percent cap.".to_string(),
        figures: Default::default(),
    };
    let response = assert_ok!(
        orchestrator
            .process_message_with_context("What does my file say about the IUL costs?", Some("f"), Some(file))
            .await
    );

    assert_eq!(response.route, RouteType::Knowledge);
    assert_eq!(response.sources, vec!["file:illustration.csv".to_string()]);
    assert_eq!(backend.searches.load(Ordering::SeqCst), 0);
}
