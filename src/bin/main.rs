use financial_advisor_chat::{
    agent::Orchestrator,
    config::AdvisorConfig,
    generation::OfflineGenerator,
    retrieval::InMemoryKnowledgeBase,
    state::InMemorySessionStore,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SCRIPT: &[&str] = &[
    "What is an IUL?",
    "How does it build cash value?",
    "What are the costs?",
    "I want to figure out how much life insurance I need",
    "42",
    "$95k",
    "two",
    "2",
    "250,000",
    "100000",
    "software engineer",
    "protection",
    "What did we just talk about?",
    "Summarize our conversation",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    info!("Financial Advisor Chat demo starting");

    let config = AdvisorConfig::default();
    let vocabulary = config.load_vocabulary()?;
    let store = Arc::new(InMemorySessionStore::new(config.memory_capacity, vocabulary.clone()));
    let knowledge_base = InMemoryKnowledgeBase::with_default_corpus().with_vocabulary(vocabulary.clone());

    let orchestrator = Orchestrator::new(
        &config,
        store,
        Arc::new(OfflineGenerator),
        Arc::new(knowledge_base),
        vocabulary,
    );

    let mut session_id: Option<String> = None;
    for message in SCRIPT {
        let response = orchestrator
            .process_message(message, session_id.as_deref())
            .await?;

        println!("\n[{}] USER: {}", response.turn, message);
        println!("ADVISOR ({} → {}, confidence {:.2}):", response.intent, response.route, response.confidence);
        println!("  {}", response.content);
        for disclaimer in &response.disclaimers {
            println!("  * {}", disclaimer);
        }
        if let Some(view) = &response.calculator {
            println!("  [calculator {:?}: {}/{}]", view.status, view.answered, view.total);
        }
        println!("  Trace:");
        for (i, entry) in response.routing_trace.iter().enumerate() {
            println!("    {}: {}", i + 1, entry);
        }

        session_id = Some(response.session_id);
    }

    if let Some(id) = session_id {
        let summary = orchestrator.session_summary(&id).await?;
        println!("\n=== SESSION SUMMARY ===");
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
