use financial_advisor_chat::{
    agent::Orchestrator,
    api::start_server,
    config::AdvisorConfig,
    gemini::GeminiClient,
    generation::{Generator, OfflineGenerator},
    retrieval::InMemoryKnowledgeBase,
    state::{InMemorySessionStore, MemoryStore},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AdvisorConfig::from_env()?;
    let vocabulary = config.load_vocabulary()?;

    info!("Financial Advisor Chat - API Server");
    info!("Port: {}", config.port);

    // Create components
    let generator: Arc<dyn Generator> = if config.has_gemini_key() {
        Arc::new(GeminiClient::new(
            config.gemini_api_key.clone(),
            config.gemini_model.clone(),
            config.generation_timeout,
        )?)
    } else {
        warn!("GEMINI_API_KEY not set, using the offline generator (see .env.example)");
        Arc::new(OfflineGenerator)
    };

    let knowledge_base = match std::env::var("ADVISOR_KNOWLEDGE_BASE_PATH") {
        Ok(path) => InMemoryKnowledgeBase::from_json_file(&path)?,
        Err(_) => InMemoryKnowledgeBase::with_default_corpus(),
    }
    .with_vocabulary(vocabulary.clone());
    info!(documents = knowledge_base.len(), "Knowledge base loaded");

    // The session registry is owned here and injected into the orchestrator
    let store = Arc::new(InMemorySessionStore::new(config.memory_capacity, vocabulary.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        &config,
        store.clone(),
        generator,
        Arc::new(knowledge_base),
        vocabulary,
    ));
    info!("Orchestrator initialized");

    let idle_timeout = config.session_idle_timeout;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(EVICTION_INTERVAL);
        loop {
            ticker.tick().await;
            store.evict_idle(idle_timeout).await;
        }
    });

    // Start API server
    start_server(orchestrator, config.port).await?;

    Ok(())
}
