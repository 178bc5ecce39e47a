//! Runtime configuration
//!
//! Values come from the environment (a `.env` file is loaded by the binaries)
//! with defaults suitable for local development.

use crate::error::OrchestrationError;
use crate::memory::DomainVocabulary;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const MAX_MEMORY_CAPACITY: usize = 1_000;

#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    /// Turns retained per session
    pub memory_capacity: usize,
    pub session_idle_timeout: Duration,
    pub retrieval_max_results: usize,
    /// Candidates requested from the retrieval backend before post-filtering
    pub retrieval_pool_size: usize,
    pub relevance_threshold: f32,
    pub topic_bonus: f32,
    pub entity_bonus: f32,
    pub generation_timeout: Duration,
    pub retry_backoff: Duration,
    /// Below this classifier confidence a knowledge intent goes to the fallback path
    pub min_route_confidence: f32,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub vocabulary_path: Option<PathBuf>,
    pub port: u16,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 20,
            session_idle_timeout: Duration::from_secs(1_800),
            retrieval_max_results: 5,
            retrieval_pool_size: 20,
            relevance_threshold: 0.3,
            topic_bonus: 0.25,
            entity_bonus: 0.1,
            generation_timeout: Duration::from_millis(20_000),
            retry_backoff: Duration::from_millis(500),
            min_route_confidence: 0.35,
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.0-flash".to_string(),
            vocabulary_path: None,
            port: 8080,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse::<T>().map_err(|_| {
            OrchestrationError::ConfigError(format!("{} has an invalid value: {}", name, raw))
        }),
        _ => Ok(default),
    }
}

impl AdvisorConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let memory_capacity: usize =
            parse_var("ADVISOR_MEMORY_CAPACITY", defaults.memory_capacity)?;
        let idle_secs: u64 = parse_var(
            "ADVISOR_SESSION_IDLE_SECS",
            defaults.session_idle_timeout.as_secs(),
        )?;
        let timeout_ms: u64 = parse_var(
            "ADVISOR_GENERATION_TIMEOUT_MS",
            defaults.generation_timeout.as_millis() as u64,
        )?;
        let backoff_ms: u64 = parse_var(
            "ADVISOR_RETRY_BACKOFF_MS",
            defaults.retry_backoff.as_millis() as u64,
        )?;

        let port = match env::var("PORT").or_else(|_| env::var("API_PORT")) {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|_| {
                OrchestrationError::ConfigError(format!("PORT has an invalid value: {}", raw))
            })?,
            Err(_) => defaults.port,
        };

        let config = Self {
            memory_capacity: memory_capacity.clamp(1, MAX_MEMORY_CAPACITY),
            session_idle_timeout: Duration::from_secs(idle_secs),
            retrieval_max_results: parse_var(
                "ADVISOR_RETRIEVAL_MAX_RESULTS",
                defaults.retrieval_max_results,
            )?,
            retrieval_pool_size: parse_var("ADVISOR_RETRIEVAL_POOL_SIZE", defaults.retrieval_pool_size)?,
            relevance_threshold: parse_var(
                "ADVISOR_RELEVANCE_THRESHOLD",
                defaults.relevance_threshold,
            )?,
            topic_bonus: defaults.topic_bonus,
            entity_bonus: defaults.entity_bonus,
            generation_timeout: Duration::from_millis(timeout_ms),
            retry_backoff: Duration::from_millis(backoff_ms),
            min_route_confidence: parse_var(
                "ADVISOR_MIN_ROUTE_CONFIDENCE",
                defaults.min_route_confidence,
            )?,
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: env::var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            vocabulary_path: env::var("ADVISOR_VOCABULARY_PATH").ok().map(PathBuf::from),
            port,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            return Err(OrchestrationError::ConfigError(format!(
                "relevance threshold must be within [0, 1], got {}",
                self.relevance_threshold
            )));
        }
        if self.retrieval_max_results == 0 {
            return Err(OrchestrationError::ConfigError(
                "retrieval max results must be at least 1".to_string(),
            ));
        }
        if self.generation_timeout.is_zero() {
            return Err(OrchestrationError::ConfigError(
                "generation timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a usable Gemini key is configured
    pub fn has_gemini_key(&self) -> bool {
        !self.gemini_api_key.is_empty() && self.gemini_api_key != "your_gemini_api_key_here"
    }

    /// Built-in vocabulary, or the JSON replacement when a path is configured
    pub fn load_vocabulary(&self) -> Result<Arc<DomainVocabulary>> {
        match &self.vocabulary_path {
            Some(path) => Ok(Arc::new(DomainVocabulary::from_json_file(path)?)),
            None => Ok(Arc::new(DomainVocabulary::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AdvisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval_max_results, 5);
        assert!(!config.has_gemini_key());
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let config = AdvisorConfig {
            relevance_threshold: 1.5,
            ..AdvisorConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_missing_vocabulary_file_is_an_error() {
        let config = AdvisorConfig {
            vocabulary_path: Some(PathBuf::from("/nonexistent/vocabulary.json")),
            ..AdvisorConfig::default()
        };
        assert!(config.load_vocabulary().is_err());
    }

    #[test]
    fn test_placeholder_key_is_not_usable() {
        let config = AdvisorConfig {
            gemini_api_key: "your_gemini_api_key_here".to_string(),
            ..AdvisorConfig::default()
        };
        assert!(!config.has_gemini_key());
    }
}
