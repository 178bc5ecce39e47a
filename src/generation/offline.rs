//! Offline generator
//!
//! Keeps the system usable without a model API key. Knowledge answers are
//! extractive (first sentence of each supplied passage); classification is
//! declined so the classifier falls back to its keyword heuristic.

use super::{GenerationOutput, GenerationPurpose, GenerationRequest, Generator, TokenUsage};
use crate::error::OrchestrationError;
use crate::rag::FOLLOW_UP_MARKER;
use crate::Result;
use async_trait::async_trait;

const MAX_PASSAGES_USED: usize = 3;

pub struct OfflineGenerator;

impl OfflineGenerator {
    fn first_sentence(text: &str) -> &str {
        let end = text
            .char_indices()
            .find(|(_, c)| matches!(c, '.' | '!' | '?'))
            .map(|(i, _)| i + 1)
            .unwrap_or(text.len());
        text[..end].trim()
    }

    /// Passage lines look like `[1] (source: kb/iul) text`
    fn passages(context: &str) -> Vec<&str> {
        context
            .lines()
            .filter(|line| line.starts_with('['))
            .filter_map(|line| line.split_once(") ").map(|(_, text)| text))
            .collect()
    }

    fn follow_up_topic(context: &str) -> Option<&str> {
        context
            .lines()
            .find_map(|line| line.strip_prefix(FOLLOW_UP_MARKER))
            .map(|rest| rest.split(" (").next().unwrap_or(rest).trim())
    }

    fn knowledge_answer(request: &GenerationRequest) -> String {
        let passages = Self::passages(&request.context);
        if passages.is_empty() {
            return "The material I have on hand doesn't cover that question, so I can't give \
                    a grounded answer. Could you rephrase it or ask about a related topic?"
                .to_string();
        }

        let mut answer = String::new();
        if let Some(topic) = Self::follow_up_topic(&request.context) {
            answer.push_str(&format!("Building on our discussion of {}: ", topic));
        }
        let sentences: Vec<&str> = passages
            .iter()
            .take(MAX_PASSAGES_USED)
            .map(|p| Self::first_sentence(p))
            .filter(|s| !s.is_empty())
            .collect();
        answer.push_str(&sentences.join(" "));
        answer
    }
}

#[async_trait]
impl Generator for OfflineGenerator {
    fn name(&self) -> &str {
        "offline"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let text = match request.purpose {
            GenerationPurpose::Classification => {
                return Err(OrchestrationError::generation(
                    "offline generator does not classify intents",
                ))
            }
            GenerationPurpose::KnowledgeAnswer => Self::knowledge_answer(request),
            GenerationPurpose::General => "I can help with questions about life insurance, \
                annuities and retirement planning, or walk you through one of our calculators. \
                What would you like to explore?"
                .to_string(),
        };

        Ok(GenerationOutput {
            text,
            confidence: 0.6,
            usage: TokenUsage::default(),
        })
    }
}
