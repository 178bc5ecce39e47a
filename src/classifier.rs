//! Intent Classifier
//!
//! Maps a user message plus conversational context to an `IntentResult`:
//! 1. Empty input is a zero-confidence fallback
//! 2. Deterministic management phrases win outright (no model call)
//! 3. An active calculator forces the calculator intent
//! 4. Otherwise the semantic model is asked for a structured label
//! 5. If the model fails or answers garbage, a keyword heuristic decides

use crate::calculator::{CalculatorMachine, CalculatorState};
use crate::error::OrchestrationError;
use crate::generation::{
    call_with_policy, CallPolicy, GenerationParams, GenerationPurpose, GenerationRequest, Generator,
};
use crate::memory::{ConversationMemory, DomainVocabulary};
use crate::models::{CalculatorKind, IntentCategory, IntentResult, ManagementAction};
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

lazy_static! {
    static ref JSON_OBJECT: Regex = Regex::new(r"(?s)\{.*\}").expect("json pattern is valid");
}

/// Recent user messages included in the classification prompt
const CONTEXT_TURNS: usize = 4;

const CLASSIFIER_INSTRUCTION: &str = "You classify messages sent to a financial-advisory assistant. \
Categories: knowledge (a question about insurance, annuities, retirement or tax concepts), \
calculator (the user wants a coverage needs assessment or a cash value projection), \
tool_handoff (the user wants a full portfolio analysis, a policy comparison or a document analysis), \
conversation_management (a question about this conversation itself), \
fallback (greetings, small talk, anything else). \
Reply with a single JSON object and nothing else: \
{\"intent\": string, \"semantic_goal\": string, \"confidence\": number between 0 and 1, \
\"reasoning\": string, \"suggested_calculator\": \"needs_assessment\" | \"cash_value_projection\" | null, \
\"needs_external_search\": boolean}";

/// Static keyword lists
const CALCULATOR_KEYWORDS: &[&str] = &[
    "calculate", "calculator", "compute", "estimate", "projection", "project my",
    "illustration", "needs assessment", "how much coverage", "how much life insurance",
    "how much insurance",
];

const PROJECTION_KEYWORDS: &[&str] = &[
    "cash value projection", "projection", "project my", "illustration", "grow to", "cash value calculator",
];

const NEEDS_KEYWORDS: &[&str] = &[
    "needs assessment", "how much coverage", "how much life insurance", "how much insurance",
    "coverage gap", "coverage calculator",
];

const TOOL_KEYWORDS: &[&str] = &[
    "portfolio", "rebalance", "compare policies", "compare my policy", "policy comparison",
    "compare quotes", "analyze my file", "analyze this file", "analyze my document",
    "analyze this document", "uploaded", "statement",
];

const QUESTION_MARKERS: &[&str] = &[
    "what", "how", "why", "when", "which", "should", "can", "does", "is", "are", "explain",
    "tell me", "difference", "pros", "cons",
];

#[derive(Debug, Deserialize)]
struct ModelClassification {
    intent: String,
    #[serde(default)]
    semantic_goal: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    suggested_calculator: Option<String>,
    #[serde(default)]
    needs_external_search: bool,
}

pub struct IntentClassifier {
    generator: Arc<dyn Generator>,
    policy: CallPolicy,
    vocabulary: Arc<DomainVocabulary>,
}

fn contains_any(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| text.contains(**kw)).count()
}

fn detect_calculator_kind(lowered: &str) -> Option<CalculatorKind> {
    if contains_any(lowered, PROJECTION_KEYWORDS) > 0 {
        Some(CalculatorKind::CashValueProjection)
    } else if contains_any(lowered, NEEDS_KEYWORDS) > 0 {
        Some(CalculatorKind::NeedsAssessment)
    } else {
        None
    }
}

impl IntentClassifier {
    pub fn new(generator: Arc<dyn Generator>, policy: CallPolicy, vocabulary: Arc<DomainVocabulary>) -> Self {
        Self {
            generator,
            policy,
            vocabulary,
        }
    }

    /// Classify one message. Never fails: backend problems degrade to the heuristic.
    pub async fn classify(
        &self,
        message: &str,
        memory: &ConversationMemory,
        calculator: &CalculatorState,
    ) -> IntentResult {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return IntentResult::new(IntentCategory::Fallback, 0.0, "Empty message");
        }

        if let Some(rule) = self.vocabulary.match_management(trimmed) {
            info!(action = ?rule.action, "Deterministic management rule matched");
            return IntentResult::management(rule.action, &rule.phrase);
        }

        if let CalculatorState::Active(session) = calculator {
            let mut result = IntentResult::new(
                IntentCategory::Calculator,
                1.0,
                "Calculator session active; message is an answer to the current question",
            )
            .with_goal("Answer the current calculator question");
            result.suggested_calculator = Some(session.kind);
            return result;
        }

        if let Some(kind) = Self::selection_reply(trimmed, memory) {
            let mut result = IntentResult::new(
                IntentCategory::Calculator,
                0.95,
                "Reply to the calculator selection prompt",
            )
            .with_goal(format!("Start the {}", kind.title()));
            result.suggested_calculator = Some(kind);
            return result;
        }

        let result = match self.classify_semantic(trimmed, memory).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Semantic classification unavailable, using keyword heuristic");
                self.classify_heuristic(trimmed)
            }
        };

        Self::finalize(result, trimmed)
    }

    /// "1" or "2" right after the selection prompt picks a calculator
    fn selection_reply(message: &str, memory: &ConversationMemory) -> Option<CalculatorKind> {
        let last = memory.last_turn()?;
        if last.intent != IntentCategory::Calculator || last.response != CalculatorMachine::selection_prompt() {
            return None;
        }
        match message.trim_end_matches('.') {
            "1" => Some(CalculatorKind::NeedsAssessment),
            "2" => Some(CalculatorKind::CashValueProjection),
            _ => None,
        }
    }

    async fn classify_semantic(&self, message: &str, memory: &ConversationMemory) -> Result<IntentResult> {
        let request = GenerationRequest::new(GenerationPurpose::Classification, CLASSIFIER_INSTRUCTION)
            .with_context(memory.condensed_context(CONTEXT_TURNS))
            .with_query(message)
            .with_params(GenerationParams {
                model: None,
                max_output_tokens: 256,
                temperature: 0.0,
            });

        let output = call_with_policy(self.generator.as_ref(), &request, self.policy).await?;
        let result = Self::parse_model_output(&output.text)?;
        debug!(intent = %result.intent, confidence = result.confidence, "Semantic classification");
        Ok(result)
    }

    fn parse_model_output(text: &str) -> Result<IntentResult> {
        let json = JSON_OBJECT
            .find(text)
            .ok_or_else(|| OrchestrationError::generation("classifier reply contained no JSON object"))?;
        let raw: ModelClassification = serde_json::from_str(json.as_str())?;

        let intent = IntentCategory::from_label(&raw.intent).ok_or_else(|| {
            OrchestrationError::generation(format!("unknown intent label '{}'", raw.intent))
        })?;

        let mut result = IntentResult::new(intent, raw.confidence, raw.reasoning).with_goal(raw.semantic_goal);
        result.suggested_calculator = raw
            .suggested_calculator
            .as_deref()
            .and_then(CalculatorKind::from_label);
        result.needs_external_search = raw.needs_external_search;

        // The model has no action vocabulary; a generic memory question gets the recap
        if intent == IntentCategory::ConversationManagement {
            result.management_action = Some(ManagementAction::SummarizeConversation);
        }
        Ok(result)
    }

    /// Keyword heuristic used when the semantic model is unavailable
    pub fn classify_heuristic(&self, message: &str) -> IntentResult {
        let lowered = message.to_lowercase();

        let calculator_score = contains_any(&lowered, CALCULATOR_KEYWORDS);
        let tool_score = contains_any(&lowered, TOOL_KEYWORDS);

        if tool_score > 0 && tool_score >= calculator_score {
            return IntentResult::new(IntentCategory::ToolHandoff, 0.7, "Matched tool keywords")
                .with_goal(format!("Hand off: {}", message));
        }

        if calculator_score > 0 {
            let confidence = if calculator_score >= 2 { 0.85 } else { 0.7 };
            let mut result = IntentResult::new(IntentCategory::Calculator, confidence, "Matched calculator keywords")
                .with_goal("Run a calculator");
            result.suggested_calculator = detect_calculator_kind(&lowered);
            return result;
        }

        let topic = self.vocabulary.find_topic(message);
        let concepts = self.vocabulary.find_concepts(message);
        if topic.is_some() || !concepts.is_empty() {
            let subject = topic.or_else(|| concepts.first().copied()).unwrap_or_default();
            let mut result = IntentResult::new(
                IntentCategory::Knowledge,
                0.75,
                format!("Mentions domain vocabulary ({})", subject),
            )
            .with_goal(format!("Learn about {}", subject));
            result.needs_external_search = true;
            return result;
        }

        let normalized = crate::memory::vocabulary::normalize(message);
        let is_question = message.trim_end().ends_with('?')
            || QUESTION_MARKERS
                .iter()
                .any(|m| format!(" {} ", normalized).contains(&format!(" {} ", m)));
        if is_question || self.vocabulary.continuation_phrase(message).is_some() {
            let mut result = IntentResult::new(IntentCategory::Knowledge, 0.55, "Question without a known topic")
                .with_goal(message.to_string());
            result.needs_external_search = true;
            return result;
        }

        IntentResult::new(IntentCategory::Fallback, 0.3, "No category keywords matched")
    }

    fn finalize(mut result: IntentResult, message: &str) -> IntentResult {
        if result.intent == IntentCategory::Calculator {
            if result.suggested_calculator.is_none() {
                result.suggested_calculator = detect_calculator_kind(&message.to_lowercase());
            }
            result.needs_calculator_selection = result.suggested_calculator.is_none();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::CalculatorSession;
    use crate::generation::{GenerationOutput, OfflineGenerator, TokenUsage};
    use async_trait::async_trait;
    use std::time::Duration;

    struct ScriptedGenerator(&'static str);

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationOutput> {
            Ok(GenerationOutput {
                text: self.0.to_string(),
                confidence: 0.9,
                usage: TokenUsage::default(),
            })
        }
    }

    fn classifier(generator: Arc<dyn Generator>) -> IntentClassifier {
        IntentClassifier::new(
            generator,
            CallPolicy::new(Duration::from_millis(200), Duration::from_millis(1)),
            Arc::new(DomainVocabulary::default()),
        )
    }

    fn memory() -> ConversationMemory {
        ConversationMemory::new(10, Arc::new(DomainVocabulary::default()))
    }

    #[tokio::test]
    async fn test_empty_message_is_zero_confidence_fallback() {
        let result = classifier(Arc::new(OfflineGenerator))
            .classify("   ", &memory(), &CalculatorState::Inactive)
            .await;
        assert_eq!(result.intent, IntentCategory::Fallback);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_management_rule_bypasses_model() {
        // The model would say knowledge; the deterministic rule must win
        let generator = Arc::new(ScriptedGenerator(r#"{"intent": "knowledge", "confidence": 0.99}"#));
        let result = classifier(generator)
            .classify("What did we just talk about?", &memory(), &CalculatorState::Inactive)
            .await;

        assert_eq!(result.intent, IntentCategory::ConversationManagement);
        assert_eq!(result.management_action, Some(ManagementAction::RecallTopic));
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_active_calculator_forces_calculator_intent() {
        let generator = Arc::new(ScriptedGenerator(r#"{"intent": "knowledge", "confidence": 0.99}"#));
        let state = CalculatorState::Active(CalculatorSession::new(CalculatorKind::NeedsAssessment));
        let result = classifier(generator)
            .classify("Tell me about IUL", &memory(), &state)
            .await;

        assert_eq!(result.intent, IntentCategory::Calculator);
        assert_eq!(result.suggested_calculator, Some(CalculatorKind::NeedsAssessment));
    }

    #[tokio::test]
    async fn test_management_still_wins_over_active_calculator() {
        let state = CalculatorState::Active(CalculatorSession::new(CalculatorKind::NeedsAssessment));
        let result = classifier(Arc::new(OfflineGenerator))
            .classify("cancel the calculator", &memory(), &state)
            .await;
        assert_eq!(result.management_action, Some(ManagementAction::CancelCalculator));
    }

    #[tokio::test]
    async fn test_model_json_is_parsed() {
        let generator = Arc::new(ScriptedGenerator(
            "Sure! {\"intent\": \"calculator\", \"semantic_goal\": \"project growth\", \"confidence\": 0.82, \
             \"reasoning\": \"asks for numbers\", \"suggested_calculator\": \"cash_value_projection\"}",
        ));
        let result = classifier(generator)
            .classify("what would my policy be worth in 20 years", &memory(), &CalculatorState::Inactive)
            .await;

        assert_eq!(result.intent, IntentCategory::Calculator);
        assert_eq!(result.suggested_calculator, Some(CalculatorKind::CashValueProjection));
        assert!(!result.needs_calculator_selection);
        assert!((result.confidence - 0.82).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_unparseable_model_output_uses_heuristic() {
        let generator = Arc::new(ScriptedGenerator("I think this is about insurance"));
        let result = classifier(generator)
            .classify("Tell me about IUL", &memory(), &CalculatorState::Inactive)
            .await;
        assert_eq!(result.intent, IntentCategory::Knowledge);
        assert!(result.needs_external_search);
    }

    #[test]
    fn test_heuristic_categories() {
        let c = classifier(Arc::new(OfflineGenerator));

        assert_eq!(c.classify_heuristic("Tell me about IUL").intent, IntentCategory::Knowledge);
        assert_eq!(
            c.classify_heuristic("Can you analyze my portfolio?").intent,
            IntentCategory::ToolHandoff
        );
        assert_eq!(c.classify_heuristic("hello there").intent, IntentCategory::Fallback);

        let calc = c.classify_heuristic("Calculate how much coverage I need");
        assert_eq!(calc.intent, IntentCategory::Calculator);
        assert_eq!(calc.suggested_calculator, Some(CalculatorKind::NeedsAssessment));
    }

    #[tokio::test]
    async fn test_generic_calculator_request_needs_selection() {
        let result = classifier(Arc::new(OfflineGenerator))
            .classify("I'd like to use a calculator", &memory(), &CalculatorState::Inactive)
            .await;
        assert_eq!(result.intent, IntentCategory::Calculator);
        assert!(result.needs_calculator_selection);
    }

    #[tokio::test]
    async fn test_numeric_reply_to_selection_prompt() {
        let mut mem = memory();
        mem.record(
            "I'd like to use a calculator",
            &CalculatorMachine::selection_prompt(),
            IntentCategory::Calculator,
            false,
        );
        let result = classifier(Arc::new(OfflineGenerator))
            .classify("2", &mem, &CalculatorState::Inactive)
            .await;
        assert_eq!(result.suggested_calculator, Some(CalculatorKind::CashValueProjection));
    }
}
