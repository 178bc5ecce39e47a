//! Smart Router
//!
//! `route` is a pure dispatch over the closed intent set; `execute` runs the
//! chosen path. Neither touches session storage: the new calculator state and
//! the memory effect come back in a `RouteOutcome` for the orchestrator to
//! commit.

use crate::calculator::{CalculatorEngine, CalculatorMachine, CalculatorState, CalculatorView};
use crate::context::ContextAnalyzer;
use crate::generation::{call_with_policy, CallPolicy, GenerationPurpose, GenerationRequest, Generator};
use crate::memory::{ConversationMemory, ConversationSummarizer};
use crate::models::{
    FileContext, IntentCategory, IntentResult, ManagementAction, RetrievedDocument, RouteType,
    RoutingDecision, ToolHandoff,
};
use crate::rag::KnowledgeResponder;
use crate::retrieval::ContextAwareRetriever;
use crate::tools::ToolRegistry;
use std::sync::Arc;
use tracing::{info, warn};

const GENERAL_INSTRUCTION: &str = "You are a friendly assistant for a financial-education service \
covering life insurance, annuities and retirement planning. Reply briefly. If the message is off-topic, \
say what you can help with. Do not give personalised investment, tax or legal advice.";

const GENERAL_FALLBACK: &str = "I can help with questions about life insurance, annuities and \
retirement planning, or walk you through a coverage needs assessment or a cash value projection. \
What would you like to explore?";

const CONTEXT_TURNS: usize = 3;

/// What the orchestrator does to memory once the turn is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEffect {
    Record { follow_up: bool },
    /// Conversation reset: wipe memory, do not record the reset turn
    Clear,
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub content: String,
    pub route: RouteType,
    pub confidence: f32,
    pub quality_score: f32,
    /// Calculator state to commit
    pub calculator: CalculatorState,
    pub memory_effect: MemoryEffect,
    pub trace: Vec<String>,
    pub sources: Vec<String>,
    pub tool_handoff: Option<ToolHandoff>,
    pub degraded: bool,
    pub missing_data: bool,
}

impl RouteOutcome {
    fn deterministic(route: RouteType, content: String, calculator: CalculatorState) -> Self {
        Self {
            content,
            route,
            confidence: 1.0,
            quality_score: 1.0,
            calculator,
            memory_effect: MemoryEffect::Record { follow_up: false },
            trace: Vec::new(),
            sources: Vec::new(),
            tool_handoff: None,
            degraded: false,
            missing_data: false,
        }
    }

    pub fn calculator_view(&self) -> Option<CalculatorView> {
        self.calculator.view()
    }
}

/// Read-only inputs for one turn
pub struct TurnContext<'a> {
    pub session_id: &'a str,
    pub message: &'a str,
    pub memory: &'a ConversationMemory,
    pub calculator: &'a CalculatorState,
    pub file: Option<&'a FileContext>,
}

pub struct SmartRouter {
    retriever: ContextAwareRetriever,
    responder: KnowledgeResponder,
    calculators: CalculatorMachine,
    tools: ToolRegistry,
    generator: Arc<dyn Generator>,
    policy: CallPolicy,
    min_route_confidence: f32,
}

impl SmartRouter {
    pub fn new(
        retriever: ContextAwareRetriever,
        generator: Arc<dyn Generator>,
        policy: CallPolicy,
        min_route_confidence: f32,
    ) -> Self {
        Self {
            retriever,
            responder: KnowledgeResponder::new(generator.clone(), policy),
            calculators: CalculatorMachine::default(),
            tools: ToolRegistry::default(),
            generator,
            policy,
            min_route_confidence,
        }
    }

    pub fn with_calculator_engine(mut self, engine: Arc<dyn CalculatorEngine>) -> Self {
        self.calculators = CalculatorMachine::new(engine);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Deterministic dispatch. Management rules and an active calculator take
    /// priority over every other category.
    pub fn route(&self, intent: &IntentResult, calculator: &CalculatorState) -> RoutingDecision {
        let decision = |route_type, confidence: f32, reasoning: &str| RoutingDecision {
            route_type,
            confidence,
            reasoning: reasoning.to_string(),
        };

        match intent.intent {
            IntentCategory::ConversationManagement => decision(
                RouteType::ConversationManagement,
                intent.confidence,
                "Conversation-management request",
            ),
            _ if calculator.is_active() => decision(
                RouteType::Calculator,
                1.0,
                "Calculator session active; message answers the current question",
            ),
            IntentCategory::Calculator => decision(RouteType::Calculator, intent.confidence, "Calculator request"),
            IntentCategory::ToolHandoff => {
                decision(RouteType::ToolHandoff, intent.confidence, "Better served by a dedicated tool")
            }
            IntentCategory::Knowledge if intent.confidence < self.min_route_confidence => decision(
                RouteType::Fallback,
                intent.confidence,
                "Knowledge intent below routing confidence",
            ),
            IntentCategory::Knowledge => decision(RouteType::Knowledge, intent.confidence, "Knowledge question"),
            IntentCategory::Fallback => decision(RouteType::Fallback, intent.confidence, "No specific capability"),
        }
    }

    pub async fn execute(
        &self,
        decision: &RoutingDecision,
        intent: &IntentResult,
        ctx: &TurnContext<'_>,
    ) -> RouteOutcome {
        info!(
            session_id = %ctx.session_id,
            route = %decision.route_type,
            reason = %decision.reasoning,
            "Executing route"
        );

        let mut outcome = match decision.route_type {
            RouteType::ConversationManagement => self.execute_management(intent, ctx),
            RouteType::Calculator => self.execute_calculator(intent, ctx),
            RouteType::Knowledge => self.execute_knowledge(intent, ctx).await,
            RouteType::ToolHandoff => match self.execute_tool(ctx) {
                Some(outcome) => outcome,
                None => self.execute_fallback(ctx).await,
            },
            RouteType::Fallback => self.execute_fallback(ctx).await,
        };
        outcome
            .trace
            .insert(0, format!("ROUTE: {} ({})", decision.route_type, decision.reasoning));
        outcome
    }

    // =============================
    // Conversation management
    // =============================

    fn execute_management(&self, intent: &IntentResult, ctx: &TurnContext<'_>) -> RouteOutcome {
        let action = intent
            .management_action
            .unwrap_or(ManagementAction::SummarizeConversation);
        let mut calculator = ctx.calculator.clone();

        let content = match action {
            ManagementAction::RecallTopic => ConversationSummarizer::recall_topic(ctx.memory),
            ManagementAction::SummarizeConversation => ConversationSummarizer::summarize_conversation(ctx.memory),
            ManagementAction::ConversationStats => ConversationSummarizer::conversation_stats(ctx.memory),
            ManagementAction::CancelCalculator => match calculator.active_kind() {
                Some(kind) => {
                    self.calculators.cancel(&mut calculator);
                    format!(
                        "Okay, I've stopped the {}. Your answers were discarded. What would you like to do next?",
                        kind.title()
                    )
                }
                None => "There's no calculator running right now.".to_string(),
            },
            ManagementAction::RestartCalculator => {
                match calculator.last_kind().or(intent.suggested_calculator) {
                    Some(kind) => match self.calculators.restart(&mut calculator, kind) {
                        Ok(step) => format!("Starting over. {}", step.text),
                        Err(e) => {
                            warn!(error = %e, "Calculator restart failed");
                            CalculatorMachine::selection_prompt()
                        }
                    },
                    None => CalculatorMachine::selection_prompt(),
                }
            }
            ManagementAction::ResetConversation => {
                self.calculators.cancel(&mut calculator);
                let mut outcome = RouteOutcome::deterministic(
                    RouteType::ConversationManagement,
                    "Okay, I've cleared our conversation. What would you like to talk about?".to_string(),
                    calculator,
                );
                outcome.memory_effect = MemoryEffect::Clear;
                outcome.trace.push("management=reset_conversation".to_string());
                return outcome;
            }
        };

        let mut outcome = RouteOutcome::deterministic(RouteType::ConversationManagement, content, calculator);
        outcome.trace.push(format!("management={:?}", action));
        outcome
    }

    // =============================
    // Calculator
    // =============================

    fn execute_calculator(&self, intent: &IntentResult, ctx: &TurnContext<'_>) -> RouteOutcome {
        let mut calculator = ctx.calculator.clone();

        if calculator.is_active() {
            return match self.calculators.answer(&mut calculator, ctx.message) {
                Ok(step) => {
                    let mut outcome = RouteOutcome::deterministic(RouteType::Calculator, step.text, calculator);
                    outcome.trace.push(format!(
                        "calculator={:?} answered={}/{}{}",
                        step.view.kind,
                        step.view.answered,
                        step.view.total,
                        if step.view.error.is_some() { " rejected" } else { "" }
                    ));
                    outcome
                }
                Err(e) => {
                    warn!(error = %e, code = e.code(), "Calculator failed to produce a result");
                    let mut outcome = RouteOutcome::deterministic(
                        RouteType::Calculator,
                        "I couldn't compute your result from those answers. You can say \"restart calculator\" \
                         to try again."
                            .to_string(),
                        ctx.calculator.clone(),
                    );
                    outcome.degraded = true;
                    outcome.confidence = 0.0;
                    outcome.quality_score = 0.0;
                    outcome.trace.push(format!("calculator_error={}", e.code()));
                    outcome
                }
            };
        }

        let kind = match intent.suggested_calculator {
            Some(kind) if !intent.needs_calculator_selection => kind,
            _ => {
                let mut outcome =
                    RouteOutcome::deterministic(RouteType::Calculator, CalculatorMachine::selection_prompt(), calculator);
                outcome.trace.push("calculator=selection".to_string());
                return outcome;
            }
        };

        match self.calculators.start(&mut calculator, kind) {
            Ok(step) => {
                let mut outcome = RouteOutcome::deterministic(RouteType::Calculator, step.text, calculator);
                outcome.trace.push(format!("calculator={:?} started", kind));
                outcome
            }
            Err(e) => {
                warn!(error = %e, "Calculator start refused");
                let mut outcome =
                    RouteOutcome::deterministic(RouteType::Calculator, e.to_string(), ctx.calculator.clone());
                outcome.trace.push("calculator=start_refused".to_string());
                outcome
            }
        }
    }

    // =============================
    // Knowledge (RAG)
    // =============================

    async fn execute_knowledge(&self, intent: &IntentResult, ctx: &TurnContext<'_>) -> RouteOutcome {
        let query = ContextAnalyzer::enhance(ctx.message, ctx.memory);
        let mut trace = vec![format!(
            "follow_up={} topic={}{}",
            query.is_follow_up,
            query.topic.as_deref().unwrap_or("-"),
            query
                .related
                .as_ref()
                .map(|r| format!(" related={} ({})", r.concept, r.relation))
                .unwrap_or_default()
        )];

        let documents: Vec<RetrievedDocument> = match ctx.file {
            Some(file) => {
                trace.push(format!("documents=file:{}", file.file_name));
                file.to_documents()
            }
            None => match self.retriever.retrieve(&query, ctx.memory).await {
                Ok(ranked) => {
                    trace.push(format!("retrieved={}", ranked.len()));
                    ranked.into_iter().map(|d| d.document).collect()
                }
                Err(e) => {
                    warn!(error = %e, code = e.code(), "Retrieval failed, using fallback answer");
                    trace.push(format!("retrieval_error={}", e.code()));
                    let fallback = KnowledgeResponder::fallback(&query, Vec::new());
                    return Self::knowledge_outcome(fallback, query.is_follow_up, trace, ctx.calculator);
                }
            },
        };

        let answer = self.responder.answer(&query, &documents, ctx.memory).await;
        trace.push(format!("quality={:.3}", answer.quality_score));
        if intent.needs_external_search && ctx.file.is_none() && documents.is_empty() {
            trace.push("missing_data=no_relevant_documents".to_string());
        }
        Self::knowledge_outcome(answer, query.is_follow_up, trace, ctx.calculator)
    }

    fn knowledge_outcome(
        answer: crate::rag::KnowledgeAnswer,
        follow_up: bool,
        trace: Vec<String>,
        calculator: &CalculatorState,
    ) -> RouteOutcome {
        RouteOutcome {
            content: answer.text,
            route: RouteType::Knowledge,
            confidence: answer.confidence,
            quality_score: answer.quality_score,
            calculator: calculator.clone(),
            memory_effect: MemoryEffect::Record { follow_up },
            trace,
            sources: answer.sources,
            tool_handoff: None,
            degraded: answer.degraded,
            missing_data: answer.missing_data,
        }
    }

    // =============================
    // Tool hand-off
    // =============================

    fn execute_tool(&self, ctx: &TurnContext<'_>) -> Option<RouteOutcome> {
        let tool = self.tools.select(ctx.message, ctx.file)?;
        let handoff = tool.handoff(ctx.session_id, ctx.file);

        let mut outcome =
            RouteOutcome::deterministic(RouteType::ToolHandoff, handoff.message.clone(), ctx.calculator.clone());
        outcome.trace.push(format!("tool={}", handoff.tool_name));
        outcome.tool_handoff = Some(handoff);
        Some(outcome)
    }

    // =============================
    // General fallback
    // =============================

    async fn execute_fallback(&self, ctx: &TurnContext<'_>) -> RouteOutcome {
        let request = GenerationRequest::new(GenerationPurpose::General, GENERAL_INSTRUCTION)
            .with_context(ctx.memory.condensed_context(CONTEXT_TURNS))
            .with_query(ctx.message);

        match call_with_policy(self.generator.as_ref(), &request, self.policy).await {
            Ok(output) => {
                let mut outcome =
                    RouteOutcome::deterministic(RouteType::Fallback, output.text, ctx.calculator.clone());
                outcome.confidence = output.confidence;
                outcome.quality_score = output.confidence;
                outcome.trace.push(format!("generator={}", self.generator.name()));
                outcome
            }
            Err(e) => {
                warn!(error = %e, code = e.code(), "General generation failed, using canned reply");
                let mut outcome = RouteOutcome::deterministic(
                    RouteType::Fallback,
                    GENERAL_FALLBACK.to_string(),
                    ctx.calculator.clone(),
                );
                outcome.confidence = 0.0;
                outcome.quality_score = 0.0;
                outcome.degraded = true;
                outcome.trace.push(format!("generation_error={}", e.code()));
                outcome
            }
        }
    }
}
