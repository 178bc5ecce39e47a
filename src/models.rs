//! Core data models for the advisory chat layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::calculator::CalculatorView;

//
// ================= Enums =================
//

/// Closed set of intent categories produced by the classifier
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentCategory {
    Knowledge,
    Calculator,
    ConversationManagement,
    ToolHandoff,
    Fallback,
}

/// Deterministic conversation-management requests
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ManagementAction {
    RecallTopic,
    SummarizeConversation,
    ConversationStats,
    CancelCalculator,
    RestartCalculator,
    ResetConversation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CalculatorKind {
    NeedsAssessment,
    CashValueProjection,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    Knowledge,
    Calculator,
    ConversationManagement,
    ToolHandoff,
    Fallback,
}

impl IntentCategory {
    /// Parse a model-produced label, tolerating the usual spelling variants
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "knowledge" | "knowledge_question" | "question" => Some(IntentCategory::Knowledge),
            "calculator" | "calculator_request" | "calculation" => Some(IntentCategory::Calculator),
            "conversation_management" | "management" | "memory" => {
                Some(IntentCategory::ConversationManagement)
            }
            "tool_handoff" | "tool" | "tool_request" | "action" => Some(IntentCategory::ToolHandoff),
            "fallback" | "general" | "other" | "small_talk" => Some(IntentCategory::Fallback),
            _ => None,
        }
    }
}

impl ManagementAction {
    /// Actions that only make sense against the calculator state
    pub fn controls_calculator(&self) -> bool {
        matches!(
            self,
            ManagementAction::CancelCalculator
                | ManagementAction::RestartCalculator
                | ManagementAction::ResetConversation
        )
    }
}

impl CalculatorKind {
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "needs_assessment" | "needs" | "coverage" | "life_insurance_needs" => {
                Some(CalculatorKind::NeedsAssessment)
            }
            "cash_value_projection" | "cash_value" | "projection" | "iul_projection" => {
                Some(CalculatorKind::CashValueProjection)
            }
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            CalculatorKind::NeedsAssessment => "Life Insurance Needs Assessment",
            CalculatorKind::CashValueProjection => "Cash Value Projection",
        }
    }
}

//
// ================= Intent =================
//

/// Classifier output, produced once per turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: IntentCategory,
    pub semantic_goal: String,
    pub confidence: f32,
    pub reasoning: String,
    pub suggested_calculator: Option<CalculatorKind>,
    #[serde(default)]
    pub needs_external_search: bool,
    #[serde(default)]
    pub needs_calculator_selection: bool,
    /// Set only when a deterministic management rule fired
    pub management_action: Option<ManagementAction>,
}

impl IntentResult {
    pub fn new(intent: IntentCategory, confidence: f32, reasoning: impl Into<String>) -> Self {
        Self {
            intent,
            semantic_goal: String::new(),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            suggested_calculator: None,
            needs_external_search: false,
            needs_calculator_selection: false,
            management_action: None,
        }
    }

    pub fn management(action: ManagementAction, phrase: &str) -> Self {
        let mut result = Self::new(
            IntentCategory::ConversationManagement,
            1.0,
            format!("Deterministic rule matched '{}'", phrase),
        );
        result.semantic_goal = format!("{:?}", action);
        result.management_action = Some(action);
        result
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.semantic_goal = goal.into();
        self
    }
}

//
// ================= Routing =================
//

/// Router output, consumed immediately and kept only in the response trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub route_type: RouteType,
    pub confidence: f32,
    pub reasoning: String,
}

//
// ================= Documents =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedDocument {
    pub id: String,
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Backend-reported similarity, when the backend ranks by score
    #[serde(default)]
    pub similarity: Option<f32>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl RetrievedDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source: source.into(),
            tags: Vec::new(),
            similarity: None,
            published_at: None,
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }
}

/// Structured figures extracted from an uploaded file by the ingestion service
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileContext {
    pub file_name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub figures: BTreeMap<String, f64>,
}

impl FileContext {
    /// Present the file as retrieved passages for the knowledge path
    pub fn to_documents(&self) -> Vec<RetrievedDocument> {
        let source = format!("file:{}", self.file_name);
        let mut documents = Vec::with_capacity(2);

        if !self.summary.trim().is_empty() {
            documents.push(
                RetrievedDocument::new(format!("{}#summary", source), self.summary.clone(), &source)
                    .with_tags(&["file"]),
            );
        }

        if !self.figures.is_empty() {
            let lines: Vec<String> = self
                .figures
                .iter()
                .map(|(name, value)| format!("{}: {:.2}", name.replace('_', " "), value))
                .collect();
            documents.push(
                RetrievedDocument::new(format!("{}#figures", source), lines.join("\n"), &source)
                    .with_tags(&["file", "figures"]),
            );
        }

        documents
    }
}

//
// ================= Tool Hand-off =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolHandoff {
    pub tool_name: String,
    pub deep_link: String,
    pub message: String,
}

//
// ================= Final Response =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub content: String,
    pub intent: IntentCategory,
    pub route: RouteType,
    pub confidence: f32,
    pub quality_score: f32,
    pub routing_trace: Vec<String>,
    pub disclaimers: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_handoff: Option<ToolHandoff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculator: Option<CalculatorView>,
    /// The answer came from a deterministic fallback after a backend failure
    pub degraded: bool,
    pub missing_data: bool,
    pub turn: u64,
}

impl fmt::Display for IntentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentCategory::Knowledge => "knowledge",
            IntentCategory::Calculator => "calculator",
            IntentCategory::ConversationManagement => "conversation_management",
            IntentCategory::ToolHandoff => "tool_handoff",
            IntentCategory::Fallback => "fallback",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RouteType::Knowledge => "knowledge",
            RouteType::Calculator => "calculator",
            RouteType::ConversationManagement => "conversation_management",
            RouteType::ToolHandoff => "tool_handoff",
            RouteType::Fallback => "fallback",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_labels_parse() {
        assert_eq!(
            IntentCategory::from_label("Knowledge Question"),
            Some(IntentCategory::Knowledge)
        );
        assert_eq!(
            IntentCategory::from_label("conversation-management"),
            Some(IntentCategory::ConversationManagement)
        );
        assert_eq!(IntentCategory::from_label("weather"), None);
    }

    #[test]
    fn test_file_context_documents() {
        let mut figures = BTreeMap::new();
        figures.insert("annual_premium".to_string(), 12000.0);
        let file = FileContext {
            file_name: "policy.csv".to_string(),
            summary: "Policy illustration for a 45 year old".to_string(),
            figures,
        };

        let docs = file.to_documents();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.source == "file:policy.csv"));
        assert!(docs[1].text.contains("annual premium: 12000.00"));
    }

    #[test]
    fn test_empty_file_context_yields_nothing() {
        assert!(FileContext::default().to_documents().is_empty());
    }
}
