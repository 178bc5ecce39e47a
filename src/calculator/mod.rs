//! Calculator state machine
//!
//! Guided Q&A flows that collect structured inputs across turns:
//! - Inactive -> Active (start)
//! - Active -> Active (answer accepted or re-asked)
//! - Active -> Completed (final answer accepted, result computed)
//! - Completed -> Active (explicit start)
//! - any -> Inactive (reset)
//!
//! The machine works on a `CalculatorState` value owned by the caller; it
//! never reaches into session storage itself.

use crate::error::OrchestrationError;
use crate::models::CalculatorKind;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub mod engine;
pub mod questions;

pub use engine::{CalculatorEngine, CalculatorResult, StandardCalculatorEngine};
pub use questions::{parse_number, questions_for, AnswerKind, AnswerValue, Question};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CalculatorStatus {
    Inactive,
    Active,
    Completed,
}

impl fmt::Display for CalculatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalculatorStatus::Inactive => write!(f, "inactive"),
            CalculatorStatus::Active => write!(f, "active"),
            CalculatorStatus::Completed => write!(f, "completed"),
        }
    }
}

impl CalculatorStatus {
    pub fn can_transition_to(&self, target: &CalculatorStatus) -> bool {
        matches!(
            (self, target),
            (CalculatorStatus::Inactive, CalculatorStatus::Active)
                | (CalculatorStatus::Active, CalculatorStatus::Active)
                | (CalculatorStatus::Active, CalculatorStatus::Completed)
                | (CalculatorStatus::Completed, CalculatorStatus::Active)
                // Reset
                | (_, CalculatorStatus::Inactive)
        )
    }
}

/// In-progress answers and the cursor into the fixed question sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculatorSession {
    pub kind: CalculatorKind,
    answers: Vec<(String, AnswerValue)>,
    cursor: usize,
    pub started_at: DateTime<Utc>,
}

impl CalculatorSession {
    pub fn new(kind: CalculatorKind) -> Self {
        Self {
            kind,
            answers: Vec::new(),
            cursor: 0,
            started_at: Utc::now(),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn answers(&self) -> &[(String, AnswerValue)] {
        &self.answers
    }

    pub fn total(&self) -> usize {
        questions_for(self.kind).len()
    }

    pub fn current_question(&self) -> Option<&'static Question> {
        questions_for(self.kind).get(self.cursor)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum CalculatorState {
    #[default]
    Inactive,
    Active(CalculatorSession),
    Completed(CalculatorResult),
}

impl CalculatorState {
    pub fn status(&self) -> CalculatorStatus {
        match self {
            CalculatorState::Inactive => CalculatorStatus::Inactive,
            CalculatorState::Active(_) => CalculatorStatus::Active,
            CalculatorState::Completed(_) => CalculatorStatus::Completed,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CalculatorState::Active(_))
    }

    pub fn active_kind(&self) -> Option<CalculatorKind> {
        match self {
            CalculatorState::Active(session) => Some(session.kind),
            _ => None,
        }
    }

    /// Last kind used, active or completed
    pub fn last_kind(&self) -> Option<CalculatorKind> {
        match self {
            CalculatorState::Inactive => None,
            CalculatorState::Active(session) => Some(session.kind),
            CalculatorState::Completed(result) => Some(result.kind),
        }
    }

    pub fn view(&self) -> Option<CalculatorView> {
        match self {
            CalculatorState::Inactive => None,
            CalculatorState::Active(session) => Some(CalculatorView::of_session(session, None)),
            CalculatorState::Completed(result) => {
                let total = questions_for(result.kind).len();
                Some(CalculatorView {
                    kind: result.kind,
                    status: CalculatorStatus::Completed,
                    question_id: None,
                    answered: total,
                    total,
                    error: None,
                    result: Some(result.clone()),
                })
            }
        }
    }

    fn transition(&mut self, next: CalculatorState) -> Result<()> {
        let (from, to) = (self.status(), next.status());
        if !from.can_transition_to(&to) {
            return Err(OrchestrationError::CalculatorError(format!(
                "invalid calculator transition: {} -> {}",
                from, to
            )));
        }
        debug!(from = %from, to = %to, "Calculator transition");
        *self = next;
        Ok(())
    }
}

/// Serializable snapshot of the calculator shown alongside a response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculatorView {
    pub kind: CalculatorKind,
    pub status: CalculatorStatus,
    pub question_id: Option<String>,
    pub answered: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CalculatorResult>,
}

impl CalculatorView {
    fn of_session(session: &CalculatorSession, error: Option<String>) -> Self {
        Self {
            kind: session.kind,
            status: CalculatorStatus::Active,
            question_id: session.current_question().map(|q| q.id.to_string()),
            answered: session.cursor,
            total: session.total(),
            error,
            result: None,
        }
    }
}

/// Text to show the user plus the calculator snapshot after the step
#[derive(Debug, Clone)]
pub struct CalculatorStep {
    pub text: String,
    pub view: CalculatorView,
}

impl CalculatorStep {
    pub fn completed(&self) -> bool {
        self.view.status == CalculatorStatus::Completed
    }
}

pub struct CalculatorMachine {
    engine: Arc<dyn CalculatorEngine>,
}

impl Default for CalculatorMachine {
    fn default() -> Self {
        Self::new(Arc::new(StandardCalculatorEngine))
    }
}

fn render_question(session: &CalculatorSession, error: Option<&str>) -> String {
    let Some(question) = session.current_question() else {
        return String::new();
    };
    let mut text = String::new();
    if let Some(error) = error {
        text.push_str(error);
        text.push_str("\n\n");
    }
    text.push_str(&format!(
        "Question {} of {} ({}/{} answered): {}",
        session.cursor + 1,
        session.total(),
        session.cursor,
        session.total(),
        question.prompt
    ));
    text
}

fn render_result(result: &CalculatorResult) -> String {
    let mut text = format!("Your {} is complete.\n\n{}", result.kind.title(), result.summary);
    text.push_str("\n\n");
    text.push_str(&result.recommendation);
    text
}

impl CalculatorMachine {
    pub fn new(engine: Arc<dyn CalculatorEngine>) -> Self {
        Self { engine }
    }

    /// Asked when a calculator was requested without saying which one
    pub fn selection_prompt() -> String {
        format!(
            "I can run two calculators:\n1. {} - how much coverage you need\n2. {} - how a policy's cash value could grow\n\nWhich one would you like to start?",
            CalculatorKind::NeedsAssessment.title(),
            CalculatorKind::CashValueProjection.title()
        )
    }

    /// Start a new session. Refuses to replace an active one; use `restart`.
    pub fn start(&self, state: &mut CalculatorState, kind: CalculatorKind) -> Result<CalculatorStep> {
        if let CalculatorState::Active(session) = state {
            return Err(OrchestrationError::CalculatorError(format!(
                "{} is already in progress",
                session.kind.title()
            )));
        }
        self.begin(state, kind)
    }

    /// Explicitly discard any in-progress session and start over
    pub fn restart(&self, state: &mut CalculatorState, kind: CalculatorKind) -> Result<CalculatorStep> {
        state.transition(CalculatorState::Inactive)?;
        self.begin(state, kind)
    }

    fn begin(&self, state: &mut CalculatorState, kind: CalculatorKind) -> Result<CalculatorStep> {
        let session = CalculatorSession::new(kind);
        let text = format!(
            "Let's work through the {}.\n\n{}",
            kind.title(),
            render_question(&session, None)
        );
        let view = CalculatorView::of_session(&session, None);
        state.transition(CalculatorState::Active(session))?;
        info!(kind = ?kind, "Calculator started");
        Ok(CalculatorStep { text, view })
    }

    /// Apply one raw answer to the active session.
    ///
    /// Invalid answers re-ask the same question and leave the cursor alone.
    /// The final valid answer computes the result and moves to `Completed`.
    pub fn answer(&self, state: &mut CalculatorState, raw: &str) -> Result<CalculatorStep> {
        let CalculatorState::Active(session) = state else {
            return Err(OrchestrationError::CalculatorError(
                "no calculator session is active".to_string(),
            ));
        };
        let question = session.current_question().ok_or_else(|| {
            OrchestrationError::CalculatorError("calculator cursor is past the last question".to_string())
        })?;

        let value = match question.validate(raw) {
            Ok(value) => value,
            Err(explanation) => {
                debug!(question = question.id, "Calculator answer rejected");
                return Ok(CalculatorStep {
                    text: render_question(session, Some(&explanation)),
                    view: CalculatorView::of_session(session, Some(explanation)),
                });
            }
        };

        let mut next = session.clone();
        next.answers.push((question.id.to_string(), value));
        next.cursor += 1;

        if next.cursor < next.total() {
            let step = CalculatorStep {
                text: render_question(&next, None),
                view: CalculatorView::of_session(&next, None),
            };
            state.transition(CalculatorState::Active(next))?;
            return Ok(step);
        }

        let result = self.engine.compute(next.kind, &next.answers)?;
        let text = render_result(&result);
        state.transition(CalculatorState::Completed(result))?;
        info!(kind = ?next.kind, "Calculator completed");

        let view = state.view().ok_or_else(|| {
            OrchestrationError::Internal("completed calculator has no view".to_string())
        })?;
        Ok(CalculatorStep { text, view })
    }

    /// Discard any session; returns whether one was in progress
    pub fn cancel(&self, state: &mut CalculatorState) -> bool {
        let was_active = state.is_active();
        *state = CalculatorState::Inactive;
        was_active
    }
}
