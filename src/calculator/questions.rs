//! Calculator question sequences and answer validation

use crate::models::CalculatorKind;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref NUMBER_RE: Regex = Regex::new(
        r"(?i)^\s*\$?\s*(-?(?:\d[\d,]*(?:\.\d+)?|\.\d+))\s*(k|m|%)?\s*(?:years?|yrs?|dollars?|usd|percent|people|kids|children)?\s*$"
    )
    .expect("number pattern is valid");
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnswerKind {
    Numeric { min: f64, max: Option<f64> },
    Choice(&'static [&'static str]),
    FreeText,
}

#[derive(Debug, Clone, Copy)]
pub struct Question {
    pub id: &'static str,
    pub prompt: &'static str,
    pub kind: AnswerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Number(f64),
    Choice(String),
    Text(String),
}

impl AnswerValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AnswerValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnswerValue::Choice(s) | AnswerValue::Text(s) => Some(s),
            AnswerValue::Number(_) => None,
        }
    }
}

const GOALS: &[&str] = &["protection", "accumulation", "both"];
const RISK_PROFILES: &[&str] = &["conservative", "moderate", "aggressive"];

const NEEDS_ASSESSMENT: &[Question] = &[
    Question {
        id: "age",
        prompt: "How old are you?",
        kind: AnswerKind::Numeric { min: 18.0, max: Some(100.0) },
    },
    Question {
        id: "annual_income",
        prompt: "What is your annual income?",
        kind: AnswerKind::Numeric { min: 0.0, max: None },
    },
    Question {
        id: "dependents",
        prompt: "How many people depend on your income?",
        kind: AnswerKind::Numeric { min: 0.0, max: Some(20.0) },
    },
    Question {
        id: "outstanding_debt",
        prompt: "How much debt do you have outstanding, including your mortgage?",
        kind: AnswerKind::Numeric { min: 0.0, max: None },
    },
    Question {
        id: "existing_coverage",
        prompt: "How much life insurance coverage do you already have?",
        kind: AnswerKind::Numeric { min: 0.0, max: None },
    },
    Question {
        id: "occupation",
        prompt: "What do you do for a living?",
        kind: AnswerKind::FreeText,
    },
    Question {
        id: "primary_goal",
        prompt: "What matters most to you: protection, accumulation, or both?",
        kind: AnswerKind::Choice(GOALS),
    },
];

const CASH_VALUE_PROJECTION: &[Question] = &[
    Question {
        id: "age",
        prompt: "How old are you?",
        kind: AnswerKind::Numeric { min: 18.0, max: Some(85.0) },
    },
    Question {
        id: "annual_premium",
        prompt: "How much would you contribute in premium each year?",
        kind: AnswerKind::Numeric { min: 1.0, max: None },
    },
    Question {
        id: "years",
        prompt: "For how many years would you fund the policy?",
        kind: AnswerKind::Numeric { min: 1.0, max: Some(50.0) },
    },
    Question {
        id: "assumed_rate",
        prompt: "What average annual crediting rate should we assume (in percent)?",
        kind: AnswerKind::Numeric { min: 0.0, max: Some(15.0) },
    },
    Question {
        id: "risk_profile",
        prompt: "How would you describe your risk profile: conservative, moderate, or aggressive?",
        kind: AnswerKind::Choice(RISK_PROFILES),
    },
];

pub fn questions_for(kind: CalculatorKind) -> &'static [Question] {
    match kind {
        CalculatorKind::NeedsAssessment => NEEDS_ASSESSMENT,
        CalculatorKind::CashValueProjection => CASH_VALUE_PROJECTION,
    }
}

/// Parse "75k", "$1,200", "6.5%", "45 years" into a number
pub fn parse_number(raw: &str) -> Option<f64> {
    let captures = NUMBER_RE.captures(raw)?;
    let digits = captures.get(1)?.as_str().replace(',', "");
    let value: f64 = digits.parse().ok()?;
    let multiplier = match captures.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(ref s) if s == "k" => 1_000.0,
        Some(ref s) if s == "m" => 1_000_000.0,
        _ => 1.0,
    };
    Some(value * multiplier)
}

fn format_limit(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

impl Question {
    /// Validate a raw answer; the error string explains what was expected
    pub fn validate(&self, raw: &str) -> std::result::Result<AnswerValue, String> {
        let trimmed = raw.trim();
        match self.kind {
            AnswerKind::Numeric { min, max } => {
                let value = parse_number(trimmed).ok_or_else(|| {
                    format!("\"{}\" doesn't look like a number. Please answer with a number, for example 45 or 75,000.", trimmed)
                })?;
                if value < min {
                    return Err(format!(
                        "The answer must be at least {}.",
                        format_limit(min)
                    ));
                }
                if let Some(max) = max {
                    if value > max {
                        return Err(format!(
                            "The answer must be at most {}.",
                            format_limit(max)
                        ));
                    }
                }
                Ok(AnswerValue::Number(value))
            }
            AnswerKind::Choice(options) => {
                let lowered = trimmed.to_lowercase();
                let by_index = lowered
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| i.checked_sub(1))
                    .and_then(|i| options.get(i));
                let by_name = options
                    .iter()
                    .find(|opt| lowered == **opt || lowered.split_whitespace().any(|w| w == **opt));

                by_index
                    .or(by_name)
                    .map(|opt| AnswerValue::Choice(opt.to_string()))
                    .ok_or_else(|| format!("Please choose one of: {}.", options.join(", ")))
            }
            AnswerKind::FreeText => {
                if trimmed.is_empty() {
                    Err("Please type a short answer so we can continue.".to_string())
                } else {
                    Ok(AnswerValue::Text(trimmed.to_string()))
                }
            }
        }
    }
}
