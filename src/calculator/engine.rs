//! Final result computation for completed calculator sessions

use super::questions::AnswerValue;
use crate::error::OrchestrationError;
use crate::models::CalculatorKind;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Years of income a policy should replace
const INCOME_REPLACEMENT_YEARS: f64 = 10.0;
const PER_DEPENDENT_ALLOWANCE: f64 = 50_000.0;
const FINAL_EXPENSES: f64 = 15_000.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculatorResult {
    pub kind: CalculatorKind,
    pub summary: String,
    pub figures: BTreeMap<String, f64>,
    pub recommendation: String,
    pub completed_at: DateTime<Utc>,
}

/// Structured-figure collaborator consumed when a session completes
pub trait CalculatorEngine: Send + Sync {
    fn compute(
        &self,
        kind: CalculatorKind,
        answers: &[(String, AnswerValue)],
    ) -> Result<CalculatorResult>;
}

pub struct StandardCalculatorEngine;

fn number(answers: &[(String, AnswerValue)], id: &str) -> Result<f64> {
    answers
        .iter()
        .find(|(qid, _)| qid == id)
        .and_then(|(_, v)| v.as_number())
        .ok_or_else(|| OrchestrationError::CalculatorError(format!("missing numeric answer '{}'", id)))
}

fn choice<'a>(answers: &'a [(String, AnswerValue)], id: &str) -> Result<&'a str> {
    answers
        .iter()
        .find(|(qid, _)| qid == id)
        .and_then(|(_, v)| v.as_str())
        .ok_or_else(|| OrchestrationError::CalculatorError(format!("missing answer '{}'", id)))
}

fn currency(value: f64) -> String {
    let whole = value.round() as i64;
    let digits = whole.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if whole < 0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}

impl StandardCalculatorEngine {
    fn needs_assessment(answers: &[(String, AnswerValue)]) -> Result<CalculatorResult> {
        let income = number(answers, "annual_income")?;
        let dependents = number(answers, "dependents")?;
        let debt = number(answers, "outstanding_debt")?;
        let existing = number(answers, "existing_coverage")?;
        let goal = choice(answers, "primary_goal")?;

        let income_replacement = income * INCOME_REPLACEMENT_YEARS;
        let total_need =
            income_replacement + debt + dependents.round() * PER_DEPENDENT_ALLOWANCE + FINAL_EXPENSES;
        let gap = (total_need - existing).max(0.0);

        let recommendation = match goal {
            "protection" => "Term coverage is usually the most cost-efficient way to close a pure protection gap.",
            "accumulation" => "A cash-value policy such as an IUL can pair the protection you need with long-term accumulation.",
            _ => "A permanent base policy combined with term coverage can close the gap while still building cash value.",
        };

        let mut figures = BTreeMap::new();
        figures.insert("income_replacement".to_string(), income_replacement);
        figures.insert("total_need".to_string(), total_need);
        figures.insert("existing_coverage".to_string(), existing);
        figures.insert("coverage_gap".to_string(), gap);

        Ok(CalculatorResult {
            kind: CalculatorKind::NeedsAssessment,
            summary: format!(
                "Your estimated total need is {}. With {} of existing coverage, the remaining gap is {}.",
                currency(total_need),
                currency(existing),
                currency(gap)
            ),
            figures,
            recommendation: recommendation.to_string(),
            completed_at: Utc::now(),
        })
    }

    fn cash_value_projection(answers: &[(String, AnswerValue)]) -> Result<CalculatorResult> {
        let age = number(answers, "age")?;
        let premium = number(answers, "annual_premium")?;
        let years = number(answers, "years")?.round().max(1.0) as u32;
        let assumed_rate = number(answers, "assumed_rate")?;
        let risk = choice(answers, "risk_profile")?;

        // Share of each premium absorbed by insurance charges, rising with age
        let charge_rate = if age < 40.0 {
            0.08
        } else if age < 60.0 {
            0.12
        } else {
            0.18
        };
        let risk_factor = match risk {
            "conservative" => 0.8,
            "aggressive" => 1.1,
            _ => 1.0,
        };
        let effective_rate = assumed_rate * risk_factor / 100.0;

        let mut value = 0.0;
        for _ in 0..years {
            value = (value + premium * (1.0 - charge_rate)) * (1.0 + effective_rate);
        }
        let total_premiums = premium * years as f64;

        let mut figures = BTreeMap::new();
        figures.insert("projected_cash_value".to_string(), value);
        figures.insert("total_premiums".to_string(), total_premiums);
        figures.insert("effective_rate_pct".to_string(), effective_rate * 100.0);
        figures.insert("years".to_string(), years as f64);

        Ok(CalculatorResult {
            kind: CalculatorKind::CashValueProjection,
            summary: format!(
                "Contributing {} a year for {} years at an effective {:.2}% could grow to about {} against {} of premiums paid.",
                currency(premium),
                years,
                effective_rate * 100.0,
                currency(value),
                currency(total_premiums)
            ),
            figures,
            recommendation: "Illustrations are hypothetical; actual crediting varies with caps, participation rates and policy charges.".to_string(),
            completed_at: Utc::now(),
        })
    }
}

impl CalculatorEngine for StandardCalculatorEngine {
    fn compute(
        &self,
        kind: CalculatorKind,
        answers: &[(String, AnswerValue)],
    ) -> Result<CalculatorResult> {
        match kind {
            CalculatorKind::NeedsAssessment => Self::needs_assessment(answers),
            CalculatorKind::CashValueProjection => Self::cash_value_projection(answers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answers(pairs: &[(&str, AnswerValue)]) -> Vec<(String, AnswerValue)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_needs_assessment_gap() {
        let input = answers(&[
            ("age", AnswerValue::Number(40.0)),
            ("annual_income", AnswerValue::Number(80_000.0)),
            ("dependents", AnswerValue::Number(2.0)),
            ("outstanding_debt", AnswerValue::Number(200_000.0)),
            ("existing_coverage", AnswerValue::Number(250_000.0)),
            ("occupation", AnswerValue::Text("nurse".into())),
            ("primary_goal", AnswerValue::Choice("protection".into())),
        ]);
        let result = StandardCalculatorEngine
            .compute(CalculatorKind::NeedsAssessment, &input)
            .unwrap();

        // 800k + 200k + 100k + 15k
        assert_eq!(result.figures["total_need"], 1_115_000.0);
        assert_eq!(result.figures["coverage_gap"], 865_000.0);
        assert!(result.summary.contains("$865,000"));
        assert!(result.recommendation.starts_with("Term coverage"));
    }

    #[test]
    fn test_projection_single_year() {
        let input = answers(&[
            ("age", AnswerValue::Number(30.0)),
            ("annual_premium", AnswerValue::Number(10_000.0)),
            ("years", AnswerValue::Number(1.0)),
            ("assumed_rate", AnswerValue::Number(5.0)),
            ("risk_profile", AnswerValue::Choice("moderate".into())),
        ]);
        let result = StandardCalculatorEngine
            .compute(CalculatorKind::CashValueProjection, &input)
            .unwrap();

        assert!((result.figures["projected_cash_value"] - 9_660.0).abs() < 1e-6);
        assert_eq!(result.figures["total_premiums"], 10_000.0);
    }

    #[test]
    fn test_missing_answer_is_calculator_error() {
        let err = StandardCalculatorEngine
            .compute(CalculatorKind::NeedsAssessment, &[])
            .unwrap_err();
        assert_eq!(err.code(), "CALCULATOR_ERROR");
    }

    #[test]
    fn test_currency_grouping() {
        assert_eq!(currency(1_234_567.4), "$1,234,567");
        assert_eq!(currency(999.0), "$999");
        assert_eq!(currency(0.0), "$0");
    }
}
