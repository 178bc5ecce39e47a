//! Compliance disclaimers
//!
//! Fixed, content-triggered rule set applied to every turn before output.
//! Deterministic; never model-generated.

use crate::memory::vocabulary::normalize;
use serde::Serialize;
use tracing::info;

pub const INSURANCE_DISCLAIMER: &str = "Insurance products are subject to underwriting, policy terms and \
insurer claims-paying ability. This is general education, not a recommendation for a specific policy.";

pub const INVESTMENT_DISCLAIMER: &str = "Index-linked and investment returns are not guaranteed. Past \
index performance does not predict future crediting or returns.";

pub const TAX_DISCLAIMER: &str = "Tax treatment depends on your circumstances and current law. Consult a \
qualified tax professional before acting.";

/// Trait for disclaimer rules
pub trait DisclaimerRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Disclaimer to append when the turn triggers this rule
    fn check(&self, message: &str, response: &str) -> Option<&'static str>;
}

/// Rule fired by whole-word keyword matches in the message or the response
pub struct KeywordDisclaimerRule {
    name: &'static str,
    keywords: &'static [&'static str],
    disclaimer: &'static str,
}

impl KeywordDisclaimerRule {
    pub const fn new(
        name: &'static str,
        keywords: &'static [&'static str],
        disclaimer: &'static str,
    ) -> Self {
        Self {
            name,
            keywords,
            disclaimer,
        }
    }
}

impl DisclaimerRule for KeywordDisclaimerRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn check(&self, message: &str, response: &str) -> Option<&'static str> {
        let text = format!(" {} {} ", normalize(message), normalize(response));
        self.keywords
            .iter()
            .any(|kw| text.contains(&format!(" {} ", kw)))
            .then_some(self.disclaimer)
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ComplianceReport {
    pub disclaimers: Vec<String>,
    pub triggered_rules: Vec<String>,
}

pub struct ComplianceEngine {
    rules: Vec<Box<dyn DisclaimerRule>>,
}

impl ComplianceEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn DisclaimerRule>) {
        self.rules.push(rule);
    }

    /// Disclaimers in rule order, each rule at most once
    pub fn apply(&self, message: &str, response: &str) -> ComplianceReport {
        let mut report = ComplianceReport::default();
        for rule in &self.rules {
            if let Some(disclaimer) = rule.check(message, response) {
                if !report.disclaimers.iter().any(|d| d == disclaimer) {
                    report.disclaimers.push(disclaimer.to_string());
                }
                report.triggered_rules.push(rule.name().to_string());
            }
        }

        if !report.triggered_rules.is_empty() {
            info!(rules = ?report.triggered_rules, "Compliance disclaimers attached");
        }
        report
    }
}

impl Default for ComplianceEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a compliance engine with the standard insurance, investment and tax rules
pub fn create_default_compliance_engine() -> ComplianceEngine {
    let mut engine = ComplianceEngine::new();
    engine.add_rule(Box::new(KeywordDisclaimerRule::new(
        "insurance_product",
        &[
            "insurance", "iul", "indexed universal life", "universal life", "whole life", "term life",
            "annuity", "annuities", "policy", "policies", "premium", "premiums", "death benefit", "rider",
        ],
        INSURANCE_DISCLAIMER,
    )));
    engine.add_rule(Box::new(KeywordDisclaimerRule::new(
        "investment_returns",
        &[
            "return", "returns", "index", "indexed", "s p 500", "market", "crediting", "growth",
            "grow", "grows", "projection", "projected", "cap rate", "dividend", "dividends",
        ],
        INVESTMENT_DISCLAIMER,
    )));
    engine.add_rule(Box::new(KeywordDisclaimerRule::new(
        "tax_treatment",
        &["tax", "taxes", "taxable", "tax free", "deductible", "irs", "roth", "ira", "401 k"],
        TAX_DISCLAIMER,
    )));
    engine
}
