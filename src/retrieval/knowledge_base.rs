//! In-process knowledge base
//!
//! Lexical search over a fixed passage set. Stands in for a vector store in
//! development and tests; the seeded corpus covers the built-in topics.

use super::{lexical_similarity, RetrievalBackend};
use crate::memory::DomainVocabulary;
use crate::models::RetrievedDocument;
use crate::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

pub struct InMemoryKnowledgeBase {
    documents: Vec<RetrievedDocument>,
    vocabulary: Arc<DomainVocabulary>,
}

fn doc(id: &str, tags: &[&str], text: &str) -> RetrievedDocument {
    RetrievedDocument::new(id, text, format!("kb/{}", id.trim_start_matches("kb-"))).with_tags(tags)
}

impl InMemoryKnowledgeBase {
    pub fn new(documents: Vec<RetrievedDocument>) -> Self {
        Self {
            documents,
            vocabulary: Arc::new(DomainVocabulary::default()),
        }
    }

    pub fn with_vocabulary(mut self, vocabulary: Arc<DomainVocabulary>) -> Self {
        self.vocabulary = vocabulary;
        self
    }

    /// Load passages from a JSON array of `RetrievedDocument`
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let documents: Vec<RetrievedDocument> = serde_json::from_str(&raw)?;
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn with_default_corpus() -> Self {
        let mut documents = vec![
            doc(
                "kb-iul-overview",
                &["IUL", "life insurance"],
                "An indexed universal life (IUL) policy is permanent life insurance whose cash value is credited based on the performance of a market index, subject to a cap and a floor.",
            ),
            doc(
                "kb-iul-cash-value",
                &["IUL", "cash value", "growth"],
                "In an IUL, the cash value grows from the portion of each premium left after policy charges, and is credited interest linked to an index such as the S&P 500 without being invested directly in the market.",
            ),
            doc(
                "kb-iul-caps-floors",
                &["IUL", "cap rate", "floor", "index"],
                "IUL crediting uses a cap rate that limits upside and a floor, often 0%, that prevents index losses from reducing credited interest. Participation rates set the share of index gains that is credited.",
            ),
            doc(
                "kb-iul-costs",
                &["IUL", "premium", "fees", "surrender charges"],
                "IUL costs include the cost of insurance, administrative fees and surrender charges in the early policy years. Premiums are flexible within limits, but underfunding can cause the policy to lapse.",
            ),
            doc(
                "kb-iul-loans",
                &["IUL", "policy loans", "income", "tax"],
                "Policyholders can borrow against IUL cash value through policy loans, which are generally not taxable while the policy stays in force, making them a common source of supplemental retirement income.",
            ),
            doc(
                "kb-iul-death-benefit",
                &["IUL", "death benefit", "living benefits"],
                "An IUL pays an income-tax-free death benefit to beneficiaries, and many policies include living benefit riders for chronic or critical illness.",
            ),
            doc(
                "kb-cash-value-basics",
                &["cash value"],
                "Cash value is the savings component of a permanent life insurance policy. It accumulates over time and can be accessed through withdrawals or loans.",
            ),
            doc(
                "kb-whole-life-cash-value",
                &["Whole Life", "cash value", "growth"],
                "Whole life insurance builds cash value at a guaranteed rate, and participating policies may also pay dividends that increase the cash value.",
            ),
            doc(
                "kb-whole-life-premiums",
                &["Whole Life", "premium"],
                "Whole life premiums are fixed for life and are higher than term premiums for the same death benefit because part of each premium funds the cash value.",
            ),
            doc(
                "kb-term-life",
                &["Term Life", "premium", "death benefit"],
                "Term life insurance provides a death benefit for a set period such as 20 or 30 years. It has no cash value, which keeps premiums low.",
            ),
            doc(
                "kb-annuities",
                &["Annuities", "income", "surrender charges"],
                "An annuity converts a lump sum or series of payments into guaranteed income. Fixed indexed annuities credit interest based on an index and typically carry surrender charges for early withdrawals.",
            ),
            doc(
                "kb-401k",
                &["401(k)", "employer match", "contribution limits", "tax"],
                "A 401(k) lets employees contribute pre-tax salary to retirement savings, often with an employer match. Annual contribution limits are set by the IRS.",
            ),
            doc(
                "kb-roth-ira",
                &["Roth IRA", "tax", "income"],
                "A Roth IRA is funded with after-tax contributions; qualified withdrawals in retirement, including growth, are tax free. Income limits restrict who can contribute directly.",
            ),
            doc(
                "kb-traditional-ira",
                &["Traditional IRA", "tax"],
                "Contributions to a traditional IRA may be tax deductible, and withdrawals in retirement are taxed as ordinary income. Required minimum distributions begin in your seventies.",
            ),
            doc(
                "kb-retirement-income",
                &["Retirement Planning", "income"],
                "Retirement planning balances savings rate, investment growth and withdrawal strategy so that income lasts through retirement. Social Security, pensions and annuities can provide guaranteed income floors.",
            ),
            doc(
                "kb-long-term-care",
                &["Long-Term Care", "living benefits"],
                "Long-term care insurance covers extended care costs such as nursing homes or in-home care. Hybrid life policies can provide long-term care benefits through accelerated death benefit riders.",
            ),
            doc(
                "kb-estate-planning",
                &["Estate Planning", "death benefit", "tax"],
                "Estate planning arranges how assets pass to heirs. Life insurance death benefits can provide liquidity to pay estate taxes, and trusts can keep proceeds out of the taxable estate.",
            ),
            doc(
                "kb-infinite-banking",
                &["Infinite Banking", "policy loans", "cash value"],
                "Infinite banking is a strategy of overfunding a dividend-paying whole life policy and borrowing against its cash value instead of using bank loans.",
            ),
        ];

        // Newer guidance on IUL illustrations supersedes older material
        if let Some(d) = documents.iter_mut().find(|d| d.id == "kb-iul-caps-floors") {
            d.published_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single();
        }

        Self::new(documents)
    }
}

#[async_trait]
impl RetrievalBackend for InMemoryKnowledgeBase {
    fn name(&self) -> &str {
        "in_memory_kb"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<RetrievedDocument>> {
        let mut hits: Vec<(f32, &RetrievedDocument)> = self
            .documents
            .iter()
            .map(|d| (lexical_similarity(&self.vocabulary, query, d), d))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        hits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        Ok(hits
            .into_iter()
            .take(limit)
            .map(|(score, d)| {
                let mut document = d.clone();
                document.similarity = Some(score);
                document
            })
            .collect())
    }
}
