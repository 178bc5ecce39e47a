//! Domain vocabulary
//!
//! Lookup tables shared by memory, the classifier and the context analyzer:
//! recognised topics, sub-concepts, the topic → concept relation table,
//! deterministic conversation-management phrases, and the follow-up markers.
//! The built-in tables can be replaced wholesale from a JSON file.

use crate::error::OrchestrationError;
use crate::models::ManagementAction;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Extra words tolerated around a management phrase before it stops being a near-exact match
const MANAGEMENT_SLACK_WORDS: usize = 3;

/// Longest subject extracted by the noun-phrase fallback
const MAX_SUBJECT_WORDS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicEntry {
    pub label: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptEntry {
    pub label: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Cost,
    Benefit,
    Accumulation,
    Risk,
    Tax,
    Access,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedConcept {
    pub concept: String,
    pub relation: RelationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRelations {
    pub topic: String,
    pub related: Vec<RelatedConcept>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementPhrase {
    pub phrase: String,
    pub action: ManagementAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainVocabulary {
    /// Ordered most specific first; the first match wins
    pub topics: Vec<TopicEntry>,
    pub concepts: Vec<ConceptEntry>,
    pub relations: Vec<TopicRelations>,
    pub management_phrases: Vec<ManagementPhrase>,
    pub pronouns: Vec<String>,
    pub continuation_phrases: Vec<String>,
    pub stopwords: Vec<String>,
}

/// Lowercase, replace punctuation with spaces, collapse whitespace
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word phrase containment on already-normalized text
fn contains_phrase(normalized_text: &str, phrase: &str) -> bool {
    let phrase = normalize(phrase);
    if phrase.is_empty() {
        return false;
    }
    format!(" {} ", normalized_text).contains(&format!(" {} ", phrase))
}

impl DomainVocabulary {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let vocabulary: DomainVocabulary = serde_json::from_str(&raw)?;
        if vocabulary.topics.is_empty() {
            return Err(OrchestrationError::ConfigError(format!(
                "vocabulary file {} defines no topics",
                path.as_ref().display()
            )));
        }
        Ok(vocabulary)
    }

    /// First recognised topic mentioned in the text
    pub fn find_topic(&self, text: &str) -> Option<&str> {
        let normalized = normalize(text);
        self.topics
            .iter()
            .find(|entry| {
                contains_phrase(&normalized, &entry.label)
                    || entry.aliases.iter().any(|a| contains_phrase(&normalized, a))
            })
            .map(|entry| entry.label.as_str())
    }

    /// All recognised sub-concepts mentioned in the text, in table order
    pub fn find_concepts(&self, text: &str) -> Vec<&str> {
        let normalized = normalize(text);
        self.concepts
            .iter()
            .filter(|entry| {
                contains_phrase(&normalized, &entry.label)
                    || entry.aliases.iter().any(|a| contains_phrase(&normalized, a))
            })
            .map(|entry| entry.label.as_str())
            .collect()
    }

    pub fn relations_for(&self, topic: &str) -> &[RelatedConcept] {
        let key = normalize(topic);
        self.relations
            .iter()
            .find(|r| normalize(&r.topic) == key)
            .map(|r| r.related.as_slice())
            .unwrap_or(&[])
    }

    /// First concept in the text that the relation table links to the topic
    pub fn related_concept(&self, topic: &str, text: &str) -> Option<&RelatedConcept> {
        let mentioned = self.find_concepts(text);
        self.relations_for(topic)
            .iter()
            .find(|rel| mentioned.iter().any(|m| normalize(m) == normalize(&rel.concept)))
    }

    /// Near-exact match against the deterministic management phrase table.
    ///
    /// Longer phrases are tried first so "what did we just talk about" wins
    /// over "what did we talk about".
    pub fn match_management(&self, text: &str) -> Option<&ManagementPhrase> {
        let normalized = normalize(text);
        let word_count = normalized.split_whitespace().count();

        let mut candidates: Vec<&ManagementPhrase> = self.management_phrases.iter().collect();
        candidates.sort_by_key(|p| std::cmp::Reverse(normalize(&p.phrase).len()));

        candidates.into_iter().find(|p| {
            let phrase_words = normalize(&p.phrase).split_whitespace().count();
            contains_phrase(&normalized, &p.phrase)
                && word_count <= phrase_words + MANAGEMENT_SLACK_WORDS
        })
    }

    pub fn has_pronoun_reference(&self, text: &str) -> bool {
        let normalized = normalize(text);
        normalized
            .split_whitespace()
            .any(|w| self.pronouns.iter().any(|p| p == w))
    }

    pub fn continuation_phrase(&self, text: &str) -> Option<&str> {
        let normalized = normalize(text);
        self.continuation_phrases
            .iter()
            .find(|p| contains_phrase(&normalized, p))
            .map(|p| p.as_str())
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.iter().any(|s| s == word)
    }

    /// Content words of the text (normalized, stopwords removed)
    pub fn content_terms(&self, text: &str) -> Vec<String> {
        normalize(text)
            .split_whitespace()
            .filter(|w| w.len() > 1 && !self.is_stopword(w))
            .map(str::to_string)
            .collect()
    }

    /// First run of non-stopwords, used when no vocabulary topic matches
    pub fn fallback_subject(&self, text: &str) -> Option<String> {
        let normalized = normalize(text);
        let mut subject: Vec<&str> = Vec::new();

        for word in normalized.split_whitespace() {
            if self.is_stopword(word) || word.chars().all(|c| c.is_ascii_digit()) {
                if !subject.is_empty() {
                    break;
                }
                continue;
            }
            subject.push(word);
            if subject.len() == MAX_SUBJECT_WORDS {
                break;
            }
        }

        if subject.is_empty() {
            None
        } else {
            Some(subject.join(" "))
        }
    }

    /// Whether a document tag names the given topic (label or alias)
    pub fn tag_matches_topic(&self, tag: &str, topic: &str) -> bool {
        let tag = normalize(tag);
        let topic_key = normalize(topic);
        if tag == topic_key {
            return true;
        }
        self.topics
            .iter()
            .find(|entry| normalize(&entry.label) == topic_key)
            .map(|entry| entry.aliases.iter().any(|a| normalize(a) == tag))
            .unwrap_or(false)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationKind::Cost => "cost",
            RelationKind::Benefit => "benefit",
            RelationKind::Accumulation => "accumulation mechanism",
            RelationKind::Risk => "risk protection",
            RelationKind::Tax => "tax treatment",
            RelationKind::Access => "access to funds",
        };
        write!(f, "{}", s)
    }
}

//
// ================= Built-in tables =================
//

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn topic(label: &str, aliases: &[&str]) -> TopicEntry {
    TopicEntry {
        label: label.to_string(),
        aliases: strings(aliases),
    }
}

fn concept(label: &str, aliases: &[&str]) -> ConceptEntry {
    ConceptEntry {
        label: label.to_string(),
        aliases: strings(aliases),
    }
}

fn relations(topic: &str, related: &[(&str, RelationKind)]) -> TopicRelations {
    TopicRelations {
        topic: topic.to_string(),
        related: related
            .iter()
            .map(|(concept, relation)| RelatedConcept {
                concept: concept.to_string(),
                relation: *relation,
            })
            .collect(),
    }
}

fn phrases(action: ManagementAction, items: &[&str]) -> Vec<ManagementPhrase> {
    items
        .iter()
        .map(|p| ManagementPhrase {
            phrase: p.to_string(),
            action,
        })
        .collect()
}

impl Default for DomainVocabulary {
    fn default() -> Self {
        use RelationKind::*;

        let topics = vec![
            topic("IUL", &["iul", "indexed universal life", "index universal life", "indexed ul"]),
            topic("Variable Universal Life", &["variable universal life", "vul"]),
            topic("Universal Life", &["universal life", "ul policy"]),
            topic("Whole Life", &["whole life", "whole life insurance"]),
            topic("Term Life", &["term life", "term insurance", "term policy"]),
            topic("Infinite Banking", &["infinite banking", "be your own bank"]),
            topic("Long-Term Care", &["long term care", "ltc"]),
            topic("Annuities", &["annuity", "annuities", "fixed indexed annuity", "fia"]),
            topic("401(k)", &["401k", "401 k"]),
            topic("Roth IRA", &["roth ira", "roth"]),
            topic("Traditional IRA", &["traditional ira", "ira"]),
            topic("Estate Planning", &["estate planning", "estate plan", "inheritance", "living trust"]),
            topic("Retirement Planning", &["retirement planning", "retirement", "retire", "pension"]),
            topic("Life Insurance", &["life insurance", "life policy", "life insurance policy"]),
        ];

        let concepts = vec![
            concept("cash value", &["cash value", "cash accumulation", "cash surrender value"]),
            concept("growth", &["growth", "grow", "grows", "returns", "return", "crediting", "interest credit", "dividends"]),
            concept("premium", &["premium", "premiums", "cost", "costs", "price", "expensive", "afford"]),
            concept("fees", &["fee", "fees", "charges", "cost of insurance", "coi"]),
            concept("death benefit", &["death benefit", "payout", "beneficiary", "beneficiaries"]),
            concept("cap rate", &["cap", "caps", "cap rate", "participation rate"]),
            concept("floor", &["floor", "downside", "market loss", "losses"]),
            concept("policy loans", &["loan", "loans", "borrow", "borrowing", "policy loan"]),
            concept("tax", &["tax", "taxes", "tax free", "taxable", "tax advantaged"]),
            concept("living benefits", &["living benefit", "living benefits", "chronic illness", "critical illness"]),
            concept("surrender charges", &["surrender", "surrender charge", "surrender charges"]),
            concept("income", &["income", "retirement income", "withdrawal", "withdrawals"]),
            concept("index", &["index", "indexes", "s p 500", "market index"]),
            concept("contribution limits", &["contribution limit", "contribution limits", "max contribution"]),
            concept("employer match", &["employer match", "matching"]),
        ];

        let relations = vec![
            relations(
                "IUL",
                &[
                    ("cash value", Accumulation),
                    ("growth", Accumulation),
                    ("index", Accumulation),
                    ("cap rate", Accumulation),
                    ("floor", Risk),
                    ("premium", Cost),
                    ("fees", Cost),
                    ("surrender charges", Cost),
                    ("death benefit", Benefit),
                    ("living benefits", Benefit),
                    ("policy loans", Access),
                    ("income", Access),
                    ("tax", Tax),
                ],
            ),
            relations(
                "Whole Life",
                &[
                    ("cash value", Accumulation),
                    ("growth", Accumulation),
                    ("premium", Cost),
                    ("fees", Cost),
                    ("death benefit", Benefit),
                    ("policy loans", Access),
                    ("tax", Tax),
                ],
            ),
            relations(
                "Universal Life",
                &[
                    ("cash value", Accumulation),
                    ("premium", Cost),
                    ("fees", Cost),
                    ("death benefit", Benefit),
                    ("policy loans", Access),
                ],
            ),
            relations(
                "Variable Universal Life",
                &[
                    ("cash value", Accumulation),
                    ("growth", Accumulation),
                    ("floor", Risk),
                    ("fees", Cost),
                    ("death benefit", Benefit),
                ],
            ),
            relations(
                "Term Life",
                &[("premium", Cost), ("death benefit", Benefit), ("living benefits", Benefit)],
            ),
            relations(
                "Annuities",
                &[
                    ("income", Access),
                    ("growth", Accumulation),
                    ("index", Accumulation),
                    ("floor", Risk),
                    ("fees", Cost),
                    ("surrender charges", Cost),
                    ("tax", Tax),
                ],
            ),
            relations(
                "401(k)",
                &[
                    ("employer match", Benefit),
                    ("contribution limits", Cost),
                    ("growth", Accumulation),
                    ("fees", Cost),
                    ("income", Access),
                    ("tax", Tax),
                ],
            ),
            relations(
                "Roth IRA",
                &[
                    ("contribution limits", Cost),
                    ("growth", Accumulation),
                    ("income", Access),
                    ("tax", Tax),
                ],
            ),
            relations(
                "Retirement Planning",
                &[("income", Access), ("growth", Accumulation), ("tax", Tax)],
            ),
            relations(
                "Life Insurance",
                &[
                    ("premium", Cost),
                    ("death benefit", Benefit),
                    ("cash value", Accumulation),
                    ("living benefits", Benefit),
                ],
            ),
        ];

        let mut management_phrases = Vec::new();
        management_phrases.extend(phrases(
            ManagementAction::RecallTopic,
            &[
                "what did we just talk about",
                "what did we talk about",
                "what did we just discuss",
                "what were we talking about",
                "what were we discussing",
                "what was the last topic",
                "remind me what we discussed",
            ],
        ));
        management_phrases.extend(phrases(
            ManagementAction::SummarizeConversation,
            &[
                "summarize our conversation",
                "summarise our conversation",
                "summarize the conversation",
                "give me a summary of our conversation",
                "recap our conversation",
                "what have we covered",
                "what have we discussed",
                "conversation summary",
                "recap",
            ],
        ));
        management_phrases.extend(phrases(
            ManagementAction::ConversationStats,
            &[
                "how long have we been talking",
                "how many questions have i asked",
                "how many messages",
                "conversation stats",
            ],
        ));
        management_phrases.extend(phrases(
            ManagementAction::CancelCalculator,
            &[
                "cancel calculator",
                "cancel the calculator",
                "stop calculator",
                "stop the calculator",
                "exit calculator",
                "exit the calculator",
                "quit calculator",
                "quit the calculator",
            ],
        ));
        management_phrases.extend(phrases(
            ManagementAction::RestartCalculator,
            &[
                "restart calculator",
                "restart the calculator",
                "start the calculator over",
                "start calculator over",
            ],
        ));
        management_phrases.extend(phrases(
            ManagementAction::ResetConversation,
            &[
                "reset conversation",
                "reset our conversation",
                "reset the conversation",
                "clear conversation",
                "clear our conversation",
                "forget everything",
                "new conversation",
                "start over",
            ],
        ));

        Self {
            topics,
            concepts,
            relations,
            management_phrases,
            pronouns: strings(&["it", "its", "that", "this", "they", "them", "those", "these"]),
            continuation_phrases: strings(&[
                "tell me more",
                "go deeper",
                "dig deeper",
                "more detail",
                "more details",
                "what about",
                "how about",
                "and what",
                "elaborate",
                "expand on",
                "explain further",
                "what else",
                "keep going",
            ]),
            stopwords: strings(&[
                "a", "about", "after", "all", "also", "am", "an", "and", "any", "are", "as", "at",
                "be", "been", "before", "being", "but", "by", "can", "could", "dear", "did", "do",
                "does", "doing", "explain", "for", "from", "get", "give", "good", "had", "has",
                "have", "hello", "help", "hey", "hi", "how", "i", "if", "in", "into", "is", "it",
                "its", "just", "know", "learn", "let", "like", "me", "more", "much", "my", "need",
                "no", "not", "now", "of", "on", "or", "our", "please", "really", "s", "should",
                "show", "so", "some", "tell", "than", "thank", "thanks", "that", "the", "their",
                "them", "then", "there", "these", "they", "this", "those", "to", "understand",
                "up", "us", "want", "was", "we", "were", "what", "when", "where", "which", "while",
                "who", "why", "will", "with", "work", "works", "would", "yes", "you", "your",
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  What's   an IUL?? "), "what s an iul");
        assert_eq!(normalize("401(k)"), "401 k");
    }

    #[test]
    fn test_find_topic_prefers_specific_entries() {
        let vocab = DomainVocabulary::default();
        assert_eq!(vocab.find_topic("Tell me about IUL"), Some("IUL"));
        assert_eq!(
            vocab.find_topic("how does indexed universal life compare"),
            Some("IUL")
        );
        assert_eq!(vocab.find_topic("is universal life any good"), Some("Universal Life"));
        assert_eq!(vocab.find_topic("my 401(k) plan"), Some("401(k)"));
        assert_eq!(vocab.find_topic("how does the cash value work?"), None);
    }

    #[test]
    fn test_topic_alias_needs_whole_word() {
        let vocab = DomainVocabulary::default();
        // "fiat" must not match the "fia" alias
        assert_eq!(vocab.find_topic("fiat currency"), None);
    }

    #[test]
    fn test_related_concept_uses_relation_table() {
        let vocab = DomainVocabulary::default();
        let rel = vocab
            .related_concept("IUL", "how does the cash value work?")
            .unwrap();
        assert_eq!(rel.concept, "cash value");
        assert_eq!(rel.relation, RelationKind::Accumulation);

        assert!(vocab.related_concept("Term Life", "what about cash value?").is_none());
    }

    #[test]
    fn test_management_near_exact_match() {
        let vocab = DomainVocabulary::default();
        let hit = vocab.match_management("What did we just talk about?").unwrap();
        assert_eq!(hit.action, ManagementAction::RecallTopic);
        assert_eq!(hit.phrase, "what did we just talk about");

        let hit = vocab.match_management("can you summarize our conversation please").unwrap();
        assert_eq!(hit.action, ManagementAction::SummarizeConversation);

        // Too much surrounding text to be a management request
        assert!(vocab
            .match_management("recap the tax rules for indexed universal life policies")
            .is_none());
    }

    #[test]
    fn test_fallback_subject() {
        let vocab = DomainVocabulary::default();
        assert_eq!(
            vocab.fallback_subject("Tell me about dividend stocks"),
            Some("dividend stocks".to_string())
        );
        assert_eq!(
            vocab.fallback_subject("how does the cash value work?"),
            Some("cash value".to_string())
        );
        assert_eq!(vocab.fallback_subject("what is it?"), None);
    }

    #[test]
    fn test_tag_matches_topic_through_aliases() {
        let vocab = DomainVocabulary::default();
        assert!(vocab.tag_matches_topic("iul", "IUL"));
        assert!(vocab.tag_matches_topic("indexed universal life", "IUL"));
        assert!(!vocab.tag_matches_topic("whole life", "IUL"));
    }

    #[test]
    fn test_vocabulary_round_trips_through_json_file() {
        let path = std::env::temp_dir().join(format!("vocab-{}.json", uuid::Uuid::new_v4()));
        let vocab = DomainVocabulary::default();
        std::fs::write(&path, serde_json::to_string(&vocab).unwrap()).unwrap();

        let loaded = DomainVocabulary::from_json_file(&path).unwrap();
        assert_eq!(loaded.topics.len(), vocab.topics.len());
        std::fs::remove_file(path).ok();
    }
}
