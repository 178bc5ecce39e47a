//! Tool hand-off registry
//!
//! Some requests are better served by a dedicated tool outside the chat
//! (full portfolio analysis, policy comparison, document analysis). The
//! router answers those with a structured pointer instead of content.

use crate::models::{FileContext, ToolHandoff};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const PORTFOLIO_ANALYZER: &str = "portfolio_analyzer";
pub const POLICY_COMPARISON: &str = "policy_comparison";
pub const DOCUMENT_ANALYZER: &str = "document_analyzer";

/// A hand-off target
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Lowercase phrases that select this tool
    fn keywords(&self) -> &'static [&'static str];
    fn handoff(&self, session_id: &str, file: Option<&FileContext>) -> ToolHandoff;
}

/// Tool whose hand-off is a fixed deep link and message
pub struct LinkTool {
    name: &'static str,
    description: &'static str,
    path: &'static str,
    keywords: &'static [&'static str],
}

impl LinkTool {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        path: &'static str,
        keywords: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            description,
            path,
            keywords,
        }
    }
}

impl Tool for LinkTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn keywords(&self) -> &'static [&'static str] {
        self.keywords
    }

    fn handoff(&self, session_id: &str, file: Option<&FileContext>) -> ToolHandoff {
        let mut message = format!("The {} can handle this in full: {}.", self.name.replace('_', " "), self.description);
        if let Some(file) = file {
            message.push_str(&format!(" Your file \"{}\" will be available there.", file.file_name));
        }
        ToolHandoff {
            tool_name: self.name.to_string(),
            deep_link: format!("{}?session={}", self.path, session_id),
            message,
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, used to break keyword ties
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    /// Best keyword match; an attached file prefers the document analyzer;
    /// anything else goes to the portfolio analyzer
    pub fn select(&self, message: &str, file: Option<&FileContext>) -> Option<Arc<dyn Tool>> {
        let lowered = message.to_lowercase();

        let mut best: Option<(usize, &String)> = None;
        for name in &self.order {
            let Some(tool) = self.tools.get(name) else { continue };
            let hits = tool.keywords().iter().filter(|kw| lowered.contains(**kw)).count();
            if hits > 0 && best.map_or(true, |(top, _)| hits > top) {
                best = Some((hits, name));
            }
        }

        let chosen = match best {
            Some((_, name)) => name.as_str(),
            None if file.is_some() && self.tools.contains_key(DOCUMENT_ANALYZER) => DOCUMENT_ANALYZER,
            None => PORTFOLIO_ANALYZER,
        };
        debug!(tool = chosen, "Tool selected for hand-off");
        self.get(chosen).or_else(|| self.order.first().and_then(|n| self.get(n)))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(LinkTool::new(
            PORTFOLIO_ANALYZER,
            "a complete review of your holdings, allocation and risk",
            "/tools/portfolio-analysis",
            &["portfolio", "holdings", "allocation", "rebalance", "investments"],
        )));
        registry.register(Arc::new(LinkTool::new(
            POLICY_COMPARISON,
            "a side-by-side comparison of policy quotes and illustrations",
            "/tools/policy-comparison",
            &["compare", "comparison", "quotes", "versus", " vs "],
        )));
        registry.register(Arc::new(LinkTool::new(
            DOCUMENT_ANALYZER,
            "a detailed analysis of your uploaded statements and documents",
            "/tools/file-analysis",
            &["file", "document", "statement", "upload", "csv", "pdf"],
        )));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry() {
        let registry = ToolRegistry::default();
        assert_eq!(
            registry.list(),
            vec![PORTFOLIO_ANALYZER, POLICY_COMPARISON, DOCUMENT_ANALYZER]
        );
    }

    #[test]
    fn test_keyword_selection() {
        let registry = ToolRegistry::default();
        let tool = registry.select("Can you compare these two policy quotes?", None).unwrap();
        assert_eq!(tool.name(), POLICY_COMPARISON);

        let tool = registry.select("analyze my portfolio allocation", None).unwrap();
        assert_eq!(tool.name(), PORTFOLIO_ANALYZER);
    }

    #[test]
    fn test_unknown_request_goes_to_portfolio_analyzer() {
        let registry = ToolRegistry::default();
        assert_eq!(registry.select("do the thing", None).unwrap().name(), PORTFOLIO_ANALYZER);
    }

    #[test]
    fn test_file_prefers_document_analyzer() {
        let registry = ToolRegistry::default();
        let file = FileContext {
            file_name: "illustration.pdf".into(),
            ..FileContext::default()
        };
        let tool = registry.select("what do you make of this?", Some(&file)).unwrap();
        assert_eq!(tool.name(), DOCUMENT_ANALYZER);

        let handoff = tool.handoff("s-1", Some(&file));
        assert_eq!(handoff.deep_link, "/tools/file-analysis?session=s-1");
        assert!(handoff.message.contains("illustration.pdf"));
    }
}
