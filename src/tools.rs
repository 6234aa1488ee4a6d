//! Tools the reasoning agent can call.
//!
//! A [`Tool`] is a name, a natural-language description the model reads to
//! decide when to call it, and a string-in/string-out invocation. The agent
//! receives a [`ToolRegistry`] per request and only ever refers to tools by
//! name.
//!
//! ```text
//! ┌───────────────────────────────┐
//! │          ToolRegistry         │
//! │  ┌─────────────────────────┐  │
//! │  │   KnowledgeSearchTool   │  │
//! │  │  (QueryEngine + user)   │  │
//! │  └─────────────────────────┘  │
//! └──────────────┬────────────────┘
//!                ▼
//!      ReasoningAgent::run()
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::query::QueryEngine;

/// A capability the reasoning agent can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier the model writes after `Action:`. Lowercase with
    /// underscores (e.g. `"knowledge_search"`).
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// Run the tool. Failures are reported in the returned text; the agent
    /// treats whatever comes back as an observation.
    async fn invoke(&self, input: &str) -> String;
}

/// Searches one user's documents through the [`QueryEngine`].
pub struct KnowledgeSearchTool {
    engine: Arc<QueryEngine>,
    user: String,
}

impl KnowledgeSearchTool {
    pub const NAME: &'static str = "knowledge_search";

    pub fn new(engine: Arc<QueryEngine>, user: impl Into<String>) -> Self {
        Self {
            engine,
            user: user.into(),
        }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Useful when you need to find information in the user's documents about \
         people, company information, or any other stored knowledge. \
         Input should be a complete question."
    }

    async fn invoke(&self, input: &str) -> String {
        debug!(user = %self.user, input, "knowledge_search invoked");
        self.engine.query(&self.user, input).await
    }
}

/// The tools available to one agent run.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty tool registry.
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding just the knowledge search tool for `user`.
    pub fn for_user(engine: Arc<QueryEngine>, user: &str) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(KnowledgeSearchTool::new(engine, user)));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    /// Find a tool by name.
    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Registered names, comma-separated, in registration order.
    pub fn names(&self) -> String {
        self.tools
            .iter()
            .map(|t| t.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercases its input"
        }
        async fn invoke(&self, input: &str) -> String {
            input.to_uppercase()
        }
    }

    #[tokio::test]
    async fn test_registry_find_and_invoke() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());
        registry.register(Box::new(UpperTool));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), "upper");
        let tool = registry.find("upper").unwrap();
        assert_eq!(tool.invoke("hi").await, "HI");
        assert!(registry.find("missing").is_none());
    }
}
