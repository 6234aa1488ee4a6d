//! Entry points for a chat front end, and the fallback ladder behind `ask`.
//!
//! ```text
//! ask(question, user)
//!   ├─ agent available?  ReasoningAgent::run ──ok──► answer
//!   │                        │ err
//!   ▼                        ▼
//!   QueryEngine::try_query ─────────────────ok──► answer
//!   │ err
//!   ▼
//!   APOLOGY
//! ```
//!
//! Whatever tier answers, the exchange is appended to the user's history.
//! Document uploads and deletes rebuild the owner's index before returning.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::agent::ReasoningAgent;
use crate::config::Config;
use crate::documents::DocumentStore;
use crate::embedding::{create_provider, DisabledProvider, EmbeddingProvider};
use crate::error::Result;
use crate::history::HistoryStore;
use crate::index::IndexMetadata;
use crate::index_manager::IndexManager;
use crate::llm::{create_language_model, DisabledModel, LanguageModel};
use crate::models::{ChatReply, DocumentInfo, HistoryEntry};
use crate::query::QueryEngine;
use crate::tools::ToolRegistry;

/// Returned when neither the agent nor direct retrieval produced an answer.
pub const APOLOGY: &str =
    "I'm sorry, I couldn't find an answer to your question right now. Please try again later.";

pub struct Assistant {
    documents: Arc<DocumentStore>,
    indexes: Arc<IndexManager>,
    engine: Arc<QueryEngine>,
    agent: Option<ReasoningAgent>,
    history: HistoryStore,
}

impl Assistant {
    /// Wire up the assistant around the given services.
    ///
    /// If the reasoning agent cannot be constructed, every `ask` for the
    /// lifetime of this value goes straight to direct retrieval.
    pub async fn new(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let documents = Arc::new(DocumentStore::new(
            config.storage.uploads_dir.clone(),
            &config.chunking.include_globs,
        )?);
        let indexes = Arc::new(IndexManager::new(
            config,
            documents.clone(),
            embedder.clone(),
        ));
        let engine = Arc::new(QueryEngine::new(
            config,
            indexes.clone(),
            embedder,
            llm.clone(),
        ));

        let agent = match ReasoningAgent::new(config, llm).await {
            Ok(agent) => Some(agent),
            Err(e) => {
                warn!(error = %e, "Reasoning agent unavailable, answering with direct retrieval");
                None
            }
        };

        Ok(Self {
            documents,
            indexes,
            engine,
            agent,
            history: HistoryStore::new(config.storage.history_dir.clone()),
        })
    }

    /// Build the configured providers and wire up the assistant. A provider
    /// that cannot be created is replaced by its disabled stand-in.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> = match create_provider(&config.embedding) {
            Ok(provider) => Arc::from(provider),
            Err(e) => {
                warn!(error = %e, "Embedding provider unavailable");
                Arc::new(DisabledProvider)
            }
        };
        let llm: Arc<dyn LanguageModel> = match create_language_model(&config.llm) {
            Ok(model) => Arc::from(model),
            Err(e) => {
                warn!(error = %e, "Language model unavailable");
                Arc::new(DisabledModel)
            }
        };
        Self::new(config, embedder, llm).await
    }

    /// Whether `ask` will try the reasoning agent first.
    pub fn agent_available(&self) -> bool {
        self.agent.is_some()
    }

    /// Answer `question` for `user`. Never fails.
    pub async fn ask(&self, question: &str, user: &str) -> ChatReply {
        let answer = self.answer(question, user).await;
        let entry = self.history.append(user, question, &answer).await;
        ChatReply {
            response: entry.answer,
            timestamp: entry.timestamp,
        }
    }

    async fn answer(&self, question: &str, user: &str) -> String {
        if let Some(agent) = &self.agent {
            let tools = ToolRegistry::for_user(self.engine.clone(), user);
            match agent.run(question, &tools).await {
                Ok(run) => return run.answer,
                Err(e) => {
                    warn!(user, error = %e, "Agent failed, falling back to direct retrieval")
                }
            }
        }

        match self.engine.try_query(user, question).await {
            Ok(answer) => answer,
            Err(e) => {
                error!(user, error = %e, "Direct retrieval failed, returning apology");
                APOLOGY.to_string()
            }
        }
    }

    pub async fn get_history(&self, user: &str) -> Vec<HistoryEntry> {
        self.history.get(user).await
    }

    pub async fn clear_history(&self, user: &str) -> Result<()> {
        self.history.clear(user).await
    }

    /// Rebuild `user`'s index from their current documents.
    pub async fn rebuild_index(&self, user: &str) -> IndexMetadata {
        let started = Utc::now();
        let index = self.indexes.rebuild(user).await;
        info!(
            user,
            kind = ?index.kind(),
            chunks = index.len(),
            elapsed_ms = (Utc::now() - started).num_milliseconds(),
            "Index rebuilt"
        );
        index.metadata().clone()
    }

    /// Store a file for `user` and rebuild their index.
    pub async fn upload_document(
        &self,
        user: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<DocumentInfo> {
        let info = self.documents.save(user, filename, bytes).await?;
        self.rebuild_index(user).await;
        Ok(info)
    }

    /// Remove a file from `user`'s documents and rebuild their index.
    /// A missing file is [`Error::NotFound`](crate::error::Error::NotFound).
    pub async fn delete_document(&self, user: &str, filename: &str) -> Result<()> {
        self.documents.delete(user, filename).await?;
        self.rebuild_index(user).await;
        Ok(())
    }

    pub async fn list_documents(&self, user: &str) -> Result<Vec<DocumentInfo>> {
        self.documents.list(user).await
    }
}
