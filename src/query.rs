//! Query engine: top-k retrieval plus one compact synthesis call.
//!
//! "Compact" means the retrieved chunks are concatenated into a single
//! context block and the language model is called once, not once per chunk.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::index::{IndexKind, VectorIndex};
use crate::index_manager::IndexManager;
use crate::llm::{complete_with_timeout, CompletionRequest, LanguageModel};
use crate::models::ScoredChunk;

const SYSTEM_PROMPT: &str = "You are an expert Q&A system. Answer using only the provided \
context. If the context does not contain the answer, say so. Keep the answer short.";

/// Leads the answer when the language model could not summarise the hits.
pub const PASSAGES_PREAMBLE: &str = "I could not summarise an answer right now. \
These passages from your documents look most relevant:";

pub struct QueryEngine {
    indexes: Arc<IndexManager>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LanguageModel>,
    top_k: usize,
    temperature: f32,
    timeout_secs: u64,
}

impl QueryEngine {
    pub fn new(
        config: &Config,
        indexes: Arc<IndexManager>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            indexes,
            embedder,
            llm,
            top_k: config.retrieval.top_k,
            temperature: config.llm.temperature,
            timeout_secs: config.llm.timeout_secs,
        }
    }

    /// Answer `question` from `user`'s documents. Failures come back as
    /// answer text.
    pub async fn query(&self, user: &str, question: &str) -> String {
        match self.try_query(user, question).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(user, error = %e, "Query failed");
                format!("I encountered an error while searching for information: {}", e)
            }
        }
    }

    /// Like [`query`](Self::query), but failures are returned as errors.
    ///
    /// A user without documents gets the placeholder text back directly,
    /// without calling either service. If retrieval succeeds but the
    /// language model does not answer, the retrieved passages are returned
    /// verbatim. Only retrieval failures are errors.
    pub async fn try_query(&self, user: &str, question: &str) -> Result<String> {
        let index = self.indexes.get_or_load(user).await;
        if index.kind() == IndexKind::Empty {
            return Ok(placeholder_text(&index));
        }

        let hits = self.search(&index, question).await?;
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: synthesis_prompt(&hits, question),
            temperature: self.temperature,
            stop: Vec::new(),
        };

        match complete_with_timeout(self.llm.as_ref(), &request, self.timeout_secs).await {
            Ok(answer) => Ok(answer.trim().to_string()),
            Err(e) => {
                warn!(user, error = %e, "Synthesis failed, answering with retrieved passages");
                passages_answer(&hits)
            }
        }
    }

    /// The `top_k` chunks of `user`'s index most similar to `question`.
    pub async fn retrieve(&self, user: &str, question: &str) -> Result<Vec<ScoredChunk>> {
        let index = self.indexes.get_or_load(user).await;
        self.search(&index, question).await
    }

    async fn search(&self, index: &VectorIndex, question: &str) -> Result<Vec<ScoredChunk>> {
        if index.kind() == IndexKind::Degraded {
            return Err(Error::IndexBuild(placeholder_text(index)));
        }

        let query_vec = embed_query(self.embedder.as_ref(), question)
            .await
            .map_err(|e| Error::Retrieval(format!("embedding the question: {}", e)))?;
        let hits = index.search(&query_vec, self.top_k);
        debug!(
            owner = %index.metadata().owner,
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score).unwrap_or(0.0),
            "Retrieved chunks"
        );
        Ok(hits)
    }
}

fn placeholder_text(index: &VectorIndex) -> String {
    index
        .chunks()
        .next()
        .map(|c| c.text.clone())
        .unwrap_or_default()
}

fn passages_answer(hits: &[ScoredChunk]) -> Result<String> {
    if hits.is_empty() {
        return Err(Error::Retrieval("no passages retrieved".to_string()));
    }
    Ok(format!("{}\n\n{}", PASSAGES_PREAMBLE, format_passages(hits)))
}

fn format_passages(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|h| format!("[{}]\n{}", h.chunk.document_id, h.chunk.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn synthesis_prompt(hits: &[ScoredChunk], question: &str) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {}\n\
         Answer:",
        format_passages(hits),
        question
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::DocumentStore;
    use crate::embedding::HashingProvider;
    use crate::index_manager::EMPTY_INDEX_TEXT;
    use crate::llm::DisabledModel;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Echoes the prompt back so tests can see what context was retrieved.
    struct EchoModel {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            *self.calls.lock().unwrap() += 1;
            Ok(request.prompt.clone())
        }
    }

    async fn engine(tmp: &TempDir, llm: Arc<dyn LanguageModel>) -> QueryEngine {
        let config = Config::with_root(tmp.path());
        let store = DocumentStore::new(
            config.storage.uploads_dir.clone(),
            &config.chunking.include_globs,
        )
        .unwrap();
        store
            .save("alice", "people.md", b"Sarah Johnson is the CEO of Acme.")
            .await
            .unwrap();
        store
            .save("alice", "office.md", b"The Acme office is in Denver.")
            .await
            .unwrap();

        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingProvider::new(128));
        let indexes = Arc::new(IndexManager::new(&config, Arc::new(store), embedder.clone()));
        QueryEngine::new(&config, indexes, embedder, llm)
    }

    #[tokio::test]
    async fn test_single_compact_synthesis_call() {
        let tmp = TempDir::new().unwrap();
        let llm = Arc::new(EchoModel {
            calls: Mutex::new(0),
        });
        let engine = engine(&tmp, llm.clone()).await;

        let answer = engine.query("alice", "Who is the CEO?").await;
        assert!(answer.contains("Sarah Johnson is the CEO"));
        assert!(answer.contains("Query: Who is the CEO?"));
        assert_eq!(*llm.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_respects_top_k() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, Arc::new(DisabledModel)).await;
        let hits = engine.retrieve("alice", "Who is the CEO?").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.document_id, "people.md");
    }

    #[tokio::test]
    async fn test_empty_store_returns_placeholder() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, Arc::new(DisabledModel)).await;
        let answer = engine.try_query("newcomer", "anything").await.unwrap();
        assert_eq!(answer, EMPTY_INDEX_TEXT);
    }

    #[tokio::test]
    async fn test_synthesis_failure_returns_passages() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, Arc::new(DisabledModel)).await;

        let answer = engine.try_query("alice", "Who is the CEO?").await.unwrap();
        assert!(answer.starts_with(PASSAGES_PREAMBLE));
        assert!(answer.contains("[people.md]\nSarah Johnson is the CEO of Acme."));
    }

    #[tokio::test]
    async fn test_retrieval_failure_becomes_text() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, Arc::new(DisabledModel)).await;

        // An unusable username cannot be indexed, so retrieval fails.
        assert!(matches!(
            engine.try_query("../alice", "Who is the CEO?").await,
            Err(Error::IndexBuild(_))
        ));
        let answer = engine.query("../alice", "Who is the CEO?").await;
        assert!(answer.starts_with("I encountered an error while searching for information"));
    }
}
