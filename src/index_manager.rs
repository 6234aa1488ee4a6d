//! Retrieval index manager: exactly one [`VectorIndex`] per user.
//!
//! Readers take an `Arc` snapshot from [`IndexManager::get_or_load`]. A
//! rebuild assembles a complete new index off to the side and only then
//! swaps it into the cache, so a query already in flight keeps the index it
//! started with and nobody ever sees a half-built one. Builds for the same
//! user are serialized; different users never wait on each other.
//!
//! # Failure policy
//!
//! [`IndexManager::build`] never fails. A user with no documents gets a
//! one-chunk [`IndexKind::Empty`] index explaining that, and any embedding
//! or I/O failure yields a one-chunk [`IndexKind::Degraded`] index
//! describing the failure. Degraded indexes are cached in memory only and
//! the next [`get_or_load`](IndexManager::get_or_load) tries again.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config};
use crate::documents::{validate_component, DocumentStore};
use crate::embedding::{embed_batched, embed_query, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::index::{IndexKind, LoadOutcome, VectorIndex, STORE_FILE};
use crate::models::Chunk;

/// Indexed for a user who has not uploaded anything yet.
pub const EMPTY_INDEX_TEXT: &str =
    "No documents available yet. Please upload documents to get started.";

pub struct IndexManager {
    documents: Arc<DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    index_dir: PathBuf,
    chunking: ChunkingConfig,
    batch_size: usize,
    cache: RwLock<HashMap<String, Arc<VectorIndex>>>,
    build_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IndexManager {
    pub fn new(
        config: &Config,
        documents: Arc<DocumentStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            documents,
            embedder,
            index_dir: config.storage.index_dir.clone(),
            chunking: config.chunking.clone(),
            batch_size: config.embedding.batch_size,
            cache: RwLock::new(HashMap::new()),
            build_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding `user`'s persisted index.
    pub fn index_path(&self, user: &str) -> Result<PathBuf> {
        validate_component("username", user)?;
        Ok(self.index_dir.join(user))
    }

    /// Build `user`'s index from their current documents and persist it.
    ///
    /// Does not touch the cache; see [`rebuild`](Self::rebuild).
    pub async fn build(&self, user: &str) -> Arc<VectorIndex> {
        match self.try_build(user).await {
            Ok(index) => Arc::new(index),
            Err(e) => {
                warn!(user, error = %e, "Index build failed, substituting placeholder");
                // A stale index on disk must not be picked up after a restart.
                if let Ok(dir) = self.index_path(user) {
                    match tokio::fs::remove_file(dir.join(STORE_FILE)).await {
                        Ok(()) => debug!(user, "Removed stale persisted index"),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            warn!(user, error = %e, "Could not remove stale persisted index")
                        }
                    }
                }
                let text = format!(
                    "The knowledge base could not be built for this user. {}",
                    e
                );
                Arc::new(VectorIndex::placeholder(
                    user,
                    IndexKind::Degraded,
                    self.embedder.model_name(),
                    self.embedder.dims(),
                    &text,
                    None,
                ))
            }
        }
    }

    async fn try_build(&self, user: &str) -> Result<VectorIndex> {
        let dir = self.index_path(user)?;
        let docs = self
            .documents
            .load_all(user)
            .await
            .map_err(|e| Error::IndexBuild(format!("reading documents: {}", e)))?;

        let chunks: Vec<Chunk> = docs
            .iter()
            .flat_map(|d| {
                chunk_text(
                    &d.id,
                    &d.text,
                    self.chunking.max_tokens,
                    self.chunking.overlap_tokens,
                )
            })
            .collect();

        let model = self.embedder.model_name();
        let dims = self.embedder.dims();

        let index = if chunks.is_empty() {
            info!(user, "No documents, indexing placeholder");
            let vector = embed_query(self.embedder.as_ref(), EMPTY_INDEX_TEXT).await.ok();
            VectorIndex::placeholder(user, IndexKind::Empty, model, dims, EMPTY_INDEX_TEXT, vector)
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
                .await
                .map_err(|e| Error::IndexBuild(format!("embedding {} chunks: {}", texts.len(), e)))?;
            VectorIndex::new(
                user,
                IndexKind::Documents,
                model,
                dims,
                docs.len(),
                chunks,
                vectors,
            )
        };

        let index = tokio::task::spawn_blocking(move || index.persist(&dir).map(|()| index))
            .await
            .map_err(|e| Error::IndexBuild(format!("persist task failed: {}", e)))?
            .map_err(|e| Error::IndexBuild(format!("persisting index: {}", e)))?;

        info!(
            user,
            documents = index.metadata().document_count,
            chunks = index.len(),
            "Index built"
        );
        Ok(index)
    }

    /// Read `user`'s persisted index.
    ///
    /// Missing files, corrupt files, and indexes embedded with a different
    /// model or dimension all come back as `None`.
    pub async fn load(&self, user: &str) -> Option<Arc<VectorIndex>> {
        let dir = self.index_path(user).ok()?;
        let outcome = match tokio::task::spawn_blocking(move || VectorIndex::load(&dir)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(user, error = %e, "Index load task failed");
                return None;
            }
        };

        match outcome {
            LoadOutcome::Loaded(index) => {
                let meta = index.metadata();
                if meta.owner != user {
                    warn!(user, owner = %meta.owner, "Persisted index belongs to another user, ignoring");
                    return None;
                }
                if meta.model != self.embedder.model_name() || meta.dims != self.embedder.dims() {
                    info!(
                        user,
                        model = %meta.model,
                        dims = meta.dims,
                        "Persisted index was built with a different embedding model"
                    );
                    return None;
                }
                if index.is_empty() {
                    warn!(user, "Persisted index has no chunks, ignoring");
                    return None;
                }
                debug!(user, chunks = index.len(), "Loaded persisted index");
                Some(Arc::new(index))
            }
            LoadOutcome::Absent => {
                debug!(user, "No persisted index");
                None
            }
            LoadOutcome::Corrupt(reason) => {
                warn!(user, %reason, "Persisted index is corrupt, ignoring");
                None
            }
        }
    }

    /// Build `user`'s index unconditionally and swap it in. Called after
    /// every document upload or delete.
    pub async fn rebuild(&self, user: &str) -> Arc<VectorIndex> {
        let lock = self.build_lock(user).await;
        let _guard = lock.lock().await;

        let index = self.build(user).await;
        self.install(user, index.clone()).await;
        index
    }

    /// The index to query for `user`: the cached one, else the persisted
    /// one, else a fresh build. A build that comes back degraded is
    /// retried once before the placeholder is installed.
    pub async fn get_or_load(&self, user: &str) -> Arc<VectorIndex> {
        if let Some(index) = self.usable_cached(user).await {
            return index;
        }

        let lock = self.build_lock(user).await;
        let _guard = lock.lock().await;

        // Someone else may have finished a build while we waited.
        if let Some(index) = self.usable_cached(user).await {
            return index;
        }

        if let Some(index) = self.load(user).await {
            self.install(user, index.clone()).await;
            return index;
        }

        let mut index = self.build(user).await;
        if index.kind() == IndexKind::Degraded {
            debug!(user, "Retrying degraded build once");
            index = self.build(user).await;
        }
        self.install(user, index.clone()).await;
        index
    }

    async fn usable_cached(&self, user: &str) -> Option<Arc<VectorIndex>> {
        let cache = self.cache.read().await;
        cache
            .get(user)
            .filter(|index| index.kind() != IndexKind::Degraded)
            .cloned()
    }

    async fn install(&self, user: &str, index: Arc<VectorIndex>) {
        self.cache.write().await.insert(user.to_string(), index);
    }

    async fn build_lock(&self, user: &str) -> Arc<Mutex<()>> {
        let mut locks = self.build_locks.lock().await;
        locks.entry(user.to_string()).or_default().clone()
    }
}
