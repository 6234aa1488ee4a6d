//! Per-user vector index: chunks, their embeddings, and persisted metadata.
//!
//! # On-disk layout
//!
//! ```text
//! <index_dir>/<user>/
//!   vector_store.json   chunks + vectors
//!   index_store.json    metadata; written last, so its presence marks a
//!                       complete index
//! ```
//!
//! Both files are written to a temporary name and renamed into place.
//! [`VectorIndex::load`] distinguishes a missing index ([`LoadOutcome::Absent`])
//! from one that exists but cannot be trusted ([`LoadOutcome::Corrupt`]);
//! neither is an error for the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{Chunk, ScoredChunk};

pub const FORMAT_VERSION: u32 = 1;
pub const STORE_FILE: &str = "index_store.json";
pub const VECTORS_FILE: &str = "vector_store.json";

/// What an index was built from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Chunks of the user's documents.
    Documents,
    /// The user has no documents; a single explanatory chunk.
    Empty,
    /// The build failed; a single chunk describing the failure.
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexMetadata {
    pub format_version: u32,
    pub index_id: String,
    pub owner: String,
    pub kind: IndexKind,
    pub model: String,
    pub dims: usize,
    pub built_at: DateTime<Utc>,
    pub document_count: usize,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorFile {
    index_id: String,
    entries: Vec<Entry>,
}

/// Result of trying to read a persisted index.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(VectorIndex),
    /// Nothing persisted for this user.
    Absent,
    /// Files exist but are unreadable, inconsistent, or from another format.
    Corrupt(String),
}

/// An immutable, fully built index. Rebuilding produces a new value.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    meta: IndexMetadata,
    entries: Vec<Entry>,
}

impl VectorIndex {
    /// Assemble an index from chunks and their vectors (same order).
    pub fn new(
        owner: &str,
        kind: IndexKind,
        model: &str,
        dims: usize,
        document_count: usize,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Self {
        let entries: Vec<Entry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| Entry { chunk, vector })
            .collect();

        Self {
            meta: IndexMetadata {
                format_version: FORMAT_VERSION,
                index_id: uuid::Uuid::new_v4().to_string(),
                owner: owner.to_string(),
                kind,
                model: model.to_string(),
                dims,
                built_at: Utc::now(),
                document_count,
                chunk_count: entries.len(),
            },
            entries,
        }
    }

    /// A single-chunk index carrying `text`. The chunk may have no vector;
    /// search still returns it.
    pub fn placeholder(
        owner: &str,
        kind: IndexKind,
        model: &str,
        dims: usize,
        text: &str,
        vector: Option<Vec<f32>>,
    ) -> Self {
        let chunk = crate::chunk::make_chunk("placeholder", 0, text);
        Self::new(
            owner,
            kind,
            model,
            dims,
            0,
            vec![chunk],
            vec![vector.unwrap_or_default()],
        )
    }

    pub fn metadata(&self) -> &IndexMetadata {
        &self.meta
    }

    pub fn kind(&self) -> IndexKind {
        self.meta.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    /// The `k` chunks most similar to `query_vec`, best first.
    ///
    /// Ties are broken by document and chunk index so results are stable
    /// across a persist/load round trip.
    pub fn search(&self, query_vec: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                score: cosine_similarity(query_vec, &e.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        });
        scored.truncate(k);
        scored
    }

    /// Write the index under `dir`, replacing any previous one.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let vectors = VectorFile {
            index_id: self.meta.index_id.clone(),
            entries: self.entries.clone(),
        };
        write_atomic(dir, VECTORS_FILE, &serde_json::to_vec(&vectors)?)?;
        write_atomic(dir, STORE_FILE, &serde_json::to_vec_pretty(&self.meta)?)?;
        Ok(())
    }

    /// Read a persisted index from `dir`.
    pub fn load(dir: &Path) -> LoadOutcome {
        let store_path = dir.join(STORE_FILE);
        if !store_path.exists() {
            return LoadOutcome::Absent;
        }

        let meta: IndexMetadata = match read_json(&store_path) {
            Ok(m) => m,
            Err(e) => return LoadOutcome::Corrupt(format!("{}: {}", STORE_FILE, e)),
        };
        if meta.format_version != FORMAT_VERSION {
            return LoadOutcome::Corrupt(format!(
                "format version {} (expected {})",
                meta.format_version, FORMAT_VERSION
            ));
        }

        let vectors: VectorFile = match read_json(&dir.join(VECTORS_FILE)) {
            Ok(v) => v,
            Err(e) => return LoadOutcome::Corrupt(format!("{}: {}", VECTORS_FILE, e)),
        };
        if vectors.index_id != meta.index_id {
            return LoadOutcome::Corrupt("vector file belongs to another build".to_string());
        }
        if vectors.entries.len() != meta.chunk_count {
            return LoadOutcome::Corrupt(format!(
                "{} chunks on disk, metadata says {}",
                vectors.entries.len(),
                meta.chunk_count
            ));
        }
        if meta.kind == IndexKind::Documents
            && vectors.entries.iter().any(|e| e.vector.len() != meta.dims)
        {
            return LoadOutcome::Corrupt("vector dimension mismatch".to_string());
        }

        LoadOutcome::Loaded(VectorIndex {
            meta,
            entries: vectors.entries,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> std::result::Result<T, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let tmp = dir.join(format!(".{}.tmp", name));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, dir.join(name))?;
    Ok(())
}
