//! Core data models used throughout askdocs.
//!
//! These types represent the documents, chunks, transcripts, and agent steps
//! that flow through indexing, retrieval, and the reasoning loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An uploaded file, already converted to text, owned by one user.
#[derive(Debug, Clone)]
pub struct Document {
    /// File name within the user's upload directory.
    pub id: String,
    pub text: String,
}

/// Listing entry for a stored document.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocumentInfo {
    pub name: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// A segment of a document's text. Chunks are derived and never mutated;
/// they are regenerated whenever the owner's document set changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A chunk returned from top-k retrieval with its cosine similarity.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// One question/answer pair in a user's transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub username: String,
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// One iteration of the reasoning loop. Lives only for the duration of a
/// single `ask` call.
#[derive(Debug, Clone)]
pub struct AgentStep {
    pub thought: String,
    pub tool: String,
    pub tool_input: String,
    pub observation: String,
}

/// The answer handed back to a chat caller.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub timestamp: DateTime<Utc>,
}
