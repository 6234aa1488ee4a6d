//! Error types for askdocs.
//!
//! The variants mirror the assistant's failure taxonomy. Most of them never
//! reach a caller of [`Assistant`](crate::assistant::Assistant): index build
//! failures are replaced by placeholder indexes, retrieval failures become
//! answer text, and agent failures route to the fallback ladder. Only
//! [`Error::NotFound`] and [`Error::InvalidInput`] are expected to surface
//! from the document management entry points.

use thiserror::Error;

/// Result type alias using askdocs' [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Embedding service unreachable, unreadable documents, or unwritable index directory.
    #[error("Index build failed: {0}")]
    IndexBuild(String),

    /// Query-time failure (embedding the question or synthesizing the answer).
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    /// The model produced output that is not in the reasoning format, even after a retry.
    #[error("Could not parse agent output: {0}")]
    AgentParse(String),

    /// The reasoning loop hit its iteration bound without a final answer.
    #[error("Agent stopped after {iterations} iterations without a final answer")]
    AgentIterationExhausted { iterations: usize },

    /// The agent could not be constructed at startup.
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Language model error: {0}")]
    Llm(String),

    /// A network call exceeded its deadline.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("Text extraction failed: {0}")]
    Extract(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
