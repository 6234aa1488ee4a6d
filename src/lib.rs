//! # askdocs
//!
//! A per-user document assistant. Each user uploads files into a private
//! store; askdocs keeps one vector index per user and answers questions
//! with a bounded reasoning agent that can search that index, falling back
//! to direct retrieval and finally to a fixed apology.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Documents  │──▶│ IndexManager │──▶│ QueryEngine  │
//! │ uploads/<u> │   │ chunk+embed  │   │ top-k + LLM  │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │ knowledge_search
//!                                             ▼
//!                   ┌──────────────┐   ┌──────────────┐
//!                   │   History    │◀──│  Assistant   │
//!                   │  per user    │   │ agent → RAG  │
//!                   └──────────────┘   │  → apology   │
//!                                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! askdocs upload alice ./handbook.pdf
//! askdocs ask alice "Who is the CEO?"
//! askdocs history alice
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`documents`] | Per-user document store |
//! | [`extract`] | PDF/DOCX/plain-text extraction |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Language-model abstraction |
//! | [`index`] | Vector index and its on-disk format |
//! | [`index_manager`] | Build, load, and swap per-user indexes |
//! | [`query`] | Retrieval plus answer synthesis |
//! | [`tools`] | Tools exposed to the agent |
//! | [`agent`] | Bounded ReAct loop |
//! | [`history`] | Per-user transcripts |
//! | [`assistant`] | Entry points and fallback ladder |

pub mod agent;
pub mod assistant;
pub mod chunk;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod history;
pub mod index;
pub mod index_manager;
pub mod llm;
pub mod models;
pub mod query;
pub mod tools;
