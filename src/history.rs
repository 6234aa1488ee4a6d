//! Per-user question/answer transcripts.
//!
//! The store is created once at startup and passed by reference to every
//! request. Entries are only ever appended; [`HistoryStore::clear`] is the
//! one way to remove them. Each user's transcript sits behind its own lock,
//! so appends for one user are applied in order while different users
//! never contend.
//!
//! When a history directory is configured, every entry is also written as
//! a JSON line to `<history_dir>/<user>.jsonl`, and a user's file is read
//! back the first time that user is touched.

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::documents::validate_component;
use crate::error::Result;
use crate::models::HistoryEntry;

#[derive(Default)]
struct Transcript {
    loaded: bool,
    entries: Vec<HistoryEntry>,
}

pub struct HistoryStore {
    dir: Option<PathBuf>,
    transcripts: Mutex<HashMap<String, Arc<Mutex<Transcript>>>>,
}

impl HistoryStore {
    /// A store that keeps transcripts in memory only.
    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            transcripts: Mutex::new(HashMap::new()),
        }
    }

    /// Record one exchange for `user` and return it.
    ///
    /// A failure to mirror the entry to disk is logged; the entry is kept
    /// in memory regardless.
    pub async fn append(&self, user: &str, question: &str, answer: &str) -> HistoryEntry {
        let transcript = self.transcript(user).await;
        let mut transcript = transcript.lock().await;
        self.ensure_loaded(user, &mut transcript).await;

        let entry = HistoryEntry {
            username: user.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
            timestamp: Utc::now(),
        };

        if let Some(path) = self.file_for(user) {
            if let Err(e) = append_line(&path, &entry).await {
                warn!(user, error = %e, "Failed to write history entry");
            }
        }
        transcript.entries.push(entry.clone());
        debug!(user, entries = transcript.entries.len(), "History appended");
        entry
    }

    /// `user`'s entries, oldest first.
    pub async fn get(&self, user: &str) -> Vec<HistoryEntry> {
        let transcript = self.transcript(user).await;
        let mut transcript = transcript.lock().await;
        self.ensure_loaded(user, &mut transcript).await;
        transcript.entries.clone()
    }

    /// Remove all of `user`'s entries.
    pub async fn clear(&self, user: &str) -> Result<()> {
        let transcript = self.transcript(user).await;
        let mut transcript = transcript.lock().await;
        transcript.entries.clear();
        transcript.loaded = true;

        if let Some(path) = self.file_for(user) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(user, "History cleared");
        Ok(())
    }

    async fn transcript(&self, user: &str) -> Arc<Mutex<Transcript>> {
        let mut map = self.transcripts.lock().await;
        map.entry(user.to_string()).or_default().clone()
    }

    fn file_for(&self, user: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        if let Err(e) = validate_component("username", user) {
            warn!(error = %e, "Not mirroring history for this user");
            return None;
        }
        Some(dir.join(format!("{}.jsonl", user)))
    }

    async fn ensure_loaded(&self, user: &str, transcript: &mut Transcript) {
        if transcript.loaded {
            return;
        }
        transcript.loaded = true;

        let Some(path) = self.file_for(user) else {
            return;
        };
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(user, error = %e, "Failed to read history file");
                return;
            }
        };

        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => transcript.entries.push(entry),
                Err(e) => warn!(user, line = n + 1, error = %e, "Skipping bad history line"),
            }
        }
        debug!(user, entries = transcript.entries.len(), "History loaded");
    }
}

async fn append_line(path: &std::path::Path, entry: &HistoryEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
