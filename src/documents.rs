//! Per-user document store.
//!
//! Each user owns one directory under the uploads root:
//!
//! ```text
//! <uploads_dir>/
//!   alice/
//!     handbook.pdf
//!     people.md
//!   bob/
//!     notes.txt
//! ```
//!
//! Files are only ever added or removed whole. Every mutation must be
//! followed by an index rebuild for the owner; the [`Assistant`] entry
//! points do that.
//!
//! [`Assistant`]: crate::assistant::Assistant

use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::extract::extract_text;
use crate::models::{Document, DocumentInfo};

pub struct DocumentStore {
    root: PathBuf,
    include: GlobSet,
}

impl DocumentStore {
    /// Create a store rooted at `root`. Only files matching `include_globs`
    /// (case-insensitively) are read into documents; listing shows every file.
    pub fn new(root: impl Into<PathBuf>, include_globs: &[String]) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            include: build_globset(include_globs)?,
        })
    }

    /// The directory holding `user`'s files.
    pub fn user_dir(&self, user: &str) -> Result<PathBuf> {
        validate_component("username", user)?;
        Ok(self.root.join(user))
    }

    /// Store `bytes` as `filename` for `user`, replacing any file of that name.
    pub async fn save(&self, user: &str, filename: &str, bytes: &[u8]) -> Result<DocumentInfo> {
        validate_component("filename", filename)?;
        let dir = self.user_dir(user)?;
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        debug!(user, filename, bytes = bytes.len(), "Stored document");

        let meta = tokio::fs::metadata(&path).await?;
        Ok(DocumentInfo {
            name: filename.to_string(),
            size: meta.len(),
            uploaded_at: modified_at(&meta),
        })
    }

    /// Remove `filename` from `user`'s directory.
    pub async fn delete(&self, user: &str, filename: &str) -> Result<()> {
        validate_component("filename", filename)?;
        let path = self.user_dir(user)?.join(filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(user, filename, "Deleted document");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("file {}", filename)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// List `user`'s files, sorted by name. A user with no directory has no files.
    pub async fn list(&self, user: &str) -> Result<Vec<DocumentInfo>> {
        let dir = self.user_dir(user)?;
        tokio::task::spawn_blocking(move || list_dir(&dir))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Read and extract every indexable file for `user`.
    ///
    /// Files whose text cannot be extracted are skipped with a warning;
    /// I/O errors on the directory itself are returned.
    pub async fn load_all(&self, user: &str) -> Result<Vec<Document>> {
        let dir = self.user_dir(user)?;
        let include = self.include.clone();
        let owner = user.to_string();
        tokio::task::spawn_blocking(move || read_documents(&dir, &include, &owner))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

fn list_dir(dir: &Path) -> Result<Vec<DocumentInfo>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry
            .metadata()
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        files.push(DocumentInfo {
            name: entry.file_name().to_string_lossy().to_string(),
            size: meta.len(),
            uploaded_at: modified_at(&meta),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn read_documents(dir: &Path, include: &GlobSet, owner: &str) -> Result<Vec<Document>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut docs = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !include.is_match(&name) {
            debug!(owner, file = %name, "Skipping file outside include globs");
            continue;
        }

        let bytes = std::fs::read(entry.path())?;
        let text = match extract_text(&bytes, &name) {
            Ok(text) => text,
            Err(e) => {
                warn!(owner, file = %name, error = %e, "Skipping unreadable document");
                continue;
            }
        };
        if text.trim().is_empty() {
            continue;
        }

        docs.push(Document { id: name, text });
    }

    docs.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(docs)
}

fn modified_at(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .into()
}

/// Reject names that could escape the user's directory.
pub(crate) fn validate_component(kind: &str, value: &str) -> Result<()> {
    let bad = value.trim().is_empty()
        || value.starts_with('.')
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0');
    if bad {
        return Err(Error::InvalidInput(format!("invalid {}: {:?}", kind, value)));
    }
    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::InvalidInput(format!("bad glob {}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::InvalidInput(e.to_string()))
}
