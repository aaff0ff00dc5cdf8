//! Asset sources: where raw text comes from.
//!
//! The pipeline treats a source as an opaque unit with a stable identity, a
//! lazily readable body, and optional per-source minifier overrides. Two
//! implementations ship:
//!
//! - [`FileSource`] — a file on disk. Identity is the path; freshness comes
//!   from the file's mtime.
//! - [`MemorySource`] — an in-memory string, for embedders that assemble
//!   content themselves (template output, database rows). Identity must be
//!   chosen by the embedder and its cache fingerprint covers the content,
//!   since there is no mtime to invalidate on.
//!
//! ## Identity and the cache key
//!
//! `id()` is the basis of server-side cache-key derivation: it must be stable
//! for a given logical source across requests and processes. A renamed file
//! is a different source; edited *contents* of a file are caught by the
//! mtime freshness check, not the key.

use crate::minifier::MinifyOptions;
use crate::options::ContentType;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source not found: {0}")]
    NotFound(PathBuf),
}

/// An item producing raw text content for the pipeline.
pub trait Source: Send + Sync {
    /// Stable identity token. Basis of cache-key derivation.
    fn id(&self) -> &str;

    /// Read the body. Lazy; called at most once per serve.
    fn content(&self) -> Result<String, SourceError>;

    /// Last modification time, epoch seconds. `None` when unknowable.
    fn last_modified(&self) -> Option<u64> {
        None
    }

    /// Filesystem path, used only as relative-URI rewriting context for CSS.
    fn file_path(&self) -> Option<&Path> {
        None
    }

    /// Per-source minifier registry name, overriding the request default.
    fn minifier(&self) -> Option<&str> {
        None
    }

    /// Per-source minify options, merged over the request defaults
    /// (override wins on key collision).
    fn minify_options(&self) -> Option<&MinifyOptions> {
        None
    }

    /// Digest contribution of this source to the cache key.
    ///
    /// The default hashes the identity token only, which suits sources whose
    /// freshness is tracked out-of-band (mtime). Content-bearing sources must
    /// fold a content fingerprint in, since an edit is otherwise invisible to
    /// the key.
    fn cache_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"id\0");
        hasher.update(self.id().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// A source backed by a file on disk.
pub struct FileSource {
    path: PathBuf,
    id: String,
    last_modified: Option<u64>,
    minifier: Option<String>,
    minify_options: Option<MinifyOptions>,
}

impl FileSource {
    /// Wrap a file path. The mtime is read once, here — the freshness
    /// watermark for a request is fixed at setup, not re-read mid-serve.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_modified = std::fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs());
        let id = path.to_string_lossy().into_owned();
        Self {
            path,
            id,
            last_modified,
            minifier: None,
            minify_options: None,
        }
    }

    pub fn with_minifier(mut self, name: &str) -> Self {
        self.minifier = Some(name.to_string());
        self
    }

    pub fn with_minify_options(mut self, options: MinifyOptions) -> Self {
        self.minify_options = Some(options);
        self
    }

    /// Whether the file existed when the source was constructed.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

impl Source for FileSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn content(&self) -> Result<String, SourceError> {
        std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound(self.path.clone())
            } else {
                SourceError::Io(e)
            }
        })
    }

    fn last_modified(&self) -> Option<u64> {
        self.last_modified
    }

    fn file_path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn minifier(&self) -> Option<&str> {
        self.minifier.as_deref()
    }

    fn minify_options(&self) -> Option<&MinifyOptions> {
        self.minify_options.as_ref()
    }
}

/// A source holding its content in memory.
pub struct MemorySource {
    id: String,
    content: String,
    last_modified: Option<u64>,
    minifier: Option<String>,
    minify_options: Option<MinifyOptions>,
}

impl MemorySource {
    pub fn new(id: &str, content: &str) -> Self {
        Self {
            id: id.to_string(),
            content: content.to_string(),
            last_modified: None,
            minifier: None,
            minify_options: None,
        }
    }

    pub fn with_last_modified(mut self, epoch_seconds: u64) -> Self {
        self.last_modified = Some(epoch_seconds);
        self
    }

    pub fn with_minifier(mut self, name: &str) -> Self {
        self.minifier = Some(name.to_string());
        self
    }

    pub fn with_minify_options(mut self, options: MinifyOptions) -> Self {
        self.minify_options = Some(options);
        self
    }
}

impl Source for MemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn content(&self) -> Result<String, SourceError> {
        Ok(self.content.clone())
    }

    fn last_modified(&self) -> Option<u64> {
        self.last_modified
    }

    fn minifier(&self) -> Option<&str> {
        self.minifier.as_deref()
    }

    fn minify_options(&self) -> Option<&MinifyOptions> {
        self.minify_options.as_ref()
    }

    // No mtime to track edits, so the content itself is part of the key.
    fn cache_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"id\0");
        hasher.update(self.id.as_bytes());
        hasher.update(b"\0content\0");
        hasher.update(self.content.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Resolve a list of file paths into sources, all-or-nothing.
///
/// Any missing path invalidates the whole selection (the caller maps the
/// error to a bad request, never a partial response). The guessed content
/// type comes from the first path with a recognized extension.
pub fn resolve_files(
    paths: &[PathBuf],
) -> Result<(Vec<Box<dyn Source>>, Option<ContentType>), SourceError> {
    let mut sources: Vec<Box<dyn Source>> = Vec::with_capacity(paths.len());
    let mut content_type = None;
    for path in paths {
        let source = FileSource::new(path);
        if !source.exists() {
            return Err(SourceError::NotFound(path.clone()));
        }
        if content_type.is_none() {
            content_type = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(ContentType::from_extension);
        }
        sources.push(Box::new(source));
    }
    Ok((sources, content_type))
}

/// Maximum `last_modified` across sources, for the freshness watermark.
/// Sources with unknown mtimes contribute nothing.
pub fn max_last_modified(sources: &[Box<dyn Source>]) -> u64 {
    sources
        .iter()
        .filter_map(|s| s.last_modified())
        .max()
        .unwrap_or(0)
}
