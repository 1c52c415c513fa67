//! Backend capability contract
//!
//! Every scheme is served by one [`ResourceBackend`]. Implementations live in
//! this crate (local files, package resources) and in `rp-http` (http,
//! https and s3). Callers normally go through
//! [`ResourcePath`](crate::dispatch::ResourcePath) rather than holding a
//! backend directly.

use async_trait::async_trait;
use bytes::Bytes;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::uri::Uri;

/// Metadata for one resource or directory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Key relative to the listed directory, or the full path for `stat`
    pub key: String,

    /// Size in bytes
    pub size_bytes: Option<u64>,

    /// Human-readable size
    pub size_human: Option<String>,

    /// Last modified timestamp
    pub last_modified: Option<Timestamp>,

    /// ETag (entity tag)
    pub etag: Option<String>,

    /// Content type
    pub content_type: Option<String>,

    /// Whether this is a directory/prefix
    pub is_dir: bool,
}

impl ObjectInfo {
    /// Create a new ObjectInfo for a file
    pub fn file(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size_bytes: Some(size),
            size_human: Some(humansize::format_size(size, humansize::BINARY)),
            last_modified: None,
            etag: None,
            content_type: None,
            is_dir: false,
        }
    }

    /// Create a new ObjectInfo for a directory
    pub fn dir(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size_bytes: None,
            size_human: None,
            last_modified: None,
            etag: None,
            content_type: None,
            is_dir: true,
        }
    }
}

/// Inclusive byte range for partial reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Last byte included; `None` reads to the end
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Result<Self> {
        if let Some(end) = end
            && end < start
        {
            return Err(Error::Config(format!(
                "invalid byte range {start}-{end}: end precedes start"
            )));
        }
        Ok(Self { start, end })
    }

    /// Value of the `Range` request header
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Apply the range to a complete body
    pub fn slice(&self, data: &Bytes) -> Bytes {
        let len = data.len() as u64;
        let start = self.start.min(len) as usize;
        let end = match self.end {
            Some(end) => end.saturating_add(1).min(len) as usize,
            None => len as usize,
        };
        data.slice(start..end.max(start))
    }
}

impl std::str::FromStr for ByteRange {
    type Err = Error;

    /// Parse `start-end` or `start-`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid byte range: {s}"));
        let (start, end) = s.split_once('-').ok_or_else(invalid)?;
        let start = start.trim().parse().map_err(|_| invalid())?;
        let end = match end.trim() {
            "" => None,
            end => Some(end.parse().map_err(|_| invalid())?),
        };
        Self::new(start, end)
    }
}

/// Options for listing a directory
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Only entries whose key starts with this prefix
    pub prefix: Option<String>,

    /// Descend into subdirectories
    pub recursive: bool,

    /// Maximum number of entries to return
    pub max_keys: Option<usize>,

    /// Resume after a previous truncated listing
    pub continuation_token: Option<String>,
}

/// Result of a list operation
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Entries, sorted by key
    pub items: Vec<ObjectInfo>,

    /// Whether more entries remain
    pub truncated: bool,

    /// Pass back in [`ListOptions::continuation_token`] to continue
    pub continuation_token: Option<String>,
}

/// Apply prefix, continuation token and `max_keys` to a complete listing
pub fn paginate(mut items: Vec<ObjectInfo>, options: &ListOptions) -> ListResult {
    items.sort_by(|a, b| a.key.cmp(&b.key));
    if let Some(prefix) = &options.prefix {
        items.retain(|item| item.key.starts_with(prefix.as_str()));
    }
    if let Some(token) = &options.continuation_token {
        items.retain(|item| item.key.as_str() > token.as_str());
    }

    match options.max_keys.map(|max| max.max(1)) {
        Some(max) if items.len() > max => {
            items.truncate(max);
            let continuation_token = items.last().map(|item| item.key.clone());
            ListResult {
                items,
                truncated: true,
                continuation_token,
            }
        }
        _ => ListResult {
            items,
            truncated: false,
            continuation_token: None,
        },
    }
}

/// Server-side transfer flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Copy,
    Move,
}

/// What a backend supports beyond reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub write: bool,
    pub delete: bool,
    pub mkdir: bool,
    /// `copy` can run without moving bytes through the client
    pub server_side_copy: bool,
}

/// Operations every scheme backend provides
///
/// Calls that a backend cannot serve fail with [`Error::Unsupported`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Scheme served by this backend instance
    fn scheme(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Read the whole resource, or only `range`
    async fn read(&self, uri: &Uri, range: Option<ByteRange>) -> Result<Bytes>;

    /// Store `data`; fails with [`Error::AlreadyExists`] when the resource
    /// exists and `overwrite` is false
    async fn write(&self, uri: &Uri, data: Bytes, overwrite: bool) -> Result<()>;

    async fn exists(&self, uri: &Uri) -> Result<bool>;

    async fn delete(&self, uri: &Uri) -> Result<()>;

    /// Size in bytes; directory-like URIs have size 0
    async fn size(&self, uri: &Uri) -> Result<u64>;

    async fn stat(&self, uri: &Uri) -> Result<ObjectInfo>;

    /// List the directory `uri`
    async fn list(&self, uri: &Uri, options: ListOptions) -> Result<ListResult>;

    /// Create the directory `uri` and any missing parents
    async fn mkdir(&self, uri: &Uri) -> Result<()>;

    /// Copy or move `src` to `dst` without streaming through the client
    async fn copy(&self, src: &Uri, dst: &Uri, mode: TransferMode, overwrite: bool) -> Result<()>;
}
