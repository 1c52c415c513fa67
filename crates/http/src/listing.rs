//! Directory listing document
//!
//! Listings are requested with `GET <directory>?prefix=..&delimiter=/` and
//! `Accept: application/json`; the server answers with one page:
//!
//! ```json
//! {"entries": [{"key": "a.txt", "size": 3, "is_dir": false,
//!               "last_modified": "2024-01-01T00:00:00Z", "etag": "abc"}],
//!  "is_truncated": true, "next_continuation_token": "a.txt"}
//! ```
//!
//! Keys are relative to the listed directory; directories end with `/`.

use jiff::Timestamp;
use rp_core::{Error, ObjectInfo, Result};
use serde::{Deserialize, Serialize};
use url::Url;

pub const PREFIX_PARAM: &str = "prefix";
pub const DELIMITER_PARAM: &str = "delimiter";
pub const CONTINUATION_PARAM: &str = "continuation-token";
pub const MAX_KEYS_PARAM: &str = "max-keys";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub key: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl From<ListingEntry> for ObjectInfo {
    fn from(entry: ListingEntry) -> Self {
        let is_dir = entry.is_dir || entry.key.ends_with('/');
        let mut info = if is_dir {
            let key = if entry.key.ends_with('/') {
                entry.key
            } else {
                format!("{}/", entry.key)
            };
            ObjectInfo::dir(key)
        } else {
            ObjectInfo::file(entry.key, entry.size)
        };
        info.last_modified = entry.last_modified;
        info.etag = entry.etag.map(|e| e.trim_matches('"').to_string());
        info
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingPage {
    #[serde(default)]
    pub entries: Vec<ListingEntry>,
    #[serde(default)]
    pub is_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_continuation_token: Option<String>,
}

impl ListingPage {
    pub fn parse(body: &[u8], url: &Url) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| {
            Error::permanent(200, url.as_str(), format!("malformed listing document: {e}"))
        })
    }
}

/// Query parameters for one listing page
#[derive(Debug, Clone, Default)]
pub struct ListingQuery<'a> {
    pub prefix: Option<&'a str>,
    pub recursive: bool,
    pub continuation_token: Option<&'a str>,
    pub max_keys: Option<usize>,
}

impl ListingQuery<'_> {
    /// `directory` with the listing parameters appended
    pub fn apply(&self, directory: &Url) -> Url {
        let mut url = directory.clone();
        url.set_query(None);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair(PREFIX_PARAM, self.prefix.unwrap_or(""));
            if !self.recursive {
                pairs.append_pair(DELIMITER_PARAM, "/");
            }
            if let Some(token) = self.continuation_token {
                pairs.append_pair(CONTINUATION_PARAM, token);
            }
            if let Some(max) = self.max_keys {
                pairs.append_pair(MAX_KEYS_PARAM, &max.to_string());
            }
        }
        url
    }
}
