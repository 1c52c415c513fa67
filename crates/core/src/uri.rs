//! URI parsing and normalization
//!
//! A [`Uri`] is the immutable identity of a resource: `{scheme, authority,
//! path, fragment}`. Scheme-less strings are local paths and become absolute
//! `file` URIs. Two URIs compare equal when their normalized components
//! match: lower-cased scheme and host, default ports elided, `.` and `..`
//! segments resolved.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use url::Url;

use crate::error::{Error, Result};

/// Scheme used for local filesystem paths
pub const FILE_SCHEME: &str = "file";

/// Host and optional port of a remote server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Authority {
    host: String,
    port: Option<u16>,
}

impl Authority {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

/// A normalized, immutable resource identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    scheme: String,
    authority: Option<Authority>,
    path: String,
    query: Option<String>,
    fragment: Option<String>,
}

impl Uri {
    /// Parse a URI string or a local path
    ///
    /// `scheme://[authority]/path[#fragment]` is parsed as a URI; anything
    /// without a `://` separator (and not starting with `file:`) is a local
    /// path, made absolute against the current directory.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidUri("empty URI".to_string()));
        }

        if !trimmed.contains("://") && !trimmed.starts_with("file:") {
            return Self::from_local_path(Path::new(trimmed), trimmed.ends_with('/'));
        }

        let url = Url::parse(trimmed)
            .map_err(|e| Error::InvalidUri(format!("{trimmed}: {e}")))?;
        Self::from_url(&url)
    }

    /// Build a URI from an already parsed URL
    pub fn from_url(url: &Url) -> Result<Self> {
        if url.cannot_be_a_base() {
            return Err(Error::InvalidUri(format!(
                "{url}: expected scheme://authority/path"
            )));
        }

        let scheme = url.scheme().to_ascii_lowercase();
        let authority = match url.host_str() {
            Some(host) if !host.is_empty() => Some(Authority::new(host, url.port())),
            _ => None,
        };

        if scheme != FILE_SCHEME && authority.is_none() {
            return Err(Error::InvalidUri(format!("{url}: missing authority")));
        }

        if scheme == FILE_SCHEME {
            let path = url
                .to_file_path()
                .map_err(|_| Error::InvalidUri(format!("{url}: not a local file path")))?;
            let mut uri = Self::from_local_path(&path, url.path().ends_with('/'))?;
            uri.fragment = url.fragment().map(str::to_string);
            return Ok(uri);
        }

        Ok(Self {
            scheme,
            authority,
            path: normalize_path(url.path()),
            query: url.query().map(str::to_string),
            fragment: url.fragment().map(str::to_string),
        })
    }

    /// Build a `file` URI from a local path
    pub fn from_local_path(path: &Path, force_directory: bool) -> Result<Self> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        let normalized = lexical_normalize(&absolute);

        let mut text = normalized.to_string_lossy().replace('\\', "/");
        if !text.starts_with('/') {
            text.insert(0, '/');
        }
        if force_directory && !text.ends_with('/') {
            text.push('/');
        }

        Ok(Self {
            scheme: FILE_SCHEME.to_string(),
            authority: None,
            path: text,
            query: None,
            fragment: None,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn authority(&self) -> Option<&Authority> {
        self.authority.as_ref()
    }

    /// Absolute path component, always starting with `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn is_local(&self) -> bool {
        self.scheme == FILE_SCHEME
    }

    /// A path ending in `/` denotes a directory
    pub fn is_dir_like(&self) -> bool {
        self.path.ends_with('/')
    }

    pub fn is_root(&self) -> bool {
        self.path == "/"
    }

    /// Path relative to the root, i.e. without the leading `/`
    ///
    /// For object stores this is the object key.
    pub fn key(&self) -> &str {
        self.path.trim_start_matches('/')
    }

    /// Last path segment, ignoring a trailing `/`
    pub fn basename(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    /// All extensions of the basename as one string (`file.fits.gz` → `.fits.gz`)
    pub fn extension(&self) -> &str {
        let name = self.basename();
        // leading dots belong to the stem of hidden files
        let leading = name.len() - name.trim_start_matches('.').len();
        match name[leading..].find('.') {
            Some(i) if !self.is_dir_like() => &name[leading + i..],
            _ => "",
        }
    }

    /// Same scheme and authority, path `/`
    pub fn root(&self) -> Self {
        self.with_path("/")
    }

    /// Directory containing this resource; the root is its own parent
    pub fn parent(&self) -> Self {
        let trimmed = self.path.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(idx) => self.with_path(&self.path[..=idx]),
            None => self.root(),
        }
    }

    /// Resolve `relative` against this URI, treated as a directory
    ///
    /// A full URI in `relative` replaces this one entirely.
    pub fn join(&self, relative: &str) -> Result<Self> {
        if relative.contains("://") {
            return Self::parse(relative);
        }
        if relative.starts_with('/') {
            return Err(Error::InvalidUri(format!(
                "cannot join absolute path {relative} to {self}"
            )));
        }

        let mut base = self.path.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        base.push_str(relative);
        Ok(self.with_path(&base))
    }

    /// Copy of this URI with a new path (query and fragment dropped)
    pub fn with_path(&self, path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        Self {
            scheme: self.scheme.clone(),
            authority: self.authority.clone(),
            path: normalize_path(&path),
            query: None,
            fragment: None,
        }
    }

    /// Force directory-like form (trailing `/`)
    pub fn as_directory(&self) -> Self {
        if self.is_dir_like() {
            return self.clone();
        }
        let mut dir = self.clone();
        dir.path.push('/');
        dir
    }

    /// Local filesystem path for `file` URIs
    pub fn to_local_path(&self) -> Option<PathBuf> {
        if !self.is_local() {
            return None;
        }
        Url::parse(&self.to_string())
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .or_else(|| Some(PathBuf::from(&self.path)))
    }

    /// Render as a `url::Url`
    pub fn to_url(&self) -> Result<Url> {
        Url::parse(&self.to_string()).map_err(|e| Error::InvalidUri(format!("{self}: {e}")))
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(authority) = &self.authority {
            write!(f, "{authority}")?;
        }
        f.write_str(&self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{query}")?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{fragment}")?;
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Resolve `.` and `..` segments of an absolute URI path, keeping a trailing `/`
fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let trailing = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut out = String::with_capacity(path.len());
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() || trailing {
        out.push('/');
    }
    out
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http() {
        let uri = Uri::parse("HTTPS://Example.ORG:443/a/./b/../c.txt#frag").unwrap();
        assert_eq!(uri.scheme(), "https");
        assert_eq!(uri.authority().unwrap().host(), "example.org");
        assert_eq!(uri.authority().unwrap().port(), None);
        assert_eq!(uri.path(), "/a/c.txt");
        assert_eq!(uri.fragment(), Some("frag"));
        assert_eq!(uri.to_string(), "https://example.org/a/c.txt#frag");
    }

    #[test]
    fn test_equality_is_normalized() {
        let a = Uri::parse("http://HOST:80/x/y").unwrap();
        let b = Uri::parse("http://host/x/z/../y").unwrap();
        assert_eq!(a, b);
        let c = Uri::parse("http://host:8080/x/y").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_object_store_uri() {
        let uri = Uri::parse("s3://bucket/dir/key.fits.gz").unwrap();
        assert_eq!(uri.scheme(), "s3");
        assert_eq!(uri.authority().unwrap().to_string(), "bucket");
        assert_eq!(uri.key(), "dir/key.fits.gz");
        assert_eq!(uri.extension(), ".fits.gz");
        assert_eq!(uri.basename(), "key.fits.gz");

        let root = Uri::parse("s3://bucket").unwrap();
        assert!(root.is_root());
        assert!(root.is_dir_like());
    }

    #[test]
    fn test_invalid_uris() {
        assert!(matches!(Uri::parse(""), Err(Error::InvalidUri(_))));
        assert!(matches!(Uri::parse("http://"), Err(Error::InvalidUri(_))));
        assert!(matches!(Uri::parse("s3:///key"), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn test_local_paths() {
        let uri = Uri::parse("/tmp/data/../file.txt").unwrap();
        assert!(uri.is_local());
        assert_eq!(uri.path(), "/tmp/file.txt");
        assert_eq!(uri.to_local_path().unwrap(), PathBuf::from("/tmp/file.txt"));

        let dir = Uri::parse("/tmp/data/").unwrap();
        assert!(dir.is_dir_like());

        let relative = Uri::parse("some/file").unwrap();
        assert!(relative.is_local());
        assert!(relative.path().ends_with("/some/file"));

        let file_uri = Uri::parse("file:///tmp/x.txt").unwrap();
        assert_eq!(file_uri, Uri::parse("/tmp/x.txt").unwrap());
    }

    #[test]
    fn test_parent_and_join() {
        let uri = Uri::parse("https://host/a/b/c.txt").unwrap();
        assert_eq!(uri.parent().to_string(), "https://host/a/b/");
        assert_eq!(uri.parent().parent().to_string(), "https://host/a/");

        let root = Uri::parse("https://host/").unwrap();
        assert_eq!(root.parent(), root);

        let dir = Uri::parse("https://host/a/").unwrap();
        assert_eq!(dir.join("b/c.txt").unwrap().to_string(), "https://host/a/b/c.txt");
        assert_eq!(dir.join("../x").unwrap().to_string(), "https://host/x");
        assert!(dir.join("/abs").is_err());
        assert_eq!(
            dir.join("s3://bucket/k").unwrap().to_string(),
            "s3://bucket/k"
        );
    }

    #[test]
    fn test_extension_edge_cases() {
        assert_eq!(Uri::parse("http://h/a/file").unwrap().extension(), "");
        assert_eq!(Uri::parse("http://h/a/.hidden").unwrap().extension(), "");
        assert_eq!(Uri::parse("http://h/a/.cfg.yaml").unwrap().extension(), ".yaml");
        assert_eq!(Uri::parse("http://h/a.d/").unwrap().extension(), "");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/a/b/.."), "/a/");
        assert_eq!(normalize_path("/../.."), "/");
        assert_eq!(normalize_path("/a/./b/"), "/a/b/");
    }
}
