//! Read-only backend for resources bundled with a package
//!
//! URIs look like `resource://<package>/<path>`: the authority names the
//! package and the path names a file registered for it, typically with
//! `include_bytes!`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};
use crate::traits::{
    ByteRange, Capabilities, ListOptions, ListResult, ObjectInfo, ResourceBackend, TransferMode,
    paginate,
};
use crate::uri::Uri;

pub const RESOURCE_SCHEME: &str = "resource";

type PackageFiles = BTreeMap<String, Bytes>;

/// Registry of bundled files, shared by every clone
#[derive(Debug, Clone, Default)]
pub struct PackageResources {
    packages: Arc<RwLock<HashMap<String, PackageFiles>>>,
}

impl PackageResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `data` as `resource://<package>/<path>`
    pub fn register(&self, package: &str, path: &str, data: impl Into<Bytes>) {
        let mut packages = self.packages.write().unwrap_or_else(|e| e.into_inner());
        packages
            .entry(package.to_ascii_lowercase())
            .or_default()
            .insert(path.trim_start_matches('/').to_string(), data.into());
    }

    pub fn with_file(self, package: &str, path: &str, data: impl Into<Bytes>) -> Self {
        self.register(package, path, data);
        self
    }

    fn package_of(uri: &Uri) -> Result<String> {
        uri.authority()
            .map(|a| a.host().to_string())
            .ok_or_else(|| Error::InvalidUri(format!("{uri}: missing package name")))
    }

    fn lookup(&self, uri: &Uri) -> Result<Bytes> {
        let package = Self::package_of(uri)?;
        let packages = self.packages.read().unwrap_or_else(|e| e.into_inner());
        packages
            .get(&package)
            .and_then(|files| files.get(uri.key()))
            .cloned()
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{uri}: no such package resource"),
                ))
            })
    }

    fn is_directory(&self, uri: &Uri) -> Result<bool> {
        let package = Self::package_of(uri)?;
        let prefix = uri.as_directory().key().to_string();
        let packages = self.packages.read().unwrap_or_else(|e| e.into_inner());
        Ok(packages
            .get(&package)
            .is_some_and(|files| files.keys().any(|k| k.starts_with(&prefix))))
    }
}

fn read_only(uri: &Uri) -> Error {
    Error::Unsupported(format!("{uri}: package resources are read-only"))
}

#[async_trait]
impl ResourceBackend for PackageResources {
    fn scheme(&self) -> &str {
        RESOURCE_SCHEME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn read(&self, uri: &Uri, range: Option<ByteRange>) -> Result<Bytes> {
        let data = self.lookup(uri)?;
        Ok(match range {
            Some(range) => range.slice(&data),
            None => data,
        })
    }

    async fn write(&self, uri: &Uri, _data: Bytes, _overwrite: bool) -> Result<()> {
        Err(read_only(uri))
    }

    async fn exists(&self, uri: &Uri) -> Result<bool> {
        if uri.is_dir_like() {
            return self.is_directory(uri);
        }
        Ok(self.lookup(uri).is_ok())
    }

    async fn delete(&self, uri: &Uri) -> Result<()> {
        Err(read_only(uri))
    }

    async fn size(&self, uri: &Uri) -> Result<u64> {
        if uri.is_dir_like() {
            return Ok(0);
        }
        Ok(self.lookup(uri)?.len() as u64)
    }

    async fn stat(&self, uri: &Uri) -> Result<ObjectInfo> {
        if uri.is_dir_like() {
            return Ok(ObjectInfo::dir(uri.path()));
        }
        Ok(ObjectInfo::file(uri.path(), self.lookup(uri)?.len() as u64))
    }

    async fn list(&self, uri: &Uri, options: ListOptions) -> Result<ListResult> {
        let package = Self::package_of(uri)?;
        let dir = uri.as_directory();
        let base = dir.key();

        let packages = self.packages.read().unwrap_or_else(|e| e.into_inner());
        let files = packages
            .get(&package)
            .ok_or_else(|| Error::InvalidUri(format!("{uri}: unknown package {package}")))?;

        let mut items = Vec::new();
        let mut seen_dirs = std::collections::BTreeSet::new();
        for (path, data) in files.range(base.to_string()..) {
            let Some(rel) = path.strip_prefix(base) else {
                break;
            };
            match rel.split_once('/') {
                Some((sub, _)) if !options.recursive => {
                    if seen_dirs.insert(sub.to_string()) {
                        items.push(ObjectInfo::dir(format!("{sub}/")));
                    }
                }
                _ => items.push(ObjectInfo::file(rel, data.len() as u64)),
            }
        }
        drop(packages);

        Ok(paginate(items, &options))
    }

    async fn mkdir(&self, uri: &Uri) -> Result<()> {
        Err(read_only(uri))
    }

    async fn copy(&self, src: &Uri, _dst: &Uri, _mode: TransferMode, _overwrite: bool) -> Result<()> {
        Err(read_only(src))
    }
}
