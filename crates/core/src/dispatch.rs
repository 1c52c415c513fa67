//! URI dispatch
//!
//! A [`Resolver`] maps a scheme to a [`BackendFactory`] and caches one
//! backend per (scheme, authority). Resolving a URI yields a
//! [`ResourcePath`], a handle whose calls are forwarded unchanged to that
//! backend. Retries and pooling happen below this layer.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::local::LocalBackend;
use crate::package::{PackageResources, RESOURCE_SCHEME};
use crate::traits::{ByteRange, ListOptions, ListResult, ObjectInfo, ResourceBackend, TransferMode};
use crate::uri::{Authority, FILE_SCHEME, Uri};

/// Builds the backend serving one scheme
pub trait BackendFactory: Send + Sync {
    fn create(&self, scheme: &str, authority: Option<&Authority>) -> Result<Arc<dyn ResourceBackend>>;
}

impl<F> BackendFactory for F
where
    F: Fn(&str, Option<&Authority>) -> Result<Arc<dyn ResourceBackend>> + Send + Sync,
{
    fn create(&self, scheme: &str, authority: Option<&Authority>) -> Result<Arc<dyn ResourceBackend>> {
        self(scheme, authority)
    }
}

/// Factory handing out one shared instance for every authority
pub struct SharedBackend(pub Arc<dyn ResourceBackend>);

impl BackendFactory for SharedBackend {
    fn create(&self, _scheme: &str, _authority: Option<&Authority>) -> Result<Arc<dyn ResourceBackend>> {
        Ok(self.0.clone())
    }
}

type CacheKey = (String, Option<Authority>);

#[derive(Default)]
struct ResolverInner {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
    backends: Mutex<HashMap<CacheKey, Arc<dyn ResourceBackend>>>,
}

/// Scheme registry and backend cache
#[derive(Clone, Default)]
pub struct Resolver {
    inner: Arc<ResolverInner>,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<_> = self.inner.factories.keys().collect();
        schemes.sort();
        f.debug_struct("Resolver").field("schemes", &schemes).finish()
    }
}

/// Builder for a [`Resolver`]
#[derive(Default)]
pub struct ResolverBuilder {
    factories: HashMap<String, Arc<dyn BackendFactory>>,
}

impl ResolverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `scheme` with backends built by `factory`
    pub fn register(mut self, scheme: &str, factory: impl BackendFactory + 'static) -> Self {
        self.factories
            .insert(scheme.to_ascii_lowercase(), Arc::new(factory));
        self
    }

    /// Serve `scheme` with one shared backend
    pub fn register_backend(self, scheme: &str, backend: Arc<dyn ResourceBackend>) -> Self {
        self.register(scheme, SharedBackend(backend))
    }

    pub fn with_local(self) -> Self {
        self.register_backend(FILE_SCHEME, Arc::new(LocalBackend::new()))
    }

    pub fn with_package_resources(self, resources: PackageResources) -> Self {
        self.register_backend(RESOURCE_SCHEME, Arc::new(resources))
    }

    pub fn build(self) -> Resolver {
        Resolver {
            inner: Arc::new(ResolverInner {
                factories: self.factories,
                backends: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::new()
    }

    /// Resolver serving `file` and an empty `resource` registry
    pub fn local() -> Self {
        Self::builder()
            .with_local()
            .with_package_resources(PackageResources::new())
            .build()
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.inner
            .factories
            .contains_key(&scheme.to_ascii_lowercase())
    }

    /// Parse `input` and bind it to its backend
    pub fn resolve(&self, input: &str) -> Result<ResourcePath> {
        self.resolve_uri(Uri::parse(input)?)
    }

    pub fn resolve_uri(&self, uri: Uri) -> Result<ResourcePath> {
        let backend = self.backend_for(&uri)?;
        Ok(ResourcePath {
            uri,
            backend,
            resolver: self.clone(),
        })
    }

    fn backend_for(&self, uri: &Uri) -> Result<Arc<dyn ResourceBackend>> {
        let scheme = uri.scheme();
        let factory = self.inner.factories.get(scheme).ok_or_else(|| {
            Error::InvalidUri(format!("{uri}: no backend registered for scheme '{scheme}'"))
        })?;

        let key = (scheme.to_string(), uri.authority().cloned());
        if let Some(backend) = self.lock_cache().get(&key) {
            return Ok(backend.clone());
        }

        // Built outside the lock; a concurrent resolve may win the insert
        let created = factory.create(scheme, uri.authority())?;
        let mut cache = self.lock_cache();
        let backend = cache.entry(key).or_insert(created).clone();
        tracing::trace!(uri = %uri, "Resolved backend");
        Ok(backend)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Arc<dyn ResourceBackend>>> {
        self.inner.backends.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A URI bound to the backend serving it
#[derive(Clone)]
pub struct ResourcePath {
    uri: Uri,
    backend: Arc<dyn ResourceBackend>,
    resolver: Resolver,
}

impl fmt::Debug for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePath")
            .field("uri", &self.uri.to_string())
            .field("scheme", &self.backend.scheme())
            .finish()
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.uri.fmt(f)
    }
}

impl ResourcePath {
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn backend(&self) -> &Arc<dyn ResourceBackend> {
        &self.backend
    }

    /// Resolve `relative` against this path, treated as a directory
    pub fn join(&self, relative: &str) -> Result<ResourcePath> {
        self.resolver.resolve_uri(self.uri.join(relative)?)
    }

    pub fn parent(&self) -> Result<ResourcePath> {
        self.resolver.resolve_uri(self.uri.parent())
    }

    pub async fn read(&self, range: Option<ByteRange>) -> Result<Bytes> {
        self.backend.read(&self.uri, range).await
    }

    pub async fn write(&self, data: impl Into<Bytes>, overwrite: bool) -> Result<()> {
        self.backend.write(&self.uri, data.into(), overwrite).await
    }

    pub async fn exists(&self) -> Result<bool> {
        self.backend.exists(&self.uri).await
    }

    pub async fn delete(&self) -> Result<()> {
        self.backend.delete(&self.uri).await
    }

    pub async fn size(&self) -> Result<u64> {
        self.backend.size(&self.uri).await
    }

    pub async fn stat(&self) -> Result<ObjectInfo> {
        self.backend.stat(&self.uri).await
    }

    pub async fn list(&self, options: ListOptions) -> Result<ListResult> {
        self.backend.list(&self.uri, options).await
    }

    pub async fn mkdir(&self) -> Result<()> {
        self.backend.mkdir(&self.uri).await
    }

    /// Copy or move `src` to this path
    ///
    /// Server-side copy is used when both paths share a backend that offers
    /// it; otherwise the bytes are read from `src` and written here. A move
    /// deletes the source once the destination is written.
    pub async fn transfer_from(
        &self,
        src: &ResourcePath,
        mode: TransferMode,
        overwrite: bool,
    ) -> Result<()> {
        if self.uri == src.uri {
            tracing::debug!(uri = %self.uri, "Source and destination are identical; nothing to transfer");
            return Ok(());
        }
        if !overwrite && self.exists().await? {
            return Err(Error::AlreadyExists(self.uri.to_string()));
        }

        let same_backend = std::ptr::addr_eq(Arc::as_ptr(&self.backend), Arc::as_ptr(&src.backend));
        if same_backend && self.backend.capabilities().server_side_copy {
            match self.backend.copy(&src.uri, &self.uri, mode, overwrite).await {
                Ok(()) => return Ok(()),
                Err(Error::Unsupported(reason)) => {
                    tracing::debug!(reason = %reason, "Server-side copy unavailable, streaming instead");
                }
                Err(e) => return Err(e),
            }
        }

        let data = src.read(None).await?;
        tracing::debug!(
            src = %src.uri,
            dst = %self.uri,
            bytes = data.len(),
            "Streaming transfer"
        );
        self.write(data, overwrite).await?;
        if mode == TransferMode::Move {
            src.delete().await?;
        }
        Ok(())
    }
}
