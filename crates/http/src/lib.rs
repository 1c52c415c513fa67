//! rp-http: network backends for respath
//!
//! Serves `http`, `https` (plain HTTP and WebDAV) and `s3` (path-style,
//! SigV4-signed) URIs on top of the connection pool and retry engine from
//! `rp-core`, with reqwest on the wire.

pub mod backend;
pub mod listing;
pub mod sign;
pub mod transport;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rp_core::dispatch::{BackendFactory, Resolver};
use rp_core::{
    Authority, ConnectionPool, CredentialMaterial, CredentialProvider, Error, HttpConfig,
    PackageResources, ResourceBackend, Result,
};

pub use backend::{HTTP_SCHEME, HTTPS_SCHEME, HttpBackend, MAX_REDIRECTS, S3_SCHEME};
pub use transport::{ReqwestConnector, ReqwestTransport};

/// TLS material a connector is built from; connections are only
/// interchangeable between requests that agree on it
type TlsIdentity = (Option<PathBuf>, Option<(PathBuf, PathBuf)>);

type SharedPools = Arc<Mutex<HashMap<TlsIdentity, ConnectionPool<ReqwestConnector>>>>;

/// Builds one reqwest-backed [`HttpBackend`] per (scheme, authority)
///
/// Credentials are resolved when the backend is built, so a broken
/// authentication setup is reported by `Resolver::resolve`. Backends with
/// the same TLS material share one connection pool, so the per-host cap
/// holds across every `s3` bucket on one endpoint and across redirects
/// that land on the same server.
#[derive(Clone)]
pub struct HttpBackendFactory {
    config: HttpConfig,
    provider: CredentialProvider,
    pools: SharedPools,
}

impl std::fmt::Debug for HttpBackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackendFactory")
            .field("config", &self.config)
            .field("pools", &self.lock_pools().len())
            .finish()
    }
}

impl HttpBackendFactory {
    pub fn new(config: HttpConfig) -> Self {
        let provider = CredentialProvider::from_config(&config);
        Self {
            config,
            provider,
            pools: Arc::default(),
        }
    }

    fn lock_pools(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<TlsIdentity, ConnectionPool<ReqwestConnector>>> {
        self.pools.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The pool for `material`, created with its reaper on first use
    pub fn pool_for(&self, material: &CredentialMaterial) -> Result<ConnectionPool<ReqwestConnector>> {
        let identity: TlsIdentity = (
            material.ca_bundle.clone(),
            material
                .client_certificate()
                .map(|(cert, key)| (cert.to_path_buf(), key.to_path_buf())),
        );

        let mut pools = self.lock_pools();
        if let Some(pool) = pools.get(&identity) {
            return Ok(pool.clone());
        }
        let connector = ReqwestConnector::new(
            material,
            self.config.connect_timeout,
            self.config.read_timeout,
        )?;
        let pool = ConnectionPool::new(connector, self.config.pool.clone());
        pool.spawn_reaper();
        tracing::debug!(pools = pools.len() + 1, "Created connection pool");
        pools.insert(identity, pool.clone());
        Ok(pool)
    }
}

impl BackendFactory for HttpBackendFactory {
    fn create(&self, scheme: &str, authority: Option<&Authority>) -> Result<Arc<dyn ResourceBackend>> {
        let authority = authority
            .ok_or_else(|| Error::InvalidUri(format!("{scheme} URIs need an authority")))?;
        let material = self.provider.resolve(authority)?;
        let pool = self.pool_for(&material)?;
        let backend = HttpBackend::with_pool(scheme, pool, &self.config, material)?;
        tracing::debug!(scheme = scheme, authority = %authority, "Created HTTP backend");
        Ok(Arc::new(backend))
    }
}

/// Resolver serving `file`, `resource`, `http`, `https` and `s3`
pub fn default_resolver(config: HttpConfig) -> Resolver {
    resolver_with_resources(config, PackageResources::new())
}

/// Like [`default_resolver`], with a populated package-resource registry
pub fn resolver_with_resources(config: HttpConfig, resources: PackageResources) -> Resolver {
    let factory = HttpBackendFactory::new(config);
    Resolver::builder()
        .with_local()
        .with_package_resources(resources)
        .register(HTTP_SCHEME, factory.clone())
        .register(HTTPS_SCHEME, factory.clone())
        .register(S3_SCHEME, factory)
        .build()
}
