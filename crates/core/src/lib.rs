//! rp-core: scheme-polymorphic resource paths
//!
//! This crate provides the backend-independent parts of respath:
//! - URI parsing and normalization
//! - The capability contract every backend implements
//! - Dispatch from a URI to the backend serving its scheme
//! - The retry engine and the per-authority connection pool
//! - Credential resolution and environment configuration
//! - Local filesystem and package-resource backends
//!
//! Network backends live in `rp-http` and plug in through
//! [`ResolverBuilder::register`].

pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod local;
pub mod package;
pub mod pool;
pub mod retry;
pub mod traits;
pub mod transport;
pub mod uri;

pub use config::HttpConfig;
pub use credentials::{Auth, CredentialMaterial, CredentialProvider, SigningKeys};
pub use dispatch::{BackendFactory, ResourcePath, Resolver, ResolverBuilder};
pub use error::{Error, Result};
pub use local::LocalBackend;
pub use package::PackageResources;
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use retry::{Idempotency, RetryBuilder, RetryEngine, RetryPolicy, is_retryable_error, retry_with_backoff};
pub use traits::{
    ByteRange, Capabilities, ListOptions, ListResult, ObjectInfo, ResourceBackend, TransferMode,
};
pub use transport::{Connector, Transport, WireRequest, WireResponse};
pub use uri::{Authority, Uri};
