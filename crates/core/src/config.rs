//! Backend configuration
//!
//! All tunables of the HTTP backend are read once, at construction time, into
//! an immutable [`HttpConfig`]. Request-handling code never consults the
//! process environment directly.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pool::PoolConfig;
use crate::retry::RetryPolicy;

/// Names of the environment variables understood by [`HttpConfig::from_env`]
pub mod env {
    pub const CACERT_BUNDLE: &str = "LSST_HTTP_CACERT_BUNDLE";
    pub const AUTH_BEARER_TOKEN: &str = "LSST_HTTP_AUTH_BEARER_TOKEN";
    pub const AUTH_CLIENT_CERT: &str = "LSST_HTTP_AUTH_CLIENT_CERT";
    pub const AUTH_CLIENT_KEY: &str = "LSST_HTTP_AUTH_CLIENT_KEY";
    pub const PUT_SEND_EXPECT_HEADER: &str = "LSST_HTTP_PUT_SEND_EXPECT_HEADER";
    pub const PUT_EXPECT_THRESHOLD: &str = "LSST_HTTP_PUT_EXPECT_THRESHOLD";
    pub const TIMEOUT_CONNECT: &str = "LSST_HTTP_TIMEOUT_CONNECT";
    pub const TIMEOUT_READ: &str = "LSST_HTTP_TIMEOUT_READ";
    pub const MAX_CONNECTIONS: &str = "LSST_HTTP_MAX_CONNECTIONS";
    pub const POOL_ACQUIRE_TIMEOUT: &str = "LSST_HTTP_POOL_ACQUIRE_TIMEOUT";
    pub const POOL_MAX_IDLE: &str = "LSST_HTTP_POOL_MAX_IDLE";
    pub const MAX_ATTEMPTS: &str = "LSST_HTTP_MAX_ATTEMPTS";
    pub const BACKOFF_BASE_MS: &str = "LSST_HTTP_BACKOFF_BASE_MS";
    pub const BACKOFF_MAX_MS: &str = "LSST_HTTP_BACKOFF_MAX_MS";
    pub const S3_ENDPOINT_URL: &str = "S3_ENDPOINT_URL";
    pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
    pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
    pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
    pub const AWS_REGION: &str = "AWS_REGION";
    pub const AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
}

/// Payload size above which writes negotiate with the server first
pub const DEFAULT_EXPECT_THRESHOLD: u64 = 1024 * 1024;

const DEFAULT_S3_ENDPOINT: &str = "https://s3.amazonaws.com";
const DEFAULT_REGION: &str = "us-east-1";

/// Raw authentication settings, before any file is touched
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthSettings {
    /// CA bundle used to verify server certificates
    pub ca_bundle: Option<PathBuf>,
    /// Bearer token value, or path to a file holding it
    pub bearer_token: Option<String>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("ca_bundle", &self.ca_bundle)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "***"))
            .field("client_cert", &self.client_cert)
            .field("client_key", &self.client_key)
            .finish()
    }
}

/// Object-store endpoint and static signing keys
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ObjectStoreSettings {
    /// Base URL that `s3://bucket/key` is mapped onto (path-style)
    pub endpoint: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for ObjectStoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreSettings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Immutable configuration for the HTTP backend
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub auth: AuthSettings,
    /// Enable the two-phase write negotiation for large payloads
    pub send_expect_header: bool,
    /// Writes strictly larger than this many bytes are negotiated first
    pub expect_threshold: u64,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    pub object_store: ObjectStoreSettings,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            auth: AuthSettings::default(),
            send_expect_header: false,
            expect_threshold: DEFAULT_EXPECT_THRESHOLD,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(300),
            pool: PoolConfig::default(),
            retry: RetryPolicy::default(),
            object_store: ObjectStoreSettings {
                endpoint: DEFAULT_S3_ENDPOINT.to_string(),
                region: DEFAULT_REGION.to_string(),
                ..Default::default()
            },
        }
    }
}

impl HttpConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    ///
    /// Empty values are treated as unset, except for the expect-header
    /// toggle where mere presence enables it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.auth = AuthSettings {
            ca_bundle: get(env::CACERT_BUNDLE).map(PathBuf::from),
            bearer_token: get(env::AUTH_BEARER_TOKEN),
            client_cert: get(env::AUTH_CLIENT_CERT).map(PathBuf::from),
            client_key: get(env::AUTH_CLIENT_KEY).map(PathBuf::from),
        };

        if let Some(raw) = lookup(env::PUT_SEND_EXPECT_HEADER) {
            config.send_expect_header = raw.trim().is_empty()
                || parse_bool(env::PUT_SEND_EXPECT_HEADER, &raw)?;
        }
        if let Some(raw) = get(env::PUT_EXPECT_THRESHOLD) {
            config.expect_threshold = parse_u64(env::PUT_EXPECT_THRESHOLD, &raw)?;
        }
        if let Some(raw) = get(env::TIMEOUT_CONNECT) {
            config.connect_timeout = parse_secs(env::TIMEOUT_CONNECT, &raw)?;
        }
        if let Some(raw) = get(env::TIMEOUT_READ) {
            config.read_timeout = parse_secs(env::TIMEOUT_READ, &raw)?;
        }

        if let Some(raw) = get(env::MAX_CONNECTIONS) {
            let max = parse_u64(env::MAX_CONNECTIONS, &raw)?;
            if max == 0 {
                return Err(Error::Config(format!(
                    "{}: must be at least 1",
                    env::MAX_CONNECTIONS
                )));
            }
            config.pool.max_connections = max as usize;
            config.pool.max_idle = config.pool.max_idle.min(config.pool.max_connections);
        }
        if let Some(raw) = get(env::POOL_ACQUIRE_TIMEOUT) {
            config.pool.acquire_timeout = parse_secs(env::POOL_ACQUIRE_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get(env::POOL_MAX_IDLE) {
            config.pool.max_idle_duration = parse_secs(env::POOL_MAX_IDLE, &raw)?;
        }

        if let Some(raw) = get(env::MAX_ATTEMPTS) {
            let attempts = parse_u64(env::MAX_ATTEMPTS, &raw)?;
            if attempts == 0 {
                return Err(Error::Config(format!(
                    "{}: must be at least 1",
                    env::MAX_ATTEMPTS
                )));
            }
            config.retry.max_attempts = attempts.min(u32::MAX as u64) as u32;
        }
        if let Some(raw) = get(env::BACKOFF_BASE_MS) {
            config.retry.initial_backoff_ms = parse_u64(env::BACKOFF_BASE_MS, &raw)?;
        }
        if let Some(raw) = get(env::BACKOFF_MAX_MS) {
            config.retry.max_backoff_ms = parse_u64(env::BACKOFF_MAX_MS, &raw)?;
        }

        if let Some(endpoint) = get(env::S3_ENDPOINT_URL) {
            config.object_store.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(region) = get(env::AWS_REGION).or_else(|| get(env::AWS_DEFAULT_REGION)) {
            config.object_store.region = region;
        }
        config.object_store.access_key_id = get(env::AWS_ACCESS_KEY_ID);
        config.object_store.secret_access_key = get(env::AWS_SECRET_ACCESS_KEY);
        config.object_store.session_token = get(env::AWS_SESSION_TOKEN);

        Ok(config)
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{name}: expected a boolean, got '{other}'"))),
    }
}

fn parse_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| Error::Config(format!("{name}: '{raw}' is not a non-negative integer ({e})")))
}

fn parse_secs(name: &str, raw: &str) -> Result<Duration> {
    let secs = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| Error::Config(format!("{name}: '{raw}' is not a number of seconds ({e})")))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(Error::Config(format!("{name}: '{raw}' is out of range")));
    }
    Ok(Duration::from_secs_f64(secs))
}
