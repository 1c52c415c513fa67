//! reqwest-backed connections
//!
//! Each pooled connection is its own `reqwest::Client` limited to a single
//! idle socket, so dropping the connection closes the socket and the pool
//! in `rp-core` stays the only place deciding reuse. Redirects are never
//! followed here; the backend decides which redirects to honor.

use std::time::Duration;

use async_trait::async_trait;
use rp_core::transport::{Connector, Transport, WireRequest, WireResponse};
use rp_core::{Authority, CredentialMaterial, Error, Result};

const USER_AGENT: &str = concat!("respath/", env!("CARGO_PKG_VERSION"));

/// Opens [`ReqwestTransport`] connections with the resolved TLS material
#[derive(Clone)]
pub struct ReqwestConnector {
    roots: Vec<reqwest::Certificate>,
    identity: Option<reqwest::Identity>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl std::fmt::Debug for ReqwestConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestConnector")
            .field("extra_roots", &self.roots.len())
            .field("client_identity", &self.identity.is_some())
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl ReqwestConnector {
    /// Load the CA bundle and client identity named by `material`
    pub fn new(
        material: &CredentialMaterial,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let roots = match &material.ca_bundle {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    Error::AuthConfiguration(format!("cannot read CA bundle {}: {e}", path.display()))
                })?;
                reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                    Error::AuthConfiguration(format!("invalid CA bundle {}: {e}", path.display()))
                })?
            }
            None => Vec::new(),
        };

        let identity = match material.client_certificate() {
            Some((cert, key)) => {
                let mut pem = std::fs::read(cert).map_err(|e| {
                    Error::AuthConfiguration(format!(
                        "cannot read client certificate {}: {e}",
                        cert.display()
                    ))
                })?;
                pem.push(b'\n');
                pem.extend(std::fs::read(key).map_err(|e| {
                    Error::AuthConfiguration(format!("cannot read client key {}: {e}", key.display()))
                })?);
                Some(reqwest::Identity::from_pem(&pem).map_err(|e| {
                    Error::AuthConfiguration(format!("invalid client certificate or key: {e}"))
                })?)
            }
            None => None,
        };

        Ok(Self {
            roots,
            identity,
            connect_timeout,
            read_timeout,
        })
    }

    fn build_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .pool_max_idle_per_host(1);

        for root in &self.roots {
            builder = builder.add_root_certificate(root.clone());
        }
        if let Some(identity) = &self.identity {
            builder = builder.identity(identity.clone());
        }

        builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
    }
}

#[async_trait]
impl Connector for ReqwestConnector {
    type Connection = ReqwestTransport;

    async fn connect(&self, authority: &Authority) -> Result<ReqwestTransport> {
        tracing::trace!(authority = %authority, "Building HTTP client");
        Ok(ReqwestTransport {
            client: self.build_client()?,
        })
    }
}

/// One reqwest client holding at most one keep-alive socket
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        let WireRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(WireResponse {
            status,
            headers,
            body,
        })
    }
}

/// Failures before a status arrived are transient, except malformed requests
fn map_reqwest_error(error: reqwest::Error) -> Error {
    if error.is_builder() {
        return Error::Config(format!("invalid request: {error}"));
    }

    let kind = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connection failed"
    } else if error.is_body() || error.is_decode() {
        "response body interrupted"
    } else {
        "request failed"
    };
    let url = error
        .url()
        .map(|u| u.to_string())
        .unwrap_or_else(|| "<unknown>".to_string());
    Error::transient(format!("{url}: {kind}: {error}"))
}
