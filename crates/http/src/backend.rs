//! HTTP, WebDAV and S3 backend
//!
//! Every wire exchange goes through the same path: acquire a pooled
//! connection for the target authority, attach credentials, send, then
//! return the connection (or discard it when the channel failed). One
//! logical operation wraps its exchanges in the retry engine.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{
    ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, ETAG, EXPECT, HeaderName, LAST_MODIFIED,
    RANGE,
};
use http::{Method, StatusCode};
use rp_core::pool::{ConnectionPool, PoolStats};
use rp_core::retry::{Idempotency, RetryEngine};
use rp_core::transport::{Connector, Transport, WireRequest, WireResponse};
use rp_core::{
    Authority, ByteRange, Capabilities, CredentialMaterial, Error, HttpConfig, ListOptions,
    ListResult, ObjectInfo, ResourceBackend, Result, TransferMode, Uri,
};
use url::Url;

use crate::listing::{ListingPage, ListingQuery};
use crate::sign::sign_request;

pub const HTTP_SCHEME: &str = "http";
pub const HTTPS_SCHEME: &str = "https";
pub const S3_SCHEME: &str = "s3";

/// Redirect hops followed for GET and HEAD
pub const MAX_REDIRECTS: usize = 5;

const PUT_OK: &[u16] = &[200, 201, 202, 204];
const DELETE_OK: &[u16] = &[200, 202, 204];
const GET_OK: &[u16] = &[200, 206];
const MKCOL_OK: &[u16] = &[201, 405];
const COPY_OK: &[u16] = &[201, 204];
const PREFLIGHT_REDIRECTS: &[u16] = &[307, 308];

const DAV: HeaderName = HeaderName::from_static("dav");
const DESTINATION: HeaderName = HeaderName::from_static("destination");
const OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
const AMZ_COPY_SOURCE: HeaderName = HeaderName::from_static("x-amz-copy-source");

/// One request as issued by an operation, re-sent on every attempt
#[derive(Debug, Clone)]
struct Exchange {
    request: WireRequest,
    follow_redirects: bool,
}

impl Exchange {
    fn new(method: Method, url: Url) -> Self {
        Self {
            request: WireRequest::new(method, url),
            follow_redirects: false,
        }
    }

    fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        self.request.set_header(name, value)?;
        Ok(self)
    }

    fn body(mut self, body: Bytes) -> Self {
        self.request.body = body;
        self
    }

    fn follow_redirects(mut self) -> Self {
        self.follow_redirects = true;
        self
    }
}

/// Backend for `http`, `https` and `s3` URIs
pub struct HttpBackend<C>
where
    C: Connector,
    C::Connection: Transport,
{
    scheme: String,
    pool: ConnectionPool<C>,
    retry: RetryEngine,
    credentials: CredentialMaterial,
    send_expect_header: bool,
    expect_threshold: u64,
    s3_endpoint: String,
    webdav: Mutex<HashMap<Authority, bool>>,
}

impl<C> HttpBackend<C>
where
    C: Connector,
    C::Connection: Transport,
{
    /// Build a backend for `scheme` with a pool of its own over `connector`
    ///
    /// A background reaper for idle connections is started when called
    /// inside a tokio runtime.
    pub fn new(
        scheme: &str,
        connector: C,
        config: &HttpConfig,
        credentials: CredentialMaterial,
    ) -> Result<Self> {
        let pool = ConnectionPool::new(connector, config.pool.clone());
        let backend = Self::with_pool(scheme, pool, config, credentials)?;
        backend.pool.spawn_reaper();
        Ok(backend)
    }

    /// Build a backend for `scheme` on an existing, possibly shared, pool
    ///
    /// The pool caps connections per host:port the requests are sent to,
    /// so backends sharing it share that cap whatever URI authority they
    /// serve. Its reaper is the pool owner's business.
    pub fn with_pool(
        scheme: &str,
        pool: ConnectionPool<C>,
        config: &HttpConfig,
        credentials: CredentialMaterial,
    ) -> Result<Self> {
        let scheme = scheme.to_ascii_lowercase();
        if ![HTTP_SCHEME, HTTPS_SCHEME, S3_SCHEME].contains(&scheme.as_str()) {
            return Err(Error::InvalidUri(format!(
                "scheme '{scheme}' is not served by the HTTP backend"
            )));
        }
        if scheme == S3_SCHEME {
            Url::parse(&config.object_store.endpoint).map_err(|e| {
                Error::Config(format!(
                    "invalid object-store endpoint '{}': {e}",
                    config.object_store.endpoint
                ))
            })?;
        }

        Ok(Self {
            scheme,
            pool,
            retry: RetryEngine::new(config.retry.clone()),
            credentials,
            send_expect_header: config.send_expect_header,
            expect_threshold: config.expect_threshold,
            s3_endpoint: config.object_store.endpoint.trim_end_matches('/').to_string(),
            webdav: Mutex::new(HashMap::new()),
        })
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    fn is_s3(&self) -> bool {
        self.scheme == S3_SCHEME
    }

    /// Wire URL for `uri`; `s3://bucket/key` maps path-style onto the endpoint
    pub fn url_for(&self, uri: &Uri) -> Result<Url> {
        if uri.scheme() != self.scheme {
            return Err(Error::InvalidUri(format!(
                "{uri}: expected a {} URI",
                self.scheme
            )));
        }
        if !self.is_s3() {
            return uri.to_url();
        }

        let bucket = uri
            .authority()
            .ok_or_else(|| Error::InvalidUri(format!("{uri}: missing bucket")))?;
        let raw = format!("{}/{}{}", self.s3_endpoint, bucket.host(), uri.path());
        Url::parse(&raw).map_err(|e| Error::InvalidUri(format!("{uri}: {e}")))
    }

    fn authorize(&self, request: &mut WireRequest) -> Result<()> {
        if let Some(token) = self.credentials.bearer_token() {
            request.set_header(AUTHORIZATION, &format!("Bearer {token}"))?;
        }
        if self.is_s3()
            && let Some(keys) = &self.credentials.signing
        {
            sign_request(request, keys, SystemTime::now())?;
        }
        Ok(())
    }

    /// One exchange on one pooled connection
    async fn send_once(&self, mut request: WireRequest) -> Result<WireResponse> {
        let authority = request.authority()?;
        let connection = self
            .pool
            .acquire(&authority, self.pool.config().acquire_timeout)
            .await?;
        self.authorize(&mut request)?;

        let method = request.method.clone();
        let url = request.url.clone();
        let outcome = connection.send(request).await;
        match outcome {
            Ok(response) => {
                connection.release(true);
                tracing::debug!(
                    method = %method,
                    url = %url,
                    status = response.status.as_u16(),
                    "HTTP exchange"
                );
                Ok(response)
            }
            Err(e) => {
                connection.release(false);
                tracing::debug!(method = %method, url = %url, error = %e, "HTTP exchange failed");
                Err(e)
            }
        }
    }

    /// One attempt, following redirects when the exchange allows it
    async fn attempt(&self, exchange: &Exchange, accept: &[u16]) -> Result<WireResponse> {
        let mut request = exchange.request.clone();
        let mut hops = 0;
        loop {
            let response = self.send_once(request.clone()).await?;
            let status = response.status.as_u16();
            if accept.contains(&status) {
                return Ok(response);
            }

            if exchange.follow_redirects
                && let Some(target) = response.redirect_target(&request.url)
            {
                hops += 1;
                if hops > MAX_REDIRECTS {
                    return Err(Error::permanent(
                        status,
                        exchange.request.url.as_str(),
                        format!("more than {MAX_REDIRECTS} redirects"),
                    ));
                }
                tracing::debug!(from = %request.url, to = %target, "Following redirect");
                if response.status == StatusCode::SEE_OTHER {
                    request.method = Method::GET;
                    request.body = Bytes::new();
                }
                request.url = target;
                continue;
            }

            return Err(self.retry.policy().classify_status(
                status,
                request.url.as_str(),
                &response.body_hint(),
            ));
        }
    }

    /// Run `exchange` under the retry engine until one attempt is accepted
    async fn execute(
        &self,
        exchange: Exchange,
        idempotency: Idempotency,
        accept: &[u16],
    ) -> Result<WireResponse> {
        self.retry
            .execute(idempotency, || self.attempt(&exchange, accept))
            .await
    }

    async fn head(&self, uri: &Uri) -> Result<WireResponse> {
        let exchange = Exchange::new(Method::HEAD, self.url_for(uri)?).follow_redirects();
        self.execute(exchange, Idempotency::Idempotent, GET_OK)
            .await
    }

    /// Send the empty negotiation PUT; returns where the body should go
    async fn preflight(&self, url: &Url) -> Result<Url> {
        let exchange = Exchange::new(Method::PUT, url.clone())
            .header(EXPECT, "100-continue")?
            .header(CONTENT_LENGTH, "0")?;
        let accept: Vec<u16> = PUT_OK.iter().chain(PREFLIGHT_REDIRECTS).copied().collect();
        let response = self
            .execute(exchange, Idempotency::Idempotent, &accept)
            .await?;

        match response.redirect_target(url) {
            Some(target) if PREFLIGHT_REDIRECTS.contains(&response.status.as_u16()) => {
                tracing::debug!(from = %url, to = %target, "Write redirected by preflight");
                Ok(target)
            }
            _ => Ok(url.clone()),
        }
    }

    /// Whether the server at `url` speaks WebDAV, probed once per authority
    async fn is_webdav(&self, url: &Url) -> Result<bool> {
        if self.is_s3() {
            return Ok(false);
        }
        let authority = rp_core::transport::authority_of(url)?;
        if let Some(known) = self.lock_webdav().get(&authority) {
            return Ok(*known);
        }

        let mut root = url.clone();
        root.set_path("/");
        root.set_query(None);
        let exchange = Exchange::new(Method::OPTIONS, root);
        let accept: Vec<u16> = (200..300).collect();
        let webdav = match self.execute(exchange, Idempotency::Idempotent, &accept).await {
            Ok(response) => response
                .header_str(&DAV)
                .is_some_and(|v| !v.trim().is_empty()),
            Err(Error::PermanentRequest { status, .. }) => {
                tracing::debug!(authority = %authority, status = status, "OPTIONS rejected; assuming plain HTTP");
                false
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(authority = %authority, webdav = webdav, "Probed server capabilities");
        self.lock_webdav().insert(authority, webdav);
        Ok(webdav)
    }

    fn lock_webdav(&self) -> std::sync::MutexGuard<'_, HashMap<Authority, bool>> {
        self.webdav.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn list_page(
        &self,
        uri: &Uri,
        options: &ListOptions,
        token: Option<&str>,
        max_keys: Option<usize>,
    ) -> Result<ListingPage> {
        let directory = self.url_for(&uri.as_directory())?;
        let url = ListingQuery {
            prefix: options.prefix.as_deref(),
            recursive: options.recursive,
            continuation_token: token,
            max_keys,
        }
        .apply(&directory);

        let exchange = Exchange::new(Method::GET, url.clone())
            .header(ACCEPT, "application/json")?
            .follow_redirects();
        let response = self
            .execute(exchange, Idempotency::Idempotent, GET_OK)
            .await?;
        ListingPage::parse(&response.body, &url)
    }
}

fn stat_from_head(key: &str, response: &WireResponse) -> ObjectInfo {
    let mut info = ObjectInfo::file(key, response.content_length().unwrap_or(0));
    info.last_modified = response.header_str(&LAST_MODIFIED).and_then(|v| {
        jiff::fmt::rfc2822::DateTimeParser::new()
            .parse_timestamp(v)
            .ok()
    });
    info.etag = response
        .header_str(&ETAG)
        .map(|v| v.trim_start_matches("W/").trim_matches('"').to_string());
    info.content_type = response.header_str(&CONTENT_TYPE).map(str::to_string);
    info
}

#[async_trait]
impl<C> ResourceBackend for HttpBackend<C>
where
    C: Connector,
    C::Connection: Transport,
{
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            write: true,
            delete: true,
            mkdir: true,
            server_side_copy: true,
        }
    }

    async fn read(&self, uri: &Uri, range: Option<ByteRange>) -> Result<Bytes> {
        let mut exchange = Exchange::new(Method::GET, self.url_for(uri)?).follow_redirects();
        if let Some(range) = &range {
            exchange = exchange.header(RANGE, &range.header_value())?;
        }

        let response = self
            .execute(exchange, Idempotency::Idempotent, GET_OK)
            .await?;
        match range {
            // Server ignored the range and sent everything
            Some(range) if response.status == StatusCode::OK => Ok(range.slice(&response.body)),
            _ => Ok(response.body),
        }
    }

    async fn write(&self, uri: &Uri, data: Bytes, overwrite: bool) -> Result<()> {
        if uri.is_dir_like() {
            return Err(Error::InvalidUri(format!("{uri}: cannot write to a directory")));
        }
        if !overwrite && self.exists(uri).await? {
            return Err(Error::AlreadyExists(uri.to_string()));
        }

        let url = self.url_for(uri)?;
        let negotiate = self.send_expect_header && data.len() as u64 > self.expect_threshold;
        let (target, idempotency) = if negotiate {
            (self.preflight(&url).await?, Idempotency::ProvenSafe)
        } else {
            (url, Idempotency::NonIdempotent)
        };

        let len = data.len();
        let exchange = Exchange::new(Method::PUT, target).body(data);
        self.execute(exchange, idempotency, PUT_OK).await?;
        tracing::debug!(uri = %uri, bytes = len, negotiated = negotiate, "Wrote resource");
        Ok(())
    }

    async fn exists(&self, uri: &Uri) -> Result<bool> {
        let result = if self.is_s3() && uri.is_dir_like() && !uri.is_root() {
            let options = ListOptions::default();
            self.list_page(uri, &options, None, Some(1))
                .await
                .map(|page| !page.entries.is_empty())
        } else {
            self.head(uri).await.map(|_| true)
        };

        match result {
            Err(e) if e.is_not_found() => Ok(false),
            other => other,
        }
    }

    async fn delete(&self, uri: &Uri) -> Result<()> {
        let exchange = Exchange::new(Method::DELETE, self.url_for(uri)?);
        let attempts = AtomicU32::new(0);
        let result = self
            .retry
            .execute(Idempotency::Idempotent, || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.attempt(&exchange, DELETE_OK)
            })
            .await;

        match result {
            // An earlier attempt removed it before its response was lost
            Err(e) if e.is_not_found() && attempts.load(Ordering::Relaxed) > 1 => {
                tracing::debug!(uri = %uri, "Resource already gone on retried delete");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn size(&self, uri: &Uri) -> Result<u64> {
        if uri.is_dir_like() {
            return Ok(0);
        }
        let response = self.head(uri).await?;
        response.content_length().ok_or_else(|| {
            Error::Unsupported(format!("{uri}: server does not report a Content-Length"))
        })
    }

    async fn stat(&self, uri: &Uri) -> Result<ObjectInfo> {
        if uri.is_dir_like() {
            if self.exists(uri).await? {
                return Ok(ObjectInfo::dir(uri.path()));
            }
            return Err(Error::permanent(404, uri.to_string(), "resource not found"));
        }
        let response = self.head(uri).await?;
        Ok(stat_from_head(uri.path(), &response))
    }

    async fn list(&self, uri: &Uri, options: ListOptions) -> Result<ListResult> {
        let limit = options.max_keys.map(|m| m.max(1));
        let mut items = Vec::new();
        let mut token = options.continuation_token.clone();

        loop {
            let remaining = limit.map(|l| l - items.len());
            let page = self
                .list_page(uri, &options, token.as_deref(), remaining)
                .await?;
            items.extend(page.entries.into_iter().map(ObjectInfo::from));

            let next = page.next_continuation_token.filter(|_| page.is_truncated);
            let Some(next) = next else {
                token = None;
                break;
            };
            token = Some(next);
            if limit.is_some_and(|l| items.len() >= l) {
                break;
            }
        }

        if let Some(limit) = limit
            && items.len() > limit
        {
            items.truncate(limit);
        }
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(ListResult {
            items,
            truncated: token.is_some(),
            continuation_token: token,
        })
    }

    async fn mkdir(&self, uri: &Uri) -> Result<()> {
        if !uri.is_dir_like() {
            return Err(Error::InvalidUri(format!(
                "{uri}: directory URIs must end with '/'"
            )));
        }

        if self.is_s3() {
            // Buckets are not created; the bucket root needs no marker
            if uri.is_root() || self.exists(uri).await? {
                return Ok(());
            }
            let exchange = Exchange::new(Method::PUT, self.url_for(uri)?);
            self.execute(exchange, Idempotency::Idempotent, PUT_OK)
                .await?;
            return Ok(());
        }

        let url = self.url_for(uri)?;
        if !self.is_webdav(&url).await? {
            return Err(Error::Unsupported(format!(
                "{uri}: server does not support WebDAV directory creation"
            )));
        }
        if uri.is_root() || self.exists(uri).await? {
            return Ok(());
        }

        let parent = uri.parent();
        if !parent.is_root() && !self.exists(&parent).await? {
            self.mkdir(&parent).await?;
        }

        let mkcol = Method::from_bytes(b"MKCOL").map_err(|e| Error::Config(e.to_string()))?;
        let exchange = Exchange::new(mkcol, url);
        let response = self
            .execute(exchange, Idempotency::Idempotent, MKCOL_OK)
            .await?;
        if response.status == StatusCode::METHOD_NOT_ALLOWED {
            tracing::debug!(uri = %uri, "Directory already exists");
        }
        Ok(())
    }

    async fn copy(&self, src: &Uri, dst: &Uri, mode: TransferMode, overwrite: bool) -> Result<()> {
        let from = self.url_for(src)?;
        let to = self.url_for(dst)?;

        if self.is_s3() {
            let bucket = src
                .authority()
                .ok_or_else(|| Error::InvalidUri(format!("{src}: missing bucket")))?;
            let source = format!("/{}{}", bucket.host(), src.path());
            let exchange = Exchange::new(Method::PUT, to).header(AMZ_COPY_SOURCE, &source)?;
            self.execute(exchange, Idempotency::Idempotent, PUT_OK)
                .await?;
            if mode == TransferMode::Move {
                self.delete(src).await?;
            }
            return Ok(());
        }

        if rp_core::transport::authority_of(&from)? != rp_core::transport::authority_of(&to)? {
            return Err(Error::Unsupported(format!(
                "server-side copy from {src} to {dst} crosses servers"
            )));
        }
        if !self.is_webdav(&from).await? {
            return Err(Error::Unsupported(format!(
                "{src}: server does not support WebDAV copy"
            )));
        }

        let (method, idempotency) = match mode {
            TransferMode::Copy => (Method::from_bytes(b"COPY"), Idempotency::Idempotent),
            TransferMode::Move => (Method::from_bytes(b"MOVE"), Idempotency::NonIdempotent),
        };
        let method = method.map_err(|e| Error::Config(e.to_string()))?;
        let exchange = Exchange::new(method, from)
            .header(DESTINATION, to.as_str())?
            .header(OVERWRITE, if overwrite { "T" } else { "F" })?;

        match self.execute(exchange, idempotency, COPY_OK).await {
            Err(Error::PermanentRequest { status: 412, .. }) => {
                Err(Error::AlreadyExists(dst.to_string()))
            }
            other => other.map(|_| ()),
        }
    }
}
