//! In-memory HTTP/WebDAV server speaking through the transport traits

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, EXPECT, LAST_MODIFIED, LOCATION, RANGE};
use http::{HeaderMap, Method, StatusCode};
use rp_core::retry::RetryPolicy;
use rp_core::transport::{Connector, Transport, WireRequest, WireResponse};
use rp_core::{Authority, CredentialMaterial, HttpConfig, PoolConfig, Result};
use rp_http::HttpBackend;
use rp_http::listing::{ListingEntry, ListingPage};

pub const LAST_MODIFIED_VALUE: &str = "Wed, 21 Oct 2015 07:28:00 GMT";

/// What the server saw for one request
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body_len: usize,
}

#[derive(Default)]
struct State {
    /// Keyed by `host[:port]/path`
    files: BTreeMap<String, Bytes>,
    log: Vec<Recorded>,
    /// Statuses answered before normal handling, one per request
    injected: VecDeque<u16>,
    /// Number of upcoming requests that fail at the transport level
    broken: usize,
    /// Number of upcoming requests handled normally whose response is lost
    lost: usize,
    webdav: bool,
    /// Preflight PUTs are redirected to this base URL
    redirect_puts_to: Option<String>,
    /// Preflight PUTs are rejected with this status
    reject_preflight: Option<u16>,
    /// Redirect GETs of one path to another URL
    redirects: BTreeMap<String, String>,
    ignore_ranges: bool,
    page_size: usize,
    delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
    connects: Arc<AtomicU64>,
}

impl FakeServer {
    pub fn new() -> Self {
        let server = Self::default();
        server.state().page_size = 1000;
        server
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn webdav(self) -> Self {
        self.state().webdav = true;
        self
    }

    pub fn page_size(self, size: usize) -> Self {
        self.state().page_size = size;
        self
    }

    pub fn put_file(&self, key: &str, data: &str) {
        self.state()
            .files
            .insert(key.to_string(), Bytes::copy_from_slice(data.as_bytes()));
    }

    pub fn file(&self, key: &str) -> Option<Bytes> {
        self.state().files.get(key).cloned()
    }

    pub fn inject_statuses(&self, statuses: &[u16]) {
        self.state().injected.extend(statuses.iter().copied());
    }

    pub fn break_next(&self, requests: usize) {
        self.state().broken = requests;
    }

    pub fn lose_next_responses(&self, requests: usize) {
        self.state().lost = requests;
    }

    pub fn redirect_puts_to(&self, base: &str) {
        self.state().redirect_puts_to = Some(base.trim_end_matches('/').to_string());
    }

    pub fn reject_preflight(&self, status: u16) {
        self.state().reject_preflight = Some(status);
    }

    pub fn redirect(&self, key: &str, to: &str) {
        self.state().redirects.insert(key.to_string(), to.to_string());
    }

    pub fn ignore_ranges(&self) {
        self.state().ignore_ranges = true;
    }

    pub fn delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    pub fn log(&self) -> Vec<Recorded> {
        self.state().log.clone()
    }

    pub fn requests(&self, method: &str) -> Vec<Recorded> {
        self.log()
            .into_iter()
            .filter(|r| r.method.as_str() == method)
            .collect()
    }

    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    fn handle(&self, request: &WireRequest) -> std::result::Result<WireResponse, String> {
        let mut state = self.state();
        state.log.push(Recorded {
            method: request.method.clone(),
            url: request.url.to_string(),
            headers: request.headers.clone(),
            body_len: request.body.len(),
        });

        if state.broken > 0 {
            state.broken -= 1;
            return Err("connection reset by peer".to_string());
        }
        if let Some(status) = state.injected.pop_front() {
            return Ok(WireResponse::new(StatusCode::from_u16(status).unwrap()));
        }

        let key = file_key(&request.url);
        let method = request.method.as_str();

        if let Some(target) = state.redirects.get(&key)
            && matches!(method, "GET" | "HEAD")
        {
            return Ok(WireResponse::new(StatusCode::FOUND).with_header(LOCATION, target));
        }

        let response = match method {
            "GET" if request.url.query().is_some_and(|q| q.contains("prefix=")) => {
                listing(&state, &request.url)
            }
            "GET" | "HEAD" => match state.files.get(&key) {
                Some(data) => {
                    let (status, body) = match request.headers.get(RANGE) {
                        Some(range) if !state.ignore_ranges => {
                            (StatusCode::PARTIAL_CONTENT, apply_range(data, range.to_str().unwrap()))
                        }
                        _ => (StatusCode::OK, data.clone()),
                    };
                    let response = WireResponse::new(status)
                        .with_header(CONTENT_LENGTH, &body.len().to_string())
                        .with_header(LAST_MODIFIED, LAST_MODIFIED_VALUE)
                        .with_header(http::header::ETAG, "\"etag-1\"");
                    if method == "GET" {
                        response.with_body(body)
                    } else {
                        response
                    }
                }
                None if key.ends_with('/') && state.files.keys().any(|k| k.starts_with(&key)) => {
                    WireResponse::new(StatusCode::OK)
                }
                None => WireResponse::new(StatusCode::NOT_FOUND).with_body("no such file"),
            },
            "PUT" if request.headers.contains_key(EXPECT) && request.body.is_empty() => {
                if let Some(status) = state.reject_preflight {
                    WireResponse::new(StatusCode::from_u16(status).unwrap())
                } else if let Some(base) = &state.redirect_puts_to {
                    let location = format!("{base}{}", request.url.path());
                    WireResponse::new(StatusCode::TEMPORARY_REDIRECT).with_header(LOCATION, &location)
                } else {
                    WireResponse::new(StatusCode::CREATED)
                }
            }
            "PUT" => {
                state.files.insert(key, request.body.clone());
                WireResponse::new(StatusCode::CREATED)
            }
            "DELETE" => match state.files.remove(&key) {
                Some(_) => WireResponse::new(StatusCode::NO_CONTENT),
                None => WireResponse::new(StatusCode::NOT_FOUND),
            },
            "OPTIONS" => {
                let response = WireResponse::new(StatusCode::OK);
                if state.webdav {
                    response.with_header(http::HeaderName::from_static("dav"), "1, 2")
                } else {
                    response
                }
            }
            "MKCOL" if state.webdav => {
                if state.files.contains_key(&key) {
                    WireResponse::new(StatusCode::METHOD_NOT_ALLOWED)
                } else {
                    state.files.insert(key, Bytes::new());
                    WireResponse::new(StatusCode::CREATED)
                }
            }
            "COPY" | "MOVE" if state.webdav => {
                let destination = request
                    .headers
                    .get("destination")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| file_key(&url::Url::parse(v).unwrap()))
                    .unwrap();
                let overwrite = request
                    .headers
                    .get("overwrite")
                    .is_none_or(|v| v == "T");
                if !overwrite && state.files.contains_key(&destination) {
                    WireResponse::new(StatusCode::PRECONDITION_FAILED)
                } else {
                    match state.files.get(&key).cloned() {
                        Some(data) => {
                            state.files.insert(destination, data);
                            if method == "MOVE" {
                                state.files.remove(&key);
                            }
                            WireResponse::new(StatusCode::CREATED)
                        }
                        None => WireResponse::new(StatusCode::NOT_FOUND),
                    }
                }
            }
            _ => WireResponse::new(StatusCode::METHOD_NOT_ALLOWED),
        };
        if state.lost > 0 {
            state.lost -= 1;
            return Err("connection reset before the response arrived".to_string());
        }
        Ok(response)
    }
}

pub fn file_key(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}{}", url.path()),
        None => format!("{host}{}", url.path()),
    }
}

fn apply_range(data: &Bytes, header: &str) -> Bytes {
    let range = header.trim_start_matches("bytes=");
    let (start, end) = range.split_once('-').unwrap();
    let start: usize = start.parse().unwrap();
    let end = if end.is_empty() {
        data.len()
    } else {
        (end.parse::<usize>().unwrap() + 1).min(data.len())
    };
    data.slice(start.min(end)..end)
}

fn listing(state: &State, url: &url::Url) -> WireResponse {
    let dir = file_key(url);
    let params: std::collections::HashMap<String, String> = url.query_pairs().into_owned().collect();
    let prefix = params.get("prefix").cloned().unwrap_or_default();
    let recursive = !params.contains_key("delimiter");
    let after = params.get("continuation-token").cloned();
    let page_size = params
        .get("max-keys")
        .and_then(|m| m.parse::<usize>().ok())
        .unwrap_or(state.page_size)
        .min(state.page_size);

    let mut keys = Vec::new();
    let mut dirs = HashSet::new();
    for (path, data) in state.files.range(dir.clone()..) {
        let Some(rel) = path.strip_prefix(&dir) else {
            break;
        };
        if rel.is_empty() || !rel.starts_with(&prefix) {
            continue;
        }
        match rel.split_once('/') {
            Some((sub, _)) if !recursive => {
                if dirs.insert(sub.to_string()) {
                    keys.push(ListingEntry {
                        key: format!("{sub}/"),
                        is_dir: true,
                        ..Default::default()
                    });
                }
            }
            _ => keys.push(ListingEntry {
                key: rel.to_string(),
                size: data.len() as u64,
                ..Default::default()
            }),
        }
    }
    keys.sort_by(|a, b| a.key.cmp(&b.key));
    if let Some(after) = after {
        keys.retain(|e| e.key > after);
    }

    let is_truncated = keys.len() > page_size;
    keys.truncate(page_size);
    let page = ListingPage {
        next_continuation_token: if is_truncated {
            keys.last().map(|e| e.key.clone())
        } else {
            None
        },
        entries: keys,
        is_truncated,
    };
    WireResponse::new(StatusCode::OK).with_body(serde_json::to_vec(&page).unwrap())
}

#[async_trait]
impl Connector for FakeServer {
    type Connection = FakeConnection;

    async fn connect(&self, authority: &Authority) -> Result<FakeConnection> {
        let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeConnection {
            server: self.clone(),
            authority: authority.clone(),
            id,
        })
    }
}

pub struct FakeConnection {
    server: FakeServer,
    pub authority: Authority,
    pub id: u64,
}

#[async_trait]
impl Transport for FakeConnection {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        let delay = self.server.state().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.server
            .handle(&request)
            .map_err(rp_core::Error::transient)
    }
}

/// Configuration with near-instant retries
pub fn fast_config() -> HttpConfig {
    HttpConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            jitter_ms: 0,
            ..Default::default()
        },
        pool: PoolConfig {
            max_connections: 4,
            acquire_timeout: Duration::from_secs(2),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn backend(
    scheme: &str,
    server: &FakeServer,
    config: &HttpConfig,
    credentials: CredentialMaterial,
) -> HttpBackend<FakeServer> {
    HttpBackend::new(scheme, server.clone(), config, credentials).unwrap()
}

pub fn has_header(recorded: &Recorded, name: impl http::header::AsHeaderName) -> bool {
    recorded.headers.contains_key(name)
}

pub fn bearer(recorded: &Recorded) -> Option<String> {
    recorded
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
