//! Wire-level request/response types and the transport seams
//!
//! A [`Connector`] opens connections bound to one authority; each connection
//! is a [`Transport`] able to exchange one request at a time. The HTTP
//! backend only speaks in these terms, which keeps the connection pool and
//! retry engine independent of the HTTP client library in use.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use url::Url;

use crate::error::{Error, Result};
use crate::uri::Authority;

/// One outgoing request
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WireRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Set a header, replacing any previous value
    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        self.set_header(name, value)?;
        Ok(self)
    }

    pub fn set_header(&mut self, name: HeaderName, value: &str) -> Result<()> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("invalid value for header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Authority the request is addressed to
    pub fn authority(&self) -> Result<Authority> {
        authority_of(&self.url)
    }
}

/// One response, with the body fully buffered
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WireResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header_str(&CONTENT_LENGTH)
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Target of a redirect response, resolved against `base`
    pub fn redirect_target(&self, base: &Url) -> Option<Url> {
        if !self.status.is_redirection() {
            return None;
        }
        let location = self.header_str(&LOCATION)?;
        base.join(location).ok()
    }

    /// Short printable excerpt of the body, for error messages
    pub fn body_hint(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        match text.char_indices().nth(200) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text.to_string(),
        }
    }
}

/// A connection able to carry one request at a time
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and buffer the whole response
    ///
    /// Only failures of the channel itself are errors; any HTTP status,
    /// including 4xx and 5xx, is a successful exchange.
    async fn send(&self, request: WireRequest) -> Result<WireResponse>;
}

/// Opens new connections bound to one authority
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self, authority: &Authority) -> Result<Self::Connection>;
}

/// Authority (host and explicit port) of a URL
pub fn authority_of(url: &Url) -> Result<Authority> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::InvalidUri(format!("{url}: missing host")))?;
    Ok(Authority::new(host, url.port()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers() {
        let url = Url::parse("https://example.org/a").unwrap();
        let request = WireRequest::new(Method::GET, url)
            .header(http::header::RANGE, "bytes=0-9")
            .unwrap()
            .body("payload");
        assert_eq!(request.headers.get(http::header::RANGE).unwrap(), "bytes=0-9");
        assert_eq!(request.body, Bytes::from_static(b"payload"));
        assert_eq!(request.authority().unwrap().to_string(), "example.org");

        let mut bad = WireRequest::new(Method::GET, Url::parse("http://h:81/").unwrap());
        assert!(bad.set_header(http::header::AUTHORIZATION, "bad\nvalue").is_err());
        assert_eq!(bad.authority().unwrap().to_string(), "h:81");
    }

    #[test]
    fn test_response_helpers() {
        let base = Url::parse("https://example.org/dir/file").unwrap();
        let response = WireResponse::new(StatusCode::TEMPORARY_REDIRECT)
            .with_header(LOCATION, "https://other.org/x");
        assert_eq!(
            response.redirect_target(&base).unwrap().as_str(),
            "https://other.org/x"
        );

        let relative = WireResponse::new(StatusCode::FOUND).with_header(LOCATION, "../y");
        assert_eq!(
            relative.redirect_target(&base).unwrap().as_str(),
            "https://example.org/y"
        );

        let ok = WireResponse::new(StatusCode::OK).with_header(CONTENT_LENGTH, "1024");
        assert!(ok.redirect_target(&base).is_none());
        assert_eq!(ok.content_length(), Some(1024));
        assert!(ok.is_success());
    }

    #[test]
    fn test_body_hint_truncates() {
        let long = "x".repeat(500);
        let response = WireResponse::new(StatusCode::BAD_REQUEST).with_body(long);
        assert_eq!(response.body_hint().len(), 203);
    }
}
