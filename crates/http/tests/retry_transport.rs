use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use mockall::Sequence;
use rp_core::retry::RetryPolicy;
use rp_core::transport::{Connector, Transport, WireRequest, WireResponse};
use rp_core::{Authority, CredentialMaterial, Error, HttpConfig, ResourceBackend, Result, Uri};
use rp_http::HttpBackend;

mockall::mock! {
    pub Wire {}

    #[async_trait]
    impl Transport for Wire {
        async fn send(&self, request: WireRequest) -> Result<WireResponse>;
    }
}

/// Every connection forwards to the same mock
struct SharedWire(Arc<MockWire>);

#[async_trait]
impl Transport for SharedWire {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        self.0.send(request).await
    }
}

struct MockConnector(Arc<MockWire>);

#[async_trait]
impl Connector for MockConnector {
    type Connection = SharedWire;

    async fn connect(&self, _authority: &Authority) -> Result<SharedWire> {
        Ok(SharedWire(self.0.clone()))
    }
}

fn backend(wire: MockWire, max_attempts: u32) -> HttpBackend<MockConnector> {
    let config = HttpConfig {
        retry: RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            jitter_ms: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    HttpBackend::new(
        "https",
        MockConnector(Arc::new(wire)),
        &config,
        CredentialMaterial::anonymous(),
    )
    .unwrap()
}

fn file() -> Uri {
    Uri::parse("https://mock.example.org/data/file.fits").unwrap()
}

#[tokio::test]
async fn test_exactly_max_attempts_on_persistent_503() {
    let mut wire = MockWire::new();
    wire.expect_send()
        .withf(|r| r.method == Method::GET)
        .times(4)
        .returning(|_| Ok(WireResponse::new(StatusCode::SERVICE_UNAVAILABLE)));

    let err = backend(wire, 4).read(&file(), None).await.unwrap_err();
    assert!(matches!(err, Error::RetriesExhausted { attempts: 4, .. }));
}

#[tokio::test]
async fn test_single_attempt_on_404() {
    let mut wire = MockWire::new();
    wire.expect_send()
        .times(1)
        .returning(|_| Ok(WireResponse::new(StatusCode::NOT_FOUND)));

    let err = backend(wire, 4).read(&file(), None).await.unwrap_err();
    assert!(matches!(err, Error::PermanentRequest { status: 404, .. }));
}

#[tokio::test]
async fn test_authentication_failure_is_permanent() {
    let mut wire = MockWire::new();
    wire.expect_send()
        .times(1)
        .returning(|_| Ok(WireResponse::new(StatusCode::UNAUTHORIZED)));

    let err = backend(wire, 4).size(&file()).await.unwrap_err();
    assert!(matches!(err, Error::PermanentRequest { status: 401, .. }));
}

#[tokio::test]
async fn test_reset_then_success() {
    let mut seq = Sequence::new();
    let mut wire = MockWire::new();
    wire.expect_send()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Err(Error::transient("connection reset by peer")));
    wire.expect_send()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Ok(WireResponse::new(StatusCode::OK)
                .with_header(http::header::CONTENT_LENGTH, "4")
                .with_body("fits"))
        });

    let http = backend(wire, 4);
    assert_eq!(http.read(&file(), None).await.unwrap(), "fits");
    let stats = http.pool_stats();
    assert_eq!(stats.discarded, 1);
    assert_eq!(stats.created, 2);
}

#[tokio::test]
async fn test_exists_treats_gone_as_absent() {
    let mut wire = MockWire::new();
    wire.expect_send()
        .withf(|r| r.method == Method::HEAD)
        .times(1)
        .returning(|_| Ok(WireResponse::new(StatusCode::GONE)));

    assert!(!backend(wire, 4).exists(&file()).await.unwrap());
}

#[tokio::test]
async fn test_delete_accepts_202() {
    let mut wire = MockWire::new();
    wire.expect_send()
        .withf(|r| r.method == Method::DELETE && r.url.path() == "/data/file.fits")
        .times(1)
        .returning(|_| Ok(WireResponse::new(StatusCode::ACCEPTED)));

    backend(wire, 4).delete(&file()).await.unwrap();
}

#[tokio::test]
async fn test_healthy_connection_reused_across_operations() {
    let mut wire = MockWire::new();
    wire.expect_send()
        .times(3)
        .returning(|_| Ok(WireResponse::new(StatusCode::OK)));

    let http = backend(wire, 4);
    for _ in 0..3 {
        assert!(http.exists(&file()).await.unwrap());
    }
    let stats = http.pool_stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.reused, 2);
}

#[tokio::test]
async fn test_size_without_content_length_is_unsupported() {
    let mut wire = MockWire::new();
    wire.expect_send()
        .withf(|r| r.method == Method::HEAD)
        .times(1)
        .returning(|_| Ok(WireResponse::new(StatusCode::OK)));

    let err = backend(wire, 4).size(&file()).await.unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));
}
