//! AWS Signature Version 4 for object-store requests

use std::time::SystemTime;

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
    PayloadChecksumKind, PercentEncodingMode, SignableBody, SignableRequest, SigningSettings,
    UriPathNormalizationMode, sign,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use http::{HeaderName, HeaderValue};
use rp_core::transport::WireRequest;
use rp_core::{Error, Result, SigningKeys};
use sha2::{Digest, Sha256};

const SERVICE: &str = "s3";

/// Hex SHA-256 of a request body, as sent in `x-amz-content-sha256`
pub fn payload_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Add SigV4 authentication headers to `request`
pub fn sign_request(request: &mut WireRequest, keys: &SigningKeys, time: SystemTime) -> Result<()> {
    let identity: Identity = Credentials::new(
        keys.access_key_id.clone(),
        keys.secret_access_key.clone(),
        keys.session_token.clone(),
        None,
        "respath-static",
    )
    .into();

    let mut settings = SigningSettings::default();
    settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
    settings.percent_encoding_mode = PercentEncodingMode::Single;
    settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;

    let params: aws_sigv4::http_request::SigningParams<'_> = v4::SigningParams::builder()
        .identity(&identity)
        .region(&keys.region)
        .name(SERVICE)
        .time(time)
        .settings(settings)
        .build()
        .map_err(|e| Error::AuthConfiguration(format!("invalid signing parameters: {e}")))?
        .into();

    let hash = payload_hash(&request.body);
    let headers: Vec<(&str, &str)> = request
        .headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .collect();
    let signable = SignableRequest::new(
        request.method.as_str(),
        request.url.as_str(),
        headers.into_iter(),
        SignableBody::Precomputed(hash),
    )
    .map_err(|e| Error::AuthConfiguration(format!("cannot sign request: {e}")))?;

    let (instructions, _signature) = sign(signable, &params)
        .map_err(|e| Error::AuthConfiguration(format!("cannot sign request: {e}")))?
        .into_parts();
    let (new_headers, _query) = instructions.into_parts();

    for header in new_headers {
        let name = HeaderName::from_bytes(header.name().as_bytes())
            .map_err(|e| Error::AuthConfiguration(format!("bad signature header: {e}")))?;
        let mut value = HeaderValue::from_str(header.value())
            .map_err(|e| Error::AuthConfiguration(format!("bad signature header: {e}")))?;
        value.set_sensitive(header.sensitive());
        request.headers.insert(name, value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use url::Url;

    fn keys() -> SigningKeys {
        SigningKeys {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
            region: "us-east-1".into(),
        }
    }

    #[test]
    fn test_payload_hash_of_empty_body() {
        assert_eq!(
            payload_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sign_adds_authorization() {
        let url = Url::parse("https://s3.example.org/bucket/key.txt").unwrap();
        let mut request = WireRequest::new(Method::PUT, url).body("hello");
        sign_request(&mut request, &keys(), SystemTime::UNIX_EPOCH).unwrap();

        let auth = request.headers.get(http::header::AUTHORIZATION).unwrap();
        let auth = auth.to_str().unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/19700101/us-east-1/s3/aws4_request"));
        assert!(request.headers.contains_key("x-amz-date"));
        assert_eq!(
            request.headers.get("x-amz-content-sha256").unwrap(),
            payload_hash(b"hello").as_str()
        );
    }

    #[test]
    fn test_session_token_is_sent() {
        let mut keys = keys();
        keys.session_token = Some("session".into());
        let url = Url::parse("https://s3.example.org/bucket/key.txt").unwrap();
        let mut request = WireRequest::new(Method::GET, url);
        sign_request(&mut request, &keys, SystemTime::now()).unwrap();
        assert_eq!(request.headers.get("x-amz-security-token").unwrap(), "session");
    }
}
