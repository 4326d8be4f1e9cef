use chrono::Utc;
use tracing::{debug, info, warn};

use crate::assertion::generate_assertion;
use crate::errors::FCMError;
use crate::models::{BearerToken, GoogleTokenResponse};
use crate::transport::{Transport, TransportRequest};

pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Exchange a freshly signed assertion for an OAuth2 access token.
///
/// The assertion audience is the token endpoint itself. Nothing is cached or
/// retried; a failure here must stop the caller from sending.
pub async fn acquire_token(
    transport: &dyn Transport,
    token_url: &str,
    issuer: &str,
    private_key: &[u8],
    scope: &str,
) -> Result<BearerToken, FCMError> {
    let assertion = generate_assertion(issuer, private_key, scope, token_url)?;

    let body = format!(
        "grant_type={}&assertion={}",
        urlencoding::encode(JWT_BEARER_GRANT_TYPE),
        urlencoding::encode(&assertion)
    );

    let request = TransportRequest::new(token_url)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body(body);

    debug!(issuer = %issuer, token_url = %token_url, "Requesting OAuth2 access token");
    let issued_at = Utc::now();
    let response = transport.post(request).await?;

    if !response.is_success() {
        warn!(status = response.status, "Token endpoint rejected assertion");
        return Err(FCMError::TokenAcquisition {
            status: response.status,
            body: response.text(),
        });
    }

    let token_response: GoogleTokenResponse =
        serde_json::from_slice(&response.body).map_err(|_| FCMError::TokenAcquisition {
            status: response.status,
            body: response.text(),
        })?;

    if token_response.access_token.is_empty() {
        return Err(FCMError::TokenAcquisition {
            status: response.status,
            body: response.text(),
        });
    }

    info!(issuer = %issuer, "Acquired OAuth2 access token");
    Ok(BearerToken::issued_at(token_response.access_token, issued_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const PRIVATE_KEY: &[u8] = include_bytes!("../tests/fixtures/test_rsa_key.pem");
    const TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";
    const SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

    struct CannedTransport {
        response: TransportResponse,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl CannedTransport {
        fn new(status: u16, body: &str) -> Self {
            Self {
                response: TransportResponse::new(status, body.as_bytes().to_vec()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn post(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    #[tokio::test]
    async fn test_acquire_token_success() {
        let transport = CannedTransport::new(
            200,
            r#"{"access_token":"ya29.fresh","expires_in":3599,"token_type":"Bearer"}"#,
        );

        let token = acquire_token(&transport, TOKEN_URL, "svc@example.com", PRIVATE_KEY, SCOPE)
            .await
            .unwrap();
        assert_eq!(token.access_token, "ya29.fresh");

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, TOKEN_URL);
        assert_eq!(
            requests[0].header_value("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(body.starts_with(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer&assertion="
        ));
    }

    #[tokio::test]
    async fn test_acquire_token_non_200() {
        let transport = CannedTransport::new(400, r#"{"error":"invalid_grant"}"#);

        let err = acquire_token(&transport, TOKEN_URL, "svc@example.com", PRIVATE_KEY, SCOPE)
            .await
            .unwrap_err();

        match err {
            FCMError::TokenAcquisition { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_acquire_token_malformed_body() {
        let transport = CannedTransport::new(200, r#"{"token_type":"Bearer"}"#);

        let err = acquire_token(&transport, TOKEN_URL, "svc@example.com", PRIVATE_KEY, SCOPE)
            .await
            .unwrap_err();
        assert!(matches!(err, FCMError::TokenAcquisition { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_acquire_token_bad_key_never_hits_network() {
        let transport = CannedTransport::new(200, r#"{"access_token":"unused"}"#);

        let err = acquire_token(&transport, TOKEN_URL, "svc@example.com", b"garbage", SCOPE)
            .await
            .unwrap_err();
        assert!(matches!(err, FCMError::Signing(_)));
        assert!(transport.requests.lock().unwrap().is_empty());
    }
}
