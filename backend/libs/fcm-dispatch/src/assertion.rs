//! Signed JWT assertion for the OAuth2 jwt-bearer grant.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

use crate::errors::FCMError;
use crate::models::JwtClaims;

/// Assertions are valid for exactly one hour after `iat`.
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Build the claim set for an assertion issued at `now`.
pub fn assertion_claims(issuer: &str, scope: &str, audience: &str, now: DateTime<Utc>) -> JwtClaims {
    let iat = now.timestamp();
    JwtClaims {
        iss: issuer.to_string(),
        scope: scope.to_string(),
        aud: audience.to_string(),
        iat,
        exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
    }
}

/// Sign an RS256 assertion with the current time.
///
/// Returns `base64url(header).base64url(claims).base64url(signature)`.
pub fn generate_assertion(
    issuer: &str,
    private_key: &[u8],
    scope: &str,
    audience: &str,
) -> Result<String, FCMError> {
    generate_assertion_at(issuer, private_key, scope, audience, Utc::now())
}

/// Sign an RS256 assertion issued at `now`.
pub fn generate_assertion_at(
    issuer: &str,
    private_key: &[u8],
    scope: &str,
    audience: &str,
    now: DateTime<Utc>,
) -> Result<String, FCMError> {
    let encoding_key = EncodingKey::from_rsa_pem(private_key)
        .map_err(|e| FCMError::Signing(format!("failed to parse private key: {}", e)))?;

    let claims = assertion_claims(issuer, scope, audience, now);

    encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| FCMError::Signing(format!("failed to encode JWT: {}", e)))
}
