//! Shared-secret checks for scheduler-triggered routes and signed magic-link tokens.

use axum::http::{HeaderMap, header};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// How long an emailed sign-in link stays valid.
pub const MAGIC_LINK_TTL_MINUTES: i64 = 15;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    Expired,

    #[error("HMAC error: {0}")]
    Hmac(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Check a cron request's bearer token against the configured secret.
///
/// Both values are run through HMAC keyed by the candidate and compared with
/// `verify_slice`, so the comparison time does not depend on where they differ.
pub fn verify_cron(secret: Option<&str>, headers: &HeaderMap) -> Result<()> {
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::NotConfigured("CRON_SECRET"))?;
    let provided = bearer_token(headers).ok_or(AuthError::Unauthorized)?;

    let expected = cron_tag(secret)?;
    let mut mac = HmacSha256::new_from_slice(provided.as_bytes())
        .map_err(|e| AuthError::Hmac(e.to_string()))?;
    mac.update(CRON_TAG_MESSAGE);
    mac.verify_slice(&expected).map_err(|_| AuthError::Unauthorized)
}

const CRON_TAG_MESSAGE: &[u8] = b"pickem cron bearer";

fn cron_tag(key: &str) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| AuthError::Hmac(e.to_string()))?;
    mac.update(CRON_TAG_MESSAGE);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[derive(Debug, Serialize, Deserialize)]
struct MagicClaims {
    email: String,
    exp: i64,
    nonce: u64,
}

/// Issues and checks `payload.signature` tokens for passwordless sign-in.
#[derive(Clone)]
pub struct MagicLinkSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl MagicLinkSigner {
    pub fn new(secret: &str) -> Self {
        Self { key: secret.as_bytes().to_vec(), ttl: Duration::minutes(MAGIC_LINK_TTL_MINUTES) }
    }

    pub fn issue(&self, email: &str, now: DateTime<Utc>) -> Result<String> {
        let claims = MagicClaims {
            email: email.to_owned(),
            exp: (now + self.ttl).timestamp(),
            nonce: rand::random(),
        };
        let payload = serde_json::to_vec(&claims).map_err(|_| AuthError::InvalidToken)?;
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes())?);
        Ok(format!("{payload}.{signature}"))
    }

    /// Returns the email the token was issued for.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<String> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::InvalidToken)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::InvalidToken)?;

        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).map_err(|_| AuthError::InvalidToken)?;

        let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| AuthError::InvalidToken)?;
        let claims: MagicClaims =
            serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidToken)?;
        if now.timestamp() >= claims.exp {
            return Err(AuthError::Expired);
        }
        Ok(claims.email)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| AuthError::Hmac(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(auth) = auth {
            headers.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        }
        headers
    }

    #[test]
    fn cron_accepts_matching_bearer() {
        assert_eq!(verify_cron(Some("s3cret"), &headers(Some("Bearer s3cret"))), Ok(()));
    }

    #[test]
    fn cron_rejects_wrong_or_missing_bearer() {
        let secret = Some("s3cret");
        assert_eq!(verify_cron(secret, &headers(Some("Bearer s3cre"))), Err(AuthError::Unauthorized));
        assert_eq!(verify_cron(secret, &headers(Some("s3cret"))), Err(AuthError::Unauthorized));
        assert_eq!(verify_cron(secret, &headers(None)), Err(AuthError::Unauthorized));
    }

    #[test]
    fn cron_without_secret_is_misconfiguration() {
        let err = verify_cron(None, &headers(Some("Bearer anything"))).unwrap_err();
        assert_eq!(err, AuthError::NotConfigured("CRON_SECRET"));
        assert_eq!(
            verify_cron(Some(""), &headers(Some("Bearer "))).unwrap_err(),
            AuthError::NotConfigured("CRON_SECRET")
        );
    }

    #[test]
    fn magic_link_round_trip_and_expiry() {
        let signer = MagicLinkSigner::new("key");
        let now = Utc::now();
        let token = signer.issue("fan@example.com", now).unwrap();

        assert_eq!(signer.verify(&token, now + Duration::minutes(14)).unwrap(), "fan@example.com");
        assert_eq!(signer.verify(&token, now + Duration::minutes(15)), Err(AuthError::Expired));
    }

    #[test]
    fn magic_link_rejects_tampering_and_foreign_keys() {
        let now = Utc::now();
        let token = MagicLinkSigner::new("key").issue("fan@example.com", now).unwrap();
        assert_eq!(MagicLinkSigner::new("other").verify(&token, now), Err(AuthError::InvalidToken));

        let (_, signature) = token.split_once('.').unwrap();
        let forged_claims = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&serde_json::json!({"email": "evil@example.com", "exp": i64::MAX, "nonce": 1}))
                .unwrap(),
        );
        let forged = format!("{forged_claims}.{signature}");
        assert_eq!(MagicLinkSigner::new("key").verify(&forged, now), Err(AuthError::InvalidToken));
        assert_eq!(MagicLinkSigner::new("key").verify("garbage", now), Err(AuthError::InvalidToken));
    }

    #[test]
    fn tokens_are_unique_per_issue() {
        let signer = MagicLinkSigner::new("key");
        let now = Utc::now();
        assert_ne!(signer.issue("a@b.c", now).unwrap(), signer.issue("a@b.c", now).unwrap());
    }
}
