//! Single-use bearer tokens for worker registration.
//!
//! Each issued token carries a fresh `jti` that is parked in the
//! [`KeyCache`] and consumed on first verification, so a token authorizes
//! exactly one registration no matter how many times it is presented.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::cache::KeyCache;

/// Sweep interval for abandoned token ids.
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Claims carried by a worker registration token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotClaims {
    /// Token id, single-use
    pub jti: String,
    /// Credential id the token was issued to
    pub sub: String,
    /// Issuer audience
    pub aud: String,
    /// Expiry, Unix seconds
    pub exp: i64,
    /// Peer address the token was issued to
    pub ip: String,
    /// Route the bearer may register under
    pub route: String,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("failed to parse token: {0}")]
    Parse(#[from] jsonwebtoken::errors::Error),
    #[error("token reused")]
    Reused,
    #[error("token expired")]
    Expired,
    #[error("wrong audience in token")]
    BadAudience,
    #[error("wrong IP in token")]
    BadIp,
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("failed to sign token: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
}

/// Issues and verifies single-use HS256 tokens.
pub struct TokenIssuer {
    cache: Arc<KeyCache>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    audience: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], audience: String, ttl: Duration) -> Self {
        // Expiry and audience are checked by hand in `verify` so that the
        // token is spent before any semantic validation happens.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            cache: Arc::new(KeyCache::new(ttl, CACHE_SWEEP_INTERVAL)),
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            audience,
            ttl,
        }
    }

    /// Token lifetime, e.g. for an RFC 6749 `expires_in` field.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start the background sweep of abandoned token ids.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.cache.spawn_sweeper()
    }

    /// Issue a token allowing `subject`, connecting from `ip`, to register
    /// one worker under `route`.
    pub fn issue(&self, subject: &str, ip: &str, route: &str) -> Result<String, IssueError> {
        let jti = Uuid::new_v4().to_string();
        self.cache.put(&jti);

        let claims = BotClaims {
            jti,
            sub: subject.to_string(),
            aud: self.audience.clone(),
            exp: Utc::now().timestamp() + self.ttl.as_secs() as i64,
            ip: ip.to_string(),
            route: route.to_string(),
        };
        Ok(jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &self.encoding,
        )?)
    }

    /// Verify a token presented from `ip` and spend it.
    ///
    /// The cache check consumes the token before expiry, audience, and
    /// address are examined: a syntactically valid but semantically bad
    /// token is still spent, so an interceptor cannot probe variants.
    pub fn verify(&self, token: &str, ip: &str) -> Result<BotClaims, VerifyError> {
        let data = jsonwebtoken::decode::<BotClaims>(token, &self.decoding, &self.validation)?;
        let claims = data.claims;

        if !self.cache.consume(&claims.jti) {
            return Err(VerifyError::Reused);
        }
        if claims.exp <= Utc::now().timestamp() {
            return Err(VerifyError::Expired);
        }
        if claims.aud != self.audience {
            return Err(VerifyError::BadAudience);
        }
        if claims.ip != ip {
            return Err(VerifyError::BadIp);
        }

        Ok(claims)
    }
}

/// Load the HMAC signing key, generating a random 256-bit one on first boot.
pub fn load_or_generate_key(path: &str) -> Result<Vec<u8>, std::io::Error> {
    let key_path = Path::new(path);

    if key_path.exists() {
        let key = std::fs::read(key_path)?;
        if key.len() == 32 {
            tracing::info!(path, "signing key loaded");
            return Ok(key);
        }
        tracing::warn!(path, len = key.len(), "signing key has wrong size, regenerating");
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(key_path, key)?;
    tracing::info!(path, "signing key generated");
    Ok(key.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(ttl: Duration) -> TokenIssuer {
        TokenIssuer::new(b"test-secret-test-secret-test-sec", "sidekick".to_string(), ttl)
    }

    #[test]
    fn issue_then_verify_round_trips_claims() {
        let issuer = issuer(Duration::from_secs(10));
        let token = issuer.issue("bot-1", "10.0.0.1", "/svc/one").unwrap();

        let claims = issuer.verify(&token, "10.0.0.1").unwrap();
        assert_eq!(claims.sub, "bot-1");
        assert_eq!(claims.route, "/svc/one");
        assert_eq!(claims.aud, "sidekick");
    }

    #[test]
    fn second_verification_is_reuse() {
        let issuer = issuer(Duration::from_secs(10));
        let token = issuer.issue("bot-1", "10.0.0.1", "/svc/one").unwrap();

        issuer.verify(&token, "10.0.0.1").unwrap();
        assert!(matches!(
            issuer.verify(&token, "10.0.0.1"),
            Err(VerifyError::Reused)
        ));
    }

    #[test]
    fn wrong_ip_is_rejected_and_still_spends_the_token() {
        let issuer = issuer(Duration::from_secs(10));
        let token = issuer.issue("bot-1", "10.0.0.1", "/svc/one").unwrap();

        assert!(matches!(
            issuer.verify(&token, "10.0.0.2"),
            Err(VerifyError::BadIp)
        ));
        // the failed attempt consumed the jti
        assert!(matches!(
            issuer.verify(&token, "10.0.0.1"),
            Err(VerifyError::Reused)
        ));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let us = issuer(Duration::from_secs(10));
        let them = TokenIssuer::new(
            b"test-secret-test-secret-test-sec",
            "someone-else".to_string(),
            Duration::from_secs(10),
        );
        let token = them.issue("bot-1", "10.0.0.1", "/svc/one").unwrap();

        // same key, so the signature parses; our cache has never seen the jti
        assert!(matches!(
            us.verify(&token, "10.0.0.1"),
            Err(VerifyError::Reused)
        ));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let issuer = issuer(Duration::from_secs(10));
        assert!(matches!(
            issuer.verify("not-a-token", "10.0.0.1"),
            Err(VerifyError::Parse(_))
        ));
    }

    #[test]
    fn tampered_signature_is_a_parse_error() {
        let issuer = issuer(Duration::from_secs(10));
        let other = TokenIssuer::new(b"another-secret-another-secret-an", "sidekick".to_string(), Duration::from_secs(10));
        let token = other.issue("bot-1", "10.0.0.1", "/svc/one").unwrap();

        assert!(matches!(
            issuer.verify(&token, "10.0.0.1"),
            Err(VerifyError::Parse(_))
        ));
    }

    #[test]
    fn key_is_generated_once_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signing.key");
        let path = path.to_str().unwrap();

        let first = load_or_generate_key(path).unwrap();
        let second = load_or_generate_key(path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
    }
}
