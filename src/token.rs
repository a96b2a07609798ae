//! Token service — minting, validation, and revocation of bearer tokens.
//!
//! Tokens are JWTs signed with HMAC-SHA-256. The scope itself is carried **by
//! reference**: the `jti` claim is the scope-cache key, so revoking a token or
//! invalidating a group takes effect on the very next request.
//!
//! The revocation set holds `jti → exp` for tokens invalidated before their
//! natural expiry; entries self-expire once the token would have expired
//! anyway and are swept by a background reaper.

use std::sync::Arc;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::JwtConfig;
use crate::{Error, Result};

/// Clock skew tolerated in the validity window. Well under the 5-minute cap.
const LEEWAY_SECS: u64 = 60;

/// JWT claims carried by a proxy bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Caller identity: the API-key handle, never the secret
    pub sub: String,
    /// Token id; also the scope-cache key
    pub jti: String,
    /// Group the scope was built from (advisory)
    pub gid: String,
    /// Resource count at mint time (advisory)
    pub rc: u32,
    /// Issued-at (Unix seconds)
    pub iat: i64,
    /// Expiry (Unix seconds)
    pub exp: i64,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
}

/// A freshly minted token.
#[derive(Debug, Clone)]
pub struct MintedToken {
    /// Encoded JWT
    pub token: String,
    /// Token id, used as the scope-cache key
    pub jti: String,
    /// Seconds until expiry
    pub expires_in: u64,
}

/// Mints, validates, and revokes bearer tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
    /// jti → exp (Unix seconds) of explicitly revoked tokens
    revoked: DashMap<String, i64>,
}

impl TokenService {
    /// Create a service from JWT configuration.
    ///
    /// The signing key must be at least 32 bytes (256 bits).
    pub fn new(config: &JwtConfig) -> Result<Self> {
        let key = config.resolve_signing_key();
        if key.len() < 32 {
            return Err(Error::Config(
                "jwt.signing_key must be at least 32 bytes".to_string(),
            ));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(key.as_bytes()),
            decoding_key: DecodingKey::from_secret(key.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl: Duration::from_secs(config.expiration_seconds),
            revoked: DashMap::new(),
        })
    }

    /// Generate a URL-safe token id with 256 bits of entropy.
    #[must_use]
    pub fn generate_token_id() -> String {
        let random_bytes: [u8; 32] = rand::rng().random();
        URL_SAFE_NO_PAD.encode(random_bytes)
    }

    /// Mint a signed token for `subject` over a scope of `resource_count`
    /// resources built from `group_id`.
    pub fn mint(&self, subject: &str, group_id: &str, resource_count: u32) -> Result<MintedToken> {
        let now = Utc::now().timestamp();
        let jti = Self::generate_token_id();
        #[allow(clippy::cast_possible_wrap)]
        let exp = now + self.ttl.as_secs() as i64;

        let claims = Claims {
            sub: subject.to_string(),
            jti: jti.clone(),
            gid: group_id.to_string(),
            rc: resource_count,
            iat: now,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )
        .map_err(|e| Error::Internal(format!("token encoding: {e}")))?;

        debug!(subject = %subject, group_id = %group_id, resource_count, "Minted token");

        Ok(MintedToken {
            token,
            jti,
            expires_in: self.ttl.as_secs(),
        })
    }

    /// Validate a token string and return its claims.
    ///
    /// Checks, in order: signature, issuer/audience, validity window with
    /// bounded skew, revocation. Scope resolution is the caller's next step.
    pub fn validate(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::TokenExpired,
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidIssuer
                | ErrorKind::InvalidAudience
                | ErrorKind::InvalidAlgorithm => Error::SignatureInvalid,
                _ => Error::TokenMalformed,
            })?;

        let claims = data.claims;

        // jsonwebtoken does not bound the lower edge of the window
        #[allow(clippy::cast_possible_wrap)]
        let not_before = claims.iat - LEEWAY_SECS as i64;
        if Utc::now().timestamp() < not_before {
            return Err(Error::TokenExpired);
        }

        if self.revoked.contains_key(&claims.jti) {
            return Err(Error::TokenRevoked);
        }

        Ok(claims)
    }

    /// Revoke a token. Idempotent; returns `false` only when the token cannot
    /// be attributed (bad signature or not parseable).
    ///
    /// Expired tokens are still accepted here so that logout after expiry is
    /// a no-op success rather than an error.
    pub fn revoke(&self, token: &str) -> bool {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_exp = false;

        match jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => {
                let claims = data.claims;
                debug!(jti = %claims.jti, "Token revoked");
                self.revoked.insert(claims.jti, claims.exp);
                true
            }
            Err(_) => false,
        }
    }

    /// Drop revocation entries whose tokens have expired on their own.
    pub fn reap_revocations(&self) -> usize {
        #[allow(clippy::cast_possible_wrap)]
        let cutoff = Utc::now().timestamp() - LEEWAY_SECS as i64;
        let before = self.revoked.len();
        self.revoked.retain(|_, exp| *exp > cutoff);
        before - self.revoked.len()
    }
}

/// Spawn a background task that prunes the revocation set every `interval`.
pub fn spawn_revocation_reaper(
    service: Arc<TokenService>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = service.reap_revocations();
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired revocation entries");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Revocation reaper shutting down");
                    break;
                }
            }
        }
    });
}
