//! Compact-JWT verification against the JWKS cache.
//!
//! A token is accepted only when its header algorithm matches the
//! configured one, its `kid` resolves through [`JwksCache`], the
//! issuer/audience match when configured, `exp`/`nbf` hold within the
//! configured clock skew, and the RS256 signature verifies.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use super::jwks::JwksCache;
use super::{AuthError, JwtClaims};
use crate::config::AuthConfig;

/// Verifies bearer tokens per the configured auth policy.
pub struct JwtVerifier {
    config: AuthConfig,
    allowed_alg: Algorithm,
    jwks: JwksCache,
}

/// `aud` may be a single string or an array per the JWT spec.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn into_vec(self) -> Vec<String> {
        match self {
            Audience::One(value) => vec![value],
            Audience::Many(values) => values,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    scp: Option<Vec<String>>,
}

impl JwtVerifier {
    /// Build a verifier from the auth configuration.  Fails when
    /// `allowed_alg` names an algorithm jsonwebtoken does not know.
    pub fn new(config: AuthConfig) -> anyhow::Result<Self> {
        let allowed_alg = Algorithm::from_str(&config.allowed_alg)
            .map_err(|_| anyhow::anyhow!("unknown auth.allowed_alg: {}", config.allowed_alg))?;
        let jwks = JwksCache::new(
            config.jwks_url.clone(),
            Duration::from_secs(config.cache_ttl_seconds),
        );
        Ok(Self {
            config,
            allowed_alg,
            jwks,
        })
    }

    /// Verify a compact JWT and extract its claims.  When auth is
    /// disabled the token is not inspected and empty claims come back.
    pub async fn verify(&self, token: &str) -> Result<JwtClaims, AuthError> {
        if !self.config.enabled {
            return Ok(JwtClaims::default());
        }

        let header =
            decode_header(token).map_err(|e| AuthError(format!("invalid token format: {e}")))?;
        if header.alg != self.allowed_alg {
            return Err(AuthError("unsupported alg".to_string()));
        }
        let kid = header
            .kid
            .filter(|kid| !kid.is_empty())
            .ok_or_else(|| AuthError("missing kid".to_string()))?;

        let key = self.jwks.get_key(&kid).await?;

        let mut validation = Validation::new(self.allowed_alg);
        validation.leeway = self.config.clock_skew_seconds;
        validation.validate_nbf = true;
        if !self.config.issuer.is_empty() {
            validation.set_issuer(&[self.config.issuer.clone()]);
        }
        if self.config.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&[self.config.audience.clone()]);
        }

        let data =
            decode::<RawClaims>(token, &key, &validation).map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError("token expired".to_string()),
                ErrorKind::ImmatureSignature => AuthError("token not yet valid".to_string()),
                ErrorKind::InvalidIssuer => AuthError("issuer mismatch".to_string()),
                ErrorKind::InvalidAudience => AuthError("audience mismatch".to_string()),
                ErrorKind::InvalidSignature => {
                    AuthError("signature verification failed".to_string())
                }
                ErrorKind::MissingRequiredClaim(claim) => {
                    AuthError(format!("missing {claim}"))
                }
                other => AuthError(format!("invalid token: {other:?}")),
            })?;

        let claims = data.claims;
        let mut scopes = Vec::new();
        if let Some(scope) = &claims.scope {
            scopes.extend(
                scope
                    .split(' ')
                    .filter(|part| !part.is_empty())
                    .map(str::to_string),
            );
        }
        if let Some(scp) = claims.scp {
            scopes.extend(scp);
        }

        Ok(JwtClaims {
            subject: claims.sub.unwrap_or_default(),
            issuer: claims.iss.unwrap_or_default(),
            audience: claims.aud.map(Audience::into_vec).unwrap_or_default(),
            scopes,
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
