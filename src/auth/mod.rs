//! Bearer-token authentication: JWKS key cache and JWT verification.

pub mod jwks;
pub mod verifier;

use thiserror::Error;

/// Any authentication failure.  The message ends up in the 401 envelope.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct AuthError(pub String);

/// Claims extracted from a verified token.
#[derive(Debug, Clone, Default)]
pub struct JwtClaims {
    /// `sub` claim, empty when absent.
    pub subject: String,
    /// `iss` claim, empty when absent.
    pub issuer: String,
    /// `aud` claim normalized to a list.
    pub audience: Vec<String>,
    /// Union of `scope` (space-delimited) and `scp` (array) entries.
    pub scopes: Vec<String>,
}
