//! JWKS document cache.
//!
//! Fetches a JWKS document, keeps the RSA public keys keyed by `kid`,
//! and refreshes after a TTL or when an unknown `kid` shows up (key
//! rotation between polls).  The key map, expiry, and in-flight refresh
//! are all guarded by one mutex.

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::AuthError;

#[derive(Default)]
struct CacheState {
    keys: HashMap<String, DecodingKey>,
    expires_at: Option<Instant>,
}

/// TTL-cached map from `kid` to RSA public key.
pub struct JwksCache {
    url: String,
    ttl: Duration,
    client: reqwest::Client,
    inner: Mutex<CacheState>,
}

#[derive(Deserialize)]
struct JwksDocument {
    #[serde(default)]
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    #[serde(default)]
    kty: String,
    #[serde(default)]
    kid: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

impl JwksCache {
    /// Create a cache for the JWKS at `url` with the given refresh TTL.
    pub fn new(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            ttl,
            client: reqwest::Client::new(),
            inner: Mutex::new(CacheState::default()),
        }
    }

    /// Resolve `kid` to a verification key, refreshing the document when
    /// the cache is cold, expired, or does not know the kid.
    pub async fn get_key(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let mut state = self.inner.lock().await;

        let stale = state.keys.is_empty()
            || state.expires_at.is_none_or(|at| Instant::now() >= at);
        if stale {
            self.refresh(&mut state).await?;
        }

        if let Some(key) = state.keys.get(kid) {
            return Ok(key.clone());
        }

        // One more refresh to pick up freshly rotated keys.
        self.refresh(&mut state).await?;
        state
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError("kid not found in jwks".to_string()))
    }

    /// Fetch and parse the document, replacing the key map atomically.
    /// The expiry only advances on success.
    async fn refresh(&self, state: &mut CacheState) -> Result<(), AuthError> {
        let body = self.fetch_jwks_body().await?;
        state.keys = parse_jwks(&body)?;
        state.expires_at = Some(Instant::now() + self.ttl);
        Ok(())
    }

    /// Load the JWKS body from `file://`, a filesystem path, or http(s).
    async fn fetch_jwks_body(&self) -> Result<String, AuthError> {
        if self.url.is_empty() {
            return Err(AuthError("jwks url missing".to_string()));
        }

        if let Some(path) = self.url.strip_prefix("file://") {
            return tokio::fs::read_to_string(path)
                .await
                .map_err(|_| AuthError("failed to open jwks file".to_string()));
        }

        if self.url.starts_with("http://") || self.url.starts_with("https://") {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| AuthError(format!("jwks fetch failed: {e}")))?;
            if !response.status().is_success() {
                return Err(AuthError("jwks fetch failed".to_string()));
            }
            return response
                .text()
                .await
                .map_err(|e| AuthError(format!("jwks fetch failed: {e}")));
        }

        // Anything else is treated as a bare filesystem path.
        tokio::fs::read_to_string(&self.url)
            .await
            .map_err(|_| AuthError("failed to open jwks file".to_string()))
    }
}

/// Parse a JWKS body, keeping only RSA keys with non-empty kid/n/e.
/// An empty result set counts as a failure.
fn parse_jwks(body: &str) -> Result<HashMap<String, DecodingKey>, AuthError> {
    let document: JwksDocument =
        serde_json::from_str(body).map_err(|e| AuthError(format!("invalid jwks: {e}")))?;

    let mut keys = HashMap::new();
    for jwk in document.keys {
        if jwk.kty != "RSA" || jwk.kid.is_empty() || jwk.n.is_empty() || jwk.e.is_empty() {
            continue;
        }
        if let Ok(key) = DecodingKey::from_rsa_components(&jwk.n, &jwk.e) {
            keys.insert(jwk.kid, key);
        }
    }

    if keys.is_empty() {
        return Err(AuthError("jwks contained no rsa keys".to_string()));
    }
    Ok(keys)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // 2048-bit RSA modulus, base64url.  Only the public half is needed
    // to exercise the cache.
    const TEST_MODULUS: &str = "zzvuFR5ADpG1xQgUOurM87gc7MY7Y0sVxQxL1O0WP1cgRgZgTnvAS8UON3RtaJ87527g40nu5SkPpJeFj-zXrxJJRWLUIHcKKdgi3890F_BZZAQneS5xX362nzMQgMIuRSTa3lY4AqObltzgaStccbYW52Fw_atu9IO94Br7fZQJZRoqEEOScJ71NGzCmtPSG20YwQexCqGGi2Ky-CXQ3YR3wnmdtDr9XgQDpOkbvwtFLU4AlSHSw5VJOt-r6Kf01g5LOAD3uGQzn9qa68A2c6y349K4CcrzATAUKggMY75-OWoQhmes9pKVUh1hu-XsfGqPoP64S-IZfGGsxxH_JQ";

    fn jwks_body() -> String {
        serde_json::json!({
            "keys": [
                { "kty": "RSA", "kid": "key-1", "n": TEST_MODULUS, "e": "AQAB" },
                { "kty": "EC", "kid": "ec-key", "crv": "P-256" },
                { "kty": "RSA", "kid": "", "n": TEST_MODULUS, "e": "AQAB" }
            ]
        })
        .to_string()
    }

    #[test]
    fn test_parse_keeps_only_complete_rsa_keys() {
        let keys = parse_jwks(&jwks_body()).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("key-1"));
    }

    #[test]
    fn test_parse_rejects_empty_sets() {
        assert!(parse_jwks(r#"{"keys":[]}"#).is_err());
        assert!(parse_jwks(r#"{"keys":[{"kty":"EC","kid":"x"}]}"#).is_err());
        assert!(parse_jwks("not json").is_err());
    }

    #[tokio::test]
    async fn test_get_key_from_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jwks.json");
        std::fs::write(&path, jwks_body()).unwrap();

        let url = format!("file://{}", path.display());
        let cache = JwksCache::new(url, Duration::from_secs(300));
        cache.get_key("key-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_key_from_bare_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jwks.json");
        std::fs::write(&path, jwks_body()).unwrap();

        let cache = JwksCache::new(path.display().to_string(), Duration::from_secs(300));
        cache.get_key("key-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_kid_fails_after_second_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jwks.json");
        std::fs::write(&path, jwks_body()).unwrap();

        let cache = JwksCache::new(path.display().to_string(), Duration::from_secs(300));
        let err = cache.get_key("rotated-away").await.map(|_| ()).unwrap_err();
        assert!(err.to_string().contains("kid not found"));
    }

    #[tokio::test]
    async fn test_rotation_is_picked_up_on_unknown_kid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jwks.json");
        std::fs::write(&path, jwks_body()).unwrap();

        let cache = JwksCache::new(path.display().to_string(), Duration::from_secs(300));
        cache.get_key("key-1").await.unwrap();

        // Rotate the document on disk; the unknown kid forces a refresh
        // even though the TTL has not elapsed.
        let rotated = serde_json::json!({
            "keys": [{ "kty": "RSA", "kid": "key-2", "n": TEST_MODULUS, "e": "AQAB" }]
        })
        .to_string();
        std::fs::write(&path, rotated).unwrap();

        cache.get_key("key-2").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_refresh_failure() {
        let cache = JwksCache::new("/no/such/jwks.json", Duration::from_secs(300));
        assert!(cache.get_key("key-1").await.is_err());
    }
}
