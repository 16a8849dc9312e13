//! JWKS Manager (§4.E) and the JWKS-backed `bearer_jwt` validator (§4.D).
//!
//! Per-URI key cache with a TTL and entry cap, rate-limited fetches, and
//! OIDC-discovery/provider-shortcut resolution. Verification is
//! deliberately restricted to asymmetric algorithm families (`RS*`, `ES*`,
//! `PS*`) — a caller presenting an `HS*`-signed token here is rejected
//! outright, even though `jsonwebtoken::Validation::new` would happily
//! accept whatever algorithm the token's own header claims. This is the
//! algorithm-confusion defense the design notes call out explicitly: an
//! attacker who obtains a JWKS public key cannot re-sign a token with it
//! as an HMAC secret and have it accepted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::model::JwtMode;

const GITHUB_OIDC_DISCOVERY_URL: &str = "https://token.actions.githubusercontent.com/.well-known/openid-configuration";
const GITHUB_JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    #[serde(rename = "n")]
    n: Option<String>,
    #[serde(rename = "e")]
    e: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct OidcDiscoveryDocument {
    jwks_uri: String,
}

#[derive(Clone)]
struct CachedKeys {
    keys: Arc<HashMap<String, DecodingKey>>,
    fetched_at: Instant,
}

#[derive(Default)]
struct RateLimitWindow {
    window_start: Option<Instant>,
    count: u32,
}

/// Per-URI cache of JWKS signing keys plus a discovery-document cache for
/// `github`/`oidc_discovery` modes.
pub struct JwksManager {
    client: reqwest::Client,
    cache_max_age: Duration,
    cache_max_entries: usize,
    rate_limit_per_minute: u32,
    keys_by_uri: RwLock<HashMap<String, CachedKeys>>,
    rate_limits: RwLock<HashMap<String, RateLimitWindow>>,
    github_jwks_uri: RwLock<Option<(String, Instant)>>,
}

pub struct JwtClaimConstraints<'a> {
    pub audience: Option<&'a str>,
    pub issuer: Option<&'a str>,
}

impl JwksManager {
    pub fn new(cache_max_age: Duration, cache_max_entries: usize, rate_limit_per_minute: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_max_age,
            cache_max_entries,
            rate_limit_per_minute,
            keys_by_uri: RwLock::new(HashMap::new()),
            rate_limits: RwLock::new(HashMap::new()),
            github_jwks_uri: RwLock::new(None),
        }
    }

    /// `resolveJwksUri` — turn a provider shorthand (or direct URL) into the
    /// concrete JWKS document URL to fetch.
    pub async fn resolve_jwks_uri(
        &self,
        mode: &JwtMode,
        tenant_id: Option<&str>,
        jwks_url: Option<&str>,
        oidc_url: Option<&str>,
    ) -> Result<String, String> {
        match mode {
            JwtMode::Microsoft => {
                let tenant = tenant_id.ok_or("microsoft jwtMode requires tenantId")?;
                Ok(format!(
                    "https://login.microsoftonline.com/{}/discovery/v2.0/keys",
                    tenant
                ))
            }
            JwtMode::Google => Ok("https://www.googleapis.com/oauth2/v3/certs".to_string()),
            JwtMode::Github => self.resolve_github_jwks_uri().await,
            JwtMode::JwksEndpoint => jwks_url.map(|s| s.to_string()).ok_or("jwks_endpoint jwtMode requires jwksUrl".to_string()),
            JwtMode::OidcDiscovery => {
                let url = oidc_url.ok_or("oidc_discovery jwtMode requires oidcUrl")?;
                self.fetch_oidc_jwks_uri(url).await
            }
            JwtMode::FixedSecret => Err("fixed_secret does not use a JWKS URI".to_string()),
        }
    }

    async fn resolve_github_jwks_uri(&self) -> Result<String, String> {
        {
            let cached = self.github_jwks_uri.read().await;
            if let Some((uri, fetched_at)) = cached.as_ref() {
                if fetched_at.elapsed() < GITHUB_JWKS_CACHE_TTL {
                    return Ok(uri.clone());
                }
            }
        }

        let uri = self.fetch_oidc_jwks_uri(GITHUB_OIDC_DISCOVERY_URL).await?;
        let mut cached = self.github_jwks_uri.write().await;
        *cached = Some((uri.clone(), Instant::now()));
        Ok(uri)
    }

    async fn fetch_oidc_jwks_uri(&self, discovery_url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(discovery_url)
            .send()
            .await
            .map_err(|e| format!("oidc discovery fetch failed: {}", e))?;

        let doc: OidcDiscoveryDocument = response
            .json()
            .await
            .map_err(|e| format!("oidc discovery document malformed: {}", e))?;

        Ok(doc.jwks_uri)
    }

    /// `getSigningKey` — return a cached key if fresh, otherwise fetch the
    /// JWKS document and select the key matching `kid`.
    async fn get_signing_key(&self, uri: &str, kid: &str) -> Result<DecodingKey, String> {
        if let Some(keys) = self.cached_keys_if_fresh(uri).await {
            if let Some(key) = keys.get(kid) {
                return Ok(key.clone());
            }
        }

        self.check_rate_limit(uri).await?;
        let keys = self.fetch_and_cache_keys(uri).await?;
        keys.get(kid).cloned().ok_or_else(|| format!("no JWKS key found for kid {}", kid))
    }

    async fn cached_keys_if_fresh(&self, uri: &str) -> Option<Arc<HashMap<String, DecodingKey>>> {
        let cache = self.keys_by_uri.read().await;
        let entry = cache.get(uri)?;
        if entry.fetched_at.elapsed() < self.cache_max_age {
            Some(entry.keys.clone())
        } else {
            None
        }
    }

    async fn check_rate_limit(&self, uri: &str) -> Result<(), String> {
        let mut limits = self.rate_limits.write().await;
        let window = limits.entry(uri.to_string()).or_default();
        let now = Instant::now();

        match window.window_start {
            Some(start) if now.duration_since(start) < Duration::from_secs(60) => {
                if window.count >= self.rate_limit_per_minute {
                    return Err(format!("JWKS rate limit exceeded for {}", uri));
                }
                window.count += 1;
            }
            _ => {
                window.window_start = Some(now);
                window.count = 1;
            }
        }

        Ok(())
    }

    async fn fetch_and_cache_keys(&self, uri: &str) -> Result<Arc<HashMap<String, DecodingKey>>, String> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| format!("JWKS fetch failed: {}", e))?;

        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| format!("JWKS document malformed: {}", e))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            let decoding_key = match jwk.kty.as_str() {
                "RSA" => {
                    let (n, e) = match (&jwk.n, &jwk.e) {
                        (Some(n), Some(e)) => (n, e),
                        _ => continue,
                    };
                    DecodingKey::from_rsa_components(n, e).ok()
                }
                "EC" => {
                    let (x, y) = match (&jwk.x, &jwk.y) {
                        (Some(x), Some(y)) => (x, y),
                        _ => continue,
                    };
                    DecodingKey::from_ec_components(x, y).ok()
                }
                _ => None,
            };

            if let Some(key) = decoding_key {
                keys.insert(jwk.kid, key);
            }
        }

        let keys = Arc::new(keys);

        let mut cache = self.keys_by_uri.write().await;
        if cache.len() >= self.cache_max_entries && !cache.contains_key(uri) {
            // Evict an arbitrary entry; last-writer-wins is acceptable here
            // (§5) since entries are cheap to refetch.
            if let Some(evict_key) = cache.keys().next().cloned() {
                cache.remove(&evict_key);
            }
        }
        cache.insert(
            uri.to_string(),
            CachedKeys {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(keys)
    }

    /// Verify a bearer token against the JWKS resolved for `mode`. Restricts
    /// accepted algorithms to asymmetric families regardless of what the
    /// token header claims.
    pub async fn verify(
        &self,
        token: &str,
        mode: &JwtMode,
        tenant_id: Option<&str>,
        jwks_url: Option<&str>,
        oidc_url: Option<&str>,
        constraints: JwtClaimConstraints<'_>,
    ) -> Result<(), String> {
        let header = decode_header(token).map_err(|e| e.to_string())?;

        if !is_asymmetric_algorithm(header.alg) {
            return Err(format!("algorithm {:?} rejected: JWKS verification requires an asymmetric algorithm", header.alg));
        }

        let kid = header.kid.ok_or("token is missing a kid")?;
        let uri = self.resolve_jwks_uri(mode, tenant_id, jwks_url, oidc_url).await?;
        let key = self.get_signing_key(&uri, &kid).await?;

        let mut validation = Validation::new(header.alg);
        if let Some(aud) = constraints.audience {
            validation.set_audience(&[aud]);
        } else {
            validation.validate_aud = false;
        }
        if let Some(iss) = constraints.issuer {
            validation.set_issuer(&[iss]);
        }

        decode::<serde_json::Value>(token, &key, &validation)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

fn is_asymmetric_algorithm(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
            | Algorithm::ES256
            | Algorithm::ES384
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_hmac_algorithms_even_if_header_claims_them() {
        assert!(!is_asymmetric_algorithm(Algorithm::HS256));
        assert!(!is_asymmetric_algorithm(Algorithm::HS384));
        assert!(!is_asymmetric_algorithm(Algorithm::HS512));
    }

    #[test]
    fn accepts_rsa_and_ec_families() {
        assert!(is_asymmetric_algorithm(Algorithm::RS256));
        assert!(is_asymmetric_algorithm(Algorithm::ES256));
        assert!(is_asymmetric_algorithm(Algorithm::PS256));
    }

    #[tokio::test]
    async fn resolve_jwks_uri_microsoft_interpolates_tenant() {
        let manager = JwksManager::new(Duration::from_secs(600), 10, 10);
        let uri = manager
            .resolve_jwks_uri(&JwtMode::Microsoft, Some("tenant-123"), None, None)
            .await
            .unwrap();
        assert_eq!(uri, "https://login.microsoftonline.com/tenant-123/discovery/v2.0/keys");
    }

    #[tokio::test]
    async fn resolve_jwks_uri_google_is_fixed() {
        let manager = JwksManager::new(Duration::from_secs(600), 10, 10);
        let uri = manager.resolve_jwks_uri(&JwtMode::Google, None, None, None).await.unwrap();
        assert_eq!(uri, "https://www.googleapis.com/oauth2/v3/certs");
    }

    #[tokio::test]
    async fn resolve_jwks_uri_endpoint_requires_url() {
        let manager = JwksManager::new(Duration::from_secs(600), 10, 10);
        assert!(manager.resolve_jwks_uri(&JwtMode::JwksEndpoint, None, None, None).await.is_err());
        let uri = manager
            .resolve_jwks_uri(&JwtMode::JwksEndpoint, None, Some("https://example.com/jwks.json"), None)
            .await
            .unwrap();
        assert_eq!(uri, "https://example.com/jwks.json");
    }

    #[tokio::test]
    async fn rate_limit_blocks_after_threshold() {
        let manager = JwksManager::new(Duration::from_secs(600), 10, 2);
        manager.check_rate_limit("https://example.com/jwks.json").await.unwrap();
        manager.check_rate_limit("https://example.com/jwks.json").await.unwrap();
        assert!(manager.check_rate_limit("https://example.com/jwks.json").await.is_err());
    }
}
