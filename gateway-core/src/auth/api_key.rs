//! API key and bearer-token extraction helpers, and the `api_key` auth
//! method validator (§4.D).

use axum::http::HeaderMap;

/// `Authorization: Bearer <token>`, trimmed; empty token is treated as
/// absent.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Prefers `X-Api-Key`, then `?api_key`/`?apiKey`, then falls back to the
/// bearer token.
pub fn extract_api_key(headers: &HeaderMap, query: &str) -> Option<String> {
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }

    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        if key == "api_key" || key == "apiKey" {
            if let Some(value) = parts.next() {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }

    extract_bearer_token(headers)
}

/// Membership test against the configured key list.
pub fn validate(headers: &HeaderMap, query: &str, configured_keys: &[String]) -> bool {
    match extract_api_key(headers, query) {
        Some(key) => configured_keys.iter().any(|k| k == &key),
        None => false,
    }
}
