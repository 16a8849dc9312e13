//! HTTP Basic auth validator (§4.D).

use axum::http::HeaderMap;
use base64::Engine;

use crate::model::BasicCredential;

/// Decoded `Authorization: Basic <b64>` credentials, or `None` if the header
/// is absent or malformed.
pub fn extract_basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Equality-checks against every configured credential pair. Fails carrying
/// `realm` when no `Authorization: Basic` header is present, so the handler
/// can set `WWW-Authenticate`.
pub fn validate(
    headers: &HeaderMap,
    credentials: &[BasicCredential],
    realm: Option<&str>,
) -> Result<(), Option<String>> {
    match extract_basic_credentials(headers) {
        Some((user, pass)) => {
            let matched = credentials
                .iter()
                .any(|c| c.username == user && c.password == pass);
            if matched {
                Ok(())
            } else {
                Err(realm.map(|r| r.to_string()))
            }
        }
        None => Err(realm.map(|r| r.to_string())),
    }
}
