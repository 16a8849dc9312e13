//! `bearer_jwt` / `fixed_secret` validator (§4.D). HMAC algorithms only —
//! this mode never touches a JWKS endpoint.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FixedSecretClaims {
    #[allow(dead_code)]
    #[serde(default)]
    sub: Option<String>,
}

const ALLOWED_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Verify `token` against `secret` using HMAC only. Restricting the
/// algorithm set here (rather than trusting whatever the header claims)
/// prevents a caller from downgrading to a weaker HMAC variant; it is not
/// the algorithm-confusion defense (that only matters for JWKS-backed
/// asymmetric verification, see [`crate::auth::jwks`]).
pub fn verify(token: &str, secret: &str, audience: Option<&str>, issuer: Option<&str>) -> bool {
    let header = match decode_header(token) {
        Ok(h) => h,
        Err(_) => return false,
    };

    if !ALLOWED_ALGORITHMS.contains(&header.alg) {
        return false;
    }

    let mut validation = Validation::new(header.alg);
    // §4.D only requires HMAC signature verification for this mode; a token
    // with no `exp` claim must still verify. `exp` is still checked (and
    // enforced) when the token actually carries one.
    validation.required_spec_claims.clear();
    if let Some(aud) = audience {
        validation.set_audience(&[aud]);
    } else {
        validation.validate_aud = false;
    }
    if let Some(iss) = issuer {
        validation.set_issuer(&[iss]);
    }

    let key = DecodingKey::from_secret(secret.as_bytes());
    decode::<FixedSecretClaims>(token, &key, &validation).is_ok()
}
