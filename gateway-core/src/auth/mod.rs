//! Authentication pipeline (§4.D): per-type validators composed under a
//! route's `and`/`or` logic.
//!
//! Each submodule owns one auth method `type`; this module only sequences
//! them. Evaluation is strictly in the order the route's auth methods are
//! configured — that ordering is load-bearing for `and` (first failure
//! short-circuits, carrying its realm) and for `or` (first success
//! short-circuits, and a later method is never invoked once one has
//! passed).

pub mod api_key;
pub mod basic;
pub mod jwks;
pub mod jwt_fixed;
pub mod middleware_auth;

use std::time::Duration;

use axum::http::HeaderMap;

use crate::execution::ExecutionClient;
use crate::model::{AuthLogic, AuthMethod, AuthMethodConfig, JwtMode};

pub use jwks::JwksManager;

/// Everything a single auth-method validation needs to read from the
/// request, plus the collaborators (§4.E, §4.F) some validators call out
/// to. Borrowed for the duration of one `authenticate()` call; never held
/// across a cache read.
pub struct AuthContext<'a> {
    pub headers: &'a HeaderMap,
    pub query: &'a str,
    pub path: &'a str,
    pub client_ip: &'a str,
    pub execution: &'a ExecutionClient,
    pub jwks: &'a JwksManager,
    pub middleware_timeout: Duration,
}

/// Result of composing a route's ordered auth methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthOutcome {
    pub authenticated: bool,
    /// Carried from the first failing `basic_auth` method so the handler
    /// can set `WWW-Authenticate`.
    pub realm: Option<String>,
}

impl AuthOutcome {
    fn pass() -> Self {
        Self { authenticated: true, realm: None }
    }

    fn fail(realm: Option<String>) -> Self {
        Self { authenticated: false, realm }
    }
}

/// `authenticate(req, methods, logic)` (§4.D). An empty method list is a
/// public route — always authenticated.
pub async fn authenticate(
    ctx: &AuthContext<'_>,
    methods: &[AuthMethod],
    logic: AuthLogic,
) -> AuthOutcome {
    if methods.is_empty() {
        return AuthOutcome::pass();
    }

    match logic {
        AuthLogic::Or => {
            let mut first_realm = None;
            for method in methods {
                let outcome = validate_one(ctx, method).await;
                if outcome.authenticated {
                    return outcome;
                }
                if first_realm.is_none() {
                    first_realm = outcome.realm;
                }
            }
            AuthOutcome::fail(first_realm)
        }
        AuthLogic::And => {
            for method in methods {
                let outcome = validate_one(ctx, method).await;
                if !outcome.authenticated {
                    return outcome;
                }
            }
            AuthOutcome::pass()
        }
    }
}

async fn validate_one(ctx: &AuthContext<'_>, method: &AuthMethod) -> AuthOutcome {
    match &method.config {
        AuthMethodConfig::BasicAuth { credentials, realm } => {
            match basic::validate(ctx.headers, credentials, realm.as_deref()) {
                Ok(()) => AuthOutcome::pass(),
                Err(realm) => AuthOutcome::fail(realm),
            }
        }

        AuthMethodConfig::ApiKey { api_keys } => {
            if api_key::validate(ctx.headers, ctx.query, api_keys) {
                AuthOutcome::pass()
            } else {
                AuthOutcome::fail(None)
            }
        }

        AuthMethodConfig::Middleware { function_id } => {
            let allowed = middleware_auth::validate(
                ctx.execution,
                function_id,
                ctx.path,
                ctx.query,
                ctx.headers,
                ctx.client_ip,
                ctx.middleware_timeout,
            )
            .await;
            if allowed {
                AuthOutcome::pass()
            } else {
                AuthOutcome::fail(None)
            }
        }

        AuthMethodConfig::BearerJwt {
            jwt_mode,
            jwt_secret,
            tenant_id,
            jwks_url,
            oidc_url,
            audience,
            issuer,
        } => {
            let token = match api_key::extract_bearer_token(ctx.headers) {
                Some(token) => token,
                None => return AuthOutcome::fail(None),
            };

            match jwt_mode {
                JwtMode::FixedSecret => {
                    let secret = match jwt_secret {
                        Some(secret) => secret,
                        None => return AuthOutcome::fail(None),
                    };
                    if jwt_fixed::verify(&token, secret, audience.as_deref(), issuer.as_deref()) {
                        AuthOutcome::pass()
                    } else {
                        AuthOutcome::fail(None)
                    }
                }
                _ => {
                    let constraints = jwks::JwtClaimConstraints {
                        audience: audience.as_deref(),
                        issuer: issuer.as_deref(),
                    };
                    match ctx
                        .jwks
                        .verify(
                            &token,
                            jwt_mode,
                            tenant_id.as_deref(),
                            jwks_url.as_deref(),
                            oidc_url.as_deref(),
                            constraints,
                        )
                        .await
                    {
                        Ok(()) => AuthOutcome::pass(),
                        Err(e) => {
                            tracing::debug!(error = %e, "jwks-backed jwt verification failed");
                            AuthOutcome::fail(None)
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionConfig;
    use crate::model::BasicCredential;
    use uuid::Uuid;

    fn execution_client() -> ExecutionClient {
        ExecutionClient::new(&ExecutionConfig::default(), None)
    }

    fn jwks_manager() -> JwksManager {
        JwksManager::new(Duration::from_secs(600), 10, 10)
    }

    fn basic_method(username: &str, password: &str, realm: &str) -> AuthMethod {
        AuthMethod {
            id: Uuid::new_v4(),
            name: "basic".into(),
            config: AuthMethodConfig::BasicAuth {
                credentials: vec![BasicCredential {
                    username: username.into(),
                    password: password.into(),
                }],
                realm: Some(realm.into()),
            },
        }
    }

    fn api_key_method(keys: &[&str]) -> AuthMethod {
        AuthMethod {
            id: Uuid::new_v4(),
            name: "key".into(),
            config: AuthMethodConfig::ApiKey {
                api_keys: keys.iter().map(|k| k.to_string()).collect(),
            },
        }
    }

    fn ctx<'a>(headers: &'a HeaderMap, execution: &'a ExecutionClient, jwks: &'a JwksManager) -> AuthContext<'a> {
        AuthContext {
            headers,
            query: "",
            path: "/",
            client_ip: "127.0.0.1",
            execution,
            jwks,
            middleware_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn empty_methods_is_public() {
        let headers = HeaderMap::new();
        let execution = execution_client();
        let jwks = jwks_manager();
        let outcome = authenticate(&ctx(&headers, &execution, &jwks), &[], AuthLogic::Or).await;
        assert!(outcome.authenticated);
    }

    #[tokio::test]
    async fn or_logic_short_circuits_on_first_pass() {
        // order: api_key (fails, no header) then basic (passes) — `or`
        // should return authenticated after basic succeeds.
        use base64::Engine;
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("alice:s3cret");
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Basic {}", encoded).parse().unwrap(),
        );

        let methods = vec![api_key_method(&["KEY1"]), basic_method("alice", "s3cret", "acme")];
        let execution = execution_client();
        let jwks = jwks_manager();
        let outcome = authenticate(&ctx(&headers, &execution, &jwks), &methods, AuthLogic::Or).await;
        assert!(outcome.authenticated);
    }

    #[tokio::test]
    async fn or_logic_carries_first_realm_on_full_failure() {
        let headers = HeaderMap::new();
        let methods = vec![basic_method("alice", "s3cret", "acme"), api_key_method(&["KEY1"])];
        let execution = execution_client();
        let jwks = jwks_manager();
        let outcome = authenticate(&ctx(&headers, &execution, &jwks), &methods, AuthLogic::Or).await;
        assert!(!outcome.authenticated);
        assert_eq!(outcome.realm.as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn and_logic_fails_fast_without_evaluating_later_methods() {
        let headers = HeaderMap::new();
        let methods = vec![basic_method("alice", "s3cret", "acme"), api_key_method(&["KEY1"])];
        let execution = execution_client();
        let jwks = jwks_manager();
        let outcome = authenticate(&ctx(&headers, &execution, &jwks), &methods, AuthLogic::And).await;
        assert!(!outcome.authenticated);
        assert_eq!(outcome.realm.as_deref(), Some("acme"));
    }

    #[tokio::test]
    async fn and_logic_requires_all_methods_to_pass() {
        use base64::Engine;
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode("alice:s3cret");
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Basic {}", encoded).parse().unwrap(),
        );
        headers.insert("x-api-key", "KEY1".parse().unwrap());

        let methods = vec![basic_method("alice", "s3cret", "acme"), api_key_method(&["KEY1"])];
        let execution = execution_client();
        let jwks = jwks_manager();
        let outcome = authenticate(&ctx(&headers, &execution, &jwks), &methods, AuthLogic::And).await;
        assert!(outcome.authenticated);
    }

    #[tokio::test]
    async fn or_short_circuits_before_a_later_failing_method() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "KEY2".parse().unwrap());
        let methods = vec![
            api_key_method(&["NOPE"]),
            api_key_method(&["KEY2"]),
            api_key_method(&["ALSO_NOPE"]),
        ];
        let execution = execution_client();
        let jwks = jwks_manager();
        let outcome = authenticate(&ctx(&headers, &execution, &jwks), &methods, AuthLogic::Or).await;
        assert!(outcome.authenticated);
    }
}
