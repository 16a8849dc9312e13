//! Gateway Handler (§4.G): the single catch-all route that resolves,
//! gates, applies CORS, authenticates, and proxies every inbound request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;

use crate::auth::{authenticate, AuthContext};
use crate::error::Error;
use crate::model::{CorsSettings, Method as RouteMethod};
use crate::proxy::{self, ProxyRequest};
use crate::state::AppState;

/// The gateway's router: one fallback handler for every method and path.
pub fn gateway_router(state: Arc<AppState>) -> Router {
    Router::new().fallback(any(handle)).with_state(state)
}

async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let host = host_from_request(&uri, &headers);
    let path = uri.path().to_string();
    let query = uri.query().unwrap_or("").to_string();

    let resolved = match state.cache.resolve(&host, &path) {
        Some(resolved) => resolved,
        None => return Error::RouteNotMatched.into_response(),
    };

    if method != Method::OPTIONS {
        let allowed = RouteMethod::parse(method.as_str())
            .map(|m| resolved.route.allowed_methods.contains(&m))
            .unwrap_or(false);
        if !allowed {
            let allowed_list: Vec<String> =
                resolved.route.allowed_methods.iter().map(|m| m.as_str().to_string()).collect();
            return Error::MethodNotAllowed { allowed: allowed_list }.into_response();
        }
    }

    let origin = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok());
    let requested_method = headers.get("access-control-request-method").and_then(|v| v.to_str().ok());
    let requested_headers = headers.get("access-control-request-headers").and_then(|v| v.to_str().ok());
    let is_preflight = method == Method::OPTIONS && requested_method.is_some();

    let cors_headers = compute_cors_headers(&resolved.route.cors, origin, is_preflight, requested_method, requested_headers);

    if is_preflight {
        if let Some(cors_headers) = &cors_headers {
            let mut response = StatusCode::NO_CONTENT.into_response();
            apply_string_headers(response.headers_mut(), cors_headers);
            return response;
        }
        // Origin didn't match: per §4.G this is no longer treated as a
        // preflight, so it falls through the rest of the pipeline as an
        // ordinary OPTIONS request.
    }

    let client_ip = peer.ip().to_string();

    let auth_ctx = AuthContext {
        headers: &headers,
        query: &query,
        path: &path,
        client_ip: &client_ip,
        execution: &state.execution,
        jwks: &state.jwks,
        middleware_timeout: state.execution.middleware_timeout(),
    };
    let outcome = authenticate(&auth_ctx, &resolved.route.auth_methods_in_order, resolved.route.auth_logic).await;

    let result: Result<Response, Error> = if !outcome.authenticated {
        Err(Error::Unauthorized { realm: outcome.realm })
    } else {
        match resolved.route.function_id.as_deref() {
            None => Err(Error::NoUpstreamConfigured),
            Some(function_id) => {
                let proxy_request = ProxyRequest {
                    method: method.clone(),
                    headers: &headers,
                    body,
                    query: &query,
                    path_params: &resolved.path_params,
                    path_suffix: &resolved.path_suffix,
                    function_id,
                    host: &host,
                    scheme: scheme_from_request(&headers),
                    client_ip: &client_ip,
                    trust_proxy: state.config.service.trust_proxy,
                };
                proxy::proxy(&state.execution, proxy_request).await
            }
        }
    };

    let mut response = match result {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };

    if let Some(cors_headers) = &cors_headers {
        apply_string_headers(response.headers_mut(), cors_headers);
    }

    response
}

fn host_from_request(uri: &Uri, headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| uri.host().map(|h| h.to_string()))
        .unwrap_or_default()
}

fn scheme_from_request(headers: &HeaderMap) -> &str {
    headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()).unwrap_or("http")
}

fn apply_string_headers(headers: &mut HeaderMap, pairs: &[(String, String)]) {
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}

/// CORS algorithm (§4.G). Returns `None` when CORS is disabled, no `Origin`
/// header is present, or the origin isn't in `allowed_origins` (in which
/// case no CORS headers are set at all and the browser is left to reject
/// the response on its own).
pub fn compute_cors_headers(
    cors: &CorsSettings,
    origin: Option<&str>,
    is_preflight: bool,
    requested_method: Option<&str>,
    requested_headers: Option<&str>,
) -> Option<Vec<(String, String)>> {
    if !cors.enabled {
        return None;
    }
    let origin = origin?;

    let allow_any = cors.allowed_origins.is_empty() || cors.allowed_origins.contains("*");
    let mut headers = Vec::new();

    if allow_any {
        headers.push(("Access-Control-Allow-Origin".to_string(), "*".to_string()));
    } else if cors.allowed_origins.contains(origin) {
        headers.push(("Access-Control-Allow-Origin".to_string(), origin.to_string()));
        headers.push(("Vary".to_string(), "Origin".to_string()));
    } else {
        return None;
    }

    if cors.allow_credentials {
        headers.push(("Access-Control-Allow-Credentials".to_string(), "true".to_string()));
    }

    if !cors.expose_headers.is_empty() {
        headers.push(("Access-Control-Expose-Headers".to_string(), cors.expose_headers.join(", ")));
    }

    if is_preflight {
        if let Some(method) = requested_method {
            headers.push(("Access-Control-Allow-Methods".to_string(), method.to_string()));
        }
        let allow_headers = if !cors.allowed_headers.is_empty() {
            cors.allowed_headers.join(", ")
        } else if let Some(requested) = requested_headers {
            requested.to_string()
        } else {
            "Content-Type, Authorization".to_string()
        };
        headers.push(("Access-Control-Allow-Headers".to_string(), allow_headers));
        headers.push(("Access-Control-Max-Age".to_string(), cors.max_age_seconds.to_string()));
    }

    Some(headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_cors(allowed_origins: &[&str]) -> CorsSettings {
        CorsSettings {
            enabled: true,
            allowed_origins: allowed_origins.iter().map(|s| s.to_string()).collect(),
            allowed_headers: vec![],
            expose_headers: vec![],
            max_age_seconds: 600,
            allow_credentials: false,
        }
    }

    #[test]
    fn disabled_cors_yields_no_headers() {
        let cors = CorsSettings::default();
        assert!(compute_cors_headers(&cors, Some("https://app.acme.com"), false, None, None).is_none());
    }

    #[test]
    fn no_origin_header_yields_no_headers() {
        let cors = enabled_cors(&["https://app.acme.com"]);
        assert!(compute_cors_headers(&cors, None, false, None, None).is_none());
    }

    #[test]
    fn wildcard_allows_any_origin() {
        let cors = enabled_cors(&[]);
        let headers = compute_cors_headers(&cors, Some("https://anything.example"), false, None, None).unwrap();
        assert!(headers.contains(&("Access-Control-Allow-Origin".to_string(), "*".to_string())));
    }

    #[test]
    fn exact_origin_match_echoes_origin_and_sets_vary() {
        let cors = enabled_cors(&["https://app.acme.com"]);
        let headers = compute_cors_headers(&cors, Some("https://app.acme.com"), false, None, None).unwrap();
        assert!(headers.contains(&("Access-Control-Allow-Origin".to_string(), "https://app.acme.com".to_string())));
        assert!(headers.contains(&("Vary".to_string(), "Origin".to_string())));
    }

    #[test]
    fn mismatched_origin_yields_no_headers() {
        let cors = enabled_cors(&["https://app.acme.com"]);
        assert!(compute_cors_headers(&cors, Some("https://evil.example"), false, None, None).is_none());
    }

    #[test]
    fn preflight_sets_methods_headers_and_max_age() {
        let mut cors = enabled_cors(&["https://app.acme.com"]);
        cors.allowed_headers = vec!["Content-Type".to_string()];
        let headers = compute_cors_headers(&cors, Some("https://app.acme.com"), true, Some("POST"), None).unwrap();
        assert!(headers.contains(&("Access-Control-Allow-Methods".to_string(), "POST".to_string())));
        assert!(headers.contains(&("Access-Control-Allow-Headers".to_string(), "Content-Type".to_string())));
        assert!(headers.contains(&("Access-Control-Max-Age".to_string(), "600".to_string())));
    }

    #[test]
    fn preflight_without_configured_headers_echoes_requested_headers() {
        let cors = enabled_cors(&["https://app.acme.com"]);
        let headers =
            compute_cors_headers(&cors, Some("https://app.acme.com"), true, Some("POST"), Some("X-Custom")).unwrap();
        assert!(headers.contains(&("Access-Control-Allow-Headers".to_string(), "X-Custom".to_string())));
    }

    #[test]
    fn preflight_with_no_configured_or_requested_headers_defaults() {
        let cors = enabled_cors(&["https://app.acme.com"]);
        let headers = compute_cors_headers(&cors, Some("https://app.acme.com"), true, Some("POST"), None).unwrap();
        assert!(headers.contains(&(
            "Access-Control-Allow-Headers".to_string(),
            "Content-Type, Authorization".to_string()
        )));
    }

    #[test]
    fn credentials_flag_sets_allow_credentials() {
        let mut cors = enabled_cors(&["https://app.acme.com"]);
        cors.allow_credentials = true;
        let headers = compute_cors_headers(&cors, Some("https://app.acme.com"), false, None, None).unwrap();
        assert!(headers.contains(&("Access-Control-Allow-Credentials".to_string(), "true".to_string())));
    }

    #[test]
    fn expose_headers_joined_when_present() {
        let mut cors = enabled_cors(&[]);
        cors.expose_headers = vec!["X-Request-Id".to_string(), "X-Trace-Id".to_string()];
        let headers = compute_cors_headers(&cors, Some("https://app.acme.com"), false, None, None).unwrap();
        assert!(headers.contains(&(
            "Access-Control-Expose-Headers".to_string(),
            "X-Request-Id, X-Trace-Id".to_string()
        )));
    }

    #[test]
    fn host_from_request_prefers_host_header_over_uri_authority() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::HOST, "gw.example.com".parse().unwrap());
        let uri: Uri = "/hello".parse().unwrap();
        assert_eq!(host_from_request(&uri, &headers), "gw.example.com");
    }
}
