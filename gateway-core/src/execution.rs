//! Execution Client (§4.F): the gateway's one outbound HTTP client, talking
//! to the execution service that actually runs function code.
//!
//! `build_gateway_headers`'s JWT signing follows the same
//! encode-with-a-fresh-claims-struct shape the host framework uses for its
//! own token generator, trimmed down to the one thing this gateway needs:
//! a 60-second-lived HMAC attestation of the observed client IP.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use urlencoding::encode as url_encode;

use crate::config::ExecutionConfig;

const INVOKE_DATA_TTL_SECS: u64 = 60;

#[derive(Debug, Serialize)]
struct InvokeDataClaims {
    #[serde(rename = "clientIp")]
    client_ip: String,
    exp: u64,
}

/// Pre-configured HTTP client to the execution service.
pub struct ExecutionClient {
    http: reqwest::Client,
    base_url: String,
    proxy_timeout: Duration,
    middleware_timeout: Duration,
    internal_gateway_secret: Option<String>,
}

impl ExecutionClient {
    pub fn new(config: &ExecutionConfig, internal_gateway_secret: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            proxy_timeout: config.proxy_timeout(),
            middleware_timeout: config.middleware_timeout(),
            internal_gateway_secret,
        }
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn proxy_timeout(&self) -> Duration {
        self.proxy_timeout
    }

    pub fn middleware_timeout(&self) -> Duration {
        self.middleware_timeout
    }

    /// `buildInvokeUrl(functionId, pathSuffix, query)` — a pure function:
    /// identical inputs always produce byte-identical output.
    pub fn build_invoke_url(&self, function_id: &str, path_suffix: &str, query: &str) -> String {
        let mut url = format!("{}/invoke/{}", self.base_url, function_id);
        url.push_str(path_suffix);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// `buildGatewayHeaders(clientIp)` — always adds the marker header;
    /// adds the signed `x-invoke-data` header only when a shared secret is
    /// configured (dev mode omits it entirely).
    pub fn build_gateway_headers(&self, client_ip: &str) -> Vec<(String, String)> {
        let mut headers = vec![("x-gateway-request".to_string(), "1".to_string())];

        if let Some(secret) = &self.internal_gateway_secret {
            if let Ok(token) = self.sign_invoke_data(client_ip, secret) {
                headers.push(("x-invoke-data".to_string(), token));
            }
        }

        headers
    }

    fn sign_invoke_data(&self, client_ip: &str, secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + INVOKE_DATA_TTL_SECS;

        let claims = InvokeDataClaims {
            client_ip: client_ip.to_string(),
            exp,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }
}

/// Percent-encode a single query value for inclusion in a merged query
/// string (see [`crate::proxy::merge_query`]).
pub fn encode_query_value(value: &str) -> String {
    url_encode(value).into_owned()
}
