//! `middleware` auth method (§4.D): delegates the authorization decision to
//! a user function invoked through the execution service.

use std::collections::HashMap;
use std::time::Duration;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::execution::ExecutionClient;

#[derive(Debug, Serialize)]
struct MiddlewareRequestBody {
    path: String,
    query: String,
    headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct MiddlewareResponseBody {
    #[serde(default)]
    allow: bool,
}

/// POST `{path, query, headers}` (no body) to `/invoke/{function_id}` with
/// gateway identity headers; succeed iff the response has `allow === true`.
/// Any error — timeout, connection failure, malformed response — fails
/// closed.
pub async fn validate(
    client: &ExecutionClient,
    function_id: &str,
    path: &str,
    query: &str,
    headers: &HeaderMap,
    client_ip: &str,
    timeout: Duration,
) -> bool {
    let body = MiddlewareRequestBody {
        path: path.to_string(),
        query: query.to_string(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect(),
    };

    match client.invoke_middleware(function_id, &body, client_ip, timeout).await {
        Ok(response) => response.allow,
        Err(e) => {
            tracing::warn!(function_id, error = %e, "middleware auth call failed, failing closed");
            false
        }
    }
}

impl ExecutionClient {
    pub(crate) async fn invoke_middleware(
        &self,
        function_id: &str,
        body: &MiddlewareRequestBody,
        client_ip: &str,
        timeout: Duration,
    ) -> Result<MiddlewareResponseBody, String> {
        let url = self.build_invoke_url(function_id, "", "");
        let mut request = self.http_client().post(&url).json(body).timeout(timeout);

        for (name, value) in self.build_gateway_headers(client_ip) {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        response.json::<MiddlewareResponseBody>().await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_without_allow_field_defaults_to_false() {
        let parsed: MiddlewareResponseBody = serde_json::from_str("{}").unwrap();
        assert!(!parsed.allow);
    }

    #[test]
    fn response_with_allow_true_parses() {
        let parsed: MiddlewareResponseBody = serde_json::from_str(r#"{"allow":true}"#).unwrap();
        assert!(parsed.allow);
    }
}
