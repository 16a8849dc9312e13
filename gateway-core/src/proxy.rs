//! Proxy (§4.G "Proxy algorithm"): strips hop-by-hop and identity headers,
//! builds the forwarded-header chain, merges the route's path params into
//! the query string, and streams the upstream response back to the client
//! without buffering.
//!
//! Request and response bodies are handed to `reqwest`/`axum` as streams
//! end to end; nothing here reads a body fully into memory, so `Content-
//! Encoding` survives untouched and arbitrarily large bodies don't inflate
//! gateway memory use.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use futures::StreamExt;

use crate::error::Error;
use crate::execution::{encode_query_value, ExecutionClient};

/// Request headers never forwarded upstream. `Authorization` and
/// `x-invoke-data` are stripped deliberately on ingress — they may be
/// user-supplied and must not be mistaken for the gateway's own signed
/// attestation, which is added back by [`ExecutionClient::build_gateway_headers`].
const REQUEST_STRIP_HEADERS: &[&str] = &[
    "host",
    "authorization",
    "x-api-key",
    "x-real-ip",
    "x-invoke-data",
    "connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// Response headers never forwarded back to the client.
const RESPONSE_STRIP_HEADERS: &[&str] = &["transfer-encoding", "connection", "keep-alive", "trailer", "upgrade"];

/// The entire `x-forwarded-*` family is gateway-owned and rebuilt from the
/// observed connection in [`build_forwarded_headers`]; a client-supplied
/// `X-Forwarded-Port` or other variant must not pass through unstripped.
fn is_stripped(name: &str, strip_list: &[&str]) -> bool {
    name.to_ascii_lowercase().starts_with("x-forwarded-") || strip_list.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// Strip the IPv4-mapped-IPv6 `::ffff:` prefix some platforms attach to a
/// peer address.
pub fn normalize_client_ip(ip: &str) -> &str {
    ip.strip_prefix("::ffff:").unwrap_or(ip)
}

/// Merge the request's raw query string with the route's extracted path
/// params; a path param overrides a query key of the same name. Original
/// query pairs are forwarded verbatim (the client may have already
/// percent-encoded them); only the newly injected path-param values are
/// encoded here.
pub fn merge_query(query: &str, path_params: &HashMap<String, String>) -> String {
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("").to_string();
            let value = parts.next().unwrap_or("").to_string();
            (key, value)
        })
        .collect();

    for (key, value) in path_params {
        pairs.retain(|(k, _)| k != key);
        pairs.push((key.clone(), encode_query_value(value)));
    }

    pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build the `X-Forwarded-*` chain per §4.G. When the gateway doesn't trust
/// a fronting proxy, the chain is just the directly observed peer address;
/// otherwise the peer is appended to whatever chain the request already
/// carried.
pub fn build_forwarded_headers(
    client_ip: &str,
    existing_forwarded_for: Option<&str>,
    trust_proxy: bool,
    host: &str,
    scheme: &str,
) -> Vec<(String, String)> {
    let client_ip = normalize_client_ip(client_ip);

    let chain: Vec<String> = if trust_proxy {
        let mut ips: Vec<String> = existing_forwarded_for
            .map(|value| {
                value
                    .split(',')
                    .map(|s| normalize_client_ip(s.trim()).to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        ips.push(client_ip.to_string());
        ips
    } else {
        vec![client_ip.to_string()]
    };

    let real_ip = chain.first().cloned().unwrap_or_else(|| client_ip.to_string());

    vec![
        ("x-forwarded-for".to_string(), chain.join(", ")),
        ("x-real-ip".to_string(), real_ip),
        ("x-forwarded-host".to_string(), host.to_string()),
        ("x-forwarded-proto".to_string(), scheme.to_string()),
    ]
}

/// Everything the proxy needs to build and forward one upstream call.
pub struct ProxyRequest<'a> {
    pub method: Method,
    pub headers: &'a HeaderMap,
    pub body: Body,
    pub query: &'a str,
    pub path_params: &'a HashMap<String, String>,
    pub path_suffix: &'a str,
    pub function_id: &'a str,
    pub host: &'a str,
    pub scheme: &'a str,
    pub client_ip: &'a str,
    pub trust_proxy: bool,
}

/// Proxy one request to the execution service and stream its response back.
/// On failure before upstream response headers arrive, returns
/// `Error::UpstreamError` (502); once streaming has begun, a later stream
/// failure surfaces as a truncated body rather than an error response —
/// the client has already received a 2xx and headers.
pub async fn proxy(execution: &ExecutionClient, req: ProxyRequest<'_>) -> Result<Response, Error> {
    let merged_query = merge_query(req.query, req.path_params);
    let url = execution.build_invoke_url(req.function_id, req.path_suffix, &merged_query);

    let existing_forwarded_for = req.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());

    let mut builder = execution.http_client().request(req.method, url).timeout(execution.proxy_timeout());

    for (name, value) in req.headers.iter() {
        if is_stripped(name.as_str(), REQUEST_STRIP_HEADERS) {
            continue;
        }
        builder = builder.header(name, value);
    }

    for (name, value) in build_forwarded_headers(
        req.client_ip,
        existing_forwarded_for,
        req.trust_proxy,
        req.host,
        req.scheme,
    ) {
        builder = builder.header(name, value);
    }

    for (name, value) in execution.build_gateway_headers(req.client_ip) {
        builder = builder.header(name, value);
    }

    let body_stream = req.body.into_data_stream();
    builder = builder.body(reqwest::Body::wrap_stream(body_stream));

    let upstream = builder.send().await.map_err(|e| Error::UpstreamError(classify_send_error(&e)))?;

    let status = upstream.status();

    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers().iter() {
        if is_stripped(name.as_str(), RESPONSE_STRIP_HEADERS) {
            continue;
        }
        response_headers.insert(name.clone(), value.clone());
    }

    let body_stream = upstream
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)));
    let body = Body::from_stream(body_stream);

    let mut response = Response::builder().status(status).body(body).map_err(Error::from)?;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn classify_send_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "upstream request timed out".to_string()
    } else if e.is_connect() {
        "upstream connection failed".to_string()
    } else {
        "upstream request failed".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_client_ip_strips_ipv4_mapped_prefix() {
        assert_eq!(normalize_client_ip("::ffff:10.0.0.1"), "10.0.0.1");
        assert_eq!(normalize_client_ip("10.0.0.1"), "10.0.0.1");
    }

    #[test]
    fn merge_query_path_param_overrides_same_key() {
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());
        let merged = merge_query("id=1&x=2", &params);
        let pairs: Vec<&str> = merged.split('&').collect();
        assert!(pairs.contains(&"x=2"));
        assert!(pairs.contains(&"id=42"));
        assert!(!pairs.contains(&"id=1"));
    }

    #[test]
    fn merge_query_with_empty_query_has_only_path_params() {
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());
        assert_eq!(merge_query("", &params), "id=42");
    }

    #[test]
    fn merge_query_percent_encodes_param_values() {
        let mut params = HashMap::new();
        params.insert("name".to_string(), "a b".to_string());
        assert_eq!(merge_query("", &params), "name=a%20b");
    }

    #[test]
    fn merge_query_forwards_already_encoded_original_values_verbatim() {
        let merged = merge_query("q=a%20b", &HashMap::new());
        assert_eq!(merged, "q=a%20b");
    }

    #[test]
    fn is_stripped_matches_entire_x_forwarded_family() {
        assert!(is_stripped("x-forwarded-port", REQUEST_STRIP_HEADERS));
        assert!(is_stripped("X-Forwarded-Server", REQUEST_STRIP_HEADERS));
        assert!(is_stripped("host", REQUEST_STRIP_HEADERS));
        assert!(!is_stripped("content-type", REQUEST_STRIP_HEADERS));
    }

    #[test]
    fn build_forwarded_headers_untrusted_proxy_ignores_existing_chain() {
        let headers = build_forwarded_headers("1.2.3.4", Some("9.9.9.9"), false, "gw.example.com", "https");
        let for_header = headers.iter().find(|(k, _)| k == "x-forwarded-for").unwrap();
        assert_eq!(for_header.1, "1.2.3.4");
    }

    #[test]
    fn build_forwarded_headers_trusted_proxy_appends_to_existing_chain() {
        let headers = build_forwarded_headers("1.2.3.4", Some("9.9.9.9"), true, "gw.example.com", "https");
        let for_header = headers.iter().find(|(k, _)| k == "x-forwarded-for").unwrap();
        assert_eq!(for_header.1, "9.9.9.9, 1.2.3.4");
        let real_ip = headers.iter().find(|(k, _)| k == "x-real-ip").unwrap();
        assert_eq!(real_ip.1, "9.9.9.9");
    }

    #[test]
    fn build_forwarded_headers_sets_host_and_scheme() {
        let headers = build_forwarded_headers("1.2.3.4", None, false, "gw.example.com", "https");
        assert!(headers.contains(&("x-forwarded-host".to_string(), "gw.example.com".to_string())));
        assert!(headers.contains(&("x-forwarded-proto".to_string(), "https".to_string())));
    }
}
