//! Core data model: the denormalized, immutable shape held by the route
//! cache between rebuilds.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

/// HTTP methods a route may allow. Deliberately excludes CONNECT/TRACE — the
/// gateway never needs to proxy those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "PATCH" => Some(Method::Patch),
            "HEAD" => Some(Method::Head),
            _ => None,
        }
    }
}

/// `and`/`or` composition of a route's ordered auth methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AuthLogic {
    And,
    Or,
}

/// `bearer_jwt`'s signing-key resolution mode.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JwtMode {
    FixedSecret,
    Microsoft,
    Google,
    Github,
    JwksEndpoint,
    OidcDiscovery,
}

/// Per-type auth method configuration, keyed by `AuthMethod::kind`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMethodConfig {
    BasicAuth {
        credentials: Vec<BasicCredential>,
        realm: Option<String>,
    },
    BearerJwt {
        jwt_mode: JwtMode,
        jwt_secret: Option<String>,
        tenant_id: Option<String>,
        jwks_url: Option<String>,
        oidc_url: Option<String>,
        audience: Option<String>,
        issuer: Option<String>,
    },
    ApiKey {
        api_keys: Vec<String>,
    },
    Middleware {
        function_id: String,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BasicCredential {
    pub username: String,
    pub password: String,
}

/// An auth method as persisted: named, typed, belongs to exactly one
/// project's gateway config.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuthMethod {
    pub id: Uuid,
    pub name: String,
    pub config: AuthMethodConfig,
}

/// CORS policy attached to a single route.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CorsSettings {
    pub enabled: bool,
    /// Empty or containing `"*"` means "allow any origin".
    pub allowed_origins: HashSet<String>,
    pub allowed_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub max_age_seconds: u64,
    pub allow_credentials: bool,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: HashSet::new(),
            allowed_headers: Vec::new(),
            expose_headers: Vec::new(),
            max_age_seconds: 0,
            allow_credentials: false,
        }
    }
}

/// A compiled route-pattern matcher. Treats the path pattern as a prefix:
/// the longest matched prefix is consumed and the remainder is forwarded
/// upstream as `path_suffix`.
#[derive(Clone)]
pub struct CompiledMatcher {
    pub pattern: String,
    regex: Arc<Regex>,
    param_names: Arc<Vec<String>>,
}

impl std::fmt::Debug for CompiledMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledMatcher").field("pattern", &self.pattern).finish()
    }
}

impl CompiledMatcher {
    /// Compile a `path_pattern` like `/users/:id` into a prefix-matching
    /// regex with named capture groups for each `:param` segment.
    pub fn compile(pattern: &str) -> Self {
        let mut param_names = Vec::new();
        let mut regex_str = String::from("^");

        for segment in pattern.split('/') {
            if segment.is_empty() {
                continue;
            }
            regex_str.push('/');
            if let Some(name) = segment.strip_prefix(':') {
                param_names.push(name.to_string());
                regex_str.push_str(&format!("(?P<{}>[^/]+)", name));
            } else {
                regex_str.push_str(&regex::escape(segment));
            }
        }

        if regex_str == "^" {
            // Root pattern "/" matches everything with path_suffix unchanged.
            regex_str.push('/');
        }

        let regex = Regex::new(&regex_str).expect("route pattern compiles to a valid regex");

        Self {
            pattern: pattern.to_string(),
            regex: Arc::new(regex),
            param_names: Arc::new(param_names),
        }
    }

    /// Try to match `path` as a prefix. Returns the extracted path params
    /// and the unmatched suffix (possibly empty).
    pub fn match_prefix(&self, path: &str) -> Option<(HashMap<String, String>, String)> {
        if self.pattern == "/" {
            return Some((HashMap::new(), path.to_string()));
        }

        let m = self.regex.find(path)?;
        if m.start() != 0 {
            return None;
        }

        let caps = self.regex.captures(path)?;
        let mut params = HashMap::new();
        for name in self.param_names.iter() {
            if let Some(value) = caps.name(name) {
                params.insert(name.clone(), value.as_str().to_string());
            }
        }

        let suffix = path[m.end()..].to_string();
        Some((params, suffix))
    }
}

/// A denormalized, immutable copy of a route held in the cache.
#[derive(Debug, Clone)]
pub struct RouteSnapshot {
    pub route_id: Uuid,
    pub path_pattern: String,
    pub compiled_matcher: CompiledMatcher,
    pub function_id: Option<String>,
    pub allowed_methods: HashSet<Method>,
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
    pub cors: CorsSettings,
    pub auth_methods_in_order: Vec<AuthMethod>,
    pub auth_logic: AuthLogic,
}

/// A tenant's full, denormalized routing table.
#[derive(Debug, Clone)]
pub struct ProjectSnapshot {
    pub project_id: Uuid,
    pub slug: String,
    pub config_id: Uuid,
    pub custom_domain: Option<String>,
    /// Sorted ascending by `(sort_order, created_at)` — the tie-break
    /// resolution for routes sharing a `sort_order` (see design notes).
    pub routes: Vec<RouteSnapshot>,
}

/// The full cache: every enabled, active route reachable either by custom
/// domain or by slug under the default gateway domain.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    pub by_custom_domain: HashMap<String, Arc<ProjectSnapshot>>,
    pub by_slug: HashMap<String, Arc<ProjectSnapshot>>,
    pub default_gateway_domain: Option<String>,
    pub last_rebuilt_at: Option<DateTime<Utc>>,
}

/// The outcome of `Cache::resolve`.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub project: Arc<ProjectSnapshot>,
    pub route: RouteSnapshot,
    pub path_params: HashMap<String, String>,
    pub path_suffix: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiled_matcher_extracts_named_param_and_suffix() {
        let matcher = CompiledMatcher::compile("/users/:id");
        let (params, suffix) = matcher.match_prefix("/users/42/profile").unwrap();
        assert_eq!(params.get("id").unwrap(), "42");
        assert_eq!(suffix, "/profile");
    }

    #[test]
    fn compiled_matcher_root_pattern_matches_any_path_unmodified() {
        let matcher = CompiledMatcher::compile("/");
        let (params, suffix) = matcher.match_prefix("/acme/hello").unwrap();
        assert!(params.is_empty());
        assert_eq!(suffix, "/acme/hello");
    }

    #[test]
    fn compiled_matcher_rejects_non_prefix_match() {
        let matcher = CompiledMatcher::compile("/users/:id");
        assert!(matcher.match_prefix("/orders/42").is_none());
    }

    #[test]
    fn method_parse_round_trips_through_as_str() {
        for m in [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Patch,
            Method::Head,
        ] {
            assert_eq!(Method::parse(m.as_str()), Some(m));
        }
        assert_eq!(Method::parse("TRACE"), None);
    }
}
