//! Request identifiers for distributed tracing.
//!
//! Request IDs use UUIDv7 so they sort by creation time, which makes log
//! correlation across the gateway and the execution service easier than a
//! random v4 would.

use std::fmt;

use http::Request;
use tower_http::request_id::{MakeRequestId, RequestId as TowerRequestId};
use uuid::Uuid;

/// A `req_<uuidv7>` request identifier set on every inbound request that
/// doesn't already carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req_{}", self.0.simple())
    }
}

/// [`MakeRequestId`] impl used by [`crate::middleware::request_tracking`] to
/// stamp `x-request-id` on inbound requests that lack one.
#[derive(Clone, Copy, Default)]
pub struct MakeTypedRequestId;

impl MakeRequestId for MakeTypedRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<TowerRequestId> {
        let id = RequestId::new().to_string();
        http::HeaderValue::from_str(&id).ok().map(TowerRequestId::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_display_has_req_prefix() {
        let id = RequestId::new();
        assert!(id.to_string().starts_with("req_"));
    }

    #[test]
    fn make_typed_request_id_produces_distinct_ids() {
        let mut maker = MakeTypedRequestId;
        let req_a = http::Request::builder().body(()).unwrap();
        let req_b = http::Request::builder().body(()).unwrap();
        let id_a = maker.make_request_id(&req_a).unwrap();
        let id_b = maker.make_request_id(&req_b).unwrap();
        assert_ne!(id_a.header_value(), id_b.header_value());
    }
}
