//! Ambient HTTP middleware: request-id generation/propagation and
//! sensitive-header masking (§10 ambient stack). Authentication and CORS
//! are applied per-request in `handler`, not as global tower layers — both
//! depend on the matched route's own configuration.

pub mod request_tracking;

pub use request_tracking::{
    request_id_layer, request_id_propagation_layer, sensitive_headers_layer, RequestTrackingConfig,
    PROPAGATE_HEADERS, SENSITIVE_HEADERS,
};
