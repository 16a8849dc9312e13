//! # gateway-core
//!
//! Route cache, authentication pipeline, and streaming reverse proxy for a
//! multi-tenant API gateway. The gateway sits between external clients and a
//! pool of function-execution workers: it resolves incoming (host, path)
//! pairs against per-tenant route configuration, enforces a per-route
//! ordered authentication policy, applies CORS, and forwards matched
//! requests to a single backing execution service as streaming reverse-proxy
//! calls.
//!
//! Persisted configuration (projects, routes, auth methods) is owned by an
//! external admin service; this crate only ever reads it. Function bodies
//! execute in a separate sandboxed service that this crate treats as an
//! opaque streaming HTTP upstream.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gateway_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let state = AppState::new(config).await?;
//!     state.cache.start(state.config.refresh.interval()).await?;
//!
//!     let app = gateway_router(state.clone());
//!     Server::new(state.config.clone()).serve(app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod execution;
pub mod handler;
pub mod ids;
pub mod listener;
pub mod middleware;
pub mod model;
pub mod observability;
pub mod proxy;
pub mod server;
pub mod state;
pub mod store;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::auth::{authenticate, AuthOutcome};
    pub use crate::cache::RouteCache;
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::handler::gateway_router;
    pub use crate::model::{
        CacheState, CorsSettings, ProjectSnapshot, ResolvedRoute, RouteSnapshot,
    };
    pub use crate::observability::init_tracing;
    pub use crate::server::Server;
    pub use crate::state::AppState;

    pub use axum::{
        extract::{Request, State},
        response::{IntoResponse, Response},
        Router,
    };
    pub use tracing::{debug, error, info, instrument, trace, warn};
}
