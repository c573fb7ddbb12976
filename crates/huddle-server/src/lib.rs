//! Axum transport and HTTP surface binding `huddle-core`'s room registry
//! to the wire protocol defined in `huddle-protocol`.

pub mod config;
pub mod dispatcher;
pub mod http;
pub mod rate_limit;
pub mod ws;

use std::sync::Arc;
use std::time::Instant;

use huddle_core::{LatentStore, RoomRegistry};

use crate::config::Config;
use crate::rate_limit::RateLimiter;

/// Everything a request handler or connection task needs, shared behind
/// one `Arc` across the router and every connection task.
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub config: Arc<Config>,
    pub rate_limiter: Arc<RateLimiter>,
    pub latent_store: Arc<LatentStore>,
    pub started_at: Instant,
}
