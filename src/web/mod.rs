//! HTTP layer built on warp, hyper and tower.
//!
//! Routes are composed with [`router::Router`], wrapped into an [`app::App`]
//! together with health checks and shutdown hooks, and served via
//! [`app::App::serve`] behind the tower layers in [`middleware`].

use bytesize::MB;

pub mod app;
pub mod body;
pub mod error;
pub mod health;
pub mod middleware;
pub mod request_id;
pub mod respond;
pub mod router;
pub mod shutdown;

/// Default limit for JSON request bodies (10 MB).
pub const DEFAULT_MAX_JSON_BODY_SIZE: u64 = 10 * MB;

/// Header carrying the request id in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
