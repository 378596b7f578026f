//! # Kit
//!
//! A small toolkit of backend building blocks for containerized HTTP services.
//!
//! Most of it is glue over well known crates (warp, tower, the AWS SDK, sqlx).
//! The part with real coordination logic is the health-check aggregation and the
//! graceful-shutdown coordinator in [`web::health`] and [`web::shutdown`], both
//! of which fan out independent probes under one overall deadline.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kit::web::app::{App, ServerConfig};
//! use kit::web::health::health_check_fn;
//! use kit::web::router::Router;
//! use warp::Filter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     kit::logging::setup_tracing();
//!
//!     let router = Router::new().get(warp::path!("hello").map(|| "world"));
//!
//!     App::new(router)
//!         .with_health_check(health_check_fn("always", || async { Ok(()) }))
//!         .with_health_endpoint(Some(std::time::Duration::from_secs(2)))
//!         .serve(ServerConfig::from_env()?)
//!         .await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`logging`] - Tracing setup with optional OpenTelemetry export
//! - [`web`] - Router, middleware, responders, health checks, graceful shutdown
//! - [`aws`] - API Gateway shim, DynamoDB and SSM adapters (partly feature-gated)
//! - [`mysql`] - MySQL pool management (feature-gated)
//! - [`timestamp`] - Nullable UTC timestamp value type
//! - [`cryptorand`] - Random number generators seeded by the operating system
//! - [`check`] - Validation helpers and the `Check` derive
//! - [`tools`] - Signals, stopwatch, concurrent fan-out
//!
//! ## Feature Flags
//!
//! - `pretty_logs` - Colorful console output for development
//! - `open_telemetry` - OpenTelemetry tracing export
//! - `aws_dynamodb` - DynamoDB table adapter
//! - `aws_ssm` - SSM parameter store loader
//! - `aws_lambda` - Run an app behind API Gateway on AWS Lambda
//! - `mysql` - MySQL connection management via sqlx
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `APP_NAME` | Application identifier | `KIT` |
//! | `APP_VERSION` | Version string | `DEVELOPMENT-SNAPSHOT-VERSION` |
//! | `CLUSTER_ID` | Cluster/service identifier | `local` |
//! | `BIND_ADDRESS` | HTTP server bind address | `0.0.0.0:3000` |
//! | `SHUTDOWN_TIMEOUT_SECS` | Overall deadline for graceful shutdown | `30` |
//! | `SUPPRESS_ERRORS` | Hide error messages from JSON error bodies | `false` |
//! | `RUST_LOG` | Console log filter | `info` |

// Lets `#[derive(Check)]` refer to `::kit` from within this crate.
extern crate self as kit;

use std::env;
use std::sync::LazyLock;

/// Logging and tracing infrastructure.
pub mod logging;

/// General-purpose utilities and helpers.
pub mod tools;

/// HTTP routing, middleware, responders, health checks and graceful shutdown.
pub mod web;

/// AWS integrations.
pub mod aws;

/// MySQL connection management.
#[cfg(feature = "mysql")]
pub mod mysql;

pub mod check;
pub mod cryptorand;
pub mod timestamp;

pub use kit_macro::Check;

/// Application name from `APP_NAME` environment variable.
///
/// Used in logging, tracing spans, and service identification.
/// Defaults to `"KIT"` if not set.
pub static APP_NAME: LazyLock<String> =
    LazyLock::new(|| env::var("APP_NAME").unwrap_or_else(|_| "KIT".to_string()));

/// Application version from `APP_VERSION` environment variable.
pub static APP_VERSION: LazyLock<String> = LazyLock::new(|| {
    env::var("APP_VERSION").unwrap_or_else(|_| "DEVELOPMENT-SNAPSHOT-VERSION".to_string())
});

/// Cluster identifier from `CLUSTER_ID` environment variable. Defaults to `"local"`.
pub static CLUSTER_ID: LazyLock<String> =
    LazyLock::new(|| env::var("CLUSTER_ID").unwrap_or_else(|_| "local".to_string()));
