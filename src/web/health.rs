//! Health-check aggregation.
//!
//! All registered [`HealthChecker`]s run concurrently. The aggregate is healthy
//! only if every checker reported success before the deadline. Checkers which
//! fail, panic or run out of time are recorded as `false`.

use crate::tools::fan_out::fan_out;
use crate::web::respond::DEFAULT_RESPONDER;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use warp::Filter;
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::Response;

/// A named probe reporting whether a dependency is usable.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &str;

    async fn health_check(&self) -> anyhow::Result<()>;
}

struct HealthCheckFn<F> {
    name: String,
    check: F,
}

#[async_trait]
impl<F, Fut> HealthChecker for HealthCheckFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        (self.check)().await
    }
}

/// Creates a named checker from an async closure.
pub fn health_check_fn<F, Fut>(name: impl Into<String>, check: F) -> Arc<dyn HealthChecker>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(HealthCheckFn {
        name: name.into(),
        check,
    })
}

/// The aggregated outcome of one health check run.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub healthy: bool,
    pub code: u16,
    pub time: DateTime<Utc>,
    pub results: BTreeMap<String, bool>,
}

impl HealthReport {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Runs all checkers concurrently and aggregates their results.
///
/// A `timeout` of `None` or zero waits for every checker.
pub async fn check_all(checkers: &[Arc<dyn HealthChecker>], timeout: Option<Duration>) -> HealthReport {
    let probes: Vec<(String, BoxFuture<'static, anyhow::Result<()>>)> = checkers
        .iter()
        .map(|checker| {
            let checker = checker.clone();
            let name = checker.name().to_string();
            let probe: BoxFuture<'static, anyhow::Result<()>> =
                Box::pin(async move { checker.health_check().await });
            (name, probe)
        })
        .collect();

    let report = fan_out(probes, timeout).await;

    let mut healthy = true;
    let mut results = BTreeMap::new();
    for (name, outcome) in report.completed {
        let passed = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                tracing::error!(checker = %name, "health check failed: {:#}", err);
                false
            }
            Err(panic) => {
                tracing::error!(checker = %name, "health check panicked: {}", panic);
                false
            }
        };
        healthy &= passed;
        results.insert(name, passed);
    }
    for name in report.pending {
        tracing::error!(checker = %name, "health check did not finish in time");
        healthy = false;
        results.insert(name, false);
    }

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    HealthReport {
        healthy,
        code: code.as_u16(),
        time: Utc::now(),
        results,
    }
}

/// A `GET /health` route answering 200 when healthy and 503 otherwise.
pub fn health_route(
    checkers: Vec<Arc<dyn HealthChecker>>,
    timeout: Option<Duration>,
) -> BoxedFilter<(Response,)> {
    let checkers = Arc::new(checkers);

    warp::path!("health")
        .and(warp::get())
        .then(move || {
            let checkers = checkers.clone();
            async move {
                let report = check_all(&checkers, timeout).await;
                DEFAULT_RESPONDER.success(report.status(), &report)
            }
        })
        .boxed()
}
