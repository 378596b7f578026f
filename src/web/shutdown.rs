//! Graceful-shutdown coordination.
//!
//! Once a trigger fires (an OS signal, or the HTTP server stopping on its own)
//! every registered [`Shutdowner`] runs concurrently under a single overall
//! deadline.

use crate::tools::fan_out::fan_out;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A named resource which needs to be released on shutdown.
#[async_trait]
pub trait Shutdowner: Send + Sync {
    fn name(&self) -> &str;

    async fn shutdown(&self) -> anyhow::Result<()>;
}

struct ShutdownFn<F> {
    name: String,
    shutdown: F,
}

#[async_trait]
impl<F, Fut> Shutdowner for ShutdownFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        (self.shutdown)().await
    }
}

/// Creates a named shutdowner from an async closure.
pub fn shutdown_fn<F, Fut>(name: impl Into<String>, shutdown: F) -> Arc<dyn Shutdowner>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(ShutdownFn {
        name: name.into(),
        shutdown,
    })
}

/// What initiated the shutdown.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// The process received the named signal.
    Signal(&'static str),
    /// The server stopped without being asked to.
    Stopped,
}

impl Display for Trigger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Signal(signal) => write!(f, "signal {}", signal),
            Trigger::Stopped => write!(f, "server stopped"),
        }
    }
}

/// Some shutdowners were still running when the deadline passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownTimedOut {
    pub timeout: Duration,
    pub pending: Vec<String>,
}

impl Display for ShutdownTimedOut {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "shutdown did not complete within {:?}, still pending: {}",
            self.timeout,
            self.pending.join(", ")
        )
    }
}

impl std::error::Error for ShutdownTimedOut {}

/// At least one shutdowner reported an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownFailed {
    /// Names and messages of the failed shutdowners.
    pub failures: Vec<(String, String)>,
}

impl Display for ShutdownFailed {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} shutdowner(s) failed: ", self.failures.len())?;
        for (index, (name, message)) in self.failures.iter().enumerate() {
            if index > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", name, message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownFailed {}

/// Runs all shutdowners concurrently and waits at most `timeout` for them.
///
/// Fails with [`ShutdownTimedOut`] if the deadline passed and otherwise with
/// [`ShutdownFailed`] if any shutdowner failed. A zero timeout waits
/// indefinitely.
pub async fn shutdown_all(timeout: Duration, shutdowners: &[Arc<dyn Shutdowner>]) -> anyhow::Result<()> {
    let probes: Vec<(String, BoxFuture<'static, anyhow::Result<()>>)> = shutdowners
        .iter()
        .map(|shutdowner| {
            let shutdowner = shutdowner.clone();
            let name = shutdowner.name().to_string();
            let probe: BoxFuture<'static, anyhow::Result<()>> =
                Box::pin(async move { shutdowner.shutdown().await });
            (name, probe)
        })
        .collect();

    let report = fan_out(probes, Some(timeout)).await;

    let mut failures = Vec::new();
    for (name, outcome) in report.completed {
        match outcome {
            Ok(Ok(())) => tracing::debug!(shutdowner = %name, "shutdown completed"),
            Ok(Err(err)) => {
                tracing::error!(shutdowner = %name, "shutdown failed: {:#}", err);
                failures.push((name, format!("{:#}", err)));
            }
            Err(panic) => {
                tracing::error!(shutdowner = %name, "shutdown panicked: {}", panic);
                failures.push((name, format!("panic: {}", panic)));
            }
        }
    }

    if !report.pending.is_empty() {
        tracing::error!(
            "Shutdown did not complete within {:?}; pending: {}",
            timeout,
            report.pending.join(", ")
        );
        return Err(ShutdownTimedOut {
            timeout,
            pending: report.pending,
        }
        .into());
    }

    if !failures.is_empty() {
        return Err(ShutdownFailed { failures }.into());
    }

    Ok(())
}

/// Waits for `trigger`, logs it and then runs [`shutdown_all`].
pub async fn on_trigger<T>(
    trigger: T,
    timeout: Duration,
    shutdowners: &[Arc<dyn Shutdowner>],
) -> anyhow::Result<Trigger>
where
    T: Future<Output = Trigger>,
{
    let fired = trigger.await;
    match &fired {
        Trigger::Signal(signal) => tracing::info!(signal = *signal, "signal received, shutting down"),
        Trigger::Stopped => tracing::info!("stop signal received, shutting down"),
    }

    shutdown_all(timeout, shutdowners).await?;
    tracing::info!("Shutdown completed.");

    Ok(fired)
}
