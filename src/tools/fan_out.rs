//! Runs a set of named futures concurrently under one overall deadline.
//!
//! This is the engine behind health-check aggregation and graceful shutdown:
//! every probe is spawned onto its own task, a panicking probe is reported as a
//! failed outcome instead of tearing down the caller, and once the deadline
//! passes all unfinished probes are aborted and reported as pending.

use crate::tools::panic_message;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinSet;

/// The output of a probe, or the panic message if it panicked.
pub type Outcome<T> = Result<T, String>;

/// What [`fan_out`] observed before everything finished or the deadline passed.
#[derive(Debug)]
pub struct FanOutReport<T> {
    /// Probes which finished, in completion order.
    pub completed: Vec<(String, Outcome<T>)>,
    /// Probes which were still running when the deadline passed, in submission order.
    pub pending: Vec<String>,
}

impl<T> FanOutReport<T> {
    /// Determines if at least one probe missed the deadline.
    pub fn timed_out(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Spawns all probes and collects their outcomes.
///
/// A deadline of `None` or zero waits for every probe. Must be called from
/// within a Tokio runtime.
pub async fn fan_out<T, F>(probes: Vec<(String, F)>, deadline: Option<Duration>) -> FanOutReport<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut names: Vec<Option<String>> = Vec::with_capacity(probes.len());
    let mut tasks = JoinSet::new();

    for (index, (name, probe)) in probes.into_iter().enumerate() {
        names.push(Some(name));
        tasks.spawn(async move {
            let outcome = AssertUnwindSafe(probe)
                .catch_unwind()
                .await
                .map_err(|payload| panic_message(payload.as_ref()));
            (index, outcome)
        });
    }

    let deadline = deadline.filter(|deadline| !deadline.is_zero());
    let deadline_reached = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline_reached);

    let mut completed = Vec::with_capacity(names.len());
    loop {
        tokio::select! {
            biased;

            joined = tasks.join_next() => match joined {
                Some(Ok((index, outcome))) => {
                    if let Some(name) = names.get_mut(index).and_then(Option::take) {
                        completed.push((name, outcome));
                    }
                }
                Some(Err(err)) => tracing::warn!("Failed to join a fan-out task: {}", err),
                None => break,
            },
            _ = &mut deadline_reached => {
                tasks.abort_all();
                break;
            }
        }
    }

    FanOutReport {
        completed,
        pending: names.into_iter().flatten().collect(),
    }
}
