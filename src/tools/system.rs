//! Process signal handling.

use tokio::signal::unix::{SignalKind, signal};

/// Waits until the process receives SIGINT, SIGTERM or SIGHUP.
///
/// Returns the name of the signal which fired. If none of the handlers can be
/// installed, this falls back to waiting for CTRL-C.
pub async fn await_termination_signal() -> &'static str {
    let mut sig_term = signal(SignalKind::terminate()).ok();
    let mut sig_int = signal(SignalKind::interrupt()).ok();
    let mut sig_hup = signal(SignalKind::hangup()).ok();

    tokio::select! {
        Some(_) = async { sig_int.as_mut()?.recv().await } => "SIGINT",
        Some(_) = async { sig_term.as_mut()?.recv().await } => "SIGTERM",
        Some(_) = async { sig_hup.as_mut()?.recv().await } => "SIGHUP",
        else => {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for CTRL-C: {}", err);
            }
            "SIGINT"
        }
    }
}
