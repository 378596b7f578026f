//! Common utilities used across the toolkit.

pub mod fan_out;
pub mod system;
pub mod watch;

/// Extracts a readable message from a panic payload.
///
/// Panics raised via `panic!("...")` carry either a `&'static str` or a
/// `String`. Anything else is reported generically.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
