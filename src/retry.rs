//! Textual classification of analyzer failures into transient and fatal.
//!
//! The analyzer only hands back a message, so the verdict is a heuristic: a
//! missed pattern ends a recoverable job early, an over-broad one spends a
//! retry wave on a job that was never going to succeed.

/// Case-insensitive fragments that mark a failure as transient.
pub const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "rate limit",
    "429",
    "500",
    "503",
    "server error",
    "network",
    "connection",
    "overloaded",
    "temporarily unavailable",
    "try again later",
    "unavailable",
];

/// Returns true when `error_message` looks like a transient failure.
#[must_use]
pub fn is_retryable(error_message: &str) -> bool {
    let lowered = error_message.to_lowercase();
    RETRYABLE_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}
