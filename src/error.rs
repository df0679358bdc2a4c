use thiserror::Error;

/// Run-level configuration errors. Any of these aborts a batch before a
/// single job is dispatched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("credential pool cannot be empty")]
    EmptyKeyPool,

    #[error(
        "{jobs} jobs exceed the daily capacity of {capacity} requests across all keys; \
         reduce the number of files or add more API keys"
    )]
    DailyLimitExceeded { jobs: usize, capacity: u64 },

    #[error("invalid setting `{name}`: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Terminal failure recorded for a single job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Non-transient failure. Displays the analyzer's message verbatim.
    #[error("{message}")]
    Fatal { message: String },

    /// A transient failure that persisted through every allowed attempt.
    #[error("failed after {attempts} attempts: {message}")]
    ExhaustedRetries { attempts: u32, message: String },
}

impl JobError {
    /// The analyzer message behind this failure, without the attempt note.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Fatal { message } | Self::ExhaustedRetries { message, .. } => message,
        }
    }
}

/// Error raised by an [`Analyzer`](crate::analyzer::Analyzer). Only the
/// message matters to the batch core, which classifies it textually.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AnalyzeError {
    message: String,
}

impl AnalyzeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<reqwest::Error> for AnalyzeError {
    fn from(err: reqwest::Error) -> Self {
        // The top-level message rarely names the cause.
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = std::error::Error::source(cause);
        }
        if err.is_timeout() {
            Self::new(format!("request timed out: {message}"))
        } else if err.is_connect() {
            Self::new(format!("connection error: {message}"))
        } else {
            Self::new(message)
        }
    }
}

impl From<serde_json::Error> for AnalyzeError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid JSON in response: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_keeps_message_verbatim() {
        let err = JobError::Fatal {
            message: "Invalid file format".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid file format");
        assert_eq!(err.message(), "Invalid file format");
    }

    #[test]
    fn test_exhausted_notes_attempts() {
        let err = JobError::ExhaustedRetries {
            attempts: 3,
            message: "503 unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "failed after 3 attempts: 503 unavailable");
        assert_eq!(err.message(), "503 unavailable");
    }

    #[test]
    fn test_daily_limit_message() {
        let err = BatchError::DailyLimitExceeded {
            jobs: 1000,
            capacity: 50,
        };
        let text = err.to_string();
        assert!(text.contains("1000 jobs"));
        assert!(text.contains("capacity of 50"));
    }
}
