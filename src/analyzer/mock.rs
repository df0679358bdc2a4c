use crate::analyzer::Analyzer;
use crate::batch::Document;
use crate::error::AnalyzeError;
use crate::keys::ApiKey;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Offline analyzer for dry runs and tests.
///
/// Names containing `fail-fatal` fail permanently, names containing
/// `fail-retry` fail with a transient error on every attempt.
#[derive(Debug, Default)]
pub struct MockAnalyzer {
    calls: AtomicUsize,
}

impl MockAnalyzer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of analyze calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Analyzer for MockAnalyzer {
    fn analyze(&self, document: &Document, key: &ApiKey) -> Result<Value, AnalyzeError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if document.name.contains("fail-fatal") {
            return Err(AnalyzeError::new("invalid file format"));
        }
        if document.name.contains("fail-retry") {
            return Err(AnalyzeError::new("503 service unavailable"));
        }
        Ok(json!({
            "file": document.name,
            "bytes": document.content.len(),
            "key": key.redacted(),
        }))
    }
}
