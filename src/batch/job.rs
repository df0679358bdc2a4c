use crate::error::JobError;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::Arc;

/// One input file: display name plus raw content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub content: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// A document scheduled for a given attempt.
#[derive(Debug, Clone)]
pub struct Job {
    pub index: usize,
    pub document: Arc<Document>,
    /// 1-based.
    pub attempt: u32,
    pub max_attempts: u32,
}

impl Job {
    #[must_use]
    pub fn new(index: usize, document: Document, max_attempts: u32) -> Self {
        Self {
            index,
            document: Arc::new(document),
            attempt: 1,
            max_attempts,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.document.name
    }

    #[must_use]
    pub const fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// The same job scheduled for its next attempt.
    #[must_use]
    pub fn next_attempt(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        index: usize,
        name: String,
        payload: Value,
    },
    Failure {
        index: usize,
        name: String,
        error_message: String,
        retryable: bool,
    },
}

impl Outcome {
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Success { index, .. } | Self::Failure { index, .. } => *index,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Terminal value of a job in the result array.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Success(Value),
    Failure(JobError),
}

/// One entry of the order-preserving result array.
///
/// Serializes with either a `result` or an `error` field.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub index: usize,
    pub name: String,
    pub attempts: u32,
    pub settled: Settled,
}

impl JobReport {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.settled, Settled::Success(_))
    }

    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        match &self.settled {
            Settled::Success(payload) => Some(payload),
            Settled::Failure(_) => None,
        }
    }

    #[must_use]
    pub const fn error(&self) -> Option<&JobError> {
        match &self.settled {
            Settled::Success(_) => None,
            Settled::Failure(err) => Some(err),
        }
    }
}

impl Serialize for JobReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("index", &self.index)?;
        map.serialize_entry("name", &self.name)?;
        map.serialize_entry("attempts", &self.attempts)?;
        match &self.settled {
            Settled::Success(payload) => map.serialize_entry("result", payload)?,
            Settled::Failure(err) => map.serialize_entry("error", &err.to_string())?,
        }
        map.end()
    }
}

/// Fixed-length, index-addressed storage for terminal job values.
#[derive(Debug)]
pub struct ResultSlots {
    slots: Vec<Option<JobReport>>,
    succeeded: usize,
    failed: usize,
}

impl ResultSlots {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
            succeeded: 0,
            failed: 0,
        }
    }

    /// Store the terminal value for `job`, replacing any earlier one.
    pub fn settle(&mut self, job: &Job, settled: Settled) {
        let report = JobReport {
            index: job.index,
            name: job.name().to_string(),
            attempts: job.attempt,
            settled,
        };
        if let Some(previous) = self.slots[job.index].replace(report.clone()) {
            self.uncount(&previous);
        }
        self.count(&report);
    }

    fn count(&mut self, report: &JobReport) {
        if report.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    fn uncount(&mut self, report: &JobReport) {
        if report.is_success() {
            self.succeeded -= 1;
        } else {
            self.failed -= 1;
        }
    }

    #[must_use]
    pub fn is_settled(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(Option::is_some)
    }

    #[must_use]
    pub const fn succeeded(&self) -> usize {
        self.succeeded
    }

    #[must_use]
    pub const fn failed(&self) -> usize {
        self.failed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Converts into the final array. Slots never settled become fatal
    /// failures so the output always has one entry per input.
    #[must_use]
    pub fn into_reports(self, names: &[String]) -> Vec<JobReport> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| JobReport {
                    index,
                    name: names.get(index).cloned().unwrap_or_default(),
                    attempts: 0,
                    settled: Settled::Failure(JobError::Fatal {
                        message: "job was never settled".to_string(),
                    }),
                })
            })
            .collect()
    }
}
