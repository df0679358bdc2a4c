// This module is only compiled when running tests
#![cfg(any(test, feature = "testing"))]

use crate::analyzer::Analyzer;
use crate::batch::{Document, JobSettled, ProgressSink, WaveStarted};
use crate::error::AnalyzeError;
use crate::keys::ApiKey;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sink that keeps every event for later inspection.
#[derive(Default, Debug)]
pub struct RecordingSink {
    settled: Mutex<Vec<JobSettled>>,
    waves: Mutex<Vec<WaveStarted>>,
}

impl RecordingSink {
    /// # Panics
    ///
    /// Will panic if the mutex is poisoned
    #[must_use]
    pub fn settled(&self) -> Vec<JobSettled> {
        self.settled.lock().unwrap().clone()
    }

    /// # Panics
    ///
    /// Will panic if the mutex is poisoned
    #[must_use]
    pub fn waves(&self) -> Vec<WaveStarted> {
        self.waves.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn on_wave_started(&self, event: &WaveStarted) {
        self.waves.lock().unwrap().push(*event);
    }

    fn on_job_settled(&self, event: &JobSettled) {
        self.settled.lock().unwrap().push(event.clone());
    }
}

/// Analyzer replaying a per-document script of results.
///
/// Each call pops the next scripted step for the document. Documents without
/// a script, or whose script ran out, succeed with `{"name": <name>}`.
#[derive(Default, Debug)]
pub struct ScriptedAnalyzer {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, String>>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Will panic if the mutex is poisoned
    #[must_use]
    pub fn script<I>(self, name: &str, steps: I) -> Self
    where
        I: IntoIterator<Item = Result<Value, String>>,
    {
        self.scripts
            .lock()
            .unwrap()
            .insert(name.to_string(), steps.into_iter().collect());
        self
    }

    /// Sleep for `delay` before answering for `name`.
    #[must_use]
    pub fn delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    /// Every call made so far as `(document, key)` pairs.
    ///
    /// # Panics
    ///
    /// Will panic if the mutex is poisoned
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// # Panics
    ///
    /// Will panic if the mutex is poisoned
    #[must_use]
    pub fn calls_for(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(n, _)| n == name).count()
    }

    #[must_use]
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Analyzer for ScriptedAnalyzer {
    fn analyze(&self, document: &Document, key: &ApiKey) -> Result<Value, AnalyzeError> {
        self.calls
            .lock()
            .unwrap()
            .push((document.name.clone(), key.expose().to_string()));
        if let Some(delay) = self.delays.get(&document.name) {
            std::thread::sleep(*delay);
        }
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&document.name)
            .and_then(VecDeque::pop_front);
        match step {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(AnalyzeError::new(message)),
            None => Ok(json!({ "name": document.name })),
        }
    }
}

/// Documents with the given names and their names as content.
#[must_use]
pub fn documents(names: &[&str]) -> Vec<Document> {
    names
        .iter()
        .map(|name| Document::new(*name, name.as_bytes().to_vec()))
        .collect()
}
