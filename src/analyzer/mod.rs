use crate::batch::Document;
use crate::config::ApiConfig;
use crate::error::AnalyzeError;
use crate::keys::ApiKey;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

pub mod gemini;
pub mod mock;

/// Turns one document into a structured result using one credential.
///
/// Implementations block the calling thread; the batch runner calls them
/// from dedicated blocking threads, never from async tasks.
pub trait Analyzer: Send + Sync {
    /// Analyze `document` with `key`.
    ///
    /// # Errors
    ///
    /// Returns an [`AnalyzeError`] whose message is classified by
    /// [`is_retryable`](crate::retry::is_retryable) to decide whether the
    /// job gets another attempt.
    fn analyze(&self, document: &Document, key: &ApiKey) -> Result<Value, AnalyzeError>;
}

impl<F> Analyzer for F
where
    F: Fn(&Document, &ApiKey) -> Result<Value, AnalyzeError> + Send + Sync,
{
    fn analyze(&self, document: &Document, key: &ApiKey) -> Result<Value, AnalyzeError> {
        self(document, key)
    }
}

/// Wrap a closure as a shared analyzer.
pub fn analyzer_fn<F>(f: F) -> Arc<dyn Analyzer>
where
    F: Fn(&Document, &ApiKey) -> Result<Value, AnalyzeError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Creates an analyzer for the configured provider
///
/// # Errors
///
/// Returns an error if:
/// - Unknown provider type specified in config
/// - Provider initialization fails
pub fn create_analyzer(config: &ApiConfig) -> Result<Arc<dyn Analyzer>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(gemini::GeminiAnalyzer::new(config)?)),
        "mock" => Ok(Arc::new(mock::MockAnalyzer::new())),
        other => Err(anyhow::anyhow!("unknown API provider: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_mock_analyzer() {
        let config = ApiConfig {
            provider: "mock".to_string(),
            ..ApiConfig::default()
        };
        let analyzer = create_analyzer(&config).unwrap();
        let doc = Document::new("a.pdf", b"%PDF".to_vec());
        let value = analyzer.analyze(&doc, &ApiKey::new("k")).unwrap();
        assert_eq!(value["file"], json!("a.pdf"));
    }

    #[test]
    fn test_create_gemini_analyzer() {
        assert!(create_analyzer(&ApiConfig::default()).is_ok());
    }

    #[test]
    fn test_create_unknown_provider() {
        let config = ApiConfig {
            provider: "openai".to_string(),
            ..ApiConfig::default()
        };
        let err = create_analyzer(&config).err().unwrap();
        assert_eq!(err.to_string(), "unknown API provider: openai");
    }

    #[test]
    fn test_closure_analyzer() {
        let analyzer = analyzer_fn(|doc: &Document, key: &ApiKey| {
            Ok(json!({"name": doc.name, "key": key.expose()}))
        });
        let value = analyzer
            .analyze(&Document::new("x.pdf", Vec::new()), &ApiKey::new("secret"))
            .unwrap();
        assert_eq!(value, json!({"name": "x.pdf", "key": "secret"}));
    }
}
