use crate::analyzer::Analyzer;
use crate::batch::Document;
use crate::config::ApiConfig;
use crate::error::AnalyzeError;
use crate::keys::ApiKey;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

const MAX_ERROR_BODY: usize = 500;

/// Document analysis through the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiAnalyzer {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    system_instruction: String,
    prompt: String,
    response_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

fn mime_type(name: &str) -> &'static str {
    let lowered = name.to_ascii_lowercase();
    if lowered.ends_with(".txt") {
        "text/plain"
    } else if lowered.ends_with(".png") {
        "image/png"
    } else if lowered.ends_with(".jpg") || lowered.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "application/pdf"
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

impl GeminiAnalyzer {
    /// Creates a new Gemini analyzer with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .or_else(|| ApiConfig::default_base_url("gemini"))
            .unwrap_or_default();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            system_instruction: config.system_instruction.clone(),
            prompt: config.prompt.clone(),
            response_schema: config.response_schema.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn request_body(&self, document: &Document) -> Value {
        let mut generation_config = json!({
            "responseMimeType": "application/json",
            "temperature": self.temperature,
        });
        if let Some(schema) = &self.response_schema {
            generation_config["responseSchema"] = schema.clone();
        }
        json!({
            "systemInstruction": { "parts": [{ "text": self.system_instruction }] },
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": mime_type(&document.name),
                            "data": BASE64_STANDARD.encode(&document.content),
                        }
                    },
                    { "text": self.prompt },
                ]
            }],
            "generationConfig": generation_config,
        })
    }

    /// Send one `generateContent` request and parse the model's JSON answer.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures, non-success statuses (message
    /// `HTTP <status>: <body>`), empty answers and answers that are not JSON.
    pub async fn generate(&self, document: &Document, key: &ApiKey) -> Result<Value, AnalyzeError> {
        debug!("Sending {} to {} with key {}", document.name, self.model, key);
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", key.expose())
            .json(&self.request_body(document))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzeError::new(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(body.trim(), MAX_ERROR_BODY)
            )));
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AnalyzeError::new("API response was empty"));
        }
        let value = serde_json::from_str(&text)?;
        info!("Successfully processed {}", document.name);
        Ok(value)
    }
}

impl Analyzer for GeminiAnalyzer {
    fn analyze(&self, document: &Document, key: &ApiKey) -> Result<Value, AnalyzeError> {
        let handle = Handle::try_current()
            .map_err(|e| AnalyzeError::new(format!("no async runtime available: {e}")))?;
        handle.block_on(self.generate(document, key))
    }
}
