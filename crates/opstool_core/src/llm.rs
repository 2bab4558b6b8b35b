use std::env;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::config::ToolConfig;
use crate::error::ServiceError;

#[derive(Debug, Clone)]
pub struct SummaryClientConfig {
    pub api_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub user_agent: String,
}

impl SummaryClientConfig {
    pub fn from_config(config: &ToolConfig) -> Result<Self, ServiceError> {
        let api_key = env::var("LLM_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ServiceError::Unavailable {
                reason: "LLM_API_KEY is not set".to_string(),
            })?;
        Ok(Self {
            api_url: config.llm_api_url(),
            model: config.llm_model(),
            api_key,
            timeout_ms: 60_000,
            user_agent: config.user_agent(),
        })
    }
}

/// Thin client for a generative-language API. Treated as a black box:
/// failures surface as `ServiceError` and no retry policy is applied
/// here.
pub struct SummaryClient {
    client: Client,
    config: SummaryClientConfig,
}

impl SummaryClient {
    pub fn new(config: SummaryClientConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|error| ServiceError::Unavailable {
                reason: error.to_string(),
            })?;
        Ok(Self { client, config })
    }

    pub fn summarize(&self, text: &str) -> Result<String, ServiceError> {
        let prompt = format!(
            "Provide a concise, one-paragraph summary of the following text:\n\n---\n{text}\n---"
        );
        self.generate(&prompt)
    }

    pub fn generate(&self, prompt: &str) -> Result<String, ServiceError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        );
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.config.api_key.clone())
            .header("User-Agent", self.config.user_agent.clone())
            .json(&body)
            .send()
            .map_err(|error| ServiceError::Unavailable {
                reason: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Unavailable {
                reason: format!("HTTP {status}"),
            });
        }
        let payload: Value = response.json().map_err(|error| ServiceError::Unavailable {
            reason: error.to_string(),
        })?;
        extract_generated_text(&payload).ok_or(ServiceError::Empty)
    }
}

pub(crate) fn extract_generated_text(payload: &Value) -> Option<String> {
    let parts = payload
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let mut output = String::new();
    for part in parts {
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            output.push_str(text);
        }
    }
    if output.trim().is_empty() {
        None
    } else {
        Some(output)
    }
}
