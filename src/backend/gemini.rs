//! Direct Gemini `generateContent` REST client.
//!
//! Sends the refinement prompt with `response_mime_type: application/json`
//! and pulls the reply out of `candidates[0].content.parts[0].text`.

use super::ReasoningService;
use crate::error::{RefinementError, TableExtractError};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Default Gemini endpoint used for table refinement.
pub const DEFAULT_GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent";

/// Reasoning service speaking the Gemini REST protocol.
#[derive(Debug, Clone)]
pub struct GeminiReasoningService {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    temperature: f32,
    timeout_secs: u64,
}

impl GeminiReasoningService {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, TableExtractError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TableExtractError::ProviderNotConfigured {
                provider: "gemini".into(),
                hint: e.to_string(),
            })?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            temperature: 0.0,
            timeout_secs,
        })
    }

    /// Build from `GEMINI_API_KEY`, failing when the key is absent.
    pub fn from_env(endpoint: Option<&str>, timeout_secs: u64) -> Result<Self, TableExtractError> {
        let key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| TableExtractError::ProviderNotConfigured {
                provider: "gemini".into(),
                hint: "Set GEMINI_API_KEY to use the Gemini reasoning service.".into(),
            })?;
        Self::new(
            endpoint.unwrap_or(DEFAULT_GEMINI_ENDPOINT),
            Some(key),
            timeout_secs,
        )
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }
}

#[async_trait]
impl ReasoningService for GeminiReasoningService {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, RefinementError> {
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "response_mime_type": "application/json",
                "temperature": self.temperature,
            },
        });

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RefinementError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                RefinementError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RefinementError::Request(e.to_string()))?;
        debug!("Gemini replied {} ({} bytes)", status, text.len());

        if !status.is_success() {
            return Err(RefinementError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        extract_candidate_text(&text)
    }
}

/// Pull `candidates[0].content.parts[0].text` out of a `generateContent` body.
pub fn extract_candidate_text(body: &str) -> Result<String, RefinementError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| RefinementError::InvalidReply(e.to_string()))?;
    value
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(|t| t.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            RefinementError::MissingContent("candidates[0].content.parts[0].text".into())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_candidate_text() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"{\"cells\":[]}"}]}}]}"#;
        assert_eq!(extract_candidate_text(body).unwrap(), r#"{"cells":[]}"#);
    }

    #[test]
    fn non_json_body_is_invalid_reply() {
        assert!(matches!(
            extract_candidate_text("<html>oops</html>"),
            Err(RefinementError::InvalidReply(_))
        ));
    }

    #[test]
    fn missing_path_is_missing_content() {
        assert!(matches!(
            extract_candidate_text(r#"{"candidates":[]}"#),
            Err(RefinementError::MissingContent(_))
        ));
        assert!(matches!(
            extract_candidate_text(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#),
            Err(RefinementError::MissingContent(_))
        ));
    }

    #[test]
    fn empty_key_is_ignored() {
        let svc =
            GeminiReasoningService::new("http://localhost:1/x", Some(String::new()), 5).unwrap();
        assert!(svc.api_key.is_none());
    }
}
