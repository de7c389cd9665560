use crate::models::{ApiKey, CorrectionResult, StyleTag, StyledParagraph};
use crate::utils::strip_code_fence;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};

/// What happened to one chunk's correction call.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Corrected(CorrectionResult),
    TransportFailed(String),
    ParseFailed(String),
    /// The credential was rejected. Fatal for the whole run.
    AuthFailed(String),
}

#[async_trait]
pub trait CorrectionService: Send + Sync {
    /// Sends one chunk for correction. Never retries.
    async fn correct(&self, chunk_text: &str, instructions: &str, key: &ApiKey) -> ChunkOutcome;
}

/// Chat-completions client for an OpenAI-compatible endpoint.
pub struct LLMClient {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

impl LLMClient {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>) -> Self {
        LLMClient {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            model: model.into(),
        }
    }

    fn request_body(&self, chunk_text: &str, instructions: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "developer", "content": instructions },
                { "role": "user", "content": chunk_text },
            ],
            "temperature": 0.0,
            "presence_penalty": 0.0,
            "frequency_penalty": 0.0,
            "response_format": { "type": "json_object" },
        })
    }
}

#[async_trait]
impl CorrectionService for LLMClient {
    async fn correct(&self, chunk_text: &str, instructions: &str, key: &ApiKey) -> ChunkOutcome {
        let response = match self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .bearer_auth(key.expose())
            .json(&self.request_body(chunk_text, instructions))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return ChunkOutcome::TransportFailed(err.to_string()),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return ChunkOutcome::TransportFailed(err.to_string()),
        };

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return ChunkOutcome::AuthFailed(format!("HTTP {}", status.as_u16()));
        }
        if !status.is_success() {
            return ChunkOutcome::TransportFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                excerpt(&body)
            ));
        }

        match parse_completion(&body) {
            Ok(paragraphs) => ChunkOutcome::Corrected(paragraphs),
            Err(reason) => ChunkOutcome::ParseFailed(reason),
        }
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Pulls the assistant message out of a chat-completions body and parses it.
pub fn parse_completion(body: &str) -> Result<CorrectionResult, String> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| format!("response body is not JSON: {e}"))?;
    let content = value["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| "missing choices[0].message.content".to_string())?;
    parse_paragraphs(content)
}

/// Parses `{"paragraphs": [{"text": ..., "style": ...}, ...]}`.
///
/// Other top-level keys are ignored. Paragraphs with blank text are skipped.
pub fn parse_paragraphs(content: &str) -> Result<CorrectionResult, String> {
    let value: Value = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| format!("model output is not valid JSON: {e}"))?;

    let items = value
        .get("paragraphs")
        .and_then(Value::as_array)
        .ok_or_else(|| "model output has no top-level \"paragraphs\" array".to_string())?;

    let paragraphs: CorrectionResult = items
        .iter()
        .filter_map(|item| {
            let (text, style) = match item {
                Value::String(text) => (text.as_str(), StyleTag::Normal),
                Value::Object(fields) => (
                    fields.get("text").and_then(Value::as_str).unwrap_or(""),
                    fields
                        .get("style")
                        .and_then(Value::as_str)
                        .map(StyleTag::parse)
                        .unwrap_or_default(),
                ),
                _ => return None,
            };
            let text = text.trim();
            (!text.is_empty()).then(|| StyledParagraph::new(text, style))
        })
        .collect();

    if paragraphs.is_empty() {
        return Err("model output contained no paragraphs".to_string());
    }
    Ok(paragraphs)
}
