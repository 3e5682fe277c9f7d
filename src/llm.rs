use crate::error::{EvalError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// One request to the text-generation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System instructions (rules, schema, examples, response format)
    pub system: String,
    /// The user's natural-language question
    pub user: String,
    pub max_tokens: u32,
    /// Number of independent completions to ask for
    pub n: usize,
    #[serde(default)]
    pub temperature: Option<f64>,
}

/// Anything that can turn a prompt into free-text completions.
///
/// Implementations return the completions in the order the service
/// produced them; the caller decides what to do when fewer than `n` come
/// back.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>>;
}

/// OpenAI-compatible chat completions client
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvalError::Llm(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user}
            ],
            "n": request.n,
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }

        // Reasoning models only accept max_completion_tokens
        if self.model.starts_with("gpt-5") || self.model.starts_with("o1") || self.model.starts_with("o3") {
            body["max_completion_tokens"] = serde_json::json!(request.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
        }

        body
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>> {
        let body = self.request_body(request);
        debug!("Requesting {} completion(s) from {}", request.n, self.model);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EvalError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EvalError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EvalError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        extract_completions(&response_json)
    }
}

/// Pulls the message contents out of a chat completions response body
pub fn extract_completions(response_json: &serde_json::Value) -> Result<Vec<String>> {
    if let Some(error) = response_json.get("error") {
        return Err(EvalError::Llm(format!("LLM API error: {}", error)));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| EvalError::Llm("No choices array in LLM response".to_string()))?;

    if choices.is_empty() {
        return Err(EvalError::Llm("Empty choices array in LLM response".to_string()));
    }

    let mut completions = Vec::with_capacity(choices.len());
    for (idx, choice) in choices.iter().enumerate() {
        match choice.get("finish_reason").and_then(|r| r.as_str()) {
            Some("content_filter") => {
                return Err(EvalError::Llm(format!(
                    "LLM response choice {} was filtered by content policy",
                    idx
                )));
            }
            Some("length") => warn!("LLM response choice {} was truncated due to length limit", idx),
            _ => {}
        }

        // A choice with no text still counts; the parser will mark it malformed
        let content = choice["message"]["content"].as_str().unwrap_or_default();
        completions.push(content.trim().to_string());
    }

    Ok(completions)
}
