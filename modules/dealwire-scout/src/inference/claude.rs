use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{InferenceClient, InferenceError, InferenceRequest};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API with a forced tool call, so the reply is always
/// the tool's `input` object.
#[derive(Clone)]
pub struct ClaudeInference {
    api_key: String,
    model: String,
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    ToolUse {
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

impl ClaudeInference {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, InferenceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| InferenceError::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            http,
            base_url: ANTHROPIC_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn headers(&self) -> Result<HeaderMap, InferenceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| InferenceError::Provider(format!("invalid api key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn body(&self, request: &InferenceRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": 0.0,
            "system": request.system,
            "messages": [{ "role": "user", "content": request.user }],
            "tools": [{
                "name": request.schema_name,
                "description": "Record the structured answer.",
                "input_schema": request.schema,
            }],
            "tool_choice": { "type": "tool", "name": request.schema_name },
        })
    }
}

#[async_trait]
impl InferenceClient for ClaudeInference {
    async fn infer(&self, request: InferenceRequest) -> Result<serde_json::Value, InferenceError> {
        let url = format!("{}/messages", self.base_url);
        debug!(model = %self.model, tool = %request.schema_name, "Claude request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&self.body(&request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout
                } else {
                    InferenceError::Provider(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 529 {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(InferenceError::Throttled { retry_after });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(InferenceError::Provider(format!("Claude API error ({status}): {text}")));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Schema(format!("unreadable response: {e}")))?;

        body.content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::ToolUse { input } => Some(input),
                ContentBlock::Other => None,
            })
            .ok_or_else(|| InferenceError::Schema("no tool_use block in response".to_string()))
    }
}
