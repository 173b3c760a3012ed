//! HTTP implementation of [`AnalysisClient`] against an OpenAI-compatible
//! chat completions endpoint, forcing a function call when a schema is
//! supplied and falling back to the plain message body otherwise.

use async_trait::async_trait;
use serde_json::Value;

use crate::analysis::{AnalysisClient, AnalysisReply};
use crate::error::{Result, SteerError};

/// reqwest-backed analysis capability client.
#[derive(Clone)]
pub struct HttpAnalysisClient {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl HttpAnalysisClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            client,
        }
    }

    fn build_body(&self, system: &str, prompt: &str, function: Option<&Value>) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": 500,
            "temperature": 0.7,
        });
        if let Some(function) = function {
            body["functions"] = serde_json::json!([function]);
            body["function_call"] = serde_json::json!({
                "name": function.get("name").and_then(|n| n.as_str()).unwrap_or_default()
            });
        }
        body
    }
}

/// Classify a chat-completions message into a reply shape.
fn classify_message(message: &Value) -> Option<AnalysisReply> {
    if let Some(arguments) = message
        .get("function_call")
        .and_then(|fc| fc.get("arguments"))
        .and_then(|a| a.as_str())
    {
        // Arguments arrive as a JSON string; malformed arguments fall
        // through to the free-text path so the extractors get a shot.
        if let Ok(args) = serde_json::from_str::<Value>(arguments) {
            return Some(AnalysisReply::FunctionCall(args));
        }
        return Some(AnalysisReply::FreeText(arguments.to_string()));
    }
    message
        .get("content")
        .and_then(|c| c.as_str())
        .map(|c| AnalysisReply::FreeText(c.to_string()))
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn invoke(
        &self,
        system: &str,
        prompt: &str,
        function: Option<Value>,
    ) -> Result<AnalysisReply> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SteerError::upstream("analysis API key not set"))?;

        let body = self.build_body(system, prompt, function.as_ref());
        let url = format!("{}/chat/completions", self.base_url);
        log::debug!("POST {url} (analysis, model={})", self.model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SteerError::upstream(format!("analysis request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SteerError::upstream(format!("analysis response read failed: {e}")))?;

        if !status.is_success() {
            return Err(SteerError::upstream(format!(
                "analysis service error ({status}): {}",
                crate::inference::http_snippet(&text)
            )));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| SteerError::upstream(format!("invalid analysis response: {e}")))?;

        parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(classify_message)
            .ok_or_else(|| SteerError::upstream("analysis response had no message"))
    }
}
