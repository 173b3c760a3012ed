//! HTTP implementation of [`InferenceClient`] over reqwest.
//!
//! Talks to an OpenAI-compatible steering API: model configurations
//! travel as `{"model": base_model, "edits": [...]}` in request bodies,
//! streaming responses arrive as SSE `data:` lines with a `[DONE]`
//! sentinel.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use crate::error::{Result, SteerError};
use crate::features::{Feature, FeatureActivation};
use crate::inference::{
    ChatMessage, GenerationChunk, GenerationParams, GenerationStream, InferenceClient, ModelSpec,
};

/// reqwest-backed inference service client.
#[derive(Clone)]
pub struct HttpInferenceClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpInferenceClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            api_key,
            client,
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| SteerError::upstream("inference API key not set"))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let api_key = self.api_key()?;
        let url = format!("{}{}", self.base_url, path);
        log::debug!("POST {url}");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(body)
            .send()
            .await
            .map_err(|e| SteerError::upstream(format!("inference request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SteerError::upstream(format!("inference response read failed: {e}")))?;

        if !status.is_success() {
            return Err(SteerError::upstream(format!(
                "inference service error ({status}): {}",
                snippet(&text)
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| SteerError::upstream(format!("invalid inference response: {e}")))
    }

    fn chat_body(
        spec: &ModelSpec,
        messages: &[ChatMessage],
        params: GenerationParams,
        stream: bool,
    ) -> Value {
        serde_json::json!({
            "model": spec.base_model,
            "edits": spec.edits,
            "messages": messages,
            "max_completion_tokens": params.max_completion_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "stream": stream,
        })
    }
}

/// First 500 bytes of an error body, cut on a char boundary.
pub(crate) fn snippet(text: &str) -> &str {
    let mut end = text.len().min(500);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Extract the payload of an SSE `data:` line, if it is one.
fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Pull the text delta out of a streaming chunk payload.
fn delta_text(chunk: &Value) -> Option<String> {
    chunk
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn parse_feature(value: &Value) -> Option<Feature> {
    let id = value.get("id").and_then(|v| v.as_str())?;
    let label = value.get("label").and_then(|v| v.as_str())?;
    let mut feature = Feature::new(id, label);
    feature.activation = value.get("activation").and_then(|v| v.as_f64());
    Some(feature)
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn search(&self, spec: &ModelSpec, query: &str, top_k: usize) -> Result<Vec<Feature>> {
        let body = serde_json::json!({
            "model": spec.base_model,
            "query": query,
            "top_k": top_k,
        });
        let response = self.post_json("/features/search", &body).await?;

        let features = response
            .get("features")
            .and_then(|f| f.as_array())
            .map(|items| items.iter().filter_map(parse_feature).collect())
            .unwrap_or_default();
        Ok(features)
    }

    async fn features_by_id(&self, ids: &[String]) -> Result<Vec<Feature>> {
        let body = serde_json::json!({ "ids": ids });
        let response = self.post_json("/features/lookup", &body).await?;

        let features = response
            .get("features")
            .and_then(|f| f.as_array())
            .map(|items| items.iter().filter_map(parse_feature).collect())
            .unwrap_or_default();
        Ok(features)
    }

    async fn inspect(
        &self,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        top_k: usize,
    ) -> Result<Vec<FeatureActivation>> {
        let body = serde_json::json!({
            "model": spec.base_model,
            "edits": spec.edits,
            "messages": messages,
            "top_k": top_k,
        });
        let response = self.post_json("/features/inspect", &body).await?;

        let activations = response
            .get("activations")
            .and_then(|a| a.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let feature = parse_feature(item.get("feature")?)?;
                        let activation = item.get("activation")?.as_f64()?;
                        Some(FeatureActivation {
                            feature,
                            activation,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(activations)
    }

    async fn chat(
        &self,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<String> {
        let body = Self::chat_body(spec, messages, params, false);
        let response = self.post_json("/chat/completions", &body).await?;

        let content = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();
        Ok(content)
    }

    async fn chat_stream(
        &self,
        spec: &ModelSpec,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<GenerationStream> {
        let api_key = self.api_key()?.to_string();
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::chat_body(spec, messages, params, true);
        log::debug!("POST {url} (stream)");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SteerError::upstream(format!("inference request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SteerError::upstream(format!(
                "inference service error ({status}): {}",
                snippet(&text)
            )));
        }

        let (tx, stream) = GenerationStream::pair(64);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(GenerationChunk::Error(format!("stream read failed: {e}")))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim_end_matches('\r').to_string();
                    buffer.drain(..=newline);

                    let Some(data) = sse_data(&line) else { continue };
                    if data == "[DONE]" {
                        let _ = tx.send(GenerationChunk::Done).await;
                        return;
                    }
                    let Ok(value) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };
                    if let Some(text) = delta_text(&value) {
                        if tx.send(GenerationChunk::Delta(text)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            // Upstream closed without [DONE]; treat as a clean finish.
            let _ = tx.send(GenerationChunk::Done).await;
        });

        Ok(stream)
    }
}
