//! Shared mock upstreams for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::analysis::{AnalysisClient, AnalysisReply};
use crate::error::{Result, SteerError};
use crate::features::{Feature, FeatureActivation};
use crate::inference::{
    ChatMessage, GenerationChunk, GenerationParams, GenerationStream, InferenceClient, ModelSpec,
};

/// Scriptable [`InferenceClient`].
#[derive(Default)]
pub struct MockInference {
    /// Returned from every `search` call.
    pub search_results: Vec<Feature>,
    /// Backing set for `features_by_id`.
    pub features: HashMap<String, Feature>,
    /// Returned from `inspect`.
    pub activations: Vec<FeatureActivation>,
    /// Responses popped per `chat`/`chat_stream` call; "ok" when empty.
    pub chat_responses: Mutex<VecDeque<String>>,
    /// Recorded (query, top_k) pairs.
    pub searches: Mutex<Vec<(String, usize)>>,
    /// Recorded edit lists passed to `chat`/`chat_stream`.
    pub chat_specs: Mutex<Vec<ModelSpec>>,
    /// Force every generation call to fail.
    pub fail_chat: bool,
    /// Force every search call to fail.
    pub fail_search: bool,
    /// Make `chat_stream` emit an error chunk mid-stream.
    pub stream_error: bool,
}

impl MockInference {
    pub fn with_search_results(mut self, features: Vec<Feature>) -> Self {
        self.search_results = features;
        self
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.insert(feature.id.clone(), feature);
        self
    }

    pub fn with_chat_responses(self, responses: &[&str]) -> Self {
        {
            let mut queue = self.chat_responses.lock().unwrap();
            for r in responses {
                queue.push_back(r.to_string());
            }
        }
        self
    }

    fn next_response(&self) -> String {
        self.chat_responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "ok".to_string())
    }
}

#[async_trait]
impl InferenceClient for MockInference {
    async fn search(&self, _spec: &ModelSpec, query: &str, top_k: usize) -> Result<Vec<Feature>> {
        self.searches
            .lock()
            .unwrap()
            .push((query.to_string(), top_k));
        if self.fail_search {
            return Err(SteerError::upstream("mock search failure"));
        }
        Ok(self.search_results.iter().take(top_k).cloned().collect())
    }

    async fn features_by_id(&self, ids: &[String]) -> Result<Vec<Feature>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.features.get(id).cloned())
            .collect())
    }

    async fn inspect(
        &self,
        _spec: &ModelSpec,
        _messages: &[ChatMessage],
        top_k: usize,
    ) -> Result<Vec<FeatureActivation>> {
        Ok(self.activations.iter().take(top_k).cloned().collect())
    }

    async fn chat(
        &self,
        spec: &ModelSpec,
        _messages: &[ChatMessage],
        _params: GenerationParams,
    ) -> Result<String> {
        if self.fail_chat {
            return Err(SteerError::upstream("mock chat failure"));
        }
        self.chat_specs.lock().unwrap().push(spec.clone());
        Ok(self.next_response())
    }

    async fn chat_stream(
        &self,
        spec: &ModelSpec,
        _messages: &[ChatMessage],
        _params: GenerationParams,
    ) -> Result<GenerationStream> {
        if self.fail_chat {
            return Err(SteerError::upstream("mock chat failure"));
        }
        self.chat_specs.lock().unwrap().push(spec.clone());
        let text = self.next_response();
        let stream_error = self.stream_error;

        let (tx, stream) = GenerationStream::pair(16);
        tokio::spawn(async move {
            let _ = tx.send(GenerationChunk::Delta(text)).await;
            if stream_error {
                let _ = tx
                    .send(GenerationChunk::Error("mock stream failure".into()))
                    .await;
            } else {
                let _ = tx.send(GenerationChunk::Done).await;
            }
        });
        Ok(stream)
    }
}

/// Scriptable [`AnalysisClient`]: pops one reply per invoke.
#[derive(Default)]
pub struct MockAnalysis {
    pub replies: Mutex<VecDeque<Result<AnalysisReply>>>,
    /// Recorded prompts for assertions.
    pub prompts: Mutex<Vec<String>>,
}

impl MockAnalysis {
    pub fn with_reply(self, reply: AnalysisReply) -> Self {
        self.replies.lock().unwrap().push_back(Ok(reply));
        self
    }

    pub fn with_error(self) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(SteerError::upstream("mock analysis failure")));
        self
    }

    pub fn with_function_call(self, args: Value) -> Self {
        self.with_reply(AnalysisReply::FunctionCall(args))
    }
}

#[async_trait]
impl AnalysisClient for MockAnalysis {
    async fn invoke(
        &self,
        _system: &str,
        prompt: &str,
        _function: Option<Value>,
    ) -> Result<AnalysisReply> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SteerError::upstream("mock analysis exhausted")))
    }
}
