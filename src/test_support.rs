//! Test doubles shared by unit tests across the crate.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::llm::{
    CompletionRequest, CompletionResponse, EmbeddingRequest, EmbeddingResponse, LLMClient,
    Provider, TokenUsage, ToolCall,
};
use crate::retrieval::{Passage, Retriever};
use crate::sandbox::{CodeSandbox, NO_OUTPUT};

/// LLM client replaying a fixed script of responses and recording every
/// request it receives. Fails once the script runs out.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Result<CompletionResponse>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    embedding: Vec<f32>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Result<CompletionResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            embedding: vec![1.0, 0.0, 0.0],
        }
    }

    pub fn with_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(texts.into_iter().map(|t| Ok(text(t))).collect())
    }

    /// Vector returned for every embedded text.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMClient for ScriptedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::LLM("script exhausted".to_string())))
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        Ok(EmbeddingResponse {
            model: "scripted-embedding".to_string(),
            embeddings: request.texts.iter().map(|_| self.embedding.clone()).collect(),
            usage: TokenUsage::default(),
        })
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }
}

/// Plain text response.
pub fn text(content: &str) -> CompletionResponse {
    CompletionResponse::text("scripted", content)
}

/// Response consisting of a single tool call.
pub fn tool_call(name: &str, arguments: Value) -> CompletionResponse {
    CompletionResponse::text("scripted", "").with_tool_calls(vec![ToolCall {
        id: format!("call_{}", name),
        name: name.to_string(),
        arguments,
    }])
}

/// Retriever returning the same passages for every query.
pub struct StaticRetriever {
    passages: Vec<Passage>,
    queries: Mutex<Vec<(String, usize)>>,
}

impl StaticRetriever {
    pub fn new<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            passages: texts
                .into_iter()
                .enumerate()
                .map(|(i, t)| Passage::new(t, 1.0 - i as f32 * 0.1))
                .collect(),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<(String, usize)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Passage>> {
        self.queries.lock().unwrap().push((query.to_string(), k));
        Ok(self.passages.iter().take(k).cloned().collect())
    }
}

/// Sandbox replaying scripted outputs and recording executed code.
pub struct ScriptedSandbox {
    outputs: Mutex<VecDeque<String>>,
    codes: Mutex<Vec<String>>,
    resets: Mutex<usize>,
}

impl ScriptedSandbox {
    pub fn new<'a>(outputs: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            outputs: Mutex::new(outputs.into_iter().map(String::from).collect()),
            codes: Mutex::new(Vec::new()),
            resets: Mutex::new(0),
        }
    }

    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().unwrap().clone()
    }

    pub fn resets(&self) -> usize {
        *self.resets.lock().unwrap()
    }
}

#[async_trait]
impl CodeSandbox for ScriptedSandbox {
    async fn run(&self, code: &str) -> String {
        self.codes.lock().unwrap().push(code.to_string());
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| NO_OUTPUT.to_string())
    }

    async fn reset(&self) {
        *self.resets.lock().unwrap() += 1;
    }
}
