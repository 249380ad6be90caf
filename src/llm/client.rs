//! LLM client trait and provider implementations.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker, EmbeddingPurpose,
    EmbeddingRequest, EmbeddingResponse, ModelSpec, Provider, StopReason, TokenUsage, ToolCall,
    ToolSpec,
};

/// LLM client trait for making completions and embeddings.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Create embeddings for texts.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Get the provider for this client.
    fn provider(&self) -> Provider;

    /// One system instruction plus one user message at temperature zero,
    /// returning the generated text.
    async fn generate(&self, system: &str, user: &str) -> Result<String> {
        let request = CompletionRequest::new()
            .with_system(system)
            .with_message(ChatMessage::user(user))
            .with_temperature(0.0);
        Ok(self.complete(request).await?.content)
    }
}

/// Configuration for LLM clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Default model
    pub default_model: Option<String>,
    /// Default embedding model
    pub embedding_model: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Max retries on rate limiting or server errors
    pub max_retries: u32,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            default_model: None,
            embedding_model: None,
            timeout_secs: 120,
            max_retries: 3,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Build a client for `provider`.
pub fn client_for(provider: Provider, config: ClientConfig) -> Result<Arc<dyn LLMClient>> {
    Ok(match provider {
        Provider::OpenAI => Arc::new(OpenAIClient::new(config)?),
        Provider::Google => Arc::new(GoogleClient::new(config)?),
    })
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    let timeout = Duration::from_secs(timeout_secs);

    // Some sandboxed environments panic during proxy auto-detection in
    // reqwest's default builder. Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| Client::builder().timeout(timeout).build())) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::LLM(format!("Failed to create HTTP client: {}", e))),
    }
}

/// POST a JSON body, retrying on 429 and 5xx with exponential backoff.
/// Returns the final status and body text.
async fn post_json<T: Serialize + ?Sized>(
    http: &Client,
    url: &str,
    headers: &[(&str, &str)],
    body: &T,
    max_retries: u32,
) -> Result<(StatusCode, String)> {
    let mut attempt = 0;
    loop {
        let mut builder = http.post(url).header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| Error::LLM(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::LLM(format!("Failed to read response: {}", e)))?;

        let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        if !retryable || attempt >= max_retries {
            return Ok((status, text));
        }

        let delay = Duration::from_millis(500 * 2u64.pow(attempt));
        warn!(%status, attempt, delay_ms = delay.as_millis() as u64, "retrying LLM request");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

fn cost_for(model: &str, usage: &TokenUsage) -> Option<f64> {
    ModelSpec::lookup(model).map(|spec| spec.calculate_cost(usage.input_tokens, usage.output_tokens))
}

/// OpenAI client. Also works against any server implementing the
/// chat-completions protocol; the base URL includes the `/v1` prefix.
pub struct OpenAIClient {
    config: ClientConfig,
    http: Client,
}

impl OpenAIClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    const DEFAULT_MODEL: &'static str = "gpt-4o-mini";
    const DEFAULT_EMBEDDING_MODEL: &'static str = "text-embedding-3-small";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;

        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<String> {
        let url = format!("{}{}", self.base_url(), path);
        let auth = format!("Bearer {}", self.config.api_key);
        let (status, body) = post_json(
            &self.http,
            &url,
            &[("Authorization", auth.as_str())],
            body,
            self.config.max_retries,
        )
        .await?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<OpenAIError>(&body) {
                return Err(Error::llm_api("openai", error.error.message));
            }
            return Err(Error::llm_api("openai", format!("{}: {}", status, body)));
        }
        Ok(body)
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OpenAITool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAIToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAIFunctionDef,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    /// JSON-encoded arguments object
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

// OpenAI Embedding types
#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    model: String,
    data: Vec<OpenAIEmbeddingData>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}

fn openai_request(model: String, request: CompletionRequest) -> OpenAIRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system {
        messages.push(OpenAIMessage {
            role: "system".to_string(),
            content: Some(system),
            tool_calls: Vec::new(),
            tool_call_id: None,
        });
    }

    for m in request.messages {
        let role = match m.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        };
        let tool_calls = m
            .tool_calls
            .into_iter()
            .map(|call| OpenAIToolCall {
                id: call.id,
                call_type: function_type(),
                function: OpenAIFunctionCall {
                    name: call.name,
                    arguments: call.arguments.to_string(),
                },
            })
            .collect::<Vec<_>>();
        // Assistant turns that only call tools carry null content.
        let content = (!(m.content.is_empty() && !tool_calls.is_empty())).then_some(m.content);

        messages.push(OpenAIMessage {
            role: role.to_string(),
            content,
            tool_calls,
            tool_call_id: m.tool_call_id,
        });
    }

    let tools = request
        .tools
        .into_iter()
        .map(|ToolSpec { name, description, parameters }| OpenAITool {
            tool_type: "function",
            function: OpenAIFunctionDef {
                name,
                description,
                parameters,
            },
        })
        .collect();

    OpenAIRequest {
        model,
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stop: request.stop,
        tools,
    }
}

fn parse_openai_response(model: &str, body: &str) -> Result<CompletionResponse> {
    let api_response: OpenAIResponse = serde_json::from_str(body)
        .map_err(|e| Error::LLM(format!("Failed to parse response: {}", e)))?;

    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::LLM("No choices in response".to_string()))?;

    let stop_reason = choice.finish_reason.as_deref().map(|r| match r {
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        "content_filter" => StopReason::ContentFilter,
        _ => StopReason::EndTurn,
    });

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|call| ToolCall {
            id: call.id,
            arguments: serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::String(call.function.arguments)),
            name: call.function.name,
        })
        .collect();

    let usage = api_response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let model = if api_response.model.is_empty() {
        model.to_string()
    } else {
        api_response.model
    };

    Ok(CompletionResponse {
        id: api_response.id,
        cost: cost_for(&model, &usage),
        model,
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        stop_reason,
        usage,
        timestamp: Utc::now(),
    })
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .clone()
            .or(self.config.default_model.clone())
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        debug!(%model, messages = request.messages.len(), tools = request.tools.len(), "openai completion");
        let api_request = openai_request(model.clone(), request);
        let body = self.post("/chat/completions", &api_request).await?;
        parse_openai_response(&model, &body)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .or(self.config.embedding_model.clone())
            .unwrap_or_else(|| Self::DEFAULT_EMBEDDING_MODEL.to_string());

        let api_request = OpenAIEmbeddingRequest {
            model,
            input: request.texts,
        };

        let body = self.post("/embeddings", &api_request).await?;
        let api_response: OpenAIEmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LLM(format!("Failed to parse response: {}", e)))?;

        Ok(EmbeddingResponse {
            model: api_response.model,
            embeddings: api_response.data.into_iter().map(|d| d.embedding).collect(),
            usage: TokenUsage {
                input_tokens: api_response.usage.map_or(0, |u| u.prompt_tokens),
                output_tokens: 0,
            },
        })
    }

    fn provider(&self) -> Provider {
        Provider::OpenAI
    }
}

/// Google Gemini client.
pub struct GoogleClient {
    config: ClientConfig,
    http: Client,
}

impl GoogleClient {
    const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";
    const DEFAULT_MODEL: &'static str = "gemini-2.5-flash-lite";
    const DEFAULT_EMBEDDING_MODEL: &'static str = "text-embedding-004";

    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;

        Ok(Self { config, http })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(Self::DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    async fn post(&self, url: &str, body: &impl Serialize) -> Result<String> {
        let (status, body) = post_json(
            &self.http,
            url,
            &[("x-goog-api-key", self.config.api_key.as_str())],
            body,
            self.config.max_retries,
        )
        .await?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                return Err(Error::llm_api("google", error.error.message));
            }
            return Err(Error::llm_api("google", format!("{}: {}", status, body)));
        }
        Ok(body)
    }
}

// Google Gemini API types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<ToolSpec>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[derive(Debug, Serialize)]
struct GeminiEmbedBatch {
    requests: Vec<GeminiEmbedRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiEmbedRequest {
    model: String,
    content: GeminiContent,
    task_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedResponse {
    #[serde(default)]
    embeddings: Vec<GeminiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

fn gemini_request(request: CompletionRequest) -> GeminiRequest {
    let mut system_parts: Vec<GeminiPart> = request.system.into_iter().map(GeminiPart::text).collect();
    let mut contents: Vec<GeminiContent> = Vec::new();

    for m in request.messages {
        match m.role {
            ChatRole::System => system_parts.push(GeminiPart::text(m.content)),
            ChatRole::User => contents.push(GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart::text(m.content)],
            }),
            ChatRole::Assistant => {
                let mut parts = Vec::new();
                if !m.content.is_empty() {
                    parts.push(GeminiPart::text(m.content));
                }
                parts.extend(m.tool_calls.into_iter().map(|call| GeminiPart {
                    function_call: Some(GeminiFunctionCall {
                        name: call.name,
                        args: call.arguments,
                    }),
                    ..GeminiPart::default()
                }));
                contents.push(GeminiContent {
                    role: "model".to_string(),
                    parts,
                });
            }
            ChatRole::Tool => {
                let part = GeminiPart {
                    function_response: Some(GeminiFunctionResponse {
                        name: m.tool_name.unwrap_or_default(),
                        response: serde_json::json!({ "content": m.content }),
                    }),
                    ..GeminiPart::default()
                };
                // Responses to calls from the same model turn share one content.
                match contents.last_mut() {
                    Some(last)
                        if last.role == "user"
                            && last.parts.iter().all(|p| p.function_response.is_some()) =>
                    {
                        last.parts.push(part)
                    }
                    _ => contents.push(GeminiContent {
                        role: "user".to_string(),
                        parts: vec![part],
                    }),
                }
            }
        }
    }

    let system_instruction = (!system_parts.is_empty()).then(|| GeminiContent {
        role: "user".to_string(),
        parts: system_parts,
    });

    let tools = if request.tools.is_empty() {
        Vec::new()
    } else {
        vec![GeminiTool {
            function_declarations: request.tools,
        }]
    };

    GeminiRequest {
        contents,
        system_instruction,
        generation_config: Some(GeminiGenerationConfig {
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
            stop_sequences: request.stop,
        }),
        tools,
    }
}

fn parse_gemini_response(model: &str, body: &str) -> Result<CompletionResponse> {
    let api_response: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| Error::LLM(format!("Failed to parse response: {}", e)))?;

    let Some(candidate) = api_response.candidates.into_iter().next() else {
        let reason = api_response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "unknown".to_string());
        return Err(Error::llm_api(
            "google",
            format!("no candidates in response (block reason: {})", reason),
        ));
    };

    let stop_reason = candidate.finish_reason.as_deref().map(|r| match r {
        "MAX_TOKENS" => StopReason::MaxTokens,
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII" => StopReason::ContentFilter,
        _ => StopReason::EndTurn,
    });

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        if let Some(text) = part.text {
            content.push_str(&text);
        }
        if let Some(call) = part.function_call {
            // Gemini does not assign call ids.
            tool_calls.push(ToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name: call.name,
                arguments: call.args,
            });
        }
    }

    let usage = api_response
        .usage_metadata
        .map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        id: format!("gemini-{}", uuid::Uuid::new_v4()),
        model: model.to_string(),
        content,
        stop_reason: if tool_calls.is_empty() {
            stop_reason
        } else {
            Some(StopReason::ToolUse)
        },
        tool_calls,
        cost: cost_for(model, &usage),
        usage,
        timestamp: Utc::now(),
    })
}

#[async_trait]
impl LLMClient for GoogleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let model = request
            .model
            .clone()
            .or(self.config.default_model.clone())
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());

        debug!(%model, messages = request.messages.len(), tools = request.tools.len(), "gemini completion");
        let api_request = gemini_request(request);
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url(), model);
        let body = self.post(&url, &api_request).await?;
        parse_gemini_response(&model, &body)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .or(self.config.embedding_model.clone())
            .unwrap_or_else(|| Self::DEFAULT_EMBEDDING_MODEL.to_string());

        let task_type = match request.purpose {
            EmbeddingPurpose::Document => "RETRIEVAL_DOCUMENT",
            EmbeddingPurpose::Query => "RETRIEVAL_QUERY",
        };
        let requests = request
            .texts
            .into_iter()
            .map(|text| GeminiEmbedRequest {
                model: format!("models/{}", model),
                content: GeminiContent {
                    role: "user".to_string(),
                    parts: vec![GeminiPart::text(text)],
                },
                task_type,
            })
            .collect();

        let url = format!("{}/v1beta/models/{}:batchEmbedContents", self.base_url(), model);
        let body = self.post(&url, &GeminiEmbedBatch { requests }).await?;
        let api_response: GeminiEmbedResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LLM(format!("Failed to parse response: {}", e)))?;

        Ok(EmbeddingResponse {
            model,
            embeddings: api_response.embeddings.into_iter().map(|e| e.values).collect(),
            usage: TokenUsage::default(),
        })
    }

    fn provider(&self) -> Provider {
        Provider::Google
    }
}

/// Client wrapper that accumulates usage and cost across calls.
pub struct TrackedClient {
    inner: Arc<dyn LLMClient>,
    costs: Arc<RwLock<CostTracker>>,
}

impl TrackedClient {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            inner: client,
            costs: Arc::new(RwLock::new(CostTracker::new())),
        }
    }

    /// Get current cost summary.
    pub async fn get_costs(&self) -> CostTracker {
        self.costs.read().await.clone()
    }

    /// Reset cost tracking.
    pub async fn reset_costs(&self) {
        *self.costs.write().await = CostTracker::new();
    }
}

#[async_trait]
impl LLMClient for TrackedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let response = self.inner.complete(request).await?;

        let mut costs = self.costs.write().await;
        costs.record(&response.model, &response.usage, response.cost);

        Ok(response)
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let response = self.inner.embed(request).await?;

        let mut costs = self.costs.write().await;
        costs.record(&response.model, &response.usage, None);

        Ok(response)
    }

    fn provider(&self) -> Provider {
        self.inner.provider()
    }
}
