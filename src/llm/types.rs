//! LLM types for requests, responses, tools and model definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::Error;

/// LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenAI or any server speaking the chat-completions protocol.
    OpenAI,
    /// Google Gemini.
    Google,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::Google => write!(f, "google"),
        }
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "google" | "gemini" => Ok(Self::Google),
            other => Err(Error::Config(format!("unknown LLM provider '{}'", other))),
        }
    }
}

/// Model definition with pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model identifier (e.g., "gemini-2.5-flash-lite")
    pub id: String,
    /// Provider
    pub provider: Provider,
    /// Maximum context window (tokens)
    pub context_window: u32,
    /// Input cost per million tokens (USD)
    pub input_cost_per_m: f64,
    /// Output cost per million tokens (USD)
    pub output_cost_per_m: f64,
}

impl ModelSpec {
    /// Calculate cost for given token usage.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1_000_000.0) * self.input_cost_per_m;
        let output_cost = (output_tokens as f64 / 1_000_000.0) * self.output_cost_per_m;
        input_cost + output_cost
    }

    fn new(id: &str, provider: Provider, context_window: u32, input: f64, output: f64) -> Self {
        Self {
            id: id.to_string(),
            provider,
            context_window,
            input_cost_per_m: input,
            output_cost_per_m: output,
        }
    }

    /// Models with known pricing.
    pub fn known() -> Vec<Self> {
        vec![
            Self::new("gemini-2.5-flash-lite", Provider::Google, 1_048_576, 0.10, 0.40),
            Self::new("gemini-2.5-flash", Provider::Google, 1_048_576, 0.30, 2.50),
            Self::new("gemini-2.0-flash", Provider::Google, 1_048_576, 0.10, 0.40),
            Self::new("gpt-4o-mini", Provider::OpenAI, 128_000, 0.15, 0.60),
            Self::new("gpt-4o", Provider::OpenAI, 128_000, 2.5, 10.0),
        ]
    }

    /// Find pricing for a model id. Versioned ids (`gpt-4o-2024-08-06`)
    /// resolve to their longest known prefix.
    pub fn lookup(model: &str) -> Option<Self> {
        Self::known()
            .into_iter()
            .filter(|m| model.starts_with(&m.id))
            .max_by_key(|m| m.id.len())
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    /// Result of a tool invocation, answering an assistant tool call.
    Tool,
}

/// Declaration of a function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    /// String argument by name, if present.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call answered by a tool message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced a tool message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    fn plain(role: ChatRole, content: String) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content.into())
    }

    /// Assistant turn that requested tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(ChatRole::Assistant, content.into())
        }
    }

    /// Tool result answering `call`.
    pub fn tool_result(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
            ..Self::plain(ChatRole::Tool, content.into())
        }
    }
}

/// Completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use (client default if unset)
    pub model: Option<String>,
    /// System prompt
    pub system: Option<String>,
    /// Conversation messages
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f64>,
    /// Stop sequences
    pub stop: Option<Vec<String>>,
    /// Functions the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    /// Metadata for tracking
    pub metadata: Option<HashMap<String, String>>,
}

impl CompletionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the model only when one is given.
    pub fn with_model_opt(mut self, model: Option<&str>) -> Self {
        if let Some(model) = model {
            self.model = Some(model.to_string());
        }
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response ID
    pub id: String,
    /// Model used
    pub model: String,
    /// Generated text (may be empty when the model only called tools)
    pub content: String,
    /// Tool calls requested by the model, in order
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Stop reason
    pub stop_reason: Option<StopReason>,
    /// Token usage
    pub usage: TokenUsage,
    /// Response timestamp
    pub timestamp: DateTime<Utc>,
    /// Cost in USD (if the model's pricing is known)
    pub cost: Option<f64>,
}

impl CompletionResponse {
    /// Response carrying only text. Used by providers and test doubles.
    pub fn text(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model: model.into(),
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: Some(StopReason::EndTurn),
            usage: TokenUsage::default(),
            timestamp: Utc::now(),
            cost: None,
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        if !tool_calls.is_empty() {
            self.stop_reason = Some(StopReason::ToolUse);
        }
        self.tool_calls = tool_calls;
        self
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
    /// Blocked by the provider's safety filter
    ContentFilter,
}

/// What embedded text will be used for. Some providers embed documents
/// and queries differently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingPurpose {
    #[default]
    Document,
    Query,
}

/// Embedding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Model to use
    pub model: Option<String>,
    /// Texts to embed
    pub texts: Vec<String>,
    #[serde(default)]
    pub purpose: EmbeddingPurpose,
}

impl EmbeddingRequest {
    pub fn documents(texts: Vec<String>) -> Self {
        Self {
            model: None,
            texts,
            purpose: EmbeddingPurpose::Document,
        }
    }

    pub fn query(text: impl Into<String>) -> Self {
        Self {
            model: None,
            texts: vec![text.into()],
            purpose: EmbeddingPurpose::Query,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Embedding response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// Model used
    pub model: String,
    /// Embedding vectors, one per input text
    pub embeddings: Vec<Vec<f32>>,
    /// Token usage
    pub usage: TokenUsage,
}

/// Usage and cost accumulated over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    /// Total input tokens
    pub total_input_tokens: u64,
    /// Total output tokens
    pub total_output_tokens: u64,
    /// Total cost in USD
    pub total_cost: f64,
    /// Number of requests
    pub request_count: u64,
    /// Per-model breakdown
    pub by_model: HashMap<String, ModelCosts>,
}

/// Costs for a specific model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCosts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub request_count: u64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage from one response.
    pub fn record(&mut self, model: &str, usage: &TokenUsage, cost: Option<f64>) {
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.request_count += 1;

        if let Some(c) = cost {
            self.total_cost += c;
        }

        let model_costs = self.by_model.entry(model.to_string()).or_default();
        model_costs.input_tokens += usage.input_tokens;
        model_costs.output_tokens += usage.output_tokens;
        model_costs.request_count += 1;
        if let Some(c) = cost {
            model_costs.cost += c;
        }
    }

    /// Merge another tracker into this one.
    pub fn merge(&mut self, other: &CostTracker) {
        self.total_input_tokens += other.total_input_tokens;
        self.total_output_tokens += other.total_output_tokens;
        self.total_cost += other.total_cost;
        self.request_count += other.request_count;

        for (model, costs) in &other.by_model {
            let entry = self.by_model.entry(model.clone()).or_default();
            entry.input_tokens += costs.input_tokens;
            entry.output_tokens += costs.output_tokens;
            entry.cost += costs.cost;
            entry.request_count += costs.request_count;
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_cost_calculation() {
        let model = ModelSpec::lookup("gemini-2.5-flash-lite").unwrap();
        // 1M input + 500k output
        let cost = model.calculate_cost(1_000_000, 500_000);
        // 1M * $0.10/M + 0.5M * $0.40/M = $0.30
        assert!((cost - 0.30).abs() < 1e-9);
    }

    #[test]
    fn test_model_lookup_prefers_longest_prefix() {
        assert_eq!(ModelSpec::lookup("gpt-4o-mini-2024-07-18").unwrap().id, "gpt-4o-mini");
        assert_eq!(ModelSpec::lookup("gpt-4o-2024-08-06").unwrap().id, "gpt-4o");
        assert!(ModelSpec::lookup("qwen2.5-7b-instruct").is_none());
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("Gemini".parse::<Provider>().unwrap(), Provider::Google);
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAI);
        assert!("anthropic".parse::<Provider>().is_err());
    }

    #[test]
    fn test_tool_messages() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "python_interpreter".to_string(),
            arguments: json!({"code": "print(1)"}),
        };
        assert_eq!(call.str_arg("code"), Some("print(1)"));
        assert_eq!(call.str_arg("missing"), None);

        let assistant = ChatMessage::assistant_with_tools("", vec![call.clone()]);
        assert_eq!(assistant.role, ChatRole::Assistant);
        assert_eq!(assistant.tool_calls.len(), 1);

        let result = ChatMessage::tool_result(&call, "1");
        assert_eq!(result.role, ChatRole::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(result.tool_name.as_deref(), Some("python_interpreter"));
    }

    #[test]
    fn test_completion_request_builder() {
        let req = CompletionRequest::new()
            .with_model("gemini-2.5-flash-lite")
            .with_system("Bạn là trợ lý")
            .with_message(ChatMessage::user("Xin chào"))
            .with_max_tokens(1000)
            .with_temperature(3.0)
            .with_metadata("question_id", "q1");

        assert_eq!(req.model.as_deref(), Some("gemini-2.5-flash-lite"));
        assert_eq!(req.system.as_deref(), Some("Bạn là trợ lý"));
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.max_tokens, Some(1000));
        assert_eq!(req.temperature, Some(2.0));
        assert!(req.tools.is_empty());
        assert_eq!(
            req.metadata.unwrap().get("question_id").map(String::as_str),
            Some("q1")
        );
    }

    #[test]
    fn test_cost_tracker() {
        let mut tracker = CostTracker::new();
        let usage = TokenUsage {
            input_tokens: 1000,
            output_tokens: 500,
        };
        tracker.record("gemini-2.5-flash-lite", &usage, Some(0.01));
        tracker.record("gemini-2.5-flash-lite", &usage, None);

        let mut other = CostTracker::new();
        other.record("gpt-4o-mini", &usage, Some(0.02));
        tracker.merge(&other);

        assert_eq!(tracker.total_input_tokens, 3000);
        assert_eq!(tracker.total_tokens(), 4500);
        assert_eq!(tracker.request_count, 3);
        assert!((tracker.total_cost - 0.03).abs() < 1e-9);
        assert_eq!(tracker.by_model["gemini-2.5-flash-lite"].request_count, 2);
    }
}
