//! Generation service: a provider-neutral LLM client with tool calling.
//!
//! Two HTTP providers are supported, Google Gemini and anything speaking
//! the OpenAI chat-completions protocol (including locally served models).
//! Both map the same [`CompletionRequest`] onto their wire format, so the
//! router, the code agent and the answerers never see provider details.
//!
//! ## Example
//!
//! ```rust,ignore
//! use vimcq::llm::{client_for, ChatMessage, ClientConfig, CompletionRequest, Provider};
//!
//! let client = client_for(
//!     Provider::Google,
//!     ClientConfig::new(api_key).with_default_model("gemini-2.5-flash-lite"),
//! )?;
//!
//! let request = CompletionRequest::new()
//!     .with_system("Bạn là trợ lý.")
//!     .with_message(ChatMessage::user("Xin chào"));
//!
//! let response = client.complete(request).await?;
//! ```

mod client;
mod types;

pub use client::{client_for, ClientConfig, GoogleClient, LLMClient, OpenAIClient, TrackedClient};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, CostTracker, EmbeddingPurpose,
    EmbeddingRequest, EmbeddingResponse, ModelCosts, ModelSpec, Provider, StopReason, TokenUsage,
    ToolCall, ToolSpec,
};
