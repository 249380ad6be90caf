//! # vimcq
//!
//! Answers Vietnamese multiple-choice questions by routing each question to
//! a specialised handler and normalising the model's free-form output into
//! one valid choice label.
//!
//! ## Core Components
//!
//! - **Router**: lexical fast paths for reading-comprehension and math
//!   questions, model classification for the rest
//! - **Agent**: bounded generate-execute-observe loop that computes math
//!   answers in a Python sandbox
//! - **Answer**: total extraction of a choice label from model text
//! - **Handlers**: retrieval-grounded, direct and safety-refusal answerers
//! - **Orchestrator**: per-question dispatch and batch runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vimcq::{client_for, ClientConfig, Pipeline, Provider, Question};
//!
//! let client = client_for(Provider::Google, ClientConfig::new(api_key))?;
//! let pipeline = Pipeline::builder(client).build();
//!
//! let question = Question::new(
//!     "q1",
//!     "Một trang trại có 36 đầu và 100 chân (gà và chó). Có bao nhiêu con chó?",
//!     vec!["12".into(), "14".into(), "22".into(), "16".into()],
//! )?;
//! let prediction = pipeline.predict(&question).await;
//! println!("{}: {}", prediction.id, prediction.answer);
//! ```

pub mod agent;
pub mod answer;
pub mod config;
pub mod dataset;
pub mod error;
pub mod handlers;
pub mod llm;
pub mod orchestrator;
pub mod question;
pub mod retrieval;
pub mod router;
pub mod sandbox;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use agent::{AgentConfig, AgentMode, AgentOutcome, CodeAgent, Termination};
pub use config::{PipelineConfig, Settings};
pub use error::{Error, Result};
pub use handlers::{AnswererConfig, DirectAnswerer, HandlerOutput, RetrievalAnswerer, SafetyHandler};
pub use llm::{
    client_for, ClientConfig, CompletionRequest, CompletionResponse, CostTracker, LLMClient,
    Provider, TrackedClient,
};
pub use orchestrator::{BatchReport, Pipeline, PipelineBuilder, QuestionResult};
pub use question::{Answer, ChoiceLabel, PipelineState, Prediction, Question, Route};
pub use retrieval::{
    EmbeddingRetriever, EmptyRetriever, IngestConfig, IngestReport, Ingestor, KnowledgeStore,
    Passage, Retriever, TextSplitter,
};
pub use router::{RouteDecision, RouteSource, Router, RouterConfig};
pub use sandbox::{CodeSandbox, PythonSandbox, SandboxConfig};
