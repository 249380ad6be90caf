//! Terminal handlers for the knowledge, direct and toxic routes.
//!
//! Each handler answers one question and reports what it saw. The math
//! route is served by [`crate::agent::CodeAgent`].

mod direct;
pub mod prompt;
mod retrieval;
mod safety;

pub use direct::DirectAnswerer;
pub use retrieval::RetrievalAnswerer;
pub use safety::SafetyHandler;

use serde::{Deserialize, Serialize};

use crate::answer;
use crate::llm::{ChatMessage, CompletionRequest};
use crate::question::{Answer, Question};

/// What a handler produced for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    pub answer: Answer,
    /// Grounding context, when the handler used one
    pub context: Option<String>,
    /// Raw model output, when a model was called
    pub reasoning: Option<String>,
}

/// Settings shared by the single-call answerers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswererConfig {
    /// Passages fetched by the retrieval answerer
    pub top_k: usize,
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for AnswererConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            model: None,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

impl AnswererConfig {
    fn request(&self, system: String, question: &Question) -> CompletionRequest {
        CompletionRequest::new()
            .with_model_opt(self.model.as_deref())
            .with_system(system)
            .with_message(ChatMessage::user(question.to_prompt()))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

/// Read the final answer out of a model response: the refusal sentinel
/// when the model refused without marking a choice, otherwise the
/// extracted label.
pub fn interpret(text: &str, question: &Question) -> Answer {
    let n = question.choice_count();
    if answer::is_refusal(text, n) {
        Answer::Refused
    } else {
        Answer::Choice(answer::extract(text, n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question() -> Question {
        Question::new("q", "Câu hỏi?", vec!["x".into(), "y".into(), "z".into()]).unwrap()
    }

    #[test]
    fn test_interpret() {
        let q = question();
        assert_eq!(interpret("Suy luận...\nĐáp án: C", &q).to_string(), "C");
        assert_eq!(interpret("Từ chối trả lời", &q), Answer::Refused);
        assert_eq!(
            interpret("Không phải từ chối trả lời. Đáp án: B", &q).to_string(),
            "B"
        );
        assert_eq!(interpret("", &q), Answer::default());
    }
}
