use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{interpret, prompt, AnswererConfig, HandlerOutput};
use crate::error::Result;
use crate::llm::LLMClient;
use crate::question::Question;

/// Answers self-contained questions, typically reading comprehension with
/// the passage inline, in a single model call.
pub struct DirectAnswerer {
    client: Arc<dyn LLMClient>,
    config: AnswererConfig,
}

impl DirectAnswerer {
    pub fn new(client: Arc<dyn LLMClient>, config: AnswererConfig) -> Self {
        Self { client, config }
    }

    #[instrument(skip(self, question), fields(question_id = question.id()))]
    pub async fn answer(&self, question: &Question) -> Result<HandlerOutput> {
        let request = self
            .config
            .request(prompt::DIRECT_SYSTEM.to_string(), question);
        let response = self.client.complete(request).await?;
        let reasoning = response.content.trim().to_string();
        debug!(%reasoning, "direct answerer reasoning");

        let answer = interpret(&reasoning, question);
        info!(%answer, "direct answer");
        Ok(HandlerOutput {
            answer,
            context: None,
            reasoning: Some(reasoning),
        })
    }
}
