use tracing::info;

use super::{prompt, HandlerOutput};
use crate::question::Answer;

/// Refuses toxic questions without consulting any model.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetyHandler;

impl SafetyHandler {
    pub fn answer(&self) -> HandlerOutput {
        info!("blocked toxic content or options");
        HandlerOutput {
            answer: Answer::Refused,
            context: Some(prompt::SAFETY_CONTEXT.to_string()),
            reasoning: None,
        }
    }
}
