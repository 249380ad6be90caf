//! The agent's fixed tool surface.

use serde_json::json;

use crate::llm::{ToolCall, ToolSpec};
use crate::question::ChoiceLabel;

pub const PYTHON_INTERPRETER: &str = "python_interpreter";
pub const FINAL_ANSWER: &str = "final_answer";

/// A decoded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentTool {
    /// Execute Python code and observe what it prints.
    PythonInterpreter { code: String },
    /// Submit the final answer and end the loop.
    FinalAnswer { answer: String },
}

impl AgentTool {
    /// Decode a model tool call. The error is the observation to send back.
    pub fn from_call(call: &ToolCall) -> Result<Self, String> {
        match call.name.as_str() {
            PYTHON_INTERPRETER => call
                .str_arg("code")
                .map(|code| Self::PythonInterpreter {
                    code: code.to_string(),
                })
                .ok_or_else(|| "Error: missing string argument 'code'.".to_string()),
            FINAL_ANSWER => call
                .str_arg("answer")
                .map(|answer| Self::FinalAnswer {
                    answer: answer.to_string(),
                })
                .ok_or_else(|| "Error: missing string argument 'answer'.".to_string()),
            other => Err(format!(
                "Error: unknown tool '{}'. Available tools: {}, {}.",
                other, PYTHON_INTERPRETER, FINAL_ANSWER
            )),
        }
    }

    /// Declarations for both tools, with the answer restricted to the
    /// question's labels.
    pub fn specs(choice_count: usize) -> Vec<ToolSpec> {
        let labels: Vec<String> = (0..choice_count)
            .filter_map(ChoiceLabel::from_index)
            .map(|l| l.to_string())
            .collect();
        let answer_description = format!("Lựa chọn cuối cùng ({})", labels.join(", "));

        vec![
            ToolSpec::new(
                PYTHON_INTERPRETER,
                "Chạy code Python. Dùng print() để xem kết quả.",
                json!({
                    "type": "object",
                    "properties": {
                        "code": {
                            "type": "string",
                            "description": "Đoạn code Python cần chạy"
                        }
                    },
                    "required": ["code"]
                }),
            ),
            ToolSpec::new(
                FINAL_ANSWER,
                "Nộp đáp án cuối cùng và kết thúc.",
                json!({
                    "type": "object",
                    "properties": {
                        "answer": {
                            "type": "string",
                            "enum": labels,
                            "description": answer_description
                        }
                    },
                    "required": ["answer"]
                }),
            ),
        ]
    }
}

/// Parse a submitted answer: exactly one letter within range.
pub fn parse_submitted_answer(answer: &str, choice_count: usize) -> Option<ChoiceLabel> {
    let answer = answer.trim().trim_end_matches('.');
    let mut chars = answer.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => ChoiceLabel::from_char(c, choice_count),
        _ => None,
    }
}
