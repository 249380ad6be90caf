//! Code agent loop for math and logic questions.
//!
//! The model is asked to compute rather than reason: it writes Python, the
//! sandbox runs it, and the printed output is fed back as an observation.
//! The loop is a small state machine:
//!
//! ```text
//! AwaitingModel --code / tool call--> CodeReceived --observation--> AwaitingModel
//!       |                                   |
//!       +--final answer----> AnswerReceived <--marker in output
//!                                   |
//!                                  Done
//! ```
//!
//! Every model invocation counts against the step budget, including ones
//! that fail or produce neither code nor an answer. On exhaustion the last
//! observation is matched numerically against the choices before falling
//! back to the first label.
//!
//! Two response styles are supported via [`AgentMode`]: native function
//! calling with the `python_interpreter`/`final_answer` tools, and fenced
//! code blocks in plain text. Fenced code is honoured in both modes.

mod code;
mod tools;

pub use code::{ensure_observable_output, extract_code_blocks};
pub use tools::{parse_submitted_answer, AgentTool, FINAL_ANSWER, PYTHON_INTERPRETER};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::answer;
use crate::llm::{ChatMessage, CompletionRequest, CompletionResponse, LLMClient, ToolCall};
use crate::question::{ChoiceLabel, Question};
use crate::sandbox::CodeSandbox;

/// Observation returned when tool-submitted code never prints.
pub const PRINT_REQUIRED: &str = "Error: You must use print() to output the result.";

const TOOL_REMINDER: &str = "Hãy dùng tool python_interpreter hoặc final_answer.";

const FENCE_REMINDER: &str = "Hãy viết code Python trong khối ```python ... ``` và in kết quả bằng print(), hoặc kết thúc bằng dòng \"Đáp án: X\".";

/// How the model is expected to hand over code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Function calling with `python_interpreter` and `final_answer`.
    #[default]
    ToolCalling,
    /// Fenced ```python blocks in plain text, answer via "Đáp án: X".
    CodeFence,
}

/// Configuration for the code agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum model invocations per question
    pub max_steps: usize,
    pub mode: AgentMode,
    /// Model override (client default if unset)
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 3,
            mode: AgentMode::ToolCalling,
            model: None,
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

impl AgentConfig {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// `final_answer` tool call
    FinalAnswerTool,
    /// Answer marker in the model's own text
    TextMarker,
    /// Answer marker printed by executed code
    ObservationMarker,
    /// Budget spent; the last output matched exactly one choice's number
    NumericMatch,
    /// Budget spent with nothing usable; first label returned
    BudgetExhausted,
}

/// Result of one agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: ChoiceLabel,
    pub termination: Termination,
    /// Model invocations used
    pub model_calls: usize,
    /// Code executions performed
    pub code_runs: usize,
    pub last_code: Option<String>,
    pub last_observation: Option<String>,
    /// Conversation after the system instruction
    pub transcript: Vec<ChatMessage>,
}

/// Work extracted from one model turn.
#[derive(Debug)]
enum PendingCall {
    /// Code to run, with the originating tool call if any
    Execute { call: Option<ToolCall>, code: String },
    /// Tool call answered without execution
    Reject { call: ToolCall, observation: String },
}

#[derive(Debug)]
enum AgentState {
    AwaitingModel,
    CodeReceived(Vec<PendingCall>),
    AnswerReceived(ChoiceLabel, Termination),
    Done(ChoiceLabel, Termination),
}

/// Bounded generate-execute-observe solver.
pub struct CodeAgent {
    client: Arc<dyn LLMClient>,
    sandbox: Arc<dyn CodeSandbox>,
    config: AgentConfig,
}

impl CodeAgent {
    pub fn new(client: Arc<dyn LLMClient>, sandbox: Arc<dyn CodeSandbox>) -> Self {
        Self::with_config(client, sandbox, AgentConfig::default())
    }

    pub fn with_config(
        client: Arc<dyn LLMClient>,
        sandbox: Arc<dyn CodeSandbox>,
        mut config: AgentConfig,
    ) -> Self {
        config.max_steps = config.max_steps.max(1);
        Self {
            client,
            sandbox,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Solve a question. Always terminates within the step budget and
    /// always returns a label valid for the question.
    #[instrument(skip(self, question), fields(question_id = question.id(), mode = ?self.config.mode))]
    pub async fn solve(&self, question: &Question) -> AgentOutcome {
        self.sandbox.reset().await;

        let n = question.choice_count();
        let system = system_prompt(self.config.mode, question);
        let mut run = Run {
            messages: vec![ChatMessage::user(question.to_prompt())],
            model_calls: 0,
            code_runs: 0,
            last_code: None,
            last_observation: None,
        };

        let mut state = AgentState::AwaitingModel;
        loop {
            state = match state {
                AgentState::AwaitingModel => {
                    if run.model_calls >= self.config.max_steps {
                        break;
                    }
                    run.model_calls += 1;
                    let step = run.model_calls;

                    match self.client.complete(self.request(&system, &run.messages, n)).await {
                        Ok(response) => self.on_response(response, n, &mut run),
                        Err(e) => {
                            warn!(step, error = %e, "agent generation failed");
                            AgentState::AwaitingModel
                        }
                    }
                }
                AgentState::CodeReceived(calls) => self.execute(calls, n, &mut run).await,
                AgentState::AnswerReceived(label, how) => AgentState::Done(label, how),
                AgentState::Done(label, how) => {
                    info!(answer = %label, termination = ?how, steps = run.model_calls, "agent finished");
                    return run.finish(label, how);
                }
            };
        }

        if let Some(label) = run
            .last_observation
            .as_deref()
            .and_then(printed_output)
            .and_then(|out| answer::match_numeric_choice(out, question))
        {
            info!(answer = %label, "step budget exhausted, answer matched from last output");
            return run.finish(label, Termination::NumericMatch);
        }

        warn!(steps = run.model_calls, "step budget exhausted, defaulting to first choice");
        run.finish(ChoiceLabel::FIRST, Termination::BudgetExhausted)
    }

    fn request(&self, system: &str, messages: &[ChatMessage], n: usize) -> CompletionRequest {
        let request = CompletionRequest::new()
            .with_model_opt(self.config.model.as_deref())
            .with_system(system)
            .with_messages(messages.to_vec())
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        match self.config.mode {
            AgentMode::ToolCalling => request.with_tools(AgentTool::specs(n)),
            AgentMode::CodeFence => request,
        }
    }

    /// AwaitingModel transition on a model response.
    fn on_response(&self, response: CompletionResponse, n: usize, run: &mut Run) -> AgentState {
        let content = response.content;
        let mut pending = Vec::new();
        let mut final_answer = None;

        for call in &response.tool_calls {
            match AgentTool::from_call(call) {
                Ok(AgentTool::FinalAnswer { answer }) => {
                    match parse_submitted_answer(&answer, n) {
                        Some(label) if final_answer.is_none() => final_answer = Some(label),
                        Some(_) => {}
                        None => pending.push(PendingCall::Reject {
                            call: call.clone(),
                            observation: format!(
                                "Error: '{}' is not a valid choice. Answer with one of: {}.",
                                answer,
                                label_list(n)
                            ),
                        }),
                    }
                }
                Ok(AgentTool::PythonInterpreter { code }) => {
                    if code.contains("print(") {
                        pending.push(PendingCall::Execute {
                            call: Some(call.clone()),
                            code,
                        });
                    } else {
                        pending.push(PendingCall::Reject {
                            call: call.clone(),
                            observation: PRINT_REQUIRED.to_string(),
                        });
                    }
                }
                Err(observation) => pending.push(PendingCall::Reject {
                    call: call.clone(),
                    observation,
                }),
            }
        }

        if response.tool_calls.is_empty() {
            run.messages.push(ChatMessage::assistant(content.clone()));
        } else {
            run.messages.push(ChatMessage::assistant_with_tools(
                content.clone(),
                response.tool_calls.clone(),
            ));
        }

        if let Some(label) = final_answer {
            return AgentState::AnswerReceived(label, Termination::FinalAnswerTool);
        }

        if response.tool_calls.is_empty() {
            if let Some(code) = extract_code_blocks(&content) {
                let code = ensure_observable_output(&code).into_owned();
                return AgentState::CodeReceived(vec![PendingCall::Execute { call: None, code }]);
            }
        }

        let executes = pending
            .iter()
            .any(|p| matches!(p, PendingCall::Execute { .. }));
        if !executes {
            if let Some(label) = answer::find_marker(&content, n) {
                return AgentState::AnswerReceived(label, Termination::TextMarker);
            }
        }

        if !pending.is_empty() {
            return AgentState::CodeReceived(pending);
        }

        debug!(step = run.model_calls, "no code and no answer, sending reminder");
        run.messages.push(ChatMessage::user(match self.config.mode {
            AgentMode::ToolCalling => TOOL_REMINDER,
            AgentMode::CodeFence => FENCE_REMINDER,
        }));
        AgentState::AwaitingModel
    }

    /// CodeReceived transition: run code, record observations.
    async fn execute(&self, calls: Vec<PendingCall>, n: usize, run: &mut Run) -> AgentState {
        let mut marker = None;

        for pending in calls {
            match pending {
                PendingCall::Execute { call, code } => {
                    debug!(step = run.model_calls, %code, "executing code");
                    let observation = self.sandbox.run(&code).await;
                    debug!(step = run.model_calls, %observation, "observation");
                    run.code_runs += 1;

                    if marker.is_none() {
                        marker = answer::find_marker(&observation, n);
                    }
                    run.messages.push(match &call {
                        Some(call) => ChatMessage::tool_result(call, observation.clone()),
                        None => ChatMessage::user(format!("Kết quả chạy code:\n{}", observation)),
                    });
                    run.last_code = Some(code);
                    run.last_observation = Some(observation);
                }
                PendingCall::Reject { call, observation } => {
                    debug!(step = run.model_calls, tool = %call.name, %observation, "tool call rejected");
                    run.messages.push(ChatMessage::tool_result(&call, observation));
                }
            }
        }

        match marker {
            Some(label) => AgentState::AnswerReceived(label, Termination::ObservationMarker),
            None => AgentState::AwaitingModel,
        }
    }
}

/// Mutable bookkeeping for one run.
struct Run {
    messages: Vec<ChatMessage>,
    model_calls: usize,
    code_runs: usize,
    last_code: Option<String>,
    last_observation: Option<String>,
}

impl Run {
    fn finish(self, answer: ChoiceLabel, termination: Termination) -> AgentOutcome {
        AgentOutcome {
            answer,
            termination,
            model_calls: self.model_calls,
            code_runs: self.code_runs,
            last_code: self.last_code,
            last_observation: self.last_observation,
            transcript: self.messages,
        }
    }
}

/// Stdout part of a sandbox observation, without the trailing `Error:` line.
/// `None` when nothing was printed before the error.
fn printed_output(observation: &str) -> Option<&str> {
    if observation.starts_with("Error") {
        return None;
    }
    let stdout = observation
        .split_once("\nError:")
        .map_or(observation, |(stdout, _)| stdout);
    Some(stdout)
}

fn label_list(n: usize) -> String {
    (0..n)
        .filter_map(ChoiceLabel::from_index)
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn system_prompt(mode: AgentMode, question: &Question) -> String {
    let labels = label_list(question.choice_count());
    match mode {
        AgentMode::ToolCalling => format!(
            "Bạn là chuyên gia giải toán và logic bằng Python (Python Code Agent).

QUY TRÌNH:
1. Đọc câu hỏi và các lựa chọn.
2. Gọi tool `python_interpreter` với code Python để TÍNH TOÁN đáp án (dùng `print` để in kết quả).
3. Dựa vào kết quả chạy code, chọn đáp án đúng nhất ({labels}).
4. Gọi tool `final_answer` ngay lập tức để trả về kết quả.

QUY TẮC:
- KHÔNG tính nhẩm. Phải dùng code để tính toán.
- Code ngắn gọn, trực diện.
- Trả lời dứt khoát."
        ),
        AgentMode::CodeFence => format!(
            "Bạn là chuyên gia giải toán và logic bằng Python.

QUY TRÌNH:
1. Đọc câu hỏi và các lựa chọn.
2. Viết code Python trong một khối ```python ... ``` để TÍNH TOÁN đáp án, dùng `print` để in kết quả. Hệ thống sẽ chạy code và gửi lại kết quả.
3. Dựa vào kết quả chạy code, chọn đáp án đúng nhất ({labels}).
4. Kết thúc bằng dòng: \"Đáp án: X\".

QUY TẮC:
- KHÔNG tính nhẩm. Phải dùng code để tính toán.
- Không viết dòng \"Đáp án\" trong cùng lượt với code, hãy chờ kết quả chạy code."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::llm::ChatRole;
    use crate::test_support::{text, tool_call, ScriptedClient, ScriptedSandbox};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const DOGS_CODE: &str = "dogs = (100 - 2 * 36) / 2\nprint(dogs)";

    fn farm_question() -> Question {
        Question::new(
            "farm",
            "Một trang trại có 36 đầu và 100 chân (gà và chó). Có bao nhiêu con chó?",
            vec!["12".into(), "14".into(), "22".into(), "16".into()],
        )
        .unwrap()
    }

    fn agent(
        script: Vec<crate::error::Result<CompletionResponse>>,
        outputs: &[&str],
        config: AgentConfig,
    ) -> (CodeAgent, Arc<ScriptedClient>, Arc<ScriptedSandbox>) {
        let client = Arc::new(ScriptedClient::new(script));
        let sandbox = Arc::new(ScriptedSandbox::new(outputs.iter().copied()));
        let agent = CodeAgent::with_config(client.clone(), sandbox.clone(), config);
        (agent, client, sandbox)
    }

    #[tokio::test]
    async fn test_tool_calling_end_to_end() {
        let (agent, client, sandbox) = agent(
            vec![
                Ok(tool_call(PYTHON_INTERPRETER, json!({ "code": DOGS_CODE }))),
                Ok(tool_call(FINAL_ANSWER, json!({ "answer": "B" }))),
            ],
            &["14.0"],
            AgentConfig::default(),
        );

        let outcome = agent.solve(&farm_question()).await;

        assert_eq!(outcome.answer.as_char(), 'B');
        assert_eq!(outcome.termination, Termination::FinalAnswerTool);
        assert_eq!(outcome.model_calls, 2);
        assert_eq!(outcome.code_runs, 1);
        assert_eq!(sandbox.codes(), vec![DOGS_CODE.to_string()]);
        assert_eq!(sandbox.resets(), 1);

        let requests = client.requests();
        assert_eq!(requests[0].tools.len(), 2);
        let observation = requests[1].messages.last().unwrap();
        assert_eq!(observation.role, ChatRole::Tool);
        assert_eq!(observation.content, "14.0");
        assert_eq!(observation.tool_call_id.as_deref(), Some("call_python_interpreter"));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_without_code_or_answer() {
        let (agent, client, sandbox) = agent(
            vec![
                Ok(text("Để tôi suy nghĩ.")),
                Ok(text("Có thể là số chó.")),
                Ok(text("Tôi chưa chắc.")),
                Ok(text("Đáp án: D")),
            ],
            &[],
            AgentConfig::default(),
        );

        let outcome = agent.solve(&farm_question()).await;

        assert_eq!(outcome.answer, ChoiceLabel::FIRST);
        assert_eq!(outcome.termination, Termination::BudgetExhausted);
        assert_eq!(outcome.model_calls, 3);
        assert_eq!(client.requests().len(), 3);
        assert!(sandbox.codes().is_empty());

        let reminder = client.requests()[1].messages.last().unwrap().clone();
        assert_eq!(reminder.role, ChatRole::User);
        assert_eq!(reminder.content, TOOL_REMINDER);
    }

    #[tokio::test]
    async fn test_generation_errors_consume_budget() {
        let (agent, client, _) = agent(
            vec![
                Err(Error::LLM("quota".into())),
                Err(Error::LLM("quota".into())),
            ],
            &[],
            AgentConfig::default().with_max_steps(2),
        );

        let outcome = agent.solve(&farm_question()).await;
        assert_eq!(outcome.termination, Termination::BudgetExhausted);
        assert_eq!(outcome.model_calls, 2);
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_falls_back_to_numeric_match() {
        let (agent, _, _) = agent(
            vec![
                Ok(tool_call(PYTHON_INTERPRETER, json!({ "code": DOGS_CODE }))),
                Ok(text("Kết quả là 14 con chó.")),
                Ok(text("Vậy có 14 con chó.")),
            ],
            &["14.0"],
            AgentConfig::default(),
        );

        let outcome = agent.solve(&farm_question()).await;
        assert_eq!(outcome.answer.as_char(), 'B');
        assert_eq!(outcome.termination, Termination::NumericMatch);
        assert_eq!(outcome.last_observation.as_deref(), Some("14.0"));
    }

    #[tokio::test]
    async fn test_exhaustion_ignores_numbers_in_error_text() {
        let (agent, _, _) = agent(
            vec![
                Ok(tool_call(PYTHON_INTERPRETER, json!({ "code": DOGS_CODE }))),
                Ok(text("Để tôi thử lại.")),
                Ok(text("Vẫn chưa rõ.")),
            ],
            &["Bắt đầu\nError: IndexError: index 14 is out of range"],
            AgentConfig::default(),
        );

        let outcome = agent.solve(&farm_question()).await;
        assert_eq!(outcome.answer, ChoiceLabel::FIRST);
        assert_eq!(outcome.termination, Termination::BudgetExhausted);
    }

    #[test]
    fn test_printed_output_drops_error_tail() {
        assert_eq!(printed_output("14.0"), Some("14.0"));
        assert_eq!(printed_output("12\nError: ZeroDivisionError: division by zero"), Some("12"));
        assert_eq!(printed_output("Error: NameError: name 'x' is not defined"), None);
    }

    #[tokio::test]
    async fn test_zero_step_budget_is_raised_to_one() {
        let config: AgentConfig = serde_json::from_str(r#"{"max_steps": 0}"#).unwrap();
        let (agent, client, _) = agent(vec![Ok(text("Đáp án: B"))], &[], config);

        assert_eq!(agent.config().max_steps, 1);
        let outcome = agent.solve(&farm_question()).await;
        assert_eq!(outcome.answer.as_char(), 'B');
        assert_eq!(outcome.termination, Termination::TextMarker);
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_print_policy_blocks_execution() {
        let (agent, client, sandbox) = agent(
            vec![
                Ok(tool_call(PYTHON_INTERPRETER, json!({ "code": "dogs = 14" }))),
                Ok(tool_call(FINAL_ANSWER, json!({ "answer": "b" }))),
            ],
            &[],
            AgentConfig::default(),
        );

        let outcome = agent.solve(&farm_question()).await;
        assert_eq!(outcome.answer.as_char(), 'B');
        assert!(sandbox.codes().is_empty());
        assert_eq!(outcome.code_runs, 0);

        let observation = client.requests()[1].messages.last().unwrap().clone();
        assert_eq!(observation.content, PRINT_REQUIRED);
    }

    #[tokio::test]
    async fn test_out_of_range_final_answer_continues() {
        let (agent, client, _) = agent(
            vec![
                Ok(tool_call(FINAL_ANSWER, json!({ "answer": "E" }))),
                Ok(tool_call(FINAL_ANSWER, json!({ "answer": "C" }))),
            ],
            &[],
            AgentConfig::default(),
        );

        let outcome = agent.solve(&farm_question()).await;
        assert_eq!(outcome.answer.as_char(), 'C');
        assert_eq!(outcome.model_calls, 2);

        let observation = client.requests()[1].messages.last().unwrap().clone();
        assert_eq!(observation.role, ChatRole::Tool);
        assert!(observation.content.contains("'E' is not a valid choice"));
        assert!(observation.content.contains("A, B, C, D"));
    }

    #[tokio::test]
    async fn test_text_marker_ends_loop() {
        let (agent, _, _) = agent(vec![Ok(text("Tính ra 14 con.\nĐáp án: B"))], &[], AgentConfig::default());

        let outcome = agent.solve(&farm_question()).await;
        assert_eq!(outcome.answer.as_char(), 'B');
        assert_eq!(outcome.termination, Termination::TextMarker);
        assert_eq!(outcome.model_calls, 1);
    }

    #[tokio::test]
    async fn test_code_fence_mode() {
        let config = AgentConfig::default().with_mode(AgentMode::CodeFence);
        let (agent, client, sandbox) = agent(
            vec![
                // Code wins over the premature marker in the same turn.
                Ok(text("```python\ndogs = (100 - 2 * 36) / 2\n```\nĐáp án: A")),
                Ok(text("Kết quả là 14.\nĐáp án: B")),
            ],
            &["14.0"],
            config,
        );

        let outcome = agent.solve(&farm_question()).await;

        assert_eq!(outcome.answer.as_char(), 'B');
        assert_eq!(outcome.termination, Termination::TextMarker);
        assert_eq!(
            sandbox.codes(),
            vec!["dogs = (100 - 2 * 36) / 2\nprint(dogs)".to_string()]
        );

        let requests = client.requests();
        assert!(requests[0].tools.is_empty());
        let observation = requests[1].messages.last().unwrap();
        assert_eq!(observation.role, ChatRole::User);
        assert_eq!(observation.content, "Kết quả chạy code:\n14.0");
    }

    #[tokio::test]
    async fn test_marker_in_observation_ends_loop() {
        let config = AgentConfig::default().with_mode(AgentMode::CodeFence);
        let (agent, client, _) = agent(
            vec![Ok(text("```python\nprint('Đáp án: C')\n```"))],
            &["Đáp án: C"],
            config,
        );

        let outcome = agent.solve(&farm_question()).await;
        assert_eq!(outcome.answer.as_char(), 'C');
        assert_eq!(outcome.termination, Termination::ObservationMarker);
        assert_eq!(client.requests().len(), 1);
    }

    #[test]
    fn test_config_from_json() {
        let config: AgentConfig = serde_json::from_str(r#"{"max_steps": 5, "mode": "code_fence"}"#).unwrap();
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.mode, AgentMode::CodeFence);
        assert_eq!(config.temperature, 0.0);
    }
}
