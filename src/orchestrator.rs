//! Pipeline orchestration.
//!
//! One question at a time, fully resolved before the next:
//!
//! 1. CLASSIFY: the router picks a route (fast path or model call)
//! 2. DISPATCH: exactly one terminal handler answers
//!    * toxic → safety refusal
//!    * math → code agent
//!    * knowledge → retrieval answerer
//!    * direct → direct answerer
//! 3. RECORD: the per-question state becomes a [`Prediction`]
//!
//! No error escapes a question. A handler failure is logged and the first
//! label is recorded instead.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::agent::{CodeAgent, Termination};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::handlers::{DirectAnswerer, HandlerOutput, RetrievalAnswerer, SafetyHandler};
use crate::llm::LLMClient;
use crate::question::{Answer, PipelineState, Prediction, Question, Route};
use crate::retrieval::{EmptyRetriever, Retriever};
use crate::router::{RouteDecision, Router};
use crate::sandbox::{CodeSandbox, PythonSandbox};

/// Everything recorded while processing one question.
#[derive(Debug, Clone)]
pub struct QuestionResult {
    pub prediction: Prediction,
    pub decision: RouteDecision,
    /// Grounding or explanatory context from the handler
    pub context: Option<String>,
    /// Raw model output of a single-call answerer
    pub reasoning: Option<String>,
    /// How the code agent ended, for math questions
    pub termination: Option<Termination>,
    /// Last code the agent executed
    pub code: Option<String>,
    /// Output of that code
    pub code_output: Option<String>,
    /// Handler error that forced the default answer
    pub error: Option<String>,
    pub elapsed: Duration,
}

/// Terminal handler output plus agent details.
struct Dispatched {
    output: HandlerOutput,
    termination: Option<Termination>,
    code: Option<String>,
    code_output: Option<String>,
}

impl From<HandlerOutput> for Dispatched {
    fn from(output: HandlerOutput) -> Self {
        Self {
            output,
            termination: None,
            code: None,
            code_output: None,
        }
    }
}

/// Summary of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub predictions: Vec<Prediction>,
    pub route_counts: HashMap<Route, usize>,
    /// Questions routed without a model call
    pub fast_path: usize,
    pub refusals: usize,
    /// Questions whose handler failed
    pub failures: usize,
    /// Math questions where the agent ran out of steps
    pub budget_exhausted: usize,
    pub elapsed: Duration,
}

impl BatchReport {
    fn record(&mut self, result: QuestionResult) {
        *self.route_counts.entry(result.decision.route).or_default() += 1;
        if result.decision.is_fast_path() {
            self.fast_path += 1;
        }
        if result.prediction.answer.is_refusal() {
            self.refusals += 1;
        }
        if result.error.is_some() {
            self.failures += 1;
        }
        if result.termination == Some(Termination::BudgetExhausted) {
            self.budget_exhausted += 1;
        }
        self.predictions.push(result.prediction);
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} questions in {:.1}s",
            self.predictions.len(),
            self.elapsed.as_secs_f64()
        )?;
        for route in Route::ALL {
            writeln!(
                f,
                "  {:<10} {}",
                route.as_str(),
                self.route_counts.get(&route).copied().unwrap_or(0)
            )?;
        }
        writeln!(f, "  fast path  {}", self.fast_path)?;
        writeln!(f, "  refused    {}", self.refusals)?;
        writeln!(f, "  exhausted  {}", self.budget_exhausted)?;
        write!(f, "  failed     {}", self.failures)
    }
}

/// The assembled pipeline. Collaborators are injected once and shared by
/// every question.
pub struct Pipeline {
    router: Router,
    agent: CodeAgent,
    retrieval: RetrievalAnswerer,
    direct: DirectAnswerer,
    safety: SafetyHandler,
}

impl Pipeline {
    pub fn builder(client: Arc<dyn LLMClient>) -> PipelineBuilder {
        PipelineBuilder::new(client)
    }

    /// Route and answer one question. Never fails.
    #[instrument(skip(self, question), fields(question_id = question.id()))]
    pub async fn process(&self, question: &Question) -> QuestionResult {
        let start = Instant::now();
        let mut state = PipelineState::new(question);

        let decision = self.router.classify(question).await;
        info!(route = %decision.route, source = ?decision.source, "routed");

        let mut result = QuestionResult {
            prediction: Prediction {
                id: question.id().to_string(),
                answer: Answer::default(),
            },
            decision,
            context: None,
            reasoning: None,
            termination: None,
            code: None,
            code_output: None,
            error: None,
            elapsed: Duration::ZERO,
        };

        let outcome = match state.assign_route(decision.route) {
            Ok(()) => self.dispatch(decision.route, question).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(dispatched) => {
                if let Some(context) = &dispatched.output.context {
                    state.set_context(context.clone());
                }
                if let Err(e) = state.set_answer(dispatched.output.answer) {
                    warn!(error = %e, "answer not recorded");
                }
                result.reasoning = dispatched.output.reasoning;
                result.termination = dispatched.termination;
                result.code = dispatched.code;
                result.code_output = dispatched.code_output;
            }
            Err(e) => {
                warn!(route = %decision.route, error = %e, "handler failed, defaulting to first choice");
                result.error = Some(e.to_string());
            }
        }

        result.context = state.context().map(str::to_string);
        result.prediction = state.into_prediction();
        result.elapsed = start.elapsed();
        info!(answer = %result.prediction.answer, elapsed_ms = result.elapsed.as_millis() as u64, "answered");
        result
    }

    /// Route and answer one question, keeping only the prediction.
    pub async fn predict(&self, question: &Question) -> Prediction {
        self.process(question).await.prediction
    }

    /// Process questions sequentially, in order.
    pub async fn run_batch(&self, questions: &[Question]) -> BatchReport {
        let start = Instant::now();
        let mut report = BatchReport::default();

        for (i, question) in questions.iter().enumerate() {
            info!(index = i + 1, total = questions.len(), id = question.id(), "processing question");
            report.record(self.process(question).await);
        }

        report.elapsed = start.elapsed();
        info!(
            questions = report.predictions.len(),
            failures = report.failures,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "batch complete"
        );
        report
    }

    async fn dispatch(&self, route: Route, question: &Question) -> Result<Dispatched> {
        match route {
            Route::Toxic => Ok(self.safety.answer().into()),
            Route::Math => {
                let outcome = self.agent.solve(question).await;
                Ok(Dispatched {
                    output: HandlerOutput {
                        answer: Answer::Choice(outcome.answer),
                        context: None,
                        reasoning: None,
                    },
                    termination: Some(outcome.termination),
                    code: outcome.last_code,
                    code_output: outcome.last_observation,
                })
            }
            Route::Knowledge => self.retrieval.answer(question).await.map(Into::into),
            Route::Direct => self.direct.answer(question).await.map(Into::into),
        }
    }
}

/// Builder wiring the pipeline's collaborators.
pub struct PipelineBuilder {
    client: Arc<dyn LLMClient>,
    router_client: Option<Arc<dyn LLMClient>>,
    retriever: Option<Arc<dyn Retriever>>,
    sandbox: Option<Arc<dyn CodeSandbox>>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Start from the client used by every model call.
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            router_client: None,
            retriever: None,
            sandbox: None,
            config: PipelineConfig::default(),
        }
    }

    /// Separate client for the routing call.
    pub fn router_client(mut self, client: Arc<dyn LLMClient>) -> Self {
        self.router_client = Some(client);
        self
    }

    /// Passage source for knowledge questions (none by default).
    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Code sandbox for the agent (a Python subprocess by default).
    pub fn sandbox(mut self, sandbox: Arc<dyn CodeSandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Pipeline {
        let PipelineConfig {
            router,
            agent,
            answerer,
            sandbox,
        } = self.config;

        let router_client = self.router_client.unwrap_or_else(|| self.client.clone());
        let retriever = self.retriever.unwrap_or_else(|| Arc::new(EmptyRetriever));
        let sandbox = self
            .sandbox
            .unwrap_or_else(|| Arc::new(PythonSandbox::new(sandbox)));

        Pipeline {
            router: Router::with_config(router_client, router),
            agent: CodeAgent::with_config(self.client.clone(), sandbox, agent),
            retrieval: RetrievalAnswerer::new(self.client.clone(), retriever, answerer.clone()),
            direct: DirectAnswerer::new(self.client, answerer),
            safety: SafetyHandler,
        }
    }
}
