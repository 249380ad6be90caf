//! Question routing.
//!
//! Layered classification, each layer short-circuiting the next:
//!
//! 1. Context-block fast path: a "refer to the passage" phrase in a long
//!    question routes to [`Route::Direct`]
//! 2. Math-signal fast path: formula markers or inline arithmetic route to
//!    [`Route::Math`]
//! 3. Model fallback: one zero-temperature classification call
//!
//! A failed model call routes to [`Route::Knowledge`]. The trigger lists and
//! thresholds live in [`RouterConfig`] so they can be tuned without code
//! changes; the layer order itself is fixed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, instrument, warn};

use crate::llm::{ChatMessage, CompletionRequest, LLMClient};
use crate::question::{Question, Route};

/// Digit, arithmetic operator, digit (or opening bracket/unknown).
/// `-` and `/` are left out since they also appear in year ranges and dates.
static INLINE_ARITHMETIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d\s*[+×÷*^=]\s*[\d(x]").expect("invalid regex"));

const ROUTER_SYSTEM_PROMPT: &str = r#"Nhiệm vụ: Phân loại câu hỏi trắc nghiệm vào đúng 1 trong 4 nhóm:

1. "toxic":
   - Nội dung vi phạm pháp luật Việt Nam (cờ bạc, ma túy, mại dâm).
   - Nội dung phản động, xuyên tạc lịch sử, chính trị nhạy cảm.
   - Hướng dẫn gây hại (chế tạo vũ khí, tự tử, bạo lực).
   - Ngôn từ thù ghét, phân biệt vùng miền, xúc phạm danh nhân.
   - Xét cả câu hỏi VÀ tất cả các lựa chọn: chỉ cần một lựa chọn chứa nội dung trên thì xếp vào "toxic".

2. "math":
   - Các bài toán đố, tính toán số học, hình học, xác suất.
   - Các câu hỏi cần lập luận, logic, tìm quy luật.

3. "direct":
   - Câu hỏi đọc hiểu có kèm đoạn văn, chỉ cần suy luận từ chính đoạn văn đó.

4. "knowledge":
   - Kiến thức Lịch sử, Địa lý, Văn hóa, Xã hội, Pháp luật.
   - Định nghĩa khái niệm, kiến thức khoa học thường thức (không tính toán).

CHÚ Ý: Nếu câu hỏi mang tính giáo dục, điều luật, tình huống (ví dụ: "Tác hại của ma túy là gì?"), hãy xếp vào "knowledge". Chỉ xếp vào "toxic" nếu nội dung cổ xúy hoặc hướng dẫn làm điều xấu.

Chỉ trả về đúng 1 từ: toxic, math, direct hoặc knowledge."#;

/// Tunable routing heuristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Lowercase phrases pointing the reader at an inline passage
    pub context_triggers: Vec<String>,
    /// Minimum question length in words for the context fast path
    pub context_min_words: usize,
    /// Lowercase markers of a calculation question
    pub math_markers: Vec<String>,
    /// Also treat inline arithmetic such as `12 + 7` as a math signal
    pub detect_inline_arithmetic: bool,
    /// Model for the classification call (client default if unset)
    pub model: Option<String>,
    pub max_tokens: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            context_triggers: strings(&[
                "đoạn văn",
                "đoạn thông tin",
                "đoạn trích",
                "văn bản trên",
                "văn bản sau",
                "bài đọc",
                "theo đoạn",
                "dựa vào đoạn",
                "dựa vào văn bản",
                "thông tin trên",
                "ngữ cảnh",
            ]),
            context_min_words: 50,
            math_markers: strings(&[
                "\\frac",
                "\\sqrt",
                "\\sum",
                "\\int",
                "phương trình",
                "xác suất",
                "vận tốc",
                "lãi suất",
                "lãi kép",
                "tính giá trị",
                "bao nhiêu tiền",
                "đạo hàm",
                "tích phân",
                "diện tích",
                "chu vi",
                "thể tích",
                "trung bình cộng",
                "%",
            ]),
            detect_inline_arithmetic: true,
            model: None,
            max_tokens: 16,
        }
    }
}

/// Which layer produced a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    ContextFastPath,
    MathFastPath,
    Model,
    /// The model call failed
    Fallback,
}

/// A route plus the layer that chose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub route: Route,
    pub source: RouteSource,
}

impl RouteDecision {
    fn new(route: Route, source: RouteSource) -> Self {
        Self { route, source }
    }

    /// Whether the decision was made without a model call.
    pub fn is_fast_path(&self) -> bool {
        matches!(
            self.source,
            RouteSource::ContextFastPath | RouteSource::MathFastPath
        )
    }
}

/// Classifies questions into routes.
pub struct Router {
    client: Arc<dyn LLMClient>,
    config: RouterConfig,
}

impl Router {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self::with_config(client, RouterConfig::default())
    }

    /// Keyword lists are lowercased here; questions are matched in lowercase.
    pub fn with_config(client: Arc<dyn LLMClient>, mut config: RouterConfig) -> Self {
        for phrase in config
            .context_triggers
            .iter_mut()
            .chain(config.math_markers.iter_mut())
        {
            *phrase = phrase.to_lowercase();
        }
        Self { client, config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Heuristic layers only. `None` means the model has to decide.
    pub fn fast_path(&self, question: &Question) -> Option<RouteDecision> {
        let text = question.text().to_lowercase();

        let has_trigger = self
            .config
            .context_triggers
            .iter()
            .any(|t| text.contains(t.as_str()));
        if has_trigger && question.word_count() > self.config.context_min_words {
            return Some(RouteDecision::new(Route::Direct, RouteSource::ContextFastPath));
        }

        let has_marker = self
            .config
            .math_markers
            .iter()
            .any(|m| text.contains(m.as_str()));
        if has_marker
            || (self.config.detect_inline_arithmetic && INLINE_ARITHMETIC.is_match(&text))
        {
            return Some(RouteDecision::new(Route::Math, RouteSource::MathFastPath));
        }

        None
    }

    /// Classify a question. Never fails.
    #[instrument(skip(self, question), fields(question_id = question.id()))]
    pub async fn classify(&self, question: &Question) -> RouteDecision {
        if let Some(decision) = self.fast_path(question) {
            debug!(route = %decision.route, source = ?decision.source, "fast path");
            return decision;
        }

        let request = CompletionRequest::new()
            .with_model_opt(self.config.model.as_deref())
            .with_system(ROUTER_SYSTEM_PROMPT)
            .with_message(ChatMessage::user(format!("{}\n\nNhóm:", question.to_prompt())))
            .with_temperature(0.0)
            .with_max_tokens(self.config.max_tokens);

        match self.client.complete(request).await {
            Ok(response) => {
                let route = parse_route_label(&response.content);
                info!(%route, raw = response.content.trim(), "model route");
                RouteDecision::new(route, RouteSource::Model)
            }
            Err(e) => {
                warn!(error = %e, "routing call failed, defaulting to knowledge");
                RouteDecision::new(Route::Knowledge, RouteSource::Fallback)
            }
        }
    }
}

/// Map the classifier's free-form reply onto a route.
///
/// Checked in order: toxic (or a harm synonym), math/logic, direct, and
/// knowledge for anything else.
pub fn parse_route_label(text: &str) -> Route {
    let text = text.to_lowercase();
    let contains_any = |words: &[&str]| words.iter().any(|w| text.contains(w));

    if contains_any(&["toxic", "danger", "harmful", "độc hại", "nguy hiểm"]) {
        Route::Toxic
    } else if contains_any(&["math", "logic"]) {
        Route::Math
    } else if contains_any(&["direct"]) {
        Route::Direct
    } else {
        Route::Knowledge
    }
}
