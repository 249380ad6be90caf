//! Questions, routes, answers and the per-question pipeline state.
//!
//! A [`Question`] is immutable once constructed and always carries between 2
//! and 26 non-empty choices, positionally mapped to labels `A..Z`. A
//! [`PipelineState`] is created fresh for each question and filled in by the
//! router and exactly one terminal handler.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Maximum number of choices a question may carry (one per Latin letter).
pub const MAX_CHOICES: usize = 26;

/// Minimum number of choices a question must carry.
pub const MIN_CHOICES: usize = 2;

/// Sentinel answer recorded when the system refuses to answer.
pub const REFUSAL_ANSWER: &str = "Từ chối trả lời";

/// Uppercase label identifying one choice of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChoiceLabel(u8);

impl ChoiceLabel {
    /// The first label, `A`. Used as the deterministic default answer.
    pub const FIRST: ChoiceLabel = ChoiceLabel(0);

    /// Label for a zero-based choice index.
    pub fn from_index(index: usize) -> Option<Self> {
        (index < MAX_CHOICES).then(|| Self(index as u8))
    }

    /// Parse a letter (either case) if it falls within the first
    /// `max_choices` labels.
    pub fn from_char(c: char, max_choices: usize) -> Option<Self> {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let index = (c.to_ascii_uppercase() as u8 - b'A') as usize;
        (index < max_choices.min(MAX_CHOICES)).then(|| Self(index as u8))
    }

    /// Zero-based index of this label.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// The uppercase letter for this label.
    pub fn as_char(self) -> char {
        (b'A' + self.0) as char
    }
}

impl fmt::Display for ChoiceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A multiple-choice question.
///
/// Only constructible through [`Question::new`], so every instance satisfies
/// the choice-count invariants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    id: String,
    text: String,
    choices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
}

impl Question {
    /// Create a validated question.
    ///
    /// Choices must be non-empty after trimming and there must be between
    /// [`MIN_CHOICES`] and [`MAX_CHOICES`] of them.
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        choices: Vec<String>,
    ) -> Result<Self> {
        let id = id.into();
        let text = text.into();

        if id.trim().is_empty() {
            return Err(Error::invalid_question("<blank>", "identifier is empty"));
        }
        if text.trim().is_empty() {
            return Err(Error::invalid_question(&id, "question text is empty"));
        }
        if choices.len() < MIN_CHOICES || choices.len() > MAX_CHOICES {
            return Err(Error::invalid_question(
                &id,
                format!(
                    "expected {}-{} choices, got {}",
                    MIN_CHOICES,
                    MAX_CHOICES,
                    choices.len()
                ),
            ));
        }
        if let Some(pos) = choices.iter().position(|c| c.trim().is_empty()) {
            let label = ChoiceLabel::from_index(pos).unwrap_or(ChoiceLabel::FIRST);
            return Err(Error::invalid_question(
                &id,
                format!("choice {} is empty", label),
            ));
        }

        Ok(Self {
            id,
            text,
            choices,
            category: None,
        })
    }

    /// Attach a category tag.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        let category = category.into();
        self.category = (!category.trim().is_empty()).then_some(category);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    /// Number of choices, which bounds the valid label alphabet.
    pub fn choice_count(&self) -> usize {
        self.choices.len()
    }

    /// All valid labels for this question in order.
    pub fn labels(&self) -> impl Iterator<Item = ChoiceLabel> + '_ {
        (0..self.choices.len()).filter_map(ChoiceLabel::from_index)
    }

    /// Text of the choice behind `label`, if it exists.
    pub fn choice(&self, label: ChoiceLabel) -> Option<&str> {
        self.choices.get(label.index()).map(String::as_str)
    }

    /// Render the choices as `A. ...` lines.
    pub fn format_choices(&self) -> String {
        self.labels()
            .zip(&self.choices)
            .map(|(label, choice)| format!("{}. {}", label, choice))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Render the question and its choices as a user prompt.
    pub fn to_prompt(&self) -> String {
        format!("Câu hỏi: {}\n{}", self.text, self.format_choices())
    }

    /// Number of whitespace-separated words in the question text.
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Category assigned by the router, selecting the terminal handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Unlawful or harmful content; refused without a model call.
    Toxic,
    /// Calculation or logic; solved by the code agent.
    Math,
    /// General knowledge; answered from retrieved passages.
    Knowledge,
    /// Self-contained reading comprehension; answered directly.
    Direct,
}

impl Route {
    pub const ALL: [Route; 4] = [Route::Toxic, Route::Math, Route::Knowledge, Route::Direct];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Toxic => "toxic",
            Self::Math => "math",
            Self::Knowledge => "knowledge",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "toxic" => Ok(Self::Toxic),
            "math" => Ok(Self::Math),
            "knowledge" => Ok(Self::Knowledge),
            "direct" => Ok(Self::Direct),
            other => Err(Error::Config(format!("unknown route '{}'", other))),
        }
    }
}

/// Canonical answer: a choice label or the refusal sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Answer {
    Choice(ChoiceLabel),
    Refused,
}

impl Answer {
    pub fn is_refusal(&self) -> bool {
        matches!(self, Self::Refused)
    }

    pub fn label(&self) -> Option<ChoiceLabel> {
        match self {
            Self::Choice(label) => Some(*label),
            Self::Refused => None,
        }
    }
}

impl Default for Answer {
    fn default() -> Self {
        Self::Choice(ChoiceLabel::FIRST)
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Choice(label) => write!(f, "{}", label),
            Self::Refused => f.write_str(REFUSAL_ANSWER),
        }
    }
}

impl Serialize for Answer {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// The single output record for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prediction {
    pub id: String,
    pub answer: Answer,
}

/// Mutable record threaded through one question's processing.
///
/// The route is assigned at most once, context only by the retrieval
/// handler, and the answer by exactly one terminal handler.
#[derive(Debug, Clone)]
pub struct PipelineState<'q> {
    question: &'q Question,
    route: Option<Route>,
    context: Option<String>,
    answer: Option<Answer>,
}

impl<'q> PipelineState<'q> {
    pub fn new(question: &'q Question) -> Self {
        Self {
            question,
            route: None,
            context: None,
            answer: None,
        }
    }

    pub fn question(&self) -> &'q Question {
        self.question
    }

    pub fn route(&self) -> Option<Route> {
        self.route
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn answer(&self) -> Option<Answer> {
        self.answer
    }

    /// Record the routing decision. Fails if a route was already assigned.
    pub fn assign_route(&mut self, route: Route) -> Result<()> {
        if let Some(existing) = self.route {
            return Err(Error::InvalidState(format!(
                "question {} already routed to {}",
                self.question.id(),
                existing
            )));
        }
        self.route = Some(route);
        Ok(())
    }

    /// Record grounding or explanatory context produced by a handler.
    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = Some(context.into());
    }

    /// Record the terminal answer. Fails if an answer was already recorded.
    pub fn set_answer(&mut self, answer: Answer) -> Result<()> {
        if self.answer.is_some() {
            return Err(Error::InvalidState(format!(
                "question {} already answered",
                self.question.id()
            )));
        }
        self.answer = Some(answer);
        Ok(())
    }

    /// Produce the prediction, defaulting to the first label if no handler
    /// recorded an answer.
    pub fn into_prediction(self) -> Prediction {
        Prediction {
            id: self.question.id().to_string(),
            answer: self.answer.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn choices(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_choice_label_bounds() {
        assert_eq!(ChoiceLabel::from_char('b', 4), ChoiceLabel::from_index(1));
        assert_eq!(ChoiceLabel::from_char('E', 4), None);
        assert_eq!(ChoiceLabel::from_char('Z', 26).map(|l| l.as_char()), Some('Z'));
        assert_eq!(ChoiceLabel::from_char('Đ', 26), None);
        assert_eq!(ChoiceLabel::from_index(26), None);
        assert_eq!(ChoiceLabel::FIRST.to_string(), "A");
    }

    #[test]
    fn test_question_validation() {
        assert!(Question::new("q1", "1 + 1 = ?", choices(&["2", "3"])).is_ok());

        let err = Question::new("q2", "?", choices(&["only"])).unwrap_err();
        assert!(err.to_string().contains("expected 2-26 choices, got 1"));

        let err = Question::new("q3", "?", choices(&["a", "  "])).unwrap_err();
        assert!(err.to_string().contains("choice B is empty"));

        let many: Vec<String> = (0..27).map(|i| i.to_string()).collect();
        assert!(Question::new("q4", "?", many).is_err());

        assert!(Question::new(" ", "?", choices(&["a", "b"])).is_err());
    }

    #[test]
    fn test_question_prompt_formatting() {
        let q = Question::new("q1", "Thủ đô của Việt Nam?", choices(&["Hà Nội", "Huế", "Đà Nẵng"]))
            .unwrap()
            .with_category("geo");

        assert_eq!(q.format_choices(), "A. Hà Nội\nB. Huế\nC. Đà Nẵng");
        assert_eq!(
            q.to_prompt(),
            "Câu hỏi: Thủ đô của Việt Nam?\nA. Hà Nội\nB. Huế\nC. Đà Nẵng"
        );
        assert_eq!(q.category(), Some("geo"));
        assert_eq!(q.labels().map(|l| l.as_char()).collect::<String>(), "ABC");
    }

    #[test]
    fn test_route_parse_and_display() {
        for route in Route::ALL {
            assert_eq!(route.to_string().parse::<Route>().unwrap(), route);
        }
        assert!("unknown".parse::<Route>().is_err());
    }

    #[test]
    fn test_pipeline_state_transitions() {
        let q = Question::new("q1", "?", choices(&["a", "b"])).unwrap();
        let mut state = PipelineState::new(&q);

        state.assign_route(Route::Knowledge).unwrap();
        assert!(state.assign_route(Route::Math).is_err());
        assert_eq!(state.route(), Some(Route::Knowledge));

        state.set_context("passage");
        state
            .set_answer(Answer::Choice(ChoiceLabel::from_index(1).unwrap()))
            .unwrap();
        assert!(state.set_answer(Answer::Refused).is_err());

        let prediction = state.into_prediction();
        assert_eq!(prediction.id, "q1");
        assert_eq!(prediction.answer.to_string(), "B");
    }

    #[test]
    fn test_prediction_defaults_to_first_label() {
        let q = Question::new("q1", "?", choices(&["a", "b"])).unwrap();
        let prediction = PipelineState::new(&q).into_prediction();
        assert_eq!(prediction.answer, Answer::Choice(ChoiceLabel::FIRST));
    }

    #[test]
    fn test_answer_serializes_as_string() {
        let prediction = Prediction {
            id: "q9".to_string(),
            answer: Answer::Refused,
        };
        let json = serde_json::to_string(&prediction).unwrap();
        assert_eq!(json, r#"{"id":"q9","answer":"Từ chối trả lời"}"#);
    }
}
