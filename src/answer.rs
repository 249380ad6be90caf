//! Answer extraction from free-form model output.
//!
//! [`extract`] is a total function: whatever the model wrote, it yields a
//! label within the question's valid alphabet. Rules in priority order:
//!
//! 1. The first explicit marker (`Đáp án: X`, `Answer: X`, `Lựa chọn: X`),
//!    if its letter is in range
//! 2. The whole trimmed text is a single valid letter
//! 3. Scanning from the end, the first standalone uppercase valid letter,
//!    then the first uppercase valid letter at all
//! 4. `A`
//!
//! Letters outside the first `max_choices` labels never match, so a stray
//! `E` in the reasoning of a four-choice question falls through.

use crate::question::{ChoiceLabel, Question, REFUSAL_ANSWER};
use regex::Regex;
use std::sync::LazyLock;

static ANSWER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:đáp\s*án|answer|lựa\s*chọn)(?:\s+(?:đúng|cuối\s+cùng|chính\s+xác|là|is))*[:\s*]+([a-z])\b",
    )
    .expect("invalid regex")
});

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:[.,]\d+)*").expect("invalid regex"));

static GROUPED_THOUSANDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d{1,3}(?:[.,]\d{3})+$").expect("invalid regex"));

/// Extract a canonical label from `text` for a question with `max_choices`
/// choices. Never fails; defaults to `A`.
pub fn extract(text: &str, max_choices: usize) -> ChoiceLabel {
    let max_choices = max_choices.clamp(1, crate::question::MAX_CHOICES);

    if let Some(label) = find_marker(text, max_choices) {
        return label;
    }

    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(label) = ChoiceLabel::from_char(c, max_choices) {
            return label;
        }
    }

    scan_from_end(trimmed, max_choices).unwrap_or(ChoiceLabel::FIRST)
}

/// Find the first explicit answer marker and return its letter if it is
/// within range.
///
/// Later markers are never consulted: "Lựa chọn A" after the stated answer
/// is prose about another option. Returns `None` when there is no marker or
/// the first one is out of range. Used by the code agent to decide whether a
/// turn is final.
pub fn find_marker(text: &str, max_choices: usize) -> Option<ChoiceLabel> {
    ANSWER_MARKER
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().chars().next())
        .and_then(|c| ChoiceLabel::from_char(c, max_choices))
}

/// Whether the text is a refusal without any explicit answer marker.
pub fn is_refusal(text: &str, max_choices: usize) -> bool {
    text.to_lowercase().contains(&REFUSAL_ANSWER.to_lowercase())
        && find_marker(text, max_choices).is_none()
}

fn scan_from_end(text: &str, max_choices: usize) -> Option<ChoiceLabel> {
    let chars: Vec<char> = text.chars().collect();
    let valid = |c: char| c.is_ascii_uppercase() && ChoiceLabel::from_char(c, max_choices).is_some();

    let standalone = (0..chars.len()).rev().find(|&i| {
        valid(chars[i])
            && (i == 0 || !chars[i - 1].is_alphanumeric())
            && chars.get(i + 1).map_or(true, |next| !next.is_alphanumeric())
    });

    standalone
        .or_else(|| (0..chars.len()).rev().find(|&i| valid(chars[i])))
        .and_then(|i| ChoiceLabel::from_char(chars[i], max_choices))
}

/// Match the last number printed in `output` against the numeric value of
/// each choice. Returns a label only when exactly one choice matches.
///
/// Program output uses `.` as the decimal separator. Choices may use
/// Vietnamese grouping (`1.000.000`, `3,5`), so both readings of a grouped
/// choice number are considered.
pub fn match_numeric_choice(output: &str, question: &Question) -> Option<ChoiceLabel> {
    let value = NUMBER
        .find_iter(output)
        .last()
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())?;

    let mut matches = question.labels().filter(|label| {
        question
            .choice(*label)
            .and_then(|choice| NUMBER.find(choice))
            .map(|m| number_readings(m.as_str()))
            .is_some_and(|readings| readings.iter().any(|r| approx_eq(*r, value)))
    });

    let first = matches.next()?;
    matches.next().is_none().then_some(first)
}

fn number_readings(token: &str) -> Vec<f64> {
    let mut readings = Vec::new();

    if GROUPED_THOUSANDS.is_match(token) {
        if let Ok(v) = token.replace(['.', ','], "").parse() {
            readings.push(v);
        }
    }

    let decimal = match (token.rfind('.'), token.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => token.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => token.replace(',', ""),
        (None, Some(_)) => token.replace(',', "."),
        _ => token.to_string(),
    };
    if let Ok(v) = decimal.parse() {
        readings.push(v);
    }

    readings
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9_f64.max(1e-6 * a.abs().max(b.abs()))
}
