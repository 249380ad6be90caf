//! Question input and prediction output files.
//!
//! CSV input has a header row with `id`, `question`, one column per choice
//! label (`A`, `B`, ... in order) and an optional `category`. Blank choice
//! cells are dropped. JSON input is an array of
//! `{"id", "question", "choices": [...], "category"}` objects.

use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};
use crate::question::{ChoiceLabel, Prediction, Question, MAX_CHOICES};

#[derive(Debug, Deserialize)]
struct JsonQuestion {
    id: String,
    question: String,
    choices: Vec<String>,
    #[serde(default)]
    category: Option<String>,
}

/// Load questions, choosing the format by file extension (`.json` or CSV).
pub fn load_questions(path: impl AsRef<Path>) -> Result<Vec<Question>> {
    let path = path.as_ref();
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let questions = if is_json {
        let raw = std::fs::read_to_string(path)?;
        questions_from_json(&raw)?
    } else {
        questions_from_csv(std::fs::File::open(path)?)?
    };
    info!(path = %path.display(), count = questions.len(), "loaded questions");
    Ok(questions)
}

/// Parse CSV questions from any reader.
pub fn questions_from_csv(reader: impl std::io::Read) -> Result<Vec<Question>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    let column = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let id_col = column("id").ok_or_else(|| Error::Config("CSV input has no 'id' column".to_string()))?;
    let question_col = column("question")
        .ok_or_else(|| Error::Config("CSV input has no 'question' column".to_string()))?;
    let category_col = column("category");
    let choice_cols: Vec<usize> = (0..MAX_CHOICES)
        .filter_map(ChoiceLabel::from_index)
        .map_while(|label| headers.iter().position(|h| h == label.to_string()))
        .collect();

    let mut questions = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |col: usize| record.get(col).unwrap_or_default().trim();

        let id = match field(id_col) {
            "" => format!("row-{}", row + 1),
            id => id.to_string(),
        };
        let choices: Vec<String> = choice_cols
            .iter()
            .map(|&col| field(col))
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        let mut question = Question::new(id, field(question_col), choices)?;
        if let Some(category) = category_col.map(field).filter(|c| !c.is_empty()) {
            question = question.with_category(category);
        }
        questions.push(question);
    }
    Ok(questions)
}

/// Parse a JSON array of questions.
pub fn questions_from_json(raw: &str) -> Result<Vec<Question>> {
    let items: Vec<JsonQuestion> = serde_json::from_str(raw)?;
    items
        .into_iter()
        .map(|item| {
            let question = Question::new(item.id, item.question, item.choices)?;
            Ok(match item.category {
                Some(category) => question.with_category(category),
                None => question,
            })
        })
        .collect()
}

/// Write `id,answer` rows.
pub fn write_predictions(path: impl AsRef<Path>, predictions: &[Prediction]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for prediction in predictions {
        writer.serialize(prediction)?;
    }
    writer.flush()?;
    info!(path = %path.display(), count = predictions.len(), "saved predictions");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::Answer;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_csv_with_variable_choices_and_category() {
        let raw = "id,question,A,B,C,D,E,category\n\
                   q1,Thủ đô?,Huế,Hà Nội,,,,geo\n\
                   q2,\"Chọn số, lớn nhất\",1,2,3,4,5,\n";
        let questions = questions_from_csv(raw.as_bytes()).unwrap();

        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].choices(), ["Huế", "Hà Nội"]);
        assert_eq!(questions[0].category(), Some("geo"));
        assert_eq!(questions[1].text(), "Chọn số, lớn nhất");
        assert_eq!(questions[1].choice_count(), 5);
        assert_eq!(questions[1].category(), None);
    }

    #[test]
    fn test_csv_row_with_too_few_choices_is_rejected() {
        let raw = "id,question,A,B,C,D\nbad,Câu hỏi?,Chỉ một,,,\n";
        let err = questions_from_csv(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::InvalidQuestion { ref id, .. } if id == "bad"));
    }

    #[test]
    fn test_csv_missing_question_column() {
        let raw = "id,text,A,B\n1,x,a,b\n";
        assert!(matches!(
            questions_from_csv(raw.as_bytes()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_json_questions() {
        let raw = r#"[
            {"id": "j1", "question": "2 + 2 = ?", "choices": ["3", "4"]},
            {"id": "j2", "question": "Màu của lá?", "choices": ["xanh", "đỏ", "tím"], "category": "sinh học"}
        ]"#;
        let questions = questions_from_json(raw).unwrap();
        assert_eq!(questions[0].choice_count(), 2);
        assert_eq!(questions[1].category(), Some("sinh học"));
    }

    #[test]
    fn test_write_and_load_files() {
        let dir = tempfile::tempdir().unwrap();

        let input = dir.path().join("public_test.csv");
        std::fs::write(&input, "id,question,A,B\n7,Đúng hay sai?,Đúng,Sai\n").unwrap();
        let questions = load_questions(&input).unwrap();
        assert_eq!(questions[0].id(), "7");

        let output = dir.path().join("out").join("pred.csv");
        let label = ChoiceLabel::from_index(1).unwrap();
        write_predictions(
            &output,
            &[
                Prediction {
                    id: "7".to_string(),
                    answer: Answer::Choice(label),
                },
                Prediction {
                    id: "8".to_string(),
                    answer: Answer::Refused,
                },
            ],
        )
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "id,answer\n7,B\n8,Từ chối trả lời\n"
        );
    }
}
