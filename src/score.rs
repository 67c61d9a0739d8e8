use std::collections::BTreeMap;
use std::fmt::Display;

use logging_timer::time;
use serde::{Deserialize, Serialize};

use crate::detect::{DetectedMark, QuestionMark};
use crate::sheet::OptionLabel;

/// The correct option for each question number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerKey(BTreeMap<u32, OptionLabel>);

impl AnswerKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, question: u32, option: OptionLabel) {
        self.0.insert(question, option);
    }

    pub fn get(&self, question: u32) -> Option<&OptionLabel> {
        self.0.get(&question)
    }

    /// Deterministic key for demos and tests: question `i` maps to
    /// `labels[(i * 1234) % labels.len()]`. Not semantically meaningful.
    pub fn default_for(questions: u32, labels: &[OptionLabel]) -> Self {
        let mut key = Self::new();
        for i in 1..=questions {
            let index = (i as usize * 1234) % labels.len();
            key.insert(i, labels[index].clone());
        }
        key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreError {
    /// The answer key has no entry for a question on the sheet.
    MissingKeyEntry(u32),
}

impl Display for ScoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingKeyEntry(question) => {
                write!(f, "answer key has no entry for question {}", question)
            }
        }
    }
}

/// One question's detected mark judged against the answer key. `marked`
/// is `None` for unanswered and ambiguous questions; both score as
/// incorrect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedAnswer {
    pub question_number: u32,
    pub marked_option: Option<OptionLabel>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub correct: u32,
    pub total: u32,
    pub percentage: f32,
}

/// Judges every question from 1 to `questions` against the key. A question
/// missing from the key fails the whole sheet with `MissingKeyEntry`; a
/// question missing from `marks` counts as unanswered.
#[time]
pub fn evaluate(
    marks: &[QuestionMark],
    key: &AnswerKey,
    questions: u32,
) -> Result<Vec<EvaluatedAnswer>, ScoreError> {
    let marks_by_question = marks
        .iter()
        .map(|m| (m.question, &m.mark))
        .collect::<BTreeMap<u32, &DetectedMark>>();

    let mut evaluated = Vec::with_capacity(questions as usize);
    for question in 1..=questions {
        let correct_option = key
            .get(question)
            .ok_or(ScoreError::MissingKeyEntry(question))?;

        let marked_option = match marks_by_question.get(&question) {
            Some(DetectedMark::Single(option)) => Some(option.clone()),
            Some(DetectedMark::Unanswered) | Some(DetectedMark::Ambiguous(_)) | None => None,
        };

        let is_correct = marked_option.as_ref() == Some(correct_option);
        evaluated.push(EvaluatedAnswer {
            question_number: question,
            marked_option,
            is_correct,
        });
    }

    Ok(evaluated)
}

/// Aggregates evaluated answers into a score. An empty evaluation scores
/// 0% rather than dividing by zero.
pub fn tally(evaluated: &[EvaluatedAnswer]) -> Score {
    let total = evaluated.len() as u32;
    let correct = evaluated.iter().filter(|a| a.is_correct).count() as u32;
    let percentage = if total > 0 {
        correct as f32 / total as f32 * 100.0
    } else {
        0.0
    };

    Score {
        correct,
        total,
        percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::default_option_labels;

    fn label(s: &str) -> OptionLabel {
        OptionLabel::from(s)
    }

    fn single(question: u32, option: &str) -> QuestionMark {
        QuestionMark {
            question,
            mark: DetectedMark::Single(label(option)),
        }
    }

    #[test]
    fn evaluates_marks_against_key() {
        let mut key = AnswerKey::new();
        key.insert(1, label("A"));
        key.insert(2, label("C"));

        let marks = vec![single(1, "A"), single(2, "B")];
        let evaluated = evaluate(&marks, &key, 2).expect("key covers all questions");

        assert_eq!(
            evaluated,
            vec![
                EvaluatedAnswer {
                    question_number: 1,
                    marked_option: Some(label("A")),
                    is_correct: true,
                },
                EvaluatedAnswer {
                    question_number: 2,
                    marked_option: Some(label("B")),
                    is_correct: false,
                },
            ]
        );

        let score = tally(&evaluated);
        assert_eq!(score.correct, 1);
        assert_eq!(score.total, 2);
        assert_eq!(score.percentage, 50.0);
    }

    #[test]
    fn unanswered_and_ambiguous_score_incorrect() {
        let mut key = AnswerKey::new();
        key.insert(1, label("A"));
        key.insert(2, label("B"));
        key.insert(3, label("C"));

        let marks = vec![
            QuestionMark {
                question: 1,
                mark: DetectedMark::Unanswered,
            },
            QuestionMark {
                question: 2,
                mark: DetectedMark::Ambiguous(vec![label("B"), label("C")]),
            },
        ];

        // question 3 absent from marks entirely
        let evaluated = evaluate(&marks, &key, 3).expect("key covers all questions");
        assert!(evaluated.iter().all(|a| !a.is_correct));
        assert!(evaluated.iter().all(|a| a.marked_option.is_none()));
    }

    #[test]
    fn missing_key_entry_fails_evaluation() {
        let mut key = AnswerKey::new();
        key.insert(1, label("A"));

        let marks = vec![single(1, "A"), single(2, "B")];
        assert_eq!(
            evaluate(&marks, &key, 2),
            Err(ScoreError::MissingKeyEntry(2))
        );
    }

    #[test]
    fn empty_tally_does_not_divide_by_zero() {
        let score = tally(&[]);
        assert_eq!(score.correct, 0);
        assert_eq!(score.total, 0);
        assert_eq!(score.percentage, 0.0);
    }

    #[test]
    fn default_key_is_deterministic() {
        let labels = default_option_labels();
        let first = AnswerKey::default_for(15, &labels);
        let second = AnswerKey::default_for(15, &labels);
        assert_eq!(first, second);

        // (i * 1234) % 4 alternates 2, 0 for odd/even i
        assert_eq!(first.get(1), Some(&OptionLabel::from("C")));
        assert_eq!(first.get(2), Some(&OptionLabel::from("A")));
        assert_eq!(first.get(3), Some(&OptionLabel::from("C")));
    }

    #[test]
    fn answer_key_deserializes_from_json_object() {
        let key: AnswerKey =
            serde_json::from_str(r#"{"1": "A", "2": "C"}"#).expect("key parses");
        assert_eq!(key.get(1), Some(&OptionLabel::from("A")));
        assert_eq!(key.get(2), Some(&OptionLabel::from("C")));
        assert_eq!(key.get(3), None);
    }
}
