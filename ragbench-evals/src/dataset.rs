// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Evaluation question sets
//!
//! Files are either a JSON array or JSON Lines, one object per question:
//!
//! ```json
//! {"id": "capital-fr", "question": "What is the capital of France?", "ground_truth": "Paris"}
//! ```
//!
//! `id` and `ground_truth` are optional. A missing id becomes `q<position>`, or
//! `q<position>_2`, `q<position>_3`, ... when an explicit id already uses it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Reference answer for a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroundTruth(String);

impl GroundTruth {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroundTruth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One evaluation question, immutable once loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub ground_truth: Option<GroundTruth>,
}

impl Question {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            ground_truth: None,
        }
    }

    pub fn with_ground_truth(mut self, ground_truth: impl Into<String>) -> Self {
        self.ground_truth = Some(GroundTruth::new(ground_truth));
        self
    }
}

/// On-disk shape of a question entry
#[derive(Debug, Deserialize)]
struct QuestionEntry {
    #[serde(default)]
    id: Option<String>,
    question: String,
    #[serde(default)]
    ground_truth: Option<String>,
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in dataset: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid JSON on line {line}: {source}")]
    JsonLine {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Duplicate question id: {0}")]
    DuplicateId(String),

    #[error("Question {0} has empty text")]
    BlankQuestion(String),
}

/// Ordered, validated set of evaluation questions
#[derive(Debug, Clone, Default)]
pub struct QuestionSet {
    questions: Vec<Question>,
}

impl QuestionSet {
    /// Validate and wrap a list of questions
    pub fn new(questions: Vec<Question>) -> Result<Self, DatasetError> {
        let mut seen = HashSet::new();
        for q in &questions {
            if q.text.trim().is_empty() {
                return Err(DatasetError::BlankQuestion(q.id.clone()));
            }
            if !seen.insert(q.id.as_str()) {
                return Err(DatasetError::DuplicateId(q.id.clone()));
            }
        }
        Ok(Self { questions })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse either a JSON array or JSON Lines
    pub fn parse(content: &str) -> Result<Self, DatasetError> {
        let entries: Vec<QuestionEntry> = if content.trim_start().starts_with('[') {
            serde_json::from_str(content)?
        } else {
            content
                .lines()
                .enumerate()
                .filter(|(_, line)| !line.trim().is_empty())
                .map(|(idx, line)| {
                    serde_json::from_str(line).map_err(|source| DatasetError::JsonLine {
                        line: idx + 1,
                        source,
                    })
                })
                .collect::<Result<_, _>>()?
        };

        let mut taken: HashSet<String> = entries.iter().filter_map(|e| e.id.clone()).collect();
        let mut questions = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.into_iter().enumerate() {
            let id = match entry.id {
                Some(id) => id,
                None => {
                    let id = free_id(&taken, idx + 1);
                    taken.insert(id.clone());
                    id
                }
            };
            questions.push(Question {
                id,
                text: entry.question,
                ground_truth: entry
                    .ground_truth
                    .filter(|gt| !gt.trim().is_empty())
                    .map(GroundTruth::new),
            });
        }

        Self::new(questions)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter()
    }

    pub fn get(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

/// Positional id for an entry without one, skipping ids already in use
fn free_id(taken: &HashSet<String>, position: usize) -> String {
    let base = format!("q{}", position);
    let mut candidate = base.clone();
    let mut suffix = 2;
    while taken.contains(&candidate) {
        candidate = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    candidate
}

impl<'a> IntoIterator for &'a QuestionSet {
    type Item = &'a Question;
    type IntoIter = std::slice::Iter<'a, Question>;

    fn into_iter(self) -> Self::IntoIter {
        self.questions.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_jsonl_assigns_ids() {
        let content = r#"
{"question": "What is the capital of France?", "ground_truth": "Paris"}
{"id": "custom", "question": "Who wrote Hamlet?"}
{"question": "What is 2 + 2?", "ground_truth": "4"}
"#;
        let set = QuestionSet::parse(content).unwrap();
        let ids: Vec<&str> = set.iter().map(|q| q.id.as_str()).collect();

        assert_eq!(ids, vec!["q1", "custom", "q3"]);
        assert_eq!(
            set.get("q1").unwrap().ground_truth,
            Some(GroundTruth::new("Paris"))
        );
        assert!(set.get("custom").unwrap().ground_truth.is_none());
    }

    #[test]
    fn test_generated_ids_avoid_explicit_ids() {
        let content = r#"
{"question": "First"}
{"id": "q3", "question": "Second"}
{"question": "Third"}
"#;
        let set = QuestionSet::parse(content).unwrap();
        let ids: Vec<&str> = set.iter().map(|q| q.id.as_str()).collect();

        assert_eq!(ids, vec!["q1", "q3", "q3_2"]);
        assert_eq!(set.get("q3_2").unwrap().text, "Third");
    }

    #[test]
    fn test_parse_json_array() {
        let content = r#"[{"id": "a", "question": "Q1"}, {"id": "b", "question": "Q2", "ground_truth": ""}]"#;
        let set = QuestionSet::parse(content).unwrap();

        assert_eq!(set.len(), 2);
        // Blank reference answers count as absent
        assert!(set.get("b").unwrap().ground_truth.is_none());
    }

    #[test]
    fn test_rejects_duplicates_and_blank() {
        let dup = r#"[{"id": "a", "question": "Q1"}, {"id": "a", "question": "Q2"}]"#;
        assert!(matches!(
            QuestionSet::parse(dup),
            Err(DatasetError::DuplicateId(id)) if id == "a"
        ));

        let blank = r#"{"id": "a", "question": "   "}"#;
        assert!(matches!(
            QuestionSet::parse(blank),
            Err(DatasetError::BlankQuestion(_))
        ));
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let content = "{\"question\": \"ok\"}\n{not json}\n";
        assert!(matches!(
            QuestionSet::parse(content),
            Err(DatasetError::JsonLine { line: 2, .. })
        ));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"question": "What is Rust?", "ground_truth": "A language"}}"#).unwrap();

        let set = QuestionSet::from_path(file.path()).unwrap();
        assert_eq!(set.len(), 1);
    }
}
