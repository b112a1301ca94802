//! Typed questionnaire schema and the user profile / history store.
//!
//! Questions carry a tagged kind with an explicit validation contract per
//! variant, so answers are checked before they reach the store instead of
//! passing through as untyped strings. The store itself is behind a trait;
//! the orchestrator only ever consumes its content as rendered context
//! text.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::QaRecord;

pub const PROFILE_FILE: &str = "profile.json";
pub const QA_HISTORY_FILE: &str = "qa_history.jsonl";

/// Answers rendered into a prompt are cut to this many characters per side.
const SUMMARY_TRUNCATE_CHARS: usize = 200;

/// The kind of input a question accepts, with its validation contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    /// Free text; must be non-empty after trimming.
    Text,
    /// Must parse as a finite f64.
    Number,
    /// Must parse as a `YYYY-MM-DD` calendar date.
    Date,
    /// Exactly one of the declared options.
    SingleChoice { options: Vec<String> },
    /// A non-empty subset of the declared options.
    MultiChoice { options: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methodology: Option<String>,
    pub questions: Vec<Question>,
}

/// Category name to schema, ordered for stable rendering.
pub type Questionnaire = BTreeMap<String, Category>;

/// A validated answer. Single-valued kinds use `One`; multi-choice uses
/// `Many`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    One(String),
    Many(Vec<String>),
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::One(value) => f.write_str(value),
            Answer::Many(values) => f.write_str(&values.join(", ")),
        }
    }
}

/// Completed answers for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryResponses {
    pub completed_at: String,
    pub answers: BTreeMap<String, Answer>,
}

/// A user's full stored profile: completed categories by name.
pub type Profile = BTreeMap<String, CategoryResponses>;

/// Validate one answer against a question's kind.
pub fn validate_answer(kind: &QuestionKind, answer: &Answer) -> Result<()> {
    match (kind, answer) {
        (QuestionKind::Text, Answer::One(value)) => {
            if value.trim().is_empty() {
                bail!("text answer must not be empty");
            }
            Ok(())
        }
        (QuestionKind::Number, Answer::One(value)) => {
            let parsed: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("'{}' is not a number", value))?;
            if !parsed.is_finite() {
                bail!("'{}' is not a finite number", value);
            }
            Ok(())
        }
        (QuestionKind::Date, Answer::One(value)) => {
            NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                .with_context(|| format!("'{}' is not a YYYY-MM-DD date", value))?;
            Ok(())
        }
        (QuestionKind::SingleChoice { options }, Answer::One(value)) => {
            if !options.iter().any(|o| o == value) {
                bail!("'{}' is not one of the declared options", value);
            }
            Ok(())
        }
        (QuestionKind::MultiChoice { options }, Answer::Many(values)) => {
            if values.is_empty() {
                bail!("multi-choice answer must select at least one option");
            }
            for value in values {
                if !options.iter().any(|o| o == value) {
                    bail!("'{}' is not one of the declared options", value);
                }
            }
            Ok(())
        }
        (QuestionKind::MultiChoice { .. }, Answer::One(_)) => {
            bail!("multi-choice answer must be a list")
        }
        (_, Answer::Many(_)) => bail!("answer must be a single value"),
    }
}

/// Validate a full set of answers for a category: every answer must match
/// a declared question and its kind. Unanswered questions are allowed.
pub fn validate_responses(category: &Category, answers: &BTreeMap<String, Answer>) -> Result<()> {
    for (id, answer) in answers {
        let question = category
            .questions
            .iter()
            .find(|q| &q.id == id)
            .with_context(|| format!("unknown question id '{}'", id))?;
        validate_answer(&question.kind, answer)
            .with_context(|| format!("invalid answer for question '{}'", id))?;
    }
    Ok(())
}

/// Load the questionnaire schema, writing the built-in default first when
/// the file does not exist yet.
pub fn load_questionnaire(path: &std::path::Path) -> Result<Questionnaire> {
    if !path.exists() {
        let default = default_questionnaire();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&default)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write questionnaire: {}", path.display()))?;
        return Ok(default);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read questionnaire: {}", path.display()))?;
    let questionnaire: Questionnaire = serde_json::from_str(&content)
        .with_context(|| format!("Invalid questionnaire file: {}", path.display()))?;
    Ok(questionnaire)
}

fn question(id: &str, prompt: &str, kind: QuestionKind) -> Question {
    Question {
        id: id.to_string(),
        prompt: prompt.to_string(),
        kind,
    }
}

fn select(options: &[&str]) -> QuestionKind {
    QuestionKind::SingleChoice {
        options: options.iter().map(|o| o.to_string()).collect(),
    }
}

/// Built-in questionnaire used when no schema file exists.
pub fn default_questionnaire() -> Questionnaire {
    let mut q = Questionnaire::new();

    q.insert(
        "Small Business Relief - SBR Filing".to_string(),
        Category {
            description: "Assessment for Small Business Relief eligibility (AED 3 million threshold)"
                .to_string(),
            methodology: Some(
                "CALCULATION METHODOLOGY:\n\
                 1. Gross receipts basis (NOT net income or profits)\n\
                 2. Include: regular revenue + asset sales + out-of-scope/exempt VAT transactions + dividends from shareholdings\n\
                 3. Revenue from VAT returns must match; if not, add exempt/out-of-scope amounts\n\
                 4. All bank receipts must align with reported revenue\n\
                 5. Threshold: AED 3,000,000 total gross receipts"
                    .to_string(),
            ),
            questions: vec![
                question(
                    "sbr_1",
                    "What is your total revenue/turnover for the tax period (AED)?",
                    QuestionKind::Number,
                ),
                question(
                    "sbr_2",
                    "Does your revenue figure match the VAT return revenues?",
                    select(&["Yes", "No", "Not VAT Registered"]),
                ),
                question(
                    "sbr_3",
                    "Did you make profits in excess of AED 375,000, or are you in losses?",
                    select(&["Profit > 375K", "Profit < 375K", "Losses"]),
                ),
                question(
                    "sbr_4",
                    "Which additional receipt types apply to the tax period?",
                    QuestionKind::MultiChoice {
                        options: vec![
                            "Asset sales".to_string(),
                            "Dividends".to_string(),
                            "Exempt VAT transactions".to_string(),
                            "None".to_string(),
                        ],
                    },
                ),
                question(
                    "sbr_5",
                    "Is the company part of any unincorporated partnerships?",
                    select(&["Yes", "No"]),
                ),
            ],
        },
    );

    q.insert(
        "Transitional Tax Benefits - Property".to_string(),
        Category {
            description: "Transitional relief calculations for real estate assets".to_string(),
            methodology: Some(
                "CALCULATION METHODOLOGY:\n\
                 1. Market Value Method: use FMV on first day of tax period\n\
                 2. Time Apportionment Method: (days held pre-tax / total days held) x gain\n\
                 3. Provide comparison and recommend the best method"
                    .to_string(),
            ),
            questions: vec![
                question(
                    "tp_1",
                    "Do you own property under the company name purchased before your first corporate tax period?",
                    select(&["Yes", "No"]),
                ),
                question(
                    "tp_2",
                    "When did you purchase? (Date of Oqood / Property Title Deed)",
                    QuestionKind::Date,
                ),
                question(
                    "tp_3",
                    "How was the property accounted for in the books?",
                    select(&[
                        "Historical Cost Method",
                        "Fair Value Method (IAS 40)",
                        "Inventory (IAS 2)",
                    ]),
                ),
                question(
                    "tp_4",
                    "What was the market value of the property on the first day of the tax period (AED)?",
                    QuestionKind::Number,
                ),
                question(
                    "tp_5",
                    "If sold, please provide the sale date and selling price (AED):",
                    QuestionKind::Text,
                ),
            ],
        },
    );

    q.insert(
        "General Business Profile".to_string(),
        Category {
            description: "Baseline facts about the business used across all categories".to_string(),
            methodology: None,
            questions: vec![
                question("gb_1", "What is the legal name of the business?", QuestionKind::Text),
                question(
                    "gb_2",
                    "What is the start date of your first corporate tax period?",
                    QuestionKind::Date,
                ),
                question(
                    "gb_3",
                    "Is the company a tax resident in another country?",
                    select(&["Yes", "No"]),
                ),
            ],
        },
    );

    q
}

/// Persistence seam for profiles and Q&A history.
pub trait ProfileStore: Send + Sync {
    /// Replace one category's responses in the user's profile.
    fn save_responses(
        &self,
        user_id: &str,
        category: &str,
        responses: CategoryResponses,
    ) -> Result<()>;

    /// The user's stored profile; empty when none exists.
    fn load_profile(&self, user_id: &str) -> Result<Profile>;

    fn append_qa(&self, record: &QaRecord) -> Result<()>;

    /// The user's most recent records, oldest first.
    fn recent_qa(&self, user_id: &str, limit: usize) -> Result<Vec<QaRecord>>;
}

/// File-backed store: one directory per user holding a profile JSON file
/// and an append-only JSON-lines history.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.root.join(user_id)
    }
}

impl ProfileStore for JsonFileStore {
    fn save_responses(
        &self,
        user_id: &str,
        category: &str,
        responses: CategoryResponses,
    ) -> Result<()> {
        let mut profile = self.load_profile(user_id)?;
        profile.insert(category.to_string(), responses);

        let dir = self.user_dir(user_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create profile directory: {}", dir.display()))?;
        let path = dir.join(PROFILE_FILE);
        let json = serde_json::to_string_pretty(&profile)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write profile: {}", path.display()))?;
        Ok(())
    }

    fn load_profile(&self, user_id: &str) -> Result<Profile> {
        let path = self.user_dir(user_id).join(PROFILE_FILE);
        if !path.exists() {
            return Ok(Profile::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read profile: {}", path.display()))?;
        let profile: Profile = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt profile file: {}", path.display()))?;
        Ok(profile)
    }

    fn append_qa(&self, record: &QaRecord) -> Result<()> {
        let dir = self.user_dir(&record.user_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(QA_HISTORY_FILE);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open history: {}", path.display()))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn recent_qa(&self, user_id: &str, limit: usize) -> Result<Vec<QaRecord>> {
        let path = self.user_dir(user_id).join(QA_HISTORY_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read history: {}", path.display()))?;

        let mut records: Vec<QaRecord> = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QaRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "skipping unparseable history line"),
            }
        }

        let start = records.len().saturating_sub(limit);
        Ok(records.split_off(start))
    }
}

/// Render the user's completed categories as an opaque context blob for
/// the answer prompt. Empty profile renders as an empty string.
pub fn build_user_context(questionnaire: &Questionnaire, profile: &Profile) -> String {
    if profile.is_empty() {
        return String::new();
    }

    let rule = "=".repeat(60);
    let mut parts = vec![
        "=== COMPREHENSIVE USER PROFILE AND CONTEXT ===".to_string(),
        "This information was provided by the user during initial questionnaire completion."
            .to_string(),
        "CRITICAL: Use this context for ALL responses. DO NOT ask for this information again.\n"
            .to_string(),
    ];

    for (category, responses) in profile {
        parts.push(format!("\n{}", rule));
        parts.push(format!("CATEGORY: {}", category));
        parts.push(format!("Completed: {}", responses.completed_at));
        parts.push(rule.clone());

        if let Some(methodology) = questionnaire.get(category).and_then(|c| c.methodology.as_ref())
        {
            parts.push("\nCALCULATION METHODOLOGY:".to_string());
            parts.push(methodology.clone());
        }

        parts.push("\nUSER'S RESPONSES:".to_string());
        for (id, answer) in &responses.answers {
            parts.push(format!("  - {}: {}", id, answer));
        }
    }

    parts.push(format!("\n{}", rule));
    parts.push("=== END USER CONTEXT ===\n".to_string());
    parts.join("\n")
}

/// Condense recent history records into a continuity blurb for the answer
/// prompt. No history renders as an empty string.
pub fn build_qa_summary(history: &[QaRecord]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let mut parts = vec![
        "=== PREVIOUS CONVERSATION HISTORY ===".to_string(),
        "User has asked these questions before. Use this for continuity.".to_string(),
        "DO NOT ask user to repeat information from previous conversations.\n".to_string(),
    ];

    for (i, qa) in history.iter().enumerate() {
        parts.push(format!("{}. [{}] {}", i + 1, qa.category, qa.timestamp));
        parts.push(format!(
            "   Q: {}",
            truncate_chars(&qa.question, SUMMARY_TRUNCATE_CHARS)
        ));
        parts.push(format!(
            "   A: {}...\n",
            truncate_chars(&qa.answer, SUMMARY_TRUNCATE_CHARS)
        ));
    }

    parts.push("=== END CONVERSATION HISTORY ===\n".to_string());
    parts.join("\n")
}

fn truncate_chars(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(s: &str) -> Answer {
        Answer::One(s.to_string())
    }

    #[test]
    fn number_answers_must_parse() {
        assert!(validate_answer(&QuestionKind::Number, &one("375000")).is_ok());
        assert!(validate_answer(&QuestionKind::Number, &one("3.5e6")).is_ok());
        assert!(validate_answer(&QuestionKind::Number, &one("three")).is_err());
        assert!(validate_answer(&QuestionKind::Number, &one("NaN")).is_err());
    }

    #[test]
    fn date_answers_must_be_iso() {
        assert!(validate_answer(&QuestionKind::Date, &one("2023-06-01")).is_ok());
        assert!(validate_answer(&QuestionKind::Date, &one("01/06/2023")).is_err());
        assert!(validate_answer(&QuestionKind::Date, &one("2023-13-01")).is_err());
    }

    #[test]
    fn single_choice_must_be_declared() {
        let kind = select(&["Yes", "No"]);
        assert!(validate_answer(&kind, &one("Yes")).is_ok());
        assert!(validate_answer(&kind, &one("Maybe")).is_err());
        assert!(validate_answer(&kind, &Answer::Many(vec!["Yes".to_string()])).is_err());
    }

    #[test]
    fn multi_choice_requires_non_empty_subset() {
        let kind = QuestionKind::MultiChoice {
            options: vec!["A".to_string(), "B".to_string()],
        };
        assert!(validate_answer(&kind, &Answer::Many(vec!["A".to_string()])).is_ok());
        assert!(validate_answer(&kind, &Answer::Many(vec![])).is_err());
        assert!(validate_answer(&kind, &Answer::Many(vec!["C".to_string()])).is_err());
        assert!(validate_answer(&kind, &one("A")).is_err());
    }

    #[test]
    fn unknown_question_id_rejected() {
        let questionnaire = default_questionnaire();
        let category = questionnaire.get("General Business Profile").unwrap();
        let mut answers = BTreeMap::new();
        answers.insert("nope_1".to_string(), one("value"));
        assert!(validate_responses(category, &answers).is_err());
    }

    #[test]
    fn questionnaire_file_created_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("questionnaire.json");
        let loaded = load_questionnaire(&path).unwrap();
        assert!(path.exists());
        assert_eq!(loaded.len(), default_questionnaire().len());

        // A second load reads the file it just wrote.
        let reloaded = load_questionnaire(&path).unwrap();
        assert_eq!(reloaded.len(), loaded.len());
    }

    #[test]
    fn store_roundtrips_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().to_path_buf());

        let mut answers = BTreeMap::new();
        answers.insert("gb_1".to_string(), one("Acme Trading LLC"));
        store
            .save_responses(
                "user-1",
                "General Business Profile",
                CategoryResponses {
                    completed_at: "2023-06-01 12:00:00".to_string(),
                    answers,
                },
            )
            .unwrap();

        let profile = store.load_profile("user-1").unwrap();
        let responses = profile.get("General Business Profile").unwrap();
        assert_eq!(
            responses.answers.get("gb_1"),
            Some(&one("Acme Trading LLC"))
        );
        assert!(store.load_profile("user-2").unwrap().is_empty());
    }

    #[test]
    fn recent_qa_returns_last_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().to_path_buf());

        for i in 0..7 {
            store
                .append_qa(&QaRecord {
                    user_id: "user-1".to_string(),
                    timestamp: format!("2023-06-0{} 12:00:00", i + 1),
                    category: "General".to_string(),
                    question: format!("question {}", i),
                    answer: format!("answer {}", i),
                })
                .unwrap();
        }

        let recent = store.recent_qa("user-1", 5).unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent.first().unwrap().question, "question 2");
        assert_eq!(recent.last().unwrap().question, "question 6");
        assert!(store.recent_qa("user-2", 5).unwrap().is_empty());
    }

    #[test]
    fn user_context_renders_methodology_and_answers() {
        let questionnaire = default_questionnaire();
        let mut answers = BTreeMap::new();
        answers.insert("sbr_1".to_string(), one("2500000"));
        let mut profile = Profile::new();
        profile.insert(
            "Small Business Relief - SBR Filing".to_string(),
            CategoryResponses {
                completed_at: "2023-06-01 12:00:00".to_string(),
                answers,
            },
        );

        let context = build_user_context(&questionnaire, &profile);
        assert!(context.contains("CATEGORY: Small Business Relief - SBR Filing"));
        assert!(context.contains("CALCULATION METHODOLOGY:"));
        assert!(context.contains("sbr_1: 2500000"));

        assert_eq!(build_user_context(&questionnaire, &Profile::new()), "");
    }

    #[test]
    fn qa_summary_truncates_long_answers() {
        let history = vec![QaRecord {
            user_id: "u".to_string(),
            timestamp: "2023-06-01 12:00:00".to_string(),
            category: "General".to_string(),
            question: "short".to_string(),
            answer: "x".repeat(500),
        }];
        let summary = build_qa_summary(&history);
        assert!(summary.contains(&"x".repeat(200)));
        assert!(!summary.contains(&"x".repeat(201)));
        assert_eq!(build_qa_summary(&[]), "");
    }
}
