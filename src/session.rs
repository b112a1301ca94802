//! Conversation orchestration.
//!
//! A [`Session`] owns the per-conversation state: the active indexes, the
//! turn memory, and the rendered profile/history context. Each question
//! runs the full pipeline to completion before the next is accepted
//! (`&mut self`, no in-flight concurrency): optional topic guardrail,
//! query embedding, fused retrieval, one answer-generation call, answer
//! parsing, then memory append and external logging. A generation failure
//! on the answer call surfaces immediately and leaves memory untouched.

use anyhow::{Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::llm::Generator;
use crate::models::{EntryMeta, QaRecord, RankedPassage, Turn};
use crate::profile::{self, ProfileStore};
use crate::retrieve::Retriever;

/// Shown when the model produced nothing usable.
pub const FALLBACK_MESSAGE: &str =
    "No answer generated. Please rephrase your question or provide more details.";

/// Shown when the guardrail classifies the question as off-topic.
pub const OFF_TOPIC_MESSAGE: &str =
    "Please ask tax, accounting, finance, or business compliance related questions.";

/// Placeholder answer treated the same as an empty answer.
const NOT_AVAILABLE: &str = "Information not available.";

/// Signature block every corpus-mode answer must end with.
const SIGNATURE: &str = "---\n**- Taxmen AI**\n*Your Tax Intelligence Partner*";

/// Prior turns folded into the prompt are cut to this many characters per
/// side.
const HISTORY_TRUNCATE_CHARS: usize = 200;

/// Which knowledge base the session answers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// The curated corpus: guardrailed, signed answers.
    Corpus,
    /// A single uploaded document: no guardrail, no signature.
    Uploaded,
}

pub struct Session<'a> {
    id: Uuid,
    mode: SessionMode,
    user_id: String,
    doc_index: VectorIndex,
    chunk_index: VectorIndex,
    config: &'a Config,
    embedder: &'a dyn Embedder,
    answer_generator: &'a dyn Generator,
    utility_generator: &'a dyn Generator,
    store: &'a dyn ProfileStore,
    profile_context: String,
    qa_summary: String,
    memory: Vec<Turn>,
}

impl<'a> Session<'a> {
    /// Start a corpus-backed session over the cached hierarchical indexes.
    #[allow(clippy::too_many_arguments)]
    pub fn corpus(
        config: &'a Config,
        embedder: &'a dyn Embedder,
        answer_generator: &'a dyn Generator,
        utility_generator: &'a dyn Generator,
        store: &'a dyn ProfileStore,
        doc_index: VectorIndex,
        chunk_index: VectorIndex,
        user_id: &str,
    ) -> Result<Self> {
        let (profile_context, qa_summary) = load_user_context(config, store, user_id)?;
        let id = Uuid::new_v4();
        info!(session = %id, user = %user_id, "corpus session started");
        Ok(Self {
            id,
            mode: SessionMode::Corpus,
            user_id: user_id.to_string(),
            doc_index,
            chunk_index,
            config,
            embedder,
            answer_generator,
            utility_generator,
            store,
            profile_context,
            qa_summary,
            memory: Vec::new(),
        })
    }

    /// Start a session over one uploaded document's ephemeral index. The
    /// document-level index is empty, so corpus narrowing never applies.
    #[allow(clippy::too_many_arguments)]
    pub fn uploaded(
        config: &'a Config,
        embedder: &'a dyn Embedder,
        answer_generator: &'a dyn Generator,
        utility_generator: &'a dyn Generator,
        store: &'a dyn ProfileStore,
        chunk_index: VectorIndex,
        user_id: &str,
    ) -> Result<Self> {
        let (profile_context, qa_summary) = load_user_context(config, store, user_id)?;
        let id = Uuid::new_v4();
        info!(session = %id, user = %user_id, "uploaded-document session started");
        Ok(Self {
            id,
            mode: SessionMode::Uploaded,
            user_id: user_id.to_string(),
            doc_index: VectorIndex::new(chunk_index.dims()),
            chunk_index,
            config,
            embedder,
            answer_generator,
            utility_generator,
            store,
            profile_context,
            qa_summary,
            memory: Vec::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn memory(&self) -> &[Turn] {
        &self.memory
    }

    /// Answer one question. Runs guardrail, retrieval, and a single
    /// generation call; appends the completed turn to memory and the
    /// external history store.
    pub async fn ask(&mut self, question: &str) -> Result<String> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(FALLBACK_MESSAGE.to_string());
        }

        if self.mode == SessionMode::Corpus && !self.is_on_topic(question).await {
            return Ok(OFF_TOPIC_MESSAGE.to_string());
        }

        let query_vec = self
            .embedder
            .embed_query(question)
            .await
            .context("Failed to embed the question")?;

        let retriever = Retriever::new(&self.doc_index, &self.chunk_index, &self.config.retrieval);
        let passages = retriever
            .retrieve(self.utility_generator, question, &query_vec)
            .await?;

        let prompt = self.build_answer_prompt(question, &passages);
        let raw = self.answer_generator.complete(&prompt).await?;

        let answer = raw.trim();
        if answer.is_empty() || answer == NOT_AVAILABLE {
            return Ok(FALLBACK_MESSAGE.to_string());
        }

        let answer = if self.mode == SessionMode::Corpus && !answer.contains(SIGNATURE) {
            format!("{}\n\n{}", answer, SIGNATURE)
        } else {
            answer.to_string()
        };

        self.memory.push(Turn {
            question: question.to_string(),
            answer: answer.clone(),
        });
        if let Err(e) = self.store.append_qa(&QaRecord {
            user_id: self.user_id.clone(),
            timestamp: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            category: "General".to_string(),
            question: question.to_string(),
            answer: answer.clone(),
        }) {
            warn!(error = %e, "failed to log turn to history store");
        }

        Ok(answer)
    }

    /// One classification call deciding whether the question is in domain.
    /// A classification failure lets the question through rather than
    /// blocking the user.
    async fn is_on_topic(&self, question: &str) -> bool {
        let prompt = format!(
            "Determine if this question is related to taxes, accounting, finance, or business \
             compliance.\n\
             Return ONLY 'YES' if tax/finance/accounting/business related, or 'NO' if about any \
             other topic.\n\n\
             Question: {}\n\n\
             Answer (ONLY 'YES' or 'NO'):",
            question
        );
        match self.utility_generator.complete(&prompt).await {
            Ok(response) => response.trim().eq_ignore_ascii_case("yes"),
            Err(e) => {
                warn!(error = %e, "guardrail classification failed, allowing question");
                true
            }
        }
    }

    fn build_answer_prompt(&self, question: &str, passages: &[RankedPassage]) -> String {
        let mut prompt = String::from(
            "You are Taxmen AI - a professional, engaging, and empathetic tax advisor with \
             comprehensive knowledge and user context.\n",
        );

        if !self.profile_context.is_empty() {
            prompt.push('\n');
            prompt.push_str(&self.profile_context);
            prompt.push('\n');
        }
        if !self.qa_summary.is_empty() {
            prompt.push('\n');
            prompt.push_str(&self.qa_summary);
            prompt.push('\n');
        }

        prompt.push_str(
            "\nCRITICAL INSTRUCTIONS - ANSWER ACCURACY:\n\
             1. NOT PURELY QUESTION-BASED: Analyze datasets and documents to provide calculated answers\n\
             2. MAINTAIN CONTINUITY: Use user profile and previous Q&A history - NEVER ask for information already provided\n\
             3. SHOW CALCULATIONS: Display step-by-step methodology with clear formulas\n\
             4. DATASET-DRIVEN: Reference specific documents and regulations, not generic advice\n\
             5. APPLY METHODOLOGIES: Use calculation rules from user context automatically\n\n\
             CRITICAL INSTRUCTIONS - RESPONSE FORMATTING & TONE:\n\
             1. Warm and reassuring: use a friendly, empathetic tone while maintaining professional accuracy\n\
             2. Well-structured: clear sections, bullet points for multi-step processes, bold for key figures\n\
             3. Clear language: explain complex tax concepts in accessible terms\n",
        );

        if self.mode == SessionMode::Corpus {
            prompt.push_str(&format!(
                "4. Professional signature: ALWAYS end with:\n\n{}\n",
                SIGNATURE
            ));
            if has_numerical_intent(question) {
                prompt.push_str(
                    "\nThe question asks about amounts or figures: state the exact numbers and \
                     show the calculation that produces them.\n",
                );
            }
        }

        let history = self.condensed_history();
        if !history.is_empty() {
            prompt.push_str("\nRECENT CONVERSATION:\n");
            prompt.push_str(&history);
        }

        prompt.push_str("\nRETRIEVED DOCUMENTS:\n");
        if passages.is_empty() {
            prompt.push_str("(no relevant passages found)\n");
        }
        for passage in passages {
            match &passage.meta {
                EntryMeta::Passage { filename, page, .. } => {
                    prompt.push_str(&format!("[{} page {}]\n{}\n\n", filename, page, passage.text));
                }
                EntryMeta::Summary { filename, .. } => {
                    prompt.push_str(&format!("[{}]\n{}\n\n", filename, passage.text));
                }
            }
        }

        prompt.push_str(&format!(
            "USER QUESTION: {}\n\nCOMPREHENSIVE ANSWER (accurate calculations + clear markdown \
             formatting):",
            question
        ));
        prompt
    }

    /// The last few turns, truncated per side, rendered for the prompt.
    fn condensed_history(&self) -> String {
        let limit = self.config.profile.history_limit;
        let start = self.memory.len().saturating_sub(limit);
        let mut out = String::new();
        for turn in &self.memory[start..] {
            out.push_str(&format!(
                "Q: {}\nA: {}\n",
                truncate_chars(&turn.question, HISTORY_TRUNCATE_CHARS),
                truncate_chars(&turn.answer, HISTORY_TRUNCATE_CHARS)
            ));
        }
        out
    }
}

/// Render the stored profile and recent history for a user.
fn load_user_context(
    config: &Config,
    store: &dyn ProfileStore,
    user_id: &str,
) -> Result<(String, String)> {
    let questionnaire = profile::load_questionnaire(&config.profile.questionnaire_path)?;
    let user_profile = store.load_profile(user_id)?;
    let history = store.recent_qa(user_id, config.profile.history_limit)?;
    Ok((
        profile::build_user_context(&questionnaire, &user_profile),
        profile::build_qa_summary(&history),
    ))
}

/// Heuristic: does the question ask for amounts or figures?
fn has_numerical_intent(question: &str) -> bool {
    let lower = question.to_lowercase();
    question.chars().any(|c| c.is_ascii_digit())
        || ["how much", "how many", "calculate", "aed", "amount", "threshold", "%"]
            .iter()
            .any(|kw| lower.contains(kw))
}

fn truncate_chars(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
