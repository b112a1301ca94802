//! # Taxpilot CLI (`taxpilot`)
//!
//! The `taxpilot` binary is the primary interface for Taxpilot. It provides
//! commands for corpus indexing, question answering against the corpus or
//! an uploaded document, profile questionnaire management, and collection
//! statistics.
//!
//! ## Usage
//!
//! ```bash
//! taxpilot --config ./config/taxpilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `taxpilot index` | Build or refresh the corpus indexes |
//! | `taxpilot ask "<question>"` | Answer one question against the corpus |
//! | `taxpilot chat` | Interactive question-answering session |
//! | `taxpilot upload <file>` | Ask questions against a single uploaded PDF |
//! | `taxpilot stats` | Print collection statistics |
//! | `taxpilot profile list` | List questionnaire categories and completion |
//! | `taxpilot profile show` | Print the rendered profile context |
//! | `taxpilot profile fill <category>` | Complete a questionnaire category |
//! | `taxpilot certificate extract <file>` | Extract fields from a certificate PDF |
//! | `taxpilot certificate list` | List stored certificate records |
//!
//! ## Examples
//!
//! ```bash
//! # Build the index cache (no-op when the corpus is unchanged)
//! taxpilot index --config ./config/taxpilot.toml
//!
//! # One-shot question
//! taxpilot ask "Am I eligible for Small Business Relief?"
//!
//! # Ask against an uploaded document instead of the corpus
//! taxpilot upload ./bank_statement.pdf --question "What is the total revenue?"
//!
//! # Fill in a questionnaire category for the default user
//! taxpilot profile fill "General Business Profile"
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use taxpilot::builder;
use taxpilot::cache;
use taxpilot::certificate::{self, CertificateStore, JsonCertificateStore};
use taxpilot::config;
use taxpilot::embedding::OpenAiEmbedder;
use taxpilot::llm::OpenAiChat;
use taxpilot::profile::{
    self, Answer, CategoryResponses, JsonFileStore, ProfileStore, QuestionKind,
};
use taxpilot::session::Session;
use taxpilot::stats;

/// Taxpilot CLI — retrieval-augmented tax advisory over a PDF corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/taxpilot.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "taxpilot",
    about = "Taxpilot — retrieval-augmented question answering over a tax-advisory PDF corpus",
    version,
    long_about = "Taxpilot ingests a directory of PDF documents into hierarchical vector \
    indexes cached by content fingerprint, and answers natural-language tax questions by \
    fusing similarity and diversity retrieval with a single generation call per question."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/taxpilot.toml`. Corpus, retrieval, embedding,
    /// generation, and profile settings are read from this file.
    #[arg(long, global = true, default_value = "./config/taxpilot.toml")]
    config: PathBuf,

    /// User identifier for profile context and history.
    #[arg(long, global = true, default_value = "default_user")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build or refresh the corpus indexes.
    ///
    /// Computes the corpus fingerprint and rebuilds the document and chunk
    /// indexes only when the corpus changed since the last run. This
    /// command is idempotent — an unchanged corpus loads from cache.
    Index,

    /// Answer one question against the corpus.
    Ask {
        /// The question to answer.
        question: String,
    },

    /// Interactive question-answering session against the corpus.
    ///
    /// Reads questions from stdin until `exit` or end-of-input. Turns
    /// accumulate in session memory, so follow-up questions can reference
    /// earlier answers.
    Chat,

    /// Ask questions against a single uploaded PDF.
    ///
    /// The document is extracted and indexed into an ephemeral, in-memory
    /// index scoped to this invocation; nothing is persisted. Files above
    /// the configured size cap are rejected.
    Upload {
        /// Path to the PDF file.
        file: PathBuf,

        /// Ask a single question instead of starting an interactive session.
        #[arg(long)]
        question: Option<String>,
    },

    /// Print collection statistics from the index cache.
    Stats,

    /// Profile questionnaire management.
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Certificate data extraction and management.
    Certificate {
        #[command(subcommand)]
        action: CertificateAction,
    },
}

/// Certificate subcommands.
#[derive(Subcommand)]
enum CertificateAction {
    /// Extract structured fields from a certificate PDF and store the record.
    ///
    /// Supports Federal Tax Authority registration certificates (Corporate
    /// Tax and VAT) and business licenses. Output that cannot be parsed
    /// into a record is an error; no partial record is stored.
    Extract {
        /// Path to the certificate PDF.
        file: PathBuf,
    },

    /// List stored certificate records.
    List,
}

/// Profile subcommands.
#[derive(Subcommand)]
enum ProfileAction {
    /// List questionnaire categories and their completion status.
    List,

    /// Print the rendered profile context used in answer prompts.
    Show,

    /// Complete one questionnaire category interactively.
    ///
    /// Prompts each question on stdin. An empty answer skips the question;
    /// invalid answers are re-asked. Multi-choice answers are entered as a
    /// comma-separated list.
    Fill {
        /// Category name, as shown by `taxpilot profile list`.
        category: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taxpilot=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let store = JsonFileStore::new(cfg.profile.store_dir.clone());

    match cli.command {
        Commands::Index => {
            let embedder = OpenAiEmbedder::new(&cfg.embedding)?;
            let utility = OpenAiChat::utility(&cfg.generation)?;
            let (doc_index, chunk_index) = cache::load_or_build(&cfg, &embedder, &utility).await?;
            let stats = stats::collection_stats(&doc_index, &chunk_index);
            println!(
                "Indexed {} documents into {} chunks ({:.1} chunks/doc).",
                stats.total_documents, stats.total_chunks, stats.avg_chunks_per_doc
            );
        }
        Commands::Ask { question } => {
            let embedder = OpenAiEmbedder::new(&cfg.embedding)?;
            let answer_gen = OpenAiChat::new(&cfg.generation)?;
            let utility = OpenAiChat::utility(&cfg.generation)?;
            let (doc_index, chunk_index) = cache::load_or_build(&cfg, &embedder, &utility).await?;

            let mut session = Session::corpus(
                &cfg, &embedder, &answer_gen, &utility, &store, doc_index, chunk_index, &cli.user,
            )?;
            let answer = session.ask(&question).await?;
            println!("{}", answer);
        }
        Commands::Chat => {
            let embedder = OpenAiEmbedder::new(&cfg.embedding)?;
            let answer_gen = OpenAiChat::new(&cfg.generation)?;
            let utility = OpenAiChat::utility(&cfg.generation)?;
            let (doc_index, chunk_index) = cache::load_or_build(&cfg, &embedder, &utility).await?;

            let mut session = Session::corpus(
                &cfg, &embedder, &answer_gen, &utility, &store, doc_index, chunk_index, &cli.user,
            )?;
            run_repl(&mut session).await?;
        }
        Commands::Upload { file, question } => {
            let embedder = OpenAiEmbedder::new(&cfg.embedding)?;
            let answer_gen = OpenAiChat::new(&cfg.generation)?;
            let utility = OpenAiChat::utility(&cfg.generation)?;
            let chunk_index =
                builder::build_ephemeral_index(&file, cfg.corpus.upload_max_bytes, &embedder)
                    .await?;
            println!(
                "Indexed {} with {} chunks.",
                file.display(),
                chunk_index.len()
            );

            let mut session = Session::uploaded(
                &cfg, &embedder, &answer_gen, &utility, &store, chunk_index, &cli.user,
            )?;
            match question {
                Some(q) => println!("{}", session.ask(&q).await?),
                None => run_repl(&mut session).await?,
            }
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
        Commands::Profile { action } => match action {
            ProfileAction::List => {
                let questionnaire = profile::load_questionnaire(&cfg.profile.questionnaire_path)?;
                let user_profile = store.load_profile(&cli.user)?;
                println!("Questionnaire categories for {}:", cli.user);
                for (name, category) in &questionnaire {
                    let mark = if user_profile.contains_key(name) {
                        "x"
                    } else {
                        " "
                    };
                    println!("  [{}] {} — {}", mark, name, category.description);
                }
            }
            ProfileAction::Show => {
                let questionnaire = profile::load_questionnaire(&cfg.profile.questionnaire_path)?;
                let user_profile = store.load_profile(&cli.user)?;
                let context = profile::build_user_context(&questionnaire, &user_profile);
                if context.is_empty() {
                    println!("No completed categories for {}.", cli.user);
                } else {
                    println!("{}", context);
                }
            }
            ProfileAction::Fill { category } => {
                fill_category(&cfg, &store, &cli.user, &category)?;
            }
        },
        Commands::Certificate { action } => {
            let cert_store = JsonCertificateStore::new(cfg.profile.certificates_path.clone());
            match action {
                CertificateAction::Extract { file } => {
                    let utility = OpenAiChat::utility(&cfg.generation)?;
                    let filename = file
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let bytes = std::fs::read(&file)?;

                    let record =
                        certificate::extract_certificate(&utility, &bytes, &filename).await?;
                    cert_store.append(&record)?;

                    println!("Stored certificate record for {}.", record.filename);
                    println!("  document type: {}", display_field(&record.document_type));
                    println!(
                        "  legal name:    {}",
                        display_field(&record.legal_name_english)
                    );
                    println!(
                        "  TRN:           {}",
                        display_field(&record.tax_registration_number)
                    );
                    println!("  license no.:   {}", display_field(&record.license_number));
                }
                CertificateAction::List => {
                    let records = cert_store.load_all()?;
                    if records.is_empty() {
                        println!("No certificate records stored.");
                    } else {
                        println!("{} certificate record(s):", records.len());
                        for r in &records {
                            println!(
                                "  {} — {} ({})",
                                r.filename,
                                display_field(&r.document_type),
                                r.upload_date
                            );
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

/// Interactive loop shared by `chat` and `upload`.
async fn run_repl(session: &mut Session<'_>) -> Result<()> {
    println!("Type a question, or `exit` to quit.");
    loop {
        let Some(line) = read_line("> ")? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }
        match session.ask(question).await {
            Ok(answer) => println!("\n{}\n", answer),
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }
    Ok(())
}

/// Prompt every question in a category, validate the answers, and save.
fn fill_category(
    cfg: &taxpilot::config::Config,
    store: &dyn ProfileStore,
    user: &str,
    category_name: &str,
) -> Result<()> {
    let questionnaire = profile::load_questionnaire(&cfg.profile.questionnaire_path)?;
    let category = questionnaire.get(category_name).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown category '{}'. Run `taxpilot profile list` to see available categories.",
            category_name
        )
    })?;

    println!("{}", category.description);
    println!("Press Enter to skip a question.\n");

    let mut answers: BTreeMap<String, Answer> = BTreeMap::new();
    for question in &category.questions {
        match &question.kind {
            QuestionKind::SingleChoice { options } | QuestionKind::MultiChoice { options } => {
                println!("{} (options: {})", question.prompt, options.join(", "));
            }
            _ => println!("{}", question.prompt),
        }

        loop {
            let Some(line) = read_line("  answer: ")? else {
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                break;
            }

            let answer = match &question.kind {
                QuestionKind::MultiChoice { .. } => Answer::Many(
                    input
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                ),
                _ => Answer::One(input.to_string()),
            };

            match profile::validate_answer(&question.kind, &answer) {
                Ok(()) => {
                    answers.insert(question.id.clone(), answer);
                    break;
                }
                Err(e) => println!("  invalid: {:#}", e),
            }
        }
    }

    if answers.is_empty() {
        println!("Nothing answered; category left unchanged.");
        return Ok(());
    }

    store.save_responses(
        user,
        category_name,
        CategoryResponses {
            completed_at: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            answers,
        },
    )?;
    println!("Saved responses for '{}'.", category_name);
    Ok(())
}

/// Render an extracted field for display; empty fields show as a dash.
fn display_field(value: &str) -> &str {
    if value.trim().is_empty() {
        "-"
    } else {
        value
    }
}

/// Read one line from stdin; `None` on end-of-input.
fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    let n = std::io::stdin().read_line(&mut line)?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}
