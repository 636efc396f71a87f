//! # `qa`
//!
//! Command-line front end for docs-qa.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qa init` | Create the SQLite database and schema |
//! | `qa ask "<question>"` | Answer a question with references |
//! | `qa embed missing` | Backfill embeddings for unembedded chunks |
//!
//! Credentials are read from the environment (`OPENAI_API_KEY`,
//! `GROQ_API_KEY`, `SUPABASE_URL`); a `.env` file in the working directory
//! is loaded first.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docs_qa::config::{self, Secrets};
use docs_qa::models::Answer;
use docs_qa::rag::Rag;
use docs_qa::{backfill, migrate};

#[derive(Parser)]
#[command(
    name = "qa",
    about = "Answer questions from your documents, with citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./config/qa.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Answer a question from the indexed documents.
    ///
    /// With no question on the command line, prompts for one on stdin.
    Ask {
        /// The question; multiple words are joined with spaces.
        question: Vec<String>,

        /// Print every reference snippet in full.
        #[arg(long, short = 'c')]
        show_context: bool,

        /// Print the answer and references as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage chunk embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed every chunk that has no embedding yet.
    Missing {
        /// Override the batch size from config (texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_question(words: Vec<String>) -> anyhow::Result<String> {
    if !words.is_empty() {
        return Ok(words.join(" ").trim().to_string());
    }

    print!("Enter your question: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read question from stdin")?;
    Ok(line.trim().to_string())
}

fn print_answer(result: &Answer, show_context: bool) {
    println!("\nAnswer:\n{}", result.answer);

    if show_context {
        println!("\n---\nContext:");
        for r in &result.references {
            println!("[{}] {}\n{}\n", r.index, r.source, r.snippet);
        }
    }

    if result.references.is_empty() {
        println!("\n(No document references found)");
        return;
    }

    println!("\nReferences:");
    for r in &result.references {
        let preview: String = r.snippet.replace('\n', " ").chars().take(120).collect();
        println!("- [{}] {}: {}...", r.index, r.source, preview);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // .env is optional; load it first so RUST_LOG there is honored
    let _ = dotenvy::dotenv();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let secrets = Secrets::from_env();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ask {
            question,
            show_context,
            json,
        } => {
            let question = read_question(question)?;
            if question.is_empty() {
                println!("No question provided; exiting.");
                return Ok(());
            }

            let rag = Rag::from_config(&cfg, &secrets)?;
            let result = rag.answer_question(&question).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_answer(&result, show_context);
            }
        }
        Commands::Embed { action } => match action {
            EmbedAction::Missing { batch_size, limit } => {
                backfill::run_embed_missing(&cfg, &secrets, batch_size, limit).await?;
            }
        },
    }

    Ok(())
}
