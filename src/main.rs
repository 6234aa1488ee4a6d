//! # askdocs CLI
//!
//! Drives the assistant from the command line. Answers and listings go to
//! stdout; logs go to stderr (filter with `RUST_LOG`, default `askdocs=info`).
//!
//! ## Usage
//!
//! ```bash
//! askdocs --config ./config/askdocs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdocs ask <user> "<question>"` | Answer a question from the user's documents |
//! | `askdocs history <user>` | Print the user's transcript |
//! | `askdocs clear-history <user>` | Delete the user's transcript |
//! | `askdocs upload <user> <file>` | Store a file and rebuild the user's index |
//! | `askdocs files <user>` | List the user's files |
//! | `askdocs delete <user> <filename>` | Remove a file and rebuild the user's index |
//! | `askdocs rebuild <user>` | Rebuild the user's index |

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use askdocs::assistant::Assistant;
use askdocs::config;
use askdocs::error::Error;

/// askdocs: ask questions about your own documents.
#[derive(Parser)]
#[command(
    name = "askdocs",
    about = "Per-user document assistant with a bounded reasoning agent",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdocs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question.
    Ask {
        user: String,
        question: String,
    },

    /// Print a user's question/answer history, oldest first.
    History {
        user: String,

        /// Print entries as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a user's history.
    ClearHistory { user: String },

    /// Store a file for a user and rebuild their index.
    Upload {
        user: String,
        file: PathBuf,

        /// Store under this name instead of the file's own name.
        #[arg(long)]
        name: Option<String>,
    },

    /// List a user's files.
    Files { user: String },

    /// Delete one of a user's files and rebuild their index.
    Delete { user: String, filename: String },

    /// Rebuild a user's index from their current files.
    Rebuild { user: String },
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "askdocs=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    let assistant = Assistant::from_config(&cfg).await?;

    match cli.command {
        Commands::Ask { user, question } => {
            let reply = assistant.ask(&question, &user).await;
            println!("{}", reply.response);
        }
        Commands::History { user, json } => {
            let entries = assistant.get_history(&user).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No history for {}.", user);
            } else {
                for entry in entries {
                    println!("[{}]", entry.timestamp.format("%Y-%m-%d %H:%M:%S"));
                    println!("Q: {}", entry.question);
                    println!("A: {}", entry.answer);
                    println!();
                }
            }
        }
        Commands::ClearHistory { user } => {
            assistant.clear_history(&user).await?;
            println!("History cleared for {}.", user);
        }
        Commands::Upload { user, file, name } => {
            let filename = match name {
                Some(n) => n,
                None => match file.file_name().and_then(|f| f.to_str()) {
                    Some(n) => n.to_string(),
                    None => bail!("Cannot determine a file name for {}", file.display()),
                },
            };
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let info = assistant.upload_document(&user, &filename, &bytes).await?;
            println!("Uploaded {} ({} bytes) for {}.", info.name, info.size, user);
        }
        Commands::Files { user } => {
            let files = assistant.list_documents(&user).await?;
            if files.is_empty() {
                println!("No files for {}.", user);
            }
            for f in files {
                println!(
                    "{:<40} {:>10}  {}",
                    f.name,
                    f.size,
                    f.uploaded_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Commands::Delete { user, filename } => {
            match assistant.delete_document(&user, &filename).await {
                Ok(()) => println!("Deleted {} for {}.", filename, user),
                Err(Error::NotFound(_)) => bail!("File not found: {}", filename),
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Rebuild { user } => {
            let meta = assistant.rebuild_index(&user).await;
            println!(
                "Rebuilt index for {}: {:?}, {} documents, {} chunks ({} / {} dims).",
                user, meta.kind, meta.document_count, meta.chunk_count, meta.model, meta.dims
            );
        }
    }

    Ok(())
}
