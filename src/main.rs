//! # ragchat CLI
//!
//! ```bash
//! ragchat                        # build if needed, then chat
//! ragchat build --rebuild        # reload the knowledge base from disk
//! ragchat ask "What color is the sky?"
//! ragchat status
//! ```
//!
//! Exit code 1 means startup failed (bad config, missing credential,
//! unreachable or mismatched store). Leaving the chat exits 0, and so
//! does Ctrl-C at any point, including during the initial build.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use ragchat::config::{self, Config};
use ragchat::engine::RagEngine;
use ragchat::{logging, progress, repl};

/// Chat with a folder of documents.
#[derive(Parser)]
#[command(name = "ragchat", version, about = "Chat with a folder of documents")]
struct Cli {
    /// Path to configuration file (TOML). Skipped when the file does not exist.
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the knowledge base if empty, then start the chat loop (default).
    Chat,

    /// Load the knowledge base into the vector store.
    Build {
        /// Clear the collection first and ingest everything again.
        #[arg(long)]
        rebuild: bool,
    },

    /// Answer a single question and exit.
    Ask {
        /// The question to ask.
        question: String,
    },

    /// Show store, record count, history length, and models.
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };

    match repl::until_interrupted(run(cli.command.unwrap_or(Commands::Chat), &config)).await {
        Some(Ok(code)) => code,
        Some(Err(e)) => {
            error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
        None => {
            info!("interrupted");
            ExitCode::SUCCESS
        }
    }
}

async fn run(command: Commands, config: &Config) -> anyhow::Result<ExitCode> {
    let mut engine = RagEngine::connect(config)
        .await?
        .with_progress(progress::default_reporter());

    match command {
        Commands::Chat => {
            println!("{}", engine.build_knowledge_base().await?);
            repl::run(&mut engine).await?;
        }
        Commands::Build { rebuild } => {
            let report = if rebuild {
                engine.rebuild().await?
            } else {
                engine.build_knowledge_base().await?
            };
            println!("{}", report);
            for warning in &report.warnings {
                eprintln!("skipped {}", warning);
            }
        }
        Commands::Ask { question } => {
            engine.build_knowledge_base().await?;
            if !repl::answer_to_stdout(&mut engine, &question).await {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status => println!("{}", engine.status().await),
    }
    Ok(ExitCode::SUCCESS)
}
