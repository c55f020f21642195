//! Interactive chat loop.
//!
//! Reads one line at a time from stdin. A handful of case-insensitive
//! words are commands; any other non-blank line is a question. Answers
//! stream to stdout as they arrive. Logs stay on stderr.
//!
//! The loop ends on `exit`/`quit`, end of input, or Ctrl-C. Ctrl-C while
//! a command is running (a streamed answer, `rebuild`, `status`) cancels
//! it before leaving.

use std::future::Future;
use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use ragchat_core::models::RetrievalResult;

use crate::engine::RagEngine;

const HELP: &str = "\
Commands:
  status    show the vector store, record count, history length, and models
  rebuild   clear the knowledge base and load it again from disk
  clear     forget the conversation so far
  help      show this message
  exit      leave (also: quit, Ctrl-C, Ctrl-D)
Anything else is sent as a question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Exit,
    Rebuild,
    Status,
    Clear,
    Help,
    Ask(&'a str),
    Blank,
}

pub fn parse_command(line: &str) -> Command<'_> {
    let trimmed = line.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "" => Command::Blank,
        "exit" | "quit" => Command::Exit,
        "rebuild" => Command::Rebuild,
        "status" => Command::Status,
        "clear" => Command::Clear,
        "help" => Command::Help,
        _ => Command::Ask(trimmed),
    }
}

/// One line naming the distinct files an answer drew on.
pub fn format_sources(sources: &[RetrievalResult]) -> Option<String> {
    let mut seen: Vec<&str> = Vec::new();
    for s in sources {
        if !seen.contains(&s.source_path.as_str()) {
            seen.push(&s.source_path);
        }
    }
    if seen.is_empty() {
        None
    } else {
        Some(format!("[sources: {}]", seen.join(", ")))
    }
}

pub async fn run(engine: &mut RagEngine) -> Result<()> {
    let interactive = atty::is(atty::Stream::Stdin);
    if interactive {
        println!("Ask a question about your knowledge base. Type 'help' for commands.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if interactive {
            print!("> ");
            std::io::stdout().flush()?;
        }

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                info!("interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        let finished = match parse_command(&line) {
            Command::Blank => continue,
            Command::Exit => break,
            Command::Help => {
                println!("{}", HELP);
                true
            }
            Command::Clear => {
                engine.clear_history();
                println!("Conversation cleared.");
                true
            }
            Command::Status => until_interrupted(async {
                println!("{}", engine.status().await);
            })
            .await
            .is_some(),
            Command::Rebuild => until_interrupted(async {
                match engine.rebuild().await {
                    Ok(report) => println!("{}", report),
                    Err(e) => {
                        error!(error = %e, "rebuild failed");
                        println!("Rebuild failed: {}", e);
                    }
                }
            })
            .await
            .is_some(),
            Command::Ask(question) => until_interrupted(answer_to_stdout(engine, question))
                .await
                .is_some(),
        };
        if !finished {
            println!();
            info!("interrupted");
            break;
        }
    }
    Ok(())
}

/// Run `work` unless Ctrl-C arrives first, in which case it is dropped
/// and `None` is returned.
pub async fn until_interrupted<F: Future>(work: F) -> Option<F::Output> {
    tokio::select! {
        output = work => Some(output),
        _ = tokio::signal::ctrl_c() => None,
    }
}

/// Ask one question and print the streamed answer followed by its sources.
pub async fn answer_to_stdout(engine: &mut RagEngine, question: &str) -> bool {
    let mut printed = false;
    let answer = engine
        .ask(question, |fragment| {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(fragment.as_bytes());
            let _ = stdout.flush();
            printed = true;
        })
        .await;

    if answer.failed {
        if printed {
            println!();
        }
        println!("{}", answer.text);
        return false;
    }

    println!();
    if let Some(sources) = format_sources(&answer.sources) {
        println!("{}", sources);
    }
    true
}
