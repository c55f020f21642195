//! Knowledge-base build progress.
//!
//! Progress is written to **stderr** so stdout carries only answers.

use std::io::Write;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildProgressEvent {
    /// Walking the knowledge-base folder. Total unknown.
    Scanning { root: String },
    /// `n` of `total` chunks embedded and stored.
    Embedding { n: u64, total: u64 },
}

pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human-friendly progress on stderr: "build  embedding  1,200 / 5,000 chunks".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = render(&event);
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

fn render(event: &BuildProgressEvent) -> String {
    match event {
        BuildProgressEvent::Scanning { root } => format!("build  scanning {}\n", root),
        BuildProgressEvent::Embedding { n, total } => format!(
            "build  embedding  {} / {} chunks\n",
            format_number(*n),
            format_number(*total)
        ),
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Human progress when stderr is a TTY, otherwise none.
pub fn default_reporter() -> Box<dyn BuildProgressReporter> {
    if atty::is(atty::Stream::Stderr) {
        Box::new(StderrProgress)
    } else {
        Box::new(NoProgress)
    }
}
