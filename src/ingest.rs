//! Knowledge-base ingestion.
//!
//! Walks the knowledge-base root and turns every text-like file into a
//! [`Document`]. The first-level folder a file sits under becomes its
//! category:
//!
//! ```text
//! knowledge_base/
//! ├── facts/
//! │   └── sky.txt          → category "facts"
//! └── policies/
//!     └── remote/work.md   → category "policies"
//! ```
//!
//! Files directly under the root have no category and are ignored.
//! Unreadable files and folders become [`IngestionWarning`]s; they never
//! stop the scan.

use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use ragchat_core::error::{IngestionWarning, RagError, Result};
use ragchat_core::models::Document;

use crate::config::KnowledgeBaseConfig;

const EXAMPLE_CATEGORY: &str = "example";
const EXAMPLE_FILE: &str = "welcome.txt";
const EXAMPLE_TEXT: &str = "Welcome to your knowledge base.\n\n\
Create one folder per topic under this directory and put plain text or Markdown \
files inside. The folder name becomes the category shown next to every answer \
that uses the file. Type 'rebuild' in the chat to load new files.\n";

/// Documents found by a scan plus the problems met along the way.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Sorted by source path.
    pub documents: Vec<Document>,
    pub warnings: Vec<IngestionWarning>,
    /// The root was missing and a sample folder was created instead.
    pub created_example: bool,
}

/// Scan the knowledge-base root.
///
/// A missing root is replaced with `<root>/example/welcome.txt` and the
/// scan returns no documents for this run.
pub fn scan_knowledge_base(config: &KnowledgeBaseConfig) -> Result<IngestReport> {
    let root = &config.root;
    let mut report = IngestReport::default();

    if !root.exists() {
        match create_example(root) {
            Ok(()) => {
                info!(
                    root = %root.display(),
                    "knowledge base not found; created an example folder, starting empty"
                );
                report.created_example = true;
            }
            Err(e) => push_warning(&mut report.warnings, root, e),
        }
        return Ok(report);
    }
    if !root.is_dir() {
        return Err(RagError::Config(format!(
            "knowledge base root is not a directory: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root.as_path()).to_path_buf();
                push_warning(&mut report.warnings, &path, e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let parts = path_parts(relative);
        if parts.len() < 2 {
            debug!(path = %path.display(), "skipping file outside any category folder");
            continue;
        }
        let rel_str = parts.join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_document(path, &parts[0], &rel_str) {
            Ok(Some(doc)) => report.documents.push(doc),
            Ok(None) => debug!(path = %rel_str, "skipping empty file"),
            Err(reason) => push_warning(&mut report.warnings, path, reason),
        }
    }

    report
        .documents
        .sort_by(|a, b| a.source_path.cmp(&b.source_path));

    info!(
        documents = report.documents.len(),
        warnings = report.warnings.len(),
        "scanned knowledge base"
    );
    Ok(report)
}

/// Stable document id: hex SHA-256 prefix of the relative path.
pub fn document_id(source_path: &str) -> String {
    let digest = Sha256::digest(source_path.as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

fn read_document(
    path: &Path,
    category: &str,
    rel_str: &str,
) -> std::result::Result<Option<Document>, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("unreadable: {}", e))?;
    let text = String::from_utf8(bytes).map_err(|_| "not valid UTF-8 text".to_string())?;
    if text.trim().is_empty() {
        return Ok(None);
    }

    let modified_at = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    Ok(Some(Document {
        id: document_id(rel_str),
        text,
        category: category.to_string(),
        source_path: rel_str.to_string(),
        modified_at,
    }))
}

fn path_parts(relative: &Path) -> Vec<String> {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect()
}

fn push_warning(warnings: &mut Vec<IngestionWarning>, path: &Path, reason: impl ToString) {
    let warning = IngestionWarning {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };
    warn!(path = %warning.path, reason = %warning.reason, "skipping unreadable entry");
    warnings.push(warning);
}

fn create_example(root: &Path) -> std::io::Result<()> {
    let dir = root.join(EXAMPLE_CATEGORY);
    std::fs::create_dir_all(&dir)?;
    std::fs::write(dir.join(EXAMPLE_FILE), EXAMPLE_TEXT)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| RagError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::Config(format!("invalid glob set: {}", e)))
}
