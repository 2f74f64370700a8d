//! Context block prepended to the opening turn.
//!
//! [`LexicalIndex`] is a keyword stand-in for embedding search. It walks the
//! workspace and scores fixed-size chunks of each file by how many query
//! terms they contain.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::io::config::RetrievalConfig;

const MAX_FILE_BYTES: u64 = 1_000_000;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

/// Turns a user message into a context block (possibly empty).
pub trait ContextSource: Send + Sync {
    fn context_for(&self, message: &str) -> Result<String>;
}

/// Never adds context.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextSource for NoContext {
    fn context_for(&self, _message: &str) -> Result<String> {
        Ok(String::new())
    }
}

#[derive(Debug, Clone)]
pub struct LexicalIndex {
    root: PathBuf,
    skip: Vec<String>,
    chunk_bytes: usize,
    max_results: usize,
}

#[derive(Debug)]
struct Chunk {
    path: String,
    index: usize,
    text: String,
    score: usize,
}

impl LexicalIndex {
    pub fn new(root: impl Into<PathBuf>, config: &RetrievalConfig, protected: &[String]) -> Self {
        let mut skip = config.skip_dirs.clone();
        skip.extend(protected.iter().cloned());
        Self {
            root: root.into(),
            skip,
            chunk_bytes: config.chunk_bytes.max(1),
            max_results: config.max_results,
        }
    }

    fn skipped(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let Ok(relative) = entry.path().strip_prefix(&self.root) else {
            return true;
        };
        let name = entry.file_name().to_string_lossy();
        self.skip
            .iter()
            .any(|s| name == s.as_str() || relative == Path::new(s))
    }

    fn search(&self, message: &str) -> Result<Vec<Chunk>> {
        let query = terms(message);
        if query.is_empty() || self.max_results == 0 {
            return Ok(Vec::new());
        }

        let mut scored = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.skipped(e));
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > MAX_FILE_BYTES {
                continue;
            }
            // Non-UTF-8 files are treated as binary and skipped.
            let Ok(contents) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            for (index, text) in chunks(&contents, self.chunk_bytes).into_iter().enumerate() {
                let chunk_terms = terms(text);
                let score = query.intersection(&chunk_terms).count();
                if score > 0 {
                    scored.push(Chunk {
                        path: relative.clone(),
                        index,
                        text: text.to_string(),
                        score,
                    });
                }
            }
        }

        scored.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.index.cmp(&b.index))
        });
        scored.truncate(self.max_results);
        Ok(scored)
    }
}

impl ContextSource for LexicalIndex {
    fn context_for(&self, message: &str) -> Result<String> {
        let hits = self.search(message)?;
        debug!(hits = hits.len(), "retrieval search finished");
        if hits.is_empty() {
            return Ok(String::new());
        }
        let mut out = String::from("Relevant code snippets:\n");
        for (i, hit) in hits.iter().enumerate() {
            out.push_str(&format!(
                "--- Snippet {} from {} ---\n{}\n",
                i + 1,
                hit.path,
                hit.text
            ));
        }
        Ok(out)
    }
}

/// Context for `message`, or empty when the source fails.
pub fn context_or_empty(source: &dyn ContextSource, message: &str) -> String {
    match source.context_for(message) {
        Ok(context) => context,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "retrieval failed; continuing without context");
            String::new()
        }
    }
}

fn terms(text: &str) -> HashSet<String> {
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.chars().count() > 2)
        .collect()
}

/// Split into pieces of at most `size` bytes, cutting on char boundaries.
fn chunks(text: &str, size: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + size).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single char wider than `size`.
            end = start
                + text[start..]
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1);
        }
        out.push(&text[start..end]);
        start = end;
    }
    out
}
