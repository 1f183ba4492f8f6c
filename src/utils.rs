use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

static SENTENCE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?s)([^.!?]+[.!?]+)|([^.!?]+$)"));

/// Splits text into sentences, keeping the terminating punctuation.
pub fn split_sentences(text: &str) -> Vec<String> {
    let re = match &*SENTENCE {
        Ok(re) => re,
        Err(e) => {
            warn!("Sentence splitter unavailable ({}); treating text as one sentence", e);
            let whole = text.trim();
            return if whole.is_empty() { Vec::new() } else { vec![whole.to_string()] };
        }
    };
    re.find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Groups sentences into chunks of at most `max_chars` (a single long sentence
/// becomes its own chunk).
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        warn!("No sentence breaks found; returning whole text as one chunk");
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for s in sentences {
        if current.is_empty() {
            current.push_str(&s);
        } else if current.len() + 1 + s.len() <= max_chars {
            current.push(' ');
            current.push_str(&s);
        } else {
            chunks.push(current);
            current = s;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Deletes a directory tree. Missing directories count as success.
pub fn remove_dir_best_effort(dir: &Path) -> bool {
    if !dir.exists() {
        return true;
    }
    info!("Cleaning up output folder: {}", dir.display());
    match fs::remove_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to clean up {}: {}", dir.display(), e);
            false
        }
    }
}

/// Run correlation id, also used for output file names.
pub fn run_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
