use crate::stages::{Idea, Script, VideoMetadata};
use crate::utils::truncate_chars;

const MAX_TITLE_CHARS: usize = 50;
const MAX_SUMMARY_CHARS: usize = 200;

/// Upload metadata derived from the script, with the idea as fallback.
pub fn build_metadata(script: &Script, idea: &Idea, topic: &str) -> VideoMetadata {
    let first_line = script
        .text
        .split("[PAUSE]")
        .next()
        .unwrap_or_default()
        .lines()
        .next()
        .unwrap_or_default();
    let first_sentence = first_line.split('.').next().unwrap_or_default().trim();

    let title = if first_sentence.is_empty() {
        truncate_chars(&idea.title, MAX_TITLE_CHARS)
    } else {
        truncate_chars(first_sentence, MAX_TITLE_CHARS)
    };

    let keywords = if script.keywords.is_empty() {
        &idea.keywords
    } else {
        &script.keywords
    };

    let parts: Vec<&str> = script
        .text
        .split("[PAUSE]")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let summary = match parts.as_slice() {
        [_, second, ..] => truncate_chars(second, MAX_SUMMARY_CHARS),
        _ => truncate_chars(&parts.join(" "), MAX_SUMMARY_CHARS),
    };
    let summary = if summary.is_empty() {
        idea.description.clone().unwrap_or_default()
    } else {
        summary
    };

    let hashtag = keywords
        .first()
        .map(|k| k.as_str())
        .unwrap_or(topic)
        .replace(' ', "");

    let mut description = summary;
    if !keywords.is_empty() {
        description.push_str(&format!("\n\nKeywords: {}", keywords.join(", ")));
    }
    if !hashtag.is_empty() {
        description.push_str(&format!("\n#{hashtag}"));
    }
    description.push_str("\n#Shorts");

    let mut tags = keywords.clone();
    if tags.is_empty() {
        tags.push(topic.replace(' ', ""));
    }
    tags.push("Shorts".to_string());

    VideoMetadata {
        title,
        description,
        tags,
    }
}
