use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use regex::Regex;

use crate::error::{Error, Result};
use crate::stages::Script;
use crate::utils::split_sentences;

const COMMA_PAUSE: f64 = 0.2;
const SENTENCE_END_PAUSE: f64 = 0.4;
const WORD_WEIGHT_ALPHA: f64 = 0.75;

#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Caption cues from the script: each cue runs until the next one (the last
/// until the target duration) and shows the matching sentence.
pub fn derive_captions(script: &Script) -> Vec<Caption> {
    let sentences = split_sentences(&script.text);
    let total = f64::from(script.duration_seconds);
    let cues = &script.visual_cues;

    cues.iter()
        .enumerate()
        .map(|(i, cue)| {
            let end = cues.get(i + 1).map_or(total, |next| next.time_seconds);
            let text = sentences.get(i).cloned().unwrap_or_else(|| cue.content.clone());
            Caption {
                start: cue.time_seconds,
                end: end.max(cue.time_seconds),
                text,
            }
        })
        .collect()
}

/// Word-level captions timed against real narration chunks, given as
/// `(duration_seconds, chunk_text)` in playback order.
///
/// Punctuation advances the clock by a fixed pause; the remaining time is
/// shared between words weighted by `len^0.75`.
pub fn align_to_audio(chunks: &[(f64, String)]) -> Result<Vec<Caption>> {
    let word_regex =
        Regex::new(r"(\w[\w'-]*)|([,.!?])").map_err(|e| Error::Assembly(format!("caption tokenizer: {e}")))?;

    let mut captions = Vec::new();
    let mut cumulative = 0.0_f64;
    for (dur, chunk_text) in chunks {
        let start_of_chunk = cumulative;
        let end_of_chunk = cumulative + dur;
        let elements: Vec<&str> = word_regex.find_iter(chunk_text).map(|m| m.as_str()).collect();
        if elements.is_empty() {
            captions.push(Caption {
                start: start_of_chunk,
                end: end_of_chunk,
                text: chunk_text.clone(),
            });
            cumulative = end_of_chunk;
            continue;
        }

        let mut total_pause = 0.0;
        let mut words = Vec::new();
        for &element in &elements {
            match element {
                "," => total_pause += COMMA_PAUSE,
                "." | "!" | "?" => total_pause += SENTENCE_END_PAUSE,
                _ => words.push(element),
            }
        }
        let word_time = (dur - total_pause).max(0.0);
        let total_weight: f64 = words
            .iter()
            .map(|w| (w.chars().count() as f64).powf(WORD_WEIGHT_ALPHA))
            .sum();

        let mut t = start_of_chunk;
        for element in elements {
            match element {
                "," => t += COMMA_PAUSE,
                "." | "!" | "?" => t += SENTENCE_END_PAUSE,
                word => {
                    let weight = (word.chars().count() as f64).powf(WORD_WEIGHT_ALPHA);
                    let word_dur = if total_weight > 0.0 {
                        word_time * weight / total_weight
                    } else {
                        0.0
                    };
                    captions.push(Caption {
                        start: t,
                        end: t + word_dur,
                        text: word.to_string(),
                    });
                    t += word_dur;
                }
            }
        }
        cumulative = end_of_chunk;
    }
    Ok(captions)
}

pub fn write_srt(path: &Path, captions: &[Caption]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = File::create(path)?;
    for (i, caption) in captions.iter().enumerate() {
        writeln!(f, "{}", i + 1)?;
        writeln!(f, "{} --> {}", format_srt_time(caption.start), format_srt_time(caption.end))?;
        for line in wrap_text(&caption.text, 80) {
            writeln!(f, "{}", line)?;
        }
        writeln!(f)?;
    }
    Ok(())
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

pub(crate) fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        if current.len() + word.len() + 1 > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
