//! Collaborator interfaces consumed by the pipeline, and the data passed
//! between stages.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::split_sentences;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Idea {
    pub title: String,
    #[serde(default)]
    pub hook: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub cta: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "keywords")]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualCue {
    pub time_seconds: f64,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default, alias = "cue")]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    #[serde(rename = "script")]
    pub text: String,
    #[serde(default)]
    pub duration_seconds: u32,
    #[serde(default)]
    pub visual_cues: Vec<VisualCue>,
    #[serde(default, deserialize_with = "keywords")]
    pub keywords: Vec<String>,
}

/// What a generator hands back for the script stage.
#[derive(Debug, Clone)]
pub enum ScriptDraft {
    Structured(Script),
    /// Older generators return bare narration text.
    Legacy(String),
}

impl ScriptDraft {
    /// Normalises either shape into a [`Script`].
    pub fn into_script(self, duration_secs: u32) -> Script {
        match self {
            ScriptDraft::Structured(mut script) => {
                if script.duration_seconds == 0 {
                    script.duration_seconds = duration_secs;
                }
                if script.visual_cues.is_empty() {
                    script.visual_cues = even_cues(&script.text, script.duration_seconds);
                }
                script
            }
            ScriptDraft::Legacy(text) => Script {
                visual_cues: even_cues(&text, duration_secs),
                text,
                duration_seconds: duration_secs,
                keywords: Vec::new(),
            },
        }
    }
}

/// One cue per sentence, evenly spaced over the target duration.
pub fn even_cues(text: &str, duration_secs: u32) -> Vec<VisualCue> {
    let mut sentences = split_sentences(text);
    if sentences.is_empty() {
        sentences.push(text.trim().to_string());
    }
    let seg_len = (f64::from(duration_secs) / sentences.len() as f64).max(1.0);
    sentences
        .into_iter()
        .enumerate()
        .map(|(i, sentence)| VisualCue {
            time_seconds: i as f64 * seg_len,
            duration_seconds: Some(seg_len),
            content: sentence,
        })
        .collect()
}

/// Everything the assembler needs for one render.
#[derive(Debug, Clone)]
pub struct AssemblyJob {
    pub script: Script,
    pub captions_path: Option<PathBuf>,
    pub thumbnail_path: Option<PathBuf>,
    pub title: String,
    pub output_file: PathBuf,
    pub work_dir: PathBuf,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

pub trait ContentGenerator: Send + Sync {
    fn generate_ideas(&self, topic: &str, count: usize, duration_secs: u32) -> Result<Vec<Idea>>;

    fn create_script(&self, idea: &Idea, topic: &str, duration_secs: u32) -> Result<ScriptDraft>;
}

pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Writes narration for `text` to `output` and returns the written path.
    fn synthesize(&self, text: &str, output: &Path) -> Result<PathBuf>;
}

pub trait ThumbnailRenderer: Send + Sync {
    fn render(&self, title: &str, output_dir: &Path) -> Result<PathBuf>;
}

pub trait MediaAssembler: Send + Sync {
    fn assemble(&self, job: &AssemblyJob) -> Result<PathBuf>;
}

pub trait Publisher: Send + Sync {
    /// Returns the platform video id.
    fn upload(&self, video: &Path, metadata: &VideoMetadata, thumbnail: Option<&Path>) -> Result<String>;

    /// Lightweight authenticated read.
    fn verify_credentials(&self) -> Result<()>;
}

/// Accepts keywords either as a JSON array or a comma separated string.
pub(crate) fn keywords<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::List(list)) => list,
        Some(Raw::Joined(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    })
}
