//! ffmpeg-based renderer: narration chunks, concatenated audio, captions
//! burned over a background.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audio::wav_duration_seconds;
use crate::captions::{align_to_audio, write_srt};
use crate::config::MediaConfig;
use crate::error::{Error, Result};
use crate::ffmpeg::{self, escape_filter_path};
use crate::stages::{AssemblyJob, MediaAssembler, SpeechSynthesizer};
use crate::utils::chunk_text;

const WIDTH: u32 = 1080;
const HEIGHT: u32 = 1920;
const SUBTITLE_STYLE: &str = "Fontsize=28,OutlineColour=&H000000&,Outline=3,Shadow=0,Alignment=2,MarginV=120";

#[derive(Debug, Clone, PartialEq)]
pub enum VisualSource {
    Video(PathBuf),
    Image(PathBuf),
    Color,
}

/// Background video wins, then the thumbnail as a still, then a flat color.
pub fn choose_visual(background: Option<&Path>, thumbnail: Option<&Path>) -> VisualSource {
    if let Some(bg) = background.filter(|p| p.is_file()) {
        return VisualSource::Video(bg.to_path_buf());
    }
    if let Some(thumb) = thumbnail.filter(|p| p.is_file()) {
        return VisualSource::Image(thumb.to_path_buf());
    }
    VisualSource::Color
}

pub struct FfmpegAssembler {
    speech: Arc<dyn SpeechSynthesizer>,
    media: MediaConfig,
}

impl FfmpegAssembler {
    pub fn new(speech: Arc<dyn SpeechSynthesizer>, media: MediaConfig) -> Self {
        Self { speech, media }
    }

    fn narrate(&self, text: &str, work_dir: &Path) -> Result<Vec<(PathBuf, String)>> {
        let narration = text.replace("[PAUSE]", " ");
        let chunks = chunk_text(&narration, self.media.tts_chunk_chars);
        info!("Split narration into {} chunks", chunks.len());

        let mut parts = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let part = work_dir.join(format!("part_{i:03}.wav"));
            debug!("TTS chunk {} ({} chars)", i, chunk.chars().count());
            let written = self.speech.synthesize(&chunk, &part)?;
            parts.push((written, chunk));
        }
        Ok(parts)
    }

    fn subtitles_for(&self, job: &AssemblyJob, parts: &[(PathBuf, String)]) -> Option<PathBuf> {
        if self.media.align_captions {
            let timed: Result<Vec<(f64, String)>> = parts
                .iter()
                .map(|(path, text)| wav_duration_seconds(path).map(|secs| (secs, text.clone())))
                .collect();
            let aligned = timed
                .and_then(|chunks| align_to_audio(&chunks))
                .and_then(|captions| {
                    let path = job.work_dir.join("subs.srt");
                    write_srt(&path, &captions)?;
                    Ok(path)
                });
            match aligned {
                Ok(path) => return Some(path),
                Err(e) => warn!("Could not align captions to narration, using script timing: {}", e),
            }
        }
        job.captions_path.clone().filter(|p| p.is_file())
    }
}

impl MediaAssembler for FfmpegAssembler {
    fn assemble(&self, job: &AssemblyJob) -> Result<PathBuf> {
        fs::create_dir_all(&job.work_dir)?;
        if let Some(parent) = job.output_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let parts = self.narrate(&job.script.text, &job.work_dir)?;
        if parts.is_empty() {
            return Err(Error::Assembly("script produced no narration".to_string()));
        }

        let combined = concat_audio(&job.work_dir, &parts)?;
        info!("Combined audio written to {}", combined.display());

        let subtitles = self.subtitles_for(job, &parts);
        let visual = choose_visual(self.media.background_video.as_deref(), job.thumbnail_path.as_deref());
        info!(visual = ?visual, "Rendering {}", job.output_file.display());

        let args = render_args(&visual, &combined, subtitles.as_deref(), self.media.fps, &job.output_file);
        ffmpeg::run(&args, None).map_err(|e| Error::Assembly(e.to_string()))?;

        if !job.output_file.is_file() {
            return Err(Error::Assembly(format!("{} was not written", job.output_file.display())));
        }
        Ok(job.output_file.clone())
    }
}

fn concat_audio(work_dir: &Path, parts: &[(PathBuf, String)]) -> Result<PathBuf> {
    let list = work_dir.join("files.txt");
    {
        let mut f = File::create(&list)?;
        for (path, _) in parts {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::Assembly(format!("invalid part file name {}", path.display())))?;
            writeln!(f, "file '{name}'")?;
        }
    }

    let copy = ["-f", "concat", "-safe", "0", "-i", "files.txt", "-c", "copy", "combined.wav"];
    if let Err(e) = ffmpeg::run(&copy, Some(work_dir)) {
        warn!("ffmpeg concat with copy failed ({}); retrying with re-encode", e);
        let reencode = [
            "-f", "concat", "-safe", "0", "-i", "files.txt", "-c:a", "pcm_s16le", "combined.wav",
        ];
        ffmpeg::run(&reencode, Some(work_dir))
            .map_err(|e| Error::Assembly(format!("failed to concatenate narration: {e}")))?;
    }
    Ok(work_dir.join("combined.wav"))
}

pub fn render_args(
    visual: &VisualSource,
    audio: &Path,
    subtitles: Option<&Path>,
    fps: u32,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    match visual {
        VisualSource::Video(path) => {
            args.extend(["-stream_loop".into(), "-1".into(), "-i".into()]);
            args.push(path.to_string_lossy().into_owned());
        }
        VisualSource::Image(path) => {
            args.extend(["-loop".into(), "1".into(), "-i".into()]);
            args.push(path.to_string_lossy().into_owned());
        }
        VisualSource::Color => {
            args.extend(["-f".into(), "lavfi".into(), "-i".into()]);
            args.push(format!("color=c=black:s={WIDTH}x{HEIGHT}:r={fps}"));
        }
    }
    args.push("-i".into());
    args.push(audio.to_string_lossy().into_owned());

    let mut filter = format!(
        "scale={WIDTH}:{HEIGHT}:force_original_aspect_ratio=increase,crop={WIDTH}:{HEIGHT}"
    );
    if let Some(srt) = subtitles {
        filter.push_str(&format!(
            ",subtitles={}:force_style='{SUBTITLE_STYLE}'",
            escape_filter_path(srt)
        ));
    }

    let fps = fps.to_string();
    args.extend(
        [
            "-vf", &filter, "-map", "0:v:0", "-map", "1:a:0", "-c:v", "libx264", "-preset", "veryfast", "-pix_fmt",
            "yuv420p", "-c:a", "aac", "-r", &fps, "-shortest",
        ]
        .map(String::from),
    );
    args.push(output.to_string_lossy().into_owned());
    args
}
