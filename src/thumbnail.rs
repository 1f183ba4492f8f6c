use std::fs;
use std::path::{Path, PathBuf};

use crate::captions::wrap_text;
use crate::error::{Error, Result};
use crate::ffmpeg::{self, escape_filter_path};
use crate::stages::ThumbnailRenderer;

const TITLE_WRAP: usize = 18;

/// Title card drawn by ffmpeg over a flat color.
pub struct FfmpegThumbnailRenderer {
    width: u32,
    height: u32,
    background: String,
}

impl Default for FfmpegThumbnailRenderer {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            background: "0x1e1e2e".to_string(),
        }
    }
}

impl FfmpegThumbnailRenderer {
    fn args(&self, title_file: &Path, output: &Path) -> Vec<String> {
        let filter = format!(
            "drawtext=textfile={}:expansion=none:fontcolor=white:fontsize=96:line_spacing=24:\
             borderw=6:bordercolor=black:x=(w-text_w)/2:y=(h-text_h)/2",
            escape_filter_path(title_file)
        );
        vec![
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            format!("color=c={}:s={}x{}", self.background, self.width, self.height),
            "-vf".into(),
            filter,
            "-frames:v".into(),
            "1".into(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

impl ThumbnailRenderer for FfmpegThumbnailRenderer {
    fn render(&self, title: &str, output_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(output_dir)?;
        let title_file = output_dir.join("thumbnail_title.txt");
        fs::write(&title_file, wrap_text(title.trim(), TITLE_WRAP).join("\n"))?;

        let output = output_dir.join("thumbnail.png");
        ffmpeg::run(&self.args(&title_file, &output), None).map_err(|e| Error::Thumbnail(e.to_string()))?;
        if !output.is_file() {
            return Err(Error::Thumbnail(format!("{} was not written", output.display())));
        }
        Ok(output)
    }
}
