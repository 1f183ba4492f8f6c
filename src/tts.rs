use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::stages::SpeechSynthesizer;

/// Piper reading text from stdin.
pub struct PiperSynthesizer {
    program: String,
    model: PathBuf,
}

impl PiperSynthesizer {
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self {
            program: "piper".to_string(),
            model: model.into(),
        }
    }
}

impl SpeechSynthesizer for PiperSynthesizer {
    fn name(&self) -> &str {
        "piper"
    }

    fn synthesize(&self, text: &str, output: &Path) -> Result<PathBuf> {
        debug!("Calling Piper TTS for output file {}", output.display());
        let model = self.model.to_string_lossy();
        let out = output.to_string_lossy();
        run_with_stdin(&self.program, &["--model", &model, "--output_file", &out], text)?;
        require_output(&self.program, output)
    }
}

pub struct EspeakSynthesizer {
    program: String,
    voice: String,
}

impl EspeakSynthesizer {
    pub fn new(voice: impl Into<String>) -> Self {
        Self {
            program: "espeak-ng".to_string(),
            voice: voice.into(),
        }
    }
}

impl Default for EspeakSynthesizer {
    fn default() -> Self {
        Self::new("en-us")
    }
}

impl SpeechSynthesizer for EspeakSynthesizer {
    fn name(&self) -> &str {
        "espeak-ng"
    }

    fn synthesize(&self, text: &str, output: &Path) -> Result<PathBuf> {
        let out = output.to_string_lossy();
        run_with_stdin(&self.program, &["-v", &self.voice, "--stdin", "-w", &out], text)?;
        require_output(&self.program, output)
    }
}

/// Tries `primary`, then `alternate` when the primary fails.
pub struct FallbackSynthesizer {
    primary: Box<dyn SpeechSynthesizer>,
    alternate: Box<dyn SpeechSynthesizer>,
}

impl FallbackSynthesizer {
    pub fn new(primary: Box<dyn SpeechSynthesizer>, alternate: Box<dyn SpeechSynthesizer>) -> Self {
        Self { primary, alternate }
    }
}

impl SpeechSynthesizer for FallbackSynthesizer {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn synthesize(&self, text: &str, output: &Path) -> Result<PathBuf> {
        match self.primary.synthesize(text, output) {
            Ok(path) => Ok(path),
            Err(primary_err) => {
                warn!(
                    "{} failed ({}); falling back to {}",
                    self.primary.name(),
                    primary_err,
                    self.alternate.name()
                );
                self.alternate.synthesize(text, output).map_err(|alt_err| {
                    Error::Synthesis(format!(
                        "{}: {primary_err}; {}: {alt_err}",
                        self.primary.name(),
                        self.alternate.name()
                    ))
                })
            }
        }
    }
}

/// Feeds `input` on a writer thread so a chatty child cannot fill its stderr
/// pipe while we are still writing. The child is always reaped.
fn run_with_stdin(program: &str, args: &[&str], input: &str) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::command(program, format!("failed to spawn: {e}")))?;

    let writer = child.stdin.take().map(|mut stdin| {
        let input = input.to_owned();
        thread::spawn(move || stdin.write_all(input.as_bytes()))
    });

    let output = child.wait_with_output()?;
    let written = match writer.map(|handle| handle.join()) {
        None | Some(Ok(Ok(()))) => Ok(()),
        Some(Ok(Err(e))) => Err(e.to_string()),
        Some(Err(_)) => Err("stdin writer panicked".to_string()),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::command(
            program,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }
    written.map_err(|e| Error::command(program, format!("failed to write stdin: {e}")))
}

fn require_output(program: &str, output: &Path) -> Result<PathBuf> {
    if output.is_file() {
        Ok(output.to_path_buf())
    } else {
        Err(Error::Synthesis(format!(
            "{program} reported success but {} is missing",
            output.display()
        )))
    }
}
