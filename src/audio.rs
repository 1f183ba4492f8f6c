use std::path::Path;

use hound::WavReader;

use crate::error::{Error, Result};

pub fn wav_duration_seconds(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path).map_err(|e| Error::Assembly(format!("{}: {e}", path.display())))?;
    let spec = reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(Error::Assembly(format!("{}: malformed WAV header", path.display())));
    }
    let frames = f64::from(reader.len()) / f64::from(spec.channels);
    Ok(frames / f64::from(spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn duration_accounts_for_channels() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        // half a second of stereo silence
        for _ in 0..16_000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let secs = wav_duration_seconds(&path).unwrap();
        assert!((secs - 0.5).abs() < 1e-9);
    }

    #[test]
    fn non_wav_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.wav");
        std::fs::write(&path, b"not a wav").unwrap();
        assert!(wav_duration_seconds(&path).is_err());
    }
}
