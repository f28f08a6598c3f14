//! PCM audio segments and WAV export.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use log::info;

use crate::error::{Result, TtsError};

/// Sample rate produced by the vocoder.
pub const SAMPLE_RATE: u32 = 22_050;

/// Mono 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl Default for AudioSegment {
    fn default() -> Self {
        Self::empty()
    }
}

impl AudioSegment {
    pub fn empty() -> Self {
        Self { samples: Vec::new(), sample_rate: SAMPLE_RATE }
    }

    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self { samples, sample_rate: SAMPLE_RATE }
    }

    /// Convert a vocoder waveform in `[-1.0, 1.0]` to 16-bit PCM.  Values
    /// outside that range are clipped.
    pub fn from_waveform(waveform: &[f32]) -> Self {
        let samples = waveform
            .iter()
            .map(|&s| (s * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect();
        Self::from_samples(samples)
    }

    /// `duration` of digital silence, rounded to the nearest sample.
    pub fn silence(duration: Duration) -> Self {
        let n = (duration.as_secs_f64() * SAMPLE_RATE as f64).round() as usize;
        Self::from_samples(vec![0; n])
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        let nanos = self.samples.len() as u64 * 1_000_000_000 / self.sample_rate as u64;
        Duration::from_nanos(nanos)
    }

    pub fn append(&mut self, other: &AudioSegment) {
        self.samples.extend_from_slice(&other.samples);
    }

    /// Write a 16-bit PCM WAV.
    ///
    /// The file is written next to `path` under a temporary name and renamed
    /// into place, so a failed write never leaves a truncated file behind.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let tmp = temp_sibling(path);
        self.write_wav_to(&tmp)
            .and_then(|()| {
                std::fs::rename(&tmp, path)
                    .with_context(|| format!("Cannot rename {} into place", tmp.display()))
            })
            .map_err(|source| {
                let _ = std::fs::remove_file(&tmp);
                TtsError::Output { path: path.to_path_buf(), source }
            })?;
        info!(
            "Saved {} samples ({:.2} s) to {}",
            self.samples.len(),
            self.duration().as_secs_f32(),
            path.display()
        );
        Ok(())
    }

    /// Write straight to `path`, without the temp-and-rename step.
    pub(crate) fn write_wav_to(&self, path: &Path) -> anyhow::Result<()> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Cannot create WAV: {}", path.display()))?;
        for &s in &self.samples {
            writer.write_sample(s).context("WAV write error")?;
        }
        writer.finalize().context("WAV finalise error")?;
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output.wav".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("glados-tts-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_from_waveform_scales_and_clips() {
        let seg = AudioSegment::from_waveform(&[0.0, 0.5, -0.5, 1.0, -1.0, 2.0]);
        assert_eq!(seg.samples(), &[0, 16384, -16384, 32767, -32768, 32767]);
    }

    #[test]
    fn test_silence_duration() {
        let seg = AudioSegment::silence(Duration::from_millis(100));
        assert_eq!(seg.len(), 2205);
        assert!(seg.samples().iter().all(|&s| s == 0));
        assert_eq!(seg.duration(), Duration::from_millis(100));
        assert!(AudioSegment::silence(Duration::ZERO).is_empty());
    }

    #[test]
    fn test_append() {
        let mut a = AudioSegment::from_samples(vec![1, 2]);
        a.append(&AudioSegment::from_samples(vec![3]));
        assert_eq!(a.samples(), &[1, 2, 3]);
    }

    #[test]
    fn test_write_wav() {
        let path = temp_path("write.wav");
        let seg = AudioSegment::from_samples(vec![0, 100, -100, i16::MAX]);
        seg.write_wav(&path).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, seg.samples());
        assert!(!temp_sibling(&path).exists());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_write_wav_into_missing_dir_fails_cleanly() {
        let path = temp_path("no-such-dir").join("out.wav");
        let err = AudioSegment::empty().write_wav(&path).unwrap_err();
        assert!(matches!(err, TtsError::Output { .. }));
        assert!(!path.exists());
    }
}
