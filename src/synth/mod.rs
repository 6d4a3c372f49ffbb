//! Built-in synthesis engine: shared buffer/limiter/WAV plumbing.
//!
//! All synthesis is in-process, deterministic, stereo f32 at the project
//! sample rate (default 44100 Hz). Every synth path runs the final peak
//! limiter before WAV writing, so exported stems never exceed 0.98.

pub mod sampler;

use std::path::Path;

use crate::error::{ClawError, Result};
use crate::model::Project;

/// Default render sample rate
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// A stereo float buffer accumulated by the synth voices
#[derive(Debug, Clone)]
pub struct StereoBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
    pub sample_rate: u32,
}

impl StereoBuffer {
    pub fn new(len: usize, sample_rate: u32) -> Self {
        Self {
            left: vec![0.0; len],
            right: vec![0.0; len],
            sample_rate,
        }
    }

    /// Mix a sample into both channels, ignoring out-of-range indices
    #[inline]
    pub fn add(&mut self, idx: usize, left: f32, right: f32) {
        if idx < self.left.len() {
            self.left[idx] += left;
            self.right[idx] += right;
        }
    }

    /// Peak absolute value across both channels
    pub fn peak(&self) -> f32 {
        let l = self.left.iter().fold(0f32, |a, x| a.max(x.abs()));
        let r = self.right.iter().fold(0f32, |a, x| a.max(x.abs()));
        l.max(r)
    }

    /// Scale both channels so the peak does not exceed `limit`
    pub fn limit(&mut self, limit: f32) {
        let peak = self.peak();
        if peak > limit && peak > 0.0 {
            let gain = limit / peak;
            for s in self.left.iter_mut().chain(self.right.iter_mut()) {
                *s *= gain;
            }
        }
    }

    /// Write as 16-bit stereo PCM WAV, limiting to 0.98 first
    pub fn write_wav<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.limit(0.98);
        write_wav_stereo(path, &self.left, &self.right, self.sample_rate)
    }
}

/// Seconds per tick at the project's tempo/PPQ
pub fn sec_per_tick(project: &Project) -> f64 {
    60.0 / project.tempo_bpm.max(1) as f64 / project.ppq.max(1) as f64
}

/// Convert a tick position to a sample index
pub fn tick_to_sample(project: &Project, tick: u32, sample_rate: u32) -> usize {
    (tick as f64 * sec_per_tick(project) * sample_rate as f64) as usize
}

/// Deterministic soft clip
#[inline]
pub fn softclip(x: f32, drive: f32) -> f32 {
    (x * drive).tanh()
}

/// dB to linear gain
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Write interleaved 16-bit stereo PCM via hound.
///
/// Shorter channel is zero-padded; samples are hard-clipped to [-1,1].
pub fn write_wav_stereo<P: AsRef<Path>>(
    path: P,
    left: &[f32],
    right: &[f32],
    sample_rate: u32,
) -> Result<()> {
    let p = path.as_ref();
    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(p, spec)
        .map_err(|e| ClawError::Wav(format!("failed to create {}: {}", p.display(), e)))?;

    let n = left.len().max(right.len());
    for i in 0..n {
        let l = left.get(i).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
        let r = right.get(i).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
        writer.write_sample((l * 32767.0) as i16)?;
        writer.write_sample((r * 32767.0) as i16)?;
    }
    writer
        .finalize()
        .map_err(|e| ClawError::Wav(format!("failed to finalize {}: {}", p.display(), e)))?;
    Ok(())
}

/// Read a WAV into stereo float channels (mono is duplicated).
///
/// Accepts integer PCM of any width hound supports plus 32-bit float.
pub fn read_wav_stereo<P: AsRef<Path>>(path: P) -> Result<(Vec<f32>, Vec<f32>, u32)> {
    let p = path.as_ref();
    let mut reader = hound::WavReader::open(p)
        .map_err(|e| ClawError::Wav(format!("failed to open {}: {}", p.display(), e)))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ClawError::Wav(format!("failed to decode {}: {}", p.display(), e)))?,
        hound::SampleFormat::Int => {
            let max = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| ClawError::Wav(format!("failed to decode {}: {}", p.display(), e)))?
        }
    };

    let ch = spec.channels.max(1) as usize;
    if ch == 1 {
        Ok((samples.clone(), samples, spec.sample_rate))
    } else {
        let left: Vec<f32> = samples.iter().step_by(ch).copied().collect();
        let right: Vec<f32> = samples.iter().skip(1).step_by(ch).copied().collect();
        Ok((left, right, spec.sample_rate))
    }
}

/// Linear resampling between sample rates
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = dst_rate as f64 / src_rate as f64;
    let out_len = ((samples.len() as f64 * ratio) as usize).max(1);
    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let j = pos as usize;
            if j >= samples.len() - 1 {
                samples[samples.len() - 1]
            } else {
                let frac = (pos - j as f64) as f32;
                samples[j] * (1.0 - frac) + samples[j + 1] * frac
            }
        })
        .collect()
}

/// Short linear fade at both buffer edges (declicking)
pub fn apply_edge_fades(buf: &mut [f32], fade_len: usize) {
    let n = buf.len();
    if n <= 1 || fade_len <= 1 {
        return;
    }
    let fl = fade_len.min(n / 2);
    for i in 0..fl {
        let g = i as f32 / fl as f32;
        buf[i] *= g;
        buf[n - 1 - i] *= g;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_scales_peak() {
        let mut buf = StereoBuffer::new(4, 44_100);
        buf.left[0] = 2.0;
        buf.right[1] = -1.5;
        buf.limit(0.98);
        assert!(buf.peak() <= 0.98 + 1e-6);
        // relative balance preserved
        assert!((buf.left[0] / buf.right[1] + 2.0 / 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_limiter_leaves_quiet_buffers_alone() {
        let mut buf = StereoBuffer::new(2, 44_100);
        buf.left[0] = 0.5;
        buf.limit(0.98);
        assert_eq!(buf.left[0], 0.5);
    }

    #[test]
    fn test_wav_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.wav");
        let left = vec![0.0, 0.5, -0.5, 0.25];
        let right = vec![0.1, -0.1, 0.9, -0.9];
        write_wav_stereo(&path, &left, &right, 44_100).unwrap();
        let (l, r, sr) = read_wav_stereo(&path).unwrap();
        assert_eq!(sr, 44_100);
        assert_eq!(l.len(), 4);
        for (a, b) in l.iter().zip(left.iter()) {
            assert!((a - b).abs() < 0.001);
        }
        for (a, b) in r.iter().zip(right.iter()) {
            assert!((a - b).abs() < 0.001);
        }
    }

    #[test]
    fn test_resample_linear_lengths() {
        let src = vec![0.0; 1000];
        assert_eq!(resample_linear(&src, 22_050, 44_100).len(), 2000);
        assert_eq!(resample_linear(&src, 44_100, 44_100).len(), 1000);
        assert!(resample_linear(&[], 22_050, 44_100).is_empty());
    }

    #[test]
    fn test_resample_preserves_constant_signal() {
        let src = vec![0.7; 100];
        let out = resample_linear(&src, 48_000, 44_100);
        for s in out {
            assert!((s - 0.7).abs() < 1e-6);
        }
    }

    #[test]
    fn test_edge_fades() {
        let mut buf = vec![1.0; 100];
        apply_edge_fades(&mut buf, 10);
        assert_eq!(buf[0], 0.0);
        assert!(buf[5] < 1.0);
        assert_eq!(buf[50], 1.0);
        assert!(buf[99] < 0.11);
    }

    #[test]
    fn test_tick_to_sample() {
        let p = Project::new("t", 120); // 120 bpm, 480 ppq -> 960 ticks/sec
        assert_eq!(tick_to_sample(&p, 960, 44_100), 44_100);
    }

    #[test]
    fn test_db_to_gain() {
        assert!((db_to_gain(0.0) - 1.0).abs() < 1e-6);
        assert!((db_to_gain(-6.0) - 0.5012).abs() < 0.001);
    }
}
