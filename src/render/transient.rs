//! Offline transient shaper: pure math over 16-bit stereo WAV.
//!
//! A fast (2 ms) and a slow (30 ms) moving-average envelope of |x| split the
//! signal into transient and sustain components; per-sample gain is
//! `(1 + attack * transient/(slow+eps)) * (1 + sustain * slow/max_slow)`,
//! clamped to [-1, +1]. Applied to stems before mixing and to the mixdown
//! before mastering presets.

use std::path::Path;

use crate::error::Result;
use crate::synth::{read_wav_stereo, write_wav_stereo};

/// Attack/sustain amounts, each roughly -1..+1
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransientSpec {
    pub attack: f32,
    pub sustain: f32,
}

impl TransientSpec {
    pub fn is_noop(&self) -> bool {
        self.attack.abs() < 1e-6 && self.sustain.abs() < 1e-6
    }
}

/// Moving average of |x| over a window, causal
fn envelope(signal: &[f32], win: usize) -> Vec<f32> {
    let win = win.max(1);
    let mut out = vec![0.0f32; signal.len()];
    let mut ring = vec![0.0f32; win];
    let mut sum = 0.0f32;
    let mut bi = 0usize;
    for (i, x) in signal.iter().enumerate() {
        let ax = x.abs();
        sum -= ring[bi];
        ring[bi] = ax;
        sum += ax;
        bi = (bi + 1) % win;
        out[i] = sum / win as f32;
    }
    out
}

fn process(signal: &[f32], fast: &[f32], slow: &[f32], spec: &TransientSpec, max_slow: f32) -> Vec<f32> {
    const EPS: f32 = 1e-6;
    signal
        .iter()
        .enumerate()
        .map(|(i, x)| {
            let transient = (fast[i] - slow[i]).max(0.0);
            let g_atk = 1.0 + spec.attack * (transient / (slow[i] + EPS));
            let g_sus = 1.0 + spec.sustain * (slow[i] / max_slow);
            (x * g_atk * g_sus).clamp(-1.0, 1.0)
        })
        .collect()
}

/// Shape transients of a stereo WAV file in place semantics
/// (reads `in_wav`, writes `out_wav`).
pub fn transient_shaper_wav(
    in_wav: &str,
    out_wav: &str,
    spec: &TransientSpec,
    sample_rate: u32,
) -> Result<String> {
    let atk = spec.attack.clamp(-1.0, 1.0);
    let sus = spec.sustain.clamp(-1.0, 1.0);
    let spec = TransientSpec {
        attack: atk,
        sustain: sus,
    };

    if spec.is_noop() {
        if in_wav != out_wav {
            if let Some(parent) = Path::new(out_wav).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::copy(in_wav, out_wav)?;
        }
        return Ok(out_wav.to_string());
    }

    let (left, right, sr) = read_wav_stereo(in_wav)?;
    if sr != sample_rate {
        log::debug!("transient shaper: file rate {} differs from render rate {}", sr, sample_rate);
    }

    let win_fast = ((sr as f32 * 0.002) as usize).max(1); // 2ms
    let win_slow = ((sr as f32 * 0.030) as usize).max(1); // 30ms

    let ef_l = envelope(&left, win_fast);
    let es_l = envelope(&left, win_slow);
    let ef_r = envelope(&right, win_fast);
    let es_r = envelope(&right, win_slow);

    let max_slow = es_l
        .iter()
        .chain(es_r.iter())
        .fold(1e-6f32, |a, x| a.max(*x));

    let out_l = process(&left, &ef_l, &es_l, &spec, max_slow);
    let out_r = process(&right, &ef_r, &es_r, &spec, max_slow);

    write_wav_stereo(out_wav, &out_l, &out_r, sr)?;
    Ok(out_wav.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_train(len: usize) -> (Vec<f32>, Vec<f32>) {
        // sparse clicks over a quiet sustained tone
        let mut l = vec![0.0f32; len];
        for i in 0..len {
            l[i] = 0.05 * ((i as f32) * 0.01).sin();
        }
        for k in (0..len).step_by(4410) {
            l[k] = 0.8;
        }
        (l.clone(), l)
    }

    #[test]
    fn test_noop_copies_input() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("in.wav");
        let b = dir.path().join("out.wav");
        let (l, r) = click_train(8820);
        write_wav_stereo(&a, &l, &r, 44_100).unwrap();
        transient_shaper_wav(
            a.to_str().unwrap(),
            b.to_str().unwrap(),
            &TransientSpec::default(),
            44_100,
        )
        .unwrap();
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }

    #[test]
    fn test_attack_boost_raises_clicks() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("in.wav");
        let b = dir.path().join("out.wav");
        let (l, r) = click_train(44_100);
        write_wav_stereo(&a, &l, &r, 44_100).unwrap();
        transient_shaper_wav(
            a.to_str().unwrap(),
            b.to_str().unwrap(),
            &TransientSpec {
                attack: 0.8,
                sustain: 0.0,
            },
            44_100,
        )
        .unwrap();
        let (out_l, _, _) = read_wav_stereo(&b).unwrap();
        // clicks get louder (clamped at 1.0), sustained tone roughly kept
        assert!(out_l[4410].abs() >= l[4410].abs() - 0.01);
        // everything stays in range
        assert!(out_l.iter().all(|x| x.abs() <= 1.0));
    }

    #[test]
    fn test_sustain_cut_reduces_tail() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("in.wav");
        let b = dir.path().join("out.wav");
        // loud sustained tone
        let l: Vec<f32> = (0..44_100).map(|i| 0.5 * ((i as f32) * 0.05).sin()).collect();
        write_wav_stereo(&a, &l, &l, 44_100).unwrap();
        transient_shaper_wav(
            a.to_str().unwrap(),
            b.to_str().unwrap(),
            &TransientSpec {
                attack: 0.0,
                sustain: -0.5,
            },
            44_100,
        )
        .unwrap();
        let (out_l, _, _) = read_wav_stereo(&b).unwrap();
        let orig_rms: f32 = l.iter().map(|x| x * x).sum::<f32>() / l.len() as f32;
        let out_rms: f32 = out_l.iter().map(|x| x * x).sum::<f32>() / out_l.len() as f32;
        assert!(out_rms < orig_rms, "sustain cut should lower energy");
    }

    #[test]
    fn test_envelope_window() {
        let sig = vec![1.0f32; 10];
        let env = envelope(&sig, 5);
        // warms up over the window, then saturates at 1.0
        assert!((env[9] - 1.0).abs() < 1e-6);
        assert!(env[0] < env[4]);
    }
}
