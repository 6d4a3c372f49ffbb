//! Mix sanity gate: a cheap deterministic score over band energy and
//! silence fraction.
//!
//! Penalty rules flag clipping risk, excessive silence, loudness outliers
//! and coarse band-balance problems. The score is 1 minus the penalty sum,
//! clamped to [0,1]; a mix is "ok" at >= 0.60.

use serde::Serialize;

use crate::analysis::bands::{band_energy_report, BandReport};
use crate::analysis::probe_duration_seconds;
use crate::error::Result;
use crate::exec;

/// Result of the sanity gate
#[derive(Debug, Clone, Serialize)]
pub struct MixSanity {
    pub score: f64,
    pub reasons: Vec<String>,
    pub metrics: SanityMetrics,
    pub bands: BandReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SanityMetrics {
    pub mean_dbfs: f64,
    pub max_dbfs: f64,
    pub silence_fraction: f64,
    pub low_mean_dbfs: f64,
    pub mid_mean_dbfs: f64,
    pub high_mean_dbfs: f64,
}

impl MixSanity {
    pub fn ok(&self) -> bool {
        self.score >= 0.60
    }
}

/// Parse silencedetect markers into total silent seconds.
///
/// An open-ended `silence_start` without a matching end counts until
/// `duration` (files that end in silence).
pub fn parse_silence_seconds(stderr: &str, duration: f64) -> f64 {
    let mut total = 0.0;
    let mut cur_start: Option<f64> = None;

    for raw in stderr.lines() {
        let s = raw.trim();
        if let Some(rest) = s.split("silence_start:").nth(1) {
            cur_start = rest.trim().split_whitespace().next().and_then(|x| x.parse().ok());
        }
        if let Some(rest) = s.split("silence_end:").nth(1) {
            let end: Option<f64> = rest
                .trim()
                .split('|')
                .next()
                .and_then(|x| x.trim().parse().ok());
            if let (Some(st), Some(en)) = (cur_start, end) {
                total += (en - st).max(0.0);
            }
            cur_start = None;
        }
    }
    if let Some(st) = cur_start {
        total += (duration - st).max(0.0);
    }
    total
}

/// Fraction of the file considered silent (capped at 1)
pub fn silence_fraction(in_audio: &str, noise_db: f64, min_silence_dur: f64) -> Result<f64> {
    let dur = probe_duration_seconds(in_audio)?;
    if dur <= 0.0 {
        return Ok(0.0);
    }
    let mut args = exec::ffmpeg_analysis_args();
    args.extend([
        "-i".to_string(),
        in_audio.to_string(),
        "-af".to_string(),
        format!("silencedetect=noise={}dB:d={}", noise_db, min_silence_dur),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]);
    let out = exec::ffmpeg_lenient(&args)?;
    Ok((parse_silence_seconds(&out.stderr, dur) / dur).clamp(0.0, 1.0))
}

/// Compute the sanity score from already-measured metrics (pure)
pub fn score_sanity(bands: &BandReport, silence_frac: f64) -> MixSanity {
    let get = |k: &str| bands.get(k).copied().unwrap_or_default();
    let full = get("full");
    let mean_db = full.mean_volume;
    let max_db = full.max_volume;
    let low = get("low_90_200").mean_volume;
    let mid = get("mid_200_4k").mean_volume;
    let high = get("high_ge4k").mean_volume;

    let mut penalties: Vec<(f64, String)> = Vec::new();

    // Peak/clipping safety (approx; lossy codecs can hide inter-sample peaks).
    if max_db >= -0.2 {
        penalties.push((0.35, format!("peaks too hot (max={:.1}dBFS)", max_db)));
    } else if max_db >= -1.0 {
        penalties.push((0.20, format!("peaks near 0dBFS (max={:.1}dBFS)", max_db)));
    }

    // Silence detection.
    if silence_frac >= 0.85 {
        penalties.push((
            0.60,
            format!("mostly silent (silence~{:.0}%)", silence_frac * 100.0),
        ));
    } else if silence_frac >= 0.50 {
        penalties.push((
            0.30,
            format!("too much silence (silence~{:.0}%)", silence_frac * 100.0),
        ));
    }

    // Mean loudness proxy.
    if mean_db < -40.0 {
        penalties.push((0.30, format!("very quiet (mean={:.1}dBFS)", mean_db)));
    } else if mean_db < -32.0 {
        penalties.push((0.15, format!("quiet (mean={:.1}dBFS)", mean_db)));
    }
    if mean_db > -10.0 {
        penalties.push((0.20, format!("very loud (mean={:.1}dBFS)", mean_db)));
    }

    // Coarse balance warnings (volumes are negative; closer to 0 is louder).
    if mid != 0.0 && high != 0.0 {
        let high_minus_mid = high - mid;
        if high_minus_mid > 6.0 {
            penalties.push((
                0.15,
                format!("highs dominate mids (high-mid={:.1}dB)", high_minus_mid),
            ));
        }
    }
    if mid != 0.0 && low != 0.0 {
        let low_minus_mid = low - mid;
        if low_minus_mid > 7.0 {
            penalties.push((
                0.15,
                format!("lows dominate mids (low-mid={:.1}dB)", low_minus_mid),
            ));
        }
        if low_minus_mid < -10.0 {
            penalties.push((
                0.10,
                format!("thin low end (low-mid={:.1}dB)", low_minus_mid),
            ));
        }
    }

    let penalty: f64 = penalties.iter().map(|(p, _)| p).sum();
    let score = (1.0 - penalty).clamp(0.0, 1.0);

    MixSanity {
        score,
        reasons: penalties.into_iter().map(|(_, r)| r).collect(),
        metrics: SanityMetrics {
            mean_dbfs: mean_db,
            max_dbfs: max_db,
            silence_fraction: silence_frac,
            low_mean_dbfs: low,
            mid_mean_dbfs: mid,
            high_mean_dbfs: high,
        },
        bands: bands.clone(),
    }
}

/// Run the full sanity gate against an audio file
pub fn analyze_mix_sanity(in_audio: &str) -> Result<MixSanity> {
    let bands = band_energy_report(in_audio)?;
    let silence = silence_fraction(in_audio, -45.0, 0.10)?;
    Ok(score_sanity(&bands, silence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::bands::BandVolume;

    fn bands(full_mean: f64, full_max: f64, low: f64, mid: f64, high: f64) -> BandReport {
        let mut b = BandReport::new();
        let mk = |mean: f64, max: f64| BandVolume {
            mean_volume: mean,
            max_volume: max,
        };
        b.insert("full".to_string(), mk(full_mean, full_max));
        b.insert("sub_lt90".to_string(), mk(low - 2.0, full_max));
        b.insert("rest_ge90".to_string(), mk(mid, full_max));
        b.insert("low_90_200".to_string(), mk(low, full_max));
        b.insert("mid_200_4k".to_string(), mk(mid, full_max));
        b.insert("high_ge4k".to_string(), mk(high, full_max));
        b
    }

    #[test]
    fn test_healthy_mix_scores_ok() {
        let s = score_sanity(&bands(-18.0, -3.0, -20.0, -18.0, -22.0), 0.05);
        assert!(s.ok(), "score {} reasons {:?}", s.score, s.reasons);
        assert!(s.reasons.is_empty());
    }

    #[test]
    fn test_hot_peaks_penalized() {
        let s = score_sanity(&bands(-18.0, -0.1, -20.0, -18.0, -22.0), 0.05);
        assert!((s.score - 0.65).abs() < 1e-9);
        assert!(s.reasons[0].contains("peaks too hot"));
    }

    #[test]
    fn test_mostly_silent_fails() {
        let s = score_sanity(&bands(-45.0, -20.0, -50.0, -48.0, -52.0), 0.9);
        assert!(!s.ok());
        assert!(s.reasons.iter().any(|r| r.contains("mostly silent")));
        assert!(s.reasons.iter().any(|r| r.contains("very quiet")));
    }

    #[test]
    fn test_harsh_highs_flagged() {
        let s = score_sanity(&bands(-18.0, -3.0, -20.0, -24.0, -15.0), 0.0);
        assert!(s.reasons.iter().any(|r| r.contains("highs dominate mids")));
    }

    #[test]
    fn test_score_clamped_to_zero() {
        let s = score_sanity(&bands(-45.0, 0.0, -10.0, -40.0, -10.0), 0.95);
        assert_eq!(s.score, 0.0);
    }

    #[test]
    fn test_parse_silence_seconds() {
        let stderr = "\
[silencedetect @ 0x55] silence_start: 0\n\
[silencedetect @ 0x55] silence_end: 0.723 | silence_duration: 0.723\n\
[silencedetect @ 0x55] silence_start: 5.0\n";
        // second run is open-ended, counts until duration 8.0
        let s = parse_silence_seconds(stderr, 8.0);
        assert!((s - 3.723).abs() < 1e-9);
    }
}
