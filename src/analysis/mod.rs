//! Audio metering and diagnostics.
//!
//! All metrics are deterministic and derived from the external media tool
//! or simple math: LUFS/true-peak from loudness-normalization analysis,
//! peak/RMS/DC/crest from the stats filter, stereo correlation from decoded
//! PCM, band energy from volume detection behind pass filters. Every parser
//! here takes the tool's text output, so it is unit-testable without the
//! tool installed; the `measure_*` wrappers do the invocation.

pub mod bands;
pub mod sanity;
pub mod score;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use lazy_static::lazy_static;

use crate::error::Result;
use crate::exec;

/// Full metering snapshot for one audio file
#[derive(Debug, Clone, Default, Serialize)]
pub struct AudioMetering {
    pub integrated_lufs: Option<f64>,
    pub loudness_range_lu: Option<f64>,
    pub true_peak_dbtp: Option<f64>,

    pub peak_dbfs: Option<f64>,
    pub rms_dbfs: Option<f64>,
    pub crest_factor_linear: Option<f64>,
    pub crest_factor_db: Option<f64>,

    pub dc_offset: Option<f64>,
    pub stereo_correlation: Option<f64>,
    /// L minus R RMS in dB; 0 = balanced
    pub stereo_balance_db: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectral_bands: Option<bands::BandReport>,
}

lazy_static! {
    static ref LOUDNORM_JSON_RE: Regex = Regex::new(r#"(?s)\{\s*"input_i".*?\}"#).unwrap();
    static ref EBUR128_ST_RE: Regex = Regex::new(r"\bS:\s*([-0-9.]+)\s*LUFS\b").unwrap();
}

/// Last short-term loudness reading from an ebur128 frame log
pub fn parse_ebur128_shortterm(stderr: &str) -> Option<f64> {
    let mut last = None;
    for ln in stderr.lines() {
        if let Some(c) = EBUR128_ST_RE.captures(ln) {
            if let Ok(v) = c[1].parse::<f64>() {
                last = Some(v);
            }
        }
    }
    last
}

/// Measure short-term LUFS using the ebur128 filter's verbose frame log
pub fn measure_shortterm_lufs(in_audio: &str) -> Result<Option<f64>> {
    let mut args = exec::ffmpeg_analysis_args();
    args.extend(
        [
            "-i",
            in_audio,
            "-filter_complex",
            "ebur128=peak=true:framelog=verbose",
            "-f",
            "null",
            "-",
        ]
        .map(String::from),
    );
    let out = exec::ffmpeg_lenient(&args)?;
    Ok(parse_ebur128_shortterm(&out.stderr))
}

/// Extract the loudness-analysis JSON blob from tool stderr.
///
/// Returns (integrated_lufs, loudness_range_lu, true_peak_dbtp) as present.
pub fn parse_loudnorm(stderr: &str) -> Option<(Option<f64>, Option<f64>, Option<f64>)> {
    let m = LOUDNORM_JSON_RE.find(stderr)?;
    let data: Value = serde_json::from_str(m.as_str()).ok()?;
    let get = |k: &str| -> Option<f64> {
        match data.get(k) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    };
    Some((get("input_i"), get("input_lra"), get("input_tp")))
}

/// Parsed stats from the tool's per-file Overall block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AstatsOverall {
    pub dc_offset: Option<f64>,
    pub peak_dbfs: Option<f64>,
    pub rms_dbfs: Option<f64>,
    pub crest_factor_linear: Option<f64>,
    /// Per-channel RMS values in channel order (for stereo balance)
    pub channel_rms_dbfs: Vec<f64>,
}

/// Parse the astats filter output (stderr lines).
///
/// Overall metrics come from the `Overall` block; per-channel RMS levels
/// are collected along the way for stereo balance.
pub fn parse_astats(stderr: &str) -> AstatsOverall {
    let mut out = AstatsOverall::default();
    let mut overall = false;

    let grab = |line: &str, prefix: &str| -> Option<f64> {
        let idx = line.find(prefix)?;
        line[idx + prefix.len()..]
            .trim()
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    };

    for raw in stderr.lines() {
        let s = raw.trim();
        if s.ends_with("] Overall") || s.ends_with("Overall") && s.contains("Parsed_astats") {
            overall = true;
            continue;
        }
        if s.contains("] Channel:") {
            overall = false;
        }

        if !overall {
            if s.contains("RMS level dB:") {
                if let Some(v) = grab(s, "RMS level dB:") {
                    out.channel_rms_dbfs.push(v);
                }
            }
            continue;
        }

        if let Some(v) = grab(s, "DC offset:") {
            out.dc_offset = Some(v);
        }
        if let Some(v) = grab(s, "Peak level dB:") {
            out.peak_dbfs = Some(v);
        }
        if let Some(v) = grab(s, "RMS level dB:") {
            out.rms_dbfs = Some(v);
        }
        if let Some(v) = grab(s, "Crest factor:") {
            out.crest_factor_linear = Some(v);
        }
    }

    out
}

/// Pearson correlation of interleaved f32le stereo PCM in [-1, +1].
/// Returns None when there are too few frames.
pub fn stereo_correlation_from_pcm(pcm: &[u8]) -> Option<f64> {
    let usable = pcm.len() - (pcm.len() % 8);
    if usable < 16 {
        return None;
    }
    let mut frames: Vec<(f64, f64)> = Vec::with_capacity(usable / 8);
    for chunk in pcm[..usable].chunks_exact(8) {
        let l = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64;
        let r = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as f64;
        frames.push((l, r));
    }
    let n = frames.len() as f64;
    if frames.len() <= 1 {
        return None;
    }

    let mean_l: f64 = frames.iter().map(|(l, _)| l).sum::<f64>() / n;
    let mean_r: f64 = frames.iter().map(|(_, r)| r).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_l = 0.0;
    let mut var_r = 0.0;
    for (l, r) in &frames {
        let dl = l - mean_l;
        let dr = r - mean_r;
        cov += dl * dr;
        var_l += dl * dl;
        var_r += dr * dr;
    }
    let denom = (var_l * var_r).max(1e-24).sqrt();
    Some((cov / denom).clamp(-1.0, 1.0))
}

/// Measure LUFS/LRA/true-peak via loudness-normalization analysis
pub fn measure_lufs_truepeak(in_audio: &str) -> Result<(Option<f64>, Option<f64>, Option<f64>)> {
    let mut args = exec::ffmpeg_analysis_args();
    args.extend(
        [
            "-i",
            in_audio,
            "-af",
            // Targets are irrelevant; only the input_* stats are read.
            "loudnorm=I=-16:TP=-1.5:LRA=11:print_format=json",
            "-f",
            "null",
            "-",
        ]
        .map(String::from),
    );
    let out = exec::ffmpeg_lenient(&args)?;
    Ok(parse_loudnorm(&out.stderr).unwrap_or((None, None, None)))
}

/// Measure peak/RMS/DC/crest via the stats filter
pub fn measure_astats(in_audio: &str) -> Result<AstatsOverall> {
    let mut args = exec::ffmpeg_analysis_args();
    args.extend(
        ["-i", in_audio, "-af", "astats=metadata=0:reset=0", "-f", "null", "-"].map(String::from),
    );
    let out = exec::ffmpeg_lenient(&args)?;
    Ok(parse_astats(&out.stderr))
}

/// Channel count of the first audio stream (for mono detection)
pub fn probe_channels(in_audio: &str) -> Result<u32> {
    let args: Vec<String> = [
        "-v",
        "error",
        "-select_streams",
        "a:0",
        "-show_entries",
        "stream=channels",
        "-of",
        "json",
        in_audio,
    ]
    .map(String::from)
    .to_vec();
    let out = exec::ffprobe(&args)?;
    let data: Value = serde_json::from_slice(&out.stdout).unwrap_or(Value::Null);
    Ok(data
        .get("streams")
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .and_then(|s| s.get("channels"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32)
}

/// Duration in seconds from the container
pub fn probe_duration_seconds(in_audio: &str) -> Result<f64> {
    let args: Vec<String> = [
        "-v",
        "error",
        "-show_entries",
        "format=duration",
        "-of",
        "json",
        in_audio,
    ]
    .map(String::from)
    .to_vec();
    let out = exec::ffprobe(&args)?;
    let data: Value = serde_json::from_slice(&out.stdout).unwrap_or(Value::Null);
    Ok(data
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| match d {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .unwrap_or(0.0)
        .max(0.0))
}

/// Compute Pearson stereo correlation from up to `max_seconds` of decoded
/// PCM. Returns None when the source decodes to mono.
pub fn measure_stereo_correlation(in_audio: &str, max_seconds: f64) -> Result<Option<f64>> {
    if probe_channels(in_audio).unwrap_or(2) < 2 {
        return Ok(None);
    }
    let args: Vec<String> = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        in_audio.to_string(),
        "-t".to_string(),
        max_seconds.to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-f".to_string(),
        "f32le".to_string(),
        "-".to_string(),
    ];
    let out = exec::ffmpeg_lenient(&args)?;
    Ok(stereo_correlation_from_pcm(&out.stdout))
}

/// Full metering pass over one audio file
pub fn analyze_metering(in_audio: &str, include_spectral: bool) -> Result<AudioMetering> {
    let (lufs, lra, tp) = measure_lufs_truepeak(in_audio).unwrap_or((None, None, None));
    let ast = measure_astats(in_audio).unwrap_or_default();
    let corr = measure_stereo_correlation(in_audio, 10.0).unwrap_or(None);
    let spectral = if include_spectral {
        bands::band_energy_report(in_audio).ok()
    } else {
        None
    };

    let crest_db = match (ast.peak_dbfs, ast.rms_dbfs) {
        (Some(p), Some(r)) => Some(p - r),
        _ => ast
            .crest_factor_linear
            .map(|c| 20.0 * c.max(1e-12).log10()),
    };

    let balance = if ast.channel_rms_dbfs.len() >= 2 {
        Some(ast.channel_rms_dbfs[0] - ast.channel_rms_dbfs[1])
    } else {
        None
    };

    Ok(AudioMetering {
        integrated_lufs: lufs,
        loudness_range_lu: lra,
        true_peak_dbtp: tp,
        peak_dbfs: ast.peak_dbfs,
        rms_dbfs: ast.rms_dbfs,
        crest_factor_linear: ast.crest_factor_linear,
        crest_factor_db: crest_db,
        dc_offset: ast.dc_offset,
        stereo_correlation: corr,
        stereo_balance_db: balance,
        spectral_bands: spectral,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOUDNORM_STDERR: &str = r#"
[Parsed_loudnorm_0 @ 0x55]
{
	"input_i" : "-14.01",
	"input_tp" : "-1.22",
	"input_lra" : "6.50",
	"input_thresh" : "-24.33",
	"output_i" : "-16.00",
	"normalization_type" : "dynamic",
	"target_offset" : "0.28"
}
"#;

    #[test]
    fn test_parse_loudnorm_blob() {
        let (i, lra, tp) = parse_loudnorm(LOUDNORM_STDERR).unwrap();
        assert_eq!(i, Some(-14.01));
        assert_eq!(lra, Some(6.50));
        assert_eq!(tp, Some(-1.22));
    }

    #[test]
    fn test_parse_loudnorm_absent() {
        assert!(parse_loudnorm("no json here").is_none());
    }

    const ASTATS_STDERR: &str = "\
[Parsed_astats_0 @ 0x55] Channel: 1\n\
[Parsed_astats_0 @ 0x55] DC offset: 0.000013\n\
[Parsed_astats_0 @ 0x55] Peak level dB: -0.500000\n\
[Parsed_astats_0 @ 0x55] RMS level dB: -12.300000\n\
[Parsed_astats_0 @ 0x55] Channel: 2\n\
[Parsed_astats_0 @ 0x55] RMS level dB: -13.100000\n\
[Parsed_astats_0 @ 0x55] Overall\n\
[Parsed_astats_0 @ 0x55] DC offset: 0.000010\n\
[Parsed_astats_0 @ 0x55] Peak level dB: -0.400000\n\
[Parsed_astats_0 @ 0x55] RMS level dB: -12.700000\n\
[Parsed_astats_0 @ 0x55] Crest factor: 4.120000\n";

    #[test]
    fn test_parse_astats_overall_block() {
        let a = parse_astats(ASTATS_STDERR);
        assert_eq!(a.dc_offset, Some(0.000010));
        assert_eq!(a.peak_dbfs, Some(-0.4));
        assert_eq!(a.rms_dbfs, Some(-12.7));
        assert_eq!(a.crest_factor_linear, Some(4.12));
        assert_eq!(a.channel_rms_dbfs, vec![-12.3, -13.1]);
    }

    #[test]
    fn test_stereo_correlation_identical_channels() {
        let mut pcm = Vec::new();
        for i in 0..1000 {
            let v = ((i as f32) * 0.01).sin();
            pcm.extend_from_slice(&v.to_le_bytes());
            pcm.extend_from_slice(&v.to_le_bytes());
        }
        let corr = stereo_correlation_from_pcm(&pcm).unwrap();
        assert!(corr > 0.999);
    }

    #[test]
    fn test_stereo_correlation_inverted_channels() {
        let mut pcm = Vec::new();
        for i in 0..1000 {
            let v = ((i as f32) * 0.01).sin();
            pcm.extend_from_slice(&v.to_le_bytes());
            pcm.extend_from_slice(&(-v).to_le_bytes());
        }
        let corr = stereo_correlation_from_pcm(&pcm).unwrap();
        assert!(corr < -0.999);
    }

    #[test]
    fn test_stereo_correlation_too_short() {
        assert!(stereo_correlation_from_pcm(&[0u8; 8]).is_none());
    }

    #[test]
    fn test_parse_ebur128_shortterm_takes_last() {
        let stderr = "\
[Parsed_ebur128_0 @ 0x55] t: 1.0  TARGET:-23 LUFS  M: -18.2 S: -19.5 LUFS  I: -20.0 LUFS\n\
[Parsed_ebur128_0 @ 0x55] t: 2.0  TARGET:-23 LUFS  M: -17.9 S: -18.1 LUFS  I: -19.2 LUFS\n";
        assert_eq!(parse_ebur128_shortterm(stderr), Some(-18.1));
        assert_eq!(parse_ebur128_shortterm("nothing"), None);
    }
}
