//! Band energy reports and spectrogram rendering.
//!
//! The band report runs the media tool once per band with a simple pass
//! filter in front of volume detection, yielding mean/max volume per band.
//! Band keys are stable; new bands may be added over time.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::exec;

/// mean/max volume for one band, in dBFS (negative values)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BandVolume {
    pub mean_volume: f64,
    pub max_volume: f64,
}

/// Per-band volume report keyed by stable band names
pub type BandReport = BTreeMap<String, BandVolume>;

/// The fixed band set: full, sub (<90), rest (>=90), low (90-200),
/// mid (200-4k), high (>=4k)
pub const BAND_FILTERS: [(&str, &str); 6] = [
    ("full", "anull"),
    ("sub_lt90", "lowpass=f=90"),
    ("rest_ge90", "highpass=f=90"),
    ("low_90_200", "highpass=f=90,lowpass=f=200"),
    ("mid_200_4k", "highpass=f=200,lowpass=f=4000"),
    ("high_ge4k", "highpass=f=4000"),
];

/// Parse volumedetect output lines into mean/max volume
pub fn parse_volumedetect(stderr: &str) -> BandVolume {
    let mut out = BandVolume::default();
    for raw in stderr.lines() {
        let s = raw.trim();
        if let Some(rest) = s.split("mean_volume:").nth(1) {
            if let Some(v) = rest.split(" dB").next().and_then(|x| x.trim().parse().ok()) {
                out.mean_volume = v;
            }
        }
        if let Some(rest) = s.split("max_volume:").nth(1) {
            if let Some(v) = rest.split(" dB").next().and_then(|x| x.trim().parse().ok()) {
                out.max_volume = v;
            }
        }
    }
    out
}

fn measure_volume(in_audio: &str, filtergraph: &str) -> Result<BandVolume> {
    let mut args = exec::ffmpeg_analysis_args();
    args.extend([
        "-i".to_string(),
        in_audio.to_string(),
        "-af".to_string(),
        format!("{},volumedetect", filtergraph),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]);
    let out = exec::ffmpeg_lenient(&args)?;
    Ok(parse_volumedetect(&out.stderr))
}

/// Run the tool once per band and collect the report
pub fn band_energy_report(in_audio: &str) -> Result<BandReport> {
    let mut report = BandReport::new();
    for (name, filt) in BAND_FILTERS {
        report.insert(name.to_string(), measure_volume(in_audio, filt)?);
    }
    Ok(report)
}

/// Spectrogram rendering options
#[derive(Debug, Clone)]
pub struct SpectrogramOptions {
    pub size: String,
    pub legend: bool,
    pub color: String,
    /// log | lin
    pub scale: String,
    pub gain: f64,
}

impl Default for SpectrogramOptions {
    fn default() -> Self {
        Self {
            size: "1200x600".to_string(),
            legend: true,
            color: "fiery".to_string(),
            scale: "log".to_string(),
            gain: 5.0,
        }
    }
}

/// Render a spectrogram PNG for an audio file
pub fn render_spectrogram_png(in_audio: &str, out_png: &str, opts: &SpectrogramOptions) -> Result<()> {
    if let Some(parent) = Path::new(out_png).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let lavfi = format!(
        "showspectrumpic=s={}:legend={}:color={}:scale={}:gain={}",
        opts.size,
        if opts.legend { 1 } else { 0 },
        opts.color,
        opts.scale,
        opts.gain
    );
    let mut args = exec::ffmpeg_base_args();
    args.extend([
        "-i".to_string(),
        in_audio.to_string(),
        "-lavfi".to_string(),
        lavfi,
        "-frames:v".to_string(),
        "1".to_string(),
        out_png.to_string(),
    ]);
    exec::ffmpeg(&args)?;
    Ok(())
}

/// Human-readable band summary written next to spectrograms
pub fn band_report_text(header: &[String], report: &BandReport) -> String {
    let get = |k: &str| report.get(k).copied().unwrap_or_default();
    let full = get("full");
    let sub = get("sub_lt90");
    let rest = get("rest_ge90");
    let mut lines: Vec<String> = header.to_vec();
    lines.push(format!(
        "full.mean_db={:.1} full.max_db={:.1}",
        full.mean_volume, full.max_volume
    ));
    lines.push(format!(
        "sub<90.mean_db={:.1} sub<90.max_db={:.1}",
        sub.mean_volume, sub.max_volume
    ));
    lines.push(format!(
        "rest>=90.mean_db={:.1} rest>=90.max_db={:.1}",
        rest.mean_volume, rest.max_volume
    ));
    lines.join("\n") + "\n"
}
