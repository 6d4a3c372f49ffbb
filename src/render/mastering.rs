//! Deterministic macro-style mastering presets applied by the media tool.

use std::collections::BTreeMap;
use std::path::Path;

use lazy_static::lazy_static;

use crate::error::{ClawError, Result};
use crate::exec;

/// A named mastering preset: a fixed audio filtergraph
#[derive(Debug, Clone)]
pub struct MasterPreset {
    pub name: &'static str,
    pub afilter: &'static str,
}

lazy_static! {
    pub static ref MASTER_PRESETS: BTreeMap<&'static str, MasterPreset> = {
        let mut m = BTreeMap::new();
        // Safe default: light highpass + gentle compression + limiter.
        m.insert(
            "clean",
            MasterPreset {
                name: "clean",
                afilter: "highpass=f=30,acompressor=threshold=-18dB:ratio=2:attack=5:release=50,alimiter=limit=0.95",
            },
        );
        // "demo" is intentionally a bit louder/brighter.
        m.insert(
            "demo",
            MasterPreset {
                name: "demo",
                afilter: "highpass=f=30,acompressor=threshold=-20dB:ratio=3:attack=3:release=40,equalizer=f=9000:t=h:width=2000:g=2,alimiter=limit=0.98",
            },
        );
        // Lofi macro: bandlimit + heavier compression.
        m.insert(
            "lofi",
            MasterPreset {
                name: "lofi",
                afilter: "highpass=f=120,lowpass=f=6000,acompressor=threshold=-22dB:ratio=3,alimiter=limit=0.96",
            },
        );
        m
    };
}

/// Names of the available presets, sorted
pub fn preset_names() -> Vec<&'static str> {
    MASTER_PRESETS.keys().copied().collect()
}

/// Look up a preset or fail with InvalidInput
pub fn get_preset(name: &str) -> Result<&'static MasterPreset> {
    MASTER_PRESETS.get(name).ok_or_else(|| {
        ClawError::InvalidInput(format!(
            "preset must be one of: {}",
            preset_names().join(", ")
        ))
    })
}

fn fade_filter(fade_in: f64, fade_out: f64, dur: Option<f64>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if fade_in > 0.0 {
        parts.push(format!("afade=t=in:st=0:d={}", fade_in));
    }
    if fade_out > 0.0 {
        if let Some(d) = dur {
            let st = (d - fade_out).max(0.0);
            parts.push(format!("afade=t=out:st={}:d={}", st, fade_out));
        }
    }
    parts.join(",")
}

/// Apply a mastering preset (plus optional trim and fades) to a WAV.
pub fn master_wav(
    in_wav: &str,
    out_wav: &str,
    sample_rate: u32,
    trim_seconds: Option<f64>,
    preset: &str,
    fade_in_seconds: f64,
    fade_out_seconds: f64,
) -> Result<String> {
    let p = get_preset(preset)?;

    let mut filters = vec![p.afilter.to_string()];
    let fade = fade_filter(fade_in_seconds, fade_out_seconds, trim_seconds);
    if !fade.is_empty() {
        filters.push(fade);
    }
    let af = filters.join(",");

    if let Some(parent) = Path::new(out_wav).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut args = exec::ffmpeg_base_args();
    args.extend([
        "-i".to_string(),
        in_wav.to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
    ]);
    if let Some(t) = trim_seconds {
        args.extend(["-t".to_string(), t.to_string()]);
    }
    args.extend(["-af".to_string(), af, out_wav.to_string()]);
    exec::ffmpeg(&args)?;
    Ok(out_wav.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_names() {
        assert_eq!(preset_names(), vec!["clean", "demo", "lofi"]);
    }

    #[test]
    fn test_unknown_preset_rejected() {
        assert!(get_preset("loudness_wars").is_err());
        assert!(get_preset("clean").is_ok());
    }

    #[test]
    fn test_fade_filter_shapes() {
        assert_eq!(fade_filter(0.0, 0.0, None), "");
        assert_eq!(fade_filter(0.15, 0.0, None), "afade=t=in:st=0:d=0.15");
        assert_eq!(
            fade_filter(0.0, 0.5, Some(30.0)),
            "afade=t=out:st=29.5:d=0.5"
        );
        // fade-out with unknown duration is dropped
        assert_eq!(fade_filter(0.0, 0.5, None), "");
    }
}
