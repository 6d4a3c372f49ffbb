//! The quality workflow: mix preparation, validation and loudness gates.
//!
//! A sequential state machine that turns a project into a released mix iff
//! every gate passes:
//! `mix_prepare -> (section_gain?) -> mix_spec_validate -> preview_render ->
//! preview_gate -> export_package -> mix_gate -> mix_gate_stems`.
//! Each step appends to a structured report; the first failure aborts with
//! a `Gate`/`MixSpec` error carrying the full report.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::{json, Map, Value};

use lazy_static::lazy_static;

use crate::analysis::analyze_metering;
use crate::error::{ClawError, Result};
use crate::model::{json::load_project, json::save_project, Project, SamplerMode, Track};
use crate::render::{render_project_wav, stems, RenderOptions};
use crate::render::drum_mode::DrumMode;
use crate::render::mastering::master_wav;

/// Classified role of a track, derived from its name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRole {
    pub role: &'static str,
    pub bus: &'static str,
    pub is_drums: bool,
    pub is_bass: bool,
    pub is_kick: bool,
}

fn has_any(name: &str, tokens: &[&str]) -> bool {
    tokens.iter().any(|t| name.contains(t))
}

/// Classify a track name into a mixing role.
///
/// Token tables are checked in priority order: drums, bass, vocals, lead,
/// pluck, pad, keys, fx; anything else is generic music.
pub fn classify_track(name: &str) -> TrackRole {
    let n = name.trim().to_lowercase();

    let drums = [
        "drum", "perc", "kick", "snare", "clap", "hat", "hh", "ride", "cym", "tom", "shaker", "rim",
    ];
    let bass = ["bass", "sub", "808"];
    let vox = ["vocal", "vox", "voice", "choir"];
    let lead = ["lead", "hook"];
    let pluck = ["pluck", "arp", "seq"];
    let pad = ["pad", "string", "strings", "wash", "atmo", "atmos"];
    let keys = ["key", "keys", "chord", "piano", "organ", "synth", "stab"];
    let fx = ["fx", "rise", "riser", "impact", "sweep", "noise", "drop"];

    let is_kick = n.contains("kick");
    if has_any(&n, &drums) {
        return TrackRole {
            role: "drums",
            bus: "drums",
            is_drums: true,
            is_bass: false,
            is_kick,
        };
    }
    if has_any(&n, &bass) {
        return TrackRole {
            role: "bass",
            bus: "bass",
            is_drums: false,
            is_bass: true,
            is_kick: false,
        };
    }
    let mk = |role: &'static str| TrackRole {
        role,
        bus: "music",
        is_drums: false,
        is_bass: false,
        is_kick: false,
    };
    if has_any(&n, &vox) {
        return TrackRole { bus: "vox", ..mk("vox") };
    }
    if has_any(&n, &lead) {
        return mk("lead");
    }
    if has_any(&n, &pluck) {
        return mk("pluck");
    }
    if has_any(&n, &pad) {
        return mk("pad");
    }
    if has_any(&n, &keys) {
        return mk("keys");
    }
    if has_any(&n, &fx) {
        return mk("fx");
    }
    mk("music")
}

/// Sidechain key source: the first kick-named track, else the first drums
/// track.
pub fn pick_kick_source_index(tracks: &[Track]) -> Option<usize> {
    let mut drum_idx = None;
    for (i, t) in tracks.iter().enumerate() {
        let role = classify_track(&t.name);
        if role.is_kick {
            return Some(i);
        }
        if role.is_drums && drum_idx.is_none() {
            drum_idx = Some(i);
        }
    }
    drum_idx
}

/// True when a track can resolve drum roles (so a role-keyed sidechain
/// source makes sense).
pub fn track_is_drum_role_capable(track: &Track) -> bool {
    track.channel == 9
        || track.sampler == Some(SamplerMode::Drums)
        || track.sample_pack.is_some()
        || !track.drum_kit.trim().is_empty()
}

/// Built-in preset table used when no presets file is given
pub fn builtin_presets() -> Value {
    json!({
        "edm_streaming": {
            "mix": {
                "roles": {
                    "drums": {"gain_db": -1.0, "comp": {"threshold_db": -18, "ratio": 3, "attack_ms": 3, "release_ms": 80}},
                    "bass": {"gain_db": -1.5, "lowpass_hz": 8000},
                    "lead": {"highpass_hz": 140, "sends": {"reverb": 0.12}},
                    "pluck": {"highpass_hz": 160, "sends": {"reverb": 0.14, "delay": 0.10}},
                    "pad": {"highpass_hz": 180, "sends": {"reverb": 0.22}},
                    "keys": {"highpass_hz": 150, "sends": {"reverb": 0.15}},
                    "vox": {"highpass_hz": 120, "sends": {"reverb": 0.10}},
                    "fx": {"highpass_hz": 200, "sends": {"reverb": 0.20}},
                    "music": {"highpass_hz": 120}
                },
                "returns": {
                    "reverb": {"predelay_ms": 10, "decay": 0.35},
                    "delay": {"ms": 240, "decay": 0.25}
                },
                "busses": {
                    "drums": {"comp": {"threshold_db": -24, "ratio": 3, "attack_ms": 3, "release_ms": 80}},
                    "bass": {"mono_below_hz": 130},
                    "music": {"comp": {"threshold_db": -20, "ratio": 2, "attack_ms": 5, "release_ms": 60}}
                },
                "master": {
                    "comp": {"threshold_db": -20, "ratio": 2.5, "attack_ms": 3, "release_ms": 60},
                    "limiter": {"limit": 0.98},
                    "mono_below_hz": 120
                },
                "sidechain": {
                    "targets": ["bass"],
                    "params": {"threshold_db": -24, "ratio": 6, "attack_ms": 5, "release_ms": 120}
                }
            },
            "gates": {
                "master": {
                    "lufs_min": -15.5,
                    "lufs_max": -12.5,
                    "true_peak_max": -1.0,
                    "crest_min": 6.0,
                    "stereo_corr_min": -0.2,
                    "stereo_balance_max": 1.5,
                    "dc_offset_max": 0.02
                },
                "stems": {
                    "true_peak_max": -3.0,
                    "peak_max": -3.0,
                    "crest_min": 3.0,
                    "stereo_corr_min": -0.5,
                    "stereo_balance_max": 4.0,
                    "dc_offset_max": 0.02,
                    "lufs_guidance": {
                        "drums": {"min": -22.0, "max": -12.0},
                        "bass": {"min": -22.0, "max": -13.0},
                        "music": {"min": -26.0, "max": -14.0}
                    }
                }
            }
        }
    })
}

/// Load presets from a JSON file, or the built-in table when absent
pub fn load_presets(path: Option<&Path>) -> Result<Value> {
    match path {
        Some(p) if p.exists() => {
            let text = std::fs::read_to_string(p)?;
            Ok(serde_json::from_str(&text)?)
        }
        Some(p) => Err(ClawError::Io(format!(
            "presets file not found: {}",
            p.display()
        ))),
        None => Ok(builtin_presets()),
    }
}

fn preset_section<'a>(presets: &'a Value, preset: &str) -> Result<&'a Value> {
    presets.get(preset).ok_or_else(|| {
        ClawError::InvalidInput(format!("unknown preset: {}", preset))
    })
}

/// Build a mix spec mapping for a project from a preset definition.
///
/// Every track gets its role's FX block (falling back to `music`); one
/// sidechain rule per target role is added from the kick source, carrying
/// `src_role: "kick"` only when the source can resolve drum roles.
pub fn build_mix_spec(project: &Project, preset: &Value) -> Map<String, Value> {
    let mix_def = preset.get("mix").cloned().unwrap_or_else(|| json!({}));
    let role_defs = mix_def.get("roles").cloned().unwrap_or_else(|| json!({}));

    let mut tracks = Map::new();
    for (i, t) in project.tracks.iter().enumerate() {
        let role = classify_track(&t.name);
        let spec = role_defs
            .get(role.role)
            .or_else(|| role_defs.get("music"))
            .cloned()
            .unwrap_or_else(|| json!({}));
        tracks.insert(i.to_string(), spec);
    }

    let sc_def = mix_def.get("sidechain").cloned().unwrap_or_else(|| json!({}));
    let targets: Vec<String> = sc_def
        .get("targets")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_else(|| vec!["bass".to_string()]);
    let params = sc_def
        .get("params")
        .cloned()
        .unwrap_or_else(|| json!({"threshold_db": -24, "ratio": 6, "attack_ms": 5, "release_ms": 120}));

    let mut sidechain: Vec<Value> = Vec::new();
    if let Some(kick_idx) = pick_kick_source_index(&project.tracks) {
        let use_src_role = track_is_drum_role_capable(&project.tracks[kick_idx]);
        for (i, t) in project.tracks.iter().enumerate() {
            let role = classify_track(&t.name);
            if targets.iter().any(|x| x == role.role) {
                let mut sc = Map::new();
                sc.insert("src".to_string(), json!(kick_idx));
                sc.insert("dst".to_string(), json!(i));
                if use_src_role {
                    sc.insert("src_role".to_string(), json!("kick"));
                }
                if let Some(p) = params.as_object() {
                    for (k, v) in p {
                        sc.insert(k.clone(), v.clone());
                    }
                }
                sidechain.push(Value::Object(sc));
            }
        }
    }

    let mut mix = Map::new();
    mix.insert("tracks".to_string(), Value::Object(tracks));
    mix.insert(
        "returns".to_string(),
        mix_def.get("returns").cloned().unwrap_or_else(|| json!({})),
    );
    mix.insert(
        "busses".to_string(),
        mix_def.get("busses").cloned().unwrap_or_else(|| json!({})),
    );
    mix.insert(
        "master".to_string(),
        mix_def.get("master").cloned().unwrap_or_else(|| json!({})),
    );
    mix.insert("sidechain".to_string(), Value::Array(sidechain));
    mix
}

lazy_static! {
    static ref SECTION_GAIN_RULES: Vec<(Regex, f32)> = vec![
        (Regex::new(r"breakdown|break").unwrap(), 0.75),
        (Regex::new(r"intro|outro").unwrap(), 0.85),
        (Regex::new(r"build|rise").unwrap(), 0.90),
        (Regex::new(r"verse").unwrap(), 0.90),
        (Regex::new(r"drop|chorus|hook").unwrap(), 1.0),
    ];
}

fn section_scale(pattern_name: &str) -> Option<f32> {
    let name = pattern_name.to_lowercase();
    SECTION_GAIN_RULES
        .iter()
        .find(|(re, _)| re.is_match(&name))
        .map(|(_, s)| *s)
}

/// Scale pattern note velocities by the section-name rules
/// (breakdown 0.75, intro/outro 0.85, build/verse 0.90, drop 1.0).
/// Drums and bass tracks are excluded unless opted in.
pub fn apply_section_gain(project: &mut Project, include_drums: bool, include_bass: bool) {
    for t in &mut project.tracks {
        let role = classify_track(&t.name);
        if role.is_drums && !include_drums {
            continue;
        }
        if role.is_bass && !include_bass {
            continue;
        }
        for (name, pat) in &mut t.patterns {
            let Some(scale) = section_scale(name) else {
                continue;
            };
            for n in &mut pat.notes {
                n.velocity = ((n.velocity as f32 * scale).round()).clamp(1.0, 127.0) as u8;
            }
        }
    }
}

/// Validate a mix spec against the project's structure.
///
/// Returns (all_ok, checks) where checks holds one `PASS`/`FAIL` line per
/// evaluated rule.
pub fn validate_mix_spec(
    project: &Project,
    mix: &Map<String, Value>,
    min_highpass: f64,
    mono_min: f64,
    mono_max: f64,
) -> (bool, Vec<String>) {
    let tracks_spec = mix.get("tracks").and_then(Value::as_object);
    let busses = mix.get("busses").and_then(Value::as_object);
    let master = mix.get("master").and_then(Value::as_object);
    let sidechain = mix.get("sidechain").and_then(Value::as_array);

    let mut failures = 0usize;
    let mut checks: Vec<String> = Vec::new();
    let mut check = |ok: bool, pass_msg: String, fail_msg: String| {
        if ok {
            checks.push(format!("PASS {}", pass_msg));
        } else {
            failures += 1;
            checks.push(format!("FAIL {}", fail_msg));
        }
    };

    // Rule 1: sidechain kick -> bass exists.
    let kick_idx = pick_kick_source_index(&project.tracks);
    let bass_idxs: Vec<usize> = project
        .tracks
        .iter()
        .enumerate()
        .filter(|(_, t)| classify_track(&t.name).is_bass)
        .map(|(i, _)| i)
        .collect();
    let has_sc = sidechain
        .map(|rules| {
            rules.iter().any(|sc| {
                let src = sc.get("src").and_then(Value::as_u64).map(|v| v as usize);
                let dst = sc.get("dst").and_then(Value::as_u64).map(|v| v as usize);
                match (src, dst, kick_idx) {
                    (Some(s), Some(d), Some(k)) => s == k && bass_idxs.contains(&d),
                    _ => false,
                }
            })
        })
        .unwrap_or(false);
    check(
        has_sc,
        "sidechain kick->bass present".to_string(),
        "sidechain kick->bass missing".to_string(),
    );

    // Rule 2: no reverb/delay sends on drums/bass tracks.
    for (i, t) in project.tracks.iter().enumerate() {
        let role = classify_track(&t.name);
        if !(role.is_drums || role.is_bass) {
            continue;
        }
        let sends = tracks_spec
            .and_then(|m| m.get(&i.to_string()))
            .and_then(|s| s.get("sends"))
            .and_then(Value::as_object);
        let wet = sends
            .map(|s| {
                ["reverb", "delay"].iter().any(|k| {
                    s.get(*k)
                        .and_then(Value::as_f64)
                        .map(|v| v > 0.0)
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);
        check(
            !wet,
            format!("no reverb/delay on {}", t.name),
            format!("no reverb/delay on {}", t.name),
        );
    }

    // Rule 3: highpass on non-bass musical tracks.
    for (i, t) in project.tracks.iter().enumerate() {
        let role = classify_track(&t.name);
        if role.is_drums || role.is_bass {
            continue;
        }
        let hp = tracks_spec
            .and_then(|m| m.get(&i.to_string()))
            .and_then(|s| s.get("highpass_hz"))
            .and_then(Value::as_f64);
        check(
            hp.map(|v| v >= min_highpass).unwrap_or(false),
            format!("highpass >= {} on {}", min_highpass, t.name),
            format!("highpass >= {} on {}", min_highpass, t.name),
        );
    }

    // Rule 4+5: bass bus and master mono_below in range.
    let in_range = |v: Option<f64>| v.map(|x| mono_min <= x && x <= mono_max).unwrap_or(false);
    let bass_mono = busses
        .and_then(|b| b.get("bass"))
        .and_then(|b| b.get("mono_below_hz"))
        .and_then(Value::as_f64);
    check(
        in_range(bass_mono),
        "bass bus mono_below_hz".to_string(),
        "bass bus mono_below_hz missing/out of range".to_string(),
    );
    let master_mono = master
        .and_then(|m| m.get("mono_below_hz"))
        .and_then(Value::as_f64);
    check(
        in_range(master_mono),
        "master mono_below_hz".to_string(),
        "master mono_below_hz missing/out of range".to_string(),
    );

    // Rule 6: music bus compression.
    let music_comp = busses
        .and_then(|b| b.get("music"))
        .and_then(|b| b.get("comp"))
        .map(|c| !c.is_null())
        .unwrap_or(false);
    check(
        music_comp,
        "music bus comp present".to_string(),
        "music bus comp missing".to_string(),
    );

    (failures == 0, checks)
}

fn gate_value(gates: &Value, key: &str, default: f64) -> f64 {
    gates.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Apply the master gate thresholds to a meter JSON value.
pub fn gate_master_meter(meter: &Value, preset: &Value) -> (bool, Vec<String>) {
    let gates = preset
        .get("gates")
        .and_then(|g| g.get("master"))
        .cloned()
        .unwrap_or_else(|| json!({}));

    let lufs_min = gate_value(&gates, "lufs_min", -15.5);
    let lufs_max = gate_value(&gates, "lufs_max", -12.5);
    let true_peak_max = gate_value(&gates, "true_peak_max", -1.0);
    let crest_min = gate_value(&gates, "crest_min", 6.0);
    let corr_min = gate_value(&gates, "stereo_corr_min", -0.2);
    let balance_max = gate_value(&gates, "stereo_balance_max", 1.5);
    let dc_max = gate_value(&gates, "dc_offset_max", 0.02);
    let tilt_min = gates.get("spectral_tilt_min").and_then(Value::as_f64);
    let tilt_max = gates.get("spectral_tilt_max").and_then(Value::as_f64);

    let m = |k: &str| meter.get(k).and_then(Value::as_f64);

    let mut checks: Vec<(String, bool, String)> = Vec::new();
    let mut push = |name: &str, value: Option<f64>, ok: fn(f64, f64, f64) -> bool, lo: f64, hi: f64, detail: String| {
        match value {
            None => checks.push((name.to_string(), false, "missing".to_string())),
            Some(v) => checks.push((name.to_string(), ok(v, lo, hi), detail)),
        }
    };

    let lufs = m("integrated_lufs");
    push(
        "integrated_lufs",
        lufs,
        |v, lo, hi| lo <= v && v <= hi,
        lufs_min,
        lufs_max,
        format!(
            "{} (target {}..{})",
            lufs.map(|v| format!("{:.2}", v)).unwrap_or_default(),
            lufs_min,
            lufs_max
        ),
    );
    let tp = m("true_peak_dbtp");
    push(
        "true_peak_dbtp",
        tp,
        |v, _, hi| v <= hi,
        0.0,
        true_peak_max,
        format!(
            "{} dBTP (<= {})",
            tp.map(|v| format!("{:.2}", v)).unwrap_or_default(),
            true_peak_max
        ),
    );
    let cf = m("crest_factor_db");
    push(
        "crest_factor_db",
        cf,
        |v, lo, _| v >= lo,
        crest_min,
        0.0,
        format!(
            "{} dB (>= {})",
            cf.map(|v| format!("{:.2}", v)).unwrap_or_default(),
            crest_min
        ),
    );
    let corr = m("stereo_correlation");
    push(
        "stereo_correlation",
        corr,
        |v, lo, _| v >= lo,
        corr_min,
        0.0,
        format!(
            "{} (>= {})",
            corr.map(|v| format!("{:.2}", v)).unwrap_or_default(),
            corr_min
        ),
    );
    let bal = m("stereo_balance_db");
    push(
        "stereo_balance_db",
        bal,
        |v, _, hi| v.abs() <= hi,
        0.0,
        balance_max,
        format!(
            "{} dB (|x| <= {})",
            bal.map(|v| format!("{:.2}", v)).unwrap_or_default(),
            balance_max
        ),
    );
    let dc = m("dc_offset");
    push(
        "dc_offset",
        dc,
        |v, _, hi| v.abs() <= hi,
        0.0,
        dc_max,
        format!(
            "{} (|x| <= {})",
            dc.map(|v| format!("{:.4}", v)).unwrap_or_default(),
            dc_max
        ),
    );

    if tilt_min.is_some() || tilt_max.is_some() {
        let tilt = m("spectral_tilt_db");
        let ok = match tilt {
            None => false,
            Some(v) => {
                tilt_min.map(|lo| v >= lo).unwrap_or(true)
                    && tilt_max.map(|hi| v <= hi).unwrap_or(true)
            }
        };
        checks.push((
            "spectral_tilt_db".to_string(),
            ok,
            format!("{:?} (target {:?}..{:?})", tilt, tilt_min, tilt_max),
        ));
    }

    let all_ok = checks.iter().all(|(_, ok, _)| *ok);
    let lines = checks
        .into_iter()
        .map(|(name, ok, detail)| {
            format!("{} {}: {}", if ok { "PASS" } else { "FAIL" }, name, detail)
        })
        .collect();
    (all_ok, lines)
}

/// Derive a role from a stem filename by stripping the `NN_` prefix.
pub fn role_from_stem_filename(name: &str) -> &'static str {
    let base = name.to_lowercase();
    let base = base.strip_suffix(".wav").unwrap_or(&base);
    let stripped = match base.split_once('_') {
        Some((prefix, rest)) if prefix.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => base,
    };
    classify_track(stripped).role
}

/// Per-file stems gate: thresholds plus optional per-role LUFS guidance.
pub fn gate_stems(
    stem_dir: &Path,
    bus_dir: Option<&Path>,
    preset: &Value,
    lufs_guidance: bool,
) -> Result<(bool, Vec<String>)> {
    let gates = preset
        .get("gates")
        .and_then(|g| g.get("stems"))
        .cloned()
        .unwrap_or_else(|| json!({}));

    let true_peak_max = gate_value(&gates, "true_peak_max", -3.0);
    let peak_max = gate_value(&gates, "peak_max", -3.0);
    let crest_min = gate_value(&gates, "crest_min", 3.0);
    let corr_min = gate_value(&gates, "stereo_corr_min", -0.5);
    let balance_max = gate_value(&gates, "stereo_balance_max", 4.0);
    let dc_max = gate_value(&gates, "dc_offset_max", 0.02);
    let guidance = gates.get("lufs_guidance").cloned().unwrap_or(Value::Null);

    let mut files: Vec<PathBuf> = Vec::new();
    let mut collect = |dir: &Path| -> Result<()> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|x| x == "wav"))
            .collect();
        entries.sort();
        files.extend(entries);
        Ok(())
    };
    collect(stem_dir)?;
    if let Some(bd) = bus_dir {
        collect(bd)?;
    }

    if files.is_empty() {
        return Ok((false, vec!["FAIL no stems/busses found".to_string()]));
    }

    let mut all_ok = true;
    let mut lines: Vec<String> = Vec::new();

    for wav in &files {
        let rep = analyze_metering(wav.to_str().unwrap_or_default(), false)?;

        let mut checks: Vec<(&str, bool, String)> = Vec::new();
        let fmt = |v: Option<f64>| v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "missing".to_string());

        checks.push((
            "true_peak_dbtp",
            rep.true_peak_dbtp.map(|v| v <= true_peak_max).unwrap_or(false),
            format!("{} dBTP (<= {})", fmt(rep.true_peak_dbtp), true_peak_max),
        ));
        checks.push((
            "peak_dbfs",
            rep.peak_dbfs.map(|v| v <= peak_max).unwrap_or(false),
            format!("{} dBFS (<= {})", fmt(rep.peak_dbfs), peak_max),
        ));
        checks.push((
            "crest_factor_db",
            rep.crest_factor_db.map(|v| v >= crest_min).unwrap_or(false),
            format!("{} dB (>= {})", fmt(rep.crest_factor_db), crest_min),
        ));
        checks.push((
            "stereo_correlation",
            rep.stereo_correlation.map(|v| v >= corr_min).unwrap_or(false),
            format!("{} (>= {})", fmt(rep.stereo_correlation), corr_min),
        ));
        checks.push((
            "stereo_balance_db",
            rep.stereo_balance_db
                .map(|v| v.abs() <= balance_max)
                .unwrap_or(false),
            format!("{} dB (|x| <= {})", fmt(rep.stereo_balance_db), balance_max),
        ));
        checks.push((
            "dc_offset",
            rep.dc_offset.map(|v| v.abs() <= dc_max).unwrap_or(false),
            format!("{} (|x| <= {})", fmt(rep.dc_offset), dc_max),
        ));

        if lufs_guidance && guidance.is_object() {
            let name = wav
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let role = role_from_stem_filename(&name);
            let guide = guidance.get(role).or_else(|| guidance.get("music"));
            if let Some(g) = guide {
                let min = gate_value(g, "min", -30.0);
                let max = gate_value(g, "max", -10.0);
                checks.push((
                    "integrated_lufs",
                    rep.integrated_lufs
                        .map(|v| min <= v && v <= max)
                        .unwrap_or(false),
                    format!("{} (target {}..{})", fmt(rep.integrated_lufs), min, max),
                ));
            }
        }

        let file_ok = checks.iter().all(|(_, ok, _)| *ok);
        all_ok = all_ok && file_ok;
        lines.push(format!(
            "{} {}",
            if file_ok { "PASS" } else { "FAIL" },
            wav.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        ));
        for (name, ok, detail) in checks {
            lines.push(format!(
                "  {} {}: {}",
                if ok { "PASS" } else { "FAIL" },
                name,
                detail
            ));
        }
    }

    Ok((all_ok, lines))
}

fn normalize_out_prefix(out_prefix: &str) -> Result<String> {
    let mut s = out_prefix.trim().replace('\\', "/");
    if let Some(rest) = s.strip_prefix("./") {
        s = rest.to_string();
    }
    if let Some(rest) = s.strip_prefix("out/") {
        s = rest.to_string();
    }
    for ext in [".json", ".mp3", ".mid", ".wav"] {
        if let Some(rest) = s.strip_suffix(ext) {
            s = rest.to_string();
        }
    }
    let s = s.trim_matches('/').to_string();
    if s.is_empty() {
        return Err(ClawError::InvalidInput("empty out prefix".to_string()));
    }
    Ok(s)
}

fn write_json(path: &Path, payload: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut text = serde_json::to_string_pretty(payload)?;
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}

/// Workflow configuration
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub preset: String,
    pub presets_path: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub tools_dir: PathBuf,
    pub section_gain: bool,
    pub preview_trim: f64,
    pub lufs_guidance: bool,
    pub sample_rate: u32,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            preset: "edm_streaming".to_string(),
            presets_path: None,
            out_dir: PathBuf::from("out"),
            tools_dir: PathBuf::from("tools"),
            section_gain: false,
            preview_trim: 30.0,
            lufs_guidance: true,
            sample_rate: crate::synth::DEFAULT_SAMPLE_RATE,
        }
    }
}

fn step(report: &mut Value, name: &str, ok: bool, extra: Value) {
    let mut obj = Map::new();
    obj.insert("step".to_string(), json!(name));
    obj.insert("ok".to_string(), json!(ok));
    if let Some(e) = extra.as_object() {
        for (k, v) in e {
            obj.insert(k.clone(), v.clone());
        }
    }
    report["steps"]
        .as_array_mut()
        .expect("steps array")
        .push(Value::Object(obj));
}

fn fail(report: Value, error: &str) -> ClawError {
    let mut r = report;
    r["error"] = json!(error);
    ClawError::Gate(r.to_string())
}

/// Run the full quality workflow on a persisted project.
///
/// On success the structured report is returned; on any gate failure a
/// `Gate` error carries the report (as JSON text) including every
/// per-step check line.
pub fn run_quality_workflow(
    project_json: &str,
    out_prefix: &str,
    soundfont: Option<&str>,
    opts: &WorkflowOptions,
) -> Result<Value> {
    let out_name = normalize_out_prefix(out_prefix)?;
    let mix_path = opts.tools_dir.join(format!("{}.mix.json", out_name));
    let presets = load_presets(opts.presets_path.as_deref())?;
    let preset = preset_section(&presets, &opts.preset)?.clone();

    let sf = crate::config::find_soundfont(soundfont).ok_or_else(|| {
        ClawError::InvalidState(
            "no soundfont available; pass --soundfont or set CLAW_DAW_SOUNDFONT".to_string(),
        )
    })?;

    let mut report = json!({
        "ok": false,
        "out_prefix": out_name,
        "preset": opts.preset,
        "project_json": project_json,
        "mix_json": mix_path.to_string_lossy(),
        "soundfont": sf.to_string_lossy(),
        "steps": [],
    });

    // mix_prepare: classify busses, build and persist the mix spec.
    let mut project = load_project(project_json)?;
    for t in &mut project.tracks {
        t.bus = classify_track(&t.name).bus.to_string();
    }
    save_project(&mut project, Some(project_json))?;
    let mix = build_mix_spec(&project, &preset);
    write_json(&mix_path, &Value::Object(mix.clone()))?;
    step(
        &mut report,
        "mix_prepare",
        true,
        json!({"detail": format!("wrote {}", mix_path.display())}),
    );

    if opts.section_gain {
        apply_section_gain(&mut project, false, false);
        save_project(&mut project, Some(project_json))?;
        step(&mut report, "section_gain", true, json!({"detail": "applied"}));
    }

    // mix_spec_validate
    let (ok, checks) = validate_mix_spec(&project, &mix, 100.0, 100.0, 180.0);
    step(&mut report, "mix_spec_validate", ok, json!({"checks": checks}));
    if !ok {
        report["error"] = json!("mix_spec_validate failed");
        return Err(ClawError::MixSpec(report.to_string()));
    }

    // preview_render: short mastered WAV + meter.
    let preview_wav = opts.out_dir.join(format!("{}.preview.wav", out_name));
    let preview_meter_path = opts.out_dir.join(format!("{}.preview.meter.json", out_name));
    let render_opts = RenderOptions {
        sample_rate: opts.sample_rate,
        drum_mode: DrumMode::default(),
    };
    let raw_preview = opts.out_dir.join(format!("{}.preview.raw.wav", out_name));
    render_project_wav(
        &project,
        &sf,
        raw_preview.to_str().unwrap_or_default(),
        &render_opts,
        Some(&mix),
    )?;
    master_wav(
        raw_preview.to_str().unwrap_or_default(),
        preview_wav.to_str().unwrap_or_default(),
        opts.sample_rate,
        Some(opts.preview_trim),
        "clean",
        0.0,
        0.0,
    )?;
    std::fs::remove_file(&raw_preview).ok();
    let preview_meter = analyze_metering(preview_wav.to_str().unwrap_or_default(), false)?;
    write_json(&preview_meter_path, &serde_json::to_value(&preview_meter)?)?;
    step(
        &mut report,
        "preview_render",
        true,
        json!({"wav": preview_wav.to_string_lossy()}),
    );

    // preview_gate
    let meter_value = serde_json::to_value(&preview_meter)?;
    let (ok, checks) = gate_master_meter(&meter_value, &preset);
    step(
        &mut report,
        "preview_gate",
        ok,
        json!({"checks": checks, "meter": preview_meter_path.to_string_lossy()}),
    );
    if !ok {
        return Err(fail(report, "preview_gate failed"));
    }

    // export_package: full mix + stems + busses + master meter.
    let master_out = opts.out_dir.join(format!("{}.wav", out_name));
    let raw_master = opts.out_dir.join(format!("{}.raw.wav", out_name));
    render_project_wav(
        &project,
        &sf,
        raw_master.to_str().unwrap_or_default(),
        &render_opts,
        Some(&mix),
    )?;
    master_wav(
        raw_master.to_str().unwrap_or_default(),
        master_out.to_str().unwrap_or_default(),
        opts.sample_rate,
        None,
        "clean",
        0.0,
        0.0,
    )?;
    std::fs::remove_file(&raw_master).ok();

    let stem_dir = opts.out_dir.join(format!("{}_stems", out_name));
    let bus_dir = opts.out_dir.join(format!("{}_busses", out_name));
    stems::export_stems(&project, &sf, &stem_dir, opts.sample_rate, Some(&mix))?;
    stems::export_busses(&project, &sf, &bus_dir, opts.sample_rate)?;

    let master_meter_path = opts.out_dir.join(format!("{}.meter.json", out_name));
    let master_meter = analyze_metering(master_out.to_str().unwrap_or_default(), true)?;
    write_json(&master_meter_path, &serde_json::to_value(&master_meter)?)?;
    step(&mut report, "export_package", true, json!({}));

    // mix_gate (master)
    let meter_value = serde_json::to_value(&master_meter)?;
    let (ok, checks) = gate_master_meter(&meter_value, &preset);
    step(
        &mut report,
        "mix_gate",
        ok,
        json!({"checks": checks, "meter": master_meter_path.to_string_lossy()}),
    );
    if !ok {
        return Err(fail(report, "mix_gate failed"));
    }

    // mix_gate_stems
    let (ok, checks) = gate_stems(&stem_dir, Some(&bus_dir), &preset, opts.lufs_guidance)?;
    step(&mut report, "mix_gate_stems", ok, json!({"checks": checks}));
    if !ok {
        return Err(fail(report, "mix_gate_stems failed"));
    }

    report["ok"] = json!(true);
    Ok(report)
}
