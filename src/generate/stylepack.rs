//! Stylepacks: reproducible beat specs compiled onto genre packs, with a
//! render -> analyze -> auto-tune iteration loop.
//!
//! A [`BeatSpec`] names a stylepack, a seed and a handful of knobs. Compile
//! generates a genre-pack script and post-processes it with the knob values
//! (tempo/swing overrides, kit swap, density rewrite, humanize insertion,
//! lead thinning, mastering preset). The run loop renders a preview per
//! attempt, scores it (spectral balance gated by mix sanity), nudges knobs
//! deterministically between attempts, and re-renders the best attempt.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::analysis::sanity::{analyze_mix_sanity, MixSanity};
use crate::analysis::score::spectral_balance_score;
use crate::error::{ClawError, Result};
use crate::generate::fingerprint::project_similarity;
use crate::generate::packs::{accept, generate_from_genre_pack, get_pack};
use crate::model::Project;
use crate::script::{RunnerOptions, ScriptRunner};

/// One stylepack: a genre pack plus default knobs and tempo bounds
#[derive(Debug, Clone)]
pub struct Stylepack {
    pub name: &'static str,
    pub title: &'static str,
    pub pack: &'static str,
    pub bpm_default: u32,
    pub bpm_min: u32,
    pub bpm_max: u32,
    pub swing_percent: u32,
    pub default_knobs: Knobs,
}

/// Generation knobs shared by every stylepack
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Knobs {
    pub drum_density: f64,
    pub drum_kit: String,
    pub humanize_timing: u32,
    pub humanize_velocity: u32,
    pub lead_density: f64,
    /// Optional mastering preset override fed back by auto-tune
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mastering_preset: Option<String>,
}

/// The built-in stylepacks
pub fn list_stylepacks() -> Vec<Stylepack> {
    vec![
        Stylepack {
            name: "trap_2020s",
            title: "2020s Trap (bouncy)",
            pack: "trap",
            bpm_default: 150,
            bpm_min: 140,
            bpm_max: 165,
            swing_percent: 18,
            default_knobs: Knobs {
                drum_density: 0.80,
                drum_kit: "trap_hard".to_string(),
                humanize_timing: 6,
                humanize_velocity: 8,
                lead_density: 0.55,
                mastering_preset: None,
            },
        },
        Stylepack {
            name: "boom_bap",
            title: "Boom Bap (classic)",
            pack: "boom_bap",
            bpm_default: 92,
            bpm_min: 80,
            bpm_max: 105,
            swing_percent: 25,
            default_knobs: Knobs {
                drum_density: 0.60,
                drum_kit: "boombap_dusty".to_string(),
                humanize_timing: 10,
                humanize_velocity: 10,
                lead_density: 0.30,
                mastering_preset: None,
            },
        },
        Stylepack {
            name: "house",
            title: "House (clean 4x4)",
            pack: "house",
            bpm_default: 124,
            bpm_min: 120,
            bpm_max: 130,
            swing_percent: 0,
            default_knobs: Knobs {
                drum_density: 0.82,
                drum_kit: "house_clean".to_string(),
                humanize_timing: 2,
                humanize_velocity: 6,
                lead_density: 0.35,
                mastering_preset: None,
            },
        },
    ]
}

/// Look up a stylepack by name
pub fn get_stylepack(name: &str) -> Result<Stylepack> {
    list_stylepacks()
        .into_iter()
        .find(|s| s.name == name.trim())
        .ok_or_else(|| ClawError::InvalidInput(format!("unknown stylepack: {}", name)))
}

/// A small, reproducible spec that compiles into a headless script
#[derive(Debug, Clone, Serialize)]
pub struct BeatSpec {
    pub name: String,
    pub stylepack: String,
    pub seed: i64,
    pub max_attempts: u32,
    pub length_bars: u32,
    pub bpm: Option<u32>,
    pub swing_percent: Option<u32>,
    pub knobs: Knobs,
    pub score_threshold: f64,
    pub max_similarity: f64,
}

impl BeatSpec {
    pub fn new(name: &str, stylepack: &str) -> Result<BeatSpec> {
        let sp = get_stylepack(stylepack)?;
        Ok(BeatSpec {
            name: name.to_string(),
            stylepack: sp.name.to_string(),
            seed: 0,
            max_attempts: 6,
            length_bars: 32,
            bpm: None,
            swing_percent: None,
            knobs: sp.default_knobs,
            score_threshold: 0.60,
            max_similarity: 0.92,
        })
    }
}

/// Clamp every field of a spec into its stylepack's valid ranges
pub fn normalize_beatspec(mut spec: BeatSpec) -> Result<BeatSpec> {
    let sp = get_stylepack(&spec.stylepack)?;

    spec.bpm = Some(
        spec.bpm
            .unwrap_or(sp.bpm_default)
            .clamp(sp.bpm_min, sp.bpm_max),
    );
    spec.swing_percent = Some(spec.swing_percent.unwrap_or(sp.swing_percent).min(75));
    spec.length_bars = spec.length_bars.clamp(8, 256);
    spec.max_attempts = spec.max_attempts.clamp(1, 40);
    spec.max_similarity = spec.max_similarity.clamp(0.0, 1.0);
    spec.score_threshold = spec.score_threshold.clamp(0.0, 1.0);

    spec.knobs.drum_density = spec.knobs.drum_density.clamp(0.05, 1.0);
    spec.knobs.lead_density = spec.knobs.lead_density.clamp(0.0, 1.0);
    spec.knobs.humanize_timing = spec.knobs.humanize_timing.min(30);
    spec.knobs.humanize_velocity = spec.knobs.humanize_velocity.min(30);
    if crate::drumkit::get_drum_kit(Some(&spec.knobs.drum_kit)).name != spec.knobs.drum_kit {
        spec.knobs.drum_kit = sp.default_knobs.drum_kit.clone();
    }

    Ok(spec)
}

lazy_static! {
    static ref DENSITY_RE: Regex = Regex::new(r"density=[0-9.]+").unwrap();
    static ref PRESET_RE: Regex = Regex::new(r"preset=[^\s]+").unwrap();
}

/// Compile a spec into `tools/<out_prefix>.txt`.
///
/// Strategy is additive: generate the genre-pack base (with novelty
/// control), then rewrite the script for the knob values.
pub fn compile_to_script(spec: &BeatSpec, out_prefix: &str, tools_dir: &Path) -> Result<PathBuf> {
    let sp = get_stylepack(&spec.stylepack)?;
    let pack = get_pack(sp.pack)?;

    let base = generate_from_genre_pack(
        pack.name,
        out_prefix,
        tools_dir,
        spec.seed,
        spec.max_attempts,
        Some(spec.max_similarity),
        true,
    )?;

    let mut lines: Vec<String> = std::fs::read_to_string(&base.script_path)?
        .lines()
        .map(str::to_string)
        .collect();

    // bpm/swing overrides
    for ln in &mut lines {
        if ln.starts_with("new_project ") {
            let mut parts: Vec<String> = ln.split_whitespace().map(str::to_string).collect();
            if parts.len() >= 3 {
                parts[2] = spec.bpm.unwrap_or(pack.bpm_default).to_string();
                *ln = parts.join(" ");
            }
        }
        if ln.starts_with("set_swing ") {
            *ln = format!("set_swing {}", spec.swing_percent.unwrap_or(pack.swing_percent));
        }
    }
    // a pack without a set_swing line still needs the override
    if spec.swing_percent.unwrap_or(0) > 0 && !lines.iter().any(|l| l.starts_with("set_swing ")) {
        lines.insert(1, format!("set_swing {}", spec.swing_percent.unwrap_or(0)));
    }

    // drum kit swap (track 0 is the drums track in every pack)
    if !spec.knobs.drum_kit.is_empty() {
        for ln in &mut lines {
            if ln.starts_with("set_kit 0 ") {
                *ln = format!("set_drum_kit 0 {}", spec.knobs.drum_kit);
            }
        }
    }

    // drum density rewrite
    for ln in &mut lines {
        if ln.trim_start().starts_with("gen_drums ") && ln.contains("density=") {
            *ln = DENSITY_RE
                .replace(ln, format!("density={:.2}", spec.knobs.drum_density).as_str())
                .into_owned();
        }
    }

    // humanize insertion before the first pattern
    if spec.knobs.humanize_timing > 0 || spec.knobs.humanize_velocity > 0 {
        if let Some(pos) = lines.iter().position(|l| l.starts_with("new_pattern ")) {
            let ht = spec.knobs.humanize_timing;
            let hv = spec.knobs.humanize_velocity;
            lines.insert(
                pos,
                format!(
                    "set_humanize 1 timing={} velocity={} seed={}",
                    ht.saturating_sub(2),
                    hv,
                    spec.seed + 1
                ),
            );
            lines.insert(
                pos,
                format!("set_humanize 0 timing={} velocity={} seed={}", ht, hv, spec.seed),
            );
        }
    }

    // lead thinning: add seeded chance to lead notes that lack one
    if spec.knobs.lead_density < 0.99 {
        let mut rng = StdRng::seed_from_u64((spec.seed + 991) as u64);
        for ln in &mut lines {
            if ln.starts_with("add_note_pat ") && ln.contains(" l ") && !ln.contains(" chance=") {
                let jitter = (rng.random::<f64>() - 0.5) * 0.10;
                let chance = (spec.knobs.lead_density + jitter).clamp(0.0, 1.0);
                *ln = format!("{} chance={:.2}", ln, chance);
            }
        }
    }

    // mastering preset override on export lines
    if let Some(mp) = &spec.knobs.mastering_preset {
        for ln in &mut lines {
            if ln.trim_start().starts_with("export_") && ln.contains(" preset=") {
                *ln = PRESET_RE.replace(ln, format!("preset={}", mp).as_str()).into_owned();
            }
        }
    }

    std::fs::create_dir_all(tools_dir)?;
    let script_path = tools_dir.join(format!("{}.txt", out_prefix));
    std::fs::write(&script_path, lines.join("\n").trim().to_string() + "\n")?;
    Ok(script_path)
}

/// Per-attempt record in the run report
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReport {
    pub attempt: u32,
    pub seed: i64,
    pub knobs: Knobs,
    pub acceptance_ok: bool,
    pub acceptance_errors: Vec<String>,
    pub similarity_to_prev: Option<f64>,
    pub spectral: Option<Value>,
    pub sanity: Option<Value>,
    pub score: Option<f64>,
    pub chosen: bool,
}

/// Generic per-retry knob tweaks: more humanize, thinner lead, kit cycle
/// from attempt 2, slightly lower drum density.
pub fn tweak_knobs_for_retry(knobs: &Knobs, attempt: u32) -> Knobs {
    let mut k = knobs.clone();
    k.humanize_timing += 2;
    k.humanize_velocity += 2;
    k.lead_density = (k.lead_density - 0.10).max(0.10);

    if attempt >= 2 {
        const CYCLE: [&str; 4] = ["trap_hard", "house_clean", "boombap_dusty", "gm_basic"];
        if let Some(pos) = CYCLE.iter().position(|c| *c == k.drum_kit) {
            k.drum_kit = CYCLE[(pos + 1) % CYCLE.len()].to_string();
        }
    }
    if attempt >= 1 {
        k.drum_density = (k.drum_density - 0.05).max(0.40);
    }
    k
}

/// Sanity-driven knob fixes: raise densities and pick a louder preset when
/// mostly silent, back off when hot, thin leads on harsh highs, reduce
/// drums when boomy. Never random.
pub fn autofix_for_mix_sanity(knobs: &Knobs, sanity: Option<&MixSanity>, attempt: u32) -> Knobs {
    let Some(sanity) = sanity else {
        return knobs.clone();
    };
    let mut k = knobs.clone();

    let mean_db = sanity.metrics.mean_dbfs;
    let max_db = sanity.metrics.max_dbfs;
    let silence = sanity.metrics.silence_fraction;

    if silence >= 0.50 || mean_db < -40.0 {
        k.drum_density = (k.drum_density + 0.10).min(1.0);
        k.lead_density = (k.lead_density + 0.10).min(1.0);
        k.mastering_preset = Some("demo".to_string());
    }

    if max_db >= -1.0 || mean_db > -10.0 {
        k.lead_density = (k.lead_density - 0.10).max(0.05);
        k.drum_density = (k.drum_density - 0.05).max(0.30);
        k.mastering_preset = Some("clean".to_string());
    }

    if sanity.reasons.iter().any(|r| r.contains("highs dominate")) {
        k.lead_density = (k.lead_density - 0.10).max(0.05);
        if attempt >= 1 && k.mastering_preset.is_none() {
            k.mastering_preset = Some("lofi".to_string());
        }
    }

    if sanity.reasons.iter().any(|r| r.contains("lows dominate")) {
        k.drum_density = (k.drum_density - 0.05).max(0.25);
        if attempt >= 2 {
            k.mastering_preset = Some("clean".to_string());
        }
    }

    k
}

/// Run a stylepack: generate + render + score + iterate, writing
/// `out/<out_prefix>.report.json`. Returns the report path.
pub fn run_stylepack(
    spec: BeatSpec,
    out_prefix: &str,
    soundfont: &Path,
    tools_dir: &Path,
    out_dir: &Path,
) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;

    let spec = normalize_beatspec(spec)?;
    let sp = get_stylepack(&spec.stylepack)?;
    let pack = get_pack(sp.pack)?;

    let mut attempts: Vec<AttemptReport> = Vec::new();
    let mut prev_proj: Option<Project> = None;
    let mut best_idx: Option<usize> = None;
    let mut best_score = -1.0f64;
    let mut cur = spec.clone();

    for attempt in 0..spec.max_attempts {
        let script_path = compile_to_script(&cur, out_prefix, tools_dir)?;

        // fast path for scoring: keep the preview, drop full exports
        let lines: Vec<String> = std::fs::read_to_string(&script_path)?
            .lines()
            .filter(|l| {
                let s = l.trim_start();
                !(s.starts_with("export_mp3")
                    || s.starts_with("export_wav")
                    || s.starts_with("export_m4a"))
            })
            .map(str::to_string)
            .collect();

        let mut runner = ScriptRunner::new(RunnerOptions {
            soundfont: Some(soundfont.to_path_buf()),
            strict: true,
            dry_run: false,
        });
        runner.run_text(&lines.join("\n"), None)?;
        let proj = runner.into_project()?;

        let (acceptance_ok, acceptance_errors) = match accept(&pack, &proj) {
            Ok(()) => (true, Vec::new()),
            Err(ClawError::Acceptance(errors)) => (false, errors),
            Err(e) => return Err(e),
        };

        let sim = prev_proj.as_ref().map(|p| project_similarity(p, &proj));
        prev_proj = Some(proj);

        let preview = out_dir.join(format!("{}.preview.mp3", out_prefix));
        let full = out_dir.join(format!("{}.mp3", out_prefix));
        let audio = if preview.exists() {
            Some(preview)
        } else if full.exists() {
            Some(full)
        } else {
            None
        };

        let mut spectral_value = None;
        let mut sanity_value = None;
        let mut sanity = None;
        let mut score = None;
        if let Some(path) = audio.as_deref().and_then(Path::to_str) {
            let ss = spectral_balance_score(path)?;
            spectral_value = Some(json!({
                "score": ss.score,
                "reasons": ss.reasons,
                "bands": ss.report,
            }));
            let sn = analyze_mix_sanity(path)?;
            // the final score is bounded by both gates
            score = Some(ss.score.min(sn.score));
            sanity_value = Some(serde_json::to_value(&sn)?);
            sanity = Some(sn);
        }

        attempts.push(AttemptReport {
            attempt,
            seed: cur.seed + attempt as i64,
            knobs: cur.knobs.clone(),
            acceptance_ok,
            acceptance_errors,
            similarity_to_prev: sim,
            spectral: spectral_value,
            sanity: sanity_value,
            score,
            chosen: false,
        });

        if let Some(s) = score {
            if acceptance_ok && s > best_score {
                best_score = s;
                best_idx = Some(attempt as usize);
            }
            if acceptance_ok && s >= spec.score_threshold {
                best_idx = Some(attempt as usize);
                break;
            }
        }

        // address the observed mix issues first, then generic tweaks
        cur.knobs = autofix_for_mix_sanity(&cur.knobs, sanity.as_ref(), attempt);
        cur.knobs = tweak_knobs_for_retry(&cur.knobs, attempt);
    }

    if let Some(best) = best_idx {
        attempts[best].chosen = true;

        // final render: the chosen attempt's knobs, full exports included
        let mut final_spec = spec.clone();
        final_spec.knobs = attempts[best].knobs.clone();
        let final_script = compile_to_script(&final_spec, out_prefix, tools_dir)?;
        let mut runner = ScriptRunner::new(RunnerOptions {
            soundfont: Some(soundfont.to_path_buf()),
            strict: true,
            dry_run: false,
        });
        runner.run_text(&std::fs::read_to_string(&final_script)?, None)?;
    }

    let report = json!({
        "name": out_prefix,
        "stylepack": sp.name,
        "pack": pack.name,
        "beatspec": serde_json::to_value(&spec)?,
        "attempts": serde_json::to_value(&attempts)?,
        "best_attempt": best_idx,
    });

    let report_path = out_dir.join(format!("{}.report.json", out_prefix));
    let mut text = serde_json::to_string_pretty(&report)?;
    text.push('\n');
    std::fs::write(&report_path, text)?;
    Ok(report_path)
}

/// Knob documentation map shown to humans/agents
pub fn knob_docs() -> BTreeMap<&'static str, &'static str> {
    let mut m = BTreeMap::new();
    m.insert("drum_density", "0..1 hat/percussion density");
    m.insert("drum_kit", "trap_hard|house_clean|boombap_dusty|gm_basic");
    m.insert("humanize_timing", "ticks of timing humanize (0..30)");
    m.insert("humanize_velocity", "velocity randomization amount (0..30)");
    m.insert("lead_density", "0..1 (lower => sparser top melody)");
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stylepack_lookup() {
        assert_eq!(get_stylepack("house").unwrap().pack, "house");
        assert_eq!(get_stylepack("trap_2020s").unwrap().bpm_default, 150);
        assert!(get_stylepack("vaporwave").is_err());
    }

    #[test]
    fn test_normalize_clamps_everything() {
        let mut spec = BeatSpec::new("t", "house").unwrap();
        spec.bpm = Some(200);
        spec.knobs.drum_density = 5.0;
        spec.knobs.humanize_timing = 99;
        spec.knobs.drum_kit = "nonsense".to_string();
        spec.max_attempts = 100;
        let n = normalize_beatspec(spec).unwrap();
        assert_eq!(n.bpm, Some(130)); // house bpm_max
        assert_eq!(n.knobs.drum_density, 1.0);
        assert_eq!(n.knobs.humanize_timing, 30);
        assert_eq!(n.knobs.drum_kit, "house_clean");
        assert_eq!(n.max_attempts, 40);
    }

    #[test]
    fn test_compile_applies_knobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = normalize_beatspec(BeatSpec::new("t", "trap_2020s").unwrap()).unwrap();
        spec.knobs.drum_density = 0.5;
        spec.knobs.mastering_preset = Some("lofi".to_string());
        let path = compile_to_script(&spec, "sp_test", dir.path()).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("density=0.50"));
        assert!(text.contains("set_drum_kit 0 trap_hard"));
        assert!(text.contains("set_humanize 0 timing=6 velocity=8"));
        assert!(text.contains("preset=lofi"));
        // trap pack has no swing line; stylepack swing gets inserted
        assert!(text.contains("set_swing 18"));
        // bpm overridden to the stylepack default
        assert!(text.contains("new_project sp_test 150"));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let spec = normalize_beatspec(BeatSpec::new("t", "house").unwrap()).unwrap();
        let a = compile_to_script(&spec, "d1", dir.path()).unwrap();
        let t1 = std::fs::read_to_string(&a).unwrap();
        let b = compile_to_script(&spec, "d1", dir.path()).unwrap();
        let t2 = std::fs::read_to_string(&b).unwrap();
        assert_eq!(t1, t2);
    }

    #[test]
    fn test_retry_tweaks() {
        let base = get_stylepack("trap_2020s").unwrap().default_knobs;
        let k1 = tweak_knobs_for_retry(&base, 0);
        assert_eq!(k1.humanize_timing, base.humanize_timing + 2);
        assert!((k1.lead_density - (base.lead_density - 0.10)).abs() < 1e-9);
        assert_eq!(k1.drum_kit, base.drum_kit); // no cycle yet

        let k2 = tweak_knobs_for_retry(&base, 2);
        assert_eq!(k2.drum_kit, "house_clean"); // cycled
        assert!(k2.drum_density < base.drum_density);
    }

    fn sanity_with(mean: f64, max: f64, silence: f64, reasons: &[&str]) -> MixSanity {
        MixSanity {
            score: 0.5,
            reasons: reasons.iter().map(|s| s.to_string()).collect(),
            metrics: crate::analysis::sanity::SanityMetrics {
                mean_dbfs: mean,
                max_dbfs: max,
                silence_fraction: silence,
                low_mean_dbfs: 0.0,
                mid_mean_dbfs: 0.0,
                high_mean_dbfs: 0.0,
            },
            bands: Default::default(),
        }
    }

    #[test]
    fn test_autofix_mostly_silent_raises_density() {
        let base = get_stylepack("house").unwrap().default_knobs;
        let s = sanity_with(-50.0, -20.0, 0.9, &[]);
        let k = autofix_for_mix_sanity(&base, Some(&s), 0);
        assert!(k.drum_density > base.drum_density);
        assert_eq!(k.mastering_preset.as_deref(), Some("demo"));
    }

    #[test]
    fn test_autofix_hot_peaks_backs_off() {
        let base = get_stylepack("house").unwrap().default_knobs;
        let s = sanity_with(-8.0, -0.5, 0.0, &[]);
        let k = autofix_for_mix_sanity(&base, Some(&s), 0);
        assert!(k.lead_density < base.lead_density);
        assert_eq!(k.mastering_preset.as_deref(), Some("clean"));
    }

    #[test]
    fn test_autofix_harsh_highs_thins_lead() {
        let base = get_stylepack("trap_2020s").unwrap().default_knobs;
        let s = sanity_with(-18.0, -3.0, 0.0, &["highs dominate mids (high-mid=8.0dB)"]);
        let k = autofix_for_mix_sanity(&base, Some(&s), 1);
        assert!(k.lead_density < base.lead_density);
        assert_eq!(k.mastering_preset.as_deref(), Some("lofi"));
    }

    #[test]
    fn test_autofix_without_sanity_is_identity() {
        let base = get_stylepack("house").unwrap().default_knobs;
        assert_eq!(autofix_for_mix_sanity(&base, None, 0), base);
    }
}
