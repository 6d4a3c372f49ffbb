//! Genre packs: deterministic script generators with acceptance tests.
//!
//! A pack maps (seed, attempt) to a headless script; the resulting project
//! must pass genre-specific musical checks (house four-on-the-floor, trap
//! halftime snares, boom-bap backbeat) before it is accepted. The pipeline
//! iterates attempts under the novelty constraint.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ClawError, Result};
use crate::generate::brief::StyleName;
use crate::generate::fingerprint::project_similarity;
use crate::generate::script::safe_name;
use crate::generate::style::select_track_sound;
use crate::model::Project;
use crate::script::{RunnerOptions, ScriptRunner};

/// Deterministic coarse structure switches for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariationSpec {
    pub drum_variant: u32,
    pub bass_variant: u32,
    pub harmony_variant: u32,
    pub lead_variant: u32,
}

/// Derives a [`VariationSpec`] from (seed, attempt); different attempts are
/// meaningfully different so the similarity constraint has a chance to pass.
pub struct VariationEngine {
    seed: i64,
}

impl VariationEngine {
    pub fn new(seed: i64) -> Self {
        Self { seed }
    }

    pub fn spec(&self, attempt: u32) -> VariationSpec {
        let key = (self.seed + 1).wrapping_mul(1_000_003) + attempt as i64 * 97;
        let mut rng = StdRng::seed_from_u64(key as u64);
        VariationSpec {
            drum_variant: rng.random_range(0..4),
            bass_variant: rng.random_range(0..4),
            harmony_variant: rng.random_range(0..4),
            lead_variant: rng.random_range(0..4),
        }
    }
}

/// One genre pack definition
#[derive(Debug, Clone)]
pub struct GenrePack {
    pub name: &'static str,
    pub title: &'static str,
    pub bpm_min: u32,
    pub bpm_max: u32,
    pub bpm_default: u32,
    pub swing_percent: u32,
    pub roles: &'static [&'static str],
    pub mastering_preset: &'static str,
}

/// The built-in pack table
pub fn list_packs() -> Vec<GenrePack> {
    vec![
        GenrePack {
            name: "trap",
            title: "Trap Pack v1",
            bpm_min: 120,
            bpm_max: 170,
            bpm_default: 140,
            swing_percent: 0,
            roles: &["drums", "bass", "keys", "lead"],
            mastering_preset: "clean",
        },
        GenrePack {
            name: "house",
            title: "House Pack v1",
            bpm_min: 118,
            bpm_max: 132,
            bpm_default: 124,
            swing_percent: 0,
            roles: &["drums", "bass", "keys"],
            mastering_preset: "demo",
        },
        GenrePack {
            name: "boom_bap",
            title: "Boom-Bap Pack v1",
            bpm_min: 78,
            bpm_max: 98,
            bpm_default: 90,
            swing_percent: 18,
            roles: &["drums", "bass", "keys"],
            mastering_preset: "lofi",
        },
    ]
}

/// Look up a pack by (normalized) name
pub fn get_pack(name: &str) -> Result<GenrePack> {
    let key = name.trim().to_lowercase().replace('-', "_");
    list_packs()
        .into_iter()
        .find(|p| p.name == key)
        .ok_or_else(|| {
            ClawError::InvalidInput(format!(
                "unknown genre pack: {}. Available: {}",
                name,
                list_packs()
                    .iter()
                    .map(|p| p.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
}

fn scale_a_minor() -> [u8; 7] {
    [45, 47, 48, 50, 52, 53, 55]
}

fn style_for_pack(pack: &GenrePack) -> StyleName {
    StyleName::parse(pack.name)
}

fn gen_common(pack: &GenrePack, seed: i64, attempt: u32, out_prefix: Option<&str>) -> (Vec<String>, StdRng) {
    let rng = StdRng::seed_from_u64((seed + attempt as i64 * 10_007) as u64);
    let name = safe_name(out_prefix.unwrap_or(pack.title));
    let mut lines = vec![format!("new_project {} {}", name, pack.bpm_default)];
    if pack.swing_percent > 0 {
        lines.push(format!("set_swing {}", pack.swing_percent));
    }

    for (ti, role) in pack.roles.iter().enumerate() {
        let sound = select_track_sound(role, style_for_pack(pack), None);
        let mut title = role.to_string();
        if let Some(first) = title.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        lines.push(format!("add_track {} {}", title, sound.program.unwrap_or(0)));
        match sound.sampler {
            Some("drums") => lines.push(format!(
                "set_kit {} {}",
                ti,
                sound.sampler_preset.unwrap_or("default")
            )),
            Some("808") => lines.push(format!(
                "set_808 {} {}",
                ti,
                sound.sampler_preset.unwrap_or("default")
            )),
            _ => {}
        }
        if *role == "drums" {
            lines.push(format!("set_volume {} 112", ti));
        }
        if *role == "bass" {
            lines.push(format!("set_volume {} 105", ti));
        }
    }

    (lines, rng)
}

fn export_lines(pack: &GenrePack, out_prefix: Option<&str>) -> Vec<String> {
    let Some(prefix) = out_prefix else {
        return Vec::new();
    };
    let mp = pack.mastering_preset;
    vec![
        format!("save_project out/{}.json", prefix),
        format!("export_midi out/{}.mid", prefix),
        format!("export_preview_mp3 out/{}.preview.mp3 bars=8 start=0:0 preset={}", prefix, mp),
        format!("export_mp3 out/{}.mp3 trim=60 preset={} fade=0.15", prefix, mp),
    ]
}

fn gen_house(seed: i64, attempt: u32, out_prefix: Option<&str>) -> String {
    let pack = get_pack("house").expect("builtin pack");
    let (mut lines, mut rng) = gen_common(&pack, seed, attempt, out_prefix);
    let spec = VariationEngine::new(seed).spec(attempt);
    let scale = scale_a_minor();
    let bars = 32u32;

    lines.push("new_pattern 0 d 2:0".to_string());
    lines.push(format!(
        "gen_drums 0 d 2:0 house seed={} density={:.2}",
        seed + attempt as i64,
        0.80 + 0.03 * spec.drum_variant as f64
    ));
    lines.push(format!("place_pattern 0 d 0:0 {}", bars / 2));

    // offbeat bass
    lines.push("new_pattern 1 b 2:0".to_string());
    let root = scale[0];
    let offbeats: &[&str] = if spec.bass_variant % 2 == 0 {
        &["0:2", "1:2"]
    } else {
        &["0:2", "0:3", "1:2", "1:3"]
    };
    for st in offbeats {
        let vel = 92i64 + rng.random_range(-6..=10);
        lines.push(format!("add_note_pat 1 b {} {} 0:0:240 {}", root, st, vel));
    }
    lines.push(format!("place_pattern 1 b 0:0 {}", bars / 2));

    // chord stabs
    lines.push("new_pattern 2 k 2:0".to_string());
    let chord = [scale[0] + 24, scale[2] + 24, scale[4] + 24];
    let stabs: &[&str] = if spec.harmony_variant < 2 {
        &["0:2", "1:2"]
    } else {
        &["0:1", "0:2", "1:1", "1:2"]
    };
    for beat in stabs {
        for p in chord {
            let vel = 70i64 + rng.random_range(-8..=8);
            lines.push(format!("add_note_pat 2 k {} {} 0:0:180 {}", p, beat, vel));
        }
    }
    lines.push(format!("place_pattern 2 k 0:0 {}", bars / 2));

    lines.extend(export_lines(&pack, out_prefix));
    lines.join("\n") + "\n"
}

fn gen_trap(seed: i64, attempt: u32, out_prefix: Option<&str>) -> String {
    let pack = get_pack("trap").expect("builtin pack");
    let (mut lines, mut rng) = gen_common(&pack, seed, attempt, out_prefix);
    let spec = VariationEngine::new(seed).spec(attempt);
    let scale = scale_a_minor();
    let bars = 24u32;

    lines.push("new_pattern 0 d 2:0".to_string());
    lines.push(format!(
        "gen_drums 0 d 2:0 trap seed={} density={:.2}",
        seed + attempt as i64,
        0.75 + 0.05 * spec.drum_variant as f64
    ));
    lines.push(format!("place_pattern 0 d 0:0 {}", bars / 2));

    // 808 bass with glide
    lines.push("set_glide 1 0:0:90".to_string());
    lines.push("new_pattern 1 b 2:0".to_string());
    let root = scale[0];
    let fifth = scale[4];
    let octave = root + 12;
    let hits: Vec<(&str, u8)> = match spec.bass_variant {
        0 => vec![("0:0", root), ("0:3", root), ("1:0", fifth), ("1:2", octave)],
        1 => vec![("0:0", root), ("0:2", fifth), ("1:1", root), ("1:3", octave)],
        2 => vec![("0:0", root), ("0:2:120", octave), ("1:0", root), ("1:2", fifth)],
        _ => vec![("0:0", root), ("0:1:120", fifth), ("1:0", octave), ("1:2:120", root)],
    };
    for (st, pitch) in hits {
        let vel = 100i64 + rng.random_range(-8..=12);
        lines.push(format!("add_note_pat 1 b {} {} 0:1 {}", pitch, st, vel));
    }
    lines.push(format!("place_pattern 1 b 0:0 {}", bars / 2));

    // dark keys
    lines.push("new_pattern 2 k 4:0".to_string());
    let chord1 = [scale[0] + 12, scale[2] + 12, scale[5] + 12];
    let chord2 = [scale[3] + 12, scale[5] + 12, scale[0] + 24];
    let chords = if spec.harmony_variant < 2 { chord1 } else { chord2 };
    for p in chords {
        let vel = 60i64 + rng.random_range(-5..=6);
        lines.push(format!("add_note_pat 2 k {} 0:0 4:0 {} chance=0.9", p, vel));
    }
    lines.push(format!("place_pattern 2 k 0:0 {}", (bars / 4).max(1)));

    // sparse lead
    lines.push("new_pattern 3 l 2:0".to_string());
    let density = 0.35 + 0.12 * (spec.lead_variant % 3) as f64;
    for st in ["0:2", "0:2:120", "1:2", "1:2:120"] {
        if rng.random::<f64>() < density {
            let pitch = scale[rng.random_range(0..scale.len())] + 24;
            let vel = 72i64 + rng.random_range(-10..=10);
            lines.push(format!(
                "add_note_pat 3 l {} {} 0:0:120 {} chance=0.7",
                pitch, st, vel
            ));
        }
    }
    lines.push(format!("place_pattern 3 l 0:0 {}", bars / 2));

    lines.extend(export_lines(&pack, out_prefix));
    lines.join("\n") + "\n"
}

fn gen_boom_bap(seed: i64, attempt: u32, out_prefix: Option<&str>) -> String {
    let pack = get_pack("boom_bap").expect("builtin pack");
    let (mut lines, mut rng) = gen_common(&pack, seed, attempt, out_prefix);
    let spec = VariationEngine::new(seed).spec(attempt);
    let scale = scale_a_minor();
    let bars = 24u32;

    lines.push("new_pattern 0 d 2:0".to_string());
    lines.push(format!(
        "gen_drums 0 d 2:0 boom_bap seed={} density={:.2}",
        seed + attempt as i64,
        0.70 + 0.05 * spec.drum_variant as f64
    ));
    lines.push(format!(
        "set_humanize 0 timing=12 velocity=8 seed={}",
        seed + attempt as i64
    ));
    lines.push(format!("place_pattern 0 d 0:0 {}", bars / 2));

    lines.push("new_pattern 1 b 2:0".to_string());
    let root = scale[0];
    let third = scale[2];
    let fifth = scale[4];
    let hits: Vec<(&str, u8)> = if spec.bass_variant < 2 {
        vec![("0:0", root), ("0:2", root), ("1:0", fifth), ("1:2", third)]
    } else {
        vec![("0:0", root), ("0:3", fifth), ("1:0", root), ("1:3", third)]
    };
    for (st, pitch) in hits {
        let vel = 88i64 + rng.random_range(-10..=10);
        lines.push(format!("add_note_pat 1 b {} {} 0:0:240 {}", pitch, st, vel));
    }
    lines.push(format!("place_pattern 1 b 0:0 {}", bars / 2));

    // sample-ish keys loop
    lines.push("new_pattern 2 k 2:0".to_string());
    let chord = [scale[0] + 12, scale[3] + 12, scale[5] + 12];
    let (beats, dur): (&[&str], &str) = if spec.harmony_variant % 2 == 0 {
        (&["0:0", "1:0"], "0:1")
    } else {
        (&["0:0", "0:2", "1:0", "1:2"], "0:0:180")
    };
    for beat in beats {
        for p in chord {
            let vel = 66i64 + rng.random_range(-8..=8);
            lines.push(format!(
                "add_note_pat 2 k {} {} {} {} chance=0.95",
                p, beat, dur, vel
            ));
        }
    }
    lines.push(format!("place_pattern 2 k 0:0 {}", bars / 2));

    lines.extend(export_lines(&pack, out_prefix));
    lines.join("\n") + "\n"
}

/// Build the script for one attempt of a pack
pub fn pack_script(pack_name: &str, seed: i64, attempt: u32, out_prefix: Option<&str>) -> Result<String> {
    match get_pack(pack_name)?.name {
        "house" => Ok(gen_house(seed, attempt, out_prefix)),
        "trap" => Ok(gen_trap(seed, attempt, out_prefix)),
        "boom_bap" => Ok(gen_boom_bap(seed, attempt, out_prefix)),
        _ => unreachable!("get_pack validated the name"),
    }
}

// ---------------------- acceptance ----------------------

fn track_index_by_name(proj: &Project, name_lower: &str) -> Option<usize> {
    proj.tracks
        .iter()
        .position(|t| t.name.trim().to_lowercase() == name_lower)
}

fn pattern_note_count(proj: &Project, track_i: usize, pattern: &str) -> usize {
    proj.tracks[track_i]
        .patterns
        .get(pattern)
        .map(|p| {
            p.notes
                .iter()
                .filter(|n| !n.mute && n.chance > 0.0)
                .count()
        })
        .unwrap_or(0)
}

fn pattern_has_pitch_at_step(
    proj: &Project,
    track_i: usize,
    pattern: &str,
    pitch: u8,
    step_index: u32,
    step_count: u32,
) -> bool {
    let Some(pat) = proj.tracks[track_i].patterns.get(pattern) else {
        return false;
    };
    let step = (proj.ppq / 4).max(1);
    let target = step_index % step_count;
    pat.notes
        .iter()
        .any(|n| n.pitch == pitch && (n.start / step) % step_count == target)
}

/// Run the pack's acceptance checks over a generated project.
///
/// Fails with an `Acceptance` error listing every violated rule.
pub fn accept(pack: &GenrePack, proj: &Project) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();
    let mut require = |cond: bool, msg: String| {
        if !cond {
            errors.push(msg);
        }
    };

    require(
        pack.bpm_min <= proj.tempo_bpm && proj.tempo_bpm <= pack.bpm_max,
        format!("tempo_bpm out of range: {}", proj.tempo_bpm),
    );
    require(
        proj.swing_percent == pack.swing_percent,
        "swing_percent mismatch".to_string(),
    );

    for r in pack.roles {
        require(
            track_index_by_name(proj, r).is_some(),
            format!("missing track: {}", r),
        );
    }

    if let Some(ti) = track_index_by_name(proj, "drums") {
        match pack.name {
            "house" => {
                for step in [0u32, 4, 8, 12, 16, 20, 24, 28] {
                    require(
                        pattern_has_pitch_at_step(proj, ti, "d", 36, step, 32),
                        format!("house kick missing at step {}", step),
                    );
                }
            }
            "trap" => {
                for step in [8u32, 24] {
                    require(
                        pattern_has_pitch_at_step(proj, ti, "d", 38, step, 32),
                        format!("trap snare missing near beat 3 (step {})", step),
                    );
                }
            }
            "boom_bap" => {
                for step in [4u32, 12, 20, 28] {
                    require(
                        pattern_has_pitch_at_step(proj, ti, "d", 38, step, 32),
                        format!("boom-bap snare missing at step {}", step),
                    );
                }
            }
            _ => {}
        }
    }

    for (name, pat) in [("drums", "d"), ("bass", "b")] {
        if let Some(ti) = track_index_by_name(proj, name) {
            require(
                pattern_note_count(proj, ti, pat) > 0,
                format!("{} has 0 notes", name),
            );
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ClawError::Acceptance(errors))
    }
}

// ---------------------- pipeline ----------------------

/// Result of the genre-pack generation loop
#[derive(Debug, Clone)]
pub struct PackGenerationResult {
    pub pack: String,
    pub out_prefix: String,
    pub script_path: PathBuf,
    pub attempts: u32,
    pub similarities: Vec<f64>,
}

fn run_script_to_project(script: &str, base_dir: Option<&Path>) -> Result<Project> {
    let mut runner = ScriptRunner::new(RunnerOptions {
        soundfont: None,
        strict: true,
        dry_run: true,
    });
    runner.run_text(script, base_dir)?;
    runner.into_project()
}

/// Generate a headless script from a genre pack.
///
/// Determinism: (pack, seed, attempt) -> identical output. Acceptance must
/// pass every attempt; iteration stops once the similarity to the previous
/// attempt drops to `max_similarity` or below.
pub fn generate_from_genre_pack(
    pack_name: &str,
    out_prefix: &str,
    tools_dir: &Path,
    seed: i64,
    max_attempts: u32,
    max_similarity: Option<f64>,
    write_script: bool,
) -> Result<PackGenerationResult> {
    let pack = get_pack(pack_name)?;

    std::fs::create_dir_all(tools_dir)?;
    let script_path = tools_dir.join(format!("{}.txt", out_prefix));

    let mut prev: Option<Project> = None;
    let mut similarities: Vec<f64> = Vec::new();
    let mut chosen_script: Option<String> = None;

    for attempt in 0..max_attempts.max(1) {
        let script = pack_script(pack.name, seed, attempt, Some(out_prefix))?;
        let proj = run_script_to_project(&script, None)?;

        accept(&pack, &proj)?;

        match &prev {
            None => {
                chosen_script = Some(script);
                prev = Some(proj);
                if max_similarity.is_none() {
                    break;
                }
            }
            Some(p) => {
                let sim = project_similarity(p, &proj);
                similarities.push(sim);
                chosen_script = Some(script);
                if sim <= max_similarity.unwrap_or(0.92) {
                    break;
                }
                prev = Some(proj);
            }
        }
    }

    let script = chosen_script.expect("at least one attempt ran");
    if write_script {
        std::fs::write(&script_path, &script)?;
    }

    Ok(PackGenerationResult {
        pack: pack.name.to_string(),
        out_prefix: out_prefix.to_string(),
        script_path,
        attempts: max_attempts.max(1),
        similarities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variation_engine_is_deterministic() {
        let e = VariationEngine::new(5);
        assert_eq!(e.spec(0), e.spec(0));
        assert_ne!(e.spec(0), e.spec(1));
    }

    #[test]
    fn test_pack_lookup() {
        assert_eq!(get_pack("Boom-Bap").unwrap().name, "boom_bap");
        assert!(get_pack("dubstep").is_err());
    }

    #[test]
    fn test_pack_scripts_are_deterministic() {
        let a = pack_script("trap", 0, 0, Some("x")).unwrap();
        let b = pack_script("trap", 0, 0, Some("x")).unwrap();
        assert_eq!(a, b);
        let c = pack_script("trap", 0, 1, Some("x")).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_house_script_passes_acceptance() {
        let script = pack_script("house", 0, 0, None).unwrap();
        let proj = run_script_to_project(&script, None).unwrap();
        accept(&get_pack("house").unwrap(), &proj).unwrap();
    }

    #[test]
    fn test_trap_script_passes_acceptance() {
        let script = pack_script("trap", 3, 0, None).unwrap();
        let proj = run_script_to_project(&script, None).unwrap();
        accept(&get_pack("trap").unwrap(), &proj).unwrap();
    }

    #[test]
    fn test_boom_bap_script_passes_acceptance() {
        let script = pack_script("boom_bap", 1, 0, None).unwrap();
        let proj = run_script_to_project(&script, None).unwrap();
        accept(&get_pack("boom_bap").unwrap(), &proj).unwrap();
    }

    #[test]
    fn test_acceptance_rejects_wrong_tempo() {
        let script = pack_script("house", 0, 0, None).unwrap();
        let mut proj = run_script_to_project(&script, None).unwrap();
        proj.tempo_bpm = 60;
        let err = accept(&get_pack("house").unwrap(), &proj).unwrap_err();
        assert!(matches!(err, ClawError::Acceptance(_)));
    }

    #[test]
    fn test_acceptance_rejects_missing_kick() {
        let script = pack_script("house", 0, 0, None).unwrap();
        let mut proj = run_script_to_project(&script, None).unwrap();
        // strip all kicks
        if let Some(pat) = proj.tracks[0].patterns.get_mut("d") {
            pat.notes.retain(|n| n.pitch != 36);
        }
        let err = accept(&get_pack("house").unwrap(), &proj).unwrap_err();
        let ClawError::Acceptance(errors) = err else {
            panic!("wrong error kind");
        };
        assert!(errors.iter().any(|e| e.contains("house kick missing")));
    }

    #[test]
    fn test_generate_from_genre_pack_writes_script() {
        let dir = tempfile::tempdir().unwrap();
        let res =
            generate_from_genre_pack("house", "gen_test", dir.path(), 0, 3, Some(0.92), true)
                .unwrap();
        assert!(res.script_path.exists());
        let text = std::fs::read_to_string(&res.script_path).unwrap();
        assert!(text.contains("gen_drums 0 d 2:0 house"));
    }
}
