//! Brief -> headless script synthesis.
//!
//! Emits the command lines that build a project for a brief: tracks by role
//! with palette sounds and mixer defaults, a generated drum pattern, a
//! seeded bass groove, chord stabs, optional pad/lead, and export commands.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::generate::brief::Brief;
use crate::generate::style::{preset_for, select_track_mix, select_track_sound};

/// A generated script plus the mastering preset it exports with
#[derive(Debug, Clone)]
pub struct GeneratedScript {
    pub script: String,
    pub mastering_preset: String,
}

/// A-minor-ish default scale in MIDI around A2
fn scale_pitches(_key: Option<&str>) -> [u8; 7] {
    [45, 47, 48, 50, 52, 53, 55] // A2 B2 C3 D3 E3 F3 G3
}

/// Sanitize a project name into a single script token
pub fn safe_name(name: &str) -> String {
    let cleaned: String = name
        .replace('\n', " ")
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// Per-role volume overrides the auto-tune loop can feed back in
pub type RoleVolumes = BTreeMap<String, u8>;

/// Compile a brief into a headless script.
///
/// Deterministic for (brief, seed, overrides); the same seed always yields
/// the same note choices.
pub fn brief_to_script(
    brief: &Brief,
    seed: u64,
    out_prefix: Option<&str>,
    mastering_preset: Option<&str>,
    volumes: &RoleVolumes,
) -> GeneratedScript {
    let preset = preset_for(brief.style);
    let bpm = brief.bpm.unwrap_or(preset.bpm_default);
    let swing = preset.swing_percent;
    let mpreset = mastering_preset.unwrap_or(preset.mastering_preset).to_string();
    let bars = brief.length_bars.max(4);

    let mut rng = StdRng::seed_from_u64(seed);
    let scale = scale_pitches(brief.key.as_deref());

    let mut lines: Vec<String> = Vec::new();
    let name = safe_name(out_prefix.unwrap_or(&brief.title));
    lines.push(format!("new_project {} {}", name, bpm));
    if swing > 0 {
        lines.push(format!("set_swing {}", swing));
    }

    let mut track_indices: BTreeMap<&str, usize> = BTreeMap::new();
    for role in &brief.roles {
        let role = role.as_str();
        let ti = track_indices.len();
        track_indices.insert(
            match role {
                "drums" => "drums",
                "bass" => "bass",
                "keys" => "keys",
                "pad" => "pad",
                "lead" => "lead",
                _ => continue,
            },
            ti,
        );

        let sound = select_track_sound(role, brief.style, brief.mood.as_deref());
        let mix = select_track_mix(role, brief.style);

        let mut title = role.to_string();
        if let Some(first) = title.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        lines.push(format!("add_track {} {}", title, sound.program.unwrap_or(0)));

        if let Some(mode) = sound.sampler {
            lines.push(format!("set_sampler {} {}", ti, mode));
            if let Some(sp) = sound.sampler_preset {
                lines.push(format!("set_sampler_preset {} {}", ti, sp));
            }
        }

        let vol = volumes
            .get(role)
            .copied()
            .or(mix.volume)
            .or(match role {
                "bass" => Some(105),
                "drums" => Some(112),
                _ => None,
            });
        if let Some(v) = vol {
            lines.push(format!("set_volume {} {}", ti, v));
        }
        if let Some(r) = mix.reverb.filter(|_| matches!(role, "pad" | "keys")) {
            lines.push(format!("set_reverb {} {}", ti, r));
        }
    }

    // Drums
    if let Some(&ti) = track_indices.get("drums") {
        let style = if brief.style == crate::generate::brief::StyleName::Unknown {
            crate::generate::brief::StyleName::HipHop
        } else {
            brief.style
        };
        lines.push(format!("new_pattern {} d 2:0", ti));
        lines.push(format!(
            "gen_drums {} d 2:0 {} seed={} density={}",
            ti,
            style.as_str(),
            seed,
            preset.drum_density
        ));
        lines.push(format!("place_pattern {} d 0:0 {}", ti, bars / 2));
    }

    // Bass
    if let Some(&ti) = track_indices.get("bass") {
        lines.push(format!("new_pattern {} b 2:0", ti));
        let root = scale[0];
        let fifth = scale[4];
        let octave = root + 12;
        let hits: Vec<(&str, u8)> = if rng.random::<f64>() < 0.5 {
            vec![("0:0", root), ("0:2", fifth), ("1:0", octave), ("1:2", fifth)]
        } else {
            vec![("0:0", root), ("0:3", fifth), ("1:0", root), ("1:2", octave)]
        };
        for (st, pitch) in hits {
            let vel = 92i64 + rng.random_range(-8..=10);
            lines.push(format!("add_note_pat {} b {} {} 0:0:240 {}", ti, pitch, st, vel));
        }
        lines.push(format!("place_pattern {} b 0:0 {}", ti, bars / 2));
    }

    // Keys
    if let Some(&ti) = track_indices.get("keys") {
        lines.push(format!("new_pattern {} k 2:0", ti));
        let chord = [scale[0] + 12, scale[2] + 12, scale[4] + 12];
        for beat in ["0:0", "0:2", "1:0", "1:2"] {
            for p in chord {
                let vel = 70i64 + rng.random_range(-6..=6);
                lines.push(format!(
                    "add_note_pat {} k {} {} 0:1 {} chance=0.85",
                    ti, p, beat, vel
                ));
            }
        }
        lines.push(format!("place_pattern {} k 0:0 {}", ti, bars / 2));
    }

    // Pad
    if let Some(&ti) = track_indices.get("pad") {
        lines.push(format!("new_pattern {} p 4:0", ti));
        let pad_chord = [scale[0] + 12, scale[3] + 12, scale[5] + 12];
        for pch in pad_chord {
            let vel = 55i64 + rng.random_range(-4..=4);
            lines.push(format!("add_note_pat {} p {} 0:0 4:0 {}", ti, pch, vel));
        }
        lines.push(format!("place_pattern {} p 0:0 {}", ti, (bars / 4).max(1)));
    }

    // Lead (sparse motif at the end of bar 2)
    if let Some(&ti) = track_indices.get("lead") {
        lines.push(format!("new_pattern {} l 2:0", ti));
        let starts = ["1:2", "1:2:120", "1:3", "1:3:120"];
        for st in starts {
            let pitch = scale[rng.random_range(0..scale.len())] + 12;
            let vel = 76i64 + rng.random_range(-10..=12);
            lines.push(format!(
                "add_note_pat {} l {} {} 0:0:120 {} chance=0.55",
                ti, pitch, st, vel
            ));
        }
        lines.push(format!("place_pattern {} l 0:0 {}", ti, bars / 2));
    }

    // Exports
    if let Some(prefix) = out_prefix {
        lines.push(format!("save_project out/{}.json", prefix));
        lines.push(format!("export_midi out/{}.mid", prefix));
        lines.push(format!(
            "export_preview_mp3 out/{}.preview.mp3 bars=8 start=0:0 preset={}",
            prefix, mpreset
        ));
        lines.push(format!(
            "export_mp3 out/{}.mp3 trim=60 preset={} fade=0.15",
            prefix, mpreset
        ));
    }

    GeneratedScript {
        script: lines.join("\n") + "\n",
        mastering_preset: mpreset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::brief::parse_prompt;

    #[test]
    fn test_safe_name() {
        assert_eq!(safe_name("My Song!"), "My_Song");
        assert_eq!(safe_name("  "), "untitled");
        assert_eq!(safe_name("a.b-c_d"), "a.b-c_d");
    }

    #[test]
    fn test_script_structure() {
        let brief = parse_prompt("dark trap at 140bpm", None);
        let s = brief_to_script(&brief, 0, Some("demo"), None, &RoleVolumes::new());
        assert!(s.script.starts_with("new_project"));
        assert!(s.script.contains("gen_drums 0 d 2:0 trap seed=0"));
        assert!(s.script.contains("set_sampler 1 808"));
        assert!(s.script.contains("export_mp3 out/demo.mp3"));
        assert_eq!(s.mastering_preset, "clean");
    }

    #[test]
    fn test_script_is_deterministic() {
        let brief = parse_prompt("house 124bpm", None);
        let a = brief_to_script(&brief, 7, Some("x"), None, &RoleVolumes::new());
        let b = brief_to_script(&brief, 7, Some("x"), None, &RoleVolumes::new());
        assert_eq!(a.script, b.script);

        let c = brief_to_script(&brief, 8, Some("x"), None, &RoleVolumes::new());
        assert_ne!(a.script, c.script);
    }

    #[test]
    fn test_volume_overrides_respected() {
        let brief = parse_prompt("house", None);
        let mut vols = RoleVolumes::new();
        vols.insert("bass".to_string(), 80);
        let s = brief_to_script(&brief, 0, None, None, &vols);
        assert!(s.script.contains("set_volume 1 80"));
    }

    #[test]
    fn test_mastering_preset_override() {
        let brief = parse_prompt("house", None);
        let s = brief_to_script(&brief, 0, Some("p"), Some("lofi"), &RoleVolumes::new());
        assert!(s.script.contains("preset=lofi"));
    }

    #[test]
    fn test_no_exports_without_prefix() {
        let brief = parse_prompt("house", None);
        let s = brief_to_script(&brief, 0, None, None, &RoleVolumes::new());
        assert!(!s.script.contains("export_"));
    }
}
