//! Drum kit abstraction: canonical roles and layered pitch mappings.
//!
//! Notes may specify a canonical drum *role* instead of a MIDI pitch. Each
//! role maps to 1..N (pitch, velocity multiplier) layers; expansion happens
//! at flatten/render time based on the track's selected kit. Layering is
//! conservative so exported MIDI still translates on plain GM kits.

use lazy_static::lazy_static;
use std::collections::BTreeMap;

use crate::model::{Note, Track};

/// Canonical drum roles (keep stable; aliases go in [`normalize_role`])
pub const CANONICAL_ROLES: [&str; 14] = [
    "kick",
    "snare",
    "clap",
    "rim",
    "hat_closed",
    "hat_open",
    "hat_pedal",
    "tom_low",
    "tom_mid",
    "tom_high",
    "crash",
    "ride",
    "perc",
    "shaker",
];

/// One pitch layer of a role
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrumLayer {
    pub pitch: u8,
    pub vel_mul: f32,
}

impl DrumLayer {
    const fn new(pitch: u8, vel_mul: f32) -> Self {
        Self { pitch, vel_mul }
    }
}

/// A named mapping from role to pitch layers
#[derive(Debug, Clone)]
pub struct DrumKit {
    pub name: &'static str,
    pub roles: BTreeMap<&'static str, Vec<DrumLayer>>,
}

fn kit(name: &'static str, roles: &[(&'static str, &[DrumLayer])]) -> DrumKit {
    DrumKit {
        name,
        roles: roles.iter().map(|(r, ls)| (*r, ls.to_vec())).collect(),
    }
}

lazy_static! {
    static ref BUILTIN_KITS: BTreeMap<&'static str, DrumKit> = {
        let mut kits = BTreeMap::new();
        kits.insert(
            "trap_hard",
            kit(
                "trap_hard",
                &[
                    ("kick", &[DrumLayer::new(36, 1.0), DrumLayer::new(35, 0.55)]),
                    ("snare", &[DrumLayer::new(38, 1.0), DrumLayer::new(40, 0.65)]),
                    ("clap", &[DrumLayer::new(39, 1.0), DrumLayer::new(38, 0.35)]),
                    ("rim", &[DrumLayer::new(37, 1.0)]),
                    ("hat_closed", &[DrumLayer::new(42, 1.0)]),
                    ("hat_open", &[DrumLayer::new(46, 1.0)]),
                    ("hat_pedal", &[DrumLayer::new(44, 1.0)]),
                    ("tom_low", &[DrumLayer::new(45, 1.0)]),
                    ("tom_mid", &[DrumLayer::new(47, 1.0)]),
                    ("tom_high", &[DrumLayer::new(50, 1.0)]),
                    ("crash", &[DrumLayer::new(49, 1.0)]),
                    ("ride", &[DrumLayer::new(51, 1.0)]),
                    ("perc", &[DrumLayer::new(56, 1.0)]),
                    ("shaker", &[DrumLayer::new(82, 1.0)]),
                ],
            ),
        );
        kits.insert(
            "house_clean",
            kit(
                "house_clean",
                &[
                    ("kick", &[DrumLayer::new(36, 1.0), DrumLayer::new(35, 0.35)]),
                    ("snare", &[DrumLayer::new(39, 0.85), DrumLayer::new(38, 0.55)]),
                    ("clap", &[DrumLayer::new(39, 1.0)]),
                    ("rim", &[DrumLayer::new(37, 1.0)]),
                    ("hat_closed", &[DrumLayer::new(42, 1.0)]),
                    ("hat_open", &[DrumLayer::new(46, 1.0)]),
                    ("hat_pedal", &[DrumLayer::new(44, 1.0)]),
                    ("tom_low", &[DrumLayer::new(45, 1.0)]),
                    ("tom_mid", &[DrumLayer::new(47, 1.0)]),
                    ("tom_high", &[DrumLayer::new(50, 1.0)]),
                    ("crash", &[DrumLayer::new(57, 1.0)]),
                    ("ride", &[DrumLayer::new(51, 1.0)]),
                    ("perc", &[DrumLayer::new(75, 1.0)]),
                    ("shaker", &[DrumLayer::new(70, 1.0)]),
                ],
            ),
        );
        kits.insert(
            "boombap_dusty",
            kit(
                "boombap_dusty",
                &[
                    ("kick", &[DrumLayer::new(36, 1.0), DrumLayer::new(35, 0.70)]),
                    ("snare", &[DrumLayer::new(38, 1.0), DrumLayer::new(54, 0.40)]),
                    ("clap", &[DrumLayer::new(39, 0.75), DrumLayer::new(38, 0.30)]),
                    ("rim", &[DrumLayer::new(37, 1.0)]),
                    ("hat_closed", &[DrumLayer::new(42, 1.0)]),
                    ("hat_open", &[DrumLayer::new(46, 1.0)]),
                    ("hat_pedal", &[DrumLayer::new(44, 1.0)]),
                    ("tom_low", &[DrumLayer::new(45, 1.0)]),
                    ("tom_mid", &[DrumLayer::new(47, 1.0)]),
                    ("tom_high", &[DrumLayer::new(50, 1.0)]),
                    ("crash", &[DrumLayer::new(49, 1.0)]),
                    ("ride", &[DrumLayer::new(51, 1.0)]),
                    ("perc", &[DrumLayer::new(58, 1.0)]),
                    ("shaker", &[DrumLayer::new(82, 1.0)]),
                ],
            ),
        );
        // Back-compat / explicit GM default.
        kits.insert(
            "gm_basic",
            kit(
                "gm_basic",
                &[
                    ("kick", &[DrumLayer::new(36, 1.0)]),
                    ("snare", &[DrumLayer::new(38, 1.0)]),
                    ("clap", &[DrumLayer::new(39, 1.0)]),
                    ("rim", &[DrumLayer::new(37, 1.0)]),
                    ("hat_closed", &[DrumLayer::new(42, 1.0)]),
                    ("hat_open", &[DrumLayer::new(46, 1.0)]),
                    ("hat_pedal", &[DrumLayer::new(44, 1.0)]),
                    ("tom_low", &[DrumLayer::new(45, 1.0)]),
                    ("tom_mid", &[DrumLayer::new(47, 1.0)]),
                    ("tom_high", &[DrumLayer::new(50, 1.0)]),
                    ("crash", &[DrumLayer::new(49, 1.0)]),
                    ("ride", &[DrumLayer::new(51, 1.0)]),
                    ("perc", &[DrumLayer::new(56, 1.0)]),
                    ("shaker", &[DrumLayer::new(82, 1.0)]),
                ],
            ),
        );
        kits
    };
}

/// Normalize a role string to canonical form, resolving common aliases.
/// Returns None for empty input.
pub fn normalize_role(role: &str) -> Option<String> {
    let r = role.trim().to_lowercase().replace(['-', ' '], "_");
    if r.is_empty() {
        return None;
    }
    let canonical = match r.as_str() {
        "bd" | "k" => "kick",
        "sd" | "s" => "snare",
        "hh" | "ch" | "hat" | "hihat" => "hat_closed",
        "oh" => "hat_open",
        "ph" => "hat_pedal",
        "rc" => "ride",
        "cr" => "crash",
        "tomlo" => "tom_low",
        "tomm" => "tom_mid",
        "tomhi" => "tom_high",
        other => other,
    };
    Some(canonical.to_string())
}

/// Normalize a kit name, resolving aliases (`default`, `gm`, `basic`)
pub fn normalize_kit_name(name: &str) -> String {
    let k = name.trim().to_lowercase().replace(['-', ' '], "_");
    match k.as_str() {
        "" | "default" => "trap_hard".to_string(),
        "gm" | "basic" => "gm_basic".to_string(),
        _ => k,
    }
}

/// Look up a built-in kit; unknown names deterministically fall back to
/// `trap_hard`.
pub fn get_drum_kit(name: Option<&str>) -> &'static DrumKit {
    let k = normalize_kit_name(name.unwrap_or("default"));
    BUILTIN_KITS
        .get(k.as_str())
        .unwrap_or_else(|| &BUILTIN_KITS["trap_hard"])
}

/// Names of the user-facing built-in kits
pub fn list_drum_kits() -> Vec<&'static str> {
    vec!["boombap_dusty", "house_clean", "trap_hard"]
}

/// Expand a role note into per-layer pitch notes via the track's kit.
///
/// Notes without a role pass through untouched. An unknown role falls back
/// to the note's own pitch, or to the closed hat when the pitch is 0.
/// Expression fields (chance/mute/accent/glide) are copied unchanged.
pub fn expand_role_note(note: &Note, track: &Track) -> Vec<Note> {
    let Some(role) = note.role.as_deref().and_then(normalize_role) else {
        return vec![note.clone()];
    };

    let kit = get_drum_kit(Some(&track.drum_kit));
    let layers: Vec<DrumLayer> = match kit.roles.get(role.as_str()) {
        Some(ls) => ls.clone(),
        None => {
            // Unknown role: fall back to the existing pitch (or closed hat
            // if pitch is 0).
            if note.pitch != 0 {
                return vec![note.clone()];
            }
            kit.roles
                .get("hat_closed")
                .cloned()
                .unwrap_or_else(|| vec![DrumLayer::new(42, 1.0)])
        }
    };

    layers
        .iter()
        .map(|lay| {
            let v = (note.velocity as f32 * lay.vel_mul).round();
            Note {
                start: note.start,
                duration: note.duration,
                pitch: lay.pitch,
                velocity: v.clamp(1.0, 127.0) as u8,
                role: None,
                chance: note.chance,
                mute: note.mute,
                accent: note.accent,
                glide_ticks: note.glide_ticks,
            }
        })
        .collect()
}

/// Expand every role note in a slice
pub fn expand_role_notes(notes: &[Note], track: &Track) -> Vec<Note> {
    notes
        .iter()
        .flat_map(|n| expand_role_note(n, track))
        .collect()
}

/// Reverse mapping used by the sample-pack player when a note has a bare
/// GM pitch instead of a role.
pub fn role_from_pitch(pitch: u8) -> Option<&'static str> {
    match pitch {
        35 | 36 => Some("kick"),
        38 | 40 => Some("snare"),
        39 => Some("clap"),
        37 => Some("rim"),
        42 => Some("hat_closed"),
        46 => Some("hat_open"),
        44 => Some("hat_pedal"),
        45 => Some("tom_low"),
        47 => Some("tom_mid"),
        50 => Some("tom_high"),
        49 => Some("crash"),
        51 => Some("ride"),
        56 => Some("perc"),
        82 => Some("shaker"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_role_aliases() {
        assert_eq!(normalize_role("HH").as_deref(), Some("hat_closed"));
        assert_eq!(normalize_role("bd").as_deref(), Some("kick"));
        assert_eq!(normalize_role("hat-open").as_deref(), Some("hat_open"));
        assert_eq!(normalize_role(""), None);
    }

    #[test]
    fn test_kit_aliases_and_fallback() {
        assert_eq!(get_drum_kit(Some("default")).name, "trap_hard");
        assert_eq!(get_drum_kit(Some("gm")).name, "gm_basic");
        assert_eq!(get_drum_kit(Some("no_such_kit")).name, "trap_hard");
        assert_eq!(get_drum_kit(None).name, "trap_hard");
    }

    #[test]
    fn test_every_kit_covers_every_canonical_role() {
        for kit_name in ["trap_hard", "house_clean", "boombap_dusty", "gm_basic"] {
            let kit = get_drum_kit(Some(kit_name));
            for role in CANONICAL_ROLES {
                assert!(
                    kit.roles.contains_key(role),
                    "{} missing role {}",
                    kit_name,
                    role
                );
            }
        }
    }

    #[test]
    fn test_trap_snare_expands_to_two_layers() {
        let track = Track::new("Drums", 0); // drum_kit defaults to trap_hard
        let n = Note::new(0, 120, 0, 100).with_role("snare");
        let out = expand_role_note(&n, &track);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].pitch, 38);
        assert_eq!(out[0].velocity, 100);
        assert_eq!(out[1].pitch, 40);
        assert_eq!(out[1].velocity, 65);
    }

    #[test]
    fn test_unknown_role_falls_back_to_pitch() {
        let track = Track::new("Drums", 0);
        let n = Note::new(0, 120, 61, 90).with_role("vibraslap");
        let out = expand_role_note(&n, &track);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pitch, 61);
    }

    #[test]
    fn test_unknown_role_with_zero_pitch_uses_closed_hat() {
        let track = Track::new("Drums", 0);
        let n = Note::new(0, 120, 0, 90).with_role("vibraslap");
        let out = expand_role_note(&n, &track);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pitch, 42);
    }

    #[test]
    fn test_expansion_preserves_expression() {
        let track = Track::new("Drums", 0);
        let mut n = Note::new(5, 60, 0, 80).with_role("kick");
        n.chance = 0.4;
        n.accent = 1.1;
        n.glide_ticks = 12;
        let out = expand_role_note(&n, &track);
        for e in out {
            assert_eq!(e.chance, 0.4);
            assert_eq!(e.accent, 1.1);
            assert_eq!(e.glide_ticks, 12);
            assert_eq!(e.role, None);
        }
    }
}
