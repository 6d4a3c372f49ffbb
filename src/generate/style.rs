//! Style presets and the sound/mixer palette.
//!
//! A [`StylePreset`] carries the per-style generation defaults (tempo,
//! swing, drum density, mastering preset). The palette maps a track role to
//! a concrete sound (sampler mode or GM program) and mixer defaults, with
//! style-level overrides on top of the generic table.

use crate::generate::brief::StyleName;
use crate::gm::parse_program;

/// Per-style generation defaults
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StylePreset {
    pub style: StyleName,
    pub bpm_default: u32,
    pub swing_percent: u32,
    pub drum_density: f64,
    pub mastering_preset: &'static str,
    pub prefer_sampler_808: bool,
}

/// Look up the preset for a style (unknown styles get safe middle-ground
/// defaults).
pub fn preset_for(style: StyleName) -> StylePreset {
    let mk = |style, bpm_default, swing_percent, drum_density, mastering_preset| StylePreset {
        style,
        bpm_default,
        swing_percent,
        drum_density,
        mastering_preset,
        prefer_sampler_808: true,
    };
    match style {
        StyleName::HipHop => mk(style, 74, 18, 0.72, "clean"),
        StyleName::Lofi => mk(style, 82, 22, 0.60, "lofi"),
        StyleName::House => mk(style, 124, 0, 0.85, "demo"),
        StyleName::Techno => mk(style, 132, 0, 0.90, "demo"),
        StyleName::Trap => mk(style, 140, 0, 0.82, "clean"),
        StyleName::BoomBap => mk(style, 90, 18, 0.70, "lofi"),
        StyleName::Ambient => StylePreset {
            style,
            bpm_default: 90,
            swing_percent: 0,
            drum_density: 0.35,
            mastering_preset: "clean",
            prefer_sampler_808: false,
        },
        StyleName::Unknown => mk(style, 110, 8, 0.70, "clean"),
    }
}

/// How a role should be realized: a sampler mode or a GM program
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSound {
    pub sampler: Option<&'static str>,
    pub sampler_preset: Option<&'static str>,
    pub program: Option<u8>,
}

/// Per-track mixer defaults (GM-ish CCs)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackMix {
    pub volume: Option<u8>,
    pub pan: Option<u8>,
    pub reverb: Option<u8>,
    pub chorus: Option<u8>,
}

fn sampler(mode: &'static str, preset: &'static str) -> TrackSound {
    TrackSound {
        sampler: Some(mode),
        sampler_preset: Some(preset),
        program: None,
    }
}

fn program(name: &str) -> TrackSound {
    TrackSound {
        sampler: None,
        sampler_preset: None,
        program: parse_program(name).ok(),
    }
}

fn default_sound(role: &str) -> TrackSound {
    match role {
        "drums" => sampler("drums", "tight"),
        "bass" => sampler("808", "round"),
        "keys" => program("electric_piano"),
        "pad" => program("pad"),
        "lead" => program("lead"),
        _ => program("piano"),
    }
}

fn style_sound(style: StyleName, role: &str) -> Option<TrackSound> {
    match (style, role) {
        (StyleName::Trap, "bass") => Some(sampler("808", "round")),
        (StyleName::Trap, "keys") => Some(program("piano")),
        (StyleName::Trap, "lead") => Some(program("lead")),
        (StyleName::BoomBap, "bass") => Some(program("acoustic_bass")),
        (StyleName::BoomBap, "keys") => Some(program("electric_piano")),
        (StyleName::Lofi, "bass") => Some(program("acoustic_bass")),
        (StyleName::Lofi, "keys") => Some(program("electric_piano")),
        (StyleName::Lofi, "pad") => Some(program("synth_strings")),
        (StyleName::House, "bass") => Some(program("bass")),
        (StyleName::House, "keys") => Some(program("organ")),
        (StyleName::House, "lead") => Some(program("lead")),
        (StyleName::Techno, "bass") => Some(program("electric_bass")),
        (StyleName::Techno, "keys") => Some(program("organ")),
        (StyleName::Techno, "lead") => Some(program("lead")),
        (StyleName::Ambient, "bass") => Some(program("bass")),
        (StyleName::Ambient, "pad") => Some(program("pad")),
        (StyleName::Ambient, "keys") => Some(program("electric_piano")),
        (StyleName::HipHop, "bass") => Some(program("bass")),
        (StyleName::HipHop, "keys") => Some(program("electric_piano")),
        _ => None,
    }
}

fn default_mix(role: &str) -> TrackMix {
    match role {
        "drums" => TrackMix {
            volume: Some(112),
            pan: Some(64),
            reverb: Some(10),
            chorus: Some(0),
        },
        "bass" => TrackMix {
            volume: Some(104),
            pan: Some(64),
            reverb: Some(0),
            chorus: Some(0),
        },
        "keys" => TrackMix {
            volume: Some(92),
            pan: Some(62),
            reverb: Some(30),
            chorus: Some(10),
        },
        "pad" => TrackMix {
            volume: Some(86),
            pan: Some(66),
            reverb: Some(48),
            chorus: Some(18),
        },
        "lead" => TrackMix {
            volume: Some(94),
            pan: Some(70),
            reverb: Some(22),
            chorus: Some(6),
        },
        _ => TrackMix::default(),
    }
}

fn style_mix(style: StyleName, role: &str) -> Option<TrackMix> {
    let mk = |volume, pan, reverb, chorus| TrackMix {
        volume: Some(volume),
        pan: Some(pan),
        reverb: Some(reverb),
        chorus: Some(chorus),
    };
    match (style, role) {
        (StyleName::Trap, "drums") => Some(mk(114, 64, 6, 0)),
        (StyleName::Trap, "bass") => Some(mk(108, 64, 0, 0)),
        (StyleName::Trap, "keys") => Some(mk(88, 60, 20, 6)),
        (StyleName::Trap, "lead") => Some(mk(92, 70, 18, 6)),
        (StyleName::House, "drums") => Some(mk(112, 64, 10, 0)),
        (StyleName::House, "bass") => Some(mk(102, 64, 0, 0)),
        (StyleName::House, "keys") => Some(mk(92, 60, 34, 12)),
        (StyleName::BoomBap, "drums") => Some(mk(110, 64, 14, 0)),
        (StyleName::BoomBap, "bass") => Some(mk(100, 64, 4, 0)),
        (StyleName::BoomBap, "keys") => Some(mk(90, 62, 26, 10)),
        _ => None,
    }
}

/// Select the sound (sampler/program) for a role, style first, with a mood
/// tweak for dark keys.
pub fn select_track_sound(role: &str, style: StyleName, mood: Option<&str>) -> TrackSound {
    let role_key = role.trim().to_lowercase();
    if role_key == "keys" {
        if let Some(m) = mood {
            if m.to_lowercase().contains("dark") {
                return program("piano");
            }
        }
    }
    style_sound(style, &role_key).unwrap_or_else(|| default_sound(&role_key))
}

/// Select the mixer defaults for a role
pub fn select_track_mix(role: &str, style: StyleName) -> TrackMix {
    let role_key = role.trim().to_lowercase();
    style_mix(style, &role_key).unwrap_or_else(|| default_mix(&role_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_match_style_table() {
        assert_eq!(preset_for(StyleName::House).bpm_default, 124);
        assert_eq!(preset_for(StyleName::House).swing_percent, 0);
        assert_eq!(preset_for(StyleName::BoomBap).swing_percent, 18);
        assert_eq!(preset_for(StyleName::Lofi).mastering_preset, "lofi");
        assert!(!preset_for(StyleName::Ambient).prefer_sampler_808);
    }

    #[test]
    fn test_default_palette() {
        let drums = select_track_sound("drums", StyleName::Unknown, None);
        assert_eq!(drums.sampler, Some("drums"));
        let bass = select_track_sound("bass", StyleName::Unknown, None);
        assert_eq!(bass.sampler, Some("808"));
    }

    #[test]
    fn test_style_overrides() {
        // boom bap swaps the 808 for an acoustic bass program
        let bass = select_track_sound("bass", StyleName::BoomBap, None);
        assert_eq!(bass.sampler, None);
        assert!(bass.program.is_some());
    }

    #[test]
    fn test_dark_mood_switches_keys_to_piano() {
        let keys = select_track_sound("keys", StyleName::Lofi, Some("dark"));
        assert_eq!(keys.program, parse_program("piano").ok());
    }

    #[test]
    fn test_mix_defaults() {
        let m = select_track_mix("drums", StyleName::Trap);
        assert_eq!(m.volume, Some(114));
        let generic = select_track_mix("pad", StyleName::Trap);
        assert_eq!(generic.volume, Some(86));
    }
}
