//! Drum render mode policy.
//!
//! Sampler-rendered drums can be unreliable with some SoundFonts, while
//! plain GM drums on MIDI channel 10 are boring but robust. The `gm` mode
//! (default) converts sampler-drum tracks to GM; `sampler` keeps them;
//! `auto` renders a short preview both ways and picks by a band-energy
//! heuristic.

use std::collections::BTreeMap;

use crate::analysis::bands::BandReport;
use crate::error::Result;
use crate::model::{Note, Project, SamplerMode, Track};
use crate::time::ticks_per_bar;

/// How sampler-drum tracks are realized at render time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrumMode {
    /// Convert to plain GM drums on channel 10 (default)
    #[default]
    Gm,
    /// Keep the in-process sampler
    Sampler,
    /// Preview both and choose by score
    Auto,
}

impl DrumMode {
    pub fn parse(s: &str) -> Option<DrumMode> {
        match s.trim().to_lowercase().as_str() {
            "gm" => Some(DrumMode::Gm),
            "sampler" => Some(DrumMode::Sampler),
            "auto" => Some(DrumMode::Auto),
            _ => None,
        }
    }
}

/// Copy of the project with the render region set to its first `bars` bars
pub fn project_preview(project: &Project, bars: u32) -> Project {
    let mut p = project.clone();
    p.loop_start = None;
    p.loop_end = None;
    p.render_start = Some(0);
    p.render_end = Some(ticks_per_bar(p.ppq) * bars.max(1));
    p
}

fn expand_to_gm(notes: &[Note], gm_track: &Track) -> Vec<Note> {
    let mut expanded: Vec<Note> = Vec::new();
    for n in notes {
        for mut nn in crate::drumkit::expand_role_note(n, gm_track) {
            nn.role = None;
            expanded.push(nn);
        }
    }

    // dedupe (start, pitch), keeping the loudest layer
    let mut best: BTreeMap<(u32, u8), Note> = BTreeMap::new();
    for n in expanded {
        let k = (n.start, n.pitch);
        match best.get(&k) {
            Some(cur) if cur.velocity >= n.velocity => {}
            _ => {
                best.insert(k, n);
            }
        }
    }
    best.into_values().collect()
}

/// Convert sampler-drum tracks to plain GM drums on MIDI channel 10.
///
/// Role notes are expanded into explicit GM pitches through the `gm_basic`
/// kit, the sampler is disabled, and the track is forced onto channel 10
/// (index 9); a non-drum track already on channel 9 is moved to a free
/// channel first.
pub fn convert_sampler_drums_to_gm(project: &Project) -> Project {
    let mut p = project.clone();

    // Free channel 9 if a non-drum track holds it.
    let used: Vec<u8> = p.tracks.iter().map(|t| t.channel).collect();
    if used.contains(&9) {
        for t in &mut p.tracks {
            if t.channel == 9 && t.sampler != Some(SamplerMode::Drums) {
                if let Some(free) = (0..16u8).find(|ch| *ch != 9 && !used.contains(ch)) {
                    t.channel = free;
                }
            }
        }
    }

    for t in &mut p.tracks {
        if t.sampler != Some(SamplerMode::Drums) {
            continue;
        }

        let mut gm_track = t.clone();
        gm_track.drum_kit = "gm_basic".to_string();

        for pat in t.patterns.values_mut() {
            pat.notes = expand_to_gm(&pat.notes, &gm_track);
        }
        t.notes = expand_to_gm(&t.notes, &gm_track);

        t.sampler = None;
        t.sample_pack = None;
        t.sampler_preset = "default".to_string();
        t.drum_kit = "gm_basic".to_string();
        t.program = 0;
        t.channel = 9;
        t.reverb = 0;
        t.chorus = 0;
    }

    p
}

/// Heuristic drum-render score: higher is better (more punch, less harsh
/// dominance). `sub - high - clip_penalty` in dB.
pub fn score_bands(report: &BandReport) -> f64 {
    let get = |k: &str| report.get(k).copied().unwrap_or_default();
    let sub = get("sub_lt90").mean_volume;
    let high = get("high_ge4k").mean_volume;
    let full_max = get("full").max_volume;

    let clip_penalty = if full_max > -1.0 {
        (full_max + 1.0) * 3.0
    } else {
        0.0
    };
    sub - high - clip_penalty
}

/// Decision record from [`choose_drum_render_mode`]
#[derive(Debug, Clone, Default)]
pub struct DrumModeDebug {
    pub sampler_score: Option<f64>,
    pub gm_score: Option<f64>,
    pub reason: String,
}

/// Preview both render modes and pick one.
///
/// `render_preview_wav` renders a project (already region-limited) to a WAV
/// path; the chooser recurses through it explicitly rather than reaching
/// back into the renderer. GM wins when its score beats the sampler's by at
/// least `threshold_db`, or when the sampler render fails outright.
pub fn choose_drum_render_mode<F>(
    project: &Project,
    mut render_preview_wav: F,
    preview_bars: u32,
    threshold_db: f64,
) -> (DrumMode, DrumModeDebug)
where
    F: FnMut(&Project) -> Result<String>,
{
    let mut debug = DrumModeDebug::default();

    let has_sampler_drums = project
        .tracks
        .iter()
        .any(|t| t.sampler == Some(SamplerMode::Drums));
    if !has_sampler_drums {
        debug.reason = "no sampler drums".to_string();
        return (DrumMode::Sampler, debug);
    }

    let preview = project_preview(project, preview_bars);

    let sampler_report = render_preview_wav(&preview)
        .and_then(|wav| crate::analysis::bands::band_energy_report(&wav));
    let score_s = match sampler_report {
        Ok(rep) => score_bands(&rep),
        Err(e) => {
            debug.reason = format!("sampler preview failed: {}", e);
            return (DrumMode::Gm, debug);
        }
    };

    let gm_preview = convert_sampler_drums_to_gm(&preview);
    let gm_report = render_preview_wav(&gm_preview)
        .and_then(|wav| crate::analysis::bands::band_energy_report(&wav));
    let score_g = match gm_report {
        Ok(rep) => score_bands(&rep),
        Err(e) => {
            debug.reason = format!("gm preview failed: {}", e);
            return (DrumMode::Sampler, debug);
        }
    };

    debug.sampler_score = Some(score_s);
    debug.gm_score = Some(score_g);

    if score_g > score_s + threshold_db {
        debug.reason = "gm better by threshold".to_string();
        (DrumMode::Gm, debug)
    } else {
        debug.reason = "sampler ok".to_string();
        (DrumMode::Sampler, debug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::bands::BandVolume;

    fn drum_project() -> Project {
        let mut p = Project::new("drums", 140);
        let mut t = Track::new("Drums", 0);
        t.sampler = Some(SamplerMode::Drums);
        t.notes.push(Note::new(0, 120, 0, 100).with_role("snare"));
        p.tracks.push(t);
        p
    }

    #[test]
    fn test_gm_conversion_expands_roles_and_moves_channel() {
        let p = convert_sampler_drums_to_gm(&drum_project());
        let t = &p.tracks[0];
        assert_eq!(t.sampler, None);
        assert_eq!(t.channel, 9);
        assert_eq!(t.drum_kit, "gm_basic");
        // snare role -> single gm pitch 38
        assert_eq!(t.notes.len(), 1);
        assert_eq!(t.notes[0].pitch, 38);
        assert_eq!(t.notes[0].role, None);
    }

    #[test]
    fn test_gm_conversion_dedupes_layers_keeping_loudest() {
        let mut p = drum_project();
        // trap_hard kick expands to 36 and 35; two kicks at same start
        p.tracks[0].notes = vec![
            Note::new(0, 120, 0, 100).with_role("kick"),
            Note::new(0, 120, 36, 80),
        ];
        p.tracks[0].drum_kit = "gm_basic".to_string();
        let out = convert_sampler_drums_to_gm(&p);
        let notes = &out.tracks[0].notes;
        // one note at (0, 36), velocity 100 wins
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].velocity, 100);
    }

    #[test]
    fn test_gm_conversion_moves_conflicting_channel_nine() {
        let mut p = drum_project();
        let mut keys = Track::new("Keys", 9);
        keys.notes.push(Note::new(0, 120, 60, 90));
        p.tracks.push(keys);
        let out = convert_sampler_drums_to_gm(&p);
        assert_eq!(out.tracks[0].channel, 9);
        assert_ne!(out.tracks[1].channel, 9);
    }

    #[test]
    fn test_score_bands() {
        let mut rep = BandReport::new();
        rep.insert(
            "sub_lt90".to_string(),
            BandVolume {
                mean_volume: -20.0,
                max_volume: -3.0,
            },
        );
        rep.insert(
            "high_ge4k".to_string(),
            BandVolume {
                mean_volume: -30.0,
                max_volume: -3.0,
            },
        );
        rep.insert(
            "full".to_string(),
            BandVolume {
                mean_volume: -18.0,
                max_volume: -0.5,
            },
        );
        // sub - high = 10; clip penalty (−0.5 + 1) * 3 = 1.5
        assert!((score_bands(&rep) - 8.5).abs() < 1e-9);
    }

    #[test]
    fn test_chooser_skips_without_sampler_drums() {
        let mut p = drum_project();
        p.tracks[0].sampler = None;
        let (mode, debug) = choose_drum_render_mode(&p, |_| unreachable!(), 8, 6.0);
        assert_eq!(mode, DrumMode::Sampler);
        assert_eq!(debug.reason, "no sampler drums");
    }

    #[test]
    fn test_chooser_falls_to_gm_when_sampler_fails() {
        let p = drum_project();
        let (mode, _) = choose_drum_render_mode(
            &p,
            |_| Err(crate::error::ClawError::ExternalTool("boom".to_string())),
            8,
            6.0,
        );
        assert_eq!(mode, DrumMode::Gm);
    }

    #[test]
    fn test_drum_mode_parse() {
        assert_eq!(DrumMode::parse("gm"), Some(DrumMode::Gm));
        assert_eq!(DrumMode::parse("AUTO"), Some(DrumMode::Auto));
        assert_eq!(DrumMode::parse("x"), None);
    }
}
