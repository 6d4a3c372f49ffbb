//! Built-in sampler voices: role-based drum synthesis and the monophonic
//! 808 sub bass.
//!
//! Both render a whole track to a stereo buffer in one pass. Note streams
//! come pre-flattened (arrangement, swing) but not humanized: the sampler
//! applies chance gating itself with the same stable per-note keys the MIDI
//! path uses, so a sampler render and a MIDI render drop the same notes.

use std::f64::consts::PI;

use crate::midi::midi_to_hz;
use crate::model::{Note, Project, Track};
use crate::pipeline::{
    apply_note_chance, flatten_track_notes, note_seed_base, FlattenOptions,
};
use crate::synth::{sec_per_tick, softclip, StereoBuffer};

/// 808 preset shaping: (2nd harmonic, 3rd harmonic, softclip drive)
fn preset_harmonics(preset: &str) -> (f32, f32, f32) {
    match preset.trim().to_lowercase().as_str() {
        "dist" | "dirty" => (0.22, 0.10, 1.75),
        "growl" | "grit" => (0.18, 0.18, 1.55),
        _ => (0.10, 0.04, 1.15), // default / clean
    }
}

fn flatten_for_sampler(project: &Project, track_index: usize, track: &Track, expand_roles: bool) -> Vec<Note> {
    let notes = flatten_track_notes(
        project,
        track_index,
        track,
        FlattenOptions {
            expand_roles,
            apply_humanize: true,
        },
    );
    apply_note_chance(notes, note_seed_base(track, track_index, 0))
}

fn buffer_for(project: &Project, notes: &[Note], sample_rate: u32, tail_secs: f64) -> StereoBuffer {
    let end_tick = notes.iter().map(Note::end).max().unwrap_or(0);
    let total = (end_tick as f64 * sec_per_tick(project) * sample_rate as f64).ceil() as usize
        + (tail_secs * sample_rate as f64) as usize;
    StereoBuffer::new(total.max(sample_rate as usize / 2), sample_rate)
}

/// Render a drum track with the minimal deterministic synthesized kit.
///
/// Pitch mapping is GM-ish: 36 kick, 38 snare, 42/44/46 hats. Role notes
/// are expanded through the track's kit first. Unknown pitches produce a
/// tiny velocity-scaled click so misrouted notes stay audible.
pub fn render_drum_track(
    project: &Project,
    track_index: usize,
    track: &Track,
    sample_rate: u32,
) -> StereoBuffer {
    let notes = flatten_for_sampler(project, track_index, track, true);
    let mut buf = buffer_for(project, &notes, sample_rate, 1.0);

    let spt = sec_per_tick(project);
    let sr = sample_rate as f64;

    for n in &notes {
        let start_s = (n.start as f64 * spt * sr) as usize;
        let vel = n.effective_velocity() as f64 / 127.0;

        match n.pitch {
            36 => {
                // kick: decaying sine from 90 -> 40 Hz
                let dur = (0.20 * sr) as usize;
                for i in 0..dur {
                    let t = i as f64 / sr;
                    let f = 90.0 * 0.5f64.powf(t * 6.0) + 40.0;
                    let env = (-t * 16.0).exp();
                    let s = ((2.0 * PI * f * t).sin() * env * vel * 0.9) as f32;
                    buf.add(start_s + i, s, s);
                }
            }
            38 => {
                // snare: two sine partials + body tone
                let dur = (0.18 * sr) as usize;
                for i in 0..dur {
                    let t = i as f64 / sr;
                    let env = (-t * 22.0).exp();
                    let noise = ((2.0 * PI * 1800.0 * t).sin() + (2.0 * PI * 3300.0 * t).sin()) * 0.15;
                    let tone = (2.0 * PI * 220.0 * t).sin() * 0.2;
                    let s = ((noise + tone) * env * vel) as f32;
                    buf.add(start_s + i, s, s);
                }
            }
            42 | 44 | 46 => {
                // hats: 8 kHz partial, faster decay when closed
                let dur = (0.07 * sr) as usize;
                let decay = if n.pitch == 42 { 55.0 } else { 25.0 };
                for i in 0..dur {
                    let t = i as f64 / sr;
                    let env = (-t * decay).exp();
                    let s = ((2.0 * PI * 8000.0 * t).sin() * 0.15 * env * vel) as f32;
                    buf.add(start_s + i, s, s);
                }
            }
            _ => {
                // fallback click
                let s = (0.2 * vel) as f32;
                buf.add(start_s, s, s);
            }
        }
    }

    buf
}

/// Render a monophonic 808 bass track.
///
/// Later notes steal pitch; phase stays continuous across notes and a short
/// release fade avoids clicks at note boundaries. Per-note glide overrides
/// the track glide window; glide ramps linearly from the previous note's
/// frequency.
pub fn render_808_track(
    project: &Project,
    track_index: usize,
    track: &Track,
    sample_rate: u32,
) -> StereoBuffer {
    let mut notes = flatten_for_sampler(project, track_index, track, false);
    notes.sort_by_key(Note::order_key);

    let mut buf = buffer_for(project, &notes, sample_rate, 0.5);

    let spt = sec_per_tick(project);
    let sr = sample_rate as f64;
    let (harm2, harm3, drive) = preset_harmonics(&track.sampler_preset);
    let glide_s_track = track.glide_ticks as f64 * spt;
    let rel_n = ((0.008 * sr) as usize).max(1); // 8ms release

    let mut phase = 0.0f64;

    for (idx, n) in notes.iter().enumerate() {
        let start_s = (n.start as f64 * spt * sr) as usize;
        let end_s = (n.end() as f64 * spt * sr) as usize;
        let dur = end_s.saturating_sub(start_s);
        let vel = n.effective_velocity() as f64 / 127.0;

        let f0 = midi_to_hz(n.pitch) as f64;
        let f_prev = if idx > 0 {
            midi_to_hz(notes[idx - 1].pitch) as f64
        } else {
            f0
        };

        let glide_s = if n.glide_ticks > 0 {
            n.glide_ticks as f64 * spt
        } else {
            glide_s_track
        };

        for i in 0..dur {
            let t = i as f64 / sr;

            // pitch glide at the start of the note
            let f = if glide_s > 0.0 && t < glide_s {
                let a = t / glide_s;
                f_prev * (1.0 - a) + f0 * a
            } else {
                f0
            };

            // amp envelope: 5ms attack, exponential decay, release fade
            let mut env = (t / 0.005).min(1.0) * (-t * 1.7).exp();
            if dur - i <= rel_n {
                env *= (dur - i) as f64 / rel_n as f64;
            }

            phase += 2.0 * PI * f / sr;
            let base = phase.sin();
            let x = base + harm2 as f64 * (2.0 * phase).sin() + harm3 as f64 * (3.0 * phase).sin();
            let s = softclip(x as f32, drive) * (env * vel * 0.9) as f32;
            buf.add(start_s + i, s, s);
        }
    }

    buf
}

/// Dispatch on the track's sampler mode
pub fn render_sampler_track(
    project: &Project,
    track_index: usize,
    track: &Track,
    sample_rate: u32,
) -> crate::error::Result<StereoBuffer> {
    match track.sampler {
        Some(crate::model::SamplerMode::Drums) => {
            Ok(render_drum_track(project, track_index, track, sample_rate))
        }
        Some(crate::model::SamplerMode::Bass808) => {
            Ok(render_808_track(project, track_index, track, sample_rate))
        }
        None => Err(crate::error::ClawError::InvalidState(format!(
            "track {} has no sampler mode",
            track_index
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SamplerMode;

    fn drum_project() -> Project {
        let mut p = Project::new("drums", 120);
        let mut t = Track::new("Drums", 0);
        t.sampler = Some(SamplerMode::Drums);
        t.notes.push(Note::new(0, 120, 36, 110));
        t.notes.push(Note::new(480, 120, 38, 100));
        t.notes.push(Note::new(960, 60, 42, 80));
        p.tracks.push(t);
        p
    }

    #[test]
    fn test_drum_render_produces_audio() {
        let p = drum_project();
        let buf = render_drum_track(&p, 0, &p.tracks[0], 44_100);
        assert!(buf.peak() > 0.01);
    }

    #[test]
    fn test_drum_render_is_deterministic() {
        let p = drum_project();
        let a = render_drum_track(&p, 0, &p.tracks[0], 44_100);
        let b = render_drum_track(&p, 0, &p.tracks[0], 44_100);
        assert_eq!(a.left, b.left);
        assert_eq!(a.right, b.right);
    }

    #[test]
    fn test_drum_render_respects_limiter_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let p = drum_project();
        let mut buf = render_drum_track(&p, 0, &p.tracks[0], 44_100);
        buf.write_wav(dir.path().join("d.wav")).unwrap();
        assert!(buf.peak() <= 0.98 + 1e-6);
    }

    fn bass_project(glide: u32) -> Project {
        let mut p = Project::new("bass", 120);
        let mut t = Track::new("808", 0);
        t.sampler = Some(SamplerMode::Bass808);
        t.sampler_preset = "clean".to_string();
        t.glide_ticks = glide;
        t.notes.push(Note::new(0, 480, 33, 110));
        t.notes.push(Note::new(480, 480, 40, 110));
        p.tracks.push(t);
        p
    }

    #[test]
    fn test_808_render_produces_audio_and_limits() {
        let p = bass_project(0);
        let buf = render_808_track(&p, 0, &p.tracks[0], 44_100);
        assert!(buf.peak() > 0.05);
    }

    #[test]
    fn test_808_glide_changes_output() {
        let no_glide = bass_project(0);
        let with_glide = bass_project(120);
        let a = render_808_track(&no_glide, 0, &no_glide.tracks[0], 44_100);
        let b = render_808_track(&with_glide, 0, &with_glide.tracks[0], 44_100);
        assert_ne!(a.left, b.left);
    }

    #[test]
    fn test_808_presets_differ() {
        let mut clean = bass_project(0);
        clean.tracks[0].sampler_preset = "clean".to_string();
        let mut dist = bass_project(0);
        dist.tracks[0].sampler_preset = "dist".to_string();
        let a = render_808_track(&clean, 0, &clean.tracks[0], 44_100);
        let b = render_808_track(&dist, 0, &dist.tracks[0], 44_100);
        assert_ne!(a.left, b.left);
    }

    #[test]
    fn test_sampler_dispatch_rejects_no_mode() {
        let mut p = drum_project();
        p.tracks[0].sampler = None;
        assert!(render_sampler_track(&p, 0, &p.tracks[0], 44_100).is_err());
    }
}
