//! The flatten/expand pipeline: patterns + clips -> absolute timed notes.
//!
//! Every stage is pure and deterministic: swing is a function of the tick,
//! humanization and chance gating draw from PRNGs seeded with stable keys
//! derived from (track seed, track index, note start, pitch). Flattening
//! always returns a freshly allocated note list; the model is never mutated.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::drumkit::expand_role_notes;
use crate::model::{resolve_pattern_name, Note, Project, Track};
use crate::time::apply_swing;

/// Options for [`flatten_track_notes`]; both default to on.
#[derive(Debug, Clone, Copy)]
pub struct FlattenOptions {
    /// Expand role-based drum notes through the track's kit
    pub expand_roles: bool,
    /// Apply deterministic timing/velocity humanization
    pub apply_humanize: bool,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            expand_roles: true,
            apply_humanize: true,
        }
    }
}

/// Stable seed base for a track's per-note RNG keys
pub fn note_seed_base(track: &Track, track_index: usize, extra_seed: i64) -> i64 {
    track.humanize.seed.wrapping_mul(1_000_003) + (track_index as i64) * 9176 + extra_seed
}

/// Stable RNG key for a single note decision
pub fn note_rng_key(seed_base: i64, start: u32, pitch: u8) -> u64 {
    let k = seed_base
        .wrapping_add(start as i64 * 31)
        .wrapping_add(pitch as i64 * 131);
    (k & 0x7FFF_FFFF) as u64
}

/// Flatten one track into absolute-tick notes with swing applied.
///
/// Arrangement (clips + patterns) wins when present; the legacy linear note
/// list is the fallback. Pattern names are resolved per clip through the
/// project's sections/variations; a clip referencing a missing pattern is
/// skipped (reported separately by reference analysis, never fatal here).
pub fn flatten_track_notes(
    project: &Project,
    track_index: usize,
    track: &Track,
    opts: FlattenOptions,
) -> Vec<Note> {
    let ppq = project.ppq;
    let swing = project.swing_percent;

    let mut abs_notes: Vec<Note> = Vec::new();

    if track.has_arrangement() {
        for clip in &track.clips {
            let pat_name = resolve_pattern_name(
                &clip.pattern,
                track_index,
                clip.start,
                project.sections(),
                project.variations(),
            );
            let Some(pat) = track.patterns.get(pat_name) else {
                log::debug!(
                    "track {} clip references missing pattern {:?}; skipped",
                    track_index,
                    pat_name
                );
                continue;
            };
            for rep in 0..clip.repeats {
                let base = clip.start + rep * pat.length;
                for n in &pat.notes {
                    let mut note = n.clone();
                    note.start = apply_swing(base + n.start, ppq, swing);
                    abs_notes.push(note);
                }
            }
        }
    } else {
        for n in &track.notes {
            let mut note = n.clone();
            note.start = apply_swing(n.start, ppq, swing);
            abs_notes.push(note);
        }
    }

    if opts.expand_roles {
        abs_notes = expand_role_notes(&abs_notes, track);
    }

    if opts.apply_humanize {
        abs_notes = humanize_notes(abs_notes, &track.humanize);
    }

    abs_notes
}

/// Apply deterministic humanization: per-note timing jitter in
/// [-timing, +timing] ticks (start clamped to >= 0) and velocity jitter in
/// [-velocity, +velocity] (clamped to [1,127]). Durations are unchanged.
/// Output is sorted by (start, pitch).
pub fn humanize_notes(notes: Vec<Note>, settings: &crate::model::Humanize) -> Vec<Note> {
    if settings.timing == 0 && settings.velocity == 0 {
        let mut out = notes;
        out.sort_by_key(Note::order_key);
        return out;
    }

    let mut rng = StdRng::seed_from_u64(settings.seed as u64);
    let t = settings.timing as i64;
    let v = settings.velocity as i64;

    let mut out: Vec<Note> = notes
        .into_iter()
        .map(|mut n| {
            let dt = if t > 0 { rng.random_range(-t..=t) } else { 0 };
            let dv = if v > 0 { rng.random_range(-v..=v) } else { 0 };
            n.start = (n.start as i64 + dt).max(0) as u32;
            n.velocity = (n.velocity as i64 + dv).clamp(1, 127) as u8;
            n
        })
        .collect();
    out.sort_by_key(Note::order_key);
    out
}

/// Apply chance gating: muted notes are unconditionally dropped; a note
/// with chance < 1 survives iff a draw from its stable per-note RNG is
/// <= chance. The decision depends only on (seed_base, start, pitch), so
/// it is identical across runs and reorderings.
pub fn apply_note_chance(notes: Vec<Note>, seed_base: i64) -> Vec<Note> {
    notes
        .into_iter()
        .filter(|n| {
            if n.mute {
                return false;
            }
            if n.chance >= 1.0 {
                return true;
            }
            let key = note_rng_key(seed_base, n.start, n.pitch);
            let r: f64 = StdRng::seed_from_u64(key).random();
            r <= n.chance as f64
        })
        .collect()
}

/// Last tick of the song: max over clip ends and linear note ends
pub fn project_song_end_tick(project: &Project) -> u32 {
    let mut end = 0u32;
    for t in &project.tracks {
        if t.has_arrangement() {
            for c in &t.clips {
                if let Some(pat) = t.patterns.get(&c.pattern) {
                    end = end.max(c.start + c.repeats * pat.length);
                }
            }
        }
        for n in &t.notes {
            end = end.max(n.end());
        }
    }
    end
}

/// Song length in seconds at the project tempo
pub fn song_length_seconds(project: &Project, end_tick: u32) -> f64 {
    let ticks_per_second = (project.tempo_bpm as f64 / 60.0) * project.ppq as f64;
    if ticks_per_second <= 0.0 {
        return 0.0;
    }
    end_tick as f64 / ticks_per_second
}

/// Song length in bars (fractional)
pub fn bars_estimate(project: &Project, end_tick: u32) -> f64 {
    let ticks_per_bar = (project.ppq * 4) as f64;
    end_tick as f64 / ticks_per_bar
}

/// Return a new project containing only events within [start,end), shifted
/// so start = 0. Arrangement is flattened into linear notes (patterns and
/// clips are not preserved); notes crossing the boundary are clamped. Track
/// metadata (sampler, kit, humanize, bus, ...) is preserved so the slice
/// renders identically.
pub fn slice_project_range(project: &Project, start: u32, end: u32) -> Project {
    let start = start;
    let end = end.max(start);

    let mut out = project.clone();
    out.loop_start = None;
    out.loop_end = None;
    out.render_start = Some(0);
    out.render_end = Some(end - start);
    out.arrangement = Default::default();
    out.path = None;
    out.dirty = false;

    for (ti, t) in project.tracks.iter().enumerate() {
        let nt = &mut out.tracks[ti];
        nt.notes = Vec::new();
        nt.patterns = Default::default();
        nt.clips = Vec::new();

        // Swing is baked in here, so the slice must not re-apply it.
        let flat = flatten_track_notes(
            project,
            ti,
            t,
            FlattenOptions {
                expand_roles: false,
                apply_humanize: false,
            },
        );
        for n in flat {
            let st = n.start;
            let en = n.end();
            if st >= end || en <= start {
                continue;
            }
            let new_start = st.max(start) - start;
            let new_end = en.min(end) - start;
            let mut clipped = n;
            clipped.start = new_start;
            clipped.duration = (new_end - new_start).max(1);
            nt.notes.push(clipped);
        }
        nt.notes.sort_by_key(Note::order_key);
    }

    out.swing_percent = 0;
    out
}

/// A cheap structural issue discovered by [`analyze_references`]
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ReferenceIssue {
    pub code: String,
    pub message: String,
    pub track_index: Option<usize>,
}

/// Safe reference analysis: missing pattern references and unused patterns.
/// These are warnings for the editing surface, never fatal.
pub fn analyze_references(project: &Project) -> Vec<ReferenceIssue> {
    let mut issues = Vec::new();

    for (ti, t) in project.tracks.iter().enumerate() {
        for (ci, c) in t.clips.iter().enumerate() {
            if !t.patterns.contains_key(&c.pattern) {
                issues.push(ReferenceIssue {
                    code: "missing_pattern".to_string(),
                    message: format!(
                        "Track {} clip[{}] references missing pattern: {}",
                        ti, ci, c.pattern
                    ),
                    track_index: Some(ti),
                });
            }
        }

        let used: Vec<&str> = t.clips.iter().map(|c| c.pattern.as_str()).collect();
        let unused: Vec<&str> = t
            .patterns
            .keys()
            .map(String::as_str)
            .filter(|p| !used.contains(p))
            .collect();
        if !unused.is_empty() {
            issues.push(ReferenceIssue {
                code: "unused_patterns".to_string(),
                message: format!("Track {} has unused patterns: {}", ti, unused.join(", ")),
                track_index: Some(ti),
            });
        }
    }

    issues
}
