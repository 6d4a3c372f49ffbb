//! Schema migration and best-effort validation for loaded projects.
//!
//! Migration walks the persisted JSON forward one version at a time, adding
//! missing fields with safe defaults. Validation clamps every value into its
//! documented range so old or hand-edited files never crash the pipeline.
//! Both passes are idempotent.

use serde_json::Value;

use crate::drumkit;
use crate::model::limits::{
    MAX_CLIPS_PER_TRACK, MAX_NOTES_PER_PATTERN, MAX_NOTES_PER_TRACK, MAX_PATTERNS_PER_TRACK,
    MAX_TICK, MAX_TRACKS,
};
use crate::model::{Note, Project, SamplerMode};

pub const CURRENT_SCHEMA_VERSION: u32 = 9;

fn set_default(obj: &mut serde_json::Map<String, Value>, key: &str, value: Value) {
    if !obj.contains_key(key) {
        obj.insert(key.to_string(), value);
    }
}

/// Migrate a persisted project JSON value to the latest schema.
///
/// Loading a file with a schema version newer than
/// [`CURRENT_SCHEMA_VERSION`] logs a warning but proceeds; clamping still
/// applies. `migrate(migrate(v)) == migrate(v)`.
pub fn migrate_project_value(mut data: Value) -> Value {
    let Some(obj) = data.as_object_mut() else {
        return data;
    };

    let mut schema = obj
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;

    if schema > CURRENT_SCHEMA_VERSION {
        log::warn!(
            "project schema v{} is newer than supported v{}; loading anyway",
            schema,
            CURRENT_SCHEMA_VERSION
        );
        schema = CURRENT_SCHEMA_VERSION;
    }

    // v1 -> v2: swing/loop fields
    if schema < 2 {
        set_default(obj, "swing_percent", Value::from(0));
        set_default(obj, "loop_start", Value::Null);
        set_default(obj, "loop_end", Value::Null);
        schema = 2;
    }

    // v2 -> v3: render region
    if schema < 3 {
        set_default(obj, "render_start", Value::Null);
        set_default(obj, "render_end", Value::Null);
        schema = 3;
    }

    // v3/v4 -> v5: arrangement + track humanize/glide
    if schema < 5 {
        set_default(
            obj,
            "arrangement",
            serde_json::json!({"sections": [], "variations": []}),
        );
        for t in tracks_mut(obj) {
            set_default(t, "glide_ticks", Value::from(0));
            set_default(
                t,
                "humanize",
                serde_json::json!({"timing": 0, "velocity": 0, "seed": 0}),
            );
        }
        schema = 5;
    }

    // v5 -> v6: sampler preset
    if schema < 6 {
        for t in tracks_mut(obj) {
            set_default(t, "sampler_preset", Value::from("default"));
        }
        schema = 6;
    }

    // v6 -> v7: drum kit for role-based drum notes
    if schema < 7 {
        for t in tracks_mut(obj) {
            set_default(t, "drum_kit", Value::from("trap_hard"));
        }
        schema = 7;
    }

    // v7 -> v8: optional mix spec
    if schema < 8 {
        set_default(obj, "mix", Value::Object(serde_json::Map::new()));
        schema = 8;
    }

    // v8 -> v9: track bus assignment
    if schema < 9 {
        for t in tracks_mut(obj) {
            set_default(t, "bus", Value::from("music"));
        }
    }

    obj.insert(
        "schema_version".to_string(),
        Value::from(CURRENT_SCHEMA_VERSION),
    );
    data
}

fn tracks_mut(
    obj: &mut serde_json::Map<String, Value>,
) -> impl Iterator<Item = &mut serde_json::Map<String, Value>> {
    obj.get_mut("tracks")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object_mut)
}

fn clamp_u32(v: u32, lo: u32, hi: u32) -> u32 {
    v.clamp(lo, hi)
}

fn sanitize_note(n: &mut Note) {
    n.velocity = n.velocity.clamp(1, 127);
    n.pitch = n.pitch.min(127);
    n.role = n.role.take().and_then(|r| drumkit::normalize_role(&r));
    n.chance = n.chance.clamp(0.0, 1.0);
    if n.accent <= 0.0 {
        n.accent = 1.0;
    }
    if n.start > MAX_TICK {
        n.start = MAX_TICK;
    }
    if n.duration == 0 {
        n.duration = 1;
    }
    if n.duration > MAX_TICK {
        n.duration = MAX_TICK;
    }
}

fn sanitize_region(start: &mut Option<u32>, end: &mut Option<u32>) {
    if let (Some(s), Some(e)) = (*start, *end) {
        if e <= s || e > MAX_TICK {
            *start = None;
            *end = None;
        }
    } else {
        *start = None;
        *end = None;
    }
}

/// Clamp every field of a loaded project into its documented range.
///
/// Regions failing `end > start` (or exceeding [`MAX_TICK`]) are cleared,
/// not errored. Over-limit collections are truncated deterministically:
/// notes by sort order, patterns by lexicographic key, clips in place.
pub fn validate_project(project: &mut Project) {
    project.schema_version = CURRENT_SCHEMA_VERSION;
    project.tempo_bpm = clamp_u32(project.tempo_bpm, 20, 400);
    project.ppq = clamp_u32(project.ppq, 24, 1920);
    project.swing_percent = clamp_u32(project.swing_percent, 0, 75);

    sanitize_region(&mut project.loop_start, &mut project.loop_end);
    sanitize_region(&mut project.render_start, &mut project.render_end);

    if project.tracks.len() > MAX_TRACKS {
        project.tracks.truncate(MAX_TRACKS);
    }

    let ppq = project.ppq;
    for track in &mut project.tracks {
        track.channel = track.channel.min(15);
        track.program = track.program.min(127);
        track.volume = track.volume.min(127);
        track.pan = track.pan.min(127);
        track.reverb = track.reverb.min(127);
        track.chorus = track.chorus.min(127);

        // a sample pack implies the drums sampler path
        if track.sample_pack.is_some() {
            track.sampler = Some(SamplerMode::Drums);
        }

        if track.sampler_preset.trim().is_empty() {
            track.sampler_preset = "default".to_string();
        }
        track.bus = track.bus.trim().to_lowercase();
        if track.bus.is_empty() {
            track.bus = "music".to_string();
        }
        track.drum_kit = drumkit::get_drum_kit(Some(&track.drum_kit)).name.to_string();

        track.glide_ticks = clamp_u32(track.glide_ticks, 0, ppq * 2);
        track.humanize.timing = clamp_u32(track.humanize.timing, 0, ppq / 8);
        track.humanize.velocity = clamp_u32(track.humanize.velocity, 0, 30);

        if track.notes.len() > MAX_NOTES_PER_TRACK {
            track.notes.sort_by_key(Note::order_key);
            track.notes.truncate(MAX_NOTES_PER_TRACK);
        }
        if track.patterns.len() > MAX_PATTERNS_PER_TRACK {
            // deterministic truncation: keep lexicographically-first keys
            let keep: Vec<String> = track
                .patterns
                .keys()
                .take(MAX_PATTERNS_PER_TRACK)
                .cloned()
                .collect();
            track.patterns.retain(|k, _| keep.contains(k));
        }
        if track.clips.len() > MAX_CLIPS_PER_TRACK {
            track.clips.truncate(MAX_CLIPS_PER_TRACK);
        }

        for n in &mut track.notes {
            sanitize_note(n);
        }

        for (name, pat) in &mut track.patterns {
            pat.name = name.clone();
            if pat.length == 0 {
                pat.length = ppq * 4;
            }
            pat.length = pat.length.min(MAX_TICK);
            if pat.notes.len() > MAX_NOTES_PER_PATTERN {
                pat.notes.sort_by_key(Note::order_key);
                pat.notes.truncate(MAX_NOTES_PER_PATTERN);
            }
            for n in &mut pat.notes {
                sanitize_note(n);
            }
        }

        for c in &mut track.clips {
            if c.repeats == 0 {
                c.repeats = 1;
            }
            if c.start > MAX_TICK {
                c.start = MAX_TICK;
            }
        }
    }
}
