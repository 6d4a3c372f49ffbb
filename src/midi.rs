//! MIDI export functionality
//!
//! Converts projects to Standard MIDI Files (SMF). Emits one setup track
//! (tempo + name) plus one track per audible project track, with the
//! flattened note stream (swing, role expansion, humanize, chance gating
//! already applied). Byte-identical across runs for the same project.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use midly::{
    num::{u15, u24, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};

use crate::error::{ClawError, Result};
use crate::model::{Project, Track};
use crate::pipeline::{apply_note_chance, flatten_track_notes, note_seed_base, FlattenOptions};

/// Result of a MIDI export
#[derive(Debug, Clone)]
pub struct MidiExportResult {
    pub path: String,
    pub ticks_per_beat: u16,
}

/// Convert a MIDI pitch to frequency (equal temperament, A4 = 440 Hz)
pub fn midi_to_hz(pitch: u8) -> f32 {
    440.0 * 2f32.powf((pitch as f32 - 69.0) / 12.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    ProgramChange { program: u8 },
    ControlChange { controller: u8, value: u8 },
    NoteOff { pitch: u8 },
    NoteOn { pitch: u8, velocity: u8 },
}

impl EventKind {
    /// Sort rank at equal ticks: setup first, then note_off before note_on
    fn rank(&self) -> u8 {
        match self {
            EventKind::ProgramChange { .. } => 0,
            EventKind::ControlChange { .. } => 1,
            EventKind::NoteOff { .. } => 2,
            EventKind::NoteOn { .. } => 3,
        }
    }
}

fn track_events(project: &Project, track_index: usize, track: &Track) -> Vec<(u32, EventKind)> {
    let mut events: Vec<(u32, EventKind)> = Vec::new();

    // At time 0: program + basic mixer CCs
    events.push((0, EventKind::ProgramChange { program: track.program }));
    events.push((
        0,
        EventKind::ControlChange {
            controller: 7,
            value: track.volume,
        },
    ));
    events.push((
        0,
        EventKind::ControlChange {
            controller: 10,
            value: track.pan,
        },
    ));
    events.push((
        0,
        EventKind::ControlChange {
            controller: 91,
            value: track.reverb,
        },
    ));
    events.push((
        0,
        EventKind::ControlChange {
            controller: 93,
            value: track.chorus,
        },
    ));

    let notes = flatten_track_notes(project, track_index, track, FlattenOptions::default());
    let notes = apply_note_chance(notes, note_seed_base(track, track_index, 0));

    for n in &notes {
        events.push((
            n.start,
            EventKind::NoteOn {
                pitch: n.pitch,
                velocity: n.effective_velocity(),
            },
        ));
        events.push((n.end(), EventKind::NoteOff { pitch: n.pitch }));
    }

    // Stable ordering: ascending tick, note_off before note_on at equal tick.
    events.sort_by_key(|(tick, kind)| (*tick, kind.rank()));
    events
}

/// Track indices that should emit: soloed tracks when any solo is set,
/// otherwise all non-muted tracks.
pub fn audible_tracks(project: &Project) -> BTreeSet<usize> {
    let soloed: BTreeSet<usize> = project
        .tracks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.solo)
        .map(|(i, _)| i)
        .collect();
    if !soloed.is_empty() {
        return soloed;
    }
    project
        .tracks
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.mute)
        .map(|(i, _)| i)
        .collect()
}

/// Build the SMF for a project, optionally restricted to a track subset.
/// The returned SMF borrows track/project names from the project.
pub fn project_to_smf<'a>(
    project: &'a Project,
    allowed_tracks: Option<&BTreeSet<usize>>,
) -> Smf<'a> {
    let ppq = (project.ppq as u16).min(0x7FFF);

    let mut tracks: Vec<Vec<TrackEvent<'a>>> = Vec::new();

    // Track 0: tempo + project name
    let us_per_quarter = 60_000_000 / project.tempo_bpm.max(1);
    let mut setup: Vec<TrackEvent<'a>> = vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us_per_quarter))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(project.name.as_bytes())),
        },
    ];
    setup.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    tracks.push(setup);

    let default_allowed;
    let allowed = match allowed_tracks {
        Some(a) => a,
        None => {
            default_allowed = audible_tracks(project);
            &default_allowed
        }
    };

    for (idx, track) in project.tracks.iter().enumerate() {
        if !allowed.contains(&idx) {
            continue;
        }
        let channel = u4::new(track.channel.min(15));
        let mut midi_track: Vec<TrackEvent<'a>> = vec![TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(track.name.as_bytes())),
        }];

        let mut last_tick = 0u32;
        for (tick, kind) in track_events(project, idx, track) {
            let delta = tick.saturating_sub(last_tick);
            last_tick = tick;

            let message = match kind {
                EventKind::ProgramChange { program } => MidiMessage::ProgramChange {
                    program: u7::new(program.min(127)),
                },
                EventKind::ControlChange { controller, value } => MidiMessage::Controller {
                    controller: u7::new(controller),
                    value: u7::new(value.min(127)),
                },
                EventKind::NoteOn { pitch, velocity } => MidiMessage::NoteOn {
                    key: u7::new(pitch.min(127)),
                    vel: u7::new(velocity.min(127)),
                },
                EventKind::NoteOff { pitch } => MidiMessage::NoteOff {
                    key: u7::new(pitch.min(127)),
                    vel: u7::new(0),
                },
            };

            midi_track.push(TrackEvent {
                delta: u28::new(delta),
                kind: TrackEventKind::Midi { channel, message },
            });
        }

        midi_track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        tracks.push(midi_track);
    }

    Smf {
        header: Header {
            format: Format::Parallel,
            timing: Timing::Metrical(u15::new(ppq)),
        },
        tracks,
    }
}

/// Export a project to a MIDI file.
///
/// # Arguments
/// * `project` - The project to export
/// * `path` - Output file path (e.g. "out/song.mid")
/// * `allowed_tracks` - Optional track subset; defaults to solo/mute
///   resolution over all tracks
pub fn export_midi<P: AsRef<Path>>(
    project: &Project,
    path: P,
    allowed_tracks: Option<&BTreeSet<usize>>,
) -> Result<MidiExportResult> {
    let out = path.as_ref();
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let smf = project_to_smf(project, allowed_tracks);

    let mut file = File::create(out)
        .map_err(|e| ClawError::Midi(format!("failed to create MIDI file {}: {}", out.display(), e)))?;
    smf.write_std(&mut file)
        .map_err(|e| ClawError::Midi(format!("failed to write MIDI data to {}: {}", out.display(), e)))?;
    file.flush()
        .map_err(|e| ClawError::Midi(format!("failed to flush MIDI file {}: {}", out.display(), e)))?;

    Ok(MidiExportResult {
        path: out.to_string_lossy().into_owned(),
        ticks_per_beat: match smf.header.timing {
            Timing::Metrical(t) => t.as_int(),
            Timing::Timecode(..) => 0,
        },
    })
}
