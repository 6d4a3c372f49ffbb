//! The project data model
//!
//! A [`Project`] owns an ordered list of [`Track`]s plus song-level metadata
//! (tempo, PPQ, swing, loop/render regions, arrangement sections and
//! variations, and a loose mix spec). Tracks own their patterns, clips and a
//! legacy linear note list. Everything is plain data: rendering never mutates
//! the model, and flattened note streams are freshly allocated.

mod arrange;
pub mod json;
pub mod limits;
pub mod validate;

pub use arrange::{resolve_pattern_name, Clip, Pattern, Section, Variation};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sampler mode for tracks rendered by the built-in synthesis engine
/// instead of the external SoundFont renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplerMode {
    #[serde(rename = "drums")]
    Drums,
    #[serde(rename = "808")]
    Bass808,
}

impl SamplerMode {
    pub fn parse(s: &str) -> Option<SamplerMode> {
        match s.trim().to_lowercase().as_str() {
            "drums" => Some(SamplerMode::Drums),
            "808" => Some(SamplerMode::Bass808),
            _ => None,
        }
    }
}

fn default_chance() -> f32 {
    1.0
}

fn default_accent() -> f32 {
    1.0
}

fn is_default_chance(v: &f32) -> bool {
    (*v - 1.0).abs() < f32::EPSILON
}

fn is_default_accent(v: &f32) -> bool {
    (*v - 1.0).abs() < f32::EPSILON
}

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

/// A single note event.
///
/// Times are in ticks (PPQ-relative), absolute from the start of the song
/// for linear notes, or pattern-relative inside a [`Pattern`].
///
/// A note either targets a MIDI `pitch` directly, or names a canonical drum
/// `role` (kick, snare, hat_closed, ...) which the track's drum kit expands
/// into one or more pitch layers at flatten time. Expression fields
/// (`chance`, `mute`, `accent`, `glide_ticks`) ride along unchanged through
/// expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub start: u32,
    pub duration: u32,
    pub pitch: u8,
    pub velocity: u8,

    /// Canonical drum role; when set, `pitch` is a fallback only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Probability [0,1] that this note survives chance gating.
    #[serde(default = "default_chance", skip_serializing_if = "is_default_chance")]
    pub chance: f32,

    #[serde(default, skip_serializing_if = "is_false")]
    pub mute: bool,

    /// Velocity multiplier (> 0); effective velocity is
    /// `clamp(round(velocity * accent), 1, 127)`.
    #[serde(default = "default_accent", skip_serializing_if = "is_default_accent")]
    pub accent: f32,

    /// Per-note pitch glide window in ticks (monophonic 808 only).
    #[serde(default, skip_serializing_if = "is_zero")]
    pub glide_ticks: u32,
}

impl Note {
    pub fn new(start: u32, duration: u32, pitch: u8, velocity: u8) -> Self {
        Self {
            start,
            duration,
            pitch,
            velocity,
            role: None,
            chance: 1.0,
            mute: false,
            accent: 1.0,
            glide_ticks: 0,
        }
    }

    /// Same note with a drum role attached
    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    /// End tick (exclusive)
    pub fn end(&self) -> u32 {
        self.start + self.duration
    }

    /// Velocity after applying the accent multiplier, clamped to [1,127]
    pub fn effective_velocity(&self) -> u8 {
        let v = (self.velocity as f32 * self.accent).round();
        v.clamp(1.0, 127.0) as u8
    }

    /// Sort key: (start, pitch)
    pub fn order_key(&self) -> (u32, u8) {
        (self.start, self.pitch)
    }
}

/// Deterministic per-track humanization settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Humanize {
    /// Max +/- tick jitter
    #[serde(default)]
    pub timing: u32,
    /// Max +/- velocity jitter
    #[serde(default)]
    pub velocity: u32,
    #[serde(default)]
    pub seed: i64,
}

/// A plugin-instrument assignment on a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub id: String,
    #[serde(default = "InstrumentSpec::default_preset")]
    pub preset: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub seed: i64,
}

impl InstrumentSpec {
    fn default_preset() -> String {
        "default".to_string()
    }

    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            preset: "default".to_string(),
            params: serde_json::Map::new(),
            seed: 0,
        }
    }
}

/// A sample-pack assignment on a track; forces sampler mode to drums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePackSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub seed: i64,
    #[serde(default)]
    pub gain_db: f32,
}

fn default_bus() -> String {
    "music".to_string()
}

fn default_drum_kit() -> String {
    "trap_hard".to_string()
}

fn default_sampler_preset() -> String {
    "default".to_string()
}

fn default_volume() -> u8 {
    100
}

fn default_pan() -> u8 {
    64
}

/// A single track: MIDI mixer settings, an optional built-in sound source
/// (sampler / instrument / sample pack), arrangement data, and notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    /// MIDI channel 0-15; unique across the project
    pub channel: u8,
    /// GM program 0-127
    #[serde(default)]
    pub program: u8,
    /// CC7
    #[serde(default = "default_volume")]
    pub volume: u8,
    /// CC10, 64 = center
    #[serde(default = "default_pan")]
    pub pan: u8,
    /// CC91
    #[serde(default)]
    pub reverb: u8,
    /// CC93
    #[serde(default)]
    pub chorus: u8,

    /// Built-in sampler mode; rendered in-process, bypassing the
    /// external SoundFont renderer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampler: Option<SamplerMode>,
    #[serde(default = "default_sampler_preset")]
    pub sampler_preset: String,
    /// Drum kit used to expand role-based notes
    #[serde(default = "default_drum_kit")]
    pub drum_kit: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<InstrumentSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_pack: Option<SamplePackSpec>,

    /// Track-level 808 glide window in ticks
    #[serde(default)]
    pub glide_ticks: u32,
    #[serde(default)]
    pub humanize: Humanize,

    /// Mix bus this track sums into
    #[serde(default = "default_bus")]
    pub bus: String,

    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub solo: bool,

    /// Legacy linear notes (absolute ticks); used when no arrangement exists
    #[serde(default)]
    pub notes: Vec<Note>,

    /// Patterns by name; sorted map for deterministic iteration
    #[serde(default)]
    pub patterns: BTreeMap<String, Pattern>,
    #[serde(default)]
    pub clips: Vec<Clip>,
}

impl Track {
    pub fn new(name: &str, channel: u8) -> Self {
        Self {
            name: name.to_string(),
            channel,
            program: 0,
            volume: 100,
            pan: 64,
            reverb: 0,
            chorus: 0,
            sampler: None,
            sampler_preset: "default".to_string(),
            drum_kit: "trap_hard".to_string(),
            instrument: None,
            sample_pack: None,
            glide_ticks: 0,
            humanize: Humanize::default(),
            bus: "music".to_string(),
            mute: false,
            solo: false,
            notes: Vec::new(),
            patterns: BTreeMap::new(),
            clips: Vec::new(),
        }
    }

    /// True when the track has an arrangement (patterns placed by clips)
    pub fn has_arrangement(&self) -> bool {
        !self.clips.is_empty() && !self.patterns.is_empty()
    }
}

/// Arrangement metadata kept at project level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub variations: Vec<Variation>,
}

fn default_tempo() -> u32 {
    120
}

fn default_ppq() -> u32 {
    480
}

/// The root entity: a named song with tracks, arrangement and mix spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub schema_version: u32,
    pub name: String,
    #[serde(default = "default_tempo")]
    pub tempo_bpm: u32,
    #[serde(default = "default_ppq")]
    pub ppq: u32,
    /// 0-75; applied to offbeat 16ths during flattening
    #[serde(default)]
    pub swing_percent: u32,
    #[serde(default)]
    pub loop_start: Option<u32>,
    /// exclusive
    #[serde(default)]
    pub loop_end: Option<u32>,
    #[serde(default)]
    pub render_start: Option<u32>,
    /// exclusive
    #[serde(default)]
    pub render_end: Option<u32>,

    /// Loose mix spec; typed views are parsed on demand (unknown keys kept)
    #[serde(default)]
    pub mix: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub arrangement: Arrangement,

    #[serde(default)]
    pub tracks: Vec<Track>,

    /// Runtime-only: path the project was loaded from / saved to
    #[serde(skip)]
    pub path: Option<String>,
    /// Runtime-only: unsaved changes flag
    #[serde(skip)]
    pub dirty: bool,
}

impl Project {
    pub fn new(name: &str, tempo_bpm: u32) -> Self {
        Self {
            schema_version: validate::CURRENT_SCHEMA_VERSION,
            name: name.to_string(),
            tempo_bpm,
            ppq: 480,
            swing_percent: 0,
            loop_start: None,
            loop_end: None,
            render_start: None,
            render_end: None,
            mix: serde_json::Map::new(),
            arrangement: Arrangement::default(),
            tracks: Vec::new(),
            path: None,
            dirty: false,
        }
    }

    /// First unused MIDI channel, or an error when all 16 are taken
    pub fn next_free_channel(&self) -> crate::error::Result<u8> {
        let used: Vec<u8> = self.tracks.iter().map(|t| t.channel).collect();
        (0..16u8)
            .find(|ch| !used.contains(ch))
            .ok_or_else(|| crate::error::ClawError::InvalidState("no free MIDI channels left".to_string()))
    }

    pub fn sections(&self) -> &[Section] {
        &self.arrangement.sections
    }

    pub fn variations(&self) -> &[Variation] {
        &self.arrangement.variations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_velocity_applies_accent() {
        let mut n = Note::new(0, 120, 60, 100);
        n.accent = 0.65;
        assert_eq!(n.effective_velocity(), 65);

        n.accent = 2.0;
        assert_eq!(n.effective_velocity(), 127); // clamps high

        n.velocity = 1;
        n.accent = 0.01;
        assert_eq!(n.effective_velocity(), 1); // clamps low
    }

    #[test]
    fn test_note_end() {
        let n = Note::new(480, 240, 60, 100);
        assert_eq!(n.end(), 720);
    }

    #[test]
    fn test_next_free_channel_skips_used() {
        let mut p = Project::new("t", 120);
        p.tracks.push(Track::new("a", 0));
        p.tracks.push(Track::new("b", 1));
        assert_eq!(p.next_free_channel().unwrap(), 2);
    }

    #[test]
    fn test_next_free_channel_exhausted() {
        let mut p = Project::new("t", 120);
        for ch in 0..16 {
            p.tracks.push(Track::new("x", ch));
        }
        assert!(p.next_free_channel().is_err());
    }

    #[test]
    fn test_note_serde_omits_defaults() {
        let n = Note::new(0, 120, 60, 100);
        let v = serde_json::to_value(&n).unwrap();
        let obj = v.as_object().unwrap();
        assert!(!obj.contains_key("role"));
        assert!(!obj.contains_key("chance"));
        assert!(!obj.contains_key("mute"));
        assert!(!obj.contains_key("accent"));
        assert!(!obj.contains_key("glide_ticks"));
    }

    #[test]
    fn test_note_serde_round_trip_with_expression() {
        let mut n = Note::new(10, 20, 0, 90).with_role("snare");
        n.chance = 0.5;
        n.accent = 1.2;
        n.glide_ticks = 30;
        let s = serde_json::to_string(&n).unwrap();
        let back: Note = serde_json::from_str(&s).unwrap();
        assert_eq!(n, back);
    }

    #[test]
    fn test_sampler_mode_serde_names() {
        assert_eq!(
            serde_json::to_string(&SamplerMode::Bass808).unwrap(),
            "\"808\""
        );
        assert_eq!(SamplerMode::parse("DRUMS"), Some(SamplerMode::Drums));
        assert_eq!(SamplerMode::parse("none"), None);
    }
}
