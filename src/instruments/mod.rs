//! Plugin instruments: a capability interface over in-process synth voices.
//!
//! An instrument is resolved by string id from a process-local registry
//! populated at startup. Each implementation exposes named presets (flat
//! parameter maps) and renders a flattened note list for one track straight
//! to a WAV file. All instruments enforce a polyphony cap by discarding
//! notes that would exceed the active-voice count at their start tick.

mod noise_pad;
mod pluck_karplus;
mod synth_basic;

pub use noise_pad::NoisePad;
pub use pluck_karplus::PluckKarplus;
pub use synth_basic::SynthBasic;

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

use crate::error::Result;
use crate::model::{InstrumentSpec, Note, Project};

/// Parameter map for one preset
pub type Params = BTreeMap<String, Value>;

/// The capability interface every built-in instrument implements
pub trait InstrumentPlugin: Send + Sync {
    /// Stable string id, e.g. `"synth.basic"`
    fn id(&self) -> &'static str;

    /// Named presets; `"default"` must exist
    fn presets(&self) -> BTreeMap<&'static str, Params>;

    /// Render `notes` (absolute ticks, chance-gated) for
    /// `project.tracks[track_index]` into a stereo WAV at `sample_rate`.
    fn render(
        &self,
        project: &Project,
        track_index: usize,
        notes: &[Note],
        out_wav: &str,
        sample_rate: u32,
    ) -> Result<()>;
}

lazy_static! {
    static ref REGISTRY: Vec<Box<dyn InstrumentPlugin>> = vec![
        Box::new(SynthBasic),
        Box::new(PluckKarplus),
        Box::new(NoisePad),
    ];
}

/// All registered instruments
pub fn list_instruments() -> Vec<&'static dyn InstrumentPlugin> {
    REGISTRY.iter().map(|b| b.as_ref()).collect()
}

/// Look up an instrument by id
pub fn get_instrument(id: &str) -> Option<&'static dyn InstrumentPlugin> {
    let id = id.trim();
    REGISTRY
        .iter()
        .find(|i| i.id() == id)
        .map(|b| b.as_ref())
}

/// View of a track's instrument spec with preset params resolved:
/// preset values first, then per-track overrides on top.
pub fn resolve_params(plugin: &dyn InstrumentPlugin, spec: Option<&InstrumentSpec>) -> (Params, i64) {
    let presets = plugin.presets();
    let preset_name = spec.map(|s| s.preset.as_str()).unwrap_or("default");
    let mut params = presets
        .get(preset_name)
        .or_else(|| presets.get("default"))
        .cloned()
        .unwrap_or_default();
    let seed = spec.map(|s| s.seed).unwrap_or(0);
    if let Some(s) = spec {
        for (k, v) in &s.params {
            params.insert(k.clone(), v.clone());
        }
    }
    (params, seed)
}

pub(crate) fn param_f32(params: &Params, key: &str, default: f32, lo: f32, hi: f32) -> f32 {
    params
        .get(key)
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .unwrap_or(default)
        .clamp(lo, hi)
}

pub(crate) fn param_usize(params: &Params, key: &str, default: usize, lo: usize, hi: usize) -> usize {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
        .clamp(lo, hi)
}

pub(crate) fn param_str<'a>(params: &'a Params, key: &str, default: &'a str) -> &'a str {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default)
}

/// Drop notes that would exceed `max_polyphony` simultaneous voices at
/// their start tick. Input order does not matter; output is sorted.
pub(crate) fn limit_polyphony(notes: &[Note], max_polyphony: usize) -> Vec<Note> {
    if max_polyphony == 0 {
        return Vec::new();
    }
    let mut sorted: Vec<Note> = notes.to_vec();
    sorted.sort_by_key(Note::order_key);

    let mut out = Vec::new();
    let mut active_ends: Vec<u32> = Vec::new();
    for n in sorted {
        active_ends.retain(|e| *e > n.start);
        if active_ends.len() >= max_polyphony {
            continue;
        }
        active_ends.push(n.end());
        out.push(n);
    }
    out
}

/// Per-note RNG with the stable key `(seed*1_000_003 + start*31 + pitch*131)`
pub(crate) fn note_rng(base_seed: i64, n: &Note) -> StdRng {
    let k = base_seed
        .wrapping_mul(1_000_003)
        .wrapping_add(n.start as i64 * 31)
        .wrapping_add(n.pitch as i64 * 131);
    StdRng::seed_from_u64((k & 0x7FFF_FFFF) as u64)
}

/// Convert a serde_json literal map into [`Params`] (test/preset helper)
pub(crate) fn params_from(pairs: &[(&str, Value)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contains_builtins() {
        let ids: Vec<&str> = list_instruments().iter().map(|i| i.id()).collect();
        assert!(ids.contains(&"synth.basic"));
        assert!(ids.contains(&"pluck.karplus"));
        assert!(ids.contains(&"noise.pad"));
    }

    #[test]
    fn test_get_instrument_by_id() {
        assert!(get_instrument("synth.basic").is_some());
        assert!(get_instrument(" synth.basic ").is_some());
        assert!(get_instrument("no.such").is_none());
    }

    #[test]
    fn test_every_instrument_has_default_preset() {
        for inst in list_instruments() {
            assert!(
                inst.presets().contains_key("default"),
                "{} missing default preset",
                inst.id()
            );
        }
    }

    #[test]
    fn test_resolve_params_overrides_win() {
        let plugin = get_instrument("synth.basic").unwrap();
        let mut spec = InstrumentSpec::new("synth.basic");
        spec.preset = "sub".to_string();
        spec.params
            .insert("drive".to_string(), Value::from(3.0));
        spec.seed = 5;
        let (params, seed) = resolve_params(plugin, Some(&spec));
        assert_eq!(seed, 5);
        assert_eq!(params.get("drive").and_then(Value::as_f64), Some(3.0));
        // preset value still present for untouched keys
        assert_eq!(params.get("wave").and_then(Value::as_str), Some("sine"));
    }

    #[test]
    fn test_limit_polyphony_caps_voices() {
        // 4 overlapping notes, cap 2
        let notes: Vec<Note> = (0..4).map(|i| Note::new(0, 100, 60 + i, 100)).collect();
        let out = limit_polyphony(&notes, 2);
        assert_eq!(out.len(), 2);

        // sequential notes all fit
        let seq: Vec<Note> = (0..4).map(|i| Note::new(i * 200, 100, 60, 100)).collect();
        assert_eq!(limit_polyphony(&seq, 2).len(), 4);
    }

    #[test]
    fn test_note_rng_is_stable() {
        use rand::Rng;
        let n = Note::new(1200, 100, 60, 100);
        let a: f64 = note_rng(7, &n).random();
        let b: f64 = note_rng(7, &n).random();
        assert_eq!(a, b);
        let c: f64 = note_rng(8, &n).random();
        assert_ne!(a, c);
    }
}
