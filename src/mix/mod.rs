//! Mix specification: a loose JSON surface normalized into typed FX records.
//!
//! The persisted `mix` mapping stays schema-loose (unknown keys are ignored,
//! bad numbers fall back to defaults) so external tools can round-trip it.
//! Rendering parses it into the typed views here, and the graph compiler
//! turns those into a deterministic labeled filter graph.

pub mod graph;

use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn f(v: Option<&Value>, default: f64) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.parse().unwrap_or(default),
        _ => default,
    }
}

fn opt_f(v: Option<&Value>) -> Option<f64> {
    match v {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn obj<'a>(v: Option<&'a Value>) -> Option<&'a Map<String, Value>> {
    v.and_then(Value::as_object)
}

/// One peaking EQ band
#[derive(Debug, Clone, PartialEq)]
pub struct EqBand {
    pub freq_hz: f64,
    pub q: f64,
    pub gain_db: f64,
}

impl EqBand {
    fn from_value(v: &Value) -> Option<EqBand> {
        let m = v.as_object()?;
        Some(EqBand {
            freq_hz: f(m.get("f"), 1000.0),
            q: f(m.get("q"), 1.0),
            gain_db: f(m.get("g"), 0.0),
        })
    }
}

/// Noise gate
#[derive(Debug, Clone, PartialEq)]
pub struct Gate {
    pub threshold_db: f64,
    pub release_ms: Option<f64>,
}

/// Downward expander approximated by a two-point dB curve
#[derive(Debug, Clone, PartialEq)]
pub struct Expander {
    pub threshold_db: f64,
    pub ratio: f64,
}

/// Compressor
#[derive(Debug, Clone, PartialEq)]
pub struct Comp {
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
}

impl Comp {
    fn from_map(m: &Map<String, Value>) -> Comp {
        Comp {
            threshold_db: f(m.get("threshold_db"), -18.0),
            ratio: f(m.get("ratio"), 2.0),
            attack_ms: f(m.get("attack_ms"), 5.0),
            release_ms: f(m.get("release_ms"), 50.0),
        }
    }
}

/// Saturation; the wet form (mix/tone present) requires a graph split
#[derive(Debug, Clone, PartialEq)]
pub struct Sat {
    pub kind: String,
    pub drive: f64,
    pub mix: Option<f64>,
    pub tone_hz: Option<f64>,
}

impl Sat {
    pub fn is_wet(&self) -> bool {
        self.mix.is_some() || self.tone_hz.is_some()
    }
}

/// Stereo width (mid 1.0, side scaled)
#[derive(Debug, Clone, PartialEq)]
pub struct Stereo {
    pub width: f64,
}

/// Reverb/delay send amounts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sends {
    pub reverb: f64,
    pub delay: f64,
}

impl Sends {
    pub fn any(&self) -> bool {
        self.reverb > 0.0 || self.delay > 0.0
    }
}

/// Transient shaper amounts, each in [-1, +1]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transient {
    pub attack: f64,
    pub sustain: f64,
}

impl Transient {
    pub fn is_noop(&self) -> bool {
        self.attack.abs() < 1e-6 && self.sustain.abs() < 1e-6
    }
}

/// Limiter ceiling
#[derive(Debug, Clone, PartialEq)]
pub struct Limiter {
    pub limit: f64,
}

/// Per-track FX chain, in processing order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackFx {
    pub gain_db: Option<f64>,
    pub eq: Vec<EqBand>,
    pub highpass_hz: Option<f64>,
    pub lowpass_hz: Option<f64>,
    pub gate: Option<Gate>,
    pub expander: Option<Expander>,
    pub comp: Option<Comp>,
    pub sat: Option<Sat>,
    pub stereo: Option<Stereo>,
    pub sends: Sends,
    pub transient: Option<Transient>,
}

impl TrackFx {
    pub fn from_value(v: &Value) -> TrackFx {
        let Some(m) = v.as_object() else {
            return TrackFx::default();
        };
        let eq = m
            .get("eq")
            .and_then(Value::as_array)
            .map(|bands| bands.iter().filter_map(EqBand::from_value).collect())
            .unwrap_or_default();

        let gate = obj(m.get("gate")).map(|g| Gate {
            threshold_db: f(g.get("threshold_db"), -45.0),
            release_ms: opt_f(g.get("release_ms")),
        });
        let expander = obj(m.get("expander")).map(|e| Expander {
            threshold_db: f(e.get("threshold_db"), -45.0),
            ratio: f(e.get("ratio"), 2.0).max(1.0),
        });
        let comp = obj(m.get("comp")).map(Comp::from_map);
        let sat = obj(m.get("sat")).map(|s| {
            let kind = s
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("tanh")
                .trim()
                .to_lowercase();
            let kind = if matches!(kind.as_str(), "tanh" | "atan" | "cubic" | "clip") {
                kind
            } else {
                "tanh".to_string()
            };
            Sat {
                kind,
                drive: f(s.get("drive"), 1.0),
                mix: opt_f(s.get("mix")).map(|m| m.clamp(0.0, 1.0)),
                tone_hz: opt_f(s.get("tone_hz")),
            }
        });
        let stereo = obj(m.get("stereo")).map(|s| Stereo {
            width: f(s.get("width"), 1.0),
        });
        let sends = obj(m.get("sends"))
            .map(|s| Sends {
                reverb: f(s.get("reverb"), 0.0).max(0.0),
                delay: f(s.get("delay"), 0.0).max(0.0),
            })
            .unwrap_or_default();
        let transient = obj(m.get("transient")).map(|t| Transient {
            attack: f(t.get("attack"), 0.0),
            sustain: f(t.get("sustain"), 0.0),
        });

        TrackFx {
            gain_db: opt_f(m.get("gain_db")),
            eq,
            highpass_hz: opt_f(m.get("highpass_hz")),
            lowpass_hz: opt_f(m.get("lowpass_hz")),
            gate,
            expander,
            comp,
            sat,
            stereo,
            sends,
            transient,
        }
    }
}

/// Bus / master FX subset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusFx {
    pub eq: Vec<EqBand>,
    pub comp: Option<Comp>,
    pub limiter: Option<Limiter>,
    pub mono_below_hz: Option<f64>,
    pub transient: Option<Transient>,
}

impl BusFx {
    pub fn from_value(v: &Value) -> BusFx {
        let Some(m) = v.as_object() else {
            return BusFx::default();
        };
        BusFx {
            eq: m
                .get("eq")
                .and_then(Value::as_array)
                .map(|bands| bands.iter().filter_map(EqBand::from_value).collect())
                .unwrap_or_default(),
            comp: obj(m.get("comp")).map(Comp::from_map),
            limiter: obj(m.get("limiter")).map(|l| Limiter {
                limit: f(l.get("limit"), 0.98),
            }),
            mono_below_hz: opt_f(m.get("mono_below_hz")),
            transient: obj(m.get("transient")).map(|t| Transient {
                attack: f(t.get("attack"), 0.0),
                sustain: f(t.get("sustain"), 0.0),
            }),
        }
    }
}

/// Reverb return parameters (multi-tap echo approximation)
#[derive(Debug, Clone, PartialEq)]
pub struct ReverbReturn {
    pub predelay_ms: f64,
    pub decay: f64,
}

impl Default for ReverbReturn {
    fn default() -> Self {
        Self {
            predelay_ms: 0.0,
            decay: 0.35,
        }
    }
}

/// Delay return parameters (single-tap echo)
#[derive(Debug, Clone, PartialEq)]
pub struct DelayReturn {
    pub ms: f64,
    pub decay: f64,
}

impl Default for DelayReturn {
    fn default() -> Self {
        Self {
            ms: 240.0,
            decay: 0.25,
        }
    }
}

/// Sidechain compression rule
#[derive(Debug, Clone, PartialEq)]
pub struct SidechainRule {
    pub src: usize,
    pub dst: usize,
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
    /// When set, the key is a separately rendered role-only source
    pub src_role: Option<String>,
}

/// Fully parsed view over the loose mix mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MixSpecView {
    pub tracks: BTreeMap<usize, TrackFx>,
    pub busses: BTreeMap<String, BusFx>,
    pub reverb_return: ReverbReturn,
    pub delay_return: DelayReturn,
    pub sidechain: Vec<SidechainRule>,
    pub master: BusFx,
}

impl MixSpecView {
    /// Parse the loose `mix` mapping; unknown keys are ignored and
    /// unparseable values fall back to their documented defaults.
    pub fn from_map(raw: &Map<String, Value>) -> MixSpecView {
        let mut view = MixSpecView::default();

        if let Some(tracks) = obj(raw.get("tracks")) {
            for (k, v) in tracks {
                if let Ok(i) = k.parse::<usize>() {
                    view.tracks.insert(i, TrackFx::from_value(v));
                }
            }
        }

        if let Some(busses) = obj(raw.get("busses")) {
            for (name, v) in busses {
                view.busses
                    .insert(name.trim().to_lowercase(), BusFx::from_value(v));
            }
        }

        if let Some(returns) = obj(raw.get("returns")) {
            if let Some(rev) = obj(returns.get("reverb")) {
                view.reverb_return = ReverbReturn {
                    predelay_ms: f(rev.get("predelay_ms"), 0.0),
                    decay: f(rev.get("decay"), 0.35),
                };
            }
            if let Some(dly) = obj(returns.get("delay")) {
                view.delay_return = DelayReturn {
                    ms: f(dly.get("ms"), 240.0),
                    decay: f(dly.get("decay"), 0.25),
                };
            }
        }

        if let Some(rules) = raw.get("sidechain").and_then(Value::as_array) {
            for r in rules {
                let Some(m) = r.as_object() else { continue };
                let src = f(m.get("src"), -1.0);
                let dst = f(m.get("dst"), -1.0);
                if src < 0.0 || dst < 0.0 {
                    continue;
                }
                view.sidechain.push(SidechainRule {
                    src: src as usize,
                    dst: dst as usize,
                    threshold_db: f(m.get("threshold_db"), -24.0),
                    ratio: f(m.get("ratio"), 6.0),
                    attack_ms: f(m.get("attack_ms"), 5.0),
                    release_ms: f(m.get("release_ms"), 120.0),
                    src_role: m
                        .get("src_role")
                        .and_then(Value::as_str)
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty()),
                });
            }
        }

        if let Some(master) = raw.get("master") {
            view.master = BusFx::from_value(master);
        }

        view
    }

    pub fn is_empty(raw: &Map<String, Value>) -> bool {
        raw.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_track_fx() {
        let raw = as_map(json!({
            "tracks": {
                "0": {
                    "gain_db": -2.0,
                    "eq": [{"f": 300, "q": 1.0, "g": -3.0}],
                    "highpass_hz": 120,
                    "comp": {"threshold_db": -18, "ratio": 2},
                    "sends": {"reverb": 0.15}
                }
            }
        }));
        let view = MixSpecView::from_map(&raw);
        let fx = &view.tracks[&0];
        assert_eq!(fx.gain_db, Some(-2.0));
        assert_eq!(fx.eq.len(), 1);
        assert_eq!(fx.eq[0].freq_hz, 300.0);
        assert_eq!(fx.highpass_hz, Some(120.0));
        let comp = fx.comp.as_ref().unwrap();
        assert_eq!(comp.attack_ms, 5.0); // default filled in
        assert!(fx.sends.any());
        assert_eq!(fx.sends.delay, 0.0);
    }

    #[test]
    fn test_unknown_keys_ignored_and_bad_numbers_default() {
        let raw = as_map(json!({
            "tracks": {"0": {"mystery": true, "gain_db": "not a number"}},
            "wat": 7
        }));
        let view = MixSpecView::from_map(&raw);
        assert_eq!(view.tracks[&0].gain_db, None);
    }

    #[test]
    fn test_parse_sidechain_rules() {
        let raw = as_map(json!({
            "sidechain": [
                {"src": 0, "dst": 1, "threshold_db": -24, "ratio": 6, "src_role": "kick"},
                {"src": -1, "dst": 1},
                "not an object"
            ]
        }));
        let view = MixSpecView::from_map(&raw);
        assert_eq!(view.sidechain.len(), 1);
        let sc = &view.sidechain[0];
        assert_eq!(sc.src, 0);
        assert_eq!(sc.dst, 1);
        assert_eq!(sc.src_role.as_deref(), Some("kick"));
        assert_eq!(sc.attack_ms, 5.0);
        assert_eq!(sc.release_ms, 120.0);
    }

    #[test]
    fn test_parse_returns_and_master() {
        let raw = as_map(json!({
            "returns": {
                "reverb": {"predelay_ms": 10, "decay": 0.4},
                "delay": {"ms": 300, "decay": 0.3}
            },
            "master": {
                "comp": {"threshold_db": -20},
                "limiter": {"limit": 0.95},
                "mono_below_hz": 130
            }
        }));
        let view = MixSpecView::from_map(&raw);
        assert_eq!(view.reverb_return.predelay_ms, 10.0);
        assert_eq!(view.delay_return.ms, 300.0);
        assert_eq!(view.master.mono_below_hz, Some(130.0));
        assert_eq!(view.master.limiter.as_ref().unwrap().limit, 0.95);
    }

    #[test]
    fn test_sat_wet_detection() {
        let raw = as_map(json!({
            "tracks": {
                "0": {"sat": {"type": "tanh", "drive": 1.5}},
                "1": {"sat": {"type": "weird", "drive": 1.5, "mix": 0.5}}
            }
        }));
        let view = MixSpecView::from_map(&raw);
        assert!(!view.tracks[&0].sat.as_ref().unwrap().is_wet());
        let wet = view.tracks[&1].sat.as_ref().unwrap();
        assert!(wet.is_wet());
        assert_eq!(wet.kind, "tanh"); // unknown type normalized
    }
}
