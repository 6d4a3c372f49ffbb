//! Mix graph compilation: MixSpec -> deterministic labeled filter graph.
//!
//! The graph is built as an immutable value (nodes own their input/output
//! labels) and serialized in one walk, so the emitted string is bit-identical
//! for identical inputs. Label order follows tracks by index, busses by
//! sorted name, sends reverb before delay.

use std::collections::BTreeMap;

use crate::mix::{BusFx, MixSpecView, Sat, SidechainRule, TrackFx};
use crate::model::Project;

/// One node: zero or more input labels, a filter chain, output labels
#[derive(Debug, Clone, PartialEq)]
struct GraphNode {
    inputs: Vec<String>,
    filters: String,
    outputs: Vec<String>,
}

/// A labeled filter graph under construction
#[derive(Debug, Default)]
pub struct FilterGraph {
    nodes: Vec<GraphNode>,
}

impl FilterGraph {
    fn push<I: AsRef<str>, O: AsRef<str>>(
        &mut self,
        inputs: &[I],
        filters: impl Into<String>,
        outputs: &[O],
    ) {
        self.nodes.push(GraphNode {
            inputs: inputs.iter().map(|s| s.as_ref().to_string()).collect(),
            filters: filters.into(),
            outputs: outputs.iter().map(|s| s.as_ref().to_string()).collect(),
        });
    }

    /// Serialize to the external media tool's filter_complex syntax
    pub fn render(&self) -> String {
        self.nodes
            .iter()
            .map(|n| {
                let ins: String = n.inputs.iter().map(|l| format!("[{}]", l)).collect();
                let outs: String = n.outputs.iter().map(|l| format!("[{}]", l)).collect();
                format!("{}{}{}", ins, n.filters, outs)
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// The compiled plan: the graph string plus the extra role-key inputs the
/// renderer must supply (in order, appended after the stem inputs).
#[derive(Debug, Clone, PartialEq)]
pub struct MixGraphPlan {
    pub filter_complex: String,
    pub output_label: String,
    /// (source track index, role) pairs, in input order
    pub role_keys: Vec<(usize, String)>,
}

fn num(v: f64) -> String {
    // trims trailing zeros deterministically (1.5 -> "1.5", 120.0 -> "120")
    format!("{}", v)
}

/// Comma-chain for a single track's inline FX (everything except wet
/// saturation, sends and sidechain, which need graph splits).
pub fn track_fx_chain(fx: &TrackFx) -> String {
    let mut chain: Vec<String> = Vec::new();

    if let Some(gain) = fx.gain_db {
        chain.push(format!("volume={}dB", num(gain)));
    }
    for b in &fx.eq {
        chain.push(format!(
            "equalizer=f={}:t=q:width_type=q:width={}:g={}",
            num(b.freq_hz),
            num(b.q),
            num(b.gain_db)
        ));
    }
    if let Some(hp) = fx.highpass_hz {
        chain.push(format!("highpass=f={}", num(hp)));
    }
    if let Some(lp) = fx.lowpass_hz {
        chain.push(format!("lowpass=f={}", num(lp)));
    }
    if let Some(gate) = &fx.gate {
        let mut args = vec![format!("threshold={}dB", num(gate.threshold_db))];
        if let Some(rel) = gate.release_ms {
            args.push(format!("release={}", num(rel)));
        }
        chain.push(format!("agate={}", args.join(":")));
    }
    if let Some(exp) = &fx.expander {
        // crude downward expander curve
        chain.push(format!(
            "compand=points=-90/-90|{}/{}|0/{}",
            num(exp.threshold_db),
            num(exp.threshold_db),
            num(0.0 / exp.ratio)
        ));
    }
    if let Some(comp) = &fx.comp {
        chain.push(format!(
            "acompressor=threshold={}dB:ratio={}:attack={}:release={}",
            num(comp.threshold_db),
            num(comp.ratio),
            num(comp.attack_ms),
            num(comp.release_ms)
        ));
    }
    if let Some(sat) = &fx.sat {
        if !sat.is_wet() {
            if (sat.drive - 1.0).abs() > 1e-6 {
                chain.push(format!("volume={}", num(sat.drive)));
            }
            chain.push(format!("asoftclip=type={}", sat.kind));
        }
    }
    if let Some(stereo) = &fx.stereo {
        if (stereo.width - 1.0).abs() > 1e-6 {
            chain.push(format!("stereotools=mlev=1.0:slev={}", num(stereo.width)));
        }
    }

    chain.join(",")
}

/// Comma-chain for bus/master FX (EQ, comp, limiter)
pub fn bus_fx_chain(fx: &BusFx) -> String {
    let mut chain: Vec<String> = Vec::new();
    for b in &fx.eq {
        chain.push(format!(
            "equalizer=f={}:t=q:width_type=q:width={}:g={}",
            num(b.freq_hz),
            num(b.q),
            num(b.gain_db)
        ));
    }
    if let Some(comp) = &fx.comp {
        chain.push(format!(
            "acompressor=threshold={}dB:ratio={}:attack={}:release={}",
            num(comp.threshold_db),
            num(comp.ratio),
            num(comp.attack_ms),
            num(comp.release_ms)
        ));
    }
    if let Some(lim) = &fx.limiter {
        chain.push(format!("alimiter=limit={}", num(lim.limit)));
    }
    chain.join(",")
}

/// Labeled snippet that mono-sums the band below `hz`, as a set of nodes
/// `[in] -> [out]`. Labels are prefixed for uniqueness.
fn push_mono_below(graph: &mut FilterGraph, input: &str, output: &str, hz: f64, prefix: &str) {
    let hz = hz.max(20.0);
    let lo = format!("{}_lo", prefix);
    let hi = format!("{}_hi", prefix);
    let lo_m = format!("{}_lom", prefix);
    let hi_f = format!("{}_hif", prefix);
    graph.push(&[input], "asplit=2", &[&lo, &hi]);
    graph.push(
        &[&lo],
        format!(
            "lowpass=f={},pan=mono|c0=0.5*c0+0.5*c1,pan=stereo|c0=c0|c1=c0",
            num(hz)
        ),
        &[&lo_m],
    );
    graph.push(&[&hi], format!("highpass=f={}", num(hz)), &[&hi_f]);
    graph.push(&[&lo_m, &hi_f], "amix=inputs=2:normalize=0", &[output]);
}

/// Role-key requests implied by a spec's sidechain rules, deduplicated in
/// deterministic (src, role) order. The renderer turns each into an extra
/// key WAV input.
pub fn role_key_requests(view: &MixSpecView, n_stems: usize) -> Vec<(usize, String)> {
    let mut set: Vec<(usize, String)> = Vec::new();
    for sc in valid_rules(view, n_stems).values() {
        if let Some(role) = &sc.src_role {
            let key = (sc.src, role.clone());
            if !set.contains(&key) {
                set.push(key);
            }
        }
    }
    set.sort();
    set
}

/// Only one rule per destination is supported; later rules override earlier.
fn valid_rules(view: &MixSpecView, n_stems: usize) -> BTreeMap<usize, SidechainRule> {
    let mut by_dst: BTreeMap<usize, SidechainRule> = BTreeMap::new();
    for sc in &view.sidechain {
        if sc.src < n_stems && sc.dst < n_stems {
            by_dst.insert(sc.dst, sc.clone());
        }
    }
    by_dst
}

fn push_wet_sat(graph: &mut FilterGraph, base: &str, i: usize, sat: &Sat) -> String {
    let dry = format!("sat{}_dry", i);
    let wet = format!("sat{}_wet", i);
    let wet2 = format!("sat{}_wet2", i);
    let dryv = format!("sat{}_dryv", i);
    let wetv = format!("sat{}_wetv", i);
    let out = format!("t{}_sat", i);

    graph.push(&[base], "asplit=2", &[&dry, &wet]);

    let mut wet_chain: Vec<String> = Vec::new();
    if (sat.drive - 1.0).abs() > 1e-6 {
        wet_chain.push(format!("volume={}", num(sat.drive)));
    }
    if let Some(tone) = sat.tone_hz {
        wet_chain.push(format!("lowpass=f={}", num(tone)));
    }
    wet_chain.push(format!("asoftclip=type={}", sat.kind));
    graph.push(&[&wet], wet_chain.join(","), &[&wet2]);

    let mix = sat.mix.unwrap_or(1.0);
    graph.push(&[&dry], format!("volume={}", num(1.0 - mix)), &[&dryv]);
    graph.push(&[&wet2], format!("volume={}", num(mix)), &[&wetv]);
    graph.push(&[&dryv, &wetv], "amix=inputs=2:normalize=0", &[&out]);
    out
}

/// Compile the full mix graph for a project's stems.
///
/// `n_stems` inputs `[0:a]..[n-1:a]` are the per-track stems in track
/// order; role-key inputs (from [`role_key_requests`]) follow.
pub fn compile_mix_graph(project: &Project, view: &MixSpecView, n_stems: usize) -> MixGraphPlan {
    let mut graph = FilterGraph::default();

    // Per-track chains.
    let mut labels: BTreeMap<usize, String> = BTreeMap::new();
    for i in 0..n_stems {
        let fx = view.tracks.get(&i).cloned().unwrap_or_default();
        let chain = track_fx_chain(&fx);
        let out = format!("t{}", i);
        let input = format!("{}:a", i);
        if chain.is_empty() {
            graph.push(&[&input], "anull", &[&out]);
        } else {
            graph.push(&[&input], chain, &[&out]);
        }
        labels.insert(i, out.clone());

        if let Some(sat) = fx.sat.as_ref().filter(|s| s.is_wet()) {
            let new_label = push_wet_sat(&mut graph, &out, i, sat);
            labels.insert(i, new_label);
        }
    }

    // Sidechain rules, one per destination.
    let rules = valid_rules(view, n_stems);
    let role_keys = role_key_requests(view, n_stems);
    let role_key_input: BTreeMap<(usize, String), usize> = role_keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.clone(), n_stems + i))
        .collect();

    // A src used as a key without an external role input must be split so
    // the dry path stays audible.
    let mut key_labels: BTreeMap<usize, String> = BTreeMap::new();
    let mut split_srcs: Vec<usize> = rules
        .values()
        .filter(|sc| {
            sc.src_role
                .as_ref()
                .map(|r| !role_key_input.contains_key(&(sc.src, r.clone())))
                .unwrap_or(true)
        })
        .map(|sc| sc.src)
        .collect();
    split_srcs.sort_unstable();
    split_srcs.dedup();
    for src in split_srcs {
        let base = labels[&src].clone();
        let dry = format!("{}_dry", base);
        let key = format!("{}_key", base);
        graph.push(&[&base], "asplit=2", &[&dry, &key]);
        labels.insert(src, dry);
        key_labels.insert(src, key);
    }

    for (dst, sc) in &rules {
        let main_lbl = labels[dst].clone();
        let key_lbl = match &sc.src_role {
            Some(role) if role_key_input.contains_key(&(sc.src, role.clone())) => {
                let in_idx = role_key_input[&(sc.src, role.clone())];
                let lbl = format!("key_{}_{}", sc.src, role);
                // emphasize lows for the kick key
                let filt = if role == "kick" { "lowpass=f=140" } else { "anull" };
                graph.push(&[&format!("{}:a", in_idx)], filt, &[&lbl]);
                lbl
            }
            _ => key_labels
                .get(&sc.src)
                .cloned()
                .unwrap_or_else(|| labels[&sc.src].clone()),
        };

        let out = format!("t{}_sc", dst);
        graph.push(
            &[&main_lbl, &key_lbl],
            format!(
                "sidechaincompress=threshold={}dB:ratio={}:attack={}:release={}",
                num(sc.threshold_db),
                num(sc.ratio),
                num(sc.attack_ms),
                num(sc.release_ms)
            ),
            &[&out],
        );
        labels.insert(*dst, out);
    }

    // Sends/returns: split dry + taps per track, reverb before delay.
    let mut drys: Vec<String> = Vec::new();
    let mut send_reverb: Vec<String> = Vec::new();
    let mut send_delay: Vec<String> = Vec::new();
    for i in 0..n_stems {
        let fx = view.tracks.get(&i).cloned().unwrap_or_default();
        let base = labels[&i].clone();
        if fx.sends.any() {
            let dry = format!("dry{}", i);
            let mut outs = vec![dry.clone()];
            if fx.sends.reverb > 0.0 {
                outs.push(format!("tapR{}", i));
            }
            if fx.sends.delay > 0.0 {
                outs.push(format!("tapD{}", i));
            }
            let outs_ref: Vec<&str> = outs.iter().map(String::as_str).collect();
            graph.push(&[&base], format!("asplit={}", outs.len()), &outs_ref);
            drys.push(dry);
            if fx.sends.reverb > 0.0 {
                let sr = format!("sr{}", i);
                graph.push(
                    &[&format!("tapR{}", i)],
                    format!("volume={}", num(fx.sends.reverb)),
                    &[&sr],
                );
                send_reverb.push(sr);
            }
            if fx.sends.delay > 0.0 {
                let sd = format!("sd{}", i);
                graph.push(
                    &[&format!("tapD{}", i)],
                    format!("volume={}", num(fx.sends.delay)),
                    &[&sd],
                );
                send_delay.push(sd);
            }
        } else {
            drys.push(base);
        }
    }

    let mut ret_streams: Vec<String> = Vec::new();
    if !send_reverb.is_empty() {
        let rev = &view.reverb_return;
        let ms1 = (30.0 + rev.predelay_ms).max(1.0);
        let ms2 = (70.0 + rev.predelay_ms).max(1.0);
        let ins: Vec<&str> = send_reverb.iter().map(String::as_str).collect();
        graph.push(
            &ins,
            format!(
                "amix=inputs={}:normalize=0,aecho=0.8:0.9:{}|{}:{}|{}",
                send_reverb.len(),
                num(ms1),
                num(ms2),
                num(rev.decay),
                num((rev.decay * 0.7).max(0.05))
            ),
            &["rev"],
        );
        ret_streams.push("rev".to_string());
    }
    if !send_delay.is_empty() {
        let dly = &view.delay_return;
        let ins: Vec<&str> = send_delay.iter().map(String::as_str).collect();
        graph.push(
            &ins,
            format!(
                "amix=inputs={}:normalize=0,aecho=0.8:0.9:{}:{}",
                send_delay.len(),
                num(dly.ms),
                num(dly.decay)
            ),
            &["dly"],
        );
        ret_streams.push("dly".to_string());
    }

    // Bus routing: group dry streams by Track.bus (sorted names).
    let mut bus_members: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (i, dry) in drys.iter().enumerate() {
        let bus = project
            .tracks
            .get(i)
            .map(|t| t.bus.trim().to_lowercase())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| "music".to_string());
        bus_members.entry(bus).or_default().push(dry.clone());
    }

    let mut bus_outs: Vec<String> = Vec::new();
    for (bus, members) in &bus_members {
        let mut lbl = format!("bus_{}", bus);
        let ins: Vec<&str> = members.iter().map(String::as_str).collect();
        graph.push(
            &ins,
            format!("amix=inputs={}:normalize=0", members.len()),
            &[&lbl],
        );

        let fx = view.busses.get(bus).cloned().unwrap_or_default();
        if let Some(hz) = fx.mono_below_hz {
            let out = format!("{}_mono", lbl);
            let prefix = format!("mb_{}", bus);
            push_mono_below(&mut graph, &lbl.clone(), &out, hz, &prefix);
            lbl = out;
        }
        let chain = bus_fx_chain(&fx);
        if !chain.is_empty() {
            let out = format!("{}_fx", lbl);
            graph.push(&[&lbl.clone()], chain, &[&out]);
            lbl = out;
        }
        bus_outs.push(lbl);
    }

    // Sum busses + returns.
    let mix_inputs: Vec<String> = if bus_outs.is_empty() {
        drys.iter().cloned().chain(ret_streams.clone()).collect()
    } else {
        bus_outs.iter().cloned().chain(ret_streams.clone()).collect()
    };
    let ins: Vec<&str> = mix_inputs.iter().map(String::as_str).collect();
    graph.push(
        &ins,
        format!("amix=inputs={}:normalize=0", mix_inputs.len()),
        &["mix"],
    );

    // Master: mono-below, chain, safety limiter.
    let mut base = "mix".to_string();
    if let Some(hz) = view.master.mono_below_hz {
        push_mono_below(&mut graph, &base, "mix_mono", hz, "mb_m");
        base = "mix_mono".to_string();
    }
    let mchain = bus_fx_chain(&view.master);
    if !mchain.is_empty() {
        graph.push(&[&base], mchain, &["mix2"]);
        base = "mix2".to_string();
    }
    graph.push(&[&base], "alimiter=limit=0.98", &["out"]);

    MixGraphPlan {
        filter_complex: graph.render(),
        output_label: "out".to_string(),
        role_keys,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Project, Track};
    use serde_json::json;

    fn project(busses: &[&str]) -> Project {
        let mut p = Project::new("mix", 120);
        for (i, b) in busses.iter().enumerate() {
            let mut t = Track::new(&format!("t{}", i), i as u8);
            t.bus = b.to_string();
            p.tracks.push(t);
        }
        p
    }

    fn view(v: serde_json::Value) -> MixSpecView {
        MixSpecView::from_map(v.as_object().unwrap())
    }

    #[test]
    fn test_track_chain_order() {
        let fx = TrackFx::from_value(&json!({
            "gain_db": -2,
            "eq": [{"f": 300, "q": 1, "g": -3}],
            "highpass_hz": 100,
            "lowpass_hz": 12000,
            "comp": {"threshold_db": -18, "ratio": 2},
            "sat": {"type": "tanh", "drive": 1.5},
            "stereo": {"width": 1.2}
        }));
        let chain = track_fx_chain(&fx);
        let positions: Vec<usize> = [
            "volume=-2dB",
            "equalizer=",
            "highpass=",
            "lowpass=",
            "acompressor=",
            "volume=1.5",
            "asoftclip=",
            "stereotools=",
        ]
        .iter()
        .map(|s| chain.find(s).unwrap_or_else(|| panic!("missing {}", s)))
        .collect();
        for w in positions.windows(2) {
            assert!(w[0] < w[1], "chain out of order: {}", chain);
        }
    }

    #[test]
    fn test_empty_spec_produces_anull_passthrough() {
        let p = project(&["music", "music"]);
        let plan = compile_mix_graph(&p, &MixSpecView::default(), 2);
        assert!(plan.filter_complex.contains("[0:a]anull[t0]"));
        assert!(plan.filter_complex.contains("[1:a]anull[t1]"));
        assert!(plan.filter_complex.ends_with("alimiter=limit=0.98[out]"));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let p = project(&["drums", "bass", "music"]);
        let v = view(json!({
            "tracks": {
                "0": {"comp": {"threshold_db": -20}},
                "2": {"sends": {"reverb": 0.2, "delay": 0.1}}
            },
            "busses": {"bass": {"mono_below_hz": 130}, "music": {"comp": {"threshold_db": -18}}},
            "sidechain": [{"src": 0, "dst": 1}],
            "master": {"mono_below_hz": 120, "limiter": {"limit": 0.98}}
        }));
        let a = compile_mix_graph(&p, &v, 3);
        let b = compile_mix_graph(&p, &v, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_sidechain_without_role_splits_source() {
        let p = project(&["drums", "bass"]);
        let v = view(json!({"sidechain": [{"src": 0, "dst": 1}]}));
        let plan = compile_mix_graph(&p, &v, 2);
        assert!(plan.filter_complex.contains("[t0]asplit=2[t0_dry][t0_key]"));
        assert!(plan
            .filter_complex
            .contains("[t1][t0_key]sidechaincompress="));
        assert!(plan.role_keys.is_empty());
    }

    #[test]
    fn test_sidechain_with_role_uses_extra_input() {
        let p = project(&["drums", "bass"]);
        let v = view(json!({
            "sidechain": [{"src": 0, "dst": 1, "src_role": "kick"}]
        }));
        let plan = compile_mix_graph(&p, &v, 2);
        assert_eq!(plan.role_keys, vec![(0, "kick".to_string())]);
        // key comes from input 2 with the kick lowpass, no asplit of t0
        assert!(plan.filter_complex.contains("[2:a]lowpass=f=140[key_0_kick]"));
        assert!(!plan.filter_complex.contains("[t0]asplit"));
        assert!(plan
            .filter_complex
            .contains("[t1][key_0_kick]sidechaincompress="));
    }

    #[test]
    fn test_sends_split_and_returns() {
        let p = project(&["music"]);
        let v = view(json!({
            "tracks": {"0": {"sends": {"reverb": 0.15, "delay": 0.08}}}
        }));
        let plan = compile_mix_graph(&p, &v, 1);
        let fc = &plan.filter_complex;
        assert!(fc.contains("[t0]asplit=3[dry0][tapR0][tapD0]"));
        assert!(fc.contains("[tapR0]volume=0.15[sr0]"));
        assert!(fc.contains("aecho=0.8:0.9:30|70:")); // reverb multi-tap
        assert!(fc.contains("aecho=0.8:0.9:240:0.25[dly]")); // delay single tap
        // returns summed into the mix
        assert!(fc.contains("[bus_music][rev][dly]amix=inputs=3:normalize=0[mix]"));
    }

    #[test]
    fn test_busses_sorted_and_mono_below() {
        let p = project(&["music", "drums", "bass"]);
        let v = view(json!({"busses": {"bass": {"mono_below_hz": 130}}}));
        let plan = compile_mix_graph(&p, &v, 3);
        let fc = &plan.filter_complex;
        let bass = fc.find("[bus_bass]").unwrap();
        let drums = fc.find("[bus_drums]").unwrap();
        let music = fc.find("[bus_music]").unwrap();
        assert!(bass < drums && drums < music, "busses must sort by name");
        assert!(fc.contains("[bus_bass]asplit=2[mb_bass_lo][mb_bass_hi]"));
        assert!(fc.contains("pan=mono|c0=0.5*c0+0.5*c1"));
    }

    #[test]
    fn test_all_labels_unique() {
        let p = project(&["drums", "bass", "music", "music"]);
        let v = view(json!({
            "tracks": {
                "0": {"sat": {"drive": 1.4, "mix": 0.6, "tone_hz": 9000}},
                "2": {"sends": {"reverb": 0.2}},
                "3": {"sends": {"delay": 0.1}}
            },
            "busses": {"bass": {"mono_below_hz": 130}},
            "sidechain": [{"src": 0, "dst": 1}],
            "master": {"mono_below_hz": 120}
        }));
        let plan = compile_mix_graph(&p, &v, 4);
        // every produced (output) label must be unique
        let mut outputs: Vec<&str> = Vec::new();
        for part in plan.filter_complex.split(';') {
            let mut rest = part;
            while let Some(open) = rest.rfind('[') {
                let close = rest[open..].find(']').map(|c| open + c);
                let Some(close) = close else { break };
                if close == rest.len() - 1 {
                    outputs.push(&rest[open + 1..close]);
                    rest = &rest[..open];
                } else {
                    break;
                }
            }
        }
        let mut sorted = outputs.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), outputs.len(), "duplicate labels: {:?}", outputs);
    }

    #[test]
    fn test_master_chain_and_safety_limiter() {
        let p = project(&["music"]);
        let v = view(json!({
            "master": {
                "eq": [{"f": 9000, "q": 0.7, "g": 1.5}],
                "comp": {"threshold_db": -20, "ratio": 2.5},
                "limiter": {"limit": 0.95}
            }
        }));
        let plan = compile_mix_graph(&p, &v, 1);
        let fc = &plan.filter_complex;
        assert!(fc.contains("[mix]equalizer=f=9000"));
        assert!(fc.contains("alimiter=limit=0.95[mix2]"));
        assert!(fc.ends_with("[mix2]alimiter=limit=0.98[out]"));
    }
}
