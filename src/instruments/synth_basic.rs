//! Basic subtractive synth: saw/square/sine oscillator with ADSR, a one-pole
//! lowpass set by `tone`, softclip drive, and stereo detune width.

use std::collections::BTreeMap;
use std::f32::consts::PI;

use rand::Rng;
use serde_json::json;

use crate::instruments::{
    limit_polyphony, note_rng, param_f32, param_str, param_usize, params_from, InstrumentPlugin,
    Params,
};
use crate::midi::midi_to_hz;
use crate::model::{Note, Project};
use crate::synth::{sec_per_tick, softclip, StereoBuffer};

pub struct SynthBasic;

impl InstrumentPlugin for SynthBasic {
    fn id(&self) -> &'static str {
        "synth.basic"
    }

    fn presets(&self) -> BTreeMap<&'static str, Params> {
        let mut m = BTreeMap::new();
        m.insert(
            "default",
            params_from(&[
                ("wave", json!("saw")),
                ("attack", json!(0.01)),
                ("decay", json!(0.18)),
                ("sustain", json!(0.6)),
                ("release", json!(0.12)),
                ("tone", json!(0.6)),
                ("drive", json!(1.2)),
                ("width", json!(0.8)),
                ("polyphony", json!(8)),
            ]),
        );
        m.insert(
            "sub",
            params_from(&[
                ("wave", json!("sine")),
                ("attack", json!(0.01)),
                ("decay", json!(0.10)),
                ("sustain", json!(0.7)),
                ("release", json!(0.12)),
                ("tone", json!(0.25)),
                ("drive", json!(1.1)),
                ("width", json!(0.2)),
                ("polyphony", json!(6)),
            ]),
        );
        m.insert(
            "dark_pluck",
            params_from(&[
                ("wave", json!("square")),
                ("attack", json!(0.005)),
                ("decay", json!(0.12)),
                ("sustain", json!(0.2)),
                ("release", json!(0.08)),
                ("tone", json!(0.35)),
                ("drive", json!(1.25)),
                ("width", json!(0.6)),
                ("polyphony", json!(6)),
            ]),
        );
        m.insert(
            "soft_pad",
            params_from(&[
                ("wave", json!("saw")),
                ("attack", json!(0.4)),
                ("decay", json!(0.6)),
                ("sustain", json!(0.7)),
                ("release", json!(0.8)),
                ("tone", json!(0.5)),
                ("drive", json!(1.05)),
                ("width", json!(1.2)),
                ("polyphony", json!(10)),
            ]),
        );
        m.insert(
            "bright_lead",
            params_from(&[
                ("wave", json!("saw")),
                ("attack", json!(0.01)),
                ("decay", json!(0.2)),
                ("sustain", json!(0.7)),
                ("release", json!(0.15)),
                ("tone", json!(0.9)),
                ("drive", json!(1.3)),
                ("width", json!(0.8)),
                ("polyphony", json!(8)),
            ]),
        );
        m
    }

    fn render(
        &self,
        project: &Project,
        track_index: usize,
        notes: &[Note],
        out_wav: &str,
        sample_rate: u32,
    ) -> crate::error::Result<()> {
        let spec = project.tracks[track_index].instrument.as_ref();
        let (params, seed) = crate::instruments::resolve_params(self, spec);

        let wave = param_str(&params, "wave", "saw").to_lowercase();
        let attack = param_f32(&params, "attack", 0.01, 0.005, 5.0);
        let decay = param_f32(&params, "decay", 0.18, 0.0, 5.0);
        let sustain = param_f32(&params, "sustain", 0.6, 0.0, 1.0);
        let release = param_f32(&params, "release", 0.12, 0.005, 5.0);
        let tone = param_f32(&params, "tone", 0.6, 0.0, 1.0);
        let drive = param_f32(&params, "drive", 1.2, 0.5, 4.0);
        let width = param_f32(&params, "width", 0.8, 0.0, 2.0);
        let max_poly = param_usize(&params, "polyphony", 8, 1, 16);

        let notes = limit_polyphony(notes, max_poly);

        let sr = sample_rate as f32;
        let spt = sec_per_tick(project) as f32;
        let end_tick = notes.iter().map(Note::end).max().unwrap_or(0);
        let total = (end_tick as f32 * spt * sr).ceil() as usize + (release * sr) as usize + 1;
        let mut buf = StereoBuffer::new(total.max(sample_rate as usize / 2), sample_rate);

        let base_seed = seed + track_index as i64 * 9176;

        for n in &notes {
            let start_s = (n.start as f32 * spt * sr) as usize;
            let dur_s = ((n.duration as f32 * spt * sr) as usize).max(1);
            let rel_s = ((release * sr) as usize).max(1);
            let total_s = dur_s + rel_s;

            let mut atk_s = ((attack * sr) as usize).max(1);
            let mut dec_s = if decay > 0.0 { ((decay * sr) as usize).max(1) } else { 0 };
            if dur_s < atk_s + dec_s {
                let scale = dur_s as f32 / (atk_s + dec_s).max(1) as f32;
                atk_s = ((atk_s as f32 * scale) as usize).max(1);
                dec_s = dur_s.saturating_sub(atk_s);
            }

            let vel = n.effective_velocity() as f32 / 127.0;

            let mut rng = note_rng(base_seed, n);
            let mut phase_l: f32 = rng.random::<f32>() * 2.0 * PI;
            let mut phase_r: f32 = rng.random::<f32>() * 2.0 * PI;

            let detune_cents = width * 6.0;
            let detune = if detune_cents > 0.0 {
                2f32.powf(detune_cents / 1200.0)
            } else {
                1.0
            };

            let f0 = midi_to_hz(n.pitch);
            let inc_l = 2.0 * PI * f0 / sr;
            let inc_r = 2.0 * PI * f0 * detune / sr;

            let cutoff = (200.0 + tone * tone * 12000.0).clamp(80.0, sr * 0.45);
            let alpha = (2.0 * PI * cutoff / sr).min(1.0);
            let mut lp_l = 0.0f32;
            let mut lp_r = 0.0f32;

            for i in 0..total_s {
                let env = if i < atk_s {
                    i as f32 / atk_s as f32
                } else if i < atk_s + dec_s {
                    1.0 - (1.0 - sustain) * ((i - atk_s) as f32 / dec_s.max(1) as f32)
                } else if i < dur_s {
                    sustain
                } else {
                    sustain * (1.0 - (i - dur_s) as f32 / rel_s as f32).max(0.0)
                };

                phase_l += inc_l;
                phase_r += inc_r;

                let (s_l, s_r) = match wave.as_str() {
                    "sine" => (phase_l.sin(), phase_r.sin()),
                    "square" => (
                        if phase_l.sin() >= 0.0 { 1.0 } else { -1.0 },
                        if phase_r.sin() >= 0.0 { 1.0 } else { -1.0 },
                    ),
                    _ => {
                        let saw = |p: f32| {
                            let cycles = p / (2.0 * PI);
                            2.0 * (cycles - (cycles + 0.5).floor())
                        };
                        (saw(phase_l), saw(phase_r))
                    }
                };

                lp_l += alpha * (s_l - lp_l);
                lp_r += alpha * (s_r - lp_r);

                let out_l = softclip(lp_l, drive) * env * vel * 0.9;
                let out_r = softclip(lp_r, drive) * env * vel * 0.9;

                let idx = start_s + i;
                if idx >= buf.left.len() {
                    break;
                }
                buf.add(idx, out_l, out_r);
            }
        }

        buf.write_wav(out_wav)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstrumentSpec, Track};

    fn project() -> Project {
        let mut p = Project::new("synth", 120);
        let mut t = Track::new("Keys", 0);
        t.instrument = Some(InstrumentSpec::new("synth.basic"));
        p.tracks.push(t);
        p
    }

    #[test]
    fn test_render_writes_limited_wav() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("s.wav");
        let p = project();
        let notes = vec![Note::new(0, 480, 60, 110), Note::new(480, 480, 64, 110)];
        SynthBasic
            .render(&p, 0, &notes, out.to_str().unwrap(), 44_100)
            .unwrap();
        let (l, r, _) = crate::synth::read_wav_stereo(&out).unwrap();
        let peak = l
            .iter()
            .chain(r.iter())
            .fold(0f32, |a, x| a.max(x.abs()));
        assert!(peak > 0.01, "should produce audio");
        assert!(peak <= 1.0, "limiter invariant");
    }

    #[test]
    fn test_render_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        let p = project();
        let notes = vec![Note::new(0, 480, 57, 100)];
        SynthBasic
            .render(&p, 0, &notes, a.to_str().unwrap(), 44_100)
            .unwrap();
        SynthBasic
            .render(&p, 0, &notes, b.to_str().unwrap(), 44_100)
            .unwrap();
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }

    #[test]
    fn test_empty_notes_still_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("empty.wav");
        let p = project();
        SynthBasic
            .render(&p, 0, &[], out.to_str().unwrap(), 44_100)
            .unwrap();
        assert!(out.exists());
    }
}
