//! Karplus-Strong pluck: a noise-seeded delay line fed back through an
//! averaged two-tap lowpass with damping. Buffer length sets the pitch;
//! `tone` sets the averaging strength, `decay` the damping.

use std::collections::BTreeMap;
use std::f32::consts::PI;

use rand::Rng;
use serde_json::json;

use crate::instruments::{
    limit_polyphony, note_rng, param_f32, param_usize, params_from, InstrumentPlugin, Params,
};
use crate::midi::midi_to_hz;
use crate::model::{Note, Project};
use crate::synth::{sec_per_tick, softclip, StereoBuffer};

pub struct PluckKarplus;

impl InstrumentPlugin for PluckKarplus {
    fn id(&self) -> &'static str {
        "pluck.karplus"
    }

    fn presets(&self) -> BTreeMap<&'static str, Params> {
        let mut m = BTreeMap::new();
        m.insert(
            "default",
            params_from(&[
                ("tone", json!(0.6)),
                ("decay", json!(0.35)),
                ("drive", json!(1.1)),
                ("width", json!(0.8)),
                ("polyphony", json!(8)),
            ]),
        );
        m.insert(
            "guitarish",
            params_from(&[
                ("tone", json!(0.7)),
                ("decay", json!(0.45)),
                ("drive", json!(1.05)),
                ("width", json!(0.7)),
                ("polyphony", json!(8)),
            ]),
        );
        m.insert(
            "koto_dark",
            params_from(&[
                ("tone", json!(0.4)),
                ("decay", json!(0.28)),
                ("drive", json!(1.1)),
                ("width", json!(0.9)),
                ("polyphony", json!(8)),
            ]),
        );
        m.insert(
            "short_bell",
            params_from(&[
                ("tone", json!(0.9)),
                ("decay", json!(0.2)),
                ("drive", json!(1.2)),
                ("width", json!(0.6)),
                ("polyphony", json!(6)),
            ]),
        );
        m.insert(
            "dark_pluck",
            params_from(&[
                ("tone", json!(0.45)),
                ("decay", json!(0.3)),
                ("drive", json!(1.15)),
                ("width", json!(0.75)),
                ("polyphony", json!(6)),
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

        let tone = param_f32(&params, "tone", 0.6, 0.0, 1.0);
        let decay = param_f32(&params, "decay", 0.35, 0.05, 1.0);
        let drive = param_f32(&params, "drive", 1.1, 0.5, 4.0);
        let width = param_f32(&params, "width", 0.8, 0.0, 1.0);
        let max_poly = param_usize(&params, "polyphony", 8, 1, 16);

        let notes = limit_polyphony(notes, max_poly);

        let sr = sample_rate as f32;
        let spt = sec_per_tick(project) as f32;
        let end_tick = notes.iter().map(Note::end).max().unwrap_or(0);
        let tail_s = 0.25 + decay * 0.25;
        let total = (end_tick as f32 * spt * sr).ceil() as usize + (tail_s * sr) as usize + 1;
        let mut buf = StereoBuffer::new(total.max(sample_rate as usize / 2), sample_rate);

        let base_seed = seed + track_index as i64 * 9176;
        let attack_s = ((0.003 * sr) as usize).max(1);
        let release_s = ((0.01 * sr) as usize).max(1);

        for n in &notes {
            let start_s = (n.start as f32 * spt * sr) as usize;
            let dur_s = ((n.duration as f32 * spt * sr) as usize).max(1);
            let total_s = dur_s + release_s;

            let vel = n.effective_velocity() as f32 / 127.0;

            let mut rng = note_rng(base_seed, n);
            let f0 = midi_to_hz(n.pitch).max(1.0);
            let buf_len = ((sr / f0) as usize).max(2);
            let mut line: Vec<f32> = (0..buf_len)
                .map(|_| rng.random_range(-1.0f32..1.0))
                .collect();
            let mut pos = 0usize;

            let damp = 0.90 + decay * 0.08;
            let avg = 0.45 + tone * 0.30;
            let pan = (rng.random::<f32>() * 2.0 - 1.0) * width;
            let angle = (pan + 1.0) * 0.25 * PI;
            let (pan_l, pan_r) = (angle.cos(), angle.sin());

            for i in 0..total_s {
                let y = avg * (line[pos] + line[(pos + 1) % buf_len]);
                line[pos] = y * damp;
                pos = (pos + 1) % buf_len;

                let env = if i < attack_s {
                    i as f32 / attack_s as f32
                } else if i < dur_s {
                    1.0
                } else {
                    (1.0 - (i - dur_s) as f32 / release_s as f32).max(0.0)
                };

                let s = softclip(y, drive) * env * vel * 0.9;

                let idx = start_s + i;
                if idx >= buf.left.len() {
                    break;
                }
                buf.add(idx, s * pan_l, s * pan_r);
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
        let mut p = Project::new("pluck", 120);
        let mut t = Track::new("Pluck", 0);
        let mut spec = InstrumentSpec::new("pluck.karplus");
        spec.seed = 42;
        t.instrument = Some(spec);
        p.tracks.push(t);
        p
    }

    #[test]
    fn test_pluck_renders_decaying_audio() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("p.wav");
        let p = project();
        let notes = vec![Note::new(0, 960, 57, 110)];
        PluckKarplus
            .render(&p, 0, &notes, out.to_str().unwrap(), 44_100)
            .unwrap();
        let (l, _, _) = crate::synth::read_wav_stereo(&out).unwrap();

        // early energy should exceed late energy (string decays)
        let early: f32 = l[0..4410].iter().map(|x| x.abs()).sum();
        let late: f32 = l[l.len() - 4410..].iter().map(|x| x.abs()).sum();
        assert!(early > late, "pluck should decay: {} vs {}", early, late);
    }

    #[test]
    fn test_seeded_output_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        let p = project();
        let notes = vec![Note::new(0, 480, 60, 100), Note::new(480, 480, 62, 100)];
        PluckKarplus
            .render(&p, 0, &notes, a.to_str().unwrap(), 44_100)
            .unwrap();
        PluckKarplus
            .render(&p, 0, &notes, b.to_str().unwrap(), 44_100)
            .unwrap();
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }
}
