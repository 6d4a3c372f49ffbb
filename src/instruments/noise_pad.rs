//! Noise pad: stereo-decorrelated noise through a one-pole lowpass with a
//! slow ADSR. `width` crossfades between a shared mono noise source and
//! independent per-channel sources.

use std::collections::BTreeMap;
use std::f32::consts::PI;

use rand::Rng;
use serde_json::json;

use crate::instruments::{
    limit_polyphony, note_rng, param_f32, param_usize, params_from, InstrumentPlugin, Params,
};
use crate::model::{Note, Project};
use crate::synth::{sec_per_tick, softclip, StereoBuffer};

pub struct NoisePad;

impl InstrumentPlugin for NoisePad {
    fn id(&self) -> &'static str {
        "noise.pad"
    }

    fn presets(&self) -> BTreeMap<&'static str, Params> {
        let mut m = BTreeMap::new();
        m.insert(
            "default",
            params_from(&[
                ("attack", json!(0.6)),
                ("decay", json!(0.6)),
                ("sustain", json!(0.7)),
                ("release", json!(0.8)),
                ("tone", json!(0.4)),
                ("drive", json!(1.05)),
                ("width", json!(0.9)),
                ("polyphony", json!(6)),
            ]),
        );
        m.insert(
            "air_pad",
            params_from(&[
                ("attack", json!(0.7)),
                ("decay", json!(0.6)),
                ("sustain", json!(0.75)),
                ("release", json!(0.9)),
                ("tone", json!(0.55)),
                ("drive", json!(1.0)),
                ("width", json!(1.0)),
                ("polyphony", json!(6)),
            ]),
        );
        m.insert(
            "vinyl_hiss_pad",
            params_from(&[
                ("attack", json!(0.2)),
                ("decay", json!(0.5)),
                ("sustain", json!(0.5)),
                ("release", json!(0.7)),
                ("tone", json!(0.25)),
                ("drive", json!(1.1)),
                ("width", json!(0.8)),
                ("polyphony", json!(6)),
            ]),
        );
        m.insert(
            "dark_wind",
            params_from(&[
                ("attack", json!(0.9)),
                ("decay", json!(0.7)),
                ("sustain", json!(0.6)),
                ("release", json!(1.1)),
                ("tone", json!(0.2)),
                ("drive", json!(1.05)),
                ("width", json!(1.1)),
                ("polyphony", json!(5)),
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

        let attack = param_f32(&params, "attack", 0.6, 0.01, 5.0);
        let decay = param_f32(&params, "decay", 0.6, 0.0, 5.0);
        let sustain = param_f32(&params, "sustain", 0.7, 0.0, 1.0);
        let release = param_f32(&params, "release", 0.8, 0.02, 8.0);
        let tone = param_f32(&params, "tone", 0.4, 0.0, 1.0);
        let drive = param_f32(&params, "drive", 1.05, 0.5, 3.0);
        let width = param_f32(&params, "width", 0.9, 0.0, 1.5);
        let max_poly = param_usize(&params, "polyphony", 6, 1, 12);

        let notes = limit_polyphony(notes, max_poly);

        let sr = sample_rate as f32;
        let spt = sec_per_tick(project) as f32;
        let end_tick = notes.iter().map(Note::end).max().unwrap_or(0);
        let total = (end_tick as f32 * spt * sr).ceil() as usize + (release * sr) as usize + 1;
        let mut buf = StereoBuffer::new(total.max(sample_rate as usize / 2), sample_rate);

        let base_seed = seed + track_index as i64 * 9176;
        let cutoff = (200.0 + tone * tone * 9000.0).clamp(120.0, sr * 0.45);
        let alpha = (2.0 * PI * cutoff / sr).min(1.0);

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

            let mut rng_mono = note_rng(base_seed, n);
            let mut rng_l = note_rng(base_seed + 17, n);
            let mut rng_r = note_rng(base_seed + 29, n);
            let mut lp_l = 0.0f32;
            let mut lp_r = 0.0f32;
            let w = width.clamp(0.0, 1.0);

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

                let mono: f32 = rng_mono.random_range(-1.0..1.0);
                let nl: f32 = rng_l.random_range(-1.0..1.0);
                let nr: f32 = rng_r.random_range(-1.0..1.0);
                let s_l = mono * (1.0 - w) + nl * w;
                let s_r = mono * (1.0 - w) + nr * w;

                lp_l += alpha * (s_l - lp_l);
                lp_r += alpha * (s_r - lp_r);

                let out_l = softclip(lp_l, drive) * env * vel * 0.5;
                let out_r = softclip(lp_r, drive) * env * vel * 0.5;

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
        let mut p = Project::new("pad", 120);
        let mut t = Track::new("Pad", 0);
        t.instrument = Some(InstrumentSpec::new("noise.pad"));
        p.tracks.push(t);
        p
    }

    #[test]
    fn test_pad_renders_stereo_decorrelated_audio() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("pad.wav");
        let p = project();
        let notes = vec![Note::new(0, 1920, 48, 100)];
        NoisePad
            .render(&p, 0, &notes, out.to_str().unwrap(), 44_100)
            .unwrap();
        let (l, r, _) = crate::synth::read_wav_stereo(&out).unwrap();
        assert!(l.iter().any(|x| x.abs() > 0.005));
        // decorrelated channels should differ
        assert_ne!(l, r);
    }

    #[test]
    fn test_pad_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        let p = project();
        let notes = vec![Note::new(0, 960, 48, 100)];
        NoisePad
            .render(&p, 0, &notes, a.to_str().unwrap(), 44_100)
            .unwrap();
        NoisePad
            .render(&p, 0, &notes, b.to_str().unwrap(), 44_100)
            .unwrap();
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }
}
