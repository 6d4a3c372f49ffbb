//! The renderer: project -> WAV through the built-in engine plus the
//! external SoundFont renderer and media tool.
//!
//! Tracks are classified per render: sampler drums / 808 / plugin
//! instrument / sample pack render in-process; everything else goes through
//! one MIDI file and the SoundFont renderer. With an empty mix spec the
//! per-source WAVs are summed (`amix normalize=0` + limiter); a non-empty
//! spec goes through the compiled filter graph. Temporary files live in a
//! render-scoped directory and are cleaned when it drops.

pub mod drum_mode;
pub mod encode;
pub mod mastering;
pub mod stems;
pub mod transient;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::{ClawError, Result};
use crate::exec;
use crate::midi::{audible_tracks, export_midi};
use crate::mix::graph::compile_mix_graph;
use crate::mix::MixSpecView;
use crate::model::{Project, SamplerMode, Track};
use crate::pipeline::{
    apply_note_chance, flatten_track_notes, note_seed_base, project_song_end_tick,
    slice_project_range, FlattenOptions,
};
use crate::render::drum_mode::{choose_drum_render_mode, convert_sampler_drums_to_gm, DrumMode};
use crate::render::transient::{transient_shaper_wav, TransientSpec};
use crate::synth::{sampler, write_wav_stereo, DEFAULT_SAMPLE_RATE};

/// Renderer options
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub sample_rate: u32,
    pub drum_mode: DrumMode,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            drum_mode: DrumMode::default(),
        }
    }
}

/// How a track is realized at render time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackRenderClass {
    SamplerDrums,
    Sampler808,
    Instrument(String),
    SamplePack,
    Soundfont,
}

/// Classify one track
pub fn classify_track(track: &Track) -> TrackRenderClass {
    if track.sample_pack.is_some() {
        return TrackRenderClass::SamplePack;
    }
    if let Some(spec) = &track.instrument {
        return TrackRenderClass::Instrument(spec.id.clone());
    }
    match track.sampler {
        Some(SamplerMode::Drums) => TrackRenderClass::SamplerDrums,
        Some(SamplerMode::Bass808) => TrackRenderClass::Sampler808,
        None => TrackRenderClass::Soundfont,
    }
}

/// Resolve the render region: loop wins, then the explicit render region,
/// then the whole song.
pub fn render_region(project: &Project) -> (u32, u32) {
    if let (Some(s), Some(e)) = (project.loop_start, project.loop_end) {
        return (s, e);
    }
    if let (Some(s), Some(e)) = (project.render_start, project.render_end) {
        return (s, e);
    }
    (0, project_song_end_tick(project))
}

fn write_silence(path: &Path, sample_rate: u32) -> Result<()> {
    let n = (sample_rate / 2) as usize;
    write_wav_stereo(path, &vec![0.0; n], &vec![0.0; n], sample_rate)
}

/// Render an in-process (non-SoundFont) track to a WAV
fn render_inprocess_track(
    project: &Project,
    track_index: usize,
    out_wav: &Path,
    sample_rate: u32,
) -> Result<()> {
    let track = &project.tracks[track_index];
    match classify_track(track) {
        TrackRenderClass::SamplePack => {
            let mut buf =
                crate::sample_pack::render_sample_pack_track(project, track_index, track, sample_rate)?;
            buf.write_wav(out_wav)
        }
        TrackRenderClass::SamplerDrums | TrackRenderClass::Sampler808 => {
            let mut buf = sampler::render_sampler_track(project, track_index, track, sample_rate)?;
            buf.write_wav(out_wav)
        }
        TrackRenderClass::Instrument(id) => {
            let plugin = crate::instruments::get_instrument(&id)
                .ok_or_else(|| ClawError::Reference(format!("unknown instrument id: {}", id)))?;
            let notes = flatten_track_notes(
                project,
                track_index,
                track,
                FlattenOptions {
                    expand_roles: false,
                    apply_humanize: true,
                },
            );
            let notes = apply_note_chance(notes, note_seed_base(track, track_index, 0));
            plugin.render(
                project,
                track_index,
                &notes,
                out_wav.to_str().unwrap_or_default(),
                sample_rate,
            )
        }
        TrackRenderClass::Soundfont => Err(ClawError::InvalidState(
            "soundfont tracks render through the external renderer".to_string(),
        )),
    }
}

/// Keep only role-matching notes of track `src`, mute everything else.
/// Used to render sidechain key sources.
fn filter_track_to_role(project: &Project, src: usize, role: &str) -> Project {
    let mut p = project.clone();
    for (j, t) in p.tracks.iter_mut().enumerate() {
        t.mute = j != src;
        t.solo = false;
    }

    let keep_pitches: &[u8] = if role == "kick" { &[35, 36] } else { &[] };
    let keep = |n: &crate::model::Note| -> bool {
        if let Some(r) = n.role.as_deref() {
            return r.trim().eq_ignore_ascii_case(role);
        }
        if keep_pitches.is_empty() {
            true
        } else {
            keep_pitches.contains(&n.pitch)
        }
    };

    let t = &mut p.tracks[src];
    t.notes.retain(|n| keep(n));
    for pat in t.patterns.values_mut() {
        pat.notes.retain(|n| keep(n));
    }
    p
}

/// Render a project to a stereo WAV.
///
/// Applies the drum-mode policy, slices to the render region, renders
/// each source, then mixes. Deterministic for the parts the core owns;
/// bit-identity across media-tool versions is not guaranteed.
pub fn render_project_wav(
    project: &Project,
    soundfont: &Path,
    out_wav: &str,
    opts: &RenderOptions,
    mix: Option<&Map<String, Value>>,
) -> Result<String> {
    // Drum-mode policy first, so slicing and stems all see the same tracks.
    let resolved = match opts.drum_mode {
        DrumMode::Gm => convert_sampler_drums_to_gm(project),
        DrumMode::Sampler => project.clone(),
        DrumMode::Auto => {
            let tmp = tempfile::Builder::new().prefix("claw_daw_auto_").tempdir()?;
            let mut n = 0u32;
            let sf = soundfont.to_path_buf();
            let sample_rate = opts.sample_rate;
            let (mode, debug) = choose_drum_render_mode(
                project,
                |p| {
                    n += 1;
                    let wav = tmp.path().join(format!("preview_{}.wav", n));
                    let preview_opts = RenderOptions {
                        sample_rate,
                        drum_mode: DrumMode::Sampler,
                    };
                    render_project_wav(p, &sf, wav.to_str().unwrap_or_default(), &preview_opts, None)
                },
                8,
                6.0,
            );
            log::info!("auto drum mode -> {:?} ({})", mode, debug.reason);
            match mode {
                DrumMode::Gm => convert_sampler_drums_to_gm(project),
                _ => project.clone(),
            }
        }
    };

    let (start, end) = render_region(&resolved);
    let sliced = slice_project_range(&resolved, start, end);

    render_resolved(&sliced, soundfont, out_wav, opts.sample_rate, mix)
}

fn render_resolved(
    project: &Project,
    soundfont: &Path,
    out_wav: &str,
    sample_rate: u32,
    mix: Option<&Map<String, Value>>,
) -> Result<String> {
    let outp = Path::new(out_wav);
    if let Some(parent) = outp.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    match mix.filter(|m| !m.is_empty()) {
        None => render_simple_sum(project, soundfont, outp, sample_rate),
        Some(m) => render_with_mix(project, soundfont, outp, sample_rate, m),
    }
}

/// Default path: one SoundFont render + per-track sampler WAVs, summed with
/// `amix normalize=0` and a 0.98 limiter.
fn render_simple_sum(
    project: &Project,
    soundfont: &Path,
    outp: &Path,
    sample_rate: u32,
) -> Result<String> {
    let tmp = tempfile::Builder::new().prefix("claw_daw_render_").tempdir()?;
    let tdir = tmp.path();

    let audible = audible_tracks(project);
    let soundfont_tracks: BTreeSet<usize> = audible
        .iter()
        .copied()
        .filter(|i| classify_track(&project.tracks[*i]) == TrackRenderClass::Soundfont)
        .collect();

    let fs_wav = tdir.join("soundfont.wav");
    if soundfont_tracks.is_empty() {
        write_silence(&fs_wav, sample_rate)?;
    } else {
        let midi_path = tdir.join("proj.mid");
        export_midi(project, &midi_path, Some(&soundfont_tracks))?;
        exec::fluidsynth_render(&midi_path, soundfont, &fs_wav, sample_rate)?;
    }

    let mut inputs: Vec<PathBuf> = vec![fs_wav];
    for i in audible {
        if classify_track(&project.tracks[i]) == TrackRenderClass::Soundfont {
            continue;
        }
        let w = tdir.join(format!("inproc_{}.wav", i));
        render_inprocess_track(project, i, &w, sample_rate)?;
        inputs.push(w);
    }

    if inputs.len() == 1 {
        std::fs::copy(&inputs[0], outp)?;
        return Ok(outp.to_string_lossy().into_owned());
    }

    let mut args = exec::ffmpeg_base_args();
    for inp in &inputs {
        args.extend(["-i".to_string(), inp.to_string_lossy().into_owned()]);
    }
    args.extend(
        [
            "-filter_complex".to_string(),
            format!("amix=inputs={}:normalize=0,alimiter=limit=0.98", inputs.len()),
            "-ar".to_string(),
            sample_rate.to_string(),
            outp.to_string_lossy().into_owned(),
        ],
    );
    exec::ffmpeg(&args)?;
    Ok(outp.to_string_lossy().into_owned())
}

/// Mix-spec path: per-track stems through the compiled filter graph.
fn render_with_mix(
    project: &Project,
    soundfont: &Path,
    outp: &Path,
    sample_rate: u32,
    mix: &Map<String, Value>,
) -> Result<String> {
    let tmp = tempfile::Builder::new().prefix("claw_daw_mix_").tempdir()?;
    let stems_dir = tmp.path().join("stems");

    let stem_paths = stems::export_stems(project, soundfont, &stems_dir, sample_rate, None)?;
    let view = MixSpecView::from_map(mix);

    // Per-track transient shaping is a pre-pass on the stems.
    for (i, fx) in &view.tracks {
        if let Some(tr) = &fx.transient {
            if tr.is_noop() {
                continue;
            }
            let Some(stem) = stem_paths.get(*i) else { continue };
            let shaped = stem.with_extension("transient.wav");
            transient_shaper_wav(
                stem.to_str().unwrap_or_default(),
                shaped.to_str().unwrap_or_default(),
                &TransientSpec {
                    attack: tr.attack as f32,
                    sustain: tr.sustain as f32,
                },
                sample_rate,
            )?;
            std::fs::rename(&shaped, stem)?;
        }
    }

    let plan = compile_mix_graph(project, &view, stem_paths.len());

    // Role-keyed sidechain sources render as extra inputs.
    let mut key_paths: Vec<PathBuf> = Vec::new();
    for (src, role) in &plan.role_keys {
        let key_proj = filter_track_to_role(project, *src, role);
        let key_wav = stems_dir.join(format!("key_{}_{}.wav", src, role));
        render_resolved(
            &key_proj,
            soundfont,
            key_wav.to_str().unwrap_or_default(),
            sample_rate,
            None,
        )?;
        key_paths.push(key_wav);
    }

    let mut args = exec::ffmpeg_base_args();
    for inp in stem_paths.iter().chain(key_paths.iter()) {
        args.extend(["-i".to_string(), inp.to_string_lossy().into_owned()]);
    }
    args.extend([
        "-filter_complex".to_string(),
        plan.filter_complex.clone(),
        "-map".to_string(),
        format!("[{}]", plan.output_label),
        "-ar".to_string(),
        sample_rate.to_string(),
        outp.to_string_lossy().into_owned(),
    ]);
    exec::ffmpeg(&args)?;

    // Master transient shaping happens on the mixed WAV, before any
    // mastering preset the caller applies next.
    if let Some(tr) = &view.master.transient {
        if !tr.is_noop() {
            let shaped = tmp.path().join("mix_transient.wav");
            transient_shaper_wav(
                outp.to_str().unwrap_or_default(),
                shaped.to_str().unwrap_or_default(),
                &TransientSpec {
                    attack: tr.attack as f32,
                    sustain: tr.sustain as f32,
                },
                sample_rate,
            )?;
            std::fs::rename(&shaped, outp)?;
        }
    }

    Ok(outp.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstrumentSpec, Note, SamplePackSpec};

    #[test]
    fn test_classify_track() {
        let mut t = Track::new("a", 0);
        assert_eq!(classify_track(&t), TrackRenderClass::Soundfont);

        t.sampler = Some(SamplerMode::Drums);
        assert_eq!(classify_track(&t), TrackRenderClass::SamplerDrums);

        t.sampler = Some(SamplerMode::Bass808);
        assert_eq!(classify_track(&t), TrackRenderClass::Sampler808);

        t.instrument = Some(InstrumentSpec::new("synth.basic"));
        assert_eq!(
            classify_track(&t),
            TrackRenderClass::Instrument("synth.basic".to_string())
        );

        // sample pack outranks everything
        t.sample_pack = Some(SamplePackSpec {
            id: Some("p".to_string()),
            path: None,
            seed: 0,
            gain_db: 0.0,
        });
        assert_eq!(classify_track(&t), TrackRenderClass::SamplePack);
    }

    #[test]
    fn test_render_region_priority() {
        let mut p = Project::new("t", 120);
        let mut t = Track::new("a", 0);
        t.notes.push(Note::new(0, 1000, 60, 100));
        p.tracks.push(t);

        assert_eq!(render_region(&p), (0, 1000));

        p.render_start = Some(100);
        p.render_end = Some(500);
        assert_eq!(render_region(&p), (100, 500));

        p.loop_start = Some(0);
        p.loop_end = Some(200);
        assert_eq!(render_region(&p), (0, 200));
    }

    #[test]
    fn test_filter_track_to_role_keeps_kick_only() {
        let mut p = Project::new("t", 120);
        let mut drums = Track::new("Drums", 0);
        drums.notes.push(Note::new(0, 100, 0, 100).with_role("kick"));
        drums.notes.push(Note::new(100, 100, 0, 100).with_role("snare"));
        drums.notes.push(Note::new(200, 100, 36, 100)); // bare kick pitch
        drums.notes.push(Note::new(300, 100, 42, 100)); // bare hat pitch
        p.tracks.push(drums);
        p.tracks.push(Track::new("Bass", 1));

        let filtered = filter_track_to_role(&p, 0, "kick");
        let kept: Vec<u8> = filtered.tracks[0].notes.iter().map(|n| n.pitch).collect();
        assert_eq!(filtered.tracks[0].notes.len(), 2);
        assert!(kept.contains(&36));
        assert!(filtered.tracks[1].mute);
        assert!(!filtered.tracks[0].mute);
    }

    #[test]
    fn test_inprocess_render_writes_sampler_track() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = Project::new("t", 120);
        let mut t = Track::new("Drums", 0);
        t.sampler = Some(SamplerMode::Drums);
        t.notes.push(Note::new(0, 120, 36, 110));
        p.tracks.push(t);

        let out = dir.path().join("drums.wav");
        render_inprocess_track(&p, 0, &out, 44_100).unwrap();
        assert!(out.exists());
    }

    #[test]
    fn test_inprocess_render_rejects_soundfont_track() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = Project::new("t", 120);
        p.tracks.push(Track::new("Keys", 0));
        let out = dir.path().join("x.wav");
        assert!(render_inprocess_track(&p, 0, &out, 44_100).is_err());
    }
}
