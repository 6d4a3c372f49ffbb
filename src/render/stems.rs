//! Per-track stem and per-bus mix export.
//!
//! Stems are rendered by muting every other track and running the full
//! renderer, so SoundFont tracks get real SoundFont stems. Filenames are
//! stable: `<NN>_<track>.wav` and `bus_<name>.wav`, spaces replaced with
//! underscores.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::Result;
use crate::exec;
use crate::mix::{graph::track_fx_chain, TrackFx};
use crate::model::Project;
use crate::render::{render_project_wav, RenderOptions};
use crate::render::drum_mode::DrumMode;

fn solo_copy(project: &Project, keep: usize) -> Project {
    let mut p = project.clone();
    for (j, t) in p.tracks.iter_mut().enumerate() {
        t.mute = j != keep;
        t.solo = false;
    }
    p
}

fn stem_filename(index: usize, name: &str) -> String {
    format!("{:02}_{}.wav", index, name).replace(' ', "_")
}

/// Export one WAV per track into `out_dir`.
///
/// When a mix mapping is provided, each stem gets its *track-level*
/// processing chain (gain/eq/hp/lp/comp/sat/stereo) applied; bus and master
/// processing never touch stems.
pub fn export_stems(
    project: &Project,
    soundfont: &Path,
    out_dir: &Path,
    sample_rate: u32,
    mix: Option<&Map<String, Value>>,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)?;

    let track_fx: BTreeMap<usize, TrackFx> = mix
        .and_then(|m| m.get("tracks"))
        .and_then(Value::as_object)
        .map(|tracks| {
            tracks
                .iter()
                .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, TrackFx::from_value(v))))
                .collect()
        })
        .unwrap_or_default();

    let opts = RenderOptions {
        sample_rate,
        drum_mode: DrumMode::Sampler,
    };

    let mut stems: Vec<PathBuf> = Vec::new();
    for (idx, t) in project.tracks.iter().enumerate() {
        let solo = solo_copy(project, idx);
        let out = out_dir.join(stem_filename(idx, &t.name));
        render_project_wav(&solo, soundfont, out.to_str().unwrap_or_default(), &opts, None)?;

        if let Some(fx) = track_fx.get(&idx) {
            let chain = track_fx_chain(fx);
            if !chain.is_empty() {
                let tmp = out.with_extension("fx.wav");
                let mut args = exec::ffmpeg_base_args();
                args.extend([
                    "-i".to_string(),
                    out.to_string_lossy().into_owned(),
                    "-af".to_string(),
                    chain,
                    tmp.to_string_lossy().into_owned(),
                ]);
                exec::ffmpeg(&args)?;
                std::fs::rename(&tmp, &out)?;
            }
        }

        stems.push(out);
    }

    Ok(stems)
}

/// Bus name for a track: its explicit bus assignment, with a heuristic over
/// the track name when it still carries the default.
pub fn bus_for_track(name: &str, bus: &str) -> String {
    let b = bus.trim().to_lowercase();
    if !b.is_empty() && b != "music" {
        return b;
    }
    let n = name.to_lowercase();
    if n.contains("drum") || n.contains("perc") {
        "drums".to_string()
    } else if n.contains("bass") || n.contains("808") {
        "bass".to_string()
    } else {
        "music".to_string()
    }
}

/// Export one WAV per bus (`bus_<name>.wav`) into `out_dir`, grouping
/// tracks by [`bus_for_track`] and rendering each group in isolation.
pub fn export_busses(
    project: &Project,
    soundfont: &Path,
    out_dir: &Path,
    sample_rate: u32,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir)?;

    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, t) in project.tracks.iter().enumerate() {
        groups
            .entry(bus_for_track(&t.name, &t.bus))
            .or_default()
            .push(i);
    }

    let opts = RenderOptions {
        sample_rate,
        drum_mode: DrumMode::Sampler,
    };

    let mut outs: Vec<PathBuf> = Vec::new();
    for (bus, idxs) in &groups {
        if idxs.is_empty() {
            continue;
        }
        let mut p = project.clone();
        for (j, t) in p.tracks.iter_mut().enumerate() {
            t.mute = !idxs.contains(&j);
            t.solo = false;
        }
        let out = out_dir.join(format!("bus_{}.wav", bus).replace(' ', "_"));
        render_project_wav(&p, soundfont, out.to_str().unwrap_or_default(), &opts, None)?;
        outs.push(out);
    }

    Ok(outs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stem_filename_pattern() {
        assert_eq!(stem_filename(3, "Sub Bass"), "03_Sub_Bass.wav");
        assert_eq!(stem_filename(0, "Drums"), "00_Drums.wav");
    }

    #[test]
    fn test_bus_heuristics() {
        assert_eq!(bus_for_track("Drums", "music"), "drums");
        assert_eq!(bus_for_track("Percussion Loop", "music"), "drums");
        assert_eq!(bus_for_track("808 Sub", "music"), "bass");
        assert_eq!(bus_for_track("Keys", "music"), "music");
        // explicit assignment wins over the name
        assert_eq!(bus_for_track("Drums", "fx"), "fx");
    }

    #[test]
    fn test_solo_copy_mutes_everyone_else() {
        let mut p = Project::new("t", 120);
        for i in 0..3 {
            p.tracks
                .push(crate::model::Track::new(&format!("t{}", i), i as u8));
        }
        p.tracks[2].solo = true;
        let s = solo_copy(&p, 1);
        assert!(s.tracks[0].mute);
        assert!(!s.tracks[1].mute);
        assert!(s.tracks[2].mute);
        assert!(!s.tracks[2].solo);
    }
}
