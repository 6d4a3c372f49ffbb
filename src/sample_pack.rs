//! Sample-pack player: role-tagged WAV one-shots for drum tracks.
//!
//! A pack is a JSON manifest mapping canonical drum roles to weighted sample
//! entries under a filesystem root. Packs are built by scanning a directory
//! and classifying filenames into roles. At render time each note selects a
//! weighted variant with a stable per-note RNG, the sample is loaded (PCM or
//! float WAV), linearly resampled to the project rate, edge-faded, cached by
//! path for the duration of the render, and mixed in under a 16-voice
//! polyphony cap and a 0.98 peak limiter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::sample_packs_dir;
use crate::drumkit::{normalize_role, role_from_pitch};
use crate::error::{ClawError, Result};
use crate::model::{Note, Project, SamplePackSpec, Track};
use crate::pipeline::{apply_note_chance, flatten_track_notes, note_seed_base, FlattenOptions};
use crate::synth::{
    apply_edge_fades, db_to_gain, read_wav_stereo, resample_linear, sec_per_tick, StereoBuffer,
};

const MAX_POLYPHONY: usize = 16;

/// One weighted sample file within a pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEntry {
    /// Relative to the pack root
    pub path: String,
    #[serde(default)]
    pub gain_db: f32,
    #[serde(default = "default_weight")]
    pub weight: f32,
}

fn default_weight() -> f32 {
    1.0
}

/// A scanned/loaded sample pack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePack {
    pub id: String,
    pub root: String,
    pub roles: std::collections::BTreeMap<String, Vec<SampleEntry>>,
}

/// Best-effort role classification from a sample filename.
///
/// Tokenizes on non-alphanumerics and matches hat variants first (open vs
/// pedal vs closed), then toms by position, then the flat token table.
pub fn role_from_filename(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return None;
    }
    let has = |t: &str| tokens.contains(&t);
    let has_hat = has("hat") || has("hh") || has("hihat");

    if has("openhat") || has("oh") || (has("open") && has_hat) {
        return Some("hat_open");
    }
    if (has("pedal") || has("foot") || has("ph")) && has_hat {
        return Some("hat_pedal");
    }
    if has_hat || has("ch") || has("closed") {
        return Some("hat_closed");
    }

    if has("tom") || has("toms") {
        if has("low") || has("floor") {
            return Some("tom_low");
        }
        if has("high") || has("hi") {
            return Some("tom_high");
        }
        return Some("tom_mid");
    }

    const TOKENS: [(&str, &[&str]); 8] = [
        ("kick", &["kick", "bd", "bassdrum"]),
        ("snare", &["snare", "snr", "sd"]),
        ("clap", &["clap"]),
        ("rim", &["rim", "rimshot"]),
        ("crash", &["crash"]),
        ("ride", &["ride"]),
        ("shaker", &["shaker", "shk"]),
        (
            "perc",
            &["perc", "percussion", "conga", "bongo", "cowbell", "clave", "tamb"],
        ),
    ];
    for (role, pats) in TOKENS {
        if pats.iter().any(|p| has(p)) {
            return Some(role);
        }
    }
    None
}

fn pack_manifest_path(pack_id: &str) -> PathBuf {
    sample_packs_dir().join(format!("{}.json", pack_id))
}

/// List installed pack ids (manifest stems), sorted
pub fn list_sample_packs() -> Vec<String> {
    let dir = sample_packs_dir();
    let mut out: Vec<String> = std::fs::read_dir(&dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|x| x == "json"))
                .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .collect()
        })
        .unwrap_or_default();
    out.sort();
    out
}

/// Load a pack manifest by id
pub fn load_sample_pack(pack_id: &str) -> Result<SamplePack> {
    let p = pack_manifest_path(pack_id);
    if !p.exists() {
        return Err(ClawError::Reference(format!(
            "sample pack manifest not found: {}",
            p.display()
        )));
    }
    let text = std::fs::read_to_string(&p)?;
    Ok(serde_json::from_str(&text)?)
}

/// Persist a pack manifest into the packs directory
pub fn save_sample_pack(pack: &SamplePack) -> Result<PathBuf> {
    let dir = sample_packs_dir();
    std::fs::create_dir_all(&dir)?;
    let p = pack_manifest_path(&pack.id);
    let value = serde_json::to_value(pack)?;
    let mut text = serde_json::to_string_pretty(&value)?;
    text.push('\n');
    std::fs::write(&p, text)?;
    Ok(p)
}

fn pack_id_from_path(path: &Path) -> String {
    let base: String = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let base = base.trim_matches('_');
    // stable suffix so two directories with the same name get distinct ids
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in path.to_string_lossy().as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    if base.is_empty() {
        format!("sample_pack_{:08x}", hash as u32)
    } else {
        format!("{}_{:08x}", base, hash as u32)
    }
}

/// Scan a directory of WAVs into a pack and persist its manifest.
///
/// Files whose names don't classify into a role are skipped; an empty scan
/// is an error.
pub fn scan_sample_pack(path: &Path, pack_id: Option<&str>) -> Result<SamplePack> {
    if !path.is_dir() {
        return Err(ClawError::Io(format!(
            "sample pack directory not found: {}",
            path.display()
        )));
    }

    let id = pack_id
        .map(str::to_string)
        .unwrap_or_else(|| pack_id_from_path(path));

    let mut roles: std::collections::BTreeMap<String, Vec<SampleEntry>> = Default::default();
    let mut stack = vec![path.to_path_buf()];
    let mut files: Vec<PathBuf> = Vec::new();
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let p = entry.path();
            if p.is_dir() {
                stack.push(p);
            } else if p.extension().is_some_and(|x| x.eq_ignore_ascii_case("wav")) {
                files.push(p);
            }
        }
    }
    files.sort();

    for p in files {
        let Some(name) = p.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let Some(role) = role_from_filename(&name) else {
            continue;
        };
        let rel = p
            .strip_prefix(path)
            .unwrap_or(&p)
            .to_string_lossy()
            .into_owned();
        roles.entry(role.to_string()).or_default().push(SampleEntry {
            path: rel,
            gain_db: 0.0,
            weight: 1.0,
        });
    }

    if roles.is_empty() {
        return Err(ClawError::InvalidState(format!(
            "no drum samples found in pack: {}",
            path.display()
        )));
    }

    let pack = SamplePack {
        id,
        root: path.to_string_lossy().into_owned(),
        roles,
    };
    save_sample_pack(&pack)?;
    Ok(pack)
}

/// Resolve a track's pack spec to a loaded pack, rescanning when the
/// manifest root and the requested path disagree.
pub fn resolve_sample_pack(spec: &SamplePackSpec) -> Result<SamplePack> {
    if let Some(id) = spec.id.as_deref() {
        let pack = load_sample_pack(id)?;
        if let Some(path) = spec.path.as_deref() {
            if Path::new(&pack.root) != Path::new(path) {
                return scan_sample_pack(Path::new(path), Some(id));
            }
        }
        return Ok(pack);
    }
    if let Some(path) = spec.path.as_deref() {
        let id = pack_id_from_path(Path::new(path));
        match load_sample_pack(&id) {
            Ok(pack) if Path::new(&pack.root) == Path::new(path) => Ok(pack),
            _ => scan_sample_pack(Path::new(path), Some(&id)),
        }
    } else {
        Err(ClawError::InvalidInput(
            "sample pack spec must include id or path".to_string(),
        ))
    }
}

fn select_weighted<'a>(rng: &mut StdRng, entries: &'a [SampleEntry]) -> &'a SampleEntry {
    if entries.len() == 1 {
        return &entries[0];
    }
    let total: f32 = entries.iter().map(|e| e.weight.max(0.0)).sum();
    if total <= 0.0 {
        let i = (rng.random::<f64>() * entries.len() as f64) as usize;
        return &entries[i.min(entries.len() - 1)];
    }
    let r = rng.random::<f32>() * total;
    let mut acc = 0.0f32;
    for e in entries {
        acc += e.weight.max(0.0);
        if r <= acc {
            return e;
        }
    }
    entries.last().unwrap()
}

/// Render a sample-pack track to a stereo buffer.
///
/// Role resolution per note: explicit role, else GM pitch mapping, else
/// `perc`. Notes whose role has no entries are silent.
pub fn render_sample_pack_track(
    project: &Project,
    track_index: usize,
    track: &Track,
    sample_rate: u32,
) -> Result<StereoBuffer> {
    let Some(spec) = track.sample_pack.as_ref() else {
        return Err(ClawError::InvalidState(format!(
            "track {} has no sample pack",
            track_index
        )));
    };

    let pack = resolve_sample_pack(spec)?;
    let notes = flatten_track_notes(
        project,
        track_index,
        track,
        FlattenOptions {
            expand_roles: false,
            apply_humanize: true,
        },
    );
    let seed_base = note_seed_base(track, track_index, spec.seed.wrapping_mul(100_003));
    let notes = apply_note_chance(notes, seed_base);

    if notes.is_empty() {
        return Ok(StereoBuffer::new(sample_rate as usize / 2, sample_rate));
    }

    let spt = sec_per_tick(project);
    let end_tick = notes.iter().map(Note::end).max().unwrap_or(0);
    let total = (end_tick as f64 * spt * sample_rate as f64).ceil() as usize + sample_rate as usize;
    let mut buf = StereoBuffer::new(total, sample_rate);

    // per-render cache keyed by absolute sample path
    let mut cache: HashMap<String, (Vec<f32>, Vec<f32>)> = HashMap::new();
    let fade_len = (0.004 * sample_rate as f64) as usize;
    let pack_gain = db_to_gain(spec.gain_db);

    let mut active_ends: Vec<usize> = Vec::new();

    for n in &notes {
        let role = n
            .role
            .as_deref()
            .and_then(normalize_role)
            .or_else(|| role_from_pitch(n.pitch).map(str::to_string))
            .unwrap_or_else(|| "perc".to_string());
        let Some(entries) = pack.roles.get(&role) else {
            continue;
        };
        if entries.is_empty() {
            continue;
        }

        let key = crate::pipeline::note_rng_key(seed_base, n.start, n.pitch);
        let mut rng = StdRng::seed_from_u64(key);
        let entry = select_weighted(&mut rng, entries);
        let sample_path = Path::new(&pack.root).join(&entry.path);
        let cache_key = sample_path.to_string_lossy().into_owned();

        if !cache.contains_key(&cache_key) {
            let (mut l, mut r, sr) = read_wav_stereo(&sample_path)?;
            if sr != sample_rate {
                l = resample_linear(&l, sr, sample_rate);
                r = resample_linear(&r, sr, sample_rate);
            }
            apply_edge_fades(&mut l, fade_len);
            apply_edge_fades(&mut r, fade_len);
            cache.insert(cache_key.clone(), (l, r));
        }
        let (l, r) = &cache[&cache_key];

        let start_s = (n.start as f64 * spt * sample_rate as f64) as usize;
        let end_s = start_s + l.len();
        active_ends.retain(|e| *e > start_s);
        if active_ends.len() >= MAX_POLYPHONY {
            continue;
        }
        active_ends.push(end_s);

        let gain = (n.effective_velocity() as f32 / 127.0) * pack_gain * db_to_gain(entry.gain_db);
        for i in 0..l.len() {
            let idx = start_s + i;
            if idx >= buf.left.len() {
                break;
            }
            buf.left[idx] += l[i] * gain;
            buf.right[idx] += r[i] * gain;
        }
    }

    buf.limit(0.98);
    Ok(buf)
}
