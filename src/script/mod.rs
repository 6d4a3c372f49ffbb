//! The headless script runtime: a line-oriented command interpreter over a
//! single mutable project.
//!
//! Blank lines and `#` comments are ignored; `include <path>` inlines
//! another script relative to the including file (depth capped). Errors
//! carry the line number and original command text; in non-strict mode they
//! are recorded as warnings and execution continues. Dry-run mode executes
//! every mutation but skips anything that writes files or invokes external
//! tools, so generators can interpret scripts purely in memory.

pub mod select;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::error::{ClawError, Result};
use crate::gm::parse_program;
use crate::midi::export_midi;
use crate::model::limits::{
    MAX_CLIPS_PER_TRACK, MAX_NOTES_PER_PATTERN, MAX_NOTES_PER_TRACK, MAX_PATTERNS_PER_TRACK,
    MAX_TRACKS,
};
use crate::model::{
    json::{load_project, save_project},
    Clip, InstrumentSpec, Note, Pattern, Project, SamplePackSpec, SamplerMode, Section, Track,
    Variation,
};
use crate::pipeline::{analyze_references, bars_estimate, project_song_end_tick, song_length_seconds};
use crate::render::drum_mode::DrumMode;
use crate::render::encode::{encode_audio, Codec};
use crate::render::mastering::master_wav;
use crate::render::{render_project_wav, stems, RenderOptions};
use crate::script::select::{
    apply_selected, parse_predicate, select_notes, Selection, SelectionOp,
};
use crate::time::{parse_grid, parse_timecode, ticks_per_bar};

/// Includes deeper than this abort (also breaks include cycles)
const MAX_INCLUDE_DEPTH: usize = 16;

/// Runner configuration
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    pub soundfont: Option<PathBuf>,
    /// Strict mode turns command errors into failures; otherwise warnings
    pub strict: bool,
    /// Dry-run executes mutations but skips file writes and renders
    pub dry_run: bool,
}

/// The interpreter state
pub struct ScriptRunner {
    opts: RunnerOptions,
    project: Option<Project>,
    selection: Option<Selection>,
    pub warnings: Vec<String>,
    pub commands_executed: usize,
}

fn sanitize_filename(s: &str) -> String {
    let lowered = s.trim().to_lowercase().replace(' ', "_");
    let mut out = String::new();
    let mut last_underscore = false;
    for c in lowered.chars() {
        let keep = c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
        let c = if keep { c } else { '_' };
        if c == '_' && last_underscore {
            continue;
        }
        last_underscore = c == '_';
        out.push(c);
    }
    if out.is_empty() {
        "untitled".to_string()
    } else {
        out
    }
}

/// key=value option scan over trailing args
fn kv<'a>(args: &'a [&'a str], key: &str) -> Option<&'a str> {
    let prefix = format!("{}=", key);
    args.iter()
        .rev()
        .find(|a| a.starts_with(&prefix))
        .map(|a| &a[prefix.len()..])
}

fn kv_f64(args: &[&str], key: &str) -> Option<f64> {
    kv(args, key).and_then(|v| v.parse().ok())
}

fn kv_u32(args: &[&str], key: &str) -> Option<u32> {
    kv(args, key).and_then(|v| v.parse().ok())
}

fn kv_i64(args: &[&str], key: &str) -> Option<i64> {
    kv(args, key).and_then(|v| v.parse().ok())
}

fn is_kv(token: &str) -> bool {
    token.contains('=')
}

impl ScriptRunner {
    pub fn new(opts: RunnerOptions) -> Self {
        Self {
            opts,
            project: None,
            selection: None,
            warnings: Vec::new(),
            commands_executed: 0,
        }
    }

    /// Run a whole script text
    pub fn run_text(&mut self, text: &str, base_dir: Option<&Path>) -> Result<()> {
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        self.run_lines(&lines, base_dir, 0)
    }

    fn run_lines(&mut self, lines: &[String], base_dir: Option<&Path>, depth: usize) -> Result<()> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(ClawError::InvalidState(format!(
                "include depth exceeds {}",
                MAX_INCLUDE_DEPTH
            )));
        }

        for (lineno, raw) in lines.iter().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(inc) = line.strip_prefix("include ") {
                let inc = inc.trim().trim_matches('"');
                let mut inc_path = PathBuf::from(inc);
                if let Some(base) = base_dir {
                    if inc_path.is_relative() {
                        inc_path = base.join(inc_path);
                    }
                }
                if !inc_path.exists() {
                    let msg = format!("include not found: {}", inc_path.display());
                    if self.opts.strict {
                        return Err(ClawError::Io(msg));
                    }
                    self.warnings.push(msg);
                    continue;
                }
                let inc_lines: Vec<String> = std::fs::read_to_string(&inc_path)?
                    .lines()
                    .map(str::to_string)
                    .collect();
                self.run_lines(&inc_lines, inc_path.parent(), depth + 1)?;
                continue;
            }

            match self.run_command(line) {
                Ok(()) => self.commands_executed += 1,
                Err(e) => {
                    let err = ClawError::Script {
                        line: lineno + 1,
                        command: line.to_string(),
                        message: e.to_string(),
                    };
                    if self.opts.strict {
                        return Err(err);
                    }
                    self.warnings.push(err.to_string());
                }
            }
        }
        Ok(())
    }

    /// Borrow the current project
    pub fn project(&self) -> Result<&Project> {
        self.project
            .as_ref()
            .ok_or_else(|| ClawError::InvalidState("no current project".to_string()))
    }

    /// Take ownership of the current project
    pub fn into_project(self) -> Result<Project> {
        self.project
            .ok_or_else(|| ClawError::InvalidState("no current project".to_string()))
    }

    fn proj_mut(&mut self) -> Result<&mut Project> {
        self.project
            .as_mut()
            .ok_or_else(|| ClawError::InvalidState("no current project".to_string()))
    }

    fn soundfont(&self) -> Result<PathBuf> {
        crate::config::find_soundfont(self.opts.soundfont.as_deref().and_then(Path::to_str))
            .ok_or_else(|| {
                ClawError::InvalidState(
                    "soundfont not set; pass --soundfont or set CLAW_DAW_SOUNDFONT".to_string(),
                )
            })
    }

    fn track_index(&self, token: &str) -> Result<usize> {
        let idx: usize = token
            .parse()
            .map_err(|_| ClawError::InvalidInput(format!("invalid track index: {}", token)))?;
        if idx >= self.project()?.tracks.len() {
            return Err(ClawError::InvalidInput("track index out of range".to_string()));
        }
        Ok(idx)
    }

    fn tick(&self, token: &str) -> Result<u32> {
        parse_timecode(self.project()?, token)
    }

    fn default_export_path(&self, ext: &str) -> Result<String> {
        let name = sanitize_filename(&self.project()?.name);
        std::fs::create_dir_all("out")?;
        Ok(format!("out/{}.{}", name, ext))
    }

    fn load_mix_arg(&self, args: &[&str]) -> Result<Option<Map<String, Value>>> {
        let inline = &self.project()?.mix;
        match kv(args, "mix") {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| ClawError::Io(format!("cannot read mix spec {}: {}", path, e)))?;
                let v: Value = serde_json::from_str(&text)?;
                Ok(v.as_object().cloned())
            }
            None if !inline.is_empty() => Ok(Some(inline.clone())),
            None => Ok(None),
        }
    }

    /// Render the current project to a mastered WAV (the body of
    /// `export_wav`, reused by the encode commands).
    fn render_mastered_wav(&self, out_wav: &str, args: &[&str]) -> Result<()> {
        let sf = self.soundfont()?;
        let proj = self.project()?;

        let preset = kv(args, "preset").unwrap_or("demo").to_string();
        crate::render::mastering::get_preset(&preset)?;
        let fade = kv_f64(args, "fade").unwrap_or(0.0);
        let sr = kv_u32(args, "sr").unwrap_or(crate::synth::DEFAULT_SAMPLE_RATE);
        let trim = kv_f64(args, "trim");
        let drum_mode = kv(args, "drums")
            .and_then(DrumMode::parse)
            .unwrap_or_default();
        let mix = self.load_mix_arg(args)?;

        let render_opts = RenderOptions {
            sample_rate: sr,
            drum_mode,
        };
        let raw = format!("{}.raw.wav", out_wav.trim_end_matches(".wav"));
        render_project_wav(proj, &sf, &raw, &render_opts, mix.as_ref())?;
        master_wav(&raw, out_wav, sr, trim, &preset, fade, fade)?;
        std::fs::remove_file(&raw).ok();
        Ok(())
    }

    /// Execute one command line
    pub fn run_command(&mut self, line: &str) -> Result<()> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&cmd, args)) = parts.split_first() else {
            return Ok(());
        };

        match cmd {
            // ---------------- project ----------------
            "new_project" => {
                let name = args
                    .first()
                    .ok_or_else(|| ClawError::InvalidInput("new_project needs a name".to_string()))?;
                let bpm: u32 = args.get(1).and_then(|b| b.parse().ok()).unwrap_or(120);
                let mut p = Project::new(name, bpm);
                p.dirty = true;
                self.project = Some(p);
                self.selection = None;
                Ok(())
            }
            "open_project" => {
                let path = args
                    .first()
                    .ok_or_else(|| ClawError::InvalidInput("open_project needs a path".to_string()))?;
                self.project = Some(load_project(path)?);
                self.selection = None;
                Ok(())
            }
            "save_project" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let path = args.first().copied();
                let proj = self.proj_mut()?;
                save_project(proj, path)?;
                Ok(())
            }
            "validate_project" => {
                let proj = self.proj_mut()?;
                crate::model::validate::validate_project(proj);
                proj.dirty = true;
                Ok(())
            }

            // ---------------- tracks ----------------
            "add_track" => {
                let name = args
                    .first()
                    .ok_or_else(|| ClawError::InvalidInput("add_track needs a name".to_string()))?
                    .to_string();
                let program = match args.get(1) {
                    Some(tok) => parse_program(tok)?,
                    None => 0,
                };
                let proj = self.proj_mut()?;
                if proj.tracks.len() >= MAX_TRACKS {
                    return Err(ClawError::InvalidState(format!(
                        "max tracks reached ({})",
                        MAX_TRACKS
                    )));
                }
                let ch = proj.next_free_channel()?;
                let mut t = Track::new(&name, ch);
                t.program = program;
                proj.tracks.push(t);
                proj.dirty = true;
                Ok(())
            }
            "delete_track" => {
                let proj_len = self.project()?.tracks.len();
                let idx = match args.first() {
                    Some(tok) => self.track_index(tok)?,
                    None if proj_len > 0 => proj_len - 1,
                    None => return Err(ClawError::InvalidInput("no tracks".to_string())),
                };
                let proj = self.proj_mut()?;
                proj.tracks.remove(idx);
                proj.dirty = true;
                self.selection = None;
                Ok(())
            }
            "set_program" => self.set_track_u8(args, |t, v| t.program = v, |tok| parse_program(tok)),
            "set_volume" => self.set_track_u8(args, |t, v| t.volume = v, parse_cc),
            "set_pan" => self.set_track_u8(args, |t, v| t.pan = v, parse_cc),
            "set_reverb" => self.set_track_u8(args, |t, v| t.reverb = v, parse_cc),
            "set_chorus" => self.set_track_u8(args, |t, v| t.chorus = v, parse_cc),
            "set_sampler" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let mode = args.get(1).copied().unwrap_or("none").to_lowercase();
                let proj = self.proj_mut()?;
                match mode.as_str() {
                    "none" | "off" | "0" => proj.tracks[idx].sampler = None,
                    m => {
                        proj.tracks[idx].sampler = Some(SamplerMode::parse(m).ok_or_else(|| {
                            ClawError::InvalidInput("sampler mode must be: drums, 808, none".to_string())
                        })?)
                    }
                }
                proj.dirty = true;
                Ok(())
            }
            "set_sampler_preset" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let preset = self.arg(args, 1, "preset")?.to_string();
                let proj = self.proj_mut()?;
                proj.tracks[idx].sampler_preset = preset;
                proj.dirty = true;
                Ok(())
            }
            // set_kit <track> [preset] — drums sampler shorthand
            "set_kit" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let preset = args.get(1).copied().unwrap_or("default").to_string();
                let proj = self.proj_mut()?;
                proj.tracks[idx].sampler = Some(SamplerMode::Drums);
                proj.tracks[idx].sampler_preset = preset;
                proj.dirty = true;
                Ok(())
            }
            "set_drum_kit" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let kit = self.arg(args, 1, "kit name")?;
                let name = crate::drumkit::get_drum_kit(Some(kit)).name.to_string();
                let proj = self.proj_mut()?;
                proj.tracks[idx].drum_kit = name;
                proj.dirty = true;
                Ok(())
            }
            // set_808 <track> [preset] — 808 sampler shorthand
            "set_808" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let preset = args.get(1).copied().unwrap_or("default").to_string();
                let proj = self.proj_mut()?;
                proj.tracks[idx].sampler = Some(SamplerMode::Bass808);
                proj.tracks[idx].sampler_preset = preset;
                proj.dirty = true;
                Ok(())
            }
            "set_glide" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let ticks = self.tick(self.arg(args, 1, "ticks")?)?;
                let proj = self.proj_mut()?;
                proj.tracks[idx].glide_ticks = ticks;
                proj.dirty = true;
                Ok(())
            }
            "set_humanize" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let timing = kv_u32(args, "timing");
                let velocity = kv_u32(args, "velocity");
                let seed = kv_i64(args, "seed");
                let proj = self.proj_mut()?;
                let h = &mut proj.tracks[idx].humanize;
                if let Some(t) = timing {
                    h.timing = t;
                }
                if let Some(v) = velocity {
                    h.velocity = v;
                }
                if let Some(s) = seed {
                    h.seed = s;
                }
                proj.dirty = true;
                Ok(())
            }
            "set_bus" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let bus = self.arg(args, 1, "bus name")?.to_lowercase();
                let proj = self.proj_mut()?;
                proj.tracks[idx].bus = bus;
                proj.dirty = true;
                Ok(())
            }
            // set_instrument <track> <id> [preset] [seed=<n>]
            "set_instrument" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let id = self.arg(args, 1, "instrument id")?;
                if crate::instruments::get_instrument(id).is_none() {
                    return Err(ClawError::Reference(format!("unknown instrument id: {}", id)));
                }
                let mut spec = InstrumentSpec::new(id);
                if let Some(preset) = args.get(2).filter(|a| !is_kv(a)) {
                    spec.preset = preset.to_string();
                }
                if let Some(seed) = kv_i64(args, "seed") {
                    spec.seed = seed;
                }
                let proj = self.proj_mut()?;
                proj.tracks[idx].instrument = Some(spec);
                proj.tracks[idx].sampler = None;
                proj.dirty = true;
                Ok(())
            }
            // set_sample_pack <track> <id-or-path> [gain_db=<f>] [seed=<n>]
            "set_sample_pack" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let target = self.arg(args, 1, "pack id or path")?.to_string();
                let gain_db = kv_f64(args, "gain_db").unwrap_or(0.0) as f32;
                let seed = kv_i64(args, "seed").unwrap_or(0);
                let spec = if Path::new(&target).exists() {
                    SamplePackSpec {
                        id: None,
                        path: Some(target),
                        seed,
                        gain_db,
                    }
                } else {
                    SamplePackSpec {
                        id: Some(target),
                        path: None,
                        seed,
                        gain_db,
                    }
                };
                let proj = self.proj_mut()?;
                proj.tracks[idx].sample_pack = Some(spec);
                // a sample pack always plays through the drums sampler path
                proj.tracks[idx].sampler = Some(SamplerMode::Drums);
                proj.dirty = true;
                Ok(())
            }

            // ---------------- timing ----------------
            "set_swing" => {
                let swing: u32 = self
                    .arg(args, 0, "swing percent")?
                    .parse()
                    .map_err(|_| ClawError::InvalidInput("invalid swing percent".to_string()))?;
                let proj = self.proj_mut()?;
                proj.swing_percent = swing.min(75);
                proj.dirty = true;
                Ok(())
            }
            "set_loop" => {
                let start = self.tick(self.arg(args, 0, "start")?)?;
                let end = self.tick(self.arg(args, 1, "end")?)?;
                let proj = self.proj_mut()?;
                proj.loop_start = Some(start);
                proj.loop_end = Some(end);
                proj.dirty = true;
                Ok(())
            }
            "clear_loop" => {
                let proj = self.proj_mut()?;
                proj.loop_start = None;
                proj.loop_end = None;
                proj.dirty = true;
                Ok(())
            }
            "set_render_region" => {
                let start = self.tick(self.arg(args, 0, "start")?)?;
                let end = self.tick(self.arg(args, 1, "end")?)?;
                let proj = self.proj_mut()?;
                proj.render_start = Some(start);
                proj.render_end = Some(end);
                proj.dirty = true;
                Ok(())
            }
            "clear_render_region" => {
                let proj = self.proj_mut()?;
                proj.render_start = None;
                proj.render_end = None;
                proj.dirty = true;
                Ok(())
            }

            // ---------------- notes ----------------
            // insert_note <track> <pitch> <start> <dur> [vel]
            "insert_note" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let pitch: u8 = parse_pitch(self.arg(args, 1, "pitch")?)?;
                let start = self.tick(self.arg(args, 2, "start")?)?;
                let dur = self.tick(self.arg(args, 3, "duration")?)?.max(1);
                let vel: u8 = args.get(4).and_then(|v| v.parse().ok()).unwrap_or(100);
                let proj = self.proj_mut()?;
                if proj.tracks[idx].notes.len() >= MAX_NOTES_PER_TRACK {
                    return Err(ClawError::InvalidState(format!(
                        "max notes reached ({})",
                        MAX_NOTES_PER_TRACK
                    )));
                }
                proj.tracks[idx]
                    .notes
                    .push(Note::new(start, dur, pitch, vel.clamp(1, 127)));
                proj.dirty = true;
                Ok(())
            }
            // add_note_pat <track> <pattern> <pitch|role> <start> <dur> [vel]
            //              [role=<r>] [chance=<f>] [accent=<f>] [mute=1] [glide=<t>]
            "add_note_pat" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let pat_name = self.arg(args, 1, "pattern name")?.to_string();
                let pitch_tok = self.arg(args, 2, "pitch")?;
                let start = self.tick(self.arg(args, 3, "start")?)?;
                let dur = self.tick(self.arg(args, 4, "duration")?)?.max(1);
                let vel: u8 = args
                    .get(5)
                    .filter(|a| !is_kv(a))
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100);

                // pitch token may itself be a drum role name
                let (pitch, role_from_pitch) = match parse_pitch(pitch_tok) {
                    Ok(p) => (p, None),
                    Err(_) => (0u8, crate::drumkit::normalize_role(pitch_tok)),
                };

                let mut note = Note::new(start, dur, pitch, vel.clamp(1, 127));
                note.role = kv(args, "role")
                    .and_then(crate::drumkit::normalize_role)
                    .or(role_from_pitch);
                if let Some(c) = kv_f64(args, "chance") {
                    note.chance = (c as f32).clamp(0.0, 1.0);
                }
                if let Some(a) = kv_f64(args, "accent") {
                    if a > 0.0 {
                        note.accent = a as f32;
                    }
                }
                if let Some(m) = kv(args, "mute") {
                    note.mute = matches!(m, "1" | "true" | "yes");
                }
                if let Some(g) = kv(args, "glide") {
                    note.glide_ticks = self.tick(g)?;
                }

                let proj = self.proj_mut()?;
                let pat = proj.tracks[idx]
                    .patterns
                    .get_mut(&pat_name)
                    .ok_or_else(|| ClawError::Reference(format!("pattern not found: {}", pat_name)))?;
                if pat.notes.len() >= MAX_NOTES_PER_PATTERN {
                    return Err(ClawError::InvalidState(format!(
                        "max notes/pattern reached ({})",
                        MAX_NOTES_PER_PATTERN
                    )));
                }
                pat.notes.push(note);
                proj.dirty = true;
                Ok(())
            }

            // ---------------- patterns ----------------
            "new_pattern" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let name = self.arg(args, 1, "pattern name")?.to_string();
                let length = self.tick(self.arg(args, 2, "length")?)?;
                if length == 0 {
                    return Err(ClawError::InvalidInput("pattern length must be > 0".to_string()));
                }
                let proj = self.proj_mut()?;
                if proj.tracks[idx].patterns.len() >= MAX_PATTERNS_PER_TRACK {
                    return Err(ClawError::InvalidState(format!(
                        "max patterns reached ({})",
                        MAX_PATTERNS_PER_TRACK
                    )));
                }
                proj.tracks[idx]
                    .patterns
                    .insert(name.clone(), Pattern::new(&name, length));
                proj.dirty = true;
                Ok(())
            }
            "rename_pattern" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let old = self.arg(args, 1, "old name")?.to_string();
                let new = self.arg(args, 2, "new name")?.to_string();
                let proj = self.proj_mut()?;
                let t = &mut proj.tracks[idx];
                if t.patterns.contains_key(&new) {
                    return Err(ClawError::InvalidState(format!("pattern already exists: {}", new)));
                }
                let mut pat = t
                    .patterns
                    .remove(&old)
                    .ok_or_else(|| ClawError::Reference(format!("pattern not found: {}", old)))?;
                pat.name = new.clone();
                t.patterns.insert(new.clone(), pat);
                for c in &mut t.clips {
                    if c.pattern == old {
                        c.pattern = new.clone();
                    }
                }
                proj.dirty = true;
                Ok(())
            }
            "delete_pattern" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let name = self.arg(args, 1, "pattern name")?.to_string();
                let proj = self.proj_mut()?;
                let t = &mut proj.tracks[idx];
                t.patterns
                    .remove(&name)
                    .ok_or_else(|| ClawError::Reference(format!("pattern not found: {}", name)))?;
                // deleting a pattern also removes the clips referencing it
                t.clips.retain(|c| c.pattern != name);
                proj.dirty = true;
                Ok(())
            }
            "duplicate_pattern" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let src = self.arg(args, 1, "source pattern")?.to_string();
                let dst = self.arg(args, 2, "destination pattern")?.to_string();
                let proj = self.proj_mut()?;
                let t = &mut proj.tracks[idx];
                if t.patterns.contains_key(&dst) {
                    return Err(ClawError::InvalidState(format!("pattern already exists: {}", dst)));
                }
                if t.patterns.len() >= MAX_PATTERNS_PER_TRACK {
                    return Err(ClawError::InvalidState(format!(
                        "max patterns reached ({})",
                        MAX_PATTERNS_PER_TRACK
                    )));
                }
                let mut copy = t
                    .patterns
                    .get(&src)
                    .cloned()
                    .ok_or_else(|| ClawError::Reference(format!("pattern not found: {}", src)))?;
                copy.name = dst.clone();
                t.patterns.insert(dst, copy);
                proj.dirty = true;
                Ok(())
            }
            "pattern_transpose" => self.transform_pattern(args, |pat, arg, _| {
                let semi: i32 = arg
                    .parse()
                    .map_err(|_| ClawError::InvalidInput("invalid semitones".to_string()))?;
                Ok(crate::transform::transpose(pat, semi))
            }),
            "pattern_shift" => self.transform_pattern(args, |pat, arg, proj| {
                let ticks = parse_timecode(proj, arg)? as i32;
                Ok(crate::transform::shift(pat, ticks))
            }),
            "pattern_stretch" => self.transform_pattern(args, |pat, arg, _| {
                let factor: f64 = arg
                    .parse()
                    .map_err(|_| ClawError::InvalidInput("invalid factor".to_string()))?;
                crate::transform::stretch(pat, factor)
            }),
            "pattern_reverse" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let name = self.arg(args, 1, "pattern name")?.to_string();
                let proj = self.proj_mut()?;
                let t = &mut proj.tracks[idx];
                let pat = t
                    .patterns
                    .get(&name)
                    .ok_or_else(|| ClawError::Reference(format!("pattern not found: {}", name)))?;
                let out = crate::transform::reverse(pat);
                t.patterns.insert(name, out);
                proj.dirty = true;
                Ok(())
            }
            "pattern_vel" => self.transform_pattern(args, |pat, arg, _| {
                let scale: f64 = arg
                    .parse()
                    .map_err(|_| ClawError::InvalidInput("invalid scale".to_string()))?;
                crate::transform::velocity_scale(pat, scale)
            }),

            // ---------------- clips ----------------
            // place_pattern <track> <pattern> <start> [repeats]
            "place_pattern" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let name = self.arg(args, 1, "pattern name")?.to_string();
                let start = self.tick(self.arg(args, 2, "start")?)?;
                let reps: u32 = args.get(3).and_then(|r| r.parse().ok()).unwrap_or(1);
                let proj = self.proj_mut()?;
                if proj.tracks[idx].clips.len() >= MAX_CLIPS_PER_TRACK {
                    return Err(ClawError::InvalidState(format!(
                        "max clips reached ({})",
                        MAX_CLIPS_PER_TRACK
                    )));
                }
                proj.tracks[idx].clips.push(Clip::new(&name, start, reps.max(1)));
                proj.dirty = true;
                Ok(())
            }
            "move_clip" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let ci: usize = self
                    .arg(args, 1, "clip index")?
                    .parse()
                    .map_err(|_| ClawError::InvalidInput("invalid clip index".to_string()))?;
                let start = self.tick(self.arg(args, 2, "new start")?)?;
                let proj = self.proj_mut()?;
                let clip = proj.tracks[idx]
                    .clips
                    .get_mut(ci)
                    .ok_or_else(|| ClawError::InvalidInput("clip index out of range".to_string()))?;
                clip.start = start;
                proj.dirty = true;
                Ok(())
            }
            "delete_clip" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let ci: usize = self
                    .arg(args, 1, "clip index")?
                    .parse()
                    .map_err(|_| ClawError::InvalidInput("invalid clip index".to_string()))?;
                let proj = self.proj_mut()?;
                if ci >= proj.tracks[idx].clips.len() {
                    return Err(ClawError::InvalidInput("clip index out of range".to_string()));
                }
                proj.tracks[idx].clips.remove(ci);
                proj.dirty = true;
                Ok(())
            }
            // copy_bars <track> <src_bar> <bars> <dst_bar>
            "copy_bars" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let src_bar: u32 = parse_u32(self.arg(args, 1, "source bar")?)?;
                let bars: u32 = parse_u32(self.arg(args, 2, "bar count")?)?;
                let dst_bar: u32 = parse_u32(self.arg(args, 3, "destination bar")?)?;
                let proj = self.proj_mut()?;
                let tpbar = ticks_per_bar(proj.ppq);
                let src_start = src_bar * tpbar;
                let src_end = src_start + bars * tpbar;
                let delta = dst_bar as i64 * tpbar as i64 - src_start as i64;

                let t = &mut proj.tracks[idx];
                let to_copy: Vec<Clip> = t
                    .clips
                    .iter()
                    .filter(|c| src_start <= c.start && c.start < src_end)
                    .cloned()
                    .collect();
                if t.clips.len() + to_copy.len() > MAX_CLIPS_PER_TRACK {
                    return Err(ClawError::InvalidState(format!(
                        "would exceed max clips ({})",
                        MAX_CLIPS_PER_TRACK
                    )));
                }
                for c in to_copy {
                    let start = (c.start as i64 + delta).max(0) as u32;
                    t.clips.push(Clip::new(&c.pattern, start, c.repeats));
                }
                proj.dirty = true;
                Ok(())
            }
            "clear_clips" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let proj = self.proj_mut()?;
                proj.tracks[idx].clips.clear();
                proj.dirty = true;
                Ok(())
            }

            // ---------------- arrangement ----------------
            // add_section <name> <start> <length>
            "add_section" => {
                let name = self.arg(args, 0, "section name")?.to_string();
                let start = self.tick(self.arg(args, 1, "start")?)?;
                let length = self.tick(self.arg(args, 2, "length")?)?;
                let proj = self.proj_mut()?;
                proj.arrangement.sections.push(Section { name, start, length });
                proj.dirty = true;
                Ok(())
            }
            // add_variation <section> <track> <src_pattern> <dst_pattern>
            "add_variation" => {
                let section = self.arg(args, 0, "section name")?.to_string();
                let ti = self.track_index(self.arg(args, 1, "track index")?)?;
                let src = self.arg(args, 2, "source pattern")?.to_string();
                let dst = self.arg(args, 3, "destination pattern")?.to_string();
                let proj = self.proj_mut()?;
                proj.arrangement.variations.push(Variation {
                    section,
                    track_index: ti,
                    src_pattern: src,
                    dst_pattern: dst,
                });
                proj.dirty = true;
                Ok(())
            }

            // ---------------- generators ----------------
            // gen_drums <track> <pattern> <length> <style> [seed=0] [density=0.8]
            "gen_drums" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let name = self.arg(args, 1, "pattern name")?.to_string();
                let length = self.tick(self.arg(args, 2, "length")?)?;
                let style = crate::generate::drums::DrumStyle::parse(self.arg(args, 3, "style")?)
                    .ok_or_else(|| {
                        ClawError::InvalidInput(format!(
                            "unknown drum style: {}",
                            args.get(3).copied().unwrap_or("")
                        ))
                    })?;
                let seed = kv_i64(args, "seed").unwrap_or(0) as u64;
                let density = kv_f64(args, "density").unwrap_or(0.8);

                let ppq = self.project()?.ppq;
                let proj = self.proj_mut()?;
                let t = &mut proj.tracks[idx];
                if !t.patterns.contains_key(&name) {
                    if t.patterns.len() >= MAX_PATTERNS_PER_TRACK {
                        return Err(ClawError::InvalidState(format!(
                            "max patterns reached ({})",
                            MAX_PATTERNS_PER_TRACK
                        )));
                    }
                    t.patterns.insert(name.clone(), Pattern::new(&name, length));
                }
                let pat = t.patterns.get_mut(&name).expect("ensured above");
                pat.length = length;
                crate::generate::drums::generate_drums(pat, ppq, style, seed, density);
                proj.dirty = true;
                Ok(())
            }
            // gen_drum_macros <track> <base_pattern> [seed=0] [prefix=<p>] [v4=1] [v8=1]
            "gen_drum_macros" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let base = self.arg(args, 1, "base pattern")?.to_string();
                let seed = kv_i64(args, "seed").unwrap_or(0);
                let prefix = kv(args, "prefix").map(str::to_string);
                let make_4 = kv(args, "v4").map(|v| v != "0").unwrap_or(true);
                let make_8 = kv(args, "v8").map(|v| v != "0").unwrap_or(true);
                let ppq = self.project()?.ppq;
                let proj = self.proj_mut()?;
                crate::drum_macros::generate_drum_macro_pack(
                    &mut proj.tracks[idx],
                    &base,
                    ppq,
                    seed,
                    prefix.as_deref(),
                    make_4,
                    make_8,
                )?;
                proj.dirty = true;
                Ok(())
            }
            // gen_bass_follow <track> <pattern> <roots,csv> [seed=0] [gap=0.15]
            "gen_bass_follow" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let name = self.arg(args, 1, "pattern name")?.to_string();
                let roots: Vec<u8> = self
                    .arg(args, 2, "root pitches")?
                    .split(',')
                    .map(|p| {
                        p.trim()
                            .parse::<u8>()
                            .map_err(|_| ClawError::InvalidInput(format!("invalid root pitch: {}", p)))
                    })
                    .collect::<Result<_>>()?;
                let opts = crate::generate::bass::BassFollowOptions {
                    seed: kv_i64(args, "seed").unwrap_or(0) as u64,
                    gap_prob: kv_f64(args, "gap").unwrap_or(0.15),
                    velocity: 96,
                };
                let ppq = self.project()?.ppq;
                let proj = self.proj_mut()?;
                let t = &mut proj.tracks[idx];
                if !t.patterns.contains_key(&name) {
                    if t.patterns.len() >= MAX_PATTERNS_PER_TRACK {
                        return Err(ClawError::InvalidState(format!(
                            "max patterns reached ({})",
                            MAX_PATTERNS_PER_TRACK
                        )));
                    }
                    t.patterns.insert(name.clone(), Pattern::new(&name, 1));
                }
                let pat = t.patterns.get_mut(&name).expect("ensured above");
                crate::generate::bass::generate_bass_follow(pat, ppq, &roots, &opts);
                proj.dirty = true;
                Ok(())
            }

            // ---------------- editing ----------------
            // quantize_track <track> <grid> [strength]
            "quantize_track" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let grid = parse_grid(self.project()?.ppq, self.arg(args, 1, "grid")?)?;
                let strength: f64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1.0);
                let proj = self.proj_mut()?;
                crate::transform::quantize_track_notes(proj, idx, grid, strength)?;
                Ok(())
            }
            // select_notes <track> [pattern=<name>] [field op value ...]
            "select_notes" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let pattern = kv(args, "pattern").map(str::to_string);
                let proj = self.project()?;
                let preds = args[1..]
                    .iter()
                    .filter(|a| !a.starts_with("pattern="))
                    .map(|a| parse_predicate(proj, a))
                    .collect::<Result<Vec<_>>>()?;
                self.selection = Some(select_notes(proj, idx, pattern.as_deref(), &preds)?);
                Ok(())
            }
            // apply_selected <op> [arg]
            "apply_selected" => {
                let op_name = self.arg(args, 0, "operation")?;
                let selection = self
                    .selection
                    .clone()
                    .ok_or_else(|| ClawError::InvalidState("no selection; run select_notes first".to_string()))?;
                let op = SelectionOp::parse(self.project()?, op_name, args.get(1).copied())?;
                let proj = self.proj_mut()?;
                apply_selected(proj, &selection, &op)?;
                if matches!(op, SelectionOp::Delete) {
                    self.selection = None;
                }
                Ok(())
            }

            // ---------------- mix helpers ----------------
            // eq <track> <freq> <q> <gain_db>
            "eq" => {
                let idx = self.track_index(self.arg(args, 0, "track index")?)?;
                let f: f64 = parse_f64(self.arg(args, 1, "frequency")?)?;
                let q: f64 = parse_f64(self.arg(args, 2, "q")?)?;
                let g: f64 = parse_f64(self.arg(args, 3, "gain dB")?)?;
                let proj = self.proj_mut()?;
                let tracks = proj
                    .mix
                    .entry("tracks".to_string())
                    .or_insert_with(|| json!({}));
                let entry = tracks
                    .as_object_mut()
                    .ok_or_else(|| ClawError::MixSpec("mix.tracks is not a mapping".to_string()))?
                    .entry(idx.to_string())
                    .or_insert_with(|| json!({}));
                let eq = entry
                    .as_object_mut()
                    .ok_or_else(|| ClawError::MixSpec("mix track entry is not a mapping".to_string()))?
                    .entry("eq".to_string())
                    .or_insert_with(|| json!([]));
                eq.as_array_mut()
                    .ok_or_else(|| ClawError::MixSpec("mix eq is not a list".to_string()))?
                    .push(json!({"f": f, "q": q, "g": g}));
                proj.dirty = true;
                Ok(())
            }
            // sidechain <src> <dst> [threshold_db=..] [ratio=..] [attack_ms=..]
            //           [release_ms=..] [src_role=<role>]
            "sidechain" => {
                let src = self.track_index(self.arg(args, 0, "source track")?)?;
                let dst = self.track_index(self.arg(args, 1, "destination track")?)?;
                let mut rule = Map::new();
                rule.insert("src".to_string(), json!(src));
                rule.insert("dst".to_string(), json!(dst));
                rule.insert("threshold_db".to_string(), json!(kv_f64(args, "threshold_db").unwrap_or(-24.0)));
                rule.insert("ratio".to_string(), json!(kv_f64(args, "ratio").unwrap_or(6.0)));
                rule.insert("attack_ms".to_string(), json!(kv_f64(args, "attack_ms").unwrap_or(5.0)));
                rule.insert("release_ms".to_string(), json!(kv_f64(args, "release_ms").unwrap_or(120.0)));
                if let Some(role) = kv(args, "src_role") {
                    rule.insert("src_role".to_string(), json!(role));
                }
                let proj = self.proj_mut()?;
                let sc = proj
                    .mix
                    .entry("sidechain".to_string())
                    .or_insert_with(|| json!([]));
                sc.as_array_mut()
                    .ok_or_else(|| ClawError::MixSpec("mix.sidechain is not a list".to_string()))?
                    .push(Value::Object(rule));
                proj.dirty = true;
                Ok(())
            }
            // transient <track|master> attack=<f> sustain=<f>
            "transient" => {
                let target = self.arg(args, 0, "track index or 'master'")?.to_string();
                let attack = kv_f64(args, "attack").unwrap_or(0.0);
                let sustain = kv_f64(args, "sustain").unwrap_or(0.0);
                let payload = json!({"attack": attack, "sustain": sustain});
                if target == "master" {
                    let proj = self.proj_mut()?;
                    let master = proj
                        .mix
                        .entry("master".to_string())
                        .or_insert_with(|| json!({}));
                    master
                        .as_object_mut()
                        .ok_or_else(|| ClawError::MixSpec("mix.master is not a mapping".to_string()))?
                        .insert("transient".to_string(), payload);
                    proj.dirty = true;
                } else {
                    let idx = self.track_index(&target)?;
                    let proj = self.proj_mut()?;
                    let tracks = proj
                        .mix
                        .entry("tracks".to_string())
                        .or_insert_with(|| json!({}));
                    let entry = tracks
                        .as_object_mut()
                        .ok_or_else(|| ClawError::MixSpec("mix.tracks is not a mapping".to_string()))?
                        .entry(idx.to_string())
                        .or_insert_with(|| json!({}));
                    entry
                        .as_object_mut()
                        .ok_or_else(|| ClawError::MixSpec("mix track entry is not a mapping".to_string()))?
                        .insert("transient".to_string(), payload);
                    proj.dirty = true;
                }
                Ok(())
            }

            // ---------------- exports ----------------
            "export_midi" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let path = match args.first() {
                    Some(p) => p.to_string(),
                    None => self.default_export_path("mid")?,
                };
                export_midi(self.project()?, &path, None)?;
                Ok(())
            }
            // export_wav [path] [preset=demo] [fade=0] [sr=44100] [trim=] [mix=] [drums=gm]
            "export_wav" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let out = match args.first().filter(|a| !is_kv(a)) {
                    Some(p) => p.to_string(),
                    None => self.default_export_path("wav")?,
                };
                self.render_mastered_wav(&out, args)
            }
            "export_mp3" | "export_m4a" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let codec = if cmd == "export_mp3" { Codec::Mp3 } else { Codec::M4a };
                let ext = if cmd == "export_mp3" { "mp3" } else { "m4a" };
                let out = match args.first().filter(|a| !is_kv(a)) {
                    Some(p) => p.to_string(),
                    None => self.default_export_path(ext)?,
                };
                let sr = kv_u32(args, "sr").unwrap_or(crate::synth::DEFAULT_SAMPLE_RATE);
                let br = kv(args, "br").unwrap_or("192k").to_string();

                let tmp_wav = format!("{}.tmp.wav", out.trim_end_matches(&format!(".{}", ext)));
                self.render_mastered_wav(&tmp_wav, args)?;
                encode_audio(&tmp_wav, &out, None, sr, codec, &br)?;
                std::fs::remove_file(&tmp_wav).ok();
                Ok(())
            }
            // export_preview_mp3 <out.mp3> [bars=8] [start=0:0] [preset=clean] [mix=]
            "export_preview_mp3" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let out = self.arg(args, 0, "output path")?.to_string();
                let bars = kv_u32(args, "bars").unwrap_or(8).max(1);
                let start = match kv(args, "start") {
                    Some(tc) => self.tick(tc)?,
                    None => 0,
                };
                let sr = kv_u32(args, "sr").unwrap_or(crate::synth::DEFAULT_SAMPLE_RATE);
                let br = kv(args, "br").unwrap_or("192k").to_string();

                let mut preview = self.project()?.clone();
                let tpbar = ticks_per_bar(preview.ppq);
                preview.loop_start = None;
                preview.loop_end = None;
                preview.render_start = Some(start);
                preview.render_end = Some(start + bars * tpbar);

                let saved = self.project.replace(preview);
                let tmp_wav = format!("{}.tmp.wav", out.trim_end_matches(".mp3"));
                let result = self.render_mastered_wav(&tmp_wav, args);
                self.project = saved;
                result?;
                encode_audio(&tmp_wav, &out, None, sr, Codec::Mp3, &br)?;
                std::fs::remove_file(&tmp_wav).ok();
                Ok(())
            }
            // export_stems <dir> [sr=44100] [mix=]
            "export_stems" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let dir = self.arg(args, 0, "output directory")?.to_string();
                let sr = kv_u32(args, "sr").unwrap_or(crate::synth::DEFAULT_SAMPLE_RATE);
                let mix = self.load_mix_arg(args)?;
                let sf = self.soundfont()?;
                stems::export_stems(self.project()?, &sf, Path::new(&dir), sr, mix.as_ref())?;
                Ok(())
            }
            // export_busses <dir> [sr=44100]
            "export_busses" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let dir = self.arg(args, 0, "output directory")?.to_string();
                let sr = kv_u32(args, "sr").unwrap_or(crate::synth::DEFAULT_SAMPLE_RATE);
                let sf = self.soundfont()?;
                stems::export_busses(self.project()?, &sf, Path::new(&dir), sr)?;
                Ok(())
            }
            // export_package <prefix> [preset=clean] [mix=] [stems=1] [busses=1] [meter=1]
            "export_package" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let prefix = self.arg(args, 0, "output prefix")?.to_string();
                let with_stems = kv(args, "stems").map(|v| v != "0").unwrap_or(false);
                let with_busses = kv(args, "busses").map(|v| v != "0").unwrap_or(false);
                let with_meter = kv(args, "meter").map(|v| v != "0").unwrap_or(false);
                let sr = kv_u32(args, "sr").unwrap_or(crate::synth::DEFAULT_SAMPLE_RATE);

                std::fs::create_dir_all("out")?;
                let master = format!("out/{}.wav", prefix);
                self.render_mastered_wav(&master, args)?;

                let sf = self.soundfont()?;
                let mix = self.load_mix_arg(args)?;
                if with_stems {
                    let dir = PathBuf::from(format!("out/{}_stems", prefix));
                    stems::export_stems(self.project()?, &sf, &dir, sr, mix.as_ref())?;
                }
                if with_busses {
                    let dir = PathBuf::from(format!("out/{}_busses", prefix));
                    stems::export_busses(self.project()?, &sf, &dir, sr)?;
                }
                if with_meter {
                    let meter = crate::analysis::analyze_metering(&master, true)?;
                    let mut text = serde_json::to_string_pretty(&serde_json::to_value(&meter)?)?;
                    text.push('\n');
                    std::fs::write(format!("out/{}.meter.json", prefix), text)?;
                }
                Ok(())
            }
            // export_spectrogram [out.png] [size=] [legend=] [color=] [scale=] [gain=]
            "export_spectrogram" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let out = match args.first().filter(|a| !is_kv(a)) {
                    Some(p) => p.to_string(),
                    None => self.default_export_path("spectrogram.png")?,
                };
                let tmp_wav = format!("{}.tmp.wav", out.trim_end_matches(".png"));
                self.render_mastered_wav(&tmp_wav, args)?;
                self.spectrogram_of(&tmp_wav, &out, args)?;
                std::fs::remove_file(&tmp_wav).ok();
                Ok(())
            }

            // ---------------- analysis ----------------
            // meter_audio <in> <out.json>
            "meter_audio" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let input = self.arg(args, 0, "input audio")?;
                let out = self.arg(args, 1, "output json")?;
                let meter = crate::analysis::analyze_metering(input, true)?;
                let mut text = serde_json::to_string_pretty(&serde_json::to_value(&meter)?)?;
                text.push('\n');
                if let Some(parent) = Path::new(out).parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                std::fs::write(out, text)?;
                Ok(())
            }
            // analyze_audio <in> <out.json> — mix sanity report
            "analyze_audio" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let input = self.arg(args, 0, "input audio")?;
                let out = self.arg(args, 1, "output json")?;
                let sanity = crate::analysis::sanity::analyze_mix_sanity(input)?;
                let mut text = serde_json::to_string_pretty(&serde_json::to_value(&sanity)?)?;
                text.push('\n');
                std::fs::write(out, text)?;
                Ok(())
            }
            // spectrogram_audio <in> <out.png> [opts]
            "spectrogram_audio" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let input = self.arg(args, 0, "input audio")?.to_string();
                let out = self.arg(args, 1, "output png")?.to_string();
                self.spectrogram_of(&input, &out, args)
            }
            // analyze_refs <out.json>
            "analyze_refs" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let out = self.arg(args, 0, "output json")?;
                let issues = analyze_references(self.project()?);
                let mut text =
                    serde_json::to_string_pretty(&json!({"issues": serde_json::to_value(issues)?}))?;
                text.push('\n');
                std::fs::write(out, text)?;
                Ok(())
            }

            // ---------------- misc ----------------
            // diff_projects <a.json> <b.json> <out.diff>
            "diff_projects" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let a = std::fs::read_to_string(self.arg(args, 0, "first project")?)?;
                let b = std::fs::read_to_string(self.arg(args, 1, "second project")?)?;
                let out = self.arg(args, 2, "output path")?;
                let a_lines: BTreeSet<&str> = a.lines().collect();
                let b_lines: BTreeSet<&str> = b.lines().collect();
                let mut diff = String::new();
                for ln in a.lines().filter(|l| !b_lines.contains(l)) {
                    diff.push_str("- ");
                    diff.push_str(ln);
                    diff.push('\n');
                }
                for ln in b.lines().filter(|l| !a_lines.contains(l)) {
                    diff.push_str("+ ");
                    diff.push_str(ln);
                    diff.push('\n');
                }
                std::fs::write(out, diff)?;
                Ok(())
            }
            // dump_state <out.json>
            "dump_state" => {
                if self.opts.dry_run {
                    return Ok(());
                }
                let out = self.arg(args, 0, "output json")?;
                let proj = self.project()?;
                let mut payload = serde_json::to_value(proj)?;
                let end_tick = project_song_end_tick(proj);
                payload["derived"] = json!({
                    "song_length_ticks": end_tick,
                    "song_length_seconds": song_length_seconds(proj, end_tick),
                    "song_bars_estimate": bars_estimate(proj, end_tick),
                });
                let mut text = serde_json::to_string_pretty(&payload)?;
                text.push('\n');
                std::fs::write(out, text)?;
                Ok(())
            }

            other => Err(ClawError::InvalidInput(format!("unknown command: {}", other))),
        }
    }

    fn arg<'a>(&self, args: &'a [&'a str], idx: usize, what: &str) -> Result<&'a str> {
        args.get(idx)
            .copied()
            .ok_or_else(|| ClawError::InvalidInput(format!("missing argument: {}", what)))
    }

    fn set_track_u8(
        &mut self,
        args: &[&str],
        set: impl FnOnce(&mut Track, u8),
        parse: impl FnOnce(&str) -> Result<u8>,
    ) -> Result<()> {
        let idx = self.track_index(self.arg(args, 0, "track index")?)?;
        let value = parse(self.arg(args, 1, "value")?)?;
        let proj = self.proj_mut()?;
        set(&mut proj.tracks[idx], value);
        proj.dirty = true;
        Ok(())
    }

    fn transform_pattern(
        &mut self,
        args: &[&str],
        apply: impl FnOnce(&Pattern, &str, &Project) -> Result<Pattern>,
    ) -> Result<()> {
        let idx = self.track_index(self.arg(args, 0, "track index")?)?;
        let name = self.arg(args, 1, "pattern name")?.to_string();
        let arg = self.arg(args, 2, "transform argument")?.to_string();
        let proj = self.proj_mut()?;
        let pat = proj.tracks[idx]
            .patterns
            .get(&name)
            .ok_or_else(|| ClawError::Reference(format!("pattern not found: {}", name)))?
            .clone();
        let out = apply(&pat, &arg, proj)?;
        proj.tracks[idx].patterns.insert(name, out);
        proj.dirty = true;
        Ok(())
    }

    fn spectrogram_of(&self, input: &str, out_png: &str, args: &[&str]) -> Result<()> {
        let opts = crate::analysis::bands::SpectrogramOptions {
            size: kv(args, "size").unwrap_or("1200x600").to_string(),
            legend: kv(args, "legend").map(|v| v != "0").unwrap_or(true),
            color: kv(args, "color").unwrap_or("fiery").to_string(),
            scale: kv(args, "scale").unwrap_or("log").to_string(),
            gain: kv_f64(args, "gain").unwrap_or(5.0),
        };
        crate::analysis::bands::render_spectrogram_png(input, out_png, &opts)?;

        // a tiny band report next to the png
        let rep = crate::analysis::bands::band_energy_report(input)?;
        let header = vec![format!("spectrogram_audio: {}", input)];
        let text = crate::analysis::bands::band_report_text(&header, &rep);
        std::fs::write(format!("{}.bands.txt", out_png.trim_end_matches(".png")), text)?;
        Ok(())
    }
}

fn parse_cc(token: &str) -> Result<u8> {
    let v: i64 = token
        .parse()
        .map_err(|_| ClawError::InvalidInput(format!("invalid value: {}", token)))?;
    Ok(v.clamp(0, 127) as u8)
}

fn parse_pitch(token: &str) -> Result<u8> {
    let v: i64 = token
        .parse()
        .map_err(|_| ClawError::InvalidInput(format!("invalid pitch: {}", token)))?;
    if !(0..=127).contains(&v) {
        return Err(ClawError::InvalidInput(format!("pitch out of range: {}", v)));
    }
    Ok(v as u8)
}

fn parse_u32(token: &str) -> Result<u32> {
    token
        .parse()
        .map_err(|_| ClawError::InvalidInput(format!("invalid number: {}", token)))
}

fn parse_f64(token: &str) -> Result<f64> {
    token
        .parse()
        .map_err(|_| ClawError::InvalidInput(format!("invalid number: {}", token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dry_runner() -> ScriptRunner {
        ScriptRunner::new(RunnerOptions {
            soundfont: None,
            strict: true,
            dry_run: true,
        })
    }

    fn run(script: &str) -> Project {
        let mut r = dry_runner();
        r.run_text(script, None).unwrap();
        r.into_project().unwrap()
    }

    #[test]
    fn test_basic_project_build() {
        let p = run("new_project demo 128\n\
                     set_swing 12\n\
                     add_track Drums 0\n\
                     add_track Bass 32\n\
                     set_sampler 0 drums\n\
                     set_808 1 growl\n\
                     set_volume 0 112\n");
        assert_eq!(p.name, "demo");
        assert_eq!(p.tempo_bpm, 128);
        assert_eq!(p.swing_percent, 12);
        assert_eq!(p.tracks.len(), 2);
        assert_eq!(p.tracks[0].sampler, Some(SamplerMode::Drums));
        assert_eq!(p.tracks[1].sampler, Some(SamplerMode::Bass808));
        assert_eq!(p.tracks[1].sampler_preset, "growl");
        assert_eq!(p.tracks[0].volume, 112);
        // channels assigned sequentially
        assert_eq!(p.tracks[1].channel, 1);
    }

    #[test]
    fn test_comments_and_blanks_ignored() {
        let p = run("# a comment\n\nnew_project x\n   \n# another\nadd_track T\n");
        assert_eq!(p.tracks.len(), 1);
    }

    #[test]
    fn test_pattern_and_clip_flow() {
        let p = run("new_project x\n\
                     add_track Keys 0\n\
                     new_pattern 0 a 2:0\n\
                     add_note_pat 0 a 60 0:0 0:1 100\n\
                     add_note_pat 0 a 64 0:2 0:1 90 chance=0.8\n\
                     duplicate_pattern 0 a a2\n\
                     pattern_transpose 0 a2 12\n\
                     place_pattern 0 a 0:0 4\n\
                     add_section chorus 4:0 4:0\n\
                     add_variation chorus 0 a a2\n");
        let t = &p.tracks[0];
        assert_eq!(t.patterns["a"].notes.len(), 2);
        assert_eq!(t.patterns["a"].notes[1].chance, 0.8);
        assert_eq!(t.patterns["a2"].notes[0].pitch, 72);
        assert_eq!(t.clips.len(), 1);
        assert_eq!(p.arrangement.sections.len(), 1);
        assert_eq!(p.arrangement.variations.len(), 1);
    }

    #[test]
    fn test_add_note_pat_role_token() {
        let p = run("new_project x\nadd_track Drums 0\nnew_pattern 0 d 1:0\n\
                     add_note_pat 0 d kick 0:0 0:0:120 110\n\
                     add_note_pat 0 d 38 0:2 0:0:120 100 role=snare\n");
        let notes = &p.tracks[0].patterns["d"].notes;
        assert_eq!(notes[0].role.as_deref(), Some("kick"));
        assert_eq!(notes[1].role.as_deref(), Some("snare"));
    }

    #[test]
    fn test_delete_pattern_removes_clips() {
        let p = run("new_project x\nadd_track T 0\nnew_pattern 0 a 1:0\n\
                     place_pattern 0 a 0:0\nplace_pattern 0 a 4:0\n\
                     delete_pattern 0 a\n");
        assert!(p.tracks[0].patterns.is_empty());
        assert!(p.tracks[0].clips.is_empty());
    }

    #[test]
    fn test_zero_length_pattern_rejected() {
        let mut r = dry_runner();
        let err = r
            .run_text("new_project x\nadd_track T\nnew_pattern 0 a 0\n", None)
            .unwrap_err();
        let ClawError::Script { line, command, .. } = err else {
            panic!("expected script error");
        };
        assert_eq!(line, 3);
        assert_eq!(command, "new_pattern 0 a 0");
    }

    #[test]
    fn test_non_strict_records_warnings() {
        let mut r = ScriptRunner::new(RunnerOptions {
            soundfont: None,
            strict: false,
            dry_run: true,
        });
        r.run_text("new_project x\nbogus_command 1 2\nadd_track T\n", None)
            .unwrap();
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].contains("bogus_command"));
        assert_eq!(r.project().unwrap().tracks.len(), 1);
    }

    #[test]
    fn test_unknown_command_is_invalid_input() {
        let mut r = dry_runner();
        r.run_command("new_project x").unwrap();
        let err = r.run_command("frobnicate").unwrap_err();
        assert!(matches!(err, ClawError::InvalidInput(_)));
    }

    #[test]
    fn test_command_without_project_fails() {
        let mut r = dry_runner();
        let err = r.run_command("add_track T").unwrap_err();
        assert!(matches!(err, ClawError::InvalidState(_)));
    }

    #[test]
    fn test_include_resolves_relative_and_caps_depth() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner.txt");
        std::fs::write(&inner, "add_track FromInclude\n").unwrap();
        let outer = dir.path().join("outer.txt");
        std::fs::write(&outer, "new_project x\ninclude inner.txt\n").unwrap();

        let mut r = dry_runner();
        let text = std::fs::read_to_string(&outer).unwrap();
        r.run_text(&text, Some(dir.path())).unwrap();
        assert_eq!(r.project().unwrap().tracks[0].name, "FromInclude");

        // a self-including script terminates with an error
        let cyclic = dir.path().join("cycle.txt");
        std::fs::write(&cyclic, "include cycle.txt\n").unwrap();
        let mut r2 = dry_runner();
        r2.run_command("new_project x").unwrap();
        let text = std::fs::read_to_string(&cyclic).unwrap();
        assert!(r2.run_text(&text, Some(dir.path())).is_err());
    }

    #[test]
    fn test_gen_drums_command() {
        let p = run("new_project x\nadd_track Drums 0\nnew_pattern 0 d 2:0\n\
                     gen_drums 0 d 2:0 house seed=0 density=0.8\n");
        let pat = &p.tracks[0].patterns["d"];
        assert!(pat.notes.iter().any(|n| n.pitch == 36));
        assert!(pat.notes.iter().any(|n| n.pitch == 38));
    }

    #[test]
    fn test_gen_bass_follow_command() {
        let p = run("new_project x\nadd_track Bass 32\n\
                     gen_bass_follow 0 b 45,47,48,45 seed=3 gap=0.1\n");
        let pat = &p.tracks[0].patterns["b"];
        assert!(!pat.notes.is_empty());
        assert_eq!(pat.length, 4 * 4 * 480);
    }

    #[test]
    fn test_gen_drum_macros_command() {
        let p = run("new_project x\nadd_track Drums 0\nnew_pattern 0 d 1:0\n\
                     add_note_pat 0 d 36 0:0 0:0:120 110\n\
                     gen_drum_macros 0 d seed=1\n");
        assert!(p.tracks[0].patterns.contains_key("d_v4"));
        assert!(p.tracks[0].patterns.contains_key("d_v8"));
        assert!(p.tracks[0].patterns.contains_key("d_fill_hatroll"));
    }

    #[test]
    fn test_select_and_apply() {
        let p = run("new_project x\nadd_track Keys 0\n\
                     insert_note 0 60 0:0 0:1 100\n\
                     insert_note 0 72 0:2 0:1 60\n\
                     select_notes 0 vel<80\n\
                     apply_selected transpose -12\n");
        assert_eq!(p.tracks[0].notes[1].pitch, 60);
        assert_eq!(p.tracks[0].notes[0].pitch, 60); // untouched
    }

    #[test]
    fn test_mix_helper_commands() {
        let p = run("new_project x\nadd_track Drums 0\nadd_track Bass 32\n\
                     eq 1 300 1.0 -3\n\
                     sidechain 0 1 threshold_db=-20 src_role=kick\n\
                     transient master attack=0.3 sustain=-0.1\n");
        let eq = &p.mix["tracks"]["1"]["eq"][0];
        assert_eq!(eq["f"], 300.0);
        let sc = &p.mix["sidechain"][0];
        assert_eq!(sc["src"], 0);
        assert_eq!(sc["dst"], 1);
        assert_eq!(sc["src_role"], "kick");
        assert_eq!(p.mix["master"]["transient"]["attack"], 0.3);
    }

    #[test]
    fn test_dry_run_skips_saves_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nope.json");
        let script = format!(
            "new_project x\nadd_track T\nsave_project {}\nexport_midi {}\n",
            target.display(),
            dir.path().join("nope.mid").display()
        );
        let mut r = dry_runner();
        r.run_text(&script, None).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn test_export_midi_writes_file_when_not_dry() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("song.mid");
        let script = format!(
            "new_project x\nadd_track Keys 0\ninsert_note 0 60 0:0 0:1\nexport_midi {}\n",
            out.display()
        );
        let mut r = ScriptRunner::new(RunnerOptions {
            soundfont: None,
            strict: true,
            dry_run: false,
        });
        r.run_text(&script, None).unwrap();
        assert!(out.exists());
    }

    #[test]
    fn test_max_tracks_enforced() {
        let mut script = String::from("new_project x\n");
        for i in 0..MAX_TRACKS {
            script.push_str(&format!("add_track T{}\n", i));
        }
        script.push_str("add_track Overflow\n");
        let mut r = dry_runner();
        assert!(r.run_text(&script, None).is_err());
    }

    #[test]
    fn test_loop_and_render_region_commands() {
        let p = run("new_project x\nadd_track T\nset_loop 0:0 4:0\nset_render_region 1:0 2:0\n");
        assert_eq!(p.loop_start, Some(0));
        assert_eq!(p.loop_end, Some(4 * 1920));
        assert_eq!(p.render_start, Some(1920));
        let cleared = run("new_project x\nadd_track T\nset_loop 0:0 4:0\nclear_loop\n");
        assert_eq!(cleared.loop_start, None);
    }
}
