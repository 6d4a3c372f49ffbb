//! Pure pattern transforms: transpose, shift, stretch, reverse, velocity
//! scaling, plus grid quantization over a track's linear notes.
//!
//! Every transform returns a new pattern; nothing mutates in place.

use crate::error::{ClawError, Result};
use crate::model::{Note, Pattern, Project};

/// Transpose every note by `semitones`, clamping to the MIDI range
pub fn transpose(pattern: &Pattern, semitones: i32) -> Pattern {
    let mut out = pattern.clone();
    for n in &mut out.notes {
        n.pitch = (n.pitch as i32 + semitones).clamp(0, 127) as u8;
    }
    out
}

/// Shift every note by `ticks` (negative shifts clamp at 0)
pub fn shift(pattern: &Pattern, ticks: i32) -> Pattern {
    let mut out = pattern.clone();
    for n in &mut out.notes {
        n.start = (n.start as i64 + ticks as i64).max(0) as u32;
    }
    out
}

/// Stretch times by `factor` (> 0); pattern length scales with the notes
pub fn stretch(pattern: &Pattern, factor: f64) -> Result<Pattern> {
    if factor <= 0.0 {
        return Err(ClawError::InvalidInput("factor must be > 0".to_string()));
    }
    let mut out = pattern.clone();
    for n in &mut out.notes {
        n.start = (n.start as f64 * factor).round() as u32;
        n.duration = ((n.duration as f64 * factor).round() as u32).max(1);
    }
    out.length = ((pattern.length as f64 * factor).round() as u32).max(1);
    Ok(out)
}

/// Mirror the pattern in time (note ends map to starts)
pub fn reverse(pattern: &Pattern) -> Pattern {
    let mut out = pattern.clone();
    for n in &mut out.notes {
        n.start = pattern.length.saturating_sub(n.start + n.duration);
    }
    out.notes.sort_by_key(Note::order_key);
    out
}

/// Scale velocities by `scale` (> 0), clamping to [1,127]
pub fn velocity_scale(pattern: &Pattern, scale: f64) -> Result<Pattern> {
    if scale <= 0.0 {
        return Err(ClawError::InvalidInput("scale must be > 0".to_string()));
    }
    let mut out = pattern.clone();
    for n in &mut out.notes {
        n.velocity = ((n.velocity as f64 * scale).round()).clamp(1.0, 127.0) as u8;
    }
    Ok(out)
}

/// Quantize a track's linear notes toward a grid.
///
/// `strength` 1.0 snaps fully; 0.5 moves halfway. Returns the number of
/// notes that moved.
pub fn quantize_track_notes(
    project: &mut Project,
    track_index: usize,
    grid_ticks: u32,
    strength: f64,
) -> Result<usize> {
    if !(0.0..=1.0).contains(&strength) {
        return Err(ClawError::InvalidInput("strength must be 0..1".to_string()));
    }
    if grid_ticks == 0 {
        return Err(ClawError::InvalidInput("grid must be > 0".to_string()));
    }
    let track = project
        .tracks
        .get_mut(track_index)
        .ok_or_else(|| ClawError::InvalidInput("track index out of range".to_string()))?;

    let mut changed = 0usize;
    for n in &mut track.notes {
        let q = ((n.start as f64 / grid_ticks as f64).round()) * grid_ticks as f64;
        let new_start = (n.start as f64 + (q - n.start as f64) * strength).round() as u32;
        if new_start != n.start {
            n.start = new_start;
            changed += 1;
        }
    }
    if changed > 0 {
        track.notes.sort_by_key(Note::order_key);
        project.dirty = true;
    }
    Ok(changed)
}
