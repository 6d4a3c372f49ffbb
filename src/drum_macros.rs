//! Deterministic drum macros: loop variations and fills.
//!
//! Given a base drum pattern, these generate multi-bar loop variations
//! (4-bar and 8-bar) and 1-bar fills (hat roll endings, kick turnarounds).
//! Everything is seeded so headless scripts and compiler passes can rely on
//! the exact output.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ClawError, Result};
use crate::model::limits::MAX_PATTERNS_PER_TRACK;
use crate::model::{Note, Pattern, Track};
use crate::time::ticks_per_bar;

const KICK: u8 = 36;
const HAT: u8 = 42;

fn bar_notes(pattern: &Pattern, tpbar: u32) -> Vec<Note> {
    pattern
        .notes
        .iter()
        .filter(|n| n.start < tpbar)
        .cloned()
        .collect()
}

/// Dedupe exact (start, pitch) pairs keeping the loudest, sorted
fn dedupe(notes: Vec<Note>) -> Vec<Note> {
    let mut best: BTreeMap<(u32, u8), Note> = BTreeMap::new();
    for n in notes {
        match best.get(&(n.start, n.pitch)) {
            Some(cur) if cur.velocity >= n.velocity => {}
            _ => {
                best.insert((n.start, n.pitch), n);
            }
        }
    }
    best.into_values().collect()
}

/// 1-bar fill: a 32nd hat roll across the last beat of the bar
pub fn make_fill_hat_roll(base_bar: &Pattern, ppq: u32, seed: i64) -> Pattern {
    let tpbar = ticks_per_bar(ppq);
    let step16 = ppq / 4;
    let step32 = (step16 / 2).max(1);

    let mut notes = bar_notes(base_bar, tpbar);
    let mut rng = StdRng::seed_from_u64((seed + 801) as u64);

    let mut roll_start = tpbar - ppq; // start of beat 4
    if rng.random::<f64>() < 0.5 {
        roll_start = tpbar - (ppq * 3) / 4; // 4-and
    }

    let vel0 = 52 + (rng.random::<f64>() * 8.0) as i64;
    for i in 0..8u32 {
        let t = roll_start + i * step32;
        if t >= tpbar {
            break;
        }
        let vel = (vel0 + i as i64 * 6).clamp(1, 127) as u8;
        notes.push(Note::new(t, (step32 / 2).max(1), HAT, vel));
    }

    let mut p = Pattern::new(&format!("{}_fill_hatroll", base_bar.name), tpbar);
    p.notes = dedupe(notes);
    p
}

/// 1-bar fill: a small syncopated kick turnaround in the last beat
pub fn make_fill_kick_turnaround(base_bar: &Pattern, ppq: u32, seed: i64) -> Pattern {
    let tpbar = ticks_per_bar(ppq);
    let step16 = ppq / 4;

    let mut notes = bar_notes(base_bar, tpbar);
    let mut rng = StdRng::seed_from_u64((seed + 901) as u64);

    let b4 = tpbar - ppq;
    let mut candidates = vec![b4, b4 + step16 * 2, b4 + step16 * 3];
    // sometimes omit the downbeat kick to make it feel like a turn
    if rng.random::<f64>() < 0.35 {
        candidates.remove(0);
    }

    let base_vel = 105 + (rng.random::<f64>() * 10.0) as i64;
    for (j, t) in candidates.into_iter().enumerate() {
        if t >= tpbar {
            continue;
        }
        let vel = (base_vel - j as i64 * 6).clamp(1, 127) as u8;
        notes.push(Note::new(t, step16, KICK, vel));
    }

    let mut p = Pattern::new(&format!("{}_fill_kickturn", base_bar.name), tpbar);
    p.notes = dedupe(notes);
    p
}

/// Multi-bar loop from a base pattern with light deterministic variations:
/// hat velocity sway, occasional extra hats, a kick pickup before the last
/// bar, a "breath" bar in 4-bar loops, and an optional fill overlay on the
/// final bar.
pub fn make_variation_loop(
    base: &Pattern,
    ppq: u32,
    bars: u32,
    seed: i64,
    fill: Option<&Pattern>,
) -> Pattern {
    let tpbar = ticks_per_bar(ppq);
    let step16 = ppq / 4;
    let out_len = bars * tpbar;

    let base_bar = bar_notes(base, tpbar);
    let mut notes: Vec<Note> = Vec::new();

    for bi in 0..bars {
        let bar_offset = bi * tpbar;
        let mut this_bar: Vec<Note> = base_bar
            .iter()
            .map(|n| {
                let mut nn = n.clone();
                nn.start += bar_offset;
                nn
            })
            .collect();

        let mut rng =
            StdRng::seed_from_u64((seed + 10_007 + bi as i64 * 97 + bars as i64 * 991) as u64);

        // hat velocity sway; kicks and snares stay stable
        let vel_delta = ((rng.random::<f64>() - 0.5) * 10.0).round() as i64;
        if vel_delta != 0 {
            for n in &mut this_bar {
                if n.pitch == HAT {
                    n.velocity = (n.velocity as i64 + vel_delta).clamp(1, 127) as u8;
                }
            }
        }

        // occasional extra hat near the end of the bar
        if rng.random::<f64>() < 0.40 {
            let t = bar_offset + tpbar - step16 * 2;
            this_bar.push(Note::new(t, (step16 / 2).max(1), HAT, 58));
        }

        // kick pickup in the bar before the last
        if bars >= 2 && bi == bars - 2 && rng.random::<f64>() < 0.90 {
            let t = bar_offset + tpbar - step16;
            this_bar.push(Note::new(t, step16, KICK, 106));
        }

        // "breath" bar in 4-bar loops: drop every other on-grid 16th hat
        if bars == 4 && bi == 1 {
            this_bar.retain(|n| {
                if n.pitch != HAT {
                    return true;
                }
                let rel = n.start - bar_offset;
                if rel % step16 != 0 {
                    return true;
                }
                (rel / step16) % 2 == 0
            });
        }

        notes.extend(this_bar);
    }

    if let Some(fill) = fill {
        let final_offset = (bars - 1) * tpbar;
        for n in &fill.notes {
            if n.start < tpbar {
                let mut nn = n.clone();
                nn.start += final_offset;
                notes.push(nn);
            }
        }
    }

    let mut p = Pattern::new(&format!("{}_v{}", base.name, bars), out_len);
    p.notes = dedupe(notes);
    p
}

/// Names of the patterns created by [`generate_drum_macro_pack`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrumMacroPack {
    pub fill_hatroll: String,
    pub fill_kickturn: String,
    pub v4: Option<String>,
    pub v8: Option<String>,
}

/// Generate fills and loop variations into `track.patterns`.
///
/// Fails (hard) when the pattern budget would be exceeded; generators are
/// expected to stay within limits rather than silently dropping output.
pub fn generate_drum_macro_pack(
    track: &mut Track,
    base_pattern: &str,
    ppq: u32,
    seed: i64,
    out_prefix: Option<&str>,
    make_4: bool,
    make_8: bool,
) -> Result<DrumMacroPack> {
    let base = track
        .patterns
        .get(base_pattern)
        .cloned()
        .ok_or_else(|| ClawError::Reference(format!("track has no pattern named: {}", base_pattern)))?;

    let tpbar = ticks_per_bar(ppq);
    let prefix = out_prefix.unwrap_or(base_pattern).to_string();

    let mut base_bar = Pattern::new(&prefix, tpbar);
    base_bar.notes = bar_notes(&base, tpbar);

    let new_count = 2 + usize::from(make_4) + usize::from(make_8);
    if track.patterns.len() + new_count > MAX_PATTERNS_PER_TRACK {
        return Err(ClawError::InvalidState(format!(
            "max patterns reached ({})",
            MAX_PATTERNS_PER_TRACK
        )));
    }

    let mut insert = |track: &mut Track, mut pat: Pattern, name: String| -> String {
        pat.name = name.clone();
        track.patterns.insert(name.clone(), pat);
        name
    };

    let hat_fill = make_fill_hat_roll(&base_bar, ppq, seed);
    let kick_fill = make_fill_kick_turnaround(&base_bar, ppq, seed);

    let fill_hatroll = insert(track, hat_fill.clone(), format!("{}_fill_hatroll", prefix));
    let fill_kickturn = insert(track, kick_fill.clone(), format!("{}_fill_kickturn", prefix));

    let v4 = if make_4 {
        let v = make_variation_loop(&base, ppq, 4, seed, Some(&hat_fill));
        Some(insert(track, v, format!("{}_v4", prefix)))
    } else {
        None
    };

    let v8 = if make_8 {
        // 8-bar: overlay both fills merged into one fill bar
        let mut merged = Pattern::new(&format!("{}_fill_merged", prefix), tpbar);
        merged.notes = dedupe(
            kick_fill
                .notes
                .iter()
                .chain(hat_fill.notes.iter())
                .cloned()
                .collect(),
        );
        let v = make_variation_loop(&base, ppq, 8, seed + 17, Some(&merged));
        Some(insert(track, v, format!("{}_v8", prefix)))
    } else {
        None
    };

    Ok(DrumMacroPack {
        fill_hatroll,
        fill_kickturn,
        v4,
        v8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_track() -> Track {
        let mut t = Track::new("Drums", 0);
        let mut pat = Pattern::new("d", 1920);
        pat.notes.push(Note::new(0, 120, KICK, 110));
        pat.notes.push(Note::new(960, 120, 38, 105));
        for s in 0..16u32 {
            pat.notes.push(Note::new(s * 120, 60, HAT, 64));
        }
        t.patterns.insert("d".to_string(), pat);
        t
    }

    #[test]
    fn test_hat_roll_fill_adds_roll() {
        let t = base_track();
        let fill = make_fill_hat_roll(&t.patterns["d"], 480, 0);
        assert_eq!(fill.length, 1920);
        // more hats than the base bar
        let base_hats = t.patterns["d"]
            .notes
            .iter()
            .filter(|n| n.pitch == HAT)
            .count();
        let fill_hats = fill.notes.iter().filter(|n| n.pitch == HAT).count();
        assert!(fill_hats > base_hats - 4, "roll should add hats");
        // roll lands in the last beat
        assert!(fill.notes.iter().any(|n| n.pitch == HAT && n.start >= 1440));
    }

    #[test]
    fn test_kick_turnaround_adds_kicks_in_last_beat() {
        let t = base_track();
        let fill = make_fill_kick_turnaround(&t.patterns["d"], 480, 3);
        let late_kicks = fill
            .notes
            .iter()
            .filter(|n| n.pitch == KICK && n.start >= 1440)
            .count();
        assert!(late_kicks >= 2);
    }

    #[test]
    fn test_variation_loop_length_and_determinism() {
        let t = base_track();
        let v = make_variation_loop(&t.patterns["d"], 480, 4, 7, None);
        assert_eq!(v.length, 4 * 1920);
        assert_eq!(v.name, "d_v4");

        let v2 = make_variation_loop(&t.patterns["d"], 480, 4, 7, None);
        assert_eq!(v.notes, v2.notes);
    }

    #[test]
    fn test_breath_bar_thins_hats() {
        let t = base_track();
        let v = make_variation_loop(&t.patterns["d"], 480, 4, 7, None);
        let hats_in_bar = |bar: u32| {
            v.notes
                .iter()
                .filter(|n| {
                    n.pitch == HAT && n.start >= bar * 1920 && n.start < (bar + 1) * 1920
                })
                .count()
        };
        assert!(hats_in_bar(1) < hats_in_bar(0));
    }

    #[test]
    fn test_macro_pack_creates_patterns() {
        let mut t = base_track();
        let pack = generate_drum_macro_pack(&mut t, "d", 480, 0, None, true, true).unwrap();
        assert!(t.patterns.contains_key(&pack.fill_hatroll));
        assert!(t.patterns.contains_key(&pack.fill_kickturn));
        assert!(t.patterns.contains_key(pack.v4.as_deref().unwrap()));
        assert!(t.patterns.contains_key(pack.v8.as_deref().unwrap()));
        assert_eq!(t.patterns["d_v8"].length, 8 * 1920);
    }

    #[test]
    fn test_macro_pack_missing_base_fails() {
        let mut t = base_track();
        let err = generate_drum_macro_pack(&mut t, "ghost", 480, 0, None, true, false).unwrap_err();
        assert!(matches!(err, ClawError::Reference(_)));
    }

    #[test]
    fn test_macro_pack_respects_pattern_limit() {
        let mut t = base_track();
        for i in 0..(MAX_PATTERNS_PER_TRACK - 2) {
            let name = format!("pad{:03}", i);
            t.patterns.insert(name.clone(), Pattern::new(&name, 480));
        }
        let err = generate_drum_macro_pack(&mut t, "d", 480, 0, None, true, true).unwrap_err();
        assert!(matches!(err, ClawError::InvalidState(_)));
    }
}
