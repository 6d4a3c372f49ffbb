//! Bass-line generation that follows a root-note progression.
//!
//! Per bar, one rhythmic template is chosen from a small seeded set; a
//! downbeat is always guaranteed, notes are thinned by `gap_prob`, approach
//! notes lead into harmonic changes, the final bar gets a turnaround, and
//! every note's duration is capped so it never overlaps the next.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{Note, Pattern};

/// Rhythmic templates as 16th-step offsets within one bar
const TEMPLATES: [&[u32]; 5] = [
    &[0, 8],
    &[0, 6, 8],
    &[0, 4, 8, 12],
    &[0, 3, 8, 11],
    &[0, 8, 14],
];

/// Options for [`generate_bass_follow`]
#[derive(Debug, Clone, Copy)]
pub struct BassFollowOptions {
    pub seed: u64,
    /// Probability of dropping a non-downbeat hit
    pub gap_prob: f64,
    /// Base note velocity before jitter
    pub velocity: u8,
}

impl Default for BassFollowOptions {
    fn default() -> Self {
        Self {
            seed: 0,
            gap_prob: 0.15,
            velocity: 96,
        }
    }
}

/// Generate a bass line into `pattern` from per-bar root pitches.
///
/// `roots` supplies one MIDI root per bar; the pattern length is stretched
/// to cover them all.
pub fn generate_bass_follow(pattern: &mut Pattern, ppq: u32, roots: &[u8], opts: &BassFollowOptions) {
    if roots.is_empty() {
        pattern.notes.clear();
        return;
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let step = (ppq / 4).max(1);
    let bar = step * 16;
    pattern.length = bar * roots.len() as u32;
    pattern.notes.clear();

    let mut placements: Vec<(u32, u8)> = Vec::new(); // (start tick, pitch)

    for (bi, &root) in roots.iter().enumerate() {
        let bar_start = bi as u32 * bar;
        let template = TEMPLATES[rng.random_range(0..TEMPLATES.len())];
        let next_root = roots.get(bi + 1).copied();
        let is_last_bar = bi == roots.len() - 1;

        for &offset in template {
            // downbeat always survives
            if offset != 0 && rng.random::<f64>() < opts.gap_prob {
                continue;
            }
            // mild octave/fifth movement on non-downbeats
            let pitch = if offset == 0 {
                root
            } else {
                match rng.random_range(0..4u32) {
                    0 => root.saturating_add(12).min(127),
                    1 => root.saturating_add(7).min(127),
                    _ => root,
                }
            };
            placements.push((bar_start + offset * step, pitch));
        }

        // approach note leading into a harmonic change
        if let Some(next) = next_root {
            if next != root {
                let approach = if next > root {
                    next.saturating_sub(1)
                } else {
                    next.saturating_add(1).min(127)
                };
                placements.push((bar_start + 15 * step, approach));
            }
        }

        // turnaround in the final bar
        if is_last_bar {
            placements.push((bar_start + 12 * step, root.saturating_add(7).min(127)));
            placements.push((bar_start + 14 * step, root.saturating_add(5).min(127)));
        }
    }

    placements.sort();
    placements.dedup_by_key(|(start, _)| *start);

    // cap durations at the next note's start
    for (i, &(start, pitch)) in placements.iter().enumerate() {
        let default_dur = step * 3;
        let dur = match placements.get(i + 1) {
            Some(&(next_start, _)) => default_dur.min(next_start - start),
            None => default_dur,
        }
        .max(1);
        let vel = (opts.velocity as i64 + rng.random_range(-8..=10)).clamp(1, 127) as u8;
        pattern.notes.push(Note::new(start, dur, pitch, vel));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gen(roots: &[u8], seed: u64, gap_prob: f64) -> Pattern {
        let mut pat = Pattern::new("b", 1);
        generate_bass_follow(
            &mut pat,
            480,
            roots,
            &BassFollowOptions {
                seed,
                gap_prob,
                velocity: 96,
            },
        );
        pat
    }

    #[test]
    fn test_every_bar_has_downbeat() {
        let pat = gen(&[45, 45, 48, 43], 3, 0.9);
        let bar = 480 * 4;
        for bi in 0..4u32 {
            assert!(
                pat.notes.iter().any(|n| n.start == bi * bar),
                "bar {} missing downbeat",
                bi
            );
        }
    }

    #[test]
    fn test_notes_never_overlap() {
        let pat = gen(&[45, 47, 48, 50], 11, 0.0);
        for w in pat.notes.windows(2) {
            assert!(
                w[0].end() <= w[1].start,
                "overlap: {:?} then {:?}",
                w[0],
                w[1]
            );
        }
    }

    #[test]
    fn test_approach_note_before_changes() {
        let pat = gen(&[45, 52], 0, 0.0);
        let step = 120;
        // last 16th of bar 1 approaches the new root (52 -> 51)
        let approach = pat.notes.iter().find(|n| n.start == 15 * step);
        assert!(approach.is_some());
        assert_eq!(approach.unwrap().pitch, 51);
    }

    #[test]
    fn test_turnaround_in_final_bar() {
        let pat = gen(&[45, 45], 4, 0.0);
        let bar = 480 * 4;
        let final_bar: Vec<&Note> = pat.notes.iter().filter(|n| n.start >= bar).collect();
        // turnaround adds hits at steps 12 and 14 of the last bar
        assert!(final_bar.iter().any(|n| n.start == bar + 12 * 120));
        assert!(final_bar.iter().any(|n| n.start == bar + 14 * 120));
    }

    #[test]
    fn test_gap_prob_thins_line() {
        let full = gen(&[45; 8], 21, 0.0);
        let thin = gen(&[45; 8], 21, 0.9);
        assert!(thin.notes.len() < full.notes.len());
    }

    #[test]
    fn test_deterministic() {
        let a = gen(&[45, 47, 48], 33, 0.2);
        let b = gen(&[45, 47, 48], 33, 0.2);
        assert_eq!(a.notes, b.notes);
    }

    #[test]
    fn test_empty_roots_clears() {
        let pat = gen(&[], 0, 0.0);
        assert!(pat.notes.is_empty());
    }

    #[test]
    fn test_pattern_length_covers_all_bars() {
        let pat = gen(&[45, 45, 45], 0, 0.0);
        assert_eq!(pat.length, 3 * 4 * 480);
    }
}
