//! Deterministic drum pattern generation on a 16th grid.
//!
//! Each style has a fixed kick/snare skeleton with density-gated hats;
//! everything random draws from one seeded PRNG so
//! (style, seed, density, length) -> identical notes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{Note, Pattern};

pub const KICK: u8 = 36;
pub const SNARE: u8 = 38;
pub const HAT: u8 = 42;

/// Supported drum styles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrumStyle {
    House,
    Trap,
    BoomBap,
    HipHop,
    Lofi,
}

impl DrumStyle {
    pub fn parse(s: &str) -> Option<DrumStyle> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "house" | "techno" => Some(DrumStyle::House),
            "trap" => Some(DrumStyle::Trap),
            "boom_bap" | "boombap" => Some(DrumStyle::BoomBap),
            "hiphop" | "hip_hop" => Some(DrumStyle::HipHop),
            "lofi" | "lo_fi" | "ambient" | "unknown" => Some(DrumStyle::Lofi),
            _ => None,
        }
    }
}

/// Trap kick candidate positions over a 2-bar (32-step) grid
const TRAP_KICK_STEPS: [u32; 10] = [0, 3, 7, 10, 13, 16, 19, 23, 27, 31];
/// Boom-bap kick positions, density gated
const BOOM_BAP_KICK_STEPS: [u32; 8] = [0, 6, 10, 14, 16, 22, 26, 30];

/// Generate drum notes into `pattern` (existing notes are replaced).
///
/// The grid is 16th steps (`ppq/4` ticks); `density` in [0,1] gates hats
/// and probabilistic kicks. Pitches are plain GM (36/38/42) so role
/// expansion is not required downstream.
pub fn generate_drums(pattern: &mut Pattern, ppq: u32, style: DrumStyle, seed: u64, density: f64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let step = (ppq / 4).max(1);
    let steps = (pattern.length / step).max(1);
    let density = density.clamp(0.0, 1.0);

    pattern.notes.clear();

    for s in 0..steps {
        let tick = s * step;
        let sm32 = s % 32;

        match style {
            DrumStyle::House => {
                if rng.random::<f64>() < density.max(0.2) {
                    pattern.notes.push(Note::new(tick, step / 2, HAT, 65));
                }
                if s % 4 == 0 {
                    pattern.notes.push(Note::new(tick, step, KICK, 110));
                }
                if s % 8 == 4 {
                    pattern.notes.push(Note::new(tick, step, SNARE, 105));
                }
            }
            DrumStyle::Trap => {
                if rng.random::<f64>() < (density + 0.1).min(1.0) {
                    pattern.notes.push(Note::new(tick, step / 2, HAT, 62));
                }
                if TRAP_KICK_STEPS.contains(&sm32)
                    && rng.random::<f64>() < 0.35 + 0.55 * density
                {
                    pattern.notes.push(Note::new(tick, step, KICK, 115));
                }
                if sm32 == 8 || sm32 == 24 {
                    pattern.notes.push(Note::new(tick, step, SNARE, 110));
                }
                // occasional 32nd hat roll
                if rng.random::<f64>() < 0.12 * density.max(0.4) {
                    let half = (step / 2).max(1);
                    pattern
                        .notes
                        .push(Note::new(tick + half, half / 2 + 1, HAT, 58));
                }
            }
            DrumStyle::BoomBap => {
                if s % 2 == 0 {
                    pattern.notes.push(Note::new(tick, step / 2, HAT, 68));
                }
                if BOOM_BAP_KICK_STEPS.contains(&sm32) && rng.random::<f64>() < density {
                    pattern.notes.push(Note::new(tick, step, KICK, 112));
                }
                if sm32 % 8 == 4 {
                    pattern.notes.push(Note::new(tick, step, SNARE, 108));
                }
            }
            DrumStyle::HipHop => {
                if rng.random::<f64>() < density.clamp(0.2, 1.0) {
                    pattern.notes.push(Note::new(tick, step / 2, HAT, 65));
                }
                if matches!(s % 16, 0 | 6 | 8 | 14) && rng.random::<f64>() < density {
                    pattern.notes.push(Note::new(tick, step, KICK, 115));
                }
                if s % 8 == 4 {
                    pattern.notes.push(Note::new(tick, step, SNARE, 105));
                }
            }
            DrumStyle::Lofi => {
                if rng.random::<f64>() < density.clamp(0.2, 1.0) {
                    pattern.notes.push(Note::new(tick, step / 2, HAT, 60));
                }
                if matches!(s % 16, 0 | 7 | 10 | 14) && rng.random::<f64>() < density {
                    pattern.notes.push(Note::new(tick, step, KICK, 100));
                }
                if s % 8 == 4 {
                    pattern.notes.push(Note::new(tick, step, SNARE, 95));
                }
            }
        }
    }

    pattern.notes.sort_by_key(Note::order_key);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_2_bars() -> Pattern {
        Pattern::new("d", 480 * 8) // 2 bars at PPQ 480
    }

    fn steps_with_pitch(pat: &Pattern, pitch: u8, step: u32) -> Vec<u32> {
        let mut out: Vec<u32> = pat
            .notes
            .iter()
            .filter(|n| n.pitch == pitch)
            .map(|n| n.start / step)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    #[test]
    fn test_house_four_on_the_floor() {
        let mut pat = pattern_2_bars();
        generate_drums(&mut pat, 480, DrumStyle::House, 0, 0.85);
        let kicks = steps_with_pitch(&pat, KICK, 120);
        assert_eq!(kicks, vec![0, 4, 8, 12, 16, 20, 24, 28]);
    }

    #[test]
    fn test_house_snare_on_backbeat() {
        let mut pat = pattern_2_bars();
        generate_drums(&mut pat, 480, DrumStyle::House, 3, 0.85);
        let snares = steps_with_pitch(&pat, SNARE, 120);
        assert_eq!(snares, vec![4, 12, 20, 28]);
    }

    #[test]
    fn test_trap_halftime_snares() {
        let mut pat = pattern_2_bars();
        generate_drums(&mut pat, 480, DrumStyle::Trap, 5, 0.8);
        let snares = steps_with_pitch(&pat, SNARE, 120);
        assert_eq!(snares, vec![8, 24]);
    }

    #[test]
    fn test_trap_kicks_only_on_candidate_steps() {
        let mut pat = pattern_2_bars();
        generate_drums(&mut pat, 480, DrumStyle::Trap, 9, 1.0);
        for s in steps_with_pitch(&pat, KICK, 120) {
            assert!(TRAP_KICK_STEPS.contains(&(s % 32)), "bad kick step {}", s);
        }
    }

    #[test]
    fn test_boom_bap_snares_on_two_and_four() {
        let mut pat = pattern_2_bars();
        generate_drums(&mut pat, 480, DrumStyle::BoomBap, 2, 0.7);
        let snares = steps_with_pitch(&pat, SNARE, 120);
        assert_eq!(snares, vec![4, 12, 20, 28]);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let mut a = pattern_2_bars();
        let mut b = pattern_2_bars();
        generate_drums(&mut a, 480, DrumStyle::Trap, 42, 0.8);
        generate_drums(&mut b, 480, DrumStyle::Trap, 42, 0.8);
        assert_eq!(a.notes, b.notes);

        let mut c = pattern_2_bars();
        generate_drums(&mut c, 480, DrumStyle::Trap, 43, 0.8);
        assert_ne!(a.notes, c.notes);
    }

    #[test]
    fn test_density_gates_hats() {
        let mut sparse = pattern_2_bars();
        let mut dense = pattern_2_bars();
        generate_drums(&mut sparse, 480, DrumStyle::Trap, 7, 0.1);
        generate_drums(&mut dense, 480, DrumStyle::Trap, 7, 1.0);
        let hats = |p: &Pattern| p.notes.iter().filter(|n| n.pitch == HAT).count();
        assert!(hats(&dense) > hats(&sparse));
    }

    #[test]
    fn test_style_parse() {
        assert_eq!(DrumStyle::parse("boom-bap"), Some(DrumStyle::BoomBap));
        assert_eq!(DrumStyle::parse("HOUSE"), Some(DrumStyle::House));
        assert_eq!(DrumStyle::parse("polka"), None);
    }
}
