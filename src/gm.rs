//! Minimal General MIDI program map.
//!
//! Not exhaustive; covers the instruments the generators and scripts name.
//! Program numbers are 0-based to match `program_change`.

use lazy_static::lazy_static;
use std::collections::BTreeMap;

use crate::error::{ClawError, Result};

lazy_static! {
    pub static ref GM_PROGRAMS: BTreeMap<&'static str, u8> = {
        let mut m = BTreeMap::new();
        m.insert("piano", 0);
        m.insert("acoustic_grand_piano", 0);
        m.insert("bright_piano", 1);
        m.insert("electric_piano", 4);
        m.insert("electric_piano_1", 4);
        m.insert("electric_piano_2", 5);
        m.insert("harpsichord", 6);
        m.insert("clav", 7);
        m.insert("celesta", 8);
        m.insert("glockenspiel", 9);
        m.insert("music_box", 10);
        m.insert("vibraphone", 11);
        m.insert("marimba", 12);
        m.insert("xylophone", 13);
        m.insert("organ", 16);
        m.insert("drawbar_organ", 16);
        m.insert("church_organ", 19);
        m.insert("accordion", 21);
        m.insert("guitar", 24);
        m.insert("acoustic_guitar", 24);
        m.insert("electric_guitar", 27);
        m.insert("bass", 32);
        m.insert("acoustic_bass", 32);
        m.insert("electric_bass", 33);
        m.insert("synth_bass_1", 38);
        m.insert("synth_bass_2", 39);
        m.insert("violin", 40);
        m.insert("strings", 48);
        m.insert("string_ensemble", 48);
        m.insert("synth_strings", 50);
        m.insert("choir", 52);
        m.insert("trumpet", 56);
        m.insert("trombone", 57);
        m.insert("tuba", 58);
        m.insert("sax", 64);
        m.insert("alto_sax", 65);
        m.insert("tenor_sax", 66);
        m.insert("oboe", 68);
        m.insert("clarinet", 71);
        m.insert("flute", 73);
        m.insert("lead", 80);
        m.insert("square_lead", 80);
        m.insert("saw_lead", 81);
        m.insert("synth_lead", 80);
        m.insert("pad", 88);
        m.insert("warm_pad", 89);
        m.insert("synth_pad", 88);
        m.insert("fx", 96);
        // GM drums live on channel 10, not a program
        m.insert("drums", 0);
        m
    };
}

/// Parse a MIDI program token.
///
/// Accepts an integer 0-127 (0-based), 1-128 (1-based, converted), or a GM
/// name from the table (case-insensitive, spaces become underscores).
pub fn parse_program(token: &str) -> Result<u8> {
    let t = token.trim().to_lowercase().replace(' ', "_");
    if let Some(p) = GM_PROGRAMS.get(t.as_str()) {
        return Ok(*p);
    }
    let n: i64 = t
        .parse()
        .map_err(|_| ClawError::InvalidInput(format!("unknown program: {}", token)))?;
    match n {
        0..=127 => Ok(n as u8),
        128 => Ok(127),
        _ => Err(ClawError::InvalidInput(
            "program must be 0-127 (or 1-128), or a GM name".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program_names() {
        assert_eq!(parse_program("piano").unwrap(), 0);
        assert_eq!(parse_program("Electric Piano").unwrap(), 4);
        assert_eq!(parse_program("saw_lead").unwrap(), 81);
    }

    #[test]
    fn test_parse_program_numbers() {
        assert_eq!(parse_program("0").unwrap(), 0);
        assert_eq!(parse_program("127").unwrap(), 127);
        assert_eq!(parse_program("128").unwrap(), 127);
        assert!(parse_program("129").is_err());
        assert!(parse_program("theremin_ultra").is_err());
    }
}
