//! Arrangement primitives: patterns, clips, sections and variations

use serde::{Deserialize, Serialize};

use super::Note;

/// A named, reusable block of notes owned by a track.
///
/// Note starts are pattern-relative ticks; `length` is the loop length used
/// when a clip repeats the pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Redundant with the owning map key; restored on load.
    #[serde(skip)]
    pub name: String,
    pub length: u32,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Pattern {
    pub fn new(name: &str, length: u32) -> Self {
        Self {
            name: name.to_string(),
            length,
            notes: Vec::new(),
        }
    }
}

/// Placement of a pattern on a track timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub pattern: String,
    pub start: u32,
    #[serde(default = "default_repeats")]
    pub repeats: u32,
}

fn default_repeats() -> u32 {
    1
}

impl Clip {
    pub fn new(pattern: &str, start: u32, repeats: u32) -> Self {
        Self {
            pattern: pattern.to_string(),
            start,
            repeats: repeats.max(1),
        }
    }
}

/// A named time span over the song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub start: u32,
    pub length: u32,
}

/// A pattern swap scoped to a section.
///
/// Example: in section "chorus", swap pattern a -> a2 for track 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    pub section: String,
    pub track_index: usize,
    pub src_pattern: String,
    pub dst_pattern: String,
}

/// Name of the section containing `tick`, if any
fn section_at_tick(sections: &[Section], tick: u32) -> Option<&str> {
    sections
        .iter()
        .find(|s| s.start <= tick && tick < s.start + s.length)
        .map(|s| s.name.as_str())
}

/// Resolve the effective pattern name for a clip placement.
///
/// Finds the section containing `tick`; if a variation matches that
/// section + track + source pattern, its destination wins, otherwise the
/// base name is returned unchanged. Pure lookup, no hidden state.
pub fn resolve_pattern_name<'a>(
    base_pattern: &'a str,
    track_index: usize,
    tick: u32,
    sections: &[Section],
    variations: &'a [Variation],
) -> &'a str {
    let Some(sec) = section_at_tick(sections, tick) else {
        return base_pattern;
    };
    variations
        .iter()
        .find(|v| {
            v.section == sec && v.track_index == track_index && v.src_pattern == base_pattern
        })
        .map(|v| v.dst_pattern.as_str())
        .unwrap_or(base_pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sections() -> Vec<Section> {
        vec![
            Section {
                name: "verse".to_string(),
                start: 0,
                length: 1000,
            },
            Section {
                name: "chorus".to_string(),
                start: 1000,
                length: 1000,
            },
        ]
    }

    fn variations() -> Vec<Variation> {
        vec![Variation {
            section: "chorus".to_string(),
            track_index: 0,
            src_pattern: "a".to_string(),
            dst_pattern: "a2".to_string(),
        }]
    }

    #[test]
    fn test_resolve_outside_any_section() {
        assert_eq!(
            resolve_pattern_name("a", 0, 5000, &sections(), &variations()),
            "a"
        );
    }

    #[test]
    fn test_resolve_substitutes_inside_matching_section() {
        assert_eq!(
            resolve_pattern_name("a", 0, 1500, &sections(), &variations()),
            "a2"
        );
    }

    #[test]
    fn test_resolve_requires_matching_track_and_pattern() {
        assert_eq!(
            resolve_pattern_name("a", 1, 1500, &sections(), &variations()),
            "a"
        );
        assert_eq!(
            resolve_pattern_name("b", 0, 1500, &sections(), &variations()),
            "b"
        );
    }

    #[test]
    fn test_section_bounds_are_half_open() {
        // tick 1000 is the start of "chorus", not the end of "verse"
        assert_eq!(
            resolve_pattern_name("a", 0, 1000, &sections(), &variations()),
            "a2"
        );
        // end of chorus is exclusive
        assert_eq!(
            resolve_pattern_name("a", 0, 2000, &sections(), &variations()),
            "a"
        );
    }
}
