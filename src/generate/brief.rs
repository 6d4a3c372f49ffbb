//! Prompt -> Brief extraction.
//!
//! An intentionally offline heuristic parser: style token match, BPM and
//! key regexes, a mood word scan and a bar count. The goal is stable
//! behavior and good defaults, not NLP.

use lazy_static::lazy_static;
use regex::Regex;

/// Recognized style names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleName {
    HipHop,
    Lofi,
    House,
    Techno,
    Ambient,
    Trap,
    BoomBap,
    Unknown,
}

impl StyleName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StyleName::HipHop => "hiphop",
            StyleName::Lofi => "lofi",
            StyleName::House => "house",
            StyleName::Techno => "techno",
            StyleName::Ambient => "ambient",
            StyleName::Trap => "trap",
            StyleName::BoomBap => "boom_bap",
            StyleName::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> StyleName {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "hiphop" | "hip_hop" => StyleName::HipHop,
            "lofi" | "lo_fi" => StyleName::Lofi,
            "house" => StyleName::House,
            "techno" => StyleName::Techno,
            "ambient" => StyleName::Ambient,
            "trap" => StyleName::Trap,
            "boom_bap" | "boombap" => StyleName::BoomBap,
            _ => StyleName::Unknown,
        }
    }
}

/// Novelty constraints applied when iterating prompt -> song variants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoveltyConstraints {
    /// Similarity to the previous iteration must be <= this
    pub max_similarity: f64,
}

impl Default for NoveltyConstraints {
    fn default() -> Self {
        Self {
            max_similarity: 0.92,
        }
    }
}

/// A structured producer brief derived from a natural-language prompt
#[derive(Debug, Clone, PartialEq)]
pub struct Brief {
    pub prompt: String,
    pub title: String,
    pub style: StyleName,
    pub bpm: Option<u32>,
    pub key: Option<String>,
    pub mood: Option<String>,
    pub length_bars: u32,
    /// High-level palette roles used by the script generator
    pub roles: Vec<String>,
    pub novelty: NoveltyConstraints,
}

lazy_static! {
    static ref BPM_RE: Regex = Regex::new(r"(?i)\b(?:bpm|tempo)\s*[:=]?\s*(\d{2,3})\b").unwrap();
    static ref BPM_SUFFIX_RE: Regex = Regex::new(r"(?i)\b(\d{2,3})\s*bpm\b").unwrap();
    static ref KEY_RE: Regex =
        Regex::new(r"(?i)\bkey\s*[:=]?\s*([A-Ga-g])\s*(#|b)?\s*(major|minor|maj|min)?\b").unwrap();
    static ref BARS_RE: Regex = Regex::new(r"(?i)\b(?:total\s*)?(\d{1,3})\s*bars\b").unwrap();
}

const STYLE_WORDS: [(StyleName, &[&str]); 7] = [
    (StyleName::Trap, &["trap"]),
    (StyleName::BoomBap, &["boom bap", "boom-bap", "boombap"]),
    (StyleName::HipHop, &["hiphop", "hip-hop", "hip hop"]),
    (StyleName::Lofi, &["lofi", "lo-fi", "lo fi", "chillhop", "chill-hop"]),
    (StyleName::House, &["house", "deep house", "garage"]),
    (StyleName::Techno, &["techno", "industrial", "rave"]),
    (StyleName::Ambient, &["ambient", "drone"]),
];

const MOOD_WORDS: [&str; 8] = [
    "dark", "bright", "moody", "chill", "aggressive", "uplifting", "sad", "happy",
];

fn guess_style(p: &str) -> StyleName {
    let s = p.to_lowercase();
    for (style, words) in STYLE_WORDS {
        if words.iter().any(|w| s.contains(w)) {
            return style;
        }
    }
    StyleName::Unknown
}

fn guess_bpm(p: &str) -> Option<u32> {
    BPM_RE
        .captures(p)
        .or_else(|| BPM_SUFFIX_RE.captures(p))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn guess_key(p: &str) -> Option<String> {
    let c = KEY_RE.captures(p)?;
    let note = c.get(1)?.as_str().to_uppercase();
    let accidental = c.get(2).map(|m| m.as_str()).unwrap_or("");
    let mode = match c.get(3).map(|m| m.as_str().to_lowercase()).as_deref() {
        Some("min") | Some("minor") => " minor",
        Some("maj") | Some("major") => " major",
        _ => "",
    };
    Some(format!("{}{}{}", note, accidental, mode))
}

fn guess_length_bars(p: &str) -> Option<u32> {
    BARS_RE
        .captures(p)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| (4..=256).contains(n))
}

/// Parse a natural-language prompt into a structured [`Brief`]
pub fn parse_prompt(prompt: &str, title: Option<&str>) -> Brief {
    let p = prompt.trim();

    let title = match title {
        Some(t) => t.to_string(),
        None => {
            let first = p.lines().next().unwrap_or("untitled").trim();
            let t: String = first.chars().take(80).collect();
            if t.is_empty() {
                "untitled".to_string()
            } else {
                t
            }
        }
    };

    let pl = p.to_lowercase();
    let mood = MOOD_WORDS
        .iter()
        .find(|w| pl.contains(**w))
        .map(|w| w.to_string());

    Brief {
        prompt: p.to_string(),
        title,
        style: guess_style(p),
        bpm: guess_bpm(p),
        key: guess_key(p),
        mood,
        length_bars: guess_length_bars(p).unwrap_or(24),
        roles: ["drums", "bass", "keys", "pad", "lead"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        novelty: NoveltyConstraints::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_detection() {
        assert_eq!(parse_prompt("dark trap banger", None).style, StyleName::Trap);
        assert_eq!(
            parse_prompt("chill lo-fi beat to study to", None).style,
            StyleName::Lofi
        );
        assert_eq!(parse_prompt("deep house groove", None).style, StyleName::House);
        assert_eq!(parse_prompt("boom bap cypher", None).style, StyleName::BoomBap);
        assert_eq!(parse_prompt("a nice song", None).style, StyleName::Unknown);
    }

    #[test]
    fn test_bpm_detection() {
        assert_eq!(parse_prompt("BPM: 74", None).bpm, Some(74));
        assert_eq!(parse_prompt("a 140bpm banger", None).bpm, Some(140));
        assert_eq!(parse_prompt("tempo 120 please", None).bpm, Some(120));
        assert_eq!(parse_prompt("no tempo here", None).bpm, None);
    }

    #[test]
    fn test_key_detection() {
        assert_eq!(
            parse_prompt("key: C# minor", None).key.as_deref(),
            Some("C# minor")
        );
        assert_eq!(
            parse_prompt("key = Gb major", None).key.as_deref(),
            Some("Gb major")
        );
        assert_eq!(parse_prompt("in the pocket", None).key, None);
    }

    #[test]
    fn test_bars_and_mood() {
        let b = parse_prompt("a dark 32 bars loop", None);
        assert_eq!(b.length_bars, 32);
        assert_eq!(b.mood.as_deref(), Some("dark"));

        // out-of-range bar counts fall back to the default
        assert_eq!(parse_prompt("99999 bars", None).length_bars, 24);
    }

    #[test]
    fn test_title_from_first_line() {
        let b = parse_prompt("My Song Idea\nwith details", None);
        assert_eq!(b.title, "My Song Idea");
        let b2 = parse_prompt("x", Some("explicit"));
        assert_eq!(b2.title, "explicit");
    }
}
