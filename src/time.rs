//! Tick arithmetic and musical time parsing
//!
//! The whole pipeline runs in integer MIDI ticks with a project-wide PPQ
//! (pulses per quarter note). 4/4 time is assumed throughout.

use crate::error::{ClawError, Result};
use crate::model::Project;

/// Ticks in one 4/4 bar at the given PPQ
pub fn ticks_per_bar(ppq: u32) -> u32 {
    ppq * 4
}

/// Parse a timecode string into absolute ticks.
///
/// Supported forms:
/// - bare integer ticks (`"960"`)
/// - `bar:beat` (`"2:0"` means bar 2, beat 0), 0-indexed, 4/4
/// - `bar:beat:subtick` (`"2:0:120"`)
///
/// Negative or malformed values are rejected.
///
/// # Example
/// ```
/// # use claw_daw::model::Project;
/// # use claw_daw::time::parse_timecode;
/// let proj = Project::new("demo", 120);
/// assert_eq!(parse_timecode(&proj, "2:1:60").unwrap(), 2 * 1920 + 480 + 60);
/// ```
pub fn parse_timecode(project: &Project, value: &str) -> Result<u32> {
    let s = value.trim();
    if s.is_empty() {
        return Err(ClawError::InvalidInput("empty timecode".to_string()));
    }

    if !s.contains(':') {
        return s
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .map(|v| v as u32)
            .ok_or_else(|| ClawError::InvalidInput(format!("invalid timecode: {}", value)));
    }

    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return Err(ClawError::InvalidInput(format!("invalid timecode: {}", value)));
    }

    let mut nums = [0i64; 3];
    for (i, p) in parts.iter().enumerate() {
        nums[i] = p
            .trim()
            .parse::<i64>()
            .map_err(|_| ClawError::InvalidInput(format!("invalid timecode: {}", value)))?;
        if nums[i] < 0 {
            return Err(ClawError::InvalidInput(
                "timecode must be >= 0".to_string(),
            ));
        }
    }

    let ppq = project.ppq as i64;
    let ticks = nums[0] * ppq * 4 + nums[1] * ppq + nums[2];
    Ok(ticks as u32)
}

/// Apply swing to a tick position.
///
/// Swing delays the odd 16th steps (step = ppq/4) by
/// `floor(step * swing_percent / 100)`. At 0% swing this is the identity.
/// Swing is applied exactly once, during flattening; it never composes.
pub fn apply_swing(tick: u32, ppq: u32, swing_percent: u32) -> u32 {
    if swing_percent == 0 {
        return tick;
    }
    let step = ppq / 4;
    if step == 0 {
        return tick;
    }
    if (tick / step) % 2 == 1 {
        tick + (step * swing_percent) / 100
    } else {
        tick
    }
}

/// Parse a quantize grid token into ticks.
///
/// Supported: note divisions (`4`, `8`, `16`, `32`), fractions (`1/16`),
/// and `beat` for a quarter note.
pub fn parse_grid(ppq: u32, token: &str) -> Result<u32> {
    let t = token.trim().to_lowercase();
    if t == "beat" {
        return Ok(ppq);
    }
    let denom: u32 = if let Some(rest) = t.strip_prefix("1/") {
        rest.parse()
            .map_err(|_| ClawError::InvalidInput(format!("invalid grid: {}", token)))?
    } else {
        t.parse()
            .map_err(|_| ClawError::InvalidInput(format!("invalid grid: {}", token)))?
    };
    if denom == 0 {
        return Err(ClawError::InvalidInput("grid must be > 0".to_string()));
    }
    // quarter note is /4
    Ok(ppq * 4 / denom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proj() -> Project {
        Project::new("t", 120)
    }

    #[test]
    fn test_parse_timecode_bare_ticks() {
        assert_eq!(parse_timecode(&proj(), "960").unwrap(), 960);
        assert_eq!(parse_timecode(&proj(), "0").unwrap(), 0);
    }

    #[test]
    fn test_parse_timecode_bar_beat() {
        // default PPQ is 480, bar = 1920 ticks
        assert_eq!(parse_timecode(&proj(), "2:0").unwrap(), 3840);
        assert_eq!(parse_timecode(&proj(), "0:3").unwrap(), 1440);
        assert_eq!(parse_timecode(&proj(), "1:2:120").unwrap(), 1920 + 960 + 120);
    }

    #[test]
    fn test_parse_timecode_rejects_negatives() {
        assert!(parse_timecode(&proj(), "-5").is_err());
        assert!(parse_timecode(&proj(), "1:-2").is_err());
    }

    #[test]
    fn test_parse_timecode_rejects_malformed() {
        assert!(parse_timecode(&proj(), "").is_err());
        assert!(parse_timecode(&proj(), "a:b").is_err());
        assert!(parse_timecode(&proj(), "1:2:3:4").is_err());
    }

    #[test]
    fn test_swing_zero_is_identity() {
        for tick in [0u32, 120, 240, 360, 1920] {
            assert_eq!(apply_swing(tick, 480, 0), tick);
        }
    }

    #[test]
    fn test_swing_delays_odd_sixteenths() {
        // PPQ 480: step = 120. Odd steps get +60 at 50% swing.
        assert_eq!(apply_swing(0, 480, 50), 0);
        assert_eq!(apply_swing(120, 480, 50), 180);
        assert_eq!(apply_swing(240, 480, 50), 240);
        assert_eq!(apply_swing(360, 480, 50), 420);
    }

    #[test]
    fn test_parse_grid() {
        assert_eq!(parse_grid(480, "16").unwrap(), 120);
        assert_eq!(parse_grid(480, "1/8").unwrap(), 240);
        assert_eq!(parse_grid(480, "beat").unwrap(), 480);
        assert!(parse_grid(480, "0").is_err());
        assert!(parse_grid(480, "x").is_err());
    }
}
