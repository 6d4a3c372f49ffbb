//! User-level configuration lookup: data directory, sample packs, soundfont.
//!
//! Everything is resolved from environment variables first so tests and CI
//! can redirect all filesystem access. Reads are read-only at rest; writes
//! happen only through explicit commands.

use std::path::PathBuf;

/// Application data directory (`CLAW_DAW_DATA_DIR`, else
/// `$XDG_DATA_HOME/claw-daw`, else `~/.local/share/claw-daw`).
pub fn app_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CLAW_DAW_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("claw-daw");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".local/share/claw-daw")
}

/// Directory holding sample pack manifests
/// (`CLAW_DAW_SAMPLE_PACKS_DIR` override)
pub fn sample_packs_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CLAW_DAW_SAMPLE_PACKS_DIR") {
        return PathBuf::from(dir);
    }
    app_data_dir().join("sample_packs")
}

/// Well-known soundfont locations probed by [`find_default_soundfont`]
const SOUNDFONT_CANDIDATES: [&str; 4] = [
    "/usr/share/sounds/sf2/FluidR3_GM.sf2",
    "/usr/share/sounds/sf2/default-GM.sf2",
    "/usr/share/soundfonts/FluidR3_GM.sf2",
    "/usr/share/soundfonts/default.sf2",
];

/// Locate a usable `.sf2`: explicit argument, `CLAW_DAW_SOUNDFONT`, then
/// well-known system paths.
pub fn find_soundfont(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Some(pb);
        }
    }
    if let Ok(env_sf) = std::env::var("CLAW_DAW_SOUNDFONT") {
        let pb = PathBuf::from(env_sf);
        if pb.exists() {
            return Some(pb);
        }
    }
    SOUNDFONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_is_nonempty() {
        assert!(!app_data_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_sample_packs_dir_under_data_dir_by_default() {
        if std::env::var("CLAW_DAW_SAMPLE_PACKS_DIR").is_err() {
            assert!(sample_packs_dir().ends_with("sample_packs"));
        }
    }
}
