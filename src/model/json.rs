//! Project persistence: versioned JSON load/save.
//!
//! Output is key-sorted, two-space indented, with a trailing newline so
//! saved files diff cleanly. Loading always runs migration + validation.

use std::path::Path;

use serde_json::Value;

use crate::error::{ClawError, Result};
use crate::model::validate::{migrate_project_value, validate_project};
use crate::model::Project;

/// Load a project from a JSON file, migrating and clamping as needed.
///
/// Corrupted JSON is fatal; recoverable schema drift is repaired silently.
pub fn load_project<P: AsRef<Path>>(path: P) -> Result<Project> {
    let p = path.as_ref();
    let text = std::fs::read_to_string(p)
        .map_err(|e| ClawError::Io(format!("cannot read project {}: {}", p.display(), e)))?;
    let data: Value = serde_json::from_str(&text)
        .map_err(|e| ClawError::Validation(format!("corrupted project JSON {}: {}", p.display(), e)))?;
    let data = migrate_project_value(data);
    let mut project: Project = serde_json::from_value(data)
        .map_err(|e| ClawError::Validation(format!("project shape invalid {}: {}", p.display(), e)))?;
    restore_pattern_names(&mut project);
    validate_project(&mut project);
    project.path = Some(p.to_string_lossy().into_owned());
    project.dirty = false;
    Ok(project)
}

/// Serialize a project to its canonical JSON string (key-sorted, two-space
/// indented, trailing newline).
pub fn project_to_json(project: &Project) -> Result<String> {
    // Round-trip through Value so object keys come out sorted.
    let value = serde_json::to_value(project)?;
    let mut s = serde_json::to_string_pretty(&value)?;
    s.push('\n');
    Ok(s)
}

/// Save a project, defaulting to its load path, then its name.
pub fn save_project(project: &mut Project, path: Option<&str>) -> Result<String> {
    let out_path = match path {
        Some(p) => p.to_string(),
        None => match &project.path {
            Some(p) => p.clone(),
            None => format!("{}.json", project.name),
        },
    };
    let out = Path::new(&out_path);
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(out, project_to_json(project)?)?;
    project.path = Some(out_path.clone());
    project.dirty = false;
    Ok(out_path)
}

fn restore_pattern_names(project: &mut Project) {
    for t in &mut project.tracks {
        for (name, pat) in &mut t.patterns {
            pat.name = name.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Note, Pattern, Track};

    fn sample_project() -> Project {
        let mut p = Project::new("roundtrip", 128);
        p.swing_percent = 12;
        let mut t = Track::new("Drums", 0);
        let mut pat = Pattern::new("a", 1920);
        pat.notes.push(Note::new(0, 120, 0, 100).with_role("kick"));
        t.patterns.insert("a".to_string(), pat);
        t.clips.push(crate::model::Clip::new("a", 0, 4));
        p.tracks.push(t);
        p
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        let mut p = sample_project();
        save_project(&mut p, Some(path.to_str().unwrap())).unwrap();

        let loaded = load_project(&path).unwrap();
        assert_eq!(loaded.name, p.name);
        assert_eq!(loaded.tempo_bpm, p.tempo_bpm);
        assert_eq!(loaded.swing_percent, p.swing_percent);
        assert_eq!(loaded.tracks, p.tracks);
    }

    #[test]
    fn test_output_is_key_sorted_with_trailing_newline() {
        let p = sample_project();
        let s = project_to_json(&p).unwrap();
        assert!(s.ends_with('\n'));
        let name_pos = s.find("\"name\"").unwrap();
        let tempo_pos = s.find("\"tempo_bpm\"").unwrap();
        let mix_pos = s.find("\"mix\"").unwrap();
        // alphabetical: mix < name < tempo_bpm
        assert!(mix_pos < name_pos);
        assert!(name_pos < tempo_pos);
    }

    #[test]
    fn test_load_restores_pattern_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        let mut p = sample_project();
        save_project(&mut p, Some(path.to_str().unwrap())).unwrap();
        let loaded = load_project(&path).unwrap();
        assert_eq!(loaded.tracks[0].patterns["a"].name, "a");
    }

    #[test]
    fn test_load_rejects_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_project(&path),
            Err(ClawError::Validation(_))
        ));
    }

    #[test]
    fn test_load_migrates_old_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        std::fs::write(
            &path,
            r#"{"name": "legacy", "tempo_bpm": 90, "ppq": 480,
                "tracks": [{"name": "t", "channel": 3}]}"#,
        )
        .unwrap();
        let p = load_project(&path).unwrap();
        assert_eq!(p.schema_version, crate::model::validate::CURRENT_SCHEMA_VERSION);
        assert_eq!(p.tracks[0].bus, "music");
        assert_eq!(p.tracks[0].drum_kit, "trap_hard");
    }
}
