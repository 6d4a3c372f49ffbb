//! The generator: prompt -> brief -> script -> project, with novelty
//! constraints and closed-loop auto-tune.

pub mod bass;
pub mod brief;
pub mod drums;
pub mod fingerprint;
pub mod packs;
pub mod script;
pub mod style;
pub mod stylepack;

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::analysis::bands::band_energy_report;
use crate::error::Result;
use crate::generate::brief::parse_prompt;
use crate::generate::fingerprint::project_similarity;
use crate::generate::script::{brief_to_script, RoleVolumes};
use crate::model::Project;
use crate::script::{RunnerOptions, ScriptRunner};

/// Result of the prompt generation loop
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub brief_title: String,
    pub out_prefix: String,
    pub script_path: PathBuf,
    pub iterations: u32,
    pub similarities: Vec<f64>,
    pub preview_path: Option<PathBuf>,
    pub audio_reports: Vec<Value>,
}

/// Options for [`generate_from_prompt`]
#[derive(Debug, Clone)]
pub struct PromptOptions {
    pub tools_dir: PathBuf,
    pub max_iters: u32,
    pub seed: u64,
    pub max_similarity: Option<f64>,
    pub write_script: bool,
    /// Closed loop: render previews and auto-tune between iterations
    pub soundfont: Option<PathBuf>,
    pub render: bool,
    pub preview_bars: u32,
    pub auto_tune: bool,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            tools_dir: PathBuf::from("tools"),
            max_iters: 3,
            seed: 0,
            max_similarity: None,
            write_script: true,
            soundfont: None,
            render: false,
            preview_bars: 8,
            auto_tune: true,
        }
    }
}

fn run_script_to_project(script: &str, base_dir: Option<&Path>) -> Result<Project> {
    let mut runner = ScriptRunner::new(RunnerOptions {
        soundfont: None,
        strict: true,
        dry_run: true,
    });
    runner.run_text(script, base_dir)?;
    runner.into_project()
}

/// Prompt -> brief -> script generation with novelty scoring and an
/// optional closed render/analyze/auto-tune loop.
pub fn generate_from_prompt(
    prompt: &str,
    out_prefix: &str,
    opts: &PromptOptions,
) -> Result<GenerationResult> {
    let mut brief = parse_prompt(prompt, Some(out_prefix));
    if let Some(ms) = opts.max_similarity {
        brief.novelty.max_similarity = ms;
    }

    std::fs::create_dir_all(&opts.tools_dir)?;
    let script_path = opts.tools_dir.join(format!("{}.txt", out_prefix));

    let mut prev: Option<Project> = None;
    let mut similarities: Vec<f64> = Vec::new();
    let mut audio_reports: Vec<Value> = Vec::new();

    // auto-tune state carried across iterations
    let mut volumes = RoleVolumes::new();
    let mut mastering_preset: Option<String> = None;

    let mut chosen_script: Option<String> = None;
    let mut preview_path: Option<PathBuf> = None;

    for i in 0..opts.max_iters.max(1) {
        let cur_seed = opts.seed + i as u64;
        let gen = brief_to_script(
            &brief,
            cur_seed,
            Some(out_prefix),
            mastering_preset.as_deref(),
            &volumes,
        );
        let proj = run_script_to_project(&gen.script, None)?;

        let mut novelty_ok = true;
        if let Some(p) = &prev {
            let sim = project_similarity(p, &proj);
            similarities.push(sim);
            novelty_ok = sim <= brief.novelty.max_similarity;
        }
        chosen_script = Some(gen.script.clone());

        if opts.render {
            let soundfont = opts.soundfont.clone().ok_or_else(|| {
                crate::error::ClawError::InvalidInput(
                    "closed-loop rendering requires a soundfont".to_string(),
                )
            })?;

            // rewrite the preview line for the requested bar count
            let rewritten: String = gen
                .script
                .lines()
                .map(|ln| {
                    if ln.trim_start().starts_with("export_preview_mp3 ") {
                        let out = ln.split_whitespace().nth(1).unwrap_or("preview.mp3");
                        format!(
                            "export_preview_mp3 {} bars={} start=0:0 preset={}",
                            out, opts.preview_bars, gen.mastering_preset
                        )
                    } else {
                        ln.to_string()
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");

            let mut runner = ScriptRunner::new(RunnerOptions {
                soundfont: Some(soundfont),
                strict: true,
                dry_run: false,
            });
            runner.run_text(&rewritten, None)?;

            let preview = PathBuf::from(format!("out/{}.preview.mp3", out_prefix));
            if preview.exists() {
                let rep = band_energy_report(preview.to_str().unwrap_or_default())?;
                let get = |k: &str| rep.get(k).map(|b| b.mean_volume).unwrap_or(0.0);

                if opts.auto_tune {
                    // too much sub -> reduce the bass
                    if get("sub_lt90") - get("rest_ge90") > 6.0 {
                        let cur = volumes.get("bass").copied().unwrap_or(105);
                        volumes.insert("bass".to_string(), cur.saturating_sub(10).max(60));
                    }
                    // overall too quiet -> louder master preset
                    if get("full") < -30.0 {
                        mastering_preset = Some("demo".to_string());
                    }
                }

                audio_reports.push(serde_json::to_value(&rep)?);
                preview_path = Some(preview);
            }
        }

        // stop early once the novelty constraint holds (after at least one
        // comparison)
        if prev.is_some() && novelty_ok {
            break;
        }
        prev = Some(proj);
    }

    let script = chosen_script.expect("at least one iteration ran");
    if opts.write_script {
        std::fs::write(&script_path, &script)?;
    }

    Ok(GenerationResult {
        brief_title: brief.title,
        out_prefix: out_prefix.to_string(),
        script_path,
        iterations: opts.max_iters.max(1),
        similarities,
        preview_path,
        audio_reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_from_prompt_writes_script() {
        let dir = tempfile::tempdir().unwrap();
        let opts = PromptOptions {
            tools_dir: dir.path().to_path_buf(),
            max_iters: 2,
            seed: 0,
            max_similarity: Some(0.92),
            write_script: true,
            ..Default::default()
        };
        let res = generate_from_prompt("dark trap 140bpm", "prompt_test", &opts).unwrap();
        assert!(res.script_path.exists());
        let text = std::fs::read_to_string(&res.script_path).unwrap();
        assert!(text.contains("new_project prompt_test 140"));
        assert!(text.contains("gen_drums"));
        assert_eq!(res.brief_title, "prompt_test");
    }

    #[test]
    fn test_generation_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let opts = PromptOptions {
            tools_dir: dir.path().to_path_buf(),
            max_iters: 2,
            seed: 5,
            write_script: true,
            ..Default::default()
        };
        let a = generate_from_prompt("lofi 82bpm", "det_a", &opts).unwrap();
        let b = generate_from_prompt("lofi 82bpm", "det_b", &opts).unwrap();
        let ta = std::fs::read_to_string(&a.script_path)
            .unwrap()
            .replace("det_a", "X");
        let tb = std::fs::read_to_string(&b.script_path)
            .unwrap()
            .replace("det_b", "X");
        assert_eq!(ta, tb);
    }

    #[test]
    fn test_similarities_recorded_across_iterations() {
        let dir = tempfile::tempdir().unwrap();
        let opts = PromptOptions {
            tools_dir: dir.path().to_path_buf(),
            max_iters: 3,
            seed: 1,
            // force iteration by demanding impossible novelty
            max_similarity: Some(0.0),
            write_script: false,
            ..Default::default()
        };
        let res = generate_from_prompt("house groove", "sim_test", &opts).unwrap();
        assert!(!res.similarities.is_empty());
        for s in &res.similarities {
            assert!((0.0..=1.0).contains(s));
        }
    }
}
