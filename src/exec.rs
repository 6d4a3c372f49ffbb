//! The narrow subprocess boundary.
//!
//! Every external invocation in the crate goes through this module: the
//! media tool (`ffmpeg`/`ffprobe`) and the SoundFont renderer
//! (`fluidsynth`). Callers build complete argument lists; this module runs
//! them synchronously and returns captured output. All *parsing* of tool
//! output lives in `analysis`, not here.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{ClawError, Result};

/// Captured output of one tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

fn run(program: &str, args: &[String], check: bool) -> Result<ToolOutput> {
    log::debug!("exec: {} {}", program, args.join(" "));
    let out = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| ClawError::ExternalTool(format!("{} failed to start: {}", program, e)))?;

    let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
    if check && !out.status.success() {
        return Err(ClawError::ExternalTool(format!(
            "{} exited with {}: {}",
            program,
            out.status,
            stderr.lines().rev().take(4).collect::<Vec<_>>().join(" | ")
        )));
    }
    Ok(ToolOutput {
        stdout: out.stdout,
        stderr,
    })
}

/// Run the media tool, failing on non-zero exit
pub fn ffmpeg(args: &[String]) -> Result<ToolOutput> {
    run("ffmpeg", args, true)
}

/// Run the media tool and keep its output even on non-zero exit
/// (some probe filters exit non-zero on odd inputs)
pub fn ffmpeg_lenient(args: &[String]) -> Result<ToolOutput> {
    run("ffmpeg", args, false)
}

/// Run ffprobe, failing on non-zero exit
pub fn ffprobe(args: &[String]) -> Result<ToolOutput> {
    run("ffprobe", args, true)
}

/// Render a MIDI file through the external SoundFont renderer.
///
/// Produces `out_wav` or fails with `ExternalTool`.
pub fn fluidsynth_render(
    midi_path: &Path,
    soundfont: &Path,
    out_wav: &Path,
    sample_rate: u32,
) -> Result<()> {
    let args = vec![
        "-ni".to_string(),
        "-F".to_string(),
        out_wav.to_string_lossy().into_owned(),
        "-r".to_string(),
        sample_rate.to_string(),
        soundfont.to_string_lossy().into_owned(),
        midi_path.to_string_lossy().into_owned(),
    ];
    run("fluidsynth", &args, true)?;
    if !out_wav.exists() {
        return Err(ClawError::ExternalTool(format!(
            "soundfont renderer produced no output: {}",
            out_wav.display()
        )));
    }
    Ok(())
}

/// Convenience: standard quiet ffmpeg prefix for file-to-file jobs
pub fn ffmpeg_base_args() -> Vec<String> {
    ["-y", "-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Convenience: quiet analysis prefix (keeps stderr output for parsing)
pub fn ffmpeg_analysis_args() -> Vec<String> {
    ["-hide_banner", "-nostats"].iter().map(|s| s.to_string()).collect()
}
