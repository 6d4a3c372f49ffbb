//! claw-daw command line entry point.
//!
//! Thin argument plumbing over the library: run headless scripts, generate
//! from prompts / genre packs / stylepacks, and drive the quality workflow.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use claw_daw::generate::stylepack::{normalize_beatspec, run_stylepack, BeatSpec};
use claw_daw::generate::{generate_from_prompt, packs, PromptOptions};
use claw_daw::script::{RunnerOptions, ScriptRunner};
use claw_daw::workflow::{run_quality_workflow, WorkflowOptions};

#[derive(Parser)]
#[command(name = "claw-daw", version, about = "Offline, deterministic, terminal-first music production")]
struct Cli {
    /// Path to a SoundFont (.sf2); falls back to CLAW_DAW_SOUNDFONT
    #[arg(long, global = true)]
    soundfont: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a headless script file ("-" reads stdin)
    Run {
        script: String,
        /// Stop on the first command error
        #[arg(long)]
        strict: bool,
        /// Execute mutations but skip renders and file writes
        #[arg(long)]
        dry_run: bool,
    },
    /// Generate a script (and optionally audio) from a text prompt
    Generate {
        prompt: String,
        #[arg(long, default_value = "generated")]
        out_prefix: String,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 3)]
        max_iters: u32,
        /// Render previews and auto-tune between iterations
        #[arg(long)]
        render: bool,
    },
    /// Generate from a genre pack (trap | house | boom_bap)
    Pack {
        pack: String,
        #[arg(long, default_value = "pack_out")]
        out_prefix: String,
        #[arg(long, default_value_t = 0)]
        seed: i64,
        #[arg(long, default_value_t = 6)]
        max_attempts: u32,
    },
    /// Run a stylepack end to end (generate + render + score + iterate)
    Stylepack {
        name: String,
        #[arg(long, default_value = "beat")]
        out_prefix: String,
        #[arg(long, default_value_t = 0)]
        seed: i64,
        #[arg(long, default_value_t = 6)]
        max_attempts: u32,
    },
    /// Run the quality workflow over a saved project
    Quality {
        project_json: String,
        #[arg(long, default_value = "mix")]
        out_prefix: String,
        #[arg(long, default_value = "edm_streaming")]
        preset: String,
        #[arg(long)]
        presets_path: Option<PathBuf>,
        #[arg(long)]
        section_gain: bool,
    },
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            script,
            strict,
            dry_run,
        } => {
            let (text, base_dir) = if script == "-" {
                let mut buf = String::new();
                use std::io::Read;
                std::io::stdin().read_to_string(&mut buf)?;
                (buf, None)
            } else {
                let path = PathBuf::from(&script);
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read script {}", path.display()))?;
                (text, path.parent().map(PathBuf::from))
            };

            let mut runner = ScriptRunner::new(RunnerOptions {
                soundfont: cli.soundfont,
                strict,
                dry_run,
            });
            runner.run_text(&text, base_dir.as_deref())?;
            for w in &runner.warnings {
                eprintln!("warning: {}", w);
            }
            println!("{} commands executed", runner.commands_executed);
            Ok(())
        }
        Command::Generate {
            prompt,
            out_prefix,
            seed,
            max_iters,
            render,
        } => {
            let opts = PromptOptions {
                seed,
                max_iters,
                render,
                soundfont: cli.soundfont,
                ..Default::default()
            };
            let res = generate_from_prompt(&prompt, &out_prefix, &opts)?;
            println!("script: {}", res.script_path.display());
            if let Some(p) = res.preview_path {
                println!("preview: {}", p.display());
            }
            Ok(())
        }
        Command::Pack {
            pack,
            out_prefix,
            seed,
            max_attempts,
        } => {
            let res = packs::generate_from_genre_pack(
                &pack,
                &out_prefix,
                &PathBuf::from("tools"),
                seed,
                max_attempts,
                Some(0.92),
                true,
            )?;
            println!("script: {}", res.script_path.display());
            Ok(())
        }
        Command::Stylepack {
            name,
            out_prefix,
            seed,
            max_attempts,
        } => {
            let sf = claw_daw::config::find_soundfont(
                cli.soundfont.as_deref().and_then(|p| p.to_str()),
            )
            .context("no soundfont available; pass --soundfont or set CLAW_DAW_SOUNDFONT")?;
            let mut spec = BeatSpec::new(&out_prefix, &name)?;
            spec.seed = seed;
            spec.max_attempts = max_attempts;
            let spec = normalize_beatspec(spec)?;
            let report = run_stylepack(
                spec,
                &out_prefix,
                &sf,
                &PathBuf::from("tools"),
                &PathBuf::from("out"),
            )?;
            println!("report: {}", report.display());
            Ok(())
        }
        Command::Quality {
            project_json,
            out_prefix,
            preset,
            presets_path,
            section_gain,
        } => {
            let opts = WorkflowOptions {
                preset,
                presets_path,
                section_gain,
                ..Default::default()
            };
            let report = run_quality_workflow(
                &project_json,
                &out_prefix,
                cli.soundfont.as_deref().and_then(|p| p.to_str()),
                &opts,
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
