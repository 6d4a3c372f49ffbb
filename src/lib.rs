//! # claw-daw
//!
//! An offline, deterministic, terminal-first music production pipeline.
//!
//! A headless script (or a natural-language prompt compiled into one)
//! builds a project model, which is flattened into timed note events,
//! rendered through the built-in synthesis engine and external tools, mixed
//! through a compiled filter graph, metered, and gated by a quality
//! workflow until the result passes or attempts run out.
//!
//! ## Quick Start
//!
//! ```no_run
//! use claw_daw::script::{RunnerOptions, ScriptRunner};
//!
//! fn main() -> Result<(), anyhow::Error> {
//!     let mut runner = ScriptRunner::new(RunnerOptions::default());
//!     runner.run_text(
//!         "new_project demo 124\n\
//!          add_track Drums\n\
//!          set_sampler 0 drums\n\
//!          new_pattern 0 d 2:0\n\
//!          gen_drums 0 d 2:0 house seed=0 density=0.85\n\
//!          place_pattern 0 d 0:0 8\n",
//!         None,
//!     )?;
//!     let project = runner.into_project()?;
//!     println!("{} tracks", project.tracks.len());
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod drum_macros;
pub mod drumkit;
pub mod error;
pub mod exec;
pub mod generate;
pub mod gm;
pub mod instruments;
pub mod midi;
pub mod mix;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod sample_pack;
pub mod script;
pub mod synth;
pub mod time;
pub mod transform;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{ClawError, Result};
    pub use crate::model::{
        Clip, Humanize, Note, Pattern, Project, SamplerMode, Section, Track, Variation,
    };
    pub use crate::pipeline::{flatten_track_notes, FlattenOptions};
    pub use crate::script::{RunnerOptions, ScriptRunner};
    pub use crate::time::{apply_swing, parse_timecode, ticks_per_bar};
}
