//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `play`: build a jukebox and drive it from the console
//! - `console`: parsing of console input lines
//! - `settings`: device listing and config inspection

mod console;
mod play;
mod settings;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Runtime;

use crate::player::Backend;
use crate::transcode::Engine;

pub use play::cmd_play;
pub use settings::{cmd_config, cmd_devices};

/// Jukebox CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Queue files and play them, with an interactive console on stdin
    Play {
        /// Files or directories to queue
        paths: Vec<PathBuf>,
        /// Output backend (overrides config)
        #[arg(short, long, value_enum)]
        backend: Option<Backend>,
        /// Transcoding engine (overrides config)
        #[arg(short, long, value_enum)]
        engine: Option<Engine>,
        /// Output device name (or set JUKEBOX_DEVICE env var)
        #[arg(short, long, env = "JUKEBOX_DEVICE")]
        device: Option<String>,
        /// Initial gain (0.0-1.0)
        #[arg(short, long)]
        gain: Option<f32>,
    },
    /// List audio output devices
    Devices,
    /// Show the effective configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Play {
            paths,
            backend,
            engine,
            device,
            gain,
        } => {
            let rt = Runtime::new()?;
            let result = cmd_play(&rt, paths, *backend, *engine, device.as_deref(), *gain);
            // A stdin read may still be parked on a blocking thread
            rt.shutdown_timeout(Duration::from_millis(100));
            result
        }
        Commands::Devices => cmd_devices(),
        Commands::Config { init } => cmd_config(*init),
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Collect audio files from a path (file or directory, recursively), sorted.
pub(crate) fn collect_audio_files(path: &Path) -> Vec<PathBuf> {
    if path.is_dir() {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| is_audio_file(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect();
        files.sort();
        files
    } else {
        vec![path.to_path_buf()]
    }
}

/// Check if a path has an audio file extension
pub(crate) fn is_audio_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase());
    matches!(ext.as_deref(), Some("mp3" | "flac" | "ogg" | "m4a" | "wav" | "aac"))
}
