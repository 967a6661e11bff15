//! Jukebox - a playback orchestrator for local music files.
//!
//! Keeps one "now playing" stream running by transcoding the current playlist
//! item into raw PCM and feeding it to an audio sink, while the playlist can be
//! edited, skipped through, paused and queried from an interactive console.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod jukebox;
pub mod pipe;
pub mod player;
#[cfg(test)]
pub mod test_utils;
pub mod transcode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Log to stderr so the console keeps stdout
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jukebox=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    cli::run_command(&args)
}
