//! Command-line interface for the jukebox.
//!
//! `jukebox play` runs an interactive console on top of [`crate::jukebox::Jukebox`];
//! the other subcommands inspect devices and configuration.

mod commands;

pub use commands::{Cli, Commands, run_command};
