//! Device listing and configuration commands.

use crate::config;
use crate::error::ResultExt;
use crate::player;

/// List audio output devices, marking the default.
pub fn cmd_devices() -> anyhow::Result<()> {
    let default = player::current_audio_device();
    let devices = player::list_audio_devices();

    if devices.is_empty() {
        println!("No output devices found.");
        return Ok(());
    }

    println!("Output devices:");
    for name in devices {
        let marker = if name == default { "*" } else { " " };
        println!("  {} {}", marker, name);
    }
    Ok(())
}

/// Print the effective config, optionally writing the defaults first.
pub fn cmd_config(init: bool) -> anyhow::Result<()> {
    if init {
        let path = config::save(&config::Config::default()).with_context("writing default config")?;
        println!("Wrote default config to {}", path.display());
    }

    match config::config_path() {
        Some(path) => println!("# {}", path.display()),
        None => println!("# (no config directory)"),
    }
    print!("{}", config::to_toml(&config::load())?);
    Ok(())
}
