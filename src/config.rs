//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\jukebox\config.toml
//! - macOS: ~/Library/Application Support/jukebox/config.toml
//! - Linux: ~/.config/jukebox/config.toml
//!
//! Every section is `#[serde(default)]`, so a file only needs the keys that
//! differ from the defaults. Command-line flags override what is loaded here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::player::Backend;
use crate::transcode::{Engine, Profile};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output settings
    pub audio: AudioConfig,

    /// External player command (process backend)
    pub process: ProcessConfig,

    /// Transcoding settings
    pub transcode: TranscodeConfig,
}

/// Audio playback settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Which sink to use
    pub backend: Backend,

    /// Selected output device name (empty = system default)
    pub output_device: String,

    /// Initial gain (0.0 - 1.0)
    pub volume: f32,

    /// Ring buffer depth for the device backend
    pub ring_buffer_ms: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Device,
            output_device: String::new(),
            volume: 1.0,
            ring_buffer_ms: 500,
        }
    }
}

/// External player process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Program to run
    pub command: String,

    /// Arguments; `{rate}` and `{channels}` are substituted
    pub args: Vec<String>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            command: "aplay".to_string(),
            args: ["-q", "-t", "raw", "-f", "S16_LE", "-r", "{rate}", "-c", "{channels}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Transcoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub engine: Engine,

    /// ffmpeg binary for the ffmpeg engine
    pub ffmpeg_path: PathBuf,

    pub sample_rate: u32,

    pub channels: u16,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            engine: Engine::Symphonia,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            sample_rate: Profile::PCM16LE.sample_rate,
            channels: Profile::PCM16LE.channels,
        }
    }
}

impl TranscodeConfig {
    /// The s16le output profile these settings describe.
    pub fn profile(&self) -> Profile {
        Profile::pcm16le(self.sample_rate, self.channels)
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("jukebox"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };
    load_from(&path)
}

/// Load configuration from a specific file, falling back to defaults.
pub fn load_from(path: &std::path::Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to the standard location
pub fn save(config: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)?;
    Ok(path)
}

/// Save configuration to `path`
///
/// Creates the parent directory if it doesn't exist.
pub fn save_to(config: &Config, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = to_toml(config)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

/// Render the config as pretty TOML.
pub fn to_toml(config: &Config) -> Result<String, ConfigError> {
    toml::to_string_pretty(config).map_err(ConfigError::Serialize)
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let toml = to_toml(&config).unwrap();
        assert!(toml.contains("[audio]"));
        assert!(toml.contains("[process]"));
        assert!(toml.contains("[transcode]"));
        assert!(toml.contains("backend = \"device\""));
        assert!(toml.contains("engine = \"symphonia\""));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.audio.backend = Backend::Process;
        config.audio.volume = 0.75;
        config.transcode.engine = Engine::Ffmpeg;
        config.transcode.sample_rate = 48_000;

        let toml = to_toml(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.audio.backend, Backend::Process);
        assert_eq!(parsed.audio.volume, 0.75);
        assert_eq!(parsed.transcode.engine, Engine::Ffmpeg);
        assert_eq!(parsed.transcode.profile().sample_rate, 48_000);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        // Config with only some fields
        let toml = r#"
[process]
command = "pw-play"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        // Specified field is set
        assert_eq!(config.process.command, "pw-play");

        // Other fields use defaults
        assert!(config.process.args.contains(&"{rate}".to_string()));
        assert_eq!(config.audio.volume, 1.0);
        assert_eq!(config.audio.backend, Backend::Device);
        assert_eq!(config.transcode.profile(), Profile::PCM16LE);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.audio.output_device = "USB DAC".to_string();
        save_to(&config, &path).unwrap();

        let loaded = load_from(&path);
        assert_eq!(loaded.audio.output_device, "USB DAC");
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_unparseable_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is [not toml").unwrap();

        let loaded = load_from(&path);
        assert_eq!(loaded.audio.ring_buffer_ms, 500);
    }
}
