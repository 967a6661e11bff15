//! Application-wide error types.
//!
//! Subsystems use their own `thiserror` enums ([`PlaylistError`],
//! [`PlayerError`], [`ConfigError`]); this module folds them into one
//! [`Error`] for callers that don't care which layer failed. Transcode
//! failures never leave the decode task, so they have no variant here.
//! The CLI uses `anyhow` on top.
//!
//! # Example
//!
//! ```ignore
//! use crate::error::{Result, ResultExt};
//!
//! let jukebox = Jukebox::new(transcoder, profile, factory).with_context("opening audio output")?;
//! jukebox.skip(0, Duration::ZERO).with_context("skip")?;
//! ```

use std::path::PathBuf;

use crate::config::ConfigError;
use crate::jukebox::PlaylistError;
use crate::player::PlayerError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio output error
    #[error("Playback error: {0}")]
    Playback(#[from] PlayerError),

    #[error("Playlist error: {0}")]
    Playlist(#[from] PlaylistError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File not found
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a not found error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PlaylistError> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Playlist(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, ConfigError> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Config(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("/path/to/file.mp3");
        assert!(err.to_string().contains("/path/to/file.mp3"));
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::from(PlayerError::Device("buffer underrun".to_string())).context("while playing track");
        let msg = err.to_string();
        assert!(msg.contains("while playing track"));
        assert!(msg.contains("buffer underrun"));
    }

    #[test]
    fn test_playlist_error_converts() {
        let result: std::result::Result<(), PlaylistError> = Err(PlaylistError::OutOfBounds { index: 7, len: 2 });
        let err = result.with_context("skipping").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("skipping"));
        assert!(msg.contains('7'));
    }

    #[test]
    fn test_config_error_converts() {
        let result: std::result::Result<(), ConfigError> = Err(ConfigError::NoConfigDir);
        let err = result.with_context("writing default config").unwrap_err();
        assert!(matches!(&err, Error::WithContext { source, .. } if matches!(**source, Error::Config(_))));
        assert!(err.to_string().starts_with("writing default config"));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<()> = Err(Error::not_found("x.flac"));
        let with_ctx = result.with_context("additional context");
        assert!(with_ctx.unwrap_err().to_string().contains("additional context"));
    }
}
