//! Transcoder backed by an external `ffmpeg` process.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use super::{Profile, TranscodeError, Transcoder};
use crate::cancel::CancelToken;

const READ_BUF: usize = 16 * 1024;

/// Runs `ffmpeg` and copies its raw s16le stdout into the sink.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for one transcode.
    pub fn args(profile: &Profile, path: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "0".to_string(),
            "-ss".to_string(),
            format!("{:.3}", profile.seek.as_secs_f64()),
            "-i".to_string(),
            path.to_string_lossy().into_owned(),
            "-f".to_string(),
            "s16le".to_string(),
            "-ar".to_string(),
            profile.sample_rate.to_string(),
            "-ac".to_string(),
            profile.channels.to_string(),
            "-".to_string(),
        ]
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(
        &self,
        token: &CancelToken,
        profile: &Profile,
        path: &Path,
        out: &mut dyn Write,
    ) -> Result<(), TranscodeError> {
        if !path.exists() {
            return Err(TranscodeError::Open(path.to_path_buf(), "file not found".to_string()));
        }

        let mut child = Command::new(&self.program)
            .args(Self::args(profile, path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| TranscodeError::Process(format!("spawn {}: {}", self.program.display(), e)))?;

        let result = copy_stdout(&mut child, token, out);
        if result.is_err() {
            // Best effort: the process may already have exited
            let _ = child.kill();
        }
        let status = child
            .wait()
            .map_err(|e| TranscodeError::Process(format!("wait: {}", e)))?;

        result?;
        if !status.success() {
            return Err(TranscodeError::Process(format!("ffmpeg exited with {}", status)));
        }
        Ok(())
    }
}

fn copy_stdout(child: &mut Child, token: &CancelToken, out: &mut dyn Write) -> Result<(), TranscodeError> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| TranscodeError::Process("ffmpeg stdout not captured".to_string()))?;

    copy_pcm(&mut stdout, token, out)
}

fn copy_pcm(input: &mut dyn Read, token: &CancelToken, out: &mut dyn Write) -> Result<(), TranscodeError> {
    let mut buf = vec![0u8; READ_BUF];
    loop {
        if token.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        out.write_all(&buf[..n])
            .map_err(|e| TranscodeError::from_write(e, token))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Fails with `Interrupted` on every other call.
    struct Flaky {
        data: io::Cursor<Vec<u8>>,
        interrupt: bool,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            let n = buf.len().min(100);
            self.data.read(&mut buf[..n])
        }
    }

    #[test]
    fn test_copy_retries_interrupted_reads() {
        let mut input = Flaky {
            data: io::Cursor::new(vec![7u8; 1000]),
            interrupt: false,
        };
        let mut out = Vec::new();
        copy_pcm(&mut input, &CancelToken::never(), &mut out).unwrap();
        assert_eq!(out, vec![7u8; 1000]);
    }

    #[test]
    fn test_args_include_seek_and_format() {
        let profile = Profile::PCM16LE.with_seek(Duration::from_millis(2500));
        let args = FfmpegTranscoder::args(&profile, Path::new("/music/a.flac"));
        let joined = args.join(" ");
        assert!(joined.starts_with("-v 0 -ss 2.500 -i /music/a.flac"));
        assert!(joined.ends_with("-f s16le -ar 44100 -ac 2 -"));
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let mut out = Vec::new();
        let err = FfmpegTranscoder::default()
            .transcode(
                &CancelToken::never(),
                &Profile::PCM16LE,
                Path::new("/nonexistent/file.mp3"),
                &mut out,
            )
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Open(..)));
    }

    #[test]
    fn test_missing_program_is_process_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"not really audio").unwrap();

        let mut out = Vec::new();
        let err = FfmpegTranscoder::new("/nonexistent/ffmpeg")
            .transcode(&CancelToken::never(), &Profile::PCM16LE, &path, &mut out)
            .unwrap_err();
        assert!(matches!(err, TranscodeError::Process(_)));
    }
}
