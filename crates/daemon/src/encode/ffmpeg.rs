//! FFmpeg encoder module for vidshrink
//!
//! Builds and executes the external encoder command that re-encodes one file
//! into a smaller codec. The encoder is an opaque collaborator: it gets an
//! input path, a codec, a quality setting and an output path, and either
//! produces the output or reports a failure.

use crate::config::EncoderConfig;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Encoder process exited with non-zero status
    #[error("Encoder failed with exit code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    /// Encoder process was terminated by signal
    #[error("Encoder process was terminated by signal")]
    Terminated,

    /// IO error during encoding (e.g. executable not found)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters for a single encode
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeParams {
    /// Path to the input video file
    pub input_path: PathBuf,
    /// Path for the encoded output file
    pub output_path: PathBuf,
    /// Target video codec (e.g. "libx265")
    pub codec: String,
    /// Constant rate factor
    pub crf: u32,
}

impl EncodeParams {
    /// Create new encoding parameters
    pub fn new(input_path: PathBuf, output_path: PathBuf, codec: String, crf: u32) -> Self {
        Self {
            input_path,
            output_path,
            codec,
            crf,
        }
    }
}

/// Something that can turn an input file into an encoded output file.
///
/// Implementations block until the output is written or the attempt failed.
pub trait Encoder: Send + Sync {
    fn encode(&self, params: &EncodeParams) -> Result<(), EncodeError>;
}

/// Runs the configured ffmpeg executable.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: String,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &EncoderConfig) -> Self {
        Self::new(config.program.clone())
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Encoder for FfmpegEncoder {
    fn encode(&self, params: &EncodeParams) -> Result<(), EncodeError> {
        run_ffmpeg(&self.program, params)
    }
}

/// Build an ffmpeg command for one encode
///
/// Creates a Command configured with:
/// - Quiet output (errors only) and forced overwrite of a stale output
/// - Input and output paths
/// - Video codec and CRF from the parameters
/// - Audio streams copied unchanged
pub fn build_ffmpeg_command(program: &str, params: &EncodeParams) -> Command {
    let mut cmd = Command::new(program);

    cmd.arg("-hide_banner").arg("-loglevel").arg("error");

    // A leftover temp file from an earlier crash is overwritten
    cmd.arg("-y");

    cmd.arg("-i").arg(&params.input_path);

    cmd.arg("-c:v").arg(&params.codec);
    cmd.arg("-crf").arg(params.crf.to_string());

    cmd.arg("-c:a").arg("copy");

    cmd.arg(&params.output_path);

    cmd
}

/// Execute an ffmpeg encode
///
/// # Returns
/// * `Ok(())` - Encoding completed successfully
/// * `Err(EncodeError)` - The process could not start, exited non-zero or was killed
pub fn run_ffmpeg(program: &str, params: &EncodeParams) -> Result<(), EncodeError> {
    let mut cmd = build_ffmpeg_command(program, params);
    cmd.stdin(Stdio::null());

    let output = cmd.output()?;

    if output.status.success() {
        Ok(())
    } else {
        match output.status.code() {
            Some(code) => Err(EncodeError::Failed {
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            None => Err(EncodeError::Terminated),
        }
    }
}
