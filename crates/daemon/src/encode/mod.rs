//! Encoding modules for vidshrink

pub mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_command, run_ffmpeg, EncodeError, EncodeParams, Encoder, FfmpegEncoder};
