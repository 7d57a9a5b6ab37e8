//! Startup checks module for vidshrink
//!
//! Preflight checks run before serving or processing:
//! - Encoder availability (`<program> -version` must succeed)
//! - Encoder version reported in the log when it can be parsed

use crate::config::Config;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Encoder not available: {0}")]
    EncoderUnavailable(String),
}

/// Check that the encoder executable runs, returning its major version if known.
///
/// Fails when `<program> -version` cannot be started or exits non-zero.
pub fn check_encoder_available(program: &str) -> Result<Option<u32>, StartupError> {
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            StartupError::EncoderUnavailable(format!(
                "{} -version failed; is it installed and in PATH? Error: {}",
                program, e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::EncoderUnavailable(format!(
            "{} -version exited with {}",
            program, output.status
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    Ok(parse_ffmpeg_version(&version_output))
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 8.0 ..."
/// - N-prefixed: "ffmpeg version n8.0-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    // n-prefixed builds, e.g. "n8.0-123-gabcdef"
    let version_str = version_part.trim_start_matches('n');

    version_str
        .split(|c| c == '.' || c == '-')
        .next()?
        .parse()
        .ok()
}

/// Run all startup checks
pub fn run_startup_checks(cfg: &Config) -> Result<(), StartupError> {
    let program = &cfg.encoder.program;
    match check_encoder_available(program)? {
        Some(major) => info!("Using {} (major version {})", program, major),
        None => info!("Using {} (version unknown)", program),
    }

    if !cfg.library.root_dir.is_dir() {
        warn!(
            "Library root is not a directory: {}",
            cfg.library.root_dir.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let version_output = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                major, minor, patch
            );

            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }

        #[test]
        fn prop_ffmpeg_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let version_output = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024",
                major, minor, git_hash
            );

            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }
    }

    #[test]
    fn test_parse_ffmpeg_version_multiline() {
        let output = r#"ffmpeg version n7.1-5-g1234567 Copyright (c) 2000-2024
built with gcc 12.2.0
configuration: --enable-gpl --enable-libx265"#;
        assert_eq!(parse_ffmpeg_version(output), Some(7));
    }

    #[test]
    fn test_parse_ffmpeg_version_invalid() {
        assert_eq!(parse_ffmpeg_version("not ffmpeg output"), None);
        assert_eq!(parse_ffmpeg_version("ffmpeg version"), None);
        assert_eq!(parse_ffmpeg_version(""), None);
    }

    #[test]
    fn test_missing_encoder_is_unavailable() {
        let result = check_encoder_available("vidshrink-no-such-encoder");
        match result {
            Err(StartupError::EncoderUnavailable(msg)) => {
                assert!(msg.contains("vidshrink-no-such-encoder"))
            }
            other => panic!("expected EncoderUnavailable, got {:?}", other),
        }
    }
}
