//! Converter module for vidshrink
//!
//! Re-encodes one file and decides whether the result replaces the original.
//! Every outcome is absorbed into [`ConversionOutcome`]; nothing here returns
//! an error to the caller.

use crate::config::EncoderConfig;
use crate::encode::{EncodeError, EncodeParams, Encoder, FfmpegEncoder};
use crate::record::{clamp_size, FileRecord};
use crate::replace::{commit_replacement, final_output_path, temp_output_path, ReplaceError};
use crate::size_gate::{check_size_gate, SizeGateResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failures after a successful encode, while comparing or committing
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Could not stat the input or the encoded output
    #[error("Failed to read size of {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Committing the replacement failed
    #[error("Replacement failed: {0}")]
    Replace(#[from] ReplaceError),
}

/// Where a conversion ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionState {
    /// Encoder is running
    Encoding,
    /// Sizes are being compared
    Comparing,
    /// Smaller output committed in place of the original
    Replaced,
    /// Output was not smaller and has been discarded
    Retained,
    /// Encode or commit failed; the original is untouched
    Failed(String),
}

impl ConversionState {
    pub fn as_str(&self) -> &str {
        match self {
            ConversionState::Encoding => "encoding",
            ConversionState::Comparing => "comparing",
            ConversionState::Replaced => "replaced",
            ConversionState::Retained => "retained",
            ConversionState::Failed(_) => "failed",
        }
    }
}

/// Result of one [`Converter::convert`] call
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub input_path: PathBuf,
    /// Path of the surviving file: the replacement if converted, else the input
    pub output_path: PathBuf,
    pub input_size: u64,
    pub output_size: u64,
    pub processed: bool,
    pub converted: bool,
    pub state: ConversionState,
}

impl ConversionOutcome {
    fn started(input: &Path) -> Self {
        Self {
            input_path: input.to_path_buf(),
            output_path: input.to_path_buf(),
            input_size: 0,
            output_size: 0,
            processed: false,
            converted: false,
            state: ConversionState::Encoding,
        }
    }

    fn fail(&mut self, reason: String) {
        self.output_path = self.input_path.clone();
        self.processed = false;
        self.converted = false;
        self.state = ConversionState::Failed(reason);
    }

    /// Copy the outcome onto the record it was produced for.
    ///
    /// A replacement rewrites path, name, id and current size; every other
    /// outcome only sets the two flags.
    pub fn apply(&self, record: &mut FileRecord) {
        record.processed = self.processed;
        record.converted = self.converted;

        if self.converted {
            record.set_path(self.output_path.to_string_lossy().to_string());
            record.current_size = clamp_size(self.output_size);
        }
    }
}

/// Runs the encoder and commits or discards its output
#[derive(Clone)]
pub struct Converter {
    encoder: Arc<dyn Encoder>,
    config: EncoderConfig,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Converter {
    pub fn new(encoder: Arc<dyn Encoder>, config: EncoderConfig) -> Self {
        Self { encoder, config }
    }

    /// Converter backed by the configured ffmpeg executable
    pub fn from_config(config: &EncoderConfig) -> Self {
        Self::new(Arc::new(FfmpegEncoder::from_config(config)), config.clone())
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn temp_output_path(&self, input: &Path) -> PathBuf {
        temp_output_path(input, &self.config.temp_marker, &self.config.container)
    }

    pub fn final_output_path(&self, input: &Path) -> PathBuf {
        final_output_path(input, &self.config.container)
    }

    /// Convert one file
    ///
    /// 1. Encodes into the temp output next to the input
    /// 2. On encoder failure removes any partial output (not processed)
    /// 3. Compares sizes (Comparing)
    /// 4. Strictly smaller: commits the replacement (processed, converted)
    /// 5. Otherwise: removes the temp output (processed, not converted)
    /// 6. Any error in steps 3-4: keeps the original, removes the temp
    ///    output, and leaves the file unprocessed so a later run retries it
    ///
    /// Blocks for the full duration of the encode.
    pub fn convert(&self, input: &Path) -> ConversionOutcome {
        let temp_output = self.temp_output_path(input);
        let final_path = self.final_output_path(input);
        let mut outcome = ConversionOutcome::started(input);

        info!("Converting {} => {}", input.display(), temp_output.display());

        let params = EncodeParams::new(
            input.to_path_buf(),
            temp_output.clone(),
            self.config.codec.clone(),
            self.config.crf,
        );

        if let Err(e) = self.encode(&params) {
            warn!("Failed to convert {}: {}", input.display(), e);
            discard(&temp_output);
            outcome.fail(e.to_string());
            return outcome;
        }

        outcome.state = ConversionState::Comparing;

        if let Err(e) = self.compare_and_commit(input, &temp_output, &final_path, &mut outcome) {
            warn!("Failed to finish {}: {}", input.display(), e);
            // Only drop the encoded copy while the original is still there
            if input.exists() {
                discard(&temp_output);
            }
            outcome.fail(e.to_string());
        }

        outcome
    }

    /// Run the encoder, treating an empty output as a failed encode
    fn encode(&self, params: &EncodeParams) -> Result<(), EncodeError> {
        self.encoder.encode(params)?;

        match fs::metadata(&params.output_path) {
            Ok(m) if m.len() == 0 => Err(EncodeError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "encoder produced an empty file",
            ))),
            _ => Ok(()),
        }
    }

    fn compare_and_commit(
        &self,
        input: &Path,
        temp_output: &Path,
        final_path: &Path,
        outcome: &mut ConversionOutcome,
    ) -> Result<(), ConvertError> {
        outcome.input_size = file_size(input)?;
        outcome.output_size = file_size(temp_output)?;

        match check_size_gate(outcome.input_size, outcome.output_size) {
            SizeGateResult::Accept => {
                commit_replacement(input, temp_output, final_path)?;
                outcome.output_path = final_path.to_path_buf();
                outcome.processed = true;
                outcome.converted = true;
                outcome.state = ConversionState::Replaced;
                info!(
                    "Replaced {} with the smaller {} ({} -> {} bytes)",
                    input.display(),
                    final_path.display(),
                    outcome.input_size,
                    outcome.output_size
                );
            }
            SizeGateResult::Reject { ratio, .. } => {
                discard(temp_output);
                outcome.processed = true;
                outcome.converted = false;
                outcome.state = ConversionState::Retained;
                info!(
                    "Retained original {}, new file is not smaller ({:.1}% of original)",
                    input.display(),
                    ratio * 100.0
                );
            }
        }

        Ok(())
    }
}

fn file_size(path: &Path) -> Result<u64, ConvertError> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|source| ConvertError::Stat {
            path: path.to_path_buf(),
            source,
        })
}

/// Remove a temp output if one exists.
fn discard(temp_output: &Path) {
    match fs::remove_file(temp_output) {
        Ok(()) => debug!("Removed temp output {}", temp_output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temp output {}: {}", temp_output.display(), e),
    }
}
