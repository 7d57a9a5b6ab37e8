//! vidshrink
//!
//! Catalogs video files under a directory tree, tracks their conversion state
//! in SQLite, and re-encodes them, keeping a new file only when it is smaller.

pub mod converter;
pub mod encode;
pub mod library;
pub mod reconcile;
pub mod record;
pub mod replace;
pub mod scan;
pub mod server;
pub mod size_gate;
pub mod startup;
pub mod store;

pub use vidshrink_config as config;
pub use vidshrink_config::Config;
pub use converter::{ConversionOutcome, ConversionState, Converter};
pub use encode::{EncodeError, EncodeParams, Encoder, FfmpegEncoder};
pub use library::{Library, LibraryError, ProcessSummary, ScanSummary};
pub use reconcile::{reconcile_all, reconcile_record, Change, ReconcileError};
pub use record::{file_id, FileRecord};
pub use replace::{commit_replacement, ReplaceError};
pub use scan::{is_video_file, scan_directory};
pub use server::{create_router, run_server, ServerError};
pub use size_gate::{check_size_gate, SizeGateResult};
pub use startup::{check_encoder_available, parse_ffmpeg_version, run_startup_checks, StartupError};
pub use store::{Setting, Store, StoreError, StoreStats};
