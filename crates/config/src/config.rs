//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Marker path that selects an ephemeral in-memory database.
pub const IN_MEMORY_DB: &str = ":memory:";

/// Library-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryConfig {
    /// Directory scanned when a request does not name one (default ".")
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
        }
    }
}

/// Database-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to the SQLite file, or `:memory:` for an ephemeral store
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "vidshrink.db".to_string()
}

impl DatabaseConfig {
    /// Configuration for a throwaway in-memory database.
    pub fn in_memory() -> Self {
        Self {
            path: IN_MEMORY_DB.to_string(),
        }
    }

    /// Whether this configuration selects the in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.path == IN_MEMORY_DB
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Encoder-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Encoder executable (default "ffmpeg")
    #[serde(default = "default_program")]
    pub program: String,
    /// Target video codec passed to the encoder (default "libx265")
    #[serde(default = "default_codec")]
    pub codec: String,
    /// Constant rate factor (default 28)
    #[serde(default = "default_crf")]
    pub crf: u32,
    /// Output container extension without the dot (default "mkv")
    #[serde(default = "default_container")]
    pub container: String,
    /// Marker inserted before the container extension of in-progress output
    #[serde(default = "default_temp_marker")]
    pub temp_marker: String,
}

fn default_program() -> String {
    "ffmpeg".to_string()
}

fn default_codec() -> String {
    "libx265".to_string()
}

fn default_crf() -> u32 {
    28
}

fn default_container() -> String {
    "mkv".to_string()
}

fn default_temp_marker() -> String {
    "temp".to_string()
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            codec: default_codec(),
            crf: default_crf(),
            container: default_container(),
            temp_marker: default_temp_marker(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Socket address the REST API binds to (default 127.0.0.1:7878)
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - ROOT_DIR -> library.root_dir
    /// - DB_PATH -> database.path
    /// - ENCODER_PROGRAM -> encoder.program
    /// - ENCODER_CODEC -> encoder.codec
    /// - ENCODER_CRF -> encoder.crf
    /// - SERVER_BIND -> server.bind
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("ROOT_DIR") {
            if !val.is_empty() {
                self.library.root_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("DB_PATH") {
            if !val.is_empty() {
                self.database.path = val;
            }
        }

        if let Ok(val) = env::var("ENCODER_PROGRAM") {
            if !val.is_empty() {
                self.encoder.program = val;
            }
        }

        if let Ok(val) = env::var("ENCODER_CODEC") {
            if !val.is_empty() {
                self.encoder.codec = val;
            }
        }

        // Invalid numbers keep the existing value
        if let Ok(val) = env::var("ENCODER_CRF") {
            if let Ok(crf) = val.parse::<u32>() {
                self.encoder.crf = crf;
            }
        }

        if let Ok(val) = env::var("SERVER_BIND") {
            if !val.is_empty() {
                self.server.bind = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults.
    ///
    /// Any other read or parse failure is still reported.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = match Self::load_from_file(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Config::default()
            }
            Err(e) => return Err(e),
        };
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("ROOT_DIR");
        env::remove_var("DB_PATH");
        env::remove_var("ENCODER_PROGRAM");
        env::remove_var("ENCODER_CODEC");
        env::remove_var("ENCODER_CRF");
        env::remove_var("SERVER_BIND");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            root in "[a-z0-9_/]{1,30}",
            db in "[a-z0-9_]{1,20}\\.db",
            codec in prop_oneof![Just("libx265"), Just("libsvtav1"), Just("libvpx-vp9")],
            crf in 0u32..64,
            port in 1024u16..65535,
        ) {
            let toml_str = format!(
                r#"
[library]
root_dir = "{}"

[database]
path = "{}"

[encoder]
codec = "{}"
crf = {}

[server]
bind = "127.0.0.1:{}"
"#,
                root, db, codec, crf, port
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.library.root_dir, PathBuf::from(&root));
            prop_assert_eq!(config.database.path, db);
            prop_assert_eq!(config.encoder.codec, codec);
            prop_assert_eq!(config.encoder.crf, crf);
            prop_assert_eq!(config.server.bind, format!("127.0.0.1:{}", port));
            // Unspecified encoder fields keep their defaults
            prop_assert_eq!(config.encoder.program.as_str(), "ffmpeg");
            prop_assert_eq!(config.encoder.container.as_str(), "mkv");
        }

        #[test]
        fn prop_env_overrides_encoder_crf(
            initial_crf in 0u32..64,
            override_crf in 0u32..64,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[encoder]
crf = {}
"#,
                initial_crf
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("ENCODER_CRF", override_crf.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.encoder.crf, override_crf);
        }

        #[test]
        fn prop_env_overrides_root_and_db(
            root in "/[a-z0-9_]{1,20}",
            db in "[a-z0-9_]{1,20}\\.db",
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::default();

            env::set_var("ROOT_DIR", &root);
            env::set_var("DB_PATH", &db);
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.library.root_dir, PathBuf::from(&root));
            prop_assert_eq!(config.database.path, db);
        }
    }

    #[test]
    fn test_invalid_crf_override_is_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("ENCODER_CRF", "not-a-number");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.encoder.crf, 28);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.library.root_dir, PathBuf::from("."));
        assert_eq!(config.database.path, "vidshrink.db");
        assert!(!config.database.is_in_memory());
        assert_eq!(config.encoder.program, "ffmpeg");
        assert_eq!(config.encoder.codec, "libx265");
        assert_eq!(config.encoder.crf, 28);
        assert_eq!(config.encoder.container, "mkv");
        assert_eq!(config.encoder.temp_marker, "temp");
        assert_eq!(config.server.bind, "127.0.0.1:7878");
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[database]
path = ":memory:"
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert!(config.database.is_in_memory());
        assert_eq!(config.encoder, EncoderConfig::default());
        assert_eq!(config.library, LibraryConfig::default());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[encoder]\ncrf = \"high\"\n").unwrap();

        let result = Config::load_or_default(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
