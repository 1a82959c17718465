//! Configuration Module - Dump Parameters
//!
//! Configuration is supplied once at startup by whatever bootstraps the
//! profiler (environment, a JSON file, or code) and stays fixed afterwards.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Label written into every snapshot header
pub const DEFAULT_LABEL: &str = "heap-shot logfile";

/// Extension of snapshot files
pub const SNAPSHOT_EXTENSION: &str = "omap";

/// Main configuration for heap snapshots
///
/// # Examples
///
/// ```rust
/// use heapshot::DumpConfig;
///
/// let config = DumpConfig {
///     output_base: "service".to_string(),
///     verbose: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// assert!(config.snapshot_path(3).ends_with("service_3.omap"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Base name of snapshot files
    ///
    /// Dump `n` is written to `<output_dir>/<output_base>_<n>.omap`.
    /// Default: "outfile"
    pub output_base: String,

    /// Directory receiving snapshot files
    ///
    /// Default: current directory
    pub output_dir: PathBuf,

    /// Free-form label stored in the header
    ///
    /// Default: "heap-shot logfile"
    pub label: String,

    /// Side file receiving the absolute path of the last finished dump
    ///
    /// External analysis tools poll this file. `None` disables it.
    /// Default: `<temp dir>/heap-shot-dump`
    pub pickup_file: Option<PathBuf>,

    /// Ask the runtime for a full collection before freezing the tables
    ///
    /// Default: true
    pub collect_before_dump: bool,

    /// Storage width of one reference in the managed heap, in bytes
    ///
    /// Value types smaller than this cannot embed a reference and are never
    /// expanded.
    /// Default: pointer width of the host
    pub reference_width: usize,

    /// Maximum nesting of embedded value types expanded by the scanner
    ///
    /// 1 expands values held directly by an object or static block, but not
    /// values nested inside them.
    /// Default: 64
    pub max_value_depth: usize,

    /// Skip static storage of types whose display name contains a backtick
    ///
    /// Open generic definitions have no static storage of their own.
    /// Default: true
    pub skip_open_generic_statics: bool,

    /// Log dump lifecycle events to the console
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        DumpConfig {
            output_base: "outfile".to_string(),
            output_dir: PathBuf::from("."),
            label: DEFAULT_LABEL.to_string(),
            pickup_file: Some(std::env::temp_dir().join("heap-shot-dump")),
            collect_before_dump: true,
            reference_width: std::mem::size_of::<usize>(),
            max_value_depth: 64,
            skip_open_generic_statics: true,
            verbose: false,
        }
    }
}

impl DumpConfig {
    /// Validate configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use heapshot::DumpConfig;
    ///
    /// let config = DumpConfig {
    ///     output_base: String::new(),
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_base.is_empty() {
            return Err(ConfigError::InvalidOutputBase(
                "output_base must not be empty".to_string(),
            ));
        }

        if self.output_base.contains(['/', '\\']) {
            return Err(ConfigError::InvalidOutputBase(
                "output_base must be a file name, use output_dir for the directory".to_string(),
            ));
        }

        if !self.label.is_ascii() {
            return Err(ConfigError::InvalidLabel(
                "label must be ASCII".to_string(),
            ));
        }

        if self.reference_width == 0 {
            return Err(ConfigError::InvalidReferenceWidth(
                "reference_width must be > 0".to_string(),
            ));
        }

        if self.max_value_depth == 0 {
            return Err(ConfigError::InvalidDepth(
                "max_value_depth must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with:
    /// - HEAPSHOT_OUTPUT
    /// - HEAPSHOT_DIR
    /// - HEAPSHOT_LABEL
    /// - HEAPSHOT_PICKUP (empty string disables the pickup file)
    /// - HEAPSHOT_MAX_DEPTH
    /// - HEAPSHOT_VERBOSE
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("HEAPSHOT_OUTPUT") {
            config.output_base = val;
        }

        if let Ok(val) = std::env::var("HEAPSHOT_DIR") {
            config.output_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("HEAPSHOT_LABEL") {
            config.label = val;
        }

        if let Ok(val) = std::env::var("HEAPSHOT_PICKUP") {
            config.pickup_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Ok(val) = std::env::var("HEAPSHOT_MAX_DEPTH") {
            if let Ok(depth) = val.parse::<usize>() {
                config.max_value_depth = depth;
            }
        }

        if let Ok(val) = std::env::var("HEAPSHOT_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Parse configuration from JSON; missing keys keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: DumpConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the snapshot file for dump number `sequence`
    pub fn snapshot_path(&self, sequence: u32) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}.{}",
            self.output_base, sequence, SNAPSHOT_EXTENSION
        ))
    }

    /// Redirect all output files into `dir`
    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid output base: {0}")]
    InvalidOutputBase(String),

    #[error("Invalid label: {0}")]
    InvalidLabel(String),

    #[error("Invalid reference width: {0}")]
    InvalidReferenceWidth(String),

    #[error("Invalid value depth: {0}")]
    InvalidDepth(String),

    #[error("Invalid configuration document: {0}")]
    Parse(String),
}
