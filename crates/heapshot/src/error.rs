//! Error Module - heapshot Error Types
//!
//! Defines all error types used while taking and reading heap snapshots.
//!
//! # Error Categories
//!
//! ## I/O Errors
//! - `Io` - Open, write, seek or close on a snapshot file failed
//!
//! ## Format Errors
//! - `BadMagic` - File does not start with the snapshot magic number
//! - `UnsupportedVersion` - Header carries a format version we cannot read
//! - `UnexpectedTag` - Record tag is not TYPE, OBJECT or EOS
//! - `Truncated` - Stream ended before the end-of-stream tag
//! - `CounterMismatch` - Header counters disagree with the body
//! - `UnknownType` / `DuplicateType` - TYPE record ordering violated
//! - `InvalidString` / `VarintOverflow` - Malformed primitive
//!
//! ## State Errors
//! - `InvalidState` - Writer protocol misuse (e.g. reference outside an object)
//!
//! ## Configuration Errors
//! - `Configuration` - Invalid dump configuration
//!
//! Reflection gaps (a type or field the runtime cannot describe) are never
//! errors; the scanner skips them.

use thiserror::Error;

/// Main error type for all heapshot operations
///
/// # Examples
///
/// ```rust
/// use heapshot::error::HeapShotError;
///
/// fn describe(err: &HeapShotError) -> &'static str {
///     match err {
///         HeapShotError::UnsupportedVersion { .. } => "written by a newer dumper",
///         HeapShotError::Truncated { .. } => "dump did not finish",
///         _ => "other failure",
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum HeapShotError {
    /// I/O failure on the snapshot file
    ///
    /// **When returned:** Open/write/seek/flush fails during a dump or a read
    ///
    /// **Recovery strategy:** None. The dump is abandoned and the partial file
    /// is left without counters or end-of-stream tag.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic number mismatch
    ///
    /// **When returned:** Reader opened something that is not a heap snapshot
    #[error("Not a heap snapshot: bad magic {found:#010x}")]
    BadMagic { found: u32 },

    /// Unknown format version
    ///
    /// **When returned:** Header version differs from the one this crate writes.
    /// Field widths are never guessed.
    #[error("Unsupported snapshot format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// Unknown record tag
    #[error("Unexpected record tag {tag:#04x} at offset {offset}")]
    UnexpectedTag { tag: u8, offset: u64 },

    /// Stream ended early
    ///
    /// **When returned:** End of input reached before the EOS tag, which is
    /// how an abandoned dump shows up.
    #[error("Snapshot truncated while reading {context}")]
    Truncated { context: &'static str },

    /// Header counter disagrees with the body
    ///
    /// **Example scenario:** A dump failed after writing records but before the
    /// counter block was patched, leaving all-zero counters.
    #[error("Header {counter} count is {header} but body contains {actual}")]
    CounterMismatch {
        counter: &'static str,
        header: u32,
        actual: u32,
    },

    /// OBJECT record refers to a type with no preceding TYPE record
    #[error("Object record uses type {type_id:#x} before its type record")]
    UnknownType { type_id: u32 },

    /// Second TYPE record for the same type
    #[error("Type {type_id:#x} recorded more than once")]
    DuplicateType { type_id: u32 },

    /// Name bytes are not UTF-8
    #[error("Invalid string in snapshot: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),

    /// Length prefix does not fit in 32 bits
    #[error("Variable-length integer exceeds 32 bits")]
    VarintOverflow,

    /// Invalid state
    ///
    /// **When returned:** Writer protocol violated
    ///
    /// **Recovery strategy:** Cannot recover - indicates a bug in the caller
    ///
    /// **Example scenario:** `add_reference` called with no open object
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Configuration error
    ///
    /// **When returned:** `DumpConfig::validate` rejected the configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl HeapShotError {
    /// Check if this error came from decoding a malformed snapshot
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            HeapShotError::BadMagic { .. }
                | HeapShotError::UnsupportedVersion { .. }
                | HeapShotError::UnexpectedTag { .. }
                | HeapShotError::Truncated { .. }
                | HeapShotError::CounterMismatch { .. }
                | HeapShotError::UnknownType { .. }
                | HeapShotError::DuplicateType { .. }
                | HeapShotError::InvalidString(_)
                | HeapShotError::VarintOverflow
        )
    }

    /// Check if retrying the dump later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HeapShotError::Io(_))
    }

    /// Check if this error indicates a bug in the code
    pub fn is_bug(&self) -> bool {
        matches!(self, HeapShotError::InvalidState { .. })
    }

    pub(crate) fn invalid_state(expected: &str, actual: &str) -> Self {
        HeapShotError::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<crate::config::ConfigError> for HeapShotError {
    fn from(err: crate::config::ConfigError) -> Self {
        HeapShotError::Configuration(err.to_string())
    }
}

/// Result type alias for heapshot operations
pub type Result<T> = std::result::Result<T, HeapShotError>;
