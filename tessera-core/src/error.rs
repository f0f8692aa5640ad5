//! # Error Handling
//!
//! Error types shared by every tessera component.
//!
//! ## Classes
//!
//! 1. **Format**: a file is not what its header claims (magic, version,
//!    identifiers, sizes). Fatal for the open/build that detected it.
//! 2. **Capacity**: the hash table ran out of slots during construction.
//! 3. **Corruption**: a probe or scan stepped outside the mapped data.
//! 4. **Lifecycle**: an operation on a closed reader or writer.
//! 5. **Stream**: malformed variable-length quantities.
//!
//! Nothing is retried internally; callers decide whether to rebuild or abort.

use thiserror::Error;

/// Result type alias for tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for tessera
#[derive(Error, Debug)]
pub enum Error {
    // Format errors
    #[error("Log format error: {message}")]
    LogFormat { message: String },

    #[error("Index format error: {message}")]
    IndexFormat { message: String },

    // Construction errors
    #[error("Hash table exhausted: no free slots among {capacity}")]
    CapacityExhausted { capacity: u64 },

    // Read-side corruption
    #[error("Index corruption detected: {details}")]
    IndexCorruption { details: String },

    #[error("Log corruption detected: {details}")]
    LogCorruption { details: String },

    // Lifecycle misuse
    #[error("{resource} is closed")]
    Closed { resource: &'static str },

    // Stream errors
    #[error("Varint overflow: more than {max_continuation} continuation bytes")]
    VarintOverflow { max_continuation: usize },

    #[error("Compression error: {message}")]
    Compression { message: String },

    // System errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },
}

impl Error {
    /// Check if error is recoverable
    ///
    /// Recoverable here means the files themselves are fine and the caller
    /// can retry with different parameters or a fresh handle.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Closed { .. } => true,
            Error::Configuration { .. } => true,
            Error::CapacityExhausted { .. } => true,
            Error::Io { .. } => false,
            Error::IndexCorruption { .. } => false,
            Error::LogCorruption { .. } => false,
            Error::LogFormat { .. } => false,
            Error::IndexFormat { .. } => false,
            Error::VarintOverflow { .. } => false,
            Error::Compression { .. } => false,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::LogFormat { .. } => "LOG_FORMAT",
            Error::IndexFormat { .. } => "INDEX_FORMAT",
            Error::CapacityExhausted { .. } => "CAPACITY_EXHAUSTED",
            Error::IndexCorruption { .. } => "INDEX_CORRUPTION",
            Error::LogCorruption { .. } => "LOG_CORRUPTION",
            Error::Closed { .. } => "CLOSED",
            Error::VarintOverflow { .. } => "VARINT_OVERFLOW",
            Error::Compression { .. } => "COMPRESSION_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Io { .. } => "IO_ERROR",
        }
    }

    /// True for the errors raised when data read from disk does not add up.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::IndexCorruption { .. } | Error::LogCorruption { .. }
        )
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Extension trait for adding context to io results
pub trait IoResultExt<T> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn io_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::Io {
            message: format!("{}: {}", f(), e),
            source: e,
        })
    }
}
