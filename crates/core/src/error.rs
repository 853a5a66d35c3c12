//! Error types for the retiming core.
//!
//! Grammar failures and illegal byte sequences are recovered where they
//! happen and never show up here. What remains is either a bad argument
//! (rejected before any file is touched) or a condition that abandons the
//! current file.

use std::io::Error as IoError;

use thiserror::Error;

/// Result type used throughout `subsync_core`.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors surfaced by the core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// A requested source or target encoding cannot be transcoded.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// The input stream looks like binary data rather than text.
    #[error("Binary content detected near byte {offset}")]
    BinaryContent {
        /// Position of the zero run that tripped the guard.
        offset: usize,
    },

    /// An offset argument matched none of the accepted forms.
    #[error("Invalid time offset: {0}")]
    InvalidOffset(String),

    /// A scale argument matched none of the accepted forms.
    #[error("Invalid scale ratio: {0}")]
    InvalidScale(String),

    /// A chop range was not of the form `N:M`.
    #[error("Invalid chop range: {0}")]
    InvalidChop(String),

    /// A time span bound could not be read as a timestamp.
    #[error("Invalid time span: {0}")]
    InvalidSpan(String),

    /// A bare signed argument is neither an offset nor a scale.
    #[error("Neither a time offset nor a scale ratio: {0}")]
    InvalidArgument(String),

    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl SyncError {
    /// Whether this error abandons the file being processed (as opposed to
    /// rejecting the run's arguments).
    pub fn is_fatal_for_file(&self) -> bool {
        matches!(
            self,
            SyncError::UnsupportedEncoding(_) | SyncError::BinaryContent { .. } | SyncError::Io(_)
        )
    }
}
