//! Crate-wide error type and result alias.

use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HubError>;

/// Error kinds surfaced across the public Data Hub API.
///
/// Producer-side pushes are best-effort: a sample dropped by a filter is not
/// an error. Snapshot failures always terminate through the snapshot result
/// callback carrying one of these values.
#[derive(Debug, Error)]
pub enum HubError {
    /// Resource already exists with incompatible parameters, or a routing
    /// edge would create a loop.
    #[error("duplicate: resource exists with incompatible parameters or route would loop")]
    Duplicate,
    /// A tree path did not resolve to an entry.
    #[error("path not found")]
    NotFound,
    /// A textual conversion did not fit the destination buffer; the result
    /// was truncated.
    #[error("conversion overflowed the destination buffer")]
    Overflow,
    /// Malformed input to a public operation.
    #[error("bad parameter: {0}")]
    BadParameter(&'static str),
    /// Malformed JSON input to an unescape operation.
    #[error("format error: {0}")]
    FormatError(String),
    /// A snapshot is already in progress.
    #[error("snapshot already in progress")]
    Busy,
    /// The snapshot sink was closed or hung up.
    #[error("snapshot stream closed")]
    Closed,
    /// Unexpected snapshot sink error.
    #[error("snapshot stream fault")]
    Fault,
    /// The formatter requested more passes than the configured maximum.
    #[error("formatter exceeded the maximum number of tree passes")]
    OutOfRange,
    /// The formatter did not request a tree scan.
    #[error("formatter does not scan the tree")]
    Unsupported,
    /// Unknown snapshot output format.
    #[error("unknown snapshot format")]
    NotImplemented,
    /// I/O error from the surrounding platform (file output, config).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
