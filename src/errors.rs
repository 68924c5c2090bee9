//! Error variants that may be returned during ceres operations.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CeresError {
    /// Returned when the configuration file is missing, unreadable,
    /// or carries invalid values.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Returned when a database, collection, or block file does not
    /// exist at the expected path. Surfaced unwrapped so callers can
    /// distinguish missing-target cases from other failures.
    #[error("no such path: {}", .0.display())]
    Path(PathBuf),

    /// Returned for I/O failures other than a missing path.
    #[error("io error: {0}")]
    Io(String),

    /// Returned when an occupied slot holds text that is not a valid
    /// record object, or when a filter literal or identifier cannot
    /// be interpreted.
    #[error("parse error: {0}")]
    Parse(String),

    /// Returned when a record cannot be serialized. The enclosing
    /// operation fails before any byte is written.
    #[error("cannot serialize record: {0}")]
    Serialization(String),

    /// Returned when a written record carries a field that is not in
    /// the collection schema, or a value of the wrong type.
    #[error("schema violation: {0}")]
    Schema(String),

    /// Returned when an id targeted by a mutation points at an empty
    /// slot or an unknown block file.
    #[error("no record with id {0}")]
    NotFound(String),
}

impl CeresError {
    // Maps a missing path to Path and every other I/O failure to Io.
    pub(crate) fn at_path(path: &Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            Self::Path(path.to_path_buf())
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<io::Error> for CeresError {
    #[inline]
    fn from(e: io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CeresError>;
