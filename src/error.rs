//! Error types for rotating file output

use std::io;
use std::path::PathBuf;

/// Result type for rollsmith operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single filesystem step that failed during rollover.
#[derive(Debug, thiserror::Error)]
#[error("{op} {}: {source}", path.display())]
pub struct IoFault {
    /// What was being attempted ("rename", "remove", ...)
    pub op: &'static str,
    /// The path the step operated on
    pub path: PathBuf,
    /// The underlying error
    pub source: io::Error,
}

/// Errors surfaced by policies, writers and the sink registry
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A rotation policy value is out of range
    #[error("invalid rotation policy: `{field}` {reason}")]
    Configuration {
        /// Offending field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Operation attempted on a writer after `close()`
    #[error("writer for {} is closed", path.display())]
    WriterClosed {
        /// Active file of the closed writer
        path: PathBuf,
    },

    /// The rollover lock could not be taken
    #[error("failed to lock {}: {source}", path.display())]
    LockAcquisition {
        /// The `.lock` sibling
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// Some rename/remove steps of a rollover failed.
    ///
    /// The active file was reopened regardless, and when returned from
    /// `write` the payload has been appended to it.
    #[error("rollover of {} incomplete: {} step(s) failed", path.display(), faults.len())]
    RolloverIo {
        /// Active file being rolled over
        path: PathBuf,
        /// Every step that failed, in execution order
        faults: Vec<IoFault>,
    },

    /// An expired backup could not be deleted
    #[error("failed to remove expired backup {}: {source}", path.display())]
    RetentionIo {
        /// The backup that survived
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// Opening or appending to the active file failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file involved
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// The configuration file could not be read
    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        /// Config file path
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// The configuration file is not valid YAML for our schema
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// No sink registered under that name
    #[error("no such sink: `{0}`")]
    UnknownSink(String),

    /// Another sink already writes to the same resolved path
    #[error("sink `{name}` targets {} which is already open as `{existing}`", path.display())]
    DuplicateSink {
        /// Name being registered
        name: String,
        /// Name already holding the path
        existing: String,
        /// The shared resolved path
        path: PathBuf,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io { path: path.into(), source }
    }

    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Error::Configuration { field, reason: reason.into() }
    }
}
