use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DriverError>;

/// Various error types
#[derive(Debug, Error)]
pub enum DriverError {
    /// Configuration did not pass schema validation
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The resolver chain was exhausted without producing a source
    #[error("failed to resolve \"{0}\"")]
    NameResolution(String),
    /// No released compiler version satisfies the collected constraint
    #[error("no released compiler version satisfies \"{0}\"")]
    UnsatisfiableVersion(String),
    /// The version matches no known compiler family
    #[error("unsupported compiler version \"{0}\"")]
    UnsupportedVersion(String),
    /// The back-end returned diagnostics at `error` severity
    #[error("compilation failed with {errors_count} error(s)")]
    Compilation { errors_count: usize },
    /// The expected contract key was absent from the compiler output
    #[error("contract \"{name}\" not found in the output for \"{}\"", .path.display())]
    MissingContract { name: String, path: PathBuf },
    #[error(transparent)]
    Semver(#[from] semver::Error),
    /// Deserialization error
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    /// Filesystem IO error
    #[error(transparent)]
    Io(#[from] DriverIoError),
    /// Network error while fetching a source or the release index
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// General purpose message
    #[error("{0}")]
    Message(String),
}

impl DriverError {
    pub(crate) fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        DriverIoError::new(err, path).into()
    }
    pub(crate) fn msg(msg: impl Into<String>) -> Self {
        DriverError::Message(msg.into())
    }
}

#[derive(Debug, Error)]
#[error("\"{}\": {io}", self.path.display())]
pub struct DriverIoError {
    io: io::Error,
    path: PathBuf,
}

impl DriverIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which the error occurred
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl From<DriverIoError> for io::Error {
    fn from(err: DriverIoError) -> Self {
        err.io
    }
}
