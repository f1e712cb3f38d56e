//! Error types for weave.
//!
//! - **Argument errors**: malformed inputs to a constructor or call
//! - **Operation errors**: a call made in a phase that forbids it
//! - **Configuration errors**: invalid, unreadable or unparsable config

use thiserror::Error as ThisError;

/// Top-level error type for every fallible weave operation.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// Malformed constructor or call input (empty lock name, bad thread name)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Call made in a state that forbids it (double run, cancel before start)
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration value out of range or otherwise unusable
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// IO failure while reading configuration or spawning a thread
    #[error("IO error: {0}")]
    Io(String),

    /// Configuration file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Coarse classification used by callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    InvalidOperation,
    Config,
}

impl Error {
    /// Create an invalid-argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an invalid-operation error.
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Create an invalid-config error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a parse error.
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an IO error.
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::InvalidConfig(_) | Self::Io(_) | Self::Parse(_) => ErrorKind::Config,
        }
    }

    pub const fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    pub const fn is_invalid_operation(&self) -> bool {
        matches!(self, Self::InvalidOperation(_))
    }

    /// Process exit code for the `weave` binary.
    ///
    /// - 1: caller misuse (argument/operation)
    /// - 2: configuration problems
    pub const fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::InvalidArgument | ErrorKind::InvalidOperation => 1,
            ErrorKind::Config => 2,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::io_error(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::parse_error(format!("Failed to parse config: {err}"))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_operation_display() {
        let err = Error::invalid_operation("task already started");
        assert_eq!(err.to_string(), "Invalid operation: task already started");
    }

    #[test]
    fn test_invalid_argument_display() {
        let err = Error::invalid_argument("lock name cannot be empty");
        assert_eq!(err.to_string(), "Invalid argument: lock name cannot be empty");
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::invalid_argument("x").kind(), ErrorKind::InvalidArgument);
        assert_eq!(Error::invalid_operation("x").kind(), ErrorKind::InvalidOperation);
        assert_eq!(Error::invalid_config("x").kind(), ErrorKind::Config);
        assert_eq!(Error::parse_error("x").kind(), ErrorKind::Config);
        assert_eq!(Error::io_error("x").kind(), ErrorKind::Config);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::invalid_operation("x").exit_code(), 1);
        assert_eq!(Error::invalid_argument("x").exit_code(), 1);
        assert_eq!(Error::invalid_config("x").exit_code(), 2);
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(ref msg) if msg.contains("missing")));
    }

    #[test]
    fn test_from_toml_error() {
        let parsed: std::result::Result<toml::Value, toml::de::Error> = toml::from_str("[[[");
        let err: Error = parsed.map(|_| ()).map_err(Error::from).err().unwrap_or_else(|| {
            Error::invalid_config("expected parse failure")
        });
        assert!(matches!(err, Error::Parse(_)));
    }
}
