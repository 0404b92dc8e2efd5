//! Error taxonomy.
//!
//! - `ConfigError`: bad option strings, detected when players are built
//! - `EvalError`: the evaluator backend failed
//! - `StorageError`: match or checkpoint file I/O, with file and operation
//! - `EngineError`: what engine operations return; wraps the above plus
//!   invariant violations and cooperative cancellation
//!
//! Configuration, invariant and evaluator errors are fatal. Storage errors
//! are left to the caller. `Cancelled` is not a failure at all.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Invalid or ambiguous configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown option(s) {keys:?} in {context:?}")]
    UnknownKeys { context: String, keys: Vec<String> },

    #[error("invalid value {value:?} for option {key:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("conflicting options in {context:?}: {reason}")]
    Conflict { context: String, reason: String },

    #[error("no {kind} matched options {context:?}")]
    Missing { kind: &'static str, context: String },

    #[error("option {key:?} is not supported: {reason}")]
    Unsupported { key: String, reason: String },
}

/// Failure reported by an evaluator backend.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("evaluator backend error: {0}")]
    Backend(String),

    #[error("evaluator shape mismatch: {0}")]
    Shape(String),

    #[error("evaluator io error: {0}")]
    Io(#[from] io::Error),

    #[error("evaluator codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// I/O failure on a match or checkpoint file.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to {op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to decode record {record} of {path:?}: {source}")]
    Decode {
        path: PathBuf,
        record: usize,
        #[source]
        source: bincode::Error,
    },

    #[error("failed to encode {path:?}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("unsupported match file version {version} in {path:?}")]
    Version { path: PathBuf, version: i32 },
}

impl StorageError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Error returned by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Evaluator(#[from] EvalError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Build an invariant violation.
    pub fn invariant(msg: impl Into<String>) -> Self {
        EngineError::Invariant(msg.into())
    }

    /// Whether the process should stop on this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Config(_) | EngineError::Invariant(_) | EngineError::Evaluator(_)
        )
    }

    /// Whether this is the cooperative cancellation signal.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Top-level unwrapping of engine results.
pub trait OrAbort<T> {
    /// Returns `Some(value)` on success and `None` on cancellation. Any other
    /// error is logged with `context` and terminates the process.
    fn or_abort(self, context: &str) -> Option<T>;
}

impl<T> OrAbort<T> for Result<T> {
    fn or_abort(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(EngineError::Cancelled) => {
                log::info!("{context}: cancelled");
                None
            }
            Err(err) => {
                log::error!("{context}: {err}");
                eprintln!("fatal: {context}: {err}");
                std::process::exit(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(EngineError::invariant("x").is_fatal());
        assert!(EngineError::from(EvalError::Backend("down".into())).is_fatal());
        assert!(!EngineError::Cancelled.is_fatal());
        assert!(EngineError::Cancelled.is_cancelled());

        let storage = StorageError::io("open", "/nope", io::Error::from(io::ErrorKind::NotFound));
        assert!(!EngineError::from(storage).is_fatal());
    }

    #[test]
    fn test_config_error_names_key() {
        let err = ConfigError::InvalidValue {
            key: "max_depth".into(),
            value: "abc".into(),
            reason: "expected an integer".into(),
        };
        let msg = EngineError::from(err).to_string();
        assert!(msg.contains("max_depth"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn test_storage_error_names_file_and_op() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let err = StorageError::io("rename", "/tmp/matches.bin", denied);
        let msg = err.to_string();
        assert!(msg.contains("rename"));
        assert!(msg.contains("matches.bin"));
    }

    #[test]
    fn test_or_abort_passes_values_through() {
        let ok: Result<u32> = Ok(3);
        assert_eq!(ok.or_abort("test"), Some(3));
        let cancelled: Result<u32> = Err(EngineError::Cancelled);
        assert_eq!(cancelled.or_abort("test"), None);
    }
}
