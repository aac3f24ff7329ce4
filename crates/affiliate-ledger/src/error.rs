//! Error types for the affiliate ledger.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur during ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A required field is missing or out of range.
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of the rejected input.
        message: String,
    },

    /// The backing file exists but does not hold a ledger object.
    #[error("Malformed ledger file {}: {message}", path.display())]
    Malformed {
        /// Path of the offending file.
        path: PathBuf,
        /// Parser diagnostics.
        message: String,
    },

    /// The backing file could not be read.
    #[error("Failed to read ledger file {}: {source}", path.display())]
    Io {
        /// Path of the file being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The ledger could not be written back to disk. The previous file is intact.
    #[error("Failed to persist ledger to {}: {source}", path.display())]
    Persistence {
        /// Path of the file being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The in-memory ledger could not be encoded.
    #[error("Failed to encode ledger: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Creates a new `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a new `Malformed` error.
    #[must_use]
    pub fn malformed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Io` error.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a new `Persistence` error.
    #[must_use]
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if this is an invalid input error.
    #[must_use]
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }

    /// Returns `true` if the backing file holds something other than a ledger.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput { .. } => ErrorCategory::Validation,
            Self::Malformed { .. } => ErrorCategory::Corruption,
            Self::Io { .. } | Self::Persistence { .. } => ErrorCategory::Infrastructure,
            Self::Serialization(_) => ErrorCategory::Internal,
        }
    }
}

/// Categories of ledger errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Validation error.
    Validation,
    /// Backing file is unreadable as a ledger.
    Corruption,
    /// Filesystem error.
    Infrastructure,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Corruption => write!(f, "corruption"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LedgerError::invalid_input("amount must be positive");
        assert_eq!(err.to_string(), "Invalid input: amount must be positive");

        let err = LedgerError::malformed("data.json", "expected an object");
        assert_eq!(
            err.to_string(),
            "Malformed ledger file data.json: expected an object"
        );
    }

    #[test]
    fn test_error_predicates() {
        let err = LedgerError::malformed("data.json", "expected an object");
        assert!(err.is_malformed());
        assert!(!err.is_invalid_input());

        let err = LedgerError::invalid_input("bad");
        assert!(err.is_invalid_input());
        assert!(!err.is_malformed());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            LedgerError::malformed("data.json", "truncated").category(),
            ErrorCategory::Corruption
        );
        assert_eq!(
            LedgerError::invalid_input("bad").category(),
            ErrorCategory::Validation
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            LedgerError::persistence("data.json", io).category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(ErrorCategory::Corruption.to_string(), "corruption");
    }
}
