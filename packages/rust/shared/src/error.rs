//! Error types for kbharvest.
//!
//! Library crates use [`HarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics and maps
//! [`ErrorKind`] to a process exit status.

use std::path::PathBuf;

/// Top-level error type for all harvest operations.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A list page or query page was unreachable or malformed.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Fetching an article document failed or timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// HTML-to-Markdown conversion rejected a section.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// No section of an article survived extraction.
    #[error("assembly error: {message}")]
    Assembly { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad identifier, invalid record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Failure category of a [`HarvestError`], used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Discovery,
    Transport,
    Conversion,
    Assembly,
    Io,
    Validation,
}

impl ErrorKind {
    /// Process exit status for a run aborted by this kind of failure.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Transport => 10,
            Self::Conversion => 11,
            Self::Io => 12,
            Self::Discovery => 13,
            Self::Assembly => 14,
            Self::Validation => 15,
            // EX_CONFIG from sysexits.h
            Self::Config => 78,
        }
    }

    /// Short lowercase label for logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Discovery => "discovery",
            Self::Transport => "transport",
            Self::Conversion => "conversion",
            Self::Assembly => "assembly",
            Self::Io => "io",
            Self::Validation => "validation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl HarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an assembly error from any displayable message.
    pub fn assembly(msg: impl Into<String>) -> Self {
        Self::Assembly {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The failure category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Discovery(_) => ErrorKind::Discovery,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Conversion(_) => ErrorKind::Conversion,
            Self::Assembly { .. } => ErrorKind::Assembly,
            Self::Io { .. } => ErrorKind::Io,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = HarvestError::config("missing access token");
        assert_eq!(err.to_string(), "config error: missing access token");

        let err = HarvestError::assembly("no sections for 000021082");
        assert!(err.to_string().contains("000021082"));
    }

    #[test]
    fn kind_classification() {
        assert_eq!(
            HarvestError::Transport("timeout".into()).kind(),
            ErrorKind::Transport
        );
        let io = HarvestError::io("/tmp/x.md", std::io::Error::other("disk full"));
        assert_eq!(io.kind(), ErrorKind::Io);
    }

    #[test]
    fn exit_codes_are_distinct_per_category() {
        let kinds = [
            ErrorKind::Config,
            ErrorKind::Discovery,
            ErrorKind::Transport,
            ErrorKind::Conversion,
            ErrorKind::Assembly,
            ErrorKind::Io,
            ErrorKind::Validation,
        ];
        let codes: std::collections::HashSet<i32> =
            kinds.iter().map(|k| k.exit_code()).collect();
        assert_eq!(codes.len(), kinds.len());
        assert!(codes.iter().all(|c| *c != 0));
    }
}
