//! Error kinds for the source-acquisition core and the run loop.

use std::path::PathBuf;
use thiserror::Error;

/// Failure modes of a single source acquisition.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// Malformed descriptor input: bad URL, missing credential field,
    /// commit that is not 40 hex characters, and similar.
    #[error("bad input: {0}")]
    BadInput(String),

    /// A strict minimum-version requirement was not met.
    #[error("requirement not met: {0}")]
    RequirementNotMet(String),

    /// The git binary (or git-lfs) exited non-zero where the orchestrator
    /// has no recovery path.
    #[error("git {operation} failed with exit code {code}")]
    ExternalBinaryFailed { operation: String, code: i32 },

    /// Filesystem operation failed (directory purge, askpass helper
    /// creation, config file edit).
    #[error("filesystem operation failed on {path}: {source}")]
    FileSystemFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cancellation token was tripped. Short-circuits with no
    /// credential scrubbing; post-job cleanup is the caller's.
    #[error("operation cancelled")]
    Cancelled,
}

impl AcquireError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystemFailed {
            path: path.into(),
            source,
        }
    }

    pub fn binary(operation: impl Into<String>, code: i32) -> Self {
        Self::ExternalBinaryFailed {
            operation: operation.into(),
            code,
        }
    }
}

/// Run-loop session failures surfaced to the agent entry point.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("dispatcher session could not be established")]
    SessionRejected,

    #[error("dispatcher transport failed: {0}")]
    Transport(String),

    #[error("message body could not be decoded: {0}")]
    BadMessage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_quoted_in_message() {
        let err = AcquireError::binary("fetch", 128);
        assert_eq!(err.to_string(), "git fetch failed with exit code 128");
    }

    #[test]
    fn test_requirement_message() {
        let err = AcquireError::RequirementNotMet("git 2.9 or newer required".into());
        assert!(err.to_string().contains("2.9"));
    }
}
