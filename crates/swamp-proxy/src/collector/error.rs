//! Collector errors.

use thiserror::Error;

/// Errors raised while querying the collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The identifier would not form a safe constraint expression.
    #[error("invalid collector identifier: {0}")]
    InvalidIdentifier(String),

    /// The query command could not be started.
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The query command exited unsuccessfully.
    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The query command did not finish in time.
    #[error("{command} timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// The collector answered with something we could not read.
    #[error("malformed collector output: {0}")]
    MalformedOutput(String),
}

pub type CollectorResult<T> = Result<T, CollectorError>;
