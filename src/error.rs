//! Error types for rar-hunter
//!
//! Errors are grouped by where they are absorbed:
//! - [`SkipReason`] - a directory is not an extraction candidate (counted, not fatal)
//! - [`ExecutionError`] - one target's archiver run failed (recorded per target)
//! - [`ExtractionFailures`] - aggregate report over a whole run
//! - [`DispatchError`] - handler failures for one bus job (logged, never returned to publishers)
//! - [`PublishError`] - the bus refused an event because of backpressure

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::{EventKind, SubscriberId};

/// Result type alias for rar-hunter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for rar-hunter
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "bus.workers")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checksum manifest could not be parsed
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Scan root is missing or not a directory
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// External tool execution failed (listing archive contents, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// One archiver run failed
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// One or more targets failed in a run
    #[error(transparent)]
    Extraction(#[from] ExtractionFailures),

    /// A bus subscriber reported a failure
    #[error("handler error: {0}")]
    Handler(String),

    /// Operation was cancelled before it completed
    #[error("operation cancelled")]
    Cancelled,

    /// Operation not supported (missing binary, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    /// Build a configuration error for `key`
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Checksum manifest parse errors
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A line is not `<filename><whitespace><checksum>`
    #[error("line {line} is not `<file> <checksum>`: {content:?}")]
    Malformed {
        /// 1-based line number
        line: usize,
        /// The offending line
        content: String,
    },

    /// The manifest has no entries
    #[error("manifest lists no files")]
    Empty,
}

/// Why a directory was not accepted as an extraction target
///
/// These are recoverable at directory granularity: the directory is skipped
/// and counted.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    /// No checksum manifest in the directory
    #[error("no manifest found")]
    NoManifest,

    /// The manifest exists but could not be read or parsed
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Files listed in the manifest are absent
    #[error("required files were missing: {}", .0.join(", "))]
    MissingFiles(Vec<String>),

    /// Manifest is complete but there is no archive to extract
    #[error("no archive found")]
    NoArchive,

    /// The archive's contents already exist next to it
    #[error("{0:?} already exists")]
    AlreadyExtracted(String),

    /// The archiver could not list the archive
    #[error("problem listing archive contents: {0}")]
    ListFailed(String),

    /// The directory itself could not be read
    #[error("directory unreadable: {0}")]
    Unreadable(String),

    /// Validation was interrupted by cancellation or its deadline
    #[error("validation interrupted")]
    Interrupted,
}

/// Failure of a single archiver run
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The archiver could not be spawned
    #[error("failed to launch {}: {source}", .program.display())]
    Launch {
        /// Program that failed to start
        program: PathBuf,
        /// Underlying spawn error
        source: std::io::Error,
    },

    /// Reading the combined output failed
    #[error("failed reading archiver output: {0}")]
    Pipe(std::io::Error),

    /// Waiting for the process to exit failed
    #[error("failed waiting for archiver: {0}")]
    Wait(std::io::Error),

    /// Non-zero exit, or killed by a signal when `code` is `None`
    #[error("{}", exit_description(.code))]
    ExitStatus {
        /// Exit code, if the process exited normally
        code: Option<i32>,
    },

    /// The run was cancelled and the process killed
    #[error("cancelled before completion")]
    Cancelled,

    /// The collector stopped waiting before this target reported
    #[error("no result within {0:?}")]
    CollectTimeout(Duration),

    /// The task running this target ended without reporting
    #[error("task ended without reporting: {0}")]
    TaskLost(String),
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Aggregate report for a run in which at least one target failed
///
/// The summary holds one line per failed target.
#[derive(Debug, Error)]
#[error("encountered {failed} of {total} extraction failures\n{summary}")]
pub struct ExtractionFailures {
    /// Number of failed targets
    pub failed: usize,
    /// Number of targets in the run
    pub total: usize,
    /// Human-readable failure lines
    pub summary: String,
}

/// Reasons the bus refused an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The job queue was full and the policy is to reject
    #[error("event queue is full")]
    QueueFull,

    /// No queue capacity freed up within the publish timeout
    #[error("timed out after {0:?} waiting for queue capacity")]
    Timeout(Duration),
}

/// Handler failures collected while dispatching one job
///
/// Logged by the bus; never returned to the publisher.
#[derive(Debug)]
pub struct DispatchError {
    /// Kind of the dispatched event
    pub kind: EventKind,
    /// Failing subscribers and their error messages
    pub failures: Vec<(SubscriberId, String)>,
    /// Subscribers that were not invoked
    pub skipped: usize,
    /// Whether the per-job deadline elapsed
    pub deadline_hit: bool,
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} handler(s) failed for {} event",
            self.failures.len(),
            self.kind
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        if self.deadline_hit {
            f.write_str(" (deadline elapsed)")?;
        }
        for (id, error) in &self.failures {
            write!(f, "\n  subscriber {}: {}", id, error)?;
        }
        Ok(())
    }
}

impl std::error::Error for DispatchError {}
