//! Core types and events for rar-hunter

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, SkipReason};

/// Unique identifier for a bus subscriber
///
/// Ids are handed out by a per-bus counter and never reused for the
/// lifetime of that bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub u64);

impl SubscriberId {
    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One pending extraction: an archive file inside the directory it must be
/// extracted in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Archive file name, relative to `dir`
    pub archive: String,
    /// Working directory for the archiver
    pub dir: PathBuf,
}

impl Target {
    /// Create a new target
    pub fn new(archive: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            dir: dir.into(),
        }
    }

    /// Full path of the archive file
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.archive)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} in {}", self.archive, self.dir.display())
    }
}

/// Discriminator used to route an [`Event`] to its subscribers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// See [`Event::DirFound`]
    DirFound,
    /// See [`Event::DirScanError`]
    DirScanError,
    /// See [`Event::DirSkipped`]
    DirSkipped,
    /// See [`Event::JobQueued`]
    JobQueued,
    /// See [`Event::ProcessStarted`]
    ProcessStarted,
    /// See [`Event::ProcessFinished`]
    ProcessFinished,
    /// See [`Event::DispatchFailed`]
    DispatchFailed,
}

impl EventKind {
    /// Every kind, in declaration order
    pub const ALL: [EventKind; 7] = [
        EventKind::DirFound,
        EventKind::DirScanError,
        EventKind::DirSkipped,
        EventKind::JobQueued,
        EventKind::ProcessStarted,
        EventKind::ProcessFinished,
        EventKind::DispatchFailed,
    ];

    /// Stable position of this kind within [`EventKind::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Snake-case name, matching the serialized form
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::DirFound => "dir_found",
            EventKind::DirScanError => "dir_scan_error",
            EventKind::DirSkipped => "dir_skipped",
            EventKind::JobQueued => "job_queued",
            EventKind::ProcessStarted => "process_started",
            EventKind::ProcessFinished => "process_finished",
            EventKind::DispatchFailed => "dispatch_failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened while hunting for archives
///
/// Events are immutable once published. The bus only looks at
/// [`Event::kind`]; payload fields are for subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A directory was discovered under the scan root
    DirFound {
        /// Scan root the directory was found under
        root: PathBuf,
        /// Absolute path of the directory
        path: PathBuf,
    },

    /// An entry under the scan root could not be read
    DirScanError {
        /// Path that failed, or the scan root if unknown
        path: PathBuf,
        /// Error message
        error: String,
    },

    /// A directory was rejected as an extraction candidate
    DirSkipped {
        /// Directory that was skipped
        path: PathBuf,
        /// Why it was skipped
        reason: SkipReason,
    },

    /// A directory was accepted and its archive queued for extraction
    JobQueued {
        /// The queued target
        target: Target,
    },

    /// The archiver process for a target was launched
    ProcessStarted {
        /// Target being extracted
        target: Target,
    },

    /// The archiver process for a target reached a terminal state
    ProcessFinished {
        /// Target that finished
        target: Target,
        /// Whether extraction succeeded
        success: bool,
        /// Error message when `success` is false
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A subscriber returned an error while handling an event
    DispatchFailed {
        /// Kind of the event whose handler failed
        kind: EventKind,
        /// The failing subscriber
        subscriber: SubscriberId,
        /// Error message
        error: String,
    },
}

impl Event {
    /// Dispatch key of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Event::DirFound { .. } => EventKind::DirFound,
            Event::DirScanError { .. } => EventKind::DirScanError,
            Event::DirSkipped { .. } => EventKind::DirSkipped,
            Event::JobQueued { .. } => EventKind::JobQueued,
            Event::ProcessStarted { .. } => EventKind::ProcessStarted,
            Event::ProcessFinished { .. } => EventKind::ProcessFinished,
            Event::DispatchFailed { .. } => EventKind::DispatchFailed,
        }
    }

    /// The target this event moves, and the state it moves it into
    ///
    /// `JobQueued` is `Pending`, `ProcessStarted` is `Running` and
    /// `ProcessFinished` is terminal. A target that fails to launch goes
    /// straight from `Pending` to `Failed`.
    pub fn target_state(&self) -> Option<(&Target, TargetState)> {
        match self {
            Event::JobQueued { target } => Some((target, TargetState::Pending)),
            Event::ProcessStarted { target } => Some((target, TargetState::Running)),
            Event::ProcessFinished {
                target, success, ..
            } => {
                let state = if *success {
                    TargetState::Succeeded
                } else {
                    TargetState::Failed
                };
                Some((target, state))
            }
            _ => None,
        }
    }
}

/// Lifecycle of one target inside the process runner
///
/// `Pending -> Running -> {Succeeded, Failed}`; terminal states never change.
/// Transitions are announced on the bus (see [`Event::target_state`]); an
/// [`ExecutionResult`] only ever holds a terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetState {
    /// Not launched yet
    Pending,
    /// Archiver process is running
    Running,
    /// Exit status zero and output fully drained
    Succeeded,
    /// Launch, pipe or exit failure (not retried)
    Failed,
}

impl TargetState {
    /// Returns `true` for `Succeeded` and `Failed`
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Terminal outcome of running one [`Target`]
#[derive(Debug)]
pub struct ExecutionResult {
    /// The target this result belongs to
    pub target: Target,
    /// Combined stdout and stderr, in arrival order
    pub output: Vec<u8>,
    /// Whether anything arrived on stderr
    pub stderr_seen: bool,
    /// Exit code, when the process exited normally
    pub exit_code: Option<i32>,
    /// Terminal error, `None` on success
    pub error: Option<Error>,
    /// Wall time from launch to exit
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// Build a failed result that carries no process output
    pub(crate) fn failed(target: Target, error: Error, elapsed: Duration) -> Self {
        Self {
            target,
            output: Vec::new(),
            stderr_seen: false,
            exit_code: None,
            error: Some(error),
            elapsed,
        }
    }

    /// Returns `true` if the archiver exited zero without I/O errors
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Terminal state of the target
    pub fn state(&self) -> TargetState {
        if self.is_success() {
            TargetState::Succeeded
        } else {
            TargetState::Failed
        }
    }

    /// Captured output decoded lossily as UTF-8
    pub fn output_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    /// Archive file name of the target
    pub fn archive(&self) -> &str {
        &self.target.archive
    }

    /// Working directory of the target
    pub fn dir(&self) -> &Path {
        &self.target.dir
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_matches_variant() {
        let target = Target::new("a.rar", "/data/a");
        let events = [
            Event::DirFound {
                root: "/data".into(),
                path: "/data/a".into(),
            },
            Event::DirScanError {
                path: "/data/x".into(),
                error: "denied".into(),
            },
            Event::DirSkipped {
                path: "/data/b".into(),
                reason: SkipReason::NoManifest,
            },
            Event::JobQueued {
                target: target.clone(),
            },
            Event::ProcessStarted {
                target: target.clone(),
            },
            Event::ProcessFinished {
                target,
                success: true,
                error: None,
            },
            Event::DispatchFailed {
                kind: EventKind::DirFound,
                subscriber: SubscriberId(3),
                error: "boom".into(),
            },
        ];

        let kinds: Vec<EventKind> = events.iter().map(Event::kind).collect();
        assert_eq!(kinds, EventKind::ALL.to_vec());
    }

    #[test]
    fn event_kind_index_is_position_in_all() {
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::JobQueued {
            target: Target::new("show.part01.rar", "/data/show"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_queued");
        assert_eq!(json["target"]["archive"], "show.part01.rar");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn event_kind_display_matches_serde_name() {
        for kind in EventKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn target_path_joins_dir_and_archive() {
        let target = Target::new("movie.rar", "/downloads/movie");
        assert_eq!(target.path(), PathBuf::from("/downloads/movie/movie.rar"));
        assert_eq!(target.to_string(), "movie.rar in /downloads/movie");
    }

    #[test]
    fn execution_result_state_follows_error() {
        let ok = ExecutionResult {
            target: Target::new("a.rar", "/a"),
            output: b"All OK\n".to_vec(),
            stderr_seen: false,
            exit_code: Some(0),
            error: None,
            elapsed: Duration::from_millis(5),
        };
        assert!(ok.is_success());
        assert_eq!(ok.state(), TargetState::Succeeded);
        assert_eq!(ok.output_lossy(), "All OK\n");

        let failed = ExecutionResult::failed(
            Target::new("b.rar", "/b"),
            Error::Cancelled,
            Duration::ZERO,
        );
        assert!(!failed.is_success());
        assert_eq!(failed.state(), TargetState::Failed);
        assert!(failed.state().is_terminal());
        assert!(!TargetState::Running.is_terminal());
    }

    #[test]
    fn test_events_carry_target_transitions() {
        let target = Target::new("a.rar", "/a");
        let states: Vec<_> = [
            Event::JobQueued {
                target: target.clone(),
            },
            Event::ProcessStarted {
                target: target.clone(),
            },
            Event::ProcessFinished {
                target: target.clone(),
                success: false,
                error: Some("exit status 3".into()),
            },
        ]
        .iter()
        .map(|event| event.target_state().map(|(t, state)| (t.clone(), state)))
        .collect();

        assert_eq!(
            states,
            vec![
                Some((target.clone(), TargetState::Pending)),
                Some((target.clone(), TargetState::Running)),
                Some((target, TargetState::Failed)),
            ]
        );

        let found = Event::DirFound {
            root: "/".into(),
            path: "/a".into(),
        };
        assert!(found.target_state().is_none());
    }
}
