//! # rar-hunter
//!
//! Finds directories holding complete, checksum-manifested RAR sets and
//! extracts them with the external `unrar` tool.
//!
//! ## Design
//!
//! - **Event-driven** - discovery, validation and extraction talk over an
//!   [`EventBus`] with a bounded queue and a small dispatch worker pool
//! - **Partial failure** - one bad directory or archive never stops the rest;
//!   failures are collected into one report
//! - **Cancellable** - one [`CancellationToken`](tokio_util::sync::CancellationToken)
//!   stops scanning, kills running archivers and shuts the bus down
//!
//! ## Quick Start
//!
//! ```no_run
//! use rar_hunter::{CliArchiver, Config, Hunter};
//! use std::path::Path;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let archiver = CliArchiver::from_config(&config.tools)?;
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(rar_hunter::cancel_on_signal(cancel.clone()));
//!
//!     let hunter = Hunter::new(config, archiver, cancel);
//!     let report = hunter.run(Path::new("/downloads")).await?;
//!
//!     eprintln!("skipped {} dirs", report.skipped_count());
//!     if let Some(err) = report.error() {
//!         eprintln!("{err}");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// External archiver invocation
pub mod archiver;
/// Asynchronous event bus
pub mod bus;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Top-level hunt orchestration
pub mod hunter;
/// Checksum manifest parsing
pub mod manifest;
/// Concurrent archiver runs
pub mod runner;
/// Directory discovery
pub mod scanner;
/// Directory listings
pub mod snapshot;
/// Core types and events
pub mod types;
/// Extractability checks
pub mod validation;

// Re-export commonly used types
pub use archiver::{ArchiveInspector, CliArchiver};
pub use bus::{BusStats, EventBus, Handler, StopOutcome, Subscription};
pub use config::Config;
pub use error::{Error, ExecutionError, PublishError, Result, SkipReason};
pub use hunter::{HuntReport, Hunter, Verdict};
pub use manifest::Manifest;
pub use runner::{ProcessRunner, RunReport};
pub use snapshot::DirSnapshot;
pub use types::{Event, EventKind, ExecutionResult, SubscriberId, Target, TargetState};

/// Cancel `token` when a termination signal arrives.
///
/// Listens for SIGTERM and SIGINT on unix and for Ctrl+C elsewhere. If no
/// listener can be installed the token is only cancelled by its owner.
///
/// Meant to be spawned next to the work it should stop.
pub async fn cancel_on_signal(token: tokio_util::sync::CancellationToken) {
    tokio::select! {
        signal = wait_for_signal() => {
            tracing::info!(signal, "received signal, cancelling");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

// Returns the name of the signal that arrived.
#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use futures::future::select_all;
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments; listen for what we can get
    let mut streams = Vec::new();
    for (kind, name) in [
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::interrupt(), "SIGINT"),
    ] {
        match signal(kind) {
            Ok(stream) => streams.push((stream, name)),
            Err(e) => tracing::warn!(signal = name, error = %e, "could not register signal handler"),
        }
    }

    if streams.is_empty() {
        tracing::error!("no signal handlers registered, falling back to ctrl_c");
        return match tokio::signal::ctrl_c().await {
            Ok(()) => "ctrl-c",
            Err(e) => {
                tracing::error!(error = %e, "ctrl_c listener failed, never cancelling on signal");
                std::future::pending().await
            }
        };
    }

    let waits = streams.iter_mut().map(|(stream, name)| {
        Box::pin(async move {
            stream.recv().await;
            *name
        })
    });
    let (name, _, _) = select_all(waits).await;
    name
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            tracing::error!(error = %e, "ctrl_c listener failed, never cancelling on signal");
            std::future::pending().await
        }
    }
}
