//! Directory discovery.
//!
//! Walks a tree on a blocking thread and announces every directory on the bus
//! as [`Event::DirFound`], and every unreadable entry as
//! [`Event::DirScanError`]. Symbolic links are not followed.

use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::bus::EventBus;
use crate::error::{Error, Result};
use crate::types::Event;

// Walker results waiting to be published
const WALK_BUFFER: usize = 64;

/// What a scan published
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// `DirFound` events accepted by the bus
    pub announced: usize,
    /// `DirScanError` events accepted by the bus
    pub errors: usize,
    /// Events the bus refused because its queue stayed full
    pub dropped: usize,
}

/// Walk `root` and publish one event per directory (the root included).
///
/// Stops early, returning what was published so far, when `cancel` fires.
///
/// # Errors
///
/// [`Error::NotADirectory`] if `root` is missing or not a directory.
pub async fn scan(root: &Path, bus: &EventBus, cancel: &CancellationToken) -> Result<ScanSummary> {
    match tokio::fs::metadata(root).await {
        Ok(metadata) if metadata.is_dir() => {}
        _ => return Err(Error::NotADirectory(root.to_path_buf())),
    }

    let (tx, mut rx) = mpsc::channel(WALK_BUFFER);
    let walk_root = root.to_path_buf();
    let walk_cancel = cancel.clone();
    let walker = tokio::task::spawn_blocking(move || walk(walk_root, walk_cancel, tx));

    let mut summary = ScanSummary::default();
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let is_error = matches!(event, Event::DirScanError { .. });
        match bus.publish_wait(event).await {
            Ok(()) if is_error => summary.errors += 1,
            Ok(()) => summary.announced += 1,
            Err(e) => {
                summary.dropped += 1;
                tracing::warn!(error = %e, "could not publish scan result");
            }
        }
    }
    // Unblocks the walker if it is waiting on a full buffer
    drop(rx);

    if let Err(e) = walker.await {
        tracing::error!(error = %e, "directory walker failed");
    }

    if cancel.is_cancelled() {
        tracing::info!(root = ?root, announced = summary.announced, "scan interrupted");
    } else {
        tracing::info!(
            root = ?root,
            announced = summary.announced,
            errors = summary.errors,
            "scan complete"
        );
    }
    Ok(summary)
}

fn walk(root: PathBuf, cancel: CancellationToken, tx: mpsc::Sender<Event>) {
    for entry in WalkDir::new(&root).follow_links(false) {
        if cancel.is_cancelled() {
            break;
        }
        let event = match entry {
            Ok(entry) if entry.file_type().is_dir() => Event::DirFound {
                root: root.clone(),
                path: entry.into_path(),
            },
            Ok(_) => continue,
            Err(e) => Event::DirScanError {
                path: e.path().map_or_else(|| root.clone(), Path::to_path_buf),
                error: e.to_string(),
            },
        };
        if tx.blocking_send(event).is_err() {
            break;
        }
    }
}
