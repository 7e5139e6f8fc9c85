//! Subscriber that writes every event to `tracing`.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::Handler;
use crate::error::{Result, SkipReason};
use crate::types::Event;

/// Logs each event at a level matching its severity
///
/// Usually registered with [`EventBus::subscribe_all`](super::EventBus::subscribe_all).
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSubscriber;

#[async_trait]
impl Handler for LogSubscriber {
    async fn handle(&self, event: Arc<Event>, _cancel: CancellationToken) -> Result<()> {
        match &*event {
            Event::DirFound { root, path } => {
                tracing::debug!(root = ?root, path = ?path, "directory found");
            }
            Event::DirScanError { path, error } => {
                tracing::warn!(path = ?path, error = %error, "failed to read directory entry");
            }
            // Most directories have no manifest at all
            Event::DirSkipped {
                path,
                reason: SkipReason::NoManifest,
            } => {
                tracing::debug!(path = ?path, "skipping directory without manifest");
            }
            Event::DirSkipped { path, reason } => {
                tracing::info!(path = ?path, reason = %reason, "skipping directory");
            }
            Event::JobQueued { target } => {
                tracing::info!(archive = %target.archive, dir = ?target.dir, "queued for extraction");
            }
            Event::ProcessStarted { target } => {
                tracing::info!(archive = %target.archive, dir = ?target.dir, "extraction started");
            }
            Event::ProcessFinished {
                target,
                success: true,
                ..
            } => {
                tracing::info!(archive = %target.archive, dir = ?target.dir, "extraction complete");
            }
            Event::ProcessFinished { target, error, .. } => {
                tracing::error!(
                    archive = %target.archive,
                    dir = ?target.dir,
                    error = error.as_deref().unwrap_or("unknown error"),
                    "extraction failed"
                );
            }
            Event::DispatchFailed {
                kind,
                subscriber,
                error,
            } => {
                tracing::warn!(kind = %kind, subscriber = %subscriber, error = %error, "event handler failed");
            }
        }
        Ok(())
    }
}
