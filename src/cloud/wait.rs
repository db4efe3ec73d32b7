//! State-transition polling for volumes, attachments and snapshots.

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::debug;

use super::api::{ATTACHMENT_ATTACHED, ATTACHMENT_ATTACHING, SNAPSHOT_PENDING};
use super::{CloudError, StorageClient};

/// Interval between state checks when nothing else is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How the client waits for eventually consistent transitions.
///
/// Without a timeout a wait only ends once the resource leaves its
/// transitional state or a provider call fails.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    /// Pause before every state check.
    pub interval: Duration,
    /// Upper bound on a single wait.
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl PollPolicy {
    /// Polls without pausing; intended for simulated providers.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            interval: Duration::ZERO,
            timeout: None,
        }
    }

    /// Returns a copy bounded by `timeout`.
    #[must_use]
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            interval: self.interval,
            timeout: Some(timeout),
        }
    }

    fn start(self, action: &str, resource_id: &str) -> Poller {
        Poller {
            interval: self.interval,
            deadline: self
                .timeout
                .and_then(|timeout| Instant::now().checked_add(timeout)),
            action: action.to_owned(),
            resource_id: resource_id.to_owned(),
        }
    }
}

struct Poller {
    interval: Duration,
    deadline: Option<Instant>,
    action: String,
    resource_id: String,
}

impl Poller {
    async fn pause(&self) -> Result<(), CloudError> {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(CloudError::Timeout {
                action: self.action.clone(),
                resource_id: self.resource_id.clone(),
            });
        }
        sleep(self.interval).await;
        Ok(())
    }
}

impl StorageClient {
    /// Polls `volume_id` until its state leaves `start`, then requires `end`.
    pub(super) async fn wait_for_volume_transition(
        &self,
        volume_id: &str,
        start: &str,
        end: &str,
    ) -> Result<(), CloudError> {
        let poller = self.poll.start(&format!("reach {end} from {start}"), volume_id);
        let state = loop {
            poller.pause().await?;
            let volume = self.get_volume(volume_id).await?;
            if volume.state != start {
                break volume.state;
            }
            debug!(volume_id, start, end, "waiting for volume state transition");
        };

        if state != end {
            return Err(CloudError::UnexpectedState {
                resource_id: volume_id.to_owned(),
                expected: end.to_owned(),
                found: state,
            });
        }
        Ok(())
    }

    /// Polls `volume_id` until its first attachment leaves `attaching`, then
    /// requires `attached`.
    pub(super) async fn wait_for_attachment(&self, volume_id: &str) -> Result<(), CloudError> {
        let poller = self.poll.start("attach", volume_id);
        let mut seen_attachment = false;
        loop {
            poller.pause().await?;
            let volume = self.get_volume(volume_id).await?;
            let Some(attachment) = volume.attachments.first() else {
                if seen_attachment {
                    return Err(CloudError::UnexpectedState {
                        resource_id: volume_id.to_owned(),
                        expected: ATTACHMENT_ATTACHED.to_owned(),
                        found: String::from("detached"),
                    });
                }
                debug!(volume_id, "attachment not reported yet");
                continue;
            };
            seen_attachment = true;

            if attachment.state == ATTACHMENT_ATTACHING {
                debug!(volume_id, "waiting for volume to attach");
                continue;
            }
            if attachment.state != ATTACHMENT_ATTACHED {
                return Err(CloudError::UnexpectedState {
                    resource_id: volume_id.to_owned(),
                    expected: ATTACHMENT_ATTACHED.to_owned(),
                    found: attachment.state.clone(),
                });
            }
            return Ok(());
        }
    }

    /// Polls `snapshot_id` until its state leaves `pending`.
    ///
    /// The terminal state is not inspected; callers needing a usable snapshot
    /// check it themselves.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when a lookup fails or the configured deadline
    /// passes.
    pub async fn wait_for_snapshot_complete(&self, snapshot_id: &str) -> Result<(), CloudError> {
        let poller = self.poll.start("complete", snapshot_id);
        loop {
            poller.pause().await?;
            let snapshot = self.get_snapshot(snapshot_id).await?;
            if snapshot.state != SNAPSHOT_PENDING {
                return Ok(());
            }
            debug!(snapshot_id, progress = %snapshot.progress, "snapshot in progress");
        }
    }
}
