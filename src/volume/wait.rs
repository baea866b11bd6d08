//! Status polling with bounded or unbounded budgets.

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::backend::CloudVolumeClient;
use crate::command::CommandRunner;

use super::{VolumeResource, VolumeStatus};

/// Number of status checks a bounded wait performs.
const BOUNDED_CHECKS: u32 = 10;

/// How long [`VolumeResource::wait_for_status`] may wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Wait {
    /// Poll until the status is reached or the volume disappears. May never
    /// return if the provider never reports the target status.
    Unbounded,
    /// Check ten times, `timeout / 10` apart.
    Bounded(Duration),
}

impl<C: CloudVolumeClient, R: CommandRunner> VolumeResource<C, R> {
    /// Waits for the volume to reach `target`.
    ///
    /// Returns `true` as soon as `target` is observed. Returns `false` when the
    /// first check finds no volume, or when the volume is unbound while
    /// waiting. A later [`VolumeStatus::None`] from a failed describe only
    /// costs a check. A bounded wait returns `false` after its tenth
    /// unsuccessful check.
    pub async fn wait_for_status(&mut self, target: VolumeStatus, wait: Wait) -> bool {
        let mut checks: u32 = 0;
        loop {
            let status = self.status().await;
            checks = checks.saturating_add(1);
            if status == target {
                debug!(volume = %self.full_name(), %status, checks, "volume reached status");
                return true;
            }
            if (checks == 1 && status == VolumeStatus::None) || self.volume_id().is_none() {
                debug!(volume = %self.full_name(), %target, "no volume to wait on");
                return false;
            }
            let interval = match wait {
                Wait::Unbounded => self.timings.unbounded_poll,
                Wait::Bounded(_) if checks >= BOUNDED_CHECKS => {
                    debug!(volume = %self.full_name(), %target, %status, "timed out waiting for volume status");
                    return false;
                }
                Wait::Bounded(timeout) => timeout / BOUNDED_CHECKS,
            };
            debug!(volume = %self.full_name(), %status, %target, checks, "waiting for volume status");
            sleep(interval).await;
        }
    }
}
