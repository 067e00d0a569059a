//! Rate limiting and retry for the cloud inventory API.
//!
//! The inventory API throttles aggressively, so every call funnels through a
//! global [`RateLimiter`] before it leaves the process, and transient
//! transport failures are retried with a jittered exponential backoff whose
//! minimum wait is two thirds of the maximum.  Logical failures (not-found,
//! API rejections) are never retried.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{CloudApi, CloudError, Instance, Region, VolumeCreate};
use crate::types::{Snapshot, Volume, VolumeId};

/// Default spacing between inventory API calls.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(500);

/// Default retry ceiling for transient transport failures.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Backoff configuration for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Longest wait between attempts; the shortest is two thirds of it.
    pub base: Duration,
    /// Total attempts, counting the first.
    pub attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_RATE_LIMIT,
            attempts: DEFAULT_RETRY_LIMIT,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (zero-based), jittered within
    /// `[2/3 * w, w]` where `w` doubles from `2/3 * base` up to `base`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let floor_ms = base_ms * 2 / 3;
        let upper_ms = floor_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(base_ms);
        let lower_ms = upper_ms * 2 / 3;
        let wait_ms = if upper_ms > lower_ms {
            rand::thread_rng().gen_range(lower_ms..=upper_ms)
        } else {
            upper_ms
        };
        Duration::from_millis(wait_ms)
    }
}

/// Global spacing of outbound calls.
///
/// Hands out start slots one `interval` apart; callers sleep until their
/// slot.  The next slot is reserved before sleeping so concurrent callers
/// never share one.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    async fn acquire(&self, token: &CancellationToken) -> Result<(), CloudError> {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.unwrap_or(now).max(now);
            *next = Some(slot + self.interval);
            slot
        };
        if slot > Instant::now() {
            tokio::select! {
                _ = token.cancelled() => return Err(CloudError::Canceled),
                _ = tokio::time::sleep_until(slot) => {}
            }
        }
        Ok(())
    }
}

/// Wraps a [`CloudApi`] with the rate limit and retry ceiling.
pub struct Retrying<C> {
    inner: C,
    policy: RetryPolicy,
    limiter: RateLimiter,
}

impl<C> Retrying<C> {
    pub fn new(inner: C) -> Self {
        Self::with_policy(inner, RetryPolicy::default(), DEFAULT_RATE_LIMIT)
    }

    pub fn with_policy(inner: C, policy: RetryPolicy, rate_limit: Duration) -> Self {
        Self {
            inner,
            policy,
            limiter: RateLimiter::new(rate_limit),
        }
    }
}

/// Run `$call` under the rate limit, retrying retryable transport errors up
/// to the policy's attempt ceiling.
macro_rules! with_retry {
    ($self:ident, $token:ident, $call:expr) => {{
        let mut attempt: u32 = 0;
        loop {
            $self.limiter.acquire($token).await?;
            match $call {
                Ok(value) => break Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < $self.policy.attempts => {
                    let delay = $self.policy.backoff(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient cloud failure, retrying",
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = $token.cancelled() => break Err(CloudError::Canceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => break Err(e),
            }
        }
    }};
}

#[async_trait]
impl<C: CloudApi> CloudApi for Retrying<C> {
    async fn list_volumes(
        &self,
        label: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<Volume>, CloudError> {
        with_retry!(self, token, self.inner.list_volumes(label, token).await)
    }

    async fn get_volume(
        &self,
        id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<Volume, CloudError> {
        with_retry!(self, token, self.inner.get_volume(id, token).await)
    }

    async fn create_volume(
        &self,
        spec: VolumeCreate,
        token: &CancellationToken,
    ) -> Result<Volume, CloudError> {
        with_retry!(self, token, self.inner.create_volume(spec.clone(), token).await)
    }

    async fn delete_volume(
        &self,
        id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<(), CloudError> {
        with_retry!(self, token, self.inner.delete_volume(id, token).await)
    }

    async fn attach_volume(
        &self,
        id: &VolumeId,
        instance_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CloudError> {
        with_retry!(self, token, self.inner.attach_volume(id, instance_id, token).await)
    }

    async fn detach_volume(
        &self,
        id: &VolumeId,
        instance_id: &str,
        token: &CancellationToken,
    ) -> Result<(), CloudError> {
        with_retry!(self, token, self.inner.detach_volume(id, instance_id, token).await)
    }

    async fn resize_volume(
        &self,
        id: &VolumeId,
        capacity_bytes: u64,
        token: &CancellationToken,
    ) -> Result<Volume, CloudError> {
        with_retry!(self, token, self.inner.resize_volume(id, capacity_bytes, token).await)
    }

    async fn list_snapshots(
        &self,
        label: Option<&str>,
        source_volume_id: Option<&VolumeId>,
        token: &CancellationToken,
    ) -> Result<Vec<Snapshot>, CloudError> {
        with_retry!(
            self,
            token,
            self.inner.list_snapshots(label, source_volume_id, token).await
        )
    }

    async fn get_snapshot(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> Result<Snapshot, CloudError> {
        with_retry!(self, token, self.inner.get_snapshot(id, token).await)
    }

    async fn create_snapshot(
        &self,
        label: &str,
        source_volume_id: &VolumeId,
        token: &CancellationToken,
    ) -> Result<Snapshot, CloudError> {
        with_retry!(
            self,
            token,
            self.inner.create_snapshot(label, source_volume_id, token).await
        )
    }

    async fn delete_snapshot(&self, id: &str, token: &CancellationToken) -> Result<(), CloudError> {
        with_retry!(self, token, self.inner.delete_snapshot(id, token).await)
    }

    async fn get_instance(
        &self,
        id: &str,
        token: &CancellationToken,
    ) -> Result<Instance, CloudError> {
        with_retry!(self, token, self.inner.get_instance(id, token).await)
    }

    async fn list_regions(&self, token: &CancellationToken) -> Result<Vec<Region>, CloudError> {
        with_retry!(self, token, self.inner.list_regions(token).await)
    }
}
