// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry decorator: replays a request on 429/5xx with jittered exponential
//! backoff.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::CliError;
use crate::transport::{ResponseFuture, Transport};

/// Retry budget and backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Unjittered delay before retry number `attempt + 1`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Base delay scaled by a uniform jitter factor in `[0.5, 1.5)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor: f64 = rand::rng().random_range(0.5..1.5);
        self.base_delay(attempt).mul_f64(factor)
    }

    pub fn should_retry(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }
}

/// Wraps a transport and retries throttled or failed responses.
///
/// Transport-level errors (refused connection, DNS) are returned on the
/// first occurrence. The response of the final attempt is returned as-is,
/// whatever its status.
pub struct RetryTransport<T> {
    inner: T,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<T: Transport> RetryTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { inner, policy, cancel }
    }

    async fn send(&self, req: reqwest::Request) -> anyhow::Result<reqwest::Response> {
        // Buffered bodies are cheap to clone; a streaming body can be read
        // only once, so such a request gets a single attempt.
        if req.try_clone().is_none() {
            tracing::debug!(url = %req.url().path(), "streaming body, sending without retry");
            return self.inner.execute(req).await;
        }

        let mut attempt = 0u32;
        loop {
            let this = req
                .try_clone()
                .ok_or_else(|| anyhow::anyhow!("request body cannot be replayed"))?;
            let resp = self.inner.execute(this).await?;
            let status = resp.status().as_u16();
            if attempt >= self.policy.max_retries || !RetryPolicy::should_retry(status) {
                return Ok(resp);
            }

            let delay = self.policy.backoff_delay(attempt);
            tracing::debug!(
                status,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                path = %req.url().path(),
                "retrying request"
            );
            // Drain so the connection goes back to the pool.
            let _ = resp.bytes().await;

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(CliError::cancelled("request cancelled").into());
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl<T: Transport> Transport for RetryTransport<T> {
    fn execute(&self, req: reqwest::Request) -> ResponseFuture<'_> {
        Box::pin(self.send(req))
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
