// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resilience primitives for external calls (retry policy + call gate).
//!
//! Every retrieval, generation and scoring call passes through a [`CallGate`],
//! which bounds in-flight calls with a shared semaphore, applies the per-call
//! timeout and stops issuing work once the run is cancelled.

use rand::random;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self::exponential(0, Duration::ZERO)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let jitter_factor = 1.0 + (random::<f64>() - 0.5) * 2.0 * self.jitter;
        let clamped = (base * jitter_factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(clamped.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(2, Duration::from_millis(250))
    }
}

/// Outcome of a single gated call that did not produce a value
#[derive(Debug)]
pub enum CallError<E> {
    /// The operation itself failed
    Failed(E),

    /// The per-call timeout elapsed
    Timeout(Duration),

    /// The run was cancelled before the operation was issued
    NotStarted,

    /// The run was cancelled while the operation was in flight
    Cancelled,
}

impl<E: Retryable> CallError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            CallError::Failed(e) => e.is_retryable(),
            CallError::Timeout(_) => true,
            CallError::NotStarted | CallError::Cancelled => false,
        }
    }
}

/// Final error of a retried call, with the number of attempts made
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub error: CallError<E>,
}

/// Shared admission control for all external calls of one run
#[derive(Clone)]
pub struct CallGate {
    limiter: Arc<Semaphore>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl CallGate {
    pub fn new(max_concurrent: usize, timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `operation` once under the concurrency limit and timeout
    pub async fn call_once<F, Fut, T, E>(&self, operation: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.cancel.is_cancelled() {
            return Err(CallError::NotStarted);
        }

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(CallError::NotStarted),
            permit = self.limiter.acquire() => permit.map_err(|_| CallError::NotStarted)?,
        };

        // Cancelled while queued for a permit
        if self.cancel.is_cancelled() {
            return Err(CallError::NotStarted);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CallError::Cancelled),
            result = tokio::time::timeout(self.timeout, operation()) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(CallError::Failed(e)),
                Err(_) => Err(CallError::Timeout(self.timeout)),
            },
        }
    }

    /// Run `operation` with retries for retryable failures and timeouts.
    ///
    /// The concurrency permit is released while backing off.
    pub async fn call_with_retry<F, Fut, T, E>(
        &self,
        policy: &RetryPolicy,
        mut operation: F,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 0u32;
        loop {
            match self.call_once(&mut operation).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !error.is_retryable() || attempt >= policy.max_retries {
                        return Err(Exhausted {
                            attempts: attempt + 1,
                            error,
                        });
                    }

                    let delay = policy.delay_for_attempt(attempt);
                    match &error {
                        CallError::Failed(e) => {
                            debug!("Attempt {} failed ({}), retrying in {:?}", attempt + 1, e, delay)
                        }
                        _ => debug!("Attempt {} timed out, retrying in {:?}", attempt + 1, delay),
                    }

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            return Err(Exhausted {
                                attempts: attempt + 1,
                                error: CallError::Cancelled,
                            });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}
