//! Retry bookkeeping for failed deliveries.
//!
//! A retry is a spawned tokio task that sleeps for the backoff delay and
//! then re-runs the original log call. The scheduler keeps a ticket per
//! outstanding retry so callers can inspect and await them.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::LoggingConfig;
use crate::level::LogLevel;

const BASE_DELAY_MS: u64 = 1000;

/// Retry limits taken from the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub max_pending: usize,
}

impl RetryPolicy {
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self {
            enabled: config.enable_retry,
            max_retries: config.max_retries,
            max_pending: config.max_pending_retries,
        }
    }

    /// Delay before retry number `attempt`: `2^attempt * 1000` ms.
    pub fn delay_for(attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(factor.saturating_mul(BASE_DELAY_MS))
    }

    /// Attempt number to schedule given the current retry count, or
    /// `None` when retries are disabled or exhausted.
    pub fn next_attempt(&self, retry_count: u32) -> Option<u32> {
        (self.enabled && retry_count < self.max_retries).then(|| retry_count + 1)
    }
}

/// A scheduled, not yet fired, retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryTicket {
    pub id: u64,
    pub attempt: u32,
    pub delay: Duration,
    pub level: LogLevel,
    pub message: Value,
    pub scheduled_at: DateTime<Utc>,
}

/// Owns the retry tasks of one delivery service.
#[derive(Debug)]
pub struct RetryScheduler {
    next_id: AtomicU64,
    max_pending: usize,
    pending: Mutex<BTreeMap<u64, RetryTicket>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RetryScheduler {
    pub fn new(max_pending: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            max_pending,
            pending: Mutex::new(BTreeMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `make(id)` after `delay`.
    ///
    /// Returns the ticket, or `None` without spawning anything when
    /// `max_pending` retries are already outstanding. The spawned future
    /// should call [`RetryScheduler::fire`] with its id before re-sending.
    pub fn schedule<F, Fut>(
        &self,
        attempt: u32,
        delay: Duration,
        level: LogLevel,
        message: Value,
        make: F,
    ) -> Option<RetryTicket>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = {
            let mut pending = lock(&self.pending);
            if pending.len() >= self.max_pending {
                return None;
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let ticket = RetryTicket {
                id,
                attempt,
                delay,
                level,
                message,
                scheduled_at: Utc::now(),
            };
            pending.insert(id, ticket.clone());
            ticket
        };

        let work = make(ticket.id);
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            work.await;
        });

        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
        Some(ticket)
    }

    /// Mark a retry as fired, removing it from the pending set.
    pub fn fire(&self, id: u64) -> Option<RetryTicket> {
        lock(&self.pending).remove(&id)
    }

    pub fn pending(&self) -> Vec<RetryTicket> {
        lock(&self.pending).values().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Await every outstanding retry task, including retries scheduled
    /// by retries that run while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let tasks = std::mem::take(&mut *lock(&self.tasks));
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "retry task did not complete");
                }
            }
        }
    }
}
