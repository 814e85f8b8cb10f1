//! Bounded, staggered dispatch of remote calls.
//!
//! Every remote call of a run (resolution, search pages, mutations) passes
//! through one [`ConcurrencyGate`]. The gate holds at most `max_concurrency`
//! slots. After a slot is acquired the task waits
//! `(order % max_concurrency) * stagger_unit` before it runs, so a wave of
//! slots released together does not fire in the same instant.
//!
//! This is the only rate-limit defence: there is no retry or backoff. A
//! throttled call surfaces as a `RateLimited` failure for the operator.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::trace;

/// A shared pool of dispatch slots with deterministic stagger.
#[derive(Debug)]
pub struct ConcurrencyGate {
    slots: Semaphore,
    max_concurrency: usize,
    stagger_unit: Duration,
    /// Run-wide dispatch counter used as the stagger order.
    next_order: AtomicU64,
}

impl ConcurrencyGate {
    /// Creates a gate. `max_concurrency` is clamped to at least 1.
    pub fn new(max_concurrency: usize, stagger_unit: Duration) -> Self {
        let max_concurrency = max_concurrency.max(1);
        ConcurrencyGate {
            slots: Semaphore::new(max_concurrency),
            max_concurrency,
            stagger_unit,
            next_order: AtomicU64::new(0),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of slots not currently held.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Allocates the next stagger order. Monotonic across the whole run.
    pub fn next_order(&self) -> u64 {
        self.next_order.fetch_add(1, Ordering::Relaxed)
    }

    /// The delay applied to a task dispatched with `order`.
    pub fn stagger_for(&self, order: u64) -> Duration {
        let step = order % self.max_concurrency as u64;
        self.stagger_unit.saturating_mul(step as u32)
    }

    /// Runs `task` inside a slot.
    ///
    /// Waits for a free slot, then for the stagger delay, then runs the task.
    /// The slot is released when the returned future completes or is dropped.
    pub async fn run<T, F>(&self, order: u64, task: F) -> T
    where
        F: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self.slots.acquire().await.ok();

        let delay = self.stagger_for(order);
        if !delay.is_zero() {
            trace!(order, delay_ms = delay.as_millis() as u64, "Staggering dispatch");
            tokio::time::sleep(delay).await;
        }

        task.await
    }

    /// Allocates an order and runs `task` inside a slot.
    pub async fn dispatch<T, F>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let order = self.next_order();
        self.run(order, task).await
    }
}
