//! Drain timers.
//!
//! A server that starts draining gets a timer task that fires after the
//! pool's drain timeout. The timer can be cancelled at any point, either
//! because the server reported itself drained or because it was reused.
//!
//! Expiry and cancellation race. Both sides resolve the race under the
//! datacenter lock by removing the timer entry: cancellation removes it
//! unconditionally, expiry only when the entry still carries the generation
//! the task was armed with. Whichever removes the entry owns the outcome.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use fleetplane_core::ServerId;
use tokio_util::sync::CancellationToken;

struct TimerHandle {
    token: CancellationToken,
    generation: u64,
}

/// Armed drain timers, one per draining server.
#[derive(Default)]
pub struct DrainTimers {
    timers: DashMap<ServerId, TimerHandle>,
    next_generation: AtomicU64,
}

impl DrainTimers {
    /// Create an empty timer set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for `server_id`, replacing any previous one.
    ///
    /// When the timer fires, `on_expire` is called with the generation the
    /// timer was armed with. It must pass that generation to
    /// [`claim`](Self::claim) under the datacenter lock before acting.
    /// Returns the generation.
    pub fn arm<F, Fut>(&self, server_id: ServerId, timeout: Duration, on_expire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self.timers.insert(
            server_id,
            TimerHandle {
                token: token.clone(),
                generation,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!(server_id = %server_id, generation, "Drain timer cancelled");
                }
                () = tokio::time::sleep(timeout) => {
                    tracing::debug!(server_id = %server_id, generation, "Drain timer fired");
                    on_expire(generation).await;
                }
            }
        });

        tracing::debug!(
            server_id = %server_id,
            generation,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Armed drain timer"
        );
        generation
    }

    /// Take ownership of an expiry.
    ///
    /// Returns true if the timer armed with `generation` was still pending,
    /// in which case it is removed and the caller must complete the drain.
    pub fn claim(&self, server_id: ServerId, generation: u64) -> bool {
        self.timers
            .remove_if(&server_id, |_, handle| handle.generation == generation)
            .is_some()
    }

    /// Cancel a pending timer.
    ///
    /// Returns true if a timer was pending.
    pub fn cancel(&self, server_id: ServerId) -> bool {
        match self.timers.remove(&server_id) {
            Some((_, handle)) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns true if a timer is pending for `server_id`.
    #[must_use]
    pub fn is_armed(&self, server_id: ServerId) -> bool {
        self.timers.contains_key(&server_id)
    }

    /// Number of pending timers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Returns true if no timer is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
