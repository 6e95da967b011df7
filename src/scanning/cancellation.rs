//! Cooperative cancellation for refresh and miss resolution
//!
//! The store polls its token before each round and again when a query
//! reply arrives, before anything from that reply is applied. A cancelled
//! refresh leaves the store as the last completed round left it.

use std::fmt::Debug;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

pub trait CancellationToken: Send + Sync + Debug {
    fn is_cancelled(&self) -> bool;

    fn cancel(&self);

    /// Clear a previous request; tokens that cannot be reset ignore this
    fn reset(&self) {}
}

#[derive(Debug, Default)]
struct Flag(AtomicBool);

impl Flag {
    fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

/// Shared-flag token; clones observe the same flag
#[derive(Debug, Clone, Default)]
pub struct AtomicCancellationToken {
    flag: Arc<Flag>,
}

impl AtomicCancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is already cancelled
    pub fn cancelled() -> Self {
        let token = Self::new();
        token.cancel();
        token
    }

    /// Token for the refresh plus a handle for whoever may abort it
    pub fn create_pair() -> (Self, CancellationHandle) {
        let token = Self::new();
        let handle = CancellationHandle {
            token: token.clone(),
        };
        (token, handle)
    }
}

impl CancellationToken for AtomicCancellationToken {
    fn is_cancelled(&self) -> bool {
        self.flag.get()
    }

    fn cancel(&self) {
        self.flag.set(true);
    }

    fn reset(&self) {
        self.flag.set(false);
    }
}

/// Trigger side of an [`AtomicCancellationToken`]
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    token: AtomicCancellationToken,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reset(&self) {
        self.token.reset();
    }
}

/// Default token of a [`super::SyncContext`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancelToken;

impl CancellationToken for NeverCancelToken {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn cancel(&self) {}
}

/// Cancels once a deadline passes, or earlier on request
#[derive(Debug)]
pub struct TimeoutCancellationToken {
    deadline: Instant,
    requested: Flag,
}

impl TimeoutCancellationToken {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            requested: Flag::default(),
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.remaining_time().is_none()
    }

    /// Time left before the deadline, `None` once it has passed
    pub fn remaining_time(&self) -> Option<Duration> {
        let now = Instant::now();
        (now < self.deadline).then(|| self.deadline - now)
    }
}

impl CancellationToken for TimeoutCancellationToken {
    fn is_cancelled(&self) -> bool {
        self.requested.get() || self.is_timed_out()
    }

    fn cancel(&self) {
        self.requested.set(true);
    }

    fn reset(&self) {
        self.requested.set(false);
    }
}
