//! Consecutive-failure accounting.
//!
//! A site-wide block (bot wall, captcha storm) makes every job fail the same
//! way; burning the retry budget of the whole frontier on it is pointless.
//! The controller counts consecutive job failures across all workers and
//! trips the shared cancellation token once the threshold is exceeded. Any
//! success resets the count, so isolated failures are tolerated.

use std::sync::atomic::{AtomicI32, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::error;

pub const DEFAULT_ERROR_THRESHOLD: i32 = 5;

pub struct FailureController {
    error_count: AtomicI32,
    threshold: i32,
    cancel: CancellationToken,
}

impl FailureController {
    pub fn new(threshold: i32, cancel: CancellationToken) -> Self {
        Self {
            error_count: AtomicI32::new(0),
            threshold,
            cancel,
        }
    }

    /// Records one failed job. Trips the cancellation token when the count
    /// of consecutive failures exceeds the threshold.
    pub fn record_failure(&self) {
        let count = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.threshold {
            error!(count, "too many errors, shutting down");
            self.cancel.cancel();
        }
    }

    /// Records a successful job, resetting the consecutive-failure count.
    pub fn record_success(&self) {
        self.error_count.store(0, Ordering::SeqCst);
    }
}
