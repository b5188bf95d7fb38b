// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// A cooperative cancellation signal threaded through a request.
///
/// The token is cheap to clone; all clones observe the same signal. Callers
/// cancel a request by calling [`cancel`][Self::cancel]; strategies and the
/// transport observe the signal either by polling [`is_cancelled`][Self::is_cancelled]
/// at loop boundaries or by awaiting [`cancelled`][Self::cancelled] inside a
/// `select`.
///
/// Cancellation is level-triggered and sticky: once cancelled, a token stays
/// cancelled forever.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Creates a token in the non-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the token into the cancelled state and wakes all waiters.
    ///
    /// Calling this more than once is harmless.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns `true` once the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes when the token is cancelled.
    ///
    /// If the token is already cancelled, completes immediately.
    pub async fn cancelled(&self) {
        // The notified future must be created before the flag re-check to
        // avoid missing a wake between the check and the await.
        loop {
            if self.is_cancelled() {
                return;
            }

            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }

            notified.await;
        }
    }
}
