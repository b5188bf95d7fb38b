// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Provides an abstraction over monotonic time and delays.
///
/// Working with time is notoriously difficult to test. The clock enables time
/// control in tests while adding near-zero overhead in production: the system
/// clock reads [`Instant::now`] and delays through the async runtime, while a
/// manual clock created via [`ClockControl`] shares a controllable offset with
/// all of its clones.
///
/// Cloning a clock is inexpensive and preserves shared state: all clones of a
/// manual clock observe the same flow of time.
#[derive(Debug, Clone)]
pub struct Clock(ClockRepr);

#[derive(Debug, Clone)]
enum ClockRepr {
    System,
    Manual(Arc<ManualClock>),
}

impl Clock {
    /// Creates a clock backed by the operating system.
    #[must_use]
    pub fn system() -> Self {
        Self(ClockRepr::System)
    }

    /// Returns the current monotonic reading of this clock.
    #[must_use]
    pub fn instant(&self) -> Instant {
        match &self.0 {
            ClockRepr::System => Instant::now(),
            ClockRepr::Manual(manual) => manual.now(),
        }
    }

    /// Creates a stopwatch that measures elapsed time from now.
    #[must_use]
    pub fn stopwatch(&self) -> Stopwatch {
        Stopwatch {
            clock: self.clone(),
            start: self.instant(),
        }
    }

    /// Completes after `duration` has passed on this clock.
    ///
    /// A zero duration completes on first poll. On a manual clock the delay
    /// completes when the controlling test advances time past the deadline,
    /// or immediately when auto-advance is enabled.
    pub async fn delay(&self, duration: Duration) {
        match &self.0 {
            ClockRepr::System => tokio::time::sleep(duration).await,
            ClockRepr::Manual(manual) => {
                ManualDelay::new(manual, duration).await;
            }
        }
    }
}

/// A stopwatch that measures elapsed time on the clock that created it.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    clock: Clock,
    start: Instant,
}

impl Stopwatch {
    /// Returns the elapsed time since the stopwatch was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.clock.instant().saturating_duration_since(self.start)
    }
}

/// Controls the flow of time on a manual [`Clock`].
///
/// Create a control, derive clocks from it with [`to_clock`][Self::to_clock],
/// and move time forward explicitly with [`advance`][Self::advance]. With
/// [`auto_advance`][Self::auto_advance] enabled, polling a pending delay jumps
/// time to the earliest pending deadline, so timer-heavy tests run without
/// real sleeping.
///
/// Time on a manual clock never moves backwards and never advances on its own.
#[derive(Debug, Clone)]
pub struct ClockControl {
    inner: Arc<ManualClock>,
}

impl Default for ClockControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockControl {
    /// Creates a control whose clock starts frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ManualClock {
                base: Instant::now(),
                auto_advance: AtomicBool::new(false),
                state: Mutex::new(ManualState::default()),
            }),
        }
    }

    /// Enables or disables auto-advance.
    #[must_use]
    pub fn auto_advance(self, enabled: bool) -> Self {
        self.inner.auto_advance.store(enabled, Ordering::SeqCst);
        self
    }

    /// Derives a clock that reads this control's time.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock(ClockRepr::Manual(Arc::clone(&self.inner)))
    }

    /// Moves time forward by `duration`, waking every delay whose deadline
    /// has been reached.
    pub fn advance(&self, duration: Duration) {
        self.inner.advance(duration);
    }

    /// Returns how far this clock has been advanced since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.inner.state.lock().offset
    }
}

#[derive(Debug)]
struct ManualClock {
    base: Instant,
    auto_advance: AtomicBool,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    offset: Duration,
    timers: BTreeMap<(Duration, u64), Waker>,
    next_id: u64,
    // Timers woken by an advance but not yet observed by their future.
    // While non-zero, auto-advance holds still so no event is overtaken.
    unobserved_wakes: usize,
}

impl ManualClock {
    fn now(&self) -> Instant {
        self.base + self.state.lock().offset
    }

    fn advance(&self, duration: Duration) {
        let due = {
            let mut state = self.state.lock();
            state.offset = state.offset.saturating_add(duration);
            drain_due(&mut state)
        };

        for waker in due {
            waker.wake();
        }
    }
}

/// Removes and returns the wakers of all timers at or before the current offset.
fn drain_due(state: &mut ManualState) -> Vec<Waker> {
    let mut due = Vec::new();
    while let Some((key, _)) = state.timers.first_key_value() {
        if key.0 > state.offset {
            break;
        }
        let key = *key;
        if let Some(waker) = state.timers.remove(&key) {
            due.push(waker);
            state.unobserved_wakes += 1;
        }
    }
    due
}

struct ManualDelay {
    clock: Arc<ManualClock>,
    deadline: Duration,
    key: Option<(Duration, u64)>,
}

impl ManualDelay {
    fn new(clock: &Arc<ManualClock>, duration: Duration) -> Self {
        let deadline = clock.state.lock().offset.saturating_add(duration);
        Self {
            clock: Arc::clone(clock),
            deadline,
            key: None,
        }
    }

    fn register_key(key: &mut Option<(Duration, u64)>, deadline: Duration, state: &mut ManualState, cx: &Context<'_>) {
        match *key {
            Some(k) => {
                state.timers.insert(k, cx.waker().clone());
            }
            None => {
                let k = (deadline, state.next_id);
                state.next_id += 1;
                state.timers.insert(k, cx.waker().clone());
                *key = Some(k);
            }
        }
    }
}

impl Future for ManualDelay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;
        let mut woken = Vec::new();

        let ready = {
            let mut state = this.clock.state.lock();

            if state.offset >= this.deadline {
                if let Some(key) = this.key.take()
                    && state.timers.remove(&key).is_none()
                {
                    // This timer was woken by an advance; its event has now
                    // been observed.
                    state.unobserved_wakes = state.unobserved_wakes.saturating_sub(1);
                }
                true
            } else if !this.clock.auto_advance.load(Ordering::SeqCst) {
                Self::register_key(&mut this.key, this.deadline, &mut state, cx);
                false
            } else if this.key.is_none() {
                // First poll under auto-advance: register and yield so that
                // sibling timers racing in the same select get registered
                // before time jumps anywhere.
                Self::register_key(&mut this.key, this.deadline, &mut state, cx);
                cx.waker().wake_by_ref();
                false
            } else if state.unobserved_wakes > 0 {
                // An already-fired event has not been observed yet; advancing
                // now could overtake it. The observer's poll wakes this task
                // again.
                Self::register_key(&mut this.key, this.deadline, &mut state, cx);
                false
            } else {
                // Jump to the earliest registered deadline. Never jumping
                // past it keeps event ordering intact across concurrent
                // delays.
                Self::register_key(&mut this.key, this.deadline, &mut state, cx);
                if let Some((key, _)) = state.timers.first_key_value() {
                    state.offset = state.offset.max(key.0);
                }

                if state.offset >= this.deadline {
                    if let Some(key) = this.key.take() {
                        state.timers.remove(&key);
                    }
                    woken = drain_due(&mut state);
                    true
                } else {
                    woken = drain_due(&mut state);
                    false
                }
            }
        };

        for waker in woken {
            waker.wake();
        }

        if ready { Poll::Ready(()) } else { Poll::Pending }
    }
}

impl Drop for ManualDelay {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut state = self.clock.state.lock();
            if state.timers.remove(&key).is_none() {
                // Dropped after being woken but before observing the wake.
                state.unobserved_wakes = state.unobserved_wakes.saturating_sub(1);
            }
        }
    }
}
