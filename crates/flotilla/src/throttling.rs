// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Client-side adaptive throttling.
//!
//! Tracks how many requests this client issued against how many the cluster
//! accepted over a trailing window, and preemptively rejects a fraction of
//! traffic when the cluster stops accepting. Rejected requests terminate
//! with [`ClusterStatus::Throttled`][crate::ClusterStatus::Throttled] before
//! any replica is contacted.

use std::collections::VecDeque;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::context::RequestContext;
use crate::model::{ClusterResult, ClusterStatus};
use crate::pipeline::{PipelineNext, RequestModule};
use crate::rnd::Rnd;
use crate::time::Clock;

/// Options of the adaptive throttling module.
#[derive(Debug, Clone)]
pub struct AdaptiveThrottlingOptions {
    /// Below this many requests in the window, nothing is ever rejected.
    pub minimum_requests: u64,
    /// The multiple of accepted requests the client is allowed to issue
    /// before rejection probability starts growing.
    pub minimum_ratio: f64,
    /// The upper bound on rejection probability, keeping a trickle of real
    /// probes flowing even during a full outage.
    pub rejection_probability_cap: f64,
}

impl Default for AdaptiveThrottlingOptions {
    fn default() -> Self {
        Self {
            minimum_requests: 30,
            minimum_ratio: 2.0,
            rejection_probability_cap: 0.8,
        }
    }
}

const BUCKET_LENGTH: Duration = Duration::from_secs(10);
const BUCKET_COUNT: usize = 12;

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    index: u64,
    requests: u64,
    accepts: u64,
}

#[derive(Debug, Default)]
struct Window {
    buckets: VecDeque<Bucket>,
}

impl Window {
    fn bucket_mut(&mut self, index: u64) -> &mut Bucket {
        if self.buckets.back().is_none_or(|bucket| bucket.index < index) {
            self.buckets.push_back(Bucket {
                index,
                ..Bucket::default()
            });
        }
        while self.buckets.len() > BUCKET_COUNT {
            self.buckets.pop_front();
        }
        self.buckets.back_mut().expect("a bucket was just ensured")
    }

    fn totals(&self, oldest: u64) -> (u64, u64) {
        self.buckets
            .iter()
            .filter(|bucket| bucket.index >= oldest)
            .fold((0, 0), |(requests, accepts), bucket| {
                (requests + bucket.requests, accepts + bucket.accepts)
            })
    }
}

/// The throttling engine: windowed counters plus the rejection draw.
#[derive(Debug)]
pub(crate) struct AdaptiveThrottling {
    options: AdaptiveThrottlingOptions,
    rnd: Rnd,
    window: Mutex<Window>,
    epoch: crate::time::Stopwatch,
}

impl AdaptiveThrottling {
    pub fn new(options: AdaptiveThrottlingOptions, clock: &Clock) -> Self {
        Self {
            options,
            epoch: clock.stopwatch(),
            rnd: Rnd::Real,
            window: Mutex::new(Window::default()),
        }
    }

    #[cfg(test)]
    fn with_rnd(mut self, rnd: Rnd) -> Self {
        self.rnd = rnd;
        self
    }

    fn current_bucket(&self) -> u64 {
        (self.epoch.elapsed().as_secs()) / BUCKET_LENGTH.as_secs()
    }

    fn oldest_bucket(&self) -> u64 {
        self.current_bucket().saturating_sub(BUCKET_COUNT as u64 - 1)
    }

    fn register_request(&self) {
        let index = self.current_bucket();
        self.window.lock().bucket_mut(index).requests += 1;
    }

    fn register_accept(&self) {
        let index = self.current_bucket();
        self.window.lock().bucket_mut(index).accepts += 1;
    }

    fn rejection_probability(&self) -> f64 {
        let (requests, accepts) = self.window.lock().totals(self.oldest_bucket());
        if requests < self.options.minimum_requests {
            return 0.0;
        }

        let excess = requests as f64 - self.options.minimum_ratio * accepts as f64;
        let probability = excess / (requests as f64 + 1.0);
        probability.clamp(0.0, self.options.rejection_probability_cap)
    }

    fn should_reject(&self) -> bool {
        let probability = self.rejection_probability();
        probability > 0.0 && self.rnd.next_f64() < probability
    }
}

/// The pipeline module wrapping the throttling engine.
pub(crate) struct AdaptiveThrottlingModule {
    engine: AdaptiveThrottling,
}

impl AdaptiveThrottlingModule {
    pub fn new(options: AdaptiveThrottlingOptions, clock: &Clock) -> Self {
        Self {
            engine: AdaptiveThrottling::new(options, clock),
        }
    }
}

impl RequestModule for AdaptiveThrottlingModule {
    fn execute<'a>(&'a self, context: &'a mut RequestContext, next: PipelineNext<'a>) -> BoxFuture<'a, ClusterResult> {
        Box::pin(async move {
            self.engine.register_request();

            if self.engine.should_reject() {
                tracing::event!(
                    name: "flotilla.throttled",
                    tracing::Level::WARN,
                    url = %context.request().uri(),
                    probability = self.engine.rejection_probability(),
                );
                return context.complete(ClusterStatus::Throttled);
            }

            let result = next.proceed(context).await;
            if result.is_successful() {
                self.engine.register_accept();
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::time::ClockControl;

    use super::*;

    fn engine(control: &ClockControl, options: AdaptiveThrottlingOptions) -> AdaptiveThrottling {
        AdaptiveThrottling::new(options, &control.to_clock())
    }

    #[test]
    fn quiet_clients_are_never_rejected() {
        let control = ClockControl::new();
        let throttling = engine(&control, AdaptiveThrottlingOptions::default());

        for _ in 0..10 {
            throttling.register_request();
        }
        assert_eq!(throttling.rejection_probability(), 0.0);
    }

    #[test]
    fn rejection_grows_when_accepts_stop() {
        let control = ClockControl::new();
        let throttling = engine(&control, AdaptiveThrottlingOptions::default());

        for _ in 0..100 {
            throttling.register_request();
        }

        let probability = throttling.rejection_probability();
        assert!(probability > 0.7, "probability was {probability}");
        assert!(probability <= 0.8, "cap was exceeded: {probability}");
    }

    #[test]
    fn healthy_traffic_is_not_rejected() {
        let control = ClockControl::new();
        let throttling = engine(&control, AdaptiveThrottlingOptions::default());

        for _ in 0..100 {
            throttling.register_request();
            throttling.register_accept();
        }
        assert_eq!(throttling.rejection_probability(), 0.0);
    }

    #[test]
    fn old_buckets_age_out_of_the_window() {
        let control = ClockControl::new();
        let throttling = engine(&control, AdaptiveThrottlingOptions::default());

        for _ in 0..100 {
            throttling.register_request();
        }
        assert!(throttling.rejection_probability() > 0.0);

        // Two minutes later the outage is forgotten.
        control.advance(Duration::from_secs(125));
        throttling.register_request();
        assert_eq!(throttling.rejection_probability(), 0.0);
    }

    #[test]
    fn draw_respects_probability() {
        let control = ClockControl::new();
        let throttling =
            engine(&control, AdaptiveThrottlingOptions::default()).with_rnd(Rnd::new_fixed(0.95));

        for _ in 0..100 {
            throttling.register_request();
        }

        // A draw above the cap never rejects; a low draw does.
        assert!(!throttling.should_reject());

        let eager = engine(&control, AdaptiveThrottlingOptions::default()).with_rnd(Rnd::new_fixed(0.05));
        for _ in 0..100 {
            eager.register_request();
        }
        assert!(eager.should_reject());
    }
}
