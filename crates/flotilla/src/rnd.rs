// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;

/// Non-cryptographic random number generator used in this crate.
///
/// This RNG is **NOT cryptographically secure** and should only be used for
/// non-security-critical purposes such as weighted replica selection, jitter,
/// and throttling draws.
///
/// The seeded variant produces a reproducible sequence, which is how
/// deterministic ordering tests inject randomness through the public API.
#[derive(Clone, Default)]
pub(crate) enum Rnd {
    #[default]
    Real,

    Seeded(Arc<Mutex<fastrand::Rng>>),

    #[cfg(test)]
    Test(Arc<dyn Fn() -> f64 + Send + Sync>),
}

impl Debug for Rnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "Real"),
            Self::Seeded(_) => write!(f, "Seeded"),
            #[cfg(test)]
            Self::Test(_) => write!(f, "Test"),
        }
    }
}

impl Rnd {
    pub fn seeded(seed: u64) -> Self {
        Self::Seeded(Arc::new(Mutex::new(fastrand::Rng::with_seed(seed))))
    }

    #[cfg(test)]
    pub fn new_fixed(value: f64) -> Self {
        Self::Test(Arc::new(move || value))
    }

    #[cfg(test)]
    pub fn new_function<F>(f: F) -> Self
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        Self::Test(Arc::new(f))
    }

    /// Returns a uniformly distributed value in `[0, 1)`.
    pub fn next_f64(&self) -> f64 {
        match self {
            Self::Real => fastrand::f64(),
            Self::Seeded(rng) => rng.lock().f64(),
            #[cfg(test)]
            Self::Test(generator) => generator(),
        }
    }

    /// Returns a uniformly distributed index in `[0, upper)`.
    ///
    /// `upper` must be non-zero.
    pub fn index(&self, upper: usize) -> usize {
        match self {
            Self::Real => fastrand::usize(..upper),
            Self::Seeded(rng) => rng.lock().usize(..upper),
            #[cfg(test)]
            Self::Test(generator) => {
                let scaled = generator() * upper as f64;
                (scaled as usize).min(upper - 1)
            }
        }
    }
}
