// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::model::{Replica, ReplicaResult, ResponseClass, TransportVerdict, Verdict};
use crate::ordering::weights::{Weight, WeightContext, WeightModifier};
use crate::storage::ReplicaStorageContainer;
use crate::time::Clock;

const HEALTH_NAMESPACE: &str = "adaptive-health";

/// What a tuning policy wants done to a replica's health after one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// Raise health towards 1.
    Increase,
    /// Lower health towards the floor.
    Decrease,
    /// Leave health unchanged.
    DontTouch,
}

/// Decides how an attempt outcome should adjust replica health.
pub trait HealthTuningPolicy: Send + Sync + fmt::Debug {
    /// Chooses the adjustment for one completed attempt.
    fn select(&self, result: &ReplicaResult) -> HealthAction;
}

/// Tunes by the verdict already computed for the result: accepted responses
/// heal, rejected ones damage, abstentions leave health alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerdictTuningPolicy;

impl HealthTuningPolicy for VerdictTuningPolicy {
    fn select(&self, result: &ReplicaResult) -> HealthAction {
        match result.verdict() {
            Verdict::Accept => HealthAction::Increase,
            Verdict::Reject => HealthAction::Decrease,
            Verdict::DontKnow => HealthAction::DontTouch,
        }
    }
}

/// Tunes by transport-level network failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkErrorTuningPolicy;

impl HealthTuningPolicy for NetworkErrorTuningPolicy {
    fn select(&self, result: &ReplicaResult) -> HealthAction {
        let response = result.response();
        let network_failure = response.class() == ResponseClass::NetworkFailure
            || !matches!(
                response.verdict(),
                TransportVerdict::Success | TransportVerdict::Canceled
            );
        if network_failure {
            HealthAction::Decrease
        } else {
            HealthAction::Increase
        }
    }
}

/// Tunes by attempt timeouts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutTuningPolicy;

impl HealthTuningPolicy for TimeoutTuningPolicy {
    fn select(&self, result: &ReplicaResult) -> HealthAction {
        if result.response().verdict() == TransportVerdict::Timeout {
            HealthAction::Decrease
        } else {
            HealthAction::Increase
        }
    }
}

/// Reduces a list of voters: any `Decrease` wins, else any `Increase`, else
/// `DontTouch`.
#[derive(Debug, Clone, Default)]
pub struct CompositeTuningPolicy {
    voters: Vec<Arc<dyn HealthTuningPolicy>>,
}

impl CompositeTuningPolicy {
    /// Creates a composite over the given voters.
    #[must_use]
    pub fn new(voters: Vec<Arc<dyn HealthTuningPolicy>>) -> Self {
        Self { voters }
    }
}

impl HealthTuningPolicy for CompositeTuningPolicy {
    fn select(&self, result: &ReplicaResult) -> HealthAction {
        let mut action = HealthAction::DontTouch;
        for voter in &self.voters {
            match voter.select(result) {
                HealthAction::Decrease => return HealthAction::Decrease,
                HealthAction::Increase => action = HealthAction::Increase,
                HealthAction::DontTouch => {}
            }
        }
        action
    }
}

/// The numeric behaviour of a health representation.
pub trait HealthImplementation: Send + Sync + fmt::Debug {
    /// The stored health value.
    type Health: Clone + PartialEq + Send + Sync + fmt::Debug + 'static;

    /// The health of a replica nobody has learned about yet.
    fn create_default(&self) -> Self::Health;

    /// A healthier value; never exceeds 1.
    fn increase(&self, health: &Self::Health) -> Self::Health;

    /// A strictly less healthy value; never drops below the floor.
    fn decrease(&self, health: &Self::Health) -> Self::Health;

    /// Multiplies the weight by the replica's effective health.
    fn apply(&self, health: &Self::Health, weight: &mut Weight);
}

/// Multiplicative scalar health in `[floor, 1]`.
#[derive(Debug, Clone)]
pub struct ScalarHealth {
    up: f64,
    down: f64,
    floor: f64,
}

impl ScalarHealth {
    /// Creates a scalar implementation.
    ///
    /// # Errors
    ///
    /// Returns an error unless `up > 1`, `0 < down < 1` and `0 < floor < 1`.
    pub fn new(up: f64, down: f64, floor: f64) -> Result<Self> {
        validate_multipliers(up, down, floor)?;
        Ok(Self { up, down, floor })
    }
}

impl Default for ScalarHealth {
    fn default() -> Self {
        Self {
            up: 1.5,
            down: 0.5,
            floor: 0.001,
        }
    }
}

impl HealthImplementation for ScalarHealth {
    type Health = f64;

    fn create_default(&self) -> f64 {
        1.0
    }

    fn increase(&self, health: &f64) -> f64 {
        (health * self.up).min(1.0)
    }

    fn decrease(&self, health: &f64) -> f64 {
        (health * self.down).max(self.floor)
    }

    fn apply(&self, health: &f64, weight: &mut Weight) {
        *weight *= health;
    }
}

/// Health paired with the instant of its last decrease.
///
/// Between decreases, the damage linearly decays to nothing over the
/// configured duration, so a replica that stops failing regains its full
/// weight without any traffic reaching it.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthWithDecay {
    /// The raw health value in `[floor, 1]`.
    pub value: f64,
    /// When the value last decreased.
    pub pivot: Instant,
}

/// Scalar health whose damage linearly decays over time.
#[derive(Debug, Clone)]
pub struct DecayingHealth {
    scalar: ScalarHealth,
    decay_duration: Duration,
    clock: Clock,
}

impl DecayingHealth {
    /// Creates a decaying implementation over the given clock.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid multipliers or a zero decay duration.
    pub fn new(up: f64, down: f64, floor: f64, decay_duration: Duration, clock: Clock) -> Result<Self> {
        if decay_duration.is_zero() {
            return Err(Error::configuration("health decay duration must be positive"));
        }
        Ok(Self {
            scalar: ScalarHealth::new(up, down, floor)?,
            decay_duration,
            clock,
        })
    }
}

impl HealthImplementation for DecayingHealth {
    type Health = HealthWithDecay;

    fn create_default(&self) -> HealthWithDecay {
        HealthWithDecay {
            value: 1.0,
            pivot: self.clock.instant(),
        }
    }

    fn increase(&self, health: &HealthWithDecay) -> HealthWithDecay {
        HealthWithDecay {
            value: self.scalar.increase(&health.value),
            pivot: health.pivot,
        }
    }

    fn decrease(&self, health: &HealthWithDecay) -> HealthWithDecay {
        HealthWithDecay {
            value: self.scalar.decrease(&health.value),
            pivot: self.clock.instant(),
        }
    }

    fn apply(&self, health: &HealthWithDecay, weight: &mut Weight) {
        let damage = 1.0 - health.value;
        if damage <= 0.0 {
            return;
        }

        let since_pivot = self.clock.instant().saturating_duration_since(health.pivot);
        let fraction = (since_pivot.as_secs_f64() / self.decay_duration.as_secs_f64()).clamp(0.0, 1.0);
        let effective = health.value + damage * fraction;
        *weight *= effective;
    }
}

fn validate_multipliers(up: f64, down: f64, floor: f64) -> Result<()> {
    if !(up > 1.0 && up.is_finite()) {
        return Err(Error::configuration("health up multiplier must be greater than 1"));
    }
    if !(down > 0.0 && down < 1.0) {
        return Err(Error::configuration("health down multiplier must be in (0, 1)"));
    }
    if !(floor > 0.0 && floor < 1.0) {
        return Err(Error::configuration("health floor must be in (0, 1)"));
    }
    Ok(())
}

/// A weight modifier that learns per-replica health from observed outcomes.
///
/// On `learn`, the stored health is updated through a compare-and-set loop:
/// contention re-reads and re-decides until an update lands or the decision
/// becomes [`HealthAction::DontTouch`].
#[derive(Debug)]
pub struct AdaptiveHealthModifier<I: HealthImplementation> {
    implementation: I,
    policy: Arc<dyn HealthTuningPolicy>,
}

impl AdaptiveHealthModifier<ScalarHealth> {
    /// Scalar health with default multipliers, tuned by response verdicts.
    #[must_use]
    pub fn scalar() -> Self {
        Self::new(ScalarHealth::default(), Arc::new(VerdictTuningPolicy))
    }
}

impl AdaptiveHealthModifier<DecayingHealth> {
    /// Linearly decaying health tuned by response verdicts.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero decay duration.
    pub fn with_linear_decay(clock: Clock, decay_duration: Duration) -> Result<Self> {
        let scalar = ScalarHealth::default();
        let implementation = DecayingHealth::new(scalar.up, scalar.down, scalar.floor, decay_duration, clock)?;
        Ok(Self::new(implementation, Arc::new(VerdictTuningPolicy)))
    }
}

impl<I: HealthImplementation> AdaptiveHealthModifier<I> {
    /// Creates a modifier over an implementation and a tuning policy.
    #[must_use]
    pub fn new(implementation: I, policy: Arc<dyn HealthTuningPolicy>) -> Self {
        Self { implementation, policy }
    }

    fn current_health(&self, storage: &ReplicaStorageContainer, replica: &Replica) -> I::Health {
        storage
            .obtain::<I::Health>(HEALTH_NAMESPACE)
            .get_or_add(replica, || self.implementation.create_default())
    }
}

impl<I: HealthImplementation> WeightModifier for AdaptiveHealthModifier<I> {
    fn modify(&self, replica: &Replica, context: &WeightContext<'_>, weight: &mut Weight) {
        let health = self.current_health(context.storage, replica);
        self.implementation.apply(&health, weight);
    }

    fn learn(&self, result: &ReplicaResult, storage: &ReplicaStorageContainer) {
        let action = self.policy.select(result);
        if action == HealthAction::DontTouch {
            return;
        }

        let map = storage.obtain::<I::Health>(HEALTH_NAMESPACE);
        loop {
            let current = map.get_or_add(result.replica(), || self.implementation.create_default());
            let updated = match action {
                HealthAction::Increase => self.implementation.increase(&current),
                HealthAction::Decrease => self.implementation.decrease(&current),
                HealthAction::DontTouch => return,
            };

            if updated == current {
                return;
            }

            if map.try_update(result.replica(), updated.clone(), &current) {
                tracing::event!(
                    name: "flotilla.health_adjusted",
                    tracing::Level::DEBUG,
                    replica = %result.replica(),
                    action = ?action,
                    health = ?updated,
                );
                return;
            }
            // Lost the race; re-read and decide again.
        }
    }
}
