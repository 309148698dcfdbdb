//! Replica sizing and hysteresis.
//!
//! Scaling up is cheap to undo and reacts within one cycle. Scaling down
//! kills pods that may be about to receive work, so it needs a run of
//! consecutive idle observations plus a long quiet period since the last
//! action of any kind.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AutoscalerError;

pub const DEFAULT_MIN_REPLICAS: u32 = 1;
pub const DEFAULT_MAX_REPLICAS: u32 = 3;
pub const DEFAULT_TARGET_JOBS_PER_POD: u32 = 1;
pub const DEFAULT_SCALE_UP_COOLDOWN: Duration = Duration::from_secs(120);
pub const DEFAULT_SCALE_DOWN_COOLDOWN: Duration = Duration::from_secs(1800);
pub const DEFAULT_SCALE_DOWN_GRACE_PERIOD: Duration = Duration::from_secs(3600);
pub const DEFAULT_SCALE_DOWN_OBSERVATIONS: u32 = 5;

/// Direction of a replica change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    Up,
    Down,
}

impl ScaleDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            ScaleDirection::Up => "up",
            ScaleDirection::Down => "down",
        }
    }
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounds, targets and hysteresis windows.
#[derive(Debug, Clone, Serialize)]
pub struct ScalingPolicy {
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Jobs one pod is expected to absorb.
    pub target_jobs_per_pod: u32,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
    pub scale_down_grace_period: Duration,
    /// Consecutive idle cycles required before a scale-down.
    pub scale_down_observations: u32,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_replicas: DEFAULT_MIN_REPLICAS,
            max_replicas: DEFAULT_MAX_REPLICAS,
            target_jobs_per_pod: DEFAULT_TARGET_JOBS_PER_POD,
            scale_up_cooldown: DEFAULT_SCALE_UP_COOLDOWN,
            scale_down_cooldown: DEFAULT_SCALE_DOWN_COOLDOWN,
            scale_down_grace_period: DEFAULT_SCALE_DOWN_GRACE_PERIOD,
            scale_down_observations: DEFAULT_SCALE_DOWN_OBSERVATIONS,
        }
    }
}

impl ScalingPolicy {
    pub fn validate(&self) -> Result<(), AutoscalerError> {
        if self.min_replicas > self.max_replicas {
            return Err(AutoscalerError::InvalidBounds {
                min: self.min_replicas,
                max: self.max_replicas,
            });
        }
        if self.target_jobs_per_pod == 0 {
            return Err(AutoscalerError::ZeroTarget);
        }
        Ok(())
    }

    /// Replica count the current load calls for.
    ///
    /// The load-derived count is capped at `max_replicas`, but the result never
    /// drops below the number of actively processing jobs: a pod running a job
    /// is never scaled away, even if that exceeds the maximum.
    pub fn desired_replicas(&self, waiting: u32, processing: u32) -> u32 {
        let total = waiting.saturating_add(processing);
        let by_load = total.div_ceil(self.target_jobs_per_pod.max(1));
        let floor = self.min_replicas.max(processing);

        by_load.min(self.max_replicas).max(floor)
    }
}

/// Outcome of one autoscaling cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingDecision {
    pub waiting_job_count: u32,
    pub processing_job_count: u32,
    pub current_replicas: u32,
    pub desired_replicas: u32,
    /// Action to take, if any.
    pub action: Option<ScaleDirection>,
    pub consecutive_scale_down_observations: u32,
}

/// Hysteresis memory carried across cycles.
///
/// Lives in the process only; a new leader starts from scratch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalingState {
    pub last_scale_time: Option<DateTime<Utc>>,
    pub last_scale_action: Option<ScaleDirection>,
    pub consecutive_scale_down_observations: u32,
}

impl ScalingState {
    pub fn new() -> Self {
        Self::default()
    }

    fn since_last_scale(&self, now: DateTime<Utc>) -> Option<Duration> {
        // None means no action yet, which counts as infinitely long ago.
        self.last_scale_time
            .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO))
    }

    fn elapsed_exceeds(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.since_last_scale(now)
            .map_or(true, |elapsed| elapsed > window)
    }

    /// Evaluates one observation and updates the idle counter.
    ///
    /// The returned action is a proposal; call [`ScalingState::record_scale`]
    /// once the orchestrator has accepted it.
    pub fn decide(
        &mut self,
        policy: &ScalingPolicy,
        waiting: u32,
        processing: u32,
        current: u32,
        now: DateTime<Utc>,
    ) -> ScalingDecision {
        let desired = policy.desired_replicas(waiting, processing);

        let action = if desired > current {
            self.consecutive_scale_down_observations = 0;
            let cooling = self.last_scale_action == Some(ScaleDirection::Up)
                && !self.elapsed_exceeds(now, policy.scale_up_cooldown);
            (!cooling).then_some(ScaleDirection::Up)
        } else if desired < current && processing == 0 {
            self.consecutive_scale_down_observations += 1;
            let ready = self.consecutive_scale_down_observations >= policy.scale_down_observations
                && self.elapsed_exceeds(now, policy.scale_down_cooldown)
                && self.elapsed_exceeds(now, policy.scale_down_grace_period);
            ready.then_some(ScaleDirection::Down)
        } else {
            self.consecutive_scale_down_observations = 0;
            None
        };

        ScalingDecision {
            waiting_job_count: waiting,
            processing_job_count: processing,
            current_replicas: current,
            desired_replicas: desired,
            action,
            consecutive_scale_down_observations: self.consecutive_scale_down_observations,
        }
    }

    /// Records an accepted scale action.
    pub fn record_scale(&mut self, direction: ScaleDirection, now: DateTime<Utc>) {
        self.last_scale_time = Some(now);
        self.last_scale_action = Some(direction);
        self.consecutive_scale_down_observations = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("valid timestamp")
    }

    fn policy(min: u32, max: u32, target: u32) -> ScalingPolicy {
        ScalingPolicy {
            min_replicas: min,
            max_replicas: max,
            target_jobs_per_pod: target,
            ..Default::default()
        }
    }

    #[test]
    fn test_desired_replicas() {
        assert_eq!(policy(1, 5, 3).desired_replicas(7, 2), 3);
        assert_eq!(policy(1, 3, 1).desired_replicas(0, 0), 1);
        assert_eq!(policy(0, 3, 1).desired_replicas(0, 0), 0);
        assert_eq!(policy(1, 3, 1).desired_replicas(10, 0), 3);
        assert_eq!(policy(1, 3, 2).desired_replicas(3, 0), 2);
    }

    #[test]
    fn test_processing_floor_exceeds_max() {
        assert_eq!(policy(1, 3, 1).desired_replicas(0, 5), 5);
        assert_eq!(policy(1, 3, 1).desired_replicas(4, 4), 4);
    }

    #[test]
    fn test_validate() {
        assert!(ScalingPolicy::default().validate().is_ok());
        assert!(matches!(
            policy(4, 3, 1).validate(),
            Err(AutoscalerError::InvalidBounds { min: 4, max: 3 })
        ));
        assert!(matches!(
            policy(1, 3, 0).validate(),
            Err(AutoscalerError::ZeroTarget)
        ));
    }

    #[test]
    fn test_scale_up_is_immediate() {
        let mut state = ScalingState::new();
        let decision = state.decide(&policy(1, 3, 1), 2, 0, 1, at(1000));
        assert_eq!(decision.desired_replicas, 2);
        assert_eq!(decision.action, Some(ScaleDirection::Up));
    }

    #[test]
    fn test_scale_up_cooldown() {
        let policy = policy(1, 3, 1);
        let mut state = ScalingState::new();
        state.record_scale(ScaleDirection::Up, at(1000));

        assert_eq!(state.decide(&policy, 3, 0, 2, at(1060)).action, None);
        assert_eq!(
            state.decide(&policy, 3, 0, 2, at(1121)).action,
            Some(ScaleDirection::Up)
        );
    }

    #[test]
    fn test_scale_up_ignores_recent_scale_down() {
        let mut state = ScalingState::new();
        state.record_scale(ScaleDirection::Down, at(1000));
        let decision = state.decide(&policy(1, 3, 1), 3, 0, 1, at(1010));
        assert_eq!(decision.action, Some(ScaleDirection::Up));
    }

    #[test]
    fn test_scale_down_needs_consecutive_observations() {
        let policy = policy(1, 3, 1);
        let mut state = ScalingState::new();

        for cycle in 1..5 {
            let decision = state.decide(&policy, 0, 0, 3, at(cycle * 60));
            assert_eq!(decision.action, None);
            assert_eq!(decision.consecutive_scale_down_observations, cycle as u32);
        }

        let decision = state.decide(&policy, 0, 0, 3, at(300));
        assert_eq!(decision.desired_replicas, 1);
        assert_eq!(decision.action, Some(ScaleDirection::Down));
    }

    #[test]
    fn test_busy_cycle_resets_observations() {
        let policy = policy(1, 3, 1);
        let mut state = ScalingState::new();

        for cycle in 0..4 {
            state.decide(&policy, 0, 0, 3, at(cycle * 60));
        }
        assert_eq!(state.consecutive_scale_down_observations, 4);

        // One processing job keeps desired below current but vetoes the drop.
        let decision = state.decide(&policy, 0, 1, 3, at(240));
        assert_eq!(decision.action, None);
        assert_eq!(state.consecutive_scale_down_observations, 0);

        state.decide(&policy, 0, 0, 3, at(300));
        assert_eq!(state.consecutive_scale_down_observations, 1);
    }

    #[test]
    fn test_steady_state_resets_observations() {
        let policy = policy(1, 3, 1);
        let mut state = ScalingState::new();
        state.decide(&policy, 0, 0, 3, at(0));
        state.decide(&policy, 0, 0, 3, at(60));

        let decision = state.decide(&policy, 3, 0, 3, at(120));
        assert_eq!(decision.action, None);
        assert_eq!(decision.consecutive_scale_down_observations, 0);
    }

    #[test]
    fn test_scale_down_waits_for_grace_period() {
        let policy = policy(1, 3, 1);
        let mut state = ScalingState::new();
        state.record_scale(ScaleDirection::Up, at(0));

        // Plenty of idle observations, but only 40 minutes since the last scale.
        for minute in 1..=40 {
            let decision = state.decide(&policy, 0, 0, 3, at(minute * 60));
            assert_eq!(decision.action, None);
        }
        assert!(state.consecutive_scale_down_observations >= 5);

        let decision = state.decide(&policy, 0, 0, 3, at(3601));
        assert_eq!(decision.action, Some(ScaleDirection::Down));
    }

    #[test]
    fn test_record_scale_resets_counter() {
        let mut state = ScalingState::new();
        state.consecutive_scale_down_observations = 7;
        state.record_scale(ScaleDirection::Down, at(10));

        assert_eq!(state.consecutive_scale_down_observations, 0);
        assert_eq!(state.last_scale_action, Some(ScaleDirection::Down));
        assert_eq!(state.last_scale_time, Some(at(10)));
    }
}
