//! Queue-driven replica autoscaling.
//!
//! Every worker pod runs a [`FleetAutoscaler`] next to its scheduler. The
//! oldest pod of the deployment is the leader and the only one that resizes
//! the deployment; the rest observe nothing and sleep.
//!
//! ```text
//! desired = max(min_replicas, processing, min(max_replicas, ceil((waiting + processing) / target)))
//! ```
//!
//! Scale-ups apply at once, subject to a short cooldown after the previous
//! scale-up. Scale-downs need several consecutive idle cycles and a long
//! quiet period since the last action.

pub mod policy;
pub mod scaler;

pub use policy::{ScaleDirection, ScalingDecision, ScalingPolicy, ScalingState};
pub use scaler::{namespace_load, AutoscalerConfig, FleetAutoscaler, FleetLoad};
