//! Inverse kinematics for hip/knee/foot chains
//!
//! - [`solver`]: analytic two-bone solve and chain helpers
//! - [`rule`]: per-frame IK rules merged from authored animation rules
//! - [`target`]: persistent foot targets with latching
//! - [`context`]: the per-instance driver tying the above together

pub mod context;
pub mod rule;
pub mod solver;
pub mod target;

pub use context::IkContext;
pub use rule::{IkContextRule, anim_rule_weight, ik_anim_error, window_weight};
pub use solver::{solve_chain, solve_ik_no_knee, solve_ik_with_knee, solve_two_bone};
pub use target::{
    IkTarget, LatchState, LatchedPose, TargetEstimate, TargetOffset, TargetTrace,
};
