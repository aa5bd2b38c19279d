//! Persistent IK targets
//!
//! A target is a slot that ground and attachment rules resolve into. It
//! carries the estimated foot pose for the current frame plus a latch: once
//! a rule asks for a fully latched foot, the foot pose is committed and
//! held across frames until the rule lets go, the latch goes stale, or the
//! chain is flagged in error and released.

use glam::{Affine3A, Quat, Vec3};

use crate::asset::IkRuleType;
use crate::math::{angles_to_quat, bone_matrix, matrix_from_columns, matrix_origin, matrix_quaternion};

/// Committed foot pose with the offset from the ideal pose it was held at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatchedPose {
    pub pos: Vec3,
    pub q: Quat,
    /// Latched minus ideal position at the last full latch
    pub delta_pos: Vec3,
    /// Rotation from the ideal to the latched orientation
    pub delta_q: Quat,
}

impl LatchedPose {
    /// Fresh commit with no offset
    pub fn new(pos: Vec3, q: Quat) -> Self {
        Self {
            pos,
            q,
            delta_pos: Vec3::ZERO,
            delta_q: Quat::IDENTITY,
        }
    }

    /// Reset the offsets, keeping the pose
    pub fn clear_deltas(&mut self) {
        self.delta_pos = Vec3::ZERO;
        self.delta_q = Quat::IDENTITY;
    }
}

/// Latch state of a target
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum LatchState {
    /// No pose is held
    #[default]
    Unlatched,
    /// A pose will be committed at the end of this frame
    Latching,
    /// A pose is held at full strength
    Latched(LatchedPose),
    /// A held pose is fading out
    Releasing { ramp: f32, held: LatchedPose },
}

impl LatchState {
    /// Held pose, if any
    pub fn held(&self) -> Option<&LatchedPose> {
        match self {
            Self::Latched(held) | Self::Releasing { held, .. } => Some(held),
            Self::Unlatched | Self::Latching => None,
        }
    }

    /// Mutable held pose, if any
    pub fn held_mut(&mut self) -> Option<&mut LatchedPose> {
        match self {
            Self::Latched(held) | Self::Releasing { held, .. } => Some(held),
            Self::Unlatched | Self::Latching => None,
        }
    }

    /// Strength of the held pose
    pub fn influence(&self) -> f32 {
        match self {
            Self::Latched(_) => 1.0,
            Self::Releasing { ramp, .. } => *ramp,
            Self::Unlatched | Self::Latching => 0.0,
        }
    }

    /// Whether the end of the frame commits the estimate
    pub fn needs_commit(&self) -> bool {
        matches!(self, Self::Latching | Self::Latched(_))
    }
}

/// Offset between the foot bone and the point the rules aim at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetOffset {
    pub attachment: usize,
    pub pos: Vec3,
    pub q: Quat,
}

impl Default for TargetOffset {
    fn default() -> Self {
        Self {
            attachment: 0,
            pos: Vec3::ZERO,
            q: Quat::IDENTITY,
        }
    }
}

/// Per-frame estimate of where the foot pad should be
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetEstimate {
    pub pos: Vec3,
    pub q: Quat,
    pub latched: f32,
    pub release: f32,
    pub height: f32,
    pub floor: f32,
    pub radius: f32,
    /// Blend weight of the target, 0 when inactive
    pub weight: f32,
    /// Set by callers once the estimate has been traced against the world
    pub on_world: bool,
}

impl Default for TargetEstimate {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            q: Quat::IDENTITY,
            latched: 1.0,
            release: 1.0,
            height: 0.0,
            floor: 0.0,
            radius: 0.0,
            weight: 0.0,
            on_world: false,
        }
    }
}

/// Geometry for callers tracing the foot against the world
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TargetTrace {
    pub hip_to_foot: f32,
    pub hip_to_knee: f32,
    pub knee_to_foot: f32,
    pub hip: Vec3,
    pub knee: Vec3,
    /// Closest reachable foot position along the hip to foot line
    pub closest: Vec3,
    /// Farthest reachable foot position along the hip to foot line
    pub farthest: Vec3,
    /// Lowest reachable foot position straight below the hip
    pub lowest: Vec3,
}

/// Error tracking for the automatic release
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TargetError {
    /// Last time the target was found in error
    pub time: f32,
    /// Time the release ramp was last advanced
    pub ramp_time: f32,
    pub ramp: f32,
    pub in_error: bool,
}

impl Default for TargetError {
    fn default() -> Self {
        Self {
            time: f32::NEG_INFINITY,
            ramp_time: 0.0,
            ramp: 0.0,
            in_error: false,
        }
    }
}

/// One IK target slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IkTarget {
    pub(crate) chain: Option<usize>,
    pub(crate) kind: IkRuleType,
    pub(crate) offset: TargetOffset,
    /// Foot pad pose straight from the animation
    pub(crate) ideal: (Vec3, Quat),
    pub(crate) est: TargetEstimate,
    pub(crate) trace: TargetTrace,
    pub(crate) latch: LatchState,
    pub(crate) latch_frame: i32,
    pub(crate) owner: Option<usize>,
    pub(crate) abs_origin: Vec3,
    pub(crate) abs_angles: Vec3,
    pub(crate) error: TargetError,
}

impl IkTarget {
    /// Chain the target drives
    pub fn chain(&self) -> Option<usize> {
        self.chain
    }

    /// Rule type that last resolved into the target
    pub fn kind(&self) -> IkRuleType {
        self.kind
    }

    /// Foot to pad offset
    pub fn offset(&self) -> &TargetOffset {
        &self.offset
    }

    /// Animated foot pad pose
    pub fn ideal(&self) -> (Vec3, Quat) {
        self.ideal
    }

    /// Current estimate
    pub fn estimate(&self) -> &TargetEstimate {
        &self.est
    }

    /// Mutable estimate, for callers adjusting it after a world trace
    pub fn estimate_mut(&mut self) -> &mut TargetEstimate {
        &mut self.est
    }

    /// Trace geometry from the last update
    pub fn trace(&self) -> &TargetTrace {
        &self.trace
    }

    /// Latch state
    pub fn latch(&self) -> &LatchState {
        &self.latch
    }

    /// Whether the target is currently being released for an error
    pub fn in_error(&self) -> bool {
        self.error.in_error
    }

    /// Flag the target as unreachable at `time`
    pub fn report_error(&mut self, time: f32) {
        self.error.time = time;
    }

    /// Entity the target is expressed relative to
    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    /// Express the target relative to `owner` placed at `pos`/`angles`
    pub fn set_owner(&mut self, owner: usize, pos: Vec3, angles: Vec3) {
        self.owner = Some(owner);
        self.abs_origin = pos;
        self.abs_angles = angles;
    }

    /// Detach the target from its owner
    pub fn clear_owner(&mut self) {
        self.owner = None;
    }

    /// Move the owner, carrying any held pose with it
    pub fn update_owner(&mut self, owner: usize, pos: Vec3, angles: Vec3) {
        if pos == self.abs_origin && angles == self.abs_angles {
            return;
        }

        let old = bone_matrix(self.abs_origin, angles_to_quat(self.abs_angles));
        let new = bone_matrix(pos, angles_to_quat(angles));
        let adjust = new * old.inverse();

        if let Some(held) = self.latch.held_mut() {
            let m = adjust * bone_matrix(held.pos, held.q);
            held.pos = matrix_origin(&m);
            held.q = matrix_quaternion(&m);
        }

        self.set_owner(owner, pos, angles);
    }

    pub fn set_pos(&mut self, pos: Vec3) {
        self.est.pos = pos;
    }

    /// Set the estimate orientation from pitch/yaw/roll degrees
    pub fn set_angles(&mut self, angles: Vec3) {
        self.est.q = angles_to_quat(angles);
    }

    pub fn set_quaternion(&mut self, q: Quat) {
        self.est.q = q;
    }

    /// Tilt the estimate so its up axis follows the ground normal `normal`
    pub fn set_normal(&mut self, normal: Vec3) {
        let m = bone_matrix(Vec3::ZERO, self.est.q);
        let right = Vec3::from(m.matrix3.y_axis);

        let forward = right.cross(normal).normalize_or_zero();
        let right = normal.cross(forward).normalize_or_zero();
        if forward == Vec3::ZERO || right == Vec3::ZERO {
            return;
        }

        let m = matrix_from_columns(forward, right, normal, Vec3::ZERO);
        self.est.q = matrix_quaternion(&m);
    }

    /// Place the estimate at `pos`, lowered so the edge of the foot pad
    /// rests on ground with normal `normal`
    ///
    /// Slopes steeper than 45 degrees lower the pad by its full radius.
    pub fn set_pos_with_normal_offset(&mut self, pos: Vec3, normal: Vec3) {
        self.est.pos = pos;
        if normal.z > 0.9999 {
            return;
        }
        if normal.z > 0.707 {
            self.est.pos.z -= self.est.radius * (1.0 - normal.z * normal.z).sqrt() / normal.z;
        } else {
            self.est.pos.z -= self.est.radius;
        }
    }

    pub fn set_on_world(&mut self, on_world: bool) {
        self.est.on_world = on_world;
    }

    /// Whether any rule resolved into the target this frame
    pub fn is_active(&self) -> bool {
        self.est.weight > 0.0
    }

    /// Give up on the target after a failed world trace
    pub fn ik_failed(&mut self) {
        let (pos, q) = self.ideal;
        if let Some(held) = self.latch.held_mut() {
            held.pos = pos;
            held.q = q;
            held.clear_deltas();
        }
        self.est.latched = 0.0;
        self.est.weight = 0.0;
        self.est.on_world = false;
    }

    /// Shift every stored position by `-delta`
    pub fn move_reference_frame(&mut self, delta: Vec3) {
        self.est.pos -= delta;
        self.offset.pos -= delta;
        self.ideal.0 -= delta;
        if let Some(held) = self.latch.held_mut() {
            held.pos -= delta;
        }
    }

    /// Matrix of the estimate combined with the pad offset
    pub(crate) fn foot_world(&self) -> Affine3A {
        bone_matrix(self.est.pos, self.est.q) * bone_matrix(self.offset.pos, self.offset.q)
    }

    /// Reset the per-frame estimate before rules resolve into it
    pub(crate) fn begin_frame(&mut self) {
        self.est = TargetEstimate {
            on_world: self.est.on_world,
            ..TargetEstimate::default()
        };
        self.offset.pos = Vec3::ZERO;
        self.offset.q = Quat::IDENTITY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn latched_target(pos: Vec3) -> IkTarget {
        IkTarget {
            latch: LatchState::Latched(LatchedPose::new(pos, Quat::IDENTITY)),
            ..Default::default()
        }
    }

    #[test]
    fn test_latch_state_queries() {
        let held = LatchedPose::new(Vec3::X, Quat::IDENTITY);
        assert_eq!(LatchState::Unlatched.influence(), 0.0);
        assert_eq!(LatchState::Latched(held).influence(), 1.0);
        assert_eq!(LatchState::Releasing { ramp: 0.4, held }.influence(), 0.4);
        assert!(LatchState::Latching.needs_commit());
        assert!(!LatchState::Releasing { ramp: 0.4, held }.needs_commit());
        assert!(LatchState::Latching.held().is_none());
    }

    #[test]
    fn test_move_reference_frame() {
        let mut target = latched_target(Vec3::new(5.0, 0.0, 0.0));
        target.set_pos(Vec3::new(1.0, 1.0, 1.0));
        target.move_reference_frame(Vec3::new(1.0, 0.0, 0.0));

        assert_eq!(target.estimate().pos, Vec3::new(0.0, 1.0, 1.0));
        assert_eq!(target.latch().held().unwrap().pos, Vec3::new(4.0, 0.0, 0.0));
        assert_eq!(target.offset().pos, Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_update_owner_carries_latch() {
        let mut target = latched_target(Vec3::new(1.0, 0.0, 0.0));
        target.set_owner(7, Vec3::ZERO, Vec3::ZERO);
        target.update_owner(7, Vec3::new(0.0, 0.0, 2.0), Vec3::new(0.0, 90.0, 0.0));

        let held = target.latch().held().unwrap();
        assert!((held.pos - Vec3::new(0.0, 1.0, 2.0)).length() < 1e-5);
        assert_eq!(target.owner(), Some(7));

        target.clear_owner();
        assert_eq!(target.owner(), None);
    }

    #[test]
    fn test_set_normal_follows_slope() {
        let mut target = IkTarget::default();
        let normal = Vec3::new(0.0, -1.0, 1.0).normalize();
        target.set_normal(normal);
        let up = target.estimate().q * Vec3::Z;
        assert!((up - normal).length() < 1e-5);
    }

    #[test]
    fn test_normal_offset() {
        let mut target = IkTarget::default();
        target.estimate_mut().radius = 2.0;

        target.set_pos_with_normal_offset(Vec3::ZERO, Vec3::Z);
        assert_eq!(target.estimate().pos, Vec3::ZERO);

        let slope = Vec3::new(0.6, 0.0, 0.8);
        target.set_pos_with_normal_offset(Vec3::ZERO, slope);
        assert!((target.estimate().pos.z + 2.0 * 0.6 / 0.8).abs() < 1e-5);

        target.set_pos_with_normal_offset(Vec3::ZERO, Vec3::new(0.8, 0.0, 0.6));
        assert!((target.estimate().pos.z + 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_ik_failed_resets_latch() {
        let mut target = latched_target(Vec3::new(3.0, 0.0, 0.0));
        target.ideal = (Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);
        target.est.weight = 1.0;
        target.set_on_world(true);
        assert!(target.is_active());

        target.ik_failed();
        assert!(!target.is_active());
        assert!(!target.estimate().on_world);
        assert_eq!(target.latch().held().unwrap().pos, Vec3::new(1.0, 0.0, 0.0));
    }
}
