use bitflags::bitflags;
use glam::{Quat, Vec3};

/// Rule computing a bone from another bone's resolved transform
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum ProceduralRule {
    /// Blend six authored poses by the octant of a control axis
    AxisInterp(AxisInterp),
    /// Blend authored poses by proximity to trigger orientations
    QuatInterp(QuatInterp),
    /// Aim at another bone's origin
    AimAtBone(AimAt),
    /// Aim at an attachment point
    AimAtAttachment(AimAt),
}

/// Axis-driven interpolation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct AxisInterp {
    /// Control bone
    pub control: usize,
    /// Control axis (0 = x, 1 = y, 2 = z)
    pub axis: usize,
    /// Positions for the +x/-x, +y/-y, +z/-z octants
    pub pos: [Vec3; 6],
    /// Orientations for the +x/-x, +y/-y, +z/-z octants
    pub quat: [Quat; 6],
}

/// One trigger of a [`QuatInterp`] rule
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct QuatTrigger {
    /// Inverse of the angular tolerance, in 1/radians
    pub inv_tolerance: f32,
    /// Control orientation that fully activates this trigger
    pub trigger: Quat,
    /// Resulting local position
    pub pos: Vec3,
    /// Resulting local orientation
    pub quat: Quat,
}

/// Trigger-driven interpolation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct QuatInterp {
    /// Control bone
    pub control: usize,
    /// Triggers
    pub triggers: Vec<QuatTrigger>,
}

/// Aim constraint
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct AimAt {
    /// Bone providing the reference frame
    pub parent: usize,
    /// Target bone or attachment index
    pub aim: usize,
    /// Aim vector in bone space
    pub aim_vector: Vec3,
    /// Up vector in bone space
    pub up_vector: Vec3,
    /// Bone origin in `parent` space
    pub base_pos: Vec3,
}

bitflags! {
    /// Jiggle bone simulation modes
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
    pub struct JiggleFlags: u32 {
        /// Tip springs toward the goal
        const FLEXIBLE = 0x01;
        /// Tip follows the goal rigidly, constraints still apply
        const RIGID = 0x02;
        /// Limit yaw
        const YAW_CONSTRAINT = 0x04;
        /// Limit pitch
        const PITCH_CONSTRAINT = 0x08;
        /// Limit the angle between the tip and the goal
        const ANGLE_CONSTRAINT = 0x10;
        /// Keep the tip at a fixed distance from the base
        const LENGTH_CONSTRAINT = 0x20;
        /// Base springs toward the goal
        const BASE_SPRING = 0x40;
        /// Squash and stretch on impact
        const BOING = 0x80;
    }
}

/// Jiggle bone parameters
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct JiggleParams {
    pub flags: JiggleFlags,

    pub length: f32,
    pub tip_mass: f32,

    pub yaw_stiffness: f32,
    pub yaw_damping: f32,
    pub pitch_stiffness: f32,
    pub pitch_damping: f32,
    pub along_stiffness: f32,
    pub along_damping: f32,

    /// Radians
    pub angle_limit: f32,

    pub min_yaw: f32,
    pub max_yaw: f32,
    pub yaw_friction: f32,
    pub yaw_bounce: f32,

    pub min_pitch: f32,
    pub max_pitch: f32,
    pub pitch_friction: f32,
    pub pitch_bounce: f32,

    pub base_mass: f32,
    pub base_stiffness: f32,
    pub base_damping: f32,
    pub base_min_left: f32,
    pub base_max_left: f32,
    pub base_left_friction: f32,
    pub base_min_up: f32,
    pub base_max_up: f32,
    pub base_up_friction: f32,
    pub base_min_forward: f32,
    pub base_max_forward: f32,
    pub base_forward_friction: f32,

    pub boing_impact_speed: f32,
    /// Cosine of the direction change that counts as an impact
    pub boing_impact_angle: f32,
    pub boing_damping_rate: f32,
    pub boing_frequency: f32,
    pub boing_amplitude: f32,
}

impl JiggleParams {
    /// Flexible tip of the given length
    pub fn flexible(length: f32, stiffness: f32, damping: f32) -> Self {
        Self {
            flags: JiggleFlags::FLEXIBLE,
            length,
            yaw_stiffness: stiffness,
            yaw_damping: damping,
            pitch_stiffness: stiffness,
            pitch_damping: damping,
            along_stiffness: stiffness,
            along_damping: damping,
            ..Default::default()
        }
    }

    /// Spring-driven base
    pub fn base_spring(mass: f32, stiffness: f32, damping: f32, extent: f32) -> Self {
        Self {
            flags: JiggleFlags::BASE_SPRING,
            base_mass: mass,
            base_stiffness: stiffness,
            base_damping: damping,
            base_min_left: -extent,
            base_max_left: extent,
            base_min_up: -extent,
            base_max_up: extent,
            base_min_forward: -extent,
            base_max_forward: extent,
            ..Default::default()
        }
    }

    /// Impact squash and stretch
    pub fn boing(impact_speed: f32, frequency: f32, amplitude: f32, damping_rate: f32) -> Self {
        Self {
            flags: JiggleFlags::BOING,
            boing_impact_speed: impact_speed,
            boing_impact_angle: 0.5,
            boing_damping_rate: damping_rate,
            boing_frequency: frequency,
            boing_amplitude: amplitude,
            ..Default::default()
        }
    }

    /// Add flags
    pub fn with_flags(mut self, flags: JiggleFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Set the tip mass
    pub fn with_tip_mass(mut self, mass: f32) -> Self {
        self.tip_mass = mass;
        self
    }

    /// Constrain the tip angle, in radians
    pub fn with_angle_limit(mut self, radians: f32) -> Self {
        self.angle_limit = radians;
        self.flags |= JiggleFlags::ANGLE_CONSTRAINT;
        self
    }

    /// Constrain yaw to `[min, max]` radians
    pub fn with_yaw_limits(mut self, min: f32, max: f32, friction: f32, bounce: f32) -> Self {
        self.min_yaw = min;
        self.max_yaw = max;
        self.yaw_friction = friction;
        self.yaw_bounce = bounce;
        self.flags |= JiggleFlags::YAW_CONSTRAINT;
        self
    }

    /// Constrain pitch to `[min, max]` radians
    pub fn with_pitch_limits(mut self, min: f32, max: f32, friction: f32, bounce: f32) -> Self {
        self.min_pitch = min;
        self.max_pitch = max;
        self.pitch_friction = friction;
        self.pitch_bounce = bounce;
        self.flags |= JiggleFlags::PITCH_CONSTRAINT;
        self
    }

    /// Whether the tip is simulated
    pub fn has_tip_flex(&self) -> bool {
        self.flags
            .intersects(JiggleFlags::FLEXIBLE | JiggleFlags::RIGID)
    }
}
