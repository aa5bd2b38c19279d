use bitflags::bitflags;
use glam::{Quat, Vec3};

use super::procedural::{JiggleParams, ProceduralRule};
use crate::math::angle_quaternion;

bitflags! {
    /// Per-bone flags
    ///
    /// The `USED_BY_*` bits double as the bone mask accepted by
    /// [`crate::BoneSetup::set_bone_mask`].
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
    pub struct BoneFlags: u32 {
        /// Bone is computed by a procedural rule instead of animation data
        const ALWAYS_PROCEDURAL = 0x0004;
        /// Bone drives a hitbox
        const USED_BY_HITBOX = 0x0100;
        /// Bone carries an attachment
        const USED_BY_ATTACHMENT = 0x0200;
        /// Bone deforms vertices
        const USED_BY_VERTEX = 0x0400;
        /// Bone is merged onto a parent model
        const USED_BY_BONE_MERGE = 0x0004_0000;
        /// Bone blends against its alignment quaternion
        const FIXED_ALIGNMENT = 0x0010_0000;
        /// Bone is driven by the jiggle simulator
        const JIGGLE = 0x0020_0000;

        /// All bone mask bits
        const USED_BY_ANYTHING = Self::USED_BY_HITBOX.bits()
            | Self::USED_BY_ATTACHMENT.bits()
            | Self::USED_BY_VERTEX.bits()
            | Self::USED_BY_BONE_MERGE.bits();
    }
}

/// A single skeleton bone
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneDef {
    /// Bone name
    pub name: String,
    /// Parent bone, always lower than this bone's index
    pub parent: Option<usize>,
    /// Rest position in parent space
    pub rest_pos: Vec3,
    /// Rest orientation as roll/pitch/yaw radians
    pub rest_angles: Vec3,
    /// Rest orientation from extended bone info
    pub rest_quat: Quat,
    /// Decoder scale for the x/y/z position and x/y/z angle channels
    pub channel_scale: [f32; 6],
    /// Controller driving each of the six channels
    pub controllers: [Option<usize>; 6],
    /// Bone flags
    pub flags: BoneFlags,
    /// Alignment quaternion for [`BoneFlags::FIXED_ALIGNMENT`] bones
    pub alignment: Quat,
    /// Procedural rule, used with [`BoneFlags::ALWAYS_PROCEDURAL`]
    pub procedural: Option<ProceduralRule>,
    /// Spring parameters, used with [`BoneFlags::JIGGLE`]
    pub jiggle: Option<JiggleParams>,
}

impl BoneDef {
    /// Create a bone at the given rest position and orientation
    pub fn new<S: Into<String>>(
        name: S,
        parent: Option<usize>,
        rest_pos: Vec3,
        rest_angles: Vec3,
    ) -> Self {
        Self {
            name: name.into(),
            parent,
            rest_pos,
            rest_angles,
            rest_quat: angle_quaternion(rest_angles),
            channel_scale: [1.0; 6],
            controllers: [None; 6],
            flags: BoneFlags::USED_BY_VERTEX,
            alignment: Quat::IDENTITY,
            procedural: None,
            jiggle: None,
        }
    }

    /// Replace the bone flags
    pub fn with_flags(mut self, flags: BoneFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the decoder scale for all six channels
    pub fn with_channel_scale(mut self, scale: [f32; 6]) -> Self {
        self.channel_scale = scale;
        self
    }

    /// Bind `controller` to channel `channel` (0..3 position, 3..6 angles)
    pub fn with_controller(mut self, channel: usize, controller: usize) -> Self {
        if let Some(slot) = self.controllers.get_mut(channel) {
            *slot = Some(controller);
        }
        self
    }

    /// Set the alignment quaternion and mark the bone fixed-alignment
    pub fn with_alignment(mut self, alignment: Quat) -> Self {
        self.alignment = alignment;
        self.flags |= BoneFlags::FIXED_ALIGNMENT;
        self
    }

    /// Attach a procedural rule and mark the bone always-procedural
    pub fn with_procedural(mut self, rule: ProceduralRule) -> Self {
        self.procedural = Some(rule);
        self.flags |= BoneFlags::ALWAYS_PROCEDURAL;
        self
    }

    /// Attach jiggle parameters and mark the bone as a jiggle bone
    pub fn with_jiggle(mut self, params: JiggleParams) -> Self {
        self.jiggle = Some(params);
        self.flags |= BoneFlags::JIGGLE;
        self
    }

    /// Whether the bone is active under `mask` (an empty mask keeps every bone)
    pub fn is_used(&self, mask: BoneFlags) -> bool {
        mask.is_empty() || self.flags.intersects(mask)
    }
}

/// Channel a bone controller drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum ControllerKind {
    /// Translation along X
    X,
    /// Translation along Y
    Y,
    /// Translation along Z
    Z,
    /// Rotation around X, in degrees
    XRotation,
    /// Rotation around Y, in degrees
    YRotation,
    /// Rotation around Z, in degrees
    ZRotation,
}

impl ControllerKind {
    /// Whether the controller range is an angle in degrees
    pub fn is_rotational(self) -> bool {
        matches!(self, Self::XRotation | Self::YRotation | Self::ZRotation)
    }

    /// Index of the driven axis (0 = x, 1 = y, 2 = z)
    pub fn axis(self) -> usize {
        match self {
            Self::X | Self::XRotation => 0,
            Self::Y | Self::YRotation => 1,
            Self::Z | Self::ZRotation => 2,
        }
    }
}

/// Logical controller slot fed by the mouth value rather than a byte setting
pub const MOUTH_CONTROLLER: usize = 4;

/// A bone controller
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneController {
    /// Driven bone
    pub bone: usize,
    /// Logical controller slot
    pub index: usize,
    /// Driven channel
    pub kind: ControllerKind,
    /// Range start
    pub start: f32,
    /// Range end
    pub end: f32,
}

impl BoneController {
    /// Create a controller on `bone` for logical slot `index`
    pub fn new(bone: usize, index: usize, kind: ControllerKind, start: f32, end: f32) -> Self {
        Self {
            bone,
            index,
            kind,
            start,
            end,
        }
    }
}

/// A named point rigidly attached to a bone
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct Attachment {
    /// Attachment name
    pub name: String,
    /// Owning bone
    pub bone: usize,
    /// Offset in bone space
    pub origin: Vec3,
}

impl Attachment {
    /// Create an attachment on `bone`
    pub fn new<S: Into<String>>(name: S, bone: usize, origin: Vec3) -> Self {
        Self {
            name: name.into(),
            bone,
            origin,
        }
    }
}

/// A named scalar driving sequence blends
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct PoseParamDesc {
    /// Parameter name
    pub name: String,
    /// Value mapped to 0
    pub start: f32,
    /// Value mapped to 1
    pub end: f32,
    /// Wrap period, 0 for a non-looping parameter
    pub loop_range: f32,
}

impl PoseParamDesc {
    /// Create a non-looping parameter
    pub fn new<S: Into<String>>(name: S, start: f32, end: f32) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            loop_range: 0.0,
        }
    }

    /// Make the parameter wrap with the given period
    pub fn with_loop(mut self, loop_range: f32) -> Self {
        self.loop_range = loop_range;
        self
    }

    /// Default normalized value: the position of 0 inside a range that
    /// straddles it, else the midpoint
    pub fn default_value(&self) -> f32 {
        if self.start < 0.0 && self.end > 0.0 {
            -self.start / (self.end - self.start)
        } else {
            0.5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bone_mask() {
        let bone = BoneDef::new("pelvis", None, Vec3::ZERO, Vec3::ZERO)
            .with_flags(BoneFlags::USED_BY_HITBOX);
        assert!(bone.is_used(BoneFlags::empty()));
        assert!(bone.is_used(BoneFlags::USED_BY_ANYTHING));
        assert!(!bone.is_used(BoneFlags::USED_BY_VERTEX));
    }

    #[test]
    fn test_controller_binding() {
        let bone = BoneDef::new("head", Some(0), Vec3::ZERO, Vec3::ZERO)
            .with_controller(5, 2)
            .with_controller(9, 1);
        assert_eq!(bone.controllers[5], Some(2));
        assert!(bone.controllers[..5].iter().all(Option::is_none));
    }

    #[test]
    fn test_pose_param_default() {
        let yaw = PoseParamDesc::new("body_yaw", -45.0, 45.0);
        assert!((yaw.default_value() - 0.5).abs() < 1e-6);

        let pitch = PoseParamDesc::new("body_pitch", -30.0, 90.0);
        assert!((pitch.default_value() - 0.25).abs() < 1e-6);

        let speed = PoseParamDesc::new("move_speed", 0.0, 300.0);
        assert!((speed.default_value() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_controller_kind() {
        assert!(ControllerKind::ZRotation.is_rotational());
        assert!(!ControllerKind::Y.is_rotational());
        assert_eq!(ControllerKind::YRotation.axis(), 1);
    }
}
