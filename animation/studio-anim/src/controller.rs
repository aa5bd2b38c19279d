//! Bone controllers and pose parameters
//!
//! Both map a ranged game value (degrees, units) to a normalized 0..1
//! setting and back. Rotational controllers additionally wrap their input
//! around the controller range before clamping.

use glam::Vec3;
use log::warn;

use crate::asset::{BoneController, ControllerKind, MOUTH_CONTROLLER, PoseParamDesc};
use crate::math::{angle_quaternion, quaternion_sm};
use crate::pose::Pose;
use crate::setup::BoneSetup;

/// Wrap and clamp `value` into `[start, end]`
///
/// Returns the clamped ranged value and its 0..1 encoding. Rotational
/// ranges wrap by 360 degrees first, and ranges authored with
/// `end < start` are handled by negating the input and the result.
pub fn wrap_controller(value: f32, start: f32, end: f32, rotational: bool) -> (f32, f32) {
    let mut value = value;

    if rotational {
        if end < start {
            value = -value;
        }

        if start + 359.0 >= end {
            let mid = (start + end) / 2.0;
            if value > mid + 180.0 {
                value -= 360.0;
            }
            if value < mid - 180.0 {
                value += 360.0;
            }
        } else if value > 360.0 {
            value -= (value / 360.0).trunc() * 360.0;
        } else if value < 0.0 {
            value += ((value / -360.0) + 1.0).trunc() * 360.0;
        }
    }

    let ratio = ((value - start) / (end - start)).clamp(0.0, 1.0);
    let mut clamped = (1.0 - ratio) * start + ratio * end;
    if rotational && end < start {
        clamped = -clamped;
    }

    (clamped, ratio)
}

/// Wrap a looping pose parameter value into its period
fn wrap_pose_param(param: &PoseParamDesc, value: f32) -> f32 {
    if param.loop_range == 0.0 {
        return value;
    }
    let wrap = (param.start + param.end) / 2.0 + param.loop_range / 2.0;
    let shift = param.loop_range - wrap;
    value - param.loop_range * ((value + shift) / param.loop_range).floor()
}

/// Byte-encoded controller value mapped into the controller range
fn byte_controller_value(controller: &BoneController, controllers: &[u8], mouth: u8) -> f32 {
    let ratio = if controller.index == MOUTH_CONTROLLER {
        (f32::from(mouth) / 64.0).clamp(0.0, 1.0)
    } else {
        let raw = controllers.get(controller.index).copied().unwrap_or(0);
        (f32::from(raw) / 255.0).clamp(0.0, 1.0)
    };
    (1.0 - ratio) * controller.start + ratio * controller.end
}

impl BoneSetup {
    fn find_controller(&self, index: usize) -> Option<&BoneController> {
        self.asset.controllers().iter().find(|c| c.index == index)
    }

    /// Encode a ranged value for logical controller slot `index`
    ///
    /// Returns the clamped ranged value and its 0..1 encoding. An unknown
    /// slot returns the input unchanged with an encoding of 0.
    pub fn set_controller(&self, index: usize, value: f32) -> (f32, f32) {
        match self.find_controller(index) {
            Some(controller) => wrap_controller(
                value,
                controller.start,
                controller.end,
                controller.kind.is_rotational(),
            ),
            None => (value, 0.0),
        }
    }

    /// Decode a 0..1 encoding for logical controller slot `index`
    pub fn get_controller(&self, index: usize, ratio: f32) -> f32 {
        self.find_controller(index)
            .map_or(0.0, |c| ratio * (c.end - c.start) + c.start)
    }

    /// Encode a ranged value for pose parameter `index`
    ///
    /// Returns the clamped ranged value and its 0..1 encoding; an unknown
    /// parameter returns zeros.
    pub fn set_pose_parameter(&self, index: usize, value: f32) -> (f32, f32) {
        let Some(param) = self.asset.pose_param(index) else {
            return (0.0, 0.0);
        };
        let value = wrap_pose_param(param, value);
        let ratio = ((value - param.start) / (param.end - param.start)).clamp(0.0, 1.0);
        (ratio * (param.end - param.start) + param.start, ratio)
    }

    /// Decode a 0..1 encoding for pose parameter `index`
    pub fn get_pose_parameter(&self, index: usize, ratio: f32) -> f32 {
        self.asset
            .pose_param(index)
            .map_or(0.0, |p| ratio * (p.end - p.start) + p.start)
    }

    /// Default normalized value of every pose parameter
    pub fn calc_default_pose_parameters(&self) -> Vec<f32> {
        self.asset
            .pose_params()
            .iter()
            .map(PoseParamDesc::default_value)
            .collect()
    }

    /// Apply byte-encoded controllers directly to `pose`
    ///
    /// Rotational controllers pre-multiply the bone orientation, linear
    /// ones offset its position.
    pub fn apply_bone_controllers(&self, pose: &mut Pose, controllers: &[u8], mouth: u8) {
        for controller in self.asset.controllers() {
            let bone = controller.bone;
            if bone >= pose.len() || !self.is_bone_used(bone) {
                continue;
            }

            let value = byte_controller_value(controller, controllers, mouth);
            if controller.kind.is_rotational() {
                let mut angles = Vec3::ZERO;
                angles[controller.kind.axis()] = value.to_radians();
                pose.q[bone] = quaternion_sm(1.0, angle_quaternion(angles), pose.q[bone]);
            } else {
                pose.pos[bone][controller.kind.axis()] += value;
            }
        }
    }

    /// Per-controller channel offsets for byte-encoded controllers
    ///
    /// Angles come back in radians, ready for
    /// [`BoneSetup::install_bone_controllers`].
    pub fn calc_bone_adj(&self, controllers: &[u8], mouth: u8) -> Vec<f32> {
        self.asset
            .controllers()
            .iter()
            .map(|controller| {
                if !self.is_bone_used(controller.bone) {
                    return 0.0;
                }
                let value = byte_controller_value(controller, controllers, mouth);
                match controller.kind {
                    ControllerKind::XRotation | ControllerKind::YRotation | ControllerKind::ZRotation => {
                        value.to_radians()
                    }
                    ControllerKind::X | ControllerKind::Y | ControllerKind::Z => value,
                }
            })
            .collect()
    }

    /// Compute and install byte-encoded controllers for the next evaluation
    pub fn set_byte_controllers(&mut self, controllers: &[u8], mouth: u8) {
        if controllers.len() < self.asset.controllers().len() {
            warn!(
                "{} controller bytes supplied for {} controllers",
                controllers.len(),
                self.asset.controllers().len()
            );
        }
        let offsets = self.calc_bone_adj(controllers, mouth);
        self.install_bone_controllers(offsets);
    }
}
