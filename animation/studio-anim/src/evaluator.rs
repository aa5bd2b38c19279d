//! Per-bone decoding of a single sub-animation
//!
//! Each bone carries three position and three Euler angle channels. A
//! sample at `frame + s` decodes both bracketing frames when `s` is large
//! enough to matter and blends them, adds the bone's rest value unless the
//! animation is additive, and applies any installed bone controller
//! offsets before converting the angles to a quaternion.

use glam::{Quat, Vec3};
use log::warn;

use crate::anim_value::AnimValueStream;
use crate::asset::{AnimFlags, BoneChannels, BoneDef, BoneFlags, IkErrorTrack};
use crate::math::{angle_quaternion, quaternion_align, quaternion_blend};
use crate::pose::Pose;
use crate::setup::BoneSetup;

/// Subframe fraction below which a single frame is decoded
const INTERPOLATION_THRESHOLD: f32 = 0.001;

/// Subframe fraction below which a single frame of an IK error track is decoded
const IK_ERROR_THRESHOLD: f32 = 0.0001;

/// Bracketing samples of one channel
fn channel_pair(
    stream: Option<&AnimValueStream>,
    frame: usize,
    s: f32,
    threshold: f32,
    scale: f32,
) -> (f32, f32) {
    match stream {
        Some(stream) if s > threshold => stream.extract_value_pair(frame, scale),
        Some(stream) => {
            let v = stream.extract_value(frame, scale);
            (v, v)
        }
        None => (0.0, 0.0),
    }
}

fn controller_offset(controllers: Option<&[f32]>, controller: Option<usize>) -> f32 {
    match (controllers, controller) {
        (Some(values), Some(index)) => values.get(index).copied().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Local orientation of `bone` at `frame + s`
///
/// # Arguments
///
/// * `channels` - The bone's channels, `None` when the animation carries no data
/// * `controllers` - Installed per-controller offsets (radians for angles)
/// * `has_bone_info` - Whether the asset carries alignment quaternions
pub fn calc_bone_quaternion(
    frame: usize,
    s: f32,
    bone: &BoneDef,
    channels: Option<&BoneChannels>,
    flags: AnimFlags,
    controllers: Option<&[f32]>,
    has_bone_info: bool,
) -> Quat {
    let delta = flags.contains(AnimFlags::DELTA);
    let mut angle1 = Vec3::ZERO;
    let mut angle2 = Vec3::ZERO;

    for j in 0..3 {
        let stream = channels.and_then(|c| c.stream(j + 3));
        let (mut a1, mut a2) =
            channel_pair(stream, frame, s, INTERPOLATION_THRESHOLD, bone.channel_scale[j + 3]);

        if !delta {
            a1 += bone.rest_angles[j];
            a2 += bone.rest_angles[j];
        }

        let adj = controller_offset(controllers, bone.controllers[j + 3]);
        angle1[j] = a1 + adj;
        angle2[j] = a2 + adj;
    }

    let q = if angle1 == angle2 {
        angle_quaternion(angle1)
    } else {
        quaternion_blend(angle_quaternion(angle1), angle_quaternion(angle2), s)
    };

    if !delta && has_bone_info && bone.flags.contains(BoneFlags::FIXED_ALIGNMENT) {
        quaternion_align(bone.alignment, q)
    } else {
        q
    }
}

/// Local position of `bone` at `frame + s`
pub fn calc_bone_position(
    frame: usize,
    s: f32,
    bone: &BoneDef,
    channels: Option<&BoneChannels>,
    flags: AnimFlags,
    controllers: Option<&[f32]>,
) -> Vec3 {
    let delta = flags.contains(AnimFlags::DELTA);
    let mut pos = Vec3::ZERO;

    for j in 0..3 {
        let stream = channels.and_then(|c| c.stream(j));
        let (v1, v2) = channel_pair(stream, frame, s, INTERPOLATION_THRESHOLD, bone.channel_scale[j]);

        let mut value = v1 * (1.0 - s) + v2 * s;
        if !delta {
            value += bone.rest_pos[j];
        }
        pos[j] = value + controller_offset(controllers, bone.controllers[j]);
    }

    pos
}

/// Decode an IK error track at `frame + s`
///
/// Error tracks carry their own scale, no rest value and no controllers.
pub fn calc_ik_error(track: &IkErrorTrack, frame: usize, s: f32) -> (Vec3, Quat) {
    let mut pos = Vec3::ZERO;
    let mut angle1 = Vec3::ZERO;
    let mut angle2 = Vec3::ZERO;

    for j in 0..3 {
        let (v1, v2) = channel_pair(track.channels.stream(j), frame, s, IK_ERROR_THRESHOLD, track.scale[j]);
        pos[j] = v1 * (1.0 - s) + v2 * s;

        let (a1, a2) = channel_pair(
            track.channels.stream(j + 3),
            frame,
            s,
            IK_ERROR_THRESHOLD,
            track.scale[j + 3],
        );
        angle1[j] = a1;
        angle2[j] = a2;
    }

    let q = if angle1 == angle2 {
        angle_quaternion(angle1)
    } else {
        quaternion_blend(angle_quaternion(angle1), angle_quaternion(angle2), s)
    };

    (pos, q)
}

impl BoneSetup {
    /// Fill `pose` with the bind pose
    pub fn init_pose(&self, pose: &mut Pose) {
        let has_bone_info = self.asset.has_bone_info();
        for (i, bone) in self.asset.bones().iter().enumerate().take(pose.len()) {
            pose.q[i] = if has_bone_info {
                bone.rest_quat
            } else {
                angle_quaternion(bone.rest_angles)
            };
            pose.pos[i] = bone.rest_pos;
        }
    }

    /// Decode sub-animation `anim` of sequence `seq` at `cycle` into `pose`
    ///
    /// Bones with a non-positive sequence weight or outside the bone mask
    /// are left untouched. An out-of-range animation falls back to the
    /// first one.
    pub fn calc_animation(
        &self,
        pose: &mut Pose,
        seq: usize,
        anim: usize,
        cycle: f32,
        controllers: Option<&[f32]>,
    ) {
        let asset = &self.asset;
        let anim_desc = match asset.anim(anim) {
            Some(desc) => desc,
            None => {
                warn!("Animation {} out of range, using the first animation", anim);
                match asset.anim(0) {
                    Some(desc) => desc,
                    None => return,
                }
            }
        };
        let seq_desc = asset.sequence(seq);
        let has_bone_info = asset.has_bone_info();

        let frame = (cycle * anim_desc.frame_count.saturating_sub(1) as f32).max(0.0);
        let iframe = frame as usize;
        let s = frame - iframe as f32;

        for (i, bone) in asset.bones().iter().enumerate().take(pose.len()) {
            if self.bone_weight(seq_desc, i) <= 0.0 || !bone.is_used(self.bone_mask) {
                continue;
            }

            let channels = anim_desc.bone_channels(i);
            pose.q[i] = calc_bone_quaternion(
                iframe,
                s,
                bone,
                channels,
                anim_desc.flags,
                controllers,
                has_bone_info,
            );
            pose.pos[i] = calc_bone_position(iframe, s, bone, channels, anim_desc.flags, controllers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anim_value::AnimValueStream;
    use std::f32::consts::FRAC_PI_2;

    fn yaw_channels(frames: &[i16]) -> BoneChannels {
        BoneChannels::default().with_angle(2, AnimValueStream::from_frames(frames))
    }

    #[test]
    fn test_rest_pose_without_channels() {
        let bone = BoneDef::new("b", None, Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.0, 0.0, FRAC_PI_2));
        let q = calc_bone_quaternion(0, 0.0, &bone, None, AnimFlags::empty(), None, true);
        let pos = calc_bone_position(0, 0.0, &bone, None, AnimFlags::empty(), None);
        assert!(q.dot(bone.rest_quat).abs() > 0.9999);
        assert!((pos - bone.rest_pos).length() < 1e-6);
    }

    #[test]
    fn test_delta_skips_rest() {
        let bone = BoneDef::new("b", None, Vec3::ONE, Vec3::new(0.0, 0.0, FRAC_PI_2));
        let q = calc_bone_quaternion(0, 0.0, &bone, None, AnimFlags::DELTA, None, true);
        let pos = calc_bone_position(0, 0.0, &bone, None, AnimFlags::DELTA, None);
        assert!(q.dot(Quat::IDENTITY).abs() > 0.9999);
        assert_eq!(pos, Vec3::ZERO);
    }

    #[test]
    fn test_interpolates_between_frames() {
        let bone = BoneDef::new("b", None, Vec3::ZERO, Vec3::ZERO)
            .with_channel_scale([1.0, 1.0, 1.0, 0.0, 0.0, FRAC_PI_2 / 100.0]);
        let channels = yaw_channels(&[0, 100]);
        let q = calc_bone_quaternion(0, 0.5, &bone, Some(&channels), AnimFlags::empty(), None, true);
        let expected = angle_quaternion(Vec3::new(0.0, 0.0, FRAC_PI_2 * 0.5));
        assert!(q.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn test_controller_offsets() {
        let bone = BoneDef::new("b", None, Vec3::ZERO, Vec3::ZERO)
            .with_controller(0, 1)
            .with_controller(5, 0);
        let offsets = [FRAC_PI_2, 4.0];
        let pos = calc_bone_position(0, 0.0, &bone, None, AnimFlags::empty(), Some(&offsets));
        assert!((pos.x - 4.0).abs() < 1e-6);

        let q = calc_bone_quaternion(0, 0.0, &bone, None, AnimFlags::empty(), Some(&offsets), true);
        let expected = angle_quaternion(Vec3::new(0.0, 0.0, FRAC_PI_2));
        assert!(q.dot(expected).abs() > 0.9999);
    }

    #[test]
    fn test_fixed_alignment() {
        let bone = BoneDef::new("b", None, Vec3::ZERO, Vec3::ZERO).with_alignment(-Quat::IDENTITY);
        let q = calc_bone_quaternion(0, 0.0, &bone, None, AnimFlags::empty(), None, true);
        assert!((q.w + 1.0).abs() < 1e-6);

        let q = calc_bone_quaternion(0, 0.0, &bone, None, AnimFlags::empty(), None, false);
        assert!((q.w - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ik_error_uses_track_scale() {
        let track = IkErrorTrack {
            scale: [0.5, 0.0, 0.0, 0.0, 0.0, 0.0],
            channels: BoneChannels::default().with_position(0, AnimValueStream::from_frames(&[10, 20])),
        };
        let (pos, q) = calc_ik_error(&track, 0, 0.5);
        assert!((pos.x - 7.5).abs() < 1e-6);
        assert!(q.dot(Quat::IDENTITY).abs() > 0.9999);
    }
}
