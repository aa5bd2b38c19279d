//! Sequence blending
//!
//! A sequence is a 1D or 2D grid of sub-animations. The two blend axes are
//! resolved from pose parameters into a grid cell and a fraction along
//! each axis; the cell's corner animations are then decoded and blended.
//! Older sequences without [`SequenceFlags::BLEND_POSE`] read the first two
//! pose parameters directly and use fixed 2-, 4- and 9-way layouts.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut pose = Pose::new(asset.bone_count());
//! setup.set_pose_parameters(&[0.25, 0.5]);
//! setup.calc_pose_single(&mut pose, run_seq, 0.4);
//!
//! let duration = setup.local_duration(run_seq);
//! ```

use std::sync::Arc;

use glam::Affine3A;
use log::warn;

use crate::asset::{AnimDesc, BoneFlags, SequenceDef, SequenceFlags};
use crate::math::{
    bone_matrix, matrix_origin, matrix_quaternion, quaternion_blend, quaternion_blend_no_align,
    quaternion_ma, quaternion_slerp, quaternion_slerp_no_align, quaternion_sm,
};
use crate::pose::{BoneTransforms, Pose};
use crate::setup::BoneSetup;

/// Blend fraction below which an axis snaps to its lower corner
const AXIS_SNAP_LOW: f32 = 0.001;
/// Blend fraction above which an axis snaps to its upper corner
const AXIS_SNAP_HIGH: f32 = 0.999;

/// Three animations and weights covering one triangle of a grid cell
///
/// The cell `(i0, i1)` is split along one diagonal, chosen so that
/// neighbouring cells alternate. `weights[1]` is snapped to zero when the
/// point lies on the diagonal.
pub fn calc_9way_blend_indices(
    seq: &SequenceDef,
    i0: usize,
    i1: usize,
    s0: f32,
    s1: f32,
) -> ([usize; 3], [f32; 3]) {
    let even = (i0 + i1) % 2 == 0;

    let (corners, w0, w1) = if even {
        if s0 > s1 {
            ([(0, 0), (1, 0), (1, 1)], 1.0 - s0, s0 - s1)
        } else {
            ([(1, 1), (0, 1), (0, 0)], s0, s1 - s0)
        }
    } else if s0 + s1 > 1.0 {
        ([(1, 0), (1, 1), (0, 1)], 1.0 - s1, s0 - 1.0 + s1)
    } else {
        ([(0, 1), (0, 0), (1, 0)], s1, 1.0 - s0 - s1)
    };

    let anims = corners.map(|(x, y)| seq.anim_at(i0 + x, i1 + y));
    let w1 = if w1 < 0.001 { 0.0 } else { w1 };
    (anims, [w0, w1, 1.0 - w0 - w1])
}

impl BoneSetup {
    /// Linear blend of `src` into `dst` by `s`
    ///
    /// `s <= 0` leaves `dst` untouched and `s >= 1` copies every weighted
    /// bone exactly.
    pub fn blend_bones(&self, dst: &mut Pose, seq: &SequenceDef, src: &Pose, s: f32) {
        if s <= 0.0 {
            return;
        }

        let bones = self.asset.bones();
        let count = bones.len().min(dst.len()).min(src.len());

        for (i, bone) in bones.iter().enumerate().take(count) {
            if self.bone_weight(Some(seq), i) <= 0.0 || !bone.is_used(self.bone_mask) {
                continue;
            }

            if s >= 1.0 {
                dst.copy_bone(src, i);
                continue;
            }

            dst.q[i] = if bone.flags.contains(BoneFlags::FIXED_ALIGNMENT) {
                quaternion_blend_no_align(dst.q[i], src.q[i], s)
            } else {
                quaternion_blend(dst.q[i], src.q[i], s)
            };
            dst.pos[i] = dst.pos[i].lerp(src.pos[i], s);
        }
    }

    /// Spherical blend of `src` into `dst` by `s`, scaled per bone
    ///
    /// Delta sequences accumulate `src` on top of `dst` instead, and world
    /// sequences blend orientations in world space.
    pub fn slerp_bones(&self, dst: &mut Pose, seq: &SequenceDef, src: &Pose, s: f32) {
        if s <= 0.0 {
            return;
        }
        let s = s.min(1.0);

        if seq.flags.contains(SequenceFlags::WORLD) {
            self.world_space_slerp(dst, seq, src, s);
            return;
        }

        let bones = self.asset.bones();
        let count = bones.len().min(dst.len()).min(src.len());
        let delta = seq.flags.contains(SequenceFlags::DELTA);
        let post = seq.flags.contains(SequenceFlags::POST);

        for (i, bone) in bones.iter().enumerate().take(count) {
            if !bone.is_used(self.bone_mask) {
                continue;
            }

            let s2 = s * self.bone_weight(Some(seq), i);
            if s2 <= 0.0 {
                continue;
            }

            if delta {
                dst.q[i] = if post {
                    quaternion_ma(dst.q[i], s2, src.q[i])
                } else {
                    quaternion_sm(s2, src.q[i], dst.q[i])
                };
                dst.pos[i] += src.pos[i] * s2;
            } else if s2 >= 1.0 {
                dst.copy_bone(src, i);
            } else {
                dst.q[i] = if bone.flags.contains(BoneFlags::FIXED_ALIGNMENT) {
                    quaternion_slerp_no_align(dst.q[i], src.q[i], s2)
                } else {
                    quaternion_slerp(dst.q[i], src.q[i], s2)
                };
                dst.pos[i] = dst.pos[i].lerp(src.pos[i], s2);
            }
        }
    }

    fn world_space_slerp(&self, dst: &mut Pose, seq: &SequenceDef, src: &Pose, s: f32) {
        let bones = self.asset.bones();
        let count = bones.len().min(dst.len()).min(src.len());
        let root = Affine3A::IDENTITY;

        let mut dst_world = BoneTransforms::new(bones.len());
        let mut src_world = BoneTransforms::new(bones.len());
        let mut target: Vec<Option<Affine3A>> = vec![None; bones.len()];

        for (i, bone) in bones.iter().enumerate().take(count) {
            if !bone.is_used(self.bone_mask) {
                continue;
            }

            let s2 = s * self.bone_weight(Some(seq), i);
            let s1 = bone
                .parent
                .map_or(0.0, |parent| s * self.bone_weight(Some(seq), parent));

            if s1 == 1.0 && s2 == 1.0 {
                dst.copy_bone(src, i);
            } else if s2 > 0.0 {
                dst_world.rebuild_chain(bones, &root, dst, i);
                src_world.build_chain(bones, &root, src, i);

                let src_q = matrix_quaternion(&src_world.get(i));
                let dst_q = matrix_quaternion(&dst_world.get(i));
                let dst_pos = matrix_origin(&dst_world.get(i));

                let target_q = quaternion_slerp(dst_q, src_q, s2);
                let bone_target = bone_matrix(dst_pos, target_q);
                target[i] = Some(bone_target);

                match bone.parent {
                    None => dst.q[i] = target_q,
                    Some(parent) => {
                        let parent_target = match target[parent] {
                            Some(m) => m,
                            None => {
                                dst_world.rebuild_chain(bones, &root, dst, parent);
                                dst_world.get(parent)
                            }
                        };
                        let local = parent_target.inverse() * bone_target;
                        dst.q[i] = matrix_quaternion(&local);
                        dst.pos[i] = dst.pos[i].lerp(src.pos[i], s2);
                    }
                }
            }
        }
    }

    /// Resolve blend axis `axis` of `seq` to a fraction and grid index
    pub fn local_pose_parameter(&self, seq: &SequenceDef, axis: usize) -> (f32, usize) {
        if !seq.flags.contains(SequenceFlags::BLEND_POSE) {
            return (self.pose_param_value(axis), 0);
        }

        let Some(param_index) = seq.blend_pose.get(axis).copied().flatten() else {
            return (0.0, 0);
        };
        let Some(param) = self.asset.pose_param(param_index) else {
            return (0.0, 0);
        };

        let mut value = self.pose_param_value(param_index);
        if param.loop_range != 0.0 {
            let wrap = (param.start + param.end) / 2.0 + param.loop_range / 2.0;
            let shift = param.loop_range - wrap;
            value -= param.loop_range * ((value + shift) / param.loop_range).floor();
        }

        let group = seq.group_size[axis];

        if seq.pose_keys.is_none() {
            let range = param.end - param.start;
            let local_start = (seq.blend_start[axis] - param.start) / range;
            let local_end = (seq.blend_end[axis] - param.start) / range;
            let local_range = local_end - local_start;
            if local_range == 0.0 || !local_range.is_finite() {
                return (0.0, 0);
            }

            let mut setting = ((value - local_start) / local_range).clamp(0.0, 1.0);
            let mut index = 0;
            if group > 2 {
                let steps = (group - 1) as f32;
                index = ((setting * steps) as usize).min(group - 2);
                setting = setting * steps - index as f32;
            }
            (setting, index)
        } else {
            if group < 2 {
                return (0.0, 0);
            }
            let value = value * (param.end - param.start) + param.start;
            let mut index = 0;
            let mut setting;
            loop {
                let k0 = seq.pose_key(axis, index);
                let k1 = seq.pose_key(axis, index + 1);
                setting = if k1 == k0 { 0.0 } else { (value - k0) / (k1 - k0) };
                if index + 2 < group && setting > 1.0 {
                    index += 1;
                    continue;
                }
                break;
            }
            (setting.clamp(0.0, 1.0), index)
        }
    }

    /// Four corner animations of the active grid cell with bilinear weights
    ///
    /// An out-of-range sequence yields zero weights.
    pub fn local_seq_anims(&self, seq: usize) -> [(usize, f32); 4] {
        let Some(desc) = self.asset.sequence(seq) else {
            return [(0, 0.0); 4];
        };

        let (s0, i0) = self.local_pose_parameter(desc, 0);
        let (s1, i1) = self.local_pose_parameter(desc, 1);

        [
            (desc.anim_at(i0, i1), (1.0 - s0) * (1.0 - s1)),
            (desc.anim_at(i0 + 1, i1), s0 * (1.0 - s1)),
            (desc.anim_at(i0, i1 + 1), (1.0 - s0) * s1),
            (desc.anim_at(i0 + 1, i1 + 1), s0 * s1),
        ]
    }

    fn weighted_anim_sum<F>(&self, seq: usize, mut value: F) -> f32
    where
        F: FnMut(&AnimDesc) -> Option<f32>,
    {
        self.local_seq_anims(seq)
            .iter()
            .filter(|(_, weight)| *weight > 0.0)
            .filter_map(|&(anim, weight)| {
                self.asset.anim(anim).and_then(&mut value).map(|v| v * weight)
            })
            .sum()
    }

    /// Last frame of the blended sequence
    pub fn local_max_frame(&self, seq: usize) -> usize {
        let mut max_frame = self.weighted_anim_sum(seq, |anim| Some(anim.frame_count as f32));
        if max_frame > 1.0 {
            max_frame -= 1.0;
        }

        if self.settings.legacy_max_frame_fudge {
            (max_frame + 0.01) as usize
        } else {
            max_frame.round() as usize
        }
    }

    /// Frames per second of the blended sequence
    pub fn local_fps(&self, seq: usize) -> f32 {
        self.weighted_anim_sum(seq, |anim| Some(anim.fps))
    }

    /// Cycles per second of the blended sequence
    pub fn local_cps(&self, seq: usize) -> f32 {
        self.weighted_anim_sum(seq, |anim| {
            (anim.frame_count > 1).then(|| anim.cycles_per_second())
        })
    }

    /// Seconds per cycle, zero for a static sequence
    pub fn local_duration(&self, seq: usize) -> f32 {
        let cps = self.local_cps(seq);
        if cps == 0.0 { 0.0 } else { 1.0 / cps }
    }

    /// Effective cycle of `seq`: wall clock, pose parameter or wrapped input
    pub fn resolve_cycle(&self, seq: usize, cycle: f32) -> f32 {
        let Some(desc) = self.asset.sequence(seq) else {
            return cycle;
        };

        if desc.flags.contains(SequenceFlags::REALTIME) {
            let cycle = self.time * self.local_cps(seq);
            cycle - cycle.trunc()
        } else if desc.flags.contains(SequenceFlags::CYCLE_POSE) {
            self.pose_param_value(desc.cycle_pose)
        } else if !(0.0..1.0).contains(&cycle) {
            if desc.flags.contains(SequenceFlags::LOOPING) {
                let cycle = cycle - cycle.trunc();
                if cycle < 0.0 { cycle + 1.0 } else { cycle }
            } else {
                cycle.clamp(0.0, 1.0)
            }
        } else {
            cycle
        }
    }

    /// Decode and blend the sub-animations of `seq` at `cycle` into `pose`
    ///
    /// Installed bone controllers are consumed. An out-of-range sequence
    /// falls back to the first one.
    pub fn calc_pose_single(&mut self, pose: &mut Pose, seq: usize, cycle: f32) {
        let controllers = self.bone_controllers.take();
        let asset = Arc::clone(&self.asset);

        let seq = if seq < asset.sequences().len() {
            seq
        } else {
            warn!(
                "Sequence {}/{} out of range for model {}",
                seq,
                asset.sequences().len(),
                asset.name()
            );
            0
        };
        let Some(desc) = asset.sequence(seq) else {
            return;
        };

        let controllers = controllers.as_deref();
        let (s0, i0) = self.local_pose_parameter(desc, 0);
        let (s1, i1) = self.local_pose_parameter(desc, 1);
        let cycle = self.resolve_cycle(seq, cycle);
        let bone_count = asset.bone_count();

        if !desc.flags.contains(SequenceFlags::BLEND_POSE) && desc.num_blends() > 1 {
            self.calc_legacy_blend(pose, desc, seq, cycle, (s0, s1), controllers);
            return;
        }

        let calc = |pose: &mut Pose, x: usize, y: usize| {
            self.calc_animation(pose, seq, desc.anim_at(i0 + x, i1 + y), cycle, controllers);
        };

        let low0 = s0 < AXIS_SNAP_LOW;
        let high0 = s0 > AXIS_SNAP_HIGH;
        let low1 = s1 < AXIS_SNAP_LOW;
        let high1 = s1 > AXIS_SNAP_HIGH;

        if low0 || high0 {
            let x = usize::from(high0);
            if low1 || high1 {
                calc(pose, x, usize::from(high1));
            } else {
                let mut pose2 = Pose::new(bone_count);
                calc(pose, x, 0);
                calc(&mut pose2, x, 1);
                self.blend_bones(pose, desc, &pose2, s1);
            }
        } else if low1 || high1 {
            let y = usize::from(high1);
            let mut pose2 = Pose::new(bone_count);
            calc(pose, 0, y);
            calc(&mut pose2, 1, y);
            self.blend_bones(pose, desc, &pose2, s0);
        } else if !self.nine_way_blend {
            let mut pose2 = Pose::new(bone_count);
            let mut pose3 = Pose::new(bone_count);
            calc(pose, 0, 0);
            calc(&mut pose2, 1, 0);
            self.blend_bones(pose, desc, &pose2, s0);

            calc(&mut pose2, 0, 1);
            calc(&mut pose3, 1, 1);
            self.blend_bones(&mut pose2, desc, &pose3, s0);

            self.blend_bones(pose, desc, &pose2, s1);
        } else {
            let (anims, weights) = calc_9way_blend_indices(desc, i0, i1, s0, s1);
            let mut pose2 = Pose::new(bone_count);

            if weights[1] < 0.001 {
                self.calc_animation(pose, seq, anims[0], cycle, controllers);
                self.calc_animation(&mut pose2, seq, anims[2], cycle, controllers);
                let total = weights[0] + weights[2];
                let s = if total > 0.0 { weights[2] / total } else { 0.0 };
                self.blend_bones(pose, desc, &pose2, s);
            } else {
                self.calc_animation(pose, seq, anims[0], cycle, controllers);
                self.calc_animation(&mut pose2, seq, anims[1], cycle, controllers);
                self.blend_bones(pose, desc, &pose2, weights[1] / (weights[0] + weights[1]));

                self.calc_animation(&mut pose2, seq, anims[2], cycle, controllers);
                self.blend_bones(pose, desc, &pose2, weights[2]);
            }
        }
    }

    /// Fixed-layout blends of sequences that read the first two pose
    /// parameters directly
    fn calc_legacy_blend(
        &self,
        pose: &mut Pose,
        desc: &SequenceDef,
        seq: usize,
        cycle: f32,
        (s0, s1): (f32, f32),
        controllers: Option<&[f32]>,
    ) {
        let bone_count = self.asset.bone_count();
        let anim = |slot: usize| desc.anims.get(slot).copied().unwrap_or(desc.anims[0]);
        let mut pose2 = Pose::new(bone_count);

        if desc.num_blends() == 9 {
            let (mut s0, mut s1) = (s0, s1);
            let base = if s1 <= 0.5 {
                s1 *= 2.0;
                if s0 <= 0.5 {
                    s0 *= 2.0;
                    0
                } else {
                    s0 = 2.0 * (s0 - 0.5);
                    3
                }
            } else {
                s1 = 2.0 * (s1 - 0.5);
                if s0 <= 0.5 {
                    s0 *= 2.0;
                    1
                } else {
                    s0 = 2.0 * (s0 - 0.5);
                    4
                }
            };

            let mut pose3 = Pose::new(bone_count);
            let mut pose4 = Pose::new(bone_count);
            self.calc_animation(pose, seq, anim(base), cycle, controllers);
            self.calc_animation(&mut pose2, seq, anim(base + 1), cycle, controllers);
            self.calc_animation(&mut pose3, seq, anim(base + 3), cycle, controllers);
            self.calc_animation(&mut pose4, seq, anim(base + 4), cycle, controllers);

            self.slerp_bones(pose, desc, &pose2, s1);
            self.slerp_bones(&mut pose3, desc, &pose4, s1);
            self.slerp_bones(pose, desc, &pose3, s0);
            return;
        }

        self.calc_animation(pose, seq, anim(0), cycle, controllers);
        self.calc_animation(&mut pose2, seq, anim(1), cycle, controllers);
        self.blend_bones(pose, desc, &pose2, s0);

        if desc.num_blends() == 4 && s1 > 0.0 {
            let mut pose3 = Pose::new(bone_count);
            self.calc_animation(&mut pose2, seq, anim(2), cycle, controllers);
            self.calc_animation(&mut pose3, seq, anim(3), cycle, controllers);
            self.blend_bones(&mut pose2, desc, &pose3, s0);
            self.blend_bones(pose, desc, &pose2, s1);
        }
    }
}
