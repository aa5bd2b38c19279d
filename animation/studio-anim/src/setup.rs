//! Per-instance evaluation state
//!
//! [`BoneSetup`] owns everything that varies per animated instance apart
//! from IK and jiggle state: the clock, pose parameter values, the active
//! bone mask, custom bone weights and installed bone controller offsets.
//! The evaluation entry points live in the [`crate::evaluator`],
//! [`crate::blend`], [`crate::layers`], [`crate::controller`] and
//! [`crate::movement`] modules as further `impl BoneSetup` blocks.
//!
//! # Example
//!
//! ```rust,ignore
//! use studio_anim::{BoneSetup, FrameInput, IkContext, JiggleBones, Pose};
//!
//! let mut setup = BoneSetup::new(asset.clone());
//! setup.set_time(now);
//! setup.set_pose_parameters(&params);
//!
//! let mut pose = Pose::new(asset.bone_count());
//! setup.init_pose(&mut pose);
//! setup.accumulate_pose(Some(&mut ik), &mut pose, seq, cycle, 1.0);
//! setup.calc_autoplay_sequences(Some(&mut ik), &mut pose);
//!
//! let frame = FrameInput::new(now, tick, origin, orientation);
//! let world = setup.build_world_transforms(&pose, &frame, Some(&mut jiggle));
//! ```

use std::sync::Arc;

use glam::{Affine3A, Quat, Vec3};
use log::warn;

use crate::asset::{BoneFlags, SequenceDef, StudioAsset};
use crate::jiggle::JiggleBones;
use crate::math::bone_matrix;
use crate::pose::{BoneTransforms, Pose};
use crate::procedural::apply_procedural_bone;
use crate::settings::BlendSettings;

/// Per-tick inputs shared by IK and the final world-transform pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInput {
    /// Simulation time in seconds
    pub time: f32,
    /// Monotonic frame counter, used for latch staleness
    pub frame_counter: i32,
    /// Root position in world space
    pub root_pos: Vec3,
    /// Root orientation in world space
    pub root_q: Quat,
}

impl FrameInput {
    /// Create frame inputs
    pub fn new(time: f32, frame_counter: i32, root_pos: Vec3, root_q: Quat) -> Self {
        Self {
            time,
            frame_counter,
            root_pos,
            root_q,
        }
    }

    /// Root transform
    pub fn root(&self) -> Affine3A {
        bone_matrix(self.root_pos, self.root_q)
    }
}

impl Default for FrameInput {
    fn default() -> Self {
        Self::new(0.0, 0, Vec3::ZERO, Quat::IDENTITY)
    }
}

/// Evaluation state of one animated instance
#[derive(Debug, Clone)]
pub struct BoneSetup {
    pub(crate) asset: Arc<StudioAsset>,
    pub(crate) time: f32,
    pub(crate) pose_params: Vec<f32>,
    pub(crate) bone_mask: BoneFlags,
    pub(crate) custom_bone_weights: Option<Vec<f32>>,
    pub(crate) bone_controllers: Option<Vec<f32>>,
    pub(crate) settings: BlendSettings,
    pub(crate) nine_way_blend: bool,
}

impl BoneSetup {
    /// Create evaluation state with default pose parameters
    pub fn new(asset: Arc<StudioAsset>) -> Self {
        let mut setup = Self {
            asset,
            time: 0.0,
            pose_params: Vec::new(),
            bone_mask: BoneFlags::empty(),
            custom_bone_weights: None,
            bone_controllers: None,
            settings: BlendSettings::default(),
            nine_way_blend: false,
        };
        setup.pose_params = setup.calc_default_pose_parameters();
        setup
    }

    /// Replace the compatibility settings
    pub fn with_settings(mut self, settings: BlendSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Blend modern 2D grids by triangles instead of bilinearly
    pub fn with_nine_way_blend(mut self, enabled: bool) -> Self {
        self.nine_way_blend = enabled;
        self
    }

    /// Shared asset
    pub fn asset(&self) -> &Arc<StudioAsset> {
        &self.asset
    }

    /// Compatibility settings
    pub fn settings(&self) -> BlendSettings {
        self.settings
    }

    /// Current time in seconds
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Set the clock used by realtime sequences
    pub fn set_time(&mut self, time: f32) {
        self.time = time;
    }

    /// Normalized pose parameter values
    pub fn pose_params(&self) -> &[f32] {
        &self.pose_params
    }

    /// Normalized value of pose parameter `index`, zero if out of range
    pub fn pose_param_value(&self, index: usize) -> f32 {
        self.pose_params.get(index).copied().unwrap_or(0.0)
    }

    /// Copy normalized pose parameter values
    ///
    /// Extra values are ignored; missing ones keep their current value.
    pub fn set_pose_parameters(&mut self, values: &[f32]) {
        if values.len() > self.pose_params.len() {
            warn!(
                "{} pose parameter values supplied, asset '{}' has {}",
                values.len(),
                self.asset.name(),
                self.pose_params.len()
            );
        }
        for (dst, src) in self.pose_params.iter_mut().zip(values) {
            *dst = *src;
        }
    }

    /// Set one normalized pose parameter value
    pub fn set_pose_param_value(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.pose_params.get_mut(index) {
            *slot = value;
        } else {
            warn!("Pose parameter {} out of range", index);
        }
    }

    /// Restrict evaluation to bones matching `mask` (empty keeps all)
    pub fn set_bone_mask(&mut self, mask: BoneFlags) {
        self.bone_mask = mask;
    }

    /// Active bone mask
    pub fn bone_mask(&self) -> BoneFlags {
        self.bone_mask
    }

    /// Whether `bone` is evaluated under the active mask
    pub fn is_bone_used(&self, bone: usize) -> bool {
        self.asset
            .bone(bone)
            .is_some_and(|b| b.is_used(self.bone_mask))
    }

    /// Per-bone weights used by sequences without their own table
    pub fn set_custom_bone_weights(&mut self, weights: Option<Vec<f32>>) {
        self.custom_bone_weights = weights;
    }

    /// Install per-controller offsets for the next single-sequence evaluation
    ///
    /// Offsets are indexed by controller and are consumed by the next
    /// [`BoneSetup::calc_pose_single`].
    pub fn install_bone_controllers(&mut self, offsets: Vec<f32>) {
        self.bone_controllers = Some(offsets);
    }

    /// Whether controller offsets are installed
    pub fn has_bone_controllers(&self) -> bool {
        self.bone_controllers.is_some()
    }

    /// Weight of `bone` in `seq`: the sequence table, else the custom
    /// weights, else 1
    pub fn bone_weight(&self, seq: Option<&SequenceDef>, bone: usize) -> f32 {
        if let Some(weight) = seq.and_then(|s| s.bone_weight(bone)) {
            return weight;
        }
        match &self.custom_bone_weights {
            Some(weights) => weights.get(bone).copied().unwrap_or(0.0),
            None => 1.0,
        }
    }

    /// Bone-to-world matrices for `pose`, with procedural and jiggle bones
    /// applied in parent-first order
    pub fn build_world_transforms(
        &self,
        pose: &Pose,
        frame: &FrameInput,
        mut jiggle: Option<&mut JiggleBones>,
    ) -> BoneTransforms {
        let bones = self.asset.bones();
        let root = frame.root();
        let mut transforms = BoneTransforms::new(bones.len());

        for (i, bone) in bones.iter().enumerate() {
            if !bone.is_used(self.bone_mask) {
                continue;
            }

            if apply_procedural_bone(&self.asset, i, &root, &mut transforms) {
                continue;
            }

            let parent = transforms.parent_world(bones, &root, i);
            let goal = parent * pose.local_matrix(i);

            let matrix = match (bone.jiggle.as_ref(), jiggle.as_deref_mut()) {
                (Some(params), Some(sim))
                    if self.asset.has_bone_info() && bone.flags.contains(BoneFlags::JIGGLE) =>
                {
                    sim.update(i, params, &goal, frame.time)
                }
                _ => goal,
            };
            transforms.set(i, matrix);
        }

        transforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AnimDesc, BoneDef, PoseParamDesc, SequenceDef, StudioAssetBuilder};
    use crate::math::matrix_origin;

    fn asset() -> Arc<StudioAsset> {
        Arc::new(
            StudioAssetBuilder::new("setup")
                .bone(BoneDef::new("root", None, Vec3::ZERO, Vec3::ZERO))
                .bone(
                    BoneDef::new("arm", Some(0), Vec3::X, Vec3::ZERO)
                        .with_flags(BoneFlags::USED_BY_HITBOX),
                )
                .pose_param(PoseParamDesc::new("yaw", -90.0, 90.0))
                .anim(AnimDesc::new("idle", 1, 30.0))
                .sequence(SequenceDef::new("idle", 0).with_bone_weights(vec![1.0, 0.25]))
                .sequence(SequenceDef::new("plain", 0))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_default_pose_params() {
        let setup = BoneSetup::new(asset());
        assert_eq!(setup.pose_params().len(), 1);
        assert!((setup.pose_param_value(0) - 0.5).abs() < 1e-6);
        assert_eq!(setup.pose_param_value(3), 0.0);
    }

    #[test]
    fn test_bone_weight_sources() {
        let mut setup = BoneSetup::new(asset());
        let asset = Arc::clone(setup.asset());
        let weighted = asset.sequence(0);
        let plain = asset.sequence(1);

        assert!((setup.bone_weight(weighted, 1) - 0.25).abs() < 1e-6);
        assert!((setup.bone_weight(plain, 1) - 1.0).abs() < 1e-6);

        setup.set_custom_bone_weights(Some(vec![0.0, 0.5]));
        assert!((setup.bone_weight(plain, 1) - 0.5).abs() < 1e-6);
        assert!((setup.bone_weight(weighted, 1) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_bone_mask() {
        let mut setup = BoneSetup::new(asset());
        assert!(setup.is_bone_used(0));
        setup.set_bone_mask(BoneFlags::USED_BY_HITBOX);
        assert!(!setup.is_bone_used(0));
        assert!(setup.is_bone_used(1));
        assert!(!setup.is_bone_used(9));
    }

    #[test]
    fn test_world_transforms_follow_root() {
        let setup = BoneSetup::new(asset());
        let mut pose = Pose::new(2);
        setup.init_pose(&mut pose);

        let frame = FrameInput::new(0.0, 0, Vec3::new(0.0, 0.0, 10.0), Quat::IDENTITY);
        let world = setup.build_world_transforms(&pose, &frame, None);
        assert!((matrix_origin(&world.get(1)) - Vec3::new(1.0, 0.0, 10.0)).length() < 1e-5);
    }
}
