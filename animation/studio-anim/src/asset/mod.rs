//! Compiled skeleton and animation data
//!
//! A [`StudioAsset`] is assembled with [`StudioAssetBuilder`], which checks
//! every cross reference once. Evaluation code can then index the tables
//! without re-validating, and only has to cope with out-of-range runtime
//! inputs (sequence numbers, pose parameter values).
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use studio_anim::asset::{AnimDesc, BoneDef, SequenceDef, StudioAssetBuilder};
//!
//! let asset = StudioAssetBuilder::new("crate")
//!     .bone(BoneDef::new("root", None, Vec3::ZERO, Vec3::ZERO))
//!     .anim(AnimDesc::new("idle", 1, 30.0))
//!     .sequence(SequenceDef::new("idle", 0))
//!     .build()?;
//! let asset = Arc::new(asset);
//! ```

mod bone;
mod ik;
mod procedural;
mod sequence;

pub use bone::{
    Attachment, BoneController, BoneDef, BoneFlags, ControllerKind, MOUTH_CONTROLLER,
    PoseParamDesc,
};
pub use ik::{IkChainDef, IkErrorTrack, IkLink, IkLockDef, IkRuleDef, IkRuleType};
pub use procedural::{
    AimAt, AxisInterp, JiggleFlags, JiggleParams, ProceduralRule, QuatInterp, QuatTrigger,
};
pub use sequence::{
    AnimDesc, AnimFlags, AutoLayer, BoneChannels, LayerFlags, MovementSegment, SequenceDef,
    SequenceFlags,
};

use crate::error::{AnimError, Result};

/// A validated skeleton with its animations and sequences
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize))]
pub struct StudioAsset {
    name: String,
    bones: Vec<BoneDef>,
    controllers: Vec<BoneController>,
    attachments: Vec<Attachment>,
    pose_params: Vec<PoseParamDesc>,
    anims: Vec<AnimDesc>,
    sequences: Vec<SequenceDef>,
    ik_chains: Vec<IkChainDef>,
    autoplay_locks: Vec<IkLockDef>,
    has_bone_info: bool,
}

impl StudioAsset {
    /// Asset name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bones in parent-first order
    pub fn bones(&self) -> &[BoneDef] {
        &self.bones
    }

    /// Bone by index
    pub fn bone(&self, index: usize) -> Option<&BoneDef> {
        self.bones.get(index)
    }

    /// Number of bones
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    /// Bone controllers
    pub fn controllers(&self) -> &[BoneController] {
        &self.controllers
    }

    /// Attachments
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Pose parameter descriptions
    pub fn pose_params(&self) -> &[PoseParamDesc] {
        &self.pose_params
    }

    /// Pose parameter by index
    pub fn pose_param(&self, index: usize) -> Option<&PoseParamDesc> {
        self.pose_params.get(index)
    }

    /// Sub-animations
    pub fn anims(&self) -> &[AnimDesc] {
        &self.anims
    }

    /// Sub-animation by index
    pub fn anim(&self, index: usize) -> Option<&AnimDesc> {
        self.anims.get(index)
    }

    /// Sequences
    pub fn sequences(&self) -> &[SequenceDef] {
        &self.sequences
    }

    /// Sequence by index
    pub fn sequence(&self, index: usize) -> Option<&SequenceDef> {
        self.sequences.get(index)
    }

    /// IK chains
    pub fn ik_chains(&self) -> &[IkChainDef] {
        &self.ik_chains
    }

    /// IK chain by index
    pub fn ik_chain(&self, index: usize) -> Option<&IkChainDef> {
        self.ik_chains.get(index)
    }

    /// Locks solved around autoplay sequences
    pub fn autoplay_locks(&self) -> &[IkLockDef] {
        &self.autoplay_locks
    }

    /// Whether alignment quaternions and procedural rules are authored
    pub fn has_bone_info(&self) -> bool {
        self.has_bone_info
    }

    /// Index of the bone named `name`
    pub fn find_bone(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    /// Index of the sequence labelled `label`
    pub fn find_sequence(&self, label: &str) -> Option<usize> {
        self.sequences.iter().position(|s| s.label == label)
    }

    /// Index of the pose parameter named `name`
    pub fn find_pose_param(&self, name: &str) -> Option<usize> {
        self.pose_params.iter().position(|p| p.name == name)
    }
}

/// Builder for [`StudioAsset`]
#[derive(Debug, Clone, Default)]
pub struct StudioAssetBuilder {
    name: String,
    bones: Vec<BoneDef>,
    controllers: Vec<BoneController>,
    attachments: Vec<Attachment>,
    pose_params: Vec<PoseParamDesc>,
    anims: Vec<AnimDesc>,
    sequences: Vec<SequenceDef>,
    ik_chains: Vec<IkChainDef>,
    autoplay_locks: Vec<IkLockDef>,
    has_bone_info: bool,
}

impl StudioAssetBuilder {
    /// Start an empty asset
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            has_bone_info: true,
            ..Default::default()
        }
    }

    /// Append a bone
    pub fn bone(mut self, bone: BoneDef) -> Self {
        self.bones.push(bone);
        self
    }

    /// Append a bone controller
    pub fn controller(mut self, controller: BoneController) -> Self {
        self.controllers.push(controller);
        self
    }

    /// Append an attachment
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Append a pose parameter
    pub fn pose_param(mut self, param: PoseParamDesc) -> Self {
        self.pose_params.push(param);
        self
    }

    /// Append a sub-animation
    pub fn anim(mut self, anim: AnimDesc) -> Self {
        self.anims.push(anim);
        self
    }

    /// Append a sequence
    pub fn sequence(mut self, sequence: SequenceDef) -> Self {
        self.sequences.push(sequence);
        self
    }

    /// Append an IK chain
    pub fn ik_chain(mut self, chain: IkChainDef) -> Self {
        self.ik_chains.push(chain);
        self
    }

    /// Append an autoplay lock
    pub fn autoplay_lock(mut self, lock: IkLockDef) -> Self {
        self.autoplay_locks.push(lock);
        self
    }

    /// Declare whether extended bone info (alignment, procedural rules) is present
    pub fn with_bone_info(mut self, has_bone_info: bool) -> Self {
        self.has_bone_info = has_bone_info;
        self
    }

    /// Validate all cross references and produce the asset
    pub fn build(self) -> Result<StudioAsset> {
        self.validate_bones()?;
        self.validate_controllers()?;
        self.validate_anims()?;
        self.validate_sequences()?;
        self.validate_ik()?;
        self.validate_layer_graph()?;

        Ok(StudioAsset {
            name: self.name,
            bones: self.bones,
            controllers: self.controllers,
            attachments: self.attachments,
            pose_params: self.pose_params,
            anims: self.anims,
            sequences: self.sequences,
            ik_chains: self.ik_chains,
            autoplay_locks: self.autoplay_locks,
            has_bone_info: self.has_bone_info,
        })
    }

    fn check_bone(&self, bone: usize, context: &str) -> Result<()> {
        if bone < self.bones.len() {
            Ok(())
        } else {
            Err(AnimError::invalid_bone(format!(
                "{context} references bone {bone}, asset has {}",
                self.bones.len()
            )))
        }
    }

    fn check_pose_param(&self, param: usize, context: &str) -> Result<()> {
        if param < self.pose_params.len() {
            Ok(())
        } else {
            Err(AnimError::invalid_pose_parameter(format!(
                "{context} references pose parameter {param}, asset has {}",
                self.pose_params.len()
            )))
        }
    }

    fn validate_bones(&self) -> Result<()> {
        for (i, bone) in self.bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent >= i {
                    return Err(AnimError::invalid_bone(format!(
                        "bone {i} ({}) has parent {parent}, parents must precede children",
                        bone.name
                    )));
                }
            }

            for controller in bone.controllers.iter().flatten() {
                if *controller >= self.controllers.len() {
                    return Err(AnimError::reference(format!(
                        "bone {i} ({}) references controller {controller}, asset has {}",
                        bone.name,
                        self.controllers.len()
                    )));
                }
            }

            if let Some(rule) = &bone.procedural {
                self.validate_procedural(i, rule)?;
            }

            if bone.flags.contains(BoneFlags::JIGGLE) && bone.jiggle.is_none() {
                return Err(AnimError::validation(format!(
                    "bone {i} ({}) is flagged jiggle without parameters",
                    bone.name
                )));
            }
        }

        for (i, attachment) in self.attachments.iter().enumerate() {
            self.check_bone(attachment.bone, &format!("attachment {i}"))?;
        }

        Ok(())
    }

    fn validate_procedural(&self, bone: usize, rule: &ProceduralRule) -> Result<()> {
        let context = format!("procedural rule on bone {bone}");
        match rule {
            ProceduralRule::AxisInterp(interp) => {
                self.check_bone(interp.control, &context)?;
                if interp.axis > 2 {
                    return Err(AnimError::validation(format!(
                        "{context} uses control axis {}",
                        interp.axis
                    )));
                }
            }
            ProceduralRule::QuatInterp(interp) => {
                self.check_bone(interp.control, &context)?;
            }
            ProceduralRule::AimAtBone(aim) => {
                self.check_bone(aim.parent, &context)?;
                self.check_bone(aim.aim, &context)?;
            }
            ProceduralRule::AimAtAttachment(aim) => {
                self.check_bone(aim.parent, &context)?;
                if aim.aim >= self.attachments.len() {
                    return Err(AnimError::reference(format!(
                        "{context} references attachment {}, asset has {}",
                        aim.aim,
                        self.attachments.len()
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_controllers(&self) -> Result<()> {
        for (i, controller) in self.controllers.iter().enumerate() {
            self.check_bone(controller.bone, &format!("controller {i}"))?;
        }
        Ok(())
    }

    fn validate_anims(&self) -> Result<()> {
        for (i, anim) in self.anims.iter().enumerate() {
            if !anim.channels.is_empty() && anim.channels.len() != self.bones.len() {
                return Err(AnimError::invalid_animation(format!(
                    "animation {i} ({}) has channels for {} bones, asset has {}",
                    anim.name,
                    anim.channels.len(),
                    self.bones.len()
                )));
            }

            let mut prev_end = 0.0;
            for segment in &anim.movements {
                if segment.end_frame <= prev_end {
                    return Err(AnimError::invalid_animation(format!(
                        "animation {i} ({}) has a non-increasing movement table",
                        anim.name
                    )));
                }
                prev_end = segment.end_frame;
            }

            for (r, rule) in anim.ik_rules.iter().enumerate() {
                let context = format!("IK rule {r} of animation {i}");
                if rule.chain >= self.ik_chains.len() {
                    return Err(AnimError::invalid_ik_chain(format!(
                        "{context} references chain {}, asset has {}",
                        rule.chain,
                        self.ik_chains.len()
                    )));
                }
                if let Some(bone) = rule.bone {
                    self.check_bone(bone, &context)?;
                }
            }
        }
        Ok(())
    }

    fn validate_sequences(&self) -> Result<()> {
        for (i, seq) in self.sequences.iter().enumerate() {
            let context = format!("sequence {i} ({})", seq.label);

            if seq.anims.is_empty() {
                return Err(AnimError::invalid_sequence(format!("{context} has no animations")));
            }
            if let Some(anim) = seq.anims.iter().find(|&&a| a >= self.anims.len()) {
                return Err(AnimError::invalid_animation(format!(
                    "{context} references animation {anim}, asset has {}",
                    self.anims.len()
                )));
            }
            if seq.group_size[0] == 0
                || seq.group_size[1] == 0
                || seq.group_size[0] * seq.group_size[1] != seq.anims.len()
            {
                return Err(AnimError::invalid_sequence(format!(
                    "{context} has a {}x{} grid for {} animations",
                    seq.group_size[0],
                    seq.group_size[1],
                    seq.anims.len()
                )));
            }

            for param in seq.blend_pose.iter().flatten() {
                self.check_pose_param(*param, &context)?;
            }
            if seq.flags.contains(SequenceFlags::CYCLE_POSE) {
                self.check_pose_param(seq.cycle_pose, &context)?;
            }

            if let Some(keys) = &seq.pose_keys {
                for axis in 0..2 {
                    if keys[axis].len() < seq.group_size[axis] {
                        return Err(AnimError::invalid_sequence(format!(
                            "{context} has {} pose keys on axis {axis}, needs {}",
                            keys[axis].len(),
                            seq.group_size[axis]
                        )));
                    }
                }
            }

            if let Some(weights) = &seq.bone_weights {
                if weights.len() != self.bones.len() {
                    return Err(AnimError::invalid_sequence(format!(
                        "{context} has {} bone weights, asset has {} bones",
                        weights.len(),
                        self.bones.len()
                    )));
                }
            }

            for layer in &seq.auto_layers {
                if layer.sequence >= self.sequences.len() {
                    return Err(AnimError::invalid_sequence(format!(
                        "{context} layers sequence {}, asset has {}",
                        layer.sequence,
                        self.sequences.len()
                    )));
                }
                if let Some(pose) = layer.pose {
                    self.check_pose_param(pose, &context)?;
                }
            }

            for lock in &seq.ik_locks {
                self.check_chain(lock.chain, &context)?;
            }
        }
        Ok(())
    }

    fn check_chain(&self, chain: usize, context: &str) -> Result<()> {
        if chain < self.ik_chains.len() {
            Ok(())
        } else {
            Err(AnimError::invalid_ik_chain(format!(
                "{context} references chain {chain}, asset has {}",
                self.ik_chains.len()
            )))
        }
    }

    fn validate_ik(&self) -> Result<()> {
        for (i, chain) in self.ik_chains.iter().enumerate() {
            for link in &chain.links {
                if link.bone >= self.bones.len() {
                    return Err(AnimError::invalid_ik_chain(format!(
                        "chain {i} ({}) links bone {}, asset has {}",
                        chain.name,
                        link.bone,
                        self.bones.len()
                    )));
                }
            }
        }
        for lock in &self.autoplay_locks {
            self.check_chain(lock.chain, "autoplay lock")?;
        }
        Ok(())
    }

    /// Reject layer cycles, which would recurse forever during evaluation
    fn validate_layer_graph(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Active,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.sequences.len()];
        for root in 0..self.sequences.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            let mut stack = vec![(root, 0usize)];
            marks[root] = Mark::Active;
            while let Some((seq, next)) = stack.pop() {
                let layers = &self.sequences[seq].auto_layers;
                if let Some(layer) = layers.get(next) {
                    stack.push((seq, next + 1));
                    match marks[layer.sequence] {
                        Mark::Active => {
                            return Err(AnimError::invalid_sequence(format!(
                                "sequence {seq} ({}) layers sequence {} recursively",
                                self.sequences[seq].label, layer.sequence
                            )));
                        }
                        Mark::Unvisited => {
                            marks[layer.sequence] = Mark::Active;
                            stack.push((layer.sequence, 0));
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[seq] = Mark::Done;
                }
            }
        }
        Ok(())
    }
}
