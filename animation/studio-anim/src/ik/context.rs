//! Per-instance IK state
//!
//! An [`IkContext`] collects the IK rules of every sequence blended into a
//! pose, resolves ground and attachment rules into persistent
//! [`IkTarget`]s, and finally bends each chain so its foot lands where the
//! rules ask. It also captures and restores one-shot IK locks.
//!
//! # Example
//!
//! ```rust,ignore
//! use studio_anim::{FrameInput, IkContext};
//!
//! ik.init(&setup, &frame);
//! setup.accumulate_pose(Some(&mut ik), &mut pose, seq, cycle, 1.0);
//! ik.update_targets(&setup, &pose);
//! // trace ik.targets_mut() against the world here
//! ik.solve_dependencies(&setup, &mut pose);
//! ```

use glam::{Affine3A, Quat, Vec3};
use log::{debug, warn};

use crate::asset::{IkChainDef, IkLockDef, IkRuleType, SequenceFlags};
use crate::math::{
    bone_matrix, matrix_origin, matrix_quaternion, quaternion_ma, quaternion_scale,
    quaternion_slerp, quaternion_sm, simple_spline,
};
use crate::pose::{BoneTransforms, Pose};
use crate::settings::IkSettings;
use crate::setup::{BoneSetup, FrameInput};

use super::rule::IkContextRule;
use super::solver::{solve_chain, solve_ik_with_knee};
use super::target::{IkTarget, LatchState, LatchedPose, TargetTrace};

/// Latch frame of a target that has never latched
const CLEARED_LATCH_FRAME: i32 = -9999;

/// Captured foot pose of one lock
#[derive(Debug, Clone, Copy, PartialEq)]
struct LockRule {
    pos: Vec3,
    q: Quat,
    knee_dir: Option<Vec3>,
    knee_pos: Vec3,
}

/// Accumulated goal of one chain
#[derive(Debug, Clone, Copy)]
struct ChainResult {
    target: Option<usize>,
    weight: f32,
    pos: Vec3,
    q: Quat,
}

/// IK rules, targets and locks of one animated instance
#[derive(Debug, Clone)]
pub struct IkContext {
    settings: IkSettings,
    root: Affine3A,
    frame_counter: i32,
    time: f32,
    chain_rules: Vec<Vec<IkContextRule>>,
    targets: Vec<IkTarget>,
    locks: Vec<Option<LockRule>>,
    lock_transforms: BoneTransforms,
    transforms: BoneTransforms,
}

impl Default for IkContext {
    fn default() -> Self {
        Self::new(IkSettings::default())
    }
}

impl IkContext {
    /// Create an empty context
    pub fn new(settings: IkSettings) -> Self {
        Self {
            settings,
            root: Affine3A::IDENTITY,
            frame_counter: -1,
            time: -1.0,
            chain_rules: Vec::new(),
            targets: Vec::new(),
            locks: Vec::new(),
            lock_transforms: BoneTransforms::new(0),
            transforms: BoneTransforms::new(0),
        }
    }

    pub fn settings(&self) -> &IkSettings {
        &self.settings
    }

    /// Start a new frame
    ///
    /// Drops all accumulated rules. Targets are allocated the first time
    /// the asset has chains and then persist across frames.
    pub fn init(&mut self, setup: &BoneSetup, frame: &FrameInput) {
        let asset = setup.asset();
        let chains = asset.ik_chains().len();

        self.chain_rules.clear();
        self.chain_rules.resize_with(chains, Vec::new);

        if chains == 0 {
            self.targets.clear();
        } else if self.targets.is_empty() {
            self.targets
                .resize_with(self.settings.target_capacity, IkTarget::default);
            self.clear_targets();
        }

        let bone_count = asset.bone_count();
        if self.transforms.len() != bone_count {
            self.transforms = BoneTransforms::new(bone_count);
            self.lock_transforms = BoneTransforms::new(bone_count);
        }

        self.root = frame.root();
        self.frame_counter = frame.frame_counter;
        self.time = frame.time;
    }

    /// Root transform of the current frame
    pub fn root(&self) -> Affine3A {
        self.root
    }

    pub fn frame_counter(&self) -> i32 {
        self.frame_counter
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Rules accumulated for `chain` this frame
    pub fn chain_rules(&self, chain: usize) -> &[IkContextRule] {
        self.chain_rules.get(chain).map_or(&[], Vec::as_slice)
    }

    pub fn targets(&self) -> &[IkTarget] {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut [IkTarget] {
        &mut self.targets
    }

    pub fn target(&self, index: usize) -> Option<&IkTarget> {
        self.targets.get(index)
    }

    pub fn target_mut(&mut self, index: usize) -> Option<&mut IkTarget> {
        self.targets.get_mut(index)
    }

    /// World transforms computed by the last update or solve
    pub fn transforms(&self) -> &BoneTransforms {
        &self.transforms
    }

    /// Invalidate every latch
    pub fn clear_targets(&mut self) {
        for target in &mut self.targets {
            target.latch_frame = CLEARED_LATCH_FRAME;
        }
    }

    /// Collect the IK rules of sequence `seq` at `cycle`, blended in at
    /// `weight`
    pub fn add_dependencies(&mut self, setup: &BoneSetup, seq: usize, cycle: f32, weight: f32) {
        let asset = setup.asset();
        if asset.ik_chains().is_empty() {
            return;
        }
        let Some(desc) = asset.sequence(seq) else {
            return;
        };
        if !desc.flags.contains(SequenceFlags::IK_RULES) {
            return;
        }

        let weight = weight.clamp(0.0, 1.0);

        let cycle = if desc.flags.contains(SequenceFlags::REALTIME) {
            let cycle = self.time * setup.local_cps(seq);
            cycle - cycle.trunc()
        } else if !(0.0..1.0).contains(&cycle) {
            if desc.flags.contains(SequenceFlags::LOOPING) {
                let cycle = cycle - cycle.trunc();
                if cycle < 0.0 { cycle + 1.0 } else { cycle }
            } else {
                cycle.clamp(0.0, 0.9999)
            }
        } else {
            cycle
        };

        let anims = setup.local_seq_anims(seq);
        let rule_count = asset.anim(anims[0].0).map_or(0, |a| a.ik_rules.len());

        for i in 0..rule_count {
            let Some(mut rule) = setup.ik_sequence_error(cycle, i, &anims) else {
                continue;
            };

            let Some(chain) = asset.ik_chain(rule.chain) else {
                continue;
            };
            if !setup.is_bone_used(chain.foot()) {
                continue;
            }
            if rule.bone.is_some_and(|bone| !setup.is_bone_used(bone)) {
                continue;
            }

            let Some(rules) = self.chain_rules.get_mut(rule.chain) else {
                continue;
            };

            rule.rule_weight = weight;
            if rule.rule_weight * rule.weight > 0.999 && rule.kind != IkRuleType::Unlatch {
                rules.clear();
                if rule.kind == IkRuleType::Release {
                    continue;
                }
            }

            rules.push(rule);
        }
    }

    /// Capture the foot pose of every lock of sequence `seq`
    pub fn add_sequence_locks(&mut self, setup: &BoneSetup, seq: usize, pose: &Pose) {
        let asset = setup.asset();
        let chains = asset
            .sequence(seq)
            .map(|desc| desc.ik_locks.iter().map(|lock| lock.chain).collect::<Vec<_>>())
            .unwrap_or_default();
        self.capture_locks(setup, pose, &chains);
    }

    /// Pull the feet of sequence `seq`'s locks back to their captured pose
    pub fn solve_sequence_locks(&mut self, setup: &BoneSetup, seq: usize, pose: &mut Pose) {
        let Some(desc) = setup.asset().sequence(seq) else {
            return;
        };
        for (i, lock) in desc.ik_locks.iter().enumerate() {
            self.solve_lock(setup, lock, i, pose);
        }
    }

    /// Capture the foot pose of every autoplay lock
    pub fn add_autoplay_locks(&mut self, setup: &BoneSetup, pose: &Pose) {
        let chains: Vec<usize> = setup
            .asset()
            .autoplay_locks()
            .iter()
            .map(|lock| lock.chain)
            .collect();
        self.capture_locks(setup, pose, &chains);
    }

    /// Restore the autoplay locks
    pub fn solve_autoplay_locks(&mut self, setup: &BoneSetup, pose: &mut Pose) {
        for (i, lock) in setup.asset().autoplay_locks().iter().enumerate() {
            self.solve_lock(setup, lock, i, pose);
        }
    }

    /// Capture the foot pose of every chain
    pub fn add_all_locks(&mut self, setup: &BoneSetup, pose: &Pose) {
        let chains: Vec<usize> = (0..setup.asset().ik_chains().len()).collect();
        self.capture_locks(setup, pose, &chains);
    }

    /// Pin every chain captured by [`IkContext::add_all_locks`] fully
    /// back in place
    pub fn solve_all_locks(&mut self, setup: &BoneSetup, pose: &mut Pose) {
        for i in 0..self.locks.len() {
            self.solve_lock(setup, &IkLockDef::new(i, 1.0, 0.0), i, pose);
        }
    }

    fn capture_locks(&mut self, setup: &BoneSetup, pose: &Pose, chains: &[usize]) {
        self.locks.clear();
        if setup.asset().ik_chains().is_empty() {
            return;
        }

        for &chain in chains {
            let lock = setup
                .asset()
                .ik_chain(chain)
                .and_then(|def| self.capture_lock(setup, pose, def));
            self.locks.push(lock);
        }
    }

    fn capture_lock(&mut self, setup: &BoneSetup, pose: &Pose, chain: &IkChainDef) -> Option<LockRule> {
        let foot = chain.foot();
        if !setup.is_bone_used(foot) {
            return None;
        }

        self.lock_transforms
            .rebuild_chain(setup.asset().bones(), &self.root, pose, foot);
        let world = self.lock_transforms.get(foot);
        let knee_dir = chain
            .knee_dir()
            .map(|dir| self.lock_transforms.get(chain.hip()).transform_vector3(dir));

        Some(LockRule {
            pos: matrix_origin(&world),
            q: matrix_quaternion(&world),
            knee_dir,
            knee_pos: matrix_origin(&self.lock_transforms.get(chain.knee())),
        })
    }

    fn solve_lock(&mut self, setup: &BoneSetup, lock: &IkLockDef, index: usize, pose: &mut Pose) {
        let Some(Some(rule)) = self.locks.get(index).copied() else {
            return;
        };
        let asset = setup.asset();
        let Some(chain) = asset.ik_chain(lock.chain) else {
            return;
        };
        let (hip, knee, foot) = (chain.hip(), chain.knee(), chain.foot());
        if !setup.is_bone_used(foot) || foot >= pose.len() {
            return;
        }

        let bones = asset.bones();
        self.lock_transforms.rebuild_chain(bones, &self.root, pose, foot);

        let current = matrix_origin(&self.lock_transforms.get(foot));
        let goal = current.lerp(rule.pos, lock.pos_weight);

        let solved = match rule.knee_dir {
            Some(dir) => solve_ik_with_knee(
                &mut self.lock_transforms,
                hip,
                knee,
                foot,
                goal,
                rule.knee_pos,
                dir,
            ),
            None => solve_chain(chain, goal, &mut self.lock_transforms),
        };
        if !solved {
            debug!("IK lock on chain '{}' could not be solved", chain.name);
        }

        let foot_pos = matrix_origin(&self.lock_transforms.get(foot));
        self.lock_transforms.set(foot, bone_matrix(foot_pos, rule.q));

        let Some(animated_q) = pose.q.get(foot).copied() else {
            return;
        };
        self.lock_transforms.solve_bone(bones, &self.root, foot, pose);
        if let Some(q) = pose.q.get_mut(foot) {
            *q = quaternion_slerp(*q, animated_q, lock.local_q_weight);
        }
        self.lock_transforms.solve_bone(bones, &self.root, knee, pose);
        self.lock_transforms.solve_bone(bones, &self.root, hip, pose);
    }

    /// Resolve ground, attachment, release and unlatch rules into the
    /// targets and update their latches
    ///
    /// Callers may adjust the targets afterwards (world traces, owners)
    /// before [`IkContext::solve_dependencies`].
    pub fn update_targets(&mut self, setup: &BoneSetup, pose: &Pose) {
        let asset = setup.asset();
        let bones = asset.bones();

        self.transforms.reset();
        for target in &mut self.targets {
            target.begin_frame();
        }

        self.auto_ik_release(setup);

        let capacity = self.targets.len();
        for rule in self.chain_rules.iter().flatten() {
            match rule.kind {
                IkRuleType::Ground | IkRuleType::Attachment => {
                    let Some(target) = self.targets.get_mut(rule.slot) else {
                        warn!(
                            "IK rule on chain {} uses target slot {}, context has {}",
                            rule.chain, rule.slot, capacity
                        );
                        continue;
                    };
                    place_target(target, rule);
                }
                IkRuleType::Unlatch | IkRuleType::Release => {
                    let Some(target) = self.targets.get_mut(rule.slot) else {
                        continue;
                    };
                    target.est.latched = if rule.latched > 0.0 {
                        0.0
                    } else {
                        target.est.latched.min(1.0 - rule.weight)
                    };
                    if rule.kind == IkRuleType::Release {
                        target.est.weight *= 1.0 - rule.weight * rule.rule_weight;
                    }
                }
                IkRuleType::SelfRelative | IkRuleType::World => {}
            }
        }

        let frame = self.frame_counter;
        for target in &mut self.targets {
            if target.est.weight <= 0.0 {
                continue;
            }
            let Some(chain) = target.chain.and_then(|c| asset.ik_chain(c)) else {
                continue;
            };
            let (hip, knee, foot) = (chain.hip(), chain.knee(), chain.foot());

            self.transforms.build_chain(bones, &self.root, pose, foot);
            let footpad = self.transforms.get(foot)
                * bone_matrix(target.offset.pos, target.offset.q).inverse();

            let needs_latch = target.est.latched == 1.0;

            if frame < 0 || target.latch_frame < frame - 1 || target.latch_frame > frame {
                if target.latch.held().is_some() {
                    debug!("Dropping stale IK latch on chain '{}'", chain.name);
                }
                target.latch = LatchState::Unlatched;
            }
            target.latch_frame = frame;

            let ideal_pos = matrix_origin(&footpad);
            let ideal_q = matrix_quaternion(&footpad);
            target.ideal = (ideal_pos, ideal_q);
            target.est.pos = ideal_pos;
            target.est.q = ideal_q;

            let latched = target.est.latched;
            let influence = target.latch.influence();
            target.latch = match target.latch {
                LatchState::Latched(mut held) | LatchState::Releasing { mut held, .. } => {
                    if latched == 1.0 {
                        held.delta_pos = held.pos - target.est.pos;
                        held.delta_q = quaternion_sm(-1.0, target.est.q, held.q);
                        target.est.pos = held.pos;
                        target.est.q = held.q;
                        LatchState::Latched(held)
                    } else if latched > 0.0 {
                        if latched < influence {
                            let decay = 1.0 - (influence - latched) / influence;
                            held.delta_q = quaternion_scale(held.delta_q, decay);
                            held.delta_pos *= decay;
                        }
                        target.est.pos += held.delta_pos;
                        target.est.q = quaternion_ma(target.est.q, 1.0, held.delta_q);
                        held.pos = target.est.pos;
                        held.q = target.est.q;
                        LatchState::Releasing { ramp: latched, held }
                    } else {
                        LatchState::Unlatched
                    }
                }
                LatchState::Unlatched | LatchState::Latching => {
                    if needs_latch {
                        LatchState::Latching
                    } else {
                        LatchState::Unlatched
                    }
                }
            };

            let p1 = matrix_origin(&self.transforms.get(hip));
            let p2 = matrix_origin(&self.transforms.get(knee));
            let p3 = matrix_origin(&self.transforms.get(foot));
            let d1 = (p2 - p1).length();
            let d2 = (p3 - p2).length();

            if let Some(held) = target.latch.held() {
                let threshold = self.settings.latch_error_threshold;
                let d4 = (p3 + held.delta_pos - p1).length();
                if (d4 < (d1 - d2).abs() || d4 * 0.95 > d1 + d2) && target.est.latched > threshold {
                    target.error.time = self.time;
                }
                if target.est.latched > threshold
                    && held.delta_q.w.abs() * 2.0 - 1.0 < self.settings.max_ankle_cos
                {
                    target.error.time = self.time;
                }
            }

            let to_foot = target.est.pos - p1;
            let dir = to_foot.normalize_or_zero();
            target.trace = TargetTrace {
                hip_to_foot: to_foot.length(),
                hip_to_knee: d1,
                knee_to_foot: d2,
                hip: p1,
                knee: p2,
                closest: p1 + dir * ((d1 - d2).abs() * 1.01),
                farthest: p1 + dir * (d1 + d2) * 0.99,
                lowest: p1 - Vec3::Z * (d1 + d2) * 0.99,
            };
        }
    }

    /// Ramp release rules in and out for targets that reported errors
    fn auto_ik_release(&mut self, setup: &BoneSetup) {
        let asset = setup.asset();
        let settings = self.settings;
        let now = self.time;

        for (i, target) in self.targets.iter_mut().enumerate() {
            let dt = now - target.error.time;
            if !target.error.in_error && dt >= settings.release_hold {
                continue;
            }

            if !target.error.in_error {
                target.error.ramp = 0.0;
                target.error.ramp_time = target.error.time;
                target.error.in_error = true;
            }

            let ft = now - target.error.ramp_time;
            target.error.ramp = if dt < settings.error_window {
                (target.error.ramp + ft * settings.release_rate).min(1.0)
            } else {
                (target.error.ramp - ft * settings.release_rate).max(0.0)
            };

            if target.error.ramp > 0.0 {
                match target.chain.and_then(|c| asset.ik_chain(c).map(|def| (c, def))) {
                    Some((chain, def)) if setup.is_bone_used(def.foot()) => {
                        let weight = simple_spline(target.error.ramp);
                        let rule = IkContextRule {
                            kind: IkRuleType::Release,
                            chain,
                            slot: i,
                            weight,
                            rule_weight: 1.0,
                            latched: if dt < settings.error_window { 0.0 } else { weight },
                            ..IkContextRule::default()
                        };
                        if let Some(rules) = self.chain_rules.get_mut(chain) {
                            rules.push(rule);
                        }
                    }
                    Some(_) => {
                        target.error.in_error = false;
                        continue;
                    }
                    None => debug!(
                        "Auto IK release on target {} of '{}' has no valid chain ({:?})",
                        i,
                        asset.name(),
                        target.chain
                    ),
                }
            } else {
                target.error.in_error = false;
            }

            target.error.ramp_time = now;
        }
    }

    /// Blend every rule into a goal per chain and solve the chains,
    /// writing the result back into `pose`
    pub fn solve_dependencies(&mut self, setup: &BoneSetup, pose: &mut Pose) {
        let asset = setup.asset();
        let bones = asset.bones();
        let root = self.root;

        self.transforms.reset();

        let mut results: Vec<Option<ChainResult>> = Vec::with_capacity(asset.ik_chains().len());
        for chain in asset.ik_chains() {
            let foot = chain.foot();
            if !setup.is_bone_used(foot) {
                results.push(None);
                continue;
            }
            self.transforms.build_chain(bones, &root, pose, foot);
            let world = self.transforms.get(foot);
            results.push(Some(ChainResult {
                target: None,
                weight: 0.0,
                pos: matrix_origin(&world),
                q: matrix_quaternion(&world),
            }));
        }

        for rule in self.chain_rules.iter().flatten() {
            let Some(Some(result)) = results.get_mut(rule.chain) else {
                continue;
            };
            result.target = None;

            let goal = match rule.kind {
                IkRuleType::SelfRelative => {
                    let base = match rule.bone {
                        Some(bone) => {
                            self.transforms.build_chain(bones, &root, pose, bone);
                            self.transforms.get(bone)
                        }
                        None => root,
                    };
                    let w = rule.weight * rule.rule_weight;
                    result.weight = result.weight * (1.0 - w) + w;
                    Some((base * bone_matrix(rule.pos, rule.q), w))
                }
                IkRuleType::Release => asset.ik_chain(rule.chain).map(|chain| {
                    let foot = chain.foot();
                    self.transforms.build_chain(bones, &root, pose, foot);
                    (self.transforms.get(foot), rule.weight * rule.rule_weight)
                }),
                IkRuleType::World
                | IkRuleType::Ground
                | IkRuleType::Attachment
                | IkRuleType::Unlatch => None,
            };

            if let Some((world, w)) = goal {
                result.pos = result.pos.lerp(matrix_origin(&world), w);
                result.q = quaternion_slerp(result.q, matrix_quaternion(&world), w);
            }
        }

        for (i, target) in self.targets.iter_mut().enumerate() {
            if target.est.weight > 0.0 {
                if let Some(Some(result)) = target.chain.and_then(|c| results.get_mut(c)) {
                    let world = target.foot_world();
                    result.weight = target.est.weight;
                    result.pos = result.pos.lerp(matrix_origin(&world), result.weight);
                    result.q = quaternion_slerp(result.q, matrix_quaternion(&world), result.weight);
                    result.target = Some(i);
                }
            }

            if target.latch.needs_commit() {
                let (pos, q) = (target.est.pos, target.est.q);
                let held = match target.latch {
                    LatchState::Latched(held) => LatchedPose { pos, q, ..held },
                    _ => LatchedPose::new(pos, q),
                };
                target.latch = LatchState::Latched(held);
            }
        }

        let decay = self.settings.failure_decay;
        for (chain, result) in asset.ik_chains().iter().zip(&results) {
            let Some(result) = result else {
                continue;
            };
            if result.weight <= 0.0 {
                continue;
            }

            let (hip, knee, foot) = (chain.hip(), chain.knee(), chain.foot());
            if solve_chain(chain, result.pos, &mut self.transforms) {
                let foot_pos = matrix_origin(&self.transforms.get(foot));
                self.transforms.set(foot, bone_matrix(foot_pos, result.q));

                self.transforms.solve_bone(bones, &root, foot, pose);
                self.transforms.solve_bone(bones, &root, knee, pose);
                self.transforms.solve_bone(bones, &root, hip, pose);
            } else if let Some(target) = result.target.and_then(|t| self.targets.get_mut(t)) {
                debug!("IK chain '{}' failed to solve, decaying its latch", chain.name);
                if let Some(held) = target.latch.held_mut() {
                    held.delta_q = quaternion_scale(held.delta_q, decay);
                    held.delta_pos *= decay;
                }
            }
        }
    }
}

/// Blend a ground or attachment rule into its target
fn place_target(target: &mut IkTarget, rule: &IkContextRule) {
    target.chain = Some(rule.chain);
    target.kind = rule.kind;
    target.offset.attachment = if rule.kind == IkRuleType::Attachment {
        rule.attachment
    } else {
        0
    };

    let est = &mut target.est;
    if rule.rule_weight == 1.0 || est.weight == 0.0 {
        target.offset.q = rule.q;
        target.offset.pos = rule.pos;
        est.height = rule.height;
        est.floor = rule.floor;
        est.radius = rule.radius;
        est.latched = rule.latched * rule.rule_weight;
        est.release = rule.release;
        est.weight = rule.weight * rule.rule_weight;
    } else {
        let t = rule.rule_weight;
        target.offset.q = quaternion_slerp(target.offset.q, rule.q, t);
        target.offset.pos = target.offset.pos.lerp(rule.pos, t);
        est.height += (rule.height - est.height) * t;
        est.floor += (rule.floor - est.floor) * t;
        est.radius += (rule.radius - est.radius) * t;
        est.latched = est.latched.min(rule.latched);
        est.release += (rule.release - est.release) * t;
        est.weight += (rule.weight - est.weight) * t;
    }

    if rule.kind == IkRuleType::Ground {
        if let Some(held) = target.latch.held_mut() {
            held.delta_pos.z = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anim_value::AnimValueStream;
    use crate::asset::{
        AnimDesc, AnimFlags, BoneChannels, BoneDef, IkErrorTrack, IkRuleDef, SequenceDef,
        StudioAsset, StudioAssetBuilder,
    };
    use std::sync::Arc;

    /// Hip at z=20, knee at (6,0,12), foot at (0,0,4)
    fn leg_builder(rule: IkRuleDef) -> StudioAssetBuilder {
        StudioAssetBuilder::new("legs")
            .bone(BoneDef::new("root", None, Vec3::ZERO, Vec3::ZERO))
            .bone(BoneDef::new("hip", Some(0), Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO))
            .bone(BoneDef::new("knee", Some(1), Vec3::new(6.0, 0.0, -8.0), Vec3::ZERO))
            .bone(BoneDef::new("foot", Some(2), Vec3::new(-6.0, 0.0, -8.0), Vec3::ZERO))
            .ik_chain(IkChainDef::new("leg", 1, 2, 3))
            .anim(
                AnimDesc::new("walk", 11, 10.0)
                    .with_flags(AnimFlags::LOOPING)
                    .with_ik_rules(vec![rule]),
            )
            .sequence(
                SequenceDef::new("walk", 0)
                    .with_flags(SequenceFlags::LOOPING | SequenceFlags::IK_RULES)
                    .with_ik_lock(IkLockDef::new(0, 1.0, 0.0)),
            )
    }

    fn error_track(pos: Vec3) -> IkErrorTrack {
        let stream = |v: f32| AnimValueStream::from_frames(&[v as i16; 11]);
        IkErrorTrack {
            scale: [1.0; 6],
            channels: BoneChannels::default()
                .with_position(0, stream(pos.x))
                .with_position(1, stream(pos.y))
                .with_position(2, stream(pos.z)),
        }
    }

    fn setup_for(asset: StudioAsset) -> (BoneSetup, Pose) {
        let setup = BoneSetup::new(Arc::new(asset));
        let mut pose = Pose::new(setup.asset().bone_count());
        setup.init_pose(&mut pose);
        (setup, pose)
    }

    fn ground_setup() -> (BoneSetup, Pose) {
        let rule = IkRuleDef::new(0, IkRuleType::Ground).with_error(0, error_track(Vec3::ZERO));
        setup_for(leg_builder(rule).build().unwrap())
    }

    fn world_foot(setup: &BoneSetup, pose: &Pose, frame: &FrameInput) -> Vec3 {
        let mut transforms = BoneTransforms::new(pose.len());
        transforms.build_all(setup.asset().bones(), &frame.root(), pose);
        matrix_origin(&transforms.get(3))
    }

    fn step(ik: &mut IkContext, setup: &BoneSetup, pose: &mut Pose, frame: &FrameInput) {
        setup.init_pose(pose);
        ik.init(setup, frame);
        ik.add_dependencies(setup, 0, 0.5, 1.0);
        ik.update_targets(setup, pose);
        ik.solve_dependencies(setup, pose);
    }

    #[test]
    fn test_init_allocates_targets_once() {
        let (setup, _) = ground_setup();
        let mut ik = IkContext::new(IkSettings::default().with_target_capacity(4));
        ik.init(&setup, &FrameInput::default());
        assert_eq!(ik.targets().len(), 4);
        assert_eq!(ik.target(0).unwrap().latch_frame, CLEARED_LATCH_FRAME);

        ik.target_mut(0).unwrap().latch_frame = 3;
        ik.init(&setup, &FrameInput::default());
        assert_eq!(ik.target(0).unwrap().latch_frame, 3);

        let bare = StudioAssetBuilder::new("bare")
            .bone(BoneDef::new("root", None, Vec3::ZERO, Vec3::ZERO))
            .build()
            .unwrap();
        let (bare, _) = setup_for(bare);
        ik.init(&bare, &FrameInput::default());
        assert!(ik.targets().is_empty());
    }

    #[test]
    fn test_self_relative_rule_moves_foot() {
        let goal = Vec3::new(4.0, 0.0, 6.0);
        let rule = IkRuleDef::new(0, IkRuleType::SelfRelative).with_error(0, error_track(goal));
        let (setup, mut pose) = setup_for(leg_builder(rule).build().unwrap());

        let frame = FrameInput::default();
        let mut ik = IkContext::default();
        ik.init(&setup, &frame);
        ik.add_dependencies(&setup, 0, 0.5, 1.0);
        assert_eq!(ik.chain_rules(0).len(), 1);

        ik.update_targets(&setup, &pose);
        ik.solve_dependencies(&setup, &mut pose);

        assert!((world_foot(&setup, &pose, &frame) - goal).length() < 1e-3);
    }

    #[test]
    fn test_rules_skipped_without_flag() {
        let rule = IkRuleDef::new(0, IkRuleType::SelfRelative).with_error(0, error_track(Vec3::ONE));
        let asset = leg_builder(rule)
            .sequence(SequenceDef::new("plain", 0))
            .build()
            .unwrap();
        let (setup, _) = setup_for(asset);

        let mut ik = IkContext::default();
        ik.init(&setup, &FrameInput::default());
        ik.add_dependencies(&setup, 1, 0.5, 1.0);
        assert!(ik.chain_rules(0).is_empty());
    }

    #[test]
    fn test_ground_latch_holds_foot() {
        let (setup, mut pose) = ground_setup();
        let mut ik = IkContext::default();

        let first = FrameInput::new(0.0, 1, Vec3::ZERO, Quat::IDENTITY);
        step(&mut ik, &setup, &mut pose, &first);
        let target = ik.target(0).unwrap();
        assert!(matches!(target.latch(), LatchState::Latched(_)));
        assert!((world_foot(&setup, &pose, &first) - Vec3::new(0.0, 0.0, 4.0)).length() < 1e-3);

        let second = FrameInput::new(0.1, 2, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);
        step(&mut ik, &setup, &mut pose, &second);
        let held = *ik.target(0).unwrap().latch().held().unwrap();
        assert!((held.delta_pos - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-4);
        assert!((world_foot(&setup, &pose, &second) - Vec3::new(0.0, 0.0, 4.0)).length() < 1e-3);
    }

    #[test]
    fn test_stale_latch_is_dropped() {
        let (setup, mut pose) = ground_setup();
        let mut ik = IkContext::default();

        step(&mut ik, &setup, &mut pose, &FrameInput::new(0.0, 1, Vec3::ZERO, Quat::IDENTITY));

        let later = FrameInput::new(1.0, 9, Vec3::new(1.0, 0.0, 0.0), Quat::IDENTITY);
        step(&mut ik, &setup, &mut pose, &later);
        let held = ik.target(0).unwrap().latch().held().unwrap();
        assert_eq!(held.delta_pos, Vec3::ZERO);
        assert!((world_foot(&setup, &pose, &later) - Vec3::new(1.0, 0.0, 4.0)).length() < 1e-3);
    }

    #[test]
    fn test_trace_geometry() {
        let (setup, pose) = ground_setup();
        let mut ik = IkContext::default();
        ik.init(&setup, &FrameInput::default());
        ik.add_dependencies(&setup, 0, 0.5, 1.0);
        ik.update_targets(&setup, &pose);

        let trace = ik.target(0).unwrap().trace();
        assert!((trace.hip_to_knee - 10.0).abs() < 1e-4);
        assert!((trace.knee_to_foot - 10.0).abs() < 1e-4);
        assert!((trace.hip_to_foot - 16.0).abs() < 1e-4);
        assert!((trace.lowest - Vec3::new(0.0, 0.0, 0.2)).length() < 1e-3);
        assert!((trace.farthest - Vec3::new(0.0, 0.0, 0.2)).length() < 1e-3);
    }

    #[test]
    fn test_auto_release_ramps_out_and_back() {
        let (setup, mut pose) = ground_setup();
        let mut ik = IkContext::default();

        step(&mut ik, &setup, &mut pose, &FrameInput::new(0.0, 1, Vec3::ZERO, Quat::IDENTITY));
        ik.target_mut(0).unwrap().report_error(0.0);

        let mut weights = Vec::new();
        let mut latches = Vec::new();
        for (tick, time) in [0.1, 0.2, 0.3, 0.45].into_iter().enumerate() {
            let frame = FrameInput::new(time, tick as i32 + 2, Vec3::ZERO, Quat::IDENTITY);
            step(&mut ik, &setup, &mut pose, &frame);
            weights.push(ik.target(0).unwrap().estimate().weight);
            latches.push(*ik.target(0).unwrap().latch());
        }

        assert!((weights[0] - 0.648).abs() < 1e-3);
        assert!((weights[1] - 0.104).abs() < 1e-3);
        assert!((weights[2] - 0.648).abs() < 1e-3);
        assert!((weights[3] - 1.0).abs() < 1e-6);
        assert!(!ik.target(0).unwrap().in_error());

        // The held pose decays while the error is fresh, then is dropped
        assert!(matches!(latches[0], LatchState::Releasing { .. }));
        assert!(matches!(latches[1], LatchState::Releasing { .. }));
        assert_eq!(latches[2], LatchState::Unlatched);
        assert!(latches[2].held().is_none());
        // Once released the ground rule latches afresh
        assert!(matches!(latches[3], LatchState::Latched(_)));
    }

    #[test]
    fn test_sequence_lock_restores_foot() {
        let rule = IkRuleDef::new(0, IkRuleType::Release);
        let (setup, mut pose) = setup_for(leg_builder(rule).build().unwrap());
        let frame = FrameInput::default();

        let mut ik = IkContext::default();
        ik.init(&setup, &frame);
        ik.add_sequence_locks(&setup, 0, &pose);

        pose.q[1] = Quat::from_rotation_y(0.3);
        assert!((world_foot(&setup, &pose, &frame) - Vec3::new(0.0, 0.0, 4.0)).length() > 1.0);

        ik.solve_sequence_locks(&setup, 0, &mut pose);
        assert!((world_foot(&setup, &pose, &frame) - Vec3::new(0.0, 0.0, 4.0)).length() < 1e-3);
    }

    #[test]
    fn test_all_locks_cover_every_chain() {
        let (setup, mut pose) = ground_setup();
        let frame = FrameInput::default();

        let mut ik = IkContext::default();
        ik.init(&setup, &frame);
        ik.add_all_locks(&setup, &pose);
        assert_eq!(ik.locks.len(), 1);

        pose.q[2] = Quat::from_rotation_y(-0.2);
        ik.solve_all_locks(&setup, &mut pose);
        assert!((world_foot(&setup, &pose, &frame) - Vec3::new(0.0, 0.0, 4.0)).length() < 1e-3);
    }

    #[test]
    fn test_locks_skip_poses_missing_the_chain() {
        let (setup, full) = ground_setup();
        let frame = FrameInput::default();
        let mut ik = IkContext::default();
        ik.init(&setup, &frame);

        let mut short = Pose::new(2);
        setup.init_pose(&mut short);
        let before = short.clone();
        ik.add_all_locks(&setup, &short);
        ik.solve_all_locks(&setup, &mut short);
        assert_eq!(short, before);

        // Positions cover the foot, orientations do not
        let mut ragged = full.clone();
        ragged.q.truncate(3);
        let before = ragged.clone();
        ik.add_all_locks(&setup, &full);
        ik.solve_all_locks(&setup, &mut ragged);
        assert_eq!(ragged.q, before.q);
    }
}
