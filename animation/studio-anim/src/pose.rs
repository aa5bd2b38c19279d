//! Local bone poses and bone-to-world transforms
//!
//! A [`Pose`] holds one local position and orientation per bone.
//! [`BoneTransforms`] turns a pose into bone-to-world matrices on demand,
//! walking parent chains iteratively and remembering which bones are
//! already resolved for the current frame.

use glam::{Affine3A, Quat, Vec3};

use crate::asset::BoneDef;
use crate::math::{bone_matrix, matrix_origin, matrix_quaternion};

/// Per-bone local positions and orientations
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    /// Local positions
    pub pos: Vec<Vec3>,
    /// Local orientations
    pub q: Vec<Quat>,
}

impl Pose {
    /// Identity pose for `bone_count` bones
    pub fn new(bone_count: usize) -> Self {
        Self {
            pos: vec![Vec3::ZERO; bone_count],
            q: vec![Quat::IDENTITY; bone_count],
        }
    }

    /// Number of bones
    pub fn len(&self) -> usize {
        self.pos.len()
    }

    /// Whether the pose has no bones
    pub fn is_empty(&self) -> bool {
        self.pos.is_empty()
    }

    /// Copy bone `bone` from `other`
    pub fn copy_bone(&mut self, other: &Self, bone: usize) {
        if let (Some(pos), Some(q), Some(dst_pos), Some(dst_q)) = (
            other.pos.get(bone),
            other.q.get(bone),
            self.pos.get_mut(bone),
            self.q.get_mut(bone),
        ) {
            *dst_pos = *pos;
            *dst_q = *q;
        }
    }

    /// Local matrix of `bone`
    pub fn local_matrix(&self, bone: usize) -> Affine3A {
        bone_matrix(
            self.pos.get(bone).copied().unwrap_or(Vec3::ZERO),
            self.q.get(bone).copied().unwrap_or(Quat::IDENTITY),
        )
    }
}

/// Bone-to-world matrices with a per-bone "resolved" flag
#[derive(Debug, Clone)]
pub struct BoneTransforms {
    world: Vec<Affine3A>,
    computed: Vec<bool>,
    chain: Vec<usize>,
}

impl BoneTransforms {
    /// Identity transforms for `bone_count` bones, none resolved
    pub fn new(bone_count: usize) -> Self {
        Self {
            world: vec![Affine3A::IDENTITY; bone_count],
            computed: vec![false; bone_count],
            chain: Vec::with_capacity(16),
        }
    }

    /// Number of bones
    pub fn len(&self) -> usize {
        self.world.len()
    }

    /// Whether there are no bones
    pub fn is_empty(&self) -> bool {
        self.world.is_empty()
    }

    /// Forget all resolved bones
    pub fn reset(&mut self) {
        self.computed.fill(false);
    }

    /// Whether `bone` is resolved
    pub fn is_computed(&self, bone: usize) -> bool {
        self.computed.get(bone).copied().unwrap_or(false)
    }

    /// World matrix of `bone`, identity if out of range
    pub fn get(&self, bone: usize) -> Affine3A {
        self.world.get(bone).copied().unwrap_or(Affine3A::IDENTITY)
    }

    /// Overwrite the world matrix of `bone` and mark it resolved
    pub fn set(&mut self, bone: usize, matrix: Affine3A) {
        if bone < self.world.len() {
            self.world[bone] = matrix;
            self.computed[bone] = true;
        }
    }

    /// Mutable world matrix of `bone`
    pub fn get_mut(&mut self, bone: usize) -> Option<&mut Affine3A> {
        self.world.get_mut(bone)
    }

    /// All world matrices
    pub fn matrices(&self) -> &[Affine3A] {
        &self.world
    }

    /// Parent world matrix, or `root` for top-level bones
    pub fn parent_world(&self, bones: &[BoneDef], root: &Affine3A, bone: usize) -> Affine3A {
        match bones.get(bone).and_then(|b| b.parent) {
            Some(parent) => self.get(parent),
            None => *root,
        }
    }

    /// Resolve `bone` and its ancestors, reusing already resolved ones
    pub fn build_chain(&mut self, bones: &[BoneDef], root: &Affine3A, pose: &Pose, bone: usize) {
        self.resolve(bones, root, pose, bone, true);
    }

    /// Recompute `bone` and every ancestor from `pose`
    pub fn rebuild_chain(&mut self, bones: &[BoneDef], root: &Affine3A, pose: &Pose, bone: usize) {
        self.resolve(bones, root, pose, bone, false);
    }

    /// Resolve every bone in parent-first order
    pub fn build_all(&mut self, bones: &[BoneDef], root: &Affine3A, pose: &Pose) {
        for (i, bone) in bones.iter().enumerate().take(self.world.len()) {
            let parent = bone.parent.map_or(*root, |p| self.world[p]);
            self.world[i] = parent * pose.local_matrix(i);
            self.computed[i] = true;
        }
    }

    fn resolve(&mut self, bones: &[BoneDef], root: &Affine3A, pose: &Pose, bone: usize, reuse: bool) {
        if bone >= self.world.len() {
            return;
        }

        self.chain.clear();
        let mut current = Some(bone);
        while let Some(b) = current {
            if reuse && self.computed[b] {
                break;
            }
            self.chain.push(b);
            current = bones.get(b).and_then(|def| def.parent);
        }

        while let Some(b) = self.chain.pop() {
            let parent = self.parent_world(bones, root, b);
            self.world[b] = parent * pose.local_matrix(b);
            self.computed[b] = true;
        }
    }

    /// Write the local transform of `bone` that reproduces its world matrix
    pub fn solve_bone(&self, bones: &[BoneDef], root: &Affine3A, bone: usize, pose: &mut Pose) {
        if bone >= pose.len() {
            return;
        }
        let parent = self.parent_world(bones, root, bone);
        let local = parent.inverse() * self.get(bone);
        if let (Some(q), Some(pos)) = (pose.q.get_mut(bone), pose.pos.get_mut(bone)) {
            *q = matrix_quaternion(&local);
            *pos = matrix_origin(&local);
        }
    }
}
