//! Procedural bones
//!
//! A bone flagged [`BoneFlags::ALWAYS_PROCEDURAL`] ignores its animated
//! pose and is computed from already resolved world transforms instead.
//! Rules only read bones earlier in the hierarchy; an aim target that
//! resolves later reads the identity matrix.

use glam::{Affine3A, Quat, Vec3, Vec4};

use crate::asset::{AimAt, AxisInterp, BoneFlags, ProceduralRule, QuatInterp, StudioAsset};
use crate::math::{
    axis_angle_quaternion, bone_matrix, matrix_column, matrix_origin, matrix_quaternion,
    quaternion_align, quaternion_mult, quaternion_normalize, quaternion_slerp,
};
use crate::pose::BoneTransforms;

/// Dot product distance from 1 below which two vectors count as parallel
const PARALLEL_EPSILON: f32 = 1e-4;

/// Minimum summed trigger weight for a quaternion interpolation to apply
const MIN_TRIGGER_WEIGHT: f32 = 0.001;

/// Compute bone `bone` procedurally if it has a rule
///
/// Returns `true` when the world matrix of `bone` was written.
pub fn apply_procedural_bone(
    asset: &StudioAsset,
    bone: usize,
    root: &Affine3A,
    transforms: &mut BoneTransforms,
) -> bool {
    if !asset.has_bone_info() {
        return false;
    }
    let Some(def) = asset.bone(bone) else {
        return false;
    };
    if !def.flags.contains(BoneFlags::ALWAYS_PROCEDURAL) {
        return false;
    }

    let parent = transforms.parent_world(asset.bones(), root, bone);
    let result = match &def.procedural {
        Some(ProceduralRule::AxisInterp(rule)) => axis_interp(asset, rule, &parent, root, transforms),
        Some(ProceduralRule::QuatInterp(rule)) => quat_interp(asset, rule, &parent, root, transforms),
        Some(ProceduralRule::AimAtBone(rule)) => {
            let target = matrix_origin(&transforms.get(rule.aim));
            Some(aim_at(rule, def.rest_quat, target, transforms))
        }
        Some(ProceduralRule::AimAtAttachment(rule)) => {
            let target = asset.attachments().get(rule.aim).map_or(Vec3::ZERO, |att| {
                transforms.get(att.bone).transform_point3(att.origin)
            });
            Some(aim_at(rule, def.rest_quat, target, transforms))
        }
        None => None,
    };

    match result {
        Some(matrix) => {
            transforms.set(bone, matrix);
            true
        }
        None => false,
    }
}

/// Control bone's orientation relative to its parent
fn control_local(
    asset: &StudioAsset,
    control: usize,
    root: &Affine3A,
    transforms: &BoneTransforms,
) -> Affine3A {
    let world = transforms.get(control);
    match asset.bone(control).and_then(|b| b.parent) {
        Some(_) => transforms.parent_world(asset.bones(), root, control).inverse() * world,
        None => world,
    }
}

fn axis_interp(
    asset: &StudioAsset,
    rule: &AxisInterp,
    parent: &Affine3A,
    root: &Affine3A,
    transforms: &BoneTransforms,
) -> Option<Affine3A> {
    let control = transforms.get(rule.control);
    let mut axis = matrix_column(&control, rule.axis);
    if asset.bone(rule.control).and_then(|b| b.parent).is_some() {
        let control_parent = transforms.parent_world(asset.bones(), root, rule.control);
        axis = control_parent.matrix3.transpose() * axis;
    }

    let octant = |value: f32, positive: usize| {
        if value >= 0.0 {
            (positive, value)
        } else {
            (positive + 1, -value)
        }
    };
    let (i1, a1) = octant(axis.x, 0);
    let (i2, a2) = octant(axis.y, 2);
    let (i3, a3) = octant(axis.z, 4);

    if a1 + a2 <= 0.0 {
        return None;
    }

    let t = 1.0 / (a1 + a2 + a3);
    let tmp = quaternion_slerp(rule.quat[i2], rule.quat[i1], a1 / (a1 + a2));
    let q = quaternion_slerp(tmp, rule.quat[i3], a3 * t);
    let pos = rule.pos[i1] * (a1 * t) + rule.pos[i2] * (a2 * t) + rule.pos[i3] * (a3 * t);

    Some(*parent * bone_matrix(pos, q))
}

fn quat_interp(
    asset: &StudioAsset,
    rule: &QuatInterp,
    parent: &Affine3A,
    root: &Affine3A,
    transforms: &BoneTransforms,
) -> Option<Affine3A> {
    asset.bone(rule.control).and_then(|b| b.parent)?;
    let src = matrix_quaternion(&control_local(asset, rule.control, root, transforms));

    let weights: Vec<f32> = rule
        .triggers
        .iter()
        .map(|trigger| {
            let dot = trigger.trigger.dot(src).abs().min(1.0);
            (1.0 - 2.0 * dot.acos() * trigger.inv_tolerance).max(0.0)
        })
        .collect();
    let total: f32 = weights.iter().sum();
    if total <= MIN_TRIGGER_WEIGHT {
        return None;
    }

    let scale = 1.0 / total;
    let mut q = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
    let mut pos = Vec3::ZERO;
    for (trigger, weight) in rule.triggers.iter().zip(&weights) {
        if *weight == 0.0 {
            continue;
        }
        let s = weight * scale;
        let aligned = quaternion_align(trigger.quat, q);
        q = Quat::from_vec4(Vec4::from(aligned) + Vec4::from(trigger.quat) * s);
        pos += trigger.pos * s;
    }

    Some(*parent * bone_matrix(pos, quaternion_normalize(q)))
}

/// Any unit vector perpendicular to `v`
fn perpendicular(v: Vec3) -> Vec3 {
    let other = if v.x.abs() < 0.9 { Vec3::X } else { Vec3::Z };
    v.cross(other).normalize_or_zero()
}

/// Rotation taking unit `from` onto unit `to`
fn rotation_between(from: Vec3, to: Vec3) -> Quat {
    let dot = from.dot(to).clamp(-1.0, 1.0);
    let mut axis = from.cross(to).normalize_or_zero();
    if axis == Vec3::ZERO {
        if dot > 0.0 {
            return Quat::IDENTITY;
        }
        axis = perpendicular(from);
    }
    axis_angle_quaternion(axis, dot.acos().to_degrees())
}

fn aim_at(rule: &AimAt, rest_quat: Quat, target: Vec3, transforms: &BoneTransforms) -> Affine3A {
    let parent_space = transforms.get(rule.parent);
    let aim_world = parent_space.transform_point3(rule.base_pos);
    let bone_to_world = parent_space * bone_matrix(rule.base_pos, rest_quat);

    let aim = (target - aim_world).normalize_or_zero();
    let aim_rot = rotation_between(rule.aim_vector, aim);

    if 1.0 - rule.up_vector.dot(rule.aim_vector).abs() > PARALLEL_EPSILON {
        let up = aim_rot * rule.up_vector;
        let projected_up = (up - aim * aim.dot(up)).normalize_or_zero();

        let parent_up = bone_to_world.transform_vector3(rule.up_vector);
        let projected_parent_up = (parent_up - aim * aim.dot(parent_up)).normalize_or_zero();

        let up_rot = if 1.0 - projected_up.dot(projected_parent_up).abs() > PARALLEL_EPSILON {
            rotation_between(projected_up, projected_parent_up)
        } else {
            Quat::IDENTITY
        };

        bone_matrix(aim_world, quaternion_mult(up_rot, aim_rot))
    } else {
        bone_matrix(aim_world, aim_rot)
    }
}
