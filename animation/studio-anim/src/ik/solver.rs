//! Analytic two-bone solver
//!
//! Places the knee of a hip/knee/foot chain so the foot reaches a target
//! while the knee bends toward a hint direction. The bone matrices are
//! then re-aimed along the new segments, keeping each bone's twist as
//! close to the animated one as the new direction allows.

use glam::{Affine3A, Vec3, Vec3A};

use crate::asset::IkChainDef;
use crate::math::{matrix_column, matrix_origin, set_matrix_origin};
use crate::pose::BoneTransforms;

/// Fraction of the full leg length the foot may reach
pub const KNEE_MAX_EPSILON: f32 = 0.9998;

/// Knee position relative to the hip for segment lengths `l1` and `l2`
///
/// `foot` is the foot position relative to the hip and `knee_dir` the
/// direction the knee should bend toward. Returns `None` when the foot is
/// out of reach or too close to the hip for the lengths.
pub fn solve_two_bone(l1: f32, l2: f32, foot: Vec3, knee_dir: Vec3) -> Option<Vec3> {
    let r = foot.length();
    if r <= f32::EPSILON {
        return None;
    }

    // Orthonormal frame: x along the foot, y toward the knee hint
    let x = foot / r;
    let mut y = (knee_dir - x * knee_dir.dot(x)).normalize_or_zero();
    if y == Vec3::ZERO {
        y = x.any_orthonormal_vector();
    }

    let d = (r + (l1 * l1 - l2 * l2) / r) * 0.5;
    if !(d > r - l2 && d < l1) {
        return None;
    }
    let e = (l1 * l1 - d * d).max(0.0).sqrt();

    Some(x * d + y * e)
}

/// Re-aim the x axis of `m` along `align_to`, keeping its z axis as close
/// to its current direction as possible
pub fn align_ik_matrix(m: &mut Affine3A, align_to: Vec3) {
    let x = align_to.normalize_or_zero();
    if x == Vec3::ZERO {
        return;
    }

    let mut y = matrix_column(m, 2).cross(x).normalize_or_zero();
    if y == Vec3::ZERO {
        y = matrix_column(m, 1);
        y = (y - x * y.dot(x)).normalize_or_zero();
        if y == Vec3::ZERO {
            y = x.any_orthonormal_vector();
        }
    }
    let z = x.cross(y);

    m.matrix3.x_axis = Vec3A::from(x);
    m.matrix3.y_axis = Vec3A::from(y);
    m.matrix3.z_axis = Vec3A::from(z);
}

/// Solve the chain `hip -> knee -> foot` so the foot reaches `target_foot`,
/// bending toward `knee_dir` from `knee_pos`
///
/// The target is clamped to just inside full extension and pushed out to a
/// minimum distance from the hip. On success the hip and knee matrices are
/// re-aimed and the knee and foot origins moved; the foot orientation is
/// left to the caller.
pub fn solve_ik_with_knee(
    transforms: &mut BoneTransforms,
    hip: usize,
    knee: usize,
    foot: usize,
    target_foot: Vec3,
    knee_pos: Vec3,
    knee_dir: Vec3,
) -> bool {
    let world_hip = matrix_origin(&transforms.get(hip));
    let world_knee = matrix_origin(&transforms.get(knee));
    let world_foot = matrix_origin(&transforms.get(foot));

    let l1 = (world_knee - world_hip).length();
    let l2 = (world_foot - world_knee).length();

    let reach = (l1 + l2).max((target_foot - world_hip).length() - l1.min(l2)) * 100.0;
    let ik_target_knee = (knee_pos - world_hip) + knee_dir * reach;

    let mut ik_foot = target_foot - world_hip;
    let max_reach = (l1 + l2) * KNEE_MAX_EPSILON;
    if ik_foot.length() > max_reach {
        ik_foot = ik_foot.normalize_or_zero() * max_reach;
    }

    let min_dist = ((l1 - l2).abs() * 1.15).max(l1.min(l2) * 0.15);
    if ik_foot.length() < min_dist {
        ik_foot = (world_foot - world_hip).normalize_or_zero() * min_dist;
    }

    let Some(ik_knee) = solve_two_bone(l1, l2, ik_foot, ik_target_knee) else {
        return false;
    };

    if let Some(m) = transforms.get_mut(hip) {
        align_ik_matrix(m, ik_knee);
    }
    if let Some(m) = transforms.get_mut(knee) {
        align_ik_matrix(m, ik_foot - ik_knee);
        set_matrix_origin(m, world_hip + ik_knee);
    }
    if let Some(m) = transforms.get_mut(foot) {
        set_matrix_origin(m, world_hip + ik_foot);
    }

    true
}

/// Solve the chain without a knee hint, bending the knee the way it is
/// already bent
///
/// Fails when the leg is already at full extension, where the bend
/// direction is undefined.
pub fn solve_ik_no_knee(
    transforms: &mut BoneTransforms,
    hip: usize,
    knee: usize,
    foot: usize,
    target_foot: Vec3,
) -> bool {
    let world_hip = matrix_origin(&transforms.get(hip));
    let world_knee = matrix_origin(&transforms.get(knee));
    let world_foot = matrix_origin(&transforms.get(foot));

    let l1 = (world_knee - world_hip).length();
    let l2 = (world_foot - world_knee).length();
    let l3 = (world_foot - world_hip).length();

    if l3 > (l1 + l2) * KNEE_MAX_EPSILON || l3 <= f32::EPSILON {
        return false;
    }

    let half = (world_foot - world_hip) * (l1 / l3);
    let knee_dir = ((world_knee - world_hip) - half).normalize_or_zero();

    solve_ik_with_knee(transforms, hip, knee, foot, target_foot, world_knee, knee_dir)
}

/// Solve `chain` toward `target_foot`, using its knee hint when it has one
pub fn solve_chain(chain: &IkChainDef, target_foot: Vec3, transforms: &mut BoneTransforms) -> bool {
    let (hip, knee, foot) = (chain.hip(), chain.knee(), chain.foot());

    match chain.knee_dir() {
        Some(dir) => {
            let knee_dir = transforms.get(hip).transform_vector3(dir);
            let knee_pos = matrix_origin(&transforms.get(knee));
            solve_ik_with_knee(transforms, hip, knee, foot, target_foot, knee_pos, knee_dir)
        }
        None => solve_ik_no_knee(transforms, hip, knee, foot, target_foot),
    }
}
