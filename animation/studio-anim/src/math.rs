//! Quaternion and bone-matrix helpers
//!
//! The blending code relies on a few quaternion operations whose exact
//! numeric behaviour matters for asset compatibility (sign alignment, the
//! perpendicular fallback in slerp, scaled accumulation for additive poses).
//! They are implemented here on top of [`glam`] types instead of glam's own
//! `slerp`/`lerp`, which make different choices near the degenerate cases.
//!
//! Euler angles follow the Z-up convention: `x` is roll, `y` is pitch and
//! `z` is yaw.

use glam::{Affine3A, Quat, Vec3, Vec3A, Vec4};

/// Threshold below which `1 ± cos(omega)` is treated as degenerate in slerp
const SLERP_EPSILON: f32 = 1e-6;

/// Convert roll/pitch/yaw radians (`x`, `y`, `z`) to a quaternion
pub fn angle_quaternion(angles: Vec3) -> Quat {
    let (sy, cy) = (angles.z * 0.5).sin_cos();
    let (sp, cp) = (angles.y * 0.5).sin_cos();
    let (sr, cr) = (angles.x * 0.5).sin_cos();

    let srxcp = sr * cp;
    let crxsp = cr * sp;
    let crxcp = cr * cp;
    let srxsp = sr * sp;

    Quat::from_xyzw(
        srxcp * cy - crxsp * sy,
        crxsp * cy + srxcp * sy,
        crxcp * sy - srxsp * cy,
        crxcp * cy + srxsp * sy,
    )
}

/// Convert pitch/yaw/roll degrees (`x`, `y`, `z`) to a quaternion
pub fn angles_to_quat(pitch_yaw_roll: Vec3) -> Quat {
    angle_quaternion(Vec3::new(
        pitch_yaw_roll.z.to_radians(),
        pitch_yaw_roll.x.to_radians(),
        pitch_yaw_roll.y.to_radians(),
    ))
}

/// Quaternion rotating `degrees` around a unit `axis`
pub fn axis_angle_quaternion(axis: Vec3, degrees: f32) -> Quat {
    let (sa, ca) = (degrees.to_radians() * 0.5).sin_cos();
    Quat::from_xyzw(axis.x * sa, axis.y * sa, axis.z * sa, ca)
}

/// Flip `q` into the same hemisphere as `p`
pub fn quaternion_align(p: Quat, q: Quat) -> Quat {
    let pv = Vec4::from(p);
    let qv = Vec4::from(q);
    let a = (pv - qv).length_squared();
    let b = (pv + qv).length_squared();
    if a > b { -q } else { q }
}

/// Normalize `q`, leaving a zero quaternion untouched
pub fn quaternion_normalize(q: Quat) -> Quat {
    let len = Vec4::from(q).length();
    if len > 0.0 { q * (1.0 / len) } else { q }
}

/// Spherical interpolation after aligning `q` to `p`
pub fn quaternion_slerp(p: Quat, q: Quat, t: f32) -> Quat {
    quaternion_slerp_no_align(p, quaternion_align(p, q), t)
}

/// Spherical interpolation without hemisphere alignment
///
/// Nearly identical inputs fall back to a linear mix. Opposite inputs
/// rotate through a quaternion perpendicular to `q`.
pub fn quaternion_slerp_no_align(p: Quat, q: Quat, t: f32) -> Quat {
    let cosom = p.dot(q);

    if 1.0 + cosom > SLERP_EPSILON {
        let (sclp, sclq) = if 1.0 - cosom > SLERP_EPSILON {
            let omega = cosom.acos();
            let sinom = omega.sin();
            (
                ((1.0 - t) * omega).sin() / sinom,
                (t * omega).sin() / sinom,
            )
        } else {
            (1.0 - t, t)
        };
        Quat::from_vec4(Vec4::from(p) * sclp + Vec4::from(q) * sclq)
    } else {
        let perp = Quat::from_xyzw(-q.y, q.x, -q.w, q.z);
        let sclp = ((1.0 - t) * 0.5 * std::f32::consts::PI).sin();
        let sclq = (t * 0.5 * std::f32::consts::PI).sin();
        Quat::from_xyzw(
            sclp * p.x + sclq * perp.x,
            sclp * p.y + sclq * perp.y,
            sclp * p.z + sclq * perp.z,
            perp.w,
        )
    }
}

/// Normalized linear blend after aligning `q` to `p`
pub fn quaternion_blend(p: Quat, q: Quat, t: f32) -> Quat {
    quaternion_blend_no_align(p, quaternion_align(p, q), t)
}

/// Normalized linear blend without hemisphere alignment
pub fn quaternion_blend_no_align(p: Quat, q: Quat, t: f32) -> Quat {
    let sclp = 1.0 - t;
    quaternion_normalize(Quat::from_vec4(Vec4::from(p) * sclp + Vec4::from(q) * t))
}

/// Scale the rotation angle of `p` by `t`
pub fn quaternion_scale(p: Quat, t: f32) -> Quat {
    let sinom = Vec3::new(p.x, p.y, p.z).length().min(1.0);
    let sinsom = (sinom.asin() * t).sin();
    let scale = sinsom / (sinom + f32::EPSILON);

    let w = (1.0 - sinsom * sinsom).max(0.0).sqrt();
    Quat::from_xyzw(
        p.x * scale,
        p.y * scale,
        p.z * scale,
        if p.w < 0.0 { -w } else { w },
    )
}

/// Hamilton product `p * q` with `q` aligned to `p` first
pub fn quaternion_mult(p: Quat, q: Quat) -> Quat {
    p * quaternion_align(p, q)
}

/// `normalize(scale(p, s) * q)`: apply a scaled delta before `q`
pub fn quaternion_sm(s: f32, p: Quat, q: Quat) -> Quat {
    quaternion_normalize(quaternion_mult(quaternion_scale(p, s), q))
}

/// `normalize(p * scale(q, s))`: apply a scaled delta after `p`
pub fn quaternion_ma(p: Quat, s: f32, q: Quat) -> Quat {
    quaternion_normalize(quaternion_mult(p, quaternion_scale(q, s)))
}

/// Unnormalized `p + s * align(p, q)`
pub fn quaternion_accumulate(p: Quat, s: f32, q: Quat) -> Quat {
    let q = quaternion_align(p, q);
    Quat::from_vec4(Vec4::from(p) + Vec4::from(q) * s)
}

/// Hermite S-curve `3v^2 - 2v^3`
pub fn simple_spline(value: f32) -> f32 {
    let sq = value * value;
    3.0 * sq - 2.0 * sq * value
}

/// Real roots of `a x^2 + b x + c`, larger root first
///
/// A linear equation returns its single root twice.
pub fn solve_quadratic(a: f32, b: f32, c: f32) -> Option<(f32, f32)> {
    if a == 0.0 {
        if b != 0.0 {
            let root = -c / b;
            return Some((root, root));
        }
        return None;
    }

    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let disc = disc.sqrt();
    Some(((-b + disc) / (2.0 * a), (-b - disc) / (2.0 * a)))
}

/// Rotate `v` around +Z by `yaw_degrees`
pub fn vector_yaw_rotate(v: Vec3, yaw_degrees: f32) -> Vec3 {
    let (sy, cy) = yaw_degrees.to_radians().sin_cos();
    Vec3::new(v.x * cy - v.y * sy, v.x * sy + v.y * cy, v.z)
}

/// Build a bone matrix from a local position and orientation
pub fn bone_matrix(pos: Vec3, q: Quat) -> Affine3A {
    Affine3A::from_rotation_translation(q, pos)
}

/// Orientation encoded in the rotation part of `m`
pub fn matrix_quaternion(m: &Affine3A) -> Quat {
    Quat::from_mat3a(&m.matrix3)
}

/// Translation part of `m`
pub fn matrix_origin(m: &Affine3A) -> Vec3 {
    Vec3::from(m.translation)
}

/// Build a matrix from explicit forward/left/up columns and an origin
pub fn matrix_from_columns(x: Vec3, y: Vec3, z: Vec3, origin: Vec3) -> Affine3A {
    Affine3A::from_cols(x.into(), y.into(), z.into(), origin.into())
}

/// Column `axis` (0..3) of the rotation part of `m`
pub fn matrix_column(m: &Affine3A, axis: usize) -> Vec3 {
    let col: Vec3A = match axis {
        0 => m.matrix3.x_axis,
        1 => m.matrix3.y_axis,
        _ => m.matrix3.z_axis,
    };
    Vec3::from(col)
}

/// Replace the translation of `m`
pub fn set_matrix_origin(m: &mut Affine3A, origin: Vec3) {
    m.translation = origin.into();
}
