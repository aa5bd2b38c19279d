//! Root motion extraction
//!
//! Movement animations carry a table of [`MovementSegment`]s: each segment
//! ends at a frame and moves along a fixed direction with a speed that
//! changes linearly from `v0` to `v1`, so the distance covered inside a
//! segment is quadratic in time. The functions here integrate that table to
//! answer where the root is at a cycle, how fast it moves, how far it moved
//! between two cycles, and which cycle covers a given distance.
//!
//! Sequences blend the answers of their sub-animations with the same
//! weights used for the pose. Legacy sequences without a table fall back to
//! a constant linear movement vector.

use glam::Vec3;

use crate::asset::{AnimDesc, MovementSegment};
use crate::math::{solve_quadratic, vector_yaw_rotate};
use crate::setup::BoneSetup;

/// Root position and yaw (degrees)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RootMotion {
    pub position: Vec3,
    pub yaw: f32,
}

impl RootMotion {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self { position, yaw }
    }
}

fn last_frame(anim: &AnimDesc) -> f32 {
    anim.frame_count.saturating_sub(1) as f32
}

/// Fraction of `segment` covered at `frame`, given the previous end frame
fn segment_fraction(segment: &MovementSegment, prev: f32, frame: f32) -> f32 {
    let span = segment.end_frame - prev;
    if span > 0.0 { (frame - prev) / span } else { 1.0 }
}

/// Root motion at `cycle` relative to the start of the first loop
///
/// Cycles outside `[0, 1]` add the motion of every whole loop skipped.
/// Returns `None` for animations without a movement table.
pub fn anim_position(anim: &AnimDesc, cycle: f32) -> Option<RootMotion> {
    let last = anim.movements.last()?;

    let loops = if cycle > 1.0 {
        cycle.trunc()
    } else if cycle < 0.0 {
        cycle.trunc() - 1.0
    } else {
        0.0
    };
    let frame = (cycle - loops) * last_frame(anim);

    let mut prev = 0.0;
    let mut motion = RootMotion::default();

    for segment in &anim.movements {
        if segment.end_frame >= frame {
            let f = segment_fraction(segment, prev, frame);
            let d = segment.v0 * f + 0.5 * (segment.v1 - segment.v0) * f * f;

            motion.position += segment.vector * d;
            motion.yaw = motion.yaw * (1.0 - f) + segment.angle * f;

            if loops != 0.0 {
                motion.position += last.position * loops;
                motion.yaw += last.angle * loops;
            }
            return Some(motion);
        }

        prev = segment.end_frame;
        motion = RootMotion::new(segment.position, segment.angle);
    }

    None
}

/// Root velocity in units per second at `cycle`
pub fn anim_velocity(anim: &AnimDesc, cycle: f32) -> Option<Vec3> {
    let last = last_frame(anim);
    let mut frame = cycle * last;
    if last > 0.0 && !(0.0..=last).contains(&frame) {
        frame = frame.rem_euclid(last);
    }

    let mut prev = 0.0;
    for segment in &anim.movements {
        if segment.end_frame >= frame {
            let span = segment.end_frame - prev;
            if span <= 0.0 {
                return Some(Vec3::ZERO);
            }
            let f = (frame - prev) / span;
            let speed = (segment.v0 * (1.0 - f) + segment.v1 * f) * anim.fps / span;
            return Some(segment.vector * speed);
        }
        prev = segment.end_frame;
    }

    None
}

/// Root motion from `from` to `to`, expressed in the yaw frame at `from`
pub fn anim_movement(anim: &AnimDesc, from: f32, to: f32) -> Option<RootMotion> {
    if anim.movements.is_empty() {
        return None;
    }
    let start = anim_position(anim, from).unwrap_or_default();
    let end = anim_position(anim, to).unwrap_or_default();

    Some(RootMotion::new(
        vector_yaw_rotate(end.position - start.position, -start.yaw),
        end.yaw - start.yaw,
    ))
}

/// Cycle at which the root has covered `distance`
///
/// Returns 0 for non-positive distances and 1 when the table ends first.
pub fn find_anim_distance(anim: &AnimDesc, distance: f32) -> f32 {
    if distance <= 0.0 {
        return 0.0;
    }

    let last = last_frame(anim);
    let mut remaining = distance;
    let mut prev = 0.0;

    for segment in &anim.movements {
        let covered = (segment.v0 + segment.v1) * 0.5;
        if covered >= remaining {
            return match solve_quadratic(0.5 * (segment.v1 - segment.v0), segment.v0, -remaining) {
                Some((root, _)) if last > 0.0 => (prev + root * (segment.end_frame - prev)) / last,
                _ => 0.0,
            };
        }
        remaining -= covered;
        prev = segment.end_frame;
    }

    1.0
}

impl BoneSetup {
    /// Blended root motion of sequence `seq` from `from` to `to`
    ///
    /// Yaw is the weight average over the animations that move, or the
    /// plain weighted sum with [`BlendSettings::legacy_movement_angle_sum`].
    /// Sequences without movement tables use their linear movement vector.
    ///
    /// [`BlendSettings::legacy_movement_angle_sum`]: crate::settings::BlendSettings::legacy_movement_angle_sum
    pub fn seq_movement(&self, seq: usize, from: f32, to: f32) -> Option<RootMotion> {
        let desc = self.asset.sequence(seq)?;

        let mut motion = RootMotion::default();
        let mut yaw_weight = 0.0;
        let mut found = false;

        for (anim, weight) in self.local_seq_anims(seq) {
            if weight == 0.0 {
                continue;
            }
            let Some(local) = self.asset.anim(anim).and_then(|a| anim_movement(a, from, to)) else {
                continue;
            };
            found = true;
            motion.position += local.position * weight;
            motion.yaw += local.yaw * weight;
            yaw_weight += weight;
        }

        if found {
            if !self.settings.legacy_movement_angle_sum && yaw_weight > 0.0 {
                motion.yaw /= yaw_weight;
            }
            return Some(motion);
        }

        if desc.linear_movement != Vec3::ZERO {
            return Some(RootMotion::new(desc.linear_movement * (to - from), 0.0));
        }

        None
    }

    /// Blended root velocity of sequence `seq` at `cycle`
    pub fn seq_velocity(&self, seq: usize, cycle: f32) -> Option<Vec3> {
        let mut velocity = Vec3::ZERO;
        let mut found = false;

        for (anim, weight) in self.local_seq_anims(seq) {
            if weight == 0.0 {
                continue;
            }
            if let Some(local) = self.asset.anim(anim).and_then(|a| anim_velocity(a, cycle)) {
                velocity += local * weight;
                found = true;
            }
        }

        found.then_some(velocity)
    }

    /// Blended cycle at which sequence `seq` has covered `distance`
    pub fn find_seq_distance(&self, seq: usize, distance: f32) -> f32 {
        self.local_seq_anims(seq)
            .iter()
            .filter(|(_, weight)| *weight != 0.0)
            .filter_map(|&(anim, weight)| {
                self.asset
                    .anim(anim)
                    .map(|a| find_anim_distance(a, distance) * weight)
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{BoneDef, PoseParamDesc, SequenceDef, StudioAssetBuilder};
    use crate::settings::BlendSettings;
    use std::sync::Arc;
    use test_case::test_case;

    /// 11 frames at 10 fps, one segment moving 10 units along +X while
    /// turning 90 degrees
    fn walk() -> AnimDesc {
        AnimDesc::new("walk", 11, 10.0).with_movements(vec![MovementSegment {
            end_frame: 10.0,
            v0: 10.0,
            v1: 10.0,
            vector: Vec3::X,
            position: Vec3::new(10.0, 0.0, 0.0),
            angle: 90.0,
        }])
    }

    /// Two segments: accelerate from 0 to 10, then hold 10
    fn sprint() -> AnimDesc {
        AnimDesc::new("sprint", 11, 10.0).with_movements(vec![
            MovementSegment {
                end_frame: 4.0,
                v0: 0.0,
                v1: 10.0,
                vector: Vec3::X,
                position: Vec3::new(5.0, 0.0, 0.0),
                angle: 0.0,
            },
            MovementSegment {
                end_frame: 10.0,
                v0: 10.0,
                v1: 10.0,
                vector: Vec3::X,
                position: Vec3::new(15.0, 0.0, 0.0),
                angle: 0.0,
            },
        ])
    }

    #[test_case(0.5 => (5.0, 45.0); "half cycle")]
    #[test_case(1.0 => (10.0, 90.0); "end of cycle")]
    #[test_case(1.5 => (15.0, 135.0); "second loop")]
    #[test_case(-0.5 => (-5.0, -45.0); "negative cycle")]
    fn test_anim_position(cycle: f32) -> (f32, f32) {
        let motion = anim_position(&walk(), cycle).unwrap();
        (
            (motion.position.x * 1000.0).round() / 1000.0,
            (motion.yaw * 1000.0).round() / 1000.0,
        )
    }

    #[test]
    fn test_accelerating_segment() {
        let motion = anim_position(&sprint(), 0.2).unwrap();
        // Half of the first segment: d = 0.5 * 10 * 0.25
        assert!((motion.position.x - 1.25).abs() < 1e-5);
    }

    #[test]
    fn test_no_movement_table() {
        let anim = AnimDesc::new("idle", 11, 10.0);
        assert!(anim_position(&anim, 0.5).is_none());
        assert!(anim_velocity(&anim, 0.5).is_none());
        assert!(anim_movement(&anim, 0.0, 1.0).is_none());
        assert!((find_anim_distance(&anim, 5.0) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_anim_velocity() {
        let velocity = anim_velocity(&walk(), 0.3).unwrap();
        assert!((velocity - Vec3::new(10.0, 0.0, 0.0)).length() < 1e-5);

        let wrapped = anim_velocity(&sprint(), 1.2).unwrap();
        let direct = anim_velocity(&sprint(), 0.2).unwrap();
        assert!((wrapped - direct).length() < 1e-4);
    }

    #[test]
    fn test_anim_movement_rotates_into_start_frame() {
        let motion = anim_movement(&walk(), 0.5, 1.0).unwrap();
        let expected = 5.0 * std::f32::consts::FRAC_1_SQRT_2;
        assert!((motion.position - Vec3::new(expected, -expected, 0.0)).length() < 1e-4);
        assert!((motion.yaw - 45.0).abs() < 1e-4);
    }

    #[test]
    fn test_find_anim_distance() {
        let anim = walk();
        assert_eq!(find_anim_distance(&anim, 0.0), 0.0);
        assert!((find_anim_distance(&anim, 5.0) - 0.5).abs() < 1e-5);
        assert!((find_anim_distance(&anim, 50.0) - 1.0).abs() < f32::EPSILON);

        // 5 units in the first segment, 5 more halfway through the second
        let cycle = find_anim_distance(&sprint(), 10.0);
        assert!((cycle - 0.7).abs() < 1e-5);
    }

    fn blended(settings: BlendSettings) -> BoneSetup {
        let still = AnimDesc::new("still", 11, 10.0).with_movements(vec![MovementSegment {
            end_frame: 10.0,
            vector: Vec3::X,
            ..Default::default()
        }]);
        let asset = StudioAssetBuilder::new("mover")
            .bone(BoneDef::new("root", None, Vec3::ZERO, Vec3::ZERO))
            .pose_param(PoseParamDesc::new("speed", 0.0, 1.0))
            .anim(still)
            .anim(walk())
            .anim(AnimDesc::new("idle", 11, 10.0))
            .sequence(SequenceDef::new("run", 0).with_blend_grid(vec![0, 1], 2, 1).with_blend_axis(0, 0, 0.0, 1.0))
            .sequence(SequenceDef::new("shuffle", 2).with_linear_movement(Vec3::new(0.0, 8.0, 0.0)))
            .build()
            .unwrap();
        BoneSetup::new(Arc::new(asset)).with_settings(settings)
    }

    #[test]
    fn test_seq_movement_blends() {
        let mut setup = blended(BlendSettings::default());
        setup.set_pose_param_value(0, 0.5);

        let motion = setup.seq_movement(0, 0.0, 1.0).unwrap();
        assert!((motion.position.x - 5.0).abs() < 1e-4);
        assert!((motion.yaw - 45.0).abs() < 1e-4);

        let velocity = setup.seq_velocity(0, 0.5).unwrap();
        assert!((velocity.x - 5.0).abs() < 1e-4);

        let cycle = setup.find_seq_distance(0, 5.0);
        assert!((cycle - 0.5 * 0.5 - 0.5 * 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_linear_movement_fallback() {
        let setup = blended(BlendSettings::default());
        let motion = setup.seq_movement(1, 0.25, 0.75).unwrap();
        assert_eq!(motion.position, Vec3::new(0.0, 4.0, 0.0));
        assert!(setup.seq_velocity(1, 0.5).is_none());
    }
}
