//! Sequence evaluation and pose parameter blending

use std::sync::Arc;

use glam::{Quat, Vec3};
use test_case::test_case;

use crate::common::*;
use studio_anim::anim_value::AnimValueStream;
use studio_anim::asset::{
    AnimDesc, BoneChannels, BoneDef, PoseParamDesc, SequenceDef, StudioAsset, StudioAssetBuilder,
};
use studio_anim::{BoneFlags, BoneSetup, FrameInput, Pose};

#[test]
fn test_idle_matches_bind_pose() {
    let (mut setup, mut pose) = biped_setup();
    let bind = pose.clone();

    setup.accumulate_pose(None, &mut pose, IDLE, 0.3, 1.0);

    for (bone, (pos, q)) in pose.pos.iter().zip(&pose.q).enumerate() {
        assert!((*pos - bind.pos[bone]).length() < 1e-5, "bone {bone} moved");
        assert!(q.abs_diff_eq(bind.q[bone], 1e-5), "bone {bone} turned");
    }
    let frame = FrameInput::default();
    assert!((world_origin(&setup, &pose, &frame, FOOT) - FOOT_REST).length() < 1e-4);
}

#[test_case(0.0 => 20.0; "standing")]
#[test_case(0.5 => 18.0; "halfway")]
#[test_case(1.0 => 16.0; "crouched")]
#[test_case(2.0 => 16.0; "clamped")]
fn test_pose_parameter_blend(value: f32) -> f32 {
    let (mut setup, mut pose) = biped_setup();
    setup.set_pose_param_value(0, value);

    setup.accumulate_pose(None, &mut pose, CROUCH_BLEND, 0.0, 1.0);
    (pose.pos[HIP].z * 1000.0).round() / 1000.0
}

#[test]
fn test_partial_weight_blends_toward_sequence() {
    let (mut setup, mut pose) = biped_setup();

    setup.accumulate_pose(None, &mut pose, CROUCH, 0.0, 0.25);
    assert!((pose.pos[HIP].z - 19.0).abs() < 1e-4);

    // Weights are clamped to [0, 1]
    setup.accumulate_pose(None, &mut pose, CROUCH, 0.0, 3.0);
    assert!((pose.pos[HIP].z - 16.0).abs() < 1e-4);
}

#[test]
fn test_bone_mask_skips_unused_bones() {
    let (mut setup, mut pose) = biped_setup();
    setup.set_bone_mask(BoneFlags::USED_BY_HITBOX);

    setup.accumulate_pose(None, &mut pose, CROUCH, 0.0, 1.0);
    assert!((pose.pos[HIP].z - 20.0).abs() < 1e-4);
}

#[test]
fn test_root_transform_moves_world_pose() {
    let (mut setup, mut pose) = biped_setup();
    setup.accumulate_pose(None, &mut pose, CROUCH, 0.0, 1.0);

    let frame = FrameInput::new(0.0, 1, Vec3::new(1.0, 2.0, 0.0), Quat::IDENTITY);
    let hip = world_origin(&setup, &pose, &frame, HIP);
    assert!((hip - Vec3::new(1.0, 2.0, 16.0)).length() < 1e-4);

    let turned = FrameInput::new(0.0, 1, Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
    let knee = world_origin(&setup, &pose, &turned, KNEE);
    assert!((knee - Vec3::new(0.0, 6.0, 8.0)).length() < 1e-4);
}

#[test]
fn test_out_of_range_sequence_is_ignored() {
    use pretty_assertions::assert_eq;

    let (mut setup, mut pose) = biped_setup();
    let bind = pose.clone();

    setup.accumulate_pose(None, &mut pose, 99, 0.5, 1.0);
    assert_eq!(pose, bind);
}

const FOUR_WAY: usize = 0;
const NINE_WAY: usize = 1;
const CORNER: usize = 2;

/// One bone; animation `i` holds it at x = 10 * i. Sequences: a legacy
/// 2x2 grid, a legacy 3x3 grid, then one single-animation sequence per
/// animation.
fn legacy_grid() -> Arc<StudioAsset> {
    let mut builder = StudioAssetBuilder::new("legacy")
        .bone(BoneDef::new("root", None, Vec3::ZERO, Vec3::ZERO))
        .pose_param(PoseParamDesc::new("blend_x", 0.0, 1.0))
        .pose_param(PoseParamDesc::new("blend_y", 0.0, 1.0));
    for i in 0..9_i16 {
        let channels =
            BoneChannels::default().with_position(0, AnimValueStream::from_frames(&[i * 10, i * 10]));
        builder = builder.anim(AnimDesc::new(format!("x{i}"), 2, 30.0).with_channels(vec![channels]));
    }
    builder = builder
        .sequence(SequenceDef::new("four_way", 0).with_blend_grid(vec![0, 1, 2, 3], 2, 2))
        .sequence(SequenceDef::new("nine_way", 0).with_blend_grid((0..9).collect(), 3, 3));
    for i in 0..9 {
        builder = builder.sequence(SequenceDef::new(format!("corner{i}"), i));
    }
    Arc::new(builder.build().expect("legacy grid should build"))
}

fn legacy_x(seq: usize, s0: f32, s1: f32) -> f32 {
    init_logging();
    let mut setup = BoneSetup::new(legacy_grid());
    let mut pose = Pose::new(1);
    setup.init_pose(&mut pose);
    setup.set_pose_parameters(&[s0, s1]);
    setup.accumulate_pose(None, &mut pose, seq, 0.0, 1.0);
    pose.pos[0].x
}

#[test]
fn test_legacy_four_way_without_second_axis_is_pairwise() {
    let asset = legacy_grid();
    let mut setup = BoneSetup::new(Arc::clone(&asset));

    let mut first = Pose::new(1);
    let mut second = Pose::new(1);
    setup.init_pose(&mut first);
    setup.init_pose(&mut second);
    setup.accumulate_pose(None, &mut first, CORNER, 0.0, 1.0);
    setup.accumulate_pose(None, &mut second, CORNER + 1, 0.0, 1.0);
    let desc = asset.sequence(FOUR_WAY).expect("four-way sequence");
    setup.blend_bones(&mut first, desc, &second, 0.3);

    let blended = legacy_x(FOUR_WAY, 0.3, 0.0);
    assert!((blended - first.pos[0].x).abs() < 1e-4);
    assert!((blended - 3.0).abs() < 1e-4);
}

#[test_case(0.3, 0.5 => 13.0; "both axes")]
#[test_case(1.0, 1.0 => 30.0; "far corner")]
#[test_case(0.0, 0.0 => 0.0; "near corner")]
fn test_legacy_four_way(s0: f32, s1: f32) -> f32 {
    (legacy_x(FOUR_WAY, s0, s1) * 1000.0).round() / 1000.0
}

// Quadrant corners sit at grid slots base, base + 1, base + 3, base + 4
#[test_case(0.25, 0.25 => 20.0; "low x low y")]
#[test_case(0.75, 0.3 => 51.0; "high x low y")]
#[test_case(0.2, 0.9 => 30.0; "low x high y")]
#[test_case(1.0, 1.0 => 80.0; "far corner")]
fn test_legacy_nine_way_quadrants(s0: f32, s1: f32) -> f32 {
    (legacy_x(NINE_WAY, s0, s1) * 1000.0).round() / 1000.0
}
