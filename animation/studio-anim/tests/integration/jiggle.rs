//! Jiggle bones in the world-transform pass

use std::sync::Arc;

use glam::{Quat, Vec3};
use pretty_assertions::assert_eq;

use crate::common::*;
use studio_anim::math::{matrix_column, matrix_origin};
use studio_anim::{BoneSetup, FrameInput, JiggleBones, JiggleSettings, Pose};

fn frame(time: f32, root: Vec3) -> FrameInput {
    FrameInput::new(time, 0, root, Quat::IDENTITY)
}

fn tail_forward(setup: &BoneSetup, pose: &Pose, frame: &FrameInput, jiggle: &mut JiggleBones) -> Vec3 {
    let transforms = setup.build_world_transforms(pose, frame, Some(jiggle));
    matrix_column(&transforms.get(TAIL), 2)
}

#[test]
fn test_tail_rests_on_goal() {
    let (setup, pose) = biped_setup();
    let mut jiggle = JiggleBones::new(JiggleSettings::default());

    let origin = jiggled_origin(&setup, &pose, &frame(0.0, Vec3::ZERO), &mut jiggle, TAIL);
    assert!((origin - Vec3::new(0.0, -2.0, 18.0)).length() < 1e-5);
    assert_eq!(jiggle.len(), 1);
    assert!(jiggle.state(TAIL).is_some());
}

#[test]
fn test_tail_trails_root_motion_then_settles() {
    let (setup, pose) = biped_setup();
    let mut jiggle = JiggleBones::default();

    tail_forward(&setup, &pose, &frame(0.0, Vec3::ZERO), &mut jiggle);

    let moved = Vec3::new(5.0, 0.0, 0.0);
    let forward = tail_forward(&setup, &pose, &frame(0.03, moved), &mut jiggle);
    assert!(forward.x < -0.05, "tail should lag the move, got {forward:?}");

    let mut time = 0.03;
    let mut forward = forward;
    for _ in 0..400 {
        time += 0.02;
        forward = tail_forward(&setup, &pose, &frame(time, moved), &mut jiggle);
    }
    assert!((forward - Vec3::Z).length() < 1e-2);

    // The simulated bone keeps its animated origin
    let origin = jiggled_origin(&setup, &pose, &frame(time + 0.02, moved), &mut jiggle, TAIL);
    assert!((origin - Vec3::new(5.0, -2.0, 18.0)).length() < 1e-4);
}

#[test]
fn test_jiggle_needs_bone_info() {
    init_logging();
    let asset = biped_builder().with_bone_info(false).build().unwrap();
    let setup = BoneSetup::new(Arc::new(asset));
    let mut pose = Pose::new(setup.asset().bone_count());
    setup.init_pose(&mut pose);
    let mut jiggle = JiggleBones::default();

    tail_forward(&setup, &pose, &frame(0.0, Vec3::ZERO), &mut jiggle);
    let forward = tail_forward(&setup, &pose, &frame(0.03, Vec3::new(5.0, 0.0, 0.0)), &mut jiggle);

    assert!((forward - Vec3::Z).length() < 1e-6);
    assert!(jiggle.is_empty());
}

#[test]
fn test_without_simulator_uses_goal() {
    let (setup, pose) = biped_setup();
    let transforms = setup.build_world_transforms(&pose, &frame(0.0, Vec3::ONE), None);
    assert!((matrix_origin(&transforms.get(TAIL)) - Vec3::new(1.0, -1.0, 19.0)).length() < 1e-5);
}
