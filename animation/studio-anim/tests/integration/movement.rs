//! Root motion queries on blended sequences

use glam::Vec3;
use test_case::test_case;

use crate::common::*;
use studio_anim::{BlendSettings, BoneSetup, anim_position};

#[test_case(0.0, 0.5 => 10.0; "first half")]
#[test_case(0.5, 1.0 => 10.0; "second half")]
#[test_case(0.25, 1.75 => 30.0; "across a loop")]
fn test_walk_distance(from: f32, to: f32) -> f32 {
    let (setup, _) = biped_setup();
    let motion = setup.seq_movement(WALK, from, to).unwrap();
    assert!(motion.yaw.abs() < 1e-6);
    (motion.position.x * 1000.0).round() / 1000.0
}

#[test]
fn test_walk_velocity_and_distance_lookup() {
    let (setup, _) = biped_setup();

    let velocity = setup.seq_velocity(WALK, 0.3).unwrap();
    assert!((velocity - Vec3::new(20.0, 0.0, 0.0)).length() < 1e-4);
    assert!((setup.find_seq_distance(WALK, 5.0) - 0.25).abs() < 1e-5);

    let walk = setup.asset().anim(2).unwrap();
    let position = anim_position(walk, 0.75).unwrap().position;
    assert!((position.x - 15.0).abs() < 1e-4);
}

#[test]
fn test_static_sequences_have_no_motion() {
    let (setup, _) = biped_setup();
    assert!(setup.seq_movement(IDLE, 0.0, 1.0).is_none());
    assert!(setup.seq_velocity(IDLE, 0.5).is_none());
    assert!((setup.find_seq_distance(IDLE, 5.0) - 1.0).abs() < f32::EPSILON);
}

#[test]
fn test_legacy_settings_keep_single_anim_motion() {
    let setup = BoneSetup::new(biped()).with_settings(BlendSettings::legacy());
    let motion = setup.seq_movement(WALK, 0.0, 0.5).unwrap();
    assert!((motion.position - Vec3::new(10.0, 0.0, 0.0)).length() < 1e-4);
}
