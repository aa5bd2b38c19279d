//! IK rules, latching targets and locks driven through whole frames

use glam::{Quat, Vec3};

use crate::common::*;
use studio_anim::ik::LatchState;
use studio_anim::{FrameInput, IkContext, IkSettings};

fn frame(time: f32, frame_counter: i32, root: Vec3) -> FrameInput {
    FrameInput::new(time, frame_counter, root, Quat::IDENTITY)
}

#[test]
fn test_idle_registers_ground_rule() {
    let (mut setup, mut pose) = biped_setup();
    let mut ik = IkContext::default();
    let first = frame(0.0, 1, Vec3::ZERO);

    ik_frame(&mut setup, &mut ik, &mut pose, &first, IDLE, 0.5);

    assert_eq!(ik.chain_rules(0).len(), 1);
    assert!(matches!(ik.target(0).unwrap().latch(), LatchState::Latched(_)));
    assert!((world_origin(&setup, &pose, &first, FOOT) - FOOT_REST).length() < 1e-3);
}

#[test]
fn test_sequences_without_rules_register_nothing() {
    let (mut setup, mut pose) = biped_setup();
    let mut ik = IkContext::default();

    ik_frame(&mut setup, &mut ik, &mut pose, &FrameInput::default(), CROUCH, 0.0);
    assert!(ik.chain_rules(0).is_empty());
}

#[test]
fn test_latched_foot_stays_planted_while_root_drifts() {
    let (mut setup, mut pose) = biped_setup();
    let mut ik = IkContext::default();

    ik_frame(&mut setup, &mut ik, &mut pose, &frame(0.0, 1, Vec3::ZERO), IDLE, 0.5);

    for tick in 1..4 {
        let root = Vec3::new(0.5 * tick as f32, 0.0, 0.0);
        let step = frame(0.1 * tick as f32, tick + 1, root);
        ik_frame(&mut setup, &mut ik, &mut pose, &step, IDLE, 0.5);

        let foot = world_origin(&setup, &pose, &step, FOOT);
        assert!(
            (foot - FOOT_REST).length() < 1e-3,
            "foot slid to {foot:?} at tick {tick}"
        );
    }
}

#[test]
fn test_skipped_frames_reset_latch() {
    let (mut setup, mut pose) = biped_setup();
    let mut ik = IkContext::default();

    ik_frame(&mut setup, &mut ik, &mut pose, &frame(0.0, 1, Vec3::ZERO), IDLE, 0.5);

    let later = frame(2.0, 20, Vec3::new(3.0, 0.0, 0.0));
    ik_frame(&mut setup, &mut ik, &mut pose, &later, IDLE, 0.5);

    let foot = world_origin(&setup, &pose, &later, FOOT);
    assert!((foot - Vec3::new(3.0, 0.0, 4.0)).length() < 1e-3);
}

#[test]
fn test_release_ramp_recovers_after_error() {
    let (mut setup, mut pose) = biped_setup();
    let mut ik = IkContext::new(IkSettings::default());

    ik_frame(&mut setup, &mut ik, &mut pose, &frame(0.0, 1, Vec3::ZERO), IDLE, 0.5);
    ik.target_mut(0).unwrap().report_error(0.0);

    let mut weights = Vec::new();
    for tick in 1..=20 {
        let time = 0.05 * tick as f32;
        ik_frame(&mut setup, &mut ik, &mut pose, &frame(time, tick + 1, Vec3::ZERO), IDLE, 0.5);
        weights.push(ik.target(0).unwrap().estimate().weight);
    }

    let (lowest, min) = weights
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::MAX), |acc, (i, w)| if w < acc.1 { (i, w) } else { acc });
    assert!(min < 0.5, "release never ramped out: {weights:?}");

    // Falls while the error is fresh, then climbs back without dipping
    assert!(weights[..=lowest].windows(2).all(|w| w[1] <= w[0] + 1e-6));
    assert!(weights[lowest..].windows(2).all(|w| w[1] + 1e-6 >= w[0]));
    assert!((weights[weights.len() - 1] - 1.0).abs() < 1e-6);
    assert!(!ik.target(0).unwrap().in_error());
}

#[test]
fn test_sequence_lock_keeps_foot_through_crouch() {
    let (mut setup, mut pose) = biped_setup();
    let frame = FrameInput::default();

    let mut unlocked = pose.clone();
    setup.accumulate_pose(None, &mut unlocked, CROUCH, 0.0, 1.0);
    let dropped = world_origin(&setup, &unlocked, &frame, FOOT);
    assert!((dropped - Vec3::new(0.0, 0.0, 0.0)).length() < 1e-3);

    setup.accumulate_pose(None, &mut pose, CROUCH_LOCKED, 0.0, 1.0);
    assert!((world_origin(&setup, &pose, &frame, FOOT) - FOOT_REST).length() < 1e-3);
    assert!((pose.pos[HIP].z - 16.0).abs() < 1e-4);
}

#[test]
fn test_autoplay_locks_pin_foot() {
    let (mut setup, mut pose) = biped_setup();
    let frame = FrameInput::default();
    let mut ik = IkContext::default();
    ik.init(&setup, &frame);

    setup.set_time(0.2);
    setup.calc_autoplay_sequences(Some(&mut ik), &mut pose);
    assert!((pose.pos[ROOT].z - 1.0).abs() < 1e-4);
    assert!((world_origin(&setup, &pose, &frame, HIP).z - 21.0).abs() < 1e-4);
    assert!((world_origin(&setup, &pose, &frame, FOOT) - FOOT_REST).length() < 1e-3);

    let mut free = biped_setup().1;
    setup.calc_autoplay_sequences(None, &mut free);
    assert!((world_origin(&setup, &free, &frame, FOOT) - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-3);
}
