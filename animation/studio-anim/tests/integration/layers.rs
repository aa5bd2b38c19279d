//! Layered sequences composited through accumulate_pose

use test_case::test_case;

use crate::common::*;

#[test_case(0.0 => 20.0; "window start")]
#[test_case(0.125 => 18.0; "ramping in")]
#[test_case(0.25 => 16.0; "peak")]
#[test_case(0.375 => 18.0; "ramping out")]
#[test_case(0.75 => 20.0; "outside window")]
fn test_dip_layer_follows_window(cycle: f32) -> f32 {
    let (mut setup, mut pose) = biped_setup();
    setup.accumulate_pose(None, &mut pose, IDLE_DIP, cycle, 1.0);
    (pose.pos[HIP].z * 1000.0).round() / 1000.0
}

#[test]
fn test_layer_scales_with_parent_weight() {
    let (mut setup, mut pose) = biped_setup();
    setup.accumulate_pose(None, &mut pose, IDLE_DIP, 0.25, 0.5);
    assert!((pose.pos[HIP].z - 18.0).abs() < 1e-4);
}

#[test]
fn test_autoplay_overlays_base_sequence() {
    let (mut setup, mut pose) = biped_setup();
    setup.set_time(0.35);

    setup.accumulate_pose(None, &mut pose, CROUCH, 0.0, 1.0);
    setup.calc_autoplay_sequences(None, &mut pose);

    // Breathing replaces the whole pose with its own sample
    assert!((pose.pos[ROOT].z - 1.0).abs() < 1e-4);
    assert!((pose.pos[HIP].z - 20.0).abs() < 1e-4);
}
