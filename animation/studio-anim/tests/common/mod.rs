//! Common test utilities and fixtures

#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;
use studio_anim::anim_value::AnimValueStream;
use studio_anim::asset::{
    AnimDesc, AnimFlags, AutoLayer, BoneChannels, BoneDef, IkChainDef, IkErrorTrack, IkLockDef,
    IkRuleDef, IkRuleType, JiggleParams, MovementSegment, PoseParamDesc, SequenceDef,
    SequenceFlags, StudioAsset, StudioAssetBuilder,
};
use studio_anim::math::matrix_origin;
use studio_anim::{BoneSetup, FrameInput, IkContext, JiggleBones, Pose};

pub const ROOT: usize = 0;
pub const HIP: usize = 1;
pub const KNEE: usize = 2;
pub const FOOT: usize = 3;
pub const TAIL: usize = 4;

pub const IDLE: usize = 0;
pub const CROUCH: usize = 1;
pub const CROUCH_BLEND: usize = 2;
pub const WALK: usize = 3;
pub const CROUCH_LOCKED: usize = 4;
pub const IDLE_DIP: usize = 5;
pub const BREATHE: usize = 6;

/// Bind-pose foot position: hip at z=20, knee at (6,0,12)
pub const FOOT_REST: Vec3 = Vec3::new(0.0, 0.0, 4.0);

/// Route `log` output through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn constant(value: i16) -> AnimValueStream {
    AnimValueStream::from_frames(&[value; 11])
}

/// Channels moving only `bone` along `axis` by `value`
fn offset_channels(bone: usize, axis: usize, value: i16) -> Vec<BoneChannels> {
    let mut channels = vec![BoneChannels::default(); bone + 1];
    channels[bone] = BoneChannels::default().with_position(axis, constant(value));
    channels
}

fn zero_error() -> IkErrorTrack {
    IkErrorTrack {
        scale: [1.0; 6],
        channels: BoneChannels::default()
            .with_position(0, constant(0))
            .with_position(1, constant(0))
            .with_position(2, constant(0)),
    }
}

/// A one-legged biped with a jiggle tail
///
/// Sequences:
/// - `IDLE`: bind pose, ground-latched foot
/// - `CROUCH`: hip lowered by 4
/// - `CROUCH_BLEND`: pose parameter 0 blends idle into crouch
/// - `WALK`: 20 units along +X per cycle
/// - `CROUCH_LOCKED`: crouch with the leg locked in place
/// - `IDLE_DIP`: idle with crouch layered over the first half
/// - `BREATHE`: autoplay, root raised by 1, with the leg locked
pub fn biped_builder() -> StudioAssetBuilder {
    StudioAssetBuilder::new("biped")
        .bone(BoneDef::new("root", None, Vec3::ZERO, Vec3::ZERO))
        .bone(BoneDef::new("hip", Some(ROOT), Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO))
        .bone(BoneDef::new("knee", Some(HIP), Vec3::new(6.0, 0.0, -8.0), Vec3::ZERO))
        .bone(BoneDef::new("foot", Some(KNEE), Vec3::new(-6.0, 0.0, -8.0), Vec3::ZERO))
        .bone(
            BoneDef::new("tail", Some(ROOT), Vec3::new(0.0, -2.0, 18.0), Vec3::ZERO)
                .with_jiggle(JiggleParams::flexible(6.0, 200.0, 20.0)),
        )
        .ik_chain(IkChainDef::new("leg", HIP, KNEE, FOOT))
        .autoplay_lock(IkLockDef::new(0, 1.0, 0.0))
        .pose_param(PoseParamDesc::new("crouch", 0.0, 1.0))
        .anim(
            AnimDesc::new("idle", 11, 10.0)
                .with_flags(AnimFlags::LOOPING)
                .with_ik_rules(vec![IkRuleDef::new(0, IkRuleType::Ground).with_error(0, zero_error())]),
        )
        .anim(AnimDesc::new("crouch", 11, 10.0).with_channels(offset_channels(HIP, 2, -4)))
        .anim(
            AnimDesc::new("walk", 11, 10.0)
                .with_flags(AnimFlags::LOOPING)
                .with_movements(vec![MovementSegment {
                    end_frame: 10.0,
                    v0: 20.0,
                    v1: 20.0,
                    vector: Vec3::X,
                    position: Vec3::new(20.0, 0.0, 0.0),
                    angle: 0.0,
                }]),
        )
        .anim(AnimDesc::new("breathe", 11, 10.0).with_channels(offset_channels(ROOT, 2, 1)))
        .sequence(
            SequenceDef::new("idle", 0)
                .with_flags(SequenceFlags::LOOPING | SequenceFlags::IK_RULES),
        )
        .sequence(SequenceDef::new("crouch", 1))
        .sequence(
            SequenceDef::new("crouch_blend", 0)
                .with_flags(SequenceFlags::BLEND_POSE)
                .with_blend_grid(vec![0, 1], 2, 1)
                .with_blend_axis(0, 0, 0.0, 1.0),
        )
        .sequence(SequenceDef::new("walk", 2).with_flags(SequenceFlags::LOOPING))
        .sequence(SequenceDef::new("crouch_locked", 1).with_ik_lock(IkLockDef::new(0, 1.0, 0.0)))
        .sequence(
            SequenceDef::new("idle_dip", 0)
                .with_flags(SequenceFlags::LOOPING)
                .with_layer(AutoLayer::new(CROUCH, 0.0, 0.25, 0.25, 0.5)),
        )
        .sequence(SequenceDef::new("breathe", 3).with_flags(SequenceFlags::AUTOPLAY))
        .with_bone_info(true)
}

pub fn biped() -> Arc<StudioAsset> {
    Arc::new(biped_builder().build().expect("biped fixture should build"))
}

/// Fresh setup and bind pose for the biped
pub fn biped_setup() -> (BoneSetup, Pose) {
    init_logging();
    let setup = BoneSetup::new(biped());
    let mut pose = Pose::new(setup.asset().bone_count());
    setup.init_pose(&mut pose);
    (setup, pose)
}

/// World-space origin of `bone`
pub fn world_origin(setup: &BoneSetup, pose: &Pose, frame: &FrameInput, bone: usize) -> Vec3 {
    let transforms = setup.build_world_transforms(pose, frame, None);
    matrix_origin(&transforms.get(bone))
}

/// World-space origin of `bone` with jiggle simulation
pub fn jiggled_origin(
    setup: &BoneSetup,
    pose: &Pose,
    frame: &FrameInput,
    jiggle: &mut JiggleBones,
    bone: usize,
) -> Vec3 {
    let transforms = setup.build_world_transforms(pose, frame, Some(jiggle));
    matrix_origin(&transforms.get(bone))
}

/// One full frame: accumulate `seq`, then update and solve IK
pub fn ik_frame(
    setup: &mut BoneSetup,
    ik: &mut IkContext,
    pose: &mut Pose,
    frame: &FrameInput,
    seq: usize,
    cycle: f32,
) {
    setup.set_time(frame.time);
    setup.init_pose(pose);
    ik.init(setup, frame);
    setup.accumulate_pose(Some(ik), pose, seq, cycle, 1.0);
    ik.update_targets(setup, pose);
    ik.solve_dependencies(setup, pose);
}
