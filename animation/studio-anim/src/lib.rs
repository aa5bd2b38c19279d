//! Skeletal animation evaluation for studio models.
//!
//! This crate turns a compiled skeleton plus its animation tables into
//! per-bone local poses and world transforms. It covers the runtime half
//! of the animation pipeline:
//!
//! - decoding compressed per-bone channels ([`anim_value`], [`evaluator`])
//! - blending sequences over 1D/2D pose parameter grids ([`blend`])
//! - layered sequences and autoplay overlays ([`layers`])
//! - bone controllers and pose parameter mapping ([`controller`])
//! - procedural bones and spring-driven jiggle bones ([`procedural`], [`jiggle`])
//! - two-bone IK with persistent, latching foot targets ([`ik`])
//! - root motion extraction ([`movement`])
//!
//! Assets are immutable once built and shared behind an `Arc`; all
//! mutable evaluation state lives in [`BoneSetup`], [`IkContext`] and
//! [`JiggleBones`], one of each per animated instance.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use glam::Vec3;
//! use studio_anim::{AnimDesc, BoneDef, BoneSetup, Pose, SequenceDef, StudioAssetBuilder};
//!
//! let asset = StudioAssetBuilder::new("crate")
//!     .bone(BoneDef::new("root", None, Vec3::ZERO, Vec3::ZERO))
//!     .bone(BoneDef::new("lid", Some(0), Vec3::new(0.0, 0.0, 8.0), Vec3::ZERO))
//!     .anim(AnimDesc::new("idle", 11, 10.0))
//!     .sequence(SequenceDef::new("idle", 0))
//!     .build()?;
//!
//! let mut setup = BoneSetup::new(Arc::new(asset));
//! let mut pose = Pose::new(setup.asset().bone_count());
//! setup.init_pose(&mut pose);
//! setup.accumulate_pose(None, &mut pose, 0, 0.5, 1.0);
//!
//! assert_eq!(pose.pos[1], Vec3::new(0.0, 0.0, 8.0));
//! # Ok::<(), studio_anim::AnimError>(())
//! ```

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod anim_value;
pub mod asset;
pub mod blend;
pub mod controller;
pub mod error;
pub mod evaluator;
pub mod ik;
pub mod jiggle;
pub mod layers;
pub mod math;
pub mod movement;
pub mod pose;
pub mod procedural;
pub mod settings;
pub mod setup;

// Re-export common types
pub use anim_value::{AnimValue, AnimValueStream};
pub use asset::{
    AnimDesc, AnimFlags, AutoLayer, BoneChannels, BoneDef, BoneFlags, IkChainDef, IkLockDef,
    IkRuleDef, IkRuleType, LayerFlags, MovementSegment, PoseParamDesc, SequenceDef,
    SequenceFlags, StudioAsset, StudioAssetBuilder,
};
pub use error::{AnimError, Result};
pub use ik::{IkContext, IkTarget};
pub use jiggle::JiggleBones;
pub use layers::{LayerWindow, layer_blend_weight, layer_window_weight};
pub use movement::{
    RootMotion, anim_movement, anim_position, anim_velocity, find_anim_distance,
};
pub use pose::{BoneTransforms, Pose};
pub use settings::{BlendSettings, IkSettings, JiggleSettings};
pub use setup::{BoneSetup, FrameInput};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
