use bitflags::bitflags;
use glam::Vec3;

use super::ik::{IkLockDef, IkRuleDef};
use crate::anim_value::AnimValueStream;

bitflags! {
    /// Sequence and animation flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
    pub struct SequenceFlags: u32 {
        /// Cycle wraps instead of clamping
        const LOOPING = 0x0001;
        /// Data is additive against the current pose
        const DELTA = 0x0004;
        /// Evaluated automatically every frame
        const AUTOPLAY = 0x0008;
        /// Delta applied after the base rotation instead of before
        const POST = 0x0010;
        /// Cycle is driven by a pose parameter
        const CYCLE_POSE = 0x0080;
        /// Cycle is derived from the wall clock
        const REALTIME = 0x0100;
        /// Layers are composited before blending into the caller's pose
        const LOCAL = 0x0200;
        /// Blended in world space
        const WORLD = 0x4000;
        /// Blend axes are resolved through pose parameters
        const BLEND_POSE = 0x0001_0000;
        /// Sub-animations carry IK rules
        const IK_RULES = 0x0002_0000;
    }
}

/// Flags carried by a single sub-animation
pub type AnimFlags = SequenceFlags;

bitflags! {
    /// Auto-layer flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
    pub struct LayerFlags: u32 {
        /// Ease the ramps with the S-curve
        const SPLINE = 0x0040;
        /// Cross-fade against the base pose past the tail
        const XFADE = 0x0080;
        /// Use the window weight alone, ignoring the caller's weight
        const NO_BLEND = 0x0200;
        /// Composite before blending into the caller's pose
        const LOCAL = 0x1000;
        /// Window is indexed by a pose parameter instead of the cycle
        const POSE = 0x4000;
    }
}

/// Six optional channels (x/y/z position, x/y/z angle) of one bone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct BoneChannels {
    /// Channel streams
    pub streams: [Option<AnimValueStream>; 6],
}

impl BoneChannels {
    /// Set the position stream for `axis`
    pub fn with_position(mut self, axis: usize, stream: AnimValueStream) -> Self {
        if let Some(slot) = self.streams.get_mut(axis) {
            *slot = Some(stream);
        }
        self
    }

    /// Set the angle stream for `axis`
    pub fn with_angle(mut self, axis: usize, stream: AnimValueStream) -> Self {
        if let Some(slot) = self.streams.get_mut(axis + 3) {
            *slot = Some(stream);
        }
        self
    }

    /// Stream for channel `index`, if present
    pub fn stream(&self, index: usize) -> Option<&AnimValueStream> {
        self.streams.get(index).and_then(Option::as_ref)
    }

    /// Whether any of the position channels are present
    pub fn has_position(&self) -> bool {
        self.streams[..3].iter().any(Option::is_some)
    }

    /// Whether any of the angle channels are present
    pub fn has_angles(&self) -> bool {
        self.streams[3..].iter().any(Option::is_some)
    }
}

/// One segment of a piecewise movement table
///
/// Speed varies linearly from `v0` to `v1` between the previous segment's
/// end frame and `end_frame`.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct MovementSegment {
    /// Last frame of the segment
    pub end_frame: f32,
    /// Speed at the segment start
    pub v0: f32,
    /// Speed at the segment end
    pub v1: f32,
    /// Unit movement direction
    pub vector: Vec3,
    /// Accumulated position at the segment end
    pub position: Vec3,
    /// Accumulated yaw at the segment end, in degrees
    pub angle: f32,
}

/// A sub-animation: per-bone channels plus movement and IK data
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimDesc {
    /// Animation name
    pub name: String,
    /// Number of frames
    pub frame_count: usize,
    /// Frames per second
    pub fps: f32,
    /// Animation flags
    pub flags: AnimFlags,
    /// Per-bone channels, empty or one entry per bone
    pub channels: Vec<BoneChannels>,
    /// Movement table
    pub movements: Vec<MovementSegment>,
    /// IK rules
    pub ik_rules: Vec<IkRuleDef>,
}

impl AnimDesc {
    /// Create an animation without channel data
    pub fn new<S: Into<String>>(name: S, frame_count: usize, fps: f32) -> Self {
        Self {
            name: name.into(),
            frame_count,
            fps,
            ..Default::default()
        }
    }

    /// Replace the flags
    pub fn with_flags(mut self, flags: AnimFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set channel data for every bone
    pub fn with_channels(mut self, channels: Vec<BoneChannels>) -> Self {
        self.channels = channels;
        self
    }

    /// Set the movement table
    pub fn with_movements(mut self, movements: Vec<MovementSegment>) -> Self {
        self.movements = movements;
        self
    }

    /// Set the IK rules
    pub fn with_ik_rules(mut self, rules: Vec<IkRuleDef>) -> Self {
        self.ik_rules = rules;
        self
    }

    /// Channels of `bone`, if the animation carries data for it
    pub fn bone_channels(&self, bone: usize) -> Option<&BoneChannels> {
        self.channels.get(bone)
    }

    /// Cycles per second, zero for single-frame animations
    pub fn cycles_per_second(&self) -> f32 {
        if self.frame_count > 1 {
            self.fps / (self.frame_count - 1) as f32
        } else {
            0.0
        }
    }
}

/// A secondary sequence composited on top of a base pose
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct AutoLayer {
    /// Layered sequence
    pub sequence: usize,
    /// Pose parameter indexing the window with [`LayerFlags::POSE`]
    pub pose: Option<usize>,
    /// Layer flags
    pub flags: LayerFlags,
    /// Window start
    pub start: f32,
    /// End of the ramp-in
    pub peak: f32,
    /// Start of the ramp-out
    pub tail: f32,
    /// Window end
    pub end: f32,
}

impl AutoLayer {
    /// Create a layer with the given activation window
    pub fn new(sequence: usize, start: f32, peak: f32, tail: f32, end: f32) -> Self {
        Self {
            sequence,
            pose: None,
            flags: LayerFlags::empty(),
            start,
            peak,
            tail,
            end,
        }
    }

    /// Replace the flags
    pub fn with_flags(mut self, flags: LayerFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Index the window by `pose` instead of the cycle
    pub fn with_pose(mut self, pose: usize) -> Self {
        self.pose = Some(pose);
        self.flags |= LayerFlags::POSE;
        self
    }
}

/// A sequence: a 1D/2D grid of sub-animations plus layering and IK data
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct SequenceDef {
    /// Sequence label
    pub label: String,
    /// Sequence flags
    pub flags: SequenceFlags,
    /// Sub-animation indices, row-major over `group_size`
    pub anims: Vec<usize>,
    /// Grid dimensions along the two blend axes
    pub group_size: [usize; 2],
    /// Pose parameter driving each blend axis
    pub blend_pose: [Option<usize>; 2],
    /// Parameter value at the first grid column/row
    pub blend_start: [f32; 2],
    /// Parameter value at the last grid column/row
    pub blend_end: [f32; 2],
    /// Non-uniform key positions per axis
    pub pose_keys: Option<[Vec<f32>; 2]>,
    /// Pose parameter driving the cycle with [`SequenceFlags::CYCLE_POSE`]
    pub cycle_pose: usize,
    /// Per-bone weights
    pub bone_weights: Option<Vec<f32>>,
    /// Layers composited with this sequence
    pub auto_layers: Vec<AutoLayer>,
    /// IK locks solved after this sequence
    pub ik_locks: Vec<IkLockDef>,
    /// Constant movement for sequences without a movement table
    pub linear_movement: Vec3,
}

impl SequenceDef {
    /// Create a single-animation sequence
    pub fn new<S: Into<String>>(label: S, anim: usize) -> Self {
        Self {
            label: label.into(),
            flags: SequenceFlags::empty(),
            anims: vec![anim],
            group_size: [1, 1],
            blend_pose: [None, None],
            blend_start: [0.0; 2],
            blend_end: [1.0; 2],
            pose_keys: None,
            cycle_pose: 0,
            bone_weights: None,
            auto_layers: Vec::new(),
            ik_locks: Vec::new(),
            linear_movement: Vec3::ZERO,
        }
    }

    /// Replace the flags
    pub fn with_flags(mut self, flags: SequenceFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Use a `cols x rows` grid of animations
    pub fn with_blend_grid(mut self, anims: Vec<usize>, cols: usize, rows: usize) -> Self {
        self.anims = anims;
        self.group_size = [cols, rows];
        self
    }

    /// Drive blend axis `axis` from `param` over `[start, end]`
    pub fn with_blend_axis(mut self, axis: usize, param: usize, start: f32, end: f32) -> Self {
        if axis < 2 {
            self.blend_pose[axis] = Some(param);
            self.blend_start[axis] = start;
            self.blend_end[axis] = end;
        }
        self
    }

    /// Use non-uniform key tables
    pub fn with_pose_keys(mut self, axis0: Vec<f32>, axis1: Vec<f32>) -> Self {
        self.pose_keys = Some([axis0, axis1]);
        self
    }

    /// Drive the cycle from pose parameter `param`
    pub fn with_cycle_pose(mut self, param: usize) -> Self {
        self.cycle_pose = param;
        self.flags |= SequenceFlags::CYCLE_POSE;
        self
    }

    /// Set per-bone weights
    pub fn with_bone_weights(mut self, weights: Vec<f32>) -> Self {
        self.bone_weights = Some(weights);
        self
    }

    /// Add a layer
    pub fn with_layer(mut self, layer: AutoLayer) -> Self {
        self.auto_layers.push(layer);
        self
    }

    /// Add an IK lock
    pub fn with_ik_lock(mut self, lock: IkLockDef) -> Self {
        self.ik_locks.push(lock);
        self
    }

    /// Set the constant movement vector
    pub fn with_linear_movement(mut self, movement: Vec3) -> Self {
        self.linear_movement = movement;
        self
    }

    /// Number of sub-animations
    pub fn num_blends(&self) -> usize {
        self.anims.len()
    }

    /// Animation at grid cell `(x, y)`, clamped into the grid
    pub fn anim_at(&self, x: usize, y: usize) -> usize {
        let x = x.min(self.group_size[0].saturating_sub(1));
        let y = y.min(self.group_size[1].saturating_sub(1));
        self.anims
            .get(x + self.group_size[0] * y)
            .or_else(|| self.anims.first())
            .copied()
            .unwrap_or(0)
    }

    /// Key position `index` along `axis`
    pub fn pose_key(&self, axis: usize, index: usize) -> f32 {
        self.pose_keys
            .as_ref()
            .and_then(|keys| keys.get(axis))
            .and_then(|keys| keys.get(index))
            .copied()
            .unwrap_or(0.0)
    }

    /// Weight of `bone`, if the sequence carries a weight table
    pub fn bone_weight(&self, bone: usize) -> Option<f32> {
        self.bone_weights
            .as_ref()
            .map(|weights| weights.get(bone).copied().unwrap_or(0.0))
    }
}
