//! Sequence layering and pose accumulation
//!
//! A sequence may carry [`AutoLayer`]s that composite other sequences on
//! top of it. Each layer is active inside a `start..end` window indexed
//! by the parent's cycle (or by a pose parameter with
//! [`LayerFlags::POSE`]), ramping in up to `peak` and out after `tail`.
//!
//! [`BoneSetup::accumulate_pose`] is the entry point: it evaluates one
//! sequence with its local layers, blends it into the caller's pose,
//! registers its IK rules and then recurses into the remaining layers.

use std::sync::Arc;

use log::{trace, warn};

use crate::asset::{AutoLayer, LayerFlags, SequenceFlags};
use crate::ik::IkContext;
use crate::math::simple_spline;
use crate::pose::Pose;
use crate::setup::{BoneSetup, FrameInput};

/// Ramp of a layer window at a given index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerWindow {
    /// Window weight in `[0, 1]`
    pub ramp: f32,
    /// Index after cycle wraparound
    pub index: f32,
}

/// Window ramp of `layer` at `index`, `None` outside the window
///
/// Cycle-indexed windows reaching past 1 wrap around: an index before the
/// start is tested again one loop later.
pub fn layer_window_weight(layer: &AutoLayer, index: f32) -> Option<LayerWindow> {
    let mut index = index;
    if !layer.flags.contains(LayerFlags::POSE) && layer.end > 1.0 && index < layer.start {
        index += 1.0;
    }

    if index < layer.start || index >= layer.end {
        return None;
    }

    let mut ramp = if index < layer.peak && layer.start != layer.peak {
        (index - layer.start) / (layer.peak - layer.start)
    } else if index > layer.tail && layer.end != layer.tail {
        (layer.end - index) / (layer.end - layer.tail)
    } else {
        1.0
    };

    if layer.flags.contains(LayerFlags::SPLINE) {
        ramp = simple_spline(ramp);
    }

    Some(LayerWindow { ramp, index })
}

/// Final weight of a layer given its window and the caller's weight
///
/// Past the tail, cross-fading layers renormalise against the base pose so
/// the layer fades out at the rate the base fades in.
pub fn layer_blend_weight(layer: &AutoLayer, window: LayerWindow, weight: f32) -> f32 {
    if layer.flags.contains(LayerFlags::XFADE) && window.index > layer.tail {
        let denom = 1.0 - weight + window.ramp * weight;
        if denom > 0.0 {
            window.ramp * weight / denom
        } else {
            0.0
        }
    } else if layer.flags.contains(LayerFlags::NO_BLEND) {
        window.ramp
    } else {
        weight * window.ramp
    }
}

impl BoneSetup {
    /// Index of `layer` inside its window: pose parameter or cycle
    fn layer_index(&self, layer: &AutoLayer, cycle: f32) -> f32 {
        if !layer.flags.contains(LayerFlags::POSE) {
            return cycle;
        }

        layer
            .pose
            .and_then(|param| {
                self.asset.pose_param(param).map(|desc| {
                    self.pose_param_value(param) * (desc.end - desc.start) + desc.start
                })
            })
            .unwrap_or(0.0)
    }

    /// Cycle and weight of a layer, `None` when it contributes nothing
    fn layer_drive(
        &self,
        layer: &AutoLayer,
        index: f32,
        cycle: f32,
        weight: f32,
    ) -> Option<(f32, f32)> {
        if layer.start == layer.end {
            return Some((cycle, weight));
        }

        let window = layer_window_weight(layer, index)?;
        let layer_weight = layer_blend_weight(layer, window, weight);
        let layer_cycle = if layer.flags.contains(LayerFlags::POSE) {
            cycle
        } else {
            (window.index - layer.start) / (layer.end - layer.start)
        };

        Some((layer_cycle, layer_weight))
    }

    /// Composite the non-local layers of `seq` onto `pose`
    pub fn add_sequence_layers(
        &mut self,
        mut ik: Option<&mut IkContext>,
        pose: &mut Pose,
        seq: usize,
        cycle: f32,
        weight: f32,
    ) {
        let asset = Arc::clone(&self.asset);
        let Some(desc) = asset.sequence(seq) else {
            return;
        };

        for layer in &desc.auto_layers {
            if layer.flags.contains(LayerFlags::LOCAL) {
                continue;
            }

            let index = self.layer_index(layer, cycle);
            let Some((layer_cycle, layer_weight)) = self.layer_drive(layer, index, cycle, weight)
            else {
                continue;
            };

            trace!(
                "Layer {} on {}: cycle {:.3} weight {:.3}",
                layer.sequence, desc.label, layer_cycle, layer_weight
            );
            self.accumulate_pose(ik.as_deref_mut(), pose, layer.sequence, layer_cycle, layer_weight);
        }
    }

    /// Composite the local layers of `seq` onto `pose`
    ///
    /// Only sequences flagged [`SequenceFlags::LOCAL`] have local layers,
    /// and their windows are always indexed by the cycle.
    pub fn add_local_layers(
        &mut self,
        mut ik: Option<&mut IkContext>,
        pose: &mut Pose,
        seq: usize,
        cycle: f32,
        weight: f32,
    ) {
        let asset = Arc::clone(&self.asset);
        let Some(desc) = asset.sequence(seq) else {
            return;
        };
        if !desc.flags.contains(SequenceFlags::LOCAL) {
            return;
        }

        for layer in &desc.auto_layers {
            if !layer.flags.contains(LayerFlags::LOCAL) {
                continue;
            }

            let Some((layer_cycle, layer_weight)) = self.layer_drive(layer, cycle, cycle, weight)
            else {
                continue;
            };
            self.accumulate_pose(ik.as_deref_mut(), pose, layer.sequence, layer_cycle, layer_weight);
        }
    }

    /// Blend sequence `seq` at `cycle` into `pose` with `weight`
    ///
    /// The sequence is evaluated from the bind pose with its local layers,
    /// slerped into `pose`, then its IK rules are registered on `ik` and
    /// its remaining layers composited. Sequence IK locks are captured
    /// before the blend and solved last.
    pub fn accumulate_pose(
        &mut self,
        mut ik: Option<&mut IkContext>,
        pose: &mut Pose,
        seq: usize,
        cycle: f32,
        weight: f32,
    ) {
        let weight = weight.clamp(0.0, 1.0);
        let asset = Arc::clone(&self.asset);
        let Some(desc) = asset.sequence(seq) else {
            warn!(
                "Sequence {}/{} out of range for model {}",
                seq,
                asset.sequences().len(),
                asset.name()
            );
            return;
        };

        let mut seq_ik = None;
        if !desc.ik_locks.is_empty() {
            let mut lock_ik = IkContext::default();
            lock_ik.init(self, &FrameInput::default());
            lock_ik.add_sequence_locks(self, seq, pose);
            seq_ik = Some(lock_ik);
        }

        let mut local = Pose::new(pose.len());
        self.init_pose(&mut local);
        self.calc_pose_single(&mut local, seq, cycle);
        self.add_local_layers(ik.as_deref_mut(), &mut local, seq, cycle, 1.0);
        self.slerp_bones(pose, desc, &local, weight);

        if let Some(ctx) = ik.as_deref_mut() {
            ctx.add_dependencies(self, seq, cycle, weight);
        }

        self.add_sequence_layers(ik, pose, seq, cycle, weight);

        if let Some(mut lock_ik) = seq_ik {
            lock_ik.solve_sequence_locks(self, seq, pose);
        }
    }

    /// Accumulate every autoplay sequence at the wall clock
    ///
    /// Autoplay locks are captured before and solved after.
    pub fn calc_autoplay_sequences(&mut self, mut ik: Option<&mut IkContext>, pose: &mut Pose) {
        if let Some(ctx) = ik.as_deref_mut() {
            ctx.add_autoplay_locks(self, pose);
        }

        let asset = Arc::clone(&self.asset);
        for (seq, desc) in asset.sequences().iter().enumerate() {
            if !desc.flags.contains(SequenceFlags::AUTOPLAY) {
                continue;
            }
            let cycle = (self.time * self.local_cps(seq)).rem_euclid(1.0);
            self.accumulate_pose(None, pose, seq, cycle, 1.0);
        }

        if let Some(ctx) = ik {
            ctx.solve_autoplay_locks(self, pose);
        }
    }
}
