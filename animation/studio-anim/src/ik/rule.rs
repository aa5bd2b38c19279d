//! Per-frame IK rule accumulation
//!
//! Sub-animations author IK rules with an activation window over the
//! cycle. When several sub-animations of a sequence are blended, their
//! rules with the same index are merged into one [`IkContextRule`] whose
//! window, geometry and animated error are weight-averaged.

use glam::{Quat, Vec3};

use crate::asset::{AnimDesc, AnimFlags, IkRuleDef, IkRuleType};
use crate::evaluator::calc_ik_error;
use crate::math::{quaternion_accumulate, quaternion_normalize, quaternion_scale, simple_spline};
use crate::setup::BoneSetup;

/// Rule weight below which a blended rule is dropped
const MIN_RULE_WEIGHT: f32 = 0.001;

/// Window span above which a looping ground rule is kept alive at its end
const GROUND_LOOP_SPAN: f32 = 0.75;

/// One merged IK rule for the current frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IkContextRule {
    pub kind: IkRuleType,
    pub chain: usize,
    /// Reference bone for self-relative rules, the root when `None`
    pub bone: Option<usize>,
    /// Target slot for ground and attachment rules
    pub slot: usize,

    pub height: f32,
    pub radius: f32,
    pub floor: f32,
    pub top: f32,
    pub drop: f32,

    /// Desired foot position relative to the reference frame
    pub pos: Vec3,
    /// Desired foot orientation relative to the reference frame
    pub q: Quat,

    pub start: f32,
    pub peak: f32,
    pub tail: f32,
    pub end: f32,

    /// Fade-out progress past the tail
    pub release: f32,
    /// Window weight at the evaluated cycle
    pub weight: f32,
    /// Weight of the sequence that contributed the rule
    pub rule_weight: f32,
    /// How latched the rule wants its target, 0..1
    pub latched: f32,

    pub attachment: usize,

    /// Preferred knee direction for lock rules
    pub knee_dir: Vec3,
    /// Knee position for lock rules
    pub knee_pos: Vec3,
}

/// Shift `cycle` past a window that wraps around the end of the cycle
fn wrap_cycle(start: f32, end: f32, cycle: f32) -> f32 {
    if end > 1.0 && cycle < start { cycle + 1.0 } else { cycle }
}

/// Trapezoid weight of the window at `cycle`, eased with the S-curve
pub fn window_weight(start: f32, peak: f32, tail: f32, end: f32, cycle: f32) -> f32 {
    let cycle = wrap_cycle(start, end, cycle);

    let value = if cycle < start {
        return 0.0;
    } else if cycle < peak {
        (cycle - start) / (peak - start)
    } else if cycle < tail {
        return 1.0;
    } else if cycle < end {
        1.0 - (cycle - tail) / (end - tail)
    } else {
        0.0
    };

    simple_spline(value)
}

impl IkContextRule {
    /// Window weight at `cycle`
    pub fn window_weight(&self, cycle: f32) -> f32 {
        window_weight(self.start, self.peak, self.tail, self.end, cycle)
    }

    /// Whether the rule should hold its latch at `cycle`
    pub fn should_latch(&self, cycle: f32) -> bool {
        let cycle = wrap_cycle(self.start, self.end, cycle);
        cycle >= self.peak && cycle < self.end
    }

    /// Linear progress through the tail at `cycle`
    pub fn tail(&self, cycle: f32) -> f32 {
        let cycle = wrap_cycle(self.start, self.end, cycle);
        if cycle <= self.tail || cycle >= self.end {
            0.0
        } else {
            (cycle - self.tail) / (self.end - self.tail)
        }
    }
}

/// Window weight of an authored rule at `cycle`, with the frame and
/// subframe fraction of its error track
pub fn anim_rule_weight(rule: &IkRuleDef, anim: &AnimDesc, cycle: f32) -> (f32, usize, f32) {
    let cycle = wrap_cycle(rule.start, rule.end, cycle);
    let last = anim.frame_count.saturating_sub(1) as f32;
    let frame_at = |c: f32| {
        let frame = (last * (c - rule.start)).max(0.0) + rule.first_frame as f32;
        let whole = frame.trunc();
        (whole as usize, frame - whole)
    };

    if cycle < rule.start {
        return (0.0, rule.first_frame, 0.0);
    }

    let (frame, fraction) = frame_at(cycle.min(rule.end));
    let value = if cycle < rule.peak {
        (cycle - rule.start) / (rule.peak - rule.start)
    } else if cycle < rule.tail {
        return (1.0, frame, fraction);
    } else if cycle < rule.end {
        1.0 - (cycle - rule.tail) / (rule.end - rule.tail)
    } else {
        0.0
    };

    (simple_spline(value), frame, fraction)
}

/// Animated foot error of `rule` at `cycle`
///
/// Returns the error position, orientation and the clamped window weight.
/// Rules without an error track, and non-ground rules outside their
/// window, yield `None`.
pub fn ik_anim_error(rule: &IkRuleDef, anim: &AnimDesc, cycle: f32) -> Option<(Vec3, Quat, f32)> {
    let (weight, frame, fraction) = anim_rule_weight(rule, anim, cycle);
    let weight = weight.clamp(0.0, 1.0);

    if rule.kind != IkRuleType::Ground && weight < 0.0001 {
        return None;
    }

    let track = rule.error.as_ref()?;
    let (pos, q) = calc_ik_error(track, frame.saturating_sub(rule.first_frame), fraction);
    Some((pos, q, weight))
}

impl BoneSetup {
    /// Merge rule `rule_index` across the blended sub-animations `anims`
    ///
    /// Returns `None` when the animations disagree on their rule tables,
    /// the merged rule is outside its window, or no animation contributes
    /// an error sample.
    pub fn ik_sequence_error(
        &self,
        cycle: f32,
        rule_index: usize,
        anims: &[(usize, f32); 4],
    ) -> Option<IkContextRule> {
        let asset = &self.asset;
        let first_anim = asset.anim(anims[0].0)?;

        let mut weighted: Vec<(&AnimDesc, &IkRuleDef, f32)> = Vec::with_capacity(4);
        for &(anim, weight) in anims {
            if weight == 0.0 {
                continue;
            }
            let desc = asset.anim(anim)?;
            if desc.ik_rules.len() != first_anim.ik_rules.len() {
                return None;
            }
            weighted.push((desc, desc.ik_rules.get(rule_index)?, weight));
        }

        let mut rule = IkContextRule::default();
        let mut reference: Option<f32> = None;
        for &(_, def, weight) in &weighted {
            let dt = match reference {
                Some(start) if def.start - start > 0.5 => -1.0,
                Some(start) if def.start - start < -0.5 => 1.0,
                Some(_) => 0.0,
                None => {
                    reference = Some(def.start);
                    0.0
                }
            };
            rule.start += (def.start + dt) * weight;
            rule.peak += (def.peak + dt) * weight;
            rule.tail += (def.tail + dt) * weight;
            rule.end += (def.end + dt) * weight;
        }

        let shift = if rule.start > 1.0 {
            -1.0
        } else if rule.start < 0.0 {
            1.0
        } else {
            0.0
        };
        rule.start += shift;
        rule.peak += shift;
        rule.tail += shift;
        rule.end += shift;

        let mut cycle = cycle;
        rule.weight = rule.window_weight(cycle);
        if rule.weight <= MIN_RULE_WEIGHT {
            let keep_alive = first_anim.flags.contains(AnimFlags::LOOPING)
                && first_anim
                    .ik_rules
                    .get(rule_index)
                    .is_some_and(|r| r.kind == IkRuleType::Ground)
                && rule.end - rule.start > GROUND_LOOP_SPAN;
            if !keep_alive {
                return None;
            }
            rule.weight = MIN_RULE_WEIGHT;
            cycle = rule.end - MIN_RULE_WEIGHT;
        }

        let latch = rule.should_latch(cycle);
        let tail = rule.tail(cycle);
        let mut q = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
        let mut total = 0.0;

        for &(desc, def, weight) in &weighted {
            rule.chain = def.chain;
            rule.bone = def.bone;
            rule.kind = def.kind;
            rule.slot = def.slot;

            rule.height += def.height * weight;
            rule.floor += def.floor * weight;
            rule.radius += def.radius * weight;
            rule.drop += def.drop * weight;
            rule.top += def.top * weight;
            rule.release += tail * weight;

            match def.kind {
                IkRuleType::SelfRelative
                | IkRuleType::World
                | IkRuleType::Ground
                | IkRuleType::Attachment => {
                    if let Some((pos, error_q, _)) = ik_anim_error(def, desc, cycle) {
                        rule.pos += pos * weight;
                        q = quaternion_accumulate(q, weight, error_q);
                        total += weight;
                    }
                }
                IkRuleType::Release | IkRuleType::Unlatch => total += weight,
            }

            rule.latched = if latch { rule.weight } else { 0.0 };
            if def.kind == IkRuleType::Attachment {
                rule.attachment = def.attachment;
            }
        }

        if total <= 0.0001 {
            return None;
        }
        if total < 0.999 {
            q = quaternion_scale(q, 1.0 / total);
            rule.pos /= total;
        }
        rule.q = quaternion_normalize(q);

        Some(rule)
    }
}
