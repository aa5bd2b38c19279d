//! Jiggle bone simulation
//!
//! Jiggle bones follow their animated "goal" matrix through damped
//! springs. Three independent behaviours can be combined per bone:
//!
//! - **Tip flex**: a point mass at `length` along the bone's forward axis,
//!   pulled toward the goal tip with optional yaw, pitch, angle and length
//!   constraints. The bone is re-aimed at the simulated tip.
//! - **Base spring**: the bone origin springs toward the goal origin inside
//!   a box around it.
//! - **Boing**: impacts (sudden speed or direction changes of the goal
//!   origin) trigger a decaying squash and stretch along the impact axis.
//!
//! Goal columns are read as left (x), up (y) and forward (z). State is
//! kept per bone and reseeded when a bone has not been updated for a
//! while, so characters that pop in do not whip from a stale pose.

use std::collections::HashMap;
use std::f32::consts::PI;

use glam::{Affine3A, Mat3A, Vec3, Vec3A};
use log::debug;

use crate::asset::{JiggleFlags, JiggleParams};
use crate::math::{matrix_column, matrix_from_columns, matrix_origin, set_matrix_origin};
use crate::settings::JiggleSettings;

/// Speed below which the goal origin counts as stationary for boing
const BOING_REST_SPEED: f32 = 1e-5;

/// Damping below which a boing has died out
const BOING_MIN_DAMPING: f32 = 0.01;

/// Simulation state of one jiggle bone
#[derive(Debug, Clone, PartialEq)]
pub struct JiggleState {
    /// Time of the last update
    pub last_update: f32,

    pub base_pos: Vec3,
    pub base_last_pos: Vec3,
    pub base_vel: Vec3,
    pub base_accel: Vec3,

    pub tip_pos: Vec3,
    pub tip_vel: Vec3,
    pub tip_accel: Vec3,

    /// Left axis of the previous update, used to keep the frame from flipping
    pub last_left: Vec3,

    pub last_boing_pos: Vec3,
    pub boing_dir: Vec3,
    pub boing_vel_dir: Vec3,
    pub boing_speed: f32,
    pub boing_time: f32,
}

impl JiggleState {
    /// State at rest on the goal
    pub fn new(time: f32, base: Vec3, tip: Vec3) -> Self {
        Self {
            last_update: time,
            base_pos: base,
            base_last_pos: base,
            base_vel: Vec3::ZERO,
            base_accel: Vec3::ZERO,
            tip_pos: tip,
            tip_vel: Vec3::ZERO,
            tip_accel: Vec3::ZERO,
            last_left: Vec3::ZERO,
            last_boing_pos: base,
            boing_dir: Vec3::Z,
            boing_vel_dir: Vec3::ZERO,
            boing_speed: 0.0,
            boing_time: 0.0,
        }
    }
}

/// Goal frame of one update
struct Goal {
    left: Vec3,
    up: Vec3,
    forward: Vec3,
    base: Vec3,
    tip: Vec3,
}

impl Goal {
    fn new(matrix: &Affine3A, length: f32) -> Self {
        let forward = matrix_column(matrix, 2);
        let base = matrix_origin(matrix);
        Self {
            left: matrix_column(matrix, 0),
            up: matrix_column(matrix, 1),
            forward,
            base,
            tip: base + forward * length,
        }
    }

    /// Components of `v` along left, up and forward
    fn local(&self, v: Vec3) -> Vec3 {
        Vec3::new(self.left.dot(v), self.up.dot(v), self.forward.dot(v))
    }
}

/// Per-instance jiggle bone simulator
#[derive(Debug, Clone, Default)]
pub struct JiggleBones {
    settings: JiggleSettings,
    states: HashMap<usize, JiggleState>,
}

impl JiggleBones {
    /// Create an empty simulator
    pub fn new(settings: JiggleSettings) -> Self {
        Self {
            settings,
            states: HashMap::new(),
        }
    }

    /// Simulator settings
    pub fn settings(&self) -> &JiggleSettings {
        &self.settings
    }

    /// Drop all bone states
    pub fn reset(&mut self) {
        self.states.clear();
    }

    /// State of `bone`, if it has been simulated
    pub fn state(&self, bone: usize) -> Option<&JiggleState> {
        self.states.get(&bone)
    }

    /// Number of simulated bones
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no bone has been simulated yet
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Advance `bone` to `time` and return its simulated world matrix
    pub fn update(&mut self, bone: usize, params: &JiggleParams, goal_matrix: &Affine3A, time: f32) -> Affine3A {
        let settings = self.settings;
        let goal = Goal::new(goal_matrix, params.length);

        let state = self
            .states
            .entry(bone)
            .or_insert_with(|| JiggleState::new(time, goal.base, goal.tip));

        if time - state.last_update > settings.reseed_interval {
            debug!("Reseeding jiggle bone {} after {:.3}s", bone, time - state.last_update);
            *state = JiggleState::new(time, goal.base, goal.tip);
        }

        let dt = (time - state.last_update).clamp(settings.min_dt, settings.max_dt);
        state.last_update = time;

        let mut matrix = *goal_matrix;

        if params.has_tip_flex() {
            matrix = simulate_tip(state, params, &goal, dt);
        }

        if params.flags.contains(JiggleFlags::BASE_SPRING) {
            simulate_base(state, params, &goal, dt);
            if !params.has_tip_flex() {
                matrix = *goal_matrix;
            }
            set_matrix_origin(&mut matrix, state.base_pos);
        } else if params.flags.contains(JiggleFlags::BOING) {
            matrix = simulate_boing(state, params, &settings, &goal, goal_matrix, dt);
        }

        matrix
    }
}

fn simulate_tip(state: &mut JiggleState, params: &JiggleParams, goal: &Goal, dt: f32) -> Affine3A {
    let flags = params.flags;

    state.tip_accel.z -= params.tip_mass;

    if flags.contains(JiggleFlags::FLEXIBLE) {
        let error = goal.local(goal.tip - state.tip_pos);
        let vel = goal.local(state.tip_vel);

        let yaw = params.yaw_stiffness * error.x - params.yaw_damping * vel.x;
        let pitch = params.pitch_stiffness * error.y - params.pitch_damping * vel.y;

        state.tip_accel += yaw * goal.left + pitch * goal.up;
        if !flags.contains(JiggleFlags::LENGTH_CONSTRAINT) {
            let along = params.along_stiffness * error.z - params.along_damping * vel.z;
            state.tip_accel += along * goal.forward;
        }
    }

    state.tip_vel += state.tip_accel * dt;
    state.tip_pos += state.tip_vel * dt;
    state.tip_accel = Vec3::ZERO;

    if flags.intersects(JiggleFlags::YAW_CONSTRAINT | JiggleFlags::PITCH_CONSTRAINT) {
        let goal_rot = Mat3A::from_cols(goal.left.into(), goal.up.into(), goal.forward.into());
        let mut along = goal.local(state.tip_pos - goal.base);

        if flags.contains(JiggleFlags::YAW_CONSTRAINT) {
            let error = along.x.atan2(along.z);
            let limit = if error < params.min_yaw {
                Some(params.min_yaw)
            } else if error > params.max_yaw {
                Some(params.max_yaw)
            } else {
                None
            };

            if let Some(yaw) = limit {
                let (sy, cy) = yaw.sin_cos();
                let yaw_matrix = Mat3A::from_cols(
                    Vec3A::new(cy, 0.0, -sy),
                    Vec3A::Y,
                    Vec3A::new(sy, 0.0, cy),
                );
                let limit_matrix = goal_rot * yaw_matrix;
                let (left, up, forward) = columns(&limit_matrix);

                let world_along = state.tip_pos - goal.base;
                state.tip_pos = goal.base + up.dot(world_along) * up + forward.dot(world_along) * forward;

                let lv = Vec3::new(left.dot(state.tip_vel), up.dot(state.tip_vel), forward.dot(state.tip_vel));
                state.tip_accel -= params.yaw_friction * (lv.y * up + lv.z * forward);
                state.tip_vel = -params.yaw_bounce * lv.x * left + lv.y * up + lv.z * forward;

                along = goal.local(state.tip_pos - goal.base);
            }
        }

        if flags.contains(JiggleFlags::PITCH_CONSTRAINT) {
            let error = along.y.atan2(along.z);
            let limit = if error < params.min_pitch {
                Some(params.min_pitch)
            } else if error > params.max_pitch {
                Some(params.max_pitch)
            } else {
                None
            };

            if let Some(pitch) = limit {
                let (sp, cp) = pitch.sin_cos();
                let pitch_matrix = Mat3A::from_cols(
                    Vec3A::X,
                    Vec3A::new(0.0, cp, -sp),
                    Vec3A::new(0.0, sp, cp),
                );
                let limit_matrix = goal_rot * pitch_matrix;
                let (left, _, forward) = columns(&limit_matrix);

                let world_along = state.tip_pos - goal.base;
                state.tip_pos = goal.base + left.dot(world_along) * left + forward.dot(world_along) * forward;

                // Pitch limits drop the velocity instead of bouncing
                state.tip_vel = Vec3::ZERO;
            }
        }
    }

    let mut forward = (state.tip_pos - goal.base).normalize_or_zero();

    if flags.contains(JiggleFlags::ANGLE_CONSTRAINT) {
        let dot = forward.dot(goal.forward).clamp(-1.0, 1.0);
        let mut angle = dot.acos();
        if dot < 0.0 {
            angle = 2.0 * PI - angle;
        }

        if angle > params.angle_limit {
            let max_between = params.length * params.angle_limit.sin();
            let delta = (goal.tip - state.tip_pos).normalize_or_zero();
            state.tip_pos = goal.tip - max_between * delta;
            forward = (state.tip_pos - goal.base).normalize_or_zero();
        }
    }

    if flags.contains(JiggleFlags::LENGTH_CONSTRAINT) {
        state.tip_pos = goal.base + params.length * forward;
        state.tip_vel -= state.tip_vel.dot(forward) * forward;
    }

    let mut left = goal.up.cross(forward).normalize_or_zero();
    if left.dot(state.last_left) < 0.0 {
        left = -left;
    }
    state.last_left = left;
    let up = forward.cross(left);

    matrix_from_columns(left, up, forward, goal.base)
}

fn columns(m: &Mat3A) -> (Vec3, Vec3, Vec3) {
    (m.x_axis.into(), m.y_axis.into(), m.z_axis.into())
}

/// Clamp `value` into `[min, max]`, reporting whether it was clamped
fn clamp_axis(value: f32, min: f32, max: f32) -> (f32, bool) {
    if value < min {
        (min, true)
    } else if value > max {
        (max, true)
    } else {
        (value, false)
    }
}

fn simulate_base(state: &mut JiggleState, params: &JiggleParams, goal: &Goal, dt: f32) {
    state.base_accel.z -= params.base_mass;
    state.base_accel +=
        params.base_stiffness * (goal.base - state.base_pos) - params.base_damping * state.base_vel;

    state.base_vel += state.base_accel * dt;
    state.base_pos += state.base_vel * dt;
    state.base_accel = Vec3::ZERO;

    let error = goal.local(state.base_pos - goal.base);
    let vel = goal.local(state.base_vel);

    let (x, clamped) = clamp_axis(error.x, params.base_min_left, params.base_max_left);
    if clamped {
        state.base_accel -= params.base_left_friction * (vel.y * goal.up + vel.z * goal.forward);
    }
    let (y, clamped) = clamp_axis(error.y, params.base_min_up, params.base_max_up);
    if clamped {
        state.base_accel -= params.base_up_friction * (vel.x * goal.left + vel.z * goal.forward);
    }
    let (z, clamped) = clamp_axis(error.z, params.base_min_forward, params.base_max_forward);
    if clamped {
        state.base_accel -= params.base_forward_friction * (vel.x * goal.left + vel.y * goal.up);
    }

    state.base_pos = goal.base + x * goal.left + y * goal.up + z * goal.forward;
    state.base_vel = (state.base_pos - state.base_last_pos) / dt;
    state.base_last_pos = state.base_pos;
}

fn simulate_boing(
    state: &mut JiggleState,
    params: &JiggleParams,
    settings: &JiggleSettings,
    goal: &Goal,
    goal_matrix: &Affine3A,
    dt: f32,
) -> Affine3A {
    let delta = goal.base - state.last_boing_pos;
    state.last_boing_pos = goal.base;

    let mut speed = delta.length();
    let dir = if speed < BOING_REST_SPEED {
        speed = 0.0;
        Vec3::Z
    } else {
        speed /= dt;
        delta.normalize()
    };

    state.boing_time += dt;

    let moving = speed > settings.boing_min_speed || state.boing_speed > settings.boing_min_speed;
    if moving && state.boing_time > settings.boing_min_interval {
        let impact = (state.boing_speed - speed).abs() > params.boing_impact_speed
            || dir.dot(state.boing_vel_dir) < params.boing_impact_angle;
        if impact {
            state.boing_time = 0.0;
            state.boing_dir = -dir;
        }
    }

    state.boing_vel_dir = dir;
    state.boing_speed = speed;

    let mut damping = 1.0 - params.boing_damping_rate * state.boing_time;
    if damping < BOING_MIN_DAMPING {
        return *goal_matrix;
    }
    damping *= damping;
    damping *= damping;

    let flex = params.boing_amplitude * (params.boing_frequency * state.boing_time).cos() * damping;
    let squash = 1.0 + flex;
    let stretch = 1.0 - flex;

    let boing_dir = state.boing_dir;
    let side = if boing_dir.x.abs() < 0.9 {
        boing_dir.cross(Vec3::X).normalize_or_zero()
    } else {
        boing_dir.cross(Vec3::Z).normalize_or_zero()
    };
    let other_side = boing_dir.cross(side);

    let from_boing = Mat3A::from_cols(side.into(), other_side.into(), boing_dir.into());
    let scale = Mat3A::from_diagonal(Vec3::new(squash, squash, stretch));
    let xfrm = from_boing.transpose() * scale * from_boing;

    Affine3A {
        matrix3: goal_matrix.matrix3 * xfrm,
        translation: goal.base.into(),
    }
}
