//! Tunable constants for evaluation, IK and jiggle simulation
//!
//! All settings structs implement [`Default`] with the values the runtime
//! has always shipped with, and expose chainable `with_*` setters.

/// IK context configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkSettings {
    /// Number of persistent IK target slots allocated per context
    pub target_capacity: usize,
    /// Seconds an error must persist before the release ramp starts falling
    pub error_window: f32,
    /// Seconds after the last error before release tracking stops
    pub release_hold: f32,
    /// Release ramp change per second of error
    pub release_rate: f32,
    /// Latch amount above which geometric errors are reported
    pub latch_error_threshold: f32,
    /// Minimum `2|w| - 1` of a latch rotation delta before flagging an error
    pub max_ankle_cos: f32,
    /// Latch delta multiplier applied when a chain fails to solve
    pub failure_decay: f32,
}

impl Default for IkSettings {
    fn default() -> Self {
        Self {
            target_capacity: 12,
            error_window: 0.25,
            release_hold: 0.5,
            release_rate: 4.0,
            latch_error_threshold: 0.2,
            max_ankle_cos: 0.707,
            failure_decay: 0.8,
        }
    }
}

impl IkSettings {
    /// Set the number of target slots
    pub fn with_target_capacity(mut self, capacity: usize) -> Self {
        self.target_capacity = capacity;
        self
    }

    /// Set the release ramp rate
    pub fn with_release_rate(mut self, rate: f32) -> Self {
        self.release_rate = rate;
        self
    }

    /// Set the latch delta decay applied on solver failure
    pub fn with_failure_decay(mut self, decay: f32) -> Self {
        self.failure_decay = decay;
        self
    }
}

/// Jiggle bone simulation configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JiggleSettings {
    /// Smallest integration step in seconds
    pub min_dt: f32,
    /// Largest integration step in seconds
    pub max_dt: f32,
    /// A gap longer than this (seconds) reseeds the simulation at the goal
    pub reseed_interval: f32,
    /// Speed threshold (units/s) for a boing impact
    pub boing_min_speed: f32,
    /// Minimum seconds between boing impacts
    pub boing_min_interval: f32,
}

impl Default for JiggleSettings {
    fn default() -> Self {
        Self {
            min_dt: 0.001,
            max_dt: 0.0333,
            reseed_interval: 0.5,
            boing_min_speed: 5.0,
            boing_min_interval: 0.5,
        }
    }
}

impl JiggleSettings {
    /// Set the integration step clamp
    pub fn with_dt_range(mut self, min_dt: f32, max_dt: f32) -> Self {
        self.min_dt = min_dt;
        self.max_dt = max_dt;
        self
    }

    /// Set the reseed interval
    pub fn with_reseed_interval(mut self, seconds: f32) -> Self {
        self.reseed_interval = seconds;
        self
    }
}

/// Compatibility switches for sequence queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlendSettings {
    /// Add 0.01 before truncating the blended max frame
    pub legacy_max_frame_fudge: bool,
    /// Sum (rather than weight-average) blended yaw in sequence movement
    pub legacy_movement_angle_sum: bool,
}

impl BlendSettings {
    /// Settings that reproduce the historical numeric behaviour exactly
    pub fn legacy() -> Self {
        Self {
            legacy_max_frame_fudge: true,
            legacy_movement_angle_sum: true,
        }
    }

    /// Toggle the max frame fudge
    pub fn with_legacy_max_frame_fudge(mut self, enabled: bool) -> Self {
        self.legacy_max_frame_fudge = enabled;
        self
    }

    /// Toggle summed movement yaw
    pub fn with_legacy_movement_angle_sum(mut self, enabled: bool) -> Self {
        self.legacy_movement_angle_sum = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ik_defaults() {
        let settings = IkSettings::default();
        assert_eq!(settings.target_capacity, 12);
        assert!((settings.release_rate - 4.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_builder_chain() {
        let settings = IkSettings::default()
            .with_target_capacity(4)
            .with_failure_decay(0.5);
        assert_eq!(settings.target_capacity, 4);
        assert!((settings.failure_decay - 0.5).abs() < f32::EPSILON);

        let blend = BlendSettings::default().with_legacy_max_frame_fudge(true);
        assert!(blend.legacy_max_frame_fudge);
        assert!(!blend.legacy_movement_angle_sum);
        assert_eq!(BlendSettings::legacy(), BlendSettings {
            legacy_max_frame_fudge: true,
            legacy_movement_angle_sum: true,
        });
    }
}
