use thiserror::Error;

/// Error types for studio asset construction and validation
///
/// Evaluation itself never fails: once a [`crate::StudioAsset`] has been
/// built, every runtime path degrades to a safe default instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnimError {
    /// A bone index or parent reference is out of range
    #[error("Invalid bone: {0}")]
    InvalidBone(String),

    /// A sequence index is out of range or the sequence is malformed
    #[error("Invalid sequence: {0}")]
    InvalidSequence(String),

    /// An animation index is out of range or the animation is malformed
    #[error("Invalid animation: {0}")]
    InvalidAnimation(String),

    /// A pose parameter reference is out of range
    #[error("Invalid pose parameter: {0}")]
    InvalidPoseParameter(String),

    /// An IK chain references missing bones
    #[error("Invalid IK chain: {0}")]
    InvalidIkChain(String),

    /// Cross reference between asset tables is broken
    #[error("Reference error: {0}")]
    ReferenceError(String),

    /// Generic validation failure
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl AnimError {
    /// Create an invalid bone error
    pub fn invalid_bone<S: Into<String>>(msg: S) -> Self {
        Self::InvalidBone(msg.into())
    }

    /// Create an invalid sequence error
    pub fn invalid_sequence<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSequence(msg.into())
    }

    /// Create an invalid animation error
    pub fn invalid_animation<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAnimation(msg.into())
    }

    /// Create an invalid pose parameter error
    pub fn invalid_pose_parameter<S: Into<String>>(msg: S) -> Self {
        Self::InvalidPoseParameter(msg.into())
    }

    /// Create an invalid IK chain error
    pub fn invalid_ik_chain<S: Into<String>>(msg: S) -> Self {
        Self::InvalidIkChain(msg.into())
    }

    /// Create a reference error
    pub fn reference<S: Into<String>>(msg: S) -> Self {
        Self::ReferenceError(msg.into())
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Result type using AnimError
pub type Result<T> = std::result::Result<T, AnimError>;
