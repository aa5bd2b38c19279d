//! Feature integration tests
//!
//! Each module evaluates the shared biped fixture end-to-end.

pub mod blending;
pub mod ik;
pub mod jiggle;
pub mod layers;
pub mod movement;
