//! Closed-form initialization for radio source localization.
//!
//! These solvers are exact for noise-free input and are used to seed the
//! non-linear refinement in `radiolocation-optim`.

pub mod lateration;

pub use lateration::*;
