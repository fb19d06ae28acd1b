//! Non-linear least-squares source localization built on `levenberg-marquardt`.
//!
//! The crate is split into:
//! - [`traits`]: a backend-agnostic [`NllsProblem`] / [`NllsSolverBackend`] pair,
//! - [`backend_lm`]: the Levenberg–Marquardt backend,
//! - [`problems::source`]: residuals and analytic Jacobian of the path-loss model,
//! - [`estimator`]: the non-robust estimator (linear seed, solve, covariance).

pub mod backend_lm;
pub mod estimator;
pub mod problems;
pub mod traits;

pub use backend_lm::LmBackend;
pub use estimator::*;
pub use problems::source::{reading_residual, SourceParams, SourceProblem};
pub use traits::*;
