use radiolocation_optim::EstimationError;
use thiserror::Error;

/// Errors raised by [`RobustSourceEstimator`](super::RobustSourceEstimator).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RobustEstimatorError {
    /// A setter received an out-of-range value; the estimator is unchanged.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Not enough (or inconsistent) readings to run an estimation.
    #[error("estimator is not ready: {0}")]
    NotReady(String),
    /// An estimation is running; configuration cannot change.
    #[error("estimator is locked while an estimation is running")]
    Locked,
    /// No candidate gathered enough inliers within the iteration budget.
    #[error("no consensus found after {iterations} iterations")]
    NoConsensus { iterations: usize },
    /// The final fit over the inliers failed.
    #[error("refinement over inliers failed: {0}")]
    RefinementFailed(#[source] EstimationError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
}
