use super::RobustSourceEstimator;
use radiolocation_core::Real;

/// Lifecycle and progress hooks of a robust estimation.
///
/// Every hook runs synchronously on the estimating thread while the estimator
/// is locked: [`RobustSourceEstimator::is_locked`] returns `true` and every
/// setter fails with `Locked`. The listener itself is detached from the
/// estimator for the duration of the run.
pub trait RobustEstimatorListener<S, const D: usize> {
    fn on_estimate_start(&mut self, _estimator: &RobustSourceEstimator<S, D>) {}

    /// Called after a successful estimation, before the estimator unlocks.
    fn on_estimate_end(&mut self, _estimator: &RobustSourceEstimator<S, D>) {}

    /// Called once per sampling iteration with its zero-based index.
    fn on_estimate_next_iteration(
        &mut self,
        _estimator: &RobustSourceEstimator<S, D>,
        _iteration: usize,
    ) {
    }

    /// Called when progress (in `[0, 1]`) advanced by at least the progress delta.
    fn on_estimate_progress_change(
        &mut self,
        _estimator: &RobustSourceEstimator<S, D>,
        _progress: Real,
    ) {
    }
}
