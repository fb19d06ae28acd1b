//! Robust (RANSAC-family) localization of a radio source.
//!
//! [`RobustSourceEstimator`] owns a reading list and a [`RobustEstimatorConfig`].
//! [`estimate`](RobustSourceEstimator::estimate) locks the estimator, runs the
//! shared consensus loop with candidate fits on minimal reading subsets,
//! optionally refines the best candidate over its inliers and unlocks again.
//! While locked every setter fails with [`RobustEstimatorError::Locked`].

mod config;
mod error;
mod listener;

pub use config::RobustEstimatorConfig;
pub use error::RobustEstimatorError;
pub use listener::RobustEstimatorListener;

use config::{
    check_confidence, check_max_iterations, check_path_loss_exponent, check_progress_delta,
    check_threshold, check_transmitted_power,
};
use log::{debug, trace};
use radiolocation_core::{
    consensus_fit, ConsensusMethod, ConsensusObserver, ConsensusResult, EstimatedSource,
    Estimator, InliersData, Pt, RadioSource, Reading, Real, Unknowns,
};
use radiolocation_optim::{
    reading_residual, solve_source, validate_readings, EstimationError, SolveOptions, SourceParams,
    SourceSeed,
};
use std::marker::PhantomData;

/// Candidate fits on minimal subsets, scored by per-reading residual.
struct SourceCandidates<S, const D: usize> {
    unknowns: Unknowns,
    seed: SourceSeed<D>,
    solver: SolveOptions,
    power_fallback: Real,
    _source: PhantomData<S>,
}

impl<S: RadioSource, const D: usize> Estimator for SourceCandidates<S, D> {
    type Datum = Reading<S, D>;
    type Model = SourceParams<D>;

    fn min_samples(&self) -> usize {
        self.unknowns.min_readings(D)
    }

    fn fit(&self, data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model> {
        let subset: Vec<&Reading<S, D>> = sample_indices.iter().map(|&i| &data[i]).collect();
        match solve_source(&subset, &self.seed, self.unknowns, false, &self.solver) {
            Ok(estimate) => Some(estimate.params(self.power_fallback)),
            Err(err) => {
                trace!("candidate fit on {:?} failed: {}", sample_indices, err);
                None
            }
        }
    }

    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> Real {
        reading_residual(datum, model)
    }
}

/// Forwards consensus notifications to the detached listener.
struct ListenerObserver<'a, S, const D: usize> {
    estimator: &'a RobustSourceEstimator<S, D>,
    listener: Option<&'a mut Box<dyn RobustEstimatorListener<S, D>>>,
}

impl<S, const D: usize> ConsensusObserver for ListenerObserver<'_, S, D> {
    fn on_iteration(&mut self, iteration: usize) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_estimate_next_iteration(self.estimator, iteration);
        }
    }

    fn on_progress(&mut self, progress: Real) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_estimate_progress_change(self.estimator, progress);
        }
    }
}

/// Robust estimator of a source position, and optionally of its transmitted
/// power and path-loss exponent.
pub struct RobustSourceEstimator<S, const D: usize> {
    readings: Vec<Reading<S, D>>,
    quality_scores: Option<Vec<Real>>,
    listener: Option<Box<dyn RobustEstimatorListener<S, D>>>,
    initial_position: Option<Pt<D>>,
    config: RobustEstimatorConfig,
    locked: bool,
    result: Option<EstimatedSource<S, D>>,
}

impl<S: RadioSource + Clone, const D: usize> Default for RobustSourceEstimator<S, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RadioSource + Clone, const D: usize> RobustSourceEstimator<S, D> {
    /// Empty estimator with the default configuration (not ready).
    pub fn new() -> Self {
        Self {
            readings: Vec::new(),
            quality_scores: None,
            listener: None,
            initial_position: None,
            config: RobustEstimatorConfig::default(),
            locked: false,
            result: None,
        }
    }

    /// Estimator over `readings` with a validated `config`.
    pub fn with_config(
        readings: Vec<Reading<S, D>>,
        config: RobustEstimatorConfig,
    ) -> Result<Self, RobustEstimatorError> {
        let mut estimator = Self::new();
        estimator.set_config(config)?;
        estimator.set_readings(readings)?;
        Ok(estimator)
    }

    fn ensure_unlocked(&self) -> Result<(), RobustEstimatorError> {
        if self.locked {
            Err(RobustEstimatorError::Locked)
        } else {
            Ok(())
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Minimum number of readings for the enabled unknowns.
    pub fn min_readings(&self) -> usize {
        self.config.unknowns().min_readings(D)
    }

    fn readiness(&self) -> Result<(), RobustEstimatorError> {
        let refs: Vec<&Reading<S, D>> = self.readings.iter().collect();
        validate_readings(&refs, self.config.unknowns())
            .map_err(|err| RobustEstimatorError::NotReady(err.to_string()))?;
        if self.config.method == ConsensusMethod::Prosac {
            let scores = self.quality_scores.as_ref().map_or(0, Vec::len);
            if scores != self.readings.len() {
                return Err(RobustEstimatorError::NotReady(format!(
                    "prosac needs one quality score per reading ({} scores, {} readings)",
                    scores,
                    self.readings.len()
                )));
            }
        }
        Ok(())
    }

    /// Whether the readings are consistent and numerous enough for the enabled unknowns.
    pub fn is_ready(&self) -> bool {
        self.readiness().is_ok()
    }

    pub fn readings(&self) -> &[Reading<S, D>] {
        &self.readings
    }

    pub fn quality_scores(&self) -> Option<&[Real]> {
        self.quality_scores.as_deref()
    }

    /// Listener currently attached (detached while an estimation runs).
    pub fn listener(&self) -> Option<&dyn RobustEstimatorListener<S, D>> {
        self.listener.as_deref()
    }

    pub fn initial_position(&self) -> Option<&Pt<D>> {
        self.initial_position.as_ref()
    }

    pub fn config(&self) -> &RobustEstimatorConfig {
        &self.config
    }

    pub fn method(&self) -> ConsensusMethod {
        self.config.method
    }

    pub fn threshold(&self) -> Real {
        self.config.threshold
    }

    pub fn confidence(&self) -> Real {
        self.config.confidence
    }

    pub fn max_iterations(&self) -> usize {
        self.config.max_iterations
    }

    pub fn progress_delta(&self) -> Real {
        self.config.progress_delta
    }

    pub fn initial_transmitted_power_dbm(&self) -> Option<Real> {
        self.config.initial_transmitted_power_dbm
    }

    pub fn initial_path_loss_exponent(&self) -> Real {
        self.config.initial_path_loss_exponent
    }

    pub fn is_transmitted_power_estimation_enabled(&self) -> bool {
        self.config.estimate_transmitted_power
    }

    pub fn is_path_loss_estimation_enabled(&self) -> bool {
        self.config.estimate_path_loss_exponent
    }

    pub fn is_result_refined(&self) -> bool {
        self.config.refine_result
    }

    pub fn is_covariance_kept(&self) -> bool {
        self.config.keep_covariance
    }

    pub fn is_inliers_kept(&self) -> bool {
        self.config.keep_inliers
    }

    pub fn is_residuals_kept(&self) -> bool {
        self.config.keep_residuals
    }

    /// Result of the last successful estimation (cleared when a new one starts).
    pub fn result(&self) -> Option<&EstimatedSource<S, D>> {
        self.result.as_ref()
    }

    /// Replace the whole configuration after validating it.
    pub fn set_config(&mut self, config: RobustEstimatorConfig) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Replace the readings.
    ///
    /// The list must have a single reading kind able to constrain the enabled
    /// unknowns, and at least [`min_readings`](Self::min_readings) entries.
    pub fn set_readings(&mut self, readings: Vec<Reading<S, D>>) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        let refs: Vec<&Reading<S, D>> = readings.iter().collect();
        validate_readings(&refs, self.config.unknowns())
            .map_err(|err| RobustEstimatorError::InvalidArgument(err.to_string()))?;
        self.readings = readings;
        Ok(())
    }

    /// Per-reading quality scores (higher is better), used by PROSAC only.
    pub fn set_quality_scores(
        &mut self,
        quality_scores: Option<Vec<Real>>,
    ) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        if let Some(scores) = &quality_scores {
            if scores.iter().any(|q| !q.is_finite()) {
                return Err(RobustEstimatorError::InvalidArgument(
                    "quality scores must be finite".to_string(),
                ));
            }
        }
        self.quality_scores = quality_scores;
        Ok(())
    }

    pub fn set_listener(
        &mut self,
        listener: Option<Box<dyn RobustEstimatorListener<S, D>>>,
    ) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.listener = listener;
        Ok(())
    }

    /// Starting position for every candidate fit (skips the linear seed).
    pub fn set_initial_position(
        &mut self,
        initial_position: Option<Pt<D>>,
    ) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        if let Some(p) = &initial_position {
            if p.coords.iter().any(|c| !c.is_finite()) {
                return Err(RobustEstimatorError::InvalidArgument(
                    "initial position must be finite".to_string(),
                ));
            }
        }
        self.initial_position = initial_position;
        Ok(())
    }

    pub fn set_initial_transmitted_power_dbm(
        &mut self,
        dbm: Option<Real>,
    ) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        if let Some(tx) = dbm {
            check_transmitted_power(tx)?;
        }
        self.config.initial_transmitted_power_dbm = dbm;
        Ok(())
    }

    pub fn set_initial_path_loss_exponent(&mut self, n: Real) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        check_path_loss_exponent(n)?;
        self.config.initial_path_loss_exponent = n;
        Ok(())
    }

    pub fn set_transmitted_power_estimation_enabled(
        &mut self,
        enabled: bool,
    ) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.config.estimate_transmitted_power = enabled;
        Ok(())
    }

    pub fn set_path_loss_estimation_enabled(
        &mut self,
        enabled: bool,
    ) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.config.estimate_path_loss_exponent = enabled;
        Ok(())
    }

    pub fn set_method(&mut self, method: ConsensusMethod) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.config.method = method;
        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: Real) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        check_threshold(threshold)?;
        self.config.threshold = threshold;
        Ok(())
    }

    pub fn set_confidence(&mut self, confidence: Real) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        check_confidence(confidence)?;
        self.config.confidence = confidence;
        Ok(())
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        check_max_iterations(max_iterations)?;
        self.config.max_iterations = max_iterations;
        Ok(())
    }

    pub fn set_progress_delta(&mut self, progress_delta: Real) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        check_progress_delta(progress_delta)?;
        self.config.progress_delta = progress_delta;
        Ok(())
    }

    pub fn set_result_refined(&mut self, refine: bool) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.config.refine_result = refine;
        Ok(())
    }

    pub fn set_covariance_kept(&mut self, keep: bool) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.config.keep_covariance = keep;
        Ok(())
    }

    pub fn set_inliers_kept(&mut self, keep: bool) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.config.keep_inliers = keep;
        Ok(())
    }

    pub fn set_residuals_kept(&mut self, keep: bool) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.config.keep_residuals = keep;
        Ok(())
    }

    pub fn set_seed(&mut self, seed: u64) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.config.seed = seed;
        Ok(())
    }

    pub fn set_solver_options(&mut self, solver: SolveOptions) -> Result<(), RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.config.solver = solver;
        Ok(())
    }

    /// Run the robust estimation.
    ///
    /// The estimator is locked for the duration of the call, including every
    /// listener callback, and unlocked again on both success and failure.
    ///
    /// # Errors
    ///
    /// - [`RobustEstimatorError::Locked`] when called from inside a run;
    /// - [`RobustEstimatorError::NotReady`] without enough consistent readings;
    /// - [`RobustEstimatorError::Estimation`] when a fixed transmitted power is missing;
    /// - [`RobustEstimatorError::NoConsensus`] / [`RobustEstimatorError::RefinementFailed`]
    ///   when no acceptable solution is found.
    pub fn estimate(&mut self) -> Result<EstimatedSource<S, D>, RobustEstimatorError> {
        self.ensure_unlocked()?;
        self.readiness()?;

        self.result = None;
        self.locked = true;
        let mut listener = self.listener.take();
        let outcome = self.run_locked(listener.as_mut());
        self.listener = listener;
        self.locked = false;

        let estimated = outcome?;
        self.result = Some(estimated.clone());
        Ok(estimated)
    }

    fn candidate_seed(&self) -> SourceSeed<D> {
        SourceSeed {
            position: self.initial_position,
            transmitted_power_dbm: self.config.initial_transmitted_power_dbm,
            path_loss_exponent: self.config.initial_path_loss_exponent,
            centroid_fallback: false,
        }
    }

    fn run_locked(
        &self,
        mut listener: Option<&mut Box<dyn RobustEstimatorListener<S, D>>>,
    ) -> Result<EstimatedSource<S, D>, RobustEstimatorError> {
        let config = &self.config;
        let unknowns = config.unknowns();
        let has_rssi = self.readings.iter().any(|r| r.kind().has_rssi());
        if has_rssi && !unknowns.transmitted_power && config.initial_transmitted_power_dbm.is_none()
        {
            return Err(EstimationError::MissingTransmittedPower.into());
        }

        if let Some(l) = listener.as_mut() {
            l.on_estimate_start(self);
        }

        let candidates = SourceCandidates {
            unknowns,
            seed: self.candidate_seed(),
            solver: config.solver,
            power_fallback: config.initial_transmitted_power_dbm.unwrap_or(0.0),
            _source: PhantomData::<S>,
        };
        debug!(
            "robust estimation: {:?} over {} readings, minimal sample {}",
            config.method,
            self.readings.len(),
            unknowns.min_readings(D)
        );

        let consensus: ConsensusResult<SourceParams<D>> = {
            let mut observer = ListenerObserver {
                estimator: self,
                listener: listener.as_deref_mut(),
            };
            consensus_fit(
                &candidates,
                self.readings.as_slice(),
                &config.consensus_options(),
                self.quality_scores.as_deref(),
                &mut observer,
            )
        };

        let best = match (consensus.success, consensus.model) {
            (true, Some(model)) => model,
            _ => {
                return Err(RobustEstimatorError::NoConsensus {
                    iterations: consensus.iters,
                })
            }
        };
        debug!(
            "consensus after {} iterations: {} inliers of {}",
            consensus.iters,
            consensus.inliers.len(),
            self.readings.len()
        );

        let source = self
            .readings
            .first()
            .map(|r| r.source().clone())
            .ok_or_else(|| RobustEstimatorError::NotReady("no readings".to_string()))?;

        let mut estimated = if config.refine_result {
            let inliers: Vec<&Reading<S, D>> =
                consensus.inliers.iter().map(|&i| &self.readings[i]).collect();
            let seed = SourceSeed {
                position: Some(best.position),
                transmitted_power_dbm: Some(best.transmitted_power_dbm),
                path_loss_exponent: best.path_loss_exponent,
                centroid_fallback: true,
            };
            let refined =
                solve_source(&inliers, &seed, unknowns, config.keep_covariance, &config.solver)
                    .map_err(|err| {
                        debug!("refinement over {} inliers failed: {}", inliers.len(), err);
                        RobustEstimatorError::RefinementFailed(err)
                    })?;
            refined.into_estimated_source(source)
        } else {
            EstimatedSource {
                source,
                position: best.position,
                position_covariance: None,
                transmitted_power_dbm: has_rssi.then_some(best.transmitted_power_dbm),
                transmitted_power_dbm_variance: None,
                path_loss_exponent: best.path_loss_exponent,
                path_loss_exponent_variance: None,
                covariance: None,
                inliers_data: None,
            }
        };

        estimated.inliers_data = Some(InliersData {
            num_inliers: consensus.inliers.len(),
            inliers: consensus.inlier_mask,
            residuals: consensus.residuals,
        });

        if let Some(l) = listener.as_mut() {
            l.on_estimate_end(self);
        }
        Ok(estimated)
    }
}
