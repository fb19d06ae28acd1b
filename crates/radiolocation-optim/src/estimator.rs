//! Non-robust source estimation: linear seed followed by Levenberg–Marquardt.
//!
//! [`solve_source`] is the workhorse shared by the direct [`SourceEstimator`]
//! and the robust estimator's candidate fits and refinement.

use crate::problems::source::{SourceParams, SourceProblem};
use crate::{LmBackend, NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
use log::debug;
use nalgebra::{DMatrix, DVector};
use radiolocation_core::{
    centroid, distance_from_rssi, free_space_gain_db, EstimatedSource, MatD, Pt, RadioSource,
    Reading, ReadingKind, Real, Unknowns, FREE_SPACE_PATH_LOSS_EXPONENT,
};
use radiolocation_linear::{lateration_from_ranges, lateration_from_rssi, LaterationError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimationError {
    #[error("not enough readings: need {needed}, got {got}")]
    NotReady { needed: usize, got: usize },
    #[error("invalid readings: {0}")]
    InvalidReadings(String),
    #[error("transmitted power is neither estimated nor provided")]
    MissingTransmittedPower,
    #[error("degenerate reading geometry: {0}")]
    Degenerate(LaterationError),
    #[error("solver did not converge after {evaluations} evaluations")]
    NotConverged { evaluations: usize },
    #[error("solver produced a non-finite solution")]
    NonFinite,
    #[error("normal matrix is singular, covariance unavailable")]
    SingularCovariance,
}

/// Starting point of a solve.
///
/// Missing values are derived from the readings: the position from a linear
/// lateration, the transmitted power from the lateration or from the mean
/// path-loss inversion at the seed position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSeed<const D: usize> {
    pub position: Option<Pt<D>>,
    /// Initial (or fixed, when not estimated) transmitted power in dBm.
    pub transmitted_power_dbm: Option<Real>,
    /// Initial (or fixed, when not estimated) path-loss exponent.
    pub path_loss_exponent: Real,
    /// Fall back to the centroid of the observers when the linear seed is degenerate.
    pub centroid_fallback: bool,
}

impl<const D: usize> Default for SourceSeed<D> {
    fn default() -> Self {
        Self {
            position: None,
            transmitted_power_dbm: None,
            path_loss_exponent: FREE_SPACE_PATH_LOSS_EXPONENT,
            centroid_fallback: true,
        }
    }
}

/// Output of [`solve_source`].
#[derive(Debug, Clone)]
pub struct SourceEstimate<const D: usize> {
    pub position: Pt<D>,
    /// `None` for ranging-only readings.
    pub transmitted_power_dbm: Option<Real>,
    pub path_loss_exponent: Real,
    /// Parameter covariance in solver order: position, power, path-loss exponent.
    pub covariance: Option<DMatrix<Real>>,
    pub position_covariance: Option<MatD<D>>,
    pub transmitted_power_dbm_variance: Option<Real>,
    pub path_loss_exponent_variance: Option<Real>,
    pub report: SolveReport,
}

impl<const D: usize> SourceEstimate<D> {
    /// Model parameters, with `power_fallback` standing in for an absent power.
    pub fn params(&self, power_fallback: Real) -> SourceParams<D> {
        SourceParams {
            position: self.position,
            transmitted_power_dbm: self.transmitted_power_dbm.unwrap_or(power_fallback),
            path_loss_exponent: self.path_loss_exponent,
        }
    }

    pub fn into_estimated_source<S>(self, source: S) -> EstimatedSource<S, D> {
        EstimatedSource {
            source,
            position: self.position,
            position_covariance: self.position_covariance,
            transmitted_power_dbm: self.transmitted_power_dbm,
            transmitted_power_dbm_variance: self.transmitted_power_dbm_variance,
            path_loss_exponent: self.path_loss_exponent,
            path_loss_exponent_variance: self.path_loss_exponent_variance,
            covariance: self.covariance,
            inliers_data: None,
        }
    }
}

/// Check that `readings` share one kind that can constrain `unknowns`, and
/// that there are enough of them. RSSI readings also need a finite, positive
/// carrier frequency.
pub fn validate_readings<S: RadioSource, const D: usize>(
    readings: &[&Reading<S, D>],
    unknowns: Unknowns,
) -> Result<ReadingKind, EstimationError> {
    let needed = unknowns.min_readings(D);
    let kind = readings
        .first()
        .map(|r| r.kind())
        .ok_or(EstimationError::NotReady { needed, got: 0 })?;

    if readings.iter().any(|r| r.kind() != kind) {
        return Err(EstimationError::InvalidReadings(
            "readings mix ranging and rssi kinds".to_string(),
        ));
    }
    if !kind.supports(unknowns) {
        return Err(EstimationError::InvalidReadings(
            "ranging readings cannot estimate transmitted power or path-loss exponent"
                .to_string(),
        ));
    }
    if kind.has_rssi() {
        if let Some(bad) = readings
            .iter()
            .map(|r| r.source().frequency())
            .find(|f| !(f.is_finite() && *f > 0.0))
        {
            return Err(EstimationError::InvalidReadings(format!(
                "carrier frequency must be finite and positive, got {}",
                bad
            )));
        }
    }
    if readings.len() < needed {
        return Err(EstimationError::NotReady {
            needed,
            got: readings.len(),
        });
    }
    Ok(kind)
}

/// Closed-form position (and possibly power) from the readings.
fn linear_seed<S: RadioSource, const D: usize>(
    readings: &[&Reading<S, D>],
    kind: ReadingKind,
    power: Option<Real>,
    path_loss_exponent: Real,
) -> Result<(Pt<D>, Option<Real>), LaterationError> {
    let positions: Vec<Pt<D>> = readings.iter().map(|r| *r.position()).collect();

    if kind.has_ranging() {
        let distances: Vec<Real> = readings
            .iter()
            .filter_map(|r| r.measurement().distance())
            .collect();
        return lateration_from_ranges(&positions, &distances).map(|p| (p, None));
    }

    let rssi: Vec<Real> = readings
        .iter()
        .filter_map(|r| r.measurement().rssi_value())
        .collect();
    match power {
        Some(tx) => {
            let distances: Vec<Real> = readings
                .iter()
                .zip(&rssi)
                .map(|(r, &s)| distance_from_rssi(tx, r.source().frequency(), path_loss_exponent, s))
                .collect();
            lateration_from_ranges(&positions, &distances).map(|p| (p, None))
        }
        None => {
            let frequency = readings
                .first()
                .map(|r| r.source().frequency())
                .ok_or(LaterationError::NotEnoughReadings { needed: D + 2, got: 0 })?;
            let sol = lateration_from_rssi(&positions, &rssi, frequency, path_loss_exponent)?;
            Ok((sol.position, Some(sol.transmitted_power_dbm)))
        }
    }
}

/// Mean of `rssiᵢ − n·g + 10·n·log10 dᵢ` over readings away from `position`.
fn mean_transmitted_power<S: RadioSource, const D: usize>(
    readings: &[&Reading<S, D>],
    position: &Pt<D>,
    path_loss_exponent: Real,
) -> Real {
    let n = path_loss_exponent;
    let (sum, count) = readings
        .iter()
        .filter_map(|r| {
            let rssi = r.measurement().rssi_value()?;
            let d = nalgebra::distance(position, r.position());
            let g = free_space_gain_db(r.source().frequency());
            let tx = rssi - n * g + 10.0 * n * d.log10();
            tx.is_finite().then_some(tx)
        })
        .fold((0.0, 0usize), |(s, c), tx| (s + tx, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as Real
    }
}

fn initial_params<S: RadioSource, const D: usize>(
    readings: &[&Reading<S, D>],
    kind: ReadingKind,
    seed: &SourceSeed<D>,
) -> Result<SourceParams<D>, EstimationError> {
    let n = seed.path_loss_exponent;
    let mut power = seed.transmitted_power_dbm;

    let position = match seed.position {
        Some(p) => p,
        None => match linear_seed(readings, kind, power, n) {
            Ok((p, recovered)) => {
                power = power.or(recovered);
                p
            }
            Err(err) if seed.centroid_fallback => {
                debug!("linear seed failed ({}), starting from the centroid", err);
                centroid(readings.iter().map(|r| r.position()))
                    .ok_or(EstimationError::Degenerate(err))?
            }
            Err(err) => return Err(EstimationError::Degenerate(err)),
        },
    };

    let transmitted_power_dbm = match power {
        Some(tx) => tx,
        None if kind.has_rssi() => mean_transmitted_power(readings, &position, n),
        None => 0.0,
    };

    Ok(SourceParams {
        position,
        transmitted_power_dbm,
        path_loss_exponent: n,
    })
}

/// `(JᵀJ)⁻¹ · s²` with `s² = χ² / (m − n)` when the problem is overdetermined.
fn covariance<P: NllsProblem>(problem: &P, x: &DVector<Real>) -> Result<DMatrix<Real>, EstimationError> {
    let j = problem.jacobian(x);
    let r = problem.residuals(x);
    let (m, n) = j.shape();

    let jtj = j.transpose() * &j;
    let inv = jtj
        .cholesky()
        .map(|c| c.inverse())
        .ok_or(EstimationError::SingularCovariance)?;
    let s2 = if m > n {
        r.norm_squared() / (m - n) as Real
    } else {
        1.0
    };
    Ok(inv * s2)
}

/// Fit a source to `readings` by non-linear least squares.
///
/// # Errors
///
/// - [`EstimationError::NotReady`] / [`EstimationError::InvalidReadings`] from
///   [`validate_readings`];
/// - [`EstimationError::MissingTransmittedPower`] for RSSI readings when the
///   power is fixed but not given;
/// - [`EstimationError::Degenerate`] when no seed can be built;
/// - [`EstimationError::NotConverged`] / [`EstimationError::NonFinite`] on
///   solver failure;
/// - [`EstimationError::SingularCovariance`] when `keep_covariance` is set and
///   the normal matrix cannot be inverted.
pub fn solve_source<S: RadioSource, const D: usize>(
    readings: &[&Reading<S, D>],
    seed: &SourceSeed<D>,
    unknowns: Unknowns,
    keep_covariance: bool,
    opts: &SolveOptions,
) -> Result<SourceEstimate<D>, EstimationError> {
    let kind = validate_readings(readings, unknowns)?;
    if kind.has_rssi() && !unknowns.transmitted_power && seed.transmitted_power_dbm.is_none() {
        return Err(EstimationError::MissingTransmittedPower);
    }

    let initial = initial_params(readings, kind, seed)?;
    let problem = SourceProblem::new(readings, unknowns, initial);
    let x0 = problem.pack(&initial);

    let (x, report) = LmBackend.solve(&problem, x0, opts);
    if !report.converged {
        debug!(
            "source solve did not converge ({} evaluations, cost {})",
            report.iterations, report.final_cost
        );
        return Err(EstimationError::NotConverged {
            evaluations: report.iterations,
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(EstimationError::NonFinite);
    }

    let params = problem.unpack(&x);
    let mut estimate = SourceEstimate {
        position: params.position,
        transmitted_power_dbm: kind.has_rssi().then_some(params.transmitted_power_dbm),
        path_loss_exponent: params.path_loss_exponent,
        covariance: None,
        position_covariance: None,
        transmitted_power_dbm_variance: None,
        path_loss_exponent_variance: None,
        report,
    };

    if keep_covariance {
        let cov = covariance(&problem, &x)?;
        estimate.position_covariance = Some(MatD::<D>::from_fn(|i, j| cov[(i, j)]));
        estimate.transmitted_power_dbm_variance = problem.power_index().map(|i| cov[(i, i)]);
        estimate.path_loss_exponent_variance = problem.path_loss_index().map(|i| cov[(i, i)]);
        estimate.covariance = Some(cov);
    }
    Ok(estimate)
}

/// Single-shot, non-robust source estimator over an owned reading list.
#[derive(Debug, Clone)]
pub struct SourceEstimator<S, const D: usize> {
    readings: Vec<Reading<S, D>>,
    pub unknowns: Unknowns,
    pub seed: SourceSeed<D>,
    pub keep_covariance: bool,
    pub solver: SolveOptions,
}

impl<S: RadioSource + Clone, const D: usize> SourceEstimator<S, D> {
    /// Position-only estimator with free-space defaults and covariance enabled.
    pub fn new(readings: Vec<Reading<S, D>>) -> Self {
        Self {
            readings,
            unknowns: Unknowns::position_only(),
            seed: SourceSeed::default(),
            keep_covariance: true,
            solver: SolveOptions::default(),
        }
    }

    pub fn with_unknowns(mut self, unknowns: Unknowns) -> Self {
        self.unknowns = unknowns;
        self
    }

    pub fn with_seed(mut self, seed: SourceSeed<D>) -> Self {
        self.seed = seed;
        self
    }

    pub fn readings(&self) -> &[Reading<S, D>] {
        &self.readings
    }

    pub fn set_readings(&mut self, readings: Vec<Reading<S, D>>) {
        self.readings = readings;
    }

    pub fn min_readings(&self) -> usize {
        self.unknowns.min_readings(D)
    }

    pub fn is_ready(&self) -> bool {
        let refs: Vec<&Reading<S, D>> = self.readings.iter().collect();
        validate_readings(&refs, self.unknowns).is_ok()
    }

    /// Estimate the source; the source of the first reading is carried into the result.
    pub fn estimate(&self) -> Result<EstimatedSource<S, D>, EstimationError> {
        let refs: Vec<&Reading<S, D>> = self.readings.iter().collect();
        let estimate = solve_source(&refs, &self.seed, self.unknowns, self.keep_covariance, &self.solver)?;
        let source = refs
            .first()
            .map(|r| r.source().clone())
            .ok_or(EstimationError::NotReady {
                needed: self.min_readings(),
                got: 0,
            })?;
        Ok(estimate.into_estimated_source(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radiolocation_core::synthetic::{rssi_at, SyntheticStream};
    use radiolocation_core::{Measurement, Pt2, Pt3, RadioEmitter, DEFAULT_FREQUENCY};

    fn emitter() -> RadioEmitter {
        RadioEmitter::new("ap-1", DEFAULT_FREQUENCY)
    }

    fn observers(seed: u64, count: usize) -> Vec<Pt3> {
        let mut rng = SyntheticStream::new(seed);
        (0..count).map(|_| rng.uniform_point::<3>(-50.0, 50.0)).collect()
    }

    fn rssi_readings(
        truth: &Pt3,
        tx: Real,
        n: Real,
        observers: &[Pt3],
        noise: Option<(&mut SyntheticStream, Real)>,
    ) -> Vec<Reading<RadioEmitter, 3>> {
        let mut noise = noise;
        observers
            .iter()
            .map(|p| {
                let mut rssi = rssi_at(truth, tx, DEFAULT_FREQUENCY, n, p);
                let mut m = Measurement::rssi(rssi);
                if let Some((rng, sigma)) = noise.as_mut() {
                    rssi += rng.gaussian(*sigma);
                    m = Measurement::rssi(rssi).with_rssi_std(*sigma);
                }
                Reading::new(emitter(), *p, m).unwrap()
            })
            .collect()
    }

    #[test]
    fn ranging_2d_recovers_exact_position() {
        let truth = Pt2::new(12.0, -7.5);
        let obs = [
            Pt2::new(0.0, 0.0),
            Pt2::new(30.0, 5.0),
            Pt2::new(-10.0, 25.0),
            Pt2::new(15.0, -20.0),
        ];
        let readings: Vec<_> = obs
            .iter()
            .map(|p| {
                Reading::new(emitter(), *p, Measurement::ranging(nalgebra::distance(p, &truth)))
                    .unwrap()
            })
            .collect();

        let est = SourceEstimator::new(readings).estimate().unwrap();
        assert!(
            (est.position - truth).norm() < 1e-6,
            "position: {:?}",
            est.position
        );
        assert!(est.transmitted_power_dbm.is_none());
        assert!(est.position_covariance.is_some());
    }

    #[test]
    fn ranging_3d_recovers_exact_position() {
        let truth = Pt3::new(-4.0, 18.0, 6.5);
        let readings: Vec<_> = observers(5, 8)
            .iter()
            .map(|p| {
                Reading::new(emitter(), *p, Measurement::ranging(nalgebra::distance(p, &truth)))
                    .unwrap()
            })
            .collect();

        let est = SourceEstimator::new(readings).estimate().unwrap();
        assert!(
            (est.position - truth).norm() < 1e-6,
            "position: {:?}",
            est.position
        );
    }

    #[test]
    fn rssi_position_only_with_known_power() {
        let truth = Pt3::new(10.0, -20.0, 5.0);
        let readings = rssi_readings(&truth, -10.0, 2.0, &observers(7, 10), None);

        let mut estimator = SourceEstimator::new(readings);
        estimator.seed.transmitted_power_dbm = Some(-10.0);
        let est = estimator.estimate().unwrap();

        assert!(
            (est.position - truth).norm() < 1e-6,
            "position: {:?}",
            est.position
        );
        assert_eq!(est.transmitted_power_dbm, Some(-10.0));
        assert!(est.transmitted_power_dbm_variance.is_none());
    }

    #[test]
    fn rssi_recovers_position_and_power() {
        let truth = Pt3::new(-15.0, 8.0, 22.0);
        let readings = rssi_readings(&truth, 5.0, 2.0, &observers(9, 12), None);

        let est = SourceEstimator::new(readings)
            .with_unknowns(Unknowns {
                transmitted_power: true,
                path_loss_exponent: false,
            })
            .estimate()
            .unwrap();

        assert!(
            (est.position - truth).norm() < 1e-6,
            "position: {:?}",
            est.position
        );
        let tx = est.transmitted_power_dbm.unwrap();
        assert!((tx - 5.0).abs() < 1e-6, "power: {}", tx);
        assert!(est.transmitted_power_dbm_variance.is_some());
        assert!(est.path_loss_exponent_variance.is_none());
    }

    #[test]
    fn rssi_recovers_position_power_and_path_loss() {
        let truth = Pt3::new(3.0, -12.0, 9.0);
        let readings = rssi_readings(&truth, 0.0, 2.5, &observers(13, 30), None);

        let est = SourceEstimator::new(readings)
            .with_unknowns(Unknowns::all())
            .with_seed(SourceSeed {
                path_loss_exponent: 2.3,
                ..SourceSeed::default()
            })
            .estimate()
            .unwrap();

        assert!(
            (est.position - truth).norm() < 1e-5,
            "position: {:?}",
            est.position
        );
        let tx = est.transmitted_power_dbm.unwrap();
        assert!(tx.abs() < 1e-5, "power: {}", tx);
        assert!(
            (est.path_loss_exponent - 2.5).abs() < 1e-6,
            "path loss: {}",
            est.path_loss_exponent
        );
        let cov = est.covariance.as_ref().unwrap();
        assert_eq!(cov.shape(), (5, 5));
    }

    #[test]
    fn covariance_is_symmetric_and_matches_sub_blocks() {
        let truth = Pt3::new(1.0, 2.0, 3.0);
        let mut rng = SyntheticStream::new(21);
        let readings = rssi_readings(&truth, -5.0, 2.0, &observers(17, 40), Some((&mut rng, 1.0)));

        let est = SourceEstimator::new(readings)
            .with_unknowns(Unknowns {
                transmitted_power: true,
                path_loss_exponent: false,
            })
            .estimate()
            .unwrap();

        let cov = est.covariance.as_ref().unwrap();
        assert_eq!(cov.shape(), (4, 4));
        for i in 0..4 {
            assert!(cov[(i, i)] > 0.0, "variance {} not positive", i);
            for j in 0..4 {
                assert!((cov[(i, j)] - cov[(j, i)]).abs() <= 1e-9 * cov[(i, i)].max(1.0));
            }
        }
        let pos_cov = est.position_covariance.unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(pos_cov[(i, j)], cov[(i, j)]);
            }
        }
        assert_eq!(est.transmitted_power_dbm_variance, Some(cov[(3, 3)]));
        assert!(
            (est.position - truth).norm() < 5.0,
            "noisy position too far: {:?}",
            est.position
        );
    }

    #[test]
    fn too_few_readings_is_not_ready() {
        let truth = Pt3::new(0.0, 0.0, 0.0);
        let readings = rssi_readings(&truth, 0.0, 2.0, &observers(3, 5), None);
        let estimator = SourceEstimator::new(readings).with_unknowns(Unknowns::all());

        assert!(!estimator.is_ready());
        assert_eq!(estimator.min_readings(), 6);
        assert_eq!(
            estimator.estimate().unwrap_err(),
            EstimationError::NotReady { needed: 6, got: 5 }
        );
    }

    #[test]
    fn mixed_or_unsupported_readings_are_rejected() {
        let p = Pt2::new(1.0, 1.0);
        let ranging = Reading::new(emitter(), p, Measurement::ranging(2.0)).unwrap();
        let rssi = Reading::new(emitter(), p, Measurement::rssi(-40.0)).unwrap();

        let mixed = vec![&ranging, &ranging, &rssi, &rssi];
        assert!(matches!(
            validate_readings(&mixed, Unknowns::position_only()),
            Err(EstimationError::InvalidReadings(_))
        ));

        let ranging_only = vec![&ranging; 6];
        assert!(matches!(
            validate_readings(&ranging_only, Unknowns::all()),
            Err(EstimationError::InvalidReadings(_))
        ));
        assert_eq!(
            validate_readings(&ranging_only, Unknowns::position_only()),
            Ok(ReadingKind::Ranging)
        );
    }

    #[test]
    fn rssi_readings_need_a_positive_frequency() {
        let p = Pt2::new(1.0, 1.0);
        let silent = RadioEmitter::new("silent", 0.0);
        let rssi = Reading::new(silent.clone(), p, Measurement::rssi(-40.0)).unwrap();
        let readings = vec![&rssi; 5];
        assert!(matches!(
            validate_readings(&readings, Unknowns::position_only()),
            Err(EstimationError::InvalidReadings(msg)) if msg.contains("frequency")
        ));

        // Ranging never uses the frequency.
        let ranging = Reading::new(silent, p, Measurement::ranging(2.0)).unwrap();
        assert_eq!(
            validate_readings(&vec![&ranging; 5], Unknowns::position_only()),
            Ok(ReadingKind::Ranging)
        );
    }

    #[test]
    fn fixed_power_must_be_provided() {
        let truth = Pt3::new(0.0, 0.0, 0.0);
        let readings = rssi_readings(&truth, 0.0, 2.0, &observers(3, 6), None);
        assert_eq!(
            SourceEstimator::new(readings).estimate().unwrap_err(),
            EstimationError::MissingTransmittedPower
        );
    }

    #[test]
    fn degenerate_geometry_without_fallback_is_an_error() {
        let obs = [
            Pt2::new(0.0, 0.0),
            Pt2::new(1.0, 0.0),
            Pt2::new(2.0, 0.0),
        ];
        let readings: Vec<_> = obs
            .iter()
            .map(|p| Reading::new(emitter(), *p, Measurement::ranging(1.0)).unwrap())
            .collect();
        let refs: Vec<_> = readings.iter().collect();
        let seed = SourceSeed {
            centroid_fallback: false,
            ..SourceSeed::default()
        };
        assert!(matches!(
            solve_source(&refs, &seed, Unknowns::position_only(), false, &SolveOptions::default()),
            Err(EstimationError::Degenerate(_))
        ));
    }
}
