use radiolocation::core::synthetic::{rssi_at, SyntheticStream};
use radiolocation::prelude::*;
use radiolocation::RobustEstimatorConfig;

const FREQUENCY: Real = 2.4e9;

struct Scenario {
    truth: Pt3,
    transmitted_power_dbm: Real,
    readings: Vec<Reading<RadioEmitter, 3>>,
    /// Absolute RSSI error injected into each reading (zero for inliers).
    errors: Vec<Real>,
}

/// Source and observers uniform in `[-50, 50]³`; a fraction of the readings
/// gets Gaussian RSSI noise with `outlier_sigma`, the rest `inlier_sigma`.
fn scenario(
    seed: u64,
    count: usize,
    outlier_ratio: Real,
    outlier_sigma: Real,
    inlier_sigma: Real,
    path_loss_exponent: Real,
) -> Scenario {
    let mut rng = SyntheticStream::new(seed);
    let truth = rng.uniform_point::<3>(-50.0, 50.0);
    let transmitted_power_dbm = rng.uniform(-10.0, 10.0);
    let ap = RadioEmitter::new("ap", FREQUENCY);

    let mut readings = Vec::with_capacity(count);
    let mut errors = Vec::with_capacity(count);
    for _ in 0..count {
        let observer = rng.uniform_point::<3>(-50.0, 50.0);
        let rssi = rssi_at(
            &truth,
            transmitted_power_dbm,
            FREQUENCY,
            path_loss_exponent,
            &observer,
        );
        let error = if rng.unit() < outlier_ratio {
            rng.gaussian(outlier_sigma)
        } else if inlier_sigma > 0.0 {
            rng.gaussian(inlier_sigma)
        } else {
            0.0
        };
        let measurement = Measurement::rssi(rssi + error);
        readings.push(Reading::new(ap.clone(), observer, measurement).unwrap());
        errors.push(error);
    }

    Scenario {
        truth,
        transmitted_power_dbm,
        readings,
        errors,
    }
}

fn power_config(method: ConsensusMethod) -> RobustEstimatorConfig {
    RobustEstimatorConfig {
        method,
        threshold: 1.0,
        estimate_transmitted_power: true,
        ..Default::default()
    }
}

#[test]
fn ransac_recovers_position_and_power_with_outliers() {
    let trials = 10;
    let mut num_valid = 0;
    for seed in 0..trials {
        let s = scenario(100 + seed, 150, 0.2, 10.0, 0.0, 2.0);
        let mut estimator =
            RobustSourceEstimator::with_config(s.readings, power_config(ConsensusMethod::Ransac))
                .unwrap();
        assert!(estimator.is_ready());

        let Ok(estimated) = estimator.estimate() else {
            continue;
        };
        let position_error = (estimated.position - s.truth).norm();
        let power_error =
            (estimated.transmitted_power_dbm.unwrap() - s.transmitted_power_dbm).abs();
        if position_error < 0.5 && power_error < 0.5 {
            num_valid += 1;
        }
    }
    assert!(
        num_valid > trials / 2,
        "only {} of {} trials within tolerance",
        num_valid,
        trials
    );
}

#[test]
fn every_method_recovers_position_and_power() {
    for method in [
        ConsensusMethod::Ransac,
        ConsensusMethod::Msac,
        ConsensusMethod::Lmeds,
        ConsensusMethod::Prosac,
    ] {
        let s = scenario(7, 120, 0.2, 10.0, 0.0, 2.0);
        let quality: Vec<Real> = s.errors.iter().map(|e| 1.0 / (1.0 + e.abs())).collect();

        let mut estimator =
            RobustSourceEstimator::with_config(s.readings, power_config(method)).unwrap();
        estimator.set_quality_scores(Some(quality)).unwrap();
        let estimated = estimator.estimate().unwrap();

        let position_error = (estimated.position - s.truth).norm();
        let power_error =
            (estimated.transmitted_power_dbm.unwrap() - s.transmitted_power_dbm).abs();
        assert!(
            position_error < 0.5,
            "{:?}: position error {}",
            method,
            position_error
        );
        assert!(power_error < 0.5, "{:?}: power error {}", method, power_error);
    }
}

#[test]
fn inlier_mask_separates_gross_errors() {
    let s = scenario(11, 150, 0.2, 10.0, 0.0, 2.0);
    let config = RobustEstimatorConfig {
        keep_inliers: true,
        keep_residuals: true,
        ..power_config(ConsensusMethod::Ransac)
    };
    let estimated = RobustSourceEstimator::with_config(s.readings.clone(), config)
        .unwrap()
        .estimate()
        .unwrap();

    let data = estimated.inliers_data.as_ref().unwrap();
    let mask = data.inliers.as_ref().unwrap();
    let residuals = data.residuals.as_ref().unwrap();
    assert_eq!(mask.len(), s.readings.len());
    assert_eq!(residuals.len(), s.readings.len());
    assert_eq!(data.num_inliers, mask.iter().filter(|&&m| m).count());

    for (i, error) in s.errors.iter().enumerate() {
        if *error == 0.0 {
            assert!(mask[i], "clean reading {} classified as outlier", i);
        } else if error.abs() > 2.0 {
            assert!(!mask[i], "gross error {} at {} classified as inlier", error, i);
        }
    }
}

#[test]
fn position_only_with_known_power() {
    let s = scenario(23, 100, 0.2, 10.0, 0.0, 2.0);
    let config = RobustEstimatorConfig {
        threshold: 1.0,
        initial_transmitted_power_dbm: Some(s.transmitted_power_dbm),
        ..Default::default()
    };
    let estimated = RobustSourceEstimator::with_config(s.readings, config)
        .unwrap()
        .estimate()
        .unwrap();

    assert!(
        (estimated.position - s.truth).norm() < 0.5,
        "position: {:?} vs {:?}",
        estimated.position,
        s.truth
    );
    assert_eq!(
        estimated.transmitted_power_dbm,
        Some(s.transmitted_power_dbm)
    );
    assert!(estimated.transmitted_power_dbm_variance.is_none());
    assert!(estimated.position_covariance.is_some());
}

#[test]
fn path_loss_exponent_is_recovered() {
    let s = scenario(31, 200, 0.2, 10.0, 0.0, 2.6);
    let config = RobustEstimatorConfig {
        threshold: 1.0,
        estimate_path_loss_exponent: true,
        initial_transmitted_power_dbm: Some(s.transmitted_power_dbm),
        initial_path_loss_exponent: 2.4,
        ..Default::default()
    };
    let estimated = RobustSourceEstimator::with_config(s.readings, config)
        .unwrap()
        .estimate()
        .unwrap();

    assert!(
        (estimated.position - s.truth).norm() < 0.5,
        "position: {:?} vs {:?}",
        estimated.position,
        s.truth
    );
    assert!(
        (estimated.path_loss_exponent - 2.6).abs() < 0.05,
        "path loss: {}",
        estimated.path_loss_exponent
    );
    assert!(estimated.path_loss_exponent_variance.is_some());
}

#[test]
fn without_outliers_matches_the_non_robust_fit() {
    let s = scenario(41, 80, 0.0, 0.0, 1.0, 2.0);
    let config = RobustEstimatorConfig {
        threshold: 50.0,
        ..power_config(ConsensusMethod::Ransac)
    };
    let robust = RobustSourceEstimator::with_config(s.readings.clone(), config)
        .unwrap()
        .estimate()
        .unwrap();
    assert_eq!(robust.inliers_data.as_ref().unwrap().num_inliers, 80);

    let direct = SourceEstimator::new(s.readings)
        .with_unknowns(Unknowns {
            transmitted_power: true,
            path_loss_exponent: false,
        })
        .estimate()
        .unwrap();

    assert!(
        (robust.position - direct.position).norm() < 1e-3,
        "robust {:?} vs direct {:?}",
        robust.position,
        direct.position
    );
    let dp = robust.transmitted_power_dbm.unwrap() - direct.transmitted_power_dbm.unwrap();
    assert!(dp.abs() < 1e-3, "power difference {}", dp);
}

#[test]
fn repeated_estimates_are_identical() {
    let s = scenario(53, 100, 0.2, 10.0, 0.0, 2.0);
    let mut estimator =
        RobustSourceEstimator::with_config(s.readings, power_config(ConsensusMethod::Msac))
            .unwrap();

    let first = estimator.estimate().unwrap();
    let second = estimator.estimate().unwrap();
    assert_eq!(first.position, second.position);
    assert_eq!(first.transmitted_power_dbm, second.transmitted_power_dbm);
    assert_eq!(first.covariance, second.covariance);
    assert_eq!(estimator.result(), Some(&second));
}

#[test]
fn unrefined_result_has_no_covariance() {
    let s = scenario(61, 100, 0.2, 10.0, 0.0, 2.0);
    let config = RobustEstimatorConfig {
        refine_result: false,
        ..power_config(ConsensusMethod::Ransac)
    };
    let estimated = RobustSourceEstimator::with_config(s.readings, config)
        .unwrap()
        .estimate()
        .unwrap();

    assert!(estimated.covariance.is_none());
    assert!(estimated.position_covariance.is_none());
    assert!(estimated.transmitted_power_dbm_variance.is_none());
    assert!(
        (estimated.position - s.truth).norm() < 0.5,
        "position: {:?}",
        estimated.position
    );
}

#[test]
fn estimated_record_exposes_power_and_coordinates() {
    let s = scenario(71, 100, 0.1, 10.0, 0.0, 2.0);
    let config = power_config(ConsensusMethod::Ransac);
    let estimated = RobustSourceEstimator::with_config(s.readings, config)
        .unwrap()
        .estimate()
        .unwrap();

    let coords = estimated.position_coordinates();
    assert_eq!(coords.as_slice(), estimated.position.coords.as_slice());

    let mw = estimated.transmitted_power_mw().unwrap();
    let dbm = estimated.transmitted_power_dbm.unwrap();
    assert!((radiolocation::core::milliwatts_to_dbm(mw) - dbm).abs() < 1e-9);
    assert!(estimated.transmitted_power_mw_variance().unwrap() >= 0.0);

    let json = serde_json::to_string(&estimated).unwrap();
    let back: EstimatedSource<RadioEmitter, 3> = serde_json::from_str(&json).unwrap();
    assert_eq!(back.source, estimated.source);
    for (a, b) in back.position_coordinates().iter().zip(coords.iter()) {
        assert!((a - b).abs() <= 1e-12 * b.abs().max(1.0), "{} vs {}", a, b);
    }
}
