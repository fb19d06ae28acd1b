use super::RobustEstimatorError;
use radiolocation_core::{
    ConsensusMethod, ConsensusOptions, Real, Unknowns, FREE_SPACE_PATH_LOSS_EXPONENT,
};
use radiolocation_optim::SolveOptions;
use serde::{Deserialize, Serialize};

/// Serializable configuration of a [`RobustSourceEstimator`](super::RobustSourceEstimator).
///
/// `threshold` is in the units of the residuals: metres for ranging readings,
/// dB for RSSI readings. For LMedS it is the stop threshold on the median residual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustEstimatorConfig {
    pub method: ConsensusMethod,
    pub threshold: Real,
    pub confidence: Real,
    pub max_iterations: usize,
    pub progress_delta: Real,
    /// Re-fit over the inliers of the best candidate.
    pub refine_result: bool,
    /// Compute the covariance during refinement.
    pub keep_covariance: bool,
    /// Keep the per-reading inlier mask in the result.
    pub keep_inliers: bool,
    /// Keep the per-reading residuals in the result.
    pub keep_residuals: bool,
    pub estimate_transmitted_power: bool,
    pub estimate_path_loss_exponent: bool,
    /// Initial guess, or fixed value when power is not estimated (dBm).
    pub initial_transmitted_power_dbm: Option<Real>,
    /// Initial guess, or fixed value when the exponent is not estimated.
    pub initial_path_loss_exponent: Real,
    pub seed: u64,
    pub solver: SolveOptions,
}

impl Default for RobustEstimatorConfig {
    fn default() -> Self {
        Self {
            method: ConsensusMethod::Ransac,
            threshold: 0.1,
            confidence: 0.99,
            max_iterations: 5000,
            progress_delta: 0.05,
            refine_result: true,
            keep_covariance: true,
            keep_inliers: false,
            keep_residuals: false,
            estimate_transmitted_power: false,
            estimate_path_loss_exponent: false,
            initial_transmitted_power_dbm: None,
            initial_path_loss_exponent: FREE_SPACE_PATH_LOSS_EXPONENT,
            seed: 1_234_567,
            solver: SolveOptions::default(),
        }
    }
}

impl RobustEstimatorConfig {
    pub fn unknowns(&self) -> Unknowns {
        Unknowns {
            transmitted_power: self.estimate_transmitted_power,
            path_loss_exponent: self.estimate_path_loss_exponent,
        }
    }

    /// Check every numeric field against its admissible range.
    pub fn validate(&self) -> Result<(), RobustEstimatorError> {
        check_threshold(self.threshold)?;
        check_confidence(self.confidence)?;
        check_max_iterations(self.max_iterations)?;
        check_progress_delta(self.progress_delta)?;
        check_path_loss_exponent(self.initial_path_loss_exponent)?;
        if let Some(tx) = self.initial_transmitted_power_dbm {
            check_transmitted_power(tx)?;
        }
        Ok(())
    }

    pub(crate) fn consensus_options(&self) -> ConsensusOptions {
        ConsensusOptions {
            method: self.method,
            max_iters: self.max_iterations,
            thresh: self.threshold,
            min_inliers: 0,
            confidence: self.confidence,
            seed: self.seed,
            progress_delta: self.progress_delta,
            keep_inlier_mask: self.keep_inliers,
            keep_residuals: self.keep_residuals,
        }
    }
}

fn invalid(msg: String) -> RobustEstimatorError {
    RobustEstimatorError::InvalidArgument(msg)
}

pub(crate) fn check_threshold(threshold: Real) -> Result<(), RobustEstimatorError> {
    if threshold > 0.0 && threshold.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("threshold must be positive, got {threshold}")))
    }
}

pub(crate) fn check_confidence(confidence: Real) -> Result<(), RobustEstimatorError> {
    if confidence > 0.0 && confidence < 1.0 {
        Ok(())
    } else {
        Err(invalid(format!(
            "confidence must lie in (0, 1), got {confidence}"
        )))
    }
}

pub(crate) fn check_max_iterations(max_iterations: usize) -> Result<(), RobustEstimatorError> {
    if max_iterations > 0 {
        Ok(())
    } else {
        Err(invalid("max iterations must be positive".to_string()))
    }
}

pub(crate) fn check_progress_delta(progress_delta: Real) -> Result<(), RobustEstimatorError> {
    if progress_delta > 0.0 && progress_delta <= 1.0 {
        Ok(())
    } else {
        Err(invalid(format!(
            "progress delta must lie in (0, 1], got {progress_delta}"
        )))
    }
}

pub(crate) fn check_path_loss_exponent(n: Real) -> Result<(), RobustEstimatorError> {
    if n > 0.0 && n.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("path-loss exponent must be positive, got {n}")))
    }
}

pub(crate) fn check_transmitted_power(dbm: Real) -> Result<(), RobustEstimatorError> {
    if dbm.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("transmitted power must be finite, got {dbm}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RobustEstimatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.unknowns(), Unknowns::position_only());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            RobustEstimatorConfig {
                threshold: 0.0,
                ..Default::default()
            },
            RobustEstimatorConfig {
                confidence: 1.0,
                ..Default::default()
            },
            RobustEstimatorConfig {
                max_iterations: 0,
                ..Default::default()
            },
            RobustEstimatorConfig {
                progress_delta: 1.5,
                ..Default::default()
            },
            RobustEstimatorConfig {
                initial_path_loss_exponent: -2.0,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(
                    config.validate(),
                    Err(RobustEstimatorError::InvalidArgument(_))
                ),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn config_json_roundtrip() {
        let config = RobustEstimatorConfig {
            method: ConsensusMethod::Msac,
            threshold: 2.5,
            estimate_transmitted_power: true,
            initial_transmitted_power_dbm: Some(-3.0),
            ..Default::default()
        };
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: RobustEstimatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let partial: RobustEstimatorConfig =
            serde_json::from_str(r#"{ "method": { "type": "lmeds" }, "threshold": 3.0 }"#).unwrap();
        assert_eq!(partial.method, ConsensusMethod::Lmeds);
        assert_eq!(partial.threshold, 3.0);
        assert_eq!(partial.max_iterations, 5000);
    }
}
