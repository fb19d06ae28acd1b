//! One-shot helpers for callers that do not need the estimator state machine.
//!
//! # Example
//!
//! ```ignore
//! use radiolocation::helpers::locate_source;
//! use radiolocation::RobustEstimatorConfig;
//!
//! let config: RobustEstimatorConfig = serde_json::from_str(&std::fs::read_to_string("robust.json")?)?;
//! let estimated = locate_source(readings, &config)?;
//! println!("source at {:?}", estimated.position_coordinates());
//! ```

use crate::robust::{RobustEstimatorConfig, RobustSourceEstimator};
use anyhow::{Context, Result};
use radiolocation_core::{EstimatedSource, RadioSource, Reading};

/// Robustly localize the source of `readings` with a single estimation run.
pub fn locate_source<S: RadioSource + Clone, const D: usize>(
    readings: Vec<Reading<S, D>>,
    config: &RobustEstimatorConfig,
) -> Result<EstimatedSource<S, D>> {
    let count = readings.len();
    let mut estimator = RobustSourceEstimator::with_config(readings, config.clone())
        .context("invalid robust estimator setup")?;
    estimator
        .estimate()
        .with_context(|| format!("robust localization over {count} readings failed"))
}
