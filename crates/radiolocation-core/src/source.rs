//! Radio source abstraction and the estimated-source record.

use crate::{dbm_to_milliwatts, MatD, Pt, Real};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// A radio emitter whose readings can be localized.
///
/// Estimators only ever query the carrier frequency; any other identity or
/// metadata is carried through untouched into [`EstimatedSource`].
pub trait RadioSource {
    /// Carrier frequency in Hz.
    fn frequency(&self) -> Real;
}

/// Default carrier frequency (2.4 GHz ISM band).
pub const DEFAULT_FREQUENCY: Real = 2.4e9;

/// Minimal concrete source: an identifier and a carrier frequency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioEmitter {
    pub id: String,
    /// Carrier frequency in Hz.
    pub frequency: Real,
}

impl RadioEmitter {
    /// `frequency` must be finite and positive for RSSI readings of this
    /// emitter to pass reading validation.
    pub fn new(id: impl Into<String>, frequency: Real) -> Self {
        Self {
            id: id.into(),
            frequency,
        }
    }
}

impl RadioSource for RadioEmitter {
    fn frequency(&self) -> Real {
        self.frequency
    }
}

/// Per-reading consensus information retained by a robust estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InliersData {
    /// Number of readings classified as inliers.
    pub num_inliers: usize,
    /// Inlier mask, one entry per reading (if requested).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inliers: Option<Vec<bool>>,
    /// Absolute residual of each reading against the best candidate (if requested).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub residuals: Option<Vec<Real>>,
}

/// Result of localizing a radio source.
///
/// Variances and covariances are only present when the producing estimator
/// was asked to keep them; radio parameters are `None` for ranging-only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatedSource<S, const D: usize> {
    /// Source metadata carried over from the readings.
    pub source: S,
    /// Estimated source position.
    pub position: Pt<D>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_covariance: Option<MatD<D>>,
    /// Estimated (or fixed) transmitted power in dBm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmitted_power_dbm: Option<Real>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transmitted_power_dbm_variance: Option<Real>,
    /// Estimated (or fixed) path-loss exponent.
    pub path_loss_exponent: Real,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_loss_exponent_variance: Option<Real>,
    /// Full parameter covariance, ordered as position, power, path-loss exponent
    /// (only the estimated parameters are present).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance: Option<DMatrix<Real>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inliers_data: Option<InliersData>,
}

impl<S, const D: usize> EstimatedSource<S, D> {
    /// Flat copy of the estimated position coordinates.
    pub fn position_coordinates(&self) -> [Real; D] {
        let mut out = [0.0; D];
        out.copy_from_slice(self.position.coords.as_slice());
        out
    }

    /// Transmitted power in milliwatts.
    pub fn transmitted_power_mw(&self) -> Option<Real> {
        self.transmitted_power_dbm.map(dbm_to_milliwatts)
    }

    /// Variance of the transmitted power in mW², propagated from the dBm variance.
    ///
    /// First-order propagation of `P = 10^(x/10)`: `dP/dx = P·ln(10)/10`.
    pub fn transmitted_power_mw_variance(&self) -> Option<Real> {
        let p = self.transmitted_power_mw()?;
        let var = self.transmitted_power_dbm_variance?;
        let slope = p * std::f64::consts::LN_10 / 10.0;
        Some(slope * slope * var)
    }
}
