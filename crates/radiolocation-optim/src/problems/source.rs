//! Least-squares localization of a single radio source.
//!
//! Parameter vector layout: `[p (D), Pt (dBm, if estimated), n (if estimated)]`.
//! Parameters that are not estimated are held at their fixed values.
//!
//! Residual rows, per reading and in this order:
//! - ranging: `|p − xᵢ| − dᵢ`
//! - RSSI: `Pt + n·g − 10·n·log10|p − xᵢ| − rssiᵢ`, with `g = 10·log10(c / 4πf)`.
//!
//! Rows are scaled by `1/σ` when the reading carries a standard deviation.

use crate::NllsProblem;
use nalgebra::{DMatrix, DVector};
use radiolocation_core::{free_space_gain_db, Pt, RadioSource, Reading, Real, Unknowns};
use std::f64::consts::LN_10;

/// Complete parameter set of the propagation model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceParams<const D: usize> {
    pub position: Pt<D>,
    /// Transmitted power in dBm (unused by ranging rows).
    pub transmitted_power_dbm: Real,
    /// Path-loss exponent (unused by ranging rows).
    pub path_loss_exponent: Real,
}

/// Signed ranging residual `|p − x| − d`.
pub fn ranging_residual<const D: usize>(position: &Pt<D>, observer: &Pt<D>, distance: Real) -> Real {
    nalgebra::distance(position, observer) - distance
}

/// Signed RSSI residual (predicted minus observed, dB).
///
/// `gain` is the free-space term `10·log10(c / 4πf)` of the source frequency.
pub fn rssi_residual<const D: usize>(
    params: &SourceParams<D>,
    gain: Real,
    observer: &Pt<D>,
    rssi: Real,
) -> Real {
    let n = params.path_loss_exponent;
    let d = nalgebra::distance(&params.position, observer);
    params.transmitted_power_dbm + n * gain - 10.0 * n * d.log10() - rssi
}

/// Largest absolute residual of one reading under `params`.
///
/// Combined readings only fit when both terms fit, so the larger one is
/// returned. Non-finite residuals map to `+inf`.
pub fn reading_residual<S: RadioSource, const D: usize>(
    reading: &Reading<S, D>,
    params: &SourceParams<D>,
) -> Real {
    let m = reading.measurement();
    let ranging = m
        .distance()
        .map(|d| ranging_residual(&params.position, reading.position(), d));
    let rssi = m.rssi_value().map(|rssi| {
        let gain = free_space_gain_db(reading.source().frequency());
        rssi_residual(params, gain, reading.position(), rssi)
    });

    let mut worst: Real = 0.0;
    for r in [ranging, rssi].into_iter().flatten() {
        if !r.is_finite() {
            return Real::INFINITY;
        }
        worst = worst.max(r.abs());
    }
    worst
}

/// Localization problem over a fixed set of readings.
pub struct SourceProblem<'a, S, const D: usize> {
    readings: &'a [&'a Reading<S, D>],
    gains: Vec<Real>,
    unknowns: Unknowns,
    fixed: SourceParams<D>,
    num_residuals: usize,
}

impl<'a, S: RadioSource, const D: usize> SourceProblem<'a, S, D> {
    /// `fixed` supplies the values of the radio parameters that are not estimated.
    pub fn new(readings: &'a [&'a Reading<S, D>], unknowns: Unknowns, fixed: SourceParams<D>) -> Self {
        let gains = readings
            .iter()
            .map(|r| free_space_gain_db(r.source().frequency()))
            .collect();
        let num_residuals = readings
            .iter()
            .map(|r| r.kind().residuals_per_reading())
            .sum();
        Self {
            readings,
            gains,
            unknowns,
            fixed,
            num_residuals,
        }
    }

    pub fn unknowns(&self) -> Unknowns {
        self.unknowns
    }

    /// Index of the transmitted power in the parameter vector, if estimated.
    pub fn power_index(&self) -> Option<usize> {
        self.unknowns.transmitted_power.then_some(D)
    }

    /// Index of the path-loss exponent in the parameter vector, if estimated.
    pub fn path_loss_index(&self) -> Option<usize> {
        self.unknowns
            .path_loss_exponent
            .then_some(D + usize::from(self.unknowns.transmitted_power))
    }

    pub fn pack(&self, params: &SourceParams<D>) -> DVector<Real> {
        let mut x = DVector::zeros(self.unknowns.num_params(D));
        x.rows_mut(0, D).copy_from(&params.position.coords);
        if let Some(i) = self.power_index() {
            x[i] = params.transmitted_power_dbm;
        }
        if let Some(i) = self.path_loss_index() {
            x[i] = params.path_loss_exponent;
        }
        x
    }

    pub fn unpack(&self, x: &DVector<Real>) -> SourceParams<D> {
        let mut params = self.fixed;
        params.position = Pt::from_slice(&x.as_slice()[..D]);
        if let Some(i) = self.power_index() {
            params.transmitted_power_dbm = x[i];
        }
        if let Some(i) = self.path_loss_index() {
            params.path_loss_exponent = x[i];
        }
        params
    }
}

impl<S: RadioSource, const D: usize> NllsProblem for SourceProblem<'_, S, D> {
    fn num_params(&self) -> usize {
        self.unknowns.num_params(D)
    }

    fn num_residuals(&self) -> usize {
        self.num_residuals
    }

    fn residuals_unweighted(&self, x: &DVector<Real>) -> DVector<Real> {
        let params = self.unpack(x);
        let mut r = DVector::zeros(self.num_residuals);
        let mut row = 0;
        for (reading, &gain) in self.readings.iter().zip(&self.gains) {
            let m = reading.measurement();
            if let Some(d) = m.distance() {
                r[row] = ranging_residual(&params.position, reading.position(), d);
                row += 1;
            }
            if let Some(rssi) = m.rssi_value() {
                r[row] = rssi_residual(&params, gain, reading.position(), rssi);
                row += 1;
            }
        }
        r
    }

    fn jacobian_unweighted(&self, x: &DVector<Real>) -> DMatrix<Real> {
        let params = self.unpack(x);
        let n = params.path_loss_exponent;
        let power_col = self.power_index();
        let path_loss_col = self.path_loss_index();

        let mut j = DMatrix::zeros(self.num_residuals, self.num_params());
        let mut row = 0;
        for (reading, &gain) in self.readings.iter().zip(&self.gains) {
            let delta = params.position.coords - reading.position().coords;
            let d = delta.norm();
            let m = reading.measurement();
            if m.distance().is_some() {
                if d > 0.0 {
                    for k in 0..D {
                        j[(row, k)] = delta[k] / d;
                    }
                }
                row += 1;
            }
            if m.rssi_value().is_some() {
                if d > 0.0 {
                    let slope = -10.0 * n / (LN_10 * d * d);
                    for k in 0..D {
                        j[(row, k)] = slope * delta[k];
                    }
                }
                if let Some(col) = power_col {
                    j[(row, col)] = 1.0;
                }
                if let Some(col) = path_loss_col {
                    j[(row, col)] = gain - 10.0 * d.log10();
                }
                row += 1;
            }
        }
        j
    }

    fn row_scales(&self) -> DVector<Real> {
        let mut scales = DVector::from_element(self.num_residuals, 1.0);
        let mut row = 0;
        for reading in self.readings {
            let m = reading.measurement();
            if m.distance().is_some() {
                if let Some(std) = m.distance_std() {
                    scales[row] = 1.0 / std;
                }
                row += 1;
            }
            if m.rssi_value().is_some() {
                if let Some(std) = m.rssi_std() {
                    scales[row] = 1.0 / std;
                }
                row += 1;
            }
        }
        scales
    }
}
