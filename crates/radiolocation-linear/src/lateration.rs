//! Closed-form linear lateration.
//!
//! Squaring `|p − xᵢ| = dᵢ` gives `|p|² − 2·p·xᵢ + |xᵢ|² = dᵢ²`, which is linear
//! in `[p; |p|²]` once `|p|²` is treated as an independent unknown. For RSSI
//! readings with an unknown transmitted power the squared distance is
//! `dᵢ² = C·wᵢ` with `wᵢ = 10^(−rssiᵢ / 5n)`, adding `C` as one more linear unknown.
//!
//! Observer positions are centred on their centroid and the system columns are
//! equilibrated before the SVD solve.

use nalgebra::{DMatrix, DVector};
use radiolocation_core::{centroid, free_space_gain_db, Pt, Real, VecD};
use thiserror::Error;

/// Relative singular-value floor below which the system is rank deficient.
const RANK_TOLERANCE: Real = 1e-10;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LaterationError {
    #[error("need at least {needed} readings, got {got}")]
    NotEnoughReadings { needed: usize, got: usize },
    #[error("input lengths differ: {positions} positions vs {measurements} measurements")]
    LengthMismatch {
        positions: usize,
        measurements: usize,
    },
    #[error("degenerate observer geometry")]
    Degenerate,
    #[error("svd failed")]
    SvdFailed,
    #[error("recovered power scale {0} is not positive")]
    NonPositiveScale(Real),
}

/// Position and transmitted power recovered from RSSI readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RssiLateration<const D: usize> {
    pub position: Pt<D>,
    /// Transmitted power in dBm.
    pub transmitted_power_dbm: Real,
}

fn check_inputs(
    positions: usize,
    measurements: usize,
    needed: usize,
) -> Result<(), LaterationError> {
    if positions != measurements {
        return Err(LaterationError::LengthMismatch {
            positions,
            measurements,
        });
    }
    if positions < needed {
        return Err(LaterationError::NotEnoughReadings {
            needed,
            got: positions,
        });
    }
    Ok(())
}

/// Least-squares solve of `A x = b` with column equilibration and a rank check.
fn solve_equilibrated(
    mut a: DMatrix<Real>,
    b: DVector<Real>,
) -> Result<DVector<Real>, LaterationError> {
    let mut scales = DVector::<Real>::zeros(a.ncols());
    for (j, mut col) in a.column_iter_mut().enumerate() {
        let s = col.amax();
        if s == 0.0 || !s.is_finite() {
            return Err(LaterationError::Degenerate);
        }
        col /= s;
        scales[j] = s;
    }

    let svd = a.svd(true, true);
    let sv_max = svd.singular_values.max();
    let sv_min = svd.singular_values.min();
    if sv_max <= 0.0 || sv_min <= RANK_TOLERANCE * sv_max {
        return Err(LaterationError::Degenerate);
    }

    let y = svd
        .solve(&b, Real::EPSILON)
        .map_err(|_| LaterationError::SvdFailed)?;
    Ok(y.component_div(&scales))
}

/// Linear lateration from observer positions and measured distances.
///
/// Requires at least `D + 1` non-degenerate observers (not collinear in 2D,
/// not coplanar in 3D). Exact for noise-free distances.
pub fn lateration_from_ranges<const D: usize>(
    positions: &[Pt<D>],
    distances: &[Real],
) -> Result<Pt<D>, LaterationError> {
    check_inputs(positions.len(), distances.len(), D + 1)?;
    let c = centroid(positions).ok_or(LaterationError::Degenerate)?;

    let n = positions.len();
    let mut a = DMatrix::<Real>::zeros(n, D + 1);
    let mut b = DVector::<Real>::zeros(n);
    for (i, (p, &d)) in positions.iter().zip(distances).enumerate() {
        let x = p.coords - c.coords;
        for k in 0..D {
            a[(i, k)] = -2.0 * x[k];
        }
        a[(i, D)] = 1.0;
        b[i] = d * d - x.norm_squared();
    }

    let sol = solve_equilibrated(a, b)?;
    Ok(c + VecD::<D>::from_fn(|k, _| sol[k]))
}

/// Joint linear estimate of position and transmitted power from RSSI readings.
///
/// The path-loss exponent must be known. Requires at least `D + 2` observers
/// that are neither degenerate nor all equidistant from the source.
pub fn lateration_from_rssi<const D: usize>(
    positions: &[Pt<D>],
    rssi: &[Real],
    frequency: Real,
    path_loss_exponent: Real,
) -> Result<RssiLateration<D>, LaterationError> {
    check_inputs(positions.len(), rssi.len(), D + 2)?;
    let c = centroid(positions).ok_or(LaterationError::Degenerate)?;

    let n = positions.len();
    let five_n = 5.0 * path_loss_exponent;
    // Common factor keeps the weights near unity before equilibration.
    let rssi_ref = rssi.iter().copied().fold(Real::NEG_INFINITY, Real::max);

    let mut a = DMatrix::<Real>::zeros(n, D + 2);
    let mut b = DVector::<Real>::zeros(n);
    for (i, (p, &s)) in positions.iter().zip(rssi).enumerate() {
        let x = p.coords - c.coords;
        for k in 0..D {
            a[(i, k)] = -2.0 * x[k];
        }
        a[(i, D)] = 1.0;
        a[(i, D + 1)] = -Real::powf(10.0, -(s - rssi_ref) / five_n);
        b[i] = -x.norm_squared();
    }

    let sol = solve_equilibrated(a, b)?;
    let scale = sol[D + 1];
    if !(scale > 0.0 && scale.is_finite()) {
        return Err(LaterationError::NonPositiveScale(scale));
    }

    // d² = scale · 10^(−(rssi − rssi_ref)/5n) = 10^((Pt + n·g − rssi)/5n)
    let log_c = scale.log10() + rssi_ref / five_n;
    let transmitted_power_dbm =
        five_n * log_c - path_loss_exponent * free_space_gain_db(frequency);

    Ok(RssiLateration {
        position: c + VecD::<D>::from_fn(|k, _| sol[k]),
        transmitted_power_dbm,
    })
}
