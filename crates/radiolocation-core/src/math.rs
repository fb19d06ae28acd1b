//! Scalar and point type aliases plus free-space propagation helpers.
//!
//! Positions are plain `nalgebra` points with a compile-time dimension, so the
//! same estimators serve planar (`D = 2`) and volumetric (`D = 3`) problems.

use nalgebra::{Point, Point2, Point3, SMatrix, SVector};

/// Scalar type used throughout the library (currently `f64`).
pub type Real = f64;

/// 2D point with [`Real`] coordinates.
pub type Pt2 = Point2<Real>;
/// 3D point with [`Real`] coordinates.
pub type Pt3 = Point3<Real>;
/// Point of arbitrary (compile-time) dimension.
pub type Pt<const D: usize> = Point<Real, D>;
/// Column vector of arbitrary (compile-time) dimension.
pub type VecD<const D: usize> = SVector<Real, D>;
/// Square matrix of arbitrary (compile-time) dimension.
pub type MatD<const D: usize> = SMatrix<Real, D, D>;

/// Speed of light in vacuum (m/s).
pub const SPEED_OF_LIGHT: Real = 299_792_458.0;

/// Path-loss exponent of free space propagation.
pub const FREE_SPACE_PATH_LOSS_EXPONENT: Real = 2.0;

/// Convert a power level in dBm to milliwatts.
pub fn dbm_to_milliwatts(dbm: Real) -> Real {
    Real::powf(10.0, dbm / 10.0)
}

/// Convert a power level in milliwatts to dBm.
///
/// Returns `-inf` for a zero power and `NaN` for negative input.
pub fn milliwatts_to_dbm(milliwatts: Real) -> Real {
    10.0 * milliwatts.log10()
}

/// Free-space gain term `10·log10(c / (4π·f))` in dB for a carrier `frequency` in Hz.
///
/// The received power in dBm for a transmitted power `Pt` (dBm), path-loss
/// exponent `n` and distance `d` is `Pt + n·g − 10·n·log10(d)`, which is the
/// logarithmic form of `Pr = Pt · (c / (4π·f))^n / d^n`.
pub fn free_space_gain_db(frequency: Real) -> Real {
    10.0 * (SPEED_OF_LIGHT / (4.0 * std::f64::consts::PI * frequency)).log10()
}

/// Received power (dBm) predicted by the log-distance path-loss law.
pub fn received_power_dbm(
    transmitted_power_dbm: Real,
    frequency: Real,
    path_loss_exponent: Real,
    distance: Real,
) -> Real {
    transmitted_power_dbm + path_loss_exponent * free_space_gain_db(frequency)
        - 10.0 * path_loss_exponent * distance.log10()
}

/// Invert [`received_power_dbm`]: distance at which `rssi` would be observed.
pub fn distance_from_rssi(
    transmitted_power_dbm: Real,
    frequency: Real,
    path_loss_exponent: Real,
    rssi: Real,
) -> Real {
    let exponent = (transmitted_power_dbm + path_loss_exponent * free_space_gain_db(frequency)
        - rssi)
        / (10.0 * path_loss_exponent);
    Real::powf(10.0, exponent)
}

/// Centroid of a non-empty set of points; `None` for an empty iterator.
pub fn centroid<'a, const D: usize>(points: impl IntoIterator<Item = &'a Pt<D>>) -> Option<Pt<D>> {
    let mut sum = VecD::<D>::zeros();
    let mut count = 0usize;
    for p in points {
        sum += p.coords;
        count += 1;
    }
    (count > 0).then(|| Pt::from(sum / count as Real))
}
