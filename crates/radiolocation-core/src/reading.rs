//! Reading model: one observation of an unknown source from a known position.
//!
//! A [`Reading`] pairs the observer position with a [`Measurement`], which may
//! carry a range, a received signal strength (RSSI), or both. Readings are
//! validated on construction and immutable afterwards.

use crate::{Pt, Real};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing a [`Reading`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadingError {
    /// Distances must be finite and non-negative.
    #[error("distance must be finite and non-negative, got {0}")]
    InvalidDistance(Real),
    /// Standard deviations must be finite and strictly positive.
    #[error("standard deviation must be finite and positive, got {0}")]
    InvalidStandardDeviation(Real),
    /// RSSI values must be finite.
    #[error("rssi must be finite, got {0}")]
    InvalidRssi(Real),
    /// Observer coordinates must be finite.
    #[error("observer position has non-finite coordinates")]
    NonFinitePosition,
}

/// Kind of information a reading (or a whole reading list) carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    /// Distance only.
    Ranging,
    /// Received signal strength only.
    Rssi,
    /// Both distance and received signal strength.
    RangingAndRssi,
}

impl ReadingKind {
    /// Whether readings of this kind carry a distance.
    pub fn has_ranging(self) -> bool {
        matches!(self, ReadingKind::Ranging | ReadingKind::RangingAndRssi)
    }

    /// Whether readings of this kind carry an RSSI value.
    pub fn has_rssi(self) -> bool {
        matches!(self, ReadingKind::Rssi | ReadingKind::RangingAndRssi)
    }

    /// Number of residual rows contributed by one reading of this kind.
    pub fn residuals_per_reading(self) -> usize {
        usize::from(self.has_ranging()) + usize::from(self.has_rssi())
    }

    /// Whether readings of this kind can constrain the requested unknowns.
    ///
    /// Transmitted power and path-loss exponent only appear in the RSSI model.
    pub fn supports(self, unknowns: Unknowns) -> bool {
        self.has_rssi() || !unknowns.any_radio()
    }

    /// Common kind of a reading list.
    ///
    /// Returns `None` for an empty list or a list mixing kinds.
    pub fn of_list<S, const D: usize>(readings: &[Reading<S, D>]) -> Option<Self> {
        let first = readings.first()?.kind();
        readings
            .iter()
            .all(|r| r.kind() == first)
            .then_some(first)
    }
}

/// Radio parameters estimated alongside the position.
///
/// The position is always estimated; each flag adds one unknown and raises the
/// minimum number of readings by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Unknowns {
    /// Estimate the transmitted power (dBm).
    pub transmitted_power: bool,
    /// Estimate the path-loss exponent.
    pub path_loss_exponent: bool,
}

impl Unknowns {
    /// Position only.
    pub fn position_only() -> Self {
        Self::default()
    }

    /// Position, transmitted power and path-loss exponent.
    pub fn all() -> Self {
        Self {
            transmitted_power: true,
            path_loss_exponent: true,
        }
    }

    /// Whether any radio parameter is estimated.
    pub fn any_radio(self) -> bool {
        self.transmitted_power || self.path_loss_exponent
    }

    /// Number of free parameters for a `dims`-dimensional position.
    pub fn num_params(self, dims: usize) -> usize {
        dims + usize::from(self.transmitted_power) + usize::from(self.path_loss_exponent)
    }

    /// Minimum number of readings required to estimate these unknowns.
    ///
    /// `dims + 1` for position alone, plus one for each enabled radio parameter.
    pub fn min_readings(self, dims: usize) -> usize {
        self.num_params(dims) + 1
    }
}

/// Scalar observation(s) carried by a reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Measurement {
    /// Measured distance to the source (metres).
    Ranging {
        distance: Real,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distance_std: Option<Real>,
    },
    /// Received signal strength (dBm).
    Rssi {
        rssi: Real,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rssi_std: Option<Real>,
    },
    /// Both a distance and a received signal strength.
    RangingAndRssi {
        distance: Real,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distance_std: Option<Real>,
        rssi: Real,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rssi_std: Option<Real>,
    },
}

impl Measurement {
    /// Distance-only measurement without a standard deviation.
    pub fn ranging(distance: Real) -> Self {
        Measurement::Ranging {
            distance,
            distance_std: None,
        }
    }

    /// RSSI-only measurement without a standard deviation.
    pub fn rssi(rssi: Real) -> Self {
        Measurement::Rssi {
            rssi,
            rssi_std: None,
        }
    }

    /// Combined measurement without standard deviations.
    pub fn ranging_and_rssi(distance: Real, rssi: Real) -> Self {
        Measurement::RangingAndRssi {
            distance,
            distance_std: None,
            rssi,
            rssi_std: None,
        }
    }

    pub fn kind(&self) -> ReadingKind {
        match self {
            Measurement::Ranging { .. } => ReadingKind::Ranging,
            Measurement::Rssi { .. } => ReadingKind::Rssi,
            Measurement::RangingAndRssi { .. } => ReadingKind::RangingAndRssi,
        }
    }

    pub fn distance(&self) -> Option<Real> {
        match *self {
            Measurement::Ranging { distance, .. } | Measurement::RangingAndRssi { distance, .. } => {
                Some(distance)
            }
            Measurement::Rssi { .. } => None,
        }
    }

    pub fn distance_std(&self) -> Option<Real> {
        match *self {
            Measurement::Ranging { distance_std, .. }
            | Measurement::RangingAndRssi { distance_std, .. } => distance_std,
            Measurement::Rssi { .. } => None,
        }
    }

    pub fn rssi_value(&self) -> Option<Real> {
        match *self {
            Measurement::Rssi { rssi, .. } | Measurement::RangingAndRssi { rssi, .. } => Some(rssi),
            Measurement::Ranging { .. } => None,
        }
    }

    pub fn rssi_std(&self) -> Option<Real> {
        match *self {
            Measurement::Rssi { rssi_std, .. } | Measurement::RangingAndRssi { rssi_std, .. } => {
                rssi_std
            }
            Measurement::Ranging { .. } => None,
        }
    }

    /// Attach a distance standard deviation (ignored for RSSI-only measurements).
    pub fn with_distance_std(mut self, std: Real) -> Self {
        match &mut self {
            Measurement::Ranging { distance_std, .. }
            | Measurement::RangingAndRssi { distance_std, .. } => *distance_std = Some(std),
            Measurement::Rssi { .. } => {}
        }
        self
    }

    /// Attach an RSSI standard deviation (ignored for ranging-only measurements).
    pub fn with_rssi_std(mut self, std: Real) -> Self {
        match &mut self {
            Measurement::Rssi { rssi_std, .. } | Measurement::RangingAndRssi { rssi_std, .. } => {
                *rssi_std = Some(std)
            }
            Measurement::Ranging { .. } => {}
        }
        self
    }

    fn validate(&self) -> Result<(), ReadingError> {
        if let Some(d) = self.distance() {
            if !d.is_finite() || d < 0.0 {
                return Err(ReadingError::InvalidDistance(d));
            }
        }
        if let Some(rssi) = self.rssi_value() {
            if !rssi.is_finite() {
                return Err(ReadingError::InvalidRssi(rssi));
            }
        }
        for std in [self.distance_std(), self.rssi_std()].into_iter().flatten() {
            if !std.is_finite() || std <= 0.0 {
                return Err(ReadingError::InvalidStandardDeviation(std));
            }
        }
        Ok(())
    }
}

/// A single observation of source `S` taken at a known position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading<S, const D: usize> {
    source: S,
    position: Pt<D>,
    measurement: Measurement,
}

impl<S, const D: usize> Reading<S, D> {
    /// Build a reading after validating the measurement and position.
    ///
    /// # Errors
    ///
    /// Returns a [`ReadingError`] for negative or non-finite distances,
    /// non-positive standard deviations, non-finite RSSI or non-finite coordinates.
    pub fn new(source: S, position: Pt<D>, measurement: Measurement) -> Result<Self, ReadingError> {
        if position.coords.iter().any(|c| !c.is_finite()) {
            return Err(ReadingError::NonFinitePosition);
        }
        measurement.validate()?;
        Ok(Self {
            source,
            position,
            measurement,
        })
    }

    /// Source this reading observes.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Position the reading was taken at.
    pub fn position(&self) -> &Pt<D> {
        &self.position
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    pub fn kind(&self) -> ReadingKind {
        self.measurement.kind()
    }
}
