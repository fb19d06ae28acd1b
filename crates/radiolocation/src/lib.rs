//! High-level entry crate for the `radiolocation` workspace.
//!
//! Localizes a radio source from ranging and/or RSSI readings taken at known
//! positions, optionally estimating its transmitted power and path-loss
//! exponent, while tolerating a fraction of grossly wrong readings.
//!
//! ## Robust estimation
//!
//! ```no_run
//! use radiolocation::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ap = RadioEmitter::new("ap-1", 2.4e9);
//! let readings: Vec<Reading<RadioEmitter, 3>> = /* collected readings */
//! # vec![];
//!
//! let mut estimator = RobustSourceEstimator::new();
//! estimator.set_transmitted_power_estimation_enabled(true)?;
//! estimator.set_threshold(1.0)?;
//! estimator.set_readings(readings)?;
//!
//! let estimated = estimator.estimate()?;
//! println!("position: {:?}", estimated.position_coordinates());
//! println!("power: {:?} dBm", estimated.transmitted_power_dbm);
//! # let _ = ap;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - **[`robust`]**: robust estimator state machine, configuration and listener
//! - **[`helpers`]**: one-shot [`locate_source`](helpers::locate_source)
//! - **[`core`]**: point aliases, readings, sources, consensus engine
//! - **[`linear`]**: closed-form lateration seeds
//! - **[`optim`]**: non-robust least-squares estimator
//! - **[`prelude`]**: convenient re-exports for common use cases

pub mod helpers;
pub mod robust;

/// Point aliases, reading model, radio sources and the consensus engine.
pub mod core {
    pub use radiolocation_core::*;
}

/// Closed-form lateration used to seed the non-linear solver.
pub mod linear {
    pub use radiolocation_linear::*;
}

/// Non-robust least-squares estimation and solver backends.
pub mod optim {
    pub use radiolocation_optim::*;
}

pub use robust::{
    RobustEstimatorConfig, RobustEstimatorError, RobustEstimatorListener, RobustSourceEstimator,
};

/// Convenient re-exports for common use cases.
///
/// Import with `use radiolocation::prelude::*;` to get started quickly.
pub mod prelude {
    pub use crate::core::{
        ConsensusMethod, EstimatedSource, InliersData, Measurement, Pt2, Pt3, RadioEmitter,
        RadioSource, Reading, ReadingKind, Real, Unknowns,
    };
    pub use crate::helpers::locate_source;
    pub use crate::optim::{EstimationError, SourceEstimator, SourceSeed};
    pub use crate::robust::{
        RobustEstimatorConfig, RobustEstimatorError, RobustEstimatorListener,
        RobustSourceEstimator,
    };
}
