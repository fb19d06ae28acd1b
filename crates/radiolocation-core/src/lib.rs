//! Core types for `radiolocation`.
//!
//! This crate provides the foundational building blocks used by all other
//! crates in the workspace:
//!
//! - scalar and point type aliases (`Real`, `Pt2`, `Pt3`, `Pt<D>`) and the
//!   free-space path-loss helpers,
//! - the [`RadioSource`] abstraction and the [`EstimatedSource`] record,
//! - the [`Reading`] model (ranging, RSSI or both, with optional standard deviations),
//! - a deterministic, model-agnostic consensus engine (RANSAC, MSAC, LMedS, PROSAC).
//!
//! Propagation model (log-distance form of `Pr = Pt·(c / 4πf)^n / d^n`):
//! `Pr[dBm] = Pt[dBm] + 10·n·log10(c / 4πf) − 10·n·log10(d)`
//!
//! # Example
//!
//! ```
//! use radiolocation_core::{Measurement, Pt2, RadioEmitter, Reading, ReadingKind};
//!
//! let ap = RadioEmitter::new("ap-1", 2.4e9);
//! let reading = Reading::new(ap, Pt2::new(1.0, 2.0), Measurement::ranging(3.5)).unwrap();
//! assert_eq!(reading.kind(), ReadingKind::Ranging);
//! ```

/// Scalar/point aliases and propagation helpers.
mod math;
/// Reading model and unknown-parameter flags.
mod reading;
/// Radio sources and estimated-source records.
mod source;

/// Generic consensus engine and traits.
pub mod consensus;
/// Deterministic synthetic data generation helpers.
///
/// Used by workspace tests; can also be handy for benchmarking.
pub mod synthetic;

pub use consensus::*;
pub use math::*;
pub use reading::*;
pub use source::*;
