//! Seeded observer layouts and signal readings for tests and demos.
//!
//! A seed fully determines every observer position and noise sample, so a
//! failing localization scenario can be replayed from its seed alone.

use crate::{received_power_dbm, Pt, Real, VecD};

/// SplitMix64-based pseudo-random stream with uniform and Gaussian draws.
#[derive(Debug, Clone)]
pub struct SyntheticStream {
    state: u64,
    spare_gaussian: Option<Real>,
}

impl SyntheticStream {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed,
            spare_gaussian: None,
        }
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform draw in `[0, 1)` from the top 53 bits.
    #[inline]
    pub fn unit(&mut self) -> Real {
        let mantissa = self.next_u64() >> 11;
        (mantissa as Real) * (1.0 / ((1u64 << 53) as Real))
    }

    /// Uniform draw in `[lo, hi)`.
    pub fn uniform(&mut self, lo: Real, hi: Real) -> Real {
        lo + (hi - lo) * self.unit()
    }

    /// Zero-mean Gaussian draw with standard deviation `sigma` (Box–Muller).
    pub fn gaussian(&mut self, sigma: Real) -> Real {
        if let Some(z) = self.spare_gaussian.take() {
            return sigma * z;
        }
        // 1 - unit() lies in (0, 1], keeping the logarithm finite.
        let u1 = 1.0 - self.unit();
        let u2 = self.unit();
        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = 2.0 * std::f64::consts::PI * u2;
        self.spare_gaussian = Some(radius * angle.sin());
        sigma * radius * angle.cos()
    }

    /// Point with every coordinate uniform in `[lo, hi)`.
    pub fn uniform_point<const D: usize>(&mut self, lo: Real, hi: Real) -> Pt<D> {
        Pt::from(VecD::<D>::from_fn(|_, _| self.uniform(lo, hi)))
    }
}

/// Noise-free RSSI observed at `observer` from a source at `source_position`.
pub fn rssi_at<const D: usize>(
    source_position: &Pt<D>,
    transmitted_power_dbm: Real,
    frequency: Real,
    path_loss_exponent: Real,
    observer: &Pt<D>,
) -> Real {
    let distance = nalgebra::distance(source_position, observer);
    received_power_dbm(transmitted_power_dbm, frequency, path_loss_exponent, distance)
}
