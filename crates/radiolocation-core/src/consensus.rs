//! Generic, model-agnostic consensus (RANSAC-family) engine.
//!
//! To use this module, implement the [`Estimator`] trait for your model and
//! call [`consensus_fit`] with a slice of input data and [`ConsensusOptions`].
//! All variants share one sampling loop; [`ConsensusMethod`] only changes how
//! candidates are scored, how inliers are classified and, for PROSAC, the
//! order in which samples are drawn.
//!
//! The engine does not panic on failure: when consensus is not found,
//! [`consensus_fit`] returns a [`ConsensusResult`] with `success == false` and
//! `model == None`.

use crate::Real;
use log::{debug, trace};
use rand::prelude::IndexedRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Scoring / termination strategy of the consensus loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsensusMethod {
    /// Maximize the number of residuals within the threshold.
    #[default]
    Ransac,
    /// Minimize the truncated quadratic cost `Σ min(r², t²)`.
    Msac,
    /// Minimize the median squared residual; the threshold acts as a stop criterion.
    Lmeds,
    /// RANSAC scoring with samples drawn progressively from the best-quality data.
    Prosac,
}

impl ConsensusMethod {
    /// Whether this method orders its samples by per-datum quality scores.
    pub fn uses_quality_scores(self) -> bool {
        matches!(self, ConsensusMethod::Prosac)
    }
}

/// Configuration parameters for the consensus engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusOptions {
    pub method: ConsensusMethod,
    /// Maximum number of sampling iterations.
    pub max_iters: usize,
    /// Inlier residual threshold (upper bound of the robust band for LMedS).
    pub thresh: Real,
    /// Minimum number of inliers required to accept a model.
    ///
    /// Values below the estimator's minimal sample size are raised to it.
    pub min_inliers: usize,
    /// Desired confidence level in `(0, 1)` for finding a good model.
    pub confidence: Real,
    /// Random-number generator seed (for reproducibility).
    pub seed: u64,
    /// Minimum progress increment between two progress notifications.
    pub progress_delta: Real,
    /// Keep the per-datum inlier mask in the result.
    pub keep_inlier_mask: bool,
    /// Keep the per-datum residuals in the result.
    pub keep_residuals: bool,
}

impl Default for ConsensusOptions {
    fn default() -> Self {
        Self {
            method: ConsensusMethod::Ransac,
            max_iters: 5000,
            thresh: 1.0,
            min_inliers: 0,
            confidence: 0.99,
            seed: 1_234_567,
            progress_delta: 0.05,
            keep_inlier_mask: false,
            keep_residuals: false,
        }
    }
}

/// Output of a consensus run.
///
/// Check the [`success`](Self::success) flag before using the model; if it is
/// `false`, then [`model`](Self::model) is `None` and the other fields are unspecified.
#[derive(Debug, Clone)]
pub struct ConsensusResult<M> {
    /// Whether a consensus set satisfying the options was found.
    pub success: bool,
    /// Best model found (if any).
    pub model: Option<M>,
    /// Indices of inlier data points.
    pub inliers: Vec<usize>,
    /// Per-datum inlier mask (if requested).
    pub inlier_mask: Option<Vec<bool>>,
    /// Per-datum absolute residuals against the best model (if requested).
    pub residuals: Option<Vec<Real>>,
    /// Root-mean-square residual over inliers.
    pub inlier_rms: Real,
    /// Score of the best model (lower is better, method dependent).
    pub score: Real,
    /// Number of iterations actually performed.
    pub iters: usize,
}

impl<M> Default for ConsensusResult<M> {
    fn default() -> Self {
        Self {
            success: false,
            model: None,
            inliers: Vec::new(),
            inlier_mask: None,
            residuals: None,
            inlier_rms: Real::INFINITY,
            score: Real::INFINITY,
            iters: 0,
        }
    }
}

/// Generic estimator for consensus methods.
pub trait Estimator {
    type Datum;
    type Model: Clone;

    /// Minimal number of samples needed to estimate a model.
    fn min_samples(&self) -> usize;

    /// Fit a model from a subset of data indices.
    ///
    /// Return `None` if the subset is degenerate or fitting fails.
    fn fit(&self, data: &[Self::Datum], sample_indices: &[usize]) -> Option<Self::Model>;

    /// Residual/error for one datum.
    ///
    /// This should be a **non-negative scalar** in the same units as `opts.thresh`.
    fn residual(&self, model: &Self::Model, datum: &Self::Datum) -> Real;

    /// Optional degeneracy check on the sample subset.
    ///
    /// Default: assume non-degenerate.
    fn is_degenerate(&self, _data: &[Self::Datum], _sample_indices: &[usize]) -> bool {
        false
    }
}

/// Hooks invoked synchronously from inside the consensus loop.
pub trait ConsensusObserver {
    /// Called once per iteration with the zero-based iteration index.
    fn on_iteration(&mut self, _iteration: usize) {}
    /// Called whenever progress advanced by at least `progress_delta`.
    fn on_progress(&mut self, _progress: Real) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ConsensusObserver for NoopObserver {}

fn rms(vals: impl Iterator<Item = Real>) -> Real {
    let (ss, n) = vals.fold((0.0, 0usize), |(ss, n), v| (ss + v * v, n + 1));
    if n == 0 {
        return Real::INFINITY;
    }
    (ss / n as Real).sqrt()
}

fn median(values: &mut [Real]) -> Real {
    if values.is_empty() {
        return Real::INFINITY;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Dynamic iteration bound from current inlier ratio.
///
/// `log(1 − confidence) / log(1 − ratio^m)`, never below `iters_so_far` and
/// never above `max_iters`.
pub fn calculate_iterations(
    confidence: Real,
    inlier_ratio: Real,
    min_samples: usize,
    iters_so_far: usize,
    max_iters: usize,
) -> usize {
    if confidence <= 0.0 || inlier_ratio <= 0.0 {
        return max_iters;
    }

    let p = confidence.min(1.0 - 1e-12);
    let w = inlier_ratio.min(1.0);
    let m = min_samples as Real;

    let denom = (1.0 - w.powf(m)).max(1e-12).ln();
    if denom >= 0.0 {
        return max_iters;
    }

    let n_iter = ((1.0 - p).ln() / denom).ceil().max(0.0) as usize;
    n_iter.clamp(iters_so_far.min(max_iters), max_iters)
}

/// Fraction of the LMedS threshold below which a median residual counts as an
/// exact fit. Sets both the early stop and the narrowest inlier band.
const LMEDS_EXACT_FIT_RATIO: Real = 1e-3;

/// Robust LMedS inlier threshold derived from the best median squared residual.
///
/// The `2.5·σ̂` band is capped by the configured threshold and floored at the
/// exact-fit level, so a loose threshold never admits outliers.
fn lmeds_threshold(median_sq: Real, num_data: usize, min_samples: usize, thresh: Real) -> Real {
    let dof = num_data.saturating_sub(min_samples).max(1) as Real;
    let sigma = 1.4826 * (1.0 + 5.0 / dof) * median_sq.max(0.0).sqrt();
    (2.5 * sigma).max(thresh * LMEDS_EXACT_FIT_RATIO).min(thresh)
}

/// Candidate score; lower is better for every method.
fn score_candidate(
    method: ConsensusMethod,
    residuals: &[Real],
    thresh: Real,
    scratch: &mut Vec<Real>,
) -> Real {
    match method {
        ConsensusMethod::Ransac | ConsensusMethod::Prosac => {
            -(residuals.iter().filter(|&&r| r <= thresh).count() as Real)
        }
        ConsensusMethod::Msac => {
            let t2 = thresh * thresh;
            residuals.iter().map(|&r| (r * r).min(t2)).sum()
        }
        ConsensusMethod::Lmeds => {
            scratch.clear();
            scratch.extend(residuals.iter().map(|&r| r * r));
            median(scratch)
        }
    }
}

/// Draws minimal samples, uniformly or progressively (PROSAC).
struct Sampler {
    all_indices: Vec<usize>,
    min_samples: usize,
    progressive: Option<Progressive>,
}

/// Growth state of the PROSAC hypothesis set (Chum & Matas, 2005).
struct Progressive {
    /// Data indices sorted by decreasing quality.
    sorted: Vec<usize>,
    /// Size of the current hypothesis-generation set.
    n: usize,
    /// Number of samples drawn so far.
    t: usize,
    t_n: Real,
    t_n_prime: usize,
}

impl Sampler {
    fn new(
        num_data: usize,
        min_samples: usize,
        method: ConsensusMethod,
        quality: Option<&[Real]>,
        max_iters: usize,
    ) -> Self {
        let all_indices: Vec<usize> = (0..num_data).collect();
        let progressive = match (method, quality) {
            (ConsensusMethod::Prosac, Some(q)) if q.len() == num_data && num_data > min_samples => {
                let mut sorted = all_indices.clone();
                sorted.sort_by(|&a, &b| q[b].total_cmp(&q[a]));
                // T_m: expected number of samples drawn only from the top m data.
                let mut t_n = max_iters as Real;
                for i in 0..min_samples {
                    t_n *= (min_samples - i) as Real / (num_data - i) as Real;
                }
                Some(Progressive {
                    sorted,
                    n: min_samples,
                    t: 0,
                    t_n,
                    t_n_prime: 1,
                })
            }
            _ => None,
        };
        Self {
            all_indices,
            min_samples,
            progressive,
        }
    }

    fn draw(&mut self, rng: &mut StdRng, out: &mut [usize]) {
        let m = self.min_samples;
        let Some(prog) = self.progressive.as_mut() else {
            self.all_indices
                .as_slice()
                .choose_multiple(rng, m)
                .enumerate()
                .for_each(|(k, &idx)| out[k] = idx);
            return;
        };

        prog.t += 1;
        let total = prog.sorted.len();
        while prog.n < total && prog.t > prog.t_n_prime {
            let t_next = prog.t_n * (prog.n + 1) as Real / (prog.n + 1 - m) as Real;
            prog.t_n_prime += (t_next - prog.t_n).ceil().max(0.0) as usize;
            prog.t_n = t_next;
            prog.n += 1;
        }

        if prog.n == total && prog.t > prog.t_n_prime {
            // Progressive phase exhausted: plain uniform sampling.
            prog.sorted
                .as_slice()
                .choose_multiple(rng, m)
                .enumerate()
                .for_each(|(k, &idx)| out[k] = idx);
        } else {
            // m - 1 samples from the top n - 1 data plus the n-th datum.
            prog.sorted[..prog.n - 1]
                .choose_multiple(rng, m - 1)
                .enumerate()
                .for_each(|(k, &idx)| out[k] = idx);
            out[m - 1] = prog.sorted[prog.n - 1];
        }
    }
}

/// Run the consensus loop for a given [`Estimator`] implementation.
///
/// `quality_scores` (higher is better) are only used by
/// [`ConsensusMethod::Prosac`]; without them PROSAC degrades to uniform sampling.
/// Samples rejected as degenerate, or whose fit fails, still count as iterations.
pub fn consensus_fit<E: Estimator>(
    estimator: &E,
    data: &[E::Datum],
    opts: &ConsensusOptions,
    quality_scores: Option<&[Real]>,
    observer: &mut dyn ConsensusObserver,
) -> ConsensusResult<E::Model> {
    let mut best: ConsensusResult<E::Model> = ConsensusResult::default();

    let min_samples = estimator.min_samples();
    if min_samples == 0 || data.len() < min_samples {
        return best;
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let mut sampler = Sampler::new(
        data.len(),
        min_samples,
        opts.method,
        quality_scores,
        opts.max_iters,
    );
    let mut sample_idxs = vec![0usize; min_samples];

    // With no choice of subset, one deterministic fit is all that can be done.
    let max_iters = if data.len() == min_samples {
        1
    } else {
        opts.max_iters.max(1)
    };
    let mut dynamic_max_iters = max_iters;

    let mut residuals = vec![0.0; data.len()];
    let mut best_residuals = Vec::<Real>::new();
    let mut scratch = Vec::<Real>::with_capacity(data.len());
    let mut best_thresh = opts.thresh;
    let mut last_progress = 0.0;

    let mut num_iters = 0;
    while num_iters < dynamic_max_iters {
        num_iters += 1;
        sampler.draw(&mut rng, &mut sample_idxs);

        let candidate = if estimator.is_degenerate(data, &sample_idxs) {
            debug!(
                "iteration {}: degenerate sample {:?} skipped",
                num_iters, sample_idxs
            );
            None
        } else {
            estimator.fit(data, &sample_idxs)
        };

        if let Some(model) = candidate {
            for (r, datum) in residuals.iter_mut().zip(data) {
                let v = estimator.residual(&model, datum).abs();
                *r = if v.is_nan() { Real::INFINITY } else { v };
            }
            let score = score_candidate(opts.method, &residuals, opts.thresh, &mut scratch);
            trace!("iteration {}: candidate score {}", num_iters, score);

            if !best.success || score < best.score {
                best_thresh = match opts.method {
                    ConsensusMethod::Lmeds => {
                        lmeds_threshold(score, data.len(), min_samples, opts.thresh)
                    }
                    _ => opts.thresh,
                };
                let inlier_count = residuals.iter().filter(|&&r| r <= best_thresh).count();
                debug!(
                    "iteration {}: new best candidate (score {}, {} inliers of {})",
                    num_iters,
                    score,
                    inlier_count,
                    data.len()
                );

                best.success = true;
                best.model = Some(model);
                best.score = score;
                best.iters = num_iters;
                best_residuals.clone_from(&residuals);

                let inlier_ratio = inlier_count as Real / data.len() as Real;
                dynamic_max_iters = calculate_iterations(
                    opts.confidence,
                    inlier_ratio,
                    min_samples,
                    num_iters,
                    max_iters,
                );
            }
        }

        observer.on_iteration(num_iters - 1);

        let progress = (num_iters as Real / dynamic_max_iters.max(1) as Real).min(1.0);
        if progress - last_progress >= opts.progress_delta {
            last_progress = progress;
            observer.on_progress(progress);
        }

        if opts.method == ConsensusMethod::Lmeds
            && best.success
            && best.score.sqrt() <= opts.thresh * LMEDS_EXACT_FIT_RATIO
        {
            debug!("iteration {}: median residual at exact-fit level", num_iters);
            break;
        }
    }

    if !best.success {
        return best;
    }

    best.inliers = best_residuals
        .iter()
        .enumerate()
        .filter(|(_, &r)| r <= best_thresh)
        .map(|(i, _)| i)
        .collect();

    let min_inliers = opts.min_inliers.max(min_samples);
    if best.inliers.len() < min_inliers {
        debug!(
            "best candidate has {} inliers, {} required",
            best.inliers.len(),
            min_inliers
        );
        return ConsensusResult {
            iters: num_iters,
            ..ConsensusResult::default()
        };
    }

    best.inlier_rms = rms(best.inliers.iter().map(|&i| best_residuals[i]));
    if opts.keep_inlier_mask {
        best.inlier_mask = Some(best_residuals.iter().map(|&r| r <= best_thresh).collect());
    }
    if opts.keep_residuals {
        best.residuals = Some(best_residuals);
    }
    best.iters = num_iters;
    best
}
