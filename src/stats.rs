//! Statistics accumulated across iterations: confidence intervals on parameters and on
//! completed data, empirical class frequencies, and the harmonic-mean likelihood estimator.

use crate::data::{AugmentedData, DataValue};
use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use std::cmp::Ordering;

/// Rounding slack for the quantile ranks, so that `0.05 * 100` lands on 5 and not on 4.
const RANK_EPSILON: f64 = 1e-9;

/// Normalizes a row of log-probabilities into probabilities with a stable log-sum-exp.
///
/// Returns the logarithm of the normalizing sum, or `None` when every entry is `-inf` (or
/// not comparable), in which case `out` is left untouched.
///
/// # Examples
///
/// ```rust
/// use mixtcomp::stats::log_to_multi;
/// use ndarray::{array, Array1};
///
/// let ln = array![0.3f64.ln(), 0.3f64.ln(), 0.4f64.ln()] - 1000.0;
/// let mut out = Array1::zeros(3);
/// log_to_multi(ln.view(), out.view_mut()).unwrap();
/// assert!((out[2] - 0.4).abs() < 1e-9);
/// ```
pub fn log_to_multi(ln_comp: ArrayView1<f64>, mut out: ArrayViewMut1<f64>) -> Option<f64> {
    let max = *ln_comp.max().ok()?;
    if max == f64::NEG_INFINITY || max.is_nan() {
        return None;
    }
    out.zip_mut_with(&ln_comp, |o, &l| *o = (l - max).exp());
    let sum = out.sum();
    out.mapv_inplace(|o| o / sum);
    Some(max + sum.ln())
}

/// Ranks of the median, lower and upper bounds in a sorted log of `iteration_max + 1` values.
pub fn quantile_ranks(confidence_level: f64, iteration_max: usize) -> (usize, usize, usize) {
    let alpha = (1.0 - confidence_level) / 2.0;
    let n = iteration_max as f64;
    let low = (alpha * n + RANK_EPSILON).floor() as usize;
    let high = ((1.0 - alpha) * n + RANK_EPSILON).floor() as usize + 1;
    (iteration_max / 2, low.min(iteration_max), high.min(iteration_max))
}

fn sort_partial<T: PartialOrd>(values: &mut [T]) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
}

/**
Confidence intervals over a flat parameter vector, accumulated over a run.

At the last iteration each parameter's log is sorted and the export matrix receives
three columns: the median, the `alpha` rank and the `1 - alpha` rank, with
`alpha = (1 - confidence_level) / 2`.

# Examples

```rust
use mixtcomp::stats::ConfIntParamStat;

let mut stat = ConfIntParamStat::new(0.9);
let iteration_max = 100;
for it in 0..=iteration_max {
    stat.sample_param(&[it as f64], it, iteration_max);
}
let s = stat.stat_storage();
assert_eq!(s[[0, 0]], 50.0);
assert_eq!(s[[0, 1]], 5.0);
assert_eq!(s[[0, 2]], 96.0);
```
*/
#[derive(Debug, Clone)]
pub struct ConfIntParamStat<T> {
    confidence_level: f64,
    nb_param: usize,
    initial_n_iter: usize,
    /// parameter × iteration
    log_storage: Array2<T>,
    /// parameter × (estimate, lower, upper), a single column for imported parameters
    stat_storage: Array2<T>,
}

impl<T: Copy + PartialOrd + Default> ConfIntParamStat<T> {
    pub fn new(confidence_level: f64) -> Self {
        Self {
            confidence_level,
            nb_param: 0,
            initial_n_iter: 0,
            log_storage: Array2::default((0, 0)),
            stat_storage: Array2::default((0, 0)),
        }
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn sample_param(&mut self, param: &[T], iteration: usize, iteration_max: usize) {
        if iteration == 0 {
            self.nb_param = param.len();
            self.initial_n_iter = iteration_max + 1;
            self.log_storage = Array2::default((self.nb_param, self.initial_n_iter));
            self.stat_storage = Array2::default((self.nb_param, 3));
        }
        self.sample(param, iteration);

        if iteration == iteration_max {
            // the run may have stopped early on a stable partition
            if iteration_max + 1 != self.initial_n_iter {
                self.log_storage = self
                    .log_storage
                    .slice(s![.., ..iteration_max + 1])
                    .to_owned();
            }
            let (median, low, high) = quantile_ranks(self.confidence_level, iteration_max);
            for p in 0..self.nb_param {
                let mut row = self.log_storage.row(p).to_vec();
                sort_partial(&mut row);
                self.stat_storage[[p, 0]] = row[median];
                self.stat_storage[[p, 1]] = row[low];
                self.stat_storage[[p, 2]] = row[high];
            }
        }
    }

    fn sample(&mut self, param: &[T], iteration: usize) {
        for (p, &value) in param.iter().enumerate().take(self.nb_param) {
            self.log_storage[[p, iteration]] = value;
        }
    }

    /// Stores imported parameters as a single column, without any iteration log.
    pub fn set_param_storage(&mut self, param: &[T]) {
        self.nb_param = param.len();
        self.log_storage = Array2::default((self.nb_param, 0));
        self.stat_storage = Array2::from_shape_fn((self.nb_param, 1), |(p, _)| param[p]);
    }

    /// Copies the point estimates back into the live parameters.
    pub fn set_expectation_param(&self, param: &mut [T]) {
        for (p, value) in param.iter_mut().enumerate().take(self.stat_storage.nrows()) {
            *value = self.stat_storage[[p, 0]];
        }
    }

    pub fn stat_storage(&self) -> &Array2<T> {
        &self.stat_storage
    }

    pub fn log_storage(&self) -> &Array2<T> {
        &self.log_storage
    }
}

impl ConfIntParamStat<f64> {
    /// Renormalizes each column, block of `nb_modality` consecutive parameters by block,
    /// so that probabilities taken from different ranks still sum to one.
    pub fn normalize_param(&mut self, nb_modality: usize) {
        if nb_modality == 0 {
            return;
        }
        let nb_block = self.stat_storage.nrows() / nb_modality;
        for mut col in self.stat_storage.columns_mut() {
            for b in 0..nb_block {
                let mut block = col.slice_mut(s![b * nb_modality..(b + 1) * nb_modality]);
                let sum = block.sum();
                if sum > 0.0 {
                    block.mapv_inplace(|x| x / sum);
                }
            }
        }
    }
}

/// Final statistics of one missing value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataStat<T> {
    pub individual: usize,
    pub estimate: T,
    pub lower: T,
    pub upper: T,
}

/**
Confidence intervals over the completed values of one variable during the Gibbs run.

Only individuals with a missing descriptor are tracked. At the last iteration the completed
value is replaced by the point estimate (mean for reals, mode for discrete values).
*/
#[derive(Debug, Clone)]
pub struct ConfIntDataStat<T> {
    confidence_level: f64,
    logs: Vec<Vec<T>>,
    stat_storage: Vec<Option<DataStat<T>>>,
}

impl<T: DataValue> ConfIntDataStat<T> {
    pub fn new(nb_ind: usize, confidence_level: f64) -> Self {
        Self {
            confidence_level,
            logs: vec![Vec::new(); nb_ind],
            stat_storage: vec![None; nb_ind],
        }
    }

    pub fn sample_vals(
        &mut self,
        aug: &AugmentedData<T>,
        i: usize,
        iteration: usize,
        iteration_max: usize,
    ) {
        if aug.is_present(i) {
            return;
        }
        if iteration == 0 {
            self.logs[i].clear();
            self.logs[i].reserve(iteration_max + 1);
        }
        self.logs[i].push(aug.data[i]);

        if iteration == iteration_max {
            let mut sorted = std::mem::take(&mut self.logs[i]);
            sort_partial(&mut sorted);
            let last = sorted.len() - 1;
            let (_, low, high) = quantile_ranks(self.confidence_level, last);
            self.stat_storage[i] = Some(DataStat {
                individual: i,
                estimate: T::central_estimate(&sorted),
                lower: sorted[low],
                upper: sorted[high],
            });
        }
    }

    /// Overwrites the completed value of `i` with its point estimate, if one was computed.
    pub fn impute_data(&self, aug: &mut AugmentedData<T>, i: usize) {
        if let Some(stat) = &self.stat_storage[i] {
            aug.data[i] = stat.estimate;
        }
    }

    pub fn stat_storage(&self) -> Vec<DataStat<T>> {
        self.stat_storage.iter().flatten().copied().collect()
    }
}

/// Empirical frequencies of the sampled class of each individual during the Gibbs run.
#[derive(Debug, Clone)]
pub struct ClassDataStat {
    counts: Array2<f64>,
}

impl ClassDataStat {
    pub fn new(nb_ind: usize, nb_class: usize) -> Self {
        Self {
            counts: Array2::zeros((nb_ind, nb_class)),
        }
    }

    pub fn sample_vals(&mut self, i: usize, class: usize, iteration: usize) {
        if iteration == 0 {
            self.counts.row_mut(i).fill(0.0);
        }
        self.counts[[i, class]] += 1.0;
    }

    /// Replaces `tik[i, :]` by the empirical class frequencies and, unless the label is
    /// observed, sets `zi[i]` to their mode.
    pub fn impute_data(&self, i: usize, zi: &mut AugmentedData<usize>, mut tik_row: ArrayViewMut1<f64>) {
        let row = self.counts.row(i);
        let total = row.sum();
        if total <= 0.0 {
            return;
        }
        tik_row.zip_mut_with(&row, |t, &c| *t = c / total);
        if !zi.is_present(i) {
            if let Ok(mode) = row.argmax() {
                zi.data[i] = mode;
            }
        }
    }
}

/**
Harmonic-mean estimate of an observed likelihood from sampled probabilities.

For each (individual, class) cell the estimate is `-ln(mean(1 / p))` over the observed
probabilities `p`.

# Examples

```rust
use mixtcomp::stats::RankLikelihood;

let mut lik = RankLikelihood::new(1, 1);
for p in [0.3, 0.2, 0.8] {
    lik.observe(0, 0, p);
}
let expected = -((1.0 / 3.0) * (1.0 / 0.3 + 1.0 / 0.2 + 1.0 / 0.8f64)).ln();
assert!((lik.estimate(0, 0) - expected).abs() < 1e-12);
```
*/
#[derive(Debug, Clone)]
pub struct RankLikelihood {
    inv_sum: Array2<f64>,
    count: Array2<usize>,
}

impl RankLikelihood {
    pub fn new(nb_ind: usize, nb_class: usize) -> Self {
        Self {
            inv_sum: Array2::zeros((nb_ind, nb_class)),
            count: Array2::zeros((nb_ind, nb_class)),
        }
    }

    pub fn reset(&mut self) {
        self.inv_sum.fill(0.0);
        self.count.fill(0);
    }

    pub fn observe(&mut self, i: usize, k: usize, proba: f64) {
        self.inv_sum[[i, k]] += 1.0 / proba;
        self.count[[i, k]] += 1;
    }

    /// `-inf` when the cell holds no observation or only null probabilities.
    pub fn estimate(&self, i: usize, k: usize) -> f64 {
        let n = self.count[[i, k]];
        if n == 0 {
            return f64::NEG_INFINITY;
        }
        -(self.inv_sum[[i, k]] / n as f64).ln()
    }

    pub fn ln_likelihood(&self) -> Array2<f64> {
        Array2::from_shape_fn(self.inv_sum.dim(), |(i, k)| self.estimate(i, k))
    }
}
