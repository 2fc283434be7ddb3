use super::{class_values, SimpleModel};
use crate::data::{AugmentedData, MisType, MisVal, Range};
use crate::distributions::{ln1m_exp, multinomial};
use crate::mixture::RunMode;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Poisson as PoissonSampler};
use statrs::distribution::{Discrete, DiscreteCDF, Poisson as PoissonDistribution};

/// Upper bound on the support walked on each side when a tail is summed or sampled term by
/// term.
const MAX_TAIL_STEPS: usize = 100_000;

/// `None` for a null rate, whose distribution is the point mass at 0.
fn distribution(lambda: f64) -> Option<PoissonDistribution> {
    PoissonDistribution::new(lambda).ok()
}

fn ln_pmf(x: i64, lambda: f64) -> f64 {
    if x < 0 {
        return f64::NEG_INFINITY;
    }
    match distribution(lambda) {
        Some(d) => d.ln_pmf(x as u64),
        None if x == 0 => 0.0,
        None => f64::NEG_INFINITY,
    }
}

/// Log of the mass from `start` onwards (`upward`) or down to 0, summed term by term from
/// the ratios of consecutive probabilities. Only used far from the mode, where the terms
/// decrease geometrically.
fn ln_tail_walk(start: i64, lambda: f64, upward: bool) -> f64 {
    let mut v = start;
    let mut term = 1.0;
    let mut sum = 1.0;
    for _ in 0..MAX_TAIL_STEPS {
        if upward {
            term *= lambda / (v + 1) as f64;
            v += 1;
        } else {
            if v == 0 {
                break;
            }
            term *= v as f64 / lambda;
            v -= 1;
        }
        sum += term;
        if term <= f64::EPSILON * sum {
            break;
        }
    }
    ln_pmf(start, lambda) + sum.ln()
}

/// `ln P(X <= x)`.
fn ln_cdf(x: i64, lambda: f64) -> f64 {
    if x < 0 {
        return f64::NEG_INFINITY;
    }
    let Some(d) = distribution(lambda) else {
        return 0.0;
    };
    let p = d.cdf(x as u64);
    if p >= f64::MIN_POSITIVE {
        p.ln()
    } else {
        ln_tail_walk(x, lambda, false)
    }
}

/// `ln P(X >= x)`, from the survival function so that right tails do not cancel.
fn ln_sf_from(x: i64, lambda: f64) -> f64 {
    if x <= 0 {
        return 0.0;
    }
    let Some(d) = distribution(lambda) else {
        return f64::NEG_INFINITY;
    };
    let p = d.sf((x - 1) as u64);
    if p >= f64::MIN_POSITIVE {
        p.ln()
    } else {
        ln_tail_walk(x, lambda, true)
    }
}

/// `ln P(lo <= X <= hi)`. Intervals above the rate are differences of survival functions,
/// intervals below it differences of cumulative ones.
fn ln_interval(lo: i64, hi: i64, lambda: f64) -> f64 {
    let lo = lo.max(0);
    if hi < lo {
        return f64::NEG_INFINITY;
    }
    if lo as f64 > lambda {
        let ln_lo = ln_sf_from(lo, lambda);
        if ln_lo == f64::NEG_INFINITY {
            return ln_lo;
        }
        ln_lo + ln1m_exp(ln_sf_from(hi.saturating_add(1), lambda) - ln_lo)
    } else if (hi as f64) < lambda {
        let ln_hi = ln_cdf(hi, lambda);
        ln_hi + ln1m_exp(ln_cdf(lo - 1, lambda) - ln_hi)
    } else {
        match distribution(lambda) {
            Some(d) if lo == 0 => d.cdf(hi as u64).ln(),
            Some(d) => (d.cdf(hi as u64) - d.cdf((lo - 1) as u64)).ln(),
            None => 0.0,
        }
    }
}

/// Poisson with one rate per class.
#[derive(Debug, Clone)]
pub struct Poisson {
    nb_class: usize,
    param: Vec<f64>,
}

impl Poisson {
    /**
    Draw restricted to `[lo, hi]` (`hi = None` for an unbounded tail).

    The probabilities relative to the most likely admissible value are walked outwards on
    both sides until they become negligible, then one of them is drawn. The cost depends
    on the spread of the distribution inside the bounds, not on their width.
    */
    fn sample_bounded(&self, rng: &mut SmallRng, lo: i64, hi: Option<i64>, k: usize) -> i64 {
        let lambda = self.param[k];
        let lo = lo.max(0);
        let hi = hi.unwrap_or(i64::MAX);
        if lambda <= 0.0 || hi <= lo {
            return lo;
        }
        let mode = (lambda.floor() as i64).clamp(lo, hi);

        let mut below = Vec::new();
        let (mut term, mut v) = (1.0, mode);
        while v > lo && below.len() < MAX_TAIL_STEPS && term > f64::EPSILON {
            term *= v as f64 / lambda;
            v -= 1;
            below.push(term);
        }
        let mut above = Vec::new();
        let (mut term, mut v) = (1.0, mode);
        while v < hi && above.len() < MAX_TAIL_STEPS && term > f64::EPSILON {
            term *= lambda / (v + 1) as f64;
            v += 1;
            above.push(term);
        }

        let weights: Vec<f64> = below
            .iter()
            .rev()
            .copied()
            .chain(std::iter::once(1.0))
            .chain(above.iter().copied())
            .collect();
        let j = multinomial(rng, &weights).unwrap_or(below.len());
        mode - below.len() as i64 + j as i64
    }
}

impl SimpleModel for Poisson {
    type Value = i64;

    const NAME: &'static str = "Poisson_k";

    fn new(nb_class: usize) -> Self {
        Self {
            nb_class,
            param: vec![0.0; nb_class],
        }
    }

    fn accepted_type(&self) -> Vec<MisType> {
        MisType::ALL.to_vec()
    }

    fn nb_free_parameters(&self) -> usize {
        self.nb_class
    }

    fn param(&self) -> &[f64] {
        &self.param
    }

    fn param_mut(&mut self) -> &mut [f64] {
        &mut self.param
    }

    fn set_param(&mut self, param: Vec<f64>) -> Result<(), String> {
        if param.len() != self.nb_class {
            return Err(format!(
                "{} expects {} parameters, {} were provided.\n",
                Self::NAME,
                self.nb_class,
                param.len()
            ));
        }
        self.param = param;
        Ok(())
    }

    fn param_names(&self) -> Vec<String> {
        (0..self.nb_class)
            .map(|k| format!("k: {}, lambda", k + 1))
            .collect()
    }

    fn set_data(
        &mut self,
        id: &str,
        _param_str: &mut String,
        aug: &mut AugmentedData<i64>,
        _mode: RunMode,
    ) -> Result<(), String> {
        if aug.data_range.has_range && aug.data_range.min < 0 {
            return Err(format!(
                "Variable: {id} requires a minimum value of 0 in either provided values or bounds. The minimum value currently provided is : {}\n",
                aug.data_range.min
            ));
        }
        Ok(())
    }

    fn mstep(&mut self, data: &[i64], class_ind: &[Vec<usize>]) -> Result<(), String> {
        let mut warn_log = String::new();
        for (k, ind) in class_ind.iter().enumerate() {
            let values = class_values(data, ind);
            let sum: i64 = values.iter().sum();
            if sum == 0 {
                warn_log += &format!(
                    "Poisson variables must have at least one non-null individual per class. This is not the case for at least class: {k}.\n"
                );
                continue;
            }
            self.param[k] = sum as f64 / values.len() as f64;
        }
        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    fn check_sample_condition(&self, data: &[i64], class_ind: &[Vec<usize>]) -> Result<(), String> {
        for (k, ind) in class_ind.iter().enumerate() {
            if ind.iter().all(|&i| data[i] == 0) {
                return Err(format!(
                    "Poisson variables must have at least one non-null individual per class. This is not the case for at least class: {k}.\n"
                ));
            }
        }
        Ok(())
    }

    fn ln_completed_probability(&self, x: i64, k: usize) -> f64 {
        ln_pmf(x, self.param[k])
    }

    fn ln_observed_probability(&self, x: i64, mis_val: &MisVal<i64>, _range: &Range<i64>, k: usize) -> f64 {
        let lambda = self.param[k];
        match mis_val {
            MisVal::Present => ln_pmf(x, lambda),
            MisVal::Missing => 0.0,
            MisVal::FiniteValues(values) => {
                let ln_p: Vec<f64> = values.iter().map(|&v| ln_pmf(v, lambda)).collect();
                let max = ln_p.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                if max == f64::NEG_INFINITY {
                    return max;
                }
                max + ln_p.iter().map(|l| (l - max).exp()).sum::<f64>().ln()
            }
            MisVal::Interval(lo, hi) => ln_interval(*lo, *hi, lambda),
            MisVal::LeftUnbounded(hi) => ln_cdf(*hi, lambda),
            MisVal::RightUnbounded(lo) => ln_sf_from(*lo, lambda),
        }
    }

    fn sample(
        &self,
        rng: &mut SmallRng,
        mis_val: &MisVal<i64>,
        _range: &Range<i64>,
        k: usize,
    ) -> Result<i64, String> {
        let lambda = self.param[k];
        match mis_val {
            MisVal::Present => Err("an observed value cannot be resampled".to_string()),
            MisVal::Missing => {
                if lambda <= 0.0 {
                    return Ok(0);
                }
                let poisson = PoissonSampler::new(lambda).map_err(|e| e.to_string())?;
                let draw: f64 = poisson.sample(rng);
                Ok(draw as i64)
            }
            MisVal::FiniteValues(values) => {
                let ln_p: Vec<f64> = values.iter().map(|&v| ln_pmf(v, lambda)).collect();
                let max = ln_p.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let weights: Vec<f64> = ln_p.iter().map(|l| (l - max).exp()).collect();
                multinomial(rng, &weights)
                    .map(|j| values[j])
                    .ok_or_else(|| format!("no candidate value has a positive probability in class {k}"))
            }
            MisVal::Interval(lo, hi) => Ok(self.sample_bounded(rng, *lo, Some(*hi), k)),
            MisVal::LeftUnbounded(hi) => Ok(self.sample_bounded(rng, 0, Some(*hi), k)),
            MisVal::RightUnbounded(lo) => Ok(self.sample_bounded(rng, *lo, None, k)),
        }
    }

    fn write_parameters(&self) -> String {
        self.param
            .iter()
            .enumerate()
            .map(|(k, lambda)| format!("Class: {k}\n\tlambda: {lambda}\n"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    #[test]
    fn pmf_values() {
        assert_abs_diff_eq!(ln_pmf(2, 3.0).exp(), 9.0 / 2.0 * (-3.0f64).exp(), epsilon = 1e-12);
        assert_eq!(ln_pmf(-1, 3.0), f64::NEG_INFINITY);
        assert_eq!(ln_pmf(0, 0.0), 0.0);
    }

    #[test]
    fn all_zero_class_is_degenerate() {
        let mut p = Poisson::new(2);
        let data = [0, 0, 3, 5];
        let classes = [vec![0, 1], vec![2, 3]];
        assert!(p.check_sample_condition(&data, &classes).is_err());
        assert!(p.mstep(&data, &classes).is_err());
        assert_eq!(p.param()[1], 4.0);
    }

    #[test]
    fn observed_tails_sum_to_one() {
        let mut p = Poisson::new(1);
        p.set_param(vec![4.0]).unwrap();
        let range = Range::default();
        let left = p.ln_observed_probability(0, &MisVal::LeftUnbounded(3), &range, 0).exp();
        let right = p.ln_observed_probability(0, &MisVal::RightUnbounded(4), &range, 0).exp();
        assert_abs_diff_eq!(left + right, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn far_right_tails_stay_finite() {
        let mut p = Poisson::new(1);
        p.set_param(vec![3.0]).unwrap();
        let range = Range::default();
        let ln_obs = |mis_val: MisVal<i64>| p.ln_observed_probability(0, &mis_val, &range, 0);
        assert_abs_diff_eq!(ln_obs(MisVal::RightUnbounded(30)), -44.59843887301149, epsilon = 1e-8);
        assert_abs_diff_eq!(ln_obs(MisVal::RightUnbounded(40)), -69.30030952939163, epsilon = 1e-8);
        assert_abs_diff_eq!(ln_obs(MisVal::Interval(30, 35)), -44.59843938403073, epsilon = 1e-8);
        assert_abs_diff_eq!(ln_obs(MisVal::FiniteValues(vec![40, 41])), -69.30553060081903, epsilon = 1e-8);

        let huge = 10_000_000_000;
        let tail = ln_obs(MisVal::RightUnbounded(huge));
        assert!(tail.is_finite());
        assert_abs_diff_eq!(tail, ln_pmf(huge, 3.0), epsilon = 1e-3);
        assert_eq!(ln_obs(MisVal::RightUnbounded(0)), 0.0);
    }

    #[test]
    fn far_left_tails_stay_finite() {
        let mut p = Poisson::new(1);
        p.set_param(vec![1000.0]).unwrap();
        let range = Range::default();
        let left = p.ln_observed_probability(0, &MisVal::LeftUnbounded(10), &range, 0);
        assert_abs_diff_eq!(left, -946.0168196296328, epsilon = 1e-8);
        let zero = p.ln_observed_probability(0, &MisVal::LeftUnbounded(0), &range, 0);
        assert_abs_diff_eq!(zero, -1000.0, epsilon = 1e-9);
        let body = p.ln_observed_probability(0, &MisVal::Interval(0, 2000), &range, 0);
        assert_abs_diff_eq!(body, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn null_rate_is_a_point_mass() {
        let p = Poisson::new(1);
        let range = Range::default();
        assert_eq!(p.ln_observed_probability(0, &MisVal::LeftUnbounded(3), &range, 0), 0.0);
        assert_eq!(
            p.ln_observed_probability(0, &MisVal::RightUnbounded(1), &range, 0),
            f64::NEG_INFINITY
        );
        assert_eq!(p.ln_observed_probability(0, &MisVal::Interval(0, 4), &range, 0), 0.0);
        assert_eq!(
            p.ln_observed_probability(0, &MisVal::Interval(2, 4), &range, 0),
            f64::NEG_INFINITY
        );
    }

    #[test]
    fn far_tail_samples() {
        let mut p = Poisson::new(1);
        p.set_param(vec![3.0]).unwrap();
        let range = Range::default();
        let mut rng = SmallRng::seed_from_u64(12);
        let huge = 10_000_000_000;
        for _ in 0..50 {
            let x = p.sample(&mut rng, &MisVal::RightUnbounded(huge), &range, 0).unwrap();
            assert!((huge..=huge + 2).contains(&x));
            let y = p.sample(&mut rng, &MisVal::Interval(0, huge), &range, 0).unwrap();
            assert!((0..60).contains(&y));
        }
        let n = 20_000;
        let mean = (0..n)
            .map(|_| p.sample(&mut rng, &MisVal::RightUnbounded(0), &range, 0).unwrap() as f64)
            .sum::<f64>()
            / n as f64;
        assert_abs_diff_eq!(mean, 3.0, epsilon = 0.05);
    }

    #[test]
    fn bounded_samples() {
        let mut p = Poisson::new(1);
        p.set_param(vec![2.0]).unwrap();
        let range = Range::default();
        let mut rng = SmallRng::seed_from_u64(8);
        for _ in 0..200 {
            let x = p.sample(&mut rng, &MisVal::Interval(3, 6), &range, 0).unwrap();
            assert!((3..=6).contains(&x));
            let y = p.sample(&mut rng, &MisVal::RightUnbounded(5), &range, 0).unwrap();
            assert!(y >= 5);
        }
    }

    #[test]
    fn negative_values_are_rejected() {
        let mut aug = AugmentedData::<i64>::new();
        aug.resize_arrays(1);
        aug.set_present(0, -2);
        aug.compute_range();
        let mut p = Poisson::new(1);
        let mut param_str = String::new();
        assert!(p
            .set_data("n", &mut param_str, &mut aug, RunMode::Learning)
            .is_err());
    }
}
