use super::{class_values, SimpleModel};
use crate::data::{AugmentedData, MisType, MisVal, Range};
use crate::distributions::{normal_ln_interval_proba, normal_ln_pdf, truncated_normal};
use crate::mixture::RunMode;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Normal};

/// Smallest standard deviation an m-step may produce.
const MIN_SD: f64 = 1e-8;

/// Gaussian with a mean and a standard deviation per class, stored as `[mu_0, sd_0, mu_1, ...]`.
#[derive(Debug, Clone)]
pub struct Gaussian {
    nb_class: usize,
    param: Vec<f64>,
}

impl Gaussian {
    fn mean(&self, k: usize) -> f64 {
        self.param[2 * k]
    }

    fn sd(&self, k: usize) -> f64 {
        self.param[2 * k + 1]
    }
}

impl SimpleModel for Gaussian {
    type Value = f64;

    const NAME: &'static str = "Gaussian_sjk";

    fn new(nb_class: usize) -> Self {
        Self {
            nb_class,
            param: vec![0.0; 2 * nb_class],
        }
    }

    fn accepted_type(&self) -> Vec<MisType> {
        vec![
            MisType::Present,
            MisType::Missing,
            MisType::MissingInterval,
            MisType::MissingLeftUnboundedInterval,
            MisType::MissingRightUnboundedInterval,
        ]
    }

    fn nb_free_parameters(&self) -> usize {
        2 * self.nb_class
    }

    fn param(&self) -> &[f64] {
        &self.param
    }

    fn param_mut(&mut self) -> &mut [f64] {
        &mut self.param
    }

    fn set_param(&mut self, param: Vec<f64>) -> Result<(), String> {
        if param.len() != 2 * self.nb_class {
            return Err(format!(
                "{} expects {} parameters, {} were provided.\n",
                Self::NAME,
                2 * self.nb_class,
                param.len()
            ));
        }
        self.param = param;
        Ok(())
    }

    fn param_names(&self) -> Vec<String> {
        (0..self.nb_class)
            .flat_map(|k| [format!("k: {}, mean", k + 1), format!("k: {}, sd", k + 1)])
            .collect()
    }

    fn set_data(
        &mut self,
        _id: &str,
        _param_str: &mut String,
        _aug: &mut AugmentedData<f64>,
        _mode: RunMode,
    ) -> Result<(), String> {
        Ok(())
    }

    fn mstep(&mut self, data: &[f64], class_ind: &[Vec<usize>]) -> Result<(), String> {
        let mut warn_log = String::new();
        for (k, ind) in class_ind.iter().enumerate() {
            let values = class_values(data, ind);
            if values.is_empty() {
                warn_log += &format!("Gaussian class {k} is empty.\n");
                continue;
            }
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
            let sd = var.sqrt();
            if sd < MIN_SD {
                warn_log += &format!(
                    "Gaussian variables must have a minimum standard deviation of {MIN_SD} in each class. It is not the case in class: {k}. If some values are repeated often in this variable, maybe a Multinomial or a Poisson model might be better.\n"
                );
                continue;
            }
            self.param[2 * k] = mean;
            self.param[2 * k + 1] = sd;
        }
        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    fn check_sample_condition(&self, data: &[f64], class_ind: &[Vec<usize>]) -> Result<(), String> {
        for (k, ind) in class_ind.iter().enumerate() {
            let mut values = class_values(data, ind).into_iter();
            let distinct = match values.next() {
                Some(first) => values.any(|v| v != first),
                None => false,
            };
            if !distinct {
                return Err(format!(
                    "Gaussian variables must have at least two different values in each class. This is not the case in class: {k}.\n"
                ));
            }
        }
        Ok(())
    }

    fn ln_completed_probability(&self, x: f64, k: usize) -> f64 {
        normal_ln_pdf(x, self.mean(k), self.sd(k))
    }

    fn ln_observed_probability(&self, x: f64, mis_val: &MisVal<f64>, _range: &Range<f64>, k: usize) -> f64 {
        let (mean, sd) = (self.mean(k), self.sd(k));
        match mis_val {
            MisVal::Present => normal_ln_pdf(x, mean, sd),
            MisVal::Missing => 0.0,
            MisVal::Interval(lo, hi) => normal_ln_interval_proba(*lo, *hi, mean, sd),
            MisVal::LeftUnbounded(hi) => normal_ln_interval_proba(f64::NEG_INFINITY, *hi, mean, sd),
            MisVal::RightUnbounded(lo) => normal_ln_interval_proba(*lo, f64::INFINITY, mean, sd),
            // rejected by accepted_type
            MisVal::FiniteValues(_) => f64::NEG_INFINITY,
        }
    }

    fn sample(
        &self,
        rng: &mut SmallRng,
        mis_val: &MisVal<f64>,
        _range: &Range<f64>,
        k: usize,
    ) -> Result<f64, String> {
        let (mean, sd) = (self.mean(k), self.sd(k));
        match mis_val {
            MisVal::Present => Err("an observed value cannot be resampled".to_string()),
            MisVal::Missing => {
                let normal = Normal::new(mean, sd).map_err(|e| e.to_string())?;
                Ok(normal.sample(rng))
            }
            MisVal::Interval(lo, hi) => Ok(truncated_normal(rng, mean, sd, *lo, *hi)),
            MisVal::LeftUnbounded(hi) => Ok(truncated_normal(rng, mean, sd, f64::NEG_INFINITY, *hi)),
            MisVal::RightUnbounded(lo) => Ok(truncated_normal(rng, mean, sd, *lo, f64::INFINITY)),
            MisVal::FiniteValues(_) => {
                Err("real data does not support missing values defined by a list of candidates".to_string())
            }
        }
    }

    fn write_parameters(&self) -> String {
        (0..self.nb_class)
            .map(|k| format!("Class: {k}\n\tmean: {}\n\tsd: {}\n", self.mean(k), self.sd(k)))
            .collect()
    }
}
