use super::SimpleModel;
use crate::data::{AugmentedData, MisType, MisVal, Range};
use crate::distributions::multinomial;
use crate::mixture::RunMode;
use rand::rngs::SmallRng;

/// Categorical with one probability vector per class, stored class by class.
#[derive(Debug, Clone)]
pub struct Categorical {
    nb_class: usize,
    nb_modality: usize,
    param: Vec<f64>,
}

impl Categorical {
    fn proba(&self, x: usize, k: usize) -> f64 {
        if x < self.nb_modality {
            self.param[k * self.nb_modality + x]
        } else {
            0.0
        }
    }

    fn parse_param_str(id: &str, param_str: &str) -> Result<usize, String> {
        param_str
            .trim()
            .strip_prefix("nModality:")
            .and_then(|n| n.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                format!(
                    "Variable: {id} parameter string is not in the correct format, which should be \"nModality: x\" with x the number of modalities in the variable.\n"
                )
            })
    }
}

impl SimpleModel for Categorical {
    type Value = usize;

    const NAME: &'static str = "Categorical_pjk";

    const OFFSET: f64 = 1.0;

    fn new(nb_class: usize) -> Self {
        Self {
            nb_class,
            nb_modality: 0,
            param: Vec::new(),
        }
    }

    fn accepted_type(&self) -> Vec<MisType> {
        vec![
            MisType::Present,
            MisType::Missing,
            MisType::MissingFiniteValues,
        ]
    }

    fn nb_free_parameters(&self) -> usize {
        self.nb_class * self.nb_modality.saturating_sub(1)
    }

    fn param(&self) -> &[f64] {
        &self.param
    }

    fn param_mut(&mut self) -> &mut [f64] {
        &mut self.param
    }

    fn set_param(&mut self, param: Vec<f64>) -> Result<(), String> {
        if param.is_empty() || param.len() % self.nb_class != 0 {
            return Err(format!(
                "{} expects a multiple of {} parameters, {} were provided.\n",
                Self::NAME,
                self.nb_class,
                param.len()
            ));
        }
        self.nb_modality = param.len() / self.nb_class;
        self.param = param;
        Ok(())
    }

    fn param_names(&self) -> Vec<String> {
        (0..self.nb_class)
            .flat_map(|k| {
                (0..self.nb_modality).map(move |p| format!("k: {}, modality: {}", k + 1, p + 1))
            })
            .collect()
    }

    fn set_data(
        &mut self,
        id: &str,
        param_str: &mut String,
        aug: &mut AugmentedData<usize>,
        mode: RunMode,
    ) -> Result<(), String> {
        let mut warn_log = String::new();

        if mode == RunMode::Prediction && self.nb_modality > 0 {
            *param_str = format!("nModality: {}", self.nb_modality);
        }

        if param_str.trim().is_empty() {
            // deduced from the data, and kept for a later prediction
            self.nb_modality = aug.data_range.max + 1;
            *param_str = format!("nModality: {}", self.nb_modality);
        } else {
            match Self::parse_param_str(id, param_str) {
                Ok(n) => self.nb_modality = n,
                Err(e) => warn_log += &e,
            }
            if aug.data_range.has_range && self.nb_modality <= aug.data_range.max {
                warn_log += &format!(
                    "Variable: {id} requires a maximum value of : {} in either provided values or bounds. The maximum currently provided value is : {}\n",
                    self.nb_modality,
                    aug.data_range.max + 1
                );
            }
        }

        if self.param.len() != self.nb_class * self.nb_modality {
            self.param = vec![0.0; self.nb_class * self.nb_modality];
        }
        if self.nb_modality > 0 {
            aug.set_range(0, self.nb_modality - 1, true);
        }

        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    fn mstep(&mut self, data: &[usize], class_ind: &[Vec<usize>]) -> Result<(), String> {
        let mut warn_log = String::new();
        let m = self.nb_modality;
        for (k, ind) in class_ind.iter().enumerate() {
            if ind.is_empty() {
                warn_log += &format!("Categorical class {k} is empty.\n");
                continue;
            }
            let block = &mut self.param[k * m..(k + 1) * m];
            block.fill(0.0);
            for &i in ind {
                block[data[i]] += 1.0;
            }
            let n = ind.len() as f64;
            block.iter_mut().for_each(|p| *p /= n);
        }
        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    fn check_sample_condition(&self, data: &[usize], class_ind: &[Vec<usize>]) -> Result<(), String> {
        for (k, ind) in class_ind.iter().enumerate() {
            let mut present = vec![false; self.nb_modality];
            for &i in ind {
                if let Some(p) = present.get_mut(data[i]) {
                    *p = true;
                }
            }
            let warn_log: String = present
                .iter()
                .enumerate()
                .filter(|(_, seen)| !**seen)
                .map(|(p, _)| {
                    format!(
                        "Categorical variables must have one individual with each modality present in each class. Modality: {} is absent from class: {k}. You can check whether you have enough individuals regarding the number of classes and whether all of your modalities are encoded using contiguous integers starting at 1.\n",
                        p + 1
                    )
                })
                .collect();
            if !warn_log.is_empty() {
                return Err(warn_log);
            }
        }
        Ok(())
    }

    fn ln_completed_probability(&self, x: usize, k: usize) -> f64 {
        self.proba(x, k).ln()
    }

    fn ln_observed_probability(&self, x: usize, mis_val: &MisVal<usize>, _range: &Range<usize>, k: usize) -> f64 {
        match mis_val {
            MisVal::Present => self.proba(x, k).ln(),
            MisVal::Missing => 0.0,
            MisVal::FiniteValues(values) => values.iter().map(|&v| self.proba(v, k)).sum::<f64>().ln(),
            // rejected by accepted_type
            _ => f64::NEG_INFINITY,
        }
    }

    fn possible_null_probability(&self) -> bool {
        true
    }

    fn sample(
        &self,
        rng: &mut SmallRng,
        mis_val: &MisVal<usize>,
        _range: &Range<usize>,
        k: usize,
    ) -> Result<usize, String> {
        let m = self.nb_modality;
        let weights: Vec<f64> = match mis_val {
            MisVal::Missing => self.param[k * m..(k + 1) * m].to_vec(),
            MisVal::FiniteValues(values) => {
                let mut w = vec![0.0; m];
                for &v in values.iter().filter(|&&v| v < m) {
                    w[v] = self.proba(v, k);
                }
                w
            }
            _ => return Err("categorical data only supports missing values and lists of candidates".to_string()),
        };
        multinomial(rng, &weights)
            .ok_or_else(|| format!("no admissible modality has a positive probability in class {k}"))
    }

    fn nb_modality(&self) -> usize {
        self.nb_modality
    }

    fn write_parameters(&self) -> String {
        let mut out = String::new();
        for k in 0..self.nb_class {
            out += &format!("Class: {k}\n");
            for p in 0..self.nb_modality {
                out += &format!("\talpha_ {p}: {}\n", self.proba(p, k));
            }
        }
        out
    }
}
