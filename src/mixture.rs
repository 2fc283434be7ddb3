/*!
Capability contract of a per-variable model.

The composer owns every registered model and hands it read-only views of the latent state
([`ClassView`]) instead of letting the model reach back into the composer.
*/

use crate::data::MisType;
use crate::io::{DataExtractor, DataHandler, ParamExtractor, ParamSetter};
use ndarray::{ArrayView1, ArrayView2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Parameters are estimated by SEM then refined by Gibbs sampling.
    Learning,
    /// Parameters are imported and frozen, only the Gibbs sampler runs.
    Prediction,
}

/// Read-only view of the latent class state passed to the models.
#[derive(Debug, Clone, Copy)]
pub struct ClassView<'a> {
    pub nb_class: usize,
    /// Current class label of every individual.
    pub zi: &'a [usize],
    pub tik: ArrayView2<'a, f64>,
    pub prop: ArrayView1<'a, f64>,
    /// Individuals the partition is restricted to, every individual when `None`.
    pub subset: Option<&'a [usize]>,
}

impl<'a> ClassView<'a> {
    /// Individuals of each class.
    pub fn class_ind(&self) -> Vec<Vec<usize>> {
        let mut classes = vec![Vec::new(); self.nb_class];
        match self.subset {
            Some(subset) => {
                for &i in subset {
                    classes[self.zi[i]].push(i);
                }
            }
            None => {
                for (i, &k) in self.zi.iter().enumerate() {
                    classes[k].push(i);
                }
            }
        }
        classes
    }
}

/// A per-variable model plugged into the composer.
///
/// Soft failures (a degenerate class, an unsupported descriptor) are returned as warning
/// logs, never as panics.
pub trait Mixture: Send + Sync {
    fn id_name(&self) -> &str;

    fn model_type(&self) -> &'static str;

    /// Missing-value kinds the model knows how to integrate and complete.
    fn accepted_type(&self) -> Vec<MisType>;

    fn nb_free_parameter(&self) -> usize;

    /// Loads the data, checks it against the model, and in prediction loads the parameters.
    fn set_data_param(
        &mut self,
        mode: RunMode,
        handler: &dyn DataHandler,
        setter: Option<&dyn ParamSetter>,
    ) -> Result<(), String>;

    /// First completion of the missing values of `i`, before any parameter exists.
    fn init_data(&mut self, i: usize) -> Result<(), String>;

    fn mstep(&mut self, view: &ClassView) -> Result<(), String>;

    fn ln_completed_probability(&self, i: usize, k: usize) -> f64;

    /// Log-probability marginalized over what is unobserved for `i`. `0` when nothing is
    /// known, `-inf` when no value allowed by the descriptor has a positive density.
    fn ln_observed_probability(&self, i: usize, k: usize) -> f64;

    /// Whether [`ln_observed_probability`](Self::ln_observed_probability) can be `-inf`.
    fn possible_null_probability(&self) -> bool {
        false
    }

    /// Resamples the missing values of `i` given its class `k`.
    fn sampling_step(&mut self, i: usize, k: usize) -> Result<(), String>;

    /// Whether the partition keeps the estimator inside the open parameter support.
    fn check_sample_condition(&self, view: &ClassView) -> Result<(), String>;

    fn store_sem_run(&mut self, iteration: usize, iteration_max: usize);

    fn store_gibbs_run(&mut self, i: usize, iteration: usize, iteration_max: usize);

    fn export_data_param(&self, data_ex: &mut dyn DataExtractor, param_ex: &mut dyn ParamExtractor);

    /// Human-readable parameters, one line per class.
    fn write_parameters(&self) -> String;
}
