/*!
Reference variable models.

Each model only knows its parameters and its densities ([`SimpleModel`]). The generic
[`SimpleMixture`] wraps it with the augmented data, the statistics and the generator, and
implements the [`Mixture`] contract on its behalf.
*/

mod categorical;
mod gaussian;
mod poisson;

pub use categorical::Categorical;
pub use gaussian::Gaussian;
pub use poisson::Poisson;

use crate::data::{AugmentedData, DataValue, MisType, MisVal, Range};
use crate::io::{get_data, DataExtractor, DataHandler, ParamExtractor, ParamSetter};
use crate::mixture::{ClassView, Mixture, RunMode};
use crate::stats::{ConfIntDataStat, ConfIntParamStat, DataStat};
use rand::rngs::SmallRng;

/// Parameters and densities of one model family.
pub trait SimpleModel: Send + Sync + Sized {
    type Value: DataValue;

    const NAME: &'static str;

    /// Value of the first modality on the wire.
    const OFFSET: f64 = 0.0;

    fn new(nb_class: usize) -> Self;

    fn accepted_type(&self) -> Vec<MisType>;

    fn nb_free_parameters(&self) -> usize;

    fn param(&self) -> &[f64];

    fn param_mut(&mut self) -> &mut [f64];

    /// Replaces the parameters with imported ones.
    fn set_param(&mut self, param: Vec<f64>) -> Result<(), String>;

    fn param_names(&self) -> Vec<String>;

    /// Checks the data against the parameter space, possibly deducing it (and completing
    /// `param_str`) from the data.
    fn set_data(
        &mut self,
        id: &str,
        param_str: &mut String,
        aug: &mut AugmentedData<Self::Value>,
        mode: RunMode,
    ) -> Result<(), String>;

    fn mstep(&mut self, data: &[Self::Value], class_ind: &[Vec<usize>]) -> Result<(), String>;

    fn check_sample_condition(
        &self,
        data: &[Self::Value],
        class_ind: &[Vec<usize>],
    ) -> Result<(), String>;

    fn ln_completed_probability(&self, x: Self::Value, k: usize) -> f64;

    fn ln_observed_probability(
        &self,
        x: Self::Value,
        mis_val: &MisVal<Self::Value>,
        range: &Range<Self::Value>,
        k: usize,
    ) -> f64;

    /// Draws a value allowed by `mis_val` from the distribution of class `k`.
    fn sample(
        &self,
        rng: &mut SmallRng,
        mis_val: &MisVal<Self::Value>,
        range: &Range<Self::Value>,
        k: usize,
    ) -> Result<Self::Value, String>;

    fn possible_null_probability(&self) -> bool {
        false
    }

    /// Size of the parameter blocks that must sum to one, `0` when there are none.
    fn nb_modality(&self) -> usize {
        0
    }

    fn write_parameters(&self) -> String;
}

/// A [`SimpleModel`] plugged into the composer.
#[derive(Debug, Clone)]
pub struct SimpleMixture<M: SimpleModel> {
    id_name: String,
    nb_class: usize,
    confidence_level: f64,
    param_str: String,
    model: M,
    aug: AugmentedData<M::Value>,
    rng: SmallRng,
    data_stat: ConfIntDataStat<M::Value>,
    param_stat: ConfIntParamStat<f64>,
}

impl<M: SimpleModel> SimpleMixture<M> {
    pub fn new(id_name: &str, nb_class: usize, confidence_level: f64, rng: SmallRng) -> Self {
        Self {
            id_name: id_name.to_string(),
            nb_class,
            confidence_level,
            param_str: String::new(),
            model: M::new(nb_class),
            aug: AugmentedData::new(),
            rng,
            data_stat: ConfIntDataStat::new(0, confidence_level),
            param_stat: ConfIntParamStat::new(confidence_level),
        }
    }

    pub fn augmented_data(&self) -> &AugmentedData<M::Value> {
        &self.aug
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn param_str(&self) -> &str {
        &self.param_str
    }

    pub fn param_stat(&self) -> &ConfIntParamStat<f64> {
        &self.param_stat
    }
}

impl<M: SimpleModel> Mixture for SimpleMixture<M> {
    fn id_name(&self) -> &str {
        &self.id_name
    }

    fn model_type(&self) -> &'static str {
        M::NAME
    }

    fn accepted_type(&self) -> Vec<MisType> {
        self.model.accepted_type()
    }

    fn nb_free_parameter(&self) -> usize {
        self.model.nb_free_parameters()
    }

    fn set_data_param(
        &mut self,
        mode: RunMode,
        handler: &dyn DataHandler,
        setter: Option<&dyn ParamSetter>,
    ) -> Result<(), String> {
        self.param_str = get_data(handler, &self.id_name, &mut self.aug, M::OFFSET)?;
        let mut warn_log = String::new();

        let nb_ind = self.aug.len();
        if nb_ind != handler.nb_sample() {
            warn_log += &format!(
                "Variable {} has {} individuals while {} are expected.\n",
                self.id_name,
                nb_ind,
                handler.nb_sample()
            );
        }

        self.aug.compute_range();
        if let Err(log) = self.aug.check_missing_type(&self.model.accepted_type()) {
            warn_log += &format!(
                "Variable {} has a problem with the descriptions of missing values.\n{log}",
                self.id_name
            );
        }

        if mode == RunMode::Prediction {
            let param = setter
                .ok_or_else(|| format!("Variable {}: prediction requires parameters.\n", self.id_name))
                .and_then(|s| s.get_param(&self.id_name, "param"))
                .and_then(|p| self.model.set_param(p));
            match param {
                Ok(()) => self.param_stat.set_param_storage(self.model.param()),
                Err(e) => warn_log += &e,
            }
        }

        if let Err(e) = self
            .model
            .set_data(&self.id_name, &mut self.param_str, &mut self.aug, mode)
        {
            warn_log += &e;
        }
        self.data_stat = ConfIntDataStat::new(nb_ind, self.confidence_level);

        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    fn init_data(&mut self, i: usize) -> Result<(), String> {
        self.aug
            .remove_missing(i, &mut self.rng)
            .map_err(|e| format!("Variable {}, {e}\n", self.id_name))
    }

    fn mstep(&mut self, view: &ClassView) -> Result<(), String> {
        self.model
            .mstep(&self.aug.data, &view.class_ind())
            .map_err(|e| format!("Error in variable {}:\n{e}", self.id_name))
    }

    fn ln_completed_probability(&self, i: usize, k: usize) -> f64 {
        self.model.ln_completed_probability(self.aug.data[i], k)
    }

    fn ln_observed_probability(&self, i: usize, k: usize) -> f64 {
        self.model
            .ln_observed_probability(self.aug.data[i], &self.aug.mis_data[i], &self.aug.data_range, k)
    }

    fn possible_null_probability(&self) -> bool {
        self.model.possible_null_probability()
    }

    fn sampling_step(&mut self, i: usize, k: usize) -> Result<(), String> {
        if self.aug.is_present(i) {
            return Ok(());
        }
        let value = self
            .model
            .sample(&mut self.rng, &self.aug.mis_data[i], &self.aug.data_range, k)
            .map_err(|e| format!("Variable {}, individual {i}: {e}\n", self.id_name))?;
        self.aug.data[i] = value;
        Ok(())
    }

    fn check_sample_condition(&self, view: &ClassView) -> Result<(), String> {
        self.model
            .check_sample_condition(&self.aug.data, &view.class_ind())
            .map_err(|e| format!("checkSampleCondition, error in variable {}\n{e}", self.id_name))
    }

    fn store_sem_run(&mut self, iteration: usize, iteration_max: usize) {
        self.param_stat
            .sample_param(self.model.param(), iteration, iteration_max);
        if iteration == iteration_max {
            self.param_stat.normalize_param(self.model.nb_modality());
            self.param_stat.set_expectation_param(self.model.param_mut());
        }
    }

    fn store_gibbs_run(&mut self, i: usize, iteration: usize, iteration_max: usize) {
        self.data_stat
            .sample_vals(&self.aug, i, iteration, iteration_max);
        if iteration == iteration_max {
            self.data_stat.impute_data(&mut self.aug, i);
        }
    }

    fn export_data_param(&self, data_ex: &mut dyn DataExtractor, param_ex: &mut dyn ParamExtractor) {
        let shift = |v: M::Value| v.to_real() + M::OFFSET;
        let completed: Vec<f64> = self.aug.data.iter().map(|&v| shift(v)).collect();
        let stats: Vec<DataStat<f64>> = self
            .data_stat
            .stat_storage()
            .into_iter()
            .map(|s| DataStat {
                individual: s.individual,
                estimate: shift(s.estimate),
                lower: shift(s.lower),
                upper: shift(s.upper),
            })
            .collect();
        data_ex.export_vals(&self.id_name, &completed, &stats);

        param_ex.export_param(
            &self.id_name,
            "param",
            self.param_stat.stat_storage().view(),
            self.param_stat.log_storage().view(),
            &self.model.param_names(),
            self.confidence_level,
        );
    }

    fn write_parameters(&self) -> String {
        format!(
            "Variable {} ({}), {} classes\n{}",
            self.id_name,
            M::NAME,
            self.nb_class,
            self.model.write_parameters()
        )
    }
}

/// Builds a boxed model from its type name.
pub fn create_mixture(
    model: &str,
    id_name: &str,
    nb_class: usize,
    confidence_level: f64,
    rng: SmallRng,
) -> Result<Box<dyn Mixture>, String> {
    match model {
        "Gaussian_sjk" | "Gaussian" => Ok(Box::new(SimpleMixture::<Gaussian>::new(
            id_name,
            nb_class,
            confidence_level,
            rng,
        ))),
        "Poisson_k" | "Poisson" => Ok(Box::new(SimpleMixture::<Poisson>::new(
            id_name,
            nb_class,
            confidence_level,
            rng,
        ))),
        "Categorical_pjk" | "Multinomial" => Ok(Box::new(SimpleMixture::<Categorical>::new(
            id_name,
            nb_class,
            confidence_level,
            rng,
        ))),
        other => Err(format!(
            "Variable {id_name}: model {other} is unknown. Available models: Gaussian_sjk, Poisson_k, Categorical_pjk.\n"
        )),
    }
}

/// Individuals of class `k` with their values, helper of the m-steps.
pub(crate) fn class_values<T: Copy>(data: &[T], class_ind: &[usize]) -> Vec<T> {
    class_ind.iter().map(|&i| data[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryDataHandler, MemoryExtractor, MemoryParamSetter};
    use ndarray::{Array1, Array2};
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(3)
    }

    #[test]
    fn unknown_model() {
        let err = create_mixture("Weibull", "w", 2, 0.95, rng()).err().unwrap();
        assert!(err.contains("Weibull"));
    }

    #[test]
    fn unsupported_descriptor_is_reported() {
        let mut handler = MemoryDataHandler::new(3);
        handler.add_variable("c", "Categorical_pjk", &["1", "[1:2]", "2"]);
        let mut mixture = create_mixture("Categorical_pjk", "c", 2, 0.95, rng()).unwrap();
        let err = mixture
            .set_data_param(RunMode::Learning, &handler, None)
            .unwrap_err();
        assert!(err.contains("problem with the descriptions of missing values"));
        assert!(err.contains("defined by interval"));
    }

    #[test]
    fn wrong_length_is_reported() {
        let mut handler = MemoryDataHandler::new(3);
        handler.add_variable("x", "Gaussian_sjk", &["1.0", "2.0"]);
        let mut mixture = create_mixture("Gaussian_sjk", "x", 1, 0.95, rng()).unwrap();
        let err = mixture
            .set_data_param(RunMode::Learning, &handler, None)
            .unwrap_err();
        assert!(err.contains("2 individuals while 3 are expected"));
    }

    #[test]
    fn prediction_loads_parameters() {
        let mut handler = MemoryDataHandler::new(2);
        handler.add_variable("x", "Gaussian_sjk", &["0.5", "?"]);
        let mut setter = MemoryParamSetter::new();
        setter.set_param("x", "param", vec![0.0, 1.0, 10.0, 2.0]);
        let mut mixture = SimpleMixture::<Gaussian>::new("x", 2, 0.95, rng());
        mixture
            .set_data_param(RunMode::Prediction, &handler, Some(&setter))
            .unwrap();
        assert_eq!(mixture.model().param(), &[0.0, 1.0, 10.0, 2.0]);
        assert_eq!(mixture.param_stat().stat_storage().dim(), (4, 1));

        let mut ex = MemoryExtractor::new();
        let mut ex2 = MemoryExtractor::new();
        mixture.export_data_param(&mut ex, &mut ex2);
        assert_eq!(ex2.param("x", "param").unwrap().stat.column(0).to_vec(), vec![0.0, 1.0, 10.0, 2.0]);
    }

    #[test]
    fn prediction_without_parameters_fails() {
        let mut handler = MemoryDataHandler::new(1);
        handler.add_variable("x", "Gaussian_sjk", &["0.5"]);
        let mut mixture = SimpleMixture::<Gaussian>::new("x", 2, 0.95, rng());
        let err = mixture
            .set_data_param(RunMode::Prediction, &handler, None)
            .unwrap_err();
        assert!(err.contains("requires parameters"));
    }

    #[test]
    fn store_runs_and_export_shift_modalities() {
        let mut handler = MemoryDataHandler::new(4);
        handler.add_variable("c", "Categorical_pjk", &["1", "2", "2", "?"]);
        let mut mixture = SimpleMixture::<Categorical>::new("c", 1, 0.95, rng());
        mixture
            .set_data_param(RunMode::Learning, &handler, None)
            .unwrap();
        assert_eq!(mixture.param_str(), "nModality: 2");
        for i in 0..4 {
            mixture.init_data(i).unwrap();
        }

        let zi = vec![0usize; 4];
        let tik = Array2::from_elem((4, 1), 1.0);
        let prop = Array1::from_elem(1, 1.0);
        let view = ClassView {
            nb_class: 1,
            zi: &zi,
            tik: tik.view(),
            prop: prop.view(),
            subset: None,
        };
        mixture.mstep(&view).unwrap();
        mixture.store_sem_run(0, 0);
        let p = mixture.model().param();
        assert!((p[0] + p[1] - 1.0).abs() < 1e-12);

        for it in 0..=2 {
            mixture.sampling_step(3, 0).unwrap();
            mixture.store_gibbs_run(3, it, 2);
        }
        let mut data_ex = MemoryExtractor::new();
        let mut param_ex = MemoryExtractor::new();
        mixture.export_data_param(&mut data_ex, &mut param_ex);
        let vals = &data_ex.vals["c"];
        assert_eq!(&vals.completed[..3], &[1.0, 2.0, 2.0]);
        assert!(vals.completed[3] == 1.0 || vals.completed[3] == 2.0);
        assert_eq!(vals.stats.len(), 1);
        assert_eq!(vals.stats[0].individual, 3);
        let names = &param_ex.param("c", "param").unwrap().names;
        assert_eq!(names[1], "k: 1, modality: 2");
    }
}
