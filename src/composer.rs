/*!
Orchestration of the registered variable models around the shared latent class.

The composer owns the proportions, the responsibilities `tik`, the class labels `zi` and
every [`Mixture`]. It exposes the E, S, M and sampling steps; sequencing them is the job of
the strategies in [`crate::strategy`].

# Examples

```rust
use mixtcomp::composer::MixtureComposer;
use mixtcomp::io::MemoryDataHandler;
use mixtcomp::mixture::RunMode;
use mixtcomp::rng::RngContext;

let mut handler = MemoryDataHandler::new(4);
handler.add_variable("x", "Gaussian_sjk", &["0.1", "0.3", "5.2", "?"]);

let mut ctx = RngContext::deterministic(0);
let mut composer = MixtureComposer::new(2, 0.95, &mut ctx).unwrap();
composer.register_from_handler(&handler, &mut ctx).unwrap();
composer.set_data_param(RunMode::Learning, &handler, None).unwrap();
composer.init_data().unwrap();
assert_eq!(composer.nb_free_parameters(), 1 + 4);
```
*/

use crate::data::{AugmentedData, MisType};
use crate::error::{MixtError, UnrepresentableIndividual};
use crate::io::{get_data, DataExtractor, DataHandler, ParamExtractor, ParamSetter};
use crate::mixture::{ClassView, Mixture, RunMode};
use crate::models::create_mixture;
use crate::rng::RngContext;
use crate::sampler::ClassSampler;
use crate::stats::{log_to_multi, ClassDataStat, ConfIntParamStat};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use ndarray::prelude::*;
use ndarray_stats::QuantileExt;
use rayon::prelude::*;

/// Identifier of the latent class variable, on the wire and in the exports.
pub const CLASS_ID: &str = "z_class";

/// Name of the proportions in the parameter exports.
pub const PROP_NAME: &str = "pi";

/// Phase of a SEM run, burn-in iterations only feed the likelihood trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemPhase {
    BurnIn,
    Run,
}

/// Checks that no class is empty and that every model accepts the partition.
fn check_partition(mixtures: &[Box<dyn Mixture>], view: &ClassView) -> Result<(), String> {
    if view.class_ind().iter().any(|ind| ind.is_empty()) {
        return Err(
            "at least one class is empty, maybe there are more classes than individuals or the data is too sparse.\n"
                .to_string(),
        );
    }
    let warn_log: String = mixtures
        .iter()
        .filter_map(|m| m.check_sample_condition(view).err())
        .collect();
    if warn_log.is_empty() {
        Ok(())
    } else {
        Err(warn_log)
    }
}

pub struct MixtureComposer {
    nb_class: usize,
    nb_ind: usize,
    confidence_level: f64,
    mode: RunMode,

    prop: Array1<f64>,
    /// individual × class
    tik: Array2<f64>,
    zi: AugmentedData<usize>,

    mixtures: Vec<Box<dyn Mixture>>,
    sampler: ClassSampler,

    param_stat: ConfIntParamStat<f64>,
    data_stat: ClassDataStat,

    /// Log of the normalizing sum of each individual at the last E-step.
    completed_probability_cache: Array1<f64>,
    completed_probability_log_burn_in: Vec<f64>,
    completed_probability_log_run: Vec<f64>,

    last_partition: Option<Vec<usize>>,
    nb_consecutive_stable: usize,
}

impl MixtureComposer {
    /// The composer draws its class sampler generator from `ctx`, before any model is
    /// registered.
    pub fn new(nb_class: usize, confidence_level: f64, ctx: &mut RngContext) -> Result<Self, MixtError> {
        if nb_class == 0 {
            return Err(MixtError::InvalidConfig(
                "the number of classes must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&confidence_level) {
            return Err(MixtError::InvalidConfig(format!(
                "the confidence level must lie in [0, 1], {confidence_level} was provided"
            )));
        }
        Ok(Self {
            nb_class,
            nb_ind: 0,
            confidence_level,
            mode: RunMode::Learning,
            prop: Array1::from_elem(nb_class, 1.0 / nb_class as f64),
            tik: Array2::zeros((0, nb_class)),
            zi: AugmentedData::new(),
            mixtures: Vec::new(),
            sampler: ClassSampler::new(nb_class, ctx.next_rng()),
            param_stat: ConfIntParamStat::new(confidence_level),
            data_stat: ClassDataStat::new(0, nb_class),
            completed_probability_cache: Array1::zeros(0),
            completed_probability_log_burn_in: Vec::new(),
            completed_probability_log_run: Vec::new(),
            last_partition: None,
            nb_consecutive_stable: 0,
        })
    }

    pub fn register_mixture(&mut self, mixture: Box<dyn Mixture>) {
        debug!("registering {} ({})", mixture.id_name(), mixture.model_type());
        self.mixtures.push(mixture);
    }

    /// Registers one model per variable declared by the handler, in declaration order.
    pub fn register_from_handler(&mut self, handler: &dyn DataHandler, ctx: &mut RngContext) -> Result<(), String> {
        let mut warn_log = String::new();
        for (id, model) in handler.variables() {
            if id == CLASS_ID {
                continue;
            }
            match create_mixture(&model, &id, self.nb_class, self.confidence_level, ctx.next_rng()) {
                Ok(mixture) => self.register_mixture(mixture),
                Err(e) => warn_log += &e,
            }
        }
        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    /**
    Loads the class labels and the data of every model.

    The labels come from the optional `z_class` variable (supervised or semi-supervised
    runs), otherwise they are all missing. In prediction the proportions are read from the
    setter. Every problem found is reported at once and the run must not start.
    */
    pub fn set_data_param(
        &mut self,
        mode: RunMode,
        handler: &dyn DataHandler,
        setter: Option<&dyn ParamSetter>,
    ) -> Result<(), MixtError> {
        let mut warn_log = String::new();
        self.mode = mode;
        self.nb_ind = handler.nb_sample();

        if self.nb_ind == 0 {
            warn_log += "the data set contains no individual.\n";
        }
        if self.mixtures.is_empty() {
            warn_log += "no variable has been registered.\n";
        }

        if handler.raw_data(CLASS_ID).is_some() {
            if let Err(e) = get_data(handler, CLASS_ID, &mut self.zi, 1.0) {
                warn_log += &e;
            }
            if self.zi.len() != self.nb_ind {
                warn_log += &format!(
                    "{CLASS_ID} has {} individuals while {} are expected.\n",
                    self.zi.len(),
                    self.nb_ind
                );
                self.zi.set_all_missing(self.nb_ind);
            }
            self.zi.compute_range();
            if self.zi.data_range.has_range && self.nb_class <= self.zi.data_range.max {
                warn_log += &format!(
                    "{CLASS_ID} contains the class {} while only {} classes are estimated.\n",
                    self.zi.data_range.max + 1,
                    self.nb_class
                );
            }
            if let Err(e) = self.zi.check_missing_type(&[
                MisType::Present,
                MisType::Missing,
                MisType::MissingFiniteValues,
            ]) {
                warn_log += &format!("{CLASS_ID} has a problem with the descriptions of missing values.\n{e}");
            }
        } else {
            self.zi.set_all_missing(self.nb_ind);
        }
        self.zi.set_range(0, self.nb_class - 1, true);

        self.tik = Array2::from_elem((self.nb_ind, self.nb_class), 1.0 / self.nb_class as f64);
        self.completed_probability_cache = Array1::zeros(self.nb_ind);
        self.data_stat = ClassDataStat::new(self.nb_ind, self.nb_class);

        if mode == RunMode::Prediction {
            let prop = setter
                .ok_or_else(|| "prediction requires the proportions of a previous run.\n".to_string())
                .and_then(|s| s.get_param(CLASS_ID, PROP_NAME));
            match prop {
                Ok(prop) if prop.len() == self.nb_class => {
                    self.param_stat.set_param_storage(&prop);
                    self.prop = Array1::from(prop);
                }
                Ok(prop) => {
                    warn_log += &format!(
                        "{} proportions were provided for {} classes.\n",
                        prop.len(),
                        self.nb_class
                    )
                }
                Err(e) => warn_log += &e,
            }
        }

        for mixture in self.mixtures.iter_mut() {
            if let Err(e) = mixture.set_data_param(mode, handler, setter) {
                warn_log += &e;
            }
        }

        if warn_log.is_empty() {
            info!(
                "{} individuals, {} variables, {} classes loaded",
                self.nb_ind,
                self.mixtures.len(),
                self.nb_class
            );
            Ok(())
        } else {
            Err(MixtError::DataValidation(warn_log))
        }
    }

    pub fn nb_class(&self) -> usize {
        self.nb_class
    }

    pub fn nb_ind(&self) -> usize {
        self.nb_ind
    }

    pub fn nb_var(&self) -> usize {
        self.mixtures.len()
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn prop(&self) -> ArrayView1<f64> {
        self.prop.view()
    }

    pub fn tik(&self) -> ArrayView2<f64> {
        self.tik.view()
    }

    pub fn zi(&self) -> &AugmentedData<usize> {
        &self.zi
    }

    pub fn mixtures(&self) -> &[Box<dyn Mixture>] {
        &self.mixtures
    }

    pub fn completed_probability_log_burn_in(&self) -> &[f64] {
        &self.completed_probability_log_burn_in
    }

    pub fn completed_probability_log_run(&self) -> &[f64] {
        &self.completed_probability_log_run
    }

    pub fn view(&self) -> ClassView<'_> {
        ClassView {
            nb_class: self.nb_class,
            zi: &self.zi.data,
            tik: self.tik.view(),
            prop: self.prop.view(),
            subset: None,
        }
    }

    /// Uniform responsibilities, a first partition, and a first completion of the missing
    /// values that does not use any parameter.
    pub fn init_data(&mut self) -> Result<(), String> {
        self.tik.fill(1.0 / self.nb_class as f64);
        self.s_step()?;

        let mut warn_log = String::new();
        for mixture in self.mixtures.iter_mut() {
            for i in 0..self.nb_ind {
                if let Err(e) = mixture.init_data(i) {
                    warn_log += &e;
                }
            }
        }
        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    pub fn init_param(&mut self) {
        self.prop.fill(1.0 / self.nb_class as f64);
    }

    /**
    Seeds the model parameters from a random subset of at most `nb_init_per_class` times
    the number of classes individuals, taken with their current labels.

    The restricted partition must pass the sample condition before the models estimate
    their parameters on it.
    */
    pub fn init_param_sub_partition(&mut self, nb_init_per_class: usize) -> Result<(), String> {
        let nb_subset = (nb_init_per_class * self.nb_class).min(self.nb_ind);
        let mut subset: Vec<usize> = (0..self.nb_ind).collect();
        self.sampler.shuffle(&mut subset);
        subset.truncate(nb_subset);
        subset.sort_unstable();
        debug!("{nb_subset} individuals used in parameter initialization");

        let view = ClassView {
            subset: Some(&subset),
            ..self.view()
        };
        check_partition(&self.mixtures, &view)?;
        self.m_step_on(Some(&subset))
    }

    /**
    Draws the latent state from the current parameters: responsibilities from the observed
    probabilities, a partition drawn from them, then the missing values given the partition.

    With `check`, the partition must also pass the sample condition.
    */
    pub fn initialize_latent(&mut self, check: bool) -> Result<(), MixtError> {
        self.e_step_observed()?;
        self.s_step().map_err(MixtError::Degeneracy)?;
        self.sampling_step_all().map_err(MixtError::Degeneracy)?;
        if check {
            self.check_sample_condition()
                .map_err(|log| MixtError::SampleCondition { attempts: 1, log })?;
        }
        Ok(())
    }

    fn ln_completed_row(&self, i: usize) -> Array1<f64> {
        Array1::from_shape_fn(self.nb_class, |k| {
            self.prop[k].ln()
                + self
                    .mixtures
                    .iter()
                    .map(|m| m.ln_completed_probability(i, k))
                    .sum::<f64>()
        })
    }

    fn ln_observed_row(&self, i: usize) -> Array1<f64> {
        Array1::from_shape_fn(self.nb_class, |k| self.prop[k].ln() + self.ln_observed_probability(i, k))
    }

    /// Sum over the variables of the observed log-probability of `i` in class `k`.
    pub fn ln_observed_probability(&self, i: usize, k: usize) -> f64 {
        self.mixtures
            .iter()
            .map(|m| m.ln_observed_probability(i, k))
            .sum()
    }

    fn normalize_tik_row(&mut self, i: usize, ln_comp: ArrayView1<f64>) {
        match log_to_multi(ln_comp, self.tik.row_mut(i)) {
            Some(ln_sum) => self.completed_probability_cache[i] = ln_sum,
            None => {
                warn!("individual {i} has a null completed probability in every class");
                self.tik.row_mut(i).fill(1.0 / self.nb_class as f64);
                self.completed_probability_cache[i] = f64::NEG_INFINITY;
            }
        }
    }

    /// Recomputes every row of `tik` from the completed data.
    pub fn e_step(&mut self) {
        let rows: Vec<Array1<f64>> = (0..self.nb_ind)
            .into_par_iter()
            .map(|i| self.ln_completed_row(i))
            .collect();
        for (i, row) in rows.iter().enumerate() {
            self.normalize_tik_row(i, row.view());
        }
    }

    pub fn e_step_ind(&mut self, i: usize) {
        let row = self.ln_completed_row(i);
        self.normalize_tik_row(i, row.view());
    }

    /**
    Initializes `tik` from the observed probabilities, using only the models whose observed
    probability can be null.

    Individuals that no class can explain are all reported, with the `(class, variable)`
    couples that ruled them out. Their `tik` rows are left untouched.
    */
    pub fn e_step_observed(&mut self) -> Result<(), MixtError> {
        let nullable: Vec<&dyn Mixture> = self
            .mixtures
            .iter()
            .filter(|m| m.possible_null_probability())
            .map(|m| m.as_ref())
            .collect();
        let prop = &self.prop;
        let nb_class = self.nb_class;
        let rows: Vec<Array1<f64>> = (0..self.nb_ind)
            .into_par_iter()
            .map(|i| {
                Array1::from_shape_fn(nb_class, |k| {
                    prop[k].ln()
                        + nullable
                            .iter()
                            .map(|m| m.ln_observed_probability(i, k))
                            .sum::<f64>()
                })
            })
            .collect();

        let mut unrepresentable = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if log_to_multi(row.view(), self.tik.row_mut(i)).is_none() {
                let couples = (0..nb_class)
                    .flat_map(|k| {
                        nullable
                            .iter()
                            .filter(move |m| m.ln_observed_probability(i, k) == f64::NEG_INFINITY)
                            .map(move |m| (k, m.id_name().to_string()))
                    })
                    .collect();
                unrepresentable.push(UnrepresentableIndividual {
                    individual: i,
                    couples,
                });
            }
        }

        if unrepresentable.is_empty() {
            Ok(())
        } else {
            Err(MixtError::Unrepresentable(unrepresentable))
        }
    }

    /// Samples the label of `i`. With `check`, classes that would break the partition are
    /// vetoed. An individual with no admissible class keeps its label and is reported.
    pub fn s_step_ind(&mut self, i: usize, check: bool) -> Result<(), String> {
        let mixtures = &self.mixtures;
        let nb_class = self.nb_class;
        let tik = &self.tik;
        let prop = &self.prop;
        let mut hypothesis = if check { self.zi.data.clone() } else { Vec::new() };
        let gate = |k: usize| {
            hypothesis[i] = k;
            let view = ClassView {
                nb_class,
                zi: &hypothesis,
                tik: tik.view(),
                prop: prop.view(),
                subset: None,
            };
            check_partition(mixtures, &view).is_ok()
        };
        let gate = if check { Some(gate) } else { None };

        match self.sampler.sample_individual(&self.zi, i, tik.row(i), gate) {
            Some(k) => {
                self.zi.data[i] = k;
                Ok(())
            }
            None => Err(format!("individual {i} has no admissible class.\n")),
        }
    }

    /// Samples every label and returns the occupancy of the least populated class.
    pub fn s_step(&mut self) -> Result<usize, String> {
        let mut warn_log = String::new();
        for i in 0..self.nb_ind {
            if let Err(e) = self.s_step_ind(i, false) {
                warn_log += &e;
            }
        }
        if !warn_log.is_empty() {
            return Err(warn_log);
        }
        Ok(self.class_counts().into_iter().min().unwrap_or(0))
    }

    fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.nb_class];
        for &k in &self.zi.data {
            counts[k] += 1;
        }
        counts
    }

    /// Class frequencies of the current partition.
    pub fn p_step(&mut self) {
        let n = self.nb_ind as f64;
        let counts = self.class_counts();
        for (p, count) in self.prop.iter_mut().zip(counts) {
            *p = count as f64 / n;
        }
    }

    /// Proportions, then every model in registration order. All warnings are gathered.
    pub fn m_step(&mut self) -> Result<(), String> {
        self.m_step_on(None)
    }

    /// M-step where the models only see the individuals of `subset`. The proportions are
    /// still the frequencies of the whole partition.
    fn m_step_on(&mut self, subset: Option<&[usize]>) -> Result<(), String> {
        self.p_step();
        let view = ClassView {
            nb_class: self.nb_class,
            zi: &self.zi.data,
            tik: self.tik.view(),
            prop: self.prop.view(),
            subset,
        };
        let warn_log: String = self
            .mixtures
            .iter_mut()
            .filter_map(|m| {
                m.mstep(&view)
                    .err()
                    .map(|e| format!("mStep error in variable: {}\n{e}\n", m.id_name()))
            })
            .collect();
        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    /// Resamples the missing values of `i` in every model, given its current class.
    pub fn sampling_step(&mut self, i: usize) -> Result<(), String> {
        let k = self.zi.data[i];
        let warn_log: String = self
            .mixtures
            .iter_mut()
            .filter_map(|m| m.sampling_step(i, k).err())
            .collect();
        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    pub fn sampling_step_all(&mut self) -> Result<(), String> {
        let mut warn_log = String::new();
        for i in 0..self.nb_ind {
            if let Err(e) = self.sampling_step(i) {
                warn_log += &e;
            }
        }
        if warn_log.is_empty() {
            Ok(())
        } else {
            Err(warn_log)
        }
    }

    pub fn check_sample_condition(&self) -> Result<(), String> {
        check_partition(&self.mixtures, &self.view())
    }

    /// Sets every unobserved label to the mode of its `tik` row.
    pub fn map_step(&mut self) {
        for i in 0..self.nb_ind {
            if self.zi.is_present(i) {
                continue;
            }
            if let Ok(k) = self.tik.row(i).argmax() {
                self.zi.data[i] = k;
            }
        }
    }

    pub fn stability_reset(&mut self) {
        self.last_partition = None;
        self.nb_consecutive_stable = 0;
    }

    /// Whether the share of unchanged labels has reached `ratio` for `nb_stable`
    /// consecutive calls. The first call after a reset only records the partition.
    pub fn is_partition_stable(&mut self, ratio: f64, nb_stable: usize) -> bool {
        let identical = match &self.last_partition {
            Some(last) if self.nb_ind > 0 => {
                last.iter()
                    .zip(&self.zi.data)
                    .filter(|(a, b)| a == b)
                    .count() as f64
                    / self.nb_ind as f64
            }
            Some(_) => 0.0,
            None => {
                self.last_partition = Some(self.zi.data.clone());
                self.nb_consecutive_stable = 0;
                return false;
            }
        };
        if identical >= ratio {
            self.nb_consecutive_stable += 1;
        } else {
            self.nb_consecutive_stable = 0;
        }
        self.last_partition = Some(self.zi.data.clone());
        nb_stable <= self.nb_consecutive_stable
    }

    /**
    Records one SEM iteration.

    Both phases log the completed log-likelihood of the last E-step. Only the run phase
    feeds the parameter statistics. At its last iteration the proportions and the model
    parameters are replaced by their medians.
    */
    pub fn store_sem_run(&mut self, iteration: usize, iteration_max: usize, phase: SemPhase) {
        let ln_lik = self.completed_probability_cache.sum();
        let log = match phase {
            SemPhase::BurnIn => &mut self.completed_probability_log_burn_in,
            SemPhase::Run => &mut self.completed_probability_log_run,
        };
        if iteration == 0 {
            log.clear();
        }
        log.push(ln_lik);

        if phase == SemPhase::Run {
            for mixture in self.mixtures.iter_mut() {
                mixture.store_sem_run(iteration, iteration_max);
            }
            self.param_stat
                .sample_param(&self.prop.to_vec(), iteration, iteration_max);
            if iteration == iteration_max {
                self.param_stat.normalize_param(self.nb_class);
                let mut prop = self.prop.to_vec();
                self.param_stat.set_expectation_param(&mut prop);
                self.prop = Array1::from(prop);
            }
        }
    }

    pub fn store_gibbs_run(&mut self, i: usize, iteration: usize, iteration_max: usize) {
        self.data_stat.sample_vals(i, self.zi.data[i], iteration);
        if iteration == iteration_max {
            self.data_stat
                .impute_data(i, &mut self.zi, self.tik.row_mut(i));
        }
        for mixture in self.mixtures.iter_mut() {
            mixture.store_gibbs_run(i, iteration, iteration_max);
        }
    }

    /**
    Runs `nb_iter` Gibbs rounds on each individual in turn, then a MAP step.

    A round is an E-step, an S-step (gated by the partition check when `check` is set),
    a sampling step and, with `store`, the recording of the sampled values. The progress
    bar advances once per individual.
    */
    pub fn gibbs_sampling(
        &mut self,
        nb_iter: usize,
        pb: &ProgressBar,
        store: bool,
        check: bool,
    ) -> Result<(), String> {
        if nb_iter == 0 {
            return Ok(());
        }
        pb.set_length(self.nb_ind as u64);
        for i in 0..self.nb_ind {
            for iteration in 0..nb_iter {
                self.e_step_ind(i);
                if let Err(e) = self.s_step_ind(i, check) {
                    debug!("Gibbs keeps the current label: {}", e.trim_end());
                }
                self.sampling_step(i)?;
                if store {
                    self.store_gibbs_run(i, iteration, nb_iter - 1);
                }
            }
            pb.inc(1);
        }
        self.map_step();
        Ok(())
    }

    pub fn nb_free_parameters(&self) -> usize {
        self.nb_class - 1
            + self
                .mixtures
                .iter()
                .map(|m| m.nb_free_parameter())
                .sum::<usize>()
    }

    /// Log-likelihood with classes and missing values marginalized out.
    ///
    /// The per-individual terms are computed in parallel and summed in index order, so the
    /// value does not depend on the thread count.
    pub fn ln_observed_likelihood(&self) -> f64 {
        (0..self.nb_ind)
            .into_par_iter()
            .map(|i| {
                let row = self.ln_observed_row(i);
                let mut scratch = Array1::zeros(self.nb_class);
                log_to_multi(row.view(), scratch.view_mut()).unwrap_or(f64::NEG_INFINITY)
            })
            .collect::<Vec<f64>>()
            .iter()
            .sum()
    }

    /// Log-likelihood of the completed data under the current labels.
    pub fn ln_completed_likelihood(&self) -> f64 {
        (0..self.nb_ind)
            .into_par_iter()
            .map(|i| {
                let k = self.zi.data[i];
                self.prop[k].ln()
                    + self
                        .mixtures
                        .iter()
                        .map(|m| m.ln_completed_probability(i, k))
                        .sum::<f64>()
            })
            .collect::<Vec<f64>>()
            .iter()
            .sum()
    }

    /// Log-likelihood with the labels fixed and the missing values marginalized out.
    pub fn ln_semi_completed_likelihood(&self) -> f64 {
        (0..self.nb_ind)
            .into_par_iter()
            .map(|i| {
                let k = self.zi.data[i];
                self.prop[k].ln() + self.ln_observed_probability(i, k)
            })
            .collect::<Vec<f64>>()
            .iter()
            .sum()
    }

    fn penalty(&self) -> f64 {
        0.5 * self.nb_free_parameters() as f64 * (self.nb_ind as f64).ln()
    }

    pub fn bic(&self) -> f64 {
        self.ln_observed_likelihood() - self.penalty()
    }

    pub fn icl(&self) -> f64 {
        self.ln_semi_completed_likelihood() - self.penalty()
    }

    /// individual × class matrix of the observed log-probabilities, proportions excluded.
    pub fn ln_proba_given_class(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.nb_ind, self.nb_class), |(i, k)| self.ln_observed_probability(i, k))
    }

    /**
    Discriminative power of each variable for each class, as a class × variable matrix.

    For variable `j`, the responsibilities are computed from that variable alone and their
    entropy is summed per class over the individuals, then divided by `n ln K`. With a
    single class the matrix is filled with ones.
    */
    pub fn id_class(&self) -> Array2<f64> {
        let nb_var = self.mixtures.len();
        if self.nb_class == 1 {
            return Array2::ones((1, nb_var));
        }
        let mut ekj = Array2::<f64>::zeros((self.nb_class, nb_var));
        let mut t = Array1::<f64>::zeros(self.nb_class);
        for (j, mixture) in self.mixtures.iter().enumerate() {
            for i in 0..self.nb_ind {
                let ln_p = Array1::from_shape_fn(self.nb_class, |k| {
                    self.prop[k].ln() + mixture.ln_observed_probability(i, k)
                });
                if log_to_multi(ln_p.view(), t.view_mut()).is_none() {
                    continue;
                }
                for (k, &tk) in t.iter().enumerate() {
                    if tk > f64::EPSILON {
                        ekj[[k, j]] -= tk * tk.ln();
                    }
                }
            }
        }
        let den = self.nb_ind as f64 * (self.nb_class as f64).ln();
        ekj / den
    }

    /**
    Distances between variables as a symmetric variable × variable matrix.

    For each individual, the class probabilities given each variable alone are compared
    between variables: the entry `(j, h)` is the root mean over the individuals of the
    squared differences summed over the classes. Individuals that a variable cannot explain
    contribute nothing.
    */
    pub fn delta(&self) -> Array2<f64> {
        let nb_var = self.mixtures.len();
        let mut delta = Array2::<f64>::zeros((nb_var, nb_var));
        if self.nb_ind == 0 {
            return delta;
        }
        // class × variable
        let mut proba = Array2::<f64>::zeros((self.nb_class, nb_var));
        for i in 0..self.nb_ind {
            for (j, mixture) in self.mixtures.iter().enumerate() {
                let ln_p = Array1::from_shape_fn(self.nb_class, |k| {
                    self.prop[k].ln() + mixture.ln_observed_probability(i, k)
                });
                if log_to_multi(ln_p.view(), proba.column_mut(j)).is_none() {
                    proba.column_mut(j).fill(1.0 / self.nb_class as f64);
                }
            }
            for j in 0..nb_var {
                for h in j + 1..nb_var {
                    let diff = &proba.column(j) - &proba.column(h);
                    delta[[j, h]] += diff.dot(&diff);
                }
            }
        }
        let n = self.nb_ind as f64;
        for j in 0..nb_var {
            for h in j + 1..nb_var {
                let d = (delta[[j, h]] / n).sqrt();
                delta[[j, h]] = d;
                delta[[h, j]] = d;
            }
        }
        delta
    }

    /// Pushes the latent class, the criteria and every model through the sinks.
    pub fn export_mixture(&self, data_ex: &mut dyn DataExtractor, param_ex: &mut dyn ParamExtractor) {
        let labels: Vec<f64> = self.zi.data.iter().map(|&k| k as f64 + 1.0).collect();
        data_ex.export_vals(CLASS_ID, &labels, &[]);
        data_ex.export_matrix("tik", self.tik.view());
        data_ex.export_matrix("lnProbaGivenClass", self.ln_proba_given_class().view());
        data_ex.export_matrix("IDClass", self.id_class().view());
        data_ex.export_matrix("Delta", self.delta().view());

        let as_column = |log: &[f64]| Array1::from(log.to_vec()).insert_axis(Axis(1));
        data_ex.export_matrix(
            "completedProbabilityLogBurnIn",
            as_column(&self.completed_probability_log_burn_in).view(),
        );
        data_ex.export_matrix(
            "completedProbabilityLogRun",
            as_column(&self.completed_probability_log_run).view(),
        );

        let names: Vec<String> = (0..self.nb_class).map(|k| format!("k: {}", k + 1)).collect();
        param_ex.export_param(
            CLASS_ID,
            PROP_NAME,
            self.param_stat.stat_storage().view(),
            self.param_stat.log_storage().view(),
            &names,
            self.confidence_level,
        );

        let ln_observed = self.ln_observed_likelihood();
        let ln_completed = self.ln_completed_likelihood();
        let ln_semi_completed = self.ln_semi_completed_likelihood();
        let bic = ln_observed - self.penalty();
        let icl = ln_semi_completed - self.penalty();
        info!("lnObservedLikelihood: {ln_observed}, BIC: {bic}, ICL: {icl}");
        param_ex.export_scalar("nbFreeParameters", self.nb_free_parameters() as f64);
        param_ex.export_scalar("lnObservedLikelihood", ln_observed);
        param_ex.export_scalar("lnCompletedLikelihood", ln_completed);
        param_ex.export_scalar("lnSemiCompletedLikelihood", ln_semi_completed);
        param_ex.export_scalar("BIC", bic);
        param_ex.export_scalar("ICL", icl);

        for mixture in &self.mixtures {
            mixture.export_data_param(data_ex, param_ex);
        }
    }

    pub fn write_parameters(&self) -> String {
        let mut out = String::from("Composer parameters\n");
        for (k, p) in self.prop.iter().enumerate() {
            out += &format!("\tk: {k}, prop: {p}\n");
        }
        for mixture in &self.mixtures {
            out += &mixture.write_parameters();
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::{MemoryDataHandler, MemoryExtractor};
    use approx::assert_abs_diff_eq;

    /// Model with fixed log-probabilities, no missing values and a configurable sample
    /// condition.
    pub(crate) struct FixedMixture {
        pub id: String,
        /// individual × class
        pub ln_proba: Array2<f64>,
        pub nullable: bool,
        pub min_per_class: usize,
        pub nb_mstep: usize,
    }

    impl FixedMixture {
        pub fn new(id: &str, ln_proba: Array2<f64>) -> Self {
            Self {
                id: id.to_string(),
                ln_proba,
                nullable: false,
                min_per_class: 0,
                nb_mstep: 0,
            }
        }
    }

    impl Mixture for FixedMixture {
        fn id_name(&self) -> &str {
            &self.id
        }

        fn model_type(&self) -> &'static str {
            "Fixed"
        }

        fn accepted_type(&self) -> Vec<MisType> {
            vec![MisType::Present]
        }

        fn nb_free_parameter(&self) -> usize {
            self.ln_proba.ncols()
        }

        fn set_data_param(
            &mut self,
            _mode: RunMode,
            handler: &dyn DataHandler,
            _setter: Option<&dyn ParamSetter>,
        ) -> Result<(), String> {
            if handler.nb_sample() == self.ln_proba.nrows() {
                Ok(())
            } else {
                Err(format!("{} expects {} individuals.\n", self.id, self.ln_proba.nrows()))
            }
        }

        fn init_data(&mut self, _i: usize) -> Result<(), String> {
            Ok(())
        }

        fn mstep(&mut self, _view: &ClassView) -> Result<(), String> {
            self.nb_mstep += 1;
            Ok(())
        }

        fn ln_completed_probability(&self, i: usize, k: usize) -> f64 {
            self.ln_proba[[i, k]]
        }

        fn ln_observed_probability(&self, i: usize, k: usize) -> f64 {
            self.ln_proba[[i, k]]
        }

        fn possible_null_probability(&self) -> bool {
            self.nullable
        }

        fn sampling_step(&mut self, _i: usize, _k: usize) -> Result<(), String> {
            Ok(())
        }

        fn check_sample_condition(&self, view: &ClassView) -> Result<(), String> {
            let short = view
                .class_ind()
                .iter()
                .any(|ind| ind.len() < self.min_per_class);
            if short {
                Err(format!("{}: a class is too small.\n", self.id))
            } else {
                Ok(())
            }
        }

        fn store_sem_run(&mut self, _iteration: usize, _iteration_max: usize) {}

        fn store_gibbs_run(&mut self, _i: usize, _iteration: usize, _iteration_max: usize) {}

        fn export_data_param(&self, _data_ex: &mut dyn DataExtractor, _param_ex: &mut dyn ParamExtractor) {}

        fn write_parameters(&self) -> String {
            format!("Variable {}\n", self.id)
        }
    }

    pub(crate) fn composer_with(mixtures: Vec<FixedMixture>, nb_class: usize, seed: u64) -> MixtureComposer {
        let nb_ind = mixtures[0].ln_proba.nrows();
        let mut ctx = RngContext::deterministic(seed);
        let mut composer = MixtureComposer::new(nb_class, 0.95, &mut ctx).unwrap();
        for m in mixtures {
            composer.register_mixture(Box::new(m));
        }
        let handler = MemoryDataHandler::new(nb_ind);
        composer
            .set_data_param(RunMode::Learning, &handler, None)
            .unwrap();
        composer
    }

    fn assert_rows_sum_to_one(composer: &MixtureComposer) {
        for row in composer.tik().rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn invalid_confidence_level() {
        let mut ctx = RngContext::deterministic(0);
        assert!(matches!(
            MixtureComposer::new(2, 1.5, &mut ctx),
            Err(MixtError::InvalidConfig(_))
        ));
        assert!(MixtureComposer::new(0, 0.9, &mut ctx).is_err());
    }

    #[test]
    fn e_step_normalizes_rows() {
        let ln = array![[0.3f64.ln(), 0.3f64.ln(), 0.4f64.ln()], [-1000.0, -1001.0, -1002.0]];
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 3, 0);
        composer.e_step();
        assert_rows_sum_to_one(&composer);
        assert_abs_diff_eq!(composer.tik()[[0, 2]], 0.4, epsilon = 1e-9);
        assert!(composer.tik()[[1, 0]] > composer.tik()[[1, 1]]);
    }

    #[test]
    fn e_step_uniform_fallback() {
        let ln = array![[f64::NEG_INFINITY, f64::NEG_INFINITY]];
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 2, 0);
        composer.e_step();
        assert_eq!(composer.tik().row(0).to_vec(), vec![0.5, 0.5]);
    }

    #[test]
    fn s_and_p_steps_keep_invariants() {
        let ln = Array2::from_shape_fn((20, 3), |(i, k)| -((i % 3) as f64 - k as f64).powi(2));
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 3, 5);
        composer.e_step();
        composer.s_step().unwrap();
        assert!(composer.zi().data.iter().all(|&k| k < 3));
        composer.p_step();
        assert_abs_diff_eq!(composer.prop().sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn single_class() {
        let ln = array![[-1.0], [-2.0], [-0.5]];
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 1, 0);
        composer.e_step();
        assert!(composer.tik().iter().all(|&t| t == 1.0));
        assert_eq!(composer.s_step().unwrap(), 3);
        assert!(composer.zi().data.iter().all(|&k| k == 0));
        assert_eq!(composer.nb_free_parameters(), 1);
        assert_eq!(composer.id_class(), Array2::<f64>::ones((1, 1)));
    }

    #[test]
    fn degenerate_occupancy() {
        let ln = Array2::from_shape_fn((3, 2), |(_, k)| if k == 0 { 0.0 } else { -1000.0 });
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 2, 0);
        composer.e_step();
        assert_eq!(composer.s_step().unwrap(), 0);
        let err = composer.check_sample_condition().unwrap_err();
        assert!(err.contains("at least one class is empty"));
    }

    #[test]
    fn impossible_individual_is_reported() {
        let mut fixed = FixedMixture::new("color", array![[0.0], [f64::NEG_INFINITY]]);
        fixed.nullable = true;
        let mut composer = composer_with(vec![fixed], 1, 0);
        match composer.e_step_observed() {
            Err(MixtError::Unrepresentable(list)) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].individual, 1);
                assert_eq!(list[0].couples, vec![(0, "color".to_string())]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_nullable_models_are_skipped_by_observed_step() {
        let fixed = FixedMixture::new("x", array![[f64::NEG_INFINITY, f64::NEG_INFINITY]]);
        let mut composer = composer_with(vec![fixed], 2, 0);
        assert!(composer.e_step_observed().is_ok());
        assert_abs_diff_eq!(composer.tik().row(0).sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn m_step_reaches_every_model() {
        let ln = Array2::zeros((4, 2));
        let mut composer = composer_with(
            vec![FixedMixture::new("a", ln.clone()), FixedMixture::new("b", ln)],
            2,
            1,
        );
        composer.init_data().unwrap();
        composer.m_step().unwrap();
        assert_abs_diff_eq!(composer.prop().sum(), 1.0, epsilon = 1e-12);
        assert_eq!(composer.nb_free_parameters(), 1 + 2 + 2);
    }

    #[test]
    fn gated_s_step_keeps_every_class_populated() {
        let ln = Array2::from_shape_fn((6, 2), |(_, k)| if k == 0 { 0.0 } else { -5.0 });
        let mut fixed = FixedMixture::new("x", ln);
        fixed.min_per_class = 2;
        let mut composer = composer_with(vec![fixed], 2, 3);
        for i in 0..6 {
            composer.zi.data[i] = i % 2;
        }
        for _ in 0..20 {
            for i in 0..6 {
                composer.e_step_ind(i);
                composer.s_step_ind(i, true).unwrap();
                assert!(composer.check_sample_condition().is_ok());
            }
        }
    }

    #[test]
    fn stability_counter() {
        let ln = Array2::zeros((2, 2));
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 2, 0);
        composer.stability_reset();
        assert!(!composer.is_partition_stable(0.9, 2));
        assert!(!composer.is_partition_stable(0.9, 2));
        assert!(composer.is_partition_stable(0.9, 2));
        composer.zi.data[0] = 1 - composer.zi.data[0];
        assert!(!composer.is_partition_stable(0.9, 2));
    }

    #[test]
    fn first_stability_call_is_never_stable() {
        let ln = Array2::zeros((2, 2));
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 2, 0);
        composer.stability_reset();
        assert!(!composer.is_partition_stable(0.0, 1));
        assert!(composer.is_partition_stable(0.0, 1));
        composer.stability_reset();
        assert!(!composer.is_partition_stable(0.0, 1));
    }

    #[test]
    fn likelihoods_are_summed_in_index_order() {
        let n = 2000;
        let ln = Array2::from_shape_fn((n, 3), |(i, k)| -(((i * 7 + k * 13) % 101) as f64) / 3.7 - 1e-3 * i as f64);
        let mut composer = composer_with(vec![FixedMixture::new("x", ln.clone())], 3, 2);
        composer.init_data().unwrap();
        composer.p_step();

        let prop = composer.prop().to_owned();
        let zi = composer.zi().data.clone();
        let completed: f64 = (0..n).map(|i| prop[zi[i]].ln() + ln[[i, zi[i]]]).sum();
        assert_eq!(composer.ln_completed_likelihood(), completed);
        assert_eq!(composer.ln_semi_completed_likelihood(), completed);

        let observed: f64 = (0..n)
            .map(|i| {
                let row = Array1::from_shape_fn(3, |k| prop[k].ln() + ln[[i, k]]);
                let mut scratch = Array1::zeros(3);
                log_to_multi(row.view(), scratch.view_mut()).unwrap()
            })
            .sum();
        for _ in 0..5 {
            assert_eq!(composer.ln_observed_likelihood(), observed);
        }
    }

    #[test]
    fn sub_partition_is_checked_on_the_subset_only() {
        let ln = Array2::zeros((10, 2));
        let mut fixed = FixedMixture::new("x", ln);
        fixed.min_per_class = 4;
        let mut composer = composer_with(vec![fixed], 2, 4);
        for i in 0..10 {
            composer.zi.data[i] = i % 2;
        }
        assert!(composer.check_sample_condition().is_ok());

        // six individuals out of two classes of five always leave one class below four
        let err = composer.init_param_sub_partition(3).unwrap_err();
        assert!(err.contains("too small"));

        composer.init_param_sub_partition(5).unwrap();
        assert_abs_diff_eq!(composer.prop(), array![0.5, 0.5], epsilon = 1e-12);
    }

    #[test]
    fn latent_state_follows_observed_probabilities() {
        let ln = Array2::from_shape_fn((6, 2), |(i, k)| if i % 2 == k { 0.0 } else { f64::NEG_INFINITY });
        let mut fixed = FixedMixture::new("x", ln);
        fixed.nullable = true;
        let mut composer = composer_with(vec![fixed], 2, 1);
        composer.initialize_latent(true).unwrap();
        assert_eq!(composer.zi().data, vec![0, 1, 0, 1, 0, 1]);
        assert_rows_sum_to_one(&composer);
    }

    #[test]
    fn delta_separates_informative_variables() {
        let sharp = Array2::from_shape_fn((4, 2), |(i, k)| if i % 2 == k { 0.0 } else { f64::NEG_INFINITY });
        let composer = composer_with(
            vec![
                FixedMixture::new("a", sharp.clone()),
                FixedMixture::new("b", sharp),
                FixedMixture::new("flat", Array2::zeros((4, 2))),
            ],
            2,
            0,
        );
        let delta = composer.delta();
        let d = 0.5f64.sqrt();
        assert_abs_diff_eq!(
            delta,
            array![[0.0, 0.0, d], [0.0, 0.0, d], [d, d, 0.0]],
            epsilon = 1e-12
        );
    }

    #[test]
    fn supervised_labels_are_kept() {
        let mut ctx = RngContext::deterministic(0);
        let mut composer = MixtureComposer::new(2, 0.95, &mut ctx).unwrap();
        composer.register_mixture(Box::new(FixedMixture::new("x", Array2::zeros((3, 2)))));
        let mut handler = MemoryDataHandler::new(3);
        handler.add_variable(CLASS_ID, "LatentClass", &["2", "?", "{1,2}"]);
        composer
            .set_data_param(RunMode::Learning, &handler, None)
            .unwrap();
        for _ in 0..10 {
            composer.s_step().unwrap();
            assert_eq!(composer.zi().data[0], 1);
        }
        composer.tik.row_mut(0).assign(&array![1.0, 0.0]);
        composer.map_step();
        assert_eq!(composer.zi().data[0], 1);
    }

    #[test]
    fn label_beyond_class_count_is_rejected() {
        let mut ctx = RngContext::deterministic(0);
        let mut composer = MixtureComposer::new(2, 0.95, &mut ctx).unwrap();
        composer.register_mixture(Box::new(FixedMixture::new("x", Array2::zeros((2, 2)))));
        let mut handler = MemoryDataHandler::new(2);
        handler.add_variable(CLASS_ID, "LatentClass", &["3", "?"]);
        let err = composer
            .set_data_param(RunMode::Learning, &handler, None)
            .unwrap_err();
        assert!(err.to_string().contains("contains the class 3"));
    }

    #[test]
    fn sem_run_stores_proportions() {
        let ln = Array2::zeros((4, 2));
        let mut composer = composer_with(vec![FixedMixture::new("x", ln)], 2, 0);
        composer.init_data().unwrap();
        for it in 0..=4 {
            composer.e_step();
            composer.store_sem_run(it, 4, SemPhase::Run);
        }
        assert_eq!(composer.completed_probability_log_run().len(), 5);
        assert_abs_diff_eq!(composer.prop().sum(), 1.0, epsilon = 1e-12);

        let mut data_ex = MemoryExtractor::new();
        let mut param_ex = MemoryExtractor::new();
        composer.export_mixture(&mut data_ex, &mut param_ex);
        assert_eq!(data_ex.vals[CLASS_ID].completed.len(), 4);
        assert_eq!(data_ex.matrices["completedProbabilityLogRun"].dim(), (5, 1));
        assert_eq!(data_ex.matrices["IDClass"].dim(), (2, 1));
        assert_eq!(data_ex.matrices["Delta"], array![[0.0]]);
        let pi = param_ex.param(CLASS_ID, PROP_NAME).unwrap();
        assert_eq!(pi.stat.dim(), (2, 3));
        assert_eq!(pi.log.dim(), (2, 5));
        assert_eq!(param_ex.scalars["nbFreeParameters"], 3.0);
        assert!(param_ex.scalars["BIC"] <= param_ex.scalars["lnObservedLikelihood"]);
    }
}
